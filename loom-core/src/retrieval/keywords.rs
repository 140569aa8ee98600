//! Keyword trigger matching for lorebook entries.
//!
//! Keywords come from authored world documents and are untrusted input:
//! regex keywords are a fallible parse, never an unchecked compile, and
//! an invalid pattern falls through to the cheaper strategies instead of
//! failing the match.

use super::distance::fuzzy_match;
use regex::RegexBuilder;

/// Decide whether `keyword` fires against `text`. Case-insensitive
/// throughout.
///
/// The match chain, first success wins:
/// 1. A slash-delimited `/pattern/flags` keyword is compiled as a regex
///    (case-insensitivity forced on) and tested against the raw text.
/// 2. With `whole_word`, the escaped keyword is tested at word
///    boundaries.
/// 3. Plain case-folded substring containment.
/// 4. With `use_fuzzy`, each whitespace-separated word of the text is
///    compared by edit distance — skipped for CJK keywords, where
///    character-level distance over unsegmented text is meaningless.
pub fn matches(text: &str, keyword: &str, whole_word: bool, use_fuzzy: bool) -> bool {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return false;
    }

    if let Some(re) = parse_regex_keyword(keyword) {
        return re.is_match(text);
    }

    if whole_word {
        if let Some(re) = word_boundary_pattern(keyword) {
            if re.is_match(text) {
                return true;
            }
        }
    }

    let text_lower = text.to_lowercase();
    let keyword_lower = keyword.to_lowercase();
    if text_lower.contains(&keyword_lower) {
        return true;
    }

    if use_fuzzy && !contains_cjk(keyword) {
        return text_lower
            .split_whitespace()
            .any(|word| fuzzy_match(&keyword_lower, word));
    }

    false
}

/// Parse a `/pattern/flags` keyword into a compiled regex.
///
/// Returns `None` for keywords that are not regex literals, carry
/// unsupported flags, or fail to compile — callers fall through to the
/// next matching strategy.
fn parse_regex_keyword(keyword: &str) -> Option<regex::Regex> {
    let rest = keyword.strip_prefix('/')?;
    let close = rest.rfind('/')?;
    let pattern = &rest[..close];
    let flags = &rest[close + 1..];

    if pattern.is_empty() {
        return None;
    }

    let mut builder = RegexBuilder::new(pattern);
    builder.case_insensitive(true);
    for flag in flags.chars() {
        match flag {
            'i' => {} // already forced on
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            // JS-style flags with no meaning here
            'g' | 'u' => {}
            _ => return None,
        }
    }

    builder.build().ok()
}

/// Compile a case-insensitive word-boundary pattern for a literal
/// keyword.
fn word_boundary_pattern(keyword: &str) -> Option<regex::Regex> {
    RegexBuilder::new(&format!(r"\b{}\b", regex::escape(keyword)))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Whether any codepoint falls in a CJK block (Han, kana, hangul).
fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| {
        matches!(c as u32,
            0x3040..=0x30FF   // hiragana + katakana
            | 0x3400..=0x4DBF // CJK extension A
            | 0x4E00..=0x9FFF // CJK unified ideographs
            | 0xAC00..=0xD7AF // hangul syllables
            | 0xF900..=0xFAFF // CJK compatibility ideographs
        )
    })
}
