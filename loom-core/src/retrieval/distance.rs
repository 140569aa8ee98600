//! Edit distance for fuzzy keyword matching.

/// Compute the Levenshtein distance between two strings.
///
/// Classic dynamic programming over insert/delete/substitute at unit
/// cost, kept to a single rolling row so working memory is
/// O(min(|a|, |b|)). Operates on `char`s rather than bytes so accented
/// and multi-byte text measures correctly.
pub fn distance(a: &str, b: &str) -> usize {
    if a == b {
        return 0;
    }

    let (shorter, longer) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };

    let short: Vec<char> = shorter.chars().collect();
    if short.is_empty() {
        return longer.chars().count();
    }

    // row[j] holds the distance between the first i chars of `longer`
    // and the first j chars of `shorter`.
    let mut row: Vec<usize> = (0..=short.len()).collect();

    for (i, lc) in longer.chars().enumerate() {
        let mut previous_diagonal = row[0];
        row[0] = i + 1;

        for (j, sc) in short.iter().enumerate() {
            let substitution_cost = if lc == *sc { 0 } else { 1 };
            let next = (row[j] + 1)
                .min(row[j + 1] + 1)
                .min(previous_diagonal + substitution_cost);
            previous_diagonal = row[j + 1];
            row[j + 1] = next;
        }
    }

    row[short.len()]
}

/// Whether `target` is a close-enough misspelling of `needle`.
///
/// Short keywords stay strict (threshold 1 up to 5 chars) to avoid
/// false positives among short common words; longer tokens tolerate
/// more drift (threshold 2).
pub fn fuzzy_match(needle: &str, target: &str) -> bool {
    let threshold = if needle.chars().count() <= 5 { 1 } else { 2 };
    distance(needle, target) <= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_strings() {
        assert_eq!(distance("dragon", "dragon"), 0);
        assert_eq!(distance("", ""), 0);
    }

    #[test]
    fn test_empty_side() {
        assert_eq!(distance("", "cave"), 4);
        assert_eq!(distance("cave", ""), 4);
    }

    #[test]
    fn test_known_distances() {
        assert_eq!(distance("cat", "bat"), 1);
        assert_eq!(distance("cat", "cart"), 1);
        assert_eq!(distance("kitten", "sitting"), 3);
        assert_eq!(distance("flaw", "lawn"), 2);
    }

    #[test]
    fn test_symmetry() {
        let pairs = [("sword", "words"), ("tavern", "cavern"), ("a", "xyz")];
        for (a, b) in pairs {
            assert_eq!(distance(a, b), distance(b, a));
        }
    }

    #[test]
    fn test_triangle_inequality() {
        let samples = ["dragon", "wagon", "dungeon", "druid", ""];
        for a in samples {
            for b in samples {
                for c in samples {
                    assert!(distance(a, c) <= distance(a, b) + distance(b, c));
                }
            }
        }
    }

    #[test]
    fn test_multibyte_chars() {
        // One substitution, not a byte-level mess
        assert_eq!(distance("héro", "hero"), 1);
    }

    #[test]
    fn test_fuzzy_threshold_short() {
        assert!(fuzzy_match("cat", "bat"));
        assert!(!fuzzy_match("cat", "dog"));
        // Two edits on a short needle is too far
        assert!(!fuzzy_match("cat", "coat's"));
    }

    #[test]
    fn test_fuzzy_threshold_long() {
        assert!(fuzzy_match("tavernkeeper", "tavernkeepr"));
        assert!(fuzzy_match("tavernkeeper", "tavernkepr"));
        assert!(!fuzzy_match("tavernkeeper", "shopkeeper"));
    }
}
