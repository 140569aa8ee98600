//! Response parsing.
//!
//! Extracts engine-reserved markup from raw narrator output: `<choices>`
//! blocks listing the player's options and self-closing `<state/>` tags
//! carrying state directives. Model output is untrusted; anything
//! malformed or unrecognized stays in the display text as literal
//! characters, and parsing never fails.

use crate::rules::{Effect, EffectOp};
use crate::world::Value;
use regex::Regex;
use std::sync::OnceLock;

/// The structured pieces of one narrator reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReply {
    /// The reply with recognized markup removed.
    pub display_text: String,
    /// Player options extracted from `<choices>` blocks.
    pub choices: Vec<String>,
    /// State directives extracted from `<state/>` tags.
    pub directives: Vec<Effect>,
}

fn choices_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<choices>\s*(.*?)\s*</choices>").expect("static pattern")
    })
}

fn state_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<state\s+([^<>]*?)/>").expect("static pattern"))
}

fn attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([a-zA-Z_]\w*)\s*=\s*"([^"]*)""#).expect("static pattern"))
}

/// Parse one raw completion into display text, choices, and directives.
pub fn parse(raw: &str) -> ParsedReply {
    let mut reply = ParsedReply::default();
    let mut text = raw.to_string();

    // Choice blocks: every well-formed block is consumed; a block with
    // no recognizable items stays literal.
    loop {
        let Some(captures) = choices_regex().captures(&text) else {
            break;
        };
        let whole = captures.get(0).expect("capture 0 always present").range();
        let body = captures.get(1).map(|m| m.as_str()).unwrap_or("");

        let items = parse_choice_items(body);
        if items.is_empty() {
            // Malformed: leave it visible and stop scanning so we do
            // not loop on the same block forever.
            break;
        }

        reply.choices.extend(items);
        text.replace_range(whole, "");
    }

    // State tags: recognized ones become directives, the rest stay put.
    let mut cursor = 0;
    let mut cleaned = String::with_capacity(text.len());
    for captures in state_tag_regex().captures_iter(&text) {
        let whole = captures.get(0).expect("capture 0 always present");
        let attrs = captures.get(1).map(|m| m.as_str()).unwrap_or("");

        cleaned.push_str(&text[cursor..whole.start()]);
        match parse_state_tag(attrs) {
            Some(effect) => reply.directives.push(effect),
            None => cleaned.push_str(whole.as_str()),
        }
        cursor = whole.end();
    }
    cleaned.push_str(&text[cursor..]);

    reply.display_text = tidy_whitespace(&cleaned);
    reply
}

fn parse_choice_items(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            trimmed
                .strip_prefix('-')
                .map(|rest| rest.trim().to_string())
        })
        .filter(|item| !item.is_empty())
        .collect()
}

/// Parse the attribute list of a `<state/>` tag into an effect.
///
/// Requires `var` and a recognized `op`; `value` is optional for
/// `toggle` and defaults to empty text otherwise. Any shortfall means
/// the tag is not ours to consume.
fn parse_state_tag(attrs: &str) -> Option<Effect> {
    let mut var = None;
    let mut op = None;
    let mut value = None;

    for captures in attribute_regex().captures_iter(attrs) {
        let key = captures.get(1)?.as_str();
        let raw = captures.get(2)?.as_str();
        match key {
            "var" => var = Some(raw.to_string()),
            "op" => op = parse_op(raw),
            "value" => value = Some(parse_value(raw)),
            _ => {}
        }
    }

    Some(Effect {
        variable_id: var?,
        op: op?,
        value: value.unwrap_or_default(),
    })
}

fn parse_op(raw: &str) -> Option<EffectOp> {
    match raw {
        "set" => Some(EffectOp::Set),
        "add" => Some(EffectOp::Add),
        "subtract" => Some(EffectOp::Subtract),
        "multiply" => Some(EffectOp::Multiply),
        "toggle" => Some(EffectOp::Toggle),
        "append" => Some(EffectOp::Append),
        _ => None,
    }
}

/// Attribute values are typed by shape: booleans, then numbers, then
/// text.
fn parse_value(raw: &str) -> Value {
    match raw {
        "true" => Value::Flag(true),
        "false" => Value::Flag(false),
        _ => raw
            .parse::<f64>()
            .map(Value::Number)
            .unwrap_or_else(|_| Value::Text(raw.to_string())),
    }
}

/// Collapse the residue of removed markup: runs of 3+ newlines and
/// trailing space.
fn tidy_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut newlines = 0;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines <= 2 {
                result.push(c);
            }
        } else {
            newlines = 0;
            result.push(c);
        }
    }
    result.trim().to_string()
}
