//! World definition types.
//!
//! A `WorldDefinition` is the declarative aggregate root for a
//! narrative scenario: variables, rules, characters, lorebook entries,
//! presentation components, audio tracks, and settings. It is validated
//! once at the boundary and immutable for the duration of a turn; a new
//! definition requires a fresh game state.

use crate::components::ComponentDef;
use crate::rules::Rule;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from world document validation.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("World has no id")]
    MissingId,

    #[error("Duplicate variable id: {0}")]
    DuplicateVariable(String),

    #[error("Duplicate lorebook entry id: {0}")]
    DuplicateEntry(String),

    #[error("Variable '{id}' default is {found}, expected {expected}")]
    DefaultTypeMismatch {
        id: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Variable '{id}' has min {min} greater than max {max}")]
    InvertedBounds { id: String, min: f64, max: f64 },

    #[error("Rule '{rule_id}' references unknown variable '{variable_id}'")]
    UnknownRuleVariable { rule_id: String, variable_id: String },

    #[error("Component '{component_id}' references unknown variable '{variable_id}'")]
    UnknownComponentVariable {
        component_id: String,
        variable_id: String,
    },
}

/// A runtime value held by a game-state variable.
///
/// Authored variables declare one of the three scalar kinds; lists
/// appear at runtime (party rosters, discovered clues) so `contains`
/// has a membership form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Flag(bool),
    Number(f64),
    Text(String),
    List(Vec<Value>),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Value::Flag(b) => Some(*b),
            _ => None,
        }
    }

    /// The kind name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Flag(_) => "flag",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::List(_) => "list",
        }
    }

    /// Render the value the way it should appear inside prompt text.
    pub fn display_string(&self) -> String {
        match self {
            Value::Flag(b) => b.to_string(),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Value::Text(s) => s.clone(),
            Value::List(items) => items
                .iter()
                .map(Value::display_string)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Whether this value fits the declared variable kind.
    pub fn matches_kind(&self, kind: VariableKind) -> bool {
        matches!(
            (self, kind),
            (Value::Number(_), VariableKind::Number)
                | (Value::Text(_), VariableKind::Text)
                | (Value::Flag(_), VariableKind::Flag)
        )
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Text(String::new())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_string())
    }
}

/// The declared type of an authored variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    Number,
    Text,
    Flag,
}

impl VariableKind {
    pub fn name(&self) -> &'static str {
        match self {
            VariableKind::Number => "number",
            VariableKind::Text => "text",
            VariableKind::Flag => "flag",
        }
    }
}

/// An authored variable definition.
///
/// Definitions are immutable; instances live only as entries in the
/// game state's variable map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub id: String,
    pub name: String,
    pub kind: VariableKind,
    pub default: Value,
    /// Lower clamp for numeric values.
    #[serde(default)]
    pub min: Option<f64>,
    /// Upper clamp for numeric values.
    #[serde(default)]
    pub max: Option<f64>,
}

impl Variable {
    pub fn number(id: impl Into<String>, name: impl Into<String>, default: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: VariableKind::Number,
            default: Value::Number(default),
            min: None,
            max: None,
        }
    }

    pub fn text(id: impl Into<String>, name: impl Into<String>, default: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: VariableKind::Text,
            default: Value::Text(default.into()),
            min: None,
            max: None,
        }
    }

    pub fn flag(id: impl Into<String>, name: impl Into<String>, default: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: VariableKind::Flag,
            default: Value::Flag(default),
            min: None,
            max: None,
        }
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }
}

/// A character the narrator can play.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterDef {
    pub id: String,
    pub name: String,
    /// Persona text injected into the system prompt when active.
    #[serde(default)]
    pub persona: String,
    /// Opening line used to seed a fresh session.
    #[serde(default)]
    pub greeting: Option<String>,
}

/// A keyed piece of world knowledge injected into the prompt when its
/// trigger condition (keyword or semantic match) is satisfied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LorebookEntry {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Keywords must match at word boundaries.
    #[serde(default)]
    pub whole_word: bool,
    /// Keywords tolerate close misspellings.
    #[serde(default)]
    pub use_fuzzy: bool,
    /// Entry participates in embedding-based retrieval.
    #[serde(default)]
    pub use_semantic: bool,
    /// Entry is always injected, budget permitting.
    #[serde(default)]
    pub constant: bool,
    /// Insertion order among admitted entries (lower first).
    #[serde(default)]
    pub order: i32,
}

impl LorebookEntry {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            text: text.into(),
            keywords: Vec::new(),
            whole_word: false,
            use_fuzzy: false,
            use_semantic: false,
            constant: false,
            order: 0,
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn constant(mut self) -> Self {
        self.constant = true;
        self
    }

    pub fn semantic(mut self) -> Self {
        self.use_semantic = true;
        self
    }
}

/// How an audio track is meant to be played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioKind {
    Music,
    Ambience,
    Effect,
}

/// An audio asset referenced by rules' audio effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTrack {
    pub id: String,
    pub name: String,
    pub url: String,
    pub kind: AudioKind,
    #[serde(default)]
    pub looping: bool,
}

/// Tunable knobs for prompting and retrieval, with builder-style
/// setters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSettings {
    /// Base system prompt describing the narrator's job.
    pub system_prompt: String,

    /// Token budget for the assembled context.
    pub token_budget: usize,

    /// Weight of the lexical (BM25) ranker in retrieval.
    pub lexical_weight: f32,

    /// Weight of the semantic (embedding) ranker in retrieval.
    pub semantic_weight: f32,

    /// Whether semantic retrieval runs at all.
    pub semantic_retrieval: bool,

    /// Model override passed through to the gateway.
    #[serde(default)]
    pub model: Option<String>,

    /// Sampling temperature for narration.
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Response length cap.
    pub max_tokens: usize,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            system_prompt: "You are the narrator of an interactive story. Stay in character, \
                            describe consequences vividly, and never speak for the player."
                .to_string(),
            token_budget: 4096,
            lexical_weight: 0.6,
            semantic_weight: 0.4,
            semantic_retrieval: false,
            model: None,
            temperature: Some(0.8),
            max_tokens: 1024,
        }
    }
}

impl WorldSettings {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_token_budget(mut self, budget: usize) -> Self {
        self.token_budget = budget;
        self
    }

    pub fn with_retrieval_weights(mut self, lexical: f32, semantic: f32) -> Self {
        self.lexical_weight = lexical;
        self.semantic_weight = semantic;
        self
    }

    pub fn with_semantic_retrieval(mut self, enabled: bool) -> Self {
        self.semantic_retrieval = enabled;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// The declarative aggregate root for a narrative scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub characters: Vec<CharacterDef>,
    #[serde(default)]
    pub lorebook: Vec<LorebookEntry>,
    #[serde(default)]
    pub components: Vec<ComponentDef>,
    #[serde(default)]
    pub audio: Vec<AudioTrack>,
    #[serde(default)]
    pub settings: WorldSettings,
}

impl WorldDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            variables: Vec::new(),
            rules: Vec::new(),
            characters: Vec::new(),
            lorebook: Vec::new(),
            components: Vec::new(),
            audio: Vec::new(),
            settings: WorldSettings::default(),
        }
    }

    /// Look up a variable definition by id.
    pub fn variable(&self, id: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.id == id)
    }

    /// Look up a character by id.
    pub fn character(&self, id: &str) -> Option<&CharacterDef> {
        self.characters.iter().find(|c| c.id == id)
    }

    /// Look up an audio track by id.
    pub fn audio_track(&self, id: &str) -> Option<&AudioTrack> {
        self.audio.iter().find(|a| a.id == id)
    }

    /// Validate the document's internal invariants.
    ///
    /// Runs once at the boundary; a document that fails never enters
    /// the engine, so it can never be partially applied.
    pub fn validate(&self) -> Result<(), WorldError> {
        if self.id.trim().is_empty() {
            return Err(WorldError::MissingId);
        }

        let mut seen = std::collections::HashSet::new();
        for variable in &self.variables {
            if !seen.insert(variable.id.as_str()) {
                return Err(WorldError::DuplicateVariable(variable.id.clone()));
            }
            if !variable.default.matches_kind(variable.kind) {
                return Err(WorldError::DefaultTypeMismatch {
                    id: variable.id.clone(),
                    expected: variable.kind.name(),
                    found: variable.default.kind_name(),
                });
            }
            if let (Some(min), Some(max)) = (variable.min, variable.max) {
                if min > max {
                    return Err(WorldError::InvertedBounds {
                        id: variable.id.clone(),
                        min,
                        max,
                    });
                }
            }
        }

        let mut entry_ids = std::collections::HashSet::new();
        for entry in &self.lorebook {
            if !entry_ids.insert(entry.id.as_str()) {
                return Err(WorldError::DuplicateEntry(entry.id.clone()));
            }
        }

        for rule in &self.rules {
            for condition in &rule.conditions {
                if !seen.contains(condition.variable_id.as_str()) {
                    return Err(WorldError::UnknownRuleVariable {
                        rule_id: rule.id.clone(),
                        variable_id: condition.variable_id.clone(),
                    });
                }
            }
            for effect in &rule.effects {
                if !seen.contains(effect.variable_id.as_str()) {
                    return Err(WorldError::UnknownRuleVariable {
                        rule_id: rule.id.clone(),
                        variable_id: effect.variable_id.clone(),
                    });
                }
            }
        }

        for component in &self.components {
            if let Some(variable_id) = component.kind.bound_variable() {
                if !seen.contains(variable_id) {
                    return Err(WorldError::UnknownComponentVariable {
                        component_id: component.id.clone(),
                        variable_id: variable_id.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// A small fully-populated world used by tests and examples.
pub fn sample_world() -> WorldDefinition {
    let mut world = WorldDefinition::new("sample", "The Hollow Keep");
    world.description = "A crumbling keep above a fishing village.".to_string();
    world.variables = vec![
        Variable::number("hp", "Health", 10.0).with_bounds(0.0, 100.0),
        Variable::text("mood", "Narrator mood", "neutral"),
        Variable::flag("alive", "Alive", true),
        Variable::flag("cursed", "Cursed", false),
    ];
    world.characters = vec![CharacterDef {
        id: "warden".to_string(),
        name: "The Warden".to_string(),
        persona: "An old soldier who guards the keep and speaks in clipped sentences."
            .to_string(),
        greeting: Some("The gate creaks open. \"State your business.\"".to_string()),
    }];
    world.lorebook = vec![
        LorebookEntry::new(
            "keep-history",
            "The Hollow Keep fell to the sea raiders a century ago and was never fully rebuilt.",
        )
        .with_keywords(["keep", "ruins"]),
        LorebookEntry::new(
            "warden-secret",
            "The Warden buried his captain under the east tower and tells no one.",
        )
        .with_keywords(["warden", "tower"]),
    ];
    world
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_untagged_serde() {
        let json = r#"[true, 3.5, "hello", [1, 2]]"#;
        let values: Vec<Value> = serde_json::from_str(json).unwrap();
        assert_eq!(values[0], Value::Flag(true));
        assert_eq!(values[1], Value::Number(3.5));
        assert_eq!(values[2], Value::Text("hello".to_string()));
        assert_eq!(
            values[3],
            Value::List(vec![Value::Number(1.0), Value::Number(2.0)])
        );
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::Number(3.0).display_string(), "3");
        assert_eq!(Value::Number(3.25).display_string(), "3.25");
        assert_eq!(Value::Flag(true).display_string(), "true");
        assert_eq!(
            Value::List(vec![Value::Text("a".into()), Value::Text("b".into())])
                .display_string(),
            "a, b"
        );
    }

    #[test]
    fn test_sample_world_validates() {
        assert!(sample_world().validate().is_ok());
    }

    #[test]
    fn test_duplicate_variable_rejected() {
        let mut world = sample_world();
        world.variables.push(Variable::number("hp", "Health again", 1.0));
        assert!(matches!(
            world.validate(),
            Err(WorldError::DuplicateVariable(id)) if id == "hp"
        ));
    }

    #[test]
    fn test_default_type_mismatch_rejected() {
        let mut world = sample_world();
        world.variables.push(Variable {
            id: "broken".to_string(),
            name: "Broken".to_string(),
            kind: VariableKind::Number,
            default: Value::Text("ten".to_string()),
            min: None,
            max: None,
        });
        assert!(matches!(
            world.validate(),
            Err(WorldError::DefaultTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let mut world = sample_world();
        world
            .variables
            .push(Variable::number("depth", "Depth", 0.0).with_bounds(10.0, 0.0));
        assert!(matches!(
            world.validate(),
            Err(WorldError::InvertedBounds { .. })
        ));
    }

    #[test]
    fn test_rule_unknown_variable_rejected() {
        let mut world = sample_world();
        world.rules.push(crate::rules::Rule {
            id: "bad".to_string(),
            conditions: vec![crate::rules::Condition {
                variable_id: "mana".to_string(),
                op: crate::rules::ConditionOp::Gt,
                value: Value::Number(0.0),
            }],
            condition_logic: Default::default(),
            effects: Vec::new(),
            audio_effects: Vec::new(),
            priority: 0,
        });
        assert!(matches!(
            world.validate(),
            Err(WorldError::UnknownRuleVariable { .. })
        ));
    }

    #[test]
    fn test_world_document_roundtrip() {
        let world = sample_world();
        let json = serde_json::to_string(&world).unwrap();
        let parsed: WorldDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, world.id);
        assert_eq!(parsed.variables.len(), world.variables.len());
        assert_eq!(parsed.lorebook.len(), world.lorebook.len());
        assert!(parsed.validate().is_ok());
    }
}
