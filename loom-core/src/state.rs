//! Game state and its lifecycle.
//!
//! A `GameState` is the single mutable object for one play session. It
//! is created from a world's variable defaults, mutated once per turn
//! through the rules engine's effect primitive, and handed back to the
//! caller to persist — the engine never owns storage.

use crate::rules::{EvalDiagnostic, RulesEngine};
use crate::world::{Value, WorldDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use thiserror::Error;

/// Current state schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors from state loading and migration.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Persisted state is not an object")]
    Malformed,

    #[error("Persisted state targets schema {found}, newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The authoritative mutable state of one session.
///
/// All mutation goes through the rules engine's effect application,
/// never direct external writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    #[serde(default)]
    pub world_id: String,
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub active_character_id: Option<String>,
    #[serde(default)]
    pub turn_count: u32,
    /// Open extension point; migration parks unrecognized data here.
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
}

/// Owns `GameState` lifecycle: creation, effect application, and
/// forward-compatible migration of previously persisted state.
pub struct StateManager {
    rules: RulesEngine,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            rules: RulesEngine::new(),
        }
    }

    /// Create a fresh state seeded from the world's variable defaults.
    pub fn create(&self, world: &WorldDefinition) -> GameState {
        GameState {
            world_id: world.id.clone(),
            schema_version: SCHEMA_VERSION,
            variables: world
                .variables
                .iter()
                .map(|v| (v.id.clone(), v.default.clone()))
                .collect(),
            active_character_id: world.characters.first().map(|c| c.id.clone()),
            turn_count: 0,
            metadata: HashMap::new(),
        }
    }

    /// Apply effects through the rules-engine primitive.
    ///
    /// Shares the clamping and type-fallback semantics of rule
    /// evaluation; anomalies come back as diagnostics, never errors.
    pub fn apply_effects(
        &self,
        world: &WorldDefinition,
        state: &GameState,
        effects: &[crate::rules::Effect],
    ) -> (GameState, Vec<EvalDiagnostic>) {
        self.rules.apply_effects(world, state, effects)
    }

    /// Load previously persisted state against the current world
    /// definition.
    ///
    /// Migration is additive-only: missing variables are back-filled
    /// from current defaults, variable entries the definition no longer
    /// declares move into `metadata` under `orphaned_variables`, and
    /// unrecognized top-level fields pass through `metadata` — never
    /// destructive. Re-migrating an already-current state returns an
    /// equal state.
    pub fn migrate(&self, raw: JsonValue, world: &WorldDefinition) -> Result<GameState, StateError> {
        let JsonValue::Object(mut fields) = raw else {
            return Err(StateError::Malformed);
        };

        let found_version = fields
            .get("schema_version")
            .and_then(JsonValue::as_u64)
            .unwrap_or(0) as u32;
        if found_version > SCHEMA_VERSION {
            return Err(StateError::VersionTooNew {
                found: found_version,
                supported: SCHEMA_VERSION,
            });
        }

        let mut state = GameState {
            world_id: world.id.clone(),
            schema_version: SCHEMA_VERSION,
            ..Default::default()
        };

        let raw_variables: HashMap<String, Value> = fields
            .remove("variables")
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        let mut orphaned = raw_variables.clone();
        for variable in &world.variables {
            let value = match orphaned.remove(&variable.id) {
                Some(value) if value.matches_kind(variable.kind) => value,
                // Missing or retyped: back-fill from the current default
                _ => variable.default.clone(),
            };
            state.variables.insert(variable.id.clone(), value);
        }

        if let Some(active) = fields
            .remove("active_character_id")
            .and_then(|v| serde_json::from_value::<Option<String>>(v).ok())
            .flatten()
        {
            // Keep only characters the world still declares
            if world.character(&active).is_some() {
                state.active_character_id = Some(active);
            }
        }
        if state.active_character_id.is_none() {
            state.active_character_id = world.characters.first().map(|c| c.id.clone());
        }

        state.turn_count = fields
            .remove("turn_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;

        if let Some(metadata) = fields
            .remove("metadata")
            .and_then(|v| serde_json::from_value::<HashMap<String, JsonValue>>(v).ok())
        {
            state.metadata = metadata;
        }

        if !orphaned.is_empty() {
            let mut parked: HashMap<String, Value> = state
                .metadata
                .remove("orphaned_variables")
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default();
            parked.extend(orphaned);
            state
                .metadata
                .insert("orphaned_variables".to_string(), serde_json::to_value(parked)?);
        }

        // Anything else the document carried passes through untouched.
        fields.remove("world_id");
        fields.remove("schema_version");
        for (key, value) in fields {
            state.metadata.entry(key).or_insert(value);
        }

        Ok(state)
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{sample_world, Variable};

    #[test]
    fn test_create_seeds_defaults() {
        let world = sample_world();
        let state = StateManager::new().create(&world);

        assert_eq!(state.world_id, "sample");
        assert_eq!(state.schema_version, SCHEMA_VERSION);
        assert_eq!(state.variables["hp"], Value::Number(10.0));
        assert_eq!(state.variables["alive"], Value::Flag(true));
        assert_eq!(state.active_character_id.as_deref(), Some("warden"));
        assert_eq!(state.turn_count, 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let world = sample_world();
        let manager = StateManager::new();
        let state = manager.create(&world);

        let once = manager
            .migrate(serde_json::to_value(&state).unwrap(), &world)
            .unwrap();
        let twice = manager
            .migrate(serde_json::to_value(&once).unwrap(), &world)
            .unwrap();

        assert_eq!(once, state);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_migrate_backfills_missing_variable() {
        let mut world = sample_world();
        let manager = StateManager::new();
        let state = manager.create(&world);
        let raw = serde_json::to_value(&state).unwrap();

        // The world definition grew a variable after this state was saved
        world
            .variables
            .push(Variable::number("gold", "Gold", 25.0));

        let migrated = manager.migrate(raw, &world).unwrap();
        assert_eq!(migrated.variables["gold"], Value::Number(25.0));
        // Existing values survive
        assert_eq!(migrated.variables["hp"], Value::Number(10.0));
    }

    #[test]
    fn test_migrate_parks_orphaned_variables() {
        let world = sample_world();
        let manager = StateManager::new();
        let mut state = manager.create(&world);
        state
            .variables
            .insert("legacy_counter".to_string(), Value::Number(7.0));

        let migrated = manager
            .migrate(serde_json::to_value(&state).unwrap(), &world)
            .unwrap();

        assert!(!migrated.variables.contains_key("legacy_counter"));
        let parked = &migrated.metadata["orphaned_variables"];
        assert_eq!(parked["legacy_counter"], serde_json::json!(7.0));
    }

    #[test]
    fn test_migrate_passes_unknown_fields_through_metadata() {
        let world = sample_world();
        let manager = StateManager::new();

        let raw = serde_json::json!({
            "schema_version": 1,
            "variables": {"hp": 4.0},
            "favorite_snack": "dried fish"
        });

        let migrated = manager.migrate(raw, &world).unwrap();
        assert_eq!(migrated.variables["hp"], Value::Number(4.0));
        assert_eq!(
            migrated.metadata["favorite_snack"],
            serde_json::json!("dried fish")
        );
    }

    #[test]
    fn test_migrate_rejects_newer_schema() {
        let world = sample_world();
        let raw = serde_json::json!({"schema_version": 99});
        assert!(matches!(
            StateManager::new().migrate(raw, &world),
            Err(StateError::VersionTooNew { found: 99, .. })
        ));
    }

    #[test]
    fn test_migrate_rejects_non_object() {
        let world = sample_world();
        assert!(matches!(
            StateManager::new().migrate(serde_json::json!([1, 2]), &world),
            Err(StateError::Malformed)
        ));
    }

    #[test]
    fn test_migrate_drops_unknown_active_character() {
        let world = sample_world();
        let raw = serde_json::json!({
            "schema_version": 1,
            "active_character_id": "ghost"
        });
        let migrated = StateManager::new().migrate(raw, &world).unwrap();
        // Falls back to the world's first character
        assert_eq!(migrated.active_character_id.as_deref(), Some("warden"));
    }
}
