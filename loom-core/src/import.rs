//! World document import and export.
//!
//! Two external shapes are accepted and normalized into a
//! `WorldDefinition` before anything enters the engine:
//!
//! - The native versioned document: `{"version": "1", "world": {...}}`,
//!   or the lorebook-only shorthand `{"version": "1", "entries": [...]}`.
//! - Third-party character cards, detected by their telltale fields
//!   (`name` plus `first_mes` / `character_book`); the card's book
//!   entries become lorebook entries and its first message seeds the
//!   opening narrator turn.
//!
//! Import always validates before returning, so a malformed document is
//! rejected whole, never partially applied.

use crate::world::{CharacterDef, LorebookEntry, WorldDefinition, WorldError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Native document version emitted by export.
const NATIVE_VERSION: &str = "1";

/// Errors from world document import.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported document version: {0}")]
    UnsupportedVersion(String),

    #[error("Document is neither a native world document nor a character card")]
    UnrecognizedShape,

    #[error("Imported world failed validation: {0}")]
    Invalid(#[from] WorldError),
}

/// The native versioned document shape.
#[derive(Debug, Serialize, Deserialize)]
pub struct NativeDocument {
    pub version: String,
    pub world: WorldDefinition,
}

/// Import a world document of either supported shape.
pub fn import_world(json: &str) -> Result<WorldDefinition, ImportError> {
    let value: JsonValue = serde_json::from_str(json)?;
    let Some(fields) = value.as_object() else {
        return Err(ImportError::UnrecognizedShape);
    };

    let card = is_character_card(fields);
    let version = fields
        .get("version")
        .and_then(JsonValue::as_str)
        .map(str::to_string);
    let has_world = fields.contains_key("world");
    let has_entries = fields.contains_key("entries");

    let world = if card {
        let card: CharacterCard = serde_json::from_value(value)?;
        tracing::debug!(name = %card.name, "importing character card");
        card.into_world()
    } else if let Some(version) = version {
        if !version.starts_with('1') {
            return Err(ImportError::UnsupportedVersion(version));
        }

        if has_world {
            let document: NativeDocument = serde_json::from_value(value)?;
            document.world
        } else if has_entries {
            let document: LorebookDocument = serde_json::from_value(value)?;
            document.into_world()
        } else {
            return Err(ImportError::UnrecognizedShape);
        }
    } else {
        return Err(ImportError::UnrecognizedShape);
    };

    world.validate()?;
    Ok(world)
}

/// Export a world as the native versioned document.
pub fn export_native(world: &WorldDefinition) -> Result<String, ImportError> {
    let document = NativeDocument {
        version: NATIVE_VERSION.to_string(),
        world: world.clone(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

fn is_character_card(fields: &serde_json::Map<String, JsonValue>) -> bool {
    fields.contains_key("name")
        && (fields.contains_key("first_mes") || fields.contains_key("character_book"))
}

/// Lorebook-only native shorthand: `{"version": ..., "entries": [...]}`.
#[derive(Debug, Deserialize)]
struct LorebookDocument {
    #[serde(default)]
    name: Option<String>,
    entries: Vec<LorebookEntry>,
}

impl LorebookDocument {
    fn into_world(self) -> WorldDefinition {
        let name = self.name.unwrap_or_else(|| "Imported Lorebook".to_string());
        let id = slugify(&name);
        let mut world = WorldDefinition::new(id, name);
        world.lorebook = self.entries;
        world
    }
}

/// The subset of a third-party character card the engine understands.
/// Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct CharacterCard {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    personality: String,
    #[serde(default)]
    first_mes: Option<String>,
    #[serde(default)]
    character_book: Option<CharacterBook>,
}

#[derive(Debug, Deserialize)]
struct CharacterBook {
    #[serde(default)]
    entries: Vec<CharacterBookEntry>,
}

#[derive(Debug, Deserialize)]
struct CharacterBookEntry {
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    constant: bool,
    #[serde(default)]
    insertion_order: i32,
    #[serde(default = "enabled_default")]
    enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl CharacterCard {
    fn into_world(self) -> WorldDefinition {
        let id = slugify(&self.name);
        let mut world = WorldDefinition::new(id.clone(), self.name.clone());
        world.description = self.description.clone();

        let mut persona = self.description;
        if !self.personality.is_empty() {
            if !persona.is_empty() {
                persona.push_str("\n\n");
            }
            persona.push_str(&self.personality);
        }

        world.characters = vec![CharacterDef {
            id,
            name: self.name,
            persona,
            greeting: self.first_mes,
        }];

        if let Some(book) = self.character_book {
            world.lorebook = book
                .entries
                .into_iter()
                .enumerate()
                .filter(|(_, entry)| entry.enabled && !entry.content.is_empty())
                .map(|(index, entry)| LorebookEntry {
                    id: format!("book-{index}"),
                    title: entry.comment,
                    text: entry.content,
                    keywords: entry.keys,
                    whole_word: false,
                    use_fuzzy: false,
                    use_semantic: false,
                    constant: entry.constant,
                    order: entry.insertion_order,
                })
                .collect();
        }

        world
    }
}

fn slugify(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        "imported".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::sample_world;

    #[test]
    fn test_native_roundtrip() {
        let world = sample_world();
        let json = export_native(&world).unwrap();
        let imported = import_world(&json).unwrap();

        assert_eq!(imported.id, world.id);
        assert_eq!(imported.variables.len(), world.variables.len());
        assert_eq!(imported.lorebook.len(), world.lorebook.len());
    }

    #[test]
    fn test_lorebook_shorthand() {
        let json = r#"{
            "version": "1.0",
            "name": "Coastal Myths",
            "entries": [
                {"id": "selkie", "text": "Selkies trade their skins for secrets.", "keywords": ["selkie"]}
            ]
        }"#;

        let world = import_world(json).unwrap();
        assert_eq!(world.id, "coastal-myths");
        assert_eq!(world.lorebook.len(), 1);
        assert_eq!(world.lorebook[0].keywords, vec!["selkie"]);
    }

    #[test]
    fn test_character_card_detection_and_normalization() {
        let json = r#"{
            "name": "Asha",
            "description": "A wandering cartographer.",
            "personality": "Curious, blunt, afraid of deep water.",
            "first_mes": "\"Hold this corner of the map, would you?\"",
            "character_book": {
                "entries": [
                    {"keys": ["map", "atlas"], "content": "Asha's maps mark places that no longer exist.", "insertion_order": 2},
                    {"keys": ["sea"], "content": "She lost her brother to the sea.", "constant": true},
                    {"keys": ["disabled"], "content": "Never injected.", "enabled": false}
                ]
            }
        }"#;

        let world = import_world(json).unwrap();
        assert_eq!(world.id, "asha");
        assert_eq!(world.characters.len(), 1);

        let character = &world.characters[0];
        assert_eq!(character.name, "Asha");
        assert!(character.persona.contains("cartographer"));
        assert!(character.persona.contains("deep water"));
        assert!(character.greeting.as_deref().unwrap().contains("map"));

        // Disabled entries are dropped; the rest carry their flags
        assert_eq!(world.lorebook.len(), 2);
        assert_eq!(world.lorebook[0].keywords, vec!["map", "atlas"]);
        assert_eq!(world.lorebook[0].order, 2);
        assert!(world.lorebook[1].constant);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let json = r#"{"version": "9", "entries": []}"#;
        assert!(matches!(
            import_world(json),
            Err(ImportError::UnsupportedVersion(v)) if v == "9"
        ));
    }

    #[test]
    fn test_unrecognized_shape_rejected() {
        assert!(matches!(
            import_world(r#"{"foo": 1}"#),
            Err(ImportError::UnrecognizedShape)
        ));
        assert!(matches!(
            import_world("[1,2,3]"),
            Err(ImportError::UnrecognizedShape)
        ));
    }

    #[test]
    fn test_invalid_world_rejected_whole() {
        // Duplicate entry ids fail validation at the boundary
        let json = r#"{
            "version": "1",
            "entries": [
                {"id": "dup", "text": "a"},
                {"id": "dup", "text": "b"}
            ]
        }"#;
        assert!(matches!(
            import_world(json),
            Err(ImportError::Invalid(WorldError::DuplicateEntry(_)))
        ));
    }
}
