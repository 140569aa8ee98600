//! Presentation components resolved from game state.
//!
//! The engine does not render anything; it projects state into
//! descriptors a UI layer can draw. Component kinds form a closed sum
//! type, each carrying its own config record, and resolution is
//! exhaustive pattern matching.

use crate::state::GameState;
use crate::world::{Value, WorldDefinition};
use serde::{Deserialize, Serialize};

/// An authored component placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDef {
    pub id: String,
    #[serde(flatten)]
    pub kind: ComponentKind,
}

/// The closed set of component kinds and their config records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComponentKind {
    /// A horizontal bar tracking a numeric variable against its bounds.
    StatBar(StatBarConfig),
    /// A numeric readout with a label and optional unit.
    Meter(MeterConfig),
    /// The active character's portrait.
    Portrait(PortraitConfig),
    /// A block of static or variable-bound text.
    TextPanel(TextPanelConfig),
    /// The player-facing choice buttons for the current turn.
    ChoiceList(ChoiceListConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatBarConfig {
    pub variable_id: String,
    pub label: String,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    pub variable_id: String,
    pub label: String,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortraitConfig {
    /// Fallback image when no character is active.
    #[serde(default)]
    pub default_image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextPanelConfig {
    #[serde(default)]
    pub title: Option<String>,
    /// Literal text, or the bound variable's value when set.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub variable_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceListConfig {
    #[serde(default)]
    pub prompt: Option<String>,
}

impl ComponentKind {
    /// The variable this component reads, if any. Used by world
    /// validation.
    pub fn bound_variable(&self) -> Option<&str> {
        match self {
            ComponentKind::StatBar(config) => Some(&config.variable_id),
            ComponentKind::Meter(config) => Some(&config.variable_id),
            ComponentKind::TextPanel(config) => config.variable_id.as_deref(),
            ComponentKind::Portrait(_) | ComponentKind::ChoiceList(_) => None,
        }
    }
}

/// A resolved, renderable descriptor handed to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum ComponentView {
    StatBar {
        id: String,
        label: String,
        value: f64,
        min: f64,
        max: f64,
        color: Option<String>,
    },
    Meter {
        id: String,
        label: String,
        value: String,
        unit: Option<String>,
    },
    Portrait {
        id: String,
        character_name: Option<String>,
        image: Option<String>,
    },
    TextPanel {
        id: String,
        title: Option<String>,
        text: String,
    },
    ChoiceList {
        id: String,
        prompt: Option<String>,
        choices: Vec<String>,
    },
}

/// Project the world's components through the current state.
///
/// `choices` are the parsed options from the latest narrator turn.
pub fn resolve_components(
    world: &WorldDefinition,
    state: &GameState,
    choices: &[String],
) -> Vec<ComponentView> {
    world
        .components
        .iter()
        .map(|component| resolve_one(world, state, choices, component))
        .collect()
}

fn resolve_one(
    world: &WorldDefinition,
    state: &GameState,
    choices: &[String],
    component: &ComponentDef,
) -> ComponentView {
    match &component.kind {
        ComponentKind::StatBar(config) => {
            let def = world.variable(&config.variable_id);
            let value = state
                .variables
                .get(&config.variable_id)
                .and_then(Value::as_number)
                .unwrap_or(0.0);
            ComponentView::StatBar {
                id: component.id.clone(),
                label: config.label.clone(),
                value,
                min: def.and_then(|d| d.min).unwrap_or(0.0),
                max: def.and_then(|d| d.max).unwrap_or_else(|| value.max(1.0)),
                color: config.color.clone(),
            }
        }
        ComponentKind::Meter(config) => {
            let value = state
                .variables
                .get(&config.variable_id)
                .map(Value::display_string)
                .unwrap_or_default();
            ComponentView::Meter {
                id: component.id.clone(),
                label: config.label.clone(),
                value,
                unit: config.unit.clone(),
            }
        }
        ComponentKind::Portrait(config) => {
            let character = state
                .active_character_id
                .as_deref()
                .and_then(|id| world.character(id));
            ComponentView::Portrait {
                id: component.id.clone(),
                character_name: character.map(|c| c.name.clone()),
                image: config.default_image.clone(),
            }
        }
        ComponentKind::TextPanel(config) => {
            let text = config
                .variable_id
                .as_deref()
                .and_then(|id| state.variables.get(id))
                .map(Value::display_string)
                .unwrap_or_else(|| config.text.clone());
            ComponentView::TextPanel {
                id: component.id.clone(),
                title: config.title.clone(),
                text,
            }
        }
        ComponentKind::ChoiceList(config) => ComponentView::ChoiceList {
            id: component.id.clone(),
            prompt: config.prompt.clone(),
            choices: choices.to_vec(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateManager;
    use crate::world::sample_world;

    fn world_with_components() -> WorldDefinition {
        let mut world = sample_world();
        world.components = vec![
            ComponentDef {
                id: "hp-bar".to_string(),
                kind: ComponentKind::StatBar(StatBarConfig {
                    variable_id: "hp".to_string(),
                    label: "Health".to_string(),
                    color: Some("#c0392b".to_string()),
                }),
            },
            ComponentDef {
                id: "mood-meter".to_string(),
                kind: ComponentKind::Meter(MeterConfig {
                    variable_id: "mood".to_string(),
                    label: "Mood".to_string(),
                    unit: None,
                }),
            },
            ComponentDef {
                id: "portrait".to_string(),
                kind: ComponentKind::Portrait(PortraitConfig {
                    default_image: None,
                }),
            },
            ComponentDef {
                id: "choices".to_string(),
                kind: ComponentKind::ChoiceList(ChoiceListConfig { prompt: None }),
            },
        ];
        world
    }

    #[test]
    fn test_stat_bar_reads_bounds_from_definition() {
        let world = world_with_components();
        let state = StateManager::new().create(&world);

        let views = resolve_components(&world, &state, &[]);
        assert_eq!(
            views[0],
            ComponentView::StatBar {
                id: "hp-bar".to_string(),
                label: "Health".to_string(),
                value: 10.0,
                min: 0.0,
                max: 100.0,
                color: Some("#c0392b".to_string()),
            }
        );
    }

    #[test]
    fn test_portrait_follows_active_character() {
        let world = world_with_components();
        let mut state = StateManager::new().create(&world);
        state.active_character_id = Some("warden".to_string());

        let views = resolve_components(&world, &state, &[]);
        assert!(matches!(
            &views[2],
            ComponentView::Portrait { character_name: Some(name), .. } if name == "The Warden"
        ));
    }

    #[test]
    fn test_choice_list_carries_turn_choices() {
        let world = world_with_components();
        let state = StateManager::new().create(&world);
        let choices = vec!["Fight".to_string(), "Flee".to_string()];

        let views = resolve_components(&world, &state, &choices);
        assert!(matches!(
            &views[3],
            ComponentView::ChoiceList { choices: c, .. } if c == &choices
        ));
    }

    #[test]
    fn test_component_serde_tagging() {
        let json = r#"{"id":"hp-bar","kind":"stat_bar","variable_id":"hp","label":"HP"}"#;
        let component: ComponentDef = serde_json::from_str(json).unwrap();
        assert!(matches!(component.kind, ComponentKind::StatBar(_)));
        assert_eq!(component.kind.bound_variable(), Some("hp"));
    }
}
