//! Declarative rules engine.
//!
//! This module implements the state mutation pipeline:
//! 1. Rules declare conditions over the variable map and effects to
//!    apply when they hold
//! 2. The engine evaluates one priority-ordered pass per turn
//! 3. Effects are applied through a single primitive that the state
//!    manager and the response parser's directives reuse
//!
//! Evaluation anomalies never abort a turn: a condition over mismatched
//! types is false, an effect over mismatched types is a recorded no-op.

use crate::state::GameState;
use crate::world::{Value, Variable, VariableKind, WorldDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Comparison operators usable in rule conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

impl ConditionOp {
    pub fn name(&self) -> &'static str {
        match self {
            ConditionOp::Eq => "eq",
            ConditionOp::Neq => "neq",
            ConditionOp::Gt => "gt",
            ConditionOp::Gte => "gte",
            ConditionOp::Lt => "lt",
            ConditionOp::Lte => "lte",
            ConditionOp::Contains => "contains",
        }
    }
}

/// A pure predicate over a state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub variable_id: String,
    pub op: ConditionOp,
    pub value: Value,
}

/// State-transforming operations usable in rule effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectOp {
    Set,
    Add,
    Subtract,
    Multiply,
    Toggle,
    Append,
}

impl EffectOp {
    pub fn name(&self) -> &'static str {
        match self {
            EffectOp::Set => "set",
            EffectOp::Add => "add",
            EffectOp::Subtract => "subtract",
            EffectOp::Multiply => "multiply",
            EffectOp::Toggle => "toggle",
            EffectOp::Append => "append",
        }
    }
}

/// A pure state transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub variable_id: String,
    pub op: EffectOp,
    #[serde(default)]
    pub value: Value,
}

/// How a rule's conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConditionLogic {
    #[default]
    All,
    Any,
}

/// A declarative rule: conditions, effects, and an evaluation priority.
///
/// Rules with higher priority are evaluated (and, if applicable,
/// applied) before lower-priority ones; declaration order breaks ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub condition_logic: ConditionLogic,
    #[serde(default)]
    pub effects: Vec<Effect>,
    /// Audio track ids to cue when this rule fires.
    #[serde(default)]
    pub audio_effects: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

/// A non-fatal anomaly recorded while evaluating or applying effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EvalDiagnostic {
    /// An effect targeted a variable the state does not carry.
    UnknownVariable { variable_id: String, op: String },
    /// An effect's operation does not apply to the variable's type.
    TypeMismatch {
        variable_id: String,
        op: String,
        expected: String,
        found: String,
    },
}

impl fmt::Display for EvalDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalDiagnostic::UnknownVariable { variable_id, op } => {
                write!(f, "{op} skipped: unknown variable '{variable_id}'")
            }
            EvalDiagnostic::TypeMismatch {
                variable_id,
                op,
                expected,
                found,
            } => write!(
                f,
                "{op} skipped on '{variable_id}': expected {expected}, found {found}"
            ),
        }
    }
}

/// The result of one evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct EvalOutcome {
    /// The mutated state.
    pub state: GameState,
    /// Ids of rules that fired, in application order.
    pub fired_rule_ids: Vec<String>,
    /// Audio track ids cued by fired rules, in application order.
    pub audio_effects: Vec<String>,
    /// Anomalies recorded along the way.
    pub diagnostics: Vec<EvalDiagnostic>,
}

impl EvalOutcome {
    /// Whether the pass changed nothing and cued nothing.
    pub fn is_noop(&self, before: &GameState) -> bool {
        self.fired_rule_ids.is_empty()
            && self.audio_effects.is_empty()
            && self.state.variables == before.variables
    }
}

/// The rules engine evaluates a world's rules against game state.
pub struct RulesEngine;

impl RulesEngine {
    pub fn new() -> Self {
        Self
    }

    /// Run one evaluation pass over the world's rules.
    ///
    /// The pass is single-sweep, not fixed-point: rules are visited
    /// once in priority order, each seeing the state as mutated by the
    /// rules before it, and nothing re-triggers within the same turn.
    /// This bounds a turn to O(rules) and rules out re-trigger loops.
    pub fn evaluate(&self, world: &WorldDefinition, state: &GameState) -> EvalOutcome {
        let defs = variable_index(world);

        let mut ordered: Vec<&Rule> = world.rules.iter().collect();
        // Stable sort: equal priorities keep declaration order.
        ordered.sort_by_key(|rule| std::cmp::Reverse(rule.priority));

        let mut outcome = EvalOutcome {
            state: state.clone(),
            ..Default::default()
        };

        for rule in ordered {
            if !rule_applies(rule, &outcome.state) {
                continue;
            }

            tracing::debug!(rule = %rule.id, priority = rule.priority, "rule fired");
            for effect in &rule.effects {
                apply_effect(
                    &mut outcome.state.variables,
                    &defs,
                    effect,
                    &mut outcome.diagnostics,
                );
            }
            outcome.audio_effects.extend(rule.audio_effects.iter().cloned());
            outcome.fired_rule_ids.push(rule.id.clone());
        }

        outcome
    }

    /// Apply a batch of effects outside rule evaluation.
    ///
    /// This is the primitive the state manager and the response
    /// parser's directives go through; it shares the clamping and
    /// fallback semantics of rule effects.
    pub fn apply_effects(
        &self,
        world: &WorldDefinition,
        state: &GameState,
        effects: &[Effect],
    ) -> (GameState, Vec<EvalDiagnostic>) {
        let defs = variable_index(world);
        let mut next = state.clone();
        let mut diagnostics = Vec::new();

        for effect in effects {
            apply_effect(&mut next.variables, &defs, effect, &mut diagnostics);
        }

        (next, diagnostics)
    }
}

impl Default for RulesEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn variable_index(world: &WorldDefinition) -> HashMap<&str, &Variable> {
    world
        .variables
        .iter()
        .map(|v| (v.id.as_str(), v))
        .collect()
}

fn rule_applies(rule: &Rule, state: &GameState) -> bool {
    if rule.conditions.is_empty() {
        // A rule without conditions always applies.
        return true;
    }

    match rule.condition_logic {
        ConditionLogic::All => rule
            .conditions
            .iter()
            .all(|c| condition_holds(c, state)),
        ConditionLogic::Any => rule
            .conditions
            .iter()
            .any(|c| condition_holds(c, state)),
    }
}

/// Evaluate a single condition against the current state.
///
/// A condition over a missing variable or mismatched operand types is
/// false, never an error.
pub fn condition_holds(condition: &Condition, state: &GameState) -> bool {
    let Some(current) = state.variables.get(&condition.variable_id) else {
        return false;
    };

    match condition.op {
        ConditionOp::Eq => current == &condition.value,
        ConditionOp::Neq => current != &condition.value,
        ConditionOp::Gt | ConditionOp::Gte | ConditionOp::Lt | ConditionOp::Lte => {
            let (Some(lhs), Some(rhs)) = (current.as_number(), condition.value.as_number())
            else {
                return false;
            };
            match condition.op {
                ConditionOp::Gt => lhs > rhs,
                ConditionOp::Gte => lhs >= rhs,
                ConditionOp::Lt => lhs < rhs,
                ConditionOp::Lte => lhs <= rhs,
                _ => unreachable!(),
            }
        }
        ConditionOp::Contains => match current {
            Value::Text(text) => condition
                .value
                .as_text()
                .map(|needle| text.contains(needle))
                .unwrap_or(false),
            Value::List(items) => items.contains(&condition.value),
            _ => false,
        },
    }
}

/// Apply one effect to the variable map.
///
/// Type mismatches and unknown variables are recorded no-ops. Numeric
/// results clamp to the variable definition's `min`/`max` when present.
pub fn apply_effect(
    variables: &mut HashMap<String, Value>,
    defs: &HashMap<&str, &Variable>,
    effect: &Effect,
    diagnostics: &mut Vec<EvalDiagnostic>,
) {
    let Some(current) = variables.get_mut(&effect.variable_id) else {
        let diagnostic = EvalDiagnostic::UnknownVariable {
            variable_id: effect.variable_id.clone(),
            op: effect.op.name().to_string(),
        };
        tracing::warn!(%diagnostic, "effect skipped");
        diagnostics.push(diagnostic);
        return;
    };

    let def = defs.get(effect.variable_id.as_str()).copied();

    match effect.op {
        EffectOp::Set => {
            let mut next = effect.value.clone();
            if let Value::Number(n) = &mut next {
                *n = clamp(*n, def);
            }
            *current = next;
        }
        EffectOp::Add | EffectOp::Subtract | EffectOp::Multiply => {
            let (Some(lhs), Some(rhs)) = (current.as_number(), effect.value.as_number()) else {
                record_mismatch(diagnostics, effect, VariableKind::Number, current);
                return;
            };
            let result = match effect.op {
                EffectOp::Add => lhs + rhs,
                EffectOp::Subtract => lhs - rhs,
                EffectOp::Multiply => lhs * rhs,
                _ => unreachable!(),
            };
            *current = Value::Number(clamp(result, def));
        }
        EffectOp::Toggle => {
            let Value::Flag(flag) = current else {
                record_mismatch(diagnostics, effect, VariableKind::Flag, current);
                return;
            };
            *flag = !*flag;
        }
        EffectOp::Append => match current {
            Value::Text(text) => text.push_str(&effect.value.display_string()),
            Value::List(items) => items.push(effect.value.clone()),
            _ => record_mismatch(diagnostics, effect, VariableKind::Text, current),
        },
    }
}

fn record_mismatch(
    diagnostics: &mut Vec<EvalDiagnostic>,
    effect: &Effect,
    expected: VariableKind,
    found: &Value,
) {
    let diagnostic = EvalDiagnostic::TypeMismatch {
        variable_id: effect.variable_id.clone(),
        op: effect.op.name().to_string(),
        expected: expected.name().to_string(),
        found: found.kind_name().to_string(),
    };
    tracing::warn!(%diagnostic, "effect skipped");
    diagnostics.push(diagnostic);
}

fn clamp(value: f64, def: Option<&Variable>) -> f64 {
    let mut clamped = value;
    if let Some(def) = def {
        if let Some(min) = def.min {
            clamped = clamped.max(min);
        }
        if let Some(max) = def.max {
            clamped = clamped.min(max);
        }
    }
    clamped
}
