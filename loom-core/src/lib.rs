//! Narrative world engine.
//!
//! This crate provides:
//! - Declarative world definitions (variables, rules, characters,
//!   lorebook entries, components, audio)
//! - A priority-ordered rules engine over a single mutable game state
//! - Lorebook retrieval combining keyword triggers, BM25, and optional
//!   embedding similarity
//! - Token-budgeted prompt assembly and tolerant parsing of narrator
//!   output
//!
//! # Quick Start
//!
//! ```ignore
//! use loom_core::{import_world, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let world = import_world(&std::fs::read_to_string("world.json")?)?;
//!     let narrator = muse::Muse::from_env()?;
//!
//!     let mut session = Session::new(world, Box::new(narrator))?;
//!     let outcome = session.player_turn("I push open the gate").await?;
//!     println!("{}", outcome.display_text);
//!
//!     session.save("session.json").await?;
//!     Ok(())
//! }
//! ```

pub mod components;
pub mod import;
pub mod memory;
pub mod parser;
pub mod prompt;
pub mod retrieval;
pub mod rules;
pub mod session;
pub mod state;
pub mod testing;
pub mod world;

// Primary public API
pub use import::{export_native, import_world, ImportError};
pub use memory::SessionMemory;
pub use parser::{parse, ParsedReply};
pub use rules::{Condition, ConditionLogic, ConditionOp, Effect, EffectOp, Rule, RulesEngine};
pub use session::{Narrator, Session, SessionError, SessionId, TurnOutcome};
pub use state::{GameState, StateManager};
pub use world::{
    sample_world, CharacterDef, LorebookEntry, Value, Variable, VariableKind, WorldDefinition,
    WorldError, WorldSettings,
};

// Chat message types cross the gateway boundary unchanged.
pub use muse::{ChatMessage, ChatRole};
