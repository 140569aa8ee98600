//! Prompt assembly.
//!
//! Composes the message list sent to the narrator model: system prompt
//! (world plus active character plus a state digest), a token-budgeted
//! slice of ranked lorebook entries, recent history, and the latest
//! player turn. The builder only formats and budgets; it does no
//! parsing, networking, or engine logic.

use crate::memory::SessionMemory;
use crate::retrieval::RankedEntry;
use crate::state::GameState;
use crate::world::{LorebookEntry, WorldDefinition};
use muse::ChatMessage;

/// Estimate token count as `ceil(chars / 4)`.
///
/// A fixed proxy, not a real tokenizer; the budget it enforces is a
/// soft ceiling on context size, not an exact accounting.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Assembles the final message list under a token budget.
pub struct PromptBuilder;

impl PromptBuilder {
    /// Build the chat messages for one narrator call.
    ///
    /// Budgeting: `constant` lorebook entries are admitted first (in
    /// authored order), then ranked entries greedily by rank; an entry
    /// that would overflow the budget is dropped wholesale, never
    /// truncated. History is admitted most-recent-first under the
    /// remaining budget, then reversed back to chronological order —
    /// so history drops oldest-first. The system prompt and the latest
    /// user turn sit outside the budget.
    pub fn build(
        world: &WorldDefinition,
        state: &GameState,
        memory: &SessionMemory,
        ranked: &[RankedEntry<'_>],
        latest_input: &str,
    ) -> Vec<ChatMessage> {
        // The budget rations the variable-size context (lorebook and
        // history); the system prompt and the latest user turn are
        // always included.
        let budget = world.settings.token_budget;
        let mut spent = 0usize;

        let system = Self::system_prompt(world, state);

        // Lorebook: constants first, then by rank, whole entries only.
        let mut lore_sections: Vec<&LorebookEntry> = Vec::new();
        let mut constants: Vec<&LorebookEntry> =
            world.lorebook.iter().filter(|e| e.constant).collect();
        constants.sort_by_key(|e| e.order);

        for entry in constants.into_iter().chain(ranked.iter().map(|r| r.entry)) {
            let cost = estimate_tokens(&entry.text);
            if spent + cost > budget {
                continue;
            }
            spent += cost;
            lore_sections.push(entry);
        }

        // History: newest first under the remaining budget, then
        // restored to chronological order for emission.
        let history = memory.to_chat_messages();
        let mut admitted = Vec::new();
        for message in history.iter().rev() {
            let cost = estimate_tokens(&message.content);
            if spent + cost > budget {
                break;
            }
            spent += cost;
            admitted.push(message.clone());
        }
        admitted.reverse();

        let mut messages = Vec::new();
        messages.push(ChatMessage::system(Self::compose_system(
            system,
            &lore_sections,
            memory.summary.as_deref(),
        )));
        messages.extend(admitted);
        messages.push(ChatMessage::user(latest_input));
        messages
    }

    /// The world/character/state portion of the system prompt.
    fn system_prompt(world: &WorldDefinition, state: &GameState) -> String {
        let mut prompt = String::new();

        prompt.push_str(&world.settings.system_prompt);
        prompt.push_str("\n\n## World: ");
        prompt.push_str(&world.name);
        prompt.push('\n');
        if !world.description.is_empty() {
            prompt.push_str(&world.description);
            prompt.push('\n');
        }

        if let Some(character) = state
            .active_character_id
            .as_deref()
            .and_then(|id| world.character(id))
        {
            prompt.push_str("\n## Active Character\n");
            prompt.push_str(&format!("**Name:** {}\n", character.name));
            if !character.persona.is_empty() {
                prompt.push_str(&character.persona);
                prompt.push('\n');
            }
        }

        if !state.variables.is_empty() {
            prompt.push_str("\n## Current State\n");
            let mut ids: Vec<&String> = state.variables.keys().collect();
            ids.sort();
            for id in ids {
                let label = world
                    .variable(id)
                    .map(|v| v.name.as_str())
                    .unwrap_or(id.as_str());
                prompt.push_str(&format!(
                    "- {}: {}\n",
                    label,
                    state.variables[id].display_string()
                ));
            }
        }

        prompt
    }

    fn compose_system(
        base: String,
        lore: &[&LorebookEntry],
        summary: Option<&str>,
    ) -> String {
        let mut prompt = base;

        if let Some(summary) = summary {
            prompt.push_str("\n## Earlier Events\n");
            prompt.push_str(summary);
            prompt.push('\n');
        }

        if !lore.is_empty() {
            prompt.push_str("\n## World Knowledge\n");
            for entry in lore {
                if let Some(title) = &entry.title {
                    prompt.push_str(&format!("### {title}\n"));
                }
                prompt.push_str(&entry.text);
                prompt.push_str("\n\n");
            }
        }

        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{rank_entries, RetrievalWeights};
    use crate::state::StateManager;
    use crate::world::{sample_world, LorebookEntry};

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_system_then_history_then_input() {
        let world = sample_world();
        let state = StateManager::new().create(&world);
        let mut memory = SessionMemory::new();
        memory.add_player("hello");
        memory.add_narrator("greetings");

        let messages = PromptBuilder::build(&world, &state, &memory, &[], "I enter the keep");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, muse::ChatRole::System);
        assert_eq!(messages[1].content, "hello");
        assert_eq!(messages[2].content, "greetings");
        assert_eq!(messages[3].content, "I enter the keep");
    }

    #[test]
    fn test_system_prompt_carries_state_and_character() {
        let world = sample_world();
        let state = StateManager::new().create(&world);
        let memory = SessionMemory::new();

        let messages = PromptBuilder::build(&world, &state, &memory, &[], "look around");
        let system = &messages[0].content;
        assert!(system.contains("The Hollow Keep"));
        assert!(system.contains("The Warden"));
        assert!(system.contains("Health: 10"));
    }

    #[test]
    fn test_lorebook_admitted_by_rank_under_budget() {
        let mut world = sample_world();
        world.settings.token_budget = 100_000;
        let state = StateManager::new().create(&world);
        let memory = SessionMemory::new();

        let ranked = rank_entries(
            &world.lorebook,
            "I ask the warden about the keep",
            None,
            RetrievalWeights::default(),
        );
        assert_eq!(ranked.len(), 2);

        let messages = PromptBuilder::build(&world, &state, &memory, &ranked, "go on");
        let system = &messages[0].content;
        assert!(system.contains("sea raiders"));
        assert!(system.contains("east tower"));
    }

    #[test]
    fn test_tiny_budget_drops_lorebook_but_not_history() {
        let mut world = sample_world();
        // Smaller than either entry's estimated size
        world.settings.token_budget = 10;
        let state = StateManager::new().create(&world);
        let mut memory = SessionMemory::new();
        memory.add_player("hi");

        let ranked = rank_entries(
            &world.lorebook,
            "I ask the warden about the keep",
            None,
            RetrievalWeights::default(),
        );
        let messages = PromptBuilder::build(&world, &state, &memory, &ranked, "go on");

        let system = &messages[0].content;
        assert!(!system.contains("sea raiders"));
        assert!(!system.contains("east tower"));
        // Short history still fits
        assert_eq!(messages[1].content, "hi");
    }

    #[test]
    fn test_history_dropped_oldest_first() {
        let mut world = sample_world();
        world.lorebook.clear();
        world.settings.token_budget = 50;
        let state = StateManager::new().create(&world);

        let mut memory = SessionMemory::new();
        memory.add_player("old ".repeat(100));
        memory.add_narrator("recent answer");
        memory.add_player("newest question");

        let messages = PromptBuilder::build(&world, &state, &memory, &[], "now");
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();

        // The giant oldest turn is dropped; the rest stay chronological
        assert!(!contents.iter().any(|c| c.starts_with("old ")));
        let recent = contents.iter().position(|c| *c == "recent answer").unwrap();
        let newest = contents
            .iter()
            .position(|c| *c == "newest question")
            .unwrap();
        assert!(recent < newest);
    }

    #[test]
    fn test_constant_entries_admitted_before_ranked() {
        let mut world = sample_world();
        world.lorebook.push(
            LorebookEntry::new("pinned", "Constant truth about the moon.").constant(),
        );
        world.settings.token_budget = 100_000;
        let state = StateManager::new().create(&world);
        let memory = SessionMemory::new();

        let ranked = rank_entries(
            &world.lorebook,
            "keep",
            None,
            RetrievalWeights::default(),
        );
        let messages = PromptBuilder::build(&world, &state, &memory, &ranked, "go");
        let system = &messages[0].content;

        let constant_at = system.find("Constant truth").unwrap();
        let ranked_at = system.find("sea raiders").unwrap();
        assert!(constant_at < ranked_at);
    }
}
