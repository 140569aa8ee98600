//! Story sessions — the primary public API.
//!
//! A `Session` owns the world definition, the game state, conversation
//! memory, and retrieval caches, and runs the per-turn pipeline:
//! retrieve relevant lorebook entries, build the prompt, await the
//! narrator, parse the reply, and apply effects. One turn is fully
//! processed before the next begins; callers serialize turns per
//! session.

use crate::components::{resolve_components, ComponentView};
use crate::memory::SessionMemory;
use crate::parser;
use crate::retrieval::{
    content_hash, rank_entries, Embedder, EmbeddingCache, RetrievalWeights,
};
use crate::rules::{Effect, EvalDiagnostic, RulesEngine};
use crate::state::{GameState, StateError, StateManager};
use crate::world::{AudioTrack, WorldDefinition, WorldError};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use muse::{GenerateRequest, StreamEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::pin::Pin;
use thiserror::Error;
use tokio::fs;
use tokio::sync::watch;
use uuid::Uuid;

/// How many recent turns feed the retrieval scan alongside the latest
/// input.
const SCAN_TURNS: usize = 6;

/// Current save file version.
const SAVE_VERSION: u32 = 1;

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] muse::Error),

    #[error("World error: {0}")]
    World(#[from] WorldError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Save version mismatch: expected {expected}, found {found}")]
    SaveVersionMismatch { expected: u32, found: u32 },

    #[error("Save belongs to world '{found}', not '{expected}'")]
    WorldMismatch { expected: String, found: String },
}

/// Unique identifier for sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The streamed output of one narration call.
pub type NarrationStream =
    Pin<Box<dyn Stream<Item = Result<StreamEvent, muse::Error>> + Send>>;

/// The text-generation capability a session consumes.
///
/// Implemented by `muse::Muse` for real gateways and by
/// `testing::MockNarrator` for deterministic tests.
#[async_trait]
pub trait Narrator: Send + Sync {
    /// Start one completion, returning its event stream. Dropping the
    /// stream aborts the completion.
    async fn begin(&self, request: GenerateRequest) -> Result<NarrationStream, muse::Error>;
}

#[async_trait]
impl Narrator for muse::Muse {
    async fn begin(&self, request: GenerateRequest) -> Result<NarrationStream, muse::Error> {
        self.stream(request).await
    }
}

/// The result of one fully processed turn.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    /// Narrator text with engine markup removed.
    pub display_text: String,
    /// Player options extracted from the reply.
    pub choices: Vec<String>,
    /// State directives the parser extracted and the engine applied.
    pub directives: Vec<Effect>,
    /// Rules that fired during this turn's evaluation pass.
    pub fired_rule_ids: Vec<String>,
    /// Audio tracks cued by fired rules, resolved against the world.
    pub audio: Vec<AudioTrack>,
    /// Evaluation anomalies recorded while applying effects.
    pub diagnostics: Vec<EvalDiagnostic>,
    /// Resolved presentation components after the turn.
    pub components: Vec<ComponentView>,
    /// True when the turn advanced no state and cued nothing — a
    /// distinguishable outcome, not a silent success.
    pub no_op: bool,
}

/// A running story session.
pub struct Session {
    id: SessionId,
    world: WorldDefinition,
    state: GameState,
    memory: SessionMemory,
    narrator: Box<dyn Narrator>,
    embedder: Option<Box<dyn Embedder>>,
    embedding_cache: EmbeddingCache,
    manager: StateManager,
    rules: RulesEngine,
}

impl Session {
    /// Start a fresh session for a validated world.
    ///
    /// The active character's greeting, when present, seeds the opening
    /// narrator turn.
    pub fn new(world: WorldDefinition, narrator: Box<dyn Narrator>) -> Result<Self, SessionError> {
        world.validate()?;

        let manager = StateManager::new();
        let state = manager.create(&world);

        let mut memory = SessionMemory::new();
        if let Some(greeting) = state
            .active_character_id
            .as_deref()
            .and_then(|id| world.character(id))
            .and_then(|c| c.greeting.clone())
        {
            memory.add_narrator(greeting);
        }

        Ok(Self {
            id: SessionId::new(),
            world,
            state,
            memory,
            narrator,
            embedder: None,
            embedding_cache: EmbeddingCache::default(),
            manager,
            rules: RulesEngine::new(),
        })
    }

    /// Attach an embedding collaborator, enabling semantic retrieval
    /// for entries that opted in.
    pub fn with_embedder(mut self, embedder: Box<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Resume a session from previously persisted state.
    pub fn from_state(
        world: WorldDefinition,
        raw_state: serde_json::Value,
        narrator: Box<dyn Narrator>,
    ) -> Result<Self, SessionError> {
        world.validate()?;
        let manager = StateManager::new();
        let state = manager.migrate(raw_state, &world)?;

        Ok(Self {
            id: SessionId::new(),
            world,
            state,
            memory: SessionMemory::new(),
            narrator,
            embedder: None,
            embedding_cache: EmbeddingCache::default(),
            manager,
            rules: RulesEngine::new(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn world(&self) -> &WorldDefinition {
        &self.world
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn memory(&self) -> &SessionMemory {
        &self.memory
    }

    pub fn turn_count(&self) -> u32 {
        self.state.turn_count
    }

    /// Process one player turn to completion.
    pub async fn player_turn(&mut self, input: &str) -> Result<TurnOutcome, SessionError> {
        let outcome = self
            .player_turn_streaming(input, None, |_| {})
            .await?
            .unwrap_or_default();
        Ok(outcome)
    }

    /// Process one player turn, streaming narrator deltas through
    /// `on_delta`.
    ///
    /// When `cancel` flips to `true` mid-stream the completion is
    /// aborted, partial output is discarded, and `Ok(None)` is
    /// returned with no state effects applied — state only advances on
    /// a fully parsed turn.
    pub async fn player_turn_streaming<F>(
        &mut self,
        input: &str,
        cancel: Option<watch::Receiver<bool>>,
        mut on_delta: F,
    ) -> Result<Option<TurnOutcome>, SessionError>
    where
        F: FnMut(&str),
    {
        // 1. Retrieval: keyword triggers and rankers over the scan text.
        let scan = self.scan_text(input);
        let semantic_scores = self.semantic_scores(&scan).await;
        let weights = RetrievalWeights {
            lexical: self.world.settings.lexical_weight,
            semantic: self.world.settings.semantic_weight,
        };
        let ranked = rank_entries(
            &self.world.lorebook,
            &scan,
            semantic_scores.as_ref(),
            weights,
        );
        tracing::debug!(entries = ranked.len(), "retrieval selected entries");

        // 2. Prompt assembly under the world's token budget.
        let messages = crate::prompt::PromptBuilder::build(
            &self.world,
            &self.state,
            &self.memory,
            &ranked,
            input,
        );

        let mut request = GenerateRequest::new(messages)
            .with_max_tokens(self.world.settings.max_tokens);
        if let Some(model) = &self.world.settings.model {
            request = request.with_model(model.clone());
        }
        if let Some(temperature) = self.world.settings.temperature {
            request = request.with_temperature(temperature);
        }

        // 3. Await the completion, honoring cancellation between events.
        let stream = self.narrator.begin(request).await?;
        let Some(raw) = consume_stream(stream, cancel, &mut on_delta).await? else {
            tracing::debug!("turn cancelled mid-stream; no effects applied");
            return Ok(None);
        };

        // 4. Parse the untrusted reply.
        let parsed = parser::parse(&raw);

        // 5. Apply parsed directives, then run the rules pass over the
        //    mutated state.
        let before = self.state.clone();
        let (after_directives, mut diagnostics) =
            self.manager
                .apply_effects(&self.world, &self.state, &parsed.directives);
        let eval = self.rules.evaluate(&self.world, &after_directives);
        diagnostics.extend(eval.diagnostics.clone());

        let mut state = eval.state;
        state.turn_count += 1;
        self.state = state;

        self.memory.add_player(input);
        self.memory.add_narrator(&parsed.display_text);

        // No state progress and nothing cued: a directive that parsed
        // but applied nothing still leaves the turn a no-op.
        let no_op = eval.fired_rule_ids.is_empty()
            && eval.audio_effects.is_empty()
            && self.state.variables == before.variables;

        let audio = eval
            .audio_effects
            .iter()
            .filter_map(|id| self.world.audio_track(id).cloned())
            .collect();

        let components = resolve_components(&self.world, &self.state, &parsed.choices);

        Ok(Some(TurnOutcome {
            display_text: parsed.display_text,
            choices: parsed.choices,
            directives: parsed.directives,
            fired_rule_ids: eval.fired_rule_ids,
            audio,
            diagnostics,
            components,
            no_op,
        }))
    }

    /// Save the session to a pretty-JSON file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let saved = SavedSession {
            version: SAVE_VERSION,
            saved_at: chrono::Utc::now().to_rfc3339(),
            world_id: self.world.id.clone(),
            state: self.state.clone(),
            memory: self.memory.clone(),
        };
        let content = serde_json::to_string_pretty(&saved)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load a saved session against the given world definition.
    pub async fn load(
        path: impl AsRef<Path>,
        world: WorldDefinition,
        narrator: Box<dyn Narrator>,
    ) -> Result<Self, SessionError> {
        let content = fs::read_to_string(path).await?;
        let saved: SavedSession = serde_json::from_str(&content)?;

        if saved.version != SAVE_VERSION {
            return Err(SessionError::SaveVersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }
        if saved.world_id != world.id {
            return Err(SessionError::WorldMismatch {
                expected: world.id.clone(),
                found: saved.world_id,
            });
        }

        let mut session =
            Self::from_state(world, serde_json::to_value(&saved.state)?, narrator)?;
        session.memory = saved.memory;
        Ok(session)
    }

    fn scan_text(&self, input: &str) -> String {
        let mut scan = self.memory.scan_window(SCAN_TURNS);
        if !scan.is_empty() {
            scan.push('\n');
        }
        scan.push_str(input);
        scan
    }

    /// Cosine similarities for semantically retrievable entries, or
    /// `None` when the capability is absent, disabled, or failing —
    /// retrieval then degrades to lexical-only ranking.
    async fn semantic_scores(&mut self, scan: &str) -> Option<HashMap<String, f32>> {
        if !self.world.settings.semantic_retrieval {
            return None;
        }
        let embedder = self.embedder.as_ref()?;

        let candidates: Vec<(String, String, String)> = self
            .world
            .lorebook
            .iter()
            .filter(|entry| entry.use_semantic)
            .map(|entry| (entry.id.clone(), content_hash(&entry.text), entry.text.clone()))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        // One batch: the query first, then every entry missing from the
        // cache.
        let mut batch = vec![scan.to_string()];
        let mut misses = Vec::new();
        for (id, hash, text) in &candidates {
            if self.embedding_cache.get(hash).is_none() {
                misses.push((id.clone(), hash.clone()));
                batch.push(text.clone());
            }
        }

        let vectors = match embedder.embed(&batch).await {
            Ok(vectors) => vectors,
            Err(error) => {
                tracing::warn!(%error, "embedding call failed; falling back to lexical ranking");
                return None;
            }
        };

        let mut iter = vectors.into_iter();
        let query_vector = iter.next()?;
        for ((_, hash), vector) in misses.iter().zip(iter) {
            self.embedding_cache.put(hash.clone(), vector);
        }

        let mut entry_vectors = HashMap::new();
        for (id, hash, _) in &candidates {
            if let Some(vector) = self.embedding_cache.get(hash) {
                entry_vectors.insert(id.clone(), vector.to_vec());
            }
        }

        Some(crate::retrieval::rank::semantic_scores(
            &query_vector,
            &entry_vectors,
        ))
    }
}

/// Drain a narration stream into its full text, watching for
/// cancellation between events. Returns `None` when cancelled.
async fn consume_stream<F>(
    mut stream: NarrationStream,
    mut cancel: Option<watch::Receiver<bool>>,
    on_delta: &mut F,
) -> Result<Option<String>, SessionError>
where
    F: FnMut(&str),
{
    let mut text = String::new();

    loop {
        let event = tokio::select! {
            biased;
            // Returning drops the stream, which aborts the request
            _ = cancelled(&mut cancel) => return Ok(None),
            event = stream.next() => event,
        };

        match event {
            Some(Ok(StreamEvent::Delta { text: delta })) => {
                on_delta(&delta);
                text.push_str(&delta);
            }
            Some(Ok(StreamEvent::Done { .. })) | None => break,
            Some(Err(error)) => return Err(error.into()),
        }
    }

    Ok(Some(text))
}

/// Resolves when the watch flag flips to `true`; pends forever when no
/// receiver was supplied or its sender is gone.
async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = cancel else {
        return futures::future::pending().await;
    };
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender dropped without cancelling
            return futures::future::pending().await;
        }
    }
}

/// Serializable session snapshot for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct SavedSession {
    version: u32,
    saved_at: String,
    world_id: String,
    state: GameState,
    memory: SessionMemory,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockNarrator;
    use crate::world::sample_world;

    #[test]
    fn test_session_seeds_greeting() {
        let session = Session::new(sample_world(), Box::new(MockNarrator::empty())).unwrap();
        assert_eq!(session.memory().len(), 1);
        assert_eq!(session.turn_count(), 0);
    }

    #[test]
    fn test_invalid_world_rejected() {
        let mut world = sample_world();
        world.id = String::new();
        assert!(matches!(
            Session::new(world, Box::new(MockNarrator::empty())),
            Err(SessionError::World(WorldError::MissingId))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_turn_applies_nothing() {
        let world = sample_world();
        let mut session = Session::new(
            world,
            Box::new(MockNarrator::scripted(vec![
                r#"Too late. <state var="hp" op="set" value="1"/>"#.to_string(),
            ])),
        )
        .unwrap();

        let (tx, rx) = watch::channel(true);
        let before = session.state().clone();
        let outcome = session
            .player_turn_streaming("wait", Some(rx), |_| {})
            .await
            .unwrap();
        drop(tx);

        assert!(outcome.is_none());
        assert_eq!(session.state(), &before);
        // Memory untouched: only the greeting remains
        assert_eq!(session.memory().len(), 1);
    }
}
