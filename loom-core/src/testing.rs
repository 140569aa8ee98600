//! Testing utilities.
//!
//! This module provides tools for integration testing:
//! - `MockNarrator` for deterministic sessions without gateway calls
//! - `MockEmbedder` for semantic retrieval without an embedding service
//! - `TestHarness` for scripted story scenarios

use crate::retrieval::Embedder;
use crate::session::{NarrationStream, Narrator, Session, SessionError, TurnOutcome};
use crate::world::{sample_world, WorldDefinition};
use async_trait::async_trait;
use muse::{GenerateRequest, StreamEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// A narrator that replays scripted replies.
///
/// Clones share the same script queue, so a harness can keep queueing
/// replies after the session has taken ownership of its copy.
#[derive(Clone)]
pub struct MockNarrator {
    script: Arc<Mutex<VecDeque<String>>>,
    /// Every request the session issued, for assertions on prompts.
    requests: Arc<Mutex<Vec<GenerateRequest>>>,
}

impl MockNarrator {
    /// Create a narrator with an empty script.
    pub fn empty() -> Self {
        Self::scripted(Vec::new())
    }

    /// Create a narrator with scripted replies, replayed in order.
    pub fn scripted(replies: Vec<String>) -> Self {
        Self {
            script: Arc::new(Mutex::new(replies.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue another reply.
    pub fn queue(&self, reply: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply.into());
        }
    }

    /// Requests captured so far.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// The most recent request, if any.
    pub fn last_request(&self) -> Option<GenerateRequest> {
        self.requests().into_iter().last()
    }
}

#[async_trait]
impl Narrator for MockNarrator {
    async fn begin(&self, request: GenerateRequest) -> Result<NarrationStream, muse::Error> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let reply = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| "The narrator has nothing more to say.".to_string());

        // Word-granular deltas exercise the same accumulation path a
        // real SSE stream does.
        let mut events: Vec<Result<StreamEvent, muse::Error>> = reply
            .split_inclusive(' ')
            .map(|chunk| {
                Ok(StreamEvent::Delta {
                    text: chunk.to_string(),
                })
            })
            .collect();
        events.push(Ok(StreamEvent::Done {
            finish_reason: muse::FinishReason::Stop,
        }));

        Ok(Box::pin(futures::stream::iter(events)))
    }
}

/// An embedder backed by a fixed text-to-vector table.
#[derive(Clone, Default)]
pub struct MockEmbedder {
    vectors: Arc<Mutex<HashMap<String, Vec<f32>>>>,
    dimensions: usize,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            vectors: Arc::new(Mutex::new(HashMap::new())),
            dimensions,
        }
    }

    /// Pin the vector returned for an exact text.
    pub fn insert(&self, text: impl Into<String>, vector: Vec<f32>) {
        if let Ok(mut vectors) = self.vectors.lock() {
            vectors.insert(text.into(), vector);
        }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, muse::Error> {
        let vectors = self
            .vectors
            .lock()
            .map_err(|_| muse::Error::Network("mock embedder poisoned".to_string()))?;
        Ok(texts
            .iter()
            .map(|text| {
                vectors
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0; self.dimensions.max(1)])
            })
            .collect())
    }
}

/// An embedder that always fails, for degradation tests.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, muse::Error> {
        Err(muse::Error::Network("embedding service down".to_string()))
    }
}

/// Test harness for running story scenarios end to end.
pub struct TestHarness {
    pub session: Session,
    narrator: MockNarrator,
}

impl TestHarness {
    /// Create a harness over the sample world.
    pub fn new() -> Result<Self, SessionError> {
        Self::with_world(sample_world())
    }

    /// Create a harness over a custom world.
    pub fn with_world(world: WorldDefinition) -> Result<Self, SessionError> {
        let narrator = MockNarrator::empty();
        let session = Session::new(world, Box::new(narrator.clone()))?;
        Ok(Self { session, narrator })
    }

    /// Queue the narrator's next reply.
    pub fn expect_reply(&mut self, reply: impl Into<String>) -> &mut Self {
        self.narrator.queue(reply);
        self
    }

    /// Play one player turn through the full pipeline.
    pub async fn play(&mut self, input: &str) -> Result<TurnOutcome, SessionError> {
        self.session.player_turn(input).await
    }

    /// The mock narrator, for request assertions.
    pub fn narrator(&self) -> &MockNarrator {
        &self.narrator
    }
}
