//! Deterministic providers for tests, behind the `testing` feature.
//!
//! [`KeywordEmbedder`] maps text onto a small constructed embedding space
//! where every axis is a bucket of keywords, so cosine distances between
//! test documents and queries can be worked out by hand.
//! [`ScriptedCompletionProvider`] replays queued completions, records every
//! request it receives and can be told to fail or stall.
//! [`RecordingStaffNotifier`] keeps handoff notices for inspection.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{
    Completion, CompletionProvider, CompletionRequest, EmbeddingProvider, ProviderError,
    TokenUsage,
};
use crate::notify::{HandoffNotice, StaffNotifier};

const HOTEL_BUCKETS: &[(&str, &[&str])] = &[
    ("rates", &["rate", "price", "how much", "per night", "/night", "harga"]),
    ("rooms", &["room", "suite", "bed", "bilik"]),
    ("facilities", &["pool", "gym", "spa", "breakfast", "wifi"]),
    ("directions", &["airport", "direction", "parking", "taxi"]),
    ("policies", &["check-in", "check-out", "cancel", "pet"]),
];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Bag-of-buckets embedder.
///
/// Each bucket contributes `1.0` on its own axis when any of its keywords
/// appears in the lower-cased text. Text that hits no bucket lands on a
/// final "other" axis, so no vector is ever all zeroes.
#[derive(Clone, Debug)]
pub struct KeywordEmbedder {
    buckets: Vec<Vec<String>>,
    failing: Arc<Mutex<bool>>,
    calls: Arc<Mutex<usize>>,
}

impl Default for KeywordEmbedder {
    fn default() -> Self {
        Self::hotel()
    }
}

impl KeywordEmbedder {
    /// Buckets for rates, rooms, facilities, directions and policies.
    pub fn hotel() -> Self {
        Self::with_buckets(
            HOTEL_BUCKETS.iter().map(|(_, keywords)| keywords.to_vec()).collect(),
        )
    }

    pub fn with_buckets(buckets: Vec<Vec<&str>>) -> Self {
        Self {
            buckets: buckets
                .into_iter()
                .map(|keywords| keywords.into_iter().map(str::to_lowercase).collect())
                .collect(),
            failing: Arc::new(Mutex::new(false)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    pub fn calls(&self) -> usize {
        *lock(&self.calls)
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let normalized = text.to_lowercase();
        let mut vector: Vec<f32> = self
            .buckets
            .iter()
            .map(|keywords| {
                if keywords.iter().any(|keyword| normalized.contains(keyword.as_str())) {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        let matched_any = vector.iter().any(|value| *value > 0.0);
        vector.push(if matched_any { 0.0 } else { 1.0 });
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        *lock(&self.calls) += 1;
        if *lock(&self.failing) {
            return Err(ProviderError::Unavailable("embedder switched off".to_string()));
        }
        Ok(self.vector_for(text))
    }

    fn dimensions(&self) -> usize {
        self.buckets.len() + 1
    }
}

#[derive(Debug)]
enum Scripted {
    Reply(String),
    Failure(ProviderError),
}

#[derive(Debug, Default)]
struct ScriptState {
    queue: VecDeque<Scripted>,
    requests: Vec<CompletionRequest>,
    stall: Option<Duration>,
}

/// Completion provider that answers from a queue.
///
/// When the queue is empty it answers with the fallback reply. Cloning
/// shares the queue and the request log.
#[derive(Clone, Debug)]
pub struct ScriptedCompletionProvider {
    state: Arc<Mutex<ScriptState>>,
    fallback: String,
}

impl Default for ScriptedCompletionProvider {
    fn default() -> Self {
        Self::new("Happy to help with that.")
    }
}

impl ScriptedCompletionProvider {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self { state: Arc::new(Mutex::new(ScriptState::default())), fallback: fallback.into() }
    }

    pub fn push_reply(&self, text: impl Into<String>) -> &Self {
        lock(&self.state).queue.push_back(Scripted::Reply(text.into()));
        self
    }

    pub fn push_failure(&self, error: ProviderError) -> &Self {
        lock(&self.state).queue.push_back(Scripted::Failure(error));
        self
    }

    /// Every later call sleeps this long before answering.
    pub fn stall_for(&self, duration: Duration) {
        lock(&self.state).stall = Some(duration);
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.state).requests.clone()
    }

    pub fn request_count(&self) -> usize {
        lock(&self.state).requests.len()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletionProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let (next, stall) = {
            let mut state = lock(&self.state);
            state.requests.push(request);
            (state.queue.pop_front(), state.stall)
        };

        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }

        match next {
            Some(Scripted::Failure(error)) => Err(error),
            Some(Scripted::Reply(text)) => Ok(scripted_completion(text)),
            None => Ok(scripted_completion(self.fallback.clone())),
        }
    }
}

fn scripted_completion(text: String) -> Completion {
    Completion {
        text,
        usage: Some(TokenUsage { prompt_tokens: 100, completion_tokens: 20 }),
        model: Some("scripted".to_string()),
    }
}

/// Collects handoff notices instead of paging anyone.
#[derive(Clone, Debug, Default)]
pub struct RecordingStaffNotifier {
    notices: Arc<Mutex<Vec<HandoffNotice>>>,
}

impl RecordingStaffNotifier {
    pub fn notices(&self) -> Vec<HandoffNotice> {
        lock(&self.notices).clone()
    }
}

#[async_trait]
impl StaffNotifier for RecordingStaffNotifier {
    async fn notify(&self, notice: &HandoffNotice) {
        lock(&self.notices).push(notice.clone());
    }
}
