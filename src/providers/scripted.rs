// Scripted provider
//
// Replays a fixed sequence of outcomes without network I/O. The final
// outcome repeats once the script runs out. Used by tests and offline runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::types::{ProviderOutcome, ProviderRequest, ProviderResponse, Usage};
use super::LlmProvider;

pub struct ScriptedProvider {
    script: Mutex<VecDeque<ProviderOutcome>>,
    requests: Mutex<Vec<ProviderRequest>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(outcomes: impl IntoIterator<Item = ProviderOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// A provider that always answers with `text`.
    pub fn replying(text: &str) -> Self {
        Self::new([Self::success(text)])
    }

    /// Sleep (on the tokio clock) before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// A successful outcome carrying `text`.
    pub fn success(text: &str) -> ProviderOutcome {
        ProviderOutcome::Success(ProviderResponse {
            text: text.to_string(),
            model: "scripted-model".to_string(),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
        })
    }

    /// Number of `complete` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn next_outcome(&self) -> ProviderOutcome {
        let Ok(mut script) = self.script.lock() else {
            return exhausted();
        };
        if script.len() > 1 {
            script.pop_front().unwrap_or_else(exhausted)
        } else {
            script.front().cloned().unwrap_or_else(exhausted)
        }
    }
}

fn exhausted() -> ProviderOutcome {
    ProviderOutcome::ProviderError {
        status: None,
        message: "script exhausted".to_string(),
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, request: &ProviderRequest) -> ProviderOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_outcome()
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }
}
