//! Scripted reasoning client for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use railmind_common::{RailmindError, Result};

use crate::client::{LlmClient, LlmRequest, LlmResponse};

type Script = dyn Fn(&LlmRequest, usize) -> Result<String> + Send + Sync;

/// An [`LlmClient`] whose replies come from a closure.
///
/// The closure receives the request and the zero-based call index. Clones
/// share the call counter, so a test can hand one clone to an agent and keep
/// another to assert on.
#[derive(Clone)]
pub struct ScriptedClient {
    script: Arc<Script>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedClient {
    pub fn from_fn<F>(script: F) -> Self
    where
        F: Fn(&LlmRequest, usize) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always replies with `content`.
    pub fn replying(content: impl Into<String>) -> Self {
        let content = content.into();
        Self::from_fn(move |_, _| Ok(content.clone()))
    }

    /// Always fails with the error built by `make_error`.
    pub fn failing<F>(make_error: F) -> Self
    where
        F: Fn() -> RailmindError + Send + Sync + 'static,
    {
        Self::from_fn(move |_, _| Err(make_error()))
    }

    /// Sleeps for `delay` before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let content = (self.script)(&request, call)?;
        Ok(LlmResponse {
            content,
            model: "scripted".to_string(),
            usage: None,
            finish_reason: Some("stop".to_string()),
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
