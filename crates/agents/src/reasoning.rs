//! The single reasoning call each agent makes.

use std::time::Instant;

use railmind_llm::{LlmClient, LlmRequest};
use tracing::debug;

use crate::error::AgentError;
use crate::traits::{AgentName, AgentSettings};

/// Sends one system + user turn with the agent's tuning and returns the raw
/// reply text.
pub(crate) async fn ask(
    client: &dyn LlmClient,
    agent: AgentName,
    settings: &AgentSettings,
    system_prompt: &str,
    user_prompt: String,
) -> Result<String, AgentError> {
    let started = Instant::now();
    let request = LlmRequest::single_turn(
        system_prompt,
        user_prompt,
        settings.temperature,
        settings.max_tokens,
    );
    let response = client.complete(request).await.map_err(AgentError::from)?;
    debug!(
        agent = %agent,
        model = %response.model,
        elapsed_ms = started.elapsed().as_millis() as u64,
        reply_len = response.content.len(),
        "Reasoning call returned"
    );
    Ok(response.content)
}
