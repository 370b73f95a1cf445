//! Alert agent - composes per-channel notifications and hands them to the
//! gateway.
//!
//! Composition is the timed invocation. Delivery happens in
//! [`Agent::settle`], outside that budget, with a bound per gateway call, so
//! messages that already went out are always reported.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use railmind_common::{Channel, Priority};
use railmind_llm::LlmClient;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::AgentError;
use crate::notify::{NotificationContent, NotificationGateway};
use crate::parse::{lenient_strings, parse_reply};
use crate::reasoning::ask;
use crate::traits::{wrong_input, Agent, AgentInput, AgentName, AgentOutput, AgentSettings};

/// Maximum SMS body length in characters.
pub const SMS_MAX_CHARS: usize = 160;

/// Default bound on a single gateway call.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

const ALERT_SYSTEM_PROMPT: &str = r#"You are the alert and notification agent for Indian Railways.

Write clear, actionable and empathetic notifications for passengers and staff.
Include the train number, the situation and what the reader should do next.
Adapt the format per channel: SMS must fit in 160 characters, email may be
detailed, push notifications need a short title.

Respond with a single JSON object:
{
  "channels": ["sms", "email", "push"],
  "messages": {
    "sms": "short text",
    "email": {"subject": "subject line", "body": "full body"},
    "push": {"title": "short title", "body": "one or two sentences"}
  }
}
"#;

#[derive(Debug, Clone)]
pub struct AlertInput {
    pub message: String,
    pub recipients: Vec<String>,
    /// Channels requested by the caller; empty lets the agent choose
    pub channels: BTreeSet<Channel>,
    pub priority: Priority,
    /// Conclusions of agents that ran earlier in a sequential dispatch
    pub prior_findings: Vec<String>,
}

/// Delivery outcome for one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub delivered: u32,
    pub failed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertReport {
    pub per_channel_status: BTreeMap<Channel, ChannelStatus>,
    pub recipients: usize,
    pub content: BTreeMap<Channel, NotificationContent>,
    /// Addresses still to be notified; `None` once delivery has run
    #[serde(skip)]
    outbox: Option<Vec<String>>,
}

impl AlertReport {
    /// Composed but not yet delivered.
    pub fn is_pending(&self) -> bool {
        self.outbox.is_some()
    }

    pub fn delivered(&self) -> u32 {
        self.per_channel_status.values().map(|s| s.delivered).sum()
    }

    pub fn failed(&self) -> u32 {
        self.per_channel_status.values().map(|s| s.failed).sum()
    }

    pub fn summary(&self) -> String {
        if self.is_pending() {
            let channels: Vec<String> = self.content.keys().map(Channel::to_string).collect();
            return format!(
                "Alert composed for {} to {} recipient(s), not yet delivered",
                channels.join(", "),
                self.recipients
            );
        }
        let channels: Vec<String> = self
            .per_channel_status
            .keys()
            .map(Channel::to_string)
            .collect();
        let mut summary = format!(
            "Alert sent over {} to {} recipient(s): {} delivered, {} failed",
            channels.join(", "),
            self.recipients,
            self.delivered(),
            self.failed()
        );
        if self.recipients == 0 {
            summary.push_str(" (no recipients)");
        }
        summary
    }
}

#[derive(Debug, Deserialize)]
struct RawAlert {
    #[serde(default, deserialize_with = "lenient_strings")]
    channels: Vec<String>,
    #[serde(default, alias = "content", alias = "notifications")]
    messages: Option<Map<String, Value>>,
}

impl RawAlert {
    /// Content per channel, accepting `app` for push and `title` for subject.
    fn content(&self) -> BTreeMap<Channel, NotificationContent> {
        let mut out = BTreeMap::new();
        let Some(ref messages) = self.messages else {
            return out;
        };
        for (key, value) in messages {
            let Ok(channel) = key.parse::<Channel>() else {
                continue;
            };
            let content = match value {
                Value::String(body) => NotificationContent::body(body.trim()),
                Value::Object(fields) => {
                    let text = |k: &str| {
                        fields
                            .get(k)
                            .and_then(Value::as_str)
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                    };
                    let Some(body) = text("body").or_else(|| text("message")) else {
                        continue;
                    };
                    NotificationContent {
                        subject: text("subject").or_else(|| text("title")),
                        body,
                    }
                }
                _ => continue,
            };
            if !content.body.is_empty() {
                out.insert(channel, content);
            }
        }
        out
    }
}

/// Composes notifications and delivers them through a [`NotificationGateway`].
pub struct AlertAgent {
    client: Arc<dyn LlmClient>,
    gateway: Arc<dyn NotificationGateway>,
    settings: AgentSettings,
    default_channels: BTreeSet<Channel>,
    delivery_timeout: Duration,
}

impl AlertAgent {
    pub fn new(
        client: Arc<dyn LlmClient>,
        gateway: Arc<dyn NotificationGateway>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            client,
            gateway,
            settings,
            default_channels: BTreeSet::from([Channel::Sms, Channel::Push]),
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    pub fn with_default_settings(
        client: Arc<dyn LlmClient>,
        gateway: Arc<dyn NotificationGateway>,
    ) -> Self {
        Self::new(client, gateway, AgentSettings::for_agent(AgentName::Alert))
    }

    /// Channels used when neither the caller nor the model picks any.
    pub fn with_default_channels(mut self, channels: BTreeSet<Channel>) -> Self {
        if !channels.is_empty() {
            self.default_channels = channels;
        }
        self
    }

    /// Bound on each gateway call. A call that runs over counts as a failed
    /// delivery for that recipient.
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    fn build_prompt(input: &AlertInput) -> String {
        let mut prompt = format!(
            "Alert priority: {}\nSituation: {}\nRecipients: {}",
            input.priority,
            input.message,
            input.recipients.len()
        );
        if !input.channels.is_empty() {
            let channels: Vec<String> = input.channels.iter().map(Channel::to_string).collect();
            prompt.push_str(&format!("\nChannels: {}", channels.join(", ")));
        }
        if !input.prior_findings.is_empty() {
            prompt.push_str("\n\nFindings from other agents:");
            for finding in &input.prior_findings {
                prompt.push_str(&format!("\n- {finding}"));
            }
        }
        prompt
    }

    fn choose_channels(&self, input: &AlertInput, raw: &RawAlert) -> BTreeSet<Channel> {
        if !input.channels.is_empty() {
            return input.channels.clone();
        }
        let chosen: BTreeSet<Channel> = raw.channels.iter().filter_map(|c| c.parse().ok()).collect();
        if chosen.is_empty() {
            self.default_channels.clone()
        } else {
            chosen
        }
    }

    async fn deliver(
        &self,
        channel: Channel,
        recipients: &[String],
        content: &NotificationContent,
    ) -> ChannelStatus {
        let mut status = ChannelStatus::default();
        if recipients.is_empty() {
            status.failure_reason = Some("no recipients".to_string());
            return status;
        }
        for recipient in recipients {
            let attempt = tokio::time::timeout(
                self.delivery_timeout,
                self.gateway.deliver(channel, recipient, content),
            )
            .await;
            let failure = match attempt {
                Ok(Ok(())) => {
                    status.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "delivery timed out after {} ms",
                    self.delivery_timeout.as_millis()
                ),
            };
            warn!(channel = %channel, recipient = %recipient, error = %failure, "Delivery failed");
            status.failed += 1;
            status.failure_reason.get_or_insert(failure);
        }
        status
    }

    /// Composes content for every chosen channel without sending anything.
    pub async fn compose(&self, input: &AlertInput) -> Result<AlertReport, AgentError> {
        let reply = ask(
            self.client.as_ref(),
            AgentName::Alert,
            &self.settings,
            self.system_prompt(),
            Self::build_prompt(input),
        )
        .await?;
        let raw: RawAlert = parse_reply(&reply)?;

        let composed = raw.content();
        if composed.is_empty() && raw.messages.is_some() {
            return Err(AgentError::malformed("alert reply has no usable channel content"));
        }

        let mut content = BTreeMap::new();
        for channel in self.choose_channels(input, &raw) {
            let mut rendered = composed
                .get(&channel)
                .cloned()
                .unwrap_or_else(|| NotificationContent::body(input.message.clone()));
            if channel == Channel::Sms {
                rendered.subject = None;
                rendered.body = truncate_sms(&rendered.body);
            }
            content.insert(channel, rendered);
        }

        info!(
            agent = %AgentName::Alert,
            priority = %input.priority,
            channels = content.len(),
            recipients = input.recipients.len(),
            "Alert composed"
        );
        Ok(AlertReport {
            per_channel_status: BTreeMap::new(),
            recipients: input.recipients.len(),
            content,
            outbox: Some(input.recipients.clone()),
        })
    }

    /// Delivers a composed report channel by channel. Reports that were
    /// already delivered come back unchanged.
    pub async fn dispatch(&self, mut report: AlertReport) -> AlertReport {
        let Some(recipients) = report.outbox.take() else {
            return report;
        };
        for (channel, content) in &report.content {
            let status = self.deliver(*channel, &recipients, content).await;
            report.per_channel_status.insert(*channel, status);
        }
        info!(
            agent = %AgentName::Alert,
            delivered = report.delivered(),
            failed = report.failed(),
            "Alert dispatched"
        );
        report
    }

    /// Composes and delivers in one step.
    pub async fn send(&self, input: &AlertInput) -> Result<AlertReport, AgentError> {
        let report = self.compose(input).await?;
        Ok(self.dispatch(report).await)
    }
}

fn truncate_sms(body: &str) -> String {
    match body.char_indices().nth(SMS_MAX_CHARS) {
        Some(_) => {
            let cut = body
                .char_indices()
                .nth(SMS_MAX_CHARS - 3)
                .map_or(body.len(), |(idx, _)| idx);
            format!("{}...", body[..cut].trim_end())
        }
        None => body.to_string(),
    }
}

#[async_trait]
impl Agent for AlertAgent {
    fn name(&self) -> AgentName {
        AgentName::Alert
    }

    fn system_prompt(&self) -> &str {
        self.settings
            .system_prompt
            .as_deref()
            .unwrap_or(ALERT_SYSTEM_PROMPT)
    }

    fn timeout(&self) -> Option<std::time::Duration> {
        self.settings.timeout()
    }

    async fn invoke(&self, input: AgentInput) -> Result<AgentOutput, AgentError> {
        match input {
            AgentInput::Alert(input) => self.compose(&input).await.map(AgentOutput::Alert),
            other => Err(wrong_input(AgentName::Alert, &other)),
        }
    }

    async fn settle(&self, output: AgentOutput) -> AgentOutput {
        match output {
            AgentOutput::Alert(report) => AgentOutput::Alert(self.dispatch(report).await),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::notify::{DeliveryError, DryRunGateway};
    use railmind_llm::ScriptedClient;

    /// Records deliveries and rejects recipients starting with `bad`.
    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<(Channel, String, NotificationContent)>>,
    }

    #[async_trait]
    impl NotificationGateway for RecordingGateway {
        async fn deliver(
            &self,
            channel: Channel,
            recipient: &str,
            content: &NotificationContent,
        ) -> Result<(), DeliveryError> {
            if recipient.starts_with("bad") {
                return Err(DeliveryError::Rejected(recipient.to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((channel, recipient.to_string(), content.clone()));
            Ok(())
        }
    }

    fn input(channels: &[Channel], recipients: &[&str]) -> AlertInput {
        AlertInput {
            message: "Train 12627 delayed by 45 minutes at Katpadi".to_string(),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            channels: channels.iter().copied().collect(),
            priority: Priority::High,
            prior_findings: Vec::new(),
        }
    }

    const COMPOSED: &str = r#"{
        "channels": ["sms", "email", "app"],
        "messages": {
            "sms": "12627 delayed 45 min at Katpadi.",
            "email": {"subject": "Delay: 12627", "body": "Your train is delayed."},
            "app": {"title": "12627 delayed", "body": "45 minute delay at Katpadi."}
        }
    }"#;

    #[tokio::test]
    async fn delivers_requested_channels_only() {
        let gateway = Arc::new(RecordingGateway::default());
        let agent = AlertAgent::with_default_settings(
            Arc::new(ScriptedClient::replying(COMPOSED)),
            gateway.clone(),
        );
        let report = agent
            .send(&input(&[Channel::Sms, Channel::Email], &["p1", "p2"]))
            .await
            .unwrap();

        assert_eq!(
            report.per_channel_status.keys().copied().collect::<Vec<_>>(),
            vec![Channel::Sms, Channel::Email]
        );
        assert_eq!(report.per_channel_status[&Channel::Sms].delivered, 2);
        assert_eq!(report.content[&Channel::Email].subject.as_deref(), Some("Delay: 12627"));
        assert_eq!(gateway.sent.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn model_chooses_channels_when_caller_does_not() {
        let agent = AlertAgent::with_default_settings(
            Arc::new(ScriptedClient::replying(COMPOSED)),
            Arc::new(DryRunGateway),
        );
        let report = agent.send(&input(&[], &["p1"])).await.unwrap();
        assert_eq!(report.per_channel_status.len(), 3);
        assert_eq!(report.content[&Channel::Push].subject.as_deref(), Some("12627 delayed"));
    }

    #[tokio::test]
    async fn records_per_recipient_failures() {
        let agent = AlertAgent::with_default_settings(
            Arc::new(ScriptedClient::replying(COMPOSED)),
            Arc::new(RecordingGateway::default()),
        );
        let report = agent
            .send(&input(&[Channel::Push], &["p1", "bad-2"]))
            .await
            .unwrap();
        let status = &report.per_channel_status[&Channel::Push];
        assert_eq!(status.delivered, 1);
        assert_eq!(status.failed, 1);
        assert_eq!(status.failure_reason.as_deref(), Some("recipient 'bad-2' rejected"));
    }

    #[tokio::test]
    async fn no_recipients_is_reported_per_channel() {
        let agent = AlertAgent::with_default_settings(
            Arc::new(ScriptedClient::replying(COMPOSED)),
            Arc::new(DryRunGateway),
        );
        let report = agent.send(&input(&[Channel::Sms], &[])).await.unwrap();
        let status = &report.per_channel_status[&Channel::Sms];
        assert_eq!(status.delivered, 0);
        assert_eq!(status.failure_reason.as_deref(), Some("no recipients"));
        assert!(report.summary().contains("no recipients"));
    }

    #[tokio::test]
    async fn sms_is_truncated_and_missing_content_falls_back() {
        let long = "x".repeat(400);
        let reply = format!(r#"{{"messages": {{"sms": "{long}"}}}}"#);
        let agent = AlertAgent::with_default_settings(
            Arc::new(ScriptedClient::replying(reply)),
            Arc::new(DryRunGateway),
        );
        let report = agent
            .send(&input(&[Channel::Sms, Channel::Email], &["p1"]))
            .await
            .unwrap();
        assert_eq!(report.content[&Channel::Sms].body.chars().count(), SMS_MAX_CHARS);
        assert_eq!(
            report.content[&Channel::Email].body,
            "Train 12627 delayed by 45 minutes at Katpadi"
        );
    }

    #[tokio::test]
    async fn prior_findings_reach_the_prompt() {
        let client = ScriptedClient::from_fn(|request, _| {
            let prompt = request.last_user_message().unwrap_or_default();
            assert!(prompt.contains("Findings from other agents"));
            assert!(prompt.contains("- Two connections at risk"));
            assert_eq!(request.temperature, Some(0.2));
            Ok(r#"{"messages": {"sms": "Delay"}}"#.to_string())
        });
        let agent = AlertAgent::with_default_settings(Arc::new(client), Arc::new(DryRunGateway));
        let mut alert = input(&[Channel::Sms], &["p1"]);
        alert.prior_findings = vec!["Two connections at risk".to_string()];
        agent.send(&alert).await.unwrap();
    }

    #[tokio::test]
    async fn unusable_content_is_malformed() {
        let agent = AlertAgent::with_default_settings(
            Arc::new(ScriptedClient::replying(r#"{"messages": {"fax": "hello"}}"#)),
            Arc::new(DryRunGateway),
        );
        let err = agent.send(&input(&[], &["p1"])).await.unwrap_err();
        assert_eq!(err.kind, crate::AgentErrorKind::MalformedOutput);
    }

    #[tokio::test]
    async fn invoke_composes_and_settle_delivers() {
        let gateway = Arc::new(RecordingGateway::default());
        let agent = AlertAgent::with_default_settings(
            Arc::new(ScriptedClient::replying(COMPOSED)),
            gateway.clone(),
        );
        let output = agent
            .invoke(AgentInput::Alert(input(&[Channel::Sms, Channel::Push], &["p1"])))
            .await
            .unwrap();
        let AgentOutput::Alert(ref composed) = output else {
            panic!("expected an alert report");
        };
        assert!(composed.is_pending());
        assert!(composed.per_channel_status.is_empty());
        assert!(composed.summary().contains("not yet delivered"));
        assert!(gateway.sent.lock().unwrap().is_empty());

        let AgentOutput::Alert(delivered) = agent.settle(output).await else {
            panic!("expected an alert report");
        };
        assert!(!delivered.is_pending());
        assert_eq!(delivered.delivered(), 2);
        assert_eq!(gateway.sent.lock().unwrap().len(), 2);

        // A second settle must not send again.
        let again = agent.dispatch(delivered.clone()).await;
        assert_eq!(again, delivered);
        assert_eq!(gateway.sent.lock().unwrap().len(), 2);
    }

    /// Push calls hang well past any sensible bound.
    struct StalledPushGateway;

    #[async_trait]
    impl NotificationGateway for StalledPushGateway {
        async fn deliver(
            &self,
            channel: Channel,
            _recipient: &str,
            _content: &NotificationContent,
        ) -> Result<(), DeliveryError> {
            if channel == Channel::Push {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn stalled_channel_keeps_the_others_reported() {
        let agent = AlertAgent::with_default_settings(
            Arc::new(ScriptedClient::replying(COMPOSED)),
            Arc::new(StalledPushGateway),
        )
        .with_delivery_timeout(std::time::Duration::from_millis(50));
        let report = agent
            .send(&input(&[Channel::Sms, Channel::Push], &["p1"]))
            .await
            .unwrap();

        let sms = &report.per_channel_status[&Channel::Sms];
        assert_eq!(sms.delivered, 1);
        let push = &report.per_channel_status[&Channel::Push];
        assert_eq!(push.delivered, 0);
        assert_eq!(push.failed, 1);
        assert!(push.failure_reason.as_deref().unwrap().contains("timed out"));
    }

    #[test]
    fn sms_truncation_respects_char_boundaries() {
        let body = "é".repeat(200);
        let cut = truncate_sms(&body);
        assert_eq!(cut.chars().count(), SMS_MAX_CHARS);
        assert!(cut.ends_with("..."));
    }
}
