//! Building typed agent inputs from a request and its context.
//!
//! Callers often put operational details in the request text instead of the
//! context ("Train 12627 delayed by 45 minutes at Katpadi"). Missing context
//! fields are recovered from the text before any input is built; values the
//! caller supplied always win.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use railmind_agents::{
    AgentInput, AgentName, AlertInput, BookingSnapshot, CrowdInput, OperationsInput,
    PassengerInput,
};
use railmind_common::{Channel, Priority, RailmindError, Request, RequestContext, Result};
use railmind_knowledge::Category;
use regex::Regex;
use serde_json::Value;

use crate::config::AlertConfig;

/// Context key for the number of observations behind crowd data.
pub const SAMPLE_COUNT: &str = "sample_count";
/// Context key for the age of the newest crowd observation.
pub const DATA_AGE_MINUTES: &str = "data_age_minutes";

/// Context keys for seat bookings on the train.
pub const TOTAL_CAPACITY: &str = "total_capacity";
pub const TOTAL_BOOKED: &str = "total_booked";
pub const WAITLIST: &str = "waitlist";

/// Train number used when neither context nor text names one.
pub const UNKNOWN_TRAIN: &str = "unknown";

static TRAIN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)\btrain\s*(?:no\.?|number|#)?\s*:?\s*(\d{4,5})\b").ok()
});

static DELAY_MINUTES: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,4})\s*(?:minutes?|mins?)\b").ok());

static DELAY_HOURS: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})\s*(?:hours?|hrs?)\b").ok());

static LOCATION: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"\b(?:at|near|from)\s+([A-Z][A-Za-z]+(?:\s+[A-Z][A-Za-z]+)*)").ok()
});

fn capture<'t>(re: &Lazy<Option<Regex>>, text: &'t str) -> Option<&'t str> {
    re.as_ref()?.captures(text)?.get(1).map(|m| m.as_str())
}

/// Copy of the request context with missing operational fields filled from
/// the request text.
pub fn enrich_context(request: &Request) -> RequestContext {
    let mut context = request.context().clone();
    let text = request.text();

    if let Some(train) = capture(&TRAIN, text) {
        context.insert_if_absent(RequestContext::TRAIN_NUMBER, Value::from(train));
    }
    let delay = capture(&DELAY_MINUTES, text)
        .and_then(|m| m.parse::<u64>().ok())
        .or_else(|| {
            capture(&DELAY_HOURS, text)
                .and_then(|h| h.parse::<u64>().ok())
                .map(|h| h * 60)
        });
    if let Some(minutes) = delay {
        context.insert_if_absent(RequestContext::DELAY_MINUTES, Value::from(minutes));
    }
    if let Some(location) = capture(&LOCATION, text) {
        context.insert_if_absent(RequestContext::CURRENT_LOCATION, Value::from(location));
    }
    context
}

/// Rejects a `category` the knowledge base does not know.
pub fn validate_category(context: &RequestContext) -> Result<()> {
    if let Some(category) = context.category() {
        category.parse::<Category>().map_err(|_| {
            RailmindError::InvalidRequest(format!(
                "context field 'category' must be one of timetables, policies, refund-rules, route-maps; got '{category}'"
            ))
        })?;
    }
    Ok(())
}

/// Builds agent inputs for one execution.
pub struct InputBuilder<'a> {
    pub request: &'a Request,
    pub context: &'a RequestContext,
    pub priority: Priority,
    pub alert: &'a AlertConfig,
}

impl InputBuilder<'_> {
    /// Input for `agent`. `prior_findings` only reaches the alert agent.
    pub fn build(&self, agent: AgentName, prior_findings: Vec<String>) -> Option<AgentInput> {
        let input = match agent {
            AgentName::Operations => AgentInput::Operations(self.operations()),
            AgentName::Crowd => AgentInput::Crowd(self.crowd()),
            AgentName::Passenger => AgentInput::Passenger(self.passenger()),
            AgentName::Alert => AgentInput::Alert(self.alert(prior_findings)),
            AgentName::Planner => return None,
        };
        Some(input)
    }

    fn operations(&self) -> OperationsInput {
        OperationsInput {
            train_number: self
                .context
                .train_number()
                .unwrap_or_else(|| UNKNOWN_TRAIN.to_string()),
            delay_minutes: self.context.delay_minutes(),
            location: self.context.current_location(),
            affected_passengers: self.context.affected_passengers(),
            description: self.request.text().to_string(),
        }
    }

    fn crowd(&self) -> CrowdInput {
        CrowdInput {
            train_number: self.context.train_number(),
            route: self.context.route(),
            time: self.context.time(),
            location: self.context.current_location(),
            affected_passengers: self.context.affected_passengers(),
            delay_minutes: self.context.delay_minutes(),
            sample_count: self.context.unsigned(SAMPLE_COUNT),
            data_age_minutes: self.context.unsigned(DATA_AGE_MINUTES),
            booking: self
                .context
                .unsigned(TOTAL_CAPACITY)
                .zip(self.context.unsigned(TOTAL_BOOKED))
                .and_then(|(capacity, booked)| {
                    BookingSnapshot::new(capacity, booked, self.context.unsigned(WAITLIST))
                }),
        }
    }

    fn passenger(&self) -> PassengerInput {
        PassengerInput {
            query: self.request.text().to_string(),
            category: self.context.category().and_then(|c| c.parse().ok()),
            passenger_id: self.context.passenger_id(),
        }
    }

    fn alert(&self, prior_findings: Vec<String>) -> AlertInput {
        let recipients = match self.context.recipients() {
            Some(recipients) if !recipients.is_empty() => recipients,
            _ => match self.context.train_number() {
                Some(train) => vec![format!("passengers:train:{train}")],
                None => vec![self.alert.default_recipient.clone()],
            },
        };
        let channels: BTreeSet<Channel> = self.context.channels().unwrap_or_default().into_iter().collect();
        AlertInput {
            message: self.request.text().to_string(),
            recipients,
            channels,
            priority: self.priority,
            prior_findings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(text: &str, context: Value) -> Request {
        let Value::Object(map) = context else {
            panic!("context must be an object");
        };
        Request::new(text, map).unwrap()
    }

    #[test]
    fn recovers_fields_from_text() {
        let req = request("Train 12627 delayed by 45 minutes at Katpadi", json!({}));
        let ctx = enrich_context(&req);
        assert_eq!(ctx.train_number().as_deref(), Some("12627"));
        assert_eq!(ctx.delay_minutes(), Some(45));
        assert_eq!(ctx.current_location().as_deref(), Some("Katpadi"));
    }

    #[test]
    fn context_values_win_over_text() {
        let req = request(
            "Train 12627 delayed by 45 minutes at Katpadi",
            json!({"train_number": 16089, "delay_minutes": 10}),
        );
        let ctx = enrich_context(&req);
        assert_eq!(ctx.train_number().as_deref(), Some("16089"));
        assert_eq!(ctx.delay_minutes(), Some(10));
    }

    #[test]
    fn hours_become_minutes() {
        let req = request("Train no. 12007 running 2 hours late", json!({}));
        let ctx = enrich_context(&req);
        assert_eq!(ctx.train_number().as_deref(), Some("12007"));
        assert_eq!(ctx.delay_minutes(), Some(120));
        assert_eq!(ctx.current_location(), None);
    }

    #[test]
    fn unknown_train_defaults() {
        let req = request("Something is delayed", json!({}));
        let ctx = enrich_context(&req);
        let alert = AlertConfig::default();
        let builder = InputBuilder {
            request: &req,
            context: &ctx,
            priority: Priority::Low,
            alert: &alert,
        };
        let Some(AgentInput::Operations(ops)) = builder.build(AgentName::Operations, Vec::new()) else {
            panic!("expected operations input");
        };
        assert_eq!(ops.train_number, UNKNOWN_TRAIN);
        let Some(AgentInput::Alert(alert)) = builder.build(AgentName::Alert, Vec::new()) else {
            panic!("expected alert input");
        };
        assert_eq!(alert.recipients, vec!["operations-desk"]);
        assert!(builder.build(AgentName::Planner, Vec::new()).is_none());
    }

    #[test]
    fn alert_targets_train_passengers_and_requested_channels() {
        let req = request(
            "Notify passengers of train 12627",
            json!({"channels": ["email", "app", "email"]}),
        );
        let ctx = enrich_context(&req);
        let alert_config = AlertConfig::default();
        let builder = InputBuilder {
            request: &req,
            context: &ctx,
            priority: Priority::High,
            alert: &alert_config,
        };
        let Some(AgentInput::Alert(alert)) =
            builder.build(AgentName::Alert, vec!["operations: two connections".to_string()])
        else {
            panic!("expected alert input");
        };
        assert_eq!(alert.recipients, vec!["passengers:train:12627"]);
        assert_eq!(alert.channels, BTreeSet::from([Channel::Email, Channel::Push]));
        assert_eq!(alert.priority, Priority::High);
        assert_eq!(alert.prior_findings.len(), 1);
    }

    #[test]
    fn crowd_reads_data_quality_fields() {
        let req = request(
            "How crowded will 12627 be?",
            json!({"route": "Chennai-Bengaluru", "sample_count": 320, "data_age_minutes": 15,
                   "total_capacity": 1000, "total_booked": 870}),
        );
        let ctx = enrich_context(&req);
        let alert = AlertConfig::default();
        let builder = InputBuilder {
            request: &req,
            context: &ctx,
            priority: Priority::Medium,
            alert: &alert,
        };
        let Some(AgentInput::Crowd(crowd)) = builder.build(AgentName::Crowd, Vec::new()) else {
            panic!("expected crowd input");
        };
        assert_eq!(crowd.route.as_deref(), Some("Chennai-Bengaluru"));
        assert_eq!(crowd.sample_count, Some(320));
        assert_eq!(crowd.data_age_minutes, Some(15));
        assert_eq!(crowd.booking, BookingSnapshot::new(1000, 870, None));
    }

    #[test]
    fn category_must_be_known() {
        let ok = request("Refund?", json!({"category": "refund_rules"}));
        assert!(validate_category(ok.context()).is_ok());
        let bad = request("Refund?", json!({"category": "weather"}));
        assert!(matches!(
            validate_category(bad.context()),
            Err(RailmindError::InvalidRequest(_))
        ));
    }
}
