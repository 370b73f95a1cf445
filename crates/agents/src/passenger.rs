//! Passenger agent - answers passenger questions from the knowledge base.

use std::sync::Arc;

use async_trait::async_trait;
use railmind_knowledge::{Category, DocumentRef, KnowledgeBase, RetrievalResult};
use railmind_llm::LlmClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::parse::{lenient_f64, lenient_strings, parse_reply};
use crate::reasoning::ask;
use crate::traits::{wrong_input, Agent, AgentInput, AgentName, AgentOutput, AgentSettings};

const PASSENGER_SYSTEM_PROMPT: &str = r#"You are a passenger assistance agent for Indian Railways.

Answer the passenger's question using the knowledge base passages provided.
Each passage is labelled like [refund-rules#0]. Cite the labels you relied on.
If the passages do not cover the question, say so plainly and suggest where
the passenger can get help. Be empathetic and concise.

Respond with a single JSON object:
{
  "answer": "the answer for the passenger",
  "sources": ["refund-rules#0"],
  "confidence": 0.0 to 1.0,
  "alternatives": ["other travel options, if relevant"],
  "next_steps": ["what the passenger should do"]
}
"#;

#[derive(Debug, Clone)]
pub struct PassengerInput {
    pub query: String,
    /// Restricts retrieval to one category when set
    pub category: Option<Category>,
    pub passenger_id: Option<String>,
}

/// A passage the answer was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub id: DocumentRef,
    pub category: Category,
    pub score: f64,
    pub excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassengerAnswer {
    pub answer: String,
    pub sources_used: Vec<SourceRef>,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub next_steps: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawAnswer {
    #[serde(default, alias = "response")]
    answer: Option<String>,
    #[serde(default, alias = "sources_used", alias = "citations", deserialize_with = "lenient_strings")]
    sources: Vec<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient_strings")]
    alternatives: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    next_steps: Vec<String>,
}

/// Chooses a retrieval category from the wording of a question.
pub fn infer_category(query: &str) -> Option<Category> {
    let q = query.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| q.contains(w));
    if has(&["refund", "cancel", "tdr"]) {
        Some(Category::RefundRules)
    } else if has(&["timetable", "schedule", "departure", "arrival", "timing"]) {
        Some(Category::Timetables)
    } else if has(&["route", "map", " via ", "stops at"]) {
        Some(Category::RouteMaps)
    } else if has(&["policy", "policies", "rule", "luggage", "baggage", "allowed"]) {
        Some(Category::Policies)
    } else {
        None
    }
}

/// Answers passenger queries with retrieved knowledge-base context.
pub struct PassengerAgent {
    client: Arc<dyn LlmClient>,
    knowledge: Arc<KnowledgeBase>,
    settings: AgentSettings,
    top_k: usize,
    max_context_chars: usize,
}

impl PassengerAgent {
    pub fn new(
        client: Arc<dyn LlmClient>,
        knowledge: Arc<KnowledgeBase>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            client,
            knowledge,
            settings,
            top_k: 5,
            max_context_chars: 4000,
        }
    }

    pub fn with_default_settings(client: Arc<dyn LlmClient>, knowledge: Arc<KnowledgeBase>) -> Self {
        Self::new(client, knowledge, AgentSettings::for_agent(AgentName::Passenger))
    }

    pub fn with_retrieval(mut self, top_k: usize, max_context_chars: usize) -> Self {
        self.top_k = top_k.max(1);
        self.max_context_chars = max_context_chars;
        self
    }

    /// Filtered retrieval, widened to the whole corpus when the category has
    /// nothing. Retrieval failure degrades to answering without context.
    async fn gather(&self, input: &PassengerInput) -> RetrievalResult {
        let category = input.category.or_else(|| infer_category(&input.query));
        let result = match self.knowledge.retrieve(&input.query, self.top_k, category).await {
            Ok(result) if result.is_empty() && category.is_some() => {
                debug!(category = ?category, "Category empty, retrying unfiltered");
                self.knowledge.retrieve(&input.query, self.top_k, None).await
            }
            other => other,
        };
        match result {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Retrieval failed, answering without knowledge context");
                RetrievalResult::empty()
            }
        }
    }

    fn build_prompt(input: &PassengerInput, context: &str) -> String {
        let mut prompt = String::new();
        if context.is_empty() {
            prompt.push_str("No knowledge base passages matched this question.\n\n");
        } else {
            prompt.push_str(context);
            prompt.push_str("\n\n");
        }
        if let Some(ref id) = input.passenger_id {
            prompt.push_str(&format!("Passenger ID: {id}\n"));
        }
        prompt.push_str(&format!("Question: {}", input.query));
        prompt
    }

    pub async fn answer(&self, input: &PassengerInput) -> Result<PassengerAnswer, AgentError> {
        let retrieved = self.gather(input).await;
        let context = retrieved.to_prompt_context(self.max_context_chars);

        let reply = ask(
            self.client.as_ref(),
            AgentName::Passenger,
            &self.settings,
            self.system_prompt(),
            Self::build_prompt(input, &context),
        )
        .await?;

        let raw: RawAnswer = parse_reply(&reply)?;
        let answer = raw
            .answer
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| AgentError::malformed("passenger reply is missing answer"))?;

        // Only passages the model actually saw can back the answer.
        let all_sources: Vec<SourceRef> = retrieved
            .rendered(self.max_context_chars)
            .iter()
            .map(|hit| SourceRef {
                id: hit.document.id,
                category: hit.document.category(),
                score: hit.score,
                excerpt: railmind_knowledge::retrieval::truncate(&hit.document.text, 160),
            })
            .collect();

        let cited: Vec<DocumentRef> = raw.sources.iter().filter_map(|s| s.parse().ok()).collect();
        let cited_sources: Vec<SourceRef> = all_sources
            .iter()
            .filter(|s| cited.contains(&s.id))
            .cloned()
            .collect();
        let sources_used = if cited_sources.is_empty() {
            all_sources
        } else {
            cited_sources
        };

        let confidence = raw
            .confidence
            .filter(|c| c.is_finite())
            .or_else(|| retrieved.top_score().filter(|c| c.is_finite()))
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        Ok(PassengerAnswer {
            answer,
            sources_used,
            confidence,
            alternatives: raw.alternatives,
            next_steps: raw.next_steps,
        })
    }
}

#[async_trait]
impl Agent for PassengerAgent {
    fn name(&self) -> AgentName {
        AgentName::Passenger
    }

    fn system_prompt(&self) -> &str {
        self.settings
            .system_prompt
            .as_deref()
            .unwrap_or(PASSENGER_SYSTEM_PROMPT)
    }

    fn timeout(&self) -> Option<std::time::Duration> {
        self.settings.timeout()
    }

    async fn invoke(&self, input: AgentInput) -> Result<AgentOutput, AgentError> {
        match input {
            AgentInput::Passenger(input) => self.answer(&input).await.map(AgentOutput::Passenger),
            other => Err(wrong_input(AgentName::Passenger, &other)),
        }
    }
}
