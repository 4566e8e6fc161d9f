//! Optional AI advisor for query tuning hints.
//!
//! Talks to any OpenAI-compatible chat completion endpoint, DeepSeek by
//! default. Compiled behind the `ai` feature and disabled unless an API
//! key is configured, so reports never silently depend on an external
//! service.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cost::CostEstimate;
use crate::fmt::format_bytes;

const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
const DEFAULT_MODEL: &str = "deepseek-chat";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SYSTEM_PROMPT: &str = "You are a PostgreSQL performance engineer. \
    Given a SQL query and planner estimates, suggest concrete rewrites, \
    indexes or configuration changes. Be brief and specific; answer in \
    plain text.";

/// Error type for advisor calls.
#[derive(Debug)]
pub enum AdvisorError {
    /// No API key configured.
    Disabled,
    /// Transport-level failure.
    Http(String),
    /// Non-success response from the API.
    Api(String),
    /// Response body did not match the expected shape.
    Parse(String),
}

impl std::fmt::Display for AdvisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdvisorError::Disabled => write!(f, "advisor disabled: PGSAGE_AI_API_KEY not set"),
            AdvisorError::Http(msg) => write!(f, "advisor request failed: {msg}"),
            AdvisorError::Api(msg) => write!(f, "advisor API error: {msg}"),
            AdvisorError::Parse(msg) => write!(f, "advisor response unreadable: {msg}"),
        }
    }
}

impl std::error::Error for AdvisorError {}

/// Client for an OpenAI-compatible chat completion API.
pub struct AiAdvisor {
    base_url: String,
    model: String,
    api_key: String,
    http: reqwest::blocking::Client,
}

impl AiAdvisor {
    /// Builds an advisor from the environment:
    /// - PGSAGE_AI_API_KEY (required, otherwise [`AdvisorError::Disabled`])
    /// - PGSAGE_AI_BASE_URL (default: DeepSeek)
    /// - PGSAGE_AI_MODEL (default: deepseek-chat)
    pub fn from_env() -> Result<Self, AdvisorError> {
        let api_key = std::env::var("PGSAGE_AI_API_KEY").map_err(|_| AdvisorError::Disabled)?;
        if api_key.is_empty() {
            return Err(AdvisorError::Disabled);
        }
        let base_url =
            std::env::var("PGSAGE_AI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model =
            std::env::var("PGSAGE_AI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AdvisorError::Http(e.to_string()))?;

        Ok(Self {
            base_url,
            model,
            api_key,
            http,
        })
    }

    /// Asks for tuning advice on a query, with its cost estimate as extra
    /// context when available.
    pub fn suggest(
        &self,
        query: &str,
        cost: Option<&CostEstimate>,
    ) -> Result<String, AdvisorError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: build_prompt(query, cost),
                },
            ],
            max_tokens: Some(800),
            temperature: Some(0.2),
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        debug!(url = %url, model = %self.model, "calling chat completion API");

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .map_err(|e| AdvisorError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AdvisorError::Api(format!("{status}: {body}")));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .map_err(|e| AdvisorError::Parse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AdvisorError::Parse("empty completion".to_string()))
    }
}

/// Renders the user prompt: the query plus whatever planner estimates are
/// available.
fn build_prompt(query: &str, cost: Option<&CostEstimate>) -> String {
    let mut prompt = format!("Query:\n{query}\n");
    if let Some(est) = cost {
        prompt.push_str(&format!("\nTop plan node: {}\n", est.node_type));
        if let Some(relation) = &est.relation {
            prompt.push_str(&format!("Relation: {relation}\n"));
        }
        prompt.push_str(&format!("Total cost: {}\n", est.total_cost));
        if let Some(rows) = est.estimated_rows {
            prompt.push_str(&format!("Estimated rows: {rows}\n"));
        }
        if let Some(volume) = est.estimated_volume_bytes {
            prompt.push_str(&format!("Estimated volume: {}\n", format_bytes(volume)));
        }
        if let Some(work_mem) = est.config.work_mem_bytes {
            prompt.push_str(&format!(
                "work_mem: {}\n",
                format_bytes(work_mem.max(0) as u64)
            ));
        }
    }
    prompt
}

// ============================================================================
// OpenAI API request/response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::ConfigFacts;

    fn estimate() -> CostEstimate {
        CostEstimate {
            node_type: "Seq Scan".to_string(),
            relation: Some("public.orders".to_string()),
            total_cost: 1250.5,
            estimated_time_secs: 1.2505,
            estimated_rows: Some(48_000),
            estimated_row_bytes: Some(96),
            estimated_volume_bytes: Some(48_000 * 96),
            config: ConfigFacts {
                work_mem_bytes: Some(4 * 1024 * 1024),
                seq_page_cost: Some(1.0),
                random_page_cost: Some(1.1),
            },
        }
    }

    #[test]
    fn prompt_includes_query_and_plan_context() {
        let prompt = build_prompt("SELECT * FROM orders", Some(&estimate()));
        assert!(prompt.contains("SELECT * FROM orders"));
        assert!(prompt.contains("Top plan node: Seq Scan"));
        assert!(prompt.contains("Relation: public.orders"));
        assert!(prompt.contains("Estimated rows: 48000"));
        assert!(prompt.contains("work_mem: 4.0 MiB"));
    }

    #[test]
    fn prompt_without_estimate_is_just_the_query() {
        let prompt = build_prompt("SELECT 1", None);
        assert!(prompt.contains("SELECT 1"));
        assert!(!prompt.contains("Top plan node"));
    }

    #[test]
    fn disabled_error_names_the_env_variable() {
        assert!(AdvisorError::Disabled.to_string().contains("PGSAGE_AI_API_KEY"));
    }

    #[test]
    fn request_serializes_in_openai_shape() {
        let request = ChatCompletionRequest {
            model: "deepseek-chat".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            max_tokens: Some(10),
            temperature: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"model\":\"deepseek-chat\""));
        assert!(json.contains("\"role\":\"user\""));
        assert!(json.contains("\"max_tokens\":10"));
        assert!(!json.contains("temperature"));
    }
}
