use crate::turn::Turn;
use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub content: Option<String>,
}

// The session only ever sees these two traits, never a concrete model client. Tests
// swap in the generated `MockTurnGenerator` / `MockAnalysisRequester`, and the server
// can run on `SimulatedClient` when no API key is configured.

/// Produces the next assistant utterance for a conversation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TurnGenerator {
    /// `stop` is a hint to bound the reply; implementations may ignore it.
    async fn generate(&self, messages: &[Turn], stop: &[String]) -> Result<String>;
}

/// Produces structured feedback for a finished conversation, as raw JSON text.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AnalysisRequester {
    async fn request_analysis(&self, messages: &[Turn]) -> Result<String>;
}

pub type SharedTurnGenerator = Arc<dyn TurnGenerator + Send + Sync>;
pub type SharedAnalysisRequester = Arc<dyn AnalysisRequester + Send + Sync>;

/// Chat-completions client used for both role-play turns and analysis.
pub struct OpenAiChatClient {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl OpenAiChatClient {
    pub fn new(api_key: SecretString, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, body: serde_json::Value) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .context("Failed to reach the chat completions endpoint")?
            .error_for_status()
            .context("Chat completions request was rejected")?
            .json::<LlmResponse>()
            .await
            .context("Failed to decode chat completions response")?;

        let answer = resp
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))?;

        Ok(answer)
    }
}

#[async_trait]
impl TurnGenerator for OpenAiChatClient {
    async fn generate(&self, messages: &[Turn], stop: &[String]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.5,
            "max_tokens": 500,
            "stop": stop,
        });

        let answer = self.complete(body).await?;
        Ok(answer.trim().to_string())
    }
}

#[async_trait]
impl AnalysisRequester for OpenAiChatClient {
    async fn request_analysis(&self, messages: &[Turn]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "response_format": { "type": "json_object" },
            "temperature": 0.3,
            "max_tokens": 1000,
        });

        self.complete(body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisResult;
    use crate::catalog::{Role, RoleScenarioCatalog, Scenario};
    use crate::directive::{ANALYSIS_DIRECTIVE, build_directive, stop_sequences};
    use std::env;

    fn live_client() -> OpenAiChatClient {
        dotenvy::dotenv_override().ok();
        let api_key = env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY not set");
        OpenAiChatClient::new(SecretString::from(api_key), "gpt-4o".to_string())
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        let client = OpenAiChatClient::new(SecretString::from("key".to_string()), "m".into())
            .with_base_url("http://localhost:8080/v1/");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }

    #[test]
    fn response_with_null_content_decodes() {
        let resp: LlmResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": null}}]}"#).unwrap();
        assert!(resp.choices[0].message.content.is_none());
    }

    // Makes a live call to the OpenAI API; run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_generate_stays_in_role() {
        let client = live_client();
        let catalog = RoleScenarioCatalog::builtin().unwrap();
        let messages = vec![
            Turn::system(build_directive(
                &catalog,
                Role::SalesSpecialist,
                Role::Customer,
                Scenario::ProductPitch,
            )),
            Turn::user("Hi, thanks for taking the time. Can I tell you about our product?"),
        ];

        let reply = client
            .generate(
                &messages,
                &stop_sequences(Role::SalesSpecialist, Role::Customer),
            )
            .await
            .expect("generate failed");
        println!("Reply: {reply}");
        assert!(!reply.is_empty());
    }

    // Makes a live call to the OpenAI API; run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_request_analysis_matches_schema() {
        let client = live_client();
        let messages = vec![
            Turn::system(ANALYSIS_DIRECTIVE),
            Turn::user("Hi, tell me about your product"),
            Turn::assistant("Sure! Our product cuts reporting time in half."),
            Turn::user("How much does it cost?"),
            Turn::assistant("Plans start at $49 per seat per month."),
        ];

        let raw = client
            .request_analysis(&messages)
            .await
            .expect("request_analysis failed");
        println!("Analysis JSON: {raw}");
        AnalysisResult::parse(&raw).expect("analysis should match the schema");
    }
}
