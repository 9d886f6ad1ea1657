use crate::generator::{AnalysisRequester, TurnGenerator};
use crate::turn::{Speaker, Turn};
use anyhow::Result;
use async_trait::async_trait;

/// An offline stand-in for the language model.
///
/// It makes no network calls and answers with short, deterministic text, so the
/// server and its transport can be exercised without an API key.
pub struct SimulatedClient;

#[async_trait]
impl TurnGenerator for SimulatedClient {
    async fn generate(&self, messages: &[Turn], _stop: &[String]) -> Result<String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|turn| turn.speaker == Speaker::User)
            .map(|turn| turn.text.as_str())
            .unwrap_or_default();

        Ok(format!(
            "That's a fair point. You said: \"{last_user}\". Could you tell me more?"
        ))
    }
}

#[async_trait]
impl AnalysisRequester for SimulatedClient {
    async fn request_analysis(&self, messages: &[Turn]) -> Result<String> {
        let exchanges = messages
            .iter()
            .filter(|turn| turn.speaker == Speaker::User)
            .count();

        let feedback = serde_json::json!({
            "strengths": ["Kept the conversation moving"],
            "weaknesses": ["Few concrete details were offered"],
            "key_moments": [format!("{exchanges} user turn(s) were exchanged")],
            "improvement_suggestions": ["Ask an open question after each answer"],
            "role_specific_feedback": "Stay focused on the needs of your conversation partner.",
        });
        Ok(feedback.to_string())
    }
}
