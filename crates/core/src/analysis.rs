use serde::{Deserialize, Serialize};

/// Structured feedback on a finished role-play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub key_moments: Vec<String>,
    pub improvement_suggestions: Vec<String>,
    pub role_specific_feedback: String,
}

impl AnalysisResult {
    /// Parses the analysis model's raw output. All five keys are required;
    /// any other key is ignored.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw.trim())
    }
}
