use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoryRequest {
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub prompt: String,
    pub max_length: Option<usize>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoryResponse {
    pub genre: &'static str,
    /// Genre prefix plus the trimmed custom prompt.
    pub prompt: String,
    pub story: String,
    pub model: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub total_time_ms: u128,
}

/// Raw output of one decoding run.
#[derive(Debug, Clone)]
pub struct Generation {
    /// Decoded sequence, prompt included, special tokens stripped.
    pub text: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadFailure {
    pub model_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    Ready {
        model_id: String,
        failures: Vec<LoadFailure>,
    },
    Unavailable { failures: Vec<LoadFailure> },
}
