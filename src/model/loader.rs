use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    error::ServiceError,
    model::{Generation, LoadFailure, ModelStatus},
    sampling::SamplingConfig,
};

/// A loaded tokenizer + causal language model pair.
pub trait StoryModel: Send + Sync {
    /// Encodes `prompt`, samples until `sampling.max_length` tokens or
    /// end-of-sequence, and decodes the whole sequence.
    fn generate(&self, prompt: &str, sampling: &SamplingConfig) -> Result<Generation, ServiceError>;
}

/// Where model artifacts come from.
pub trait ModelSource {
    fn acquire(&self, model_id: &str) -> Result<Arc<dyn StoryModel>, ServiceError>;
}

#[derive(Clone)]
pub struct LoadedModel {
    pub model_id: String,
    pub model: Arc<dyn StoryModel>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}

/// Result of startup model selection. Both variants keep the failed
/// attempts, in attempt order.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Ready {
        loaded: LoadedModel,
        failures: Vec<LoadFailure>,
    },
    Unavailable {
        failures: Vec<LoadFailure>,
    },
}

impl LoadOutcome {
    pub fn loaded(&self) -> Option<&LoadedModel> {
        match self {
            LoadOutcome::Ready { loaded, .. } => Some(loaded),
            LoadOutcome::Unavailable { .. } => None,
        }
    }

    pub fn status(&self) -> ModelStatus {
        match self {
            LoadOutcome::Ready { loaded, failures } => ModelStatus::Ready {
                model_id: loaded.model_id.clone(),
                failures: failures.clone(),
            },
            LoadOutcome::Unavailable { failures } => ModelStatus::Unavailable {
                failures: failures.clone(),
            },
        }
    }

    pub fn failures(&self) -> &[LoadFailure] {
        match self {
            LoadOutcome::Ready { failures, .. } | LoadOutcome::Unavailable { failures } => failures,
        }
    }
}

/// Tries each candidate in order and keeps the first that loads.
pub fn load_first_available(candidates: &[String], source: &dyn ModelSource) -> LoadOutcome {
    let mut failures = Vec::new();

    for model_id in candidates {
        match source.acquire(model_id) {
            Ok(model) => {
                info!(model = %model_id, "loaded model");
                return LoadOutcome::Ready {
                    loaded: LoadedModel {
                        model_id: model_id.clone(),
                        model,
                    },
                    failures,
                };
            }
            Err(err) => {
                warn!(model = %model_id, error = %err, "failed to load model");
                failures.push(LoadFailure {
                    model_id: model_id.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    LoadOutcome::Unavailable { failures }
}

/// Directory name for a hub-style model id, e.g. `EleutherAI--gpt-neo-1.3B`.
pub fn artifact_slug(model_id: &str) -> String {
    model_id.replace('/', "--")
}
