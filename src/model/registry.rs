use std::time::Instant;

use tokio::task;

use crate::{
    config::AppConfig,
    error::ServiceError,
    genre::{Genre, assemble_prompt},
    model::{ModelStatus, StoryRequest, StoryResponse, loader::LoadOutcome},
    sampling::SamplingConfig,
};

/// Holds the model chosen at startup and runs story generation against it.
pub struct ModelRegistry {
    outcome: LoadOutcome,
    defaults: SamplingConfig,
}

impl ModelRegistry {
    /// Runs the candidate fallback once. Never fails: exhaustion leaves the
    /// registry in the unavailable state.
    pub fn initialize(config: &AppConfig) -> Self {
        let outcome = load_with_backend(config);
        Self::from_outcome(outcome, config.sampling)
    }

    pub fn from_outcome(outcome: LoadOutcome, defaults: SamplingConfig) -> Self {
        Self { outcome, defaults }
    }

    pub fn status(&self) -> ModelStatus {
        self.outcome.status()
    }

    pub fn is_ready(&self) -> bool {
        self.outcome.loaded().is_some()
    }

    pub fn defaults(&self) -> &SamplingConfig {
        &self.defaults
    }

    pub async fn generate_story(&self, request: StoryRequest) -> Result<StoryResponse, ServiceError> {
        let genre = Genre::from_label(&request.genre);
        let prompt = assemble_prompt(genre, &request.prompt);
        let sampling = SamplingConfig::with_overrides(
            &self.defaults,
            request.max_length,
            request.temperature,
            request.top_p,
        );
        sampling.validate()?;

        let loaded = self.outcome.loaded().ok_or(ServiceError::ModelUnavailable)?;
        let model = loaded.model.clone();
        let model_id = loaded.model_id.clone();

        let start = Instant::now();
        let task_prompt = prompt.clone();
        let generation = task::spawn_blocking(move || model.generate(&task_prompt, &sampling))
            .await
            .map_err(|err| ServiceError::Inference(format!("inference task failed: {err}")))??;
        let elapsed = start.elapsed();

        tracing::info!(
            model = %model_id,
            genre = genre.label(),
            generated = generation.generated_tokens,
            elapsed_ms = elapsed.as_millis() as u64,
            "story generated"
        );

        Ok(StoryResponse {
            genre: genre.label(),
            prompt,
            story: generation.text,
            model: model_id,
            prompt_tokens: generation.prompt_tokens,
            generated_tokens: generation.generated_tokens,
            total_time_ms: elapsed.as_millis(),
        })
    }
}

#[cfg(feature = "tch-backend")]
fn load_with_backend(config: &AppConfig) -> LoadOutcome {
    let source = crate::model::tch_backend::TorchSource::new(config);
    crate::model::loader::load_first_available(&config.model_candidates, &source)
}

#[cfg(not(feature = "tch-backend"))]
fn load_with_backend(config: &AppConfig) -> LoadOutcome {
    use crate::model::LoadFailure;

    tracing::warn!("built without an inference backend, no model can be loaded");
    LoadOutcome::Unavailable {
        failures: config
            .model_candidates
            .iter()
            .map(|model_id| LoadFailure {
                model_id: model_id.clone(),
                error: "built without the tch-backend feature".to_string(),
            })
            .collect(),
    }
}
