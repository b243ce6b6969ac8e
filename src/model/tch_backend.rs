use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use tch::{Device, IValue, Kind, Tensor, no_grad};
use tokenizers::Tokenizer;
use tracing::debug;

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{
        Generation,
        loader::{ModelSource, StoryModel, artifact_slug},
    },
    sampling::{NucleusSampler, SamplingConfig, sample_until},
};

/// Loads TorchScript-traced causal LMs from `<model_dir>/<slug>/`.
pub struct TorchSource {
    model_dir: PathBuf,
    device: Device,
    eos_token: String,
}

impl TorchSource {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            model_dir: config.model_dir.clone(),
            device: config.device,
            eos_token: config.eos_token.clone(),
        }
    }
}

impl ModelSource for TorchSource {
    fn acquire(&self, model_id: &str) -> Result<Arc<dyn StoryModel>, ServiceError> {
        let artifact_dir = self.model_dir.join(artifact_slug(model_id));
        let module_path = artifact_dir.join("model.ts");
        // Weights are local only; skip the hub round-trip when they are absent.
        ensure_module_exists(&module_path)?;

        let tokenizer = load_tokenizer(&artifact_dir, model_id)?;
        let model = TorchModel::new(tokenizer, &module_path, self.device, &self.eos_token)?;
        Ok(Arc::new(model))
    }
}

fn ensure_module_exists(module_path: &Path) -> Result<(), ServiceError> {
    if module_path.exists() {
        Ok(())
    } else {
        Err(ServiceError::ModelLoad(format!(
            "model artifact missing: {}",
            module_path.display()
        )))
    }
}

/// Local `tokenizer.json` first, then the Hugging Face hub.
fn load_tokenizer(artifact_dir: &Path, model_id: &str) -> Result<Tokenizer, ServiceError> {
    let local = artifact_dir.join("tokenizer.json");
    if local.exists() {
        return Tokenizer::from_file(&local).map_err(|e| ServiceError::Tokenizer(e.to_string()));
    }
    debug!(model = %model_id, "no local tokenizer, fetching from hub");
    Tokenizer::from_pretrained(model_id, None).map_err(|e| ServiceError::Tokenizer(e.to_string()))
}

pub struct TorchModel {
    tokenizer: Tokenizer,
    eos_token_id: Option<u32>,
    device: Device,
    module: Mutex<tch::CModule>,
}

impl TorchModel {
    pub fn new(
        tokenizer: Tokenizer,
        module_path: &Path,
        device: Device,
        eos_token: &str,
    ) -> Result<Self, ServiceError> {
        ensure_module_exists(module_path)?;
        let mut module = tch::CModule::load_on_device(module_path, device)
            .map_err(|e| ServiceError::ModelLoad(e.to_string()))?;
        module.set_eval();

        let eos_token_id = tokenizer.token_to_id(eos_token);
        if eos_token_id.is_none() {
            debug!(%eos_token, "tokenizer has no end-of-sequence token");
        }

        Ok(Self {
            tokenizer,
            eos_token_id,
            device,
            module: Mutex::new(module),
        })
    }

    fn next_token_logits(&self, module: &tch::CModule, input_ids: &[i64]) -> Result<Vec<f32>, ServiceError> {
        let input_tensor = Tensor::from_slice(input_ids)
            .reshape([1, input_ids.len() as i64])
            .to(self.device);

        // Traced causal LMs return either bare logits or (logits, past_key_values).
        let output = module
            .forward_is(&[IValue::Tensor(input_tensor)])
            .map_err(|e| ServiceError::Inference(e.to_string()))?;
        let logits = match output {
            IValue::Tensor(t) => t,
            IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
                IValue::Tensor(t) => t.shallow_clone(),
                _ => {
                    return Err(ServiceError::Inference(
                        "expected tensor as first tuple element".into(),
                    ));
                }
            },
            _ => return Err(ServiceError::Inference("unexpected model output format".into())),
        };

        // [1, seq_len, vocab] -> [vocab]
        let last = logits
            .select(1, -1)
            .squeeze()
            .to_kind(Kind::Float)
            .to(Device::Cpu);
        Vec::<f32>::try_from(&last).map_err(|e| ServiceError::Inference(e.to_string()))
    }
}

impl StoryModel for TorchModel {
    fn generate(&self, prompt: &str, sampling: &SamplingConfig) -> Result<Generation, ServiceError> {
        let encoding = self
            .tokenizer
            .encode(prompt, false)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        let mut input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        if input_ids.is_empty() {
            return Err(ServiceError::BadRequest("prompt encodes to no tokens".into()));
        }
        let prompt_tokens = input_ids.len();

        let sampler = NucleusSampler::new(sampling);
        let eos = self.eos_token_id.map(i64::from);

        let generated_tokens = no_grad(|| {
            let module = self.module.lock();
            let mut rng = rand::thread_rng();
            sample_until(
                &mut input_ids,
                sampling.max_length,
                eos,
                &sampler,
                &mut rng,
                |ids| self.next_token_logits(&module, ids),
            )
        })?;

        let ids: Vec<u32> = input_ids.iter().map(|&id| id as u32).collect();
        let text = self
            .tokenizer
            .decode(&ids, true)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;

        Ok(Generation {
            text,
            prompt_tokens,
            generated_tokens,
        })
    }
}
