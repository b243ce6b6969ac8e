use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    ops::RangeInclusive,
    path::PathBuf,
};

#[cfg(feature = "tch-backend")]
use tch::Device;

use crate::sampling::{MAX_LENGTH_RANGE, SamplingConfig, TEMPERATURE_RANGE, TOP_P_RANGE};

pub const DEFAULT_MODEL_CANDIDATES: [&str; 3] = ["gpt2-large", "EleutherAI/gpt-neo-1.3B", "gpt2"];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    /// Tried in order; the first that loads wins.
    pub model_candidates: Vec<String>,
    pub model_dir: PathBuf,
    pub eos_token: String,
    /// Used for fields a request leaves out.
    pub sampling: SamplingConfig,
    #[cfg(feature = "tch-backend")]
    pub device: Device,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 7860),
            model_candidates: DEFAULT_MODEL_CANDIDATES
                .iter()
                .map(|id| id.to_string())
                .collect(),
            model_dir: PathBuf::from("models"),
            eos_token: "<|endoftext|>".to_string(),
            sampling: SamplingConfig::default(),
            #[cfg(feature = "tch-backend")]
            device: Device::Cpu,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let listen_addr = env::var("SERVER_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.listen_addr);

        let model_candidates = env::var("MODEL_CANDIDATES")
            .ok()
            .map(|raw| parse_candidates(&raw))
            .filter(|list| !list.is_empty())
            .unwrap_or(defaults.model_candidates);

        let model_dir = env::var("MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.model_dir);
        let eos_token = env::var("EOS_TOKEN").unwrap_or(defaults.eos_token);

        let sampling = sampling_defaults(
            &defaults.sampling,
            env_parse("MAX_LENGTH"),
            env_parse("TEMPERATURE"),
            env_parse("TOP_P"),
        );

        #[cfg(feature = "tch-backend")]
        let device = {
            let raw = env::var("DEVICE").unwrap_or_else(|_| "cpu".into());
            parse_device(&raw)
        };

        Ok(Self {
            listen_addr,
            model_candidates,
            model_dir,
            eos_token,
            sampling,
            #[cfg(feature = "tch-backend")]
            device,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Per-field: a value outside its slider range is ignored with a warning.
fn sampling_defaults(
    defaults: &SamplingConfig,
    max_length: Option<usize>,
    temperature: Option<f32>,
    top_p: Option<f32>,
) -> SamplingConfig {
    SamplingConfig {
        max_length: in_range("MAX_LENGTH", max_length, &MAX_LENGTH_RANGE)
            .unwrap_or(defaults.max_length),
        temperature: in_range("TEMPERATURE", temperature, &TEMPERATURE_RANGE)
            .unwrap_or(defaults.temperature),
        top_p: in_range("TOP_P", top_p, &TOP_P_RANGE).unwrap_or(defaults.top_p),
    }
}

fn in_range<T>(key: &str, value: Option<T>, range: &RangeInclusive<T>) -> Option<T>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    let value = value?;
    if range.contains(&value) {
        Some(value)
    } else {
        tracing::warn!(%key, %value, "out of range, using default");
        None
    }
}

/// Comma-separated ids; blank entries are skipped.
pub fn parse_candidates(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(feature = "tch-backend")]
fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower == "cpu" {
        Device::Cpu
    } else if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            tracing::warn!(requested = %raw, "CUDA unavailable, using CPU");
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}
