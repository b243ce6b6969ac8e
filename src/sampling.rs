use std::ops::RangeInclusive;

use rand::{
    Rng,
    distributions::{Distribution, WeightedIndex},
};
use serde::Serialize;

use crate::error::ServiceError;

pub const MAX_LENGTH_RANGE: RangeInclusive<usize> = 50..=300;
pub const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.1..=2.0;
pub const TOP_P_RANGE: RangeInclusive<f32> = 0.5..=1.0;
/// Candidates kept before the nucleus cut, as stock causal-LM sampling does.
pub const DEFAULT_TOP_K: usize = 50;

/// Per-request decoding parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingConfig {
    /// Total sequence length in tokens, prompt included.
    pub max_length: usize,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_length: 150,
            temperature: 0.9,
            top_p: 0.95,
        }
    }
}

impl SamplingConfig {
    /// Fills omitted fields from `defaults`.
    pub fn with_overrides(
        defaults: &SamplingConfig,
        max_length: Option<usize>,
        temperature: Option<f32>,
        top_p: Option<f32>,
    ) -> Self {
        Self {
            max_length: max_length.unwrap_or(defaults.max_length),
            temperature: temperature.unwrap_or(defaults.temperature),
            top_p: top_p.unwrap_or(defaults.top_p),
        }
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if !MAX_LENGTH_RANGE.contains(&self.max_length) {
            return Err(ServiceError::BadRequest(format!(
                "max_length must be within {}..={}, got {}",
                MAX_LENGTH_RANGE.start(),
                MAX_LENGTH_RANGE.end(),
                self.max_length
            )));
        }
        check_float("temperature", self.temperature, &TEMPERATURE_RANGE)?;
        check_float("top_p", self.top_p, &TOP_P_RANGE)?;
        Ok(())
    }
}

fn check_float(name: &str, value: f32, range: &RangeInclusive<f32>) -> Result<(), ServiceError> {
    // NaN fails `contains`, infinities fall outside the range.
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ServiceError::BadRequest(format!(
            "{name} must be within {}..={}, got {value}",
            range.start(),
            range.end()
        )))
    }
}

/// Slider bounds and defaults, as advertised to the page.
#[derive(Debug, Clone, Serialize)]
pub struct SamplingBounds {
    pub max_length: Bound<usize>,
    pub temperature: Bound<f32>,
    pub top_p: Bound<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Bound<T> {
    pub min: T,
    pub max: T,
    pub step: T,
    pub default: T,
}

impl SamplingBounds {
    pub fn new(defaults: &SamplingConfig) -> Self {
        Self {
            max_length: Bound {
                min: *MAX_LENGTH_RANGE.start(),
                max: *MAX_LENGTH_RANGE.end(),
                step: 10,
                default: defaults.max_length,
            },
            temperature: Bound {
                min: *TEMPERATURE_RANGE.start(),
                max: *TEMPERATURE_RANGE.end(),
                step: 0.1,
                default: defaults.temperature,
            },
            top_p: Bound {
                min: *TOP_P_RANGE.start(),
                max: *TOP_P_RANGE.end(),
                step: 0.05,
                default: defaults.top_p,
            },
        }
    }
}

/// Temperature scaling, then top-k, then top-p filtering.
#[derive(Debug, Clone, Copy)]
pub struct NucleusSampler {
    temperature: f32,
    top_k: Option<usize>,
    top_p: f32,
}

impl NucleusSampler {
    pub fn new(config: &SamplingConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_k: Some(DEFAULT_TOP_K),
            top_p: config.top_p,
        }
    }

    /// `None` or `Some(0)` disables the top-k step.
    pub fn with_top_k(mut self, top_k: Option<usize>) -> Self {
        self.top_k = top_k;
        self
    }

    /// Probability distribution over the vocabulary after temperature, top-k
    /// and nucleus filtering. Filtered tokens get zero mass.
    pub fn distribution(&self, logits: &[f32]) -> Result<Vec<f32>, ServiceError> {
        if logits.is_empty() {
            return Err(ServiceError::Inference("model produced empty logits".into()));
        }
        if self.temperature <= 0.0 {
            return Err(ServiceError::BadRequest("temperature must be > 0".into()));
        }

        let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if !max_logit.is_finite() {
            return Err(ServiceError::Inference("model produced non-finite logits".into()));
        }

        let mut scaled: Vec<f32> = logits
            .iter()
            .map(|&l| (l - max_logit) / self.temperature)
            .collect();
        if let Some(k) = self.top_k {
            apply_top_k(&mut scaled, k);
        }

        let exps: Vec<f32> = scaled.iter().map(|s| s.exp()).collect();
        let sum: f32 = exps.iter().sum();
        let probs: Vec<f32> = exps.iter().map(|e| e / sum).collect();

        let mut order: Vec<usize> = (0..probs.len()).collect();
        order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

        let mut filtered = vec![0.0; probs.len()];
        let mut mass = 0.0;
        for idx in order {
            filtered[idx] = probs[idx];
            mass += probs[idx];
            if mass >= self.top_p {
                break;
            }
        }

        for p in &mut filtered {
            *p /= mass;
        }
        Ok(filtered)
    }

    pub fn sample<R: Rng + ?Sized>(&self, logits: &[f32], rng: &mut R) -> Result<usize, ServiceError> {
        let probs = self.distribution(logits)?;
        let dist = WeightedIndex::new(&probs)
            .map_err(|e| ServiceError::Inference(format!("invalid token distribution: {e}")))?;
        Ok(dist.sample(rng))
    }
}

/// Masks every logit below the k-th largest; ties at the threshold survive.
fn apply_top_k(logits: &mut [f32], k: usize) {
    if k == 0 || k >= logits.len() {
        return;
    }

    let mut sorted = logits.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let threshold = sorted[k - 1];
    for logit in logits.iter_mut() {
        if *logit < threshold {
            *logit = f32::NEG_INFINITY;
        }
    }
}

/// Extends `ids` one sampled token at a time until it holds `max_length`
/// tokens or `eos` has been emitted. A prompt already at or past the limit
/// is left untouched. Returns how many tokens were appended.
pub fn sample_until<R, F>(
    ids: &mut Vec<i64>,
    max_length: usize,
    eos: Option<i64>,
    sampler: &NucleusSampler,
    rng: &mut R,
    mut next_logits: F,
) -> Result<usize, ServiceError>
where
    R: Rng + ?Sized,
    F: FnMut(&[i64]) -> Result<Vec<f32>, ServiceError>,
{
    let start = ids.len();

    while ids.len() < max_length {
        let logits = next_logits(ids)?;
        let next_token = sampler.sample(&logits, rng)? as i64;
        ids.push(next_token);

        if Some(next_token) == eos {
            break;
        }
    }

    Ok(ids.len() - start)
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn config(temperature: f32, top_p: f32) -> SamplingConfig {
        SamplingConfig {
            max_length: 150,
            temperature,
            top_p,
        }
    }

    #[test]
    fn defaults_are_within_bounds() {
        assert!(SamplingConfig::default().validate().is_ok());
    }

    #[test]
    fn bounds_are_inclusive() {
        let low = SamplingConfig {
            max_length: 50,
            temperature: 0.1,
            top_p: 0.5,
        };
        let high = SamplingConfig {
            max_length: 300,
            temperature: 2.0,
            top_p: 1.0,
        };
        assert!(low.validate().is_ok());
        assert!(high.validate().is_ok());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let cases = [
            SamplingConfig { max_length: 49, ..SamplingConfig::default() },
            SamplingConfig { max_length: 301, ..SamplingConfig::default() },
            SamplingConfig { temperature: 0.0, ..SamplingConfig::default() },
            SamplingConfig { temperature: 2.5, ..SamplingConfig::default() },
            SamplingConfig { temperature: f32::NAN, ..SamplingConfig::default() },
            SamplingConfig { top_p: 0.4, ..SamplingConfig::default() },
            SamplingConfig { top_p: f32::INFINITY, ..SamplingConfig::default() },
        ];
        for case in cases {
            assert!(
                matches!(case.validate(), Err(ServiceError::BadRequest(_))),
                "{case:?} should be rejected"
            );
        }
    }

    #[test]
    fn overrides_fill_only_missing_fields() {
        let defaults = SamplingConfig::default();
        let merged = SamplingConfig::with_overrides(&defaults, Some(200), None, Some(0.8));
        assert_eq!(merged.max_length, 200);
        assert_eq!(merged.temperature, defaults.temperature);
        assert_eq!(merged.top_p, 0.8);
    }

    #[test]
    fn distribution_sums_to_one() {
        let sampler = NucleusSampler::new(&config(0.9, 0.95));
        let probs = sampler.distribution(&[1.0, 2.0, 0.5, -3.0, 4.0]).unwrap();
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5, "sum = {sum}");
    }

    #[test]
    fn nucleus_keeps_smallest_covering_set() {
        // softmax(ln p) == p, so these logits give probabilities 0.5, 0.3, 0.15, 0.05.
        let logits: Vec<f32> = [0.5f32, 0.3, 0.15, 0.05].iter().map(|p| p.ln()).collect();
        let sampler = NucleusSampler::new(&config(1.0, 0.75));
        let probs = sampler.distribution(&logits).unwrap();

        assert!(probs[0] > 0.0);
        assert!(probs[1] > 0.0);
        assert_eq!(probs[2], 0.0);
        assert_eq!(probs[3], 0.0);
        assert!((probs[0] - 0.625).abs() < 1e-5);
    }

    #[test]
    fn nucleus_always_keeps_top_token() {
        let sampler = NucleusSampler::new(&config(1.0, 0.5));
        let probs = sampler.distribution(&[10.0, 0.0, 0.0]).unwrap();
        assert!((probs[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn top_p_of_one_keeps_every_token() {
        let sampler = NucleusSampler::new(&config(1.0, 1.0));
        let probs = sampler.distribution(&[1.0, 1.0, 1.0, 1.0]).unwrap();
        assert!(probs.iter().all(|&p| p > 0.0));
    }

    #[test]
    fn higher_temperature_flattens_distribution() {
        let logits = [3.0, 1.0, 0.0];
        let cold = NucleusSampler::new(&config(0.5, 1.0)).distribution(&logits).unwrap();
        let hot = NucleusSampler::new(&config(2.0, 1.0)).distribution(&logits).unwrap();
        assert!(cold[0] > hot[0]);
        assert!(cold[2] < hot[2]);
    }

    #[test]
    fn samples_never_leave_nucleus() {
        let logits: Vec<f32> = [0.6f32, 0.3, 0.07, 0.03].iter().map(|p| p.ln()).collect();
        let sampler = NucleusSampler::new(&config(1.0, 0.85));
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let token = sampler.sample(&logits, &mut rng).unwrap();
            assert!(token < 2, "sampled token {token} outside nucleus");
        }
    }

    #[test]
    fn empty_or_non_finite_logits_fail() {
        let sampler = NucleusSampler::new(&SamplingConfig::default());
        let mut rng = StdRng::seed_from_u64(1);
        assert!(sampler.sample(&[], &mut rng).is_err());
        assert!(sampler.sample(&[f32::NAN, f32::NAN], &mut rng).is_err());
    }

    #[test]
    fn top_k_limits_candidates_before_nucleus() {
        // 60 near-uniform tokens: top-p 1.0 alone would keep them all.
        let logits: Vec<f32> = (0..60).map(|i| i as f32 * 1e-3).collect();
        let probs = NucleusSampler::new(&config(1.0, 1.0)).distribution(&logits).unwrap();

        let kept = probs.iter().filter(|&&p| p > 0.0).count();
        assert_eq!(kept, DEFAULT_TOP_K);
        assert!(probs[..10].iter().all(|&p| p == 0.0), "lowest logits must be masked");
        assert!(probs[59] > 0.0);
    }

    #[test]
    fn top_k_can_be_disabled() {
        let logits: Vec<f32> = (0..60).map(|i| i as f32 * 1e-3).collect();
        let probs = NucleusSampler::new(&config(1.0, 1.0))
            .with_top_k(None)
            .distribution(&logits)
            .unwrap();
        assert!(probs.iter().all(|&p| p > 0.0));
    }

    const VOCAB: usize = 10;
    const EOS: i64 = 9;

    /// Logits that make `token` the only member of the nucleus.
    fn peaked(token: i64) -> Vec<f32> {
        let mut logits = vec![0.0; VOCAB];
        logits[token as usize] = 100.0;
        logits
    }

    /// Emits `script[n]` as the n-th generated token after the prompt.
    fn scripted(prompt_len: usize, script: &'static [i64]) -> impl FnMut(&[i64]) -> Result<Vec<f32>, ServiceError> {
        move |ids: &[i64]| Ok(peaked(script[ids.len() - prompt_len]))
    }

    #[test]
    fn decoding_stops_after_eos() {
        let sampler = NucleusSampler::new(&SamplingConfig::default());
        let mut rng = StdRng::seed_from_u64(3);
        let mut ids = vec![1, 2];

        let generated = sample_until(
            &mut ids,
            10,
            Some(EOS),
            &sampler,
            &mut rng,
            scripted(2, &[5, 6, EOS, 7, 7, 7, 7, 7]),
        )
        .unwrap();

        assert_eq!(ids, vec![1, 2, 5, 6, EOS]);
        assert_eq!(generated, 3);
    }

    #[test]
    fn decoding_fills_up_to_max_length_including_prompt() {
        let sampler = NucleusSampler::new(&SamplingConfig::default());
        let mut rng = StdRng::seed_from_u64(3);
        let mut ids = vec![1, 2];
        let mut calls = 0;
        let mut next = scripted(2, &[3, 4, 5, 6, 7, 8]);

        let generated = sample_until(&mut ids, 6, Some(EOS), &sampler, &mut rng, |ids: &[i64]| {
            calls += 1;
            next(ids)
        })
        .unwrap();

        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(generated, 4);
        assert_eq!(calls, 4);
    }

    #[test]
    fn decoding_without_eos_runs_to_limit() {
        let sampler = NucleusSampler::new(&SamplingConfig::default());
        let mut rng = StdRng::seed_from_u64(3);
        let mut ids = vec![1];

        let generated =
            sample_until(&mut ids, 4, None, &sampler, &mut rng, scripted(1, &[EOS, EOS, EOS])).unwrap();

        assert_eq!(ids, vec![1, EOS, EOS, EOS]);
        assert_eq!(generated, 3);
    }

    #[test]
    fn prompt_at_or_past_limit_is_returned_unchanged() {
        let sampler = NucleusSampler::new(&SamplingConfig::default());
        let mut rng = StdRng::seed_from_u64(3);

        for prompt in [vec![1, 2, 3, 4, 5], vec![1, 2, 3, 4, 5, 6, 7, 8]] {
            let mut ids = prompt.clone();
            let generated = sample_until(&mut ids, 5, Some(EOS), &sampler, &mut rng, |_: &[i64]| {
                panic!("model must not run when the prompt fills max_length")
            })
            .unwrap();

            assert_eq!(ids, prompt);
            assert_eq!(generated, 0);
        }
    }

    #[test]
    fn model_errors_abort_decoding() {
        let sampler = NucleusSampler::new(&SamplingConfig::default());
        let mut rng = StdRng::seed_from_u64(3);
        let mut ids = vec![1, 2];

        let err = sample_until(&mut ids, 10, Some(EOS), &sampler, &mut rng, |_: &[i64]| {
            Err(ServiceError::Inference("forward failed".into()))
        })
        .unwrap_err();

        assert!(matches!(err, ServiceError::Inference(_)));
        assert_eq!(ids, vec![1, 2]);
    }
}
