//! Text generation utilities

use crate::config::{DEFAULT_MAX_LENGTH, DEFAULT_TEMPERATURE, DEFAULT_TOP_K, DEFAULT_TOP_P};
use crate::device::Device;
use crate::error::{StoneError, StoneResult};
use crate::model::{LayerCache, GPT2};
use crate::tokenizer::GPTTokenizer;
use anyhow::Result;
use log::{debug, warn};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Configuration for text generation
#[derive(Clone, Debug)]
pub struct GenerationConfig {
    /// Upper bound on prompt + generated tokens.
    pub max_length: usize,
    pub temperature: f32,
    pub top_k: Option<usize>,
    pub top_p: Option<f32>,
    pub repetition_penalty: f32,
    pub sampling_strategy: SamplingStrategy,
    pub eos_token_id: Option<u32>,
    pub pad_token_id: Option<u32>,
    /// Fixed RNG seed; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            temperature: DEFAULT_TEMPERATURE,
            top_k: Some(DEFAULT_TOP_K),
            top_p: Some(DEFAULT_TOP_P),
            repetition_penalty: 1.0,
            sampling_strategy: SamplingStrategy::TopKTopP,
            eos_token_id: Some(50256), // default GPT-2 EOS
            pad_token_id: Some(50256),
            seed: None,
        }
    }
}

impl GenerationConfig {
    /// Serving configuration with special tokens taken from `tokenizer`.
    pub fn for_tokenizer(tokenizer: &GPTTokenizer, max_length: usize) -> Self {
        Self {
            max_length,
            eos_token_id: Some(tokenizer.eos_token_id()),
            pad_token_id: Some(tokenizer.pad_token_id()),
            ..Default::default()
        }
    }
}

/// Sampling strategies for generation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SamplingStrategy {
    Greedy,
    TopK,
    TopP,
    TopKTopP,
    Temperature,
}

/// Generate a continuation of `prompt` with the serving sampling settings.
pub fn generate_text(
    model: &GPT2,
    tokenizer: &GPTTokenizer,
    prompt: &str,
    max_length: usize,
    device: Device,
) -> StoneResult<String> {
    let config = GenerationConfig::for_tokenizer(tokenizer, max_length);
    generate_text_with(model, tokenizer, prompt, &config, device)
}

pub fn generate_text_with(
    model: &GPT2,
    tokenizer: &GPTTokenizer,
    prompt: &str,
    config: &GenerationConfig,
    device: Device,
) -> StoneResult<String> {
    let ids = generate_tokens(model, tokenizer, prompt, config, device)?;
    tokenizer.decode(&ids, true)
}

/// Generate autoregressively and return the full token sequence, prompt included.
///
/// The result holds at most `max_length` tokens (clamped to the context window)
/// only when the prompt is shorter than that. A prompt of `max_length` tokens or
/// more is returned unchanged, so the result can be longer than `max_length`.
pub fn generate_tokens(
    model: &GPT2,
    tokenizer: &GPTTokenizer,
    prompt: &str,
    config: &GenerationConfig,
    device: Device,
) -> StoneResult<Vec<u32>> {
    model.ensure_device(device)?;

    let mut input_ids = tokenizer.encode(prompt)?;
    if input_ids.is_empty() {
        // GPT-2 uses end-of-text as its beginning-of-text marker.
        input_ids.push(tokenizer.eos_token_id());
    }

    let n_ctx = model.config().n_ctx;
    if input_ids.len() > n_ctx {
        return Err(StoneError::PromptTooLong {
            tokens: input_ids.len(),
            context: n_ctx,
        });
    }
    let max_length = if config.max_length > n_ctx {
        warn!(
            "max_length {} exceeds context window, clamping to {}",
            config.max_length, n_ctx
        );
        n_ctx
    } else {
        config.max_length
    };

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    debug!(
        "Generating from {} prompt tokens up to {} total",
        input_ids.len(),
        max_length
    );

    let prompt_len = input_ids.len();
    let mut past: Option<Vec<LayerCache>> = None;

    while input_ids.len() < max_length {
        // After the first pass only the newest token is fed; the rest lives in the cache.
        let start = if past.is_some() { input_ids.len() - 1 } else { 0 };
        let step_ids =
            Array2::from_shape_vec((1, input_ids.len() - start), input_ids[start..].to_vec())
                .map_err(anyhow::Error::from)?;
        let attention_mask = Array2::<f32>::ones((1, input_ids.len()));

        let (logits, presents) =
            model.next_token_logits(&step_ids, &attention_mask, past.as_deref())?;
        past = Some(presents);

        let logits = apply_repetition_penalty(logits, &input_ids, config.repetition_penalty);
        let next_token = sample_token(logits, config, &mut rng)?;
        input_ids.push(next_token);

        if config.eos_token_id == Some(next_token) {
            break;
        }
    }

    debug!("Generated {} new tokens", input_ids.len() - prompt_len);
    Ok(input_ids)
}

pub fn apply_repetition_penalty(
    mut logits: Array1<f32>,
    generated_ids: &[u32],
    penalty: f32,
) -> Array1<f32> {
    if penalty == 1.0 {
        return logits;
    }
    for &id in generated_ids {
        let idx = id as usize;
        if idx >= logits.len() {
            continue;
        }
        if logits[idx] < 0.0 {
            logits[idx] *= penalty;
        } else {
            logits[idx] /= penalty;
        }
    }
    logits
}

/// Sample a token from logits
///
/// Temperature is applied first, then top-k, then top-p on the renormalised
/// top-k distribution.
pub fn sample_token(
    mut logits: Array1<f32>,
    config: &GenerationConfig,
    rng: &mut impl Rng,
) -> Result<u32> {
    anyhow::ensure!(!logits.is_empty(), "cannot sample from empty logits");

    if config.sampling_strategy == SamplingStrategy::Greedy || config.temperature <= 0.0 {
        return Ok(argmax(&logits));
    }

    logits /= config.temperature;

    let use_top_k = matches!(
        config.sampling_strategy,
        SamplingStrategy::TopK | SamplingStrategy::TopKTopP
    );
    let use_top_p = matches!(
        config.sampling_strategy,
        SamplingStrategy::TopP | SamplingStrategy::TopKTopP
    );

    if use_top_k {
        if let Some(k) = config.top_k {
            logits = top_k_filtering(logits, k);
        }
    }
    if use_top_p {
        if let Some(p) = config.top_p {
            logits = top_p_filtering(logits, p);
        }
    }

    let probs = softmax_1d(&logits);
    sample_from_probs(&probs, rng)
}

fn argmax(logits: &Array1<f32>) -> u32 {
    logits
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(idx, _)| idx as u32)
        .unwrap_or(0)
}

/// Apply softmax to 1D array
pub fn softmax_1d(logits: &Array1<f32>) -> Array1<f32> {
    let max_val = logits.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    let exp_logits = (logits - max_val).mapv(f32::exp);
    let sum_exp = exp_logits.sum();
    exp_logits / sum_exp
}

/// Descending order of logits.
fn sorted_indices(logits: &Array1<f32>) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..logits.len()).collect();
    indices.sort_by(|&a, &b| logits[b].total_cmp(&logits[a]));
    indices
}

/// Top-k filtering: everything below the k-th largest logit becomes -inf.
/// Ties with the k-th value survive.
pub fn top_k_filtering(mut logits: Array1<f32>, k: usize) -> Array1<f32> {
    if k == 0 || k >= logits.len() {
        return logits;
    }
    let indices = sorted_indices(&logits);
    let threshold = logits[indices[k - 1]];
    logits.mapv_inplace(|x| if x < threshold { f32::NEG_INFINITY } else { x });
    logits
}

/// Top-p (nucleus) filtering: keep the smallest high-probability prefix whose
/// cumulative mass reaches `p`; at least one token always survives.
pub fn top_p_filtering(mut logits: Array1<f32>, p: f32) -> Array1<f32> {
    if p >= 1.0 {
        return logits;
    }
    let indices = sorted_indices(&logits);
    let probs = softmax_1d(&logits);

    let mut cumulative = 0.0;
    let mut cutoff_idx = indices.len();
    for (i, &idx) in indices.iter().enumerate() {
        cumulative += probs[idx];
        if cumulative >= p {
            cutoff_idx = i + 1;
            break;
        }
    }

    for &idx in &indices[cutoff_idx..] {
        logits[idx] = f32::NEG_INFINITY;
    }
    logits
}

/// Sample from probability distribution
fn sample_from_probs(probs: &Array1<f32>, rng: &mut impl Rng) -> Result<u32> {
    let uniform: f32 = rng.gen();
    let mut cumulative = 0.0;
    let mut last_candidate = None;

    for (idx, &prob) in probs.iter().enumerate() {
        if prob <= 0.0 || prob.is_nan() {
            continue;
        }
        cumulative += prob;
        last_candidate = Some(idx as u32);
        if cumulative >= uniform {
            return Ok(idx as u32);
        }
    }

    // Rounding can leave the total just under `uniform`.
    last_candidate.ok_or_else(|| anyhow::anyhow!("probability distribution has no mass"))
}
