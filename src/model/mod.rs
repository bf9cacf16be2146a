//! GPT model and loader

pub mod base;
pub mod gpt2;
pub mod layers;

use crate::config::Hyperparameters;
use crate::device::Device;
use crate::error::StoneResult;
use crate::tokenizer::GPTTokenizer;
use crate::weights::ModelWeights;
use log::{debug, info};
use std::path::Path;

pub use base::{GPTBase, LayerCache};
pub use gpt2::GPT2;

/// Build the tokenizer and model from disk with the trained hyperparameters.
///
/// `config_path` is the directory holding `tokenizer.json`.
pub fn load_model(
    model_path: &Path,
    device: Device,
    config_path: &Path,
) -> StoneResult<(GPT2, GPTTokenizer)> {
    load_model_with(model_path, device, config_path, Hyperparameters::default())
}

pub fn load_model_with(
    model_path: &Path,
    device: Device,
    config_path: &Path,
    hyperparameters: Hyperparameters,
) -> StoneResult<(GPT2, GPTTokenizer)> {
    let tokenizer = GPTTokenizer::from_dir(config_path)?;

    // Embedding tables are sized to the tokenizer; pad shares the eos id.
    let config = hyperparameters.into_config(tokenizer.vocab_size(), tokenizer.pad_token_id());
    debug!(
        "Model configuration: {}",
        serde_json::to_string(&config).unwrap_or_default()
    );

    info!("Loading weights from {}", model_path.display());
    let weights = ModelWeights::load(model_path)?;
    debug!("Read {} tensors", weights.len());

    let model = GPT2::from_weights(&weights, config)?
        .to_device(device)
        .eval();

    info!(
        "Loaded model: vocab={} layers={} heads={} width={} on {}",
        model.config().vocab_size,
        model.config().n_layer,
        model.config().n_head,
        model.config().n_embd,
        model.device()
    );
    Ok((model, tokenizer))
}
