//! GPT configuration and serving constants

use serde::{Deserialize, Serialize};

/// Prompt used when the caller does not supply one.
pub const DEFAULT_PROMPT: &str = "Stone is";
/// Upper bound on total sequence length (prompt included) at the HTTP layer.
pub const DEFAULT_MAX_LENGTH: usize = 200;
pub const DEFAULT_TOP_K: usize = 50;
pub const DEFAULT_TOP_P: f32 = 0.95;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Weight file inside the public asset directory.
pub const WEIGHTS_FILE: &str = "best_model.safetensors";
/// Tokenizer file inside the tokenizer asset directory.
pub const TOKENIZER_FILE: &str = "tokenizer.json";
/// GPT-2 end-of-text marker, also used for padding and as beginning-of-text.
pub const EOS_TOKEN: &str = "<|endoftext|>";

/// Architecture hyperparameters that are fixed at training time.
///
/// The vocabulary size is not part of this record: it always comes from the
/// tokenizer the weights were trained with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Hyperparameters {
    pub n_ctx: usize,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            n_ctx: 512,
            n_embd: 384,
            n_layer: 6,
            n_head: 6,
        }
    }
}

impl Hyperparameters {
    pub fn into_config(self, vocab_size: usize, pad_token_id: u32) -> GPTConfig {
        GPTConfig {
            vocab_size,
            n_ctx: self.n_ctx,
            n_embd: self.n_embd,
            n_layer: self.n_layer,
            n_head: self.n_head,
            layer_norm_epsilon: default_layer_norm_epsilon(),
            activation_function: default_activation(),
            pad_token_id,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GPTConfig {
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,
    pub n_ctx: usize,   // max sequence length
    pub n_embd: usize,  // hidden size
    pub n_layer: usize, // number of layers
    pub n_head: usize,  // number of attention heads
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f32,
    #[serde(default = "default_activation")]
    pub activation_function: String,
    pub pad_token_id: u32,
}

fn default_activation() -> String {
    "gelu_new".to_string()
}

fn default_layer_norm_epsilon() -> f32 {
    1e-5
}

fn default_vocab_size() -> usize {
    50257
}

impl GPTConfig {
    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_head
    }

    /// Feed-forward width; GPT-2 uses 4x the hidden size.
    pub fn intermediate_size(&self) -> usize {
        self.n_embd * 4
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        Hyperparameters {
            n_ctx: self.n_ctx,
            n_embd: self.n_embd,
            n_layer: self.n_layer,
            n_head: self.n_head,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.vocab_size > 0, "vocab_size must be positive");
        anyhow::ensure!(self.n_ctx > 0, "n_ctx must be positive");
        anyhow::ensure!(self.n_head > 0, "n_head must be positive");
        anyhow::ensure!(
            self.n_embd % self.n_head == 0,
            "n_embd ({}) must be divisible by n_head ({})",
            self.n_embd,
            self.n_head
        );
        anyhow::ensure!(
            self.activation_function == "gelu_new",
            "unsupported activation function '{}'",
            self.activation_function
        );
        Ok(())
    }
}
