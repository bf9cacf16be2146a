//! GPT-2 text generation served over HTTP
//!
//! Loads a small pretrained GPT-2 style model and tokenizer from disk and
//! returns sampled continuations of a prompt.

pub mod config;
pub mod device;
pub mod error;
pub mod generation;
pub mod model;
pub mod server;
pub mod tokenizer;
pub mod weights;

// Re-exports
pub use config::{GPTConfig, Hyperparameters};
pub use device::Device;
pub use error::{StoneError, StoneResult};
pub use generation::{
    generate_text, generate_text_with, generate_tokens, GenerationConfig, SamplingStrategy,
};
pub use model::{load_model, load_model_with, GPT2};
pub use tokenizer::GPTTokenizer;
pub use weights::ModelWeights;
