//! Tokenizer for GPT-2 style byte-level BPE vocabularies.
//!
//! Wraps a HuggingFace `tokenizer.json` and pins padding to the end-of-text
//! token, as GPT-2 has no dedicated pad token.

use crate::config::{EOS_TOKEN, TOKENIZER_FILE};
use crate::error::{StoneError, StoneResult};
use std::path::Path;
use tokenizers::Tokenizer as HfTokenizer;

pub struct GPTTokenizer {
    inner: HfTokenizer,
    eos_token_id: u32,
    pad_token_id: u32,
}

impl GPTTokenizer {
    /// Load `tokenizer.json` from an asset directory.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> StoneResult<Self> {
        Self::from_file(dir.as_ref().join(TOKENIZER_FILE))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> StoneResult<Self> {
        let path = path.as_ref();
        let inner = HfTokenizer::from_file(path).map_err(|e| StoneError::AssetLoad {
            path: path.to_path_buf(),
            source: anyhow::anyhow!("Failed to load tokenizer: {}", e),
        })?;
        Self::from_tokenizer(inner)
    }

    pub fn from_tokenizer(inner: HfTokenizer) -> StoneResult<Self> {
        let eos_token_id = inner.token_to_id(EOS_TOKEN).ok_or_else(|| {
            StoneError::Tokenizer(format!("vocabulary has no '{}' token", EOS_TOKEN))
        })?;

        Ok(Self {
            inner,
            eos_token_id,
            pad_token_id: eos_token_id,
        })
    }

    pub fn encode(&self, text: &str) -> StoneResult<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| StoneError::Tokenizer(format!("Tokenization failed: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> StoneResult<String> {
        self.inner
            .decode(ids, skip_special_tokens)
            .map_err(|e| StoneError::Tokenizer(format!("Decoding failed: {}", e)))
    }

    /// Number of embedding rows the vocabulary needs, added tokens included.
    pub fn vocab_size(&self) -> usize {
        self.inner
            .get_vocab(true)
            .values()
            .max()
            .map_or(0, |&max_id| max_id as usize + 1)
    }

    pub fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }

    pub fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }
}
