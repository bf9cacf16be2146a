//! GPT-2 language model

use crate::config::GPTConfig;
use crate::device::Device;
use crate::error::{StoneError, StoneResult};
use crate::model::base::{GPTBase, LayerCache};
use crate::weights::ModelWeights;
use anyhow::Result;
use ndarray::{s, Array1, Array2};

const LM_HEAD: &str = "lm_head.weight";

/// GPT-2 transformer with a language-model head.
pub struct GPT2 {
    pub base: GPTBase,
    /// `[vocab, n_embd]`; the token embedding table unless stored separately.
    lm_head: Array2<f32>,
    device: Device,
    training: bool,
}

impl GPT2 {
    pub fn from_weights(weights: &ModelWeights, config: GPTConfig) -> StoneResult<Self> {
        config
            .validate()
            .map_err(|e| StoneError::InvalidConfig(e.to_string()))?;
        let base = GPTBase::from_weights(weights, config)?;

        let lm_head = if weights.contains(LM_HEAD) {
            weights.get_array2(LM_HEAD, base.wte.dim())?
        } else {
            base.wte.clone()
        };

        Ok(Self {
            base,
            lm_head,
            device: Device::Cpu,
            training: true,
        })
    }

    pub fn config(&self) -> &GPTConfig {
        &self.base.config
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn to_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Switch to inference mode. The forward pass carries no dropout, so this
    /// only records the mode.
    pub fn eval(mut self) -> Self {
        self.training = false;
        self
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Logits for the last position of the batch's first sequence.
    pub fn next_token_logits(
        &self,
        input_ids: &Array2<u32>,
        attention_mask: &Array2<f32>,
        past: Option<&[LayerCache]>,
    ) -> Result<(Array1<f32>, Vec<LayerCache>)> {
        let (hidden_states, presents) = self.base.forward(input_ids, attention_mask, past)?;
        let last = hidden_states.slice(s![0, -1, ..]);
        Ok((self.lm_head.dot(&last), presents))
    }

    pub(crate) fn ensure_device(&self, requested: Device) -> StoneResult<()> {
        if requested != self.device {
            return Err(StoneError::DeviceMismatch {
                model: self.device.to_string(),
                requested: requested.to_string(),
            });
        }
        Ok(())
    }
}
