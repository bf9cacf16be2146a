//! Base GPT model implementation

use crate::config::GPTConfig;
use crate::error::StoneResult;
use crate::model::layers::{matmul_3d_2d, matmul_4d, softmax, FeedForward, LayerNorm};
use crate::weights::ModelWeights;
use anyhow::Result;
use ndarray::{s, Array1, Array2, Array3, Array4};

/// Score given to positions a query may not attend to.
const MASK_VALUE: f32 = -1.0e9;

/// Cached keys and values of one layer, each `[batch, heads, seq, head_dim]`.
pub type LayerCache = (Array4<f32>, Array4<f32>);

/// Causal self-attention for autoregressive modeling
pub struct CausalSelfAttention {
    pub c_attn_weight: Array2<f32>, // Combined QKV projection, [n_embd, 3 * n_embd]
    pub c_attn_bias: Array1<f32>,
    pub c_proj_weight: Array2<f32>, // Output projection
    pub c_proj_bias: Array1<f32>,
    pub n_head: usize,
    pub n_embd: usize,
    pub scale_factor: f32,
}

impl CausalSelfAttention {
    pub fn new(
        c_attn_weight: Array2<f32>,
        c_attn_bias: Array1<f32>,
        c_proj_weight: Array2<f32>,
        c_proj_bias: Array1<f32>,
        n_head: usize,
        n_embd: usize,
    ) -> Self {
        let head_dim = n_embd / n_head;
        let scale_factor = 1.0 / (head_dim as f32).sqrt();

        Self {
            c_attn_weight,
            c_attn_bias,
            c_proj_weight,
            c_proj_bias,
            n_head,
            n_embd,
            scale_factor,
        }
    }

    /// `attention_mask` is `[batch, past_len + seq_len]`, 1 = attend, 0 = padding.
    pub fn forward(
        &self,
        x: &Array3<f32>,
        attention_mask: &Array2<f32>,
        layer_past: Option<&LayerCache>,
    ) -> Result<(Array3<f32>, LayerCache)> {
        let (batch_size, seq_len, _) = x.dim();
        let head_dim = self.n_embd / self.n_head;

        let mut qkv = matmul_3d_2d(x, &self.c_attn_weight)?;
        qkv += &self.c_attn_bias;

        let split = |from: usize| -> Result<Array4<f32>> {
            Ok(qkv
                .slice(s![.., .., from..from + self.n_embd])
                .to_owned()
                .into_shape_with_order((batch_size, seq_len, self.n_head, head_dim))?
                .permuted_axes([0, 2, 1, 3])
                .as_standard_layout()
                .into_owned())
        };
        let q = split(0)?;
        let mut k = split(self.n_embd)?;
        let mut v = split(2 * self.n_embd)?;

        let past_len = layer_past.map(|(past_k, _)| past_k.shape()[2]).unwrap_or(0);
        if let Some((past_k, past_v)) = layer_past {
            k = concat_seq(past_k, &k);
            v = concat_seq(past_v, &v);
        }
        let total_len = past_len + seq_len;
        anyhow::ensure!(
            attention_mask.dim() == (batch_size, total_len),
            "attention mask has shape {:?}, expected {:?}",
            attention_mask.dim(),
            (batch_size, total_len)
        );

        let k_t = k.view().permuted_axes([0, 1, 3, 2]).as_standard_layout().into_owned();
        let mut scores = matmul_4d(&q, &k_t);
        scores *= self.scale_factor;

        for ((b, _, i, j), score) in scores.indexed_iter_mut() {
            // Query i sits at absolute position past_len + i.
            if j > past_len + i || attention_mask[[b, j]] == 0.0 {
                *score = MASK_VALUE;
            }
        }

        let weights = softmax(&scores);
        let context = matmul_4d(&weights, &v)
            .permuted_axes([0, 2, 1, 3])
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((batch_size, seq_len, self.n_embd))?;

        let mut output = matmul_3d_2d(&context, &self.c_proj_weight)?;
        output += &self.c_proj_bias;

        Ok((output, (k, v)))
    }
}

/// Concatenate along the sequence axis (axis 2).
fn concat_seq(past: &Array4<f32>, current: &Array4<f32>) -> Array4<f32> {
    let (batch, heads, past_len, head_dim) = past.dim();
    let cur_len = current.shape()[2];
    let mut combined = Array4::<f32>::zeros((batch, heads, past_len + cur_len, head_dim));
    combined.slice_mut(s![.., .., ..past_len, ..]).assign(past);
    combined.slice_mut(s![.., .., past_len.., ..]).assign(current);
    combined
}

/// GPT block containing attention and feedforward (pre-norm)
pub struct GPTBlock {
    pub ln_1: LayerNorm,
    pub attn: CausalSelfAttention,
    pub ln_2: LayerNorm,
    pub mlp: FeedForward,
}

impl GPTBlock {
    pub fn forward(
        &self,
        x: Array3<f32>,
        attention_mask: &Array2<f32>,
        layer_past: Option<&LayerCache>,
    ) -> Result<(Array3<f32>, LayerCache)> {
        let ln1_out = self.ln_1.forward_3d(&x);
        let (attn_out, present) = self.attn.forward(&ln1_out, attention_mask, layer_past)?;
        let x = x + attn_out;

        let ln2_out = self.ln_2.forward_3d(&x);
        let mlp_out = self.mlp.forward(&ln2_out)?;
        Ok((x + mlp_out, present))
    }
}

/// Base GPT model structure
pub struct GPTBase {
    pub wte: Array2<f32>, // Word token embeddings
    pub wpe: Array2<f32>, // Position embeddings
    pub blocks: Vec<GPTBlock>,
    pub ln_f: LayerNorm, // Final layer norm
    pub config: GPTConfig,
}

impl GPTBase {
    /// Restore every tensor, checking shapes against `config`.
    pub fn from_weights(weights: &ModelWeights, config: GPTConfig) -> StoneResult<Self> {
        let n_embd = config.n_embd;
        let n_inner = config.intermediate_size();
        let eps = config.layer_norm_epsilon;

        let layer_norm = |name: &str| -> StoneResult<LayerNorm> {
            Ok(LayerNorm::new(
                weights.get_array1(&format!("{name}.weight"), n_embd)?,
                weights.get_array1(&format!("{name}.bias"), n_embd)?,
                eps,
            ))
        };

        let wte = weights.get_array2("transformer.wte.weight", (config.vocab_size, n_embd))?;
        let wpe = weights.get_array2("transformer.wpe.weight", (config.n_ctx, n_embd))?;

        let mut blocks = Vec::with_capacity(config.n_layer);
        for i in 0..config.n_layer {
            let prefix = format!("transformer.h.{}", i);

            let attn = CausalSelfAttention::new(
                weights.get_array2(&format!("{prefix}.attn.c_attn.weight"), (n_embd, 3 * n_embd))?,
                weights.get_array1(&format!("{prefix}.attn.c_attn.bias"), 3 * n_embd)?,
                weights.get_array2(&format!("{prefix}.attn.c_proj.weight"), (n_embd, n_embd))?,
                weights.get_array1(&format!("{prefix}.attn.c_proj.bias"), n_embd)?,
                config.n_head,
                n_embd,
            );

            let mlp = FeedForward::new(
                weights.get_array2(&format!("{prefix}.mlp.c_fc.weight"), (n_embd, n_inner))?,
                weights.get_array1(&format!("{prefix}.mlp.c_fc.bias"), n_inner)?,
                weights.get_array2(&format!("{prefix}.mlp.c_proj.weight"), (n_inner, n_embd))?,
                weights.get_array1(&format!("{prefix}.mlp.c_proj.bias"), n_embd)?,
            );

            blocks.push(GPTBlock {
                ln_1: layer_norm(&format!("{prefix}.ln_1"))?,
                attn,
                ln_2: layer_norm(&format!("{prefix}.ln_2"))?,
                mlp,
            });
        }

        let ln_f = layer_norm("transformer.ln_f")?;

        Ok(Self {
            wte,
            wpe,
            blocks,
            ln_f,
            config,
        })
    }

    /// Run the transformer body.
    ///
    /// `input_ids` holds only the tokens not yet in `past`; `attention_mask`
    /// covers past and new tokens. Returns final hidden states and the
    /// updated per-layer cache.
    pub fn forward(
        &self,
        input_ids: &Array2<u32>,
        attention_mask: &Array2<f32>,
        past: Option<&[LayerCache]>,
    ) -> Result<(Array3<f32>, Vec<LayerCache>)> {
        let (batch_size, seq_len) = input_ids.dim();
        let past_len = past
            .and_then(|p| p.first())
            .map(|(k, _)| k.shape()[2])
            .unwrap_or(0);
        anyhow::ensure!(
            past_len + seq_len <= self.config.n_ctx,
            "sequence length {} exceeds context window {}",
            past_len + seq_len,
            self.config.n_ctx
        );

        let mut hidden = Array3::<f32>::zeros((batch_size, seq_len, self.config.n_embd));
        for ((i, j), &token_id) in input_ids.indexed_iter() {
            let token_id = token_id as usize;
            anyhow::ensure!(
                token_id < self.config.vocab_size,
                "token id {} outside vocabulary of {}",
                token_id,
                self.config.vocab_size
            );
            let mut slot = hidden.slice_mut(s![i, j, ..]);
            slot.assign(&self.wte.row(token_id));
            slot += &self.wpe.row(past_len + j);
        }

        let mut presents = Vec::with_capacity(self.blocks.len());
        for (i, block) in self.blocks.iter().enumerate() {
            let layer_past = past.map(|p| &p[i]);
            let (new_hidden, present) = block.forward(hidden, attention_mask, layer_past)?;
            hidden = new_hidden;
            presents.push(present);
        }

        Ok((self.ln_f.forward_3d(&hidden), presents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attention(n_embd: usize, n_head: usize) -> CausalSelfAttention {
        // Q = K = V = x, identity output projection.
        let mut c_attn = Array2::<f32>::zeros((n_embd, 3 * n_embd));
        for part in 0..3 {
            for d in 0..n_embd {
                c_attn[[d, part * n_embd + d]] = 1.0;
            }
        }
        CausalSelfAttention::new(
            c_attn,
            Array1::zeros(3 * n_embd),
            Array2::eye(n_embd),
            Array1::zeros(n_embd),
            n_head,
            n_embd,
        )
    }

    #[test]
    fn first_position_only_sees_itself() {
        let attn = attention(2, 1);
        let x = Array3::from_shape_vec((1, 2, 2), vec![1.0, 0.0, 0.0, 5.0]).unwrap();
        let mask = Array2::ones((1, 2));

        let (out, (k, v)) = attn.forward(&x, &mask, None).unwrap();

        assert!((out[[0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!(out[[0, 0, 1]].abs() < 1e-6);
        assert_eq!(k.shape(), &[1, 1, 2, 2]);
        assert_eq!(v.shape(), &[1, 1, 2, 2]);
    }

    #[test]
    fn cached_step_matches_full_pass() {
        let attn = attention(4, 2);
        let x = Array3::from_shape_vec(
            (1, 3, 4),
            vec![0.1, 0.2, 0.3, 0.4, -0.5, 0.6, 0.0, 0.2, 0.9, -0.1, 0.3, 0.7],
        )
        .unwrap();

        let (full, _) = attn.forward(&x, &Array2::ones((1, 3)), None).unwrap();

        let prefix = x.slice(s![.., ..2, ..]).to_owned();
        let last = x.slice(s![.., 2.., ..]).to_owned();
        let (_, cache) = attn.forward(&prefix, &Array2::ones((1, 2)), None).unwrap();
        let (step, (k, _)) = attn
            .forward(&last, &Array2::ones((1, 3)), Some(&cache))
            .unwrap();

        assert_eq!(k.shape()[2], 3);
        for d in 0..4 {
            assert!((full[[0, 2, d]] - step[[0, 0, d]]).abs() < 1e-5);
        }
    }

    #[test]
    fn padding_positions_are_ignored() {
        let attn = attention(2, 1);
        let x = Array3::from_shape_vec((1, 2, 2), vec![9.0, 9.0, 1.0, 0.0]).unwrap();
        let mask = Array2::from_shape_vec((1, 2), vec![0.0, 1.0]).unwrap();

        let (out, _) = attn.forward(&x, &mask, None).unwrap();

        assert!((out[[0, 1, 0]] - 1.0).abs() < 1e-5);
        assert!(out[[0, 1, 1]].abs() < 1e-5);
    }

    #[test]
    fn rejects_mask_of_wrong_length() {
        let attn = attention(2, 1);
        let x = Array3::<f32>::zeros((1, 2, 2));
        assert!(attn.forward(&x, &Array2::ones((1, 3)), None).is_err());
    }
}
