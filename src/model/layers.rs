//! Transformer building blocks: layer norm, feed-forward, softmax, matmul.

use anyhow::Result;
use ndarray::{Array1, Array2, Array3, Array4, Axis, Zip};

/// Layer normalization over the feature axis.
pub struct LayerNorm {
    pub weight: Array1<f32>,
    pub bias: Array1<f32>,
    pub eps: f32,
}

impl LayerNorm {
    pub fn new(weight: Array1<f32>, bias: Array1<f32>, eps: f32) -> Self {
        Self { weight, bias, eps }
    }

    /// Apply layer norm to a `[batch, seq, hidden]` tensor.
    pub fn forward_3d(&self, hidden: &Array3<f32>) -> Array3<f32> {
        let hidden_size = hidden.shape()[2] as f32;
        // Mean and variance shaped [batch, seq, 1] so they broadcast over features.
        let mean = hidden
            .sum_axis(Axis(2))
            .mapv(|s| s / hidden_size)
            .insert_axis(Axis(2));
        let centered = hidden - &mean;
        let variance = centered
            .mapv(|x| x * x)
            .sum_axis(Axis(2))
            .mapv(|s| s / hidden_size)
            .insert_axis(Axis(2));

        let inv_std = variance.mapv(|v| 1.0 / (v + self.eps).sqrt());
        centered * &inv_std * &self.weight + &self.bias
    }
}

/// GPT-2 MLP: `c_proj(gelu_new(c_fc(x)))`.
///
/// Weights are stored `[in, out]`, the layout GPT-2 checkpoints use.
pub struct FeedForward {
    pub c_fc_weight: Array2<f32>,
    pub c_fc_bias: Array1<f32>,
    pub c_proj_weight: Array2<f32>,
    pub c_proj_bias: Array1<f32>,
}

impl FeedForward {
    pub fn new(
        c_fc_weight: Array2<f32>,
        c_fc_bias: Array1<f32>,
        c_proj_weight: Array2<f32>,
        c_proj_bias: Array1<f32>,
    ) -> Self {
        Self {
            c_fc_weight,
            c_fc_bias,
            c_proj_weight,
            c_proj_bias,
        }
    }

    pub fn forward(&self, hidden: &Array3<f32>) -> Result<Array3<f32>> {
        let mut intermediate = matmul_3d_2d(hidden, &self.c_fc_weight)?;
        intermediate += &self.c_fc_bias;
        gelu_new(&mut intermediate);

        let mut output = matmul_3d_2d(&intermediate, &self.c_proj_weight)?;
        output += &self.c_proj_bias;
        Ok(output)
    }
}

/// GELU tanh approximation, the activation GPT-2 was trained with.
/// Formula: 0.5 * x * (1 + tanh(sqrt(2/pi) * (x + 0.044715 * x^3)))
pub fn gelu_new(x: &mut Array3<f32>) {
    const SQRT_2_OVER_PI: f32 = 0.797_884_6;
    const GELU_COEFF: f32 = 0.044715;

    x.mapv_inplace(|val| {
        let inner = SQRT_2_OVER_PI * (val + GELU_COEFF * val * val * val);
        0.5 * val * (1.0 + inner.tanh())
    });
}

/// Softmax over the last axis of attention scores.
pub fn softmax(scores: &Array4<f32>) -> Array4<f32> {
    let max_vals = scores
        .fold_axis(Axis(3), f32::NEG_INFINITY, |&acc, &x| acc.max(x))
        .insert_axis(Axis(3));

    let mut result = scores - &max_vals;
    result.mapv_inplace(f32::exp);

    let sum_exp = result.sum_axis(Axis(3)).insert_axis(Axis(3));
    result /= &sum_exp;
    result
}

/// `[batch, m, k] x [k, n] -> [batch, m, n]`
pub fn matmul_3d_2d(a: &Array3<f32>, b: &Array2<f32>) -> Result<Array3<f32>> {
    let (batch, m, k) = a.dim();
    let (k2, n) = b.dim();
    anyhow::ensure!(k == k2, "matmul inner dimensions differ: {} vs {}", k, k2);

    let a_flat = a
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((batch * m, k))?;
    let c_flat = a_flat.dot(b);
    Ok(c_flat.into_shape_with_order((batch, m, n))?)
}

/// Batched per-head matmul: `[b, h, m, k] x [b, h, k, n] -> [b, h, m, n]`
pub fn matmul_4d(a: &Array4<f32>, b: &Array4<f32>) -> Array4<f32> {
    let (batch, heads, m, _) = a.dim();
    let n = b.shape()[3];
    let mut output = Array4::<f32>::zeros((batch, heads, m, n));

    Zip::from(output.outer_iter_mut())
        .and(a.outer_iter())
        .and(b.outer_iter())
        .for_each(|mut out_b, a_b, b_b| {
            Zip::from(out_b.outer_iter_mut())
                .and(a_b.outer_iter())
                .and(b_b.outer_iter())
                .for_each(|mut out_h, a_h, b_h| {
                    out_h.assign(&a_h.dot(&b_h));
                });
        });
    output
}
