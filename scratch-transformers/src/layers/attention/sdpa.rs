use candle_core::{Tensor, D};
use candle_nn::ops::softmax;
use snafu::{ResultExt, Snafu};

use crate::error::BoxedError;
use crate::layers::attention::{QueryKeyAttentionMask, QueryKeyAttentionMaskError};

/// Trait implemented by modules that perform attention scoring.
pub trait AttentionScorer {
    /// Apply attention scores to the given key, query and value.
    /// Sequence elements that are marked with `false` in the attention mask
    /// are ignored by the attention mechanism.
    ///
    /// * `query` - Query tensor.
    ///   *Shape:* `(batch_size, heads, query_len, width)`
    /// * `key` - Key tensor.
    ///   *Shape:* `(batch_size, heads, key_len, width)`
    /// * `value` - Value tensor.
    ///   *Shape:* `(batch_size, heads, key_len, width)`
    /// * `attention_mask` - Attention mask. Sequence elements for which
    ///   the corresponding mask element is set to `false` are ignored in
    ///   attention.
    /// * `train` - Whether the model is trained.
    ///
    /// Returns: Attention values.
    /// *Shape:* `(batch_size, heads, query_len, width)`
    fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        attention_mask: &QueryKeyAttentionMask,
        train: bool,
    ) -> Result<Tensor, BoxedError>;
}

/// Errors for scaled dot-product attention.
#[derive(Debug, Snafu)]
pub enum ScaledDotProductAttentionError {
    #[snafu(display("Cannot apply attention mask"))]
    AttentionMask {
        source: QueryKeyAttentionMaskError,
    },

    #[snafu(display("Cannot calculate attention scores"))]
    AttentionScores { source: candle_core::Error },

    #[snafu(display("Cannot weigh representations using attention mask"))]
    AttentionWeight { source: candle_core::Error },

    #[snafu(display("Cannot apply softmax temperature"))]
    Temperature { source: candle_core::Error },
}

/// Scaled dot-product attention.
///
/// See [Vaswani et al., 2017](https://arxiv.org/abs/1706.03762).
pub struct ScaledDotProductAttention {
    temperature: f64,
}

impl ScaledDotProductAttention {
    /// Construct a scaled dot-product attention module.
    ///
    /// * `scaling_width` - Width used to scale the attention scores.
    ///   Scores are divided by `sqrt(scaling_width)` before the softmax
    ///   is applied, countering softmax saturation for wider models.
    pub fn new(scaling_width: usize) -> Self {
        ScaledDotProductAttention {
            temperature: (scaling_width as f64).sqrt(),
        }
    }
}

impl AttentionScorer for ScaledDotProductAttention {
    fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        attention_mask: &QueryKeyAttentionMask,
        _train: bool,
    ) -> Result<Tensor, BoxedError> {
        // Calculate attention scores.
        let query = query.contiguous().context(AttentionScoresSnafu)?;
        let mut attn_scores = key
            .contiguous()
            .and_then(|key| key.transpose(3, 2))
            .and_then(|key| query.broadcast_matmul(&key))
            .context(AttentionScoresSnafu)?;

        attn_scores = (attn_scores / self.temperature).context(TemperatureSnafu)?;
        attn_scores = attention_mask
            .apply_logit_mask(&attn_scores)
            .context(AttentionMaskSnafu)?;

        // Apply attention weights.
        let attn_weights = softmax(&attn_scores, D::Minus1).context(AttentionWeightSnafu)?;
        value
            .contiguous()
            .and_then(|value| attn_weights.broadcast_matmul(&value))
            .context(AttentionWeightSnafu)
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, Tensor};
    use ndarray::array;
    use snafu::{report, FromString, ResultExt, Whatever};

    use super::{AttentionScorer, ScaledDotProductAttention};
    use crate::layers::attention::{AttentionMask, QueryKeyAttentionMask};
    use crate::util::tests::assert_tensor_eq;

    fn full_mask(batch_size: usize, key_len: usize) -> Result<QueryKeyAttentionMask, Whatever> {
        Ok(AttentionMask::new(
            Tensor::ones((batch_size, key_len), DType::U32, &Device::Cpu)
                .whatever_context("Cannot create mask tensor")?,
        )
        .whatever_context("Cannot create attention mask")?
        .into())
    }

    #[test]
    #[report]
    fn attention_weights_match_softmax_of_scaled_scores() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let query = Tensor::from_slice(&[1f32, 0.0, 0.0, 1.0], (1, 1, 2, 2), &device)
            .whatever_context("Cannot create query")?;
        let key = query.clone();
        let value = Tensor::from_slice(&[1f32, 0.0, 0.0, 2.0], (1, 1, 2, 2), &device)
            .whatever_context("Cannot create value")?;

        // Scores are the identity scaled by 1/sqrt(4), so each row mixes
        // the values with weights softmax([0.5, 0]) / softmax([0, 0.5]).
        let attention = ScaledDotProductAttention::new(4);
        let output = attention
            .forward(&query, &key, &value, &full_mask(1, 2)?, false)
            .map_err(|e| Whatever::with_source(e, "Cannot apply attention".to_string()))?;

        assert_tensor_eq::<f32>(
            output
                .reshape((2, 2))
                .whatever_context("Cannot reshape output")?,
            array![[0.6224593, 0.7550813], [0.3775407, 1.2449187]],
            1e-4,
        );
        Ok(())
    }

    #[test]
    #[report]
    fn masked_keys_get_no_weight() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let query = Tensor::from_slice(&[0.3f32, -0.2, 1.5, 0.7], (1, 1, 2, 2), &device)
            .whatever_context("Cannot create query")?;
        let key = Tensor::from_slice(&[0.9f32, 0.1, -0.4, 2.0], (1, 1, 2, 2), &device)
            .whatever_context("Cannot create key")?;
        let value = Tensor::from_slice(&[1f32, 0.0, 5.0, -5.0], (1, 1, 2, 2), &device)
            .whatever_context("Cannot create value")?;

        let mask: QueryKeyAttentionMask = AttentionMask::new(
            Tensor::new(&[[1u32, 0]], &device).whatever_context("Cannot create mask tensor")?,
        )
        .whatever_context("Cannot create attention mask")?
        .into();

        // With the second key blocked, every query must return the first
        // value vector exactly.
        let attention = ScaledDotProductAttention::new(4);
        let output = attention
            .forward(&query, &key, &value, &mask, false)
            .map_err(|e| Whatever::with_source(e, "Cannot apply attention".to_string()))?;

        assert_tensor_eq::<f32>(
            output
                .reshape((2, 2))
                .whatever_context("Cannot reshape output")?,
            array![[1.0, 0.0], [1.0, 0.0]],
            1e-6,
        );
        Ok(())
    }

    #[test]
    #[report]
    fn constant_values_pass_through_unchanged() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let query = Tensor::from_slice(&[0.2f32, 1.1, -0.7, 0.4, 0.0, -1.3], (1, 1, 3, 2), &device)
            .whatever_context("Cannot create query")?;
        let key = Tensor::from_slice(&[1.0f32, 0.5, -0.5, 0.1, 0.8, -1.2], (1, 1, 3, 2), &device)
            .whatever_context("Cannot create key")?;
        let value = Tensor::from_slice(&[3f32, -1.0, 3.0, -1.0, 3.0, -1.0], (1, 1, 3, 2), &device)
            .whatever_context("Cannot create value")?;

        // Attention weights form a convex combination, so identical value
        // vectors must be returned as-is for every query.
        let attention = ScaledDotProductAttention::new(4);
        let output = attention
            .forward(&query, &key, &value, &full_mask(1, 3)?, false)
            .map_err(|e| Whatever::with_source(e, "Cannot apply attention".to_string()))?;

        assert_tensor_eq::<f32>(
            output
                .reshape((3, 2))
                .whatever_context("Cannot reshape output")?,
            array![[3.0, -1.0], [3.0, -1.0], [3.0, -1.0]],
            1e-5,
        );
        Ok(())
    }
}
