use candle_core::{Module, Tensor};
use candle_nn::{linear, linear_no_bias, Linear, VarBuilder};
use snafu::{ensure, ResultExt, Snafu};

use crate::error::BoxedError;
use crate::layers::attention::{
    AttentionScorer, QueryKeyAttentionMask, ScaledDotProductAttention,
};

/// Self-attention configuration.
#[derive(Clone, Debug)]
pub struct SelfAttentionConfig {
    embed_width: usize,
    n_heads: usize,
}

impl SelfAttentionConfig {
    /// Width of the piece embeddings.
    ///
    /// Default: `256`.
    pub fn embed_width(mut self, embed_width: usize) -> Self {
        self.embed_width = embed_width;
        self
    }

    /// Number of attention heads.
    ///
    /// Default: `8`.
    pub fn n_heads(mut self, n_heads: usize) -> Self {
        self.n_heads = n_heads;
        self
    }

    /// Build a self-attention layer.
    ///
    /// Fails when the embedding width is not divisible by the number of
    /// attention heads.
    pub fn build(&self, vb: VarBuilder) -> Result<SelfAttention, SelfAttentionError> {
        ensure!(
            self.embed_width % self.n_heads == 0,
            InvalidHeadCountSnafu {
                embed_width: self.embed_width,
                n_heads: self.n_heads,
            }
        );

        let head_width = self.embed_width / self.n_heads;
        Ok(SelfAttention {
            attention_scorer: Box::new(ScaledDotProductAttention::new(self.embed_width)),
            n_heads: self.n_heads,
            query: linear_no_bias(head_width, head_width, vb.push_prefix("query"))
                .context(ConstructionSnafu)?,
            key: linear_no_bias(head_width, head_width, vb.push_prefix("key"))
                .context(ConstructionSnafu)?,
            value: linear_no_bias(head_width, head_width, vb.push_prefix("value"))
                .context(ConstructionSnafu)?,
            output: linear(self.embed_width, self.embed_width, vb.push_prefix("output"))
                .context(ConstructionSnafu)?,
        })
    }
}

impl Default for SelfAttentionConfig {
    fn default() -> Self {
        Self {
            embed_width: 256,
            n_heads: 8,
        }
    }
}

/// Errors for self-attention.
#[derive(Debug, Snafu)]
pub enum SelfAttentionError {
    #[snafu(display("Cannot apply attention scorer"))]
    AttentionScorer { source: BoxedError },

    #[snafu(display("Cannot combine heads"))]
    CombineHeads { source: candle_core::Error },

    #[snafu(display("Cannot construct layer"))]
    Construction { source: candle_core::Error },

    #[snafu(display(
        "Embedding width {embed_width} is not divisible by the number of attention heads {n_heads}"
    ))]
    InvalidHeadCount { embed_width: usize, n_heads: usize },

    #[snafu(display("Cannot apply output layer"))]
    Output { source: candle_core::Error },

    #[snafu(display("Cannot calculate key, query, or value"))]
    Qkv { source: candle_core::Error },

    #[snafu(display("Cannot split heads"))]
    SplitHeads { source: candle_core::Error },
}

/// Transformer self-attention layer.
///
/// See [Vaswani et al., 2017](https://arxiv.org/abs/1706.03762).
pub struct SelfAttention {
    attention_scorer: Box<dyn AttentionScorer>,
    n_heads: usize,
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
}

impl SelfAttention {
    /// Apply self-attention to the given representations.
    ///
    /// Query, key, and value may come from different sequences; the key
    /// and value sequence lengths must match (cross-attention).
    ///
    /// * `query` - Query tensor.
    ///   *Shape:* `(batch_size, query_len, width)`
    /// * `key` - Key tensor.
    ///   *Shape:* `(batch_size, key_len, width)`
    /// * `value` - Value tensor.
    ///   *Shape:* `(batch_size, key_len, width)`
    /// * `attention_mask` - Attention mask. Sequence elements for which the
    ///   corresponding mask element is set to `false` are ignored during
    ///   attention calculation.
    /// * `train` - Whether the model is trained.
    ///
    /// Returns: Hidden representations after attention.
    /// *Shape:* `(batch_size, query_len, width)`
    pub fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        attention_mask: &QueryKeyAttentionMask,
        train: bool,
    ) -> Result<Tensor, SelfAttentionError> {
        let query = self.project_heads(&self.query, query)?;
        let key = self.project_heads(&self.key, key)?;
        let value = self.project_heads(&self.value, value)?;

        let attn = self
            .attention_scorer
            .forward(&query, &key, &value, attention_mask, train)
            .context(AttentionScorerSnafu)?
            .combine_heads()?;

        self.output.forward(&attn).context(OutputSnafu)
    }

    /// Split the embedding dimension into heads and apply the per-head
    /// projection. The projection weights are shared across heads.
    ///
    /// *Shape:* `(batch_size, seq_len, width)` ->
    /// `(batch_size, n_heads, seq_len, width / n_heads)`
    fn project_heads(
        &self,
        projection: &Linear,
        xs: &Tensor,
    ) -> Result<Tensor, SelfAttentionError> {
        let heads = xs.split_heads(self.n_heads)?;
        projection
            .forward(&heads)
            .and_then(|xs| xs.transpose(1, 2))
            .context(QkvSnafu)
    }
}

trait CombineHeads {
    fn combine_heads(&self) -> Result<Tensor, SelfAttentionError>;
}

impl CombineHeads for Tensor {
    fn combine_heads(&self) -> Result<Tensor, SelfAttentionError> {
        let (batch_size, n_heads, seq_len, head_width) =
            self.dims4().context(CombineHeadsSnafu)?;
        self.transpose(1, 2)
            .and_then(|heads| heads.reshape((batch_size, seq_len, n_heads * head_width)))
            .context(CombineHeadsSnafu)
    }
}

trait SplitHeads {
    fn split_heads(&self, n_heads: usize) -> Result<Tensor, SelfAttentionError>;
}

impl SplitHeads for Tensor {
    fn split_heads(&self, n_heads: usize) -> Result<Tensor, SelfAttentionError> {
        let (batch_size, seq_len, model_width) = self.dims3().context(SplitHeadsSnafu)?;
        let head_width = model_width / n_heads;
        self.reshape((batch_size, seq_len, n_heads, head_width))
            .context(SplitHeadsSnafu)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use rstest::rstest;
    use snafu::{report, Report, ResultExt, Whatever};

    use super::{SelfAttentionConfig, SelfAttentionError};
    use crate::layers::attention::{AttentionMask, QueryKeyAttentionMask};
    use crate::util::tests::{assert_tensor_eq, PseudoRandom};

    fn full_mask(batch_size: usize, key_len: usize) -> Result<QueryKeyAttentionMask, Whatever> {
        Ok(AttentionMask::new(
            Tensor::ones((batch_size, key_len), DType::U32, &Device::Cpu)
                .whatever_context("Cannot create mask tensor")?,
        )
        .whatever_context("Cannot create attention mask")?
        .into())
    }

    #[rstest]
    fn self_attention_preserves_shape(#[values(1, 2, 4)] n_heads: usize) -> Report<Whatever> {
        Report::capture(|| {
            let device = Device::Cpu;
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

            let attention = SelfAttentionConfig::default()
                .embed_width(8)
                .n_heads(n_heads)
                .build(vb)
                .whatever_context("Cannot build self-attention layer")?;

            let input = Tensor::pseudo_random(2 * 5 * 8, &device)
                .reshape((2, 5, 8))
                .whatever_context("Cannot reshape input")?;
            let output = attention
                .forward(&input, &input, &input, &full_mask(2, 5)?, false)
                .whatever_context("Cannot apply self-attention layer")?;

            assert_eq!(output.dims(), [2, 5, 8]);
            Ok(())
        })
    }

    #[test]
    fn self_attention_rejects_indivisible_head_counts() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(matches!(
            SelfAttentionConfig::default()
                .embed_width(10)
                .n_heads(3)
                .build(vb),
            Err(SelfAttentionError::InvalidHeadCount {
                embed_width: 10,
                n_heads: 3,
            })
        ));
    }

    #[test]
    #[report]
    fn self_attention_is_deterministic() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let attention = SelfAttentionConfig::default()
            .embed_width(8)
            .n_heads(2)
            .build(vb)
            .whatever_context("Cannot build self-attention layer")?;

        let input = Tensor::pseudo_random(3 * 4 * 8, &device)
            .reshape((3, 4, 8))
            .whatever_context("Cannot reshape input")?;
        let mask = full_mask(3, 4)?;

        let first = attention
            .forward(&input, &input, &input, &mask, false)
            .whatever_context("Cannot apply self-attention layer")?;
        let second = attention
            .forward(&input, &input, &input, &mask, false)
            .whatever_context("Cannot apply self-attention layer")?;

        assert_tensor_eq::<f32>(first, second, 0.0);
        Ok(())
    }
}
