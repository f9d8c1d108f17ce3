/// Transformer building blocks.
use candle_core::{ModuleT, Tensor};
use candle_nn::{Dropout, VarBuilder};
use snafu::{ResultExt, Snafu};

use crate::architectures::{self, BuildDecoderLayer, BuildEncoderLayer};
use crate::error::BoxedError;
use crate::layers::attention::{
    QueryKeyAttentionMask, SelfAttention, SelfAttentionConfig, SelfAttentionError,
};
use crate::layers::build_module::BuildModule;
use crate::layers::feedforward::PointwiseFeedForward;
use crate::layers::{Activation, LayerNormConfig};

/// Transformer layer configuration.
#[derive(Clone, Debug)]
pub struct TransformerLayerConfig {
    activation: Activation,
    dropout: f32,
    embed_width: usize,
    forward_expansion: usize,
    layer_norm_eps: f64,
    n_heads: usize,
}

impl TransformerLayerConfig {
    /// Non-linearity used in the feed-forward sublayer.
    ///
    /// Default: `Activation::Relu`
    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Dropout probability applied after each layer normalization.
    ///
    /// Default: `0.0`
    pub fn dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    /// Width of the piece embeddings.
    ///
    /// Default: `256`
    pub fn embed_width(mut self, embed_width: usize) -> Self {
        self.embed_width = embed_width;
        self
    }

    /// Expansion factor of the feed-forward intermediate width.
    ///
    /// Default: `4`
    pub fn forward_expansion(mut self, forward_expansion: usize) -> Self {
        self.forward_expansion = forward_expansion;
        self
    }

    /// Epsilon of the layer normalizations.
    ///
    /// Default: `1e-5`
    pub fn layer_norm_eps(mut self, layer_norm_eps: f64) -> Self {
        self.layer_norm_eps = layer_norm_eps;
        self
    }

    /// Number of attention heads.
    ///
    /// Default: `8`
    pub fn n_heads(mut self, n_heads: usize) -> Self {
        self.n_heads = n_heads;
        self
    }

    fn attention(&self, vb: VarBuilder) -> Result<SelfAttention, TransformerLayerError> {
        SelfAttentionConfig::default()
            .embed_width(self.embed_width)
            .n_heads(self.n_heads)
            .build(vb)
            .context(BuildAttentionSnafu)
    }

    fn layer_norm(&self, vb: VarBuilder) -> Result<Box<dyn ModuleT>, TransformerLayerError> {
        LayerNormConfig::default()
            .size(self.embed_width)
            .eps(self.layer_norm_eps)
            .build(vb)
            .context(BuildLayerNormSnafu)
    }

    fn build_layer(&self, vb: VarBuilder) -> Result<TransformerLayer, TransformerLayerError> {
        let ffn = PointwiseFeedForward::new(
            vb.push_prefix("ffn"),
            self.activation
                .build(vb.clone())
                .context(BuildActivationSnafu)?,
            self.embed_width,
            self.forward_expansion * self.embed_width,
        )
        .context(BuildFeedForwardSnafu)?;

        Ok(TransformerLayer {
            attention: self.attention(vb.push_prefix("attention"))?,
            attn_residual_layer_norm: self
                .layer_norm(vb.push_prefix("attn_residual_layer_norm"))?,
            dropout: Dropout::new(self.dropout),
            ffn,
            ffn_residual_layer_norm: self.layer_norm(vb.push_prefix("ffn_residual_layer_norm"))?,
        })
    }
}

impl Default for TransformerLayerConfig {
    fn default() -> Self {
        Self {
            activation: Activation::Relu,
            dropout: 0.0,
            embed_width: 256,
            forward_expansion: 4,
            layer_norm_eps: 1e-5,
            n_heads: 8,
        }
    }
}

impl BuildEncoderLayer for TransformerLayerConfig {
    fn build_encoder_layer(
        &self,
        vb: VarBuilder,
    ) -> Result<Box<dyn architectures::EncoderLayer>, BoxedError> {
        Ok(Box::new(EncoderLayer {
            inner: self.build_layer(vb)?,
        }))
    }
}

impl BuildDecoderLayer for TransformerLayerConfig {
    fn build_decoder_layer(
        &self,
        vb: VarBuilder,
    ) -> Result<Box<dyn architectures::DecoderLayer>, BoxedError> {
        Ok(Box::new(DecoderLayer {
            dropout: Dropout::new(self.dropout),
            inner: self.build_layer(vb.clone())?,
            masked_attention: self.attention(vb.push_prefix("masked_attention"))?,
            masked_attention_layer_norm: self
                .layer_norm(vb.push_prefix("masked_attention_layer_norm"))?,
        }))
    }
}

/// Errors for transformer layers.
#[derive(Debug, Snafu)]
pub enum TransformerLayerError {
    #[snafu(display("Cannot build activation"))]
    BuildActivation { source: BoxedError },

    #[snafu(display("Cannot build attention layer"))]
    BuildAttention { source: SelfAttentionError },

    #[snafu(display("Cannot build point-wise feed-forward layer"))]
    BuildFeedForward { source: candle_core::Error },

    #[snafu(display("Cannot build layer norm"))]
    BuildLayerNorm { source: BoxedError },

    #[snafu(display("Cannot apply point-wise feed-forward layer"))]
    FeedForward { source: candle_core::Error },

    #[snafu(display("Cannot apply residual connection"))]
    Residual { source: candle_core::Error },

    #[snafu(display("Cannot apply self-attention"))]
    SelfAttention { source: SelfAttentionError },
}

/// Transformer layer.
///
/// This is a generic transformer layer that is used by `DecoderLayer` and
/// `EncoderLayer` to provide specialized layers.
///
/// See [Vaswani et al. (2017)](https://arxiv.org/abs/1706.03762).
struct TransformerLayer {
    attention: SelfAttention,
    attn_residual_layer_norm: Box<dyn ModuleT>,
    dropout: Dropout,
    ffn: PointwiseFeedForward,
    ffn_residual_layer_norm: Box<dyn ModuleT>,
}

impl TransformerLayer {
    /// Apply the transformer layer to the given hidden representations.
    ///
    /// Both residual connections are post-norm: the sublayer output is
    /// summed with the sublayer input, normalized, and passed through
    /// dropout.
    ///
    /// * `query` - Query representations, also the residual stream.
    ///   *Shape:* `(batch_size, query_len, width)`
    /// * `key` - Key representations.
    ///   *Shape:* `(batch_size, key_len, width)`
    /// * `value` - Value representations.
    ///   *Shape:* `(batch_size, key_len, width)`
    /// * `attention_mask` - Attention mask. Sequence elements for which the
    ///   corresponding mask element is set to `false` are ignored during
    ///   attention calculation.
    /// * `train` - Whether to train the layer.
    ///
    /// Returns: Layer output.
    /// *Shape:* `(batch_size, query_len, width)`
    fn forward(
        &self,
        query: &Tensor,
        key: &Tensor,
        value: &Tensor,
        attention_mask: &QueryKeyAttentionMask,
        train: bool,
    ) -> Result<Tensor, TransformerLayerError> {
        let attn_out = self
            .attention
            .forward(query, key, value, attention_mask, train)
            .context(SelfAttentionSnafu)?;

        let residual = (attn_out + query)
            .and_then(|xs| self.attn_residual_layer_norm.forward_t(&xs, train))
            .and_then(|xs| self.dropout.forward_t(&xs, train))
            .context(ResidualSnafu)?;

        let ffn_out = self
            .ffn
            .forward_t(&residual, train)
            .context(FeedForwardSnafu)?;

        (ffn_out + &residual)
            .and_then(|xs| self.ffn_residual_layer_norm.forward_t(&xs, train))
            .and_then(|xs| self.dropout.forward_t(&xs, train))
            .context(ResidualSnafu)
    }
}

/// Transformer encoder layer.
///
/// See [Vaswani et al. (2017)](https://arxiv.org/abs/1706.03762).
pub struct EncoderLayer {
    inner: TransformerLayer,
}

impl architectures::EncoderLayer for EncoderLayer {
    fn forward_t(
        &self,
        input: &Tensor,
        attention_mask: &QueryKeyAttentionMask,
        train: bool,
    ) -> Result<Tensor, BoxedError> {
        self.inner
            .forward(input, input, input, attention_mask, train)
            .boxed()
    }
}

/// Transformer decoder layer.
///
/// Adds a causally-masked self-attention sublayer in front of the generic
/// transformer layer; the generic layer then cross-attends to the encoder
/// output.
///
/// See [Vaswani et al. (2017)](https://arxiv.org/abs/1706.03762).
pub struct DecoderLayer {
    dropout: Dropout,
    inner: TransformerLayer,
    masked_attention: SelfAttention,
    masked_attention_layer_norm: Box<dyn ModuleT>,
}

impl architectures::DecoderLayer for DecoderLayer {
    fn forward_t(
        &self,
        input: &Tensor,
        encoder_output: &Tensor,
        source_mask: &QueryKeyAttentionMask,
        target_mask: &QueryKeyAttentionMask,
        train: bool,
    ) -> Result<Tensor, BoxedError> {
        let attn_out = self
            .masked_attention
            .forward(input, input, input, target_mask, train)
            .context(SelfAttentionSnafu)
            .boxed()?;

        let query = (attn_out + input)
            .and_then(|xs| self.masked_attention_layer_norm.forward_t(&xs, train))
            .and_then(|xs| self.dropout.forward_t(&xs, train))
            .context(ResidualSnafu)
            .boxed()?;

        self.inner
            .forward(&query, encoder_output, encoder_output, source_mask, train)
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use snafu::{report, FromString, ResultExt, Whatever};

    use super::TransformerLayerConfig;
    use crate::architectures::{
        BuildDecoderLayer, BuildEncoderLayer, DecoderLayer as _, EncoderLayer as _,
    };
    use crate::layers::attention::{AttentionMask, CausalMask, QueryKeyAttentionMask};
    use crate::util::tests::PseudoRandom;

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
    fn encoder_layer_preserves_shape() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let layer = TransformerLayerConfig::default()
            .embed_width(8)
            .n_heads(2)
            .build_encoder_layer(vb)
            .map_err(|e| Whatever::with_source(e, "Cannot build encoder layer".to_string()))?;

        let input = Tensor::pseudo_random(32, &device)
            .reshape((1, 4, 8))
            .whatever_context("Cannot reshape input")?;
        let output = layer
            .forward_t(&input, &full_mask(1, 4)?, false)
            .map_err(|e| Whatever::with_source(e, "Cannot apply encoder layer".to_string()))?;

        assert_eq!(output.dims(), [1, 4, 8]);
        Ok(())
    }

    #[test]
    #[report]
    fn decoder_layer_cross_attends_over_longer_source() -> Result<(), Whatever> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let layer = TransformerLayerConfig::default()
            .embed_width(8)
            .n_heads(2)
            .build_decoder_layer(vb)
            .map_err(|e| Whatever::with_source(e, "Cannot build decoder layer".to_string()))?;

        let input = Tensor::pseudo_random(24, &device)
            .reshape((1, 3, 8))
            .whatever_context("Cannot reshape decoder input")?;
        let encoder_output = Tensor::pseudo_random(40, &device)
            .reshape((1, 5, 8))
            .whatever_context("Cannot reshape encoder output")?;

        let target_ids = Tensor::new(&[[1u32, 2, 3]], &device)
            .whatever_context("Cannot create target ids")?;
        let target_mask = QueryKeyAttentionMask::causal_mask(&target_ids)
            .whatever_context("Cannot create causal mask")?;

        let output = layer
            .forward_t(
                &input,
                &encoder_output,
                &full_mask(1, 5)?,
                &target_mask,
                false,
            )
            .map_err(|e| Whatever::with_source(e, "Cannot apply decoder layer".to_string()))?;

        assert_eq!(output.dims(), [1, 3, 8]);
        Ok(())
    }
}
