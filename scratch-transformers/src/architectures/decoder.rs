use std::fmt::Debug;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::architectures::output::LayerOutputs;
use crate::error::BoxedError;
use crate::layers::attention::QueryKeyAttentionMask;

/// Decoder output.
pub struct DecoderOutput {
    all_outputs: Vec<Tensor>,
}

impl DecoderOutput {
    /// Create a decoder output.
    ///
    /// The first output must be the output of the embedding layer.
    pub fn new(all_outputs: Vec<Tensor>) -> Self {
        Self { all_outputs }
    }
}

impl LayerOutputs for DecoderOutput {
    fn layer_outputs(&self) -> &[Tensor] {
        &self.all_outputs
    }

    fn embedding_layer_output(&self) -> Option<&Tensor> {
        self.all_outputs.first()
    }
}

/// Trait for decoders.
pub trait Decoder {
    /// Decode a target sequence against an encoded source sequence.
    ///
    /// * `piece_ids` - Target input sequence.
    ///   *Shape:* `(batch_size, target_len)`
    /// * `encoder_output` - Hidden representations of the encoded source
    ///   sequence, used as keys and values in cross-attention.
    ///   *Shape:* `(batch_size, source_len, width)`
    /// * `source_mask` - Attention mask of the source sequence.
    /// * `target_mask` - Attention mask of the target sequence.
    /// * `train` - Whether to train the model.
    fn forward_t(
        &self,
        piece_ids: &Tensor,
        encoder_output: &Tensor,
        source_mask: &QueryKeyAttentionMask,
        target_mask: &QueryKeyAttentionMask,
        train: bool,
    ) -> Result<DecoderOutput, BoxedError>;
}

/// Trait for decoder layers.
pub trait DecoderLayer {
    /// Apply the decoder layer to the given hidden representations.
    ///
    /// * `input` - Hidden representations to apply the layer to.
    ///   *Shape:* `(batch_size, target_len, width)`
    /// * `encoder_output` - Hidden representations of the encoded source
    ///   sequence, used as keys and values in cross-attention.
    ///   *Shape:* `(batch_size, source_len, width)`
    /// * `source_mask` - Attention mask of the source sequence.
    /// * `target_mask` - Attention mask of the target sequence.
    /// * `train` - Whether to train the layer.
    ///
    /// Returns: Layer output.
    /// *Shape:* `(batch_size, target_len, width)`
    fn forward_t(
        &self,
        input: &Tensor,
        encoder_output: &Tensor,
        source_mask: &QueryKeyAttentionMask,
        target_mask: &QueryKeyAttentionMask,
        train: bool,
    ) -> Result<Tensor, BoxedError>;
}

/// Trait for building decoder layers.
pub trait BuildDecoderLayer: Debug {
    /// Build a decoder layer.
    fn build_decoder_layer(&self, vb: VarBuilder) -> Result<Box<dyn DecoderLayer>, BoxedError>;
}
