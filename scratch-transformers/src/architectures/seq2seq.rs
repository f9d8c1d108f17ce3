use std::fmt::Debug;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::architectures::{BuildArchitecture, DecoderOutput, LayerOutputs};
use crate::error::BoxedError;

/// Sequence-to-sequence model output.
pub struct Seq2seqOutput {
    decoder_output: DecoderOutput,
    logits: Tensor,
}

impl Seq2seqOutput {
    /// Create a sequence-to-sequence model output.
    pub fn new(decoder_output: DecoderOutput, logits: Tensor) -> Self {
        Self {
            decoder_output,
            logits,
        }
    }

    /// Get the output of the decoder used by the model.
    pub fn decoder_output(&self) -> &DecoderOutput {
        &self.decoder_output
    }

    /// Get the logits over the target vocabulary.
    ///
    /// The logits are unnormalized probabilities. Applying softmax to the
    /// logits will give the probability distribution over the target
    /// vocabulary for each target position.
    pub fn logits(&self) -> &Tensor {
        &self.logits
    }
}

impl LayerOutputs for Seq2seqOutput {
    fn layer_outputs(&self) -> &[Tensor] {
        self.decoder_output.layer_outputs()
    }

    fn embedding_layer_output(&self) -> Option<&Tensor> {
        self.decoder_output.embedding_layer_output()
    }
}

/// Trait for building sequence-to-sequence models.
pub trait BuildSeq2seq: Debug {
    type Seq2seq: Seq2seq;

    /// Build a sequence-to-sequence model.
    fn build(&self, vb: VarBuilder) -> Result<Self::Seq2seq, BoxedError>;
}

impl<S> BuildSeq2seq for S
where
    S: BuildArchitecture + Debug,
    S::Architecture: Seq2seq,
{
    type Seq2seq = S::Architecture;

    fn build(&self, vb: VarBuilder) -> Result<Self::Seq2seq, BoxedError> {
        BuildArchitecture::build(self, vb)
    }
}

/// Trait for sequence-to-sequence models.
pub trait Seq2seq {
    /// Predict target-vocabulary logits for a source/target pair.
    ///
    /// Returns the decoder piece representations and the logits over the
    /// target vocabulary.
    ///
    /// * `source_ids` - Source input sequence.
    ///   *Shape:* `(batch_size, source_len)`
    /// * `target_ids` - Target input sequence.
    ///   *Shape:* `(batch_size, target_len)`
    /// * `train` - Whether to train the model.
    fn forward_t(
        &self,
        source_ids: &Tensor,
        target_ids: &Tensor,
        train: bool,
    ) -> Result<Seq2seqOutput, BoxedError>;
}
