/// Transformer sequence-to-sequence model.
use candle_core::{Module, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use snafu::{ResultExt, Snafu};

use crate::architectures::{
    BuildArchitecture, Decoder, Encoder, LayerOutputs, Seq2seq, Seq2seqOutput,
};
use crate::error::BoxedError;
use crate::layers::attention::{
    AttentionMask, AttentionMaskError, CausalMask, CausalMaskError, QueryKeyAttentionMask,
};
use crate::layers::transformer::{TransformerEmbeddingsConfig, TransformerLayerConfig};
use crate::models::transformer::{TransformerDecoderConfig, TransformerEncoderConfig};

/// Transformer sequence-to-sequence model configuration.
#[derive(Debug)]
pub struct TransformerSeq2seqConfig {
    dropout: f32,
    embed_width: usize,
    forward_expansion: usize,
    max_length: usize,
    n_heads: usize,
    n_layers: usize,
    source_pad_idx: u32,
    source_vocab_size: usize,
    target_pad_idx: u32,
    target_vocab_size: usize,
}

impl TransformerSeq2seqConfig {
    /// Dropout probability used throughout the model.
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

    /// Maximum supported sequence length.
    ///
    /// Default: `100`
    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Number of attention heads.
    ///
    /// Default: `8`
    pub fn n_heads(mut self, n_heads: usize) -> Self {
        self.n_heads = n_heads;
        self
    }

    /// Number of encoder and decoder layers.
    ///
    /// Default: `6`
    pub fn n_layers(mut self, n_layers: usize) -> Self {
        self.n_layers = n_layers;
        self
    }

    /// Padding piece in the source vocabulary.
    ///
    /// Default: `0`
    pub fn source_pad_idx(mut self, source_pad_idx: u32) -> Self {
        self.source_pad_idx = source_pad_idx;
        self
    }

    /// Size of the source vocabulary.
    ///
    /// Default: `1000`
    pub fn source_vocab_size(mut self, source_vocab_size: usize) -> Self {
        self.source_vocab_size = source_vocab_size;
        self
    }

    /// Padding piece in the target vocabulary.
    ///
    /// Default: `0`
    pub fn target_pad_idx(mut self, target_pad_idx: u32) -> Self {
        self.target_pad_idx = target_pad_idx;
        self
    }

    /// Size of the target vocabulary.
    ///
    /// Default: `1000`
    pub fn target_vocab_size(mut self, target_vocab_size: usize) -> Self {
        self.target_vocab_size = target_vocab_size;
        self
    }

    fn embeddings(&self, n_pieces: usize) -> TransformerEmbeddingsConfig {
        TransformerEmbeddingsConfig::default()
            .dropout(self.dropout)
            .embedding_width(self.embed_width)
            .n_pieces(n_pieces)
            .n_positions(self.max_length)
    }

    fn layer(&self) -> TransformerLayerConfig {
        TransformerLayerConfig::default()
            .dropout(self.dropout)
            .embed_width(self.embed_width)
            .forward_expansion(self.forward_expansion)
            .n_heads(self.n_heads)
    }
}

impl Default for TransformerSeq2seqConfig {
    fn default() -> Self {
        Self {
            dropout: 0.0,
            embed_width: 256,
            forward_expansion: 4,
            max_length: 100,
            n_heads: 8,
            n_layers: 6,
            source_pad_idx: 0,
            source_vocab_size: 1000,
            target_pad_idx: 0,
            target_vocab_size: 1000,
        }
    }
}

impl BuildArchitecture for TransformerSeq2seqConfig {
    type Architecture = TransformerSeq2seq;

    fn build(&self, vb: VarBuilder) -> Result<Self::Architecture, BoxedError> {
        let encoder = TransformerEncoderConfig::default()
            .embeddings(self.embeddings(self.source_vocab_size))
            .layer(Box::new(self.layer()))
            .n_hidden_layers(self.n_layers)
            .build(vb.push_prefix("encoder"))
            .context(BuildEncoderSnafu)?;

        let decoder = TransformerDecoderConfig::default()
            .embeddings(self.embeddings(self.target_vocab_size))
            .layer(Box::new(self.layer()))
            .n_hidden_layers(self.n_layers)
            .build(vb.push_prefix("decoder"))
            .context(BuildDecoderSnafu)?;

        Ok(TransformerSeq2seq {
            decoder: Box::new(decoder),
            encoder: Box::new(encoder),
            output: linear(
                self.embed_width,
                self.target_vocab_size,
                vb.push_prefix("output"),
            )
            .context(BuildOutputSnafu)?,
            source_pad_idx: self.source_pad_idx,
            target_pad_idx: self.target_pad_idx,
        })
    }
}

/// Transformer sequence-to-sequence model errors.
#[derive(Debug, Snafu)]
pub enum TransformerSeq2seqError {
    #[snafu(display("Cannot build decoder"))]
    BuildDecoder { source: BoxedError },

    #[snafu(display("Cannot build encoder"))]
    BuildEncoder { source: BoxedError },

    #[snafu(display("Cannot build output layer"))]
    BuildOutput { source: candle_core::Error },

    #[snafu(display("Cannot compute logits for the target vocabulary"))]
    ComputeLogits { source: candle_core::Error },

    #[snafu(display("Nothing to decode, the model does not have any layer outputs"))]
    NoLayers,

    #[snafu(display("Cannot create source mask"))]
    SourceMask { source: AttentionMaskError },

    #[snafu(display("Cannot compare source pieces against the padding piece"))]
    SourcePad { source: candle_core::Error },

    #[snafu(display("Cannot create target mask"))]
    TargetMask { source: CausalMaskError },
}

/// Transformer-based sequence-to-sequence model.
///
/// Composes a transformer encoder and decoder with an output projection to
/// target-vocabulary logits, and derives the attention masks from the
/// input sequences.
pub struct TransformerSeq2seq {
    decoder: Box<dyn Decoder>,
    encoder: Box<dyn Encoder>,
    output: Linear,
    source_pad_idx: u32,
    // Not applied to attention; the target mask is causality-only (see
    // `make_target_mask`).
    #[allow(dead_code)]
    target_pad_idx: u32,
}

impl TransformerSeq2seq {
    /// Create the source attention mask.
    ///
    /// Marks every source position that does not hold the padding piece.
    /// The mask blocks padding both in encoder self-attention and in
    /// decoder cross-attention.
    ///
    /// * `source_ids` - Source input sequence.
    ///   *Shape:* `(batch_size, source_len)`
    ///
    /// Returns: Source mask.
    /// *Shape:* `(batch_size, 1, 1, source_len)`
    pub fn make_source_mask(
        &self,
        source_ids: &Tensor,
    ) -> Result<QueryKeyAttentionMask, TransformerSeq2seqError> {
        let bool_mask = source_ids
            .ne(self.source_pad_idx)
            .context(SourcePadSnafu)?;
        Ok(AttentionMask::new(bool_mask)
            .context(SourceMaskSnafu)?
            .into())
    }

    /// Create the target attention mask.
    ///
    /// The mask is lower-triangular: a target position can attend to itself
    /// and preceding positions only. Trailing target padding is not masked
    /// out; padding positions are expected to be discounted downstream when
    /// the loss is calculated.
    ///
    /// * `target_ids` - Target input sequence.
    ///   *Shape:* `(batch_size, target_len)`
    ///
    /// Returns: Target mask.
    /// *Shape:* `(1, 1, target_len, target_len)`
    pub fn make_target_mask(
        &self,
        target_ids: &Tensor,
    ) -> Result<QueryKeyAttentionMask, TransformerSeq2seqError> {
        QueryKeyAttentionMask::causal_mask(target_ids).context(TargetMaskSnafu)
    }
}

impl Seq2seq for TransformerSeq2seq {
    fn forward_t(
        &self,
        source_ids: &Tensor,
        target_ids: &Tensor,
        train: bool,
    ) -> Result<Seq2seqOutput, BoxedError> {
        let source_mask = self.make_source_mask(source_ids)?;
        let target_mask = self.make_target_mask(target_ids)?;

        let encoder_output = self.encoder.forward_t(source_ids, &source_mask, train)?;
        let last_encoder_layer = encoder_output
            .layer_outputs()
            .last()
            .ok_or(TransformerSeq2seqError::NoLayers)?;

        let decoder_output = self.decoder.forward_t(
            target_ids,
            last_encoder_layer,
            &source_mask,
            &target_mask,
            train,
        )?;
        let last_layer = decoder_output
            .layer_outputs()
            .last()
            .ok_or(TransformerSeq2seqError::NoLayers)?;

        let logits = self
            .output
            .forward(last_layer)
            .context(ComputeLogitsSnafu)?;

        Ok(Seq2seqOutput::new(decoder_output, logits))
    }
}
