/// Transformer decoder.
use candle_core::Tensor;
use candle_nn::VarBuilder;
use snafu::{ResultExt, Snafu};

use crate::architectures::{
    BuildArchitecture, BuildDecoderLayer, Decoder, DecoderLayer, DecoderOutput,
};
use crate::error::BoxedError;
use crate::layers::attention::QueryKeyAttentionMask;
use crate::layers::transformer::{
    TransformerEmbeddings, TransformerEmbeddingsConfig, TransformerEmbeddingsError,
    TransformerLayerConfig,
};

/// Transformer decoder configuration.
#[derive(Debug)]
pub struct TransformerDecoderConfig {
    embeddings: TransformerEmbeddingsConfig,
    layer: Box<dyn BuildDecoderLayer>,
    n_hidden_layers: usize,
}

impl TransformerDecoderConfig {
    /// Decoder embeddings.
    ///
    /// Default: `TransformerEmbeddingsConfig::default()`
    pub fn embeddings(mut self, embeddings: TransformerEmbeddingsConfig) -> Self {
        self.embeddings = embeddings;
        self
    }

    /// Decoder layer.
    ///
    /// Default: `TransformerLayerConfig::default()`
    pub fn layer(mut self, layer: Box<dyn BuildDecoderLayer>) -> Self {
        self.layer = layer;
        self
    }

    /// Number of hidden layers.
    ///
    /// Default: `6`
    pub fn n_hidden_layers(mut self, n_hidden_layers: usize) -> Self {
        self.n_hidden_layers = n_hidden_layers;
        self
    }
}

impl BuildArchitecture for TransformerDecoderConfig {
    type Architecture = TransformerDecoder;

    fn build(&self, vb: VarBuilder) -> Result<Self::Architecture, BoxedError> {
        let embeddings = self
            .embeddings
            .build(vb.push_prefix("embeddings"))
            .context(BuildTransformerEmbeddingsSnafu)?;

        let layers = (0..self.n_hidden_layers)
            .map(|n| {
                self.layer
                    .build_decoder_layer(vb.push_prefix(format!("layer_{n}")))
                    .context(BuildTransformerLayerSnafu)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TransformerDecoder { embeddings, layers })
    }
}

impl Default for TransformerDecoderConfig {
    fn default() -> Self {
        Self {
            embeddings: TransformerEmbeddingsConfig::default(),
            layer: Box::<TransformerLayerConfig>::default(),
            n_hidden_layers: 6,
        }
    }
}

/// Transformer decoder errors.
#[derive(Debug, Snafu)]
pub enum TransformerDecoderError {
    #[snafu(display("Cannot construct embeddings layer"))]
    BuildTransformerEmbeddings { source: TransformerEmbeddingsError },

    #[snafu(display("Cannot build transformer layer"))]
    BuildTransformerLayer { source: BoxedError },

    #[snafu(display("Cannot apply embeddings"))]
    Embeddings { source: TransformerEmbeddingsError },

    #[snafu(display("Cannot apply transformer layer"))]
    TransformerLayer { source: BoxedError },
}

/// Decoder using the transformer architecture.
///
/// The layers are held as an explicit ordered sequence and applied in a
/// fixed order. Every layer receives the encoder output for
/// cross-attention.
pub struct TransformerDecoder {
    embeddings: TransformerEmbeddings,
    layers: Vec<Box<dyn DecoderLayer>>,
}

impl Decoder for TransformerDecoder {
    fn forward_t(
        &self,
        piece_ids: &Tensor,
        encoder_output: &Tensor,
        source_mask: &QueryKeyAttentionMask,
        target_mask: &QueryKeyAttentionMask,
        train: bool,
    ) -> Result<DecoderOutput, BoxedError> {
        let mut layer_output = self
            .embeddings
            .forward(piece_ids, train)
            .context(EmbeddingsSnafu)?;

        let mut layer_outputs = Vec::with_capacity(self.layers.len() + 1);
        layer_outputs.push(layer_output.clone());

        for layer in &self.layers {
            layer_output = layer
                .forward_t(&layer_output, encoder_output, source_mask, target_mask, train)
                .context(TransformerLayerSnafu)?;
            layer_outputs.push(layer_output.clone());
        }

        Ok(DecoderOutput::new(layer_outputs))
    }
}
