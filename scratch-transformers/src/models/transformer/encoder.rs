/// Transformer encoder.
use candle_core::Tensor;
use candle_nn::VarBuilder;
use snafu::{ResultExt, Snafu};

use crate::architectures::{
    BuildArchitecture, BuildEncoderLayer, Encoder, EncoderLayer, EncoderOutput,
};
use crate::error::BoxedError;
use crate::layers::attention::QueryKeyAttentionMask;
use crate::layers::transformer::{
    TransformerEmbeddings, TransformerEmbeddingsConfig, TransformerEmbeddingsError,
    TransformerLayerConfig,
};

/// Transformer encoder configuration.
#[derive(Debug)]
pub struct TransformerEncoderConfig {
    embeddings: TransformerEmbeddingsConfig,
    layer: Box<dyn BuildEncoderLayer>,
    n_hidden_layers: usize,
}

impl TransformerEncoderConfig {
    /// Encoder embeddings.
    ///
    /// Default: `TransformerEmbeddingsConfig::default()`
    pub fn embeddings(mut self, embeddings: TransformerEmbeddingsConfig) -> Self {
        self.embeddings = embeddings;
        self
    }

    /// Encoder layer.
    ///
    /// Default: `TransformerLayerConfig::default()`
    pub fn layer(mut self, layer: Box<dyn BuildEncoderLayer>) -> Self {
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

impl BuildArchitecture for TransformerEncoderConfig {
    type Architecture = TransformerEncoder;

    fn build(&self, vb: VarBuilder) -> Result<Self::Architecture, BoxedError> {
        let embeddings = self
            .embeddings
            .build(vb.push_prefix("embeddings"))
            .context(BuildTransformerEmbeddingsSnafu)?;

        let layers = (0..self.n_hidden_layers)
            .map(|n| {
                self.layer
                    .build_encoder_layer(vb.push_prefix(format!("layer_{n}")))
                    .context(BuildTransformerLayerSnafu)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TransformerEncoder { embeddings, layers })
    }
}

impl Default for TransformerEncoderConfig {
    fn default() -> Self {
        Self {
            embeddings: TransformerEmbeddingsConfig::default(),
            layer: Box::<TransformerLayerConfig>::default(),
            n_hidden_layers: 6,
        }
    }
}

/// Transformer encoder errors.
#[derive(Debug, Snafu)]
pub enum TransformerEncoderError {
    #[snafu(display("Cannot construct embeddings layer"))]
    BuildTransformerEmbeddings { source: TransformerEmbeddingsError },

    #[snafu(display("Cannot build transformer layer"))]
    BuildTransformerLayer { source: BoxedError },

    #[snafu(display("Cannot apply embeddings"))]
    Embeddings { source: TransformerEmbeddingsError },

    #[snafu(display("Cannot apply transformer layer"))]
    TransformerLayer { source: BoxedError },
}

/// Encoder using the transformer architecture.
///
/// The layers are held as an explicit ordered sequence and applied in a
/// fixed order, each layer self-attending over the previous layer's output.
pub struct TransformerEncoder {
    embeddings: TransformerEmbeddings,
    layers: Vec<Box<dyn EncoderLayer>>,
}

impl Encoder for TransformerEncoder {
    fn forward_t(
        &self,
        piece_ids: &Tensor,
        attention_mask: &QueryKeyAttentionMask,
        train: bool,
    ) -> Result<EncoderOutput, BoxedError> {
        let mut layer_output = self
            .embeddings
            .forward(piece_ids, train)
            .context(EmbeddingsSnafu)?;

        let mut layer_outputs = Vec::with_capacity(self.layers.len() + 1);
        layer_outputs.push(layer_output.clone());

        for layer in &self.layers {
            layer_output = layer
                .forward_t(&layer_output, attention_mask, train)
                .context(TransformerLayerSnafu)?;
            layer_outputs.push(layer_output.clone());
        }

        Ok(EncoderOutput::new(layer_outputs))
    }
}
