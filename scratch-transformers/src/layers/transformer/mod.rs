/// Transformer building blocks.
mod embeddings;
pub use embeddings::{
    TransformerEmbeddings, TransformerEmbeddingsConfig, TransformerEmbeddingsError,
};

mod layer;
pub use layer::{DecoderLayer, EncoderLayer, TransformerLayerConfig, TransformerLayerError};
