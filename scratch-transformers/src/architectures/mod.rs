/// Traits for model architectures.
use candle_nn::VarBuilder;

mod decoder;
pub use decoder::{BuildDecoderLayer, Decoder, DecoderLayer, DecoderOutput};

mod encoder;
pub use encoder::{BuildEncoderLayer, Encoder, EncoderLayer, EncoderOutput};

mod output;
pub use output::LayerOutputs;

mod seq2seq;
pub use seq2seq::{BuildSeq2seq, Seq2seq, Seq2seqOutput};

use crate::error::BoxedError;

/// Trait for building model architectures.
pub trait BuildArchitecture {
    /// The architecture to build.
    type Architecture;

    /// Build the architecture.
    fn build(&self, vb: VarBuilder) -> Result<Self::Architecture, BoxedError>;
}
