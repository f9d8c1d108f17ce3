/// Transformer architecture implementations.
mod decoder;
pub use decoder::{TransformerDecoder, TransformerDecoderConfig, TransformerDecoderError};

mod encoder;
pub use encoder::{TransformerEncoder, TransformerEncoderConfig, TransformerEncoderError};

mod seq2seq;
pub use seq2seq::{TransformerSeq2seq, TransformerSeq2seqConfig, TransformerSeq2seqError};
