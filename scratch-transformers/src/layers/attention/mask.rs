use candle_core::{DType, Tensor};
use snafu::{ensure, ResultExt, Snafu};

/// Value used to block attention logits.
///
/// Large enough in magnitude that `exp` underflows to zero in `f32`, so
/// blocked positions end up with zero attention weight after the softmax.
/// Underflows to `-inf` for more narrow floating point types, which is ok
/// for masking.
pub const MASKED_LOGIT_VALUE: f32 = f32::MIN;

#[derive(Debug, Snafu)]
pub enum QueryKeyAttentionMaskError {
    #[snafu(display("Cannot apply logits mask"))]
    ApplyLogitsMask { source: candle_core::Error },
}

/// Query-key attention mask.
///
/// A 4D attention mask broadcastable to *(batch_size, heads, query_len,
/// key_len)*. Elements for which the corresponding mask element is set to
/// `False` are ignored during attention calculation.
#[derive(Clone, Debug)]
pub struct QueryKeyAttentionMask {
    bool_mask: Tensor,
}

impl From<AttentionMask> for QueryKeyAttentionMask {
    fn from(attention_mask: AttentionMask) -> Self {
        QueryKeyAttentionMask::from(&attention_mask)
    }
}

impl From<&AttentionMask> for QueryKeyAttentionMask {
    fn from(attention_mask: &AttentionMask) -> Self {
        let (batch_len, key_len) = attention_mask
            .bool_mask
            .shape()
            .dims2()
            .expect("input mask must have two dimensions");
        QueryKeyAttentionMask {
            bool_mask: attention_mask
                .bool_mask
                .reshape((batch_len, 1, 1, key_len))
                .expect("Cannot reshape input mask"),
        }
    }
}

impl QueryKeyAttentionMask {
    /// Get the boolean mask.
    pub fn bool_mask(&self) -> &Tensor {
        &self.bool_mask
    }

    /// Use the attention mask to mask logits.
    ///
    /// * `input` - Tensor to which the mask is applied.
    ///   *Shape:* `(batch_size, heads, query_len, key_len)`
    ///
    /// Returns: Logits with the attention mask applied.
    /// *Shape:* `(batch_size, heads, query_len, key_len)`
    pub fn apply_logit_mask(&self, input: &Tensor) -> Result<Tensor, QueryKeyAttentionMaskError> {
        let blocked_value = Tensor::new(MASKED_LOGIT_VALUE, input.device())
            .and_then(|xs| xs.broadcast_as(input.shape()))
            .context(ApplyLogitsMaskSnafu)?;
        self.bool_mask
            .broadcast_as(input.shape())
            .and_then(|xs| xs.where_cond(input, &blocked_value))
            .context(ApplyLogitsMaskSnafu)
    }
}

/// Errors for attention masks.
#[derive(Debug, Snafu)]
pub enum AttentionMaskError {
    #[snafu(display("Attention mask must be 2D, was {}D", n_dims))]
    InvalidDims { n_dims: usize },
}

/// Attention mask.
///
/// Sequence elements for which the corresponding mask element is set to
/// `False` are ignored during attention calculation. Guaranteed to be
/// a 2D array.
#[derive(Clone, Debug)]
pub struct AttentionMask {
    bool_mask: Tensor,
}

impl AttentionMask {
    /// Create an input attention mask.
    ///
    /// * `bool_mask` - Boolean mask tensor.
    ///   *Shape:* `(batch_size, seq_len)`
    pub fn new(bool_mask: Tensor) -> Result<Self, AttentionMaskError> {
        let n_dims = bool_mask.dims().len();
        ensure!(n_dims == 2, InvalidDimsSnafu { n_dims });
        Ok(AttentionMask { bool_mask })
    }

    /// Get the boolean mask.
    pub fn bool_mask(&self) -> &Tensor {
        &self.bool_mask
    }
}

#[derive(Debug, Snafu)]
pub enum CausalMaskError {
    #[snafu(display("Cannot create causal mask"))]
    CreateMask { source: candle_core::Error },

    #[snafu(display("Piece identifiers have invalid number of dimensions"))]
    PieceIdsDim { source: candle_core::Error },
}

/// Trait for creating causal masks.
pub trait CausalMask: Sized {
    type Error;

    /// Create a causal mask for the given piece identifiers.
    ///
    /// A causal mask ensures that pieces cannot attend to succeeding pieces.
    ///
    /// * `piece_ids` - Piece identifiers.
    ///   *Shape:* `(batch_size, seq_len)`
    fn causal_mask(piece_ids: &Tensor) -> Result<Self, Self::Error>;
}

impl CausalMask for QueryKeyAttentionMask {
    type Error = CausalMaskError;

    fn causal_mask(piece_ids: &Tensor) -> Result<Self, Self::Error> {
        let (_, seq_len) = piece_ids.shape().dims2().context(PieceIdsDimSnafu)?;
        Ok(Self {
            bool_mask: Tensor::tril2(seq_len, DType::U32, piece_ids.device())
                .and_then(|mask| mask.reshape((1, 1, seq_len, seq_len)))
                .context(CreateMaskSnafu)?,
        })
    }
}
