mod mask;
pub use mask::{
    AttentionMask, AttentionMaskError, CausalMask, CausalMaskError, QueryKeyAttentionMask,
    QueryKeyAttentionMaskError, MASKED_LOGIT_VALUE,
};

mod sdpa;
pub use sdpa::{AttentionScorer, ScaledDotProductAttention, ScaledDotProductAttentionError};

mod self_attention;
pub use self_attention::{SelfAttention, SelfAttentionConfig, SelfAttentionError};
