mod activation;
pub use activation::Activation;

pub mod attention;

pub mod build_module;

pub mod feedforward;

mod layer_norm;
pub use layer_norm::LayerNormConfig;

pub mod transformer;
