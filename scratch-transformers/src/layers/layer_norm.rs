use candle_core::ModuleT;
use candle_nn::{layer_norm, LayerNormConfig as CandleLayerNormConfig, VarBuilder};

use crate::error::BoxedError;
use crate::layers::build_module::BuildModule;

/// Layer norm configuration.
#[derive(Clone, Debug)]
pub struct LayerNormConfig {
    affine: bool,
    eps: f64,
    size: usize,
}

impl LayerNormConfig {
    /// Whether to use an affine transformation.
    ///
    /// Default: `true`
    pub fn affine(mut self, affine: bool) -> Self {
        self.affine = affine;
        self
    }

    /// Epsilon value.
    ///
    /// Default: `1e-5`
    pub fn eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    /// Dimensionality of the layer.
    ///
    /// Default: `256`
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }
}

impl Default for LayerNormConfig {
    fn default() -> Self {
        Self {
            affine: true,
            eps: 1e-5,
            size: 256,
        }
    }
}

impl BuildModule for LayerNormConfig {
    fn build(&self, vb: VarBuilder) -> Result<Box<dyn ModuleT>, BoxedError> {
        Ok(Box::new(layer_norm(
            self.size,
            CandleLayerNormConfig {
                affine: self.affine,
                eps: self.eps,
                remove_mean: true,
            },
            vb,
        )?))
    }
}
