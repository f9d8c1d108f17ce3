use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{linear, Linear, VarBuilder};

/// Point-wise feed-forward layer (_Vaswani et al., 2017_).
///
/// This layer is applied pointwise, meaning that the same
/// transformation is applied to each sequence element. This
/// transformation is:
///
/// `g(xW_1 + b_1)W_2 + b_2`
///
/// `W_1` and `b_1` transform the input to an
/// intermediate width, `g` is a non-linear activation
/// function and `W_2` and `b_2` transform the
/// output of the activation back to the input width.
///
/// * _Vaswani et al., 2017_: https://arxiv.org/abs/1706.03762
pub struct PointwiseFeedForward {
    activation: Box<dyn ModuleT>,
    intermediate: Linear,
    output: Linear,
}

impl PointwiseFeedForward {
    /// Construct a point-wise feed-forward layer.
    ///
    /// * `vb` - Variable store.
    /// * `activation` - Non-linearity.
    /// * `hidden_width` - Hidden width, dimensionality of the layer input and output.
    /// * `intermediate_width` - Intermediate width inside the feed-forward layer.
    pub fn new(
        vb: VarBuilder,
        activation: Box<dyn ModuleT>,
        hidden_width: usize,
        intermediate_width: usize,
    ) -> Result<Self, candle_core::Error> {
        let intermediate = linear(
            hidden_width,
            intermediate_width,
            vb.push_prefix("intermediate"),
        )?;

        let output = linear(intermediate_width, hidden_width, vb.push_prefix("output"))?;

        Ok(Self {
            activation,
            intermediate,
            output,
        })
    }
}

impl ModuleT for PointwiseFeedForward {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, candle_core::Error> {
        self.output.forward(
            &self
                .activation
                .forward_t(&self.intermediate.forward(xs)?, train)?,
        )
    }
}
