use std::f32::consts::{E, PI};

use burn::tensor::{backend::Backend, Distribution, Tensor};

/// Gaussian with elementwise (diagonal) parameters, the base law for every
/// continuous action distribution in this crate.
#[derive(Debug, Clone)]
pub struct Normal<B: Backend, const D: usize> {
    loc: Tensor<B, D>,
    scale: Tensor<B, D>,
}

impl<B: Backend, const D: usize> Normal<B, D> {
    /// # Panics
    /// Panics when any element of `scale` is not strictly positive.
    pub fn new(loc: Tensor<B, D>, scale: Tensor<B, D>) -> Self {
        assert!(
            scale.clone().greater_elem(0.0).all().into_scalar(),
            "scale>0 check failed. scale: {scale}"
        );

        Self { loc, scale }
    }

    pub fn mean(&self) -> Tensor<B, D> {
        self.loc.clone()
    }

    pub fn mode(&self) -> Tensor<B, D> {
        self.loc.clone()
    }

    pub fn variance(&self) -> Tensor<B, D> {
        self.scale.clone().powi_scalar(2)
    }

    pub fn stdev(&self) -> Tensor<B, D> {
        self.scale.clone()
    }

    pub fn sample(&self) -> Tensor<B, D> {
        self.rsample()
    }

    /// Reparameterised sample: gradients flow back into `loc` and `scale`.
    pub fn rsample(&self) -> Tensor<B, D> {
        let s = Tensor::random_like(&self.loc, Distribution::Normal(0.0, 1.0));

        s.mul(self.scale.clone()) + self.loc.clone()
    }

    /// Elementwise gaussian log density,
    /// `-(x - loc)^2 / (2 * scale^2) - log(scale) - log(sqrt(2 * pi))`.
    pub fn log_prob(&self, value: Tensor<B, D>) -> Tensor<B, D> {
        let log_scale = self.scale.clone().log();

        (value - self.loc.clone())
            .powi_scalar(2)
            .div_scalar(2)
            .div(self.variance())
            .mul_scalar(-1)
            .sub(log_scale)
            .sub_scalar((2.0 * PI).sqrt().log(E))
    }

    pub fn entropy(&self) -> Tensor<B, D> {
        self.scale
            .clone()
            .log()
            .add_scalar(0.5 + 0.5 * (2.0 * PI).log(E))
    }
}
