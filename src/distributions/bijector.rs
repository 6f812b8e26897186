use burn::tensor::{backend::Backend, Tensor};

/// Bijective tanh transform, used to bound continuous actions to (-1, 1).
#[derive(Debug, Clone, Copy)]
pub struct TanhBijector {
    epsilon: f32,
}

impl Default for TanhBijector {
    fn default() -> Self {
        Self::new(1e-6)
    }
}

impl TanhBijector {
    pub fn new(epsilon: f32) -> Self {
        Self { epsilon }
    }

    pub fn forward<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
        x.tanh()
    }

    /// Inverse of tanh as `0.5 * (log1p(x) - log1p(-x))`, which is more
    /// stable near the boundaries than `0.5 * log((1 + x) / (1 - x))`.
    pub fn atanh<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
        (x.clone().log1p() - (-x).log1p()).mul_scalar(0.5)
    }

    /// Inverse with the input clamped away from -1 and 1 so the result
    /// stays finite.
    pub fn inverse<B: Backend, const D: usize>(y: Tensor<B, D>) -> Tensor<B, D> {
        let eps = f32::EPSILON;

        Self::atanh(y.clamp(-1.0 + eps, 1.0 - eps))
    }

    /// Log of the jacobian of the tanh change of variables,
    /// `log(1 - tanh(x)^2 + epsilon)`.
    pub fn log_prob_correction<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
    ) -> Tensor<B, D> {
        x.tanh()
            .powi_scalar(2)
            .mul_scalar(-1)
            .add_scalar(1.0 + self.epsilon)
            .log()
    }
}
