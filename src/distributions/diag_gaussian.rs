use burn::{
    module::Param,
    nn::{Linear, LinearConfig},
    tensor::{backend::Backend, Shape, Tensor},
};

use super::{
    bijector::TanhBijector,
    distribution::{sum_independent_dims, ActionDistribution},
    normal::Normal,
};

/// Gaussian with diagonal covariance over continuous action vectors.
///
/// The family owns static configuration only; every forward pass builds a
/// fresh [`DiagGaussian`] state from the current network outputs.
#[derive(Debug, Clone)]
pub struct DiagGaussianDistribution {
    action_dim: usize,
}

impl DiagGaussianDistribution {
    pub fn new(action_dim: usize) -> Self {
        Self { action_dim }
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    /// Builds the trainable head: a linear map from latent features to the
    /// per-dimension mean, and a learnable log standard deviation
    /// (typically initialised to 0.0). The caller registers both with its
    /// policy module so the optimiser sees them.
    pub fn proba_distribution_net<B: Backend>(
        &self,
        latent_dim: usize,
        log_std_init: f32,
        device: &B::Device,
    ) -> (Linear<B>, Param<Tensor<B, 1>>) {
        let mean_actions = LinearConfig::new(latent_dim, self.action_dim).init(device);
        let log_std = Param::from_tensor(
            Tensor::ones(Shape::new([self.action_dim]), device).mul_scalar(log_std_init),
        );

        (mean_actions, log_std)
    }

    /// Builds distribution state from the current parameters.
    ///
    /// # Shapes
    /// mean_actions: (batch, action_dim)
    /// log_std: (action_dim)
    pub fn proba_distribution<B: Backend>(
        &self,
        mean_actions: Tensor<B, 2>,
        log_std: Tensor<B, 1>,
    ) -> DiagGaussian<B> {
        let std: Tensor<B, 2> = log_std.exp().unsqueeze_dim(0);
        let action_std = mean_actions.ones_like().mul(std);

        DiagGaussian {
            dist: Normal::new(mean_actions, action_std),
        }
    }

    pub fn actions_from_params<B: Backend>(
        &self,
        mean_actions: Tensor<B, 2>,
        log_std: Tensor<B, 1>,
        deterministic: bool,
    ) -> Tensor<B, 2> {
        let mut dist = self.proba_distribution(mean_actions, log_std);

        dist.get_actions(deterministic)
    }

    /// Returns a fresh sample together with its log probability.
    pub fn log_prob_from_params<B: Backend>(
        &self,
        mean_actions: Tensor<B, 2>,
        log_std: Tensor<B, 1>,
    ) -> (Tensor<B, 2>, Tensor<B, 1>) {
        let mut dist = self.proba_distribution(mean_actions, log_std);
        let actions = dist.sample();
        let log_prob = dist.log_prob(actions.clone());

        (actions, log_prob)
    }
}

/// Constructed diagonal gaussian state for one forward pass.
#[derive(Debug, Clone)]
pub struct DiagGaussian<B: Backend> {
    dist: Normal<B, 2>,
}

impl<B: Backend> ActionDistribution<B> for DiagGaussian<B> {
    type Action = Tensor<B, 2>;

    fn mode(&mut self) -> Tensor<B, 2> {
        self.dist.mode()
    }

    fn sample(&mut self) -> Tensor<B, 2> {
        self.dist.rsample()
    }

    fn log_prob(&self, actions: Tensor<B, 2>) -> Tensor<B, 1> {
        sum_independent_dims(self.dist.log_prob(actions))
    }

    fn entropy(&self) -> Option<Tensor<B, 1>> {
        Some(sum_independent_dims(self.dist.entropy()))
    }
}

/// Diagonal gaussian squashed through tanh so actions live in (-1, 1),
/// as used by SAC.
#[derive(Debug, Clone)]
pub struct SquashedDiagGaussianDistribution {
    gaussian: DiagGaussianDistribution,
    epsilon: f32,
}

impl SquashedDiagGaussianDistribution {
    pub fn new(action_dim: usize) -> Self {
        Self::with_epsilon(action_dim, 1e-6)
    }

    pub fn with_epsilon(action_dim: usize, epsilon: f32) -> Self {
        Self {
            gaussian: DiagGaussianDistribution::new(action_dim),
            epsilon,
        }
    }

    pub fn action_dim(&self) -> usize {
        self.gaussian.action_dim()
    }

    pub fn proba_distribution_net<B: Backend>(
        &self,
        latent_dim: usize,
        log_std_init: f32,
        device: &B::Device,
    ) -> (Linear<B>, Param<Tensor<B, 1>>) {
        self.gaussian
            .proba_distribution_net(latent_dim, log_std_init, device)
    }

    /// Builds distribution state from the current parameters. The state
    /// caches the pre-squash sample of the last `sample`/`mode` call so
    /// log probabilities can skip the lossy tanh inversion.
    pub fn proba_distribution<B: Backend>(
        &self,
        mean_actions: Tensor<B, 2>,
        log_std: Tensor<B, 1>,
    ) -> SquashedGaussian<B> {
        SquashedGaussian {
            dist: self.gaussian.proba_distribution(mean_actions, log_std),
            gaussian_actions: None,
            epsilon: self.epsilon,
        }
    }

    pub fn actions_from_params<B: Backend>(
        &self,
        mean_actions: Tensor<B, 2>,
        log_std: Tensor<B, 1>,
        deterministic: bool,
    ) -> Tensor<B, 2> {
        let mut dist = self.proba_distribution(mean_actions, log_std);

        dist.get_actions(deterministic)
    }

    /// Returns a fresh sample together with its log probability, computed
    /// from the cached pre-squash sample rather than the bijector inverse.
    pub fn log_prob_from_params<B: Backend>(
        &self,
        mean_actions: Tensor<B, 2>,
        log_std: Tensor<B, 1>,
    ) -> (Tensor<B, 2>, Tensor<B, 1>) {
        let mut dist = self.proba_distribution(mean_actions, log_std);
        let actions = dist.sample();
        let log_prob = dist.log_prob_from_gaussian(actions.clone(), dist.gaussian_actions());

        (actions, log_prob)
    }
}

/// Constructed squashed gaussian state for one forward pass.
#[derive(Debug, Clone)]
pub struct SquashedGaussian<B: Backend> {
    dist: DiagGaussian<B>,
    gaussian_actions: Option<Tensor<B, 2>>,
    epsilon: f32,
}

impl<B: Backend> SquashedGaussian<B> {
    /// The pre-squash gaussian sample cached by the last `sample`/`mode`.
    pub fn gaussian_actions(&self) -> Option<Tensor<B, 2>> {
        self.gaussian_actions.clone()
    }

    /// Log probability of squashed actions. When the caller still holds
    /// the pre-squash sample, passing it back avoids inverting tanh on the
    /// clamped boundary.
    pub fn log_prob_from_gaussian(
        &self,
        actions: Tensor<B, 2>,
        gaussian_actions: Option<Tensor<B, 2>>,
    ) -> Tensor<B, 1> {
        let gaussian_actions =
            gaussian_actions.unwrap_or_else(|| TanhBijector::inverse(actions.clone()));

        let log_prob = self.dist.log_prob(gaussian_actions);

        // Squash correction (from original SAC implementation)
        // this comes from the fact that tanh is bijective and differentiable
        log_prob
            - sum_independent_dims(
                actions
                    .powi_scalar(2)
                    .mul_scalar(-1)
                    .add_scalar(1.0 + self.epsilon)
                    .log(),
            )
    }
}

impl<B: Backend> ActionDistribution<B> for SquashedGaussian<B> {
    type Action = Tensor<B, 2>;

    fn mode(&mut self) -> Tensor<B, 2> {
        let gaussian_actions = self.dist.mode();
        self.gaussian_actions = Some(gaussian_actions.clone());

        gaussian_actions.tanh()
    }

    fn sample(&mut self) -> Tensor<B, 2> {
        let gaussian_actions = self.dist.sample();
        self.gaussian_actions = Some(gaussian_actions.clone());

        gaussian_actions.tanh()
    }

    fn log_prob(&self, actions: Tensor<B, 2>) -> Tensor<B, 1> {
        self.log_prob_from_gaussian(actions, None)
    }

    fn entropy(&self) -> Option<Tensor<B, 1>> {
        None
    }
}
