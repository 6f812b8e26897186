use burn::{
    module::Param,
    nn::{Linear, LinearConfig},
    tensor::{backend::Backend, Shape, Tensor},
};

use crate::DistributionError;

use super::{
    bijector::TanhBijector,
    distribution::{sum_independent_dims, ActionDistribution},
    normal::Normal,
};

/// Options for [`StateDependentNoiseDistribution`].
#[derive(Debug, Clone)]
pub struct StateDependentNoiseOptions {
    /// Whether to use (latent_sde_dim x action_dim) parameters for the
    /// standard deviation, or only (latent_sde_dim x 1)
    pub full_std: bool,

    /// Use expln() instead of exp() when computing the standard deviation,
    /// keeping it positive without growing unbounded
    pub use_expln: bool,

    /// Whether to squash actions to (-1, 1) with a tanh bijector
    pub squash_output: bool,

    /// Whether gradients flow through the noise features, letting
    /// backpropagation shape the exploration magnitude
    pub learn_features: bool,

    /// Small value to avoid NaN from log(0) and division by zero
    pub epsilon: f32,
}

impl Default for StateDependentNoiseOptions {
    fn default() -> Self {
        Self {
            full_std: true,
            use_expln: false,
            squash_output: false,
            learn_features: false,
            epsilon: 1e-6,
        }
    }
}

/// Gaussian distribution whose exploration noise is a learned linear
/// function of the policy features (state-dependent exploration), yielding
/// temporally consistent exploration.
///
/// Usage follows a staged protocol: [`Self::proba_distribution_net`] builds
/// the trainable head and seeds the exploration state,
/// [`Self::sample_weights`] refreshes that state once per rollout, and
/// [`Self::proba_distribution`] builds per-forward-pass state from it.
#[derive(Debug, Clone)]
pub struct StateDependentNoiseDistribution<B: Backend> {
    action_dim: usize,
    full_std: bool,
    use_expln: bool,
    learn_features: bool,
    epsilon: f32,
    bijector: Option<TanhBijector>,
    latent_sde_dim: Option<usize>,
    exploration_mat: Option<Tensor<B, 2>>,
    exploration_matrices: Option<Tensor<B, 3>>,
}

impl<B: Backend> StateDependentNoiseDistribution<B> {
    pub fn new(action_dim: usize, options: StateDependentNoiseOptions) -> Self {
        let bijector = options
            .squash_output
            .then(|| TanhBijector::new(options.epsilon));

        Self {
            action_dim,
            full_std: options.full_std,
            use_expln: options.use_expln,
            learn_features: options.learn_features,
            epsilon: options.epsilon,
            bijector,
            latent_sde_dim: None,
            exploration_mat: None,
            exploration_matrices: None,
        }
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    /// Standard deviation from the learned parameter.
    ///
    /// With `use_expln`, the transform is `exp(log_std)` for entries at or
    /// below zero and `log1p(log_std) + 1` above, combined with elementwise
    /// masks so every entry follows its own branch. The result is strictly
    /// positive and continuous at zero, and stays finite where plain `exp`
    /// would overflow.
    ///
    /// # Shapes
    /// log_std: (latent_sde_dim, action_dim) or (latent_sde_dim, 1)
    /// return: (latent_sde_dim, action_dim)
    pub fn get_std(&self, log_std: Tensor<B, 2>) -> Tensor<B, 2> {
        let [latent_sde_dim, _] = log_std.dims();
        let device = log_std.device();

        let std = if self.use_expln {
            // clamp each branch's input so the masked-out entries stay
            // finite, exp overflows f32 past ~88.7 and inf * 0 is NaN
            let below_threshold = log_std
                .clone()
                .clamp_max(0.0)
                .exp()
                .mul(log_std.clone().lower_equal_elem(0.0).float());
            let positive_mask = log_std.clone().greater_elem(0.0).float();
            let above_threshold = log_std
                .clamp_min(0.0)
                .add_scalar(self.epsilon)
                .log1p()
                .add_scalar(1.0)
                .mul(positive_mask);

            below_threshold + above_threshold
        } else {
            log_std.exp()
        };

        if self.full_std {
            return std;
        }

        // (latent_sde_dim, 1) -> (latent_sde_dim, action_dim)
        Tensor::ones(Shape::new([latent_sde_dim, self.action_dim]), &device).mul(std)
    }

    /// Draws a fresh exploration matrix, plus `batch_size` independent
    /// matrices for vectorised per-sample noise. Exploration is frozen
    /// until the next call; the caller decides when that happens,
    /// typically once per rollout.
    ///
    /// # Shapes
    /// log_std: (latent_sde_dim, action_dim) or (latent_sde_dim, 1)
    pub fn sample_weights(&mut self, log_std: Tensor<B, 2>, batch_size: usize) {
        let std = self.get_std(log_std);
        let weights_dist = Normal::new(std.zeros_like(), std.clone());

        tracing::debug!("resampling exploration matrices (batch_size: {batch_size})");

        // Reparametrization trick to pass gradients
        self.exploration_mat = Some(weights_dist.rsample());

        // Pre-compute matrices in case of parallel exploration
        let batched_std: Tensor<B, 3> = std.unsqueeze_dim(0).repeat_dim(0, batch_size);
        let batched_weights_dist = Normal::new(batched_std.zeros_like(), batched_std);
        self.exploration_matrices = Some(batched_weights_dist.rsample());
    }

    /// Builds the trainable head: a linear map for the deterministic mean
    /// action and the noise log-deviation parameter (typically initialised
    /// to -2.0). Records the noise feature dimension and seeds the
    /// exploration state.
    ///
    /// `latent_sde_dim` defaults to `latent_dim`; it differs when the noise
    /// is computed from different features than the policy mean.
    pub fn proba_distribution_net(
        &mut self,
        latent_dim: usize,
        log_std_init: f32,
        latent_sde_dim: Option<usize>,
        device: &B::Device,
    ) -> (Linear<B>, Param<Tensor<B, 2>>) {
        // Network for the deterministic part of the action
        let mean_actions = LinearConfig::new(latent_dim, self.action_dim).init(device);

        let latent_sde_dim = latent_sde_dim.unwrap_or(latent_dim);
        self.latent_sde_dim = Some(latent_sde_dim);

        // Reduce the number of parameters if needed
        let std_dim = if self.full_std { self.action_dim } else { 1 };
        let log_std =
            Tensor::ones(Shape::new([latent_sde_dim, std_dim]), device).mul_scalar(log_std_init);

        self.sample_weights(log_std.clone(), 1);

        (mean_actions, Param::from_tensor(log_std))
    }

    /// Builds distribution state from the current parameters and features.
    /// Fails while the exploration state has not been seeded
    /// (`proba_distribution_net` or `sample_weights` must run first).
    ///
    /// # Shapes
    /// mean_actions: (batch, action_dim)
    /// log_std: (latent_sde_dim, action_dim) or (latent_sde_dim, 1)
    /// latent_sde: (batch, latent_sde_dim)
    pub fn proba_distribution(
        &self,
        mean_actions: Tensor<B, 2>,
        log_std: Tensor<B, 2>,
        latent_sde: Tensor<B, 2>,
    ) -> Result<StateDependentNoise<B>, DistributionError> {
        let (exploration_mat, exploration_matrices) =
            match (&self.exploration_mat, &self.exploration_matrices) {
                (Some(mat), Some(matrices)) => (mat.clone(), matrices.clone()),
                _ => {
                    return Err(DistributionError::Precondition {
                        op: "proba_distribution",
                        requires: "sample_weights",
                    })
                }
            };

        // Stop gradient if we don't want to influence the features
        let latent_sde = if self.learn_features {
            latent_sde
        } else {
            latent_sde.detach()
        };

        let std = self.get_std(log_std);
        let variance = latent_sde.clone().powi_scalar(2).matmul(std.powi_scalar(2));
        let dist = Normal::new(mean_actions, variance.add_scalar(self.epsilon).sqrt());

        Ok(StateDependentNoise {
            dist,
            latent_sde,
            exploration_mat,
            exploration_matrices,
            bijector: self.bijector,
            learn_features: self.learn_features,
        })
    }

    pub fn actions_from_params(
        &self,
        mean_actions: Tensor<B, 2>,
        log_std: Tensor<B, 2>,
        latent_sde: Tensor<B, 2>,
        deterministic: bool,
    ) -> Result<Tensor<B, 2>, DistributionError> {
        let mut dist = self.proba_distribution(mean_actions, log_std, latent_sde)?;

        Ok(dist.get_actions(deterministic))
    }

    /// Returns a fresh sample together with its log probability.
    pub fn log_prob_from_params(
        &self,
        mean_actions: Tensor<B, 2>,
        log_std: Tensor<B, 2>,
        latent_sde: Tensor<B, 2>,
    ) -> Result<(Tensor<B, 2>, Tensor<B, 1>), DistributionError> {
        let mut dist = self.proba_distribution(mean_actions, log_std, latent_sde)?;
        let actions = dist.sample();
        let log_prob = dist.log_prob(actions.clone());

        Ok((actions, log_prob))
    }
}

/// Constructed state-dependent-noise state for one forward pass.
///
/// Holds the exploration matrices current at construction; resampling the
/// family's weights affects subsequently constructed states only.
#[derive(Debug, Clone)]
pub struct StateDependentNoise<B: Backend> {
    dist: Normal<B, 2>,
    latent_sde: Tensor<B, 2>,
    exploration_mat: Tensor<B, 2>,
    exploration_matrices: Tensor<B, 3>,
    bijector: Option<TanhBijector>,
    learn_features: bool,
}

impl<B: Backend> StateDependentNoise<B> {
    /// Noise for the given features.
    ///
    /// Falls back to the single shared exploration matrix when only one
    /// sample is requested or the batch does not line up with the
    /// pre-computed matrices, sharing noise across the batch instead of
    /// failing.
    pub fn get_noise(&self, latent_sde: Tensor<B, 2>) -> Tensor<B, 2> {
        let latent_sde = if self.learn_features {
            latent_sde
        } else {
            latent_sde.detach()
        };

        let batch_size = latent_sde.dims()[0];
        let n_matrices = self.exploration_matrices.dims()[0];

        // Default case: only one exploration matrix
        if batch_size == 1 || batch_size != n_matrices {
            return latent_sde.matmul(self.exploration_mat.clone());
        }

        // Use batch matrix multiplication for efficient computation
        // (batch_size, latent_sde_dim) -> (batch_size, 1, latent_sde_dim)
        let latent_sde: Tensor<B, 3> = latent_sde.unsqueeze_dim(1);
        // (batch_size, 1, action_dim)
        let noise = latent_sde.matmul(self.exploration_matrices.clone());

        noise.squeeze(1)
    }
}

impl<B: Backend> ActionDistribution<B> for StateDependentNoise<B> {
    type Action = Tensor<B, 2>;

    fn mode(&mut self) -> Tensor<B, 2> {
        let actions = self.dist.mean();

        if self.bijector.is_some() {
            TanhBijector::forward(actions)
        } else {
            actions
        }
    }

    fn sample(&mut self) -> Tensor<B, 2> {
        let noise = self.get_noise(self.latent_sde.clone());
        let actions = self.dist.mean() + noise;

        if self.bijector.is_some() {
            TanhBijector::forward(actions)
        } else {
            actions
        }
    }

    fn log_prob(&self, actions: Tensor<B, 2>) -> Tensor<B, 1> {
        let gaussian_actions = if self.bijector.is_some() {
            TanhBijector::inverse(actions)
        } else {
            actions
        };

        let log_prob = sum_independent_dims(self.dist.log_prob(gaussian_actions.clone()));

        match &self.bijector {
            // Squash correction
            Some(bijector) => {
                log_prob - sum_independent_dims(bijector.log_prob_correction(gaussian_actions))
            }
            None => log_prob,
        }
    }

    fn entropy(&self) -> Option<Tensor<B, 1>> {
        if self.bijector.is_some() {
            // No analytical form,
            // entropy needs to be estimated using -log_prob.mean()
            return None;
        }

        Some(sum_independent_dims(self.dist.entropy()))
    }
}

#[cfg(test)]
mod test {
    use assert_approx_eq::assert_approx_eq;
    use burn::{
        backend::{Autodiff, NdArray},
        tensor::{Distribution, ElementConversion, Shape, Tensor},
    };

    use crate::{
        distributions::{
            distribution::ActionDistribution,
            sde::{StateDependentNoiseDistribution, StateDependentNoiseOptions},
        },
        DistributionError,
    };

    fn family<B: burn::tensor::backend::Backend>(
        options: StateDependentNoiseOptions,
    ) -> StateDependentNoiseDistribution<B> {
        StateDependentNoiseDistribution::new(2, options)
    }

    #[test]
    fn test_get_std_expln_positive_and_continuous() {
        type Backend = NdArray;

        let dist = family::<Backend>(StateDependentNoiseOptions {
            use_expln: true,
            ..Default::default()
        });

        let log_std = Tensor::<Backend, 2>::from_floats(
            [[-20.0, -2.0], [0.0, 0.5], [1.0, 3.0]],
            &Default::default(),
        );
        let std = dist.get_std(log_std);

        assert!(std.clone().greater_elem(0.0).all().into_scalar());

        // exp on and below zero, log1p(x) + 1 above
        let std: Vec<f32> = std.into_data().iter::<f32>().collect();
        assert_approx_eq!(std[1], (-2.0f32).exp(), 1e-5);
        assert_approx_eq!(std[2], 1.0, 1e-5);
        assert_approx_eq!(std[4], 2.0f32.ln() + 1.0, 1e-4);
        assert_approx_eq!(std[5], 4.0f32.ln() + 1.0, 1e-4);

        // continuous across the branch point
        let left = dist
            .get_std(Tensor::from_floats([[-1e-4]], &Default::default()))
            .into_scalar()
            .elem::<f32>();
        let right = dist
            .get_std(Tensor::from_floats([[1e-4]], &Default::default()))
            .into_scalar()
            .elem::<f32>();
        assert_approx_eq!(left, right, 1e-3);
    }

    #[test]
    fn test_get_std_expln_finite_at_large_log_std() {
        type Backend = NdArray;

        let mut dist = family::<Backend>(StateDependentNoiseOptions {
            use_expln: true,
            ..Default::default()
        });

        // exp alone overflows f32 past ~88.7; expln stays finite there
        let log_std = Tensor::<Backend, 2>::from_floats(
            [[80.0, 88.7], [89.0, 100.0], [1e6, 3.0]],
            &Default::default(),
        );
        let std: Vec<f32> = dist
            .get_std(log_std.clone())
            .into_data()
            .iter::<f32>()
            .collect();

        for v in &std {
            assert!(v.is_finite());
            assert!(*v > 0.0);
        }

        // still log1p(log_std) + 1 on the explosive side
        assert_approx_eq!(std[3], 101.0f32.ln() + 1.0, 1e-4);
        assert_approx_eq!(std[4], 1_000_001.0f32.ln() + 1.0, 1e-3);

        // weight sampling over the same parameter stays panic-free
        dist.sample_weights(log_std, 2);
        assert!(dist.exploration_mat.is_some());
    }

    #[test]
    fn test_get_std_reduced_parameterisation() {
        type Backend = NdArray;

        let dist = family::<Backend>(StateDependentNoiseOptions {
            full_std: false,
            ..Default::default()
        });

        let log_std = Tensor::<Backend, 2>::from_floats([[0.0], [-1.0], [1.0]], &Default::default());
        let std = dist.get_std(log_std);

        assert_eq!(std.dims(), [3, 2]);

        // each row broadcasts its single parameter across the action dim
        let std: Vec<f32> = std.into_data().iter::<f32>().collect();
        assert_approx_eq!(std[0], std[1], 1e-6);
        assert_approx_eq!(std[2], std[3], 1e-6);
        assert_approx_eq!(std[2], (-1.0f32).exp(), 1e-5);
    }

    #[test]
    fn test_proba_distribution_requires_sampled_weights() {
        type Backend = NdArray;

        let dist = family::<Backend>(Default::default());

        let mean = Tensor::<Backend, 2>::zeros(Shape::new([1, 2]), &Default::default());
        let log_std = Tensor::<Backend, 2>::zeros(Shape::new([3, 2]), &Default::default());
        let latent = Tensor::<Backend, 2>::zeros(Shape::new([1, 3]), &Default::default());

        let result = dist.proba_distribution(mean, log_std, latent);

        assert!(matches!(
            result,
            Err(DistributionError::Precondition { .. })
        ));
    }

    #[test]
    fn test_net_seeds_exploration_state() {
        type Backend = NdArray;

        let mut dist = family::<Backend>(Default::default());
        let (net, log_std) = dist.proba_distribution_net(4, -2.0, None, &Default::default());

        assert_eq!(log_std.val().dims(), [4, 2]);
        assert!(dist.exploration_mat.is_some());
        assert!(dist.exploration_matrices.is_some());

        let latent = Tensor::<Backend, 2>::random(
            Shape::new([3, 4]),
            Distribution::Normal(0.0, 1.0),
            &Default::default(),
        );
        let mean = net.forward(latent.clone());

        let mut state = dist
            .proba_distribution(mean.clone(), log_std.val(), latent)
            .unwrap();

        assert_eq!(state.sample().dims(), [3, 2]);
        assert!(state.mode().equal(mean).all().into_scalar());
        assert!(state.entropy().is_some());
    }

    #[test]
    fn test_reduced_std_net_shape() {
        type Backend = NdArray;

        let mut dist = family::<Backend>(StateDependentNoiseOptions {
            full_std: false,
            ..Default::default()
        });
        let (_, log_std) = dist.proba_distribution_net(4, -2.0, None, &Default::default());

        assert_eq!(log_std.val().dims(), [4, 1]);
    }

    #[test]
    fn test_entropy_value_matches_noise_variance() {
        type Backend = NdArray;

        let mut dist = family::<Backend>(Default::default());
        let (_, log_std) = dist.proba_distribution_net(3, 0.0, None, &Default::default());

        let mean = Tensor::<Backend, 2>::zeros(Shape::new([1, 2]), &Default::default());
        let latent = Tensor::<Backend, 2>::ones(Shape::new([1, 3]), &Default::default());

        let state = dist.proba_distribution(mean, log_std.val(), latent).unwrap();

        // variance = latent^2 @ std^2 = 3 per action dim, so the summed
        // entropy is 2 * (0.5 * ln(3) + 0.5 + 0.5 * ln(2 * pi))
        let entropy = state.entropy().unwrap().into_scalar().elem::<f32>();
        assert_approx_eq!(entropy, 2.0 * (0.5 * 3.0f32.ln() + 1.418_938_5), 1e-3);

        // log_prob at the mean only carries the normalisation terms
        let log_prob = state
            .log_prob(Tensor::zeros(Shape::new([1, 2]), &Default::default()))
            .into_scalar()
            .elem::<f32>();
        assert_approx_eq!(
            log_prob,
            -2.0 * (0.5 * 3.0f32.ln() + 0.918_938_5),
            1e-3
        );
    }

    #[test]
    fn test_get_noise_batch_fallback() {
        type Backend = NdArray;

        let mut dist = family::<Backend>(Default::default());
        let (_, log_std) = dist.proba_distribution_net(3, -1.0, None, &Default::default());

        // four per-sample matrices, but a batch of two rows
        dist.sample_weights(log_std.val(), 4);

        let mean = Tensor::<Backend, 2>::zeros(Shape::new([2, 2]), &Default::default());
        let latent = Tensor::<Backend, 2>::from_floats(
            [[1.0, 0.0, -1.0], [0.5, 0.5, 0.5]],
            &Default::default(),
        );

        let state = dist
            .proba_distribution(mean, log_std.val(), latent.clone())
            .unwrap();

        let noise = state.get_noise(latent.clone());
        let expected = latent.matmul(state.exploration_mat.clone());

        assert!((noise - expected)
            .abs()
            .lower_elem(1e-6)
            .all()
            .into_scalar());
    }

    #[test]
    fn test_get_noise_per_sample_matrices() {
        type Backend = NdArray;

        let mut dist = family::<Backend>(Default::default());
        let (_, log_std) = dist.proba_distribution_net(3, -1.0, None, &Default::default());

        dist.sample_weights(log_std.val(), 2);

        let mean = Tensor::<Backend, 2>::zeros(Shape::new([2, 2]), &Default::default());
        let latent = Tensor::<Backend, 2>::from_floats(
            [[1.0, 0.0, -1.0], [0.5, 0.5, 0.5]],
            &Default::default(),
        );

        let state = dist
            .proba_distribution(mean, log_std.val(), latent.clone())
            .unwrap();
        let noise = state.get_noise(latent.clone());

        assert_eq!(noise.dims(), [2, 2]);

        // every row multiplies against its own matrix
        for i in 0..2 {
            let row = latent.clone().slice([i..i + 1, 0..3]);
            let matrix: Tensor<Backend, 2> = state
                .exploration_matrices
                .clone()
                .slice([i..i + 1, 0..3, 0..2])
                .squeeze(0);
            let expected = row.matmul(matrix);

            assert!((noise.clone().slice([i..i + 1, 0..2]) - expected)
                .abs()
                .lower_elem(1e-6)
                .all()
                .into_scalar());
        }
    }

    #[test]
    fn test_squashed_sde_bounds_and_entropy() {
        type Backend = NdArray;

        let mut dist = family::<Backend>(StateDependentNoiseOptions {
            squash_output: true,
            ..Default::default()
        });
        let (net, log_std) = dist.proba_distribution_net(3, 0.5, None, &Default::default());

        let latent = Tensor::<Backend, 2>::random(
            Shape::new([4, 3]),
            Distribution::Normal(0.0, 2.0),
            &Default::default(),
        );
        let mean = net.forward(latent.clone());

        let mut state = dist
            .proba_distribution(mean, log_std.val(), latent)
            .unwrap();
        let actions = state.sample();

        assert!(actions
            .clone()
            .abs()
            .lower_equal_elem(1.0)
            .all()
            .into_scalar());
        assert!(state.entropy().is_none());

        let log_prob = state.log_prob(actions).into_data();
        for v in log_prob.iter::<f32>() {
            assert!(v.is_finite());
        }
    }

    #[test]
    fn test_learn_features_controls_gradient_flow() {
        type Backend = Autodiff<NdArray>;

        for (learn_features, expect_grad) in [(false, false), (true, true)] {
            let mut dist = family::<Backend>(StateDependentNoiseOptions {
                learn_features,
                ..Default::default()
            });
            let (_, log_std) = dist.proba_distribution_net(3, -1.0, None, &Default::default());

            let mean = Tensor::<Backend, 2>::zeros(Shape::new([1, 2]), &Default::default());
            let latent = Tensor::<Backend, 2>::from_floats([[0.5, -0.5, 1.0]], &Default::default())
                .require_grad();

            let actions = dist
                .actions_from_params(mean, log_std.val(), latent.clone(), false)
                .unwrap();
            let grads = actions.sum().backward();

            assert_eq!(latent.grad(&grads).is_some(), expect_grad);
        }
    }

    #[test]
    fn test_log_prob_from_params() {
        type Backend = NdArray;

        let mut dist = family::<Backend>(Default::default());
        let (net, log_std) = dist.proba_distribution_net(3, -2.0, None, &Default::default());

        let latent = Tensor::<Backend, 2>::random(
            Shape::new([2, 3]),
            Distribution::Normal(0.0, 1.0),
            &Default::default(),
        );
        let mean = net.forward(latent.clone());

        let (actions, log_prob) = dist
            .log_prob_from_params(mean, log_std.val(), latent)
            .unwrap();

        assert_eq!(actions.dims(), [2, 2]);
        assert_eq!(log_prob.dims(), [2]);

        for v in log_prob.into_data().iter::<f32>() {
            assert!(v.is_finite());
        }
    }
}
