use burn::{
    nn::{Linear, LinearConfig},
    tensor::{activation, backend::Backend, Int, Tensor},
};
use rand::Rng;

use crate::spaces::SHARED_RNG;

use super::distribution::ActionDistribution;

/// Discrete distribution over a finite action set, parameterised by logits.
#[derive(Debug, Clone)]
pub struct CategoricalDistribution {
    action_dim: usize,
}

impl CategoricalDistribution {
    pub fn new(action_dim: usize) -> Self {
        Self { action_dim }
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    /// Builds the trainable head producing one logit per category.
    pub fn proba_distribution_net<B: Backend>(
        &self,
        latent_dim: usize,
        device: &B::Device,
    ) -> Linear<B> {
        LinearConfig::new(latent_dim, self.action_dim).init(device)
    }

    /// Builds distribution state from the current logits.
    ///
    /// # Shapes
    /// logits: (batch, action_dim)
    pub fn proba_distribution<B: Backend>(&self, logits: Tensor<B, 2>) -> Categorical<B> {
        Categorical { logits }
    }

    pub fn actions_from_params<B: Backend>(
        &self,
        logits: Tensor<B, 2>,
        deterministic: bool,
    ) -> Tensor<B, 1, Int> {
        let mut dist = self.proba_distribution(logits);

        dist.get_actions(deterministic)
    }

    /// Returns a fresh sample together with its log probability.
    pub fn log_prob_from_params<B: Backend>(
        &self,
        logits: Tensor<B, 2>,
    ) -> (Tensor<B, 1, Int>, Tensor<B, 1>) {
        let mut dist = self.proba_distribution(logits);
        let actions = dist.sample();
        let log_prob = dist.log_prob(actions.clone());

        (actions, log_prob)
    }
}

/// Constructed categorical state for one forward pass.
#[derive(Debug, Clone)]
pub struct Categorical<B: Backend> {
    logits: Tensor<B, 2>,
}

impl<B: Backend> Categorical<B> {
    /// Normalised probabilities (softmax of the logits).
    pub fn probs(&self) -> Tensor<B, 2> {
        activation::softmax(self.logits.clone(), 1)
    }
}

impl<B: Backend> ActionDistribution<B> for Categorical<B> {
    type Action = Tensor<B, 1, Int>;

    fn mode(&mut self) -> Tensor<B, 1, Int> {
        self.probs().argmax(1).squeeze(1)
    }

    fn sample(&mut self) -> Tensor<B, 1, Int> {
        let [batch_size, n_actions] = self.logits.dims();
        let device = self.logits.device();

        let probs = self.probs().into_data();
        let probs: Vec<f32> = probs.iter::<f32>().collect();

        let mut rng = SHARED_RNG.lock().unwrap();
        let mut actions = Vec::with_capacity(batch_size);

        for row in probs.chunks(n_actions) {
            let threshold: f32 = rng.gen();
            let mut cumulative = 0.0;
            // default to the last action so float error in the
            // probability sum cannot leave us without a pick
            let mut action = n_actions - 1;

            for (idx, p) in row.iter().enumerate() {
                cumulative += p;
                if threshold < cumulative {
                    action = idx;
                    break;
                }
            }

            actions.push(action as i32);
        }

        Tensor::from_ints(actions.as_slice(), &device)
    }

    fn log_prob(&self, actions: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        let log_probs = activation::log_softmax(self.logits.clone(), 1);
        let actions: Tensor<B, 2, Int> = actions.unsqueeze_dim(1);

        log_probs.gather(1, actions).squeeze(1)
    }

    fn entropy(&self) -> Option<Tensor<B, 1>> {
        let log_probs = activation::log_softmax(self.logits.clone(), 1);
        let probs = log_probs.clone().exp();

        Some(probs.mul(log_probs).sum_dim(1).squeeze(1).mul_scalar(-1))
    }
}
