use burn::tensor::{backend::Backend, Tensor};

/// Common surface over constructed distribution state.
///
/// Values implementing this are built from network outputs by their
/// family's `proba_distribution` and threaded by the caller for the
/// duration of one forward pass.
pub trait ActionDistribution<B>
where
    B: Backend,
{
    /// the tensor kind produced by sampling, float actions
    /// or integer indices
    type Action;

    /// returns the most likely action
    fn mode(&mut self) -> Self::Action;

    /// returns a batched sample from the distribution
    fn sample(&mut self) -> Self::Action;

    /// takes in batched actions and returns the batched log prob
    fn log_prob(&self, actions: Self::Action) -> Tensor<B, 1>;

    /// returns the entropy of the distribution, or `None` when it
    /// has no closed form
    fn entropy(&self) -> Option<Tensor<B, 1>>;

    fn get_actions(&mut self, deterministic: bool) -> Self::Action {
        if deterministic {
            self.mode()
        } else {
            self.sample()
        }
    }
}

/// Continuous actions are usually considered to be independent,
/// so we can sum components of the ``log_prob`` or the entropy.
///
/// # Shapes
/// t: (batch, n_actions)
/// return: (batch)
pub fn sum_independent_dims<B: Backend>(t: Tensor<B, 2>) -> Tensor<B, 1> {
    t.sum_dim(1).squeeze(1)
}
