// Burn has very limited support for distributions, especially
// when compared to PyTorch. This means we must implement a lot
// of this functionality ourselves.

pub mod bijector;
pub mod categorical;
pub mod diag_gaussian;
pub mod distribution;
pub mod normal;
pub mod sde;

pub use bijector::TanhBijector;
pub use categorical::{Categorical, CategoricalDistribution};
pub use diag_gaussian::{
    DiagGaussian, DiagGaussianDistribution, SquashedDiagGaussianDistribution, SquashedGaussian,
};
pub use distribution::{sum_independent_dims, ActionDistribution};
pub use normal::Normal;
pub use sde::{StateDependentNoise, StateDependentNoiseDistribution, StateDependentNoiseOptions};

use burn::tensor::backend::Backend;

use crate::{spaces::ActionSpace, DistributionError};

/// The distribution families the factory can produce, tagged by the action
/// space they serve.
#[derive(Debug, Clone)]
pub enum DistributionKind<B: Backend> {
    DiagGaussian(DiagGaussianDistribution),
    Categorical(CategoricalDistribution),
    StateDependentNoise(StateDependentNoiseDistribution<B>),
}

impl<B: Backend> DistributionKind<B> {
    /// Number of action dimensions served by the family (the number of
    /// categories for discrete spaces).
    pub fn action_dim(&self) -> usize {
        match self {
            Self::DiagGaussian(dist) => dist.action_dim(),
            Self::Categorical(dist) => dist.action_dim(),
            Self::StateDependentNoise(dist) => dist.action_dim(),
        }
    }
}

/// Selects the distribution family matching the action space.
///
/// Continuous vector spaces get a diagonal gaussian, or state-dependent
/// noise when `use_sde` is set (configured through `dist_kwargs`); discrete
/// spaces get a categorical. Multi-discrete and multi-binary spaces have no
/// implementation yet.
pub fn make_proba_distribution<B: Backend>(
    action_space: &ActionSpace,
    use_sde: bool,
    dist_kwargs: Option<StateDependentNoiseOptions>,
) -> Result<DistributionKind<B>, DistributionError> {
    match action_space {
        ActionSpace::Box(space) => {
            if space.dims().len() != 1 {
                return Err(DistributionError::UnsupportedShape(space.dims().to_vec()));
            }

            let action_dim = space.action_dim();

            if use_sde {
                tracing::debug!("using state-dependent noise over {action_dim} action dims");

                Ok(DistributionKind::StateDependentNoise(
                    StateDependentNoiseDistribution::new(
                        action_dim,
                        dist_kwargs.unwrap_or_default(),
                    ),
                ))
            } else {
                tracing::debug!("using a diagonal gaussian over {action_dim} action dims");

                Ok(DistributionKind::DiagGaussian(DiagGaussianDistribution::new(action_dim)))
            }
        }
        ActionSpace::Discrete(space) => {
            tracing::debug!("using a categorical over {} actions", space.n());

            Ok(DistributionKind::Categorical(CategoricalDistribution::new(
                space.n(),
            )))
        }
        space @ (ActionSpace::MultiDiscrete(_) | ActionSpace::MultiBinary(_)) => Err(
            DistributionError::UnsupportedActionSpace(format!("{space:?}")),
        ),
    }
}
