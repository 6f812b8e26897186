//! Probability distributions for reinforcement-learning policy heads,
//! built on burn.
//!
//! A policy trunk produces latent features; a distribution family projects
//! them into distribution parameters (mean/std, logits, or noise weights)
//! and exposes sampling, log-probability and entropy over those parameters
//! for action selection and policy-gradient losses.

use thiserror::Error;

pub mod distributions;
pub mod spaces;

#[derive(Error, Debug)]
pub enum DistributionError {
    #[error("no distribution is implemented for action space {0}")]
    UnsupportedActionSpace(String),

    #[error("continuous action spaces must be flat vectors, got shape {0:?}")]
    UnsupportedShape(Vec<usize>),

    #[error("{op} requires {requires} to have been called first")]
    Precondition {
        op: &'static str,
        requires: &'static str,
    },
}
