use std::sync::{LazyLock, Mutex};

use dyn_clone::DynClone;
use rand::{rngs::StdRng, Rng, SeedableRng};

pub static SHARED_RNG: LazyLock<Mutex<StdRng>> =
    LazyLock::new(|| Mutex::new(StdRng::seed_from_u64(1234)));

pub fn seed_shared_rng(seed: u64) {
    *SHARED_RNG.lock().unwrap() = StdRng::seed_from_u64(seed);
}

/// Defines a space in which an action, observation, or other may exist
pub trait Space<T: Clone>: DynClone {
    /// tests whether the sample is contained within the space
    fn contains(&self, sample: &T) -> bool;

    /// randomly samples from the space
    fn sample(&mut self) -> T;

    /// returns some semantic representation of the space,
    /// to be used for initialising models
    fn shape(&self) -> T;
}

dyn_clone::clone_trait_object!(<T> Space<T> where T: Clone);

/// Defines a Discrete Space.
///
/// A Discrete space is a space on `usize` where samples
/// are drawn uniformly from `[0, n)`.
#[derive(Debug, Clone)]
pub struct Discrete {
    /// The upper bound on the space
    n: usize,
}

impl Discrete {
    pub fn n(&self) -> usize {
        self.n
    }
}

impl From<usize> for Discrete {
    fn from(value: usize) -> Self {
        Self { n: value }
    }
}

impl Space<usize> for Discrete {
    fn contains(&self, sample: &usize) -> bool {
        *sample < self.n
    }

    fn sample(&mut self) -> usize {
        let mut rng = SHARED_RNG.lock().unwrap();
        rng.gen_range(0..self.n)
    }

    fn shape(&self) -> usize {
        self.n
    }
}

/// Defines a `BoxSpace`.
///
/// A `BoxSpace` is a bounded container on `f32` coordinates. Bounds are
/// stored flat; `dims` carries the logical shape, so non-vector spaces
/// (e.g. image-shaped ones) stay representable.
#[derive(Debug, Clone)]
pub struct BoxSpace {
    /// The lower bound on the space
    low: Vec<f32>,

    /// The upper bound on the space
    high: Vec<f32>,

    /// The logical shape of the space
    dims: Vec<usize>,
}

impl BoxSpace {
    /// A flat vector space bounded elementwise by `low` and `high`.
    ///
    /// # Panics
    /// Panics when the bound lengths differ or any low bound exceeds its
    /// high bound.
    pub fn new(low: Vec<f32>, high: Vec<f32>) -> Self {
        assert_eq!(low.len(), high.len(), "bounds must have the same length");
        assert!(
            low.iter().zip(high.iter()).all(|(l, h)| l <= h),
            "low bounds must not exceed high bounds"
        );

        let dims = vec![low.len()];

        Self { low, high, dims }
    }

    /// A space with an explicit shape; bounds are flat in row-major order.
    ///
    /// # Panics
    /// Panics when the bound lengths differ, do not match the shape
    /// product, or any low bound exceeds its high bound.
    pub fn with_shape(low: Vec<f32>, high: Vec<f32>, dims: Vec<usize>) -> Self {
        assert_eq!(low.len(), high.len(), "bounds must have the same length");
        assert_eq!(
            low.len(),
            dims.iter().product::<usize>(),
            "bounds must match the shape product"
        );
        assert!(
            low.iter().zip(high.iter()).all(|(l, h)| l <= h),
            "low bounds must not exceed high bounds"
        );

        Self { low, high, dims }
    }

    pub fn low(&self) -> &Vec<f32> {
        &self.low
    }

    pub fn high(&self) -> &Vec<f32> {
        &self.high
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Flat number of coordinates
    pub fn action_dim(&self) -> usize {
        self.low.len()
    }
}

impl From<(Vec<f32>, Vec<f32>)> for BoxSpace {
    fn from(value: (Vec<f32>, Vec<f32>)) -> Self {
        Self::new(value.0, value.1)
    }
}

impl Space<Vec<f32>> for BoxSpace {
    fn contains(&self, sample: &Vec<f32>) -> bool {
        if sample.len() != self.low.len() {
            return false;
        }

        sample
            .iter()
            .zip(self.low.iter())
            .zip(self.high.iter())
            .all(|((&s, &l), &h)| l <= s && s <= h)
    }

    fn sample(&mut self) -> Vec<f32> {
        let mut rng = SHARED_RNG.lock().unwrap();
        (0..self.low.len())
            .map(|i| rng.gen_range(self.low[i]..=self.high[i]))
            .collect()
    }

    fn shape(&self) -> Vec<f32> {
        self.low.clone()
    }
}

/// Closed descriptor over the action spaces a policy head can serve.
///
/// Distribution selection dispatches on the variant; multi-discrete and
/// multi-binary spaces are representable but have no distribution yet.
#[derive(Debug, Clone)]
pub enum ActionSpace {
    Box(BoxSpace),
    Discrete(Discrete),
    /// One cardinality per sub-action
    MultiDiscrete(Vec<usize>),
    /// Number of binary flags
    MultiBinary(usize),
}

impl ActionSpace {
    /// Flat action dimensionality: coordinates for continuous spaces,
    /// category count for discrete ones.
    pub fn action_dim(&self) -> usize {
        match self {
            Self::Box(space) => space.action_dim(),
            Self::Discrete(space) => space.n(),
            Self::MultiDiscrete(nvec) => nvec.len(),
            Self::MultiBinary(n) => *n,
        }
    }
}
