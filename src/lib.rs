//! Growth-rate inference for clonally expanding populations from the
//! coalescence times of a reconstructed phylogeny.
//!
//! There are two different ways of using this library:
//!
//! 1. fit the logistic-growth coalescent model to one tree and obtain a
//! point estimate of the growth rate with a credible interval
//!
//! 2. validate estimators over ensembles of simulated trees, scoring
//! accuracy and interval coverage and binning coverage by the
//! external/internal branch-length ratio that decides whether the
//! supercritical approximation applies
//!
//! # Fitting example
//! ```no_run
//! use phylorate::{fit_logistic_growth, FitOptionsBuilder, Tree};
//!
//! // a toy tree: two tips coalescing at the root, depth 10
//! let tree =
//!     Tree::new(2, vec![0.0, 0.0, 10.0], vec![Some(2), Some(2), None]).unwrap();
//!
//! let options = FitOptionsBuilder::default()
//!     .n_chains(4usize)
//!     .chain_length(2000usize)
//!     .build()
//!     .unwrap();
//! let result = fit_logistic_growth(&tree, &options).unwrap();
//! println!(
//!     "r = {:.3} [{:.3}, {:.3}]",
//!     result.estimate, result.lower_bound, result.upper_bound
//! );
//! ```
//!
//! # Validation example
//! Sweep one or more estimator methods over simulated trees and aggregate
//! the outcome; the simulator is any [`validate::TreeSimulator`].
//! ```no_run
//! use phylorate::validate::{run_sweep, Estimator, LogisticGrowth, SweepConfigBuilder};
//! use phylorate::FitOptions;
//! # struct MySimulator;
//! # impl phylorate::validate::TreeSimulator for MySimulator {
//! #     fn simulate(
//! #         &self,
//! #         _: &phylorate::validate::BatchConfig,
//! #         _: u64,
//! #     ) -> anyhow::Result<Vec<phylorate::Tree>> {
//! #         unimplemented!()
//! #     }
//! # }
//!
//! let config = SweepConfigBuilder::default()
//!     .tip_counts(vec![50, 100])
//!     .birth_rates(vec![1.0])
//!     .death_rates(vec![0.5])
//!     .clone_ages(vec![40.0])
//!     .replicates(500usize)
//!     .build()
//!     .unwrap();
//! let methods: Vec<Estimator> =
//!     vec![LogisticGrowth { options: FitOptions::default() }.into()];
//! let sweep = run_sweep(&config, &MySimulator, &methods).unwrap();
//! let summaries = sweep.summarize_groups().unwrap();
//! ```
/// Point and interval estimation of the growth rate.
pub mod fit;
/// The logistic-growth coalescent likelihood and its priors.
pub mod logistic;
/// Posterior sampling and mixing diagnostics.
pub mod mcmc;
/// Trees, coalescence times and the branch-length diagnostic.
pub mod tree;
/// The Monte-Carlo validation harness.
pub mod validate;

#[doc(inline)]
pub use crate::fit::{
    fit_logistic_growth, EstimateResult, FitOptions, FitOptionsBuilder, APPLICABILITY_CUTOFF,
};
#[doc(inline)]
pub use crate::logistic::{GrowthParams, LogisticModel, Priors};
#[doc(inline)]
pub use crate::mcmc::PosteriorSample;
#[doc(inline)]
pub use crate::tree::{CoalescenceTimes, InvalidTreeError, Tree};
#[doc(inline)]
pub use crate::validate::{apply_cutoff, coverage_by_ratio_bin, run_sweep, summarize};

#[macro_use]
extern crate derive_builder;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;
