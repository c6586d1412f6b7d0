//! Reduce a tree to a growth-rate estimate: run the posterior sampler on the
//! logistic-growth model and summarize the pooled draws as a point estimate
//! with a credible interval.
use crate::logistic::{LogisticModel, Priors};
use crate::mcmc::{sample_posterior, SamplerOptions};
use crate::tree::Tree;
use serde::Serialize;
use std::time::Instant;

/// Diagnostic-ratio threshold below which the supercritical approximation is
/// not trusted; estimates on such trees carry the `inapplicable` flag.
pub const APPLICABILITY_CUTOFF: f64 = 3.0;

/// Method label of the crate's own estimator in result tables.
pub const LOGISTIC_METHOD: &str = "logistic";

/// Configuration of one fit. Built once, shared read-only by every chain.
#[derive(Builder, Debug, Clone, PartialEq)]
pub struct FitOptions {
    /// Independent MCMC chains.
    #[builder(default = "4")]
    pub n_chains: usize,
    /// Worker threads for the chains.
    #[builder(default = "4")]
    pub n_cores: usize,
    /// Iterations per chain, burn-in included.
    #[builder(default = "2000")]
    pub chain_length: usize,
    /// Significance level of the credible interval.
    #[builder(default = "0.05")]
    pub alpha: f64,
    /// Lower bound of the log10 carrying-capacity prior.
    #[builder(default = "4.0")]
    pub min_log_n: f64,
    /// Upper bound of the log10 carrying-capacity prior.
    #[builder(default = "7.0")]
    pub max_log_n: f64,
    /// Acceptance rate targeted by the sampler's step adaptation.
    #[builder(default = "0.234")]
    pub target_accept: f64,
    #[builder(default = "26")]
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptionsBuilder::default().build().expect("builder defaults are complete")
    }
}

/// The estimate for one tree by one method: the atomic record aggregated by
/// the validation harness.
///
/// `n_chains`, `n_cores` and `chain_length` are `None` for methods without a
/// sampling stage (the closed-form collaborators); the Bayesian methods fill
/// them from their options. `true_growth_rate`, `clone_age` and `tree_idx`
/// are attached by the harness when the tree was simulated with known ground
/// truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimateResult {
    pub method: String,
    pub lower_bound: f64,
    pub estimate: f64,
    pub upper_bound: f64,
    pub runtime_s: f64,
    /// Tip count of the tree.
    pub n: usize,
    pub alpha: f64,
    pub n_chains: Option<usize>,
    pub n_cores: Option<usize>,
    pub chain_length: Option<usize>,
    /// External over internal branch length of the tree.
    pub ext_int_ratio: f64,
    /// Chains failed to mix (split-R-hat above the divergence threshold).
    pub diverged: bool,
    /// Diagnostic ratio below [`APPLICABILITY_CUTOFF`].
    pub inapplicable: bool,
    pub true_growth_rate: Option<f64>,
    pub clone_age: Option<f64>,
    pub tree_idx: Option<usize>,
}

pub fn fit_logistic_growth(tree: &Tree, options: &FitOptions) -> anyhow::Result<EstimateResult> {
    //! Fit the logistic-growth coalescent model to one tree and reduce the
    //! pooled posterior draws of the growth rate to
    //! `(lower, estimate, upper)` quantiles at `alpha/2`, `1/2` and
    //! `1 - alpha/2`.
    //!
    //! The point estimate is the posterior median, unlike the closed-form
    //! collaborators which report means.
    assert!(
        options.alpha > 0.0 && options.alpha < 1.0,
        "significance level must lie in (0, 1)"
    );
    let start = Instant::now();

    let coal = tree.coalescence_times();
    let priors = Priors::new(&coal, (options.min_log_n, options.max_log_n));
    let model = LogisticModel::from(coal);
    let sampler = SamplerOptions {
        chain_length: options.chain_length,
        n_chains: options.n_chains,
        n_cores: options.n_cores,
        target_accept: options.target_accept,
        seed: options.seed,
    };
    let sample = sample_posterior(&model, &priors, &sampler)?;
    let (lower_bound, estimate, upper_bound) =
        credible_interval(&sample.growth_rates, options.alpha);
    let ext_int_ratio = tree.diagnostic_ratio();

    Ok(EstimateResult {
        method: LOGISTIC_METHOD.to_owned(),
        lower_bound,
        estimate,
        upper_bound,
        runtime_s: start.elapsed().as_secs_f64(),
        n: tree.n_tips(),
        alpha: options.alpha,
        n_chains: Some(options.n_chains),
        n_cores: Some(options.n_cores),
        chain_length: Some(options.chain_length),
        ext_int_ratio,
        diverged: sample.diverged,
        inapplicable: ext_int_ratio < APPLICABILITY_CUTOFF,
        true_growth_rate: None,
        clone_age: None,
        tree_idx: None,
    })
}

pub fn credible_interval(samples: &[f64], alpha: f64) -> (f64, f64, f64) {
    //! `(lower, median, upper)` empirical quantiles of the pooled draws.
    //! Deterministic given fixed samples.
    let mut sorted = samples.to_vec();
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).expect("posterior draws are finite"));
    (
        quantile_sorted(&sorted, alpha / 2.0),
        quantile_sorted(&sorted, 0.5),
        quantile_sorted(&sorted, 1.0 - alpha / 2.0),
    )
}

/// Linear-interpolation empirical quantile.
pub fn quantile(samples: &[f64], q: f64) -> f64 {
    let mut sorted = samples.to_vec();
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).expect("samples are finite"));
    quantile_sorted(&sorted, q)
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    assert!(!sorted.is_empty(), "cannot take the quantile of no samples");
    assert!((0.0..=1.0).contains(&q), "quantile must lie in [0, 1]");
    let position = q * (sorted.len() - 1) as f64;
    let below = position.floor() as usize;
    let above = position.ceil() as usize;
    sorted[below] + (position - below as f64) * (sorted[above] - sorted[below])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{coalescent_tree, supercritical_times};
    use quickcheck::TestResult;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_default_options() {
        let options = FitOptions::default();
        assert_eq!(options.n_chains, 4);
        assert_eq!(options.chain_length, 2000);
        assert!((options.alpha - 0.05).abs() < f64::EPSILON);
        assert!((options.min_log_n - 4.0).abs() < f64::EPSILON);
        assert!((options.max_log_n - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_quantile_interpolates() {
        let samples = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert!((quantile(&samples, 0.5) - 3.0).abs() < f64::EPSILON);
        assert!((quantile(&samples, 0.0) - 1.0).abs() < f64::EPSILON);
        assert!((quantile(&samples, 1.0) - 5.0).abs() < f64::EPSILON);
        assert!((quantile(&samples, 0.125) - 1.5).abs() < f64::EPSILON);
    }

    #[quickcheck]
    fn interval_bounds_are_ordered(samples: Vec<f64>) -> TestResult {
        let samples: Vec<f64> = samples.into_iter().filter(|x| x.is_finite()).collect();
        if samples.is_empty() {
            return TestResult::discard();
        }
        let (lower, estimate, upper) = credible_interval(&samples, 0.05);
        TestResult::from_bool(lower <= estimate && estimate <= upper)
    }

    #[test]
    fn test_interval_width_grows_with_posterior_spread() {
        // same draws, twice the spread around the median
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let narrow: Vec<f64> = (0..500)
            .map(|_| rng.sample::<f64, _>(rand_distr::StandardNormal))
            .collect();
        let wide: Vec<f64> = narrow.iter().map(|x| 2.0 * x).collect();
        let (lo_n, _, hi_n) = credible_interval(&narrow, 0.05);
        let (lo_w, _, hi_w) = credible_interval(&wide, 0.05);
        assert!(hi_w - lo_w > hi_n - lo_n);
    }

    #[test]
    fn test_fit_logistic_growth_smoke() {
        let mut rng = ChaCha8Rng::seed_from_u64(13);
        let times = supercritical_times(12, 40.0, 0.5, &mut rng);
        let tree = coalescent_tree(&times, &mut rng);
        let options = FitOptionsBuilder::default()
            .n_chains(2usize)
            .n_cores(2usize)
            .chain_length(400usize)
            .build()
            .unwrap();

        let result = fit_logistic_growth(&tree, &options).unwrap();
        assert_eq!(result.method, LOGISTIC_METHOD);
        assert_eq!(result.n, 12);
        assert!(result.lower_bound <= result.estimate);
        assert!(result.estimate <= result.upper_bound);
        assert!(result.estimate > 0.0);
        assert!(result.runtime_s >= 0.0);
        assert_eq!(result.n_chains, Some(2));
        assert_eq!(result.chain_length, Some(400));
        assert!(result.ext_int_ratio >= 0.0);
        assert!(result.true_growth_rate.is_none());
    }
}
