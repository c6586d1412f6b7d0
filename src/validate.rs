//! The Monte-Carlo validation harness: sweep estimator methods over ensembles
//! of simulated trees, aggregate accuracy/coverage summaries, bin coverage by
//! the diagnostic ratio and quantify the applicability cutoff.
use crate::fit::{
    fit_logistic_growth, quantile, EstimateResult, FitOptions, APPLICABILITY_CUTOFF,
};
use crate::tree::Tree;
use anyhow::Context;
use chrono::Utc;
use enum_dispatch::enum_dispatch;
use indicatif::ParallelProgressIterator;
use rayon::prelude::{IntoParallelIterator, ParallelIterator};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Ratio bins of the coverage curve span `[0, (RATIO_BINS + 1) * width)`.
const RATIO_BINS: usize = 20;

/// Invalid sweep or batch specification, rejected before any work starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("{name} has length {got}, expected 1 or {expected}")]
    ReplicateMismatch { name: &'static str, got: usize, expected: usize },
    #[error("{0} must not be empty")]
    EmptyAxis(&'static str),
    #[error("{birth} birth rates cannot pair with {death} death rates")]
    UnpairedRates { birth: usize, death: usize },
    #[error("replicate count must be positive")]
    NoReplicates,
}

/// A batch of estimates that cannot be aggregated into one summary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DegenerateBatchError {
    #[error("cannot summarize an empty batch")]
    Empty,
    #[error("batch mixes tip counts {0} and {1}")]
    MixedTipCounts(usize, usize),
    #[error("batch mixes methods {0} and {1}")]
    MixedMethods(String, String),
    #[error("batch mixes ground-truth growth rates {0} and {1}")]
    MixedGroundTruth(f64, f64),
}

/// One simulation batch: `replicates` trees of `n` tips grown for
/// `clone_age`, with per-replicate birth and death rates.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub n: usize,
    pub birth_rates: Vec<f64>,
    pub death_rates: Vec<f64>,
    pub clone_age: f64,
    pub replicates: usize,
}

impl BatchConfig {
    pub fn new(
        n: usize,
        birth_rates: &[f64],
        death_rates: &[f64],
        clone_age: f64,
        replicates: usize,
    ) -> Result<Self, ConfigurationError> {
        //! Rates are given per replicate: a slice of length one is broadcast,
        //! a slice of length `replicates` is taken as is, anything else is an
        //! error.
        if replicates == 0 {
            return Err(ConfigurationError::NoReplicates);
        }
        Ok(BatchConfig {
            n,
            birth_rates: broadcast("birth rates", birth_rates, replicates)?,
            death_rates: broadcast("death rates", death_rates, replicates)?,
            clone_age,
            replicates,
        })
    }

    /// Net growth rate (birth minus death) of each replicate.
    pub fn growth_rates(&self) -> Vec<f64> {
        self.birth_rates
            .iter()
            .zip(self.death_rates.iter())
            .map(|(birth, death)| birth - death)
            .collect()
    }
}

fn broadcast(
    name: &'static str,
    values: &[f64],
    replicates: usize,
) -> Result<Vec<f64>, ConfigurationError> {
    match values.len() {
        0 => Err(ConfigurationError::EmptyAxis(name)),
        1 => Ok(vec![values[0]; replicates]),
        len if len == replicates => Ok(values.to_vec()),
        len => Err(ConfigurationError::ReplicateMismatch { name, got: len, expected: replicates }),
    }
}

/// External collaborator producing the trees of one batch. Implementations
/// must honour `batch.replicates` and `batch.n`.
pub trait TreeSimulator: Sync {
    fn simulate(&self, batch: &BatchConfig, seed: u64) -> anyhow::Result<Vec<Tree>>;
}

/// An estimator method the harness can run on a tree.
#[enum_dispatch(Estimator)]
pub trait Estimate {
    /// Method label used in result tables and the failure manifest.
    fn name(&self) -> String;

    fn estimate_tree(&self, tree: &Tree, seed: u64) -> anyhow::Result<EstimateResult>;

    fn estimate(&self, trees: &[Tree], seed: u64) -> Vec<anyhow::Result<EstimateResult>> {
        //! Estimate a whole batch, one independent seed stream per tree.
        trees
            .iter()
            .enumerate()
            .map(|(idx, tree)| self.estimate_tree(tree, seed.wrapping_add(idx as u64)))
            .collect()
    }
}

/// The crate's own Bayesian estimator as a sweep method.
#[derive(Debug, Clone)]
pub struct LogisticGrowth {
    pub options: FitOptions,
}

impl Estimate for LogisticGrowth {
    fn name(&self) -> String {
        crate::fit::LOGISTIC_METHOD.to_owned()
    }

    fn estimate_tree(&self, tree: &Tree, seed: u64) -> anyhow::Result<EstimateResult> {
        let mut options = self.options.clone();
        options.seed = seed;
        fit_logistic_growth(tree, &options)
    }
}

/// A caller-supplied estimator (the closed-form internal-lengths and
/// maximum-likelihood estimators, or the birth-death coalescent MCMC) plugged
/// into the sweep behind a name.
#[derive(Clone)]
pub struct ExternalEstimator {
    name: String,
    estimator: Arc<dyn Fn(&Tree, u64) -> anyhow::Result<EstimateResult> + Send + Sync>,
}

impl ExternalEstimator {
    pub fn new<F>(name: &str, estimator: F) -> Self
    where
        F: Fn(&Tree, u64) -> anyhow::Result<EstimateResult> + Send + Sync + 'static,
    {
        ExternalEstimator { name: name.to_owned(), estimator: Arc::new(estimator) }
    }
}

impl fmt::Debug for ExternalEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalEstimator").field("name", &self.name).finish()
    }
}

impl Estimate for ExternalEstimator {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn estimate_tree(&self, tree: &Tree, seed: u64) -> anyhow::Result<EstimateResult> {
        (self.estimator)(tree, seed)
    }
}

/// The estimator methods of one sweep.
#[enum_dispatch]
#[derive(Debug, Clone)]
pub enum Estimator {
    /// The logistic-growth coalescent fit.
    LogisticGrowth,
    /// Any external collaborator.
    ExternalEstimator,
}

/// Specification of one validation sweep: the cartesian product of tip
/// counts, (birth, death) rate pairs and clone ages, `replicates` trees per
/// cell.
#[derive(Builder, Debug, Clone, PartialEq)]
pub struct SweepConfig {
    /// Sample sizes `n` to sweep.
    pub tip_counts: Vec<usize>,
    /// Birth rates, paired index-wise with `death_rates`.
    pub birth_rates: Vec<f64>,
    pub death_rates: Vec<f64>,
    pub clone_ages: Vec<f64>,
    #[builder(default = "100")]
    pub replicates: usize,
    #[builder(default = "26")]
    pub seed: u64,
    /// Wall-clock budget for the whole sweep in seconds. Tasks starting past
    /// the deadline are recorded as failed units instead of running, so a
    /// sweep with slow-converging chains still terminates with partial
    /// results.
    #[builder(default)]
    pub deadline_s: Option<f64>,
    #[builder(default = "0")]
    pub verbosity: u8,
}

impl SweepConfig {
    pub fn batches(&self) -> Result<Vec<BatchConfig>, ConfigurationError> {
        //! Expand the sweep axes into simulation batches, validating the
        //! specification first.
        if self.tip_counts.is_empty() {
            return Err(ConfigurationError::EmptyAxis("tip counts"));
        }
        if self.clone_ages.is_empty() {
            return Err(ConfigurationError::EmptyAxis("clone ages"));
        }
        if self.birth_rates.len() != self.death_rates.len() {
            return Err(ConfigurationError::UnpairedRates {
                birth: self.birth_rates.len(),
                death: self.death_rates.len(),
            });
        }
        let mut batches =
            Vec::with_capacity(self.tip_counts.len() * self.birth_rates.len() * self.clone_ages.len());
        for &n in &self.tip_counts {
            for (&birth, &death) in self.birth_rates.iter().zip(self.death_rates.iter()) {
                for &clone_age in &self.clone_ages {
                    batches.push(BatchConfig::new(
                        n,
                        &[birth],
                        &[death],
                        clone_age,
                        self.replicates,
                    )?);
                }
            }
        }
        Ok(batches)
    }
}

/// A (tree, method) unit that failed; the sweep records it and carries on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedUnit {
    pub tree_idx: usize,
    pub method: String,
    pub error: String,
}

/// Partial results of a sweep plus the manifest of failed units.
#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    pub results: Vec<EstimateResult>,
    pub failures: Vec<FailedUnit>,
}

struct LabelledTree {
    tree_idx: usize,
    tree: Tree,
    true_growth_rate: f64,
    clone_age: f64,
}

pub fn run_sweep(
    config: &SweepConfig,
    simulator: &dyn TreeSimulator,
    estimators: &[Estimator],
) -> anyhow::Result<SweepOutcome> {
    //! Simulate every batch, then dispatch one independent task per
    //! (tree, method) pair. Tasks are joined on explicit tree indices, never
    //! on completion order, and a failing unit is recorded in the manifest
    //! without aborting the sweep.
    assert!(!estimators.is_empty(), "need at least one estimator method");
    let batches = config.batches()?;

    let mut labelled: Vec<LabelledTree> = Vec::new();
    for (batch_idx, batch) in batches.iter().enumerate() {
        let trees = simulator
            .simulate(batch, config.seed.wrapping_add(batch_idx as u64))
            .with_context(|| format!("cannot simulate batch {}", batch_idx))?;
        assert_eq!(
            trees.len(),
            batch.replicates,
            "simulator must honour the replicate count"
        );
        let growth_rates = batch.growth_rates();
        for (replicate, tree) in trees.into_iter().enumerate() {
            labelled.push(LabelledTree {
                tree_idx: labelled.len(),
                tree,
                true_growth_rate: growth_rates[replicate],
                clone_age: batch.clone_age,
            });
        }
    }

    if config.verbosity > 0 {
        println!(
            "{} Sweeping {} methods over {} trees on {} cores",
            Utc::now(),
            estimators.len(),
            labelled.len(),
            rayon::current_num_threads()
        );
    }

    let tasks: Vec<(usize, usize)> = (0..labelled.len())
        .flat_map(|tree| (0..estimators.len()).map(move |method| (tree, method)))
        .collect();
    let n_tasks = tasks.len() as u64;
    let started = std::time::Instant::now();

    let outcomes: Vec<(usize, String, anyhow::Result<EstimateResult>)> = tasks
        .into_par_iter()
        .progress_count(n_tasks)
        .map(|(tree, method)| {
            let unit = &labelled[tree];
            let estimator = &estimators[method];
            if let Some(deadline) = config.deadline_s {
                if started.elapsed().as_secs_f64() > deadline {
                    return (
                        unit.tree_idx,
                        estimator.name(),
                        Err(anyhow::anyhow!("sweep deadline of {}s exceeded", deadline)),
                    );
                }
            }
            let seed = config
                .seed
                .wrapping_add((tree * estimators.len() + method) as u64 + 1);
            let outcome = estimator.estimate_tree(&unit.tree, seed).map(|mut result| {
                result.tree_idx = Some(unit.tree_idx);
                result.true_growth_rate = Some(unit.true_growth_rate);
                result.clone_age = Some(unit.clone_age);
                result.ext_int_ratio = unit.tree.diagnostic_ratio();
                result.inapplicable = result.ext_int_ratio < APPLICABILITY_CUTOFF;
                result
            });
            (unit.tree_idx, estimator.name(), outcome)
        })
        .collect();

    // the reduction is a plain partition, commutative over completion order
    let mut sweep = SweepOutcome::default();
    for (tree_idx, method, outcome) in outcomes {
        match outcome {
            Ok(result) => sweep.results.push(result),
            Err(error) => sweep.failures.push(FailedUnit {
                tree_idx,
                method,
                error: format!("{:#}", error),
            }),
        }
    }
    sweep
        .results
        .sort_by(|a, b| (a.tree_idx, &a.method).cmp(&(b.tree_idx, &b.method)));
    sweep
        .failures
        .sort_by(|a, b| (a.tree_idx, &a.method).cmp(&(b.tree_idx, &b.method)));

    if config.verbosity > 0 {
        println!(
            "{} End sweep: {} estimates, {} failed units",
            Utc::now(),
            sweep.results.len(),
            sweep.failures.len()
        );
    }
    Ok(sweep)
}

impl SweepOutcome {
    pub fn summarize_groups(&self) -> Result<Vec<SummaryStats>, DegenerateBatchError> {
        //! One summary per homogeneous (method, n, true growth rate) bucket.
        //! Results without attached ground truth cannot be scored and are
        //! skipped.
        let mut groups: BTreeMap<(String, usize, u64), Vec<&EstimateResult>> = BTreeMap::new();
        for result in &self.results {
            if let Some(truth) = result.true_growth_rate {
                groups
                    .entry((result.method.clone(), result.n, truth.to_bits()))
                    .or_default()
                    .push(result);
            }
        }
        groups
            .into_values()
            .map(|batch| {
                let truth = batch[0].true_growth_rate.unwrap();
                let clone_age = batch[0].clone_age.unwrap_or(f64::NAN);
                summarize_refs(&batch, truth, clone_age)
            })
            .collect()
    }

    pub fn coverage_curve(&self, bin_width: f64) -> CoverageCurve {
        coverage_by_ratio_bin(&self.results, bin_width)
    }

    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        //! Persist the estimates and the failure manifest as CSV tables.
        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create the output dir {:#?}", dir))?;

        let mut writer = csv::Writer::from_path(dir.join("estimates.csv"))?;
        for result in &self.results {
            writer.serialize(result).context("cannot serialize an estimate")?;
        }
        writer.flush()?;

        let mut writer = csv::Writer::from_path(dir.join("failures.csv"))?;
        for failure in &self.failures {
            writer.serialize(failure).context("cannot serialize a failed unit")?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Aggregate accuracy/coverage over one homogeneous batch of estimates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStats {
    pub method: String,
    pub n: usize,
    pub true_growth_rate: f64,
    pub clone_age: f64,
    pub samples: usize,
    pub mean: f64,
    pub median: f64,
    pub sd: f64,
    /// Root-mean-square error of the point estimates, normalised by the true
    /// growth rate.
    pub rmse: f64,
    /// Fraction of credible intervals containing the truth.
    pub coverage: Option<f64>,
    pub runtime_mean_s: f64,
    pub runtime_sd_s: f64,
}

pub fn summarize(
    results: &[EstimateResult],
    true_growth_rate: f64,
    clone_age: f64,
) -> Result<SummaryStats, DegenerateBatchError> {
    //! Aggregate a batch sharing method, tip count and ground truth.
    //! Heterogeneous batches produce meaningless aggregates and are refused.
    let refs: Vec<&EstimateResult> = results.iter().collect();
    summarize_refs(&refs, true_growth_rate, clone_age)
}

fn summarize_refs(
    results: &[&EstimateResult],
    true_growth_rate: f64,
    clone_age: f64,
) -> Result<SummaryStats, DegenerateBatchError> {
    let first = *results.first().ok_or(DegenerateBatchError::Empty)?;
    assert!(true_growth_rate > 0.0, "ground truth must be a positive growth rate");
    for result in results {
        if result.n != first.n {
            return Err(DegenerateBatchError::MixedTipCounts(first.n, result.n));
        }
        if result.method != first.method {
            return Err(DegenerateBatchError::MixedMethods(
                first.method.clone(),
                result.method.clone(),
            ));
        }
        if let Some(truth) = result.true_growth_rate {
            if (truth - true_growth_rate).abs() > f64::EPSILON {
                return Err(DegenerateBatchError::MixedGroundTruth(true_growth_rate, truth));
            }
        }
    }

    let estimates: Vec<f64> = results.iter().map(|result| result.estimate).collect();
    let runtimes: Vec<f64> = results.iter().map(|result| result.runtime_s).collect();
    let runtime_mean_s = mean(&runtimes);
    let mean = mean(&estimates);
    let covered = results
        .iter()
        .filter(|result| {
            result.lower_bound <= true_growth_rate && true_growth_rate <= result.upper_bound
        })
        .count();
    let rmse = (estimates
        .iter()
        .map(|estimate| (estimate - true_growth_rate).powi(2))
        .sum::<f64>()
        / estimates.len() as f64)
        .sqrt()
        / true_growth_rate;

    Ok(SummaryStats {
        method: first.method.clone(),
        n: first.n,
        true_growth_rate,
        clone_age,
        samples: results.len(),
        mean,
        median: quantile(&estimates, 0.5),
        sd: std_dev(&estimates, mean),
        rmse,
        coverage: Some(covered as f64 / results.len() as f64),
        runtime_mean_s,
        runtime_sd_s: std_dev(&runtimes, runtime_mean_s),
    })
}

/// One diagnostic-ratio bin of the coverage curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatioBin {
    pub method: String,
    pub lower: f64,
    pub upper: f64,
    pub samples: usize,
    /// `None` when the bin holds no scorable estimate, so empty bins never
    /// masquerade as zero coverage.
    pub coverage: Option<f64>,
}

/// Coverage probability as a function of the diagnostic ratio, per method.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageCurve {
    bins: Vec<RatioBin>,
}

impl CoverageCurve {
    pub fn bins(&self) -> &[RatioBin] {
        &self.bins
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for bin in &self.bins {
            writer.serialize(bin).context("cannot serialize a ratio bin")?;
        }
        writer.flush()?;
        Ok(())
    }
}

pub fn coverage_by_ratio_bin(results: &[EstimateResult], bin_width: f64) -> CoverageCurve {
    //! Sweep disjoint ratio bins `[i w, (i + 1) w)` for `i = 0..=20` over the
    //! diagnostic-ratio range and report per-method coverage and sample count
    //! within each bin.
    assert!(bin_width > 0.0, "bin width must be positive");
    let mut methods: Vec<String> = Vec::new();
    for result in results {
        if !methods.contains(&result.method) {
            methods.push(result.method.clone());
        }
    }

    let mut bins = Vec::with_capacity(methods.len() * (RATIO_BINS + 1));
    for method in methods {
        for i in 0..=RATIO_BINS {
            let lower = i as f64 * bin_width;
            let upper = (i + 1) as f64 * bin_width;
            let in_bin: Vec<&EstimateResult> = results
                .iter()
                .filter(|result| {
                    result.method == method
                        && result.ext_int_ratio >= lower
                        && result.ext_int_ratio < upper
                })
                .collect();
            let scorable: Vec<&&EstimateResult> = in_bin
                .iter()
                .filter(|result| result.true_growth_rate.is_some())
                .collect();
            let coverage = if scorable.is_empty() {
                None
            } else {
                let covered = scorable
                    .iter()
                    .filter(|result| {
                        let truth = result.true_growth_rate.unwrap();
                        result.lower_bound <= truth && truth <= result.upper_bound
                    })
                    .count();
                Some(covered as f64 / scorable.len() as f64)
            };
            bins.push(RatioBin {
                method: method.clone(),
                lower,
                upper,
                samples: in_bin.len(),
                coverage,
            });
        }
    }
    CoverageCurve { bins }
}

pub fn apply_cutoff(
    results: &[EstimateResult],
    threshold: f64,
) -> (Vec<EstimateResult>, Vec<EstimateResult>) {
    //! Partition estimates into those whose tree passes the diagnostic
    //! (`ratio >= threshold`) and those that fail it. Re-summarizing each
    //! side quantifies what the cutoff buys.
    results
        .iter()
        .cloned()
        .partition(|result| result.ext_int_ratio >= threshold)
}

pub fn save_summaries(stats: &[SummaryStats], path: &Path) -> anyhow::Result<()> {
    //! Persist grouped summaries as one tabular record per bucket.
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("cannot open {:#?}", path))?;
    for row in stats {
        writer.serialize(row).context("cannot serialize a summary row")?;
    }
    writer.flush()?;
    Ok(())
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    (values.iter().map(|value| (value - mean).powi(2)).sum::<f64>()
        / (values.len() - 1) as f64)
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{coalescent_tree, supercritical_times};
    use anyhow::anyhow;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn stub_result(method: &str, estimate: f64, ratio: f64, truth: f64) -> EstimateResult {
        EstimateResult {
            method: method.to_owned(),
            lower_bound: estimate - 0.1,
            estimate,
            upper_bound: estimate + 0.1,
            runtime_s: 0.5,
            n: 50,
            alpha: 0.05,
            n_chains: None,
            n_cores: None,
            chain_length: None,
            ext_int_ratio: ratio,
            diverged: false,
            inapplicable: ratio < APPLICABILITY_CUTOFF,
            true_growth_rate: Some(truth),
            clone_age: Some(40.0),
            tree_idx: None,
        }
    }

    /// Simulator drawing supercritical coalescence times for each replicate.
    struct StarSimulator;

    impl TreeSimulator for StarSimulator {
        fn simulate(&self, batch: &BatchConfig, seed: u64) -> anyhow::Result<Vec<Tree>> {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let rates = batch.growth_rates();
            Ok((0..batch.replicates)
                .map(|replicate| {
                    let times = supercritical_times(
                        batch.n,
                        batch.clone_age,
                        rates[replicate],
                        &mut rng,
                    );
                    coalescent_tree(&times, &mut rng)
                })
                .collect())
        }
    }

    #[test]
    fn test_batch_config_broadcasts_scalar_rates() {
        let batch = BatchConfig::new(50, &[1.0], &[0.5], 40.0, 3).unwrap();
        assert_eq!(batch.birth_rates, vec![1.0; 3]);
        assert_eq!(batch.growth_rates(), vec![0.5; 3]);
    }

    #[test]
    fn test_batch_config_rejects_mismatched_rates() {
        let err = BatchConfig::new(50, &[1.0, 1.2], &[0.5], 40.0, 3).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::ReplicateMismatch {
                name: "birth rates",
                got: 2,
                expected: 3
            }
        );
    }

    #[test]
    fn test_sweep_config_rejects_unpaired_rates() {
        let config = SweepConfigBuilder::default()
            .tip_counts(vec![10])
            .birth_rates(vec![1.0, 2.0])
            .death_rates(vec![0.5])
            .clone_ages(vec![40.0])
            .build()
            .unwrap();
        assert_eq!(
            config.batches().unwrap_err(),
            ConfigurationError::UnpairedRates { birth: 2, death: 1 }
        );
    }

    #[test]
    fn test_sweep_config_expands_the_axes() {
        let config = SweepConfigBuilder::default()
            .tip_counts(vec![10, 20])
            .birth_rates(vec![1.0, 2.0])
            .death_rates(vec![0.5, 1.0])
            .clone_ages(vec![30.0, 40.0, 50.0])
            .replicates(5usize)
            .build()
            .unwrap();
        let batches = config.batches().unwrap();
        assert_eq!(batches.len(), 2 * 2 * 3);
        assert!(batches.iter().all(|batch| batch.replicates == 5));
    }

    #[test]
    fn test_summarize_empty_batch_fails() {
        assert_eq!(summarize(&[], 0.5, 40.0).unwrap_err(), DegenerateBatchError::Empty);
    }

    #[test]
    fn test_summarize_mixed_truth_fails() {
        let batch = vec![stub_result("ml", 0.5, 5.0, 0.5), stub_result("ml", 0.6, 5.0, 0.7)];
        assert!(matches!(
            summarize(&batch, 0.5, 40.0).unwrap_err(),
            DegenerateBatchError::MixedGroundTruth(_, _)
        ));
    }

    #[test]
    fn test_summarize_mixed_methods_fails() {
        let batch = vec![stub_result("ml", 0.5, 5.0, 0.5), stub_result("il", 0.6, 5.0, 0.5)];
        assert!(matches!(
            summarize(&batch, 0.5, 40.0).unwrap_err(),
            DegenerateBatchError::MixedMethods(_, _)
        ));
    }

    #[test]
    fn test_summarize_scores_a_homogeneous_batch() {
        let batch = vec![
            stub_result("ml", 0.4, 5.0, 0.5),
            stub_result("ml", 0.5, 5.0, 0.5),
            stub_result("ml", 0.9, 5.0, 0.5),
        ];
        let stats = summarize(&batch, 0.5, 40.0).unwrap();
        assert_eq!(stats.samples, 3);
        assert!((stats.mean - 0.6).abs() < 1e-12);
        assert!((stats.median - 0.5).abs() < 1e-12);
        // 0.9 +/- 0.1 misses 0.5: two intervals out of three cover
        assert_eq!(stats.coverage, Some(2.0 / 3.0));
        let expected_rmse = ((0.01 + 0.0 + 0.16) / 3.0f64).sqrt() / 0.5;
        assert!((stats.rmse - expected_rmse).abs() < 1e-12);
    }

    #[test]
    fn test_empty_ratio_bins_report_no_coverage() {
        let results = vec![stub_result("ml", 0.5, 4.5, 0.5)];
        let curve = coverage_by_ratio_bin(&results, 1.0);
        assert_eq!(curve.bins().len(), RATIO_BINS + 1);
        for bin in curve.bins() {
            if bin.lower == 4.0 {
                assert_eq!(bin.samples, 1);
                assert_eq!(bin.coverage, Some(1.0));
            } else {
                assert_eq!(bin.samples, 0);
                assert_eq!(bin.coverage, None);
            }
        }
    }

    #[test]
    fn test_apply_cutoff_partitions_on_the_threshold() {
        let results = vec![
            stub_result("ml", 0.5, 2.9, 0.5),
            stub_result("ml", 0.5, 3.0, 0.5),
            stub_result("ml", 0.5, 7.0, 0.5),
        ];
        let (passing, failing) = apply_cutoff(&results, 3.0);
        assert_eq!(passing.len(), 2);
        assert_eq!(failing.len(), 1);
        assert!((failing[0].ext_int_ratio - 2.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sweep_records_failures_without_aborting() {
        let config = SweepConfigBuilder::default()
            .tip_counts(vec![8])
            .birth_rates(vec![1.0])
            .death_rates(vec![0.5])
            .clone_ages(vec![40.0])
            .replicates(4usize)
            .build()
            .unwrap();
        let flaky = ExternalEstimator::new("flaky", |tree, seed| {
            if seed % 2 == 0 {
                return Err(anyhow!("chain failed to mix"));
            }
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            Ok(EstimateResult {
                method: "flaky".to_owned(),
                lower_bound: 0.3,
                estimate: 0.5 + rng.gen::<f64>() * 0.01,
                upper_bound: 0.7,
                runtime_s: 0.0,
                n: tree.n_tips(),
                alpha: 0.05,
                n_chains: None,
                n_cores: None,
                chain_length: None,
                ext_int_ratio: 0.0,
                diverged: false,
                inapplicable: false,
                true_growth_rate: None,
                clone_age: None,
                tree_idx: None,
            })
        });
        let sweep = run_sweep(&config, &StarSimulator, &[flaky.into()]).unwrap();

        assert_eq!(sweep.results.len() + sweep.failures.len(), 4);
        assert!(!sweep.failures.is_empty(), "some seeds must fail");
        assert!(!sweep.results.is_empty(), "some seeds must pass");
        // the harness attaches labels and the diagnostic ratio
        for result in &sweep.results {
            assert_eq!(result.true_growth_rate, Some(0.5));
            assert_eq!(result.clone_age, Some(40.0));
            assert!(result.tree_idx.is_some());
            assert!(result.ext_int_ratio > 0.0);
        }
        // explicit identifiers, not positional joins
        let mut indices: Vec<usize> =
            sweep.results.iter().map(|result| result.tree_idx.unwrap()).collect();
        indices.extend(sweep.failures.iter().map(|failure| failure.tree_idx));
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_sweep_deadline_leaves_partial_results() {
        let config = SweepConfigBuilder::default()
            .tip_counts(vec![8])
            .birth_rates(vec![1.0])
            .death_rates(vec![0.5])
            .clone_ages(vec![40.0])
            .replicates(3usize)
            .deadline_s(Some(0.0))
            .build()
            .unwrap();
        let never_runs = ExternalEstimator::new("never", |_, _| {
            panic!("the deadline must skip the estimator")
        });
        let sweep = run_sweep(&config, &StarSimulator, &[never_runs.into()]).unwrap();
        assert!(sweep.results.is_empty());
        assert_eq!(sweep.failures.len(), 3);
        assert!(sweep.failures.iter().all(|failure| failure.error.contains("deadline")));
    }

    #[test]
    fn test_sweep_with_the_logistic_estimator() {
        let config = SweepConfigBuilder::default()
            .tip_counts(vec![10])
            .birth_rates(vec![1.0])
            .death_rates(vec![0.5])
            .clone_ages(vec![40.0])
            .replicates(2usize)
            .build()
            .unwrap();
        let estimator = LogisticGrowth {
            options: crate::fit::FitOptionsBuilder::default()
                .n_chains(2usize)
                .n_cores(1usize)
                .chain_length(300usize)
                .build()
                .unwrap(),
        };
        let sweep = run_sweep(&config, &StarSimulator, &[estimator.into()]).unwrap();
        assert_eq!(sweep.results.len(), 2);
        assert!(sweep.failures.is_empty());
        let stats = sweep.summarize_groups().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].method, crate::fit::LOGISTIC_METHOD);
        assert_eq!(stats[0].samples, 2);
    }
}
