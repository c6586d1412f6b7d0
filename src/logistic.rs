//! The logistic-growth coalescent model: the likelihood of an ordered set of
//! coalescence times under a population whose size follows a generalized
//! logistic curve, together with the hard-bounded uniform priors of its three
//! parameters.
use crate::tree::CoalescenceTimes;
use rand::distributions::Uniform;
use rand::Rng;
use rand_distr::Distribution;

/// Hard bounds of the growth-rate prior (per unit time).
pub const GROWTH_RATE_BOUNDS: (f64, f64) = (1e-4, 4.0);
/// Default bounds of the log10 carrying-capacity prior.
pub const LOG_CAPACITY_BOUNDS: (f64, f64) = (4.0, 7.0);

/// Exponents beyond this saturate the likelihood to `-inf` instead of
/// overflowing `f64::exp`.
const MAX_EXP: f64 = 700.0;

/// One draw of the model parameters: growth rate `s`, inflection time `tm`
/// (measured backward from sampling, like the coalescence times) and log10
/// carrying capacity `log_n`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrowthParams {
    pub s: f64,
    pub tm: f64,
    pub log_n: f64,
}

/// Independent uniform priors with hard bounds. Proposals outside any bound
/// have zero posterior density; the sampler rejects them rather than
/// extrapolating the curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Priors {
    pub growth_rate: (f64, f64),
    pub inflection: (f64, f64),
    pub log_capacity: (f64, f64),
}

impl Priors {
    pub fn new(coal: &CoalescenceTimes, log_capacity: (f64, f64)) -> Self {
        //! Priors for one tree: the inflection bound comes from the tree
        //! depth, the growth-rate bound is fixed.
        assert!(
            log_capacity.0 < log_capacity.1,
            "carrying-capacity bounds must be increasing"
        );
        Priors {
            growth_rate: GROWTH_RATE_BOUNDS,
            inflection: coal.inflection_bounds(),
            log_capacity,
        }
    }

    pub fn contains(&self, params: &GrowthParams) -> bool {
        let inside = |(lo, hi): (f64, f64), value: f64| value >= lo && value <= hi;
        inside(self.growth_rate, params.s)
            && inside(self.inflection, params.tm)
            && inside(self.log_capacity, params.log_n)
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> GrowthParams {
        GrowthParams {
            s: Uniform::new(self.growth_rate.0, self.growth_rate.1).sample(rng),
            tm: Uniform::new(self.inflection.0, self.inflection.1).sample(rng),
            log_n: Uniform::new(self.log_capacity.0, self.log_capacity.1).sample(rng),
        }
    }

    /// Width of each parameter's support, in `(s, tm, log_n)` order. Used to
    /// scale the sampler's initial proposal steps.
    pub fn widths(&self) -> [f64; 3] {
        [
            self.growth_rate.1 - self.growth_rate.0,
            self.inflection.1 - self.inflection.0,
            self.log_capacity.1 - self.log_capacity.0,
        ]
    }
}

/// Likelihood of the observed coalescence times under deterministic logistic
/// growth of the effective population size.
///
/// Lineage pairs coalesce at a rate proportional to the inverse of the
/// logistic population-size curve, scaled by the number of extant pairs.
/// The deterministic curve stands in for the stochastic birth-death
/// trajectory, which is the documented source of interval miscalibration in
/// the validation sweeps.
#[derive(Debug, Clone, PartialEq)]
pub struct LogisticModel {
    times: Vec<f64>,
    depth: f64,
}

impl From<CoalescenceTimes> for LogisticModel {
    fn from(coal: CoalescenceTimes) -> Self {
        let depth = coal.depth();
        LogisticModel { times: coal.times().to_vec(), depth }
    }
}

impl LogisticModel {
    pub fn log_likelihood(&self, params: &GrowthParams) -> f64 {
        //! Accumulate the log-likelihood over coalescence indices `k = 2..n`:
        //! the log hazard at each event plus the integrated hazard over the
        //! inter-coalescence interval. Exponents past the `f64::exp` range
        //! saturate the result to `-inf` so an MCMC kernel rejects the draw
        //! instead of propagating `inf`/`NaN`.
        let s = params.s;
        let n_cap = 10f64.powf(params.log_n);
        let log_n_cap = params.log_n * std::f64::consts::LN_10;
        let t = &self.times;
        let offset = self.depth - params.tm;

        let mut ll = 0.0;
        for k in 2..=t.len() {
            let t_prev = t[k - 2];
            let t_k = t[k - 1];
            let pairs = (k * (k - 1)) as f64 / 2.0;
            let gap = t_prev - t_k;

            // integrated hazard exponents, bounded by b + s * gap
            let b = s * (t_k - offset);
            if b + s * gap > MAX_EXP {
                return f64::NEG_INFINITY;
            }

            ll += ln_1p_exp(s * (t_prev - offset));
            ll -= pairs / (s * n_cap) * b.exp() * (s * gap).exp_m1();
            ll += pairs * (t_k - t_prev) / n_cap + pairs.ln() - log_n_cap;
        }
        ll
    }

    pub fn log_posterior(&self, params: &GrowthParams, priors: &Priors) -> f64 {
        //! Uniform priors make the posterior proportional to the likelihood
        //! inside the bounds and zero outside.
        if !priors.contains(params) {
            return f64::NEG_INFINITY;
        }
        self.log_likelihood(params)
    }

    /// Number of coalescence events contributing to the likelihood.
    pub fn n_events(&self) -> usize {
        self.times.len() - 1
    }

    pub fn depth(&self) -> f64 {
        self.depth
    }
}

fn ln_1p_exp(x: f64) -> f64 {
    //! `ln(1 + exp(x))` without overflowing for large `x`.
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}
