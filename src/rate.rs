//! Rate constants from an ensemble of rescaled transition times.
//!
//! For a rare event the escape times follow a first-order (Poisson) process, so their
//! cumulative distribution is
//!
//! $$
//!     F(t) = 1 - e^{-t/\tau}
//! $$
//!
//! The mean lifetime $\tau$ is fitted to the empirical CDF of the rescaled times and the
//! rate constant is $k = 1/\tau$. Whether the data really are exponential is checked by
//! $\mu/\sigma \approx 1$, $t_m/(\mu \ln 2) \approx 1$ and a two-sample Kolmogorov–Smirnov test
//! against a large sample drawn from the fitted distribution.
//!
//! Salvalaglio M, Tiwary P and Parrinello M. Assessing the Reliability of the Dynamics
//! Reconstructed from Metadynamics. J. Chem. Theory Comput. 10:1420, 2014.
//! <https://doi.org/10.1021/ct500040r>

use crate::config::AnalysisConfig;
use crate::errors::*;
use crate::stats::{self, ExponentialFit, KsTest, Summary};
use ndarray::{Array1, ArrayView1, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Serialize, Serializer};
use std::f64::consts::LN_2;
use std::fmt;
use tracing::{info, warn};

/// Everything inferred from one ensemble of transition times
#[derive(Debug, Clone, Serialize)]
pub struct RateEstimate {
    /// Number of transition times
    pub n: usize,
    /// Mean transition time $\mu$ in seconds
    pub mu: f64,
    /// Population standard deviation $\sigma$ in seconds
    pub sigma: f64,
    /// Median transition time $t_m$ in seconds
    pub median: f64,
    /// Fitted mean lifetime $\tau$ in seconds
    pub tau: f64,
    /// Escape rate constant $k = 1/\tau$ in s⁻¹
    pub k: f64,
    /// $\mu/\sigma$, 1 for an exponential distribution and infinite for identical times
    #[serde(serialize_with = "serialize_ratio")]
    pub mu_over_sigma: f64,
    /// $t_m/(\mu \ln 2)$, 1 for an exponential distribution
    #[serde(serialize_with = "serialize_ratio")]
    pub median_over_mu_ln2: f64,
    /// KS distance between the ensemble and the synthetic sample
    pub ks_statistic: f64,
    /// KS p-value
    pub ks_p_value: f64,
    /// Significance level the p-value was judged at
    pub significance: f64,
    /// Is the exponential hypothesis rejected at `significance`?
    pub exponential_rejected: bool,
    /// Size of the synthetic sample
    pub synthetic_samples: usize,
    /// Details of the curve fit
    pub fit: ExponentialFit,
    #[serde(skip)]
    times_sorted: Array1<f64>,
    #[serde(skip)]
    ecdf: Array1<f64>,
}

/// JSON has no infinity; a non-finite ratio is written as the string `"inf"`, `"-inf"` or `"NaN"`
fn serialize_ratio<S>(ratio: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if ratio.is_finite() {
        serializer.serialize_f64(*ratio)
    } else {
        serializer.serialize_str(&ratio.to_string())
    }
}

impl RateEstimate {
    /// Points `(t, ECDF, TCDF)` of the empirical CDF and the fitted CDF at the sorted times
    pub fn cdf_points(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        let tau = self.tau;
        self.times_sorted
            .iter()
            .zip(self.ecdf.iter())
            .map(move |(&t, &p)| (t, p, stats::exponential_cdf(t, tau)))
    }

    /// Summary statistics of the ensemble
    pub fn summary(&self) -> Summary {
        Summary {
            mean: self.mu,
            std_dev: self.sigma,
            median: self.median,
        }
    }

    /// Outcome of the goodness-of-fit test
    pub fn ks_test(&self) -> KsTest {
        KsTest {
            statistic: self.ks_statistic,
            p_value: self.ks_p_value,
        }
    }

    /// Serialise the estimate as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for RateEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "runs = {}", self.n)?;
        writeln!(f, "mu/sigma = {}", self.mu_over_sigma)?;
        writeln!(f, "tm/(muln2) = {}", self.median_over_mu_ln2)?;
        writeln!(f, "mu = {:.3e} s", self.mu)?;
        writeln!(f, "tau = {:.3e} s", self.tau)?;
        writeln!(f, "k_escape = {:.3e} s-1", self.k)?;
        writeln!(f, "ks statistic = {:.4}", self.ks_statistic)?;
        write!(f, "pvalue = {}", self.ks_p_value)?;
        if self.exponential_rejected {
            write!(
                f,
                " (below {}: escape times are not convincingly exponential)",
                self.significance
            )?;
        }
        Ok(())
    }
}

/// Check that every transition time is finite and strictly positive
pub fn check_ensemble(times: ArrayView1<'_, f64>) -> Result<()> {
    match times
        .iter()
        .enumerate()
        .find(|(_, t)| !(t.is_finite() && **t > 0.0))
    {
        Some((index, &value)) => Err(ImetadError::InvalidEnsemble { index, value }),
        None => Ok(()),
    }
}

/// Estimate the escape rate from rescaled transition times (seconds)
///
/// The synthetic sample for the KS test is seeded from `config.seed()` when set.
///
/// # Examples
///
/// ```
/// use imetad_rs::config::AnalysisConfig;
/// use imetad_rs::rate::estimate_rate;
/// use ndarray::array;
///
/// let config = AnalysisConfig::builder()
///     .synthetic_samples(10_000)
///     .seed(1)
///     .build()
///     .unwrap();
/// let times = array![2.1e-6, 0.4e-6, 5.3e-6, 1.2e-6, 0.9e-6, 3.0e-6, 0.2e-6, 1.7e-6];
/// let estimate = estimate_rate(times.view(), &config).unwrap();
/// assert!((estimate.k * estimate.tau - 1.0).abs() < 1e-12);
/// ```
pub fn estimate_rate(times: ArrayView1<'_, f64>, config: &AnalysisConfig) -> Result<RateEstimate> {
    let mut rng = match config.seed() {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    estimate_rate_with_rng(times, config, &mut rng)
}

/// Estimate the escape rate, drawing the synthetic KS sample from `rng`
pub fn estimate_rate_with_rng<R: Rng + ?Sized>(
    times: ArrayView1<'_, f64>,
    config: &AnalysisConfig,
    rng: &mut R,
) -> Result<RateEstimate> {
    check_ensemble(times)?;
    let n = times.len();
    let ecdf = stats::ecdf(n)?;
    let Summary {
        mean: mu,
        std_dev: sigma,
        median,
    } = stats::summarize(times)?;

    let times_sorted = stats::sorted(times);
    let fit = stats::fit_exponential_cdf(
        times_sorted.view(),
        ecdf.view(),
        mu,
        config.max_fit_iterations(),
        config.fit_tolerance(),
    )?;
    let tau = fit.tau;
    let k = 1.0 / tau;

    let mu_over_sigma = mu / sigma;
    let median_over_mu_ln2 = median / (mu * LN_2);
    info!(n, mu_over_sigma, median_over_mu_ln2, "Poisson diagnostics");
    info!(
        mu = %format!("{:.3e} s", mu),
        tau = %format!("{:.3e} s", tau),
        k = %format!("{:.3e} s^-1", k),
        iterations = fit.iterations,
        "fitted exponential CDF"
    );

    let synthetic = stats::sample_exponential(tau, config.synthetic_samples(), rng);
    let KsTest { statistic, p_value } = stats::ks_2samp(times, synthetic.view())?;
    let exponential_rejected = p_value < config.significance();
    if exponential_rejected {
        warn!(
            p_value,
            significance = config.significance(),
            "KS test rejects exponential escape times"
        );
    } else {
        info!(ks_statistic = statistic, p_value, "KS test");
    }

    Ok(RateEstimate {
        n,
        mu,
        sigma,
        median,
        tau,
        k,
        mu_over_sigma,
        median_over_mu_ln2,
        ks_statistic: statistic,
        ks_p_value: p_value,
        significance: config.significance(),
        exponential_rejected,
        synthetic_samples: config.synthetic_samples(),
        fit,
        times_sorted,
        ecdf,
    })
}

/// Largest vertical distance between the ECDF and the fitted CDF at the sample points
pub fn max_cdf_deviation(estimate: &RateEstimate) -> f64 {
    Zip::from(&estimate.times_sorted)
        .and(&estimate.ecdf)
        .fold(0.0, |d: f64, &t, &p| {
            d.max((p - stats::exponential_cdf(t, estimate.tau)).abs())
        })
}
