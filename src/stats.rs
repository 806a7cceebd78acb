//! The statistics behind the rate estimate: summary statistics, empirical and exponential
//! CDFs, a one-parameter Levenberg–Marquardt fit, inverse-transform sampling and the
//! two-sample Kolmogorov–Smirnov test.

use crate::errors::*;
use ndarray::{Array1, Array2, ArrayView1, Zip};
use rand::Rng;
use serde::Serialize;
use tracing::debug;

/// Mean, population standard deviation and median of a sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    #[allow(missing_docs)]
    pub mean: f64,
    /// Population standard deviation (divides by $N$)
    pub std_dev: f64,
    /// Middle value, or the mean of the two middle values for even $N$
    pub median: f64,
}

/// Summarise a non-empty sample
pub fn summarize(x: ArrayView1<'_, f64>) -> Result<Summary> {
    let mean = x.mean().ok_or(ImetadError::InsufficientSamples {
        required: 1,
        found: 0,
    })?;
    let std_dev = x.std(0.0);

    let sorted = sorted(x);
    let n = sorted.len();
    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    };

    Ok(Summary {
        mean,
        std_dev,
        median,
    })
}

/// Produce an ascending copy of an array; ties keep their input order
pub fn sorted(x: ArrayView1<'_, f64>) -> Array1<f64> {
    let mut v = x.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    Array1::from(v)
}

/// Empirical CDF values $i/(N-1)$ of the $N$ ascending samples
///
/// This normalisation puts the first sample at 0 and the last at 1. It is a fixed
/// convention of the method and only matches $i/N$ asymptotically.
pub fn ecdf(n: usize) -> Result<Array1<f64>> {
    if n < 2 {
        return Err(ImetadError::InsufficientSamples {
            required: 2,
            found: n,
        });
    }
    let denom = (n - 1) as f64;
    Ok((0..n).map(|i| i as f64 / denom).collect())
}

/// CDF of an exponential distribution with mean `tau`, $F(t) = 1 - e^{-t/\tau}$
pub fn exponential_cdf(t: f64, tau: f64) -> f64 {
    -(-t / tau).exp_m1()
}

/// Derivative of [`exponential_cdf`] with respect to `tau`
fn exponential_cdf_dtau(t: f64, tau: f64) -> f64 {
    -(t / (tau * tau)) * (-t / tau).exp()
}

/// Draw `n` samples from an exponential distribution of mean `tau` by inverse transform
///
/// $x = -\tau \ln(1 - u)$ with $u$ uniform on $[0, 1)$, so every draw is finite.
pub fn sample_exponential<R: Rng + ?Sized>(tau: f64, n: usize, rng: &mut R) -> Array1<f64> {
    (0..n)
        .map(|_| {
            let u: f64 = rng.gen();
            -tau * (-u).ln_1p()
        })
        .collect()
}

/// Result of a least-squares fit of the exponential CDF
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExponentialFit {
    /// Fitted mean lifetime
    pub tau: f64,
    /// Sum of squared residuals at `tau`
    pub residual_sum_of_squares: f64,
    /// Levenberg–Marquardt trial steps taken
    pub iterations: usize,
}

/// Fit $F(t; \tau)$ to the points `(t, y)` by Levenberg–Marquardt, starting from `tau0`
///
/// Converges when the proposed step is below `tolerance` relative to $\tau$, or when an
/// accepted step reduces the residual by less than `tolerance` relative to it. Every trial
/// step counts against `max_iterations`; running out is a [`ImetadError::FitConvergence`].
pub fn fit_exponential_cdf(
    t: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
    tau0: f64,
    max_iterations: usize,
    tolerance: f64,
) -> Result<ExponentialFit> {
    if t.len() != y.len() {
        return Err(ImetadError::ArrayLengthMismatch(y.len(), t.len()));
    }

    let cost = |tau: f64| -> f64 {
        Zip::from(&t)
            .and(&y)
            .fold(0.0, |acc, &ti, &yi| acc + (exponential_cdf(ti, tau) - yi).powi(2))
    };

    let mut tau = tau0;
    let mut current = cost(tau);
    if !(tau.is_finite() && tau > 0.0 && current.is_finite()) {
        return Err(ImetadError::FitConvergence {
            iterations: 0,
            last_tau: tau,
        });
    }

    let mut lambda = 1.0e-3;
    let mut iterations = 0;

    while iterations < max_iterations {
        let (jtj, jtr) = Zip::from(&t)
            .and(&y)
            .fold((0.0, 0.0), |(jtj, jtr), &ti, &yi| {
                let j = exponential_cdf_dtau(ti, tau);
                let r = exponential_cdf(ti, tau) - yi;
                (jtj + j * j, jtr + j * r)
            });
        if !(jtj > 0.0 && jtj.is_finite() && jtr.is_finite()) {
            break;
        }

        // Damp until a step lowers the residual or becomes negligible
        while iterations < max_iterations {
            iterations += 1;
            let step = -jtr / (jtj * (1.0 + lambda));
            debug!(iterations, tau, step, lambda, "Levenberg-Marquardt trial");

            if step.abs() <= tolerance * (tau.abs() + tolerance) {
                return Ok(ExponentialFit {
                    tau,
                    residual_sum_of_squares: current,
                    iterations,
                });
            }

            let candidate = tau + step;
            if candidate > 0.0 {
                let trial = cost(candidate);
                if trial <= current {
                    let reduction = current - trial;
                    tau = candidate;
                    current = trial;
                    lambda = (lambda / 10.0).max(1.0e-12);
                    if reduction <= tolerance * (current + reduction) {
                        return Ok(ExponentialFit {
                            tau,
                            residual_sum_of_squares: current,
                            iterations,
                        });
                    }
                    break;
                }
            }
            lambda *= 10.0;
        }
    }

    Err(ImetadError::FitConvergence {
        iterations,
        last_tau: tau,
    })
}

/// Outcome of a Kolmogorov–Smirnov test
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KsTest {
    /// Largest distance between the two empirical CDFs
    pub statistic: f64,
    /// Two-sided p-value
    pub p_value: f64,
}

/// Two-sided two-sample Kolmogorov–Smirnov test
///
/// The p-value uses the Kolmogorov distribution at the effective sample size
/// $n_e = \mathrm{round}(nm/(n+m))$, exact for $n_e \le 1000$ and asymptotic beyond.
pub fn ks_2samp(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> Result<KsTest> {
    if a.is_empty() || b.is_empty() {
        return Err(ImetadError::InsufficientSamples {
            required: 1,
            found: a.len().min(b.len()),
        });
    }

    let statistic = ks_statistic(&sorted(a), &sorted(b));

    let (n, m) = (a.len() as f64, b.len() as f64);
    let effective = ((n * m / (n + m)).round() as usize).max(1);
    let p_value = kolmogorov_sf(effective, statistic);

    Ok(KsTest { statistic, p_value })
}

/// Largest distance between the empirical CDFs of two ascending samples
fn ks_statistic(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    let (n, m) = (a.len(), b.len());
    let (mut i, mut j) = (0, 0);
    let mut d: f64 = 0.0;

    while i < n && j < m {
        let x = a[i].min(b[j]);
        while i < n && a[i] <= x {
            i += 1;
        }
        while j < m && b[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / n as f64 - j as f64 / m as f64).abs());
    }
    d
}

/// Survival function $P(D_n \ge d)$ of the one-sample Kolmogorov statistic
pub fn kolmogorov_sf(n: usize, d: f64) -> f64 {
    if d <= 0.0 {
        return 1.0;
    }
    if d >= 1.0 {
        return 0.0;
    }
    if n > 1000 {
        return kolmogorov_asymptotic_sf((n as f64).sqrt() * d);
    }
    (1.0 - kolmogorov_cdf(n, d)).clamp(0.0, 1.0)
}

/// $P(D_n < d)$ by the matrix method of Marsaglia, Tsang and Wang (2003)
///
/// Marsaglia G, Tsang WW, Wang J. Evaluating Kolmogorov's distribution. J. Stat. Softw.
/// 8(18), 2003. <https://doi.org/10.18637/jss.v008.i18>
pub fn kolmogorov_cdf(n: usize, d: f64) -> f64 {
    let nf = n as f64;
    let s = d * d * nf;
    if s > 7.24 || (s > 3.76 && n > 99) {
        return 1.0 - 2.0 * (-(2.000071 + 0.331 / nf.sqrt() + 1.409 / nf) * s).exp();
    }

    let k = (nf * d) as usize + 1;
    let m = 2 * k - 1;
    let h = k as f64 - nf * d;

    let mut hm = Array2::<f64>::from_shape_fn((m, m), |(i, j)| if i + 1 >= j { 1.0 } else { 0.0 });
    for i in 0..m {
        hm[[i, 0]] -= h.powi(i as i32 + 1);
        hm[[m - 1, i]] -= h.powi((m - i) as i32);
    }
    if 2.0 * h - 1.0 > 0.0 {
        hm[[m - 1, 0]] += (2.0 * h - 1.0).powi(m as i32);
    }
    // Entries on and below the diagonal are divided by (i - j + 1)!
    for i in 0..m {
        for j in 0..=i {
            for g in 1..=(i + 1 - j) {
                hm[[i, j]] /= g as f64;
            }
        }
    }

    let (q, mut exponent) = matrix_power(&hm, 0, n);
    let mut s = q[[k - 1, k - 1]];
    for i in 1..=n {
        s = s * i as f64 / nf;
        if s < 1.0e-140 {
            s *= 1.0e140;
            exponent -= 140;
        }
    }
    s * 10f64.powi(exponent)
}

/// `a^n` with a decimal exponent carried alongside to avoid overflow
fn matrix_power(a: &Array2<f64>, a_exp: i32, n: usize) -> (Array2<f64>, i32) {
    if n == 1 {
        return (a.clone(), a_exp);
    }
    let (half, half_exp) = matrix_power(a, a_exp, n / 2);
    let squared = half.dot(&half);
    let (mut v, mut v_exp) = if n % 2 == 0 {
        (squared, 2 * half_exp)
    } else {
        (a.dot(&squared), a_exp + 2 * half_exp)
    };

    let centre = v.nrows() / 2;
    if v[[centre, centre]] > 1.0e140 {
        v.mapv_inplace(|x| x * 1.0e-140);
        v_exp += 140;
    }
    (v, v_exp)
}

/// Limiting survival function $Q(\lambda) = 2\sum_{k\ge1}(-1)^{k-1}e^{-2k^2\lambda^2}$
fn kolmogorov_asymptotic_sf(lambda: f64) -> f64 {
    if lambda < 0.27 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut sign = 1.0;
    for k in 1..=100 {
        let kf = k as f64;
        let term = (-2.0 * kf * kf * lambda * lambda).exp();
        sum += sign * term;
        if term < 1.0e-16 {
            break;
        }
        sign = -sign;
    }
    (2.0 * sum).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use crate::stats::*;
    use ndarray::array;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::f64::consts::LN_2;

    #[test]
    fn summary_statistics() {
        let x = array![4.0, 1.0, 3.0, 2.0];
        let summary = summarize(x.view()).unwrap();

        assert_eq!(summary.mean, 2.5);
        assert!((summary.std_dev - 1.25f64.sqrt()).abs() < 1e-12);
        assert_eq!(summary.median, 2.5);

        let odd = summarize(array![5.0, 1.0, 3.0].view()).unwrap();
        assert_eq!(odd.median, 3.0);
    }

    #[test]
    fn empty_sample_has_no_summary() {
        let x: Array1<f64> = array![];
        assert!(matches!(
            summarize(x.view()),
            Err(ImetadError::InsufficientSamples { .. })
        ));
    }

    #[test]
    fn ecdf_convention() {
        assert_eq!(ecdf(5).unwrap(), array![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert!(matches!(
            ecdf(1),
            Err(ImetadError::InsufficientSamples {
                required: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn fit_recovers_tau_from_exact_quantiles() {
        let n = 2000;
        let tau = 3.7e-6;
        let t: Array1<f64> = (0..n)
            .map(|i| -tau * (1.0 - (i as f64 + 0.5) / n as f64).ln())
            .collect();
        let y = ecdf(n).unwrap();
        let mean = t.mean().unwrap();

        let fit = fit_exponential_cdf(t.view(), y.view(), mean, 200, 1e-10).unwrap();
        assert!((fit.tau / tau - 1.0).abs() < 0.01, "tau = {}", fit.tau);
        assert!(fit.iterations <= 20);
    }

    #[test]
    fn fit_recovers_tau_from_random_samples() {
        let tau = 250.0;
        let mut rng = StdRng::seed_from_u64(11);
        let t = sorted(sample_exponential(tau, 5000, &mut rng).view());
        let y = ecdf(t.len()).unwrap();

        let fit = fit_exponential_cdf(t.view(), y.view(), t.mean().unwrap(), 200, 1e-10).unwrap();
        assert!((fit.tau / tau - 1.0).abs() < 0.06, "tau = {}", fit.tau);
    }

    #[test]
    fn fit_reports_non_convergence() {
        let t = array![1.0, 2.0, 3.0];
        let y = array![0.0, 0.5, 1.0];

        match fit_exponential_cdf(t.view(), y.view(), 100.0, 0, 1e-10) {
            Err(ImetadError::FitConvergence { iterations, .. }) => assert_eq!(iterations, 0),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(matches!(
            fit_exponential_cdf(t.view(), y.view(), f64::NAN, 200, 1e-10),
            Err(ImetadError::FitConvergence { .. })
        ));
    }

    #[test]
    fn poisson_diagnostics_of_large_sample() {
        let tau = 42.0;
        let mut rng = StdRng::seed_from_u64(3);
        let x = sample_exponential(tau, 100_000, &mut rng);
        let s = summarize(x.view()).unwrap();

        assert!((s.mean / s.std_dev - 1.0).abs() < 0.03);
        assert!((s.median / (s.mean * LN_2) - 1.0).abs() < 0.03);
        assert!((s.mean / tau - 1.0).abs() < 0.03);
    }

    #[test]
    fn ks_statistic_by_hand() {
        let a = array![3.0, 1.0, 2.0];
        let b = array![1.5, 2.5, 3.5, 4.5];
        assert!((ks_2samp(a.view(), b.view()).unwrap().statistic - 0.5).abs() < 1e-12);

        let ties = ks_2samp(array![1.0, 2.0].view(), array![2.0, 3.0].view()).unwrap();
        assert!((ties.statistic - 0.5).abs() < 1e-12);

        let same = ks_2samp(a.view(), a.view()).unwrap();
        assert_eq!(same.statistic, 0.0);
        assert_eq!(same.p_value, 1.0);
    }

    #[test]
    fn kolmogorov_distribution_reference_values() {
        // Marsaglia, Tsang and Wang (2003), section 4
        assert!((kolmogorov_cdf(10, 0.274) - 0.6284796154565043).abs() < 1e-12);
        assert!((kolmogorov_sf(30, 0.2) - 0.157969).abs() < 1e-5);
        assert_eq!(kolmogorov_sf(30, 0.0), 1.0);
        assert_eq!(kolmogorov_sf(30, 1.0), 0.0);

        // The exact and limiting forms agree for large n
        let exact = kolmogorov_sf(1000, 0.03);
        let limit = kolmogorov_asymptotic_sf(1000f64.sqrt() * 0.03);
        assert!((exact - limit).abs() < 0.02);
    }

    #[test]
    fn ks_accepts_matching_distributions() {
        let tau = 5.0;
        let mut rng = StdRng::seed_from_u64(2024);
        let reference = sample_exponential(tau, 100_000, &mut rng);

        let mut p_values: Vec<f64> = (0..11)
            .map(|_| {
                let observed = sample_exponential(tau, 500, &mut rng);
                ks_2samp(observed.view(), reference.view()).unwrap().p_value
            })
            .collect();
        p_values.sort_by(|a, b| a.total_cmp(b));
        assert!(p_values[5] > 0.05, "median p-value {}", p_values[5]);
    }

    #[test]
    fn ks_rejects_different_distributions() {
        let mut rng = StdRng::seed_from_u64(99);
        let a = sample_exponential(1.0, 500, &mut rng);
        let b = sample_exponential(3.0, 500, &mut rng);

        let test = ks_2samp(a.view(), b.view()).unwrap();
        assert!(test.statistic > 0.2);
        assert!(test.p_value < 1e-6);
    }

    proptest! {
        #[test]
        fn ecdf_is_monotone_from_zero_to_one(n in 2usize..500) {
            let values = ecdf(n).unwrap();
            prop_assert_eq!(values[0], 0.0);
            prop_assert_eq!(values[n - 1], 1.0);
            prop_assert!(values.windows(2).into_iter().all(|w| w[0] <= w[1]));
        }

        #[test]
        fn sorting_is_ascending(x in proptest::collection::vec(0.0f64..1.0e6, 1..200)) {
            let s = sorted(Array1::from(x).view());
            prop_assert!(s.windows(2).into_iter().all(|w| w[0] <= w[1]));
        }
    }
}
