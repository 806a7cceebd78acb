//! Synthetic trajectories with known crossings, for tests and demos.

use crate::errors::*;
use crate::trajectory::Trajectory;
use ndarray::Array1;
use rand::Rng;
use std::f64::consts::PI;

/// An engineered trajectory with a single, known barrier crossing.
///
/// The coordinate sits at `reactant_value` up to and including `barrier_index`, lingers at
/// `intermediate_value` (inside the barrier window but outside the product window) until
/// `product_index`, and stays at `product_value` from there on. The bias is a linear ramp
/// `bias_offset + bias_slope * t`, flat and zero by default.
///
/// # Examples
///
/// ```
/// use imetad_rs::testsystems::*;
///
/// let traj = SyntheticTrajectory::builder()
///     .len(80)
///     .barrier_index(10)
///     .product_index(50)
///     .build()
///     .unwrap()
///     .generate();
/// assert_eq!(traj.len(), 80);
/// ```
#[derive(Builder, Debug, Clone)]
#[builder(build_fn(validate = "Self::validate", name = "build_inner", private))]
pub struct SyntheticTrajectory {
    /// Number of samples
    #[builder(default = "100")]
    len: usize,

    /// Time step
    #[builder(default = "1.0")]
    dt: f64,

    /// Last sample on the reactant side
    #[builder(default = "10")]
    barrier_index: usize,

    /// First sample in the product state
    #[builder(default = "50")]
    product_index: usize,

    /// Coordinate value before the crossing
    #[builder(default = "PI")]
    reactant_value: f64,

    /// Coordinate value on top of the barrier
    #[builder(default = "0.35 * PI")]
    intermediate_value: f64,

    /// Coordinate value after the crossing
    #[builder(default = "0.0")]
    product_value: f64,

    /// Bias at time zero in kJ/mol
    #[builder(default = "0.0")]
    bias_offset: f64,

    /// Bias growth in kJ/mol per time unit
    #[builder(default = "0.0")]
    bias_slope: f64,
}

impl SyntheticTrajectoryBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        let len = self.len.unwrap_or(100);
        let barrier = self.barrier_index.unwrap_or(10);
        let product = self.product_index.unwrap_or(50);

        if !(barrier < product && product < len) {
            return Err(format!(
                "need barrier_index < product_index < len (not {} < {} < {})",
                barrier, product, len
            ));
        }
        if let Some(dt) = self.dt {
            if !(dt > 0.0) {
                return Err(format!("dt must be positive (not {})", dt));
            }
        }

        Ok(())
    }

    /// Build the trajectory description
    pub fn build(&self) -> Result<SyntheticTrajectory> {
        Ok(self.build_inner()?)
    }
}

impl SyntheticTrajectory {
    /// Get a new builder for the `SyntheticTrajectory` struct
    pub fn builder() -> SyntheticTrajectoryBuilder {
        SyntheticTrajectoryBuilder::default()
    }

    /// Generate the trajectory
    pub fn generate(&self) -> Trajectory {
        let time: Array1<f64> = (0..self.len).map(|n| n as f64 * self.dt).collect();
        let coordinate = (0..self.len)
            .map(|n| {
                if n <= self.barrier_index {
                    self.reactant_value
                } else if n < self.product_index {
                    self.intermediate_value
                } else {
                    self.product_value
                }
            })
            .collect();
        let bias = time
            .iter()
            .map(|t| self.bias_offset + self.bias_slope * t)
            .collect();

        Trajectory::from_columns(time, coordinate, bias)
            .expect("validated synthetic trajectory is well formed")
    }
}

/// Runs whose unbiased escape times follow a first-order (Poisson) process.
///
/// Each run draws an unbiased escape time from an exponential distribution of mean `tau`
/// (trajectory time units), then lays out a trajectory under a constant bias `bias` so that
/// the reweighted escape time reproduces the draw up to the time step.
#[derive(Builder, Debug, Clone)]
#[builder(build_fn(validate = "Self::validate", name = "build_inner", private))]
pub struct PoissonEscape {
    /// Mean unbiased escape time
    #[builder(default = "1000.0")]
    tau: f64,

    /// Time step
    #[builder(default = "1.0")]
    dt: f64,

    /// Constant bias in kJ/mol
    #[builder(default = "0.0")]
    bias: f64,

    /// Inverse temperature in mol/kJ
    #[builder(default = "1.0")]
    beta: f64,

    /// Samples recorded after entering the product state
    #[builder(default = "5")]
    tail: usize,

    /// Longest pre-crossing stretch to lay out; slower draws are cut to this many steps
    #[builder(default = "1_000_000")]
    max_steps: usize,
}

impl PoissonEscapeBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(tau) = self.tau {
            if !(tau.is_finite() && tau > 0.0) {
                return Err(format!("tau must be positive (not {})", tau));
            }
        }
        if let Some(dt) = self.dt {
            if !(dt.is_finite() && dt > 0.0) {
                return Err(format!("dt must be positive (not {})", dt));
            }
        }

        let bias = self.bias.unwrap_or(0.0);
        let beta = self.beta.unwrap_or(1.0);
        if !(bias.is_finite() && beta.is_finite()) {
            return Err(format!("bias ({}) and beta ({}) must be finite", bias, beta));
        }
        let acceleration = (beta * bias).exp();
        if !(acceleration.is_finite() && acceleration > 0.0) {
            return Err(format!(
                "acceleration factor exp({}) is out of range",
                beta * bias
            ));
        }

        if self.max_steps == Some(0) {
            return Err("max_steps must be at least 1".to_string());
        }

        Ok(())
    }

    /// Build the escape process
    pub fn build(&self) -> Result<PoissonEscape> {
        Ok(self.build_inner()?)
    }
}

impl PoissonEscape {
    /// Get a new builder for the `PoissonEscape` struct
    pub fn builder() -> PoissonEscapeBuilder {
        PoissonEscapeBuilder::default()
    }

    /// Acceleration factor of the constant bias
    pub fn acceleration(&self) -> f64 {
        (self.beta * self.bias).exp()
    }

    /// Draw one run
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Trajectory {
        let u: f64 = rng.gen();
        let unbiased = -self.tau * (1.0 - u).ln();
        // The rescaled time integrates barrier_index - 1 samples
        let steps = (unbiased / (self.dt * self.acceleration()))
            .round()
            .clamp(1.0, self.max_steps as f64) as usize;
        let barrier_index = steps + 1;

        SyntheticTrajectory {
            len: barrier_index + 2 + self.tail,
            dt: self.dt,
            barrier_index,
            product_index: barrier_index + 2,
            reactant_value: PI,
            intermediate_value: 0.35 * PI,
            product_value: 0.0,
            bias_offset: self.bias,
            bias_slope: 0.0,
        }
        .generate()
    }
}

#[cfg(test)]
mod tests {
    use crate::testsystems::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn build_synthetic_trajectory() {
        let traj = SyntheticTrajectory::builder()
            .len(60)
            .dt(0.5)
            .bias_slope(0.1)
            .build()
            .unwrap()
            .generate();

        assert_eq!(traj.len(), 60);
        assert_eq!(traj.time()[4], 2.0);
        assert_eq!(traj.coordinate()[10], PI);
        assert_eq!(traj.coordinate()[11], 0.35 * PI);
        assert_eq!(traj.coordinate()[50], 0.0);
        assert!((traj.bias()[20] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn reject_misordered_indices() {
        assert!(SyntheticTrajectory::builder()
            .barrier_index(20)
            .product_index(20)
            .build()
            .is_err());
        assert!(SyntheticTrajectory::builder()
            .product_index(100)
            .build()
            .is_err());
    }

    #[test]
    fn poisson_escape_runs_cross_once() {
        let process = PoissonEscape::builder()
            .tau(200.0)
            .bias(2.0)
            .build()
            .unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..20 {
            let traj = process.sample(&mut rng);
            let barrier = traj
                .coordinate()
                .iter()
                .rposition(|&x| x == PI)
                .unwrap();
            assert!(barrier >= 2);
            assert_eq!(traj.coordinate()[barrier + 2], 0.0);
        }
    }

    #[test]
    fn reject_unusable_bias() {
        assert!(PoissonEscape::builder().bias(f64::NAN).build().is_err());
        assert!(PoissonEscape::builder().beta(f64::INFINITY).build().is_err());
        assert!(PoissonEscape::builder()
            .bias(-1000.0)
            .beta(1.0)
            .build()
            .is_err());
        assert!(PoissonEscape::builder().max_steps(0).build().is_err());
    }

    #[test]
    fn slow_draws_are_cut_to_max_steps() {
        // exp(-100) leaves every draw far beyond max_steps
        let process = PoissonEscape::builder()
            .bias(-100.0)
            .max_steps(50)
            .tail(3)
            .build()
            .unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        for _ in 0..10 {
            let traj = process.sample(&mut rng);
            assert_eq!(traj.len(), 50 + 1 + 2 + 3);
        }
    }
}
