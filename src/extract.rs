//! Transition times from biased trajectories.
//!
//! Each run is scanned for its first entry into the product window and for the last sample
//! before it that is still clearly on the reactant side of the barrier. The observed (biased)
//! escape time is read off the trajectory, and the unbiased-equivalent time is recovered by
//! integrating the acceleration factor $e^{\beta V(t)}$ up to the crossing:
//!
//! $$
//!     t^* = \Delta t \sum_{i=0}^{c-2} e^{\beta V(t_i)}
//! $$
//!
//! where $c$ is the barrier index.

use crate::config::{AnalysisConfig, FailurePolicy};
use crate::errors::*;
use crate::trajectory::{Depositions, Trajectory};
use ndarray::{s, Array1, ArrayView1};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

/// Indices that delimit the observed barrier crossing of one trajectory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossing {
    /// First sample inside the product window
    pub product_index: usize,
    /// Last sample before `product_index` still beyond the barrier window
    pub barrier_index: usize,
}

/// Side of the product state the barrier was crossed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossingDirection {
    /// The coordinate at the barrier index is above the product reference
    Positive,
    /// The coordinate at the barrier index is at or below the product reference
    Negative,
}

impl CrossingDirection {
    /// Numeric flag as stored in the barriers array: 1 for positive, 0 for negative
    pub fn as_flag(self) -> f64 {
        match self {
            Self::Positive => 1.0,
            Self::Negative => 0.0,
        }
    }
}

/// Transition times extracted from one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    /// Run number
    pub run: usize,
    /// See [`Crossing::product_index`]
    pub product_index: usize,
    /// See [`Crossing::barrier_index`]
    pub barrier_index: usize,
    /// Observed escape time in trajectory time units
    pub unscaled_time: f64,
    /// Reweighted escape time in seconds
    pub rescaled_time: f64,
    /// Side the barrier was crossed from
    pub direction: CrossingDirection,
    /// Observed over rescaled escape time, both in trajectory time units
    ///
    /// With time starting at zero this is $1/\langle e^{\beta V} \rangle$, the inverse of the mean
    /// acceleration factor over the pre-crossing samples.
    pub alpha: f64,
    /// Gaussians deposited before the observed escape, if deposition records were read
    pub depositions_before_escape: Option<usize>,
}

impl RunResult {
    /// Rate of this single transition, $1/t^*$, in s⁻¹
    pub fn rate(&self) -> f64 {
        1.0 / self.rescaled_time
    }
}

/// Find the first sample inside the product-state window
pub fn product_state_index(
    coordinate: ArrayView1<'_, f64>,
    config: &AnalysisConfig,
) -> Result<usize> {
    coordinate
        .iter()
        .position(|&x| config.in_product_window(x))
        .ok_or(ImetadError::MissingCrossing {
            stage: CrossingStage::ProductState,
        })
}

/// Find the last sample before `product_index` that lies beyond the barrier window
pub fn barrier_index(
    coordinate: ArrayView1<'_, f64>,
    product_index: usize,
    config: &AnalysisConfig,
) -> Result<usize> {
    coordinate
        .slice(s![..product_index])
        .iter()
        .rposition(|&x| config.beyond_barrier(x))
        .ok_or(ImetadError::MissingCrossing {
            stage: CrossingStage::Barrier,
        })
}

/// Locate the observed crossing of a trajectory
///
/// # Examples
///
/// ```
/// use imetad_rs::config::AnalysisConfig;
/// use imetad_rs::extract::locate_crossing;
/// use imetad_rs::testsystems::SyntheticTrajectory;
///
/// let traj = SyntheticTrajectory::builder()
///     .barrier_index(10)
///     .product_index(50)
///     .build()
///     .unwrap()
///     .generate();
/// let crossing = locate_crossing(&traj, &AnalysisConfig::default()).unwrap();
/// assert_eq!((crossing.barrier_index, crossing.product_index), (10, 50));
/// ```
pub fn locate_crossing(traj: &Trajectory, config: &AnalysisConfig) -> Result<Crossing> {
    let coordinate = traj.coordinate();
    let product_index = product_state_index(coordinate, config)?;
    let barrier_index = barrier_index(coordinate, product_index, config)?;
    Ok(Crossing {
        product_index,
        barrier_index,
    })
}

/// Reweighted escape time in trajectory time units
///
/// Left Riemann sum of $e^{\beta V}$ over the samples before `barrier_index - 1`. A barrier
/// index below 2 leaves nothing to integrate and is reported as degenerate.
pub fn rescaled_time(traj: &Trajectory, barrier_index: usize, beta: f64) -> Result<f64> {
    if barrier_index < 2 || barrier_index > traj.len() {
        return Err(ImetadError::DegenerateIndex {
            index: barrier_index,
        });
    }

    let weight: f64 = traj
        .bias_before(barrier_index - 1)
        .iter()
        .map(|&v| (beta * v).exp())
        .sum();
    let time = traj.dt() * weight;

    if time.is_finite() && time > 0.0 {
        Ok(time)
    } else {
        Err(ImetadError::NonFiniteTime(time))
    }
}

/// Extract the transition times of a single run
pub fn extract_run(
    run: usize,
    traj: &Trajectory,
    depositions: Option<&Depositions>,
    config: &AnalysisConfig,
) -> Result<RunResult> {
    let Crossing {
        product_index,
        barrier_index,
    } = locate_crossing(traj, config)?;
    info!(run, product_index, barrier_index, "located crossing");

    if barrier_index == 0 {
        return Err(ImetadError::DegenerateIndex { index: 0 });
    }
    let unscaled_time = traj.time()[barrier_index - 1];
    let escape_position = traj.coordinate()[barrier_index];
    let direction = if escape_position > config.product_reference() {
        CrossingDirection::Positive
    } else {
        CrossingDirection::Negative
    };

    let rescaled = rescaled_time(traj, barrier_index, config.beta())?;
    let alpha = unscaled_time / rescaled;
    let rescaled_seconds = rescaled * config.time_unit_in_seconds();

    let depositions_before_escape = depositions.map(|d| d.count_before(unscaled_time));

    let result = RunResult {
        run,
        product_index,
        barrier_index,
        unscaled_time,
        rescaled_time: rescaled_seconds,
        direction,
        alpha,
        depositions_before_escape,
    };
    info!(
        run,
        escape_time = unscaled_time,
        escape_position,
        rescaled_time = %format!("{:.3e} s", rescaled_seconds),
        alpha,
        rate = %format!("{:.3e} s^-1", result.rate()),
        "extracted transition time"
    );

    Ok(result)
}

/// Transition times of a batch of runs
#[derive(Debug, Default)]
pub struct Batch {
    /// Successful runs in run order
    pub results: Vec<RunResult>,
    /// Runs left out under [`FailurePolicy::Exclude`], each wrapped in [`ImetadError::Run`]
    pub failures: Vec<ImetadError>,
}

impl Batch {
    /// Observed escape times, in trajectory time units
    pub fn unscaled_times(&self) -> Array1<f64> {
        self.results.iter().map(|r| r.unscaled_time).collect()
    }

    /// Rescaled transition times in seconds; the ensemble consumed by rate estimation
    pub fn transition_times(&self) -> Array1<f64> {
        self.results.iter().map(|r| r.rescaled_time).collect()
    }

    /// Crossing direction flags (1 positive, 0 negative)
    pub fn barriers(&self) -> Array1<f64> {
        self.results.iter().map(|r| r.direction.as_flag()).collect()
    }

    /// Run numbers of the successful runs
    pub fn run_ids(&self) -> Array1<u64> {
        self.results.iter().map(|r| r.run as u64).collect()
    }
}

/// Extract every run of the batch, loading each one with `load`
///
/// Runs are processed in parallel; results keep run order. The configured [`FailurePolicy`]
/// decides whether a failed run aborts the batch (the lowest failing run number is reported)
/// or is set aside in [`Batch::failures`].
pub fn extract_with<F>(config: &AnalysisConfig, load: F) -> Result<Batch>
where
    F: Fn(usize) -> Result<(Trajectory, Option<Depositions>)> + Sync,
{
    let outcomes: Vec<(usize, Result<RunResult>)> = config
        .run_numbers()
        .into_par_iter()
        .map(|run| {
            let outcome = load(run)
                .and_then(|(traj, deps)| extract_run(run, &traj, deps.as_ref(), config));
            (run, outcome)
        })
        .collect();

    let mut batch = Batch::default();
    for (run, outcome) in outcomes {
        match outcome {
            Ok(result) => batch.results.push(result),
            Err(e) => match config.failure_policy() {
                FailurePolicy::Abort => return Err(e.in_run(run)),
                FailurePolicy::Exclude => {
                    warn!(run, error = %e, "excluding run from the ensemble");
                    batch.failures.push(e.in_run(run));
                }
            },
        }
    }

    info!(
        included = batch.results.len(),
        excluded = batch.failures.len(),
        "extracted batch"
    );
    Ok(batch)
}

/// Extract every run of the batch from the COLVAR (and HILLS) files named by `config`
pub fn extract_batch(config: &AnalysisConfig) -> Result<Batch> {
    extract_with(config, |run| {
        let traj = Trajectory::read_colvar(config.colvar_path(run), config.drop_trailing_rows())?;
        let deps = match config.hills_path(run) {
            Some(path) => Some(Depositions::read_hills(path)?),
            None => None,
        };
        Ok((traj, deps))
    })
}
