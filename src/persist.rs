//! `.npy` files connecting extraction and rate estimation.
//!
//! File names carry the configured run count so batches of different sizes can share a
//! directory: `unscaled_times_30_runs.npy`, `transition_times_30_runs.npy`,
//! `barriers_30_runs.npy` and `run_ids_30_runs.npy`. Rate estimation reads only the
//! transition times; `run_ids` may be absent, in which case runs are numbered in order.

use crate::config::AnalysisConfig;
use crate::errors::*;
use crate::extract::Batch;
use crate::rate::check_ensemble;
use ndarray::Array1;
use ndarray_npy::{read_npy, write_npy};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::info;

/// Locations of the four ensemble arrays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsemblePaths {
    /// Observed escape times in trajectory time units
    pub unscaled_times: PathBuf,
    /// Rescaled transition times in seconds
    pub transition_times: PathBuf,
    /// Crossing direction flags
    pub barriers: PathBuf,
    /// Run numbers of the stored entries
    pub run_ids: PathBuf,
}

impl EnsemblePaths {
    /// Paths for a batch of `runs` runs stored in `dir`
    pub fn new(dir: impl AsRef<Path>, runs: usize) -> Self {
        let dir = dir.as_ref();
        let name = |stem: &str| dir.join(format!("{}_{}_runs.npy", stem, runs));
        Self {
            unscaled_times: name("unscaled_times"),
            transition_times: name("transition_times"),
            barriers: name("barriers"),
            run_ids: name("run_ids"),
        }
    }

    /// Paths configured by `config`
    pub fn for_config(config: &AnalysisConfig) -> Self {
        Self::new(config.output_dir(), config.runs())
    }
}

/// The stored arrays of a batch, index-aligned
#[derive(Debug, Clone, PartialEq)]
pub struct Ensemble {
    /// Observed escape times in trajectory time units
    pub unscaled_times: Array1<f64>,
    /// Rescaled transition times in seconds
    pub transition_times: Array1<f64>,
    /// Crossing direction flags (1 positive, 0 negative)
    pub barriers: Array1<f64>,
    /// Run numbers
    pub run_ids: Array1<u64>,
}

impl From<&Batch> for Ensemble {
    fn from(batch: &Batch) -> Self {
        Self {
            unscaled_times: batch.unscaled_times(),
            transition_times: batch.transition_times(),
            barriers: batch.barriers(),
            run_ids: batch.run_ids(),
        }
    }
}

impl Ensemble {
    /// Number of stored runs
    pub fn len(&self) -> usize {
        self.transition_times.len()
    }

    /// Does the ensemble hold no runs?
    pub fn is_empty(&self) -> bool {
        self.transition_times.is_empty()
    }

    /// Write the four arrays, creating the directory if needed
    pub fn save(&self, paths: &EnsemblePaths) -> Result<()> {
        if let Some(dir) = paths.transition_times.parent() {
            std::fs::create_dir_all(dir)?;
        }
        write_npy(&paths.unscaled_times, &self.unscaled_times)?;
        write_npy(&paths.transition_times, &self.transition_times)?;
        write_npy(&paths.barriers, &self.barriers)?;
        write_npy(&paths.run_ids, &self.run_ids)?;
        info!(
            runs = self.len(),
            path = %paths.transition_times.display(),
            "saved transition times"
        );
        Ok(())
    }

    /// Read the arrays, checking that they line up and the times are valid
    ///
    /// Without a `run_ids` file the entries are numbered from `default_runs`, which must then
    /// match the ensemble in length.
    pub fn load(paths: &EnsemblePaths, default_runs: Range<usize>) -> Result<Self> {
        let run_ids = if paths.run_ids.exists() {
            read_npy(&paths.run_ids)?
        } else {
            default_runs.map(|run| run as u64).collect()
        };
        let ensemble = Self {
            unscaled_times: read_npy(&paths.unscaled_times)?,
            transition_times: read_npy(&paths.transition_times)?,
            barriers: read_npy(&paths.barriers)?,
            run_ids,
        };

        let n = ensemble.len();
        for len in [
            ensemble.unscaled_times.len(),
            ensemble.barriers.len(),
            ensemble.run_ids.len(),
        ] {
            if len != n {
                return Err(ImetadError::ArrayLengthMismatch(len, n));
            }
        }
        check_ensemble(ensemble.transition_times.view())?;

        Ok(ensemble)
    }
}

/// Save a batch where `config` says
pub fn save_batch(batch: &Batch, config: &AnalysisConfig) -> Result<EnsemblePaths> {
    let paths = EnsemblePaths::for_config(config);
    Ensemble::from(batch).save(&paths)?;
    Ok(paths)
}

/// Load the ensemble `config` points at
pub fn load_ensemble(config: &AnalysisConfig) -> Result<Ensemble> {
    Ensemble::load(&EnsemblePaths::for_config(config), config.run_numbers())
}

/// Load only the transition times `config` points at; all rate estimation needs
pub fn load_transition_times(config: &AnalysisConfig) -> Result<Array1<f64>> {
    let times: Array1<f64> = read_npy(EnsemblePaths::for_config(config).transition_times)?;
    check_ensemble(times.view())?;
    Ok(times)
}

#[cfg(test)]
mod tests {
    use crate::persist::*;
    use ndarray::array;

    fn ensemble() -> Ensemble {
        Ensemble {
            unscaled_times: array![12.0, 40.5, 7.25],
            transition_times: array![3.1e-6, 9.8e-5, 1.4e-6],
            barriers: array![1.0, 0.0, 1.0],
            run_ids: array![1, 2, 4],
        }
    }

    #[test]
    fn file_names_carry_run_count() {
        let paths = EnsemblePaths::new("out", 30);
        assert_eq!(paths.transition_times, PathBuf::from("out/transition_times_30_runs.npy"));
        assert_eq!(paths.unscaled_times, PathBuf::from("out/unscaled_times_30_runs.npy"));
        assert_eq!(paths.barriers, PathBuf::from("out/barriers_30_runs.npy"));
        assert_eq!(paths.run_ids, PathBuf::from("out/run_ids_30_runs.npy"));
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let paths = EnsemblePaths::new(dir.path().join("nested"), 4);

        ensemble().save(&paths).unwrap();
        assert_eq!(Ensemble::load(&paths, 1..5).unwrap(), ensemble());
    }

    #[test]
    fn load_rejects_misaligned_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let paths = EnsemblePaths::new(dir.path(), 4);
        let mut short = ensemble();
        short.barriers = array![1.0, 0.0];

        short.save(&paths).unwrap();
        assert!(matches!(
            Ensemble::load(&paths, 1..5),
            Err(ImetadError::ArrayLengthMismatch(2, 3))
        ));
    }

    #[test]
    fn load_rejects_invalid_times() {
        let dir = tempfile::tempdir().unwrap();
        let paths = EnsemblePaths::new(dir.path(), 4);
        let mut bad = ensemble();
        bad.transition_times[2] = -1.0;

        bad.save(&paths).unwrap();
        assert!(matches!(
            Ensemble::load(&paths, 1..5),
            Err(ImetadError::InvalidEnsemble { index: 2, .. })
        ));
    }

    #[test]
    fn missing_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let paths = EnsemblePaths::new(dir.path(), 4);
        assert!(matches!(
            Ensemble::load(&paths, 1..5),
            Err(ImetadError::NpyRead(_))
        ));
    }

    #[test]
    fn run_ids_default_to_run_order() {
        let dir = tempfile::tempdir().unwrap();
        let paths = EnsemblePaths::new(dir.path(), 3);
        let stored = ensemble();
        write_npy(&paths.unscaled_times, &stored.unscaled_times).unwrap();
        write_npy(&paths.transition_times, &stored.transition_times).unwrap();
        write_npy(&paths.barriers, &stored.barriers).unwrap();

        let loaded = Ensemble::load(&paths, 5..8).unwrap();
        assert_eq!(loaded.run_ids, array![5, 6, 7]);
        assert_eq!(loaded.transition_times, stored.transition_times);

        assert!(matches!(
            Ensemble::load(&paths, 1..5),
            Err(ImetadError::ArrayLengthMismatch(4, 3))
        ));
    }

    #[test]
    fn transition_times_alone_are_enough() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalysisConfig::builder()
            .runs(3)
            .output_dir(dir.path())
            .build()
            .unwrap();
        let paths = EnsemblePaths::for_config(&config);
        write_npy(&paths.transition_times, &ensemble().transition_times).unwrap();

        assert_eq!(
            load_transition_times(&config).unwrap(),
            ensemble().transition_times
        );
        assert!(matches!(load_ensemble(&config), Err(ImetadError::NpyRead(_))));
    }
}
