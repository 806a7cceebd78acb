//! Explicit configuration threaded through extraction and rate estimation.

use crate::errors::*;
use crate::{AVOGADRO_CONSTANT, BOLTZMANN_CONSTANT};
use serde::Deserialize;
use std::f64::consts::PI;
use std::path::{Path, PathBuf};

/// Default location of a run's COLVAR file, relative to the input directory
pub const DEFAULT_COLVAR_TEMPLATE: &str = "run{run}/production/COLVAR";

/// Default location of a run's HILLS file, relative to the input directory
pub const DEFAULT_HILLS_TEMPLATE: &str = "run{run}/production/HILLS";

/// What a batch does when one run fails to produce a transition time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Any failed run aborts the whole batch
    Abort,
    /// Failed runs are reported and left out of the ensemble
    Exclude,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Abort
    }
}

/// Parameters of an infrequent metadynamics rate analysis.
///
/// Angles and windows are in the units of the reaction coordinate (radians for a dihedral),
/// energies in kJ/mol and trajectory times in the unit given by `time_unit_in_seconds`.
///
/// # Examples
///
/// ```
/// use imetad_rs::config::*;
///
/// let config = AnalysisConfig::builder().runs(10).temperature(310.0).build().unwrap();
/// assert_eq!(config.runs(), 10);
/// assert!((config.kt() - 2.5775).abs() < 1e-3);
/// ```
#[derive(Builder, Debug, Clone, PartialEq)]
#[builder(build_fn(validate = "Self::validate", name = "build_inner", private))]
pub struct AnalysisConfig {
    /// Number of independent infrequent metadynamics runs
    #[builder(default = "30")]
    runs: usize,

    /// Number of the first run; runs are numbered `first_run..first_run + runs`
    #[builder(default = "1")]
    first_run: usize,

    /// Simulation temperature in Kelvin
    #[builder(default = "300.0")]
    temperature: f64,

    /// Reaction coordinate value of the product state
    #[builder(default = "0.0")]
    product_reference: f64,

    /// Half width of the window around `product_reference` that counts as the product state
    #[builder(default = "0.2 * PI")]
    product_half_width: f64,

    /// Samples further than this from `product_reference` are on the reactant side of the barrier
    #[builder(default = "0.5 * PI")]
    barrier_half_width: f64,

    /// Length of one trajectory time unit in seconds (picoseconds by default)
    #[builder(default = "1.0e-12")]
    time_unit_in_seconds: f64,

    /// Directory the run templates are resolved against
    #[builder(setter(into), default = "PathBuf::from(\".\")")]
    input_dir: PathBuf,

    /// Path template of each run's COLVAR file; `{run}` is replaced by the run number
    #[builder(setter(into), default = "String::from(DEFAULT_COLVAR_TEMPLATE)")]
    colvar_template: String,

    /// Path template of each run's HILLS file, if deposition counts should be reported
    #[builder(setter(into, strip_option), default)]
    hills_template: Option<String>,

    /// Number of trailing COLVAR rows to discard; the engine may leave the last one truncated
    #[builder(default = "1")]
    drop_trailing_rows: usize,

    /// Directory the ensemble arrays are written to and read from
    #[builder(setter(into), default = "PathBuf::from(\".\")")]
    output_dir: PathBuf,

    /// Size of the synthetic sample drawn from the fitted distribution for the KS test
    #[builder(default = "1_000_000")]
    synthetic_samples: usize,

    /// Seed for the synthetic sample; drawn from entropy when absent
    #[builder(setter(strip_option), default)]
    seed: Option<u64>,

    /// Set to limit the maximum number of Levenberg–Marquardt iterations
    #[builder(default = "200")]
    max_fit_iterations: usize,

    /// Relative step tolerance of the curve fit
    #[builder(default = "1.0e-10")]
    fit_tolerance: f64,

    /// KS p-values below this flag the exponential model as doubtful
    #[builder(default = "0.05")]
    significance: f64,

    /// What to do with runs that fail extraction
    #[builder(default)]
    failure_policy: FailurePolicy,
}

impl AnalysisConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.runs == Some(0) {
            return Err("runs must be at least 1".to_string());
        }

        if let Some(temperature) = self.temperature {
            if !(temperature.is_finite() && temperature > 0.0) {
                return Err(format!("temperature must be positive (not {})", temperature));
            }
        }

        let product = self.product_half_width.unwrap_or(0.2 * PI);
        let barrier = self.barrier_half_width.unwrap_or(0.5 * PI);
        if !(product > 0.0 && barrier > 0.0) {
            return Err("window half widths must be positive".to_string());
        }
        if product >= barrier {
            return Err(format!(
                "product window ({}) must be narrower than barrier window ({})",
                product, barrier
            ));
        }

        if let Some(unit) = self.time_unit_in_seconds {
            if !(unit.is_finite() && unit > 0.0) {
                return Err(format!("time_unit_in_seconds must be positive (not {})", unit));
            }
        }

        if let Some(n) = self.synthetic_samples {
            if n < 2 {
                return Err("synthetic_samples must be at least 2".to_string());
            }
        }

        if let Some(tol) = self.fit_tolerance {
            if !(tol > 0.0) {
                return Err("fit_tolerance must be positive".to_string());
            }
        }

        if let Some(alpha) = self.significance {
            if !(alpha > 0.0 && alpha < 1.0) {
                return Err(format!("significance must lie in (0, 1) (not {})", alpha));
            }
        }

        Ok(())
    }

    /// Build and validate the configuration
    pub fn build(&self) -> Result<AnalysisConfig> {
        Ok(self.build_inner()?)
    }

    /// Start a builder from the contents of a TOML configuration file
    ///
    /// Keys are the field names of `AnalysisConfig`. Absent keys keep their defaults, and the
    /// returned builder can still be adjusted before `build()`.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)?;
        Ok(file.into_builder())
    }

    /// Start a builder from a TOML configuration file on disk
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        // Every field has a default and the defaults pass validation
        AnalysisConfigBuilder::default()
            .build_inner()
            .expect("default configuration is valid")
    }
}

impl AnalysisConfig {
    /// Get a new builder for the `AnalysisConfig` struct
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder::default()
    }

    /// Number of runs in the batch
    pub fn runs(&self) -> usize {
        self.runs
    }

    /// Run numbers of the batch, in order
    pub fn run_numbers(&self) -> std::ops::Range<usize> {
        self.first_run..self.first_run + self.runs
    }

    /// Simulation temperature in Kelvin
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Thermal energy $k_B T$ in kJ/mol
    pub fn kt(&self) -> f64 {
        BOLTZMANN_CONSTANT * self.temperature * AVOGADRO_CONSTANT / 1000.0
    }

    /// Inverse thermal energy $\beta = 1/k_B T$ in mol/kJ
    pub fn beta(&self) -> f64 {
        1.0 / self.kt()
    }

    /// Is `value` inside the product-state window?
    pub fn in_product_window(&self, value: f64) -> bool {
        (value - self.product_reference).abs() < self.product_half_width
    }

    /// Is `value` clearly on the reactant side of the barrier?
    pub fn beyond_barrier(&self, value: f64) -> bool {
        (value - self.product_reference).abs() > self.barrier_half_width
    }

    /// Reaction coordinate value of the product state
    pub fn product_reference(&self) -> f64 {
        self.product_reference
    }

    /// Length of one trajectory time unit in seconds
    pub fn time_unit_in_seconds(&self) -> f64 {
        self.time_unit_in_seconds
    }

    /// Location of the COLVAR file of `run`
    pub fn colvar_path(&self, run: usize) -> PathBuf {
        self.input_dir.join(expand_template(&self.colvar_template, run))
    }

    /// Location of the HILLS file of `run`, if deposition counts are wanted
    pub fn hills_path(&self, run: usize) -> Option<PathBuf> {
        self.hills_template
            .as_ref()
            .map(|template| self.input_dir.join(expand_template(template, run)))
    }

    /// Number of trailing COLVAR rows to discard
    pub fn drop_trailing_rows(&self) -> usize {
        self.drop_trailing_rows
    }

    /// Directory of the ensemble arrays
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Size of the synthetic KS reference sample
    pub fn synthetic_samples(&self) -> usize {
        self.synthetic_samples
    }

    /// Seed of the synthetic KS reference sample
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Iteration limit of the curve fit
    pub fn max_fit_iterations(&self) -> usize {
        self.max_fit_iterations
    }

    /// Relative step tolerance of the curve fit
    pub fn fit_tolerance(&self) -> f64 {
        self.fit_tolerance
    }

    /// Significance level of the KS test
    pub fn significance(&self) -> f64 {
        self.significance
    }

    /// What to do with runs that fail extraction
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }
}

fn expand_template(template: &str, run: usize) -> String {
    template.replace("{run}", &run.to_string())
}

/// On-disk form of `AnalysisConfig`; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    runs: Option<usize>,
    first_run: Option<usize>,
    temperature: Option<f64>,
    product_reference: Option<f64>,
    product_half_width: Option<f64>,
    barrier_half_width: Option<f64>,
    time_unit_in_seconds: Option<f64>,
    input_dir: Option<PathBuf>,
    colvar_template: Option<String>,
    hills_template: Option<String>,
    drop_trailing_rows: Option<usize>,
    output_dir: Option<PathBuf>,
    synthetic_samples: Option<usize>,
    seed: Option<u64>,
    max_fit_iterations: Option<usize>,
    fit_tolerance: Option<f64>,
    significance: Option<f64>,
    failure_policy: Option<FailurePolicy>,
}

impl ConfigFile {
    fn into_builder(self) -> AnalysisConfigBuilder {
        let mut builder = AnalysisConfigBuilder::default();
        builder.runs = self.runs;
        builder.first_run = self.first_run;
        builder.temperature = self.temperature;
        builder.product_reference = self.product_reference;
        builder.product_half_width = self.product_half_width;
        builder.barrier_half_width = self.barrier_half_width;
        builder.time_unit_in_seconds = self.time_unit_in_seconds;
        builder.input_dir = self.input_dir;
        builder.colvar_template = self.colvar_template;
        builder.hills_template = self.hills_template.map(Some);
        builder.drop_trailing_rows = self.drop_trailing_rows;
        builder.output_dir = self.output_dir;
        builder.synthetic_samples = self.synthetic_samples;
        builder.seed = self.seed.map(Some);
        builder.max_fit_iterations = self.max_fit_iterations;
        builder.fit_tolerance = self.fit_tolerance;
        builder.significance = self.significance;
        builder.failure_policy = self.failure_policy;
        builder
    }
}

#[cfg(test)]
mod tests {
    use crate::config::*;

    #[test]
    fn build_default_config() {
        let config = AnalysisConfig::builder().build().unwrap();

        assert_eq!(config.runs(), 30);
        assert_eq!(config.run_numbers(), 1..31);
        assert_eq!(config.temperature(), 300.0);
        assert_eq!(config.failure_policy(), FailurePolicy::Abort);
        assert_eq!(config.synthetic_samples(), 1_000_000);
        assert_eq!(config.seed(), None);
        assert_eq!(config.colvar_path(7), PathBuf::from("./run7/production/COLVAR"));
        assert_eq!(config.hills_path(7), None);
        assert_eq!(config, AnalysisConfig::default());
    }

    #[test]
    fn thermal_energy_at_300k() {
        let config = AnalysisConfig::default();
        // k_B T N_A at 300 K is 2.494339 kJ/mol
        assert!((config.kt() - 2.494339).abs() < 1e-6);
        assert!((config.beta() * config.kt() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn windows_are_strict() {
        let config = AnalysisConfig::default();
        assert!(config.in_product_window(0.0));
        assert!(config.in_product_window(-0.19 * PI));
        assert!(!config.in_product_window(0.2 * PI));
        assert!(config.beyond_barrier(-0.51 * PI));
        assert!(!config.beyond_barrier(0.5 * PI));
        assert!(!config.beyond_barrier(0.3 * PI));
    }

    #[test]
    fn reject_invalid_config() {
        assert!(AnalysisConfig::builder().runs(0).build().is_err());
        assert!(AnalysisConfig::builder().temperature(-1.0).build().is_err());
        assert!(AnalysisConfig::builder()
            .product_half_width(0.6 * PI)
            .build()
            .is_err());
        assert!(AnalysisConfig::builder().synthetic_samples(1).build().is_err());
        assert!(AnalysisConfig::builder().significance(1.5).build().is_err());

        match AnalysisConfig::builder().runs(0).build() {
            Err(ImetadError::BuilderError(msg)) => assert!(msg.contains("runs")),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn read_toml_config() {
        let text = r#"
            runs = 12
            temperature = 310.0
            hills_template = "run{run}/HILLS"
            seed = 42
            failure_policy = "exclude"
        "#;
        let config = AnalysisConfigBuilder::from_toml_str(text)
            .unwrap()
            .output_dir("results")
            .build()
            .unwrap();

        assert_eq!(config.runs(), 12);
        assert_eq!(config.temperature(), 310.0);
        assert_eq!(config.seed(), Some(42));
        assert_eq!(config.failure_policy(), FailurePolicy::Exclude);
        assert_eq!(config.hills_path(3), Some(PathBuf::from("./run3/HILLS")));
        assert_eq!(config.output_dir(), Path::new("results"));
        assert_eq!(config.drop_trailing_rows(), 1);
    }

    #[test]
    fn reject_unknown_toml_keys() {
        assert!(matches!(
            AnalysisConfigBuilder::from_toml_str("temprature = 300.0"),
            Err(ImetadError::Config(_))
        ));
    }
}
