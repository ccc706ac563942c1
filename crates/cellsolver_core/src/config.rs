//! Run configuration: the user's run document, the solver and simulation
//! documents handed to the native solver, and the on-disk layout of the
//! simulation directory.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConfigError, PipelineError};
use crate::uncertainty::UncertaintySpec;
use crate::util::atomic_write;

/// Output file names carry five digits, so no run may exceed this.
pub const MAX_TRIALS: usize = 99_999;

pub const SOLVER_CONFIG_FILE: &str = "solver-config.json";
pub const SIMULATION_CONFIG_FILE: &str = "simulation-config.json";

/// Settings of the native ODE solver, written as `solver-config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SolverConfig {
    pub maximum_number_of_steps: u32,
    pub relative_tolerance: f64,
    pub absolute_tolerance: f64,
    pub integration_method: String,
    pub iteration_type: String,
    pub interpolate_solution: bool,
    pub linear_solver: String,
    pub maximum_step: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            maximum_number_of_steps: 500,
            relative_tolerance: 1e-7,
            absolute_tolerance: 1e-7,
            integration_method: "BDF".to_string(),
            iteration_type: "Newton".to_string(),
            interpolate_solution: true,
            linear_solver: "Dense".to_string(),
            maximum_step: 0.1,
        }
    }
}

/// Time span and output interval, written as `simulation-config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SimulationConfig {
    pub starting_point: f64,
    pub ending_point: f64,
    pub point_interval: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            starting_point: 0.0,
            ending_point: 10_000.0,
            point_interval: 1.0,
        }
    }
}

/// The run document passed with `--config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub num_trials: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainties: Option<UncertaintySpec>,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_trials < 1 {
            return Err(ConfigError::invalid("num_trials", "must be at least 1"));
        }
        if self.num_trials > MAX_TRIALS {
            return Err(ConfigError::invalid(
                "num_trials",
                format!("at most {MAX_TRIALS} trials are supported"),
            ));
        }
        self.simulation.validate()?;
        if let Some(uncertainties) = &self.uncertainties {
            uncertainties.external_variables()?;
        }
        Ok(())
    }

    /// Whether the model must be generated with external variables.
    #[must_use]
    pub fn has_uncertainties(&self) -> bool {
        self.uncertainties.as_ref().is_some_and(|u| !u.is_empty())
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.starting_point < self.ending_point) {
            return Err(ConfigError::invalid(
                "simulation.EndingPoint",
                format!(
                    "must be greater than StartingPoint ({} >= {})",
                    self.starting_point, self.ending_point
                ),
            ));
        }
        if !(self.point_interval > 0.0) {
            return Err(ConfigError::invalid(
                "simulation.PointInterval",
                "must be positive",
            ));
        }
        Ok(())
    }
}

fn write_once<T: Serialize>(path: &Path, document: &T) -> Result<bool, ConfigError> {
    if path.exists() {
        debug!(path = %path.display(), "keeping existing configuration");
        return Ok(false);
    }
    let write_error = |source: std::io::Error| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_string_pretty(document).map_err(|e| write_error(e.into()))?;
    atomic_write(path, json).map_err(write_error)?;
    Ok(true)
}

/// Paths of the two solver documents in a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub solver: PathBuf,
    pub simulation: PathBuf,
}

/// Write `solver-config.json` and `simulation-config.json` into `dir`.
///
/// A file that already exists is left untouched, so calling this again is
/// a no-op.
pub fn write_run_configs(
    dir: &Path,
    solver: &SolverConfig,
    simulation: &SimulationConfig,
) -> Result<ConfigPaths, ConfigError> {
    let paths = ConfigPaths {
        solver: dir.join(SOLVER_CONFIG_FILE),
        simulation: dir.join(SIMULATION_CONFIG_FILE),
    };
    let wrote_solver = write_once(&paths.solver, solver)?;
    let wrote_simulation = write_once(&paths.simulation, simulation)?;
    info!(
        dir = %dir.display(),
        wrote_solver,
        wrote_simulation,
        "run configuration ready"
    );
    Ok(paths)
}

/// Locations inside the simulation directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationLayout {
    pub simulation_dir: PathBuf,
    pub sundials_dir: PathBuf,
    pub src_dir: PathBuf,
    pub build_dir: PathBuf,
    /// Where generated code goes; the solver's CMake reads it from here.
    pub generated_dir: PathBuf,
    pub executable: PathBuf,
    pub output_dir: PathBuf,
}

impl ApplicationLayout {
    pub const SIMULATION_DIR_VAR: &'static str = "SIMULATION_DIR";
    pub const SUNDIALS_DIR_VAR: &'static str = "SIMULATION_SUNDIALS_DIR";

    pub fn new(simulation_dir: impl Into<PathBuf>, sundials_dir: impl Into<PathBuf>) -> Self {
        let simulation_dir = simulation_dir.into();
        let build_dir = simulation_dir.join("build-simple-sundials-solver");
        Self {
            src_dir: simulation_dir.join("simple-sundials-solver"),
            generated_dir: build_dir.join("src"),
            executable: build_dir.join("src").join("siss"),
            output_dir: simulation_dir.join("output"),
            build_dir,
            sundials_dir: sundials_dir.into(),
            simulation_dir,
        }
    }

    /// Read `SIMULATION_DIR` and `SIMULATION_SUNDIALS_DIR`.
    pub fn from_env() -> Result<Self, PipelineError> {
        let var = |name: &str| {
            env::var_os(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| PipelineError::Environment(format!("{name} is not set")))
        };
        Ok(Self::new(
            var(Self::SIMULATION_DIR_VAR)?,
            var(Self::SUNDIALS_DIR_VAR)?,
        ))
    }

    /// The solver's top-level CMake file, which must exist before a run.
    #[must_use]
    pub fn cmake_lists(&self) -> PathBuf {
        self.src_dir.join("CMakeLists.txt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config: RunConfig = serde_json::from_str(r#"{"num_trials": 3}"#).unwrap();
        assert_eq!(config.solver, SolverConfig::default());
        assert_eq!(config.simulation.ending_point, 10_000.0);
        assert!(!config.has_uncertainties());
        config.validate().unwrap();
    }

    #[test]
    fn test_solver_keys_are_pascal_case() {
        let json = serde_json::to_value(SolverConfig::default()).unwrap();
        assert_eq!(json["MaximumNumberOfSteps"], 500);
        assert_eq!(json["IntegrationMethod"], "BDF");
        assert_eq!(json["InterpolateSolution"], true);

        let partial: SimulationConfig =
            serde_json::from_str(r#"{"EndingPoint": 50.0}"#).unwrap();
        assert_eq!(partial.point_interval, 1.0);
        assert_eq!(partial.ending_point, 50.0);
    }

    #[test]
    fn test_validation() {
        let mut config: RunConfig = serde_json::from_str(r#"{"num_trials": 0}"#).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        config.num_trials = MAX_TRIALS + 1;
        assert!(config.validate().is_err());

        config.num_trials = MAX_TRIALS;
        config.simulation.ending_point = config.simulation.starting_point;
        assert!(config.validate().is_err());

        config.simulation = SimulationConfig::default();
        config.simulation.point_interval = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_num_trials_is_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"uncertainties": {}}"#).unwrap();
        assert!(matches!(
            RunConfig::load(&path),
            Err(ConfigError::Malformed { .. })
        ));

        std::fs::write(&path, r#"{"num_trials": 2, "uncertainties": []}"#).unwrap();
        assert!(matches!(
            RunConfig::load(&path),
            Err(ConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn test_config_write_is_idempotent() {
        let dir = tempdir().unwrap();
        let first = SolverConfig::default();
        let paths = write_run_configs(dir.path(), &first, &SimulationConfig::default()).unwrap();
        let before = std::fs::read_to_string(&paths.solver).unwrap();

        let second = SolverConfig {
            maximum_number_of_steps: 9,
            ..SolverConfig::default()
        };
        write_run_configs(dir.path(), &second, &SimulationConfig::default()).unwrap();
        assert_eq!(std::fs::read_to_string(&paths.solver).unwrap(), before);
    }

    #[test]
    fn test_layout_paths() {
        let layout = ApplicationLayout::new("/sim", "/opt/sundials");
        assert_eq!(
            layout.executable,
            PathBuf::from("/sim/build-simple-sundials-solver/src/siss")
        );
        assert_eq!(
            layout.cmake_lists(),
            PathBuf::from("/sim/simple-sundials-solver/CMakeLists.txt")
        );
        assert_eq!(layout.output_dir, PathBuf::from("/sim/output"));
    }
}
