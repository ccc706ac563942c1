//! The full run: generate, build, configure, then fan out trials.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::build::{BuildOrchestrator, verify_executable};
use crate::codegen::{GeneratedArtifact, ModelCompiler};
use crate::config::{ApplicationLayout, ConfigPaths, RunConfig, write_run_configs};
use crate::error::{PipelineError, Result};
use crate::sampling::Sampler;
use crate::trials::{RunSummary, TrialFailurePolicy, TrialPlan, TrialScheduler};
use crate::uncertainty::encode;

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub artifact: GeneratedArtifact,
    pub configs: ConfigPaths,
    pub summary: RunSummary,
    pub summary_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    layout: ApplicationLayout,
    compiler: ModelCompiler,
    builder: BuildOrchestrator,
    max_workers: usize,
    policy: TrialFailurePolicy,
    seed: Option<u64>,
}

impl Pipeline {
    pub fn new(layout: ApplicationLayout, max_workers: usize) -> Self {
        Self {
            layout,
            compiler: ModelCompiler::new(),
            builder: BuildOrchestrator::new(),
            max_workers,
            policy: TrialFailurePolicy::default(),
            seed: None,
        }
    }

    #[must_use]
    pub fn with_builder(mut self, builder: BuildOrchestrator) -> Self {
        self.builder = builder;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: TrialFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Seed the sampler so a run's parameter draws can be repeated.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn layout(&self) -> &ApplicationLayout {
        &self.layout
    }

    /// The solver sources must be present. The build directory is removed
    /// and recreated empty.
    pub fn prepare(&self) -> Result<()> {
        let cmake_lists = self.layout.cmake_lists();
        if !cmake_lists.is_file() {
            return Err(PipelineError::Environment(format!(
                "solver sources not found: {} does not exist",
                cmake_lists.display()
            )));
        }

        let build_dir = &self.layout.build_dir;
        if build_dir.exists() {
            warn!(path = %build_dir.display(), "removing previous build directory");
            fs::remove_dir_all(build_dir).map_err(io_error(build_dir))?;
        }
        fs::create_dir_all(&self.layout.generated_dir)
            .map_err(io_error(&self.layout.generated_dir))?;
        Ok(())
    }

    pub fn run(&self, model_path: &Path, config: &RunConfig) -> Result<PipelineReport> {
        config.validate()?;
        info!(
            model = %model_path.display(),
            trials = config.num_trials,
            uncertainties = config.has_uncertainties(),
            "starting run"
        );

        self.prepare()?;

        let external_variables = match &config.uncertainties {
            Some(uncertainties) => uncertainties.external_variables()?,
            None => Vec::new(),
        };
        let artifact =
            self.compiler
                .generate(model_path, &self.layout.generated_dir, &external_variables)?;

        self.builder.build(
            &self.layout.build_dir,
            &self.layout.src_dir,
            &self.layout.sundials_dir,
            artifact.has_external_variables(),
        )?;
        verify_executable(&self.layout.executable)?;

        let configs = write_run_configs(
            &self.layout.simulation_dir,
            &config.solver,
            &config.simulation,
        )?;

        let mut sampler = match config.uncertainties.as_ref().filter(|u| !u.is_empty()) {
            Some(uncertainties) => {
                let statistical_model = encode(uncertainties)?;
                Some(match self.seed {
                    Some(seed) => Sampler::load_seeded(&statistical_model, seed)?,
                    None => Sampler::load(&statistical_model)?,
                })
            }
            None => None,
        };

        let plan = TrialPlan {
            num_trials: config.num_trials,
            executable: self.layout.executable.clone(),
            solver_config: configs.solver.clone(),
            simulation_config: configs.simulation.clone(),
            output_dir: self.layout.output_dir.clone(),
        };
        let report = TrialScheduler::new(self.max_workers)
            .with_policy(self.policy)
            .run(&plan, sampler.as_mut())?
            .wait();

        let summary_path = report
            .write_summary(&self.layout.output_dir)
            .map_err(io_error(&self.layout.output_dir))?;
        report.check()?;

        Ok(PipelineReport {
            artifact,
            configs,
            summary: report.summary(),
            summary_path,
        })
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PipelineError + '_ {
    move |source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    }
}
