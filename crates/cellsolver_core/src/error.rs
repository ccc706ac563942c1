use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

fn join_issues(issues: &[String]) -> String {
    issues.join("; ")
}

/// Stage of the model generation pipeline that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStage {
    Parse,
    Validation,
    Analysis,
    Resolution,
    Output,
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GenerationStage::Parse => "parse",
            GenerationStage::Validation => "validation",
            GenerationStage::Analysis => "analysis",
            GenerationStage::Resolution => "resolution",
            GenerationStage::Output => "output",
        };
        f.write_str(name)
    }
}

/// Errors raised while turning a model description into generated code.
///
/// Every variant belongs to the same family so callers can handle model
/// problems as a whole, while [`ModelGenerationError::stage`] still tells
/// them which stage failed.
#[derive(Debug, Error)]
pub enum ModelGenerationError {
    #[error("parsed model has {} error(s): {}", .issues.len(), join_issues(.issues))]
    Parse { issues: Vec<String> },

    #[error("validated model has {} error(s): {}", .issues.len(), join_issues(.issues))]
    Validation { issues: Vec<String> },

    #[error("model analysis came back with {} error(s): {}", .issues.len(), join_issues(.issues))]
    Analysis { issues: Vec<String> },

    #[error("cannot resolve external variable `{reference}`: {reason}")]
    Resolution { reference: String, reason: String },

    #[error("cannot access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ModelGenerationError {
    pub fn parse(issue: impl Into<String>) -> Self {
        ModelGenerationError::Parse {
            issues: vec![issue.into()],
        }
    }

    #[must_use]
    pub fn stage(&self) -> GenerationStage {
        match self {
            ModelGenerationError::Parse { .. } => GenerationStage::Parse,
            ModelGenerationError::Validation { .. } => GenerationStage::Validation,
            ModelGenerationError::Analysis { .. } => GenerationStage::Analysis,
            ModelGenerationError::Resolution { .. } => GenerationStage::Resolution,
            ModelGenerationError::Io { .. } => GenerationStage::Output,
        }
    }

    /// Individual problems reported by the failing stage.
    #[must_use]
    pub fn issues(&self) -> &[String] {
        match self {
            ModelGenerationError::Parse { issues }
            | ModelGenerationError::Validation { issues }
            | ModelGenerationError::Analysis { issues } => issues,
            _ => &[],
        }
    }
}

/// Errors raised by the statistical model encoder and the sampler.
#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("unknown distribution `{name}` for parameter `{parameter}`")]
    Unknown { parameter: String, name: String },

    #[error("distribution `{name}` for `{parameter}` takes {expected} argument(s), got {actual}")]
    Arity {
        parameter: String,
        name: String,
        expected: String,
        actual: usize,
    },

    #[error("invalid `{name}` parameters for `{parameter}`: {reason}")]
    InvalidParameters {
        parameter: String,
        name: String,
        reason: String,
    },

    #[error(
        "truncated `{name}` for `{parameter}` gave no value in [{min}, {max}] \
         after {attempts} attempts"
    )]
    TruncationExhausted {
        parameter: String,
        name: String,
        min: f64,
        max: f64,
        attempts: usize,
    },

    #[error("malformed initializer for `{parameter}`: `{math}`")]
    MalformedInitializer { parameter: String, math: String },

    #[error("`{first}` and `{second}` both map to identifier `{identifier}`")]
    IdentifierCollision {
        first: String,
        second: String,
        identifier: String,
    },

    #[error("statistical model document is not valid: {0}")]
    Document(#[from] serde_json::Error),
}

/// Errors in the run configuration or while persisting it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("configuration {} is malformed: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration value for `{field}`: {message}")]
    Invalid { field: String, message: String },

    #[error("cannot write configuration {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// The two external tool invocations of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    Configure,
    Compile,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStep::Configure => f.write_str("configure"),
            BuildStep::Compile => f.write_str("compile"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to launch {step} step `{program}`: {source}")]
    Spawn {
        step: BuildStep,
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{step} step `{program}` exited with {status}")]
    StepFailed {
        step: BuildStep,
        program: String,
        status: ExitStatus,
    },

    #[error("build finished but executable {} is missing", .0.display())]
    MissingExecutable(PathBuf),

    #[error("build directory {} does not exist", .0.display())]
    MissingBuildDirectory(PathBuf),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

#[derive(Debug, Error)]
pub enum TrialError {
    #[error("trial {index} could not launch {}: {message}", .executable.display())]
    Spawn {
        index: usize,
        executable: PathBuf,
        message: String,
    },

    #[error("trial {index} {}", describe_exit(.code))]
    NonZeroExit { index: usize, code: Option<i32> },

    #[error("run aborted after trial {index} failed; {skipped} trial(s) were skipped")]
    Aborted { index: usize, skipped: usize },

    #[error("{requested} trials requested but output names only cover {max}")]
    TooManyTrials { requested: usize, max: usize },

    #[error("cannot create output directory {}: {source}", .path.display())]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("cannot sample trial parameters: {0}")]
    Sampling(#[from] DistributionError),
}

/// Top-level error for a full run, mapped to a process exit code.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("simulation environment is not prepared: {0}")]
    Environment(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Model(#[from] ModelGenerationError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),

    #[error(transparent)]
    Trial(#[from] TrialError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    /// Process exit code for this error category.
    ///
    /// `2` is left to the argument parser for usage errors.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Environment(_) => 3,
            PipelineError::Config(_) => 4,
            PipelineError::Trial(TrialError::TooManyTrials { .. }) => 4,
            PipelineError::Model(_) => 5,
            PipelineError::Build(_) => 6,
            PipelineError::Distribution(_) => 7,
            PipelineError::Trial(TrialError::Sampling(_)) => 7,
            PipelineError::Io { .. } => 8,
            PipelineError::Trial(TrialError::OutputDirectory { .. }) => 8,
            PipelineError::Trial(_) => 9,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
