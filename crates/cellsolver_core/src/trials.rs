//! Trial scheduling: N independent runs of the native solver on a bounded
//! worker pool.
//!
//! Samples are drawn up front, one set per trial, and each trial gets its
//! own [`EnvOverlay`]. Every job reports a [`TrialOutcome`] through a
//! channel; [`TrialBatch::wait`] collects them into a [`TrialReport`]. What
//! a failed trial does to the rest of the run is set by
//! [`TrialFailurePolicy`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, channel};
use std::{fs, io};

use jiff::Timestamp;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MAX_TRIALS;
use crate::error::TrialError;
use crate::sampling::{Sample, Sampler};
use crate::util::atomic_write;

pub const SUMMARY_FILE: &str = "run-summary.json";

/// `simulation_output_{i+1:05}.csv` for zero-based trial `index`.
#[must_use]
pub fn output_file_name(index: usize) -> String {
    format!("simulation_output_{:05}.csv", index + 1)
}

/// Environment variables set for one child process on top of the inherited
/// environment. Overlay entries win on collision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay(BTreeMap<String, String>);

impl EnvOverlay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One entry per sampled parameter. Parameter identifiers are already
    /// in `{component}__{variable}` form.
    #[must_use]
    pub fn from_sample(sample: &Sample) -> Self {
        Self(
            sample
                .iter()
                .map(|(name, value)| (name.clone(), value.to_string()))
                .collect(),
        )
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn apply(&self, command: &mut Command) {
        command.envs(&self.0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialStatus {
    Succeeded,
    /// Non-zero exit; `code` is `None` when a signal ended the process.
    Failed { code: Option<i32> },
    LaunchFailed { message: String },
    /// Not started because an earlier trial failed under
    /// [`TrialFailurePolicy::Abort`].
    Skipped,
}

impl TrialStatus {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, TrialStatus::Succeeded)
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TrialStatus::Failed { .. } | TrialStatus::LaunchFailed { .. }
        )
    }
}

/// One unit of work: a single run of the native solver.
#[derive(Debug, Clone)]
pub struct TrialJob {
    pub index: usize,
    pub executable: PathBuf,
    pub solver_config: PathBuf,
    pub simulation_config: PathBuf,
    pub output: PathBuf,
    pub overlay: EnvOverlay,
    pub parameters: Sample,
}

impl TrialJob {
    /// `executable solver_config simulation_config output` with the overlay.
    #[must_use]
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.executable);
        command
            .arg(&self.solver_config)
            .arg(&self.simulation_config)
            .arg(&self.output)
            .stdin(Stdio::null());
        self.overlay.apply(&mut command);
        command
    }

    /// Run the process to completion.
    pub fn run(&self) -> TrialStatus {
        match self.command().status() {
            Ok(status) if status.success() => TrialStatus::Succeeded,
            Ok(status) => TrialStatus::Failed {
                code: status.code(),
            },
            Err(e) => TrialStatus::LaunchFailed {
                message: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcome {
    pub index: usize,
    pub output: PathBuf,
    #[serde(flatten)]
    pub status: TrialStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: Sample,
}

impl TrialOutcome {
    /// The failure as an error value, if the trial failed.
    #[must_use]
    pub fn error(&self, executable: &Path) -> Option<TrialError> {
        match &self.status {
            TrialStatus::Failed { code } => Some(TrialError::NonZeroExit {
                index: self.index,
                code: *code,
            }),
            TrialStatus::LaunchFailed { message } => Some(TrialError::Spawn {
                index: self.index,
                executable: executable.to_path_buf(),
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

/// What one failed trial does to the others.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialFailurePolicy {
    /// Log and record the failure; every other trial still runs and the
    /// run succeeds.
    #[default]
    Continue,
    /// Stop starting new trials after the first failure and fail the run.
    Abort,
}

/// Inputs shared by every trial of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialPlan {
    pub num_trials: usize,
    pub executable: PathBuf,
    pub solver_config: PathBuf,
    pub simulation_config: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TrialScheduler {
    max_workers: usize,
    policy: TrialFailurePolicy,
}

impl TrialScheduler {
    /// A scheduler running at most `max_workers` processes at once.
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            policy: TrialFailurePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: TrialFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    #[must_use]
    pub fn policy(&self) -> TrialFailurePolicy {
        self.policy
    }

    /// Create the output directory and one job per trial, each with its own
    /// fresh draw from `sampler`.
    pub fn prepare(
        &self,
        plan: &TrialPlan,
        mut sampler: Option<&mut Sampler>,
    ) -> Result<Vec<TrialJob>, TrialError> {
        if plan.num_trials > MAX_TRIALS {
            return Err(TrialError::TooManyTrials {
                requested: plan.num_trials,
                max: MAX_TRIALS,
            });
        }
        fs::create_dir_all(&plan.output_dir).map_err(|source| TrialError::OutputDirectory {
            path: plan.output_dir.clone(),
            source,
        })?;

        let mut jobs = Vec::with_capacity(plan.num_trials);
        for index in 0..plan.num_trials {
            let parameters = match sampler.as_deref_mut() {
                Some(sampler) => {
                    let sample = sampler.draw()?;
                    sampler.reset();
                    sample
                }
                None => Sample::new(),
            };
            jobs.push(TrialJob {
                index,
                executable: plan.executable.clone(),
                solver_config: plan.solver_config.clone(),
                simulation_config: plan.simulation_config.clone(),
                output: plan.output_dir.join(output_file_name(index)),
                overlay: EnvOverlay::from_sample(&parameters),
                parameters,
            });
        }
        Ok(jobs)
    }

    /// Hand `jobs` to the worker pool and return without waiting.
    pub fn submit(&self, jobs: Vec<TrialJob>) -> Result<TrialBatch, TrialError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .thread_name(|i| format!("trial-worker-{i}"))
            .build()?;
        let (tx, rx) = channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let expected = jobs.len();
        let executable = jobs
            .first()
            .map(|j| j.executable.clone())
            .unwrap_or_default();
        let policy = self.policy;

        info!(
            trials = expected,
            workers = self.max_workers,
            ?policy,
            "submitting trials"
        );

        for job in jobs {
            let tx = tx.clone();
            let cancel = Arc::clone(&cancel);
            pool.spawn(move || {
                let status = if cancel.load(Ordering::Relaxed) {
                    TrialStatus::Skipped
                } else {
                    debug!(trial = job.index, output = %job.output.display(), "starting trial");
                    job.run()
                };

                let outcome = TrialOutcome {
                    index: job.index,
                    output: job.output,
                    status,
                    parameters: job.parameters,
                };
                if let Some(error) = outcome.error(&job.executable) {
                    warn!(trial = outcome.index, %error, "trial failed");
                    if policy == TrialFailurePolicy::Abort {
                        cancel.store(true, Ordering::Relaxed);
                    }
                } else {
                    debug!(trial = outcome.index, status = ?outcome.status, "trial finished");
                }

                // The receiver only goes away once the batch is dropped.
                let _ = tx.send(outcome);
            });
        }

        Ok(TrialBatch {
            _pool: pool,
            receiver: rx,
            expected,
            policy,
            executable,
            started: Timestamp::now(),
        })
    }

    /// [`TrialScheduler::prepare`] followed by [`TrialScheduler::submit`].
    pub fn run(
        &self,
        plan: &TrialPlan,
        sampler: Option<&mut Sampler>,
    ) -> Result<TrialBatch, TrialError> {
        let jobs = self.prepare(plan, sampler)?;
        self.submit(jobs)
    }
}

/// Trials in flight.
pub struct TrialBatch {
    _pool: ThreadPool,
    receiver: Receiver<TrialOutcome>,
    expected: usize,
    policy: TrialFailurePolicy,
    executable: PathBuf,
    started: Timestamp,
}

impl TrialBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.expected
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expected == 0
    }

    /// Block until every trial has reported.
    pub fn wait(self) -> TrialReport {
        let mut outcomes: Vec<TrialOutcome> =
            self.receiver.iter().take(self.expected).collect();
        outcomes.sort_by_key(|o| o.index);
        let report = TrialReport {
            outcomes,
            policy: self.policy,
            executable: self.executable,
            started: self.started,
            finished: Timestamp::now(),
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            "trials finished"
        );
        report
    }
}

/// Every trial's outcome, in trial order.
#[derive(Debug, Clone)]
pub struct TrialReport {
    pub outcomes: Vec<TrialOutcome>,
    pub policy: TrialFailurePolicy,
    pub executable: PathBuf,
    pub started: Timestamp,
    pub finished: Timestamp,
}

impl TrialReport {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_success()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_failure()).count()
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == TrialStatus::Skipped)
            .count()
    }

    /// Under [`TrialFailurePolicy::Abort`], the first failure as an error.
    /// Always `Ok` under [`TrialFailurePolicy::Continue`].
    pub fn check(&self) -> Result<(), TrialError> {
        if self.policy == TrialFailurePolicy::Continue {
            return Ok(());
        }
        match self.outcomes.iter().find(|o| o.status.is_failure()) {
            Some(first) => Err(TrialError::Aborted {
                index: first.index,
                skipped: self.skipped(),
            }),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            started: self.started,
            finished: self.finished,
            policy: self.policy,
            num_trials: self.outcomes.len(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            skipped: self.skipped(),
            trials: self.outcomes.clone(),
        }
    }

    /// Write `run-summary.json` into `dir`.
    pub fn write_summary(&self, dir: &Path) -> io::Result<PathBuf> {
        let path = dir.join(SUMMARY_FILE);
        let json = serde_json::to_string_pretty(&self.summary())?;
        atomic_write(&path, json)?;
        Ok(path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started: Timestamp,
    pub finished: Timestamp,
    pub policy: TrialFailurePolicy,
    pub num_trials: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub trials: Vec<TrialOutcome>,
}
