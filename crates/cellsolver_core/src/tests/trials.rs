#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

use super::write_script;
use crate::config::MAX_TRIALS;
use crate::error::TrialError;
use crate::sampling::Sampler;
use crate::trials::{
    SUMMARY_FILE, TrialFailurePolicy, TrialPlan, TrialScheduler, TrialStatus, output_file_name,
};
use crate::uncertainty::{UncertaintySpec, encode};

/// Writes `$dimensions__l` (or `unset`) to the output path.
const ECHO_SOLVER: &str = r#"printf '%s\n' "${dimensions__l:-unset}" > "$3""#;

fn plan(dir: &TempDir, executable: PathBuf, num_trials: usize) -> TrialPlan {
    TrialPlan {
        num_trials,
        executable,
        solver_config: dir.path().join("solver-config.json"),
        simulation_config: dir.path().join("simulation-config.json"),
        output_dir: dir.path().join("output"),
    }
}

fn solver(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("siss");
    write_script(&path, body);
    path
}

fn read_output(path: &Path) -> String {
    fs::read_to_string(path).unwrap().trim().to_string()
}

#[test]
fn test_each_trial_writes_its_own_output() {
    let dir = tempdir().unwrap();
    let plan = plan(&dir, solver(dir.path(), ECHO_SOLVER), 3);

    let report = TrialScheduler::new(2).run(&plan, None).unwrap().wait();
    assert_eq!(report.succeeded(), 3);
    report.check().unwrap();

    let mut names: Vec<String> = fs::read_dir(&plan.output_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "simulation_output_00001.csv",
            "simulation_output_00002.csv",
            "simulation_output_00003.csv",
        ]
    );
    for outcome in &report.outcomes {
        assert_eq!(read_output(&outcome.output), "unset");
        assert!(outcome.parameters.is_empty());
    }
}

#[test]
fn test_solver_receives_its_arguments() {
    let dir = tempdir().unwrap();
    let plan = plan(
        &dir,
        solver(dir.path(), r#"printf '%s %s\n' "$1" "$2" > "$3""#),
        1,
    );
    let report = TrialScheduler::new(1).run(&plan, None).unwrap().wait();
    assert_eq!(
        read_output(&report.outcomes[0].output),
        format!(
            "{} {}",
            plan.solver_config.display(),
            plan.simulation_config.display()
        )
    );
}

#[test]
fn test_zero_trials_produce_nothing() {
    let dir = tempdir().unwrap();
    let plan = plan(&dir, solver(dir.path(), ECHO_SOLVER), 0);
    let batch = TrialScheduler::new(4).run(&plan, None).unwrap();
    assert!(batch.is_empty());

    let report = batch.wait();
    assert!(report.outcomes.is_empty());
    assert_eq!(fs::read_dir(&plan.output_dir).unwrap().count(), 0);
}

#[test]
fn test_sampled_values_reach_the_solver() {
    let dir = tempdir().unwrap();
    let plan = plan(&dir, solver(dir.path(), ECHO_SOLVER), 5);
    let spec: UncertaintySpec = serde_json::from_str(
        r#"{"dimensions.l": {"distribution": "normal", "p1": 6, "p2": 0.5}}"#,
    )
    .unwrap();
    let mut sampler = Sampler::load_seeded(&encode(&spec).unwrap(), 3).unwrap();

    let report = TrialScheduler::new(3)
        .run(&plan, Some(&mut sampler))
        .unwrap()
        .wait();
    assert_eq!(report.succeeded(), 5);

    for outcome in &report.outcomes {
        let value = outcome.parameters["dimensions__l"];
        assert_eq!(read_output(&outcome.output), value.to_string());
    }
    // Every trial gets a fresh draw.
    assert_ne!(
        report.outcomes[0].parameters,
        report.outcomes[1].parameters
    );
}

#[test]
fn test_continue_policy_runs_every_trial() {
    let dir = tempdir().unwrap();
    let plan = plan(&dir, solver(dir.path(), "exit 3"), 3);

    let report = TrialScheduler::new(1)
        .with_policy(TrialFailurePolicy::Continue)
        .run(&plan, None)
        .unwrap()
        .wait();
    assert_eq!(report.failed(), 3);
    assert_eq!(report.skipped(), 0);
    assert!(
        report
            .outcomes
            .iter()
            .all(|o| o.status == TrialStatus::Failed { code: Some(3) })
    );
    report.check().unwrap();
}

#[test]
fn test_abort_policy_skips_remaining_trials() {
    let dir = tempdir().unwrap();
    let plan = plan(&dir, solver(dir.path(), "exit 1"), 4);

    let report = TrialScheduler::new(1)
        .with_policy(TrialFailurePolicy::Abort)
        .run(&plan, None)
        .unwrap()
        .wait();
    assert_eq!(report.outcomes[0].status, TrialStatus::Failed { code: Some(1) });
    assert_eq!(report.failed(), 1);
    assert_eq!(report.skipped(), 3);
    assert!(matches!(
        report.check(),
        Err(TrialError::Aborted { index: 0, skipped: 3 })
    ));
}

#[test]
fn test_missing_executable_is_a_launch_failure() {
    let dir = tempdir().unwrap();
    let plan = plan(&dir, dir.path().join("not-built"), 2);

    let report = TrialScheduler::new(2).run(&plan, None).unwrap().wait();
    assert!(
        report
            .outcomes
            .iter()
            .all(|o| matches!(o.status, TrialStatus::LaunchFailed { .. }))
    );
    let err = report.outcomes[0].error(&plan.executable).unwrap();
    assert!(matches!(err, TrialError::Spawn { index: 0, .. }));
}

#[test]
fn test_too_many_trials_is_rejected() {
    let dir = tempdir().unwrap();
    let plan = plan(&dir, solver(dir.path(), ECHO_SOLVER), MAX_TRIALS + 1);
    let err = TrialScheduler::new(1).prepare(&plan, None).unwrap_err();
    assert!(matches!(err, TrialError::TooManyTrials { .. }));
}

#[test]
fn test_summary_is_written() {
    let dir = tempdir().unwrap();
    let plan = plan(&dir, solver(dir.path(), ECHO_SOLVER), 2);
    let report = TrialScheduler::new(2).run(&plan, None).unwrap().wait();

    let path = report.write_summary(&plan.output_dir).unwrap();
    assert_eq!(path, plan.output_dir.join(SUMMARY_FILE));
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["num_trials"], 2);
    assert_eq!(json["succeeded"], 2);
    assert_eq!(json["policy"], "continue");
    assert_eq!(json["trials"][1]["status"], "succeeded");
    assert!(
        json["trials"][1]["output"]
            .as_str()
            .unwrap()
            .ends_with(&output_file_name(1))
    );
    assert!(report.started <= report.finished);
}
