//! Subcommand handlers. Each returns a [`PipelineError`] so `main` can map
//! failures to exit codes.

use std::fs;
use std::path::{Path, PathBuf};

use cellsolver_core::error::PipelineError;
use cellsolver_core::trials::{TrialFailurePolicy, TrialPlan, TrialScheduler};
use cellsolver_core::util::atomic_write;
use cellsolver_core::{
    ApplicationLayout, ModelCompiler, Pipeline, RunConfig, Sampler, StatisticalModel,
    UncertaintySpec, VariableManifest, VariableRef, encode,
};
use serde::Serialize;
use tracing::info;

type Result<T> = std::result::Result<T, PipelineError>;

fn io_error(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> PipelineError {
    let path = path.into();
    move |source| PipelineError::Io { path, source }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| io_error("<stdout>")(e.into()))
}

/// Print `content`, or write it to `output` when one is given.
fn emit(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            atomic_write(path, content).map_err(io_error(path))?;
            info!(path = %path.display(), "wrote output");
        }
        None => println!("{content}"),
    }
    Ok(())
}

fn load_sampler(model: &StatisticalModel, seed: Option<u64>) -> Result<Sampler> {
    Ok(match seed {
        Some(seed) => Sampler::load_seeded(model, seed)?,
        None => Sampler::load(model)?,
    })
}

pub struct RunArgs {
    pub model: PathBuf,
    pub config: PathBuf,
    pub workers: usize,
    pub policy: TrialFailurePolicy,
    pub seed: Option<u64>,
}

pub fn run(args: RunArgs) -> Result<()> {
    let layout = ApplicationLayout::from_env()?;
    let config = RunConfig::load(&args.config)?;

    let mut pipeline = Pipeline::new(layout, args.workers).with_policy(args.policy);
    if let Some(seed) = args.seed {
        pipeline = pipeline.with_seed(seed);
    }
    let report = pipeline.run(&args.model, &config)?;

    println!(
        "{} of {} trials succeeded ({} failed, {} skipped); summary at {}",
        report.summary.succeeded,
        report.summary.num_trials,
        report.summary.failed,
        report.summary.skipped,
        report.summary_path.display()
    );
    Ok(())
}

pub fn generate(model: &Path, output: &Path, externals: &[VariableRef]) -> Result<()> {
    let artifact = ModelCompiler::new().generate(model, output, externals)?;
    println!("{}", artifact.header.display());
    println!("{}", artifact.implementation.display());
    if let Some((header, source)) = &artifact.shim {
        println!("{}", header.display());
        println!("{}", source.display());
    }
    println!("{}", artifact.build_descriptor.display());
    println!("{}", artifact.manifest.display());
    Ok(())
}

/// Fixed-width table of every variable with its kind and index.
fn manifest_table(manifest: &VariableManifest) -> String {
    let rows: Vec<[String; 4]> = manifest
        .entries()
        .map(|e| {
            [
                e.component.clone(),
                e.name.clone(),
                e.kind.to_string(),
                e.index.to_string(),
            ]
        })
        .collect();
    let header = ["COMPONENT", "VARIABLE", "KIND", "INDEX"].map(String::from);

    let mut widths = header.clone().map(|h| h.len());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    for row in std::iter::once(&header).chain(&rows) {
        let line: Vec<String> = row
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    }
    out
}

pub fn inspect(model: &Path, externals: &[VariableRef], json: bool) -> Result<()> {
    let source = fs::read_to_string(model).map_err(io_error(model))?;
    let analysed = ModelCompiler::new().compile(&source, externals)?;
    let manifest = VariableManifest::from_model(&analysed);
    if json {
        println!("{}", to_json(&manifest)?);
    } else {
        print!("{}", manifest_table(&manifest));
    }
    Ok(())
}

pub fn encode_spec(uncertainty: &Path, output: Option<&Path>) -> Result<()> {
    let spec = UncertaintySpec::load(uncertainty)?;
    let model = encode(&spec)?;
    emit(&model.to_json()?, output)
}

pub fn sample(model: &Path, seed: Option<u64>, count: usize) -> Result<()> {
    let document = fs::read_to_string(model).map_err(io_error(model))?;
    let mut sampler = load_sampler(&StatisticalModel::from_json(&document)?, seed)?;

    let mut draws = Vec::with_capacity(count);
    for _ in 0..count {
        draws.push(sampler.draw()?);
        sampler.reset();
    }
    match draws.as_slice() {
        [single] => println!("{}", to_json(single)?),
        _ => println!("{}", to_json(&draws)?),
    }
    Ok(())
}

pub struct TrialsArgs {
    pub plan: TrialPlan,
    pub workers: usize,
    pub policy: TrialFailurePolicy,
    pub uncertainty: Option<PathBuf>,
    pub seed: Option<u64>,
}

pub fn trials(args: TrialsArgs) -> Result<()> {
    let mut sampler = match &args.uncertainty {
        Some(path) => {
            let spec = UncertaintySpec::load(path)?;
            Some(load_sampler(&encode(&spec)?, args.seed)?)
        }
        None => None,
    };

    let report = TrialScheduler::new(args.workers)
        .with_policy(args.policy)
        .run(&args.plan, sampler.as_mut())?
        .wait();
    let summary_path = report
        .write_summary(&args.plan.output_dir)
        .map_err(io_error(&args.plan.output_dir))?;

    println!(
        "{} of {} trials succeeded; summary at {}",
        report.succeeded(),
        report.outcomes.len(),
        summary_path.display()
    );
    report.check()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellsolver_core::codegen::ManifestEntry;
    use cellsolver_core::model::VariableKind;

    #[test]
    fn test_manifest_table_is_aligned() {
        let entry = |name: &str, kind, index| ManifestEntry {
            name: name.to_string(),
            component: "dimensions".to_string(),
            units: "metre".to_string(),
            kind,
            index,
        };
        let manifest = VariableManifest {
            model: "m".to_string(),
            voi: None,
            states: vec![entry("V", VariableKind::State, 0)],
            variables: vec![entry("volume_ratio", VariableKind::Algebraic, 0)],
        };
        let table = manifest_table(&manifest);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("COMPONENT   VARIABLE      KIND"));
        assert_eq!(lines[1], "dimensions  V             STATE      0");
        assert_eq!(lines[2], "dimensions  volume_ratio  ALGEBRAIC  0");
    }

    #[test]
    fn test_encode_writes_document() {
        let dir = tempfile::tempdir().unwrap();
        let spec = dir.path().join("uncertainty.json");
        fs::write(
            &spec,
            r#"{"dimensions.l": {"distribution": "normal", "p1": 6, "p2": 0.5}}"#,
        )
        .unwrap();
        let out = dir.path().join("model.json");
        encode_spec(&spec, Some(&out)).unwrap();

        let model = StatisticalModel::from_json(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(model.initial_assignments[0].math, "normal(6, 0.5)");
    }

    #[test]
    fn test_sample_rejects_missing_document() {
        let err = sample(Path::new("/no/such/model.json"), Some(1), 1).unwrap_err();
        assert_eq!(err.exit_code(), 8);
    }
}
