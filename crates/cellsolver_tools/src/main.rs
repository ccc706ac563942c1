mod commands;
mod logging;

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;

use cellsolver_core::trials::TrialPlan;
use cellsolver_core::{TrialFailurePolicy, VariableRef};
use clap::{Parser, Subcommand, ValueEnum};
use commands::{RunArgs, TrialsArgs};

#[derive(Parser, Debug)]
#[command(name = "cellsolver-tools", version)]
#[command(about = "Generate, build and run CellML simulations under parameter uncertainty")]
struct Args {
    /// Log level (debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum Policy {
    /// Record failed trials and keep going
    #[default]
    Continue,
    /// Stop starting trials after the first failure
    Abort,
}

impl From<Policy> for TrialFailurePolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Continue => TrialFailurePolicy::Continue,
            Policy::Abort => TrialFailurePolicy::Abort,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate, build and run every trial. Needs SIMULATION_DIR and
    /// SIMULATION_SUNDIALS_DIR.
    Run {
        model: PathBuf,
        /// Run configuration (num_trials, uncertainties, solver, simulation)
        #[arg(short, long)]
        config: PathBuf,
        /// Concurrent trials (default: available parallelism)
        #[arg(short, long)]
        workers: Option<usize>,
        #[arg(long, value_enum, default_value_t)]
        policy: Policy,
        /// Seed the sampler for repeatable draws
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Generate C code for a model
    Generate {
        model: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Variable to supply from the environment, as component.variable
        #[arg(short = 'x', long = "external")]
        externals: Vec<VariableRef>,
    },
    /// Show each variable's kind and index
    Inspect {
        model: PathBuf,
        #[arg(short = 'x', long = "external")]
        externals: Vec<VariableRef>,
        #[arg(long)]
        json: bool,
    },
    /// Encode an uncertainty spec as a statistical model
    Encode {
        uncertainty: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Draw parameter values from a statistical model
    Sample {
        model: PathBuf,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
    /// Run trials against an already built solver
    Trials {
        #[arg(long)]
        executable: PathBuf,
        #[arg(long)]
        solver_config: PathBuf,
        #[arg(long)]
        simulation_config: PathBuf,
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(short = 'n', long, default_value_t = 1)]
        trials: usize,
        #[arg(short, long)]
        workers: Option<usize>,
        #[arg(long, value_enum, default_value_t)]
        policy: Policy,
        /// Uncertainty spec to draw each trial's parameters from
        #[arg(long)]
        uncertainty: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

fn dispatch(command: Command) -> cellsolver_core::Result<()> {
    match command {
        Command::Run {
            model,
            config,
            workers,
            policy,
            seed,
        } => commands::run(RunArgs {
            model,
            config,
            workers: workers.unwrap_or_else(default_workers),
            policy: policy.into(),
            seed,
        }),
        Command::Generate {
            model,
            output,
            externals,
        } => commands::generate(&model, &output, &externals),
        Command::Inspect {
            model,
            externals,
            json,
        } => commands::inspect(&model, &externals, json),
        Command::Encode {
            uncertainty,
            output,
        } => commands::encode_spec(&uncertainty, output.as_deref()),
        Command::Sample { model, seed, count } => commands::sample(&model, seed, count),
        Command::Trials {
            executable,
            solver_config,
            simulation_config,
            output_dir,
            trials,
            workers,
            policy,
            uncertainty,
            seed,
        } => commands::trials(TrialsArgs {
            plan: TrialPlan {
                num_trials: trials,
                executable,
                solver_config,
                simulation_config,
                output_dir,
            },
            workers: workers.unwrap_or_else(default_workers),
            policy: policy.into(),
            uncertainty,
            seed,
        }),
    }
}

fn main() -> color_eyre::Result<ExitCode> {
    color_eyre::install()?;

    let args = Args::parse();
    logging::init_logging(args.log_file.as_deref(), &args.log_level)?;

    match dispatch(args.command) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            let code = err.exit_code();
            tracing::error!(exit_code = code, "{err}");
            eprintln!("Error: {:?}", color_eyre::Report::new(err));
            Ok(ExitCode::from(code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_generate_parses_externals() {
        let args = Args::try_parse_from([
            "cellsolver-tools",
            "generate",
            "model.cellml",
            "-o",
            "out",
            "-x",
            "dimensions.l",
            "--external",
            "dimensions.r",
        ])
        .unwrap();
        let Command::Generate { externals, .. } = args.command else {
            panic!("expected generate");
        };
        assert_eq!(
            externals,
            vec![
                VariableRef::new("dimensions", "l"),
                VariableRef::new("dimensions", "r"),
            ]
        );
    }

    #[test]
    fn test_bad_external_reference_is_a_usage_error() {
        let err = Args::try_parse_from([
            "cellsolver-tools",
            "inspect",
            "model.cellml",
            "-x",
            "nodot",
        ])
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_run_defaults() {
        let args = Args::try_parse_from([
            "cellsolver-tools",
            "run",
            "model.cellml",
            "--config",
            "run.json",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.log_level, "debug");
        let Command::Run {
            workers, policy, ..
        } = args.command
        else {
            panic!("expected run");
        };
        assert_eq!(workers, None);
        assert_eq!(policy, Policy::Continue);
        assert!(default_workers() >= 1);
    }
}
