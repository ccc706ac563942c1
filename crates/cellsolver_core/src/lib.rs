//! Uncertainty-aware simulation runner for CellML models
//!
//! This crate turns an ODE model description into C code for a native
//! solver, builds that solver, and runs it many times with parameters drawn
//! from user-supplied distributions. It provides:
//! - A CellML 2.0 toolchain: parsing, validation and static analysis
//! - C code generation with an optional external-variable shim
//! - Encoding of uncertainty specs into a statistical model, and sampling
//! - A build orchestrator for the native solver
//! - A bounded trial scheduler with an explicit failure policy
//!
//! # Pipeline
//!
//! ```ignore
//! use cellsolver_core::{ApplicationLayout, Pipeline, RunConfig};
//!
//! let layout = ApplicationLayout::from_env()?;
//! let config = RunConfig::load("run.json".as_ref())?;
//! let report = Pipeline::new(layout, 4).run("model.cellml".as_ref(), &config)?;
//! println!("{} trials succeeded", report.summary.succeeded);
//! ```

#![warn(clippy::all)]

// ============================================================================
// Core modules
// ============================================================================

pub mod build;
pub mod codegen;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod sampling;
pub mod trials;
pub mod uncertainty;

// ============================================================================
// Configuration and support
// ============================================================================

pub mod config;
pub mod util;

// ============================================================================
// Test modules
// ============================================================================

#[cfg(test)]
mod tests;

// ============================================================================
// Public re-exports for convenience
// ============================================================================

pub use build::BuildOrchestrator;
pub use codegen::{GeneratedArtifact, ModelCompiler, VariableManifest};
pub use config::{ApplicationLayout, RunConfig, SimulationConfig, SolverConfig};
pub use error::{PipelineError, Result};
pub use model::{AnalysedModel, VariableRef};
pub use pipeline::{Pipeline, PipelineReport};
pub use sampling::{Sample, Sampler};
pub use trials::{TrialFailurePolicy, TrialPlan, TrialReport, TrialScheduler};
pub use uncertainty::{StatisticalModel, UncertaintySpec, encode};
