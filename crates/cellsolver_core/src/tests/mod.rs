//! Integration tests for the cellsolver pipeline
//!
//! Tests are organized by topic:
//! - `codegen` - Generated files, external-variable shim and manifest
//! - `sampling` - Statistical behaviour of the sampler
//! - `trials` - Trial scheduling against small shell-script solvers
//! - `pipeline` - Full runs with stand-in build tools

mod codegen;
mod sampling;
mod trials;

use std::path::Path;

/// Cylinder growing at a rate proportional to its surface area.
pub(crate) const CYLINDER_GROWTH: &str = include_str!("fixtures/cylinder_growth.cellml");

pub(crate) fn write_model(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("cylinder_growth.cellml");
    std::fs::write(&path, CYLINDER_GROWTH).unwrap();
    path
}

/// Write an executable `/bin/sh` script.
#[cfg(unix)]
pub(crate) fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}
