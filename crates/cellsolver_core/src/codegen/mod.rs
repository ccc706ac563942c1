//! Code generation: turns a model source into C code for the native solver.
//!
//! [`ModelCompiler`] drives a [`ModelToolchain`] through parse, validate and
//! analyse, then writes:
//!
//! - `{model}.h` and `{model}.c`, the interface and implementation,
//! - `external_variables.h` / `.c` when external variables were requested,
//! - `model_files.cmake`, the build descriptor,
//! - `{model}.manifest.json`, the variable manifest.
//!
//! Every file is written atomically and replaces what was there before.

mod c;
mod external;
mod manifest;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::ModelGenerationError;
use crate::model::{AnalysedModel, CellmlToolchain, ModelToolchain, VariableRef};
use crate::util::{atomic_write, remove_if_exists};

pub use c::{CExpr, GENERATOR_VERSION, INTERFACE_VERSION, implementation_code, interface_code};
pub use external::{
    ExternalBinding, SHIM_HEADER, SHIM_SOURCE, bind_external_variables, shim_header, shim_source,
};
pub use manifest::{ManifestEntry, VariableManifest, cmake_descriptor};

pub const CMAKE_DESCRIPTOR: &str = "model_files.cmake";

/// Paths of everything one generation call wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedArtifact {
    pub header: PathBuf,
    pub implementation: PathBuf,
    /// Header and source of the external-variable shim, if one was needed.
    pub shim: Option<(PathBuf, PathBuf)>,
    pub build_descriptor: PathBuf,
    pub manifest: PathBuf,
    pub manifest_data: VariableManifest,
    pub bindings: Vec<ExternalBinding>,
}

impl GeneratedArtifact {
    #[must_use]
    pub fn has_external_variables(&self) -> bool {
        self.shim.is_some()
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ModelGenerationError + '_ {
    move |source| ModelGenerationError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write(path: PathBuf, content: impl AsRef<[u8]>) -> Result<PathBuf, ModelGenerationError> {
    atomic_write(&path, content).map_err(io_error(&path))?;
    debug!(path = %path.display(), "wrote generated file");
    Ok(path)
}

/// Compiles model sources with a [`ModelToolchain`].
#[derive(Debug, Clone, Default)]
pub struct ModelCompiler<T: ModelToolchain = CellmlToolchain> {
    toolchain: T,
}

impl ModelCompiler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: ModelToolchain> ModelCompiler<T> {
    pub fn with_toolchain(toolchain: T) -> Self {
        Self { toolchain }
    }

    /// Parse, validate and analyse `source`. Each stage runs only when the
    /// previous one reported no issues.
    pub fn compile(
        &self,
        source: &str,
        external_variables: &[VariableRef],
    ) -> Result<AnalysedModel, ModelGenerationError> {
        let model = self.toolchain.parse(source)?;
        debug!(model = %model.name, components = model.components.len(), "parsed model");
        self.toolchain.validate(&model)?;
        let analysed = self.toolchain.analyse(&model, external_variables)?;
        debug!(
            model = %analysed.name,
            states = analysed.states.len(),
            variables = analysed.variables.len(),
            "analysed model"
        );
        Ok(analysed)
    }

    /// Compile the model at `model_path` and write its generated code to
    /// `output_dir`, named after the model.
    pub fn generate(
        &self,
        model_path: &Path,
        output_dir: &Path,
        external_variables: &[VariableRef],
    ) -> Result<GeneratedArtifact, ModelGenerationError> {
        let source = fs::read_to_string(model_path).map_err(io_error(model_path))?;
        let model = self.compile(&source, external_variables)?;
        let bindings = bind_external_variables(&model, external_variables)?;
        write_artifact(&model, &bindings, output_dir)
    }
}

/// Write the generated files for an analysed model.
pub fn write_artifact(
    model: &AnalysedModel,
    bindings: &[ExternalBinding],
    output_dir: &Path,
) -> Result<GeneratedArtifact, ModelGenerationError> {
    fs::create_dir_all(output_dir).map_err(io_error(output_dir))?;

    let header_name = format!("{}.h", model.name);
    let shim_paths = (output_dir.join(SHIM_HEADER), output_dir.join(SHIM_SOURCE));
    let shim = if bindings.is_empty() {
        // A shim left by an earlier generation would otherwise be picked up.
        for stale in [&shim_paths.0, &shim_paths.1] {
            remove_if_exists(stale).map_err(io_error(stale))?;
        }
        None
    } else {
        let header = write(shim_paths.0, shim_header())?;
        let source = write(shim_paths.1, shim_source(bindings))?;
        Some((header, source))
    };

    let build_descriptor = write(
        output_dir.join(CMAKE_DESCRIPTOR),
        cmake_descriptor(&model.name, shim.is_some()),
    )?;
    let header = write(output_dir.join(&header_name), interface_code(model))?;
    let implementation = write(
        output_dir.join(format!("{}.c", model.name)),
        implementation_code(model, &header_name),
    )?;

    let manifest_data = VariableManifest::from_model(model);
    let manifest_path = output_dir.join(format!("{}.manifest.json", model.name));
    let json = serde_json::to_string_pretty(&manifest_data).map_err(|e| {
        ModelGenerationError::Io {
            path: manifest_path.clone(),
            source: e.into(),
        }
    })?;
    let manifest = write(manifest_path, json)?;

    info!(
        model = %model.name,
        dir = %output_dir.display(),
        externals = bindings.len(),
        "generated model code"
    );

    Ok(GeneratedArtifact {
        header,
        implementation,
        shim,
        build_descriptor,
        manifest,
        manifest_data,
        bindings: bindings.to_vec(),
    })
}
