//! One-shot build of the native solver against the generated code.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::error::{BuildError, BuildStep};

/// Runs the configure step and then the compile step in the build directory.
///
/// The programs default to `cmake` and `make -j`; tests substitute scripts.
#[derive(Debug, Clone)]
pub struct BuildOrchestrator {
    configure_program: PathBuf,
    compile_program: PathBuf,
    compile_args: Vec<OsString>,
}

impl Default for BuildOrchestrator {
    fn default() -> Self {
        Self {
            configure_program: PathBuf::from("cmake"),
            compile_program: PathBuf::from("make"),
            compile_args: vec![OsString::from("-j")],
        }
    }
}

impl BuildOrchestrator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_programs(
        configure_program: impl Into<PathBuf>,
        compile_program: impl Into<PathBuf>,
        compile_args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Self {
        Self {
            configure_program: configure_program.into(),
            compile_program: compile_program.into(),
            compile_args: compile_args.into_iter().map(Into::into).collect(),
        }
    }

    /// Arguments of the configure step.
    #[must_use]
    pub fn configure_args(
        src_dir: &Path,
        toolchain_dir: &Path,
        external_variables: bool,
    ) -> Vec<OsString> {
        let mut sundials = OsString::from("-DSUNDIALS_DIR=");
        sundials.push(toolchain_dir);
        vec![
            sundials,
            OsString::from("-DSTORE_FILE=TRUE"),
            OsString::from(if external_variables {
                "-DEXTERNAL_VARIABLES=TRUE"
            } else {
                "-DEXTERNAL_VARIABLES=FALSE"
            }),
            src_dir.as_os_str().to_owned(),
        ]
    }

    /// Configure and compile. Either step failing ends the build.
    pub fn build(
        &self,
        build_dir: &Path,
        src_dir: &Path,
        toolchain_dir: &Path,
        external_variables: bool,
    ) -> Result<(), BuildError> {
        if !build_dir.is_dir() {
            return Err(BuildError::MissingBuildDirectory(build_dir.to_path_buf()));
        }
        info!(
            build_dir = %build_dir.display(),
            external_variables,
            "building native solver"
        );

        self.run_step(
            BuildStep::Configure,
            &self.configure_program,
            &Self::configure_args(src_dir, toolchain_dir, external_variables),
            build_dir,
        )?;
        self.run_step(
            BuildStep::Compile,
            &self.compile_program,
            &self.compile_args,
            build_dir,
        )?;

        info!("native solver built");
        Ok(())
    }

    fn run_step(
        &self,
        step: BuildStep,
        program: &Path,
        args: &[OsString],
        cwd: &Path,
    ) -> Result<(), BuildError> {
        debug!(%step, program = %program.display(), ?args, "running build step");
        let status = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .status()
            .map_err(|source| BuildError::Spawn {
                step,
                program: program.display().to_string(),
                source,
            })?;
        if !status.success() {
            return Err(BuildError::StepFailed {
                step,
                program: program.display().to_string(),
                status,
            });
        }
        Ok(())
    }
}

/// The build must leave an executable behind.
pub fn verify_executable(path: &Path) -> Result<(), BuildError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(BuildError::MissingExecutable(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_args() {
        let args = BuildOrchestrator::configure_args(
            Path::new("/sim/simple-sundials-solver"),
            Path::new("/opt/sundials"),
            true,
        );
        assert_eq!(
            args,
            vec![
                OsString::from("-DSUNDIALS_DIR=/opt/sundials"),
                OsString::from("-DSTORE_FILE=TRUE"),
                OsString::from("-DEXTERNAL_VARIABLES=TRUE"),
                OsString::from("/sim/simple-sundials-solver"),
            ]
        );
        let off = BuildOrchestrator::configure_args(Path::new("s"), Path::new("t"), false);
        assert_eq!(off[2], OsString::from("-DEXTERNAL_VARIABLES=FALSE"));
    }

    #[test]
    fn test_missing_build_directory() {
        let err = BuildOrchestrator::new()
            .build(
                Path::new("/definitely/not/here"),
                Path::new("src"),
                Path::new("sundials"),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, BuildError::MissingBuildDirectory(_)));
    }

    #[test]
    fn test_verify_executable() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("siss");
        assert!(matches!(
            verify_executable(&exe),
            Err(BuildError::MissingExecutable(_))
        ));
        std::fs::write(&exe, "").unwrap();
        verify_executable(&exe).unwrap();
    }
}
