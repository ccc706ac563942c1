use std::fs;

use tempfile::tempdir;

use super::write_model;
use crate::codegen::{CMAKE_DESCRIPTOR, ModelCompiler, SHIM_SOURCE, VariableManifest};
use crate::error::{GenerationStage, ModelGenerationError};
use crate::model::{VariableKind, VariableRef};

fn externals() -> Vec<VariableRef> {
    vec![
        VariableRef::new("dimensions", "l"),
        VariableRef::new("dimensions", "r"),
    ]
}

#[test]
fn test_generation_is_deterministic() {
    let dir = tempdir().unwrap();
    let model = write_model(dir.path());
    let out = dir.path().join("out");
    let compiler = ModelCompiler::new();

    let first = compiler.generate(&model, &out, &externals()).unwrap();
    let header = fs::read_to_string(&first.header).unwrap();
    let source = fs::read_to_string(&first.implementation).unwrap();

    let second = compiler.generate(&model, &out, &externals()).unwrap();
    assert_eq!(fs::read_to_string(&second.header).unwrap(), header);
    assert_eq!(fs::read_to_string(&second.implementation).unwrap(), source);
    assert_eq!(first.bindings, second.bindings);
}

#[test]
fn test_external_variables_get_a_shim() {
    let dir = tempdir().unwrap();
    let model = write_model(dir.path());
    let artifact = ModelCompiler::new()
        .generate(&model, dir.path(), &externals())
        .unwrap();

    assert!(artifact.has_external_variables());
    let indices: Vec<(usize, String)> = artifact
        .bindings
        .iter()
        .map(|b| (b.index, b.environment_name()))
        .collect();
    assert_eq!(
        indices,
        vec![
            (3, "dimensions__l".to_string()),
            (4, "dimensions__r".to_string()),
        ]
    );

    let shim = fs::read_to_string(dir.path().join(SHIM_SOURCE)).unwrap();
    assert!(shim.contains("if (index == 3) return environmentValue(\"dimensions__l\");"));
    assert!(shim.contains("if (index == 4) return environmentValue(\"dimensions__r\");"));

    let descriptor = fs::read_to_string(&artifact.build_descriptor).unwrap();
    assert!(descriptor.contains("external_variables.c"));

    let source = fs::read_to_string(&artifact.implementation).unwrap();
    assert!(source.contains("#include \"external_variables.h\""));
    assert!(source.contains("computeExternalVariable(voi, states, variables, 3)"));
}

#[test]
fn test_regenerating_without_externals_removes_shim() {
    let dir = tempdir().unwrap();
    let model = write_model(dir.path());
    let compiler = ModelCompiler::new();

    compiler
        .generate(&model, dir.path(), &externals())
        .unwrap();
    assert!(dir.path().join(SHIM_SOURCE).exists());

    let artifact = compiler.generate(&model, dir.path(), &[]).unwrap();
    assert!(!artifact.has_external_variables());
    assert!(artifact.bindings.is_empty());
    assert!(!dir.path().join(SHIM_SOURCE).exists());

    let descriptor = fs::read_to_string(dir.path().join(CMAKE_DESCRIPTOR)).unwrap();
    assert!(!descriptor.contains("external_variables"));
    let source = fs::read_to_string(&artifact.implementation).unwrap();
    assert!(!source.contains("computeExternalVariable"));
}

#[test]
fn test_manifest_matches_analysis() {
    let dir = tempdir().unwrap();
    let model = write_model(dir.path());
    let artifact = ModelCompiler::new()
        .generate(&model, dir.path(), &externals())
        .unwrap();

    let json = fs::read_to_string(&artifact.manifest).unwrap();
    let manifest: VariableManifest = serde_json::from_str(&json).unwrap();
    assert_eq!(manifest, artifact.manifest_data);
    assert_eq!(manifest.model, "cylinder_growth");

    let l = manifest.find("dimensions", "l").unwrap();
    assert_eq!((l.kind, l.index), (VariableKind::External, 3));
    let area = manifest.find("dimensions", "area").unwrap();
    assert_eq!(area.kind, VariableKind::Algebraic);
    let v = manifest.find("dimensions", "V").unwrap();
    assert_eq!((v.kind, v.index), (VariableKind::State, 0));
    assert_eq!(manifest.voi.as_ref().map(|e| e.name.as_str()), Some("time"));
}

#[test]
fn test_indices_shift_with_externals() {
    let compiler = ModelCompiler::new();
    let plain = compiler.compile(super::CYLINDER_GROWTH, &[]).unwrap();
    let external = compiler.compile(super::CYLINDER_GROWTH, &externals()).unwrap();

    let area = VariableRef::new("dimensions", "area");
    assert_eq!(plain.find(&area).unwrap().index, 3);
    assert_eq!(external.find(&area).unwrap().index, 1);
}

#[test]
fn test_unknown_external_fails_resolution() {
    let dir = tempdir().unwrap();
    let model = write_model(dir.path());
    let err = ModelCompiler::new()
        .generate(&model, dir.path(), &[VariableRef::new("dimensions", "missing")])
        .unwrap_err();
    assert_eq!(err.stage(), GenerationStage::Resolution);
}

#[test]
fn test_missing_model_file_is_io_error() {
    let dir = tempdir().unwrap();
    let err = ModelCompiler::new()
        .generate(&dir.path().join("absent.cellml"), dir.path(), &[])
        .unwrap_err();
    assert!(matches!(err, ModelGenerationError::Io { .. }));
}
