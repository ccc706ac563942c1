//! Criterion benchmarks for cellsolver_core
//!
//! Run with: cargo bench -p cellsolver_core

use cellsolver_core::codegen::{implementation_code, interface_code};
use cellsolver_core::model::VariableRef;
use cellsolver_core::{ModelCompiler, Sampler, UncertaintySpec, encode};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

const MODEL: &str = include_str!("../src/tests/fixtures/cylinder_growth.cellml");

fn uncertainty_spec(parameters: usize) -> UncertaintySpec {
    let entries: Vec<String> = (0..parameters)
        .map(|i| {
            let distribution = match i % 3 {
                0 => r#"{"distribution": "normal", "p1": 6, "p2": 0.5}"#,
                1 => r#"{"distribution": "uniform", "p1": 1, "p2": 3}"#,
                _ => r#"{"distribution": "normal", "p1": 6, "p2": 0.5, "p3": 5, "p4": 7}"#,
            };
            format!(r#""component_{i}.p": {distribution}"#)
        })
        .collect();
    serde_json::from_str(&format!("{{{}}}", entries.join(","))).unwrap()
}

fn bench_sampling(c: &mut Criterion) {
    let mut group = c.benchmark_group("sampling");
    for parameters in [1, 10, 100] {
        let spec = uncertainty_spec(parameters);
        group.bench_with_input(
            BenchmarkId::new("encode", parameters),
            &spec,
            |b, spec| b.iter(|| encode(black_box(spec))),
        );

        let model = encode(&spec).expect("encodable spec");
        let mut sampler = Sampler::load_seeded(&model, 42).expect("valid model");
        group.bench_function(BenchmarkId::new("draw", parameters), |b| {
            b.iter(|| {
                sampler.reset();
                black_box(sampler.draw())
            })
        });
    }
    group.finish();
}

fn bench_codegen(c: &mut Criterion) {
    let compiler = ModelCompiler::new();
    let externals = vec![
        VariableRef::new("dimensions", "l"),
        VariableRef::new("dimensions", "r"),
    ];

    c.bench_function("compile_model", |b| {
        b.iter(|| compiler.compile(black_box(MODEL), &externals))
    });

    let analysed = compiler.compile(MODEL, &externals).expect("fixture compiles");
    c.bench_function("emit_c_code", |b| {
        b.iter(|| {
            let header = interface_code(black_box(&analysed));
            let source = implementation_code(black_box(&analysed), "cylinder_growth.h");
            (header, source)
        })
    });
}

criterion_group!(benches, bench_sampling, bench_codegen);
criterion_main!(benches);
