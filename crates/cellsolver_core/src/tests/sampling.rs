use crate::sampling::Sampler;
use crate::uncertainty::{UncertaintySpec, encode};

fn sampler(json: &str, seed: u64) -> Sampler {
    let spec: UncertaintySpec = serde_json::from_str(json).unwrap();
    Sampler::load_seeded(&encode(&spec).unwrap(), seed).unwrap()
}

fn mean_and_sd(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

#[test]
fn test_normal_draws_match_parameters() {
    let mut sampler = sampler(
        r#"{"dimensions.l": {"distribution": "normal", "p1": 6, "p2": 0.5}}"#,
        42,
    );
    let values: Vec<f64> = (0..10_000)
        .map(|_| {
            let value = sampler.draw().unwrap()["dimensions__l"];
            sampler.reset();
            value
        })
        .collect();

    let (mean, sd) = mean_and_sd(&values);
    assert!((mean - 6.0).abs() < 0.1, "mean was {mean}");
    assert!((sd - 0.5).abs() < 0.1, "sd was {sd}");
}

#[test]
fn test_parameter_key_order_does_not_change_draws() {
    let mut a = sampler(
        r#"{"x.y": {"distribution": "uniform", "p1": 1, "p2": 3}}"#,
        7,
    );
    let mut b = sampler(
        r#"{"x.y": {"p2": 3, "p1": 1, "distribution": "uniform"}}"#,
        7,
    );
    for _ in 0..100 {
        let (va, vb) = (a.draw().unwrap(), b.draw().unwrap());
        assert_eq!(va, vb);
        assert!((1.0..3.0).contains(&va["x__y"]));
        a.reset();
        b.reset();
    }
}

#[test]
fn test_every_parameter_is_drawn() {
    let mut sampler = sampler(
        r#"{
            "dimensions.l": {"distribution": "normal", "p1": 6, "p2": 0.5},
            "dimensions.r": {"distribution": "uniform", "p1": 1, "p2": 3},
            "rates.k": {"distribution": "exponential", "p1": 10}
        }"#,
        1,
    );
    let sample = sampler.draw().unwrap();
    let keys: Vec<&str> = sample.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["dimensions__l", "dimensions__r", "rates__k"]);
    assert!(sample["rates__k"] >= 0.0);
}
