//! Drawing parameter samples from a [`StatisticalModel`].
//!
//! Every initializer is parsed once by [`Sampler::load`]. [`Sampler::draw`]
//! evaluates all of them independently and caches the result until
//! [`Sampler::reset`], so one trial always sees one consistent sample set.

use std::collections::BTreeMap;
use std::fmt;

use rand::rngs::SmallRng;
use rand::distr::Open01;
use rand::{Rng, SeedableRng};
use rand_distr::{
    Binomial, Cauchy, ChiSquared, Distribution, Exp, Gamma, LogNormal, Normal, Poisson, Weibull,
};

use crate::error::DistributionError;
use crate::uncertainty::StatisticalModel;

/// Parameter identifier to drawn value.
pub type Sample = BTreeMap<String, f64>;

/// Rejection attempts for a truncated distribution before giving up.
pub const MAX_TRUNCATION_ATTEMPTS: usize = 10_000;

/// Distribution name, base arity and whether `[min, max]` may follow.
const DISTRIBUTIONS: &[(&str, usize, bool)] = &[
    ("normal", 2, true),
    ("uniform", 2, false),
    ("bernoulli", 1, false),
    ("binomial", 2, true),
    ("cauchy", 2, true),
    ("chisquare", 1, true),
    ("exponential", 1, true),
    ("gamma", 2, true),
    ("laplace", 2, true),
    ("lognormal", 2, true),
    ("poisson", 1, true),
    ("rayleigh", 1, true),
];

/// A parsed `name(a, b, ...)` initializer.
#[derive(Debug, Clone, PartialEq)]
struct Initializer {
    symbol: String,
    distribution: String,
    args: Vec<f64>,
}

fn parse_initializer(symbol: &str, math: &str) -> Result<Initializer, DistributionError> {
    let malformed = || DistributionError::MalformedInitializer {
        parameter: symbol.to_string(),
        math: math.to_string(),
    };

    let (name, rest) = math.trim().split_once('(').ok_or_else(malformed)?;
    let inner = rest.strip_suffix(')').ok_or_else(malformed)?;
    let name = name.trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(malformed());
    }

    let args = if inner.trim().is_empty() {
        Vec::new()
    } else {
        inner
            .split(',')
            .map(|a| a.trim().parse::<f64>().map_err(|_| malformed()))
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(Initializer {
        symbol: symbol.to_string(),
        distribution: name.to_string(),
        args,
    })
}

fn invalid(init: &Initializer, reason: impl fmt::Display) -> DistributionError {
    DistributionError::InvalidParameters {
        parameter: init.symbol.clone(),
        name: init.distribution.clone(),
        reason: reason.to_string(),
    }
}

/// Laplace by inversion of its CDF.
struct Laplace {
    location: f64,
    scale: f64,
}

impl Laplace {
    /// Inverse CDF, finite for every `p` in the open interval (0, 1).
    fn quantile(&self, p: f64) -> f64 {
        let u = p - 0.5;
        self.location - self.scale * u.signum() * (1.0 - 2.0 * u.abs()).ln()
    }
}

impl Distribution<f64> for Laplace {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.quantile(rng.sample(Open01))
    }
}

type Draw = Box<dyn Fn(&mut SmallRng) -> f64>;

/// A standard deviation or scale: finite and not negative.
fn spread(init: &Initializer, value: f64) -> Result<f64, DistributionError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(invalid(
            init,
            format!("spread must be finite and non-negative, got {value}"),
        ))
    }
}

fn boxed<D: Distribution<f64> + 'static>(d: D) -> Draw {
    Box::new(move |rng: &mut SmallRng| d.sample(rng))
}

/// Build the sampling function for the leading `base` arguments.
fn distribution(init: &Initializer, p: &[f64]) -> Result<Draw, DistributionError> {
    let draw: Draw = match init.distribution.as_str() {
        "normal" => boxed(Normal::new(p[0], spread(init, p[1])?).map_err(|e| invalid(init, e))?),
        "uniform" => {
            let d = rand::distr::Uniform::new(p[0], p[1]).map_err(|e| invalid(init, e))?;
            boxed(d)
        }
        "bernoulli" => {
            let d = rand::distr::Bernoulli::new(p[0]).map_err(|e| invalid(init, e))?;
            Box::new(move |rng: &mut SmallRng| if d.sample(rng) { 1.0 } else { 0.0 })
        }
        "binomial" => {
            if p[0] < 0.0 || p[0].fract() != 0.0 {
                return Err(invalid(init, "number of trials must be a non-negative integer"));
            }
            let d = Binomial::new(p[0] as u64, p[1]).map_err(|e| invalid(init, e))?;
            Box::new(move |rng: &mut SmallRng| d.sample(rng) as f64)
        }
        "cauchy" => boxed(Cauchy::new(p[0], spread(init, p[1])?).map_err(|e| invalid(init, e))?),
        "chisquare" => boxed(ChiSquared::new(p[0]).map_err(|e| invalid(init, e))?),
        "exponential" => boxed(Exp::new(p[0]).map_err(|e| invalid(init, e))?),
        "gamma" => boxed(Gamma::new(p[0], p[1]).map_err(|e| invalid(init, e))?),
        "laplace" => {
            if !(p[1] > 0.0 && p[1].is_finite() && p[0].is_finite()) {
                return Err(invalid(init, "scale must be positive and finite"));
            }
            boxed(Laplace {
                location: p[0],
                scale: p[1],
            })
        }
        "lognormal" => {
            boxed(LogNormal::new(p[0], spread(init, p[1])?).map_err(|e| invalid(init, e))?)
        }
        "poisson" => boxed(Poisson::new(p[0]).map_err(|e| invalid(init, e))?),
        "rayleigh" => {
            // Rayleigh(σ) is Weibull with scale σ√2 and shape 2.
            let d = Weibull::new(p[0] * std::f64::consts::SQRT_2, 2.0)
                .map_err(|e| invalid(init, e))?;
            boxed(d)
        }
        other => {
            return Err(DistributionError::Unknown {
                parameter: init.symbol.clone(),
                name: other.to_string(),
            });
        }
    };
    Ok(draw)
}

fn draw_one(init: &Initializer, rng: &mut SmallRng) -> Result<f64, DistributionError> {
    let Some(&(_, base, truncatable)) = DISTRIBUTIONS
        .iter()
        .find(|(name, _, _)| *name == init.distribution)
    else {
        return Err(DistributionError::Unknown {
            parameter: init.symbol.clone(),
            name: init.distribution.clone(),
        });
    };

    let n = init.args.len();
    if n != base && !(truncatable && n == base + 2) {
        return Err(DistributionError::Arity {
            parameter: init.symbol.clone(),
            name: init.distribution.clone(),
            expected: if truncatable {
                format!("{base} or {}", base + 2)
            } else {
                base.to_string()
            },
            actual: n,
        });
    }

    let sample = distribution(init, &init.args[..base])?;
    let &[min, max] = &init.args[base..] else {
        return Ok(sample(rng));
    };
    if min.is_nan() || max.is_nan() || min > max {
        return Err(invalid(init, format!("empty truncation interval [{min}, {max}]")));
    }

    for _ in 0..MAX_TRUNCATION_ATTEMPTS {
        let value = sample(rng);
        if (min..=max).contains(&value) {
            return Ok(value);
        }
    }
    Err(DistributionError::TruncationExhausted {
        parameter: init.symbol.clone(),
        name: init.distribution.clone(),
        min,
        max,
        attempts: MAX_TRUNCATION_ATTEMPTS,
    })
}

/// A loaded statistical model.
pub struct Sampler {
    initializers: Vec<Initializer>,
    rng: SmallRng,
    cached: Option<Sample>,
}

impl fmt::Debug for Sampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sampler")
            .field("initializers", &self.initializers)
            .field("cached", &self.cached)
            .finish_non_exhaustive()
    }
}

impl Sampler {
    /// Load with an entropy-seeded generator.
    pub fn load(model: &StatisticalModel) -> Result<Self, DistributionError> {
        Self::with_rng(model, SmallRng::from_os_rng())
    }

    /// Load with a fixed seed, for repeatable runs.
    pub fn load_seeded(model: &StatisticalModel, seed: u64) -> Result<Self, DistributionError> {
        Self::with_rng(model, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(model: &StatisticalModel, rng: SmallRng) -> Result<Self, DistributionError> {
        let initializers = model
            .initial_assignments
            .iter()
            .map(|a| parse_initializer(&a.symbol, &a.math))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            initializers,
            rng,
            cached: None,
        })
    }

    /// Identifiers of the parameters, in model order.
    pub fn parameters(&self) -> impl Iterator<Item = &str> {
        self.initializers.iter().map(|i| i.symbol.as_str())
    }

    /// One value per parameter. Repeated calls return the same values until
    /// [`Sampler::reset`].
    pub fn draw(&mut self) -> Result<Sample, DistributionError> {
        if let Some(cached) = &self.cached {
            return Ok(cached.clone());
        }
        let mut sample = Sample::new();
        for init in &self.initializers {
            sample.insert(init.symbol.clone(), draw_one(init, &mut self.rng)?);
        }
        self.cached = Some(sample.clone());
        Ok(sample)
    }

    /// Discard the cached draw so the next [`Sampler::draw`] is fresh.
    pub fn reset(&mut self) {
        self.cached = None;
    }
}
