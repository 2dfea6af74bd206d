use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Lowest water level the walk is allowed to reach, in metres
pub const LEVEL_FLOOR: f64 = 0.1;

/// Trend profile applied to a station's random walk
///
/// Tags that are not one of the four known profiles are kept verbatim so
/// they can be written back alongside the readings; they walk flat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Scenario {
    #[default]
    Normal,
    Drought,
    OverExtraction,
    Recharge,
    Unrecognized(String),
}

impl Scenario {
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "normal" => Scenario::Normal,
            "drought" => Scenario::Drought,
            "over_extraction" => Scenario::OverExtraction,
            "recharge" => Scenario::Recharge,
            _ => Scenario::Unrecognized(tag.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Scenario::Normal => "normal",
            Scenario::Drought => "drought",
            Scenario::OverExtraction => "over_extraction",
            Scenario::Recharge => "recharge",
            Scenario::Unrecognized(tag) => tag,
        }
    }

    /// Closed per-step delta interval in metres, `None` for unrecognized tags
    pub fn delta_range(&self) -> Option<(f64, f64)> {
        match self {
            Scenario::Normal => Some((-0.01, 0.01)),
            Scenario::Drought => Some((-0.06, -0.03)),
            Scenario::OverExtraction => Some((-0.10, -0.06)),
            Scenario::Recharge => Some((0.05, 0.10)),
            Scenario::Unrecognized(_) => None,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Scenario::Unrecognized(_))
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Scenario::from_tag(s))
    }
}

impl From<String> for Scenario {
    fn from(tag: String) -> Self {
        Scenario::from_tag(&tag)
    }
}

impl From<Scenario> for String {
    fn from(scenario: Scenario) -> Self {
        scenario.as_str().to_string()
    }
}

/// Source of per-step deltas
pub trait DeltaSampler {
    /// Draw a value from the closed interval `[min, max]`
    fn sample(&mut self, min: f64, max: f64) -> f64;
}

/// Uniform draws from a seedable generator
pub struct UniformSampler<R = StdRng> {
    rng: R,
}

impl<R: Rng> UniformSampler<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl UniformSampler<StdRng> {
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// Seeded when a seed is given, otherwise from OS entropy
    pub fn from_seed_option(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::from_entropy(),
        }
    }
}

impl<R: Rng> DeltaSampler for UniformSampler<R> {
    fn sample(&mut self, min: f64, max: f64) -> f64 {
        if min >= max {
            return min;
        }
        self.rng.gen_range(min..=max)
    }
}

/// One-step random walk for water levels
///
/// Holds no history: each value depends only on the previous one and a
/// fresh delta.
pub struct TrendGenerator<S = UniformSampler> {
    sampler: S,
}

impl<S: DeltaSampler> TrendGenerator<S> {
    pub fn new(sampler: S) -> Self {
        Self { sampler }
    }

    pub fn next_value(&mut self, previous: f64, scenario: &Scenario) -> f64 {
        let delta = match scenario.delta_range() {
            Some((min, max)) => self.sampler.sample(min, max),
            None => 0.0,
        };
        apply_delta(previous, delta)
    }

    /// Starting level for a station without a configured one, in [2.0, 5.0]
    pub fn initial_level(&mut self) -> f64 {
        round_level(self.sampler.sample(2.0, 5.0))
    }
}

impl TrendGenerator<UniformSampler> {
    pub fn from_seed_option(seed: Option<u64>) -> Self {
        Self::new(UniformSampler::from_seed_option(seed))
    }
}

/// Apply a delta, clamp to [`LEVEL_FLOOR`] and round to millimetres
pub fn apply_delta(previous: f64, delta: f64) -> f64 {
    round_level((previous + delta).max(LEVEL_FLOOR))
}

/// Round to three decimal places
pub fn round_level(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
