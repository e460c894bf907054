//! Keep/drop decisions

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How the keep/drop decision is made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Independent uniform draw per event
    #[default]
    Probabilistic,
    /// Pure function of the event id, stable across reprocessing
    Deterministic,
}

impl SamplingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplingMode::Probabilistic => "probabilistic",
            SamplingMode::Deterministic => "deterministic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "probabilistic" => Some(SamplingMode::Probabilistic),
            "deterministic" => Some(SamplingMode::Deterministic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    rate: f64,
    mode: SamplingMode,
}

impl Sampler {
    /// `rate` is clamped into `[0, 1]`
    pub fn new(rate: f64, mode: SamplingMode) -> Self {
        let rate = if rate.is_nan() { 1.0 } else { rate.clamp(0.0, 1.0) };
        Self { rate, mode }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn mode(&self) -> SamplingMode {
        self.mode
    }

    /// Whether the event with this id is kept
    pub fn should_keep(&self, event_id: &str) -> bool {
        if self.rate >= 1.0 {
            return true;
        }
        if self.rate <= 0.0 {
            return false;
        }
        match self.mode {
            SamplingMode::Probabilistic => rand::random::<f64>() < self.rate,
            SamplingMode::Deterministic => hash_unit(event_id) < self.rate,
        }
    }
}

/// Map an id onto `[0, 1)` using the first 8 bytes of its SHA-256
fn hash_unit(id: &str) -> f64 {
    let digest = Sha256::digest(id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    // top 53 bits keep the result strictly below 1.0
    (u64::from_be_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!(SamplingMode::parse("Deterministic"), Some(SamplingMode::Deterministic));
        assert_eq!(SamplingMode::parse("probabilistic"), Some(SamplingMode::Probabilistic));
        assert_eq!(SamplingMode::parse("sometimes"), None);
    }

    #[test]
    fn test_bounds() {
        for mode in [SamplingMode::Probabilistic, SamplingMode::Deterministic] {
            let all = Sampler::new(1.0, mode);
            let none = Sampler::new(0.0, mode);
            for i in 0..100 {
                let id = format!("evt_{}", i);
                assert!(all.should_keep(&id));
                assert!(!none.should_keep(&id));
            }
        }
        assert_eq!(Sampler::new(7.0, SamplingMode::Deterministic).rate(), 1.0);
        assert_eq!(Sampler::new(-1.0, SamplingMode::Deterministic).rate(), 0.0);
    }

    #[test]
    fn test_deterministic_is_stable() {
        let sampler = Sampler::new(0.5, SamplingMode::Deterministic);
        for i in 0..200 {
            let id = format!("evt_{:04}", i);
            let first = sampler.should_keep(&id);
            for _ in 0..5 {
                assert_eq!(sampler.should_keep(&id), first, "{}", id);
            }
        }
    }

    #[test]
    fn test_deterministic_rate_is_roughly_honored() {
        let sampler = Sampler::new(0.3, SamplingMode::Deterministic);
        let kept = (0..10_000)
            .filter(|i| sampler.should_keep(&format!("evt_{}", i)))
            .count();
        assert!((2_500..3_500).contains(&kept), "kept {}", kept);
    }

    #[test]
    fn test_hash_unit_range() {
        for i in 0..1000 {
            let v = hash_unit(&i.to_string());
            assert!((0.0..1.0).contains(&v));
        }
    }
}
