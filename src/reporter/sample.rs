use rand::Rng;

/// Probabilistic admission gate, evaluated once per (event, metric) pairing
/// before aggregation so rejected events never touch the cache.
#[derive(Debug, Clone, Copy)]
pub struct Sampler {
    rate: f64,
}

impl Sampler {
    /// Creates a sampler with the given admission rate, clamped to [0, 1].
    pub fn new(rate: f64) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Whether one event is admitted. Rate 1.0 always admits and 0.0 always
    /// rejects without touching the RNG.
    pub fn admit(&self) -> bool {
        if self.rate >= 1.0 {
            return true;
        }
        if self.rate <= 0.0 {
            return false;
        }
        rand::thread_rng().gen::<f64>() < self.rate
    }
}
