use dashmap::DashMap;
use rand::Rng;
use std::time::Duration;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyedBy {
    Url,
    Domain,
}

struct Reservoir {
    started_at: Instant,
    seen: u64,
    samples: Vec<f64>,
}

/// Buffers `(key, value)` pairs between requests; flushed into a sampler via
/// `ReservoirSampler::sample`. Diagnostic-only — feeds the stats pages, drives
/// no control decision (§4.2).
#[derive(Default)]
pub struct Reporter {
    pending: Vec<(String, f64)>,
}

impl Reporter {
    pub fn new() -> Self { Self::default() }

    pub fn record(
        &mut self,
        key: impl Into<String>,
        value: f64,
    ) {
        self.pending.push((key.into(), value));
    }
}

/// A named reservoir sampler holding up to `capacity` samples per key, over a
/// rolling `period`, keyed by URL or by domain.
pub struct ReservoirSampler {
    name: &'static str,
    period: Duration,
    capacity: usize,
    keyed_by: KeyedBy,
    units: &'static str,
    reservoirs: DashMap<String, Reservoir>,
}

impl ReservoirSampler {
    pub fn new(
        name: &'static str,
        period_seconds: u64,
        capacity: usize,
        keyed_by: KeyedBy,
        units: &'static str,
    ) -> Self {
        Self {
            name,
            period: Duration::from_secs(period_seconds),
            capacity,
            keyed_by,
            units,
            reservoirs: DashMap::new(),
        }
    }

    pub fn key_for(
        &self,
        url: &str,
    ) -> String {
        match self.keyed_by {
            KeyedBy::Url => url.to_string(),
            KeyedBy::Domain => url::Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| url.to_string()),
        }
    }

    /// Apply Algorithm R reservoir sampling for every buffered `(key, value)`.
    pub fn sample(
        &self,
        reporter: Reporter,
    ) {
        let mut rng = rand::thread_rng();
        for (key, value) in reporter.pending {
            let mut entry = self.reservoirs.entry(key).or_insert_with(|| Reservoir {
                started_at: Instant::now(),
                seen: 0,
                samples: Vec::new(),
            });
            if entry.started_at.elapsed() >= self.period {
                entry.started_at = Instant::now();
                entry.seen = 0;
                entry.samples.clear();
            }
            entry.seen += 1;
            if entry.samples.len() < self.capacity {
                entry.samples.push(value);
            } else {
                let j = rng.gen_range(0..entry.seen);
                if (j as usize) < self.capacity {
                    entry.samples[j as usize] = value;
                }
            }
        }
    }

    pub fn samples_for(
        &self,
        key: &str,
    ) -> Vec<f64> {
        self.reservoirs
            .get(key)
            .map(|r| r.samples.clone())
            .unwrap_or_default()
    }

    pub fn name(&self) -> &'static str { self.name }
    pub fn units(&self) -> &'static str { self.units }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_samples_at_capacity() {
        let sampler = ReservoirSampler::new("lat", 600, 3, KeyedBy::Url, "ms");
        let mut reporter = Reporter::new();
        for i in 0..50 {
            reporter.record("http://x/", i as f64);
        }
        sampler.sample(reporter);
        assert_eq!(sampler.samples_for("http://x/").len(), 3);
    }

    #[test]
    fn domain_keying_collapses_paths() {
        let sampler = ReservoirSampler::new("lat", 600, 10, KeyedBy::Domain, "ms");
        assert_eq!(sampler.key_for("http://x.test/a"), sampler.key_for("http://x.test/b"));
    }
}
