use dashmap::DashMap;
use std::time::Duration;
use std::time::Instant;

/// One rolling window of request/failure counts for a single key (full URL
/// or domain, depending on how the caller names its scorer).
struct Window {
    started_at: Instant,
    requests: u64,
    failures: u64,
}

/// §4.1: a named scorer gates fetches/deliveries when, within the rolling
/// `period`, both `requests/second >= min_requests_per_sec` and
/// `failures/requests >= max_failure_fraction`.
///
/// In-process and best-effort, mirroring the original hub's memcache-backed
/// scorer: a process restart resets every window.
pub struct FailureScorer {
    prefix: &'static str,
    period: Duration,
    min_requests_per_sec: f64,
    max_failure_fraction: f64,
    windows: DashMap<String, Window>,
}

impl FailureScorer {
    pub fn new(
        prefix: &'static str,
        period_seconds: u64,
        min_requests_per_sec: f64,
        max_failure_fraction: f64,
    ) -> Self {
        Self {
            prefix,
            period: Duration::from_secs(period_seconds),
            min_requests_per_sec,
            max_failure_fraction,
            windows: DashMap::new(),
        }
    }

    /// For each key: `(allow, observed_failure_fraction)`. Does not mutate
    /// counters — deny decisions must not themselves count as observations.
    pub fn filter(
        &self,
        keys: &[String],
    ) -> Vec<(bool, f64)> {
        keys.iter()
            .map(|key| {
                let Some(mut entry) = self.windows.get_mut(key) else {
                    return (true, 0.0);
                };
                self.maybe_rotate(&mut entry);
                if entry.requests == 0 {
                    return (true, 0.0);
                }
                let elapsed = entry.started_at.elapsed().as_secs_f64().max(1.0);
                let rps = entry.requests as f64 / elapsed;
                let failure_fraction = entry.failures as f64 / entry.requests as f64;
                let deny = rps >= self.min_requests_per_sec && failure_fraction >= self.max_failure_fraction;
                (!deny, failure_fraction)
            })
            .collect()
    }

    /// Increment per-key counters for a batch of observed outcomes.
    pub fn report(
        &self,
        successes: &[String],
        failures: &[String],
    ) {
        for key in successes {
            self.bump(key, false);
        }
        for key in failures {
            self.bump(key, true);
        }
    }

    fn bump(
        &self,
        key: &str,
        failed: bool,
    ) {
        let mut entry = self.windows.entry(key.to_string()).or_insert_with(|| Window {
            started_at: Instant::now(),
            requests: 0,
            failures: 0,
        });
        self.maybe_rotate(&mut entry);
        entry.requests += 1;
        if failed {
            entry.failures += 1;
        }
    }

    fn maybe_rotate(
        &self,
        window: &mut Window,
    ) {
        if window.started_at.elapsed() >= self.period {
            window.started_at = Instant::now();
            window.requests = 0;
            window.failures = 0;
        }
    }

    pub fn name(&self) -> &'static str { self.prefix }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> FailureScorer { FailureScorer::new("test", 600, 0.0, 0.8) }

    #[test]
    fn unknown_url_is_allowed() {
        let s = scorer();
        let (allow, frac) = s.filter(&["http://bad/".to_string()])[0];
        assert!(allow);
        assert_eq!(frac, 0.0);
    }

    #[test]
    fn trips_after_enough_failures() {
        let s = scorer();
        let url = "http://bad/".to_string();
        for _ in 0..100 {
            s.report(&[], std::slice::from_ref(&url));
        }
        let (allow, frac) = s.filter(std::slice::from_ref(&url))[0];
        assert!(!allow);
        assert!(frac >= 0.8);
    }

    #[test]
    fn filter_does_not_itself_report() {
        let s = scorer();
        let url = "http://ok/".to_string();
        s.report(std::slice::from_ref(&url), &[]);
        let before = s.filter(std::slice::from_ref(&url))[0];
        let after = s.filter(std::slice::from_ref(&url))[0];
        assert_eq!(before, after);
    }
}
