//! Faulty site scoring
//!
//! Each failure at a site doubles the time the site stays banned: after `n`
//! consecutive failures the site is banned for `2^(n-1)` minutes counted from
//! the last failure. A success at the site forgives it entirely.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use tracing::{debug, info};

/// Failure history of one execution site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultySite {
    pub last_failure: DateTime<Utc>,
    pub errors: u32,
}

impl FaultySite {
    fn is_banned_at(&self, now: DateTime<Utc>) -> bool {
        let elapsed = (now - self.last_failure).num_minutes().abs();
        let window = 1i64 << self.errors.saturating_sub(1).min(62);
        elapsed < window
    }
}

/// Tracks failing sites for one command
#[derive(Debug, Default)]
pub struct FaultySiteTracker {
    sites: HashMap<String, FaultySite>,
}

impl FaultySiteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report_error(&mut self, site: &str) {
        self.report_error_at(site, Utc::now());
    }

    /// Records a failure at `site` observed at `now`
    pub fn report_error_at(&mut self, site: &str, now: DateTime<Utc>) {
        let entry = self
            .sites
            .entry(site.to_string())
            .and_modify(|faulty| {
                faulty.errors += 1;
                faulty.last_failure = now;
            })
            .or_insert(FaultySite {
                last_failure: now,
                errors: 1,
            });
        debug!("Site {} has {} recorded failure(s)", site, entry.errors);
    }

    /// Forgets every failure recorded for `site`
    pub fn report_success(&mut self, site: &str) {
        if self.sites.remove(site).is_some() {
            info!("Site {} recovered, removing it from the faulty list", site);
        }
    }

    pub fn banned_sites(&self) -> BTreeSet<String> {
        self.banned_sites_at(Utc::now())
    }

    /// Sites still inside their ban window at `now`
    pub fn banned_sites_at(&self, now: DateTime<Utc>) -> BTreeSet<String> {
        self.sites
            .iter()
            .filter(|(_, faulty)| faulty.is_banned_at(now))
            .map(|(site, _)| site.clone())
            .collect()
    }

    pub fn error_count(&self, site: &str) -> u32 {
        self.sites.get(site).map_or(0, |faulty| faulty.errors)
    }
}

/// One tracker per command, shared by the monitor and the executor
#[derive(Debug, Default)]
pub struct FaultySiteRegistry {
    trackers: Mutex<HashMap<String, FaultySiteTracker>>,
}

impl FaultySiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tracker<T>(&self, command: &str, f: impl FnOnce(&mut FaultySiteTracker) -> T) -> T {
        let mut trackers = self.trackers.lock().unwrap_or_else(|e| e.into_inner());
        f(trackers.entry(command.to_string()).or_default())
    }

    /// Records a failure and returns the consecutive failures now held by `site`
    pub fn report_error(&self, command: &str, site: &str) -> u32 {
        self.with_tracker(command, |tracker| {
            tracker.report_error(site);
            tracker.error_count(site)
        })
    }

    pub fn report_success(&self, command: &str, site: &str) {
        self.with_tracker(command, |tracker| tracker.report_success(site));
    }

    pub fn banned_sites(&self, command: &str) -> BTreeSet<String> {
        self.with_tracker(command, |tracker| tracker.banned_sites())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_ban_window_doubles_per_failure() {
        let start = Utc::now();

        for n in 1..=6u32 {
            let mut tracker = FaultySiteTracker::new();
            for _ in 0..n {
                tracker.report_error_at("LCG.CERN.ch", start);
            }
            let window = 1i64 << (n - 1);

            let inside = start + Duration::minutes(window - 1) + Duration::seconds(30);
            assert!(
                tracker.banned_sites_at(inside).contains("LCG.CERN.ch"),
                "{} failure(s) should still ban at {} min",
                n,
                window - 1
            );

            let outside = start + Duration::minutes(window);
            assert!(
                tracker.banned_sites_at(outside).is_empty(),
                "{} failure(s) should be lifted at {} min",
                n,
                window
            );
        }
    }

    #[test]
    fn test_success_forgives() {
        let now = Utc::now();
        let mut tracker = FaultySiteTracker::new();
        tracker.report_error_at("LCG.IN2P3.fr", now);
        tracker.report_error_at("LCG.IN2P3.fr", now);
        assert_eq!(tracker.error_count("LCG.IN2P3.fr"), 2);

        tracker.report_success("LCG.IN2P3.fr");
        assert_eq!(tracker.error_count("LCG.IN2P3.fr"), 0);
        assert!(tracker.banned_sites_at(now).is_empty());

        tracker.report_error_at("LCG.IN2P3.fr", now);
        assert_eq!(tracker.error_count("LCG.IN2P3.fr"), 1);
    }

    #[test]
    fn test_banned_sites_are_sorted() {
        let now = Utc::now();
        let mut tracker = FaultySiteTracker::new();
        tracker.report_error_at("b.site", now);
        tracker.report_error_at("a.site", now);

        let banned: Vec<_> = tracker.banned_sites_at(now).into_iter().collect();
        assert_eq!(banned, vec!["a.site", "b.site"]);
    }

    #[test]
    fn test_registry_isolates_commands() {
        let registry = FaultySiteRegistry::new();
        assert_eq!(registry.report_error("bet", "site.a"), 1);
        assert_eq!(registry.report_error("bet", "site.a"), 2);

        assert!(registry.banned_sites("bet").contains("site.a"));
        assert!(registry.banned_sites("fsl").is_empty());

        registry.report_success("bet", "site.a");
        assert!(registry.banned_sites("bet").is_empty());
    }
}
