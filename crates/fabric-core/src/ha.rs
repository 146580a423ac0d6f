//! Pure master-election logic.
//!
//! Deliberately free of any database or network code so it can be
//! unit-tested as "same inputs, same answer" without spinning up a store.
//! The background heartbeat/prune tasks and the store query that produces
//! the `Replica` snapshot passed into [`elect_master`] live in
//! `fabric-server::ha`.

use chrono::{DateTime, Utc};

use crate::models::{Replica, ReplicaRole};

/// HA coordinator configuration. Mirrors the environment keys in
/// `ServerConfig`; kept here so the election math and its defaults travel
/// together.
#[derive(Debug, Clone)]
pub struct HaConfig {
    pub instance_id: String,
    pub address: String,
    pub mode: ReplicaRole,
    pub heartbeat_interval: std::time::Duration,
    pub heartbeat_threshold: std::time::Duration,
    pub prune_interval: std::time::Duration,
    pub prune_multiplier: u32,
}

impl HaConfig {
    /// Default heartbeat threshold is `3 ×` the heartbeat interval.
    #[must_use]
    pub fn default_threshold(interval: std::time::Duration) -> std::time::Duration {
        interval.saturating_mul(3)
    }
}

impl Default for HaConfig {
    fn default() -> Self {
        let heartbeat_interval = std::time::Duration::from_secs(10);
        Self {
            instance_id: String::new(),
            address: String::new(),
            mode: ReplicaRole::Replica,
            heartbeat_threshold: Self::default_threshold(heartbeat_interval),
            heartbeat_interval,
            prune_interval: std::time::Duration::from_secs(300),
            prune_multiplier: 2,
        }
    }
}

/// The outcome of an election: whether this instance is master, and the
/// address of whoever is (so a replica can hand it to the client).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Election {
    pub is_master: bool,
    pub master_id: String,
    pub master_address: String,
    /// Set when the election fell back to "assume master" because no
    /// replica row passed the heartbeat-freshness cutoff. Callers should log
    /// loudly when this fires — it is safe on cold boot but surprising
    /// during a multi-node outage.
    pub degraded_fallback: bool,
}

/// Elect the master from a snapshot of replica rows.
///
/// Among rows with `last_seen_at > now - heartbeat_threshold`, the one with
/// the smallest `created_at` wins (stable tie-break by `id`, lexicographic).
/// If no row passes the freshness cutoff, `self_id`/`self_address` are
/// returned as master — this prevents deadlock during cold start, at the
/// cost of every instance briefly believing itself master when the replica
/// set is empty or fully stale.
#[must_use]
pub fn elect_master(
    replicas: &[Replica],
    now: DateTime<Utc>,
    heartbeat_threshold: std::time::Duration,
    self_id: &str,
    self_address: &str,
) -> Election {
    let cutoff = now
        - chrono::Duration::from_std(heartbeat_threshold).unwrap_or(chrono::Duration::zero());

    let mut healthy: Vec<&Replica> = replicas.iter().filter(|r| r.last_seen_at > cutoff).collect();
    healthy.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    match healthy.first() {
        Some(winner) => Election {
            is_master: winner.id == self_id,
            master_id: winner.id.clone(),
            master_address: winner.address.clone(),
            degraded_fallback: false,
        },
        None => Election {
            is_master: true,
            master_id: self_id.to_owned(),
            master_address: self_address.to_owned(),
            degraded_fallback: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn replica(id: &str, address: &str, created_offset_secs: i64, last_seen: DateTime<Utc>) -> Replica {
        Replica {
            id: id.to_owned(),
            address: address.to_owned(),
            role: ReplicaRole::Replica,
            created_at: Utc::now() + chrono::Duration::seconds(created_offset_secs),
            last_seen_at: last_seen,
        }
    }

    #[test]
    fn earliest_created_at_wins_deterministically() {
        let now = Utc::now();
        let replicas = vec![
            replica("b", "10.0.0.2:8080", 1, now),
            replica("a", "10.0.0.1:8080", 0, now),
            replica("c", "10.0.0.3:8080", 2, now),
        ];
        let threshold = Duration::from_secs(30);

        for (self_id, expect_master) in [("a", true), ("b", false), ("c", false)] {
            let election = elect_master(&replicas, now, threshold, self_id, "irrelevant");
            assert_eq!(election.is_master, expect_master, "self_id={self_id}");
            assert_eq!(election.master_id, "a");
            assert!(!election.degraded_fallback);
        }
    }

    #[test]
    fn stale_rows_are_excluded() {
        let now = Utc::now();
        let stale_time = now - chrono::Duration::seconds(120);
        let replicas = vec![
            replica("a", "10.0.0.1:8080", 0, stale_time),
            replica("b", "10.0.0.2:8080", 1, now),
        ];
        let threshold = Duration::from_secs(30);

        let election = elect_master(&replicas, now, threshold, "b", "10.0.0.2:8080");
        assert!(election.is_master);
        assert_eq!(election.master_id, "b");
    }

    #[test]
    fn empty_replica_set_falls_back_to_self() {
        let now = Utc::now();
        let election = elect_master(&[], now, Duration::from_secs(30), "solo", "10.0.0.9:8080");
        assert!(election.is_master);
        assert!(election.degraded_fallback);
        assert_eq!(election.master_address, "10.0.0.9:8080");
    }

    #[test]
    fn all_stale_also_falls_back() {
        let now = Utc::now();
        let stale_time = now - chrono::Duration::seconds(999);
        let replicas = vec![replica("a", "10.0.0.1:8080", 0, stale_time)];
        let election = elect_master(&replicas, now, Duration::from_secs(30), "solo", "10.0.0.9:8080");
        assert!(election.is_master);
        assert!(election.degraded_fallback);
    }

    #[test]
    fn tie_broken_lexicographically_by_id() {
        let now = Utc::now();
        let same_instant = now;
        let replicas = vec![
            Replica {
                id: "z".to_owned(),
                address: "10.0.0.9:8080".to_owned(),
                role: ReplicaRole::Replica,
                created_at: same_instant,
                last_seen_at: now,
            },
            Replica {
                id: "a".to_owned(),
                address: "10.0.0.1:8080".to_owned(),
                role: ReplicaRole::Replica,
                created_at: same_instant,
                last_seen_at: now,
            },
        ];
        let election = elect_master(&replicas, now, Duration::from_secs(30), "a", "10.0.0.1:8080");
        assert!(election.is_master);
        assert_eq!(election.master_id, "a");
    }
}
