use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use common::{Field, JobId, JobStore};

#[derive(Debug, Default, PartialEq)]
pub struct ReapReport {
    /// Abandoned jobs handed back to the queue.
    pub requeued: Vec<JobId>,
    /// Jobs whose result was written but whose worker stopped before cleaning up.
    pub released: Vec<JobId>,
    /// Expired claims with no payload behind them.
    pub orphaned: Vec<JobId>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.released.is_empty() && self.orphaned.is_empty()
    }
}

/// Recover jobs whose owner stopped refreshing its claim for longer than `lease`.
pub fn reap_expired(store: &JobStore, lease: Duration, now: SystemTime) -> Result<ReapReport> {
    let mut report = ReapReport::default();
    let claims: HashMap<JobId, SystemTime> = store
        .list_claimed()?
        .into_iter()
        .map(|c| (c.job_id, c.heartbeat))
        .collect();

    let mut inflight_ids = HashSet::new();
    for entry in store.list_inflight()? {
        let id = entry.job.job_id.clone();
        inflight_ids.insert(id.clone());

        if store.exists(&id, Field::Result) {
            store.release(&entry.job)?;
            report.released.push(id);
            continue;
        }

        let last_seen = match claims.get(&id) {
            Some(heartbeat) => (*heartbeat).max(entry.touched),
            None => entry.touched,
        };
        if expired(last_seen, now, lease) && store.requeue(&entry.job)? {
            log::warn!("Requeued job {}: lease expired", id);
            report.requeued.push(id);
        }
    }

    for (id, heartbeat) in claims {
        if inflight_ids.contains(&id) || !expired(heartbeat, now, lease) {
            continue;
        }
        log::warn!("Removing stale claim on job {}", id);
        store.remove_claim(&id)?;
        report.orphaned.push(id);
    }

    Ok(report)
}

fn expired(last_seen: SystemTime, now: SystemTime, lease: Duration) -> bool {
    // a timestamp in the future (clock skew between nodes) counts as fresh
    now.duration_since(last_seen)
        .map(|age| age > lease)
        .unwrap_or(false)
}
