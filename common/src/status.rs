use std::collections::HashMap;

use chrono_tz::Tz;

use crate::error::Result;
use crate::job::{JobId, JobRow, JobState};
use crate::store::{Field, JobStore};

/// Every job the store knows about, queued first, then running, then
/// completed.
pub fn aggregate(store: &JobStore, tz: Tz) -> Result<Vec<JobRow>> {
    let mut rows = Vec::new();

    for job in store.list_pending()? {
        rows.push(JobRow {
            job_id: job.job_id,
            state: JobState::Queued,
            node: None,
            started_at: None,
            completed_at: None,
        });
    }

    // A job is only Running once a claim names its node. A bare inflight
    // entry has been taken off the queue but not started, which is also
    // where an empty payload is finalized.
    for entry in store.list_inflight()? {
        let started_at = store.get_stamp(&entry.job.job_id, Field::Start, tz)?;
        rows.push(JobRow {
            job_id: entry.job.job_id,
            state: JobState::Queued,
            node: None,
            started_at,
            completed_at: None,
        });
    }

    for claim in store.list_claimed()? {
        let started_at = store.get_stamp(&claim.job_id, Field::Start, tz)?;
        rows.push(JobRow {
            job_id: claim.job_id,
            state: JobState::Running,
            node: Some(claim.node),
            started_at,
            completed_at: None,
        });
    }

    for job_id in store.list_completed()? {
        rows.push(JobRow {
            started_at: store.get_stamp(&job_id, Field::Start, tz)?,
            completed_at: store.get_stamp(&job_id, Field::End, tz)?,
            node: store
                .get_string(&job_id, Field::Node)?
                .map(|n| n.trim().to_string()),
            state: JobState::Completed,
            job_id,
        });
    }

    Ok(merge_rows(rows))
}

/// Collapse rows for the same id, keeping the most advanced state. Between
/// two rows in the same state the one that knows its node wins.
pub fn merge_rows(rows: Vec<JobRow>) -> Vec<JobRow> {
    let mut by_id: HashMap<JobId, JobRow> = HashMap::new();
    for row in rows {
        let keep_existing = by_id.get(&row.job_id).map_or(false, |existing| {
            existing.state > row.state || (existing.state == row.state && row.node.is_none())
        });
        if !keep_existing {
            by_id.insert(row.job_id.clone(), row);
        }
    }

    let mut merged: Vec<JobRow> = by_id.into_values().collect();
    merged.sort_by(|a, b| a.state.cmp(&b.state).then_with(|| a.job_id.cmp(&b.job_id)));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::PendingJob;
    use tempfile::TempDir;

    fn row(id: &str, state: JobState, node: Option<&str>) -> JobRow {
        JobRow {
            job_id: JobId(id.to_string()),
            state,
            node: node.map(str::to_string),
            started_at: None,
            completed_at: None,
        }
    }

    fn pending(id: &str) -> PendingJob {
        PendingJob {
            job_id: JobId(id.to_string()),
            src_lang: "en".to_string(),
            tgt_lang: "ja".to_string(),
        }
    }

    #[test]
    fn test_orders_by_state_regardless_of_input_order() {
        let merged = merge_rows(vec![
            row("c", JobState::Completed, Some("n1")),
            row("q", JobState::Queued, None),
            row("r", JobState::Running, Some("n2")),
        ]);
        let states: Vec<JobState> = merged.iter().map(|r| r.state).collect();
        assert_eq!(states, vec![JobState::Queued, JobState::Running, JobState::Completed]);
    }

    #[test]
    fn test_most_advanced_state_wins() {
        let merged = merge_rows(vec![
            row("j", JobState::Completed, Some("n1")),
            row("j", JobState::Queued, None),
            row("j", JobState::Running, Some("n1")),
        ]);
        assert_eq!(merged, vec![row("j", JobState::Completed, Some("n1"))]);

        let merged = merge_rows(vec![
            row("k", JobState::Running, None),
            row("k", JobState::Queued, None),
        ]);
        assert_eq!(merged, vec![row("k", JobState::Running, None)]);
    }

    #[test]
    fn test_row_with_node_wins_within_a_state() {
        let merged = merge_rows(vec![
            row("j", JobState::Running, Some("n3")),
            row("j", JobState::Running, None),
        ]);
        assert_eq!(merged[0].node.as_deref(), Some("n3"));
    }

    #[test]
    fn test_claimed_job_without_running_marker_is_not_running() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("queue/e1_en_zh.txt"), " \n").unwrap();

        let job = PendingJob::parse_key("e1_en_zh.txt").unwrap();
        assert!(store.claim(&job).unwrap());

        let rows = aggregate(&store, chrono_tz::UTC).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].job_id.as_str(), "e1");
        assert_eq!(rows[0].state, JobState::Queued);
        assert_eq!(rows[0].node, None);

        store.mark_running(&job.job_id, "computingNode1").unwrap();
        let rows = aggregate(&store, chrono_tz::UTC).unwrap();
        assert_eq!(rows[0].state, JobState::Running);
        assert_eq!(rows[0].node.as_deref(), Some("computingNode1"));
    }

    #[test]
    fn test_aggregate_reads_all_namespaces() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();

        store.put(&JobId("done1".into()), Field::Result, b"ok").unwrap();
        store.put(&JobId("done1".into()), Field::Node, b"computingNode1").unwrap();

        let running = pending("run1");
        store.enqueue(&running, b"x").unwrap();
        store.claim(&running).unwrap();
        store.mark_running(&running.job_id, "computingNode2").unwrap();

        store.enqueue(&pending("queued1"), b"x").unwrap();

        let rows = aggregate(&store, chrono_tz::UTC).unwrap();
        let summary: Vec<(&str, JobState, Option<&str>)> = rows
            .iter()
            .map(|r| (r.job_id.as_str(), r.state, r.node.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("queued1", JobState::Queued, None),
                ("run1", JobState::Running, Some("computingNode2")),
                ("done1", JobState::Completed, Some("computingNode1")),
            ]
        );
    }
}
