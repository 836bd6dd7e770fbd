use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::Result;
use crate::job::JobId;
use crate::store::{Field, JobStore};
use crate::TRANSLATE_ERROR_PREFIX;

/// What a poller sees for one job. `completion` stays `None` until the
/// result record exists.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobView {
    pub job_id: JobId,
    pub started_at: Option<DateTime<Utc>>,
    pub completion: Option<Completion>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Completion {
    pub result: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub node: Option<String>,
}

impl JobView {
    pub fn is_complete(&self) -> bool {
        self.completion.is_some()
    }
}

impl Completion {
    /// Failures share the result record with translations; only the text
    /// tells them apart.
    pub fn is_error(&self) -> bool {
        self.result.starts_with("[Error]") || self.result.starts_with(TRANSLATE_ERROR_PREFIX)
    }
}

/// Read-only snapshot of a job's records.
pub fn view_job(store: &JobStore, job_id: &JobId, tz: Tz) -> Result<JobView> {
    let started_at = store.get_stamp(job_id, Field::Start, tz)?;
    let completion = match store.get_string(job_id, Field::Result)? {
        Some(result) => Some(Completion {
            result,
            completed_at: store.get_stamp(job_id, Field::End, tz)?,
            node: store
                .get_string(job_id, Field::Node)?
                .map(|n| n.trim().to_string()),
        }),
        None => None,
    };

    Ok(JobView {
        job_id: job_id.clone(),
        started_at,
        completion,
    })
}
