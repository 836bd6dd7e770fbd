use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QueueError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub String);

impl JobId {
    /// Fresh id: UTC millisecond timestamp plus 8 random hex digits.
    ///
    /// The timestamp prefix keeps ids in submission order when sorted; the
    /// random suffix keeps two submissions in the same millisecond apart.
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        JobId(format!(
            "{}-{}",
            Utc::now().format("%Y%m%d%H%M%S%3f"),
            &suffix[..8]
        ))
    }

    pub fn parse(s: &str) -> Result<Self> {
        if is_valid_id(s) {
            Ok(JobId(s.to_string()))
        } else {
            Err(QueueError::InvalidJobId(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Ids become file names and the first segment of queue keys.
fn is_valid_id(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('.')
        && !s.chars().any(|c| c == '_' || c == '/' || c.is_whitespace())
}

pub(crate) fn is_valid_lang(s: &str) -> bool {
    !s.is_empty() && !s.chars().any(|c| c == '_' || c == '/' || c.is_whitespace())
}

/// A queued job as named by its queue entry: `{jobId}_{src}_{tgt}.txt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJob {
    pub job_id: JobId,
    pub src_lang: String,
    pub tgt_lang: String,
}

impl PendingJob {
    pub fn key(&self) -> String {
        format!("{}_{}_{}", self.job_id, self.src_lang, self.tgt_lang)
    }

    pub fn file_name(&self) -> String {
        format!("{}.txt", self.key())
    }

    /// Parse a queue file name. Anything other than three non-empty
    /// underscore-separated segments before `.txt` is malformed.
    pub fn parse_key(file_name: &str) -> Result<Self> {
        let malformed = || QueueError::MalformedJobKey(file_name.to_string());

        let stem = file_name.strip_suffix(".txt").ok_or_else(malformed)?;
        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(malformed());
        }

        let job_id = JobId::parse(parts[0]).map_err(|_| malformed())?;
        if !is_valid_lang(parts[1]) || !is_valid_lang(parts[2]) {
            return Err(malformed());
        }

        Ok(PendingJob {
            job_id,
            src_lang: parts[1].to_string(),
            tgt_lang: parts[2].to_string(),
        })
    }
}

/// Declaration order is the merge precedence and the listing order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobState {
    Queued,
    Running,
    Completed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Queued => "Queued",
            JobState::Running => "Running",
            JobState::Completed => "Completed",
        };
        f.write_str(s)
    }
}

/// One line of the aggregated job listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRow {
    pub job_id: JobId,
    pub state: JobState,
    pub node: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
