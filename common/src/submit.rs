use chrono::Utc;

use crate::error::{QueueError, Result};
use crate::job::{is_valid_lang, JobId, PendingJob};
use crate::lang::normalize;
use crate::store::{Field, JobStore};

/// Queue a translation of `payload` and return the id to poll.
pub fn submit(store: &JobStore, payload: &str, src_lang: &str, tgt_lang: &str) -> Result<JobId> {
    if payload.trim().is_empty() {
        return Err(QueueError::EmptyPayload);
    }
    let src_lang = queue_lang(src_lang)?;
    let tgt_lang = queue_lang(tgt_lang)?;

    let job = PendingJob {
        job_id: JobId::generate(),
        src_lang,
        tgt_lang,
    };

    // Placeholder goes first so a worker's real start stamp always lands after it.
    store.put_stamp(&job.job_id, Field::Start, Utc::now())?;
    store.enqueue(&job, payload.as_bytes())?;

    log::info!(
        "Queued job {} ({} -> {}, {} bytes)",
        job.job_id,
        job.src_lang,
        job.tgt_lang,
        payload.len()
    );
    Ok(job.job_id)
}

/// Underscores separate the fields of a queue key, so aliases such as
/// `zh_TW` are resolved before the code goes into one.
fn queue_lang(code: &str) -> Result<String> {
    let lang = if code.contains('_') {
        normalize(code)
    } else {
        code.to_string()
    };
    if !is_valid_lang(&lang) {
        return Err(QueueError::InvalidLanguage(code.to_string()));
    }
    Ok(lang)
}
