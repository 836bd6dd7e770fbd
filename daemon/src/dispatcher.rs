use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::{Field, JobId, JobStore, PendingJob};

use crate::translator::{TranslationOutcome, Translator};

/// What one dispatcher invocation did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Idle,
    /// A queue file with an unparseable name was deleted.
    Discarded(String),
    Completed(JobId),
}

/// Claims and runs at most one queued job per call to `run_once`.
///
/// Invocations on one node must not overlap; invocations on different nodes
/// may, and rely on `JobStore::claim` to keep them off the same job.
pub struct Dispatcher<T> {
    store: JobStore,
    node: String,
    translator: T,
    heartbeat_interval: Duration,
    translate_timeout: Option<Duration>,
}

impl<T: Translator> Dispatcher<T> {
    pub fn new(store: JobStore, node: String, translator: T) -> Self {
        Self {
            store,
            node,
            translator,
            heartbeat_interval: Duration::from_secs(30),
            translate_timeout: None,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_translate_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.translate_timeout = timeout;
        self
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub async fn run_once(&self) -> Result<DispatchOutcome> {
        for entry in self.store.scan_queue()? {
            let Some(job) = entry.job else {
                log::warn!("Discarding malformed queue entry {}", entry.file_name);
                self.store.discard(&entry.file_name)?;
                return Ok(DispatchOutcome::Discarded(entry.file_name));
            };

            if !self.store.claim(&job)? {
                log::debug!("Job {} was claimed by another node", job.job_id);
                continue;
            }

            self.process(&job).await?;
            return Ok(DispatchOutcome::Completed(job.job_id));
        }
        Ok(DispatchOutcome::Idle)
    }

    async fn process(&self, job: &PendingJob) -> Result<()> {
        let id = &job.job_id;
        let payload = self.store.read_claimed_payload(job)?;
        let text = String::from_utf8_lossy(&payload);

        if text.trim().is_empty() {
            log::warn!("Job {} has an empty payload", id);
            let now = Utc::now();
            self.store.put_stamp(id, Field::Start, now)?;
            return self.finish(job, common::EMPTY_INPUT_RESULT, now);
        }

        let src = common::normalize(&job.src_lang);
        let tgt = common::normalize(&job.tgt_lang);

        self.store.mark_running(id, &self.node)?;
        self.store.put_stamp(id, Field::Start, Utc::now())?;
        log::info!("Translating job {} ({} -> {}) on {}", id, src, tgt, self.node);

        let outcome = self.translate_with_lease(id, &text, &src, &tgt).await;
        match &outcome {
            TranslationOutcome::Translated(out) => {
                log::info!("Job {} translated ({} bytes)", id, out.len())
            }
            TranslationOutcome::Diagnostics(_) => {
                log::warn!("Job {} produced only diagnostics", id)
            }
            TranslationOutcome::StartFailed(reason) => {
                log::error!("Job {}: translator did not start: {}", id, reason)
            }
            TranslationOutcome::TimedOut => log::error!("Job {} timed out", id),
        }

        self.finish(job, &outcome.result_text(), Utc::now())
    }

    /// Run the translator while keeping the claim's lease fresh.
    async fn translate_with_lease(
        &self,
        id: &JobId,
        text: &str,
        src: &str,
        tgt: &str,
    ) -> TranslationOutcome {
        let translate = self.translator.translate(text, src, tgt);
        tokio::pin!(translate);

        let deadline = async {
            match self.translate_timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                outcome = &mut translate => return outcome,
                _ = &mut deadline => return TranslationOutcome::TimedOut,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.store.heartbeat(id, &self.node) {
                        log::warn!("Failed to refresh claim on job {}: {}", id, e);
                    }
                }
            }
        }
    }

    /// End stamp and node go in before the write-once result, so anyone who
    /// sees the result also sees a fixed end time. All three are write-once:
    /// a requeued job finished twice keeps whatever landed first.
    fn finish(&self, job: &PendingJob, result: &str, ended_at: DateTime<Utc>) -> Result<()> {
        let id = &job.job_id;
        if self.store.exists(id, Field::Result) {
            log::warn!("Job {} already has a result, keeping it", id);
            self.store.release(job)?;
            return Ok(());
        }

        if !self.store.put_stamp_once(id, Field::End, ended_at)? {
            log::warn!("Job {} end time was written concurrently, keeping the first", id);
        }
        self.store.put_once(id, Field::Node, self.node.as_bytes())?;
        if !self.store.put_once(id, Field::Result, result.as_bytes())? {
            log::warn!("Job {} result was written concurrently, keeping the first", id);
        }
        self.store.release(job)?;
        Ok(())
    }
}
