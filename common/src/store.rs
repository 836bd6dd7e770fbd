//! File-backed job records on the shared directory.
//!
//! Layout under the store root:
//!
//! ```text
//! queue/{jobId}_{src}_{tgt}.txt     pending payloads
//! inflight/{jobId}_{src}_{tgt}.txt  payloads owned by a worker
//! running/{jobId}.txt               claim marker, holds the node name
//! done/{jobId}_{field}.txt          start / end / node / result records
//! ```
//!
//! Every value is written to a dot-prefixed temporary file in the target
//! directory and renamed into place, so a reader on any node sees either the
//! old value or the new one. Ownership of a pending job moves by renaming its
//! queue file into `inflight/`; only one rename of a given file can succeed.

use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::Result;
use crate::job::{JobId, PendingJob};
use crate::time;

const RECORD_EXT: &str = ".txt";
const FILE_MODE: u32 = 0o644;

/// Per-job record kept in `done/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Start,
    End,
    Node,
    Result,
}

impl Field {
    fn suffix(&self) -> &'static str {
        match self {
            Field::Start => "start",
            Field::End => "end",
            Field::Node => "node",
            Field::Result => "result",
        }
    }
}

/// A `.txt` file found in `queue/`. `job` is `None` when the name does not
/// parse as a job key.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub file_name: String,
    pub job: Option<PendingJob>,
}

#[derive(Debug, Clone)]
pub struct Claim {
    pub job_id: JobId,
    pub node: String,
    /// Last time the owning worker wrote the claim.
    pub heartbeat: SystemTime,
}

#[derive(Debug, Clone)]
pub struct InflightEntry {
    pub job: PendingJob,
    pub touched: SystemTime,
}

#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
    queue: PathBuf,
    inflight: PathBuf,
    running: PathBuf,
    done: PathBuf,
}

impl JobStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let store = Self {
            queue: root.join("queue"),
            inflight: root.join("inflight"),
            running: root.join("running"),
            done: root.join("done"),
            root,
        };
        for dir in [&store.queue, &store.inflight, &store.running, &store.done] {
            fs::create_dir_all(dir)?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ---- done/ records ----

    pub fn put(&self, job_id: &JobId, field: Field, bytes: &[u8]) -> Result<()> {
        write_atomic(&self.done, &field_name(job_id, field), bytes)
    }

    /// Write a record only if it does not exist yet. Returns `false` when an
    /// earlier value was kept.
    pub fn put_once(&self, job_id: &JobId, field: Field, bytes: &[u8]) -> Result<bool> {
        write_once(&self.done, &field_name(job_id, field), bytes)
    }

    pub fn get(&self, job_id: &JobId, field: Field) -> Result<Option<Vec<u8>>> {
        read_optional(&self.done.join(field_name(job_id, field)))
    }

    pub fn get_string(&self, job_id: &JobId, field: Field) -> Result<Option<String>> {
        Ok(self
            .get(job_id, field)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub fn get_stamp(&self, job_id: &JobId, field: Field, tz: Tz) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .get_string(job_id, field)?
            .and_then(|raw| time::parse_stamp(&raw, tz)))
    }

    pub fn put_stamp(&self, job_id: &JobId, field: Field, at: DateTime<Utc>) -> Result<()> {
        self.put(job_id, field, time::format_stamp(at).as_bytes())
    }

    pub fn put_stamp_once(&self, job_id: &JobId, field: Field, at: DateTime<Utc>) -> Result<bool> {
        self.put_once(job_id, field, time::format_stamp(at).as_bytes())
    }

    pub fn exists(&self, job_id: &JobId, field: Field) -> bool {
        self.done.join(field_name(job_id, field)).is_file()
    }

    pub fn remove(&self, job_id: &JobId, field: Field) -> Result<()> {
        remove_optional(&self.done.join(field_name(job_id, field)))
    }

    /// Ids that have a result record.
    pub fn list_completed(&self) -> Result<Vec<JobId>> {
        let suffix = format!("_{}{}", Field::Result.suffix(), RECORD_EXT);
        let mut ids: Vec<JobId> = record_names(&self.done)?
            .into_iter()
            .filter_map(|name| name.strip_suffix(&suffix).map(|id| JobId(id.to_string())))
            .collect();
        ids.sort();
        Ok(ids)
    }

    // ---- queue/ ----

    pub fn enqueue(&self, job: &PendingJob, payload: &[u8]) -> Result<()> {
        write_atomic(&self.queue, &job.file_name(), payload)
    }

    /// Every queue file, malformed names included, sorted by name.
    pub fn scan_queue(&self) -> Result<Vec<QueueEntry>> {
        let mut names = record_names(&self.queue)?;
        names.sort();
        Ok(names
            .into_iter()
            .map(|file_name| {
                let job = PendingJob::parse_key(&file_name).ok();
                QueueEntry { file_name, job }
            })
            .collect())
    }

    pub fn list_pending(&self) -> Result<Vec<PendingJob>> {
        Ok(self
            .scan_queue()?
            .into_iter()
            .filter_map(|entry| entry.job)
            .collect())
    }

    /// Drop a queue file without producing any record for it.
    pub fn discard(&self, file_name: &str) -> Result<()> {
        remove_optional(&self.queue.join(file_name))
    }

    /// Operator delete of a job that has not been claimed yet.
    pub fn delete_queued(&self, job_id: &JobId) -> Result<bool> {
        let mut removed = false;
        for entry in self.scan_queue()? {
            if entry.job.as_ref().map(|j| &j.job_id) == Some(job_id) {
                match fs::remove_file(self.queue.join(&entry.file_name)) {
                    Ok(()) => removed = true,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(removed)
    }

    // ---- ownership transfer ----

    /// Move a pending job into `inflight/`. `false` means another worker got
    /// there first (or the job was deleted); nothing was changed.
    pub fn claim(&self, job: &PendingJob) -> Result<bool> {
        let name = job.file_name();
        let target = self.inflight.join(&name);
        match fs::rename(self.queue.join(&name), &target) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        // rename keeps the submit-time mtime; the lease starts now
        let touched = fs::OpenOptions::new()
            .write(true)
            .open(&target)
            .and_then(|f| f.set_modified(SystemTime::now()));
        if let Err(e) = touched {
            log::warn!("Could not refresh mtime of {}: {}", target.display(), e);
        }
        Ok(true)
    }

    pub fn read_claimed_payload(&self, job: &PendingJob) -> Result<Vec<u8>> {
        Ok(fs::read(self.inflight.join(job.file_name()))?)
    }

    pub fn mark_running(&self, job_id: &JobId, node: &str) -> Result<()> {
        write_atomic(&self.running, &claim_name(job_id), node.as_bytes())
    }

    /// Refresh the claim's lease.
    pub fn heartbeat(&self, job_id: &JobId, node: &str) -> Result<()> {
        self.mark_running(job_id, node)
    }

    pub fn remove_claim(&self, job_id: &JobId) -> Result<()> {
        remove_optional(&self.running.join(claim_name(job_id)))
    }

    /// Drop the inflight payload and the claim marker of a finished job.
    pub fn release(&self, job: &PendingJob) -> Result<()> {
        remove_optional(&self.inflight.join(job.file_name()))?;
        self.remove_claim(&job.job_id)
    }

    /// Hand an abandoned job back to the queue.
    pub fn requeue(&self, job: &PendingJob) -> Result<bool> {
        let name = job.file_name();
        match fs::rename(self.inflight.join(&name), self.queue.join(&name)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        self.remove_claim(&job.job_id)?;
        Ok(true)
    }

    pub fn list_claimed(&self) -> Result<Vec<Claim>> {
        let mut claims = Vec::new();
        for name in record_names(&self.running)? {
            let Some(stem) = name.strip_suffix(RECORD_EXT) else {
                continue;
            };
            let path = self.running.join(&name);
            // the worker may release the claim between listing and reading
            let read = fs::read(&path).and_then(|bytes| Ok((bytes, fs::metadata(&path)?.modified()?)));
            let (node, heartbeat) = match read {
                Ok((bytes, modified)) => (String::from_utf8_lossy(&bytes).trim().to_string(), modified),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            claims.push(Claim {
                job_id: JobId(stem.to_string()),
                node,
                heartbeat,
            });
        }
        claims.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(claims)
    }

    pub fn list_inflight(&self) -> Result<Vec<InflightEntry>> {
        let mut entries = Vec::new();
        let mut names = record_names(&self.inflight)?;
        names.sort();
        for name in names {
            let job = match PendingJob::parse_key(&name) {
                Ok(job) => job,
                Err(e) => {
                    log::warn!("Ignoring inflight file: {}", e);
                    continue;
                }
            };
            let touched = match fs::metadata(self.inflight.join(&name)) {
                Ok(meta) => meta.modified()?,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            entries.push(InflightEntry { job, touched });
        }
        Ok(entries)
    }
}

fn field_name(job_id: &JobId, field: Field) -> String {
    format!("{}_{}{}", job_id, field.suffix(), RECORD_EXT)
}

fn claim_name(job_id: &JobId) -> String {
    format!("{}{}", job_id, RECORD_EXT)
}

/// Visible `.txt` names in a directory. Temporary files are dot-prefixed.
fn record_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') || !name.ends_with(RECORD_EXT) {
            continue;
        }
        names.push(name);
    }
    Ok(names)
}

fn staged(dir: &Path, bytes: &[u8]) -> Result<tempfile::NamedTempFile> {
    let mut tmp = tempfile::Builder::new().prefix(".tmp-").tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(FILE_MODE))?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    staged(dir, bytes)?.persist(dir.join(name))?;
    Ok(())
}

fn write_once(dir: &Path, name: &str, bytes: &[u8]) -> Result<bool> {
    match staged(dir, bytes)?.persist_noclobber(dir.join(name)) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_optional(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pending(id: &str) -> PendingJob {
        PendingJob {
            job_id: JobId(id.to_string()),
            src_lang: "en".to_string(),
            tgt_lang: "zh".to_string(),
        }
    }

    #[test]
    fn test_put_get_remove() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        let id = JobId("j1".to_string());

        assert_eq!(store.get(&id, Field::Node).unwrap(), None);
        assert!(!store.exists(&id, Field::Node));

        store.put(&id, Field::Node, b"node-a").unwrap();
        store.put(&id, Field::Node, b"node-b").unwrap();
        assert_eq!(store.get_string(&id, Field::Node).unwrap().as_deref(), Some("node-b"));
        assert!(dir.path().join("done/j1_node.txt").is_file());

        store.remove(&id, Field::Node).unwrap();
        store.remove(&id, Field::Node).unwrap();
        assert!(!store.exists(&id, Field::Node));
    }

    #[test]
    fn test_put_once_keeps_first_value() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        let id = JobId("j1".to_string());

        assert!(store.put_once(&id, Field::Result, b"first").unwrap());
        assert!(!store.put_once(&id, Field::Result, b"second").unwrap());
        assert_eq!(store.get(&id, Field::Result).unwrap().unwrap(), b"first");
    }

    #[test]
    fn test_no_temporary_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        let id = JobId("j1".to_string());
        store.put(&id, Field::Start, b"x").unwrap();
        store.put_once(&id, Field::Result, b"x").unwrap();
        store.put_once(&id, Field::Result, b"y").unwrap();

        let names: Vec<String> = fs::read_dir(dir.path().join("done"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert!(names.iter().all(|n| !n.starts_with('.')), "{:?}", names);
    }

    #[test]
    fn test_scan_queue_reports_malformed_and_skips_other_files() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        store.enqueue(&pending("b"), b"hello").unwrap();
        store.enqueue(&pending("a"), b"hello").unwrap();
        fs::write(dir.path().join("queue/broken.txt"), b"x").unwrap();
        fs::write(dir.path().join("queue/notes.md"), b"x").unwrap();
        fs::write(dir.path().join("queue/.tmp-half"), b"x").unwrap();

        let entries = store.scan_queue().unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["a_en_zh.txt", "b_en_zh.txt", "broken.txt"]);
        assert!(entries[2].job.is_none());

        let pending_ids: Vec<String> = store
            .list_pending()
            .unwrap()
            .into_iter()
            .map(|j| j.job_id.0)
            .collect();
        assert_eq!(pending_ids, vec!["a", "b"]);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        let other = JobStore::open(dir.path()).unwrap();
        let job = pending("j1");
        store.enqueue(&job, b"hello").unwrap();

        assert!(store.claim(&job).unwrap());
        assert!(!other.claim(&job).unwrap());
        assert!(store.list_pending().unwrap().is_empty());
        assert_eq!(store.read_claimed_payload(&job).unwrap(), b"hello");
    }

    #[test]
    fn test_claim_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        let job = pending("j1");
        store.enqueue(&job, b"hello").unwrap();
        store.claim(&job).unwrap();
        store.mark_running(&job.job_id, "node-1").unwrap();

        let claims = store.list_claimed().unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].job_id, job.job_id);
        assert_eq!(claims[0].node, "node-1");
        assert_eq!(store.list_inflight().unwrap().len(), 1);

        store.release(&job).unwrap();
        assert!(store.list_claimed().unwrap().is_empty());
        assert!(store.list_inflight().unwrap().is_empty());
    }

    #[test]
    fn test_requeue_returns_job_to_queue() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        let job = pending("j1");
        store.enqueue(&job, b"hello").unwrap();
        store.claim(&job).unwrap();
        store.mark_running(&job.job_id, "node-1").unwrap();

        assert!(store.requeue(&job).unwrap());
        assert_eq!(store.list_pending().unwrap(), vec![job.clone()]);
        assert!(store.list_claimed().unwrap().is_empty());
        assert!(!store.requeue(&job).unwrap());
    }

    #[test]
    fn test_delete_queued() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        let job = pending("j1");
        store.enqueue(&job, b"hello").unwrap();
        store.enqueue(&pending("j2"), b"hello").unwrap();

        assert!(store.delete_queued(&job.job_id).unwrap());
        assert!(!store.delete_queued(&job.job_id).unwrap());
        assert_eq!(store.list_pending().unwrap().len(), 1);
    }

    #[test]
    fn test_list_completed() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        store.put(&JobId("j2".into()), Field::Result, b"ok").unwrap();
        store.put(&JobId("j1".into()), Field::Result, b"ok").unwrap();
        store.put(&JobId("j3".into()), Field::Start, b"x").unwrap();

        let ids: Vec<String> = store.list_completed().unwrap().into_iter().map(|j| j.0).collect();
        assert_eq!(ids, vec!["j1", "j2"]);
    }
}
