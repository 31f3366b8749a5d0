//! Job records on disk.

use std::path::{Path, PathBuf};

use super::types::{Job, JobError};

/// Persists one JSON file per job, plus a marker file for pending
/// cancellation requests so a running process never overwrites them.
#[derive(Debug, Clone)]
pub struct JobStore {
    jobs_dir: PathBuf,
}

impl JobStore {
    /// Create a store rooted at `jobs_dir`.
    pub fn with_dir(jobs_dir: impl Into<PathBuf>) -> Self {
        Self {
            jobs_dir: jobs_dir.into(),
        }
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    /// Validate a job id.
    fn validate_id(id: &str) -> Result<(), JobError> {
        if id.is_empty() {
            return Err(JobError::InvalidId("Job id cannot be empty".to_string()));
        }

        // Prevent path traversal
        if id.contains('/') || id.contains('\\') || id.contains("..") {
            return Err(JobError::InvalidId(
                "Job id cannot contain path separators".to_string(),
            ));
        }

        Ok(())
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.jobs_dir.join(format!("{id}.json"))
    }

    fn cancel_path(&self, id: &str) -> PathBuf {
        self.jobs_dir.join(format!("{id}.cancel"))
    }

    /// Save a job record, replacing the previous version.
    pub fn save(&self, job: &Job) -> Result<(), JobError> {
        Self::validate_id(&job.id)?;

        // Ensure directory exists
        std::fs::create_dir_all(&self.jobs_dir)?;

        let path = self.record_path(&job.id);
        let tmp = self.jobs_dir.join(format!(".{}.{}.tmp", job.id, uuid::Uuid::new_v4()));
        std::fs::write(&tmp, serde_json::to_string_pretty(job)?)?;
        std::fs::rename(&tmp, path)?;

        Ok(())
    }

    /// Load a job record.
    pub fn load(&self, id: &str) -> Result<Job, JobError> {
        Self::validate_id(id)?;

        let path = self.record_path(id);

        if !path.exists() {
            return Err(JobError::NotFound(id.to_string()));
        }

        let json = std::fs::read_to_string(path)?;
        let mut job: Job = serde_json::from_str(&json)?;
        job.cancel_requested = self.cancel_path(id).exists();

        Ok(job)
    }

    /// All job records, newest first.
    pub fn list(&self) -> Result<Vec<Job>, JobError> {
        if !self.jobs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut jobs = Vec::new();

        for entry in std::fs::read_dir(&self.jobs_dir)? {
            let entry = entry?;
            let path = entry.path();

            let is_record = path.extension().is_some_and(|ext| ext == "json")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
            if is_record {
                let json = std::fs::read_to_string(&path)?;
                if let Ok(mut job) = serde_json::from_str::<Job>(&json) {
                    job.cancel_requested = self.cancel_path(&job.id).exists();
                    jobs.push(job);
                }
            }
        }

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    /// Persist a cancellation request for `id`.
    pub fn request_cancel(&self, id: &str) -> Result<(), JobError> {
        Self::validate_id(id)?;

        if !self.record_path(id).exists() {
            return Err(JobError::NotFound(id.to_string()));
        }
        std::fs::write(self.cancel_path(id), b"")?;

        Ok(())
    }

    pub fn is_cancel_requested(&self, id: &str) -> bool {
        Self::validate_id(id).is_ok() && self.cancel_path(id).exists()
    }

    /// Drop a pending cancellation request, if any.
    pub fn clear_cancel(&self, id: &str) -> Result<(), JobError> {
        Self::validate_id(id)?;

        match std::fs::remove_file(self.cancel_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
