//! Runs jobs through the pipeline stages.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{Assembler, output_path};
use crate::backend::{BackendKind, SpeechBackend};
use crate::cache::{Fingerprint, Namespace, PipelineCache};
use crate::config::PipelineConfig;
use crate::content::{Document, Segment, normalize, segment, segment_sentences};
use crate::engine::TtsOrchestrator;
use crate::error::PipelineError;
use crate::script::{Script, ScriptGenerator, ScriptSynthesizer, Style};
use crate::voice::VoiceBinding;

use super::store::JobStore;
use super::types::{Job, JobError, JobProgress, JobRequest, JobState};

/// Drives jobs from submission to a finished artifact.
///
/// The cache is the only state shared between jobs. Everything a job
/// produces is recorded on its [`Job`] record so a failed or cancelled
/// job can be resumed from its first unfinished stage.
pub struct Coordinator {
    config: PipelineConfig,
    cache: Arc<PipelineCache>,
    store: JobStore,
    backends: HashMap<BackendKind, Arc<dyn SpeechBackend>>,
    synthesizer: ScriptSynthesizer,
    assembler: Assembler,
    workers: Arc<Semaphore>,
    running: Mutex<HashMap<String, CancellationToken>>,
    progress: Mutex<HashMap<String, watch::Sender<JobProgress>>>,
}

impl Coordinator {
    /// Open the cache and job store under the configured data directory.
    pub fn new(config: PipelineConfig, generator: Arc<dyn ScriptGenerator>) -> Result<Self, JobError> {
        let cache = Arc::new(PipelineCache::open(config.cache_dir(), &config.cache)?);
        let store = JobStore::with_dir(config.jobs_dir());
        Ok(Self {
            synthesizer: ScriptSynthesizer::new(generator, config.script.clone()),
            assembler: Assembler::new(config.audio.clone()),
            workers: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            backends: HashMap::new(),
            running: Mutex::new(HashMap::new()),
            progress: Mutex::new(HashMap::new()),
            config,
            cache,
            store,
        })
    }

    /// Register a speech backend under its own kind.
    pub fn with_backend(mut self, backend: Arc<dyn SpeechBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    pub fn cache(&self) -> &Arc<PipelineCache> {
        &self.cache
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn backend(&self, kind: BackendKind) -> Result<Arc<dyn SpeechBackend>, JobError> {
        self.backends
            .get(&kind)
            .cloned()
            .ok_or(JobError::BackendNotConfigured(kind))
    }

    /// Record a new job. Backends and voices are checked up front so a
    /// misconfigured request never starts.
    pub fn submit(&self, request: JobRequest) -> Result<Job, JobError> {
        self.backend(request.backend)?;
        self.config
            .voices
            .resolve(request.backend, &request.voices, request.style)?;
        if let Some(fallback) = request.fallback {
            self.backend(fallback)?;
            self.config.voices.resolve(fallback, &VoiceBinding::new(), request.style)?;
        }

        let job = Job::new(request);
        self.store.save(&job)?;
        info!(job = %job.id, style = job.style().as_str(), backend = %job.request.backend, "job submitted");
        Ok(job)
    }

    pub fn status(&self, id: &str) -> Result<Job, JobError> {
        self.store.load(id)
    }

    /// Persisted jobs, newest first.
    pub fn jobs(&self) -> Result<Vec<Job>, JobError> {
        self.store.list()
    }

    /// Ask a job to stop. Seen by this process immediately and by another
    /// process running the job at its next poll.
    pub fn cancel(&self, id: &str) -> Result<Job, JobError> {
        self.store.request_cancel(id)?;
        if let Some(token) = self.running.lock().get(id) {
            token.cancel();
        }
        info!(job = id, "cancellation requested");
        self.store.load(id)
    }

    /// Live progress for `id`. Can be called before the job starts.
    pub fn subscribe(&self, id: &str) -> watch::Receiver<JobProgress> {
        self.progress_sender(id, JobState::Submitted).subscribe()
    }

    fn progress_sender(&self, id: &str, state: JobState) -> watch::Sender<JobProgress> {
        self.progress
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(JobProgress::new(state)).0)
            .clone()
    }

    /// Re-run a failed job from its first unfinished stage.
    pub async fn resume(&self, id: &str) -> Result<Job, JobError> {
        let mut job = self.store.load(id)?;
        if job.state != JobState::Failed {
            return Err(JobError::NotResumable {
                id: id.to_string(),
                state: job.state,
            });
        }

        info!(job = id, stage = ?job.failure.as_ref().map(|f| f.stage), "resuming job");
        self.store.clear_cancel(id)?;
        job.cancel_requested = false;
        job.failure = None;
        job.transition(JobState::Submitted);
        self.store.save(&job)?;
        self.run(id).await
    }

    /// Run a submitted job to completion or failure and return its final
    /// record. Any failure once the job has started is recorded on the job,
    /// not returned; only a failure to persist that record is.
    pub async fn run(&self, id: &str) -> Result<Job, JobError> {
        let mut job = self.store.load(id)?;
        if job.state.is_terminal() {
            return Err(JobError::NotResumable {
                id: id.to_string(),
                state: job.state,
            });
        }

        let cancel = {
            let mut running = self.running.lock();
            if running.contains_key(id) {
                return Err(JobError::AlreadyRunning(id.to_string()));
            }
            let token = CancellationToken::new();
            running.insert(id.to_string(), token.clone());
            token
        };

        let progress = self.progress_sender(id, job.state);
        let poller = self.watch_cancel_marker(id, &cancel);

        let result = match self.workers.clone().acquire_owned().await {
            Ok(_permit) => {
                job.runs += 1;
                self.drive(&mut job, &cancel, &progress).await
            }
            Err(_) => Err(JobError::Pipeline(PipelineError::Cancelled)),
        };

        poller.abort();
        self.running.lock().remove(id);
        self.cache.release(id);

        match result {
            Ok(()) => info!(job = id, "job completed"),
            Err(error) => {
                warn!(job = id, stage = %job.state, kind = %error.kind(), %error, "job failed");
                job.fail(&error);
                if let Err(e) = self.store.save(&job) {
                    self.progress.lock().remove(id);
                    return Err(e);
                }
            }
        }

        progress.send_modify(|p| p.state = job.state);
        self.progress.lock().remove(id);
        Ok(job)
    }

    /// Cancel `token` once a cancel marker for `id` shows up in the store.
    fn watch_cancel_marker(&self, id: &str, token: &CancellationToken) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let token = token.clone();
        let id = id.to_string();
        let period = Duration::from_millis(self.config.cancel_poll_ms.max(10));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if store.is_cancel_requested(&id) {
                            debug!(job = %id, "cancel marker found");
                            token.cancel();
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Move to `state`, persisting the job. Cancellation is observed here,
    /// at every stage boundary.
    fn enter(
        &self,
        job: &mut Job,
        state: JobState,
        cancel: &CancellationToken,
        progress: &watch::Sender<JobProgress>,
    ) -> Result<(), JobError> {
        if cancel.is_cancelled() || self.store.is_cancel_requested(&job.id) {
            return Err(PipelineError::Cancelled.into());
        }
        debug!(job = %job.id, from = %job.state, to = %state, "stage transition");
        job.transition(state);
        self.store.save(job)?;
        progress.send_modify(|p| p.state = state);
        Ok(())
    }

    async fn drive(
        &self,
        job: &mut Job,
        cancel: &CancellationToken,
        progress: &watch::Sender<JobProgress>,
    ) -> Result<(), JobError> {
        self.enter(job, JobState::Normalizing, cancel, progress)?;
        let document = self.document(job)?;

        self.enter(job, JobState::Segmenting, cancel, progress)?;
        let segments = match job.style() {
            Style::Narration => segment_sentences(&document),
            Style::Dialogue => segment(&document, self.config.content.max_segment_chars),
        };
        job.results.segments = Some(segments.len());

        self.enter(job, JobState::SynthesizingScript, cancel, progress)?;
        let script = self.script(job, &document, &segments).await?;

        self.enter(job, JobState::SynthesizingAudio, cancel, progress)?;
        self.audio(job, &script, cancel, progress).await?;

        self.enter(job, JobState::Assembling, cancel, progress)?;
        self.assemble(job, &document, &script)?;

        job.transition(JobState::Completed);
        self.store.save(job)?;
        Ok(())
    }

    fn document(&self, job: &mut Job) -> Result<Document, JobError> {
        if let Some(key) = &job.results.document_key
            && let Some(document) = self
                .cache
                .get::<Document>(Namespace::Documents, key)
                .map_err(PipelineError::from)?
        {
            debug!(job = %job.id, document = %document.id, "document from cache");
            return Ok(document);
        }

        let document = normalize(&job.request.input, &self.config.content).map_err(PipelineError::from)?;
        let key = Fingerprint::document(&document.source_hash, document.origin.as_deref());
        let document = self
            .cache
            .insert_if_absent(Namespace::Documents, &key, document)
            .map_err(PipelineError::from)?;

        info!(
            job = %job.id,
            document = %document.id,
            title = %document.title,
            minutes = document.reading_minutes,
            "document normalized"
        );
        job.results.document_key = Some(key);
        job.results.document_id = Some(document.id.clone());
        job.results.title = Some(document.title.clone());
        Ok(document)
    }

    async fn script(&self, job: &mut Job, document: &Document, segments: &[Segment]) -> Result<Script, JobError> {
        let style = job.request.style;
        let key = self.synthesizer.fingerprint(document, style);

        let (script, hit) = self
            .cache
            .get_or_compute(Namespace::Scripts, &key, || async {
                self.synthesizer
                    .synthesize(document, segments, style)
                    .await
                    .map_err(PipelineError::from)
            })
            .await?;

        info!(job = %job.id, script = %script.id, turns = script.turns.len(), cached = hit, "script ready");
        job.results.script_key = Some(key);
        job.results.script_id = Some(script.id.clone());
        job.results.turns_total = script.turns.len();
        Ok(script)
    }

    async fn audio(
        &self,
        job: &mut Job,
        script: &Script,
        cancel: &CancellationToken,
        progress: &watch::Sender<JobProgress>,
    ) -> Result<(), JobError> {
        let request = &job.request;
        let voices = self
            .config
            .voices
            .resolve(request.backend, &request.voices, request.style)
            .map_err(PipelineError::from)?;
        let mut orchestrator = TtsOrchestrator::new(
            self.backend(request.backend)?,
            voices,
            self.cache.clone(),
            &self.config.tts,
        )
        .pinned_for(&job.id);
        if let Some(kind) = request.fallback {
            let voices = self
                .config
                .voices
                .resolve(kind, &VoiceBinding::new(), request.style)
                .map_err(PipelineError::from)?;
            orchestrator = orchestrator.with_fallback(self.backend(kind)?, voices);
        }

        // Clips from an earlier run stay valid while they belong to this
        // script and their audio is still on disk.
        for clip in job.results.clips.values() {
            self.cache.pin(&job.id, Namespace::Clips, &clip.fingerprint);
        }
        job.results
            .clips
            .retain(|_, clip| clip.script_id == script.id && clip.audio_path.exists());
        let pending: Vec<usize> = script
            .turns
            .iter()
            .map(|t| t.index)
            .filter(|i| !job.results.clips.contains_key(i))
            .collect();

        let done_before = script.turns.len() - pending.len();
        progress.send_modify(|p| {
            p.turns_total = script.turns.len();
            p.turns_done = done_before;
        });
        if done_before > 0 {
            info!(job = %job.id, reused = done_before, pending = pending.len(), "resuming audio stage");
        }

        let report = orchestrator
            .synthesize(script, &pending, cancel, |done| {
                progress.send_modify(|p| p.turns_done = done_before + done);
            })
            .await;

        job.results.clips.extend(report.clips);
        job.results.turn_failures = report.failures;
        self.store.save(job)?;

        if !report.cancelled.is_empty() || cancel.is_cancelled() {
            return Err(PipelineError::Cancelled.into());
        }
        if let Some((_, first)) = job.results.turn_failures.iter().next() {
            let kind = first.kind;
            let failed: Vec<usize> = job.results.turn_failures.keys().copied().collect();
            return Err(PipelineError::TurnsFailed(failed, kind).into());
        }
        Ok(())
    }

    fn assemble(&self, job: &mut Job, document: &Document, script: &Script) -> Result<(), JobError> {
        let dir: PathBuf = job
            .request
            .output_dir
            .clone()
            .unwrap_or_else(|| self.config.output_dir.clone());
        let output = output_path(&dir, &document.title, Local::now());

        let artifact = self
            .assembler
            .assemble(&job.id, script, &job.results.clips, &output)
            .map_err(PipelineError::from)?;
        job.results.artifact = Some(artifact);
        Ok(())
    }
}
