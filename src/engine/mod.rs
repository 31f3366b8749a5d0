//! Speech synthesis orchestration.
//!
//! Turns a script into one audio clip per turn: resolves each turn's voice,
//! reuses cached clips, and drives the backends with bounded concurrency,
//! retries and an optional fallback backend.

mod retry;
mod tts;

pub use retry::{RetryFailure, RetryPolicy, retry};
pub use tts::{AudioClip, ClipRecord, TtsConfig, TtsOrchestrator, TtsReport, TurnError, TurnFailure};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::{self, PcmAudio};
    use crate::backend::{BackendError, BackendKind, MockSpeechBackend, SynthesizedAudio};
    use crate::cache::{CacheConfig, PipelineCache};
    use crate::error::ErrorKind;
    use crate::script::{Script, SpeakerRole, Style, Turn};
    use crate::voice::DefaultVoices;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn tone(ms: u64) -> SynthesizedAudio {
        let audio = PcmAudio {
            samples: vec![0.1; wav::ms_to_samples(ms, 16_000)],
            sample_rate: 16_000,
        };
        SynthesizedAudio {
            bytes: wav::encode(&audio).unwrap(),
            duration_ms: ms,
            sample_rate: 16_000,
        }
    }

    fn script(texts: &[&str]) -> Script {
        Script {
            id: "script-1".to_string(),
            document_id: "doc-1".to_string(),
            style: Style::Narration,
            producer_version: "test".to_string(),
            turns: texts
                .iter()
                .enumerate()
                .map(|(index, text)| Turn {
                    script_id: "script-1".to_string(),
                    index,
                    speaker_role: SpeakerRole::Narrator,
                    text: text.to_string(),
                    continuation: false,
                })
                .collect(),
        }
    }

    fn config() -> TtsConfig {
        TtsConfig {
            concurrency: 2,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
            },
        }
    }

    fn orchestrator(backend: MockSpeechBackend, cache: Arc<PipelineCache>) -> TtsOrchestrator {
        let voices = DefaultVoices::default().local;
        TtsOrchestrator::new(Arc::new(backend), voices, cache, &config())
    }

    fn open_cache(dir: &TempDir) -> Arc<PipelineCache> {
        Arc::new(PipelineCache::open(dir.path(), &CacheConfig::default()).unwrap())
    }

    fn all(script: &Script) -> Vec<usize> {
        (0..script.turns.len()).collect()
    }

    // ===========================================
    // Retry policy
    // ===========================================

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 300,
        };
        let err = BackendError::Timeout("slow".to_string());
        assert_eq!(policy.delay_for(0, &err), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1, &err), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2, &err), Duration::from_millis(300));
        assert_eq!(policy.delay_for(40, &err), Duration::from_millis(300));
    }

    #[test]
    fn test_backoff_honours_retry_after() {
        let policy = RetryPolicy::default();
        let err = BackendError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(policy.delay_for(0, &err), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_retry_stops_on_fatal_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry(&config().retry, &CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BackendError::InvalidVoice("zz".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(RetryFailure::Fatal(BackendError::InvalidVoice(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry(&config().retry, &CancellationToken::new(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BackendError::Unavailable("down".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(RetryFailure::Exhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    // ===========================================
    // Orchestrator
    // ===========================================

    #[tokio::test]
    async fn test_every_turn_gets_a_clip() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockSpeechBackend::new();
        backend.expect_kind().return_const(BackendKind::Local);
        backend.expect_render_settings().return_const(String::new());
        backend
            .expect_synthesize()
            .withf(|req| req.voice_id == "slt")
            .times(2)
            .returning(|req| Ok(tone(100 + req.text.len() as u64)));

        let script = script(&["Paragraph A.", "Paragraph B, longer."]);
        let report = orchestrator(backend, open_cache(&dir))
            .synthesize(&script, &all(&script), &CancellationToken::new(), |_| {})
            .await;

        assert!(report.is_complete());
        assert_eq!(report.clips.len(), 2);
        assert_eq!(report.clips[&0].duration_ms, 112);
        assert_eq!(report.clips[&1].turn_index, 1);
        assert!(report.clips[&1].audio_path.exists());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_until_success() {
        let dir = TempDir::new().unwrap();
        let third_calls = Arc::new(AtomicUsize::new(0));
        let counter = third_calls.clone();

        let mut backend = MockSpeechBackend::new();
        backend.expect_kind().return_const(BackendKind::Local);
        backend.expect_render_settings().return_const(String::new());
        backend.expect_synthesize().returning(move |req| {
            if req.text == "Three." && counter.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(BackendError::RateLimited { retry_after: None });
            }
            Ok(tone(50))
        });

        let script = script(&["One.", "Two.", "Three.", "Four.", "Five."]);
        let report = orchestrator(backend, open_cache(&dir))
            .synthesize(&script, &all(&script), &CancellationToken::new(), |_| {})
            .await;

        assert!(report.is_complete());
        assert_eq!(report.clips.len(), 5);
        assert_eq!(third_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalid_voice_fails_only_that_turn() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockSpeechBackend::new();
        backend.expect_kind().return_const(BackendKind::Local);
        backend.expect_render_settings().return_const(String::new());
        backend
            .expect_synthesize()
            .withf(|req| req.text == "Bad.")
            .times(1)
            .returning(|_| Err(BackendError::InvalidVoice("unknown voice".to_string())));
        backend
            .expect_synthesize()
            .withf(|req| req.text != "Bad.")
            .times(2)
            .returning(|_| Ok(tone(40)));

        let script = script(&["Good.", "Bad.", "Also good."]);
        let report = orchestrator(backend, open_cache(&dir))
            .synthesize(&script, &all(&script), &CancellationToken::new(), |_| {})
            .await;

        assert_eq!(report.clips.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(report.failures[&1].kind, ErrorKind::BackendFatal);
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn test_fallback_backend_takes_over_when_primary_is_exhausted() {
        let dir = TempDir::new().unwrap();
        let mut primary = MockSpeechBackend::new();
        primary.expect_kind().return_const(BackendKind::Local);
        primary.expect_render_settings().return_const(String::new());
        primary
            .expect_synthesize()
            .times(3)
            .returning(|_| Err(BackendError::Unavailable("model loading".to_string())));

        let mut fallback = MockSpeechBackend::new();
        fallback.expect_kind().return_const(BackendKind::Cloud);
        fallback.expect_render_settings().return_const(String::new());
        fallback
            .expect_synthesize()
            .withf(|req| req.voice_id == "alloy")
            .times(1)
            .returning(|_| Ok(tone(80)));

        let defaults = DefaultVoices::default();
        let script = script(&["Only turn."]);
        let report = orchestrator(primary, open_cache(&dir))
            .with_fallback(Arc::new(fallback), defaults.cloud.clone())
            .synthesize(&script, &all(&script), &CancellationToken::new(), |_| {})
            .await;

        assert!(report.is_complete());
        assert_eq!(report.clips[&0].backend, BackendKind::Cloud);
        assert_eq!(report.clips[&0].voice_id, "alloy");
    }

    #[tokio::test]
    async fn test_exhausted_without_fallback_records_transient_failure() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockSpeechBackend::new();
        backend.expect_kind().return_const(BackendKind::Local);
        backend.expect_render_settings().return_const(String::new());
        backend
            .expect_synthesize()
            .times(3)
            .returning(|_| Err(BackendError::Timeout("read timed out".to_string())));

        let script = script(&["Slow turn."]);
        let report = orchestrator(backend, open_cache(&dir))
            .synthesize(&script, &all(&script), &CancellationToken::new(), |_| {})
            .await;

        assert_eq!(report.failures[&0].kind, ErrorKind::BackendTransient);
        assert!(report.failures[&0].message.contains("3 attempts"));
    }

    #[tokio::test]
    async fn test_cached_clips_are_not_synthesized_again() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        let script = script(&["Cached one.", "Cached two."]);

        let mut first = MockSpeechBackend::new();
        first.expect_kind().return_const(BackendKind::Local);
        first.expect_render_settings().return_const(String::new());
        first.expect_synthesize().times(2).returning(|_| Ok(tone(30)));
        let before = orchestrator(first, cache.clone())
            .synthesize(&script, &all(&script), &CancellationToken::new(), |_| {})
            .await;

        let mut second = MockSpeechBackend::new();
        second.expect_kind().return_const(BackendKind::Local);
        second.expect_render_settings().return_const(String::new());
        second.expect_synthesize().times(0);
        let after = orchestrator(second, cache)
            .synthesize(&script, &all(&script), &CancellationToken::new(), |_| {})
            .await;

        assert_eq!(after.clips, before.clips);
    }

    #[tokio::test]
    async fn test_identical_turns_share_one_request() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockSpeechBackend::new();
        backend.expect_kind().return_const(BackendKind::Local);
        backend.expect_render_settings().return_const(String::new());
        backend.expect_synthesize().times(1).returning(|_| Ok(tone(30)));

        let script = script(&["Same words.", "Same words."]);
        let report = orchestrator(backend, open_cache(&dir))
            .synthesize(&script, &all(&script), &CancellationToken::new(), |_| {})
            .await;

        assert_eq!(report.clips.len(), 2);
        assert_eq!(report.clips[&0].audio_path, report.clips[&1].audio_path);
    }

    #[tokio::test]
    async fn test_cancelled_token_issues_no_requests() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockSpeechBackend::new();
        backend.expect_kind().return_const(BackendKind::Local);
        backend.expect_render_settings().return_const(String::new());
        backend.expect_synthesize().times(0);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let script = script(&["One.", "Two."]);
        let report = orchestrator(backend, open_cache(&dir))
            .synthesize(&script, &all(&script), &cancel, |_| {})
            .await;

        assert!(report.clips.is_empty());
        assert_eq!(report.cancelled, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_only_pending_turns_are_rendered_and_progress_reported() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockSpeechBackend::new();
        backend.expect_kind().return_const(BackendKind::Local);
        backend.expect_render_settings().return_const(String::new());
        backend
            .expect_synthesize()
            .withf(|req| req.text == "Two.")
            .times(1)
            .returning(|_| Ok(tone(30)));

        let done = AtomicUsize::new(0);
        let script = script(&["One.", "Two.", "Three."]);
        let report = orchestrator(backend, open_cache(&dir))
            .synthesize(&script, &[1], &CancellationToken::new(), |n| {
                done.store(n, Ordering::SeqCst);
            })
            .await;

        assert_eq!(report.clips.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
