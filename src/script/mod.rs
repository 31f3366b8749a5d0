//! Script synthesis.
//!
//! Narration scripts are a deterministic rewrite of each segment. Dialogue
//! scripts come from an external generation capability and are validated
//! for coverage and speaker alternation before they are accepted.

mod dialogue;
mod generator;
mod narration;
mod synthesizer;
mod types;

pub use dialogue::{Batch, batch_segments, coverage, key_terms, validate_batch};
pub use generator::{
    GenerationRequest, GeneratorConfig, HttpScriptGenerator, ScriptGenerator, parse_turns,
};
#[cfg(test)]
pub use generator::MockScriptGenerator;
pub use narration::{NARRATION_VERSION, rewrite_for_speech};
pub use synthesizer::{ScriptConfig, ScriptSynthesizer};
pub use types::{CandidateTurn, GeneratorError, Script, ScriptError, SpeakerRole, Style, Turn};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentConfig, Document, RawInput, Segment, normalize, segment};
    use crate::error::ErrorKind;
    use std::sync::Arc;

    fn document(text: &str) -> Document {
        normalize(&RawInput::Text(text.to_string()), &ContentConfig::default()).unwrap()
    }

    fn mock_generator() -> MockScriptGenerator {
        let mut mock = MockScriptGenerator::new();
        mock.expect_version().returning(|| "mock-llm+v1".to_string());
        mock.expect_max_input_chars().returning(|| 10_000);
        mock
    }

    const ARTICLE: &str = "Rust ownership prevents memory bugs at compile time.\n\n\
                           Tokio schedules asynchronous tasks across worker threads.";

    fn good_dialogue() -> Vec<CandidateTurn> {
        vec![
            CandidateTurn::new(
                SpeakerRole::HostA,
                "So Rust ownership prevents memory bugs at compile time?",
            ),
            CandidateTurn::new(
                SpeakerRole::HostB,
                "Right, and Tokio schedules asynchronous tasks across worker threads.",
            ),
        ]
    }

    // ===========================================
    // Narration
    // ===========================================

    #[test]
    fn test_rewrite_expands_abbreviations_and_symbols() {
        let spoken = rewrite_for_speech("Tools, e.g. cargo & rustc, cut bugs by 40% https://x.io/a today.");
        assert_eq!(spoken, "Tools, for example cargo and rustc, cut bugs by 40 percent today.");
    }

    #[test]
    fn test_rewrite_keeps_inline_hyphens_and_link_punctuation() {
        assert_eq!(
            rewrite_for_speech("Five - three leaves two, see https://x.io/docs."),
            "Five - three leaves two, see."
        );
        assert_eq!(
            rewrite_for_speech("Read the guide (https://x.io/guide)."),
            "Read the guide."
        );
        assert_eq!(rewrite_for_speech("- First item here"), "First item here");
    }

    #[test]
    fn test_rewrite_is_deterministic() {
        let text = "Lists: - one - two vs. three, i.e. many.";
        assert_eq!(rewrite_for_speech(text), rewrite_for_speech(text));
    }

    #[tokio::test]
    async fn test_narration_one_turn_per_segment() {
        let doc = document("Paragraph A.\n\nParagraph B.");
        let segments = segment(&doc, 1200);
        let synthesizer = ScriptSynthesizer::new(Arc::new(mock_generator()), ScriptConfig::default());

        let script = synthesizer
            .synthesize(&doc, &segments, Style::Narration)
            .await
            .unwrap();

        assert_eq!(script.style, Style::Narration);
        assert_eq!(script.turns.len(), 2);
        assert!(script.turns.iter().all(|t| t.speaker_role == SpeakerRole::Narrator));
        assert_eq!(script.turns[0].text, "Paragraph A.");
        assert_eq!(script.turns[1].text, "Paragraph B.");
        assert_eq!(script.producer_version, NARRATION_VERSION);
        assert_eq!(script.full_text(), "Paragraph A.\nParagraph B.");
    }

    #[tokio::test]
    async fn test_narration_is_deterministic_and_never_calls_generator() {
        let doc = document(ARTICLE);
        let segments = segment(&doc, 1200);
        let mut mock = mock_generator();
        mock.expect_generate().never();
        let synthesizer = ScriptSynthesizer::new(Arc::new(mock), ScriptConfig::default());

        let first = synthesizer.synthesize(&doc, &segments, Style::Narration).await.unwrap();
        let second = synthesizer.synthesize(&doc, &segments, Style::Narration).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_no_segments_is_rejected() {
        let doc = document(ARTICLE);
        let synthesizer = ScriptSynthesizer::new(Arc::new(mock_generator()), ScriptConfig::default());
        let err = synthesizer.synthesize(&doc, &[], Style::Narration).await.unwrap_err();
        assert!(matches!(err, ScriptError::NoSegments));
    }

    // ===========================================
    // Dialogue
    // ===========================================

    #[tokio::test]
    async fn test_dialogue_accepts_valid_output() {
        let doc = document(ARTICLE);
        let segments = segment(&doc, 1200);
        let mut mock = mock_generator();
        mock.expect_generate()
            .withf(|req| {
                req.style == Style::Dialogue
                    && req.segments.len() == 2
                    && req.opening_speaker == SpeakerRole::HostA
            })
            .times(1)
            .returning(|_| Ok(good_dialogue()));
        let synthesizer = ScriptSynthesizer::new(Arc::new(mock), ScriptConfig::default());

        let script = synthesizer.synthesize(&doc, &segments, Style::Dialogue).await.unwrap();

        assert_eq!(script.turns.len(), 2);
        assert_eq!(script.turns[0].speaker_role, SpeakerRole::HostA);
        assert_eq!(script.turns[1].speaker_role, SpeakerRole::HostB);
        assert_eq!(script.producer_version, "mock-llm+v1");
        assert!(script.speaker_changes_at(1));
    }

    #[tokio::test]
    async fn test_dialogue_single_speaker_fails_after_bounded_retries() {
        let doc = document(ARTICLE);
        let segments = segment(&doc, 1200);
        let mut mock = mock_generator();
        mock.expect_generate().times(3).returning(|_| {
            Ok(vec![
                CandidateTurn::new(SpeakerRole::HostA, "Rust ownership prevents memory bugs."),
                CandidateTurn::new(SpeakerRole::HostA, "Tokio schedules asynchronous tasks.").continuing(),
            ])
        });
        let synthesizer = ScriptSynthesizer::new(Arc::new(mock), ScriptConfig::default());

        let err = synthesizer.synthesize(&doc, &segments, Style::Dialogue).await.unwrap_err();

        assert!(matches!(err, ScriptError::Incomplete { batch: 0, .. }));
        assert_eq!(err.kind(), ErrorKind::SynthesisIncomplete);
    }

    #[tokio::test]
    async fn test_dialogue_retry_recovers_from_degenerate_output() {
        let doc = document(ARTICLE);
        let segments = segment(&doc, 1200);
        let mut mock = mock_generator();
        mock.expect_generate().times(2).returning(|req| {
            if req.attempt == 0 {
                Ok(vec![])
            } else {
                Ok(good_dialogue())
            }
        });
        let synthesizer = ScriptSynthesizer::new(Arc::new(mock), ScriptConfig::default());

        let script = synthesizer.synthesize(&doc, &segments, Style::Dialogue).await.unwrap();
        assert_eq!(script.turns.len(), 2);
    }

    #[tokio::test]
    async fn test_dialogue_generator_error_surfaces_after_retries() {
        let doc = document(ARTICLE);
        let segments = segment(&doc, 1200);
        let mut mock = mock_generator();
        mock.expect_generate()
            .times(2)
            .returning(|_| Err(GeneratorError::Unavailable("connection refused".to_string())));
        let config = ScriptConfig {
            retries: 1,
            ..ScriptConfig::default()
        };
        let synthesizer = ScriptSynthesizer::new(Arc::new(mock), config);

        let err = synthesizer.synthesize(&doc, &segments, Style::Dialogue).await.unwrap_err();
        assert!(matches!(err, ScriptError::Generator(_)));
    }

    #[tokio::test]
    async fn test_dialogue_unparseable_output_is_incomplete() {
        let doc = document(ARTICLE);
        let segments = segment(&doc, 1200);
        let mut mock = mock_generator();
        mock.expect_generate()
            .times(3)
            .returning(|_| parse_turns("Sure! Here is a lovely podcast script about Rust."));
        let synthesizer = ScriptSynthesizer::new(Arc::new(mock), ScriptConfig::default());

        let err = synthesizer.synthesize(&doc, &segments, Style::Dialogue).await.unwrap_err();

        assert!(matches!(err, ScriptError::Incomplete { batch: 0, .. }));
        assert_eq!(err.kind(), ErrorKind::SynthesisIncomplete);
    }

    #[test]
    fn test_generator_error_kinds() {
        assert_eq!(
            GeneratorError::InvalidResponse("junk".to_string()).kind(),
            ErrorKind::SynthesisIncomplete
        );
        assert_eq!(
            GeneratorError::Unavailable("down".to_string()).kind(),
            ErrorKind::BackendTransient
        );
        assert_eq!(
            ScriptError::Generator(GeneratorError::RequestFailed("502".to_string())).kind(),
            ErrorKind::BackendTransient
        );
    }

    #[tokio::test]
    async fn test_dialogue_batches_alternate_across_boundaries() {
        let doc = document(ARTICLE);
        let segments = segment(&doc, 1200);
        let mut mock = MockScriptGenerator::new();
        mock.expect_version().returning(|| "mock".to_string());
        mock.expect_max_input_chars().returning(|| 60);
        mock.expect_generate().times(2).returning(|req| {
            let opener = req.opening_speaker;
            Ok(vec![
                CandidateTurn::new(opener, format!("Let's recap: {}", req.segments[0])),
                CandidateTurn::new(opener.other_host(), format!("Indeed. {}", req.segments[0])),
            ])
        });
        let synthesizer = ScriptSynthesizer::new(Arc::new(mock), ScriptConfig::default());

        let script = synthesizer.synthesize(&doc, &segments, Style::Dialogue).await.unwrap();

        let speakers: Vec<SpeakerRole> = script.turns.iter().map(|t| t.speaker_role).collect();
        assert_eq!(
            speakers,
            vec![SpeakerRole::HostA, SpeakerRole::HostB, SpeakerRole::HostA, SpeakerRole::HostB]
        );
        assert_eq!(script.turns.iter().map(|t| t.index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_validate_rejects_uncovered_segment() {
        let seg = |index: usize, text: &str| Segment {
            document_id: "d".to_string(),
            index,
            text: text.to_string(),
            starts_paragraph: true,
        };
        let batch = Batch {
            number: 0,
            segments: vec![
                seg(0, "Rust ownership prevents memory bugs."),
                seg(1, "Gardening tomatoes requires patience and sunlight."),
            ],
        };
        let turns = vec![
            CandidateTurn::new(SpeakerRole::HostA, "Ownership prevents memory bugs."),
            CandidateTurn::new(SpeakerRole::HostB, "Rust is great."),
        ];
        let reason = validate_batch(&batch, &turns, SpeakerRole::HostA, 0.3).unwrap_err();
        assert!(reason.contains("segment 1 not covered"));
    }

    #[test]
    fn test_validate_rejects_unmarked_repeat_speaker() {
        let batch = Batch {
            number: 0,
            segments: vec![],
        };
        let turns = vec![
            CandidateTurn::new(SpeakerRole::HostA, "One."),
            CandidateTurn::new(SpeakerRole::HostB, "Two."),
            CandidateTurn::new(SpeakerRole::HostB, "Three."),
        ];
        assert!(validate_batch(&batch, &turns, SpeakerRole::HostA, 0.3).is_err());

        let mut marked = turns.clone();
        marked[2].continuation = true;
        assert!(validate_batch(&batch, &marked, SpeakerRole::HostA, 0.3).is_ok());
    }

    #[test]
    fn test_key_terms_skip_short_and_stop_words() {
        let terms = key_terms("This is about the Borrow checker, and 2024 lifetimes!");
        let expected: Vec<&str> = vec!["borrow", "checker", "lifetimes"];
        assert_eq!(terms.iter().map(String::as_str).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_batch_segments_respects_limit() {
        let doc = document("Aaaa aaaa.\n\nBbbb bbbb.\n\nCccc cccc.");
        let segments = segment(&doc, 1200);
        let batches = batch_segments(&segments, 20);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].segments.len(), 2);
        assert_eq!(batches[1].segments[0].index, 2);
    }

    #[test]
    fn test_parse_turns_lenient() {
        let content = "```json\n\
            {\"speaker\": \"HostA\", \"text\": \" Hello \"}\n\
            not json at all\n\
            {\"speaker\": \"Host B\", \"text\": \"Hi\", \"continuation\": true},\n\
            {\"speaker\": \"Guest\", \"text\": \"dropped\"}\n\
            ```";
        let turns = parse_turns(content).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], CandidateTurn::new(SpeakerRole::HostA, "Hello"));
        assert_eq!(turns[1], CandidateTurn::new(SpeakerRole::HostB, "Hi").continuing());
    }

    #[test]
    fn test_parse_turns_json_array() {
        let content = r#"[{"speaker":"a","text":"One"},{"speaker":"b","text":"Two"}]"#;
        let turns = parse_turns(content).unwrap();
        assert_eq!(turns[1].speaker, SpeakerRole::HostB);
        assert!(parse_turns("nothing useful").is_err());
    }
}
