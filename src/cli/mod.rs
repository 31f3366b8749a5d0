//! CLI argument parsing and validation.

mod args;

pub use args::{
    Args, Command, InputError, SubmitArgs, VoiceAssignment, VoiceAssignmentError,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::content::{ContentError, RawInput};
    use crate::script::{SpeakerRole, Style};
    use clap::Parser;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn submit(argv: &[&str]) -> SubmitArgs {
        let mut full = vec!["blogcaster", "submit"];
        full.extend_from_slice(argv);
        match Args::parse_from(full).command {
            Command::Submit(args) => args,
            other => panic!("expected submit, got {other:?}"),
        }
    }

    // ===========================================
    // VoiceAssignment::parse tests
    // ===========================================

    #[test]
    fn test_parse_voice_assignment_valid() {
        let assignment = VoiceAssignment::parse("host_a=nova").unwrap();
        assert_eq!(assignment.role, SpeakerRole::HostA);
        assert_eq!(assignment.voice_id, "nova");
    }

    #[test]
    fn test_parse_voice_assignment_trims_whitespace() {
        let assignment = VoiceAssignment::parse("  Host B =  onyx ").unwrap();
        assert_eq!(assignment.role, SpeakerRole::HostB);
        assert_eq!(assignment.voice_id, "onyx");
    }

    #[test]
    fn test_parse_voice_assignment_missing_separator() {
        assert!(matches!(
            VoiceAssignment::parse("narrator nova"),
            Err(VoiceAssignmentError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_voice_assignment_unknown_role() {
        assert!(matches!(
            VoiceAssignment::parse("guest=nova"),
            Err(VoiceAssignmentError::UnknownRole(role)) if role == "guest"
        ));
    }

    #[test]
    fn test_parse_voice_assignment_empty_voice() {
        assert!(matches!(
            VoiceAssignment::parse("narrator="),
            Err(VoiceAssignmentError::InvalidFormat(_))
        ));
    }

    // ===========================================
    // Args parsing tests
    // ===========================================

    #[test]
    fn test_submit_defaults() {
        let args = submit(&["--text", "Hello there, readers."]);
        assert_eq!(args.style, Style::Narration);
        assert_eq!(args.backend, BackendKind::Local);
        assert_eq!(args.fallback, None);
        assert_eq!(args.encoding, "utf-8");
        assert!(!args.use_file);
    }

    #[test]
    fn test_submit_dialogue_with_voices() {
        let args = submit(&[
            "-t",
            "Some text",
            "-s",
            "dialogue",
            "-b",
            "cloud",
            "--fallback",
            "local",
            "--voice",
            "host_a=nova",
            "--voice",
            "host_b=echo",
        ]);
        assert_eq!(args.style, Style::Dialogue);
        assert_eq!(args.backend, BackendKind::Cloud);
        assert_eq!(args.fallback, Some(BackendKind::Local));

        let binding = args.voice_binding().unwrap();
        assert_eq!(binding.voice_for(SpeakerRole::HostA).unwrap(), "nova");
        assert_eq!(binding.voice_for(SpeakerRole::HostB).unwrap(), "echo");
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from(["blogcaster", "status", "abc", "--verbose", "-c", "cfg.json"]);
        assert!(args.verbose);
        assert_eq!(args.config.unwrap().to_str(), Some("cfg.json"));
        assert!(matches!(args.command, Command::Status { job_id } if job_id == "abc"));
    }

    #[test]
    fn test_url_conflicts_with_text() {
        let result = Args::try_parse_from(["blogcaster", "submit", "--url", "https://x.io", "--text", "hi"]);
        assert!(result.is_err());
    }

    // ===========================================
    // Input selection tests
    // ===========================================

    #[test]
    fn test_text_wins_over_file_by_default() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "File content here.").unwrap();
        let path = file.path().to_str().unwrap();

        let args = submit(&["--text", "Typed content.", "--file", path]);
        assert_eq!(args.raw_input().unwrap(), RawInput::Text("Typed content.".to_string()));
    }

    #[test]
    fn test_use_file_prefers_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "File content here.").unwrap();
        let path = file.path().to_str().unwrap();

        let args = submit(&["--text", "Typed content.", "--file", path, "--use-file"]);
        match args.raw_input().unwrap() {
            RawInput::File { bytes, encoding, name } => {
                assert_eq!(bytes, b"File content here.");
                assert_eq!(encoding, "utf-8");
                assert!(name.is_some());
            }
            other => panic!("expected file input, got {other:?}"),
        }
    }

    #[test]
    fn test_blank_text_falls_back_to_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "File content here.").unwrap();
        let path = file.path().to_str().unwrap();

        let args = submit(&["--text", "   ", "--file", path]);
        assert!(matches!(args.raw_input().unwrap(), RawInput::File { .. }));
    }

    #[test]
    fn test_no_input_is_an_error() {
        let args = submit(&[]);
        assert!(matches!(
            args.raw_input(),
            Err(InputError::Content(ContentError::NoInput))
        ));
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let args = submit(&["--file", "/nonexistent/post.md"]);
        assert!(matches!(args.raw_input(), Err(InputError::Read { .. })));
    }
}
