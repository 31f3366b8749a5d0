//! Content normalization and segmentation.
//!
//! Raw text or uploaded file bytes become a canonical [`Document`], which the
//! segmenter cuts into ordered [`Segment`]s sized for script synthesis.

mod normalizer;
mod segmenter;

pub use normalizer::{ContentConfig, ContentError, Document, RawInput, content_hash, normalize};
pub use segmenter::{Segment, reassemble, segment, segment_sentences, split_sentences};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn config() -> ContentConfig {
        ContentConfig::default()
    }

    fn doc(text: &str) -> Document {
        normalize(&RawInput::Text(text.to_string()), &config()).unwrap()
    }

    fn squash(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    // ===========================================
    // Normalizer
    // ===========================================

    #[test]
    fn test_normalize_rejects_empty_text() {
        let result = normalize(&RawInput::Text("   \n\t ".to_string()), &config());
        assert!(matches!(result, Err(ContentError::Empty)));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_normalize_rejects_short_text() {
        let result = normalize(&RawInput::Text("Hi.".to_string()), &config());
        assert!(matches!(
            result,
            Err(ContentError::TooShort { min: 10, actual: 3 })
        ));
    }

    #[test]
    fn test_normalize_rejects_markup_only_input() {
        let result = normalize(
            &RawInput::Text("<div><script>var x = 1;</script></div>".to_string()),
            &config(),
        );
        assert!(matches!(result, Err(ContentError::Empty)));
    }

    #[test]
    fn test_normalize_collapses_whitespace_and_paragraphs() {
        let document = doc("First   line\nwraps here.\n\n\n\nSecond\tparagraph.  ");
        assert_eq!(
            document.canonical_text,
            "First line wraps here.\n\nSecond paragraph."
        );
    }

    #[test]
    fn test_normalize_strips_html() {
        let document = doc(
            "<html><head><title>My Post</title><style>p { color: red; }</style></head>\
             <body><p>Hello &amp; welcome.</p><p>Second <b>bold</b> para.</p></body></html>",
        );
        assert_eq!(document.title, "My Post");
        assert!(!document.canonical_text.contains('<'));
        assert!(!document.canonical_text.contains("color"));
        assert!(document.canonical_text.contains("Hello & welcome."));
        assert!(document.canonical_text.contains("Second bold para."));
    }

    #[test]
    fn test_normalize_strips_markdown() {
        let document = doc("# Rust Tips\n\nRead **the** [book](https://example.com) today.");
        assert_eq!(document.title, "Rust Tips");
        assert_eq!(document.canonical_text, "Rust Tips\n\nRead the book today.");
    }

    #[test]
    fn test_normalize_fallback_title_is_first_sentence() {
        let document = doc("Paragraph A. Paragraph B.");
        assert_eq!(document.title, "Paragraph A.");
        assert_eq!(document.reading_minutes, 1);
    }

    #[test]
    fn test_normalize_hash_is_content_addressed() {
        let a = doc("Same   text here.\n\nAnd more.");
        let b = doc("Same text here.\n\n\nAnd   more.");
        assert_eq!(a.source_hash, b.source_hash);
        assert_eq!(a.id, b.id);
        assert_eq!(a.source_hash, content_hash(&a.canonical_text));
        assert_eq!(a.source_hash.len(), 64);
    }

    #[test]
    fn test_decode_utf8_file_with_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("Uploaded article text.".as_bytes());
        let input = RawInput::File {
            bytes,
            encoding: "UTF-8".to_string(),
            name: Some("post.txt".to_string()),
        };
        let document = normalize(&input, &config()).unwrap();
        assert_eq!(document.canonical_text, "Uploaded article text.");
        assert_eq!(document.origin.as_deref(), Some("post.txt"));
    }

    #[test]
    fn test_decode_utf16le_file() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "Sixteen bit text.".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let input = RawInput::File {
            bytes,
            encoding: "utf-16".to_string(),
            name: None,
        };
        assert_eq!(input.decode().unwrap(), "Sixteen bit text.");
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let input = RawInput::File {
            bytes: vec![0xC3, 0x28, 0x41],
            encoding: "utf-8".to_string(),
            name: None,
        };
        assert!(matches!(input.decode(), Err(ContentError::InvalidEncoding(_))));
    }

    #[test]
    fn test_decode_rejects_unsupported_encoding() {
        let input = RawInput::File {
            bytes: b"text".to_vec(),
            encoding: "shift_jis".to_string(),
            name: None,
        };
        assert!(matches!(
            input.decode(),
            Err(ContentError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn test_url_input_is_rejected() {
        let input = RawInput::Url("https://blog.example.com/post".to_string());
        let err = normalize(&input, &config()).unwrap_err();
        assert!(matches!(err, ContentError::UrlNotSupported(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_choose_prefers_text_unless_file_requested() {
        let file = RawInput::File {
            bytes: b"file body".to_vec(),
            encoding: "utf-8".to_string(),
            name: None,
        };

        let chosen = RawInput::choose(Some("typed".to_string()), Some(file.clone()), false).unwrap();
        assert_eq!(chosen, RawInput::Text("typed".to_string()));

        let chosen = RawInput::choose(Some("typed".to_string()), Some(file.clone()), true).unwrap();
        assert_eq!(chosen, file);

        let chosen = RawInput::choose(Some("  ".to_string()), Some(file.clone()), false).unwrap();
        assert_eq!(chosen, file);

        assert!(matches!(
            RawInput::choose(None, None, false),
            Err(ContentError::NoInput)
        ));
    }

    // ===========================================
    // Segmenter
    // ===========================================

    #[test]
    fn test_split_sentences_keeps_abbreviations() {
        let sentences = split_sentences("Use tools, e.g. cargo. Then ship it! Done?");
        assert_eq!(
            sentences,
            vec!["Use tools, e.g. cargo.", "Then ship it!", "Done?"]
        );
    }

    #[test]
    fn test_split_sentences_handles_closing_quotes() {
        let sentences = split_sentences("He said \"stop.\" Then he left.");
        assert_eq!(sentences, vec!["He said \"stop.\"", "Then he left."]);
    }

    #[test]
    fn test_segment_one_per_paragraph_when_small() {
        let document = doc("Paragraph A.\n\nParagraph B.");
        let segments = segment(&document, 1200);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Paragraph A.");
        assert_eq!(segments[1].text, "Paragraph B.");
        assert!(segments.iter().all(|s| s.starts_paragraph));
    }

    #[test]
    fn test_segment_splits_long_paragraph_on_sentences() {
        let document = doc("Paragraph A. Paragraph B.");
        let segments = segment(&document, 16);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Paragraph A.");
        assert_eq!(segments[1].text, "Paragraph B.");
        assert!(segments[0].starts_paragraph);
        assert!(!segments[1].starts_paragraph);
    }

    #[test]
    fn test_segment_never_cuts_a_sentence() {
        let long = "This single sentence is far longer than the configured limit allows.";
        let document = doc(long);
        let segments = segment(&document, 10);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, long);
    }

    #[test]
    fn test_segments_are_ordered_contiguous_and_exhaustive() {
        let text = "Rust is a systems language. It has ownership. Borrowing is checked.\n\n\
                    Async code uses futures. Tokio runs them. Channels connect tasks.\n\n\
                    Short one.";
        let document = doc(text);
        for max in [1, 20, 45, 80, 5000] {
            let segments = segment(&document, max);
            for (i, s) in segments.iter().enumerate() {
                assert_eq!(s.index, i);
                assert_eq!(s.document_id, document.id);
                assert!(!s.text.is_empty());
            }
            assert_eq!(reassemble(&segments), document.canonical_text);
            let joined = segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ");
            assert_eq!(squash(&joined), squash(&document.canonical_text));
        }
    }

    #[test]
    fn test_sentence_segments_split_short_paragraph() {
        let document = doc("Paragraph A. Paragraph B.");
        let segments = segment_sentences(&document);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Paragraph A.");
        assert_eq!(segments[1].text, "Paragraph B.");
        assert!(segments[0].starts_paragraph);
        assert!(!segments[1].starts_paragraph);
    }

    #[test]
    fn test_sentence_segments_are_contiguous_and_exhaustive() {
        let document = doc(
            "Rust is a systems language. It has ownership.\n\n\
             Tokio runs futures. Channels connect tasks, e.g. mpsc.",
        );
        let segments = segment_sentences(&document);
        assert_eq!(segments.len(), 4);
        for (i, s) in segments.iter().enumerate() {
            assert_eq!(s.index, i);
        }
        assert!(segments[2].starts_paragraph);
        assert_eq!(reassemble(&segments), document.canonical_text);
    }

    #[test]
    fn test_segments_respect_limit_for_multi_sentence_units() {
        let document = doc("Aaaa bbbb. Cccc dddd. Eeee ffff. Gggg hhhh.");
        let segments = segment(&document, 21);
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|s| s.text.chars().count() <= 21));
    }
}
