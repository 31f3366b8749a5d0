//! Splits a document into ordered segments on paragraph and sentence
//! boundaries.

use serde::{Deserialize, Serialize};

use super::normalizer::Document;

/// One contiguous unit of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub document_id: String,
    pub index: usize,
    pub text: String,
    /// First segment of a paragraph. Used to rebuild paragraph breaks.
    pub starts_paragraph: bool,
}

/// Split `document` into segments of at most `max_chars` characters.
///
/// Segments never span paragraphs and never cut a sentence; a single
/// sentence longer than `max_chars` becomes its own oversized segment.
pub fn segment(document: &Document, max_chars: usize) -> Vec<Segment> {
    let max_chars = max_chars.max(1);
    let mut segments = Vec::new();

    for paragraph in document.canonical_text.split("\n\n") {
        let mut starts_paragraph = true;
        let mut current = String::new();

        for sentence in split_sentences(paragraph) {
            let projected = if current.is_empty() {
                sentence.chars().count()
            } else {
                current.chars().count() + 1 + sentence.chars().count()
            };

            if !current.is_empty() && projected > max_chars {
                segments.push(Segment {
                    document_id: document.id.clone(),
                    index: segments.len(),
                    text: std::mem::take(&mut current),
                    starts_paragraph,
                });
                starts_paragraph = false;
            }

            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(sentence);
        }

        if !current.is_empty() {
            segments.push(Segment {
                document_id: document.id.clone(),
                index: segments.len(),
                text: current,
                starts_paragraph,
            });
        }
    }

    segments
}

/// Split `document` into one segment per sentence, in order.
///
/// Used for single-narrator scripts, where every sentence becomes its own
/// turn. Paragraph starts are kept so the text can still be rebuilt.
pub fn segment_sentences(document: &Document) -> Vec<Segment> {
    let mut segments = Vec::new();

    for paragraph in document.canonical_text.split("\n\n") {
        for (i, sentence) in split_sentences(paragraph).into_iter().enumerate() {
            segments.push(Segment {
                document_id: document.id.clone(),
                index: segments.len(),
                text: sentence.to_string(),
                starts_paragraph: i == 0,
            });
        }
    }

    segments
}

/// Rebuild the canonical text from ordered segments.
pub fn reassemble(segments: &[Segment]) -> String {
    let mut text = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            text.push_str(if segment.starts_paragraph { "\n\n" } else { " " });
        }
        text.push_str(&segment.text);
    }
    text
}

/// Split a paragraph into sentences.
///
/// A sentence ends at `.`, `!` or `?` (plus trailing quotes or brackets)
/// followed by whitespace and a character that is not lowercase, which
/// keeps abbreviations such as "e.g. this" inside one sentence.
pub fn split_sentences(paragraph: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = paragraph.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        let (_, c) = chars[i];
        if matches!(c, '.' | '!' | '?') {
            let mut end = i + 1;
            while end < chars.len() && matches!(chars[end].1, '.' | '!' | '?' | '"' | '\'' | ')' | ']' | '”' | '’') {
                end += 1;
            }
            let mut next = end;
            while next < chars.len() && chars[next].1.is_whitespace() {
                next += 1;
            }
            let boundary = next > end && next < chars.len() && !chars[next].1.is_lowercase();
            if boundary {
                let end_byte = chars[end].0;
                let sentence = paragraph[start..end_byte].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = chars[next].0;
                i = next;
                continue;
            }
            i = end;
            continue;
        }
        i += 1;
    }

    let tail = paragraph[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}
