//! Turns raw input into a canonical plain-text [`Document`].

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::ErrorKind;

const WORDS_PER_MINUTE: usize = 200;
const MAX_TITLE_CHARS: usize = 80;

static TITLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(?:title|h1)[^>]*>(.*?)</(?:title|h1)>").unwrap());
static MARKDOWN_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s{0,3}#{1,6}\s+(.+?)\s*#*\s*$").unwrap());
static SCRIPT_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>|<!--.*?-->").unwrap()
});
static BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(?:p|div|br|h[1-6]|li|ul|ol|section|article|blockquote|tr|header|footer)\b[^>]*>")
        .unwrap()
});
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static MD_IMAGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static MD_LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").unwrap());
static MD_HEADING_MARK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s{0,3}#{1,6}\s*").unwrap());
static MD_EMPHASIS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*|__|`+|~~").unwrap());
static INLINE_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());

/// Errors raised while acquiring or normalizing input.
#[derive(Error, Debug)]
pub enum ContentError {
    #[error("Text input cannot be empty.")]
    Empty,

    #[error("Text too short: {actual} characters, at least {min} required")]
    TooShort { min: usize, actual: usize },

    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Input is not valid {0}")]
    InvalidEncoding(String),

    #[error("URL fetching is not supported: {0}")]
    UrlNotSupported(String),

    #[error("No input provided")]
    NoInput,
}

impl ContentError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

/// Limits applied to incoming content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContentConfig {
    /// Minimum length of the normalized text, in characters.
    pub min_chars: usize,
    /// Maximum size of a single segment, in characters.
    pub max_segment_chars: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            min_chars: 10,
            max_segment_chars: 1200,
        }
    }
}

/// Raw input handed over by the acquisition layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawInput {
    Text(String),
    File {
        bytes: Vec<u8>,
        encoding: String,
        name: Option<String>,
    },
    Url(String),
}

impl RawInput {
    /// Pick between pasted text and an uploaded file.
    ///
    /// The file wins when `prefer_file` is set or the text is blank.
    pub fn choose(
        text: Option<String>,
        file: Option<RawInput>,
        prefer_file: bool,
    ) -> Result<RawInput, ContentError> {
        let text = text.filter(|t| !t.trim().is_empty());
        match (text, file) {
            (Some(_), Some(file)) if prefer_file => Ok(file),
            (Some(text), _) => Ok(RawInput::Text(text)),
            (None, Some(file)) => Ok(file),
            (None, None) => Err(ContentError::NoInput),
        }
    }

    /// Source URL or file name, used as part of the document identity.
    pub fn origin(&self) -> Option<String> {
        match self {
            RawInput::Text(_) => None,
            RawInput::File { name, .. } => name.clone(),
            RawInput::Url(url) => Some(url.clone()),
        }
    }

    /// Decode the input into a string.
    pub fn decode(&self) -> Result<String, ContentError> {
        match self {
            RawInput::Text(text) => Ok(text.clone()),
            RawInput::File {
                bytes, encoding, ..
            } => decode_bytes(bytes, encoding),
            RawInput::Url(url) => Err(ContentError::UrlNotSupported(url.clone())),
        }
    }
}

fn decode_bytes(bytes: &[u8], encoding: &str) -> Result<String, ContentError> {
    match encoding.trim().to_ascii_lowercase().replace('_', "-").as_str() {
        "utf-8" | "utf8" => {
            let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
            String::from_utf8(bytes.to_vec())
                .map_err(|_| ContentError::InvalidEncoding("UTF-8".to_string()))
        }
        "utf-16le" => decode_utf16(bytes.strip_prefix(&[0xFF, 0xFE]).unwrap_or(bytes), false),
        "utf-16be" => decode_utf16(bytes.strip_prefix(&[0xFE, 0xFF]).unwrap_or(bytes), true),
        "utf-16" => match bytes {
            [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, true),
            [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, false),
            _ => decode_utf16(bytes, false),
        },
        other => Err(ContentError::UnsupportedEncoding(other.to_string())),
    }
}

fn decode_utf16(bytes: &[u8], big_endian: bool) -> Result<String, ContentError> {
    if bytes.len() % 2 != 0 {
        return Err(ContentError::InvalidEncoding("UTF-16".to_string()));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if big_endian {
                u16::from_be_bytes([pair[0], pair[1]])
            } else {
                u16::from_le_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16(&units).map_err(|_| ContentError::InvalidEncoding("UTF-16".to_string()))
}

/// A normalized article. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_hash: String,
    pub title: String,
    pub canonical_text: String,
    pub reading_minutes: u32,
    pub origin: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Normalize raw input into a [`Document`].
pub fn normalize(input: &RawInput, config: &ContentConfig) -> Result<Document, ContentError> {
    let raw = input.decode()?.replace("\r\n", "\n").replace('\r', "\n");
    if raw.trim().is_empty() {
        return Err(ContentError::Empty);
    }

    let heading = extract_title(&raw);
    let canonical_text = canonicalize(&raw);

    if canonical_text.is_empty() {
        return Err(ContentError::Empty);
    }
    let length = canonical_text.chars().count();
    if length < config.min_chars {
        return Err(ContentError::TooShort {
            min: config.min_chars,
            actual: length,
        });
    }

    let source_hash = content_hash(&canonical_text);
    let words = canonical_text.split_whitespace().count();
    let title = heading.unwrap_or_else(|| fallback_title(&canonical_text));

    Ok(Document {
        id: source_hash[..16].to_string(),
        source_hash,
        title,
        reading_minutes: words.div_ceil(WORDS_PER_MINUTE).max(1) as u32,
        canonical_text,
        origin: input.origin(),
        created_at: Utc::now(),
    })
}

/// SHA-256 hex digest of normalized text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn extract_title(raw: &str) -> Option<String> {
    let found = TITLE_TAG
        .captures(raw)
        .or_else(|| MARKDOWN_HEADING.captures(raw))
        .map(|caps| caps[1].to_string())?;
    let cleaned = collapse_inline(&decode_entities(&ANY_TAG.replace_all(&found, "")));
    (!cleaned.is_empty()).then(|| truncate_chars(&cleaned, MAX_TITLE_CHARS))
}

fn fallback_title(text: &str) -> String {
    let first = text.lines().next().unwrap_or_default();
    let sentence = match first.find(['.', '!', '?']) {
        Some(end) => &first[..=end],
        None => first,
    };
    truncate_chars(sentence.trim(), MAX_TITLE_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect::<String>().trim_end().to_string()
}

/// Strip markup and collapse whitespace. Paragraphs are separated by a
/// single blank line, everything inside a paragraph by single spaces.
fn canonicalize(raw: &str) -> String {
    let text = SCRIPT_STYLE.replace_all(raw, " ");
    let text = BLOCK_TAG.replace_all(&text, "\n\n");
    let text = ANY_TAG.replace_all(&text, "");
    let text = decode_entities(&text);
    let text = MD_IMAGE.replace_all(&text, "");
    let text = MD_LINK.replace_all(&text, "$1");
    let text = MD_HEADING_MARK.replace_all(&text, "");
    let text = MD_EMPHASIS.replace_all(&text, "");

    let mut paragraphs = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = collapse_inline(line);
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }
    paragraphs.join("\n\n")
}

fn collapse_inline(line: &str) -> String {
    INLINE_SPACE.replace_all(line, " ").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
