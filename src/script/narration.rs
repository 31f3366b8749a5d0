//! Deterministic spoken-register rewrite for single-narrator scripts.

use std::sync::LazyLock;

use regex::Regex;

/// Bumped whenever the rewrite rules change, so cached scripts are rebuilt.
pub const NARRATION_VERSION: &str = "narration-rules-v2";

// Trailing sentence punctuation stays with the sentence.
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\(?https?://[^\s()]*[^\s().,;:!?'"]\)?"#).unwrap());
static BULLET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*[*•\-][ \t]+").unwrap());
static PERCENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d)\s?%").unwrap());
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static SPACE_BEFORE_PUNCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+([,.;:!?])").unwrap());

const ABBREVIATIONS: &[(&str, &str)] = &[
    ("e.g.", "for example"),
    ("i.e.", "that is"),
    ("etc.", "et cetera"),
    ("vs.", "versus"),
    ("approx.", "approximately"),
];

/// Rewrite one segment for reading aloud. Pure function of its input.
pub fn rewrite_for_speech(text: &str) -> String {
    let text = URL.replace_all(text, "");
    let text = BULLET.replace_all(&text, "");
    let text = PERCENT.replace_all(&text, "$1 percent");

    let mut words = Vec::new();
    for word in text.split_whitespace() {
        let replaced = ABBREVIATIONS
            .iter()
            .find(|(abbr, _)| word.eq_ignore_ascii_case(abbr))
            .map(|(_, spoken)| (*spoken).to_string());
        match replaced {
            Some(spoken) => words.push(spoken),
            None if word == "&" => words.push("and".to_string()),
            None => words.push(word.to_string()),
        }
    }

    let joined = words.join(" ");
    let joined = SPACE_BEFORE_PUNCT.replace_all(&joined, "$1");
    SPACES.replace_all(joined.trim(), " ").into_owned()
}
