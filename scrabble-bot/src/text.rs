//! Plain-text helpers for status content.

use std::sync::LazyLock;

use regex::Regex;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Markup between an `@` and the handle it introduces (`@<span>bot</span>`).
static SPLIT_HANDLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@(?:<[^>]+>)+").unwrap());

/// `@user` and `@user@host` handles.
static HANDLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@\w+(@[\w.]+)?").unwrap());

static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").unwrap());

/// Replace HTML tags with spaces, decode entities and trim.
pub fn strip_html(html: &str) -> String {
    let joined = SPLIT_HANDLE_RE.replace_all(html, "@");
    let without_tags = TAG_RE.replace_all(&joined, " ");
    let decoded = ENTITY_RE.replace_all(&without_tags, |caps: &regex::Captures<'_>| {
        decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    });
    decoded.trim().to_string()
}

fn decode_entity(name: &str) -> Option<String> {
    let decoded = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        _ => {
            let code = if let Some(hex) = name
                .strip_prefix("#x")
                .or_else(|| name.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse::<u32>().ok()?
            };
            char::from_u32(code)?
        }
    };
    Some(decoded.to_string())
}

/// Remove `@handle` and `@handle@host` mentions.
pub fn remove_handles(text: &str) -> String {
    HANDLE_RE.replace_all(text, "").into_owned()
}

/// Number of `@handle` mentions in the plain text.
pub fn count_handles(text: &str) -> usize {
    HANDLE_RE.find_iter(text).count()
}

/// Words left after stripping HTML and removing handles.
pub fn words_without_handles(content: &str) -> Vec<String> {
    remove_handles(&strip_html(content))
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// The candidate word of a mention.
///
/// Returns the first word left after removing handles, and whether more words
/// followed it. `None` when nothing but handles remains.
pub fn extract_word(content: &str) -> Option<(String, bool)> {
    let mut words = words_without_handles(content).into_iter();
    let first = words.next()?;
    Some((first, words.next().is_some()))
}

/// Whether the plain text of `content` is exactly one word.
pub fn is_single_word(content: &str) -> bool {
    strip_html(content).split_whitespace().count() == 1
}

/// Letters of any script, hyphens and apostrophes; nothing else.
pub fn is_valid_word(word: &str) -> bool {
    !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_alphabetic() || c == '-' || c == '\'' || c == '\u{2019}')
}
