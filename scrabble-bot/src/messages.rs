//! Localized reply texts.
//!
//! Translations live in `locales/*.yml`. A reply is written in the post's
//! language when a translation exists, otherwise in the configured default.

use rust_i18n::t;

/// Locale used when neither the post language nor the default is translated.
pub const FALLBACK_LOCALE: &str = "en";

/// Pick the reply locale for a post.
pub fn reply_locale(post_language: Option<&str>, default_language: &str) -> String {
    let available = rust_i18n::available_locales!();
    let primary = |code: &str| {
        code.split(['-', '_'])
            .next()
            .unwrap_or(code)
            .to_lowercase()
    };

    post_language
        .map(primary)
        .filter(|code| available.contains(&code.as_str()))
        .or_else(|| {
            Some(primary(default_language)).filter(|code| available.contains(&code.as_str()))
        })
        .unwrap_or_else(|| FALLBACK_LOCALE.to_string())
}

/// "The word X is worth N points (language)."
pub fn score(word: &str, points: u32, language_name: &str, locale: &str) -> String {
    let word = word.to_uppercase();
    if points == 1 {
        t!("score.one", locale = locale, word = word, language = language_name).into_owned()
    } else {
        t!(
            "score.other",
            locale = locale,
            word = word,
            points = points,
            language = language_name
        )
        .into_owned()
    }
}

pub fn one_word(locale: &str) -> String {
    t!("errors.one_word", locale = locale).into_owned()
}

pub fn letters_only(locale: &str) -> String {
    t!("errors.letters_only", locale = locale).into_owned()
}

pub fn rate_limited(locale: &str) -> String {
    t!("errors.rate_limited", locale = locale).into_owned()
}

/// Lists `language_names` in the given order.
pub fn unsupported_language(language_names: &[String], locale: &str) -> String {
    let languages = language_names.join(", ");
    t!(
        "errors.unsupported_language",
        locale = locale,
        languages = languages
    )
    .into_owned()
}
