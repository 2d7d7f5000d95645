//! Word scoring.
//!
//! The scoring rules are data: [`TableScorer`] reads letter values and language
//! names from a TOML table file. The pipeline only depends on the [`Scorer`]
//! trait.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::text::is_valid_word;
use crate::utils::fs::io_error;
use crate::{Error, Result};

/// Tables shipped with the binary.
const BUILTIN_TABLES: &str = include_str!("../data/letters.toml");

/// A successful score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Score {
    pub points: u32,
    /// Code of the table the word was scored with.
    pub language: String,
}

/// Why a word could not be scored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoreError {
    #[error("no supported language covers the word")]
    UnsupportedLanguage,
    #[error("word contains characters other than letters")]
    InvalidCharacters,
}

/// Scores single words.
pub trait Scorer: Send + Sync {
    /// Score `word`, preferring `language_hint` (ISO 639 code of the post) when it applies.
    fn score(&self, word: &str, language_hint: Option<&str>) -> std::result::Result<Score, ScoreError>;

    /// Codes of all supported languages, sorted.
    fn supported_languages(&self) -> Vec<String>;

    /// Display name of `code` in `locale`, falling back to the code itself.
    fn language_name(&self, code: &str, locale: &str) -> String;
}

#[derive(Debug, Deserialize)]
struct TableFile {
    #[serde(default)]
    fallbacks: HashMap<String, String>,
    languages: BTreeMap<String, RawTable>,
}

#[derive(Debug, Deserialize)]
struct RawTable {
    #[serde(default)]
    names: HashMap<String, String>,
    letters: HashMap<String, u32>,
}

#[derive(Debug, Clone)]
struct LetterTable {
    names: HashMap<String, String>,
    values: HashMap<char, u32>,
}

/// Letter-value table scorer.
#[derive(Debug, Clone)]
pub struct TableScorer {
    tables: BTreeMap<String, LetterTable>,
    fallbacks: HashMap<String, String>,
    default_language: String,
}

impl TableScorer {
    /// Tables bundled with the binary.
    pub fn builtin(default_language: &str) -> Result<Self> {
        Self::from_toml_str(BUILTIN_TABLES, default_language)
    }

    /// Load tables from a TOML file.
    pub async fn load(path: &Path, default_language: &str) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| io_error("reading scoring tables", path, e))?;
        Self::from_toml_str(&content, default_language)
    }

    pub fn from_toml_str(content: &str, default_language: &str) -> Result<Self> {
        let file: TableFile = toml::from_str(content)?;

        let mut tables = BTreeMap::new();
        for (code, raw) in file.languages {
            let mut values = HashMap::with_capacity(raw.letters.len());
            for (letter, points) in raw.letters {
                let mut chars = letter.chars();
                let (Some(c), None) = (chars.next(), chars.next()) else {
                    return Err(Error::config(format!(
                        "scoring table {code}: key {letter:?} is not a single letter"
                    )));
                };
                values.insert(c, points);
            }
            tables.insert(
                code.to_lowercase(),
                LetterTable {
                    names: raw.names,
                    values,
                },
            );
        }

        if tables.is_empty() {
            return Err(Error::config("scoring tables define no language"));
        }
        if !tables.contains_key(default_language) {
            return Err(Error::config(format!(
                "default language {default_language} has no scoring table"
            )));
        }
        for (from, to) in &file.fallbacks {
            if !tables.contains_key(to) {
                return Err(Error::config(format!(
                    "fallback {from} -> {to} points to a missing table"
                )));
            }
        }

        debug!(languages = tables.len(), "Loaded scoring tables");
        Ok(Self {
            tables,
            fallbacks: file.fallbacks,
            default_language: default_language.to_string(),
        })
    }

    /// Table code for a post language, following fallbacks.
    fn resolve_hint(&self, hint: &str) -> Option<&str> {
        let primary = hint
            .split(['-', '_'])
            .next()
            .unwrap_or(hint)
            .to_lowercase();
        if let Some((code, _)) = self.tables.get_key_value(&primary) {
            return Some(code.as_str());
        }
        self.fallbacks.get(&primary).map(String::as_str)
    }

    fn coverage(&self, code: &str, letters: &[char]) -> usize {
        self.tables
            .get(code)
            .map(|table| letters.iter().filter(|c| table.values.contains_key(c)).count())
            .unwrap_or(0)
    }
}

impl Scorer for TableScorer {
    fn score(&self, word: &str, language_hint: Option<&str>) -> std::result::Result<Score, ScoreError> {
        if !is_valid_word(word) {
            return Err(ScoreError::InvalidCharacters);
        }

        let letters: Vec<char> = word
            .chars()
            .filter(|c| c.is_alphabetic())
            .flat_map(char::to_uppercase)
            .collect();
        if letters.is_empty() {
            return Err(ScoreError::InvalidCharacters);
        }
        let majority = |covered: usize| covered * 2 > letters.len();

        let hinted = language_hint
            .and_then(|hint| self.resolve_hint(hint))
            .filter(|code| majority(self.coverage(code, &letters)));

        let language = match hinted {
            Some(code) => code,
            None => {
                let (code, covered) = self
                    .tables
                    .keys()
                    .map(|code| (code.as_str(), self.coverage(code, &letters)))
                    .max_by(|(a, ca), (b, cb)| {
                        ca.cmp(cb)
                            .then_with(|| {
                                (*a == self.default_language).cmp(&(*b == self.default_language))
                            })
                            .then_with(|| b.cmp(a))
                    })
                    .ok_or(ScoreError::UnsupportedLanguage)?;
                if !majority(covered) {
                    return Err(ScoreError::UnsupportedLanguage);
                }
                code
            }
        };

        let values = &self.tables[language].values;
        let points = letters.iter().filter_map(|c| values.get(c)).sum();
        Ok(Score {
            points,
            language: language.to_string(),
        })
    }

    fn supported_languages(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    fn language_name(&self, code: &str, locale: &str) -> String {
        self.tables
            .get(code)
            .and_then(|table| table.names.get(locale).or_else(|| table.names.get("en")))
            .cloned()
            .unwrap_or_else(|| code.to_string())
    }
}
