//! Canonical state (ADM1) names.
//!
//! Different providers spell states differently ("Estado de México" vs
//! "Mexico", "Distrito Federal" vs "Ciudad de México"). Joins between
//! state-level and unit-level data go through [`Adm1Canonicalizer`], which
//! folds accents, normalizes case and spacing, and then applies the
//! profile's alias table.

use std::collections::BTreeMap;

use unicode_normalization::UnicodeNormalization as _;
use unicode_normalization::char::is_combining_mark;

/// Strips diacritics (`"Querétaro"` → `"Queretaro"`).
#[must_use]
pub fn fold_accents(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Capitalizes each whitespace-separated word and lowercases the rest,
/// collapsing runs of whitespace.
#[must_use]
pub fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Maps state names from any provider onto one join key.
#[derive(Debug, Clone, Default)]
pub struct Adm1Canonicalizer {
    aliases: BTreeMap<String, String>,
}

impl Adm1Canonicalizer {
    /// Builds a canonicalizer. Alias keys and values are themselves
    /// normalized, so the table can be written in any spelling.
    #[must_use]
    pub fn new(aliases: &BTreeMap<String, String>) -> Self {
        Self {
            aliases: aliases
                .iter()
                .map(|(from, to)| (normalize(from), normalize(to)))
                .collect(),
        }
    }

    /// The join key for a state name.
    #[must_use]
    pub fn canonical(&self, name: &str) -> String {
        let key = normalize(name);
        self.aliases.get(&key).cloned().unwrap_or(key)
    }
}

fn normalize(name: &str) -> String {
    title_case(&fold_accents(name.trim()))
}
