//! Keyword variations tried by each backend.

use std::collections::HashSet;

/// Base keywords first, then every keyword combined with every suffix.
///
/// Blank keywords are dropped and duplicates are removed, keeping the
/// first occurrence.
pub fn generate_variations(keywords: &[String], suffixes: &[String]) -> Vec<String> {
    let bases: Vec<&str> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect();

    let mut seen = HashSet::new();
    let mut variations = Vec::new();

    let combined = suffixes
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .flat_map(|suffix| bases.iter().map(move |base| format!("{} {}", base, suffix)));

    for variation in bases.iter().map(|b| b.to_string()).chain(combined) {
        if seen.insert(variation.to_lowercase()) {
            variations.push(variation);
        }
    }

    variations
}
