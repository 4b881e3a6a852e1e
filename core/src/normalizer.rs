//! Identifier normalization.
//!
//! RULE: the same function cleans incoming candidates AND values read
//! back from the store. Comparing a cleaned value against an uncleaned
//! one silently produces false "missing" results.

/// Zero-width and invisible code points stripped from identifiers.
pub const INVISIBLE_CHARS: [char; 4] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}'];

/// Map a raw field value to its canonical form: lower-cased, with all
/// whitespace and invisible characters removed.
///
/// Idempotent. Never fails; a value that cleans down to nothing yields
/// the empty string and callers must filter it out.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !INVISIBLE_CHARS.contains(c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Like [`normalize`], for a possibly-missing value.
pub fn normalize_opt(raw: Option<&str>) -> String {
    raw.map(normalize).unwrap_or_default()
}
