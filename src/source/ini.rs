//! Minimal INI reader for data-vault sidecar headers and `session.ini`
//!
//! Follows the subset of Python `configparser` the legacy data vault emits:
//! `[Section]` headers, `key = value` or `key: value` pairs, `#`/`;` full-line
//! comments, and indented continuation lines joined with `\n`. Keys are
//! lowercased; section names are case-sensitive.

use std::collections::BTreeMap;

/// Parsed INI document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: Vec<(String, BTreeMap<String, String>)>,
}

impl IniDocument {
    /// Parse INI text
    ///
    /// # Errors
    /// Returns a human-readable reason on duplicate sections, keys outside a
    /// section, or lines that are neither headers, comments nor pairs
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut sections: Vec<(String, BTreeMap<String, String>)> = Vec::new();
        let mut last_key: Option<String> = None;

        for (index, raw) in text.lines().enumerate() {
            let lineno = index + 1;
            let trimmed = raw.trim();

            if trimmed.is_empty() {
                last_key = None;
                continue;
            }
            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            let indented = raw.starts_with([' ', '\t']);
            if indented {
                if let (Some(key), Some((_, entries))) = (&last_key, sections.last_mut()) {
                    if let Some(value) = entries.get_mut(key) {
                        if !value.is_empty() {
                            value.push('\n');
                        }
                        value.push_str(trimmed);
                        continue;
                    }
                }
            }

            if let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                let name = name.trim().to_string();
                if sections.iter().any(|(existing, _)| *existing == name) {
                    return Err(format!("line {lineno}: duplicate section [{name}]"));
                }
                sections.push((name, BTreeMap::new()));
                last_key = None;
                continue;
            }

            let Some(split) = trimmed.find(['=', ':']) else {
                return Err(format!("line {lineno}: expected `key = value`, got {trimmed:?}"));
            };
            let key = trimmed[..split].trim().to_lowercase();
            let value = trimmed[split + 1..].trim().to_string();
            if key.is_empty() {
                return Err(format!("line {lineno}: empty key"));
            }
            let Some((_, entries)) = sections.last_mut() else {
                return Err(format!("line {lineno}: key {key:?} outside of any section"));
            };
            entries.insert(key.clone(), value);
            last_key = Some(key);
        }

        Ok(Self { sections })
    }

    /// Look up a whole section
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.sections
            .iter()
            .find(|(section, _)| section == name)
            .map(|(_, entries)| entries)
    }

    /// Look up a single value; `key` is matched case-insensitively
    #[must_use]
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?
            .get(&key.to_lowercase())
            .map(String::as_str)
    }
}
