//! Per-folder session index (`session.ini`)
//!
//! The data vault stores user tags in `[Tags] datasets`, a Python literal
//! mapping dataset names to tag sets:
//!
//! ```text
//! [Tags]
//! datasets = {'00001 - rabi': {'star'}, '00002 - t1': set(['trash', 'star'])}
//! ```
//!
//! Dataset names are truncated to their five-digit run number.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;

use super::ini::IniDocument;
use crate::{Error, Result};

/// File name of the session index inside an experiment folder
pub const SESSION_FILE_NAME: &str = "session.ini";

/// Tag marking a starred run
pub const STAR_TAG: &str = "star";

/// Tag marking a trashed run
pub const TRASH_TAG: &str = "trash";

/// Run tags keyed by run number
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIndex {
    entries: BTreeMap<u32, BTreeSet<String>>,
}

impl SessionIndex {
    /// Create an empty index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `session.ini` from an experiment folder; a missing file is an empty index
    ///
    /// # Errors
    /// `UnreadableSource` on IO failure, `MalformedSource` if the file cannot be parsed
    pub fn load(experiment_dir: &Path) -> Result<Self> {
        let path = experiment_dir.join(SESSION_FILE_NAME);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(Error::unreadable(&path, e)),
        };
        let text = String::from_utf8(bytes).map_err(|e| Error::malformed(&path, e.to_string()))?;
        Self::parse(&text).map_err(|reason| Error::malformed(&path, reason))
    }

    /// Parse session index text
    ///
    /// # Errors
    /// Returns the reason the INI or the `datasets` literal is invalid
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let doc = IniDocument::parse(text)?;
        let mut index = Self::new();
        let Some(datasets) = doc.get("Tags", "datasets") else {
            return Ok(index);
        };

        for (name, tags) in LiteralParser::new(datasets).parse_datasets()? {
            let Some(number) = name
                .get(..5)
                .filter(|prefix| prefix.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|prefix| prefix.parse::<u32>().ok())
            else {
                continue;
            };
            index.entries.entry(number).or_default().extend(tags);
        }
        Ok(index)
    }

    /// Add tags for a run
    #[must_use]
    pub fn with_tags<I, S>(mut self, run: u32, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries
            .entry(run)
            .or_default()
            .extend(tags.into_iter().map(Into::into));
        self
    }

    /// All tags recorded for a run
    #[must_use]
    pub fn tags(&self, run: u32) -> Option<&BTreeSet<String>> {
        self.entries.get(&run)
    }

    /// Whether the run carries the `star` tag
    #[must_use]
    pub fn is_starred(&self, run: u32) -> bool {
        self.has_tag(run, STAR_TAG)
    }

    /// Whether the run carries the `trash` tag
    #[must_use]
    pub fn is_trashed(&self, run: u32) -> bool {
        self.has_tag(run, TRASH_TAG)
    }

    /// Number of runs with an entry
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no run has an entry
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn has_tag(&self, run: u32, tag: &str) -> bool {
        self.entries.get(&run).is_some_and(|tags| tags.contains(tag))
    }
}

/// Parser for the Python literal subset the data vault writes
struct LiteralParser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> LiteralParser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
        }
    }

    /// `{ name: collection, ... }`
    fn parse_datasets(mut self) -> std::result::Result<Vec<(String, Vec<String>)>, String> {
        let mut entries = Vec::new();
        self.expect('{')?;
        loop {
            self.skip_ws();
            if self.chars.peek() == Some(&'}') {
                self.chars.next();
                break;
            }
            let name = self.parse_string()?;
            self.skip_ws();
            self.expect(':')?;
            let tags = self.parse_collection()?;
            entries.push((name, tags));
            self.skip_ws();
            match self.chars.next() {
                Some(',') => {}
                Some('}') => break,
                other => return Err(format!("expected `,` or `}}` in datasets, found {other:?}")),
            }
        }
        self.skip_ws();
        if let Some(c) = self.chars.next() {
            return Err(format!("trailing input after datasets: {c:?}"));
        }
        Ok(entries)
    }

    /// `{...}`, `[...]`, `(...)`, `set()`, `set([...])`, `frozenset(...)`
    fn parse_collection(&mut self) -> std::result::Result<Vec<String>, String> {
        self.skip_ws();
        match self.chars.peek().copied() {
            Some('{') => self.parse_items('{', '}'),
            Some('[') => self.parse_items('[', ']'),
            Some('(') => self.parse_items('(', ')'),
            Some(c) if c.is_ascii_alphabetic() => {
                let ident = self.parse_ident();
                if ident != "set" && ident != "frozenset" {
                    return Err(format!("unsupported constructor {ident:?}"));
                }
                self.skip_ws();
                self.expect('(')?;
                self.skip_ws();
                let items = if self.chars.peek() == Some(&')') {
                    Vec::new()
                } else {
                    self.parse_collection()?
                };
                self.skip_ws();
                self.expect(')')?;
                Ok(items)
            }
            other => Err(format!("expected a tag collection, found {other:?}")),
        }
    }

    fn parse_items(&mut self, open: char, close: char) -> std::result::Result<Vec<String>, String> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.chars.peek() == Some(&close) {
                self.chars.next();
                return Ok(items);
            }
            items.push(self.parse_string()?);
            self.skip_ws();
            match self.chars.next() {
                Some(',') => {}
                Some(c) if c == close => return Ok(items),
                other => return Err(format!("expected `,` or `{close}`, found {other:?}")),
            }
        }
    }

    /// Single- or double-quoted string, with an optional `u`/`b`/`r` prefix
    fn parse_string(&mut self) -> std::result::Result<String, String> {
        self.skip_ws();
        if matches!(self.chars.peek(), Some('u' | 'U' | 'b' | 'B' | 'r' | 'R')) {
            self.chars.next();
        }
        let quote = match self.chars.next() {
            Some(q @ ('\'' | '"')) => q,
            other => return Err(format!("expected a quoted string, found {other:?}")),
        };
        let mut out = String::new();
        loop {
            match self.chars.next() {
                None => return Err("unterminated string".to_string()),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err("unterminated escape".to_string()),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(&c) = self.chars.peek() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            ident.push(c);
            self.chars.next();
        }
        ident
    }

    fn expect(&mut self, want: char) -> std::result::Result<(), String> {
        self.skip_ws();
        match self.chars.next() {
            Some(c) if c == want => Ok(()),
            other => Err(format!("expected `{want}`, found {other:?}")),
        }
    }

    fn skip_ws(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }
}
