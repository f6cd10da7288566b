//! INI-like configuration grammar.
//!
//! The same grammar is used for on-disk configuration files and for the
//! reserved `/.config` entry inside a decoy archive: `;` starts a comment
//! line, `[section]` opens a section, `key=value` pairs belong to the most
//! recent section, and pairs before any header land in the unnamed leading
//! section [`ANONYMOUS_SECTION`]. Values end at the first space or tab.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Name of the unnamed leading section.
pub const ANONYMOUS_SECTION: &str = ".anonymous";

/// A parsed INI document. Sections and keys keep their input order; the
/// first occurrence of a duplicate key wins.
#[derive(Debug, Default, Clone)]
pub struct Ini {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl Ini {
    /// Parse a document from text. The grammar has no hard failures; lines
    /// that fit no production are skipped.
    pub fn parse(text: &str) -> Self {
        let mut doc = Ini::default();
        let mut current = ANONYMOUS_SECTION.to_string();

        for line in text.lines() {
            if line.starts_with(';') {
                continue;
            }
            let bytes = line.as_bytes();
            if bytes.len() > 2 && bytes[0] == b'[' && bytes[bytes.len() - 1] == b']' {
                current = line[1..line.len() - 1].to_string();
                continue;
            }
            let trimmed = line.trim_start_matches([' ', '\t']);
            let Some(eq) = trimmed.find('=') else {
                continue;
            };
            let key = trimmed[..eq]
                .split([' ', '\t'])
                .next()
                .unwrap_or("")
                .to_string();
            let rest = trimmed[eq + 1..].trim_start_matches([' ', '\t']);
            let value = rest.split([' ', '\t']).next().unwrap_or("").to_string();
            if key.is_empty() || value.is_empty() {
                continue;
            }
            doc.insert(&current, key, value);
        }

        doc
    }

    /// Parse a document from raw bytes (in-archive configs are byte blobs).
    pub fn parse_bytes(bytes: &[u8]) -> Self {
        Self::parse(&String::from_utf8_lossy(bytes))
    }

    /// Load and parse a file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| Error::config(format!("{}: {}", path.as_ref().display(), e)))?;
        Ok(Self::parse(&text))
    }

    fn insert(&mut self, section: &str, key: String, value: String) {
        let index = match self.sections.iter().position(|(name, _)| name == section) {
            Some(index) => index,
            None => {
                self.sections.push((section.to_string(), Vec::new()));
                self.sections.len() - 1
            }
        };
        let entries = &mut self.sections[index].1;
        if !entries.iter().any(|(k, _)| *k == key) {
            entries.push((key, value));
        }
    }

    /// Look up a value.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(name, _)| name == section)?
            .1
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All `key=value` pairs of a section, in input order.
    pub fn pairs(&self, section: &str) -> &[(String, String)] {
        self.sections
            .iter()
            .find(|(name, _)| name == section)
            .map(|(_, entries)| entries.as_slice())
            .unwrap_or(&[])
    }

    /// Number of pairs in a section.
    pub fn section_len(&self, section: &str) -> usize {
        self.pairs(section).len()
    }

    /// Collect the values of numbered keys `0`, `1`, ... in a section, in
    /// numeric order, stopping at the first gap.
    pub fn numbered(&self, section: &str) -> Vec<String> {
        let mut values = Vec::new();
        for index in 0.. {
            match self.get(section, &index.to_string()) {
                Some(value) => values.push(value.to_string()),
                None => break,
            }
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_and_comments() {
        let doc = Ini::parse("; banner\ntop=1\n[tls]\nip=0.0.0.0\nport=443\n");
        assert_eq!(doc.get(ANONYMOUS_SECTION, "top"), Some("1"));
        assert_eq!(doc.get("tls", "ip"), Some("0.0.0.0"));
        assert_eq!(doc.get("tls", "port"), Some("443"));
        assert_eq!(doc.get("tls", "banner"), None);
    }

    #[test]
    fn test_value_ends_at_whitespace() {
        let doc = Ini::parse("[main]\nserial=abc123 trailing junk\n");
        assert_eq!(doc.get("main", "serial"), Some("abc123"));
    }

    #[test]
    fn test_first_duplicate_wins() {
        let doc = Ini::parse("[a]\nk=one\nk=two\n");
        assert_eq!(doc.get("a", "k"), Some("one"));
    }

    #[test]
    fn test_numbered_stops_at_gap() {
        let doc = Ini::parse("[index]\n0=index.html\n1=index.htm\n3=skipped\n");
        assert_eq!(doc.numbered("index"), vec!["index.html", "index.htm"]);
    }

    #[test]
    fn test_pairs_keep_order() {
        let doc = Ini::parse("[mime]\ntext/html=html\nimage/png=png\n");
        let pairs = doc.pairs("mime");
        assert_eq!(pairs[0].0, "text/html");
        assert_eq!(pairs[1].0, "image/png");
        assert_eq!(doc.section_len("mime"), 2);
    }
}
