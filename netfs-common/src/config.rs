//! Sectioned INI-style configuration files
//!
//! netfs's `serve-conf`/`proxy-conf` CLI subcommands read a small
//! hand-rolled config format: `[section]` headers (`[server]`,
//! `[server-<name>]`, `[proxy]`) followed by `key = value` lines. There is
//! no nesting, no multi-line values, and no escaping beyond trimming
//! whitespace around `=`, which is why it's a thin parser here rather than
//! a pull in a full-blown config crate: nothing else in the stack needs
//! sections at all.

use std::collections::BTreeMap;
use std::fmt;

/// A parsed config file: an ordered map from section name to its key/value
/// pairs, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniFile {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

/// Error parsing a sectioned config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A `key = value` line appeared before any `[section]` header.
    KeyOutsideSection(usize),
    /// A non-blank, non-comment line was neither a section header nor `key = value`.
    Malformed(usize),
    /// The requested section does not exist in the file.
    MissingSection(String),
    /// The requested key does not exist in its section.
    MissingKey { section: String, key: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyOutsideSection(line) => {
                write!(f, "line {line}: key=value outside of any [section]")
            }
            Self::Malformed(line) => write!(f, "line {line}: malformed config line"),
            Self::MissingSection(s) => write!(f, "missing section [{s}]"),
            Self::MissingKey { section, key } => {
                write!(f, "missing key '{key}' in section [{section}]")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl IniFile {
    /// Parse a config file's contents.
    ///
    /// Blank lines and lines starting with `#` or `;` are ignored. A line of
    /// the form `[name]` opens a new section; `key = value` assigns within
    /// the current section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::KeyOutsideSection`] or [`ConfigError::Malformed`]
    /// describing the offending line (1-indexed).
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut current: Option<String> = None;

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                let name = name.trim().to_string();
                sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::Malformed(line_no));
            };
            let Some(section) = current.as_ref() else {
                return Err(ConfigError::KeyOutsideSection(line_no));
            };
            sections
                .get_mut(section)
                .expect("section was inserted when opened")
                .insert(key.trim().to_string(), value.trim().to_string());
        }

        Ok(Self { sections })
    }

    /// Whether the file defines a section with this name.
    #[must_use]
    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    /// Names of every section, in alphabetical order (the scan order of the
    /// underlying map; config files are small enough that this doesn't
    /// matter in practice).
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Fetch a key from a section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSection`] or [`ConfigError::MissingKey`].
    pub fn get(&self, section: &str, key: &str) -> Result<&str, ConfigError> {
        let entries = self
            .sections
            .get(section)
            .ok_or_else(|| ConfigError::MissingSection(section.to_string()))?;
        entries
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingKey {
                section: section.to_string(),
                key: key.to_string(),
            })
    }

    /// Fetch a key from a section, falling back to `default` if either the
    /// section or the key is absent.
    #[must_use]
    pub fn get_or<'a>(&'a self, section: &str, key: &str, default: &'a str) -> &'a str {
        self.get(section, key).unwrap_or(default)
    }
}

/// Parse the `backends` key of a `[proxy]` section: a comma-separated list
/// of `host:port` pairs.
///
/// # Errors
///
/// Returns a descriptive string if any entry is not `host:port` with a
/// numeric port.
pub fn parse_backend_list(value: &str) -> Result<Vec<(String, u16)>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (host, port) = entry
                .rsplit_once(':')
                .ok_or_else(|| format!("backend '{entry}' is not in host:port form"))?;
            let port: u16 = port
                .parse()
                .map_err(|_| format!("backend '{entry}' has a non-numeric port"))?;
            Ok((host.to_string(), port))
        })
        .collect()
}
