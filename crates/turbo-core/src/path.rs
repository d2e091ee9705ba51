//! # Path
//!
//! Normalized, absolute address of a location in the store tree.
//!
//! ## Normal Form
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Path Normalization                               │
//! │                                                                         │
//! │  input                normalized        name()                          │
//! │  ───────────────────  ────────────────  ──────                          │
//! │  ""                   /                 /                               │
//! │  "/"                  /                 /                               │
//! │  "users"              /users            users                           │
//! │  "//users///ada/"     /users/ada        ada                             │
//! │                                                                         │
//! │  Derivation from /users/ada:                                           │
//! │    child("posts/1")   /users/ada/posts/1                               │
//! │    child("")          /users/ada        (unchanged)                    │
//! │    parent()           /users                                            │
//! │    Path::root()       /                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two paths are equal iff their normalized strings are equal, so `Path`
//! derives its comparisons from the inner string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::validation::{validate_segment, SEPARATOR};

/// The root marker, used both as the root path and as its name.
pub const ROOT: &str = "/";

/// An immutable, normalized store path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path(String);

impl Path {
    /// Parses and normalizes a path string.
    ///
    /// Repeated separators collapse and a trailing separator is dropped.
    /// A missing leading separator is implied.
    ///
    /// ## Example
    /// ```rust
    /// use turbo_core::Path;
    ///
    /// let path = Path::new("users//ada/").unwrap();
    /// assert_eq!(path.to_string(), "/users/ada");
    /// assert!(Path::new("/users/../admin").is_err());
    /// ```
    pub fn new(raw: &str) -> CoreResult<Self> {
        let segments = split(raw)?;
        Ok(Self::from_segments(&segments))
    }

    /// The root path `/`.
    pub fn root() -> Self {
        Path(ROOT.to_string())
    }

    fn from_segments<S: AsRef<str>>(segments: &[S]) -> Self {
        if segments.is_empty() {
            return Self::root();
        }

        let mut normalized = String::new();
        for segment in segments {
            normalized.push(SEPARATOR);
            normalized.push_str(segment.as_ref());
        }
        Path(normalized)
    }

    /// Appends a relative path.
    ///
    /// An empty argument returns the same path. One leading separator is
    /// stripped, so `child("/a")` and `child("a")` are the same.
    pub fn child(&self, relative: &str) -> CoreResult<Path> {
        if relative.is_empty() {
            return Ok(self.clone());
        }

        let relative = relative.strip_prefix(SEPARATOR).unwrap_or(relative);
        let extra = split(relative)?;
        if extra.is_empty() {
            return Ok(self.clone());
        }

        let mut segments: Vec<&str> = self.segments().collect();
        segments.extend(extra);
        Ok(Self::from_segments(&segments))
    }

    /// The enclosing path. The root is its own parent.
    pub fn parent(&self) -> Path {
        match self.0.rfind(SEPARATOR) {
            Some(0) | None => Self::root(),
            Some(idx) => Path(self.0[..idx].to_string()),
        }
    }

    /// The last segment, or `/` at the root.
    pub fn name(&self) -> &str {
        if self.is_root() {
            return ROOT;
        }
        self.segments().last().unwrap_or(ROOT)
    }

    /// Returns true for `/`.
    pub fn is_root(&self) -> bool {
        self.0 == ROOT
    }

    /// Number of segments below the root.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Iterates the segments from the root down.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR).filter(|s| !s.is_empty())
    }

    /// Returns true if `self` lies strictly above `other`.
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        if self.is_root() {
            return !other.is_root();
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0[self.0.len()..].starts_with(SEPARATOR)
    }

    /// `other` expressed relative to `self`, if `self` is an ancestor.
    pub fn relative_to<'a>(&self, other: &'a Path) -> Option<&'a str> {
        if !self.is_ancestor_of(other) {
            return None;
        }
        let offset = if self.is_root() { 1 } else { self.0.len() + 1 };
        Some(&other.0[offset..])
    }

    /// The normalized string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Splits on the separator, dropping empty segments and validating the rest.
fn split(raw: &str) -> CoreResult<Vec<&str>> {
    raw.split(SEPARATOR)
        .filter(|s| !s.is_empty())
        .map(|segment| validate_segment(segment, raw).map(|_| segment))
        .collect()
}

impl Default for Path {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Path {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::new(s)
    }
}

impl TryFrom<String> for Path {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Path::new(&value)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.0
    }
}

impl AsRef<str> for Path {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
