//! Path resolution against the virtual root.
//!
//! Module paths are POSIX-style and relative to the virtual root. Resolution
//! is a pure string transform: no filesystem or network access.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while normalizing or resolving module paths.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("specifier '{specifier}' is not relative (expected './' or '../')")]
    NotRelative { specifier: String },

    #[error("'{specifier}' from '{from}' ascends above the virtual root")]
    EscapesRoot { from: String, specifier: String },

    #[error("'{raw}' does not name a module")]
    Empty { raw: String },

    #[error("absolute module path '{raw}' is not allowed")]
    Absolute { raw: String },
}

/// A normalized module path such as `src/app.js`.
///
/// Never contains `.` or `..` segments, never starts with `/`, never empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModulePath(String);

impl ModulePath {
    /// Normalize a configured path. A leading `./` is accepted.
    pub fn parse(raw: &str) -> Result<Self, ResolveError> {
        if raw.starts_with('/') {
            return Err(ResolveError::Absolute { raw: raw.into() });
        }
        let mut segments = Vec::new();
        push_segments(&mut segments, raw).map_err(|()| ResolveError::EscapesRoot {
            from: String::new(),
            specifier: raw.into(),
        })?;
        if segments.is_empty() {
            return Err(ResolveError::Empty { raw: raw.into() });
        }
        Ok(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The directory portion, without a trailing slash. Empty at the root.
    pub fn dir(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[..idx],
            None => "",
        }
    }

    /// The final path segment.
    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ModulePath {
    type Error = ResolveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ModulePath> for String {
    fn from(value: ModulePath) -> Self {
        value.0
    }
}

/// Whether a specifier is relative (`./` or `../`).
pub fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../")
}

/// Resolve a relative specifier against the module that contains it.
///
/// Ascending past the virtual root is an error, never clamped.
pub fn resolve(from: &ModulePath, specifier: &str) -> Result<ModulePath, ResolveError> {
    if !is_relative(specifier) {
        return Err(ResolveError::NotRelative {
            specifier: specifier.into(),
        });
    }

    let mut segments: Vec<&str> = from
        .dir()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    push_segments(&mut segments, specifier).map_err(|()| ResolveError::EscapesRoot {
        from: from.to_string(),
        specifier: specifier.into(),
    })?;

    if segments.is_empty() {
        return Err(ResolveError::Empty {
            raw: specifier.into(),
        });
    }
    Ok(ModulePath(segments.join("/")))
}

fn push_segments<'a>(segments: &mut Vec<&'a str>, path: &'a str) -> Result<(), ()> {
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop().ok_or(())?;
            }
            other => segments.push(other),
        }
    }
    Ok(())
}
