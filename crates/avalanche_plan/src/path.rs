//! Data paths identifying objects in the event and conditions stores.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

static PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(/[A-Za-z0-9_.:\-]+)+$").expect("data path pattern is a valid regex")
});

/// Root under which event data lives
pub const EVENT_ROOT: &str = "/Event";

/// Root under which conditions data lives
pub const CONDITIONS_ROOT: &str = "/Conditions";

/// Validated store path such as `/Event/Tracks`
///
/// Paths are validated once at configuration time. Relative paths
/// (`Tracks`, `Rec/Tracks`) are rooted under [`EVENT_ROOT`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataPath(Arc<str>);

impl DataPath {
    /// Parse and normalize a path
    ///
    /// # Errors
    ///
    /// Returns the offending input if it contains empty segments or
    /// characters outside `[A-Za-z0-9_.:-]`
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim().trim_end_matches('/');
        let rooted = if is_under(trimmed, EVENT_ROOT) || is_under(trimmed, CONDITIONS_ROOT) {
            trimmed.to_string()
        } else {
            format!("{}/{}", EVENT_ROOT, trimmed.trim_start_matches('/'))
        };
        if !PATH_RE.is_match(&rooted) {
            return Err(format!("invalid data path '{}'", raw));
        }
        Ok(Self(Arc::from(rooted)))
    }

    /// Path as string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the path lives in the conditions store
    #[must_use]
    pub fn is_conditions(&self) -> bool {
        is_under(&self.0, CONDITIONS_ROOT)
    }
}

fn is_under(path: &str, root: &str) -> bool {
    path == root || path.strip_prefix(root).is_some_and(|rest| rest.starts_with('/'))
}

impl TryFrom<String> for DataPath {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for DataPath {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DataPath> for String {
    fn from(value: DataPath) -> Self {
        value.0.to_string()
    }
}

impl std::fmt::Display for DataPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DataPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
