use serde::{Deserialize, Serialize};

/// A single key-value record, as stored in a fragment and streamed to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operand {
    pub key: String,
    pub value: String,
}

impl Operand {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Key interval for iteration. `start` is inclusive, `end` exclusive; either may be open.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyRange {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

impl KeyRange {
    pub fn all() -> Self {
        Self::default()
    }
}

/// One page of a fragment scan. When `after` is set the scan resumes strictly
/// after that key instead of at `range.start`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageRequest {
    pub range: KeyRange,
    #[serde(default)]
    pub after: Option<String>,
    pub limit: usize,
}
