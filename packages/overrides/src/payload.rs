//! Override payloads: the wire shape of request, configuration and service
//! overrides.
//!
//! ```json
//! {
//!     "fun1": "input.a.len()",
//!     "checksum": { "source": "(module ...)", "language": "wasm" }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{OverrideError, Result};
use crate::fragment::Language;

/// One payload entry: bare source (Rhai) or source plus language.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadEntry {
    Source(String),
    Detailed {
        source: String,
        #[serde(default)]
        language: Language,
    },
}

impl PayloadEntry {
    pub fn source(&self) -> &str {
        match self {
            PayloadEntry::Source(source) => source,
            PayloadEntry::Detailed { source, .. } => source,
        }
    }

    pub fn language(&self) -> Language {
        match self {
            PayloadEntry::Source(_) => Language::Rhai,
            PayloadEntry::Detailed { language, .. } => *language,
        }
    }
}

/// Mapping from extension point name to fragment source.
///
/// An absent payload and an empty one mean the same thing: no overrides at
/// this scope.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverridePayload {
    entries: BTreeMap<String, PayloadEntry>,
}

impl OverridePayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| OverrideError::InvalidPayload {
            message: e.to_string(),
        })
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Add a Rhai fragment.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(name, PayloadEntry::Source(source.into()));
        self
    }

    /// Add a fragment in an explicit language.
    #[must_use]
    pub fn with_language(
        mut self,
        name: impl Into<String>,
        source: impl Into<String>,
        language: Language,
    ) -> Self {
        self.insert(
            name,
            PayloadEntry::Detailed {
                source: source.into(),
                language,
            },
        );
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: PayloadEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&PayloadEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PayloadEntry)> {
        self.entries.iter()
    }

    /// Content digest, stable across entry insertion order.
    pub fn digest(&self) -> String {
        digest_entries(
            self.entries
                .iter()
                .map(|(name, entry)| (name.as_str(), entry.language(), entry.source())),
        )
    }
}

/// Digest of `(name, language, source)` triples. Callers pass them sorted by
/// name so that a payload and the set built from it agree.
pub(crate) fn digest_entries<'a>(
    entries: impl IntoIterator<Item = (&'a str, Language, &'a str)>,
) -> String {
    let mut hasher = Sha256::new();
    for (name, language, source) in entries {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(language.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(source.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

impl FromIterator<(String, PayloadEntry)> for OverridePayload {
    fn from_iter<I: IntoIterator<Item = (String, PayloadEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
