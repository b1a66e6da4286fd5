//! Override fragments and the scopes they come from.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Breadth of requests an override applies to.
///
/// The declaration order is the precedence order: a Request override beats
/// a Configuration override, which beats a Service override.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Request,
    Configuration,
    Service,
}

impl Scope {
    /// All scopes, most specific first.
    pub const ALL: [Scope; 3] = [Scope::Request, Scope::Configuration, Scope::Service];

    pub(crate) fn index(self) -> usize {
        match self {
            Scope::Request => 0,
            Scope::Configuration => 1,
            Scope::Service => 2,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Request => write!(f, "request"),
            Scope::Configuration => write!(f, "configuration"),
            Scope::Service => write!(f, "service"),
        }
    }
}

/// Language a fragment's source is written in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// Rhai script body.
    #[default]
    Rhai,
    /// WebAssembly module, text or binary, exporting `run`.
    Wasm,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Rhai => write!(f, "rhai"),
            Language::Wasm => write!(f, "wasm"),
        }
    }
}

/// Cache key of a fragment's compiled form.
///
/// Derived from language and source only, so identical fragments from
/// different scopes or sets share one compiled executable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentKey(String);

impl FragmentKey {
    pub fn compute(language: Language, source: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(language.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(source.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source text bound to one extension point, plus metadata.
///
/// Immutable once built; editing a fragment means building a new one.
#[derive(Clone, Debug)]
pub struct OverrideFragment {
    point: String,
    source: Arc<str>,
    language: Language,
    origin: Scope,
    key: FragmentKey,
    created_at: DateTime<Utc>,
}

impl OverrideFragment {
    pub fn new(
        point: impl Into<String>,
        source: impl Into<Arc<str>>,
        language: Language,
        origin: Scope,
    ) -> Self {
        let source = source.into();
        Self {
            point: point.into(),
            key: FragmentKey::compute(language, &source),
            source,
            language,
            origin,
            created_at: Utc::now(),
        }
    }

    /// Name of the extension point this fragment overrides.
    pub fn point(&self) -> &str {
        &self.point
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn origin(&self) -> Scope {
        self.origin
    }

    pub fn key(&self) -> &FragmentKey {
        &self.key
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
