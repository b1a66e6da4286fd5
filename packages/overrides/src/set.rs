//! Override sets and their builder.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::fragment::{Language, OverrideFragment, Scope};
use crate::manifest::Manifest;
use crate::payload::{digest_entries, OverridePayload};

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

/// Identity of one published override set.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SetTag {
    pub id: Uuid,
    /// Process-wide monotonic counter; later sets carry larger versions.
    pub version: u64,
    /// Content digest of the set's fragments.
    pub digest: String,
    pub created_at: DateTime<Utc>,
}

impl SetTag {
    fn next(digest: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
            digest,
            created_at: Utc::now(),
        }
    }
}

impl fmt::Display for SetTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}:{}", self.version, &self.digest[..8.min(self.digest.len())])
    }
}

/// Immutable mapping from extension point name to fragment for one scope.
#[derive(Debug)]
pub struct OverrideSet {
    scope: Scope,
    tag: SetTag,
    fragments: HashMap<String, Arc<OverrideFragment>>,
}

impl OverrideSet {
    /// A set with no overrides.
    pub fn empty(scope: Scope) -> Self {
        Self {
            scope,
            tag: SetTag::next(digest_entries([])),
            fragments: HashMap::new(),
        }
    }

    pub fn builder(scope: Scope, manifest: &Manifest) -> OverrideSetBuilder<'_> {
        OverrideSetBuilder::new(scope, manifest)
    }

    /// Validate every payload name against the manifest and build the set.
    pub fn from_payload(
        scope: Scope,
        payload: &OverridePayload,
        manifest: &Manifest,
    ) -> Result<Self> {
        let mut builder = Self::builder(scope, manifest);
        for (name, entry) in payload.iter() {
            builder.put(name, entry.source(), entry.language())?;
        }
        Ok(builder.build())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<OverrideFragment>> {
        self.fragments.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fragments.contains_key(name)
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn tag(&self) -> &SetTag {
        &self.tag
    }

    pub fn digest(&self) -> &str {
        &self.tag.digest
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Names with an override in this set, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.fragments.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<OverrideFragment>)> {
        self.fragments.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Accumulates fragments for a new set; the only way to `put`.
pub struct OverrideSetBuilder<'a> {
    scope: Scope,
    manifest: &'a Manifest,
    fragments: HashMap<String, Arc<OverrideFragment>>,
}

impl<'a> OverrideSetBuilder<'a> {
    pub fn new(scope: Scope, manifest: &'a Manifest) -> Self {
        Self {
            scope,
            manifest,
            fragments: HashMap::new(),
        }
    }

    /// Start from the fragments of an existing set of the same scope.
    pub fn from_set(set: &OverrideSet, manifest: &'a Manifest) -> Self {
        Self {
            scope: set.scope,
            manifest,
            fragments: set.fragments.clone(),
        }
    }

    /// Bind `source` to `name`, replacing any earlier binding.
    pub fn put(
        &mut self,
        name: &str,
        source: impl Into<Arc<str>>,
        language: Language,
    ) -> Result<&mut Self> {
        self.manifest.require(name)?;
        let fragment = OverrideFragment::new(name, source, language, self.scope);
        self.fragments.insert(name.to_string(), Arc::new(fragment));
        Ok(self)
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<OverrideFragment>> {
        self.fragments.remove(name)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn build(self) -> OverrideSet {
        let mut entries: Vec<_> = self.fragments.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let digest = digest_entries(
            entries
                .into_iter()
                .map(|(name, f)| (name.as_str(), f.language(), f.source())),
        );
        OverrideSet {
            scope: self.scope,
            tag: SetTag::next(digest),
            fragments: self.fragments,
        }
    }
}
