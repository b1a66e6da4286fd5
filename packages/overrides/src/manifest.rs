//! Extension point declarations.

use std::collections::HashMap;

use hotmod_state::Capability;
use serde::{Deserialize, Serialize};

use crate::error::{OverrideError, Result};

/// A named location in host logic that may be overridden.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionPoint {
    pub name: String,
    /// Number of arguments host code passes at this point.
    pub arity: usize,
    /// State the fragments bound here may reach.
    #[serde(default)]
    pub state: Capability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ExtensionPoint {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
            state: Capability::none(),
            description: None,
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: Capability) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Deserialize, Serialize)]
struct ManifestFile {
    extension_points: Vec<ExtensionPoint>,
}

/// The static set of extension points a service exposes.
///
/// Built once at startup and shared (behind an `Arc`) by every scope chain.
#[derive(Clone, Debug, Default)]
pub struct Manifest {
    points: HashMap<String, ExtensionPoint>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manifest from a list of declarations.
    pub fn from_points(points: impl IntoIterator<Item = ExtensionPoint>) -> Result<Self> {
        let mut manifest = Self::new();
        for point in points {
            manifest.declare(point)?;
        }
        Ok(manifest)
    }

    /// Parse `{ "extension_points": [...] }`.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: ManifestFile =
            serde_json::from_str(text).map_err(|e| OverrideError::InvalidManifest {
                message: e.to_string(),
            })?;
        Self::from_points(file.extension_points)
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> String {
        let mut extension_points: Vec<_> = self.points.values().cloned().collect();
        extension_points.sort_by(|a, b| a.name.cmp(&b.name));
        serde_json::to_string_pretty(&ManifestFile { extension_points })
            .unwrap_or_else(|_| "{}".to_string())
    }

    /// Add a declaration. Names must be unique and non-empty.
    pub fn declare(&mut self, point: ExtensionPoint) -> Result<()> {
        if point.name.trim().is_empty() {
            return Err(OverrideError::InvalidManifest {
                message: "extension point name must not be empty".to_string(),
            });
        }
        if self.points.contains_key(&point.name) {
            return Err(OverrideError::DuplicateExtensionPoint { name: point.name });
        }
        self.points.insert(point.name.clone(), point);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ExtensionPoint> {
        self.points.get(name)
    }

    /// Like `get`, but an unknown name is an error.
    pub fn require(&self, name: &str) -> Result<&ExtensionPoint> {
        self.get(name).ok_or_else(|| OverrideError::undeclared(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.points.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = &ExtensionPoint> {
        self.points.values()
    }
}
