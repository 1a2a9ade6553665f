//! Persisted template manifest
//!
//! A flat JSON object keyed by qualified id. Keys starting with `_` are
//! reserved (`_meta`) and never treated as templates.

use super::metadata::TemplateStatus;
use crate::error::GovResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

pub const META_KEY: &str = "_meta";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(default)]
    pub template_id: String,
    /// Kept raw so a malformed version is reported, not a load failure
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub spec_hash: String,
    #[serde(default)]
    pub code_hash: String,
    #[serde(default)]
    pub deps_hash: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Free-form names; capability policy is checked on live specs
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub frozen: bool,
    #[serde(default)]
    pub status: TemplateStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestMeta {
    pub generated_at: String,
    pub generator: String,
    pub version: String,
}

impl ManifestMeta {
    pub fn now() -> Self {
        Self {
            generated_at: Utc::now().to_rfc3339(),
            generator: format!("{} gen-manifest", env!("CARGO_PKG_NAME")),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub entries: BTreeMap<String, ManifestEntry>,
    pub meta: Option<ManifestMeta>,
}

impl Manifest {
    pub fn from_value(value: Value) -> GovResult<Self> {
        let Value::Object(map) = value else {
            return Err(crate::error::validation_error(
                "manifest must be a JSON object keyed by qualified id",
            ));
        };

        let mut manifest = Manifest::default();
        for (key, value) in map {
            if key == META_KEY {
                manifest.meta = serde_json::from_value(value).ok();
                continue;
            }
            if key.starts_with('_') {
                continue;
            }
            manifest.entries.insert(key, serde_json::from_value(value)?);
        }
        Ok(manifest)
    }

    pub fn from_json(text: &str) -> GovResult<Self> {
        Self::from_value(serde_json::from_str(text)?)
    }

    /// Load from disk. A missing file yields `None` so callers can note it.
    pub fn load(path: &Path) -> GovResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        Ok(Some(Self::from_json(&text)?))
    }

    pub fn to_value(&self) -> GovResult<Value> {
        let mut map = Map::new();
        for (qid, entry) in &self.entries {
            map.insert(qid.clone(), serde_json::to_value(entry)?);
        }
        if let Some(meta) = &self.meta {
            map.insert(META_KEY.to_string(), serde_json::to_value(meta)?);
        }
        Ok(Value::Object(map))
    }

    /// Pretty JSON with sorted keys
    pub fn to_json(&self) -> GovResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_value()?)?)
    }

    pub fn write(&self, path: &Path) -> GovResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_json()? + "\n")?;
        info!("Manifest written to {}", path.display());
        Ok(())
    }

    pub fn get(&self, qid: &str) -> Option<&ManifestEntry> {
        self.entries.get(qid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
