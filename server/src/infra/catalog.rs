//! Distro/release catalog backed by a flat JSON file

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// `{"<distro>": ["<release>", ...]}`, read on every lookup so edits to the
/// file show up without a restart
#[derive(Debug, Clone)]
pub struct Catalog {
    path: PathBuf,
}

impl Catalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Internal(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::Internal(format!("Failed to parse {}: {}", self.path.display(), e))
        })
    }

    pub async fn distros(&self) -> Result<Vec<String>> {
        Ok(self.load().await?.into_keys().collect())
    }

    /// Empty for an unknown distro
    pub async fn releases(&self, distro: &str) -> Result<Vec<String>> {
        Ok(self.load().await?.remove(distro).unwrap_or_default())
    }
}
