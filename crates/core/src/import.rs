//! Recursive `import:` resolution for collectors files.
//!
//! Each import location is fetched through an [`ImportFetcher`], optionally
//! verified against a `#md5sum=` / `#sha256sum=` fragment, parsed, resolved
//! recursively, and merged into the importing file. Names already present in
//! the importing file win. A resolver remembers which locations it has
//! already imported, which both de-duplicates diamonds and breaks cycles.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use md5::Md5;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::{CollectorDefinition, CollectorsFile};
use crate::error::ConfigError;

/// Source of import documents.
#[async_trait]
pub trait ImportFetcher: Send + Sync {
    /// Fetch the raw bytes at `location` (fragment already stripped).
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, ConfigError>;
}

/// Fetches `http(s)://` locations over HTTP and everything else from disk.
pub struct DefaultFetcher {
    client: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for DefaultFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImportFetcher for DefaultFetcher {
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, ConfigError> {
        let fetch_err = |reason: String| ConfigError::Fetch {
            location: location.to_string(),
            reason,
        };

        if location.starts_with("http://") || location.starts_with("https://") {
            let response = self
                .client
                .get(location)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| fetch_err(e.to_string()))?;
            let bytes = response.bytes().await.map_err(|e| fetch_err(e.to_string()))?;
            return Ok(bytes.to_vec());
        }

        let path = location.strip_prefix("file://").unwrap_or(location);
        tokio::fs::read(path)
            .await
            .map_err(|e| fetch_err(e.to_string()))
    }
}

/// Expected digest parsed from an import fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
    Md5(String),
    Sha256(String),
}

impl Checksum {
    fn algorithm(&self) -> &'static str {
        match self {
            Checksum::Md5(_) => "md5sum",
            Checksum::Sha256(_) => "sha256sum",
        }
    }

    fn expected(&self) -> &str {
        match self {
            Checksum::Md5(sum) | Checksum::Sha256(sum) => sum,
        }
    }

    fn digest(&self, bytes: &[u8]) -> String {
        match self {
            Checksum::Md5(_) => hex::encode(Md5::digest(bytes)),
            Checksum::Sha256(_) => hex::encode(Sha256::digest(bytes)),
        }
    }

    /// Compare `bytes` against the expected digest.
    pub fn verify(&self, location: &str, bytes: &[u8]) -> Result<(), ConfigError> {
        let actual = self.digest(bytes);
        if !actual.eq_ignore_ascii_case(self.expected()) {
            return Err(ConfigError::Checksum {
                location: location.to_string(),
                algorithm: self.algorithm().to_string(),
                expected: self.expected().to_string(),
                actual,
            });
        }
        Ok(())
    }
}

/// Split `location#md5sum=<hex>` into the fetchable location and checksum.
///
/// Fragments that do not carry a checksum are left on the location.
pub fn split_checksum(location: &str) -> (&str, Option<Checksum>) {
    let Some((base, fragment)) = location.split_once('#') else {
        return (location, None);
    };
    match fragment.split_once('=') {
        Some(("md5sum", sum)) => (base, Some(Checksum::Md5(sum.to_string()))),
        Some(("sha256sum", sum)) => (base, Some(Checksum::Sha256(sum.to_string()))),
        _ => (location, None),
    }
}

/// Resolves imports and tracks which locations were already loaded.
pub struct ImportResolver {
    fetcher: Box<dyn ImportFetcher>,
    loaded: HashSet<String>,
}

impl ImportResolver {
    pub fn new(fetcher: impl ImportFetcher + 'static) -> Self {
        Self {
            fetcher: Box::new(fetcher),
            loaded: HashSet::new(),
        }
    }

    /// Locations imported so far.
    pub fn loaded(&self) -> impl Iterator<Item = &str> {
        self.loaded.iter().map(String::as_str)
    }

    /// Read a collectors file, resolve its imports and validate the result.
    pub async fn load_file(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<Vec<CollectorDefinition>, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading collectors from configuration file");
        let text = tokio::fs::read_to_string(path).await?;
        let mut file = CollectorsFile::from_yaml(&text)?;
        self.resolve(&mut file).await?;
        let definitions = file.definitions()?;
        for def in &definitions {
            info!(collector = %def.name, "collection added");
        }
        Ok(definitions)
    }

    /// Merge every import of `file` (recursively) into it.
    pub async fn resolve(&mut self, file: &mut CollectorsFile) -> Result<(), ConfigError> {
        let imports = std::mem::take(&mut file.imports);
        for location in imports {
            if self.loaded.contains(&location) {
                warn!(import = %location, "item already imported, skipping");
                continue;
            }
            // Marked before recursing so a cycle back to this location stops.
            self.loaded.insert(location.clone());

            let (target, checksum) = split_checksum(&location);
            debug!(import = %target, "importing item");
            let bytes = self.fetcher.fetch(target).await?;
            if let Some(checksum) = &checksum {
                checksum.verify(target, &bytes)?;
            }

            let text = String::from_utf8(bytes).map_err(|e| ConfigError::Fetch {
                location: target.to_string(),
                reason: format!("not valid UTF-8: {}", e),
            })?;
            let mut imported = CollectorsFile::from_yaml(&text)?;
            Box::pin(self.resolve(&mut imported)).await?;

            for (name, spec) in imported.collections {
                if file.collections.contains_key(&name) {
                    warn!(collector = %name, import = %target, "collection already exists, not added");
                    continue;
                }
                file.collections.insert(name, spec);
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────
