//! Named-cache naming scheme.
//!
//! Every cache the engine creates is called `<app>-<purpose>-v<version>`.
//! Per-principal caches carry a trailing suffix, whatever their purpose:
//!
//! ```text
//! shop-main-v3
//! shop-static-v3
//! shop-api-v3-public
//! shop-api-v3-5f2a9c0e1b7d4a66
//! shop-main-v3-5f2a9c0e1b7d4a66
//! ```

use crate::domain::DomainError;

/// Builds and parses cache names for one app at one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
    app_id: String,
    version: String,
}

impl CacheNames {
    /// Rejects identifiers that would make names ambiguous to parse.
    pub fn new(app_id: impl Into<String>, version: impl Into<String>) -> Result<Self, DomainError> {
        let app_id = app_id.into();
        let version = version.into();
        if app_id.is_empty() {
            return Err(DomainError::validation("app_id", "must not be empty"));
        }
        if version.is_empty() || version.contains('-') {
            return Err(DomainError::validation(
                "version",
                "must be non-empty and must not contain `-`",
            ));
        }
        Ok(Self { app_id, version })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn main(&self) -> String {
        format!("{}-main-v{}", self.app_id, self.version)
    }

    pub fn static_assets(&self) -> String {
        format!("{}-static-v{}", self.app_id, self.version)
    }

    /// Template prefix for API caches; append `-<principal suffix>`.
    pub fn api_prefix(&self) -> String {
        format!("{}-api-v{}", self.app_id, self.version)
    }

    pub fn api(&self, principal_suffix: &str) -> String {
        format!("{}-{}", self.api_prefix(), principal_suffix)
    }

    /// True for any cache this app created, whatever its version.
    pub fn is_app_cache(&self, name: &str) -> bool {
        self.version_of(name).is_some()
    }

    pub fn is_current(&self, name: &str) -> bool {
        self.version_of(name) == Some(self.version.as_str())
    }

    /// Version embedded in one of this app's cache names.
    ///
    /// Accepts `<app>-<purpose>-v<version>` with an optional `-<suffix>`,
    /// for any purpose, so custom fixed caches and their per-principal
    /// variants are recognised too.
    pub fn version_of<'a>(&self, name: &'a str) -> Option<&'a str> {
        let rest = name.strip_prefix(self.app_id.as_str())?.strip_prefix('-')?;
        split_version(rest).or_else(|| {
            let (head, suffix) = rest.rsplit_once('-')?;
            if suffix.is_empty() {
                return None;
            }
            split_version(head)
        })
    }
}

/// `<purpose>-v<version>`, where the version holds no `-`.
fn split_version(name: &str) -> Option<&str> {
    let (purpose, version) = name.rsplit_once("-v")?;
    (!purpose.is_empty() && !version.is_empty() && !version.contains('-')).then_some(version)
}
