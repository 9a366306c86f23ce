//! Worker lifecycle: install, activate, decommission.
//!
//! Stages move forward only:
//!
//! ```text
//! installing -> waiting -> active -> terminated
//!                                 \-> decommissioned
//! ```
//!
//! Decommission is accepted from any stage that is not already terminal.
//! Pre-warm, migration, and cleanup failures are logged and swallowed.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Mutex;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::domain::{DomainError, Request};
use crate::infra::lock::mutex_lock;
use crate::runtime::{RuntimeError, WorkerRuntime};

use super::config::PrecacheManifest;
use super::keys::CacheNames;
use super::ttl::EntryTtlPolicy;
use super::validator::ResponseValidator;

const SOURCE: &str = "cache::lifecycle";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleStage {
    Installing,
    Waiting,
    Active,
    Terminated,
    Decommissioned,
}

impl LifecycleStage {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStage::Installing => "installing",
            LifecycleStage::Waiting => "waiting",
            LifecycleStage::Active => "active",
            LifecycleStage::Terminated => "terminated",
            LifecycleStage::Decommissioned => "decommissioned",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LifecycleStage::Terminated | LifecycleStage::Decommissioned
        )
    }

    pub fn can_transition_to(self, next: LifecycleStage) -> bool {
        use LifecycleStage::*;
        match (self, next) {
            (Installing, Waiting) | (Waiting, Active) | (Active, Terminated) => true,
            (from, Decommissioned) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a migration step gets to work with. Old caches still exist while it runs.
#[derive(Clone)]
pub struct MigrationContext {
    pub runtime: WorkerRuntime,
    pub names: CacheNames,
    pub from_version: String,
}

impl MigrationContext {
    /// The previous version's cache name for a purpose (`main`, `static`).
    pub fn previous_cache(&self, purpose: &str) -> String {
        format!(
            "{}-{}-v{}",
            self.names.app_id(),
            purpose,
            self.from_version
        )
    }
}

type MigrationStep =
    Box<dyn Fn(MigrationContext) -> BoxFuture<'static, Result<(), RuntimeError>> + Send + Sync>;

/// Version-to-version migration steps. Pairs without a step are no-ops.
#[derive(Default)]
pub struct MigrationRegistry {
    steps: HashMap<(String, String), MigrationStep>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(mut self, from: impl Into<String>, to: impl Into<String>, step: F) -> Self
    where
        F: Fn(MigrationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RuntimeError>> + Send + 'static,
    {
        self.steps.insert(
            (from.into(), to.into()),
            Box::new(move |ctx| step(ctx).boxed()),
        );
        self
    }

    pub fn contains(&self, from: &str, to: &str) -> bool {
        self.steps.contains_key(&(from.to_string(), to.to_string()))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs the step registered for `from -> to`. Returns whether one ran.
    pub async fn run(
        &self,
        from: &str,
        to: &str,
        ctx: MigrationContext,
    ) -> Result<bool, RuntimeError> {
        let Some(step) = self.steps.get(&(from.to_string(), to.to_string())) else {
            return Ok(false);
        };
        step(ctx).await.map_err(|err| RuntimeError::Migration {
            from: from.to_string(),
            to: to.to_string(),
            message: err.to_string(),
        })?;
        Ok(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub cached: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    pub previous_versions: Vec<String>,
    pub migrated: Vec<String>,
    pub deleted_caches: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecommissionReport {
    pub deleted_caches: Vec<String>,
    pub reloaded_clients: usize,
    pub unregistered: bool,
    /// Set when the worker had already been torn down; nothing was touched.
    pub already_decommissioned: bool,
}

pub struct LifecycleManager {
    runtime: WorkerRuntime,
    names: CacheNames,
    origin: Url,
    precache: PrecacheManifest,
    validator: ResponseValidator,
    ttl: EntryTtlPolicy,
    migrations: MigrationRegistry,
    stage: Mutex<LifecycleStage>,
}

impl LifecycleManager {
    pub fn new(
        runtime: WorkerRuntime,
        names: CacheNames,
        origin: Url,
        precache: PrecacheManifest,
        validator: ResponseValidator,
        ttl: EntryTtlPolicy,
    ) -> Self {
        Self {
            runtime,
            names,
            origin,
            precache,
            validator,
            ttl,
            migrations: MigrationRegistry::new(),
            stage: Mutex::new(LifecycleStage::Installing),
        }
    }

    pub fn with_migrations(mut self, migrations: MigrationRegistry) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn stage(&self) -> LifecycleStage {
        *mutex_lock(&self.stage, SOURCE, "stage")
    }

    fn advance(&self, next: LifecycleStage) -> Result<(), DomainError> {
        let mut stage = mutex_lock(&self.stage, SOURCE, "advance");
        if !stage.can_transition_to(next) {
            return Err(DomainError::invariant(format!(
                "lifecycle cannot move from {} to {next}",
                *stage
            )));
        }
        debug!(from = %*stage, to = %next, "lifecycle transition");
        *stage = next;
        Ok(())
    }

    fn expect_stage(&self, expected: LifecycleStage, action: &str) -> Result<(), DomainError> {
        let stage = self.stage();
        if stage != expected {
            return Err(DomainError::invariant(format!(
                "{action} requires stage {expected}, found {stage}"
            )));
        }
        Ok(())
    }

    /// Pre-warms the `main` and `static` caches, then asks to activate
    /// without waiting for old clients to close.
    #[instrument(skip(self), fields(version = %self.names.version()))]
    pub async fn install(&self) -> Result<InstallReport, DomainError> {
        self.expect_stage(LifecycleStage::Installing, "install")?;

        let main = self.names.main();
        let assets = self.names.static_assets();
        let mut jobs = Vec::new();
        for url in &self.precache.main {
            jobs.push(self.prewarm(&main, url));
        }
        for url in &self.precache.static_assets {
            jobs.push(self.prewarm(&assets, url));
        }

        let mut report = InstallReport::default();
        for outcome in join_all(jobs).await {
            match outcome {
                Ok(()) => report.cached += 1,
                Err(reason) => {
                    report.failed += 1;
                    warn!(%reason, "pre-warm failed; continuing install");
                }
            }
        }

        if let Err(err) = self.runtime.registration.skip_waiting().await {
            warn!(error = %err, "skip-waiting request failed");
        }
        self.advance(LifecycleStage::Waiting)?;
        info!(
            cached = report.cached,
            failed = report.failed,
            "install complete"
        );
        Ok(report)
    }

    async fn prewarm(&self, cache_name: &str, path: &str) -> Result<(), String> {
        let url = self
            .origin
            .join(path)
            .map_err(|err| format!("`{path}` is not a valid url: {err}"))?;
        let request = Request::get(url);
        let response = self
            .runtime
            .fetch(&request)
            .await
            .map_err(|err| format!("`{path}`: {err}"))?;
        self.validator
            .check(&response, Some(&request))
            .map_err(|rejection| format!("`{path}`: {rejection}"))?;
        let cache = self
            .runtime
            .open_cache(cache_name)
            .await
            .map_err(|err| err.to_string())?;
        cache
            .put(&request.cache_key(), self.ttl.stamp(&response))
            .await
            .map_err(|err| err.to_string())
    }

    /// Migrates from any earlier version, sweeps stale caches, and takes
    /// control of open clients.
    #[instrument(skip(self), fields(version = %self.names.version()))]
    pub async fn activate(&self) -> Result<ActivationReport, DomainError> {
        self.expect_stage(LifecycleStage::Waiting, "activate")?;

        let stale: Vec<String> = self
            .app_caches()
            .await
            .into_iter()
            .filter(|name| !self.names.is_current(name))
            .collect();
        let previous_versions: BTreeSet<String> = stale
            .iter()
            .filter_map(|name| self.names.version_of(name))
            .map(str::to_string)
            .collect();

        let mut report = ActivationReport {
            previous_versions: previous_versions.iter().cloned().collect(),
            ..ActivationReport::default()
        };

        let current = self.names.version();
        for from in &previous_versions {
            let ctx = MigrationContext {
                runtime: self.runtime.clone(),
                names: self.names.clone(),
                from_version: from.clone(),
            };
            match self.migrations.run(from, current, ctx).await {
                Ok(true) => {
                    info!(from = %from, to = current, "migration applied");
                    report.migrated.push(from.clone());
                }
                Ok(false) => {}
                Err(err) => warn!(error = %err, "migration failed; continuing activation"),
            }
        }

        for name in stale {
            match self.runtime.caches.delete(&name).await {
                Ok(true) => report.deleted_caches.push(name),
                Ok(false) => {}
                Err(err) => warn!(cache = %name, error = %err, "failed to delete stale cache"),
            }
        }

        if let Err(err) = self.runtime.clients.claim().await {
            warn!(error = %err, "failed to claim clients");
        }
        self.advance(LifecycleStage::Active)?;
        info!(
            deleted = report.deleted_caches.len(),
            migrated = report.migrated.len(),
            "activation complete"
        );
        Ok(report)
    }

    /// Deletes every cache of this app, reloads open clients, and unregisters.
    ///
    /// One-way. A second call reports `already_decommissioned` and does nothing.
    #[instrument(skip(self))]
    pub async fn decommission(&self) -> DecommissionReport {
        if self.stage() == LifecycleStage::Decommissioned {
            return DecommissionReport {
                already_decommissioned: true,
                ..DecommissionReport::default()
            };
        }

        let mut report = DecommissionReport::default();
        for name in self.app_caches().await {
            match self.runtime.caches.delete(&name).await {
                Ok(true) => report.deleted_caches.push(name),
                Ok(false) => {}
                Err(err) => warn!(cache = %name, error = %err, "failed to delete cache"),
            }
        }

        match self.runtime.clients.list().await {
            Ok(clients) => {
                for client in clients {
                    match self.runtime.clients.navigate(&client.id, &client.url).await {
                        Ok(()) => report.reloaded_clients += 1,
                        Err(err) => warn!(client = %client.id, error = %err, "failed to reload client"),
                    }
                }
            }
            Err(err) => warn!(error = %err, "failed to list clients"),
        }

        report.unregistered = match self.runtime.registration.unregister().await {
            Ok(unregistered) => unregistered,
            Err(err) => {
                warn!(error = %err, "failed to unregister worker");
                false
            }
        };

        *mutex_lock(&self.stage, SOURCE, "decommission") = LifecycleStage::Decommissioned;
        info!(
            deleted = report.deleted_caches.len(),
            reloaded = report.reloaded_clients,
            unregistered = report.unregistered,
            "decommission complete"
        );
        report
    }

    pub fn terminate(&self) -> Result<(), DomainError> {
        self.advance(LifecycleStage::Terminated)
    }

    async fn app_caches(&self) -> Vec<String> {
        match self.runtime.caches.names().await {
            Ok(names) => names
                .into_iter()
                .filter(|name| self.names.is_app_cache(name))
                .collect(),
            Err(err) => {
                warn!(error = %err, "failed to list caches");
                Vec::new()
            }
        }
    }
}
