//! Clone orchestration
//!
//! Drives one clone run end to end:
//! - Copies the source tenant's tables under the destination prefix
//! - Sets the destination's identity options
//! - Rewrites references to the source tenant
//! - Copies and optionally registers the selected media files

use crate::assets::{ensure_writable_dir, AssetDescriptor, AssetManifest, CopyReport, SelectiveAssetCopier};
use crate::clone::{CloneReport, TableSetCloner};
use crate::config::CloneConfig;
use crate::error::{CollaboratorError, ConfigError, OrchestratorError};
use crate::options::OptionStore;
use crate::rewrite::{ReferenceRewritePass, RewriteInputs, RewriteReport};
use crate::sql::SqlExecutor;
use crate::types::{BaselineOptions, RunId, TenantContext, TenantId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

/// Resolves tenant identifiers into contexts
///
/// Tenants are created elsewhere; the engine only looks them up.
#[async_trait]
pub trait TenantProvisioner: Send + Sync {
    /// Context of an existing tenant
    async fn resolve(&self, tenant: TenantId) -> Result<TenantContext, CollaboratorError>;
}

/// Opaque reference returned by an asset registrar
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(pub String);

impl std::fmt::Display for AssetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Records a copied file in the destination tenant's media library
#[async_trait]
pub trait AssetRegistrar: Send + Sync {
    /// Register `path` under `key` for `tenant`
    async fn register(
        &self,
        tenant: &TenantContext,
        key: &str,
        path: &Path,
        asset: &AssetDescriptor,
    ) -> Result<AssetRef, CollaboratorError>;
}

/// Media files to carry over
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssetPlan {
    /// Source upload root; the source tenant's `upload_dir` when absent
    #[serde(default)]
    pub source_root: Option<PathBuf>,
    /// Destination upload root; the destination tenant's `upload_dir` when absent
    #[serde(default)]
    pub dest_root: Option<PathBuf>,
    /// Files to copy
    pub manifest: AssetManifest,
}

/// Everything one clone run needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClonePlan {
    /// Tenant to copy from
    pub source: TenantContext,
    /// Freshly provisioned tenant to copy into
    pub dest: TenantContext,
    /// `blogname` of the destination
    pub blog_name: String,
    /// `admin_email` of the destination
    pub admin_email: String,
    /// Media files to carry over
    #[serde(default)]
    pub assets: Option<AssetPlan>,
}

impl ClonePlan {
    /// Create plan without assets
    #[must_use]
    pub fn new(
        source: TenantContext,
        dest: TenantContext,
        blog_name: impl Into<String>,
        admin_email: impl Into<String>,
    ) -> Self {
        Self {
            source,
            dest,
            blog_name: blog_name.into(),
            admin_email: admin_email.into(),
            assets: None,
        }
    }

    /// Build a plan from tenant ids
    ///
    /// # Errors
    /// Returns [`CollaboratorError`] if either tenant cannot be resolved.
    pub async fn resolve(
        provisioner: &dyn TenantProvisioner,
        source: TenantId,
        dest: TenantId,
        blog_name: impl Into<String>,
        admin_email: impl Into<String>,
    ) -> Result<Self, CollaboratorError> {
        let source = provisioner.resolve(source).await?;
        let dest = provisioner.resolve(dest).await?;
        Ok(Self::new(source, dest, blog_name, admin_email))
    }

    /// With asset plan
    #[inline]
    #[must_use]
    pub fn with_assets(mut self, assets: AssetPlan) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Read a plan from a `.json` or `.toml` file
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file is unreadable or malformed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(serde_json::from_str(&text)?),
            _ => Ok(toml::from_str(&text)?),
        }
    }

    /// Baseline options of the destination
    #[must_use]
    pub fn baseline(&self) -> BaselineOptions {
        BaselineOptions::for_tenant(&self.dest, &self.blog_name, &self.admin_email)
    }

    /// Inputs of the rewrite pass
    #[must_use]
    pub fn rewrite_inputs(&self, link_manager_enabled: bool) -> RewriteInputs {
        RewriteInputs {
            source: self.source.clone(),
            dest: self.dest.clone(),
            link_manager_enabled,
        }
    }
}

/// Result of a clone run
#[derive(Debug)]
pub struct CloneOutcome {
    /// Run identifier
    pub run: RunId,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: DateTime<Utc>,
    /// Table cloning
    pub clone: CloneReport,
    /// Reference rewriting
    pub rewrite: RewriteReport,
    /// Asset copy, when planned
    pub assets: Option<CopyReport>,
    /// Registered assets by manifest key
    pub registered: IndexMap<String, AssetRef>,
}

impl CloneOutcome {
    /// Whether any table, column or file failed along the way
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.clone.is_complete()
            || self.rewrite.failed_columns().next().is_some()
            || self.assets.as_ref().is_some_and(|a| !a.failures.is_empty())
    }

    /// Flat summary for reporting
    #[must_use]
    pub fn summary(&self) -> OutcomeSummary {
        OutcomeSummary {
            run: self.run,
            dest_prefix: self.clone.dest_prefix.clone(),
            tables_cloned: self.clone.tables.len(),
            table_failures: self.clone.failures.iter().map(ToString::to_string).collect(),
            rows_copied: self.clone.rows(),
            rows_rewritten: self.rewrite.rows_updated(),
            values_skipped: self.rewrite.skipped_values(),
            column_failures: self
                .rewrite
                .failed_columns()
                .map(|c| format!("{}.{}", c.table, c.column))
                .collect(),
            assets_copied: self.assets.as_ref().map_or(0, |a| a.copied.len()),
            asset_failures: self
                .assets
                .iter()
                .flat_map(|a| a.failures.iter().map(ToString::to_string))
                .collect(),
            registered: self.registered.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Serializable digest of a [`CloneOutcome`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeSummary {
    /// Run identifier
    pub run: RunId,
    /// Destination prefix
    pub dest_prefix: String,
    /// Tables cloned
    pub tables_cloned: usize,
    /// Table failures
    pub table_failures: Vec<String>,
    /// Rows copied
    pub rows_copied: u64,
    /// Rows changed by the rewrite
    pub rows_rewritten: u64,
    /// Undecodable values left untouched
    pub values_skipped: usize,
    /// Columns with failed statements (`table.column`)
    pub column_failures: Vec<String>,
    /// Files copied
    pub assets_copied: usize,
    /// File failures
    pub asset_failures: Vec<String>,
    /// Registered assets
    pub registered: IndexMap<String, AssetRef>,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: DateTime<Utc>,
}

/// Runs clone plans
pub struct CloneOrchestrator {
    config: CloneConfig,
    cloner: TableSetCloner,
    options: OptionStore,
    rewrite: ReferenceRewritePass,
    copier: SelectiveAssetCopier,
    registrar: Option<Arc<dyn AssetRegistrar>>,
}

impl std::fmt::Debug for CloneOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloneOrchestrator")
            .field("config", &self.config)
            .field("registrar", &self.registrar.is_some())
            .finish_non_exhaustive()
    }
}

impl CloneOrchestrator {
    /// Create orchestrator
    #[must_use]
    pub fn new(executor: Arc<dyn SqlExecutor>, config: CloneConfig) -> Self {
        Self {
            cloner: TableSetCloner::new(Arc::clone(&executor), &config),
            options: OptionStore::new(Arc::clone(&executor)),
            rewrite: ReferenceRewritePass::new(executor, &config),
            copier: SelectiveAssetCopier::new(&config.assets),
            registrar: None,
            config,
        }
    }

    /// With asset registrar
    #[inline]
    #[must_use]
    pub fn with_registrar(mut self, registrar: Arc<dyn AssetRegistrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CloneConfig {
        &self.config
    }

    /// Table cloner, for cleanup of abandoned tenants
    #[inline]
    #[must_use]
    pub fn cloner(&self) -> &TableSetCloner {
        &self.cloner
    }

    /// Execute a clone plan
    ///
    /// # Workflow
    /// 1. Clone the source table set under the destination prefix
    /// 2. Write the destination's baseline options
    /// 3. Rewrite references, gating the link table on the source's link
    ///    manager option
    /// 4. Prepare the destination upload root and copy the planned assets
    /// 5. Register each copied asset when a registrar is configured
    ///
    /// # Errors
    /// Returns [`OrchestratorError`] for failures that leave no usable
    /// destination: schema discovery, option writes, an unusable upload root
    /// or a failing collaborator. Per-table, per-value and per-file failures
    /// are reported in the [`CloneOutcome`].
    pub async fn run(&self, plan: &ClonePlan) -> Result<CloneOutcome, OrchestratorError> {
        let run = RunId::new();
        let span = info_span!(
            "clone",
            run = %run,
            source = %plan.source.prefix,
            dest = %plan.dest.prefix
        );
        self.run_steps(run, plan).instrument(span).await
    }

    async fn run_steps(&self, run: RunId, plan: &ClonePlan) -> Result<CloneOutcome, OrchestratorError> {
        let started_at = Utc::now();
        info!(source = %plan.source.id, dest = %plan.dest.id, "Clone started");

        let clone = self.cloner.clone(&plan.source, &plan.dest).await?;

        self.options.set_baseline(&plan.dest, &plan.baseline()).await?;

        let link_manager_enabled = self
            .options
            .flag(&plan.source, &self.config.tables.link_option)
            .await?;
        let rewrite = self.rewrite.run(&plan.rewrite_inputs(link_manager_enabled)).await?;

        let mut assets = None;
        let mut registered = IndexMap::new();
        if let Some(asset_plan) = &plan.assets {
            let source_root = asset_plan
                .source_root
                .as_deref()
                .unwrap_or(plan.source.upload_dir.as_path());
            let dest_root = asset_plan
                .dest_root
                .as_deref()
                .unwrap_or(plan.dest.upload_dir.as_path());

            ensure_writable_dir(dest_root, self.copier.dir_mode()).await?;
            let report = self.copier.copy(source_root, dest_root, &asset_plan.manifest).await?;

            if let Some(registrar) = &self.registrar {
                for (key, asset) in asset_plan.manifest.iter() {
                    let Some(path) = report.find(asset) else {
                        warn!(asset = %key, filename = %asset.filename, "Asset not found among copied files");
                        continue;
                    };
                    let reference = registrar.register(&plan.dest, key, path, asset).await?;
                    info!(asset = %key, reference = %reference, "Asset registered");
                    registered.insert(key.to_string(), reference);
                }
            }
            assets = Some(report);
        }

        let outcome = CloneOutcome {
            run,
            started_at,
            finished_at: Utc::now(),
            clone,
            rewrite,
            assets,
            registered,
        };
        info!(failures = outcome.has_failures(), "Clone finished");
        Ok(outcome)
    }
}
