//! Configuration models. Every knob has a default so an empty file (or no
//! file at all) yields a working runtime.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use stratafs_core::catalog::CatalogOptions;
use stratafs_core::fs::FsLimits;
use stratafs_core::shell::ExecConfig;
use stratafs_core::tier::{CacacheStore, ObjectStore, StoreRoot, TierLimits, TierRouter};
use stratafs_core::watch::WatchConfig;
use stratafs_core::{Catalog, StrataFs, WatchManager};

/// Catalog location and configured owner for new inodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// SQLite URL; `sqlite::memory:` keeps the catalog ephemeral.
    pub url: String,
    pub owner_uid: u32,
    pub owner_gid: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            owner_uid: 1000,
            owner_gid: 1000,
        }
    }
}

/// Tier thresholds and the on-disk roots for the out-of-row stores.
///
/// A missing root disables that tier; with both disabled every payload
/// above `hot_max_size` is refused.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TiersConfig {
    #[serde(flatten)]
    pub limits: TierLimits,
    pub warm_root: Option<PathBuf>,
    pub cold_root: Option<PathBuf>,
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub limits: FsLimits,
    pub tiers: TiersConfig,
    pub watch: WatchConfig,
    pub exec: ExecConfig,
}

impl Config {
    /// Create the warm/cold store directories if configured.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for root in [&self.tiers.warm_root, &self.tiers.cold_root]
            .into_iter()
            .flatten()
        {
            std::fs::create_dir_all(root)?;
        }
        Ok(())
    }

    fn store_for(root: &Option<PathBuf>) -> Option<Arc<dyn ObjectStore>> {
        root.as_ref().map(|path| {
            Arc::new(CacacheStore::new(StoreRoot::new(path.clone()))) as Arc<dyn ObjectStore>
        })
    }

    /// Open the configured catalog and assemble the filesystem facade.
    pub async fn open(&self) -> anyhow::Result<StrataFs> {
        self.ensure_directories()?;
        let router = TierRouter::new(
            self.tiers.limits.clone(),
            Self::store_for(&self.tiers.warm_root),
            Self::store_for(&self.tiers.cold_root),
        );
        let catalog = Catalog::open(
            &self.catalog.url,
            router,
            CatalogOptions {
                owner_uid: self.catalog.owner_uid,
                owner_gid: self.catalog.owner_gid,
            },
        )
        .await?;
        let watches = WatchManager::new(self.watch.clone())?;
        Ok(StrataFs::new(catalog, watches, self.limits.clone()))
    }
}
