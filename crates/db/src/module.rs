use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use shelf_kernel::settings::StorageSettings;
use shelf_kernel::{InitCtx, Module};

use crate::engine::{EngineOptions, MemoryEngine, WaitPolicy};

impl From<&StorageSettings> for EngineOptions {
    fn from(settings: &StorageSettings) -> Self {
        Self {
            snapshot_path: settings.snapshot_path.clone(),
            provisioning_delay: Duration::from_millis(settings.provisioning_delay_ms),
        }
    }
}

impl From<&StorageSettings> for WaitPolicy {
    fn from(settings: &StorageSettings) -> Self {
        Self {
            interval: Duration::from_millis(settings.wait_interval_ms),
            max_attempts: settings.wait_max_attempts,
        }
    }
}

/// Core module owning the shared engine; flushes the snapshot on shutdown.
pub struct StorageModule {
    engine: Arc<MemoryEngine>,
}

impl StorageModule {
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        Self { engine }
    }

    /// Open the engine described by `settings`.
    pub async fn open(settings: &StorageSettings) -> anyhow::Result<Self> {
        let engine = MemoryEngine::open(settings.into())
            .await
            .context("failed to open storage engine")?;
        Ok(Self::new(Arc::new(engine)))
    }

    pub fn engine(&self) -> Arc<MemoryEngine> {
        self.engine.clone()
    }
}

#[async_trait]
impl Module for StorageModule {
    fn name(&self) -> &'static str {
        "storage"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        let tables = self.engine.list_tables().await;
        tracing::info!(
            module = self.name(),
            tables = ?tables,
            persistent = ctx.settings.storage.snapshot_path.is_some(),
            "storage engine ready"
        );
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.engine
            .flush()
            .await
            .context("failed to flush storage snapshot")?;
        tracing::info!(module = self.name(), "storage engine flushed");
        Ok(())
    }
}
