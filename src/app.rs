//! Process wiring shared by the `shelf-app` binary and the CLI.

use std::sync::Arc;

use anyhow::Context;
use shelf_db::StorageModule;
use shelf_kernel::{settings::Settings, InitCtx, ModuleRegistry};

use crate::modules::{self, books::store::TableBookStore};

/// Open storage and register every module. Nothing is initialized yet.
pub async fn build_registry(settings: &Settings) -> anyhow::Result<ModuleRegistry> {
    let storage = StorageModule::open(&settings.storage).await?;
    let store = Arc::new(TableBookStore::new(storage.engine(), &settings.storage));

    let mut registry = ModuleRegistry::new();
    registry.register_core(Arc::new(storage));
    modules::register_all(&mut registry, store);
    Ok(registry)
}

/// Run the HTTP server until Ctrl-C, then stop every module.
pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    let registry = build_registry(&settings).await?;
    let ctx = InitCtx {
        settings: &settings,
    };

    registry.init_all(&ctx).await.context("module init failed")?;
    registry
        .start_all(&ctx)
        .await
        .context("module start failed")?;

    let served = shelf_http::start_server(&registry, &settings, shutdown_signal()).await;
    let stopped = registry.stop_all().await.context("module stop failed");

    served?;
    stopped
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
