use anyhow::Context;
use shelf_kernel::settings::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load shelf settings")?;
    shelf_telemetry::init(&settings.telemetry)?;

    tracing::info!(
        env = ?settings.environment,
        table = %settings.storage.table_name,
        persistent = settings.storage.snapshot_path.is_some(),
        "shelf-app starting"
    );

    shelf_app::app::serve(settings).await
}
