use phonon_api::initialize_app;
use phonon_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    // Database, storage, queue, routes and (for the in-memory queue) consumers
    let app = initialize_app(config).await?;

    app.run().await
}
