use anyhow::Context;
use phonon_api::setup::consumers::{run_consumer, ConsumerRole};
use phonon_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;
    config.validate().context("Configuration validation failed")?;

    let role = ConsumerRole::Conversion;
    phonon_infra::init_telemetry(role.service_name(), config.log_format)?;

    run_consumer(config, role).await
}
