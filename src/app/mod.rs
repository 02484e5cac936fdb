mod config;
mod error;
mod logging;
mod runtime;

pub use error::AppError;

pub fn run() -> Result<(), AppError> {
    // A missing .env file is fine; the environment itself may be fully set.
    let _ = dotenvy::dotenv();

    logging::init()?;

    let config = config::AppConfig::from_env()?;
    tracing::info!(
        ha_base_url = %config.ha_base_url,
        configured_sensors = config.sensors.len(),
        poll_interval_ms = config.poll_interval_ms,
        daily_reset = %config.daily_reset,
        db_path = %config.db_path,
        http_bind = %config.http_bind,
        "application bootstrap initialized"
    );

    runtime::run(config)
}
