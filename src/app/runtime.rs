use std::collections::HashMap;
use std::sync::{
    Arc, Mutex, RwLock,
    atomic::{AtomicBool, Ordering},
};
use std::thread::JoinHandle;
use std::time::Duration;

use actix_web::{App, HttpServer, web};
use chrono::{DateTime, FixedOffset, Local, SecondsFormat, Utc};
use rusqlite::Connection;
use thiserror::Error;

use crate::adapters::api::{ApiState, PublishedMetrics, SharedMetrics, configure_routes};
use crate::adapters::db;
use crate::adapters::sensors::{HaRestReader, SensorReadError, SensorReader, SensorState};
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::domain::engine::{Clock, EnergyEngine, EngineConfig, EngineState};
use crate::domain::readings::{CycleReadings, MetricKey, normalize};

#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_offset(&self) -> FixedOffset {
        *Local::now().offset()
    }
}

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("sensor for {key} is not ready: {entity_id}")]
    UnreadySensor {
        key: &'static str,
        entity_id: String,
    },
    #[error("failed to read sensor {entity_id}: {source}")]
    Read {
        entity_id: String,
        #[source]
        source: SensorReadError,
    },
    #[error("database lock poisoned")]
    DbLockPoisoned,
    #[error("metrics lock poisoned")]
    MetricsLockPoisoned,
}

pub struct StatsPoller<R, C> {
    reader: R,
    clock: C,
    connection: Arc<Mutex<Connection>>,
    engine: EnergyEngine,
    sensors: HashMap<MetricKey, String>,
    latest: SharedMetrics,
}

impl<R, C> StatsPoller<R, C>
where
    R: SensorReader,
    C: Clock,
{
    pub fn new(
        reader: R,
        clock: C,
        connection: Arc<Mutex<Connection>>,
        engine: EnergyEngine,
        sensors: HashMap<MetricKey, String>,
        latest: SharedMetrics,
    ) -> Self {
        Self {
            reader,
            clock,
            connection,
            engine,
            sensors,
            latest,
        }
    }

    pub fn tick(&mut self) -> Result<(), PollerError> {
        // Acquire the whole sample before touching engine state, so a failed
        // cycle leaves the accumulators exactly as the previous one did.
        let readings = self.acquire()?;

        let now = self.clock.now();
        let output = self
            .engine
            .run_cycle(&readings, now, self.clock.local_offset());

        let updated_at = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        {
            let connection = self
                .connection
                .lock()
                .map_err(|_| PollerError::DbLockPoisoned)?;
            if let Err(error) = db::save_snapshot(&connection, self.engine.state(), &updated_at) {
                // A lost snapshot costs at most one restart's worth of drift;
                // the cycle itself already succeeded.
                tracing::warn!(error = %error, "failed to persist engine snapshot");
            }
        }

        let published = PublishedMetrics::from_output(output, updated_at);
        let mut guard = self
            .latest
            .write()
            .map_err(|_| PollerError::MetricsLockPoisoned)?;
        *guard = Some(published);

        Ok(())
    }

    fn acquire(&self) -> Result<CycleReadings, PollerError> {
        let mut readings = CycleReadings::default();

        for key in MetricKey::ALL {
            let Some(entity_id) = self.sensors.get(&key) else {
                continue;
            };

            let state = self
                .reader
                .read(entity_id)
                .map_err(|source| PollerError::Read {
                    entity_id: entity_id.clone(),
                    source,
                })?;

            let reading = match state {
                SensorState::Unavailable => None,
                SensorState::Value { state, unit } => normalize(&state, unit.as_deref()),
            };

            match reading {
                Some(reading) => readings.insert(key, reading),
                None => {
                    return Err(PollerError::UnreadySensor {
                        key: key.as_str(),
                        entity_id: entity_id.clone(),
                    });
                }
            }
        }

        Ok(readings)
    }
}

pub fn start_poller<R, C>(
    mut poller: StatsPoller<R, C>,
    poll_interval: Duration,
    stop_flag: Arc<AtomicBool>,
) -> JoinHandle<()>
where
    R: SensorReader,
    C: Clock + Send + 'static,
{
    std::thread::spawn(move || {
        while !stop_flag.load(Ordering::Relaxed) {
            if let Err(error) = poller.tick() {
                tracing::warn!(error = %error, "accounting cycle skipped");
            }
            std::thread::sleep(poll_interval);
        }
    })
}

pub fn run(config: AppConfig) -> Result<(), AppError> {
    let mut connection = db::open_connection(&config.db_path).map_err(AppError::database_init)?;
    db::run_migrations(&mut connection).map_err(AppError::database_init)?;

    let state = match db::load_snapshot(&connection).map_err(AppError::database_init)? {
        Some(state) => {
            tracing::info!("restored engine snapshot");
            state
        }
        None => {
            tracing::info!("no engine snapshot found, starting from zeroed accumulators");
            EngineState::default()
        }
    };

    let engine = EnergyEngine::new(
        EngineConfig {
            daily_reset: config.daily_reset,
            initial_battery_mix: config.initial_battery_mix,
        },
        state,
    );

    let shared_connection = Arc::new(Mutex::new(connection));
    let latest: SharedMetrics = Arc::new(RwLock::new(None));
    let api_state = ApiState {
        latest: Arc::clone(&latest),
        connection: Arc::clone(&shared_connection),
    };

    let reader =
        HaRestReader::new(&config.ha_base_url, &config.ha_token).map_err(AppError::runtime)?;
    let poller = StatsPoller::new(
        reader,
        SystemClock,
        Arc::clone(&shared_connection),
        engine,
        config.sensors.clone(),
        latest,
    );
    let stop_flag = Arc::new(AtomicBool::new(false));
    let poller_handle = start_poller(
        poller,
        Duration::from_millis(config.poll_interval_ms),
        Arc::clone(&stop_flag),
    );

    tracing::info!(bind = %config.http_bind, "http server starting");

    let server_result = actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(api_state.clone()))
                .configure(configure_routes)
        })
        .bind(&config.http_bind)?
        .run()
        .await
    });

    stop_flag.store(true, Ordering::Relaxed);
    let join_result = poller_handle.join();

    if join_result.is_err() {
        return Err(AppError::runtime("poller thread panicked"));
    }

    server_result.map_err(AppError::runtime)
}
