use std::collections::HashMap;
use std::env;

use chrono::NaiveTime;

use crate::app::AppError;
use crate::domain::readings::MetricKey;

const DEFAULT_DAILY_RESET_TIME: &str = "00:00";
const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;
const DEFAULT_DB_PATH: &str = "/var/lib/energy-stats/energy_stats.db";
const DEFAULT_HTTP_BIND: &str = "0.0.0.0:8080";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ha_base_url: String,
    pub ha_token: String,
    /// Entity id per metric. Unmapped optional metrics simply do not
    /// participate in the accounting.
    pub sensors: HashMap<MetricKey, String>,
    pub daily_reset: NaiveTime,
    pub initial_battery_mix: f64,
    pub poll_interval_ms: u64,
    pub db_path: String,
    pub http_bind: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ha_base_url = require(&lookup, "HA_BASE_URL")?;
        let ha_token = require(&lookup, "HA_TOKEN")?;

        let mut sensors = HashMap::new();
        for key in MetricKey::ALL {
            let env_key = sensor_env_key(key);
            match non_empty(lookup(&env_key)) {
                Some(entity_id) => {
                    sensors.insert(key, entity_id);
                }
                None if key.is_mandatory() => {
                    return Err(AppError::config(format!("{env_key} is required")));
                }
                None => {}
            }
        }

        let daily_reset = parse_reset_time(
            non_empty(lookup("DAILY_RESET_TIME"))
                .as_deref()
                .unwrap_or(DEFAULT_DAILY_RESET_TIME),
        )?;

        let initial_battery_mix = match non_empty(lookup("INITIAL_BATTERY_ENERGY_MIX")) {
            Some(raw) => raw.parse::<f64>().map_err(|_| {
                AppError::config(format!(
                    "INITIAL_BATTERY_ENERGY_MIX must be a number, got {raw:?}"
                ))
            })?,
            None => 0.0,
        };
        if !(0.0..=1.0).contains(&initial_battery_mix) {
            return Err(AppError::config(
                "INITIAL_BATTERY_ENERGY_MIX must be between 0 and 1",
            ));
        }

        let poll_interval_ms = match non_empty(lookup("POLL_INTERVAL_MS")) {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                AppError::config(format!(
                    "POLL_INTERVAL_MS must be a positive integer, got {raw:?}"
                ))
            })?,
            None => DEFAULT_POLL_INTERVAL_MS,
        };
        if poll_interval_ms == 0 {
            return Err(AppError::config("POLL_INTERVAL_MS must be greater than 0"));
        }

        let db_path =
            non_empty(lookup("DB_PATH")).unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let http_bind =
            non_empty(lookup("HTTP_BIND")).unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string());

        Ok(Self {
            ha_base_url: ha_base_url.trim_end_matches('/').to_string(),
            ha_token,
            sensors,
            daily_reset,
            initial_battery_mix,
            poll_interval_ms,
            db_path,
            http_bind,
        })
    }
}

fn sensor_env_key(key: MetricKey) -> String {
    format!("SENSOR_{}", key.as_str().to_ascii_uppercase())
}

fn require<F>(lookup: &F, key: &str) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup(key)).ok_or_else(|| AppError::config(format!("{key} is required")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_reset_time(raw: &str) -> Result<NaiveTime, AppError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| {
            AppError::config(format!(
                "DAILY_RESET_TIME must be HH:MM or HH:MM:SS, got {raw:?}"
            ))
        })
}
