use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const HTTP_TIMEOUT_SECONDS: u64 = 5;

/// Current state of one external sensor, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorState {
    /// The backend knows the sensor but has no usable state right now.
    Unavailable,
    Value {
        state: String,
        unit: Option<String>,
    },
}

pub trait SensorReader: Send + Sync + 'static {
    fn read(&self, entity_id: &str) -> Result<SensorState, SensorReadError>;
}

#[derive(Debug, Error)]
pub enum SensorReadError {
    #[error("failed to build sensor HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("sensor request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("sensor backend rejected credentials (status {0})")]
    Unauthorized(u16),
    #[error("unexpected sensor backend response (status {0})")]
    UnexpectedStatus(u16),
    #[error("failed to decode sensor state payload: {0}")]
    Decode(#[source] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct EntityStatePayload {
    state: String,
    #[serde(default)]
    attributes: EntityAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct EntityAttributes {
    unit_of_measurement: Option<String>,
}

/// Home Assistant-style REST reader: `GET {base_url}/api/states/{entity_id}`
/// with a bearer token.
pub struct HaRestReader {
    base_url: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl HaRestReader {
    pub fn new(base_url: &str, token: &str) -> Result<Self, SensorReadError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECONDS))
            .build()
            .map_err(SensorReadError::ClientBuild)?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }
}

impl SensorReader for HaRestReader {
    fn read(&self, entity_id: &str) -> Result<SensorState, SensorReadError> {
        let url = format!("{}/api/states/{}", self.base_url, entity_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .map_err(SensorReadError::Transport)?;

        let status = response.status();
        if status.as_u16() == 404 {
            // Unknown entity reads as not-ready, the engine decides whether
            // that aborts the cycle.
            return Ok(SensorState::Unavailable);
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(SensorReadError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            return Err(SensorReadError::UnexpectedStatus(status.as_u16()));
        }

        let payload: EntityStatePayload = response.json().map_err(SensorReadError::Decode)?;

        Ok(SensorState::Value {
            state: payload.state,
            unit: payload.attributes.unit_of_measurement,
        })
    }
}
