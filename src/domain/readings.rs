use std::collections::HashMap;

/// Logical metric names the engine knows about. Configuration maps each key
/// to zero or one external sensor id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKey {
    GridPower,
    GridInEnergy,
    GridOutEnergy,
    BatteryPower,
    BatteryEnergy,
    PvPower,
    PvEnergy,
    CarChargingPower,
    CarChargingLimitPower,
    CarChargingEnergy,
    CarConnected,
    CarSoc,
}

impl MetricKey {
    pub const ALL: [MetricKey; 12] = [
        MetricKey::GridPower,
        MetricKey::GridInEnergy,
        MetricKey::GridOutEnergy,
        MetricKey::BatteryPower,
        MetricKey::BatteryEnergy,
        MetricKey::PvPower,
        MetricKey::PvEnergy,
        MetricKey::CarChargingPower,
        MetricKey::CarChargingLimitPower,
        MetricKey::CarChargingEnergy,
        MetricKey::CarConnected,
        MetricKey::CarSoc,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKey::GridPower => "grid_power",
            MetricKey::GridInEnergy => "grid_in_energy",
            MetricKey::GridOutEnergy => "grid_out_energy",
            MetricKey::BatteryPower => "battery_power",
            MetricKey::BatteryEnergy => "battery_energy",
            MetricKey::PvPower => "pv_power",
            MetricKey::PvEnergy => "pv_energy",
            MetricKey::CarChargingPower => "car_charging_power",
            MetricKey::CarChargingLimitPower => "car_charging_limit_power",
            MetricKey::CarChargingEnergy => "car_charging_energy",
            MetricKey::CarConnected => "car_connected",
            MetricKey::CarSoc => "car_soc",
        }
    }

    /// Metrics that must have a sensor mapped for the engine to run at all.
    pub fn is_mandatory(self) -> bool {
        matches!(self, MetricKey::GridPower | MetricKey::GridInEnergy)
    }
}

/// A normalized sensor value: watts, watt-hours, a percentage, or a plug flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Number(f64),
    Flag(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Watt,
    Kilowatt,
    WattHour,
    KilowattHour,
}

const KILOWATT_TAGS: &[&str] = &["kw", "kwatt", "kilowatt"];
const KILOWATT_HOUR_TAGS: &[&str] = &["kwh", "kwhours", "kilowatt-hour", "kilowatt hour"];
const WATT_TAGS: &[&str] = &["w", "watt"];
const WATT_HOUR_TAGS: &[&str] = &["wh", "watt-hour", "watt hour"];

impl Unit {
    pub fn from_tag(tag: &str) -> Option<Unit> {
        let normalized = tag.trim().to_ascii_lowercase();
        if KILOWATT_TAGS.contains(&normalized.as_str()) {
            return Some(Unit::Kilowatt);
        }
        if KILOWATT_HOUR_TAGS.contains(&normalized.as_str()) {
            return Some(Unit::KilowattHour);
        }
        if WATT_TAGS.contains(&normalized.as_str()) {
            return Some(Unit::Watt);
        }
        if WATT_HOUR_TAGS.contains(&normalized.as_str()) {
            return Some(Unit::WattHour);
        }
        None
    }

    /// Factor into the base unit (W or Wh).
    pub fn scale(self) -> f64 {
        match self {
            Unit::Watt | Unit::WattHour => 1.0,
            Unit::Kilowatt | Unit::KilowattHour => 1000.0,
        }
    }
}

/// Normalize a raw sensor state into a `Reading`.
///
/// Returns `None` for unknown/unavailable/unparseable states; 0 is a valid
/// reading and never stands in for "no data".
pub fn normalize(state: &str, unit_tag: Option<&str>) -> Option<Reading> {
    let trimmed = state.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("unknown")
        || trimmed.eq_ignore_ascii_case("unavailable")
        || trimmed.eq_ignore_ascii_case("none")
    {
        return None;
    }

    if let Ok(value) = trimmed.parse::<f64>() {
        let scale = unit_tag
            .and_then(Unit::from_tag)
            .map(Unit::scale)
            .unwrap_or(1.0);
        return Some(Reading::Number(value * scale));
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "on" => Some(Reading::Flag(true)),
        "off" => Some(Reading::Flag(false)),
        _ => None,
    }
}

/// The full set of normalized readings for one accounting cycle. Absent keys
/// mean the metric had no sensor mapped this cycle.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleReadings {
    values: HashMap<MetricKey, Reading>,
}

impl CycleReadings {
    pub fn insert(&mut self, key: MetricKey, reading: Reading) {
        self.values.insert(key, reading);
    }

    pub fn number(&self, key: MetricKey) -> Option<f64> {
        match self.values.get(&key) {
            Some(Reading::Number(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn flag(&self, key: MetricKey) -> Option<bool> {
        match self.values.get(&key) {
            Some(Reading::Flag(flag)) => Some(*flag),
            // Some charger integrations expose the plug state numerically.
            Some(Reading::Number(value)) => Some(*value != 0.0),
            None => None,
        }
    }
}
