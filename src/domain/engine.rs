use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::accounts::AccountKey;
use crate::domain::energy_mix::{MixInputs, MixLedger};
use crate::domain::integration::EnergyLedger;
use crate::domain::readings::{CycleReadings, MetricKey};

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
    /// Offset of the reference local time zone at this instant; the daily
    /// reset time-of-day is interpreted in this zone.
    fn local_offset(&self) -> FixedOffset;
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub daily_reset: NaiveTime,
    /// Solar fraction (0..=1) seeding the battery mix on first run.
    pub initial_battery_mix: f64,
}

/// The full persisted snapshot of the accounting engine. Restored at cold
/// start, mutated once per cycle, serialized after every cycle.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub energy: EnergyLedger,
    pub mix: MixLedger,
    pub last_reset: Option<DateTime<Utc>>,
    pub car_connected_was: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Flag(bool),
}

/// Published result of one accounting cycle: every instantaneous reading
/// that was present, every account total, every mix ratio, and the list of
/// keys that received a fresh update (vs. carrying a stale value forward).
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct CycleOutput {
    pub values: BTreeMap<String, MetricValue>,
    pub calculated_keys: Vec<String>,
}

impl CycleOutput {
    fn insert_number(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), MetricValue::Number(value));
    }

    fn insert_flag(&mut self, key: &str, value: bool) {
        self.values.insert(key.to_string(), MetricValue::Flag(value));
    }

    fn mark_calculated(&mut self, key: &str) {
        self.calculated_keys.push(key.to_string());
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        match self.values.get(key) {
            Some(MetricValue::Number(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(MetricValue::Flag(value)) => Some(*value),
            _ => None,
        }
    }
}

pub struct EnergyEngine {
    config: EngineConfig,
    state: EngineState,
    last_update: Option<DateTime<Utc>>,
    battery_mix_seed_pending: bool,
}

impl EnergyEngine {
    pub fn new(config: EngineConfig, state: EngineState) -> Self {
        let battery_mix_seed_pending =
            config.initial_battery_mix > 0.0 && !state.mix.has_sums(AccountKey::BatteryEnergy);
        Self {
            config,
            state,
            last_update: None,
            battery_mix_seed_pending,
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Run one accounting cycle over a complete set of normalized readings.
    ///
    /// Callers must validate readings before invoking this: a configured but
    /// unready sensor aborts the cycle upstream, so the state here is only
    /// ever mutated by whole, consistent cycles.
    pub fn run_cycle(
        &mut self,
        readings: &CycleReadings,
        now: DateTime<Utc>,
        local_offset: FixedOffset,
    ) -> CycleOutput {
        // Gap since the previous successful cycle; 0 on the first cycle so an
        // unbounded gap cannot integrate spurious energy. Clock skew clamps
        // to 0 rather than producing negative elapsed time.
        let elapsed_hours = self
            .last_update
            .map(|previous| ((now - previous).num_milliseconds() as f64 / 3_600_000.0).max(0.0))
            .unwrap_or(0.0);
        self.last_update = Some(now);
        let last_reset = *self.state.last_reset.get_or_insert(now);

        let mut output = CycleOutput::default();

        let grid_power = readings.number(MetricKey::GridPower);
        let pv_power = readings.number(MetricKey::PvPower);
        let battery_power = readings.number(MetricKey::BatteryPower);
        let car_charging_power = readings.number(MetricKey::CarChargingPower);

        for (key, value) in [
            (MetricKey::GridPower, grid_power),
            (MetricKey::CarChargingPower, car_charging_power),
            (
                MetricKey::CarChargingLimitPower,
                readings.number(MetricKey::CarChargingLimitPower),
            ),
            (MetricKey::PvPower, pv_power),
            (MetricKey::BatteryPower, battery_power),
        ] {
            if let Some(value) = value {
                output.insert_number(key.as_str(), value);
            }
        }

        // Net household draw. Battery discharge counts positive, EV charging
        // is excluded (accounted separately); absent terms are excluded from
        // the sum rather than fabricated as zero readings.
        let home_power = grid_power.unwrap_or(0.0) + pv_power.unwrap_or(0.0)
            + battery_power.unwrap_or(0.0)
            - car_charging_power.unwrap_or(0.0);
        output.insert_number("home_power", home_power);

        let car_connected = readings.flag(MetricKey::CarConnected);
        if let Some(connected) = car_connected {
            output.insert_flag("car_connected", connected);
        }
        if let Some(soc) = readings.number(MetricKey::CarSoc) {
            output.insert_number("car_soc", soc);
        }

        // Battery stored energy mirrors the sensor; it is state, not a flow.
        if let Some(stored) = readings.number(MetricKey::BatteryEnergy) {
            self.state.energy.set_total(AccountKey::BatteryEnergy, stored);
        }

        let integrations = [
            (
                AccountKey::GridInEnergyDaily,
                readings.number(MetricKey::GridInEnergy),
                grid_power,
            ),
            (
                AccountKey::GridOutEnergyDaily,
                readings.number(MetricKey::GridOutEnergy),
                grid_power.map(|power| -power),
            ),
            (
                AccountKey::PvEnergyDaily,
                readings.number(MetricKey::PvEnergy),
                pv_power,
            ),
            (
                AccountKey::CarChargingEnergy,
                readings.number(MetricKey::CarChargingEnergy),
                car_charging_power,
            ),
            (AccountKey::HomeEnergyDaily, None, Some(home_power)),
        ];
        for (key, energy_reading, power_reading) in integrations {
            if self
                .state
                .energy
                .integrate(key, energy_reading, power_reading, elapsed_hours)
            {
                output.mark_calculated(key.as_str());
            }
        }

        for (key, total) in self.state.energy.totals() {
            output.insert_number(key.as_str(), total);
        }

        self.seed_battery_mix_if_pending(readings);

        // Battery mix must come first: it feeds the home/EV apportionment
        // within the same cycle.
        let battery_mix_fraction = self.update_battery_mix(
            battery_power,
            pv_power,
            grid_power,
            elapsed_hours,
            &mut output,
        );

        let (home_usage, car_usage) = usage_fractions(home_power, car_charging_power);

        self.state.mix.apportion(
            AccountKey::HomeEnergyDaily,
            MixInputs {
                pv_power,
                grid_power,
                battery_power,
                battery_mix_fraction,
                elapsed_hours,
                usage_fraction: Some(home_usage),
            },
        );
        output.insert_number(
            "home_energy_mix_daily",
            self.state.mix.ratio(AccountKey::HomeEnergyDaily),
        );
        output.mark_calculated("home_energy_mix_daily");

        if car_charging_power.is_some() {
            self.state.mix.apportion(
                AccountKey::CarChargingEnergy,
                MixInputs {
                    pv_power,
                    grid_power,
                    battery_power,
                    battery_mix_fraction,
                    elapsed_hours,
                    usage_fraction: Some(car_usage),
                },
            );
            output.insert_number(
                "car_charging_energy_mix",
                self.state.mix.ratio(AccountKey::CarChargingEnergy),
            );
            output.mark_calculated("car_charging_energy_mix");
        }

        self.apply_daily_reset(now, last_reset, local_offset);
        self.apply_session_reset(readings, car_connected);

        output
    }

    fn seed_battery_mix_if_pending(&mut self, readings: &CycleReadings) {
        if !self.battery_mix_seed_pending {
            return;
        }
        self.battery_mix_seed_pending = false;

        let fraction = self.config.initial_battery_mix.clamp(0.0, 1.0);
        // Scale the seed by the stored-energy reading when available so real
        // watt-hour contributions do not swamp it within minutes.
        let scale = readings
            .number(MetricKey::BatteryEnergy)
            .filter(|stored| *stored > 0.0)
            .unwrap_or(1.0);
        self.state.mix.seed(
            AccountKey::BatteryEnergy,
            fraction * scale,
            (1.0 - fraction) * scale,
        );
        tracing::info!(fraction, scale, "seeded initial battery energy mix");
    }

    fn update_battery_mix(
        &mut self,
        battery_power: Option<f64>,
        pv_power: Option<f64>,
        grid_power: Option<f64>,
        elapsed_hours: f64,
        output: &mut CycleOutput,
    ) -> Option<f64> {
        let battery_power_value = battery_power?;

        if battery_power_value > 0.0 {
            // Discharge: redistribute by the battery's own fraction, keeping
            // the reported ratio stable while stored energy drains.
            let fraction = self.state.mix.ratio(AccountKey::BatteryEnergy);
            self.state.mix.apportion(
                AccountKey::BatteryEnergy,
                MixInputs {
                    pv_power: Some(0.0),
                    grid_power: Some(0.0),
                    battery_power: Some(battery_power_value),
                    battery_mix_fraction: Some(fraction),
                    elapsed_hours,
                    usage_fraction: None,
                },
            );
        } else {
            // Charge: the battery consumes its share of the pv/grid supply.
            let supply = pv_power.unwrap_or(0.0) + grid_power.unwrap_or(0.0);
            let usage_fraction = if supply > 0.0 {
                (-battery_power_value / supply).clamp(0.0, 1.0)
            } else {
                0.0
            };
            self.state.mix.apportion(
                AccountKey::BatteryEnergy,
                MixInputs {
                    pv_power,
                    grid_power,
                    battery_power: None,
                    battery_mix_fraction: None,
                    elapsed_hours,
                    usage_fraction: Some(usage_fraction),
                },
            );
        }

        let ratio = self.state.mix.ratio(AccountKey::BatteryEnergy);
        output.insert_number("battery_energy_mix", ratio);
        output.mark_calculated("battery_energy_mix");
        Some(ratio)
    }

    fn apply_daily_reset(
        &mut self,
        now: DateTime<Utc>,
        last_reset: DateTime<Utc>,
        local_offset: FixedOffset,
    ) {
        let local_date = now.with_timezone(&local_offset).date_naive();
        let Some(reset_instant) = local_date
            .and_time(self.config.daily_reset)
            .and_local_timezone(local_offset)
            .single()
            .map(|instant| instant.with_timezone(&Utc))
        else {
            return;
        };

        if now >= reset_instant && last_reset < reset_instant {
            tracing::info!(reset_instant = %reset_instant, "daily reset: zeroing daily accumulators");
            self.state.energy.reset_daily();
            self.state.mix.reset_daily();
            self.state.last_reset = Some(now);
        }
    }

    fn apply_session_reset(&mut self, readings: &CycleReadings, car_connected: Option<bool>) {
        let connected = car_connected.unwrap_or(false);

        if !self.state.car_connected_was && connected {
            tracing::info!("car plugged in: starting a fresh charging session");
            self.state
                .energy
                .set_total(AccountKey::CarChargingEnergy, 0.0);
            match readings.number(MetricKey::CarChargingEnergy) {
                Some(reading) => self
                    .state
                    .energy
                    .set_baseline(AccountKey::CarChargingEnergy, reading),
                None => self
                    .state
                    .energy
                    .clear_baseline(AccountKey::CarChargingEnergy),
            }
        }

        self.state.car_connected_was = connected;
    }
}

/// Split of a combined consumption flow between home and EV charging.
///
/// A denominator ≤ 0 (unusual sensor combinations) attributes everything to
/// home; both fractions are clamped to [0, 1] so no NaN or runaway ratio can
/// reach the mix sums.
fn usage_fractions(home_power: f64, car_charging_power: Option<f64>) -> (f64, f64) {
    let car_power = car_charging_power.unwrap_or(0.0);
    let denominator = home_power + car_power;
    if denominator <= 0.0 {
        return (1.0, 0.0);
    }
    (
        (home_power / denominator).clamp(0.0, 1.0),
        (car_power / denominator).clamp(0.0, 1.0),
    )
}
