use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::accounts::AccountKey;

/// Per-account running totals (Wh) for the current accounting period, plus
/// baselines for accounts driven by monotonic cumulative sensors.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyLedger {
    totals: BTreeMap<AccountKey, f64>,
    baselines: BTreeMap<AccountKey, f64>,
}

impl EnergyLedger {
    pub fn total(&self, key: AccountKey) -> f64 {
        self.totals.get(&key).copied().unwrap_or(0.0)
    }

    pub fn totals(&self) -> impl Iterator<Item = (AccountKey, f64)> + '_ {
        self.totals.iter().map(|(key, total)| (*key, *total))
    }

    pub fn baseline(&self, key: AccountKey) -> Option<f64> {
        self.baselines.get(&key).copied()
    }

    pub fn set_total(&mut self, key: AccountKey, value: f64) {
        self.totals.insert(key, value);
    }

    pub fn set_baseline(&mut self, key: AccountKey, value: f64) {
        self.baselines.insert(key, value);
    }

    pub fn clear_baseline(&mut self, key: AccountKey) {
        self.baselines.remove(&key);
    }

    /// Update one account from either a cumulative energy sensor or a power
    /// sensor integrated over `elapsed_hours`. Returns whether the account
    /// was actively updated this cycle.
    ///
    /// A cumulative reading always wins over a power reading. The first
    /// cumulative observation captures the baseline and yields total 0;
    /// later readings yield `max(0, reading - baseline)`. Power integration
    /// only adds positive power (bidirectional sensors measuring the wrong
    /// direction must not produce negative energy) and rounds the running
    /// total to 3 decimals.
    pub fn integrate(
        &mut self,
        key: AccountKey,
        energy_reading: Option<f64>,
        power_reading: Option<f64>,
        elapsed_hours: f64,
    ) -> bool {
        if let Some(reading) = energy_reading {
            let baseline = *self.baselines.entry(key).or_insert(reading);
            self.totals.insert(key, (reading - baseline).max(0.0));
            return true;
        }

        if let Some(power) = power_reading
            && elapsed_hours > 0.0
            && power > 0.0
        {
            let previous = self.total(key);
            self.totals
                .insert(key, round3(previous + power * elapsed_hours));
            return true;
        }

        false
    }

    /// Daily boundary: drop every total and baseline except the EV charging
    /// session, which survives a boundary it straddles.
    pub fn reset_daily(&mut self) {
        self.totals
            .retain(|key, _| *key == AccountKey::CarChargingEnergy);
        self.baselines
            .retain(|key, _| *key == AccountKey::CarChargingEnergy);
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
