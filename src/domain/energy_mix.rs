use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::accounts::AccountKey;

/// One cycle's power flows feeding an apportionment update.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MixInputs {
    pub pv_power: Option<f64>,
    pub grid_power: Option<f64>,
    pub battery_power: Option<f64>,
    /// The battery's own current solar fraction, used to redistribute
    /// discharge power into the pv/grid flows.
    pub battery_mix_fraction: Option<f64>,
    pub elapsed_hours: f64,
    /// Splits a combined flow between co-existing consumers (home vs. EV).
    pub usage_fraction: Option<f64>,
}

/// Per-account solar/grid origin accumulators (Wh). The ratio
/// `pv_sum / (pv_sum + grid_sum)` is the account's energy-mix fraction.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixLedger {
    pv_sums: BTreeMap<AccountKey, f64>,
    grid_sums: BTreeMap<AccountKey, f64>,
}

impl MixLedger {
    /// Attribute this cycle's consumed energy for `key` to solar or grid
    /// origin.
    ///
    /// No update happens without a grid power value; fabricating a
    /// 100%-solar attribution from incomplete data would skew the ratio.
    /// Discharging battery power (> 0) is redistributed into the pv/grid
    /// flows by `battery_mix_fraction` (grid-only without one); charging or
    /// idle battery power is folded into the grid flow. Contributions are
    /// floored at 0 before use, and both sums are clamped at 0 after the add.
    pub fn apportion(&mut self, key: AccountKey, inputs: MixInputs) {
        let Some(mut grid_power) = inputs.grid_power else {
            return;
        };
        let mut pv_power = inputs.pv_power.unwrap_or(0.0);

        if let Some(battery_power) = inputs.battery_power {
            if battery_power > 0.0 {
                match inputs.battery_mix_fraction {
                    Some(fraction) => {
                        pv_power += fraction * battery_power;
                        grid_power += (1.0 - fraction) * battery_power;
                    }
                    None => grid_power += battery_power,
                }
            } else {
                grid_power += battery_power;
            }
        }

        let mut pv_part = pv_power.max(0.0) * inputs.elapsed_hours;
        let mut grid_part = grid_power.max(0.0) * inputs.elapsed_hours;

        if let Some(usage_fraction) = inputs.usage_fraction {
            pv_part *= usage_fraction;
            grid_part *= usage_fraction;
        }

        let pv_sum = self.pv_sums.entry(key).or_insert(0.0);
        *pv_sum = (*pv_sum + pv_part).max(0.0);
        let grid_sum = self.grid_sums.entry(key).or_insert(0.0);
        *grid_sum = (*grid_sum + grid_part).max(0.0);
    }

    /// Solar fraction of the account's accumulated energy, 0 when empty.
    pub fn ratio(&self, key: AccountKey) -> f64 {
        let (pv_sum, grid_sum) = self.sums(key);
        let total = pv_sum + grid_sum;
        if total > 0.0 { pv_sum / total } else { 0.0 }
    }

    pub fn sums(&self, key: AccountKey) -> (f64, f64) {
        (
            self.pv_sums.get(&key).copied().unwrap_or(0.0),
            self.grid_sums.get(&key).copied().unwrap_or(0.0),
        )
    }

    pub fn has_sums(&self, key: AccountKey) -> bool {
        self.pv_sums.contains_key(&key) || self.grid_sums.contains_key(&key)
    }

    /// Directly place starting sums for an account (first-run battery seed).
    pub fn seed(&mut self, key: AccountKey, pv_sum: f64, grid_sum: f64) {
        self.pv_sums.insert(key, pv_sum.max(0.0));
        self.grid_sums.insert(key, grid_sum.max(0.0));
    }

    /// Daily boundary: drop every sum except the battery's, whose sums
    /// describe current battery content rather than a daily flow.
    pub fn reset_daily(&mut self) {
        self.pv_sums
            .retain(|key, _| *key == AccountKey::BatteryEnergy);
        self.grid_sums
            .retain(|key, _| *key == AccountKey::BatteryEnergy);
    }
}

#[cfg(test)]
mod tests {
    use super::{MixInputs, MixLedger};
    use crate::domain::accounts::AccountKey;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn splits_home_consumption_between_pv_and_grid() {
        let mut ledger = MixLedger::default();

        ledger.apportion(
            AccountKey::HomeEnergyDaily,
            MixInputs {
                pv_power: Some(2000.0),
                grid_power: Some(1000.0),
                battery_power: Some(0.0),
                elapsed_hours: 0.5,
                usage_fraction: Some(1.0),
                ..MixInputs::default()
            },
        );

        let (pv_sum, grid_sum) = ledger.sums(AccountKey::HomeEnergyDaily);
        assert_close(pv_sum, 1000.0);
        assert_close(grid_sum, 500.0);
        assert_close(ledger.ratio(AccountKey::HomeEnergyDaily), 2.0 / 3.0);
    }

    #[test]
    fn redistributes_discharge_power_by_battery_fraction() {
        let mut ledger = MixLedger::default();

        ledger.apportion(
            AccountKey::BatteryEnergy,
            MixInputs {
                pv_power: Some(0.0),
                grid_power: Some(0.0),
                battery_power: Some(500.0),
                battery_mix_fraction: Some(0.8),
                elapsed_hours: 1.0,
                usage_fraction: None,
            },
        );

        let (pv_sum, grid_sum) = ledger.sums(AccountKey::BatteryEnergy);
        assert_close(pv_sum, 400.0);
        assert_close(grid_sum, 100.0);
    }

    #[test]
    fn attributes_discharge_to_grid_without_a_fraction() {
        let mut ledger = MixLedger::default();

        ledger.apportion(
            AccountKey::HomeEnergyDaily,
            MixInputs {
                pv_power: Some(0.0),
                grid_power: Some(0.0),
                battery_power: Some(300.0),
                battery_mix_fraction: None,
                elapsed_hours: 1.0,
                usage_fraction: None,
            },
        );

        let (pv_sum, grid_sum) = ledger.sums(AccountKey::HomeEnergyDaily);
        assert_close(pv_sum, 0.0);
        assert_close(grid_sum, 300.0);
    }

    #[test]
    fn charging_battery_power_folds_into_grid_flow() {
        let mut ledger = MixLedger::default();

        ledger.apportion(
            AccountKey::HomeEnergyDaily,
            MixInputs {
                pv_power: Some(100.0),
                grid_power: Some(500.0),
                battery_power: Some(-200.0),
                elapsed_hours: 1.0,
                ..MixInputs::default()
            },
        );

        let (pv_sum, grid_sum) = ledger.sums(AccountKey::HomeEnergyDaily);
        assert_close(pv_sum, 100.0);
        assert_close(grid_sum, 300.0);
    }

    #[test]
    fn skips_update_without_grid_power() {
        let mut ledger = MixLedger::default();

        ledger.apportion(
            AccountKey::HomeEnergyDaily,
            MixInputs {
                pv_power: Some(2000.0),
                grid_power: None,
                elapsed_hours: 1.0,
                ..MixInputs::default()
            },
        );

        assert!(!ledger.has_sums(AccountKey::HomeEnergyDaily));
        assert_eq!(ledger.ratio(AccountKey::HomeEnergyDaily), 0.0);
    }

    #[test]
    fn floors_negative_flows_before_use() {
        let mut ledger = MixLedger::default();

        ledger.apportion(
            AccountKey::HomeEnergyDaily,
            MixInputs {
                pv_power: Some(-800.0),
                grid_power: Some(-100.0),
                elapsed_hours: 1.0,
                ..MixInputs::default()
            },
        );

        let (pv_sum, grid_sum) = ledger.sums(AccountKey::HomeEnergyDaily);
        assert_eq!(pv_sum, 0.0);
        assert_eq!(grid_sum, 0.0);
    }

    #[test]
    fn scales_contributions_by_usage_fraction() {
        let mut ledger = MixLedger::default();

        ledger.apportion(
            AccountKey::CarChargingEnergy,
            MixInputs {
                pv_power: Some(1000.0),
                grid_power: Some(1000.0),
                elapsed_hours: 1.0,
                usage_fraction: Some(0.25),
                ..MixInputs::default()
            },
        );

        let (pv_sum, grid_sum) = ledger.sums(AccountKey::CarChargingEnergy);
        assert_close(pv_sum, 250.0);
        assert_close(grid_sum, 250.0);
    }

    #[test]
    fn sums_never_go_negative() {
        let mut ledger = MixLedger::default();
        ledger.seed(AccountKey::HomeEnergyDaily, 10.0, 10.0);

        ledger.apportion(
            AccountKey::HomeEnergyDaily,
            MixInputs {
                pv_power: Some(1000.0),
                grid_power: Some(1000.0),
                elapsed_hours: 1.0,
                usage_fraction: Some(-5.0),
                ..MixInputs::default()
            },
        );

        let (pv_sum, grid_sum) = ledger.sums(AccountKey::HomeEnergyDaily);
        assert_eq!(pv_sum, 0.0);
        assert_eq!(grid_sum, 0.0);
    }

    #[test]
    fn ratio_stays_within_unit_interval() {
        let mut ledger = MixLedger::default();
        assert_eq!(ledger.ratio(AccountKey::BatteryEnergy), 0.0);

        ledger.seed(AccountKey::BatteryEnergy, 900.0, 100.0);
        let ratio = ledger.ratio(AccountKey::BatteryEnergy);
        assert!((0.0..=1.0).contains(&ratio));
        assert_close(ratio, 0.9);
    }

    #[test]
    fn daily_reset_keeps_only_battery_sums() {
        let mut ledger = MixLedger::default();
        ledger.seed(AccountKey::BatteryEnergy, 400.0, 100.0);
        ledger.seed(AccountKey::HomeEnergyDaily, 800.0, 200.0);
        ledger.seed(AccountKey::CarChargingEnergy, 50.0, 50.0);

        ledger.reset_daily();

        assert_eq!(ledger.sums(AccountKey::BatteryEnergy), (400.0, 100.0));
        assert!(!ledger.has_sums(AccountKey::HomeEnergyDaily));
        assert!(!ledger.has_sums(AccountKey::CarChargingEnergy));
    }
}
