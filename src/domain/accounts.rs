use serde::{Deserialize, Serialize};

/// Named accumulators tracked by the engine. Serialized form doubles as the
/// published metric key for the account's running total.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AccountKey {
    GridInEnergyDaily,
    GridOutEnergyDaily,
    PvEnergyDaily,
    HomeEnergyDaily,
    CarChargingEnergy,
    BatteryEnergy,
}

impl AccountKey {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountKey::GridInEnergyDaily => "grid_in_energy_daily",
            AccountKey::GridOutEnergyDaily => "grid_out_energy_daily",
            AccountKey::PvEnergyDaily => "pv_energy_daily",
            AccountKey::HomeEnergyDaily => "home_energy_daily",
            AccountKey::CarChargingEnergy => "car_charging_energy",
            AccountKey::BatteryEnergy => "battery_energy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AccountKey;

    #[test]
    fn serialized_form_matches_published_key() {
        let json = serde_json::to_string(&AccountKey::GridInEnergyDaily)
            .expect("account key should serialize");
        assert_eq!(json, "\"grid_in_energy_daily\"");

        let parsed: AccountKey =
            serde_json::from_str("\"battery_energy\"").expect("account key should deserialize");
        assert_eq!(parsed, AccountKey::BatteryEnergy);
        assert_eq!(parsed.as_str(), "battery_energy");
    }
}
