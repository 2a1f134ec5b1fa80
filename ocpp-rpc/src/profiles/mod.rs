//! Message catalog
//!
//! Each submodule declares one profile as data: message names, who sends
//! them, and the shapes of their bodies.

pub mod common;
pub mod data_transfer;
pub mod diagnostics;
pub mod provisioning;
pub mod smart_charging;
pub mod tariff_cost;

use crate::error::RegistryError;
use crate::registry::{Profile, Registry};

/// Every profile this crate knows about
pub fn all() -> Vec<Profile> {
    vec![
        provisioning::profile(),
        diagnostics::profile(),
        tariff_cost::profile(),
        smart_charging::profile(),
        data_transfer::profile(),
    ]
}

/// Look up a profile by name
pub fn by_name(name: &str) -> Option<Profile> {
    all().into_iter().find(|p| p.name() == name)
}

/// Registry with every known profile active
pub fn standard_registry() -> Result<Registry, RegistryError> {
    Registry::with_profiles(all())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Role;

    #[test]
    fn test_standard_registry_has_no_collisions() {
        let registry = standard_registry().unwrap();
        let total: usize = all().iter().map(|p| p.features().len()).sum();
        assert_eq!(registry.len(), total);
        assert_eq!(registry.profiles().len(), 5);
    }

    #[test]
    fn test_roles_split_the_catalog() {
        let registry = standard_registry().unwrap();
        assert!(registry.supports("CostUpdated", Role::Csms));
        assert!(registry.supports("LogStatusNotification", Role::ChargingStation));
        assert!(registry.supports("DataTransfer", Role::Csms));
        assert!(registry.supports("DataTransfer", Role::ChargingStation));

        let station = registry.inbound_for(Role::ChargingStation);
        assert!(station.contains(&"SetMonitoringLevel"));
        assert!(!station.contains(&"Heartbeat"));
    }

    #[test]
    fn test_by_name() {
        assert_eq!(by_name("TariffCost").unwrap().features()[0].name(), "CostUpdated");
        assert!(by_name("Firmware").is_none());
    }
}
