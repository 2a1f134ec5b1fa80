//! Tariff and cost

use crate::registry::{Direction, Feature, Profile};
use crate::validate::{Field, Shape};

pub const PROFILE_NAME: &str = "TariffCost";

pub fn profile() -> Profile {
    Profile::new(PROFILE_NAME).feature(Feature::new(
        "CostUpdated",
        Direction::ToStation,
        Shape::new("CostUpdatedRequest")
            .field(Field::number("totalCost").required())
            .field(Field::string("transactionId").required().max_len(36)),
        Shape::new("CostUpdatedResponse"),
    ))
}
