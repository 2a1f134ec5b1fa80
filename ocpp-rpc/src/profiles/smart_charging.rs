//! Smart charging: composite schedules and profile removal

use crate::registry::{Direction, Feature, Profile};
use crate::validate::{Field, Rule, Shape};

use super::common::{charging_schedule_period, status_info, status_response, CHARGING_RATE_UNIT};

pub const PROFILE_NAME: &str = "SmartCharging";

pub fn profile() -> Profile {
    Profile::new(PROFILE_NAME)
        .feature(get_composite_schedule())
        .feature(clear_charging_profile())
}

fn get_composite_schedule() -> Feature {
    let schedule = Shape::new("CompositeSchedule")
        .field(
            Field::array_of("chargingSchedulePeriod", charging_schedule_period())
                .required()
                .min_items(1),
        )
        .field(Field::integer("evseId").required().non_negative())
        .field(Field::integer("duration").required())
        .field(Field::date_time("scheduleStart").required())
        .field(Field::enumeration("chargingRateUnit", CHARGING_RATE_UNIT).required());

    Feature::new(
        "GetCompositeSchedule",
        Direction::ToStation,
        Shape::new("GetCompositeScheduleRequest")
            .field(Field::integer("duration").required().non_negative())
            .field(Field::enumeration("chargingRateUnit", CHARGING_RATE_UNIT))
            .field(Field::integer("evseId").required().non_negative()),
        Shape::new("GetCompositeScheduleResponse")
            .field(Field::enumeration("status", &["Accepted", "Rejected"]).required())
            .field(Field::object("statusInfo", status_info()))
            .field(Field::object("schedule", schedule)),
    )
}

fn clear_charging_profile() -> Feature {
    let criteria = Shape::new("ClearChargingProfile")
        .field(Field::integer("evseId").non_negative())
        .field(Field::enumeration(
            "chargingProfilePurpose",
            &[
                "ChargingStationExternalConstraints",
                "ChargingStationMaxProfile",
                "TxDefaultProfile",
                "TxProfile",
            ],
        ))
        .field(Field::integer("stackLevel").non_negative());

    Feature::new(
        "ClearChargingProfile",
        Direction::ToStation,
        Shape::new("ClearChargingProfileRequest")
            .field(Field::integer("chargingProfileId"))
            .field(Field::object("chargingProfileCriteria", criteria))
            .rule(Rule::AtLeastOneOf(&["chargingProfileId", "chargingProfileCriteria"])),
        status_response("ClearChargingProfileResponse", &["Accepted", "Unknown"]),
    )
}
