//! Provisioning: registration, liveness and reset

use crate::registry::{Direction, Feature, Profile};
use crate::validate::{Field, Shape};

use super::common::{status_info, status_response};

pub const PROFILE_NAME: &str = "Provisioning";

const BOOT_REASON: &[&str] = &[
    "ApplicationReset",
    "FirmwareUpdate",
    "LocalReset",
    "PowerUp",
    "RemoteReset",
    "ScheduledReset",
    "Triggered",
    "Unknown",
    "Watchdog",
];

pub fn profile() -> Profile {
    Profile::new(PROFILE_NAME)
        .feature(boot_notification())
        .feature(heartbeat())
        .feature(reset())
}

fn boot_notification() -> Feature {
    let modem = Shape::new("Modem")
        .field(Field::string("iccid").max_len(20))
        .field(Field::string("imsi").max_len(20));
    let station = Shape::new("ChargingStation")
        .field(Field::string("serialNumber").max_len(25))
        .field(Field::string("model").required().max_len(20))
        .field(Field::string("vendorName").required().max_len(50))
        .field(Field::string("firmwareVersion").max_len(50))
        .field(Field::object("modem", modem));

    Feature::new(
        "BootNotification",
        Direction::ToCsms,
        Shape::new("BootNotificationRequest")
            .field(Field::object("chargingStation", station).required())
            .field(Field::enumeration("reason", BOOT_REASON).required()),
        Shape::new("BootNotificationResponse")
            .field(Field::date_time("currentTime").required())
            .field(Field::integer("interval").required())
            .field(Field::enumeration("status", &["Accepted", "Pending", "Rejected"]).required())
            .field(Field::object("statusInfo", status_info())),
    )
}

fn heartbeat() -> Feature {
    Feature::new(
        "Heartbeat",
        Direction::ToCsms,
        Shape::new("HeartbeatRequest"),
        Shape::new("HeartbeatResponse").field(Field::date_time("currentTime").required()),
    )
}

fn reset() -> Feature {
    Feature::new(
        "Reset",
        Direction::ToStation,
        Shape::new("ResetRequest")
            .field(Field::enumeration("type", &["Immediate", "OnIdle"]).required())
            .field(Field::integer("evseId").non_negative()),
        status_response("ResetResponse", &["Accepted", "Rejected", "Scheduled"]),
    )
}
