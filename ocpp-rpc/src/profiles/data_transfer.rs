//! Vendor data transfer, open to both roles

use crate::registry::{Direction, Feature, Profile};
use crate::validate::{Field, Shape};

use super::common::status_info;

pub const PROFILE_NAME: &str = "DataTransfer";

pub fn profile() -> Profile {
    Profile::new(PROFILE_NAME).feature(Feature::new(
        "DataTransfer",
        Direction::Both,
        Shape::new("DataTransferRequest")
            .field(Field::string("messageId").max_len(50))
            .field(Field::any("data"))
            .field(Field::string("vendorId").required().max_len(255)),
        Shape::new("DataTransferResponse")
            .field(
                Field::enumeration("status", &["Accepted", "Rejected", "UnknownMessageId", "UnknownVendorId"])
                    .required(),
            )
            .field(Field::object("statusInfo", status_info()))
            .field(Field::any("data")),
    ))
}
