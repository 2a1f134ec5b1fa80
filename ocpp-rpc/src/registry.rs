//! Feature and profile registry
//!
//! A [`Feature`] describes one message type: its name, who may send it, and
//! the shapes of its request and response. Features are grouped into
//! [`Profile`]s (functional blocks such as "Diagnostics"). A deployment
//! registers the profiles it supports once at startup; the resulting
//! [`Registry`] is shared read-only behind an `Arc` from then on.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RegistryError;
use crate::validate::Shape;

/// The two fixed protocol roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Csms,
    ChargingStation,
}

impl Role {
    /// The role on the other end of a connection
    pub fn peer(self) -> Role {
        match self {
            Role::Csms => Role::ChargingStation,
            Role::ChargingStation => Role::Csms,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Csms => write!(f, "CSMS"),
            Role::ChargingStation => write!(f, "charging station"),
        }
    }
}

/// Which role initiates a message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// CSMS -> charging station
    ToStation,
    /// Charging station -> CSMS
    ToCsms,
    /// Either side may initiate
    Both,
}

impl Direction {
    pub fn sender_allowed(self, role: Role) -> bool {
        match self {
            Direction::ToStation => role == Role::Csms,
            Direction::ToCsms => role == Role::ChargingStation,
            Direction::Both => true,
        }
    }

    pub fn receiver_allowed(self, role: Role) -> bool {
        self.sender_allowed(role.peer())
    }
}

/// Message type descriptor
#[derive(Debug)]
pub struct Feature {
    name: String,
    direction: Direction,
    request: Shape,
    response: Shape,
}

impl Feature {
    pub fn new(name: impl Into<String>, direction: Direction, request: Shape, response: Shape) -> Self {
        Self {
            name: name.into(),
            direction,
            request,
            response,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn request(&self) -> &Shape {
        &self.request
    }

    pub fn response(&self) -> &Shape {
        &self.response
    }
}

/// Named bundle of features
#[derive(Debug, Clone)]
pub struct Profile {
    name: String,
    features: Vec<Arc<Feature>>,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            features: Vec::new(),
        }
    }

    pub fn feature(mut self, feature: Feature) -> Self {
        self.features.push(Arc::new(feature));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn features(&self) -> &[Arc<Feature>] {
        &self.features
    }
}

#[derive(Debug)]
struct Entry {
    profile: String,
    feature: Arc<Feature>,
}

/// Catalog of every message type known to a deployment
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<String, Entry>,
    profiles: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a set of active profiles
    pub fn with_profiles<I>(profiles: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = Profile>,
    {
        let mut registry = Self::new();
        for profile in profiles {
            registry.register(&profile)?;
        }
        Ok(registry)
    }

    /// Add every feature of `profile`.
    ///
    /// Either all features are added or none. Registering the same profile
    /// twice is a no-op. A name clash with another profile, or a different
    /// profile reusing a registered profile name, is an error.
    pub fn register(&mut self, profile: &Profile) -> Result<(), RegistryError> {
        for feature in &profile.features {
            if let Some(existing) = self.entries.get(feature.name()) {
                if existing.profile != profile.name {
                    return Err(RegistryError::DuplicateMessageType {
                        name: feature.name().to_string(),
                        existing: existing.profile.clone(),
                        profile: profile.name.clone(),
                    });
                }
            }
        }

        if self.profiles.contains(&profile.name) {
            if !self.holds_exactly(profile) {
                return Err(RegistryError::ConflictingProfile(profile.name.clone()));
            }
            debug!(profile = %profile.name, "Profile already registered");
            return Ok(());
        }

        for feature in &profile.features {
            self.entries.insert(
                feature.name().to_string(),
                Entry {
                    profile: profile.name.clone(),
                    feature: feature.clone(),
                },
            );
        }
        self.profiles.push(profile.name.clone());
        debug!(
            profile = %profile.name,
            features = profile.features.len(),
            "Registered profile"
        );
        Ok(())
    }

    /// Whether the features registered under `profile`'s name are exactly its own
    fn holds_exactly(&self, profile: &Profile) -> bool {
        let registered = self
            .entries
            .values()
            .filter(|e| e.profile == profile.name)
            .count();
        registered == profile.features.len()
            && profile.features.iter().all(|f| {
                self.entries
                    .get(f.name())
                    .map_or(false, |e| Arc::ptr_eq(&e.feature, f))
            })
    }

    /// Look up a message type by name
    pub fn resolve(&self, name: &str) -> Result<&Arc<Feature>, RegistryError> {
        self.entries
            .get(name)
            .map(|e| &e.feature)
            .ok_or_else(|| RegistryError::UnknownMessageType(name.to_string()))
    }

    /// Whether `role` is an expected sender of `name`
    pub fn supports(&self, name: &str, role: Role) -> bool {
        self.entries
            .get(name)
            .map_or(false, |e| e.feature.direction().sender_allowed(role))
    }

    pub fn profile_of(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|e| e.profile.as_str())
    }

    pub fn profiles(&self) -> &[String] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of the message types `role` must be able to receive, sorted
    pub fn inbound_for(&self, role: Role) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .entries
            .values()
            .filter(|e| e.feature.direction().receiver_allowed(role))
            .map(|e| e.feature.name())
            .collect();
        names.sort_unstable();
        names
    }
}
