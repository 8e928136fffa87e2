// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Transport abstraction between the session driver and a BLE stack.
//!
//! Every request except `initialize` is fire-and-forget: the transport
//! queues it and reports the outcome later as a [`TransportEvent`] on the
//! driver's input queue. Implementations must keep at most one GATT request
//! in flight.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::gatt_uuids;
use super::measurement::CharacteristicKind;
use crate::error::{DriverError, TransportError};

/// Link state of the peripheral connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "Disconnected",
            LinkState::Connecting => "Connecting...",
            LinkState::Connected => "Connected",
        }
    }
}

/// Hardware address of a peripheral, normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralAddress(String);

impl PeripheralAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PeripheralAddress {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<&str> = s.trim().split(':').collect();
        let valid = octets.len() == 6
            && octets
                .iter()
                .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
        if !valid {
            return Err(DriverError::InvalidAddress(s.to_string()));
        }
        Ok(Self(s.trim().to_ascii_uppercase()))
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A discovered service and the characteristics it offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// Opaque reference to one characteristic of interest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandle {
    pub kind: CharacteristicKind,
    pub service: Uuid,
    pub uuid: Uuid,
}

/// Service/characteristic UUID pairs the driver looks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattProfile {
    pub battery: (Uuid, Uuid),
    pub heart_rate: (Uuid, Uuid),
    pub custom: (Uuid, Uuid),
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            battery: (gatt_uuids::BATTERY_SERVICE, gatt_uuids::BATTERY_LEVEL),
            heart_rate: (
                gatt_uuids::HEART_RATE_SERVICE,
                gatt_uuids::HEART_RATE_MEASUREMENT,
            ),
            custom: (gatt_uuids::CUSTOM_SERVICE, gatt_uuids::CUSTOM_MEASUREMENT),
        }
    }
}

impl GattProfile {
    fn uuids(&self, kind: CharacteristicKind) -> (Uuid, Uuid) {
        match kind {
            CharacteristicKind::Battery => self.battery,
            CharacteristicKind::HeartRate => self.heart_rate,
            CharacteristicKind::Custom => self.custom,
        }
    }
}

/// Handles for the three characteristics of interest; absent when the
/// peripheral does not offer them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacteristicSet {
    pub battery: Option<CharacteristicHandle>,
    pub heart_rate: Option<CharacteristicHandle>,
    pub custom: Option<CharacteristicHandle>,
}

impl CharacteristicSet {
    /// Pick out the characteristics of interest from a discovery result.
    pub fn resolve(services: &[GattService], profile: &GattProfile) -> Self {
        let find = |kind: CharacteristicKind| {
            let (service_uuid, char_uuid) = profile.uuids(kind);
            services
                .iter()
                .filter(|s| s.uuid == service_uuid)
                .find(|s| s.characteristics.contains(&char_uuid))
                .map(|s| CharacteristicHandle {
                    kind,
                    service: s.uuid,
                    uuid: char_uuid,
                })
        };

        Self {
            battery: find(CharacteristicKind::Battery),
            heart_rate: find(CharacteristicKind::HeartRate),
            custom: find(CharacteristicKind::Custom),
        }
    }

    pub fn get(&self, kind: CharacteristicKind) -> Option<&CharacteristicHandle> {
        match kind {
            CharacteristicKind::Battery => self.battery.as_ref(),
            CharacteristicKind::HeartRate => self.heart_rate.as_ref(),
            CharacteristicKind::Custom => self.custom.as_ref(),
        }
    }

    /// Which characteristic of interest a UUID belongs to.
    pub fn kind_of(&self, uuid: &Uuid) -> Option<CharacteristicKind> {
        [&self.battery, &self.heart_rate, &self.custom]
            .into_iter()
            .flatten()
            .find(|h| h.uuid == *uuid)
            .map(|h| h.kind)
    }

    pub fn is_empty(&self) -> bool {
        self.battery.is_none() && self.heart_rate.is_none() && self.custom.is_none()
    }
}

/// Outcomes reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Link state changed for the peripheral at `address`.
    ConnectionStateChanged { address: String, state: LinkState },
    /// Service discovery finished.
    ServicesDiscovered(Vec<GattService>),
    /// Result of a one-shot read.
    CharacteristicRead { uuid: Uuid, value: Vec<u8> },
    /// Notification pushed by the peripheral.
    CharacteristicChanged { uuid: Uuid, value: Vec<u8> },
    /// A single GATT request failed; the link is still up.
    RequestFailed(String),
}

/// Everything the driver reacts to, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverInput {
    Transport(TransportEvent),
    /// A session timer expired. Carries the timer generation.
    Timeout(u64),
}

pub type InputSender = mpsc::UnboundedSender<DriverInput>;
pub type InputReceiver = mpsc::UnboundedReceiver<DriverInput>;

/// Create the driver input queue.
pub fn input_channel() -> (InputSender, InputReceiver) {
    mpsc::unbounded_channel()
}

/// A BLE stack that tolerates one outstanding GATT request at a time.
pub trait GattTransport: Send {
    /// Acquire the platform adapter.
    fn initialize(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Open, or reopen, a link to `address`.
    fn connect(&mut self, address: &PeripheralAddress);

    fn disconnect(&mut self);

    fn discover_services(&mut self);

    fn read(&mut self, characteristic: &CharacteristicHandle);

    fn set_notify(&mut self, characteristic: &CharacteristicHandle, enable: bool);

    /// Release every transport resource.
    fn close(&mut self);
}
