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

//! In-memory transport that records requests and optionally plays a
//! well-behaved peripheral.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use super::gatt_uuids;
use super::transport::{
    CharacteristicHandle, DriverInput, GattService, GattTransport, InputSender, LinkState,
    PeripheralAddress, TransportEvent,
};
use crate::error::TransportError;

/// A request received by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattCall {
    Initialize,
    Connect(String),
    Disconnect,
    DiscoverServices,
    Read(Uuid),
    SetNotify(Uuid, bool),
    Close,
}

/// Shared view of the requests a [`MockTransport`] received.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<GattCall>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<GattCall> {
        self.0.lock().clone()
    }

    /// Return and forget the recorded calls.
    pub fn take(&self) -> Vec<GattCall> {
        std::mem::take(&mut *self.0.lock())
    }

    fn push(&self, call: GattCall) {
        self.0.lock().push(call);
    }
}

pub struct MockTransport {
    inputs: InputSender,
    log: CallLog,
    available: bool,
    auto_respond: bool,
    services: Vec<GattService>,
    read_values: HashMap<Uuid, Vec<u8>>,
    address: Option<String>,
}

impl MockTransport {
    /// A transport that only records requests.
    pub fn new(inputs: InputSender) -> Self {
        Self {
            inputs,
            log: CallLog::default(),
            available: true,
            auto_respond: false,
            services: Vec::new(),
            read_values: HashMap::new(),
            address: None,
        }
    }

    /// A transport that answers connect, discovery and reads like an HxM
    /// strap offering all three characteristics.
    pub fn with_sample_peripheral(inputs: InputSender) -> Self {
        let mut read_values = HashMap::new();
        read_values.insert(gatt_uuids::BATTERY_LEVEL, vec![0x5A]);

        Self {
            auto_respond: true,
            services: sample_services(),
            read_values,
            ..Self::new(inputs)
        }
    }

    /// Simulate a host without a Bluetooth stack.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    fn send(&self, event: TransportEvent) {
        let _ = self.inputs.send(DriverInput::Transport(event));
    }
}

/// Services offered by a Zephyr HxM strap.
pub fn sample_services() -> Vec<GattService> {
    vec![
        GattService {
            uuid: gatt_uuids::HEART_RATE_SERVICE,
            characteristics: vec![gatt_uuids::HEART_RATE_MEASUREMENT],
        },
        GattService {
            uuid: gatt_uuids::BATTERY_SERVICE,
            characteristics: vec![gatt_uuids::BATTERY_LEVEL],
        },
        GattService {
            uuid: gatt_uuids::CUSTOM_SERVICE,
            characteristics: vec![gatt_uuids::CUSTOM_MEASUREMENT],
        },
    ]
}

impl GattTransport for MockTransport {
    async fn initialize(&mut self) -> Result<(), TransportError> {
        self.log.push(GattCall::Initialize);
        if self.available {
            Ok(())
        } else {
            Err(TransportError::Unavailable("no adapter".to_string()))
        }
    }

    fn connect(&mut self, address: &PeripheralAddress) {
        self.log.push(GattCall::Connect(address.to_string()));
        self.address = Some(address.to_string());
        if self.auto_respond {
            self.send(TransportEvent::ConnectionStateChanged {
                address: address.to_string(),
                state: LinkState::Connected,
            });
        }
    }

    fn disconnect(&mut self) {
        self.log.push(GattCall::Disconnect);
        if let (true, Some(address)) = (self.auto_respond, self.address.clone()) {
            self.send(TransportEvent::ConnectionStateChanged {
                address,
                state: LinkState::Disconnected,
            });
        }
    }

    fn discover_services(&mut self) {
        self.log.push(GattCall::DiscoverServices);
        if self.auto_respond {
            self.send(TransportEvent::ServicesDiscovered(self.services.clone()));
        }
    }

    fn read(&mut self, characteristic: &CharacteristicHandle) {
        self.log.push(GattCall::Read(characteristic.uuid));
        if !self.auto_respond {
            return;
        }
        if let Some(value) = self.read_values.get(&characteristic.uuid) {
            self.send(TransportEvent::CharacteristicRead {
                uuid: characteristic.uuid,
                value: value.clone(),
            });
        }
    }

    fn set_notify(&mut self, characteristic: &CharacteristicHandle, enable: bool) {
        self.log
            .push(GattCall::SetNotify(characteristic.uuid, enable));
    }

    fn close(&mut self) {
        self.log.push(GattCall::Close);
        self.address = None;
    }
}
