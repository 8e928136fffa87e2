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

//! Bluetooth communication module.
//!
//! Drives battery, heart rate and activity acquisition from a BLE heart
//! rate monitor over a GATT client link.

mod bluez;
pub mod decoder;
mod driver;
pub mod gatt_uuids;
mod measurement;
pub mod mock;
mod session;
mod timer;
mod transport;

pub use bluez::BluezTransport;
pub use driver::{channel_sink, DriverConfig, DriverEvent, EventSink, SessionDriver};
pub use measurement::{
    BatteryMeasurement, CharacteristicKind, CustomMeasurement, HeartRateMeasurement, Measurement,
    Reading, SensorContact,
};
pub use session::{
    AcquisitionState, GattRequest, KindCounters, LastValues, Session, SessionPolicy, Transition,
};
pub use timer::SessionTimer;
pub use transport::{
    input_channel, CharacteristicHandle, CharacteristicSet, DriverInput, GattProfile, GattService,
    GattTransport, InputReceiver, InputSender, LinkState, PeripheralAddress, TransportEvent,
};
