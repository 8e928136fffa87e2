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

//! GATT service and characteristic UUIDs used by heart-rate monitors.

use uuid::Uuid;

/// Bluetooth SIG base UUID, `0000xxxx-0000-1000-8000-00805f9b34fb`.
const BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit assigned number into a full 128-bit UUID.
pub const fn from_short(short: u16) -> Uuid {
    Uuid::from_u128(BASE_UUID | ((short as u128) << 96))
}

/// Heart Rate service.
pub const HEART_RATE_SERVICE: Uuid = from_short(0x180D);

/// Heart Rate Measurement characteristic.
/// Properties: Notify
pub const HEART_RATE_MEASUREMENT: Uuid = from_short(0x2A37);

/// Battery service.
pub const BATTERY_SERVICE: Uuid = from_short(0x180F);

/// Battery Level characteristic.
/// Properties: Read (Notify optional)
pub const BATTERY_LEVEL: Uuid = from_short(0x2A19);

/// Client Characteristic Configuration descriptor.
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = from_short(0x2902);

/// Zephyr HxM vendor service carrying activity data.
pub const CUSTOM_SERVICE: Uuid = Uuid::from_u128(0xbefdff20_c979_11e1_9b21_0800200c9a66);

/// Zephyr HxM activity / peak acceleration characteristic.
/// Properties: Notify
pub const CUSTOM_MEASUREMENT: Uuid = Uuid::from_u128(0xbefdff60_c979_11e1_9b21_0800200c9a66);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid_expansion() {
        assert_eq!(
            HEART_RATE_MEASUREMENT.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            BATTERY_SERVICE.to_string(),
            "0000180f-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            CLIENT_CHARACTERISTIC_CONFIG.to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_custom_uuid_format() {
        assert_eq!(
            CUSTOM_MEASUREMENT.to_string(),
            "befdff60-c979-11e1-9b21-0800200c9a66"
        );
    }
}
