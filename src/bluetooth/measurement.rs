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

//! Decoded measurements delivered to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::gatt_uuids;

/// The three characteristics the driver acquires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacteristicKind {
    Battery,
    HeartRate,
    Custom,
}

impl CharacteristicKind {
    /// Session entry priority.
    pub const PRIORITY: [CharacteristicKind; 3] = [
        CharacteristicKind::Battery,
        CharacteristicKind::HeartRate,
        CharacteristicKind::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CharacteristicKind::Battery => "battery",
            CharacteristicKind::HeartRate => "heart_rate",
            CharacteristicKind::Custom => "custom",
        }
    }

    /// Default characteristic UUID for this kind.
    pub fn default_uuid(&self) -> Uuid {
        match self {
            CharacteristicKind::Battery => gatt_uuids::BATTERY_LEVEL,
            CharacteristicKind::HeartRate => gatt_uuids::HEART_RATE_MEASUREMENT,
            CharacteristicKind::Custom => gatt_uuids::CUSTOM_MEASUREMENT,
        }
    }

    /// Battery is read, the others notify.
    pub fn is_notify(&self) -> bool {
        !matches!(self, CharacteristicKind::Battery)
    }
}

/// Sensor contact status from flag bits 1-2 of a heart rate measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorContact {
    Unsupported,
    NotDetected,
    Detected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateMeasurement {
    /// Beats per minute.
    pub heart_rate: u16,
    pub sensor_contact: SensorContact,
    /// Cumulative energy expended in kJ.
    pub energy_expended: Option<u16>,
    /// R-R intervals in units of 1/1024 s.
    pub rr_intervals: Option<Vec<u16>>,
}

impl HeartRateMeasurement {
    /// R-R intervals converted to milliseconds.
    pub fn rr_intervals_ms(&self) -> Vec<f64> {
        self.rr_intervals
            .iter()
            .flatten()
            .map(|&rr| f64::from(rr) * 1000.0 / 1024.0)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryMeasurement {
    /// Remaining charge in percent (0-100).
    pub level: u8,
}

/// Vendor activity data. Absent fields were not reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomMeasurement {
    pub activity: Option<u16>,
    pub peak_acceleration: Option<u16>,
}

/// Kind-specific decoded fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reading {
    HeartRate(HeartRateMeasurement),
    Battery(BatteryMeasurement),
    Custom(CustomMeasurement),
}

impl Reading {
    pub fn kind(&self) -> CharacteristicKind {
        match self {
            Reading::HeartRate(_) => CharacteristicKind::HeartRate,
            Reading::Battery(_) => CharacteristicKind::Battery,
            Reading::Custom(_) => CharacteristicKind::Custom,
        }
    }
}

/// A decoded value stamped with its source characteristic and capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub uuid: Uuid,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub reading: Reading,
}

impl Measurement {
    pub fn new(uuid: Uuid, reading: Reading) -> Self {
        Self {
            uuid,
            timestamp: Utc::now(),
            reading,
        }
    }

    pub fn kind(&self) -> CharacteristicKind {
        self.reading.kind()
    }
}
