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

//! Characteristic value codecs.
//!
//! Heart Rate Measurement (0x2A37) layout, all multi-byte fields little-endian:
//!
//! | Flag bit | Meaning                                        |
//! |----------|------------------------------------------------|
//! | 0        | heart rate is u16 (else u8)                    |
//! | 1        | sensor contact detected                        |
//! | 2        | sensor contact supported                       |
//! | 3        | u16 energy expended follows the heart rate     |
//! | 4        | u16 R-R intervals (1/1024 s) fill the rest     |
//!
//! Battery Level (0x2A19) is a single u8 percentage.
//!
//! The HxM custom measurement carries a flags byte followed by an optional
//! u16 activity (bit 0) and an optional u16 peak acceleration (bit 1).

use bitflags::bitflags;

use super::measurement::{
    BatteryMeasurement, CharacteristicKind, CustomMeasurement, HeartRateMeasurement, Reading,
    SensorContact,
};
use crate::error::DecodeError;

bitflags! {
    /// Heart Rate Measurement flags byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeartRateFlags: u8 {
        const HEART_RATE_U16 = 1 << 0;
        const CONTACT_DETECTED = 1 << 1;
        const CONTACT_SUPPORTED = 1 << 2;
        const ENERGY_EXPENDED = 1 << 3;
        const RR_INTERVALS = 1 << 4;
    }
}

bitflags! {
    /// Custom measurement flags byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CustomFlags: u8 {
        const ACTIVITY = 1 << 0;
        const PEAK_ACCELERATION = 1 << 1;
    }
}

/// Forward-only reader over a characteristic value.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, field: &'static str, needed: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < needed {
            return Err(DecodeError::Truncated {
                field,
                needed,
                got: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(bytes)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(field, 1)?[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        let bytes = self.take(field, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

/// Decode a value received from the characteristic of the given kind.
pub fn decode(kind: CharacteristicKind, value: &[u8]) -> Result<Reading, DecodeError> {
    match kind {
        CharacteristicKind::HeartRate => decode_heart_rate(value).map(Reading::HeartRate),
        CharacteristicKind::Battery => decode_battery(value).map(Reading::Battery),
        CharacteristicKind::Custom => decode_custom(value).map(Reading::Custom),
    }
}

pub fn decode_heart_rate(value: &[u8]) -> Result<HeartRateMeasurement, DecodeError> {
    if value.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut cursor = Cursor::new(value);
    let flags = HeartRateFlags::from_bits_retain(cursor.u8("flags")?);

    let heart_rate = if flags.contains(HeartRateFlags::HEART_RATE_U16) {
        cursor.u16("heart rate")?
    } else {
        u16::from(cursor.u8("heart rate")?)
    };

    let sensor_contact = if !flags.contains(HeartRateFlags::CONTACT_SUPPORTED) {
        SensorContact::Unsupported
    } else if flags.contains(HeartRateFlags::CONTACT_DETECTED) {
        SensorContact::Detected
    } else {
        SensorContact::NotDetected
    };

    let energy_expended = if flags.contains(HeartRateFlags::ENERGY_EXPENDED) {
        Some(cursor.u16("energy expended")?)
    } else {
        None
    };

    let rr_intervals = if flags.contains(HeartRateFlags::RR_INTERVALS) {
        let mut intervals = Vec::with_capacity(cursor.remaining() / 2);
        while cursor.remaining() > 0 {
            intervals.push(cursor.u16("rr interval")?);
        }
        Some(intervals)
    } else {
        None
    };

    Ok(HeartRateMeasurement {
        heart_rate,
        sensor_contact,
        energy_expended,
        rr_intervals,
    })
}

pub fn decode_battery(value: &[u8]) -> Result<BatteryMeasurement, DecodeError> {
    let level = *value.first().ok_or(DecodeError::Empty)?;
    if level > 100 {
        return Err(DecodeError::OutOfRange {
            field: "battery level",
            value: u32::from(level),
        });
    }
    Ok(BatteryMeasurement { level })
}

pub fn decode_custom(value: &[u8]) -> Result<CustomMeasurement, DecodeError> {
    if value.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut cursor = Cursor::new(value);
    let flags = CustomFlags::from_bits_retain(cursor.u8("flags")?);

    let activity = if flags.contains(CustomFlags::ACTIVITY) {
        Some(cursor.u16("activity")?)
    } else {
        None
    };
    let peak_acceleration = if flags.contains(CustomFlags::PEAK_ACCELERATION) {
        Some(cursor.u16("peak acceleration")?)
    } else {
        None
    };

    Ok(CustomMeasurement {
        activity,
        peak_acceleration,
    })
}

/// Encode a reading into the wire format a peripheral would send.
pub fn encode(reading: &Reading) -> Vec<u8> {
    match reading {
        Reading::HeartRate(hr) => encode_heart_rate(hr),
        Reading::Battery(battery) => vec![battery.level],
        Reading::Custom(custom) => encode_custom(custom),
    }
}

pub fn encode_heart_rate(hr: &HeartRateMeasurement) -> Vec<u8> {
    let mut flags = HeartRateFlags::empty();
    let mut body = Vec::with_capacity(8);

    match u8::try_from(hr.heart_rate) {
        Ok(rate) => body.push(rate),
        Err(_) => {
            flags |= HeartRateFlags::HEART_RATE_U16;
            body.extend_from_slice(&hr.heart_rate.to_le_bytes());
        }
    }

    match hr.sensor_contact {
        SensorContact::Unsupported => {}
        SensorContact::NotDetected => flags |= HeartRateFlags::CONTACT_SUPPORTED,
        SensorContact::Detected => {
            flags |= HeartRateFlags::CONTACT_SUPPORTED | HeartRateFlags::CONTACT_DETECTED
        }
    }

    if let Some(energy) = hr.energy_expended {
        flags |= HeartRateFlags::ENERGY_EXPENDED;
        body.extend_from_slice(&energy.to_le_bytes());
    }

    if let Some(ref intervals) = hr.rr_intervals {
        flags |= HeartRateFlags::RR_INTERVALS;
        for rr in intervals {
            body.extend_from_slice(&rr.to_le_bytes());
        }
    }

    let mut packet = Vec::with_capacity(body.len() + 1);
    packet.push(flags.bits());
    packet.extend_from_slice(&body);
    packet
}

pub fn encode_custom(custom: &CustomMeasurement) -> Vec<u8> {
    let mut flags = CustomFlags::empty();
    let mut packet = vec![0];

    if let Some(activity) = custom.activity {
        flags |= CustomFlags::ACTIVITY;
        packet.extend_from_slice(&activity.to_le_bytes());
    }
    if let Some(peak) = custom.peak_acceleration {
        flags |= CustomFlags::PEAK_ACCELERATION;
        packet.extend_from_slice(&peak.to_le_bytes());
    }

    packet[0] = flags.bits();
    packet
}
