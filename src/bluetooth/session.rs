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

//! Acquisition session state machine.
//!
//! The BLE stack accepts one GATT request at a time, so a session visits the
//! enabled characteristics one after another:
//!
//! - battery is read once per visit;
//! - heart rate and custom are subscribed, and switching between them swaps
//!   the subscription;
//! - after a value (or a timeout) the next state is chosen by a fixed rule
//!   per state, falling back to the current one when it is the only source.
//!
//! This module is pure: it returns the GATT requests to issue and leaves I/O
//! and timers to the driver.

use chrono::{DateTime, Utc};

use super::measurement::{
    BatteryMeasurement, CharacteristicKind, CustomMeasurement, HeartRateMeasurement, Reading,
};
use super::transport::CharacteristicSet;

/// Acquisition state of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    WaitingBattery,
    WaitingHeartRate,
    WaitingCustom,
}

impl AcquisitionState {
    pub fn waiting_for(kind: CharacteristicKind) -> Self {
        match kind {
            CharacteristicKind::Battery => AcquisitionState::WaitingBattery,
            CharacteristicKind::HeartRate => AcquisitionState::WaitingHeartRate,
            CharacteristicKind::Custom => AcquisitionState::WaitingCustom,
        }
    }

    /// Characteristic awaited in this state.
    pub fn kind(&self) -> Option<CharacteristicKind> {
        match self {
            AcquisitionState::Idle => None,
            AcquisitionState::WaitingBattery => Some(CharacteristicKind::Battery),
            AcquisitionState::WaitingHeartRate => Some(CharacteristicKind::HeartRate),
            AcquisitionState::WaitingCustom => Some(CharacteristicKind::Custom),
        }
    }
}

/// Which characteristics a session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub battery: bool,
    pub heart_rate: bool,
    pub custom: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            battery: true,
            heart_rate: true,
            custom: true,
        }
    }
}

impl SessionPolicy {
    pub fn enables(&self, kind: CharacteristicKind) -> bool {
        match kind {
            CharacteristicKind::Battery => self.battery,
            CharacteristicKind::HeartRate => self.heart_rate,
            CharacteristicKind::Custom => self.custom,
        }
    }
}

/// A GATT request the driver must pass to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattRequest {
    Read(CharacteristicKind),
    Subscribe(CharacteristicKind),
    Unsubscribe(CharacteristicKind),
}

/// Result of advancing the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: AcquisitionState,
    pub to: AcquisitionState,
    pub requests: Vec<GattRequest>,
}

/// Per-kind counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounters {
    pub battery: u32,
    pub heart_rate: u32,
    pub custom: u32,
}

impl KindCounters {
    fn bump(&mut self, kind: CharacteristicKind) {
        match kind {
            CharacteristicKind::Battery => self.battery += 1,
            CharacteristicKind::HeartRate => self.heart_rate += 1,
            CharacteristicKind::Custom => self.custom += 1,
        }
    }

    pub fn get(&self, kind: CharacteristicKind) -> u32 {
        match kind {
            CharacteristicKind::Battery => self.battery,
            CharacteristicKind::HeartRate => self.heart_rate,
            CharacteristicKind::Custom => self.custom,
        }
    }
}

/// Last value seen of each kind during this session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastValues {
    pub battery: Option<BatteryMeasurement>,
    pub heart_rate: Option<HeartRateMeasurement>,
    pub custom: Option<CustomMeasurement>,
}

/// One acquisition run.
#[derive(Debug, Clone)]
pub struct Session {
    started_at: DateTime<Utc>,
    policy: SessionPolicy,
    handles: CharacteristicSet,
    state: AcquisitionState,
    subscribed: Option<CharacteristicKind>,
    received: KindCounters,
    forced: KindCounters,
    last: LastValues,
}

impl Session {
    /// First enabled, present characteristic in priority order.
    pub fn entry_kind(
        handles: &CharacteristicSet,
        policy: &SessionPolicy,
    ) -> Option<CharacteristicKind> {
        CharacteristicKind::PRIORITY
            .into_iter()
            .find(|&kind| policy.enables(kind) && handles.get(kind).is_some())
    }

    /// Start a session. `None` if no characteristic qualifies.
    pub fn start(handles: CharacteristicSet, policy: SessionPolicy) -> Option<(Self, Transition)> {
        let entry = Self::entry_kind(&handles, &policy)?;

        let mut session = Self {
            started_at: Utc::now(),
            policy,
            handles,
            state: AcquisitionState::Idle,
            subscribed: None,
            received: KindCounters::default(),
            forced: KindCounters::default(),
            last: LastValues::default(),
        };
        let transition = session.enter(entry);
        Some((session, transition))
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn handles(&self) -> &CharacteristicSet {
        &self.handles
    }

    pub fn subscribed(&self) -> Option<CharacteristicKind> {
        self.subscribed
    }

    pub fn received(&self) -> &KindCounters {
        &self.received
    }

    pub fn forced(&self) -> &KindCounters {
        &self.forced
    }

    pub fn last_values(&self) -> &LastValues {
        &self.last
    }

    pub fn is_available(&self, kind: CharacteristicKind) -> bool {
        self.policy.enables(kind) && self.handles.get(kind).is_some()
    }

    /// Where to go after `kind` produced a value or timed out.
    pub fn next_after(&self, kind: CharacteristicKind) -> CharacteristicKind {
        use CharacteristicKind::*;

        let order = match kind {
            Battery => [HeartRate, Custom],
            HeartRate => [Custom, Battery],
            Custom => [HeartRate, Battery],
        };
        order
            .into_iter()
            .find(|&k| self.is_available(k))
            .unwrap_or(kind)
    }

    /// Record a decoded value. Advances the state when it is the awaited one.
    pub fn on_value(&mut self, reading: &Reading) -> Option<Transition> {
        let kind = reading.kind();
        self.received.bump(kind);
        match reading {
            Reading::Battery(b) => self.last.battery = Some(*b),
            Reading::HeartRate(hr) => self.last.heart_rate = Some(hr.clone()),
            Reading::Custom(c) => self.last.custom = Some(*c),
        }

        if self.state.kind() != Some(kind) {
            return None;
        }
        Some(self.enter(self.next_after(kind)))
    }

    /// Force progress after the awaited characteristic stayed silent.
    ///
    /// A silent subscription is dropped first, so staying on the same
    /// characteristic subscribes it again.
    pub fn on_timeout(&mut self) -> Option<Transition> {
        let kind = self.state.kind()?;
        self.forced.bump(kind);

        let mut requests = Vec::with_capacity(3);
        if self.subscribed == Some(kind) {
            self.subscribed = None;
            requests.push(GattRequest::Unsubscribe(kind));
        }

        let mut transition = self.enter(self.next_after(kind));
        requests.append(&mut transition.requests);
        transition.requests = requests;
        Some(transition)
    }

    /// Leave the session: drop the live subscription and go idle.
    pub fn stop(&mut self) -> Vec<GattRequest> {
        self.state = AcquisitionState::Idle;
        self.subscribed
            .take()
            .map(GattRequest::Unsubscribe)
            .into_iter()
            .collect()
    }

    fn enter(&mut self, kind: CharacteristicKind) -> Transition {
        let from = self.state;
        let mut requests = Vec::with_capacity(2);

        if kind.is_notify() {
            if self.subscribed != Some(kind) {
                if let Some(previous) = self.subscribed.take() {
                    requests.push(GattRequest::Unsubscribe(previous));
                }
                requests.push(GattRequest::Subscribe(kind));
                self.subscribed = Some(kind);
            }
        } else {
            requests.push(GattRequest::Read(kind));
        }

        self.state = AcquisitionState::waiting_for(kind);
        Transition {
            from,
            to: self.state,
            requests,
        }
    }
}
