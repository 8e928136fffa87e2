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

//! BLE session driver.
//!
//! Owns one peripheral link and cycles GATT reads and subscriptions across
//! the characteristics enabled for the current session. The driver is a
//! single actor: transport events and timer expiries are fed in order
//! through [`SessionDriver::handle_input`], and all mutation goes through
//! `&mut self`.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::decoder;
use super::measurement::{CharacteristicKind, Measurement};
use super::session::{AcquisitionState, GattRequest, Session, SessionPolicy, Transition};
use super::timer::SessionTimer;
use super::transport::{
    CharacteristicSet, DriverInput, GattProfile, GattService, GattTransport, InputSender,
    LinkState, PeripheralAddress, TransportEvent,
};
use crate::error::DriverError;

/// Events delivered to the caller's sink.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// Link to the peripheral established.
    Connected { address: String },
    /// Link closed or connect attempt failed.
    Disconnected,
    /// Service discovery finished.
    ServicesDiscovered {
        services: Vec<GattService>,
        characteristics: CharacteristicSet,
    },
    /// A decoded measurement.
    DataAvailable(Measurement),
    /// Condition the driver cannot recover from on its own.
    Error(String),
}

/// Receiver of driver events. Called synchronously from `handle_input`.
pub type EventSink = Box<dyn FnMut(DriverEvent) + Send>;

/// Sink that forwards events into a channel.
pub fn channel_sink(tx: mpsc::UnboundedSender<DriverEvent>) -> EventSink {
    Box::new(move |event| {
        let _ = tx.send(event);
    })
}

/// Driver tuning.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub battery_timeout: Duration,
    pub heart_rate_timeout: Duration,
    pub custom_timeout: Duration,
    /// Consecutive failed connects before an `Error` event.
    pub max_connect_failures: u32,
    pub profile: GattProfile,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            battery_timeout: Duration::from_secs(3),
            heart_rate_timeout: Duration::from_secs(5),
            custom_timeout: Duration::from_secs(3),
            max_connect_failures: 3,
            profile: GattProfile::default(),
        }
    }
}

impl DriverConfig {
    fn timeout_for(&self, kind: CharacteristicKind) -> Duration {
        match kind {
            CharacteristicKind::Battery => self.battery_timeout,
            CharacteristicKind::HeartRate => self.heart_rate_timeout,
            CharacteristicKind::Custom => self.custom_timeout,
        }
    }
}

#[derive(Debug, Clone)]
struct Link {
    address: PeripheralAddress,
    state: LinkState,
}

pub struct SessionDriver<T: GattTransport> {
    transport: T,
    config: DriverConfig,
    inputs: InputSender,
    sink: Option<EventSink>,
    initialized: bool,
    closed: bool,
    link: Option<Link>,
    services: Vec<GattService>,
    characteristics: CharacteristicSet,
    session: Option<Session>,
    timer: SessionTimer,
    connect_failures: u32,
}

impl<T: GattTransport> SessionDriver<T> {
    /// Create a driver. `inputs` is the sending half of the queue the
    /// transport also reports to; timer expiries are posted there.
    pub fn new(transport: T, config: DriverConfig, inputs: InputSender) -> Self {
        Self {
            transport,
            config,
            inputs,
            sink: None,
            initialized: false,
            closed: false,
            link: None,
            services: Vec::new(),
            characteristics: CharacteristicSet::default(),
            session: None,
            timer: SessionTimer::new(),
            connect_failures: 0,
        }
    }

    pub fn set_sink(&mut self, sink: EventSink) {
        if !self.closed {
            self.sink = Some(sink);
        }
    }

    /// Acquire the platform adapter. Idempotent.
    pub async fn initialize(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        if self.initialized {
            return Ok(());
        }

        match self.transport.initialize().await {
            Ok(()) => {
                self.initialized = true;
                info!("Bluetooth transport initialized");
                Ok(())
            }
            Err(e) => {
                error!("Bluetooth transport unavailable: {}", e);
                self.emit(DriverEvent::Error(format!("bluetooth unavailable: {}", e)));
                Err(DriverError::TransportUnavailable(e.to_string()))
            }
        }
    }

    /// Open or reuse a link to `address`. The outcome arrives as a
    /// `Connected` or `Disconnected` event.
    pub fn connect(&mut self, address: &str) -> Result<(), DriverError> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        if !self.initialized {
            return Err(DriverError::NotInitialized);
        }
        let address: PeripheralAddress = address.parse()?;

        if let Some(link) = self.link.as_mut() {
            if link.address == address {
                if link.state == LinkState::Connected {
                    debug!("Already connected to {}, refreshing link", address);
                } else {
                    info!("Reconnecting to {}", address);
                    link.state = LinkState::Connecting;
                }
                self.transport.connect(&address);
                return Ok(());
            }
        }

        self.teardown_link();
        info!("Connecting to {}", address);
        self.connect_failures = 0;
        self.transport.connect(&address);
        self.link = Some(Link {
            address,
            state: LinkState::Connecting,
        });
        Ok(())
    }

    /// Request teardown of the current link. No-op when not connected.
    pub fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        let address = match self.link {
            Some(ref link) if link.state != LinkState::Disconnected => link.address.to_string(),
            _ => {
                debug!("Disconnect requested without a connection");
                return;
            }
        };

        info!("Disconnecting from {}", address);
        self.stop_session();
        self.transport.disconnect();
    }

    /// Release the transport and the sink. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.timer.cancel();
        self.session = None;
        self.clear_discovery();
        self.link = None;
        self.transport.close();
        self.sink = None;
        self.closed = true;
        info!("Session driver closed");
    }

    /// Start an acquisition session on the given handles, superseding any
    /// running one. Returns the entry state.
    pub fn start_session(
        &mut self,
        handles: CharacteristicSet,
        policy: SessionPolicy,
    ) -> Result<AcquisitionState, DriverError> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        self.stop_session();

        let Some((session, transition)) = Session::start(handles, policy) else {
            warn!("No enabled characteristic available, session not started");
            return Err(DriverError::NoEligibleCharacteristic);
        };

        info!(
            "Session started: battery={} heart_rate={} custom={}",
            policy.battery, policy.heart_rate, policy.custom
        );
        let state = transition.to;
        self.session = Some(session);
        self.apply(transition, false);
        Ok(state)
    }

    /// Start a session on the characteristics found by the last discovery.
    pub fn start_discovered_session(
        &mut self,
        policy: SessionPolicy,
    ) -> Result<AcquisitionState, DriverError> {
        self.start_session(self.characteristics.clone(), policy)
    }

    /// Unsubscribe, cancel the timer and go idle. Safe without a session.
    pub fn stop_session(&mut self) {
        self.timer.cancel();
        let Some(mut session) = self.session.take() else {
            return;
        };

        let requests = session.stop();
        Self::issue(&mut self.transport, session.handles(), &requests);
        info!(
            "Session stopped after {}s: battery={} heart_rate={} custom={} forced={}",
            (chrono::Utc::now() - session.started_at()).num_seconds(),
            session.received().battery,
            session.received().heart_rate,
            session.received().custom,
            session.forced().battery + session.forced().heart_rate + session.forced().custom,
        );
    }

    /// Services found by the last discovery on the current link.
    pub fn supported_gatt_services(&self) -> &[GattService] {
        &self.services
    }

    pub fn characteristics(&self) -> &CharacteristicSet {
        &self.characteristics
    }

    pub fn state(&self) -> AcquisitionState {
        self.session
            .as_ref()
            .map(|s| s.state())
            .unwrap_or(AcquisitionState::Idle)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn link_state(&self) -> LinkState {
        self.link
            .as_ref()
            .map(|l| l.state)
            .unwrap_or(LinkState::Disconnected)
    }

    pub fn is_timer_pending(&self) -> bool {
        self.timer.is_pending()
    }

    /// Generation of the most recently armed or cancelled timer.
    pub fn timer_generation(&self) -> u64 {
        self.timer.generation()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Apply one queued input.
    pub fn handle_input(&mut self, input: DriverInput) {
        if self.closed {
            return;
        }
        match input {
            DriverInput::Transport(event) => self.handle_transport_event(event),
            DriverInput::Timeout(generation) => self.handle_timeout(generation),
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ConnectionStateChanged { address, state } => {
                self.handle_link_state(&address, state)
            }
            TransportEvent::ServicesDiscovered(services) => self.handle_services(services),
            TransportEvent::CharacteristicRead { uuid, value }
            | TransportEvent::CharacteristicChanged { uuid, value } => {
                self.handle_value(uuid, &value)
            }
            TransportEvent::RequestFailed(reason) => {
                warn!("GATT request failed: {}", reason);
            }
        }
    }

    fn handle_link_state(&mut self, address: &str, state: LinkState) {
        let Some(link) = self.link.as_mut() else {
            debug!("Link event for {} without a connection", address);
            return;
        };
        if !link.address.as_str().eq_ignore_ascii_case(address) {
            debug!("Ignoring stale link event for {}", address);
            return;
        }

        let previous = link.state;
        if state == LinkState::Connecting && previous == LinkState::Connected {
            debug!("Link to {} already up", address);
            return;
        }
        link.state = state;
        match state {
            LinkState::Connecting => {}
            LinkState::Connected => {
                if previous == LinkState::Connected {
                    return;
                }
                let address = link.address.to_string();
                info!("Connected to {}", address);
                self.connect_failures = 0;
                self.emit(DriverEvent::Connected { address });
                self.transport.discover_services();
            }
            LinkState::Disconnected => {
                if previous == LinkState::Disconnected {
                    return;
                }
                let address = link.address.to_string();
                self.timer.cancel();
                self.session = None;
                self.clear_discovery();

                if previous == LinkState::Connected {
                    info!("Disconnected from {}", address);
                } else {
                    self.connect_failures += 1;
                    warn!(
                        "Connection to {} failed ({} in a row)",
                        address, self.connect_failures
                    );
                }
                self.emit(DriverEvent::Disconnected);

                if self.connect_failures > 0
                    && self.connect_failures == self.config.max_connect_failures
                {
                    error!(
                        "Giving up on {} after {} failed connects",
                        address, self.connect_failures
                    );
                    self.emit(DriverEvent::Error(format!(
                        "failed to connect to {} after {} attempts",
                        address, self.connect_failures
                    )));
                }
            }
        }
    }

    fn handle_services(&mut self, services: Vec<GattService>) {
        if self.link_state() != LinkState::Connected {
            debug!("Ignoring service discovery without a connection");
            return;
        }

        self.characteristics = CharacteristicSet::resolve(&services, &self.config.profile);
        info!(
            "Discovered {} services: battery={} heart_rate={} custom={}",
            services.len(),
            self.characteristics.battery.is_some(),
            self.characteristics.heart_rate.is_some(),
            self.characteristics.custom.is_some()
        );
        self.services = services;
        self.emit(DriverEvent::ServicesDiscovered {
            services: self.services.clone(),
            characteristics: self.characteristics.clone(),
        });
    }

    fn handle_value(&mut self, uuid: Uuid, value: &[u8]) {
        let Some(session) = self.session.as_mut() else {
            debug!("Dropping value from {} outside a session", uuid);
            return;
        };
        let Some(kind) = session.handles().kind_of(&uuid) else {
            debug!("Dropping value from unknown characteristic {}", uuid);
            return;
        };

        let reading = match decoder::decode(kind, value) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(
                    "Failed to decode {} value 0x{}: {}",
                    kind.as_str(),
                    hex::encode(value),
                    e
                );
                return;
            }
        };

        let transition = session.on_value(&reading);
        self.emit(DriverEvent::DataAvailable(Measurement::new(uuid, reading)));
        if let Some(transition) = transition {
            self.apply(transition, false);
        }
    }

    fn handle_timeout(&mut self, generation: u64) {
        if !self.timer.fire(generation) {
            debug!("Ignoring stale timer {}", generation);
            return;
        }
        let Some(transition) = self.session.as_mut().and_then(|s| s.on_timeout()) else {
            return;
        };
        self.apply(transition, true);
    }

    fn apply(&mut self, transition: Transition, forced: bool) {
        if forced {
            warn!(
                "No value within timeout, forcing {:?} -> {:?}",
                transition.from, transition.to
            );
        } else if transition.from != transition.to {
            debug!("{:?} -> {:?}", transition.from, transition.to);
        }

        if let Some(session) = self.session.as_ref() {
            Self::issue(&mut self.transport, session.handles(), &transition.requests);
        }

        match transition.to.kind() {
            Some(kind) => {
                let timeout = self.config.timeout_for(kind);
                self.timer.arm(timeout, &self.inputs);
            }
            None => self.timer.cancel(),
        }
    }

    fn issue(transport: &mut T, handles: &CharacteristicSet, requests: &[GattRequest]) {
        for request in requests {
            let (kind, enable) = match *request {
                GattRequest::Read(kind) => (kind, None),
                GattRequest::Subscribe(kind) => (kind, Some(true)),
                GattRequest::Unsubscribe(kind) => (kind, Some(false)),
            };
            let Some(handle) = handles.get(kind) else {
                continue;
            };

            debug!("GATT {:?} {}", request, handle.uuid);
            match enable {
                None => transport.read(handle),
                Some(enable) => transport.set_notify(handle, enable),
            }
        }
    }

    fn teardown_link(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        self.stop_session();
        self.clear_discovery();
        if link.state != LinkState::Disconnected {
            info!("Closing link to {}", link.address);
            self.transport.disconnect();
            self.emit(DriverEvent::Disconnected);
        }
    }

    fn clear_discovery(&mut self) {
        self.services.clear();
        self.characteristics = CharacteristicSet::default();
    }

    fn emit(&mut self, event: DriverEvent) {
        if let Some(sink) = self.sink.as_mut() {
            sink(event);
        }
    }
}
