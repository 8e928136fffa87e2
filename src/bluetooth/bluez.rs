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

//! BlueZ GATT client transport.
//!
//! Requests are queued to one worker task and executed in order, so at most
//! one GATT operation is in flight. Notification streams and the link
//! watcher run in their own tasks and only forward events.

use std::collections::HashMap;
use std::time::Duration;

use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, Address, Device, DeviceEvent, DeviceProperty};
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::transport::{
    CharacteristicHandle, DriverInput, GattService, GattTransport, InputSender, LinkState,
    PeripheralAddress, TransportEvent,
};
use crate::error::TransportError;

/// Upper bound for a single GATT request before the worker moves on.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connecting can take longer than a regular request.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for BlueZ to resolve services.
const SERVICES_RESOLVED_POLL: Duration = Duration::from_millis(250);

#[derive(Debug)]
enum GattCommand {
    Connect(String),
    Disconnect,
    DiscoverServices,
    Read(Uuid),
    SetNotify(Uuid, bool),
}

/// Transport backed by the system BlueZ daemon.
pub struct BluezTransport {
    inputs: InputSender,
    commands: Option<mpsc::UnboundedSender<GattCommand>>,
    worker: Option<JoinHandle<()>>,
}

impl BluezTransport {
    pub fn new(inputs: InputSender) -> Self {
        Self {
            inputs,
            commands: None,
            worker: None,
        }
    }

    /// Wait for the worker to finish tearing the link down after `close`.
    pub async fn wait_closed(&mut self) {
        if let Some(worker) = self.worker.take() {
            if timeout(REQUEST_TIMEOUT, worker).await.is_err() {
                warn!("GATT worker did not stop in time");
            }
        }
    }

    fn send(&self, command: GattCommand) {
        match self.commands {
            Some(ref tx) => {
                if tx.send(command).is_err() {
                    error!("GATT worker has stopped");
                }
            }
            None => warn!("GATT request {:?} before initialize", command),
        }
    }
}

impl GattTransport for BluezTransport {
    async fn initialize(&mut self) -> Result<(), TransportError> {
        if self.commands.is_some() {
            return Ok(());
        }

        let session = bluer::Session::new()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        debug!("BlueZ session created");

        let adapter = session
            .default_adapter()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = GattWorker::new(adapter, self.inputs.clone());
        self.worker = Some(tokio::spawn(worker.run(rx)));
        self.commands = Some(tx);
        Ok(())
    }

    fn connect(&mut self, address: &PeripheralAddress) {
        self.send(GattCommand::Connect(address.to_string()));
    }

    fn disconnect(&mut self) {
        self.send(GattCommand::Disconnect);
    }

    fn discover_services(&mut self) {
        self.send(GattCommand::DiscoverServices);
    }

    fn read(&mut self, characteristic: &CharacteristicHandle) {
        self.send(GattCommand::Read(characteristic.uuid));
    }

    fn set_notify(&mut self, characteristic: &CharacteristicHandle, enable: bool) {
        self.send(GattCommand::SetNotify(characteristic.uuid, enable));
    }

    fn close(&mut self) {
        // The worker drains the queue, disconnects and exits once the sender is gone
        if let Some(tx) = self.commands.take() {
            let _ = tx.send(GattCommand::Disconnect);
        }
    }
}

/// Owns the BlueZ objects; only touched from its own task.
struct GattWorker {
    adapter: Adapter,
    inputs: InputSender,
    device: Option<(String, Device)>,
    characteristics: HashMap<Uuid, Characteristic>,
    notifications: HashMap<Uuid, JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
}

impl GattWorker {
    fn new(adapter: Adapter, inputs: InputSender) -> Self {
        Self {
            adapter,
            inputs,
            device: None,
            characteristics: HashMap::new(),
            notifications: HashMap::new(),
            watcher: None,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<GattCommand>) {
        debug!("GATT worker started");
        while let Some(command) = commands.recv().await {
            self.execute(command).await;
        }
        debug!("GATT worker stopped");
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.inputs.send(DriverInput::Transport(event));
    }

    fn emit_link(&self, address: &str, state: LinkState) {
        self.emit(TransportEvent::ConnectionStateChanged {
            address: address.to_string(),
            state,
        });
    }

    async fn execute(&mut self, command: GattCommand) {
        debug!("Executing {:?}", command);
        match command {
            GattCommand::Connect(address) => {
                if let Err(e) = self.connect(&address).await {
                    warn!("Connect to {} failed: {}", address, e);
                    self.emit_link(&address, LinkState::Disconnected);
                }
            }
            GattCommand::Disconnect => self.disconnect().await,
            GattCommand::DiscoverServices => {
                if let Err(e) = self.discover_services().await {
                    self.emit(TransportEvent::RequestFailed(format!(
                        "service discovery: {}",
                        e
                    )));
                }
            }
            GattCommand::Read(uuid) => {
                if let Err(e) = self.read(uuid).await {
                    self.emit(TransportEvent::RequestFailed(format!("read {}: {}", uuid, e)));
                }
            }
            GattCommand::SetNotify(uuid, enable) => {
                if let Err(e) = self.set_notify(uuid, enable).await {
                    self.emit(TransportEvent::RequestFailed(format!(
                        "notify {} {}: {}",
                        uuid, enable, e
                    )));
                }
            }
        }
    }

    async fn connect(&mut self, address: &str) -> Result<(), TransportError> {
        let parsed: Address = address
            .parse()
            .map_err(|_| TransportError::Unavailable(format!("bad address {}", address)))?;

        let reuse = matches!(self.device, Some((ref current, _)) if current == address);
        if !reuse {
            self.drop_link().await;
            let device = self.adapter.device(parsed)?;
            self.device = Some((address.to_string(), device));
        }
        let Some((_, ref device)) = self.device else {
            return Ok(());
        };

        self.emit_link(address, LinkState::Connecting);
        if !device.is_connected().await? {
            timeout(CONNECT_TIMEOUT, device.connect())
                .await
                .map_err(|_| TransportError::Unavailable("connect timed out".to_string()))??;
        }

        let watcher = Self::watch_link(device.clone(), address.to_string(), self.inputs.clone());
        if let Some(previous) = self.watcher.replace(watcher) {
            previous.abort();
        }

        info!("Connected to {}", address);
        self.emit_link(address, LinkState::Connected);
        Ok(())
    }

    /// Report link loss noticed by BlueZ.
    fn watch_link(device: Device, address: String, inputs: InputSender) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut events = match device.events().await {
                Ok(events) => Box::pin(events),
                Err(e) => {
                    warn!("Cannot watch link to {}: {}", address, e);
                    return;
                }
            };
            while let Some(event) = events.next().await {
                if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                    info!("Link to {} lost", address);
                    let _ = inputs.send(DriverInput::Transport(
                        TransportEvent::ConnectionStateChanged {
                            address: address.clone(),
                            state: LinkState::Disconnected,
                        },
                    ));
                    break;
                }
            }
        })
    }

    async fn disconnect(&mut self) {
        self.stop_notifications();
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        self.characteristics.clear();

        let Some((ref address, ref device)) = self.device else {
            return;
        };
        if let Err(e) = device.disconnect().await {
            warn!("Disconnect from {} failed: {}", address, e);
        }
        self.emit_link(address, LinkState::Disconnected);
    }

    /// Tear down the current device without reporting it.
    async fn drop_link(&mut self) {
        self.stop_notifications();
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        self.characteristics.clear();
        if let Some((address, device)) = self.device.take() {
            debug!("Releasing previous device {}", address);
            let _ = device.disconnect().await;
        }
    }

    async fn discover_services(&mut self) -> Result<(), TransportError> {
        let Some((_, ref device)) = self.device else {
            return Err(TransportError::Unavailable("no device".to_string()));
        };

        let resolved = timeout(REQUEST_TIMEOUT, async {
            loop {
                if device.is_services_resolved().await? {
                    return Ok::<(), bluer::Error>(());
                }
                sleep(SERVICES_RESOLVED_POLL).await;
            }
        })
        .await;
        match resolved {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransportError::Unavailable(
                    "services not resolved in time".to_string(),
                ))
            }
        }

        let mut discovered = Vec::new();
        self.characteristics.clear();
        for service in device.services().await? {
            let service_uuid = service.uuid().await?;
            let mut char_uuids = Vec::new();
            for characteristic in service.characteristics().await? {
                let uuid = characteristic.uuid().await?;
                char_uuids.push(uuid);
                self.characteristics.insert(uuid, characteristic);
            }
            debug!("Service {} offers {:?}", service_uuid, char_uuids);
            discovered.push(GattService {
                uuid: service_uuid,
                characteristics: char_uuids,
            });
        }

        self.emit(TransportEvent::ServicesDiscovered(discovered));
        Ok(())
    }

    async fn read(&mut self, uuid: Uuid) -> Result<(), TransportError> {
        let characteristic = self.characteristic(uuid)?;
        let value = timeout(REQUEST_TIMEOUT, characteristic.read())
            .await
            .map_err(|_| TransportError::Unavailable("read timed out".to_string()))??;
        debug!("Read {}: 0x{}", uuid, hex::encode(&value));
        self.emit(TransportEvent::CharacteristicRead { uuid, value });
        Ok(())
    }

    async fn set_notify(&mut self, uuid: Uuid, enable: bool) -> Result<(), TransportError> {
        if !enable {
            // Dropping the stream disables notifications in BlueZ
            if let Some(task) = self.notifications.remove(&uuid) {
                task.abort();
            }
            return Ok(());
        }
        if has_live_stream(&mut self.notifications, uuid) {
            return Ok(());
        }

        let characteristic = self.characteristic(uuid)?;
        let inputs = self.inputs.clone();
        let (ready_tx, ready_rx) = oneshot::channel();

        // The task owns the characteristic so the stream can outlive this call
        let task = tokio::spawn(async move {
            let stream = match characteristic.notify().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let mut stream = Box::pin(stream);
            while let Some(value) = stream.next().await {
                let _ = inputs.send(DriverInput::Transport(
                    TransportEvent::CharacteristicChanged { uuid, value },
                ));
            }
            debug!("Notification stream for {} ended", uuid);
        });

        match timeout(REQUEST_TIMEOUT, ready_rx).await {
            Ok(Ok(Ok(()))) => {
                self.notifications.insert(uuid, task);
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(e.into()),
            Ok(Err(_)) => Err(TransportError::Unavailable("subscribe aborted".to_string())),
            Err(_) => {
                task.abort();
                Err(TransportError::Unavailable("subscribe timed out".to_string()))
            }
        }
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.characteristics
            .get(&uuid)
            .cloned()
            .ok_or_else(|| TransportError::Unavailable(format!("unknown characteristic {}", uuid)))
    }

    fn stop_notifications(&mut self) {
        for (_, task) in self.notifications.drain() {
            task.abort();
        }
    }
}

/// Whether `uuid` has a running notification task. A task whose stream has
/// ended is forgotten so the next subscribe starts a new one.
fn has_live_stream(notifications: &mut HashMap<Uuid, JoinHandle<()>>, uuid: Uuid) -> bool {
    match notifications.get(&uuid) {
        Some(task) if !task.is_finished() => true,
        Some(_) => {
            debug!("Notification stream for {} ended, subscribing again", uuid);
            notifications.remove(&uuid);
            false
        }
        None => false,
    }
}

impl Drop for GattWorker {
    fn drop(&mut self) {
        self.stop_notifications();
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}
