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

//! Single-shot cancellable timeout for the acquisition cycle.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

use super::transport::{DriverInput, InputSender};

/// At most one pending timeout. Arming replaces the previous one.
///
/// Expiry is delivered as [`DriverInput::Timeout`] on the driver queue. A
/// timeout can be queued just before it is cancelled, so every arm and
/// cancel bumps the generation and [`SessionTimer::fire`] only accepts the
/// current one.
#[derive(Debug, Default)]
pub struct SessionTimer {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl SessionTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer, cancelling any pending one. Returns its generation.
    pub fn arm(&mut self, duration: Duration, inputs: &InputSender) -> u64 {
        self.abort();
        self.generation += 1;

        let generation = self.generation;
        let inputs = inputs.clone();
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = inputs.send(DriverInput::Timeout(generation));
        }));

        trace!("Timer {} armed for {:?}", generation, duration);
        generation
    }

    pub fn cancel(&mut self) {
        if self.task.is_some() {
            trace!("Timer {} cancelled", self.generation);
        }
        self.abort();
        self.generation += 1;
    }

    /// Accept an expiry. Returns false for stale or cancelled timers.
    pub fn fire(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.task.is_none() {
            return false;
        }
        self.task = None;
        true
    }

    pub fn is_pending(&self) -> bool {
        self.task.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.abort();
    }
}
