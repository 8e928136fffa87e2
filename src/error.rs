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

//! Error types shared by the driver, decoders and transports.

use thiserror::Error;

/// Errors returned by [`SessionDriver`](crate::bluetooth::SessionDriver) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// No Bluetooth adapter or stack is available.
    #[error("bluetooth transport unavailable: {0}")]
    TransportUnavailable(String),

    /// `initialize` has not succeeded yet.
    #[error("driver not initialized")]
    NotInitialized,

    /// The supplied peripheral address is malformed.
    #[error("invalid peripheral address: {0:?}")]
    InvalidAddress(String),

    /// None of the requested characteristics is both enabled and present.
    #[error("no enabled characteristic is available for a session")]
    NoEligibleCharacteristic,

    /// The driver has been closed.
    #[error("driver closed")]
    Closed,
}

/// Errors raised while decoding a characteristic value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,

    #[error("truncated payload: {field} needs {needed} bytes, {got} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: u32 },
}

/// Errors raised by a GATT transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("bluetooth unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Bluetooth(#[from] bluer::Error),
}
