//! Cursor-then-read access to values the device cloud cannot address directly.
//!
//! The device exposes one generic result slot per cursor. A read is a write of
//! the cursor (a function call naming or indexing the item) followed by a read
//! of the slot. The device keeps a single cursor value per cursor name, so two
//! sequences against the same cursor must never overlap; [`CursorProtocol`]
//! serialises them per device and cursor.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use serde_json::Value;
use shared::{
    domain::DeviceId,
    protocol::{
        PATTERN_NAME_CURSOR_FUNCTION, PATTERN_NAME_RESULT_SLOT, VARIABLE_CURSOR_FUNCTION,
        VARIABLE_RESULT_SLOT,
    },
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{error::ClientError, transport::DeviceTransport, types::AccessToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cursor {
    pub function: &'static str,
    pub result_slot: &'static str,
}

/// Named scalars (`r`, `nsx`, ...) staged into the `variable` slot.
pub const VARIABLE_CURSOR: Cursor = Cursor {
    function: VARIABLE_CURSOR_FUNCTION,
    result_slot: VARIABLE_RESULT_SLOT,
};

/// Pattern names staged into the `patternName` slot by index.
pub const PATTERN_NAME_CURSOR: Cursor = Cursor {
    function: PATTERN_NAME_CURSOR_FUNCTION,
    result_slot: PATTERN_NAME_RESULT_SLOT,
};

/// One in-flight write-then-read sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorRequest {
    pub device: DeviceId,
    pub cursor: Cursor,
    pub selector: String,
}

impl fmt::Display for CursorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device={} cursor={} selector={}",
            self.device, self.cursor.function, self.selector
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff: `base_delay * 2^(attempt - 1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

/// Conversion from the JSON `result` member of a variable read.
pub trait FromRemote: Sized {
    fn from_remote(value: Value) -> Result<Self, ClientError>;
}

impl FromRemote for i64 {
    fn from_remote(value: Value) -> Result<Self, ClientError> {
        let parsed = match &value {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|float| float.round() as i64)),
            Value::Bool(flag) => Some(i64::from(*flag)),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| ClientError::Decode(format!("expected an integer result, got {value}")))
    }
}

impl FromRemote for String {
    fn from_remote(value: Value) -> Result<Self, ClientError> {
        match value {
            Value::String(text) => Ok(text),
            other => Err(ClientError::Decode(format!(
                "expected a string result, got {other}"
            ))),
        }
    }
}

impl FromRemote for Value {
    fn from_remote(value: Value) -> Result<Self, ClientError> {
        Ok(value)
    }
}

/// Reads a variable the device exposes directly and decodes it.
pub async fn read_value<T: FromRemote>(
    transport: &dyn DeviceTransport,
    token: &AccessToken,
    device: &DeviceId,
    variable: &str,
) -> Result<T, ClientError> {
    let value = transport.read_variable(token, device, variable).await?;
    T::from_remote(value)
}

type CursorKey = (DeviceId, &'static str);

pub struct CursorProtocol {
    transport: Arc<dyn DeviceTransport>,
    retry: RetryPolicy,
    cursor_locks: Mutex<HashMap<CursorKey, Arc<Mutex<()>>>>,
}

impl CursorProtocol {
    pub fn new(transport: Arc<dyn DeviceTransport>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            retry,
            cursor_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn DeviceTransport> {
        &self.transport
    }

    /// Points `cursor` at `selector`, then reads the cursor's result slot.
    ///
    /// Holds the per device/cursor lock for the whole exchange, retries
    /// included, so no other sequence can move the cursor in between.
    pub async fn fetch_named<T: FromRemote>(
        &self,
        token: &AccessToken,
        device: &DeviceId,
        cursor: Cursor,
        selector: impl ToString,
    ) -> Result<T, ClientError> {
        let request = CursorRequest {
            device: device.clone(),
            cursor,
            selector: selector.to_string(),
        };

        let lock = self.cursor_lock(&request).await;
        let _guard = lock.lock().await;

        let mut attempt = 1;
        loop {
            match self.run_sequence(token, &request).await {
                Ok(value) => return T::from_remote(value),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "cursor: sequence failed {request} attempt={attempt} retry_in={delay:?}: {err}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!("cursor: sequence aborted {request} attempt={attempt}: {err}");
                    return Err(err);
                }
            }
        }
    }

    async fn run_sequence(
        &self,
        token: &AccessToken,
        request: &CursorRequest,
    ) -> Result<Value, ClientError> {
        self.transport
            .invoke_function(
                token,
                &request.device,
                request.cursor.function,
                &request.selector,
            )
            .await?;
        let value = self
            .transport
            .read_variable(token, &request.device, request.cursor.result_slot)
            .await?;
        debug!("cursor: staged value read {request}");
        Ok(value)
    }

    async fn cursor_lock(&self, request: &CursorRequest) -> Arc<Mutex<()>> {
        let mut locks = self.cursor_locks.lock().await;
        locks
            .entry((request.device.clone(), request.cursor.function))
            .or_default()
            .clone()
    }
}

#[cfg(test)]
#[path = "tests/protocol_client_tests.rs"]
mod tests;
