pub mod controller;
pub mod error;
pub mod patterns;
pub mod protocol_client;
pub mod session;
pub mod transport;
pub mod types;

pub use controller::{choose_device, DeviceSessionController, SessionEvent};
pub use error::ClientError;
pub use patterns::{LoadProgress, PatternListLoader};
pub use protocol_client::{
    CursorProtocol, CursorRequest, RetryPolicy, PATTERN_NAME_CURSOR, VARIABLE_CURSOR,
};
pub use session::{Session, SessionUpdate, Slot, SlotStatus};
pub use transport::{CloudClient, DeviceTransport};
pub use types::{AccessToken, Field};

#[cfg(test)]
#[path = "tests/fake_transport.rs"]
pub(crate) mod fake_transport;
