//! Wire transport for the synthesis service
//!
//! Provides the pieces between the session driver and the network:
//! - Text/binary frame codec
//! - Connection token generation with clock-skew correction
//! - Authenticated channel open/close with the service handshake
//! - Bounded-backoff reconnect policy

pub mod channel;
pub mod drm;
pub mod frame;
pub mod retry;

pub use channel::{ChannelConfig, ServiceChannel, DEFAULT_ENDPOINT, SEC_MS_GEC_VERSION};
pub use drm::{
    adjust_clock_skew, adjust_from_server_date, clock_skew_seconds, generate_token,
    TRUSTED_CLIENT_TOKEN,
};
pub use frame::{decode_binary, decode_text, encode_binary, encode_text, BinaryFrame, TextFrame};
pub use retry::{RetryEvent, RetryPolicy};
