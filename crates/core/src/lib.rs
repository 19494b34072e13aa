//! `redrive-core`: attempt model and shared primitives.
//!
//! This crate holds the data types every other crate agrees on (no store, no
//! scheduling, no IO).

pub mod attempt;
pub mod codec;
pub mod error;
pub mod time;

pub use attempt::{Attempt, RawMessage, ScheduleKey};
pub use codec::{BytesCodec, Codec, JsonCodec, StringCodec};
pub use error::{CodecError, StoreError};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
