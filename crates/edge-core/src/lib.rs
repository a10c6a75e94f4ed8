#![forbid(unsafe_code)]

//! Wire-level building blocks shared by Ghost and Mirage.
//!
//! Layering, leaf first: [`frame`] moves whole frames on and off a byte
//! stream, [`tlv`] turns a payload into ordered typed fields, [`schema`]
//! checks required fields per message type, and [`wire`] maps typed
//! messages onto all three.

pub mod effect;
pub mod frame;
pub mod protocol;
pub mod schema;
pub mod time;
pub mod tlv;
pub mod wire;

pub use edge_macros::enum_str;

pub use effect::{Effect, Transience};
pub use frame::{
    FIXED_HEADER_LEN, Frame, FrameError, FrameFlags, FrameHeader, FrameLimits, FrameReader,
    PROTOCOL_MAGIC, PROTOCOL_VERSION, read_frame, round_trip, write_frame,
};
pub use protocol::{MessageType, field_id};
pub use schema::{ValidationError, ValidationReason};
pub use time::now_ms;
pub use tlv::{Field, FieldError, FieldType};
pub use wire::{
    AckStatus, Args, Command, CompletionState, Event, EventAck, Outcome, Report, ReportPhase,
    SeedExecute, SeedResult, WireError,
};
