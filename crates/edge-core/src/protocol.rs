//! Closed set of message types and canonical field ids.

use std::fmt;

/// Wire message types. The header carries the raw `u32`; unknown values are
/// representable there and rejected by the schema validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    Issue = 1,
    Command = 2,
    SeedExecute = 3,
    SeedResult = 4,
    Event = 5,
    Report = 6,
    Error = 7,
    EventAck = 8,
}

impl MessageType {
    pub const ALL: [MessageType; 8] = [
        MessageType::Issue,
        MessageType::Command,
        MessageType::SeedExecute,
        MessageType::SeedResult,
        MessageType::Event,
        MessageType::Report,
        MessageType::Error,
        MessageType::EventAck,
    ];

    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Issue => "issue",
            MessageType::Command => "command",
            MessageType::SeedExecute => "seed_execute",
            MessageType::SeedResult => "seed_result",
            MessageType::Event => "event",
            MessageType::Report => "report",
            MessageType::Error => "error",
            MessageType::EventAck => "event_ack",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical TLV field ids, grouped by hundreds per concern.
pub mod field_id {
    pub const INTENT_ID: u16 = 1;
    pub const COMMAND_ID: u16 = 2;
    pub const EXECUTION_ID: u16 = 3;
    pub const EVENT_ID: u16 = 4;
    pub const PHASE: u16 = 5;
    pub const TIMESTAMP_MS: u16 = 6;

    pub const ACTOR: u16 = 100;
    pub const TARGET_SCOPE: u16 = 101;
    pub const OBJECTIVE: u16 = 102;

    pub const GHOST_ID: u16 = 200;
    pub const SEED_SELECTOR: u16 = 201;
    pub const OPERATION: u16 = 202;
    pub const ARGS: u16 = 203;

    pub const SEED_ID: u16 = 300;

    pub const STATUS: u16 = 400;
    pub const STDOUT: u16 = 401;
    pub const STDERR: u16 = 402;
    pub const EXIT_CODE: u16 = 403;

    pub const OUTCOME: u16 = 500;
    pub const ACK_STATUS: u16 = 501;
    pub const ACK_CODE: u16 = 502;

    pub const SUMMARY: u16 = 600;
    pub const COMPLETION_STATE: u16 = 601;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for ty in MessageType::ALL {
            assert_eq!(MessageType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(MessageType::from_code(0), None);
        assert_eq!(MessageType::from_code(99), None);
        assert_eq!(MessageType::EventAck.code(), 8);
    }
}
