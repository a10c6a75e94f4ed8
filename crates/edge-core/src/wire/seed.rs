use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{Args, WireError, decode_args, encode_args, open, require_text, seal};
use crate::frame::{Frame, FrameFlags};
use crate::protocol::{MessageType, field_id};
use crate::tlv::{self, Field};

/// Ghost-local dispatch request handed to a seed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedExecute {
    pub execution_id: String,
    pub command_id: String,
    pub seed_id: String,
    pub operation: String,
    #[serde(default)]
    pub args: Args,
}

impl SeedExecute {
    pub fn validate(&self) -> Result<(), WireError> {
        let ty = MessageType::SeedExecute;
        require_text(ty, "execution_id", &self.execution_id)?;
        require_text(ty, "command_id", &self.command_id)?;
        require_text(ty, "seed_id", &self.seed_id)?;
        require_text(ty, "operation", &self.operation)
    }

    /// Unlike commands, `args` is always present (possibly `{}`).
    pub fn encode_frame(&self, message_id: u64) -> Result<Frame, WireError> {
        self.validate()?;
        let fields = [
            Field::string(field_id::EXECUTION_ID, &self.execution_id),
            Field::string(field_id::COMMAND_ID, &self.command_id),
            Field::string(field_id::SEED_ID, &self.seed_id),
            Field::string(field_id::OPERATION, &self.operation),
            Field::bytes(field_id::ARGS, encode_args(&self.args)?),
        ];
        seal(
            message_id,
            MessageType::SeedExecute,
            FrameFlags::empty(),
            &fields,
        )
    }

    pub fn decode_frame(frame: &Frame) -> Result<Self, WireError> {
        let fields = open(frame, MessageType::SeedExecute)?;
        Ok(Self {
            execution_id: tlv::field_string(&fields, field_id::EXECUTION_ID)?,
            command_id: tlv::field_string(&fields, field_id::COMMAND_ID)?,
            seed_id: tlv::field_string(&fields, field_id::SEED_ID)?,
            operation: tlv::field_string(&fields, field_id::OPERATION)?,
            args: decode_args(&tlv::field_bytes(&fields, field_id::ARGS)?)?,
        })
    }
}

/// Normalized output of one seed execution.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedResult {
    pub execution_id: String,
    pub seed_id: String,
    pub status: String,
    #[serde(with = "lossy_text")]
    pub stdout: Bytes,
    #[serde(with = "lossy_text")]
    pub stderr: Bytes,
    pub exit_code: i32,
}

impl SeedResult {
    pub fn validate(&self) -> Result<(), WireError> {
        let ty = MessageType::SeedResult;
        require_text(ty, "execution_id", &self.execution_id)?;
        require_text(ty, "seed_id", &self.seed_id)?;
        require_text(ty, "status", &self.status)
    }

    /// The exit code travels as the u32 bit pattern of the i32.
    pub fn encode_frame(&self, message_id: u64) -> Result<Frame, WireError> {
        self.validate()?;
        let fields = [
            Field::string(field_id::EXECUTION_ID, &self.execution_id),
            Field::string(field_id::SEED_ID, &self.seed_id),
            Field::string(field_id::STATUS, &self.status),
            Field::bytes(field_id::STDOUT, self.stdout.clone()),
            Field::bytes(field_id::STDERR, self.stderr.clone()),
            Field::u32(field_id::EXIT_CODE, self.exit_code as u32),
        ];
        seal(
            message_id,
            MessageType::SeedResult,
            FrameFlags::empty(),
            &fields,
        )
    }

    pub fn decode_frame(frame: &Frame) -> Result<Self, WireError> {
        let fields = open(frame, MessageType::SeedResult)?;
        Ok(Self {
            execution_id: tlv::field_string(&fields, field_id::EXECUTION_ID)?,
            seed_id: tlv::field_string(&fields, field_id::SEED_ID)?,
            status: tlv::field_string(&fields, field_id::STATUS)?,
            stdout: tlv::field_bytes(&fields, field_id::STDOUT)?,
            stderr: tlv::field_bytes(&fields, field_id::STDERR)?,
            exit_code: tlv::field_u32(&fields, field_id::EXIT_CODE)? as i32,
        })
    }
}

/// Seed output is shown to operators as text in admin JSON.
mod lossy_text {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Bytes::from(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameLimits, round_trip};

    #[test]
    fn execute_always_carries_args() {
        let exec = SeedExecute {
            execution_id: "exec.cmd.1".into(),
            command_id: "cmd.1".into(),
            seed_id: "seed.flow".into(),
            operation: "status".into(),
            args: Args::new(),
        };
        let frame = exec.encode_frame(1).unwrap();
        let fields = tlv::decode_fields(&frame.payload).unwrap();
        assert_eq!(&tlv::field_bytes(&fields, field_id::ARGS).unwrap()[..], b"{}");
        assert_eq!(SeedExecute::decode_frame(&frame).unwrap(), exec);
    }

    #[test]
    fn negative_exit_code_survives() {
        let result = SeedResult {
            execution_id: "exec.cmd.1".into(),
            seed_id: "seed.flow".into(),
            status: "error".into(),
            stdout: Bytes::new(),
            stderr: Bytes::from_static(b"boom\n"),
            exit_code: -9,
        };
        let frame = round_trip(&result.encode_frame(5).unwrap(), FrameLimits::default()).unwrap();
        assert_eq!(SeedResult::decode_frame(&frame).unwrap(), result);
    }

    #[test]
    fn output_serializes_as_text() {
        let result = SeedResult {
            execution_id: "exec.cmd.1".into(),
            seed_id: "seed.flow".into(),
            status: "ok".into(),
            stdout: Bytes::from_static(b"flow status: ok\n"),
            stderr: Bytes::new(),
            exit_code: 0,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["stdout"], "flow status: ok\n");
    }
}
