use serde::{Deserialize, Serialize};

use super::{CompletionState, Outcome, ReportPhase, WireError, open, parse_enum, require_text, seal};
use crate::frame::{Frame, FrameFlags};
use crate::protocol::{MessageType, field_id};
use crate::tlv::{self, Field};

/// Progress or completion of an intent, as synthesized by Mirage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub intent_id: String,
    pub phase: ReportPhase,
    pub summary: String,
    pub completion_state: CompletionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub timestamp_ms: u64,
}

impl Report {
    pub fn validate(&self) -> Result<(), WireError> {
        require_text(MessageType::Report, "intent_id", &self.intent_id)?;
        require_text(MessageType::Report, "summary", &self.summary)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.phase == ReportPhase::Complete
    }

    pub fn encode_frame(&self, message_id: u64) -> Result<Frame, WireError> {
        self.validate()?;
        let mut fields = vec![
            Field::string(field_id::INTENT_ID, &self.intent_id),
            Field::string(field_id::PHASE, self.phase.as_str()),
            Field::string(field_id::SUMMARY, &self.summary),
            Field::string(field_id::COMPLETION_STATE, self.completion_state.as_str()),
        ];
        let optional = [
            (field_id::COMMAND_ID, self.command_id.as_deref()),
            (field_id::EXECUTION_ID, self.execution_id.as_deref()),
            (field_id::EVENT_ID, self.event_id.as_deref()),
            (field_id::OUTCOME, self.outcome.as_ref().map(Outcome::as_str)),
        ];
        for (id, value) in optional {
            if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
                fields.push(Field::string(id, value));
            }
        }
        if self.timestamp_ms != 0 {
            fields.push(Field::u64(field_id::TIMESTAMP_MS, self.timestamp_ms));
        }
        seal(message_id, MessageType::Report, FrameFlags::empty(), &fields)
    }

    pub fn decode_frame(frame: &Frame) -> Result<Self, WireError> {
        let ty = MessageType::Report;
        let fields = open(frame, ty)?;
        let outcome = tlv::optional_string(&fields, field_id::OUTCOME)?
            .map(|raw| parse_enum(ty, "outcome", raw, Outcome::parse_str))
            .transpose()?;
        Ok(Self {
            intent_id: tlv::field_string(&fields, field_id::INTENT_ID)?,
            phase: parse_enum(
                ty,
                "phase",
                tlv::field_string(&fields, field_id::PHASE)?,
                ReportPhase::parse_str,
            )?,
            summary: tlv::field_string(&fields, field_id::SUMMARY)?,
            completion_state: parse_enum(
                ty,
                "completion_state",
                tlv::field_string(&fields, field_id::COMPLETION_STATE)?,
                CompletionState::parse_str,
            )?,
            command_id: tlv::optional_string(&fields, field_id::COMMAND_ID)?,
            execution_id: tlv::optional_string(&fields, field_id::EXECUTION_ID)?,
            event_id: tlv::optional_string(&fields, field_id::EVENT_ID)?,
            outcome,
            timestamp_ms: tlv::optional_u64(&fields, field_id::TIMESTAMP_MS)?.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameLimits, round_trip};

    #[test]
    fn optional_fields_survive_round_trip() {
        let report = Report {
            intent_id: "intent.1".into(),
            phase: ReportPhase::Complete,
            summary: "intent intent.1 satisfied on ghost.alpha".into(),
            completion_state: CompletionState::Satisfied,
            command_id: Some("cmd.intent.1.1".into()),
            execution_id: Some("exec.cmd.intent.1.1".into()),
            event_id: Some("evt.cmd.intent.1.1".into()),
            outcome: Some(Outcome::Success),
            timestamp_ms: 99,
        };
        let frame = round_trip(&report.encode_frame(2).unwrap(), FrameLimits::default()).unwrap();
        assert_eq!(Report::decode_frame(&frame).unwrap(), report);
    }

    #[test]
    fn bare_report_decodes_with_none_fields() {
        let report = Report {
            intent_id: "intent.2".into(),
            summary: "intent intent.2 has no command plan".into(),
            phase: ReportPhase::Complete,
            completion_state: CompletionState::Satisfied,
            command_id: Some("   ".into()),
            ..Report::default()
        };
        let decoded = Report::decode_frame(&report.encode_frame(1).unwrap()).unwrap();
        assert_eq!(decoded.command_id, None);
        assert_eq!(decoded.outcome, None);
        assert!(decoded.is_terminal());
    }
}
