//! Required-field contracts per message type.
//!
//! Only presence and declared TLV type are checked. Fields outside a table
//! are ignored so newer peers can add fields without breaking older ones.

use std::fmt;

use thiserror::Error;

use crate::protocol::{MessageType, field_id};
use crate::tlv::{self, Field, FieldType};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Requirement {
    pub id: u16,
    pub field_type: FieldType,
}

const fn req(id: u16, field_type: FieldType) -> Requirement {
    Requirement { id, field_type }
}

const ISSUE: &[Requirement] = &[
    req(field_id::INTENT_ID, FieldType::STRING),
    req(field_id::ACTOR, FieldType::STRING),
    req(field_id::TARGET_SCOPE, FieldType::STRING),
    req(field_id::OBJECTIVE, FieldType::STRING),
];

const COMMAND: &[Requirement] = &[
    req(field_id::COMMAND_ID, FieldType::STRING),
    req(field_id::INTENT_ID, FieldType::STRING),
    req(field_id::GHOST_ID, FieldType::STRING),
    req(field_id::SEED_SELECTOR, FieldType::STRING),
    req(field_id::OPERATION, FieldType::STRING),
];

const SEED_EXECUTE: &[Requirement] = &[
    req(field_id::EXECUTION_ID, FieldType::STRING),
    req(field_id::COMMAND_ID, FieldType::STRING),
    req(field_id::SEED_ID, FieldType::STRING),
    req(field_id::OPERATION, FieldType::STRING),
    req(field_id::ARGS, FieldType::BYTES),
];

const SEED_RESULT: &[Requirement] = &[
    req(field_id::EXECUTION_ID, FieldType::STRING),
    req(field_id::SEED_ID, FieldType::STRING),
    req(field_id::STATUS, FieldType::STRING),
    req(field_id::STDOUT, FieldType::BYTES),
    req(field_id::STDERR, FieldType::BYTES),
    req(field_id::EXIT_CODE, FieldType::U32),
];

const EVENT: &[Requirement] = &[
    req(field_id::EVENT_ID, FieldType::STRING),
    req(field_id::COMMAND_ID, FieldType::STRING),
    req(field_id::INTENT_ID, FieldType::STRING),
    req(field_id::GHOST_ID, FieldType::STRING),
    req(field_id::SEED_ID, FieldType::STRING),
    req(field_id::OUTCOME, FieldType::STRING),
];

const REPORT: &[Requirement] = &[
    req(field_id::INTENT_ID, FieldType::STRING),
    req(field_id::PHASE, FieldType::STRING),
    req(field_id::SUMMARY, FieldType::STRING),
    req(field_id::COMPLETION_STATE, FieldType::STRING),
];

const EVENT_ACK: &[Requirement] = &[
    req(field_id::EVENT_ID, FieldType::STRING),
    req(field_id::COMMAND_ID, FieldType::STRING),
    req(field_id::GHOST_ID, FieldType::STRING),
    req(field_id::ACK_STATUS, FieldType::STRING),
    req(field_id::ACK_CODE, FieldType::U32),
    req(field_id::TIMESTAMP_MS, FieldType::U64),
];

/// Requirement table for a raw message type; `None` for unknown types.
pub fn requirements(message_type: u32) -> Option<&'static [Requirement]> {
    let table = match MessageType::from_code(message_type)? {
        MessageType::Issue => ISSUE,
        MessageType::Command => COMMAND,
        MessageType::SeedExecute => SEED_EXECUTE,
        MessageType::SeedResult => SEED_RESULT,
        MessageType::Event => EVENT,
        MessageType::Report => REPORT,
        MessageType::Error => &[],
        MessageType::EventAck => EVENT_ACK,
    };
    Some(table)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationReason {
    UnknownMessageType,
    MissingRequiredField,
    TypeMismatch { got: FieldType, want: FieldType },
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationReason::UnknownMessageType => f.write_str("unknown message_type"),
            ValidationReason::MissingRequiredField => f.write_str("missing required field"),
            ValidationReason::TypeMismatch { got, want } => {
                write!(f, "type mismatch: got {got} want {want}")
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("schema: message_type={message_type}{field}: {reason}", field = field_suffix(.field_id))]
pub struct ValidationError {
    pub message_type: u32,
    pub field_id: Option<u16>,
    pub reason: ValidationReason,
}

struct FieldSuffix(Option<u16>);

fn field_suffix(field_id: &Option<u16>) -> FieldSuffix {
    FieldSuffix(*field_id)
}

impl fmt::Display for FieldSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, " field={id}"),
            None => Ok(()),
        }
    }
}

/// Checks every required field is present (first occurrence wins) with the
/// exact declared type.
pub fn validate(message_type: u32, fields: &[Field]) -> Result<(), ValidationError> {
    let Some(table) = requirements(message_type) else {
        return Err(ValidationError {
            message_type,
            field_id: None,
            reason: ValidationReason::UnknownMessageType,
        });
    };
    for requirement in table {
        let Some(field) = tlv::get_field(fields, requirement.id) else {
            return Err(ValidationError {
                message_type,
                field_id: Some(requirement.id),
                reason: ValidationReason::MissingRequiredField,
            });
        };
        if field.field_type != requirement.field_type {
            return Err(ValidationError {
                message_type,
                field_id: Some(requirement.id),
                reason: ValidationReason::TypeMismatch {
                    got: field.field_type,
                    want: requirement.field_type,
                },
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_fields() -> Vec<Field> {
        vec![
            Field::string(field_id::INTENT_ID, "intent.1"),
            Field::string(field_id::PHASE, "complete"),
            Field::string(field_id::SUMMARY, "done"),
            Field::string(field_id::COMPLETION_STATE, "satisfied"),
        ]
    }

    #[test]
    fn accepts_required_fields_and_ignores_unknown() {
        let mut fields = report_fields();
        fields.push(Field::u64(4242, 1));
        validate(MessageType::Report.code(), &fields).unwrap();
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let err = validate(77, &report_fields()).unwrap_err();
        assert_eq!(err.reason, ValidationReason::UnknownMessageType);
        assert_eq!(err.field_id, None);
    }

    #[test]
    fn missing_and_mismatched_are_distinct() {
        let mut fields = report_fields();
        fields.remove(2);
        let err = validate(MessageType::Report.code(), &fields).unwrap_err();
        assert_eq!(err.field_id, Some(field_id::SUMMARY));
        assert_eq!(err.reason, ValidationReason::MissingRequiredField);

        let mut fields = report_fields();
        fields[1] = Field::u32(field_id::PHASE, 1);
        let err = validate(MessageType::Report.code(), &fields).unwrap_err();
        assert_eq!(err.field_id, Some(field_id::PHASE));
        assert!(matches!(err.reason, ValidationReason::TypeMismatch { .. }));
        assert_eq!(
            err.to_string(),
            "schema: message_type=6 field=5: type mismatch: got u32 want string"
        );
    }

    #[test]
    fn unknown_type_error_has_no_field() {
        let err = validate(0xdead, &[]).unwrap_err();
        assert_eq!(err.field_id, None);
        assert_eq!(err.reason, ValidationReason::UnknownMessageType);
        assert_eq!(
            err.to_string(),
            "schema: message_type=57005: unknown message_type"
        );
        let err: &dyn std::error::Error = &err;
        assert!(err.source().is_none());
    }

    #[test]
    fn every_known_type_has_a_table() {
        for ty in MessageType::ALL {
            assert!(requirements(ty.code()).is_some(), "{ty}");
        }
    }
}
