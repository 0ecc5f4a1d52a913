//! Per-kind payload schemas
//!
//! Each [`PayloadKind`] has a registered [`KindSchema`] listing the payload
//! fields it understands. Validation runs before any write: required fields
//! must be present (and non-empty when they are strings), known fields must
//! carry the declared JSON type, and kinds that do not allow additional
//! fields reject anything unlisted.

use serde_json::Value;
use tracing::debug;

use crate::envelope::{Envelope, PayloadKind};
use crate::error::SchemaError;

/// JSON type expected for a payload field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Object,
    Array,
    Bool,
    /// String restricted to a closed set of values
    OneOf(&'static [&'static str]),
}

impl FieldType {
    fn describe(&self) -> &'static str {
        match self {
            Self::String | Self::OneOf(_) => "a string",
            Self::Object => "an object",
            Self::Array => "an array",
            Self::Bool => "a boolean",
        }
    }
}

/// One field rule; `nested` applies to the fields of an object-typed field
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
    pub nested: &'static [FieldRule],
}

const fn req(name: &'static str, ty: FieldType) -> FieldRule {
    FieldRule {
        name,
        ty,
        required: true,
        nested: &[],
    }
}

const fn opt(name: &'static str, ty: FieldType) -> FieldRule {
    FieldRule {
        name,
        ty,
        required: false,
        nested: &[],
    }
}

/// Schema registered for one payload kind
#[derive(Debug, Clone, Copy)]
pub struct KindSchema {
    pub kind: PayloadKind,
    pub fields: &'static [FieldRule],
    pub additional_fields: bool,
}

const ARTIFACT_FIELDS: &[FieldRule] = &[req("path", FieldType::String), req("kind", FieldType::String)];

const SCHEMAS: &[KindSchema] = &[
    KindSchema {
        kind: PayloadKind::PlanCreated,
        fields: &[
            req("topic", FieldType::String),
            opt("plan", FieldType::Object),
            opt("outline_artifact", FieldType::Object),
            opt("plan_artifact", FieldType::Object),
        ],
        additional_fields: true,
    },
    KindSchema {
        kind: PayloadKind::SubtaskResult,
        fields: &[
            req("subtask_id", FieldType::String),
            FieldRule {
                name: "result_artifact",
                ty: FieldType::Object,
                required: true,
                nested: ARTIFACT_FIELDS,
            },
            opt("subtask_title", FieldType::String),
        ],
        additional_fields: true,
    },
    KindSchema {
        kind: PayloadKind::CoordDecision,
        fields: &[
            req("subtask_id", FieldType::String),
            req("decision", FieldType::String),
            opt("reason", FieldType::String),
            opt("batch_id", FieldType::String),
            opt("revised", FieldType::Bool),
        ],
        additional_fields: true,
    },
    KindSchema {
        kind: PayloadKind::CoordResponse,
        fields: &[req("question", FieldType::String), req("response", FieldType::String)],
        additional_fields: true,
    },
    KindSchema {
        kind: PayloadKind::UserCommand,
        fields: &[
            req("text", FieldType::String),
            opt("command", FieldType::String),
            opt("payload", FieldType::Object),
        ],
        additional_fields: true,
    },
    KindSchema {
        kind: PayloadKind::UserFeedback,
        fields: &[
            req("subtask_id", FieldType::String),
            req("decision", FieldType::OneOf(&["accept", "redo"])),
            req("feedback", FieldType::String),
        ],
        additional_fields: false,
    },
    KindSchema {
        kind: PayloadKind::PlanLocked,
        fields: &[req("locked_by", FieldType::String)],
        additional_fields: true,
    },
    KindSchema {
        kind: PayloadKind::Error,
        fields: &[req("code", FieldType::String), req("message", FieldType::String)],
        additional_fields: true,
    },
];

/// Look up the schema registered for a kind
pub fn schema_for(kind: PayloadKind) -> &'static KindSchema {
    // Every PayloadKind variant has an entry above
    SCHEMAS
        .iter()
        .find(|s| s.kind == kind)
        .unwrap_or(&SCHEMAS[SCHEMAS.len() - 1])
}

/// Validate a whole envelope: envelope-level fields, then the payload
pub fn validate_envelope(envelope: &Envelope) -> Result<(), SchemaError> {
    debug!(session_id = %envelope.session_id, kind = %envelope.payload_type, "validate_envelope: called");
    if envelope.session_id.trim().is_empty() {
        return Err(SchemaError::EmptyEnvelopeField("session_id"));
    }
    if envelope.version.trim().is_empty() {
        return Err(SchemaError::EmptyEnvelopeField("version"));
    }
    validate_payload(envelope.payload_type, &envelope.payload)
}

/// Validate a raw JSON line: it must parse as an envelope and pass its schema
pub fn validate_value(value: Value) -> Result<Envelope, SchemaError> {
    let envelope: Envelope = serde_json::from_value(value).map_err(|e| SchemaError::Malformed(e.to_string()))?;
    validate_envelope(&envelope)?;
    Ok(envelope)
}

/// Validate a payload against the schema of `kind`
pub fn validate_payload(kind: PayloadKind, payload: &Value) -> Result<(), SchemaError> {
    debug!(%kind, "validate_payload: called");
    let schema = schema_for(kind);
    check_object(kind, payload, schema.fields, schema.additional_fields, "")
}

fn check_object(
    kind: PayloadKind,
    value: &Value,
    rules: &[FieldRule],
    additional: bool,
    prefix: &str,
) -> Result<(), SchemaError> {
    let obj = value.as_object().ok_or(SchemaError::NotAnObject { kind })?;

    for rule in rules {
        let path = format!("{}{}", prefix, rule.name);
        match obj.get(rule.name) {
            None | Some(Value::Null) if rule.required => {
                debug!(%kind, field = %path, "check_object: missing required field");
                return Err(SchemaError::MissingField { kind, field: path });
            }
            None | Some(Value::Null) => {}
            Some(v) => check_field(kind, v, rule, &path)?,
        }
    }

    if !additional {
        if let Some(extra) = obj.keys().find(|k| !rules.iter().any(|r| r.name == k.as_str())) {
            debug!(%kind, field = %extra, "check_object: unexpected field");
            return Err(SchemaError::UnexpectedField {
                kind,
                field: format!("{}{}", prefix, extra),
            });
        }
    }

    Ok(())
}

fn check_field(kind: PayloadKind, value: &Value, rule: &FieldRule, path: &str) -> Result<(), SchemaError> {
    let wrong_type = || SchemaError::WrongType {
        kind,
        field: path.to_string(),
        expected: rule.ty.describe(),
    };

    match rule.ty {
        FieldType::String => {
            let s = value.as_str().ok_or_else(wrong_type)?;
            if rule.required && s.trim().is_empty() {
                return Err(SchemaError::MissingField {
                    kind,
                    field: path.to_string(),
                });
            }
        }
        FieldType::OneOf(allowed) => {
            let s = value.as_str().ok_or_else(wrong_type)?;
            if !allowed.contains(&s) {
                return Err(SchemaError::NotAllowed {
                    kind,
                    field: path.to_string(),
                    allowed,
                    value: s.to_string(),
                });
            }
        }
        FieldType::Object => {
            if !value.is_object() {
                return Err(wrong_type());
            }
            if !rule.nested.is_empty() {
                check_object(kind, value, rule.nested, true, &format!("{}.", path))?;
            }
        }
        FieldType::Array => {
            if !value.is_array() {
                return Err(wrong_type());
            }
        }
        FieldType::Bool => {
            if !value.is_boolean() {
                return Err(wrong_type());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Role;
    use serde_json::json;

    #[test]
    fn test_every_kind_has_a_schema() {
        for kind in PayloadKind::ALL {
            assert_eq!(schema_for(kind).kind, kind);
        }
    }

    #[test]
    fn test_subtask_result_requires_artifact_path() {
        let ok = json!({"subtask_id": "t1", "result_artifact": {"path": "s/artifacts/a.md", "kind": "markdown"}});
        assert!(validate_payload(PayloadKind::SubtaskResult, &ok).is_ok());

        let missing = json!({"subtask_id": "t1", "result_artifact": {"kind": "markdown"}});
        assert_eq!(
            validate_payload(PayloadKind::SubtaskResult, &missing),
            Err(SchemaError::MissingField {
                kind: PayloadKind::SubtaskResult,
                field: "result_artifact.path".to_string()
            })
        );
    }

    #[test]
    fn test_subtask_result_missing_subtask_id() {
        let payload = json!({"result_artifact": {"path": "p", "kind": "text"}});
        assert!(matches!(
            validate_payload(PayloadKind::SubtaskResult, &payload),
            Err(SchemaError::MissingField { .. })
        ));
    }

    #[test]
    fn test_empty_required_string_is_missing() {
        let payload = json!({"subtask_id": "  ", "decision": "ACCEPT"});
        assert!(validate_payload(PayloadKind::CoordDecision, &payload).is_err());
    }

    #[test]
    fn test_user_feedback_closed_set_and_no_extras() {
        let ok = json!({"subtask_id": "t1", "decision": "redo", "feedback": "darker"});
        assert!(validate_payload(PayloadKind::UserFeedback, &ok).is_ok());

        let bad_decision = json!({"subtask_id": "t1", "decision": "maybe", "feedback": "x"});
        assert!(matches!(
            validate_payload(PayloadKind::UserFeedback, &bad_decision),
            Err(SchemaError::NotAllowed { .. })
        ));

        let extra = json!({"subtask_id": "t1", "decision": "accept", "feedback": "x", "mood": "happy"});
        assert!(matches!(
            validate_payload(PayloadKind::UserFeedback, &extra),
            Err(SchemaError::UnexpectedField { .. })
        ));
    }

    #[test]
    fn test_wrong_type_reported() {
        let payload = json!({"text": "next", "payload": "not-an-object"});
        assert!(matches!(
            validate_payload(PayloadKind::UserCommand, &payload),
            Err(SchemaError::WrongType { expected: "an object", .. })
        ));
    }

    #[test]
    fn test_payload_must_be_object() {
        assert_eq!(
            validate_payload(PayloadKind::Error, &json!("boom")),
            Err(SchemaError::NotAnObject {
                kind: PayloadKind::Error
            })
        );
    }

    #[test]
    fn test_envelope_level_checks() {
        let env = Envelope::new("", Role::User, Role::Coordinator, PayloadKind::UserCommand, json!({"text": "x"}));
        assert_eq!(validate_envelope(&env), Err(SchemaError::EmptyEnvelopeField("session_id")));
    }

    #[test]
    fn test_validate_value_rejects_malformed() {
        assert!(matches!(
            validate_value(json!({"session_id": "s"})),
            Err(SchemaError::Malformed(_))
        ));
    }
}
