//! Error types for ADL parsing
//!
//! Every rejection the parser can produce is a distinct variant so callers
//! (and tests) can match on the failure class instead of scraping messages.
//! `location` values are dotted document paths such as
//! `actions[1].steps[0].validate`, which stay stable across YAML
//! reformatting.

use thiserror::Error;

/// Parse errors for ADL documents
///
/// The parser stops at the first structural problem; a `ParseError` always
/// means no AST was produced for the document.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Invalid YAML at line {line}, column {column}: {message}")]
    Yaml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Missing required key '{key}' at {location}")]
    MissingKey { key: String, location: String },

    #[error("Expected {expected} at {location}, found {found}")]
    WrongShape {
        expected: &'static str,
        found: String,
        location: String,
    },

    #[error("Unknown step key at {location}: {keys}")]
    UnknownStepKey { keys: String, location: String },

    #[error("Unknown type '{type_name}' for field '{field}'")]
    UnknownType { type_name: String, field: String },

    #[error("Field '{field}' collides with a reserved column name")]
    ReservedField { field: String },

    #[error("Duplicate field '{field}'")]
    DuplicateField { field: String },

    #[error("Duplicate action '{action}'")]
    DuplicateAction { action: String },

    #[error("Invalid identifier '{name}' at {location}")]
    InvalidIdentifier { name: String, location: String },

    #[error("Unknown field reference '{name}' in expression '{expression}' at {location}")]
    UnknownFieldReference {
        name: String,
        expression: String,
        location: String,
    },

    #[error("Unknown variable reference '${name}' at {location}")]
    UnknownVariableReference { name: String, location: String },

    #[error("Invalid expression at {location}: {message}")]
    InvalidExpression { message: String, location: String },

    #[error("Disallowed construct in expression at {location}: {construct}")]
    DisallowedConstruct { construct: String, location: String },

    #[error("Invalid field spec '{spec}' for field '{field}': {reason}")]
    InvalidFieldSpec {
        field: String,
        spec: String,
        reason: String,
    },

    #[error("Invalid notify syntax at {location}: expected recipient(channel, payload...)")]
    InvalidNotify { location: String },

    #[error("Invalid call syntax '{call}' at {location}")]
    InvalidCall { call: String, location: String },

    #[error("Unknown error kind '{kind}' in catch handler at {location}")]
    UnknownErrorKind { kind: String, location: String },

    #[error("OTHERS handler must be declared last at {location}")]
    OthersNotLast { location: String },

    #[error("Query at {location} must be a single read-only SELECT")]
    NotReadOnlyQuery { location: String },

    #[error("Variable '{name}' already bound at {location}")]
    DuplicateVariable { name: String, location: String },
}

/// Shape name for a YAML value, used in `WrongShape` diagnostics.
pub fn value_kind(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "boolean",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Sequence(_) => "sequence",
        serde_yaml::Value::Mapping(_) => "mapping",
        serde_yaml::Value::Tagged(_) => "tagged value",
    }
}

impl ParseError {
    /// Build a `Yaml` variant from a serde_yaml error, preserving the
    /// document position when serde_yaml reports one.
    pub fn from_yaml(err: &serde_yaml::Error) -> Self {
        let (line, column) = err
            .location()
            .map(|loc| (loc.line(), loc.column()))
            .unwrap_or((0, 0));
        ParseError::Yaml {
            line,
            column,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_offender() {
        let err = ParseError::UnknownFieldReference {
            name: "lead".to_string(),
            expression: "status = lead".to_string(),
            location: "actions[0].steps[0].validate".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'lead'"));
        assert!(msg.contains("actions[0].steps[0].validate"));
    }

    #[test]
    fn test_from_yaml_without_location() {
        let err = serde_yaml::from_str::<serde_yaml::Value>("{unclosed")
            .expect_err("must fail");
        match ParseError::from_yaml(&err) {
            ParseError::Yaml { message, .. } => assert!(!message.is_empty()),
            other => panic!("expected Yaml variant, got {other:?}"),
        }
    }
}
