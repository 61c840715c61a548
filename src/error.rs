//! Error handling for the ActionForge compiler
//!
//! Two layers: `adl_core::ParseError` covers everything wrong with a single
//! document in isolation; `CompileError` covers cross-document and emission
//! problems such as unknown entities, unresolved references, and catalog
//! collisions.
//! Both are terminal for the file being processed: no artifact is produced
//! past the first error.

use thiserror::Error;

use adl_core::ParseError;

/// Errors raised while compiling parsed definitions into SQL artifacts.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Unknown entity '{entity}' referenced by action '{action}'")]
    UnknownEntity { entity: String, action: String },

    #[error("Entity '{entity}' has no field '{field}' (referenced by action '{action}')")]
    UnknownField {
        entity: String,
        field: String,
        action: String,
    },

    #[error("Field '{field}' of '{entity}' is not a reference field but got a reference value in action '{action}'")]
    NotAReference {
        entity: String,
        field: String,
        action: String,
    },

    #[error("Duplicate entity '{entity}' (first defined in schema '{schema}')")]
    DuplicateEntity { entity: String, schema: String },

    #[error("Impact block of action '{action}' names unknown entity '{entity}'")]
    UnknownImpactEntity { entity: String, action: String },

    #[error("Invalid step in action '{action}': {message}")]
    InvalidStep { action: String, message: String },

    #[error("Actions of '{first_entity}' and '{second_entity}' both generate routine '{schema}.{routine}'")]
    DuplicateRoutine {
        schema: String,
        routine: String,
        first_entity: String,
        second_entity: String,
    },

    #[error("Config error: {message}")]
    Config { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_wraps_transparently() {
        let parse = ParseError::MissingKey {
            key: "entity".to_string(),
            location: "document".to_string(),
        };
        let compile: CompileError = parse.into();
        assert!(compile.to_string().contains("entity"));
    }

    #[test]
    fn test_unknown_entity_message() {
        let err = CompileError::UnknownEntity {
            entity: "Ledger".to_string(),
            action: "close_invoice".to_string(),
        };
        assert!(err.to_string().contains("Ledger"));
        assert!(err.to_string().contains("close_invoice"));
    }
}
