//! adl-core: parser, AST, and type registries for the Action Definition Language
//!
//! This crate contains the pure language logic with NO database dependencies:
//! - AST types (EntityDefinition, ActionDefinition, ActionStep, impact metadata)
//! - YAML document parser with closed-set step dispatch
//! - Nom-based expression analyzer with parse-time reference resolution
//! - Field declaration grammar (scalars, enums, lists, references)
//! - Scalar and composite type registries
//! - Reserved word and column tables
//!
//! SQL generation lives in the `actionforge` crate, which consumes the
//! definitions produced here.

pub mod ast;
pub mod error;
pub mod expr;
pub mod fields;
pub mod parser;
pub mod reserved;
pub mod types;

// Re-export the types almost every consumer touches
pub use ast::{
    ActionDefinition, ActionImpact, ActionStep, Assignment, CacheInvalidation, CatchHandler,
    Collection, EntityDefinition, EntityImpact, FieldDefinition, FieldType, ImpactOperation,
    InvalidationStrategy, RefTarget, ReturnValue, RuntimeErrorKind, SwitchCase,
};
pub use error::ParseError;
pub use expr::{ExprNode, ExprScope, Expression, PathKind, PathRef};
pub use parser::{parse_document, parse_documents, STEP_KEYS};
pub use types::{
    basic_storage_type, composite_type, is_basic_type, is_composite_type, is_scalar_type,
    scalar_type, FieldTier, ScalarType,
};
