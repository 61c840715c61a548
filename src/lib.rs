//! actionforge - Action Definition Language to PL/pgSQL compiler
//!
//! Entities and their actions are written as YAML documents in the Action
//! Definition Language. This crate turns each action into a pair of
//! Postgres routines: a core routine carrying the compiled step logic, and
//! a fixed-signature wrapper that converts every failure into an
//! `app.mutation_result` row instead of a raw error. Around the routines
//! it emits the input composite type, per-entity identifier helpers, the
//! schema contract, and the API annotation the external API generator
//! consumes.
//!
//! Parsing and expression analysis live in the `adl-core` crate; this
//! crate consumes its definitions and owns everything SQL.
//!
//! ## Quick Start
//!
//! ```rust
//! use actionforge::{parse_document, Compiler, EntityCatalog, ForgeConfig};
//!
//! let document = r#"
//! entity: Lead
//! schema: crm
//! fields:
//!   status: enum(new, qualified) = new
//! actions:
//!   - name: qualify_lead
//!     steps:
//!       - validate: status = 'new'
//!         error: not_a_new_lead
//!       - update: Lead SET status = 'qualified'
//! "#;
//!
//! let mut catalog = EntityCatalog::new();
//! catalog.insert(parse_document(document)?)?;
//!
//! let config = ForgeConfig::default();
//! let compiler = Compiler::new(&catalog, &config);
//! let compiled = compiler.compile_entity(catalog.get("Lead").unwrap())?;
//! assert!(compiled[0]
//!     .core_sql
//!     .contains("CREATE OR REPLACE FUNCTION crm.qualify_lead_core("));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Compilation errors spanning catalog, compiler, and emission
pub mod error;

// Cross-file entity registry and physical naming
pub mod catalog;

// Generation-run configuration
pub mod config;

// Boundary artifacts: schema contracts and API annotations
pub mod contracts;

// Action compiler: step lowering, core routine, wrapper
pub mod compiler;

// File assembly for a generation run
pub mod emit;

// Re-exports for the common compile path
pub use catalog::{DefaultNames, EntityCatalog, PhysicalNameResolver};
pub use compiler::{CompileOptions, CompiledAction, Compiler};
pub use config::ForgeConfig;
pub use contracts::{schema_contract, ApiAnnotation, SchemaContract};
pub use emit::{generate, GenerateOptions, GeneratedFile, GenerationRun};
pub use error::CompileError;

// Language-crate surface, so downstream users need a single dependency
pub use adl_core;
pub use adl_core::{parse_document, parse_documents, ParseError};
