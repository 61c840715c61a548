//! SQL file emission
//!
//! A generation run compiles every cataloged entity and assembles the
//! output files entirely in memory; nothing touches the filesystem until
//! the whole run has succeeded. A failed run therefore writes no partial
//! output. Layout: `app/foundation.sql` when the run requests foundation
//! artifacts, then one `<schema>/<entity>_actions.sql` per entity holding
//! its Trinity helpers and, per action, the input type, core routine,
//! wrapper, and annotation.

pub mod foundation;
pub mod helpers;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::catalog::EntityCatalog;
use crate::compiler::{CompileOptions, CompiledAction, Compiler};
use crate::config::ForgeConfig;
use crate::error::CompileError;

/// One output file, path relative to the output directory.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub content: String,
}

/// Every file of one successful generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRun {
    pub files: Vec<GeneratedFile>,
}

impl GenerationRun {
    /// Write every file under `out_dir`, creating directories as needed.
    pub fn write_all(&self, out_dir: &Path) -> io::Result<()> {
        for file in &self.files {
            let target = out_dir.join(&file.path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, &file.content)?;
        }
        Ok(())
    }

    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(|f| f.content.len()).sum()
    }
}

/// Knobs for one generation run.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateOptions {
    pub compile: CompileOptions,
    /// Also emit `app/foundation.sql` (shared result type, audit log,
    /// logging routine). Off by default; the foundation changes rarely
    /// and most runs only regenerate entity files.
    pub foundation: bool,
}

/// Compile the whole catalog into a generation run.
pub fn generate(
    catalog: &EntityCatalog,
    config: &ForgeConfig,
    options: GenerateOptions,
) -> Result<GenerationRun, CompileError> {
    let compiler = Compiler::with_options(catalog, config, options.compile);

    let mut files = Vec::new();
    if options.foundation {
        files.push(GeneratedFile {
            path: PathBuf::from("app").join("foundation.sql"),
            content: foundation::foundation_sql().to_string(),
        });
    }

    // Two entities in one schema generating the same routine name would
    // silently shadow each other at apply time.
    let mut routines: BTreeMap<(String, String), String> = BTreeMap::new();

    for entity in catalog.entities() {
        let compiled = compiler.compile_entity(entity)?;
        for action in &compiled {
            let key = (action.schema.clone(), action.action.clone());
            if let Some(first) = routines.insert(key, entity.name.clone()) {
                return Err(CompileError::DuplicateRoutine {
                    schema: action.schema.clone(),
                    routine: action.action.clone(),
                    first_entity: first,
                    second_entity: entity.name.clone(),
                });
            }
        }

        let (schema, _) = catalog.table_parts(entity);
        files.push(GeneratedFile {
            path: PathBuf::from(&schema).join(format!("{}_actions.sql", entity.snake_name())),
            content: entity_file(catalog, config, entity, &compiled),
        });
        info!(
            entity = %entity.name,
            actions = compiled.len(),
            "generated entity file"
        );
    }

    Ok(GenerationRun { files })
}

fn entity_file(
    catalog: &EntityCatalog,
    config: &ForgeConfig,
    entity: &adl_core::ast::EntityDefinition,
    compiled: &[CompiledAction],
) -> String {
    let mut content = String::from("-- Generated by actionforge. Do not edit.\n\n");
    content.push_str(&helpers::trinity_helpers_sql(catalog, config, entity));
    for action in compiled {
        content.push('\n');
        content.push_str(&action.input_type_sql);
        content.push_str("\n\n");
        content.push_str(&action.core_sql);
        content.push_str("\n\n");
        content.push_str(&action.wrapper_sql);
        content.push_str("\n\n");
        content.push_str(&action.annotation_sql);
        content.push('\n');
    }
    content
}
