//! Step compiler
//!
//! Turns parsed `ActionDefinition`s into SQL artifacts. One action compiles
//! to four pieces: the input composite type, the core routine holding the
//! step sequence, the fixed-signature wrapper, and the API annotation.
//! Compilation is pure string assembly over the catalog; identical input
//! yields byte-identical output.

mod calls;
mod context;
mod control;
mod impacts;
mod mutations;
mod routine;
mod sql;
mod steps;
mod wrapper;

use tracing::debug;

use adl_core::ast::{ActionDefinition, EntityDefinition};

use crate::catalog::EntityCatalog;
use crate::config::ForgeConfig;
use crate::error::CompileError;
use self::context::CompileCtx;

/// Per-run compilation switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Synthesize impact metadata for actions that declare none.
    pub with_impacts: bool,
}

/// Everything generated for one action.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledAction {
    pub entity: String,
    pub action: String,
    pub schema: String,
    pub input_type_sql: String,
    pub core_sql: String,
    pub wrapper_sql: String,
    pub annotation_sql: String,
}

/// Compiles cataloged entities into SQL artifacts.
pub struct Compiler<'a> {
    catalog: &'a EntityCatalog,
    config: &'a ForgeConfig,
    options: CompileOptions,
}

impl<'a> Compiler<'a> {
    pub fn new(catalog: &'a EntityCatalog, config: &'a ForgeConfig) -> Self {
        Self::with_options(catalog, config, CompileOptions::default())
    }

    pub fn with_options(
        catalog: &'a EntityCatalog,
        config: &'a ForgeConfig,
        options: CompileOptions,
    ) -> Self {
        Self {
            catalog,
            config,
            options,
        }
    }

    /// Compile every action of one entity, in declaration order.
    pub fn compile_entity(
        &self,
        entity: &EntityDefinition,
    ) -> Result<Vec<CompiledAction>, CompileError> {
        entity
            .actions
            .iter()
            .map(|action| self.compile_action(entity, action))
            .collect()
    }

    pub fn compile_action(
        &self,
        entity: &EntityDefinition,
        action: &ActionDefinition,
    ) -> Result<CompiledAction, CompileError> {
        let mut ctx = CompileCtx::new(self.catalog, self.config, entity, action);
        ctx.with_impacts = self.options.with_impacts;

        let input_type_sql = routine::input_type_sql(&ctx);
        let core_sql = routine::compile_core(&mut ctx)?;
        let wrapper_sql = wrapper::wrapper_sql(&ctx);
        let annotation_sql = wrapper::annotation_sql(&ctx);
        let (schema, _) = self.catalog.table_parts(entity);

        debug!(
            entity = %entity.name,
            action = %action.name,
            steps = action.steps.len(),
            "compiled action"
        );

        Ok(CompiledAction {
            entity: entity.name.clone(),
            action: action.name.clone(),
            schema,
            input_type_sql,
            core_sql,
            wrapper_sql,
            annotation_sql,
        })
    }
}
