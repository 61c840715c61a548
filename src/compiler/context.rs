//! Per-action compilation state
//!
//! `CompileCtx` tracks everything one action accumulates while its steps
//! compile: declared PL/pgSQL variables (hoisted into the routine's
//! `DECLARE` section), the kind of each bound scope variable (which decides
//! how member access renders), and whether the subject row has been
//! inserted yet in a create-pattern action.

use std::collections::HashMap;

use adl_core::ast::{ActionDefinition, EntityDefinition};

use crate::catalog::EntityCatalog;
use crate::config::ForgeConfig;

/// How a bound scope variable renders when referenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarKind {
    /// Plain typed value: `$x` -> `v_x`.
    Scalar,
    /// Row variable (`%ROWTYPE` or `RECORD`): `$x.f` -> `v_x.f`, with the
    /// member mapped through the entity's column names when known.
    Record { entity: Option<String> },
    /// JSONB element of an array loop: `$x.f` -> `(v_x->>'f')`.
    JsonbElem,
    /// Bound insert result: `$x` and `$x.id` -> `v_x_id`, `$x.pk` -> `v_x_pk`.
    InsertHandle,
}

pub struct CompileCtx<'a> {
    pub catalog: &'a EntityCatalog,
    pub config: &'a ForgeConfig,
    pub entity: &'a EntityDefinition,
    pub action: &'a ActionDefinition,
    pub create_pattern: bool,
    /// Synthesize default impact metadata for actions that declare none.
    pub with_impacts: bool,
    /// `v_`-prefixed name of the subject insert handle, once a
    /// create-pattern action has inserted its subject row.
    pub subject_handle: Option<String>,
    vars: HashMap<String, VarKind>,
    declarations: Vec<(String, String)>,
}

impl<'a> CompileCtx<'a> {
    pub fn new(
        catalog: &'a EntityCatalog,
        config: &'a ForgeConfig,
        entity: &'a EntityDefinition,
        action: &'a ActionDefinition,
    ) -> Self {
        let mut ctx = Self {
            catalog,
            config,
            entity,
            action,
            create_pattern: action.is_create_pattern(),
            with_impacts: false,
            subject_handle: None,
            vars: HashMap::new(),
            declarations: Vec::new(),
        };
        if !ctx.create_pattern {
            let row_var = ctx.subject_row_var();
            let table = catalog.qualified_table(entity);
            ctx.declare(&row_var, &format!("{}%ROWTYPE", table));
        }
        ctx.declare("v_updated_fields", "TEXT[] := ARRAY[]::TEXT[]");
        ctx
    }

    /// Add a `DECLARE` entry; later duplicates are dropped so loop bodies
    /// can re-register the same variable.
    pub fn declare(&mut self, name: &str, sql_type: &str) {
        if self.declarations.iter().any(|(n, _)| n == name) {
            return;
        }
        self.declarations.push((name.to_string(), sql_type.to_string()));
    }

    pub fn declarations(&self) -> &[(String, String)] {
        &self.declarations
    }

    /// Bind a logical variable name (no `v_` prefix) to its render kind.
    pub fn bind(&mut self, logical: &str, kind: VarKind) {
        self.vars.insert(logical.to_string(), kind);
    }

    pub fn var_kind(&self, logical: &str) -> Option<&VarKind> {
        self.vars.get(logical)
    }

    /// `v_<entity>` row variable of an existing-row action.
    pub fn subject_row_var(&self) -> String {
        format!("v_{}", self.entity.snake_name())
    }

    /// SQL expression for the subject's external UUID at the current point,
    /// or `NULL` before a create-pattern action has inserted its row.
    pub fn subject_id_expr(&self) -> String {
        if self.create_pattern {
            match &self.subject_handle {
                Some(handle) => format!("{}_id", handle),
                None => "NULL".to_string(),
            }
        } else {
            format!("{}.id", self.subject_row_var())
        }
    }

    /// SQL expression for the subject's surrogate key, or `NULL` before a
    /// create-pattern action has inserted its row.
    pub fn subject_pk_expr(&self) -> Option<String> {
        if self.create_pattern {
            self.subject_handle.as_ref().map(|h| format!("{}_pk", h))
        } else {
            Some(format!(
                "{}.pk_{}",
                self.subject_row_var(),
                self.entity.snake_name()
            ))
        }
    }

    pub fn is_subject(&self, entity_name: &str) -> bool {
        entity_name == self.entity.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adl_core::parse_document;

    fn setup() -> (EntityCatalog, ForgeConfig) {
        let entity = parse_document(
            r#"
entity: Contact
schema: crm
fields:
  email: email!
actions:
  - name: create_contact
    steps:
      - insert: Contact
        values:
          email: input_data.email
  - name: archive_contact
    steps:
      - delete
"#,
        )
        .unwrap();
        let mut catalog = EntityCatalog::new();
        catalog.insert(entity).unwrap();
        (catalog, ForgeConfig::default())
    }

    #[test]
    fn test_existing_row_ctx_declares_row_var() {
        let (catalog, config) = setup();
        let entity = catalog.get("Contact").unwrap();
        let action = entity.action("archive_contact").unwrap();
        let ctx = CompileCtx::new(&catalog, &config, entity, action);
        assert!(!ctx.create_pattern);
        assert_eq!(ctx.subject_id_expr(), "v_contact.id");
        assert_eq!(ctx.subject_pk_expr().unwrap(), "v_contact.pk_contact");
        assert!(ctx
            .declarations()
            .iter()
            .any(|(n, t)| n == "v_contact" && t == "crm.tb_contact%ROWTYPE"));
    }

    #[test]
    fn test_create_ctx_has_no_subject_until_insert() {
        let (catalog, config) = setup();
        let entity = catalog.get("Contact").unwrap();
        let action = entity.action("create_contact").unwrap();
        let mut ctx = CompileCtx::new(&catalog, &config, entity, action);
        assert!(ctx.create_pattern);
        assert_eq!(ctx.subject_id_expr(), "NULL");
        assert!(ctx.subject_pk_expr().is_none());

        ctx.subject_handle = Some("v_contact".to_string());
        assert_eq!(ctx.subject_id_expr(), "v_contact_id");
        assert_eq!(ctx.subject_pk_expr().unwrap(), "v_contact_pk");
    }

    #[test]
    fn test_duplicate_declarations_collapse() {
        let (catalog, config) = setup();
        let entity = catalog.get("Contact").unwrap();
        let action = entity.action("create_contact").unwrap();
        let mut ctx = CompileCtx::new(&catalog, &config, entity, action);
        let before = ctx.declarations().len();
        ctx.declare("v_fk_company", "INTEGER");
        ctx.declare("v_fk_company", "INTEGER");
        assert_eq!(ctx.declarations().len(), before + 1);
    }
}
