//! Row-mutating step emitters: insert, update, delete, find
//!
//! All four share the same scoping rule: any access to an entity's rows is
//! filtered by tenant (when the schema is tenant-scoped) and excludes
//! soft-deleted rows. Reference-typed values are resolved to surrogate
//! keys before the write, failing `reference_not_found` when no live,
//! tenant-visible target matches.

use adl_core::ast::{Assignment, EntityDefinition, FieldType};
use adl_core::expr::Expression;
use adl_core::reserved::is_reserved_column;

use super::calls::SQLSTATE_VALIDATION;
use super::context::{CompileCtx, VarKind};
use super::sql::{ExprRenderer, SqlWriter};
use crate::error::CompileError;

/// Tenant/soft-delete filter clauses for reading or writing `target` rows.
pub fn scope_clauses(ctx: &CompileCtx, target: &EntityDefinition) -> Vec<String> {
    let (schema, _) = ctx.catalog.table_parts(target);
    let mut clauses = Vec::new();
    if ctx.config.is_tenant_schema(&schema) {
        clauses.push("tenant_id = auth_tenant_id".to_string());
    }
    if ctx.config.soft_delete && !target.hard_delete {
        clauses.push("deleted_at IS NULL".to_string());
    }
    clauses
}

/// Every field a cross-entity condition references must be a column of the
/// target, a generated column, or a subject field (rendered through the
/// subject row).
pub fn check_condition_fields(
    ctx: &CompileCtx,
    target: &EntityDefinition,
    condition: &Expression,
) -> Result<(), CompileError> {
    for field in &condition.field_refs {
        if target.field(field).is_none()
            && !is_reserved_column(field)
            && ctx.entity.field(field).is_none()
        {
            return Err(CompileError::UnknownField {
                entity: target.name.clone(),
                field: field.clone(),
                action: ctx.action.name.clone(),
            });
        }
    }
    Ok(())
}

fn where_block(writer: &mut SqlWriter, first: String, rest: Vec<String>) {
    writer.line(format!("WHERE {}", first));
    for clause in rest {
        writer.line(format!("  AND {}", clause));
    }
}

// ============================================================================
// Reference resolution
// ============================================================================

/// Emit resolution of one reference-typed value to its surrogate key.
/// Returns the fk variable and, for polymorphic references, the
/// discriminator variable.
fn emit_reference_resolution(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    declaring: &EntityDefinition,
    field_name: &str,
    targets: &[adl_core::ast::RefTarget],
    required: bool,
    value_sql: &str,
) -> (String, Option<String>) {
    let fk_var = format!("v_fk_{}", field_name);
    ctx.declare(&fk_var, "INTEGER");
    let type_var = if targets.len() > 1 {
        let tv = format!("v_{}_type", field_name);
        ctx.declare(&tv, "TEXT");
        Some(tv)
    } else {
        None
    };

    let helper_call = |target: &adl_core::ast::RefTarget| -> String {
        let (schema, snake) = ctx.catalog.resolve_ref_target(target, &declaring.schema);
        if ctx.config.is_tenant_schema(&schema) {
            format!("{}.{}_pk(({})::TEXT, auth_tenant_id)", schema, snake, value_sql)
        } else {
            format!("{}.{}_pk(({})::TEXT)", schema, snake, value_sql)
        }
    };

    let emit_chain = |writer: &mut SqlWriter| {
        for (i, target) in targets.iter().enumerate() {
            if i == 0 {
                writer.line(format!("{} := {};", fk_var, helper_call(target)));
                if let Some(tv) = &type_var {
                    writer.line(format!("{} := '{}';", tv, target.entity));
                }
            } else {
                writer.line(format!("IF {} IS NULL THEN", fk_var));
                writer.indent();
                writer.line(format!("{} := {};", fk_var, helper_call(target)));
                if let Some(tv) = &type_var {
                    writer.line(format!("{} := '{}';", tv, target.entity));
                }
                writer.dedent();
                writer.line("END IF;");
            }
        }
        let names: Vec<&str> = targets.iter().map(|t| t.entity.as_str()).collect();
        writer.line(format!("IF {} IS NULL THEN", fk_var));
        writer.indent();
        writer.line(format!(
            "RAISE EXCEPTION 'Cannot resolve {} reference from %', ({}) USING ERRCODE = '{}', DETAIL = 'reference_not_found';",
            names.join("/"),
            value_sql,
            SQLSTATE_VALIDATION
        ));
        writer.dedent();
        writer.line("END IF;");
    };

    if required {
        emit_chain(writer);
    } else {
        writer.line(format!("{} := NULL;", fk_var));
        if let Some(tv) = &type_var {
            writer.line(format!("{} := NULL;", tv));
        }
        writer.line(format!("IF ({}) IS NOT NULL THEN", value_sql));
        writer.indent();
        emit_chain(writer);
        writer.dedent();
        writer.line("END IF;");
    }

    (fk_var, type_var)
}

// ============================================================================
// Insert
// ============================================================================

pub fn compile_insert(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    entity_name: &str,
    values: &[Assignment],
    bind: &Option<String>,
) -> Result<(), CompileError> {
    let catalog = ctx.catalog;
    let target = catalog.require(entity_name, &ctx.action.name)?;
    let (schema, _) = catalog.table_parts(target);
    let table = catalog.qualified_table(target);
    let target_snake = target.snake_name();

    // A bound insert (or the subject insert of a create-pattern action)
    // gets an id/pk handle other steps can reference.
    let handle = match bind {
        Some(name) => Some(format!("v_{}", name)),
        None if ctx.create_pattern && ctx.is_subject(entity_name) && ctx.subject_handle.is_none() => {
            Some(format!("v_{}", target_snake))
        }
        None => None,
    };
    if let Some(prefix) = &handle {
        ctx.declare(&format!("{}_id", prefix), "UUID");
        ctx.declare(&format!("{}_pk", prefix), "INTEGER");
        if let Some(name) = bind {
            ctx.bind(name, VarKind::InsertHandle);
        }
        if ctx.create_pattern && ctx.is_subject(entity_name) && ctx.subject_handle.is_none() {
            ctx.subject_handle = Some(prefix.clone());
        }
    }

    let mut columns: Vec<(String, String)> = Vec::new();

    let id_value = match &handle {
        Some(prefix) => format!("{}_id", prefix),
        None => "gen_random_uuid()".to_string(),
    };
    columns.push(("id".to_string(), id_value));
    if ctx.config.is_tenant_schema(&schema) {
        columns.push(("tenant_id".to_string(), "auth_tenant_id".to_string()));
    }

    if let Some(identifier_field) = &target.identifier_field {
        if let Some(assignment) = values.iter().find(|a| &a.field == identifier_field) {
            let rendered = ExprRenderer::ambient(ctx).render(&assignment.value);
            columns.push(("identifier".to_string(), format!("({})::TEXT", rendered)));
        }
    }

    // Resolve references before the row exists, then splice the fk
    // variables into the column list.
    let mut resolution_lines = SqlWriter::new(0);
    for assignment in values {
        let field = catalog.require_field(target, &assignment.field, &ctx.action.name)?;
        let value_sql = ExprRenderer::ambient(ctx).render(&assignment.value);
        if let FieldType::Reference(targets) = &field.field_type {
            let required = field.required;
            let targets = targets.clone();
            let column = field.column_name();
            let (fk_var, type_var) = emit_reference_resolution(
                ctx,
                &mut resolution_lines,
                target,
                &assignment.field,
                &targets,
                required,
                &value_sql,
            );
            columns.push((column, fk_var));
            if let Some(tv) = type_var {
                columns.push((format!("{}_type", assignment.field), tv));
            }
        } else {
            columns.push((field.column_name(), value_sql));
        }
    }
    columns.push(("created_by".to_string(), "auth_user_id".to_string()));

    if let Some(prefix) = &handle {
        writer.line(format!("{}_id := gen_random_uuid();", prefix));
    }
    for line in resolution_lines.finish() {
        writer.line(line);
    }

    writer.line(format!("INSERT INTO {} (", table));
    writer.indent();
    for (i, (column, _)) in columns.iter().enumerate() {
        let comma = if i + 1 < columns.len() { "," } else { "" };
        writer.line(format!("{}{}", column, comma));
    }
    writer.dedent();
    writer.line(") VALUES (");
    writer.indent();
    for (i, (_, value)) in columns.iter().enumerate() {
        let comma = if i + 1 < columns.len() { "," } else { "" };
        writer.line(format!("{}{}", value, comma));
    }
    writer.dedent();
    match &handle {
        Some(prefix) => {
            writer.line(")");
            writer.line(format!("RETURNING pk_{} INTO {}_pk;", target_snake, prefix));
        }
        None => writer.line(");"),
    }
    Ok(())
}

// ============================================================================
// Update
// ============================================================================

pub fn compile_update(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    entity: &Option<String>,
    set: &[Assignment],
    condition: &Option<Expression>,
) -> Result<(), CompileError> {
    let catalog = ctx.catalog;
    let subject_update = entity.is_none();
    let target = match entity {
        Some(name) => catalog.require(name, &ctx.action.name)?,
        None => ctx.entity,
    };
    let table = catalog.qualified_table(target);

    if !subject_update && condition.is_none() {
        return Err(CompileError::InvalidStep {
            action: ctx.action.name.clone(),
            message: format!("update of {} requires a where condition", target.name),
        });
    }
    if let Some(cond) = condition {
        check_condition_fields(ctx, target, cond)?;
    }

    let mut assignments: Vec<String> = Vec::new();
    for assignment in set {
        let field = catalog.require_field(target, &assignment.field, &ctx.action.name)?;
        let value_sql = ExprRenderer::ambient(ctx).render(&assignment.value);
        if let FieldType::Reference(targets) = &field.field_type {
            let required = field.required;
            let targets = targets.clone();
            let column = field.column_name();
            let (fk_var, type_var) = emit_reference_resolution(
                ctx,
                writer,
                target,
                &assignment.field,
                &targets,
                required,
                &value_sql,
            );
            assignments.push(format!("{} = {}", column, fk_var));
            if let Some(tv) = type_var {
                assignments.push(format!("{}_type = {}", assignment.field, tv));
            }
        } else {
            assignments.push(format!("{} = {}", field.column_name(), value_sql));
        }
    }
    assignments.push("updated_at = now()".to_string());
    assignments.push("updated_by = auth_user_id".to_string());

    writer.line(format!("UPDATE {} SET", table));
    writer.indent();
    for (i, assignment) in assignments.iter().enumerate() {
        let comma = if i + 1 < assignments.len() { "," } else { "" };
        writer.line(format!("{}{}", assignment, comma));
    }
    writer.dedent();

    match condition {
        None => {
            let pk = ctx.subject_pk_expr().ok_or_else(|| CompileError::InvalidStep {
                action: ctx.action.name.clone(),
                message: "update before the subject row exists".to_string(),
            })?;
            writer.line(format!("WHERE pk_{} = {};", ctx.entity.snake_name(), pk));
        }
        Some(cond) => {
            let rendered = ExprRenderer::for_target(ctx, target).render(cond);
            let mut clauses = scope_clauses(ctx, target);
            let last = clauses.pop();
            match last {
                None => writer.line(format!("WHERE {};", rendered)),
                Some(last) => {
                    writer.line(format!("WHERE {}", rendered));
                    for clause in clauses {
                        writer.line(format!("  AND {}", clause));
                    }
                    writer.line(format!("  AND {};", last));
                }
            }
        }
    }

    if subject_update {
        for assignment in set {
            writer.line(format!(
                "v_updated_fields := array_append(v_updated_fields, '{}');",
                assignment.field
            ));
        }
    }
    Ok(())
}

// ============================================================================
// Delete
// ============================================================================

pub fn compile_delete(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    entity: &Option<String>,
    condition: &Option<Expression>,
) -> Result<(), CompileError> {
    let catalog = ctx.catalog;
    let target = match entity {
        Some(name) => catalog.require(name, &ctx.action.name)?,
        None => ctx.entity,
    };
    let table = catalog.qualified_table(target);
    let soft = ctx.config.soft_delete && !target.hard_delete;

    if entity.is_some() && condition.is_none() {
        return Err(CompileError::InvalidStep {
            action: ctx.action.name.clone(),
            message: format!("delete of {} requires a where condition", target.name),
        });
    }
    if let Some(cond) = condition {
        check_condition_fields(ctx, target, cond)?;
    }

    let where_clauses: (String, Vec<String>) = match condition {
        None => {
            let pk = ctx.subject_pk_expr().ok_or_else(|| CompileError::InvalidStep {
                action: ctx.action.name.clone(),
                message: "delete before the subject row exists".to_string(),
            })?;
            (format!("pk_{} = {}", ctx.entity.snake_name(), pk), Vec::new())
        }
        Some(cond) => {
            let rendered = ExprRenderer::for_target(ctx, target).render(cond);
            (rendered, scope_clauses(ctx, target))
        }
    };

    if soft {
        writer.line(format!("UPDATE {} SET", table));
        writer.indent();
        writer.line("deleted_at = now(),");
        writer.line("deleted_by = auth_user_id");
        writer.dedent();
    } else {
        writer.line(format!("DELETE FROM {}", table));
    }
    let (first, mut rest) = where_clauses;
    match rest.pop() {
        None => writer.line(format!("WHERE {};", first)),
        Some(last) => {
            writer.line(format!("WHERE {}", first));
            for clause in rest {
                writer.line(format!("  AND {}", clause));
            }
            writer.line(format!("  AND {};", last));
        }
    }
    Ok(())
}

// ============================================================================
// Find
// ============================================================================

pub fn compile_find(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    entity_name: &str,
    condition: &Expression,
    bind: &str,
) -> Result<(), CompileError> {
    let catalog = ctx.catalog;
    let target = catalog.require(entity_name, &ctx.action.name)?;
    check_condition_fields(ctx, target, condition)?;
    let table = catalog.qualified_table(target);
    let var = format!("v_{}", bind);

    ctx.declare(&var, &format!("{}%ROWTYPE", table));
    ctx.bind(bind, VarKind::Record { entity: Some(target.name.clone()) });

    let rendered = ExprRenderer::for_target(ctx, target).render(condition);
    writer.line(format!("SELECT * INTO {}", var));
    writer.line(format!("FROM {}", table));
    where_block(writer, rendered, scope_clauses(ctx, target));
    writer.line(format!("ORDER BY pk_{}", target.snake_name()));
    writer.line("LIMIT 1;");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EntityCatalog;
    use crate::config::ForgeConfig;
    use adl_core::ast::ActionStep;
    use adl_core::parse_document;

    fn catalog() -> EntityCatalog {
        let contact = parse_document(
            r#"
entity: Contact
schema: crm
identifier: email
fields:
  email: email!
  status: enum(lead, active, archived) = 'lead'
  company: ref(Company)
actions:
  - name: create_contact
    steps:
      - insert: Contact
        values:
          email: input_data.email
          company: input_data.company
  - name: archive_contact
    steps:
      - update: Contact SET status = 'archived'
  - name: purge_contact
    steps:
      - delete
  - name: link_company
    steps:
      - find: Company WHERE name = input_data.company_name
"#,
        )
        .unwrap();
        let company = parse_document(
            r#"
entity: Company
schema: crm
fields:
  name: text!
actions:
  - name: create_company
    steps:
      - insert: Company
        values:
          name: input_data.name
"#,
        )
        .unwrap();
        let mut c = EntityCatalog::new();
        c.insert(contact).unwrap();
        c.insert(company).unwrap();
        c
    }

    fn compile_first_step(catalog: &EntityCatalog, config: &ForgeConfig, action: &str) -> (Vec<String>, Vec<(String, String)>) {
        let entity = catalog.get("Contact").unwrap();
        let action = entity.action(action).unwrap();
        let mut ctx = CompileCtx::new(catalog, config, entity, action);
        let mut writer = SqlWriter::new(0);
        match &action.steps[0] {
            ActionStep::Insert { entity, values, bind } => {
                compile_insert(&mut ctx, &mut writer, entity, values, bind).unwrap()
            }
            ActionStep::Update { entity, set, condition } => {
                compile_update(&mut ctx, &mut writer, entity, set, condition).unwrap()
            }
            ActionStep::Delete { entity, condition } => {
                compile_delete(&mut ctx, &mut writer, entity, condition).unwrap()
            }
            ActionStep::Find { entity, condition, bind } => {
                compile_find(&mut ctx, &mut writer, entity, condition, bind).unwrap()
            }
            other => panic!("unexpected step {:?}", other.kind_name()),
        }
        (writer.finish(), ctx.declarations().to_vec())
    }

    #[test]
    fn test_insert_resolves_reference_and_stamps_audit() {
        let catalog = catalog();
        let config = ForgeConfig::default();
        let (lines, decls) = compile_first_step(&catalog, &config, "create_contact");
        let sql = lines.join("\n");

        assert!(sql.contains("v_contact_id := gen_random_uuid();"));
        assert!(sql.contains("v_fk_company := NULL;"));
        assert!(sql.contains("crm.company_pk((input_data.company)::TEXT, auth_tenant_id)"));
        assert!(sql.contains("DETAIL = 'reference_not_found'"));
        assert!(sql.contains("INSERT INTO crm.tb_contact ("));
        assert!(sql.contains("tenant_id,"));
        assert!(sql.contains("identifier,"));
        assert!(sql.contains("created_by"));
        assert!(sql.contains("RETURNING pk_contact INTO v_contact_pk;"));
        assert!(decls.iter().any(|(n, t)| n == "v_contact_id" && t == "UUID"));
        assert!(decls.iter().any(|(n, t)| n == "v_fk_company" && t == "INTEGER"));
    }

    #[test]
    fn test_subject_update_targets_loaded_row() {
        let catalog = catalog();
        let config = ForgeConfig::default();
        let (lines, _) = compile_first_step(&catalog, &config, "archive_contact");
        let sql = lines.join("\n");

        assert!(sql.contains("UPDATE crm.tb_contact SET"));
        assert!(sql.contains("status = 'archived',"));
        assert!(sql.contains("updated_at = now(),"));
        assert!(sql.contains("updated_by = auth_user_id"));
        assert!(sql.contains("WHERE pk_contact = v_contact.pk_contact;"));
        assert!(sql.contains("array_append(v_updated_fields, 'status');"));
    }

    #[test]
    fn test_subject_delete_is_soft_by_default() {
        let catalog = catalog();
        let config = ForgeConfig::default();
        let (lines, _) = compile_first_step(&catalog, &config, "purge_contact");
        let sql = lines.join("\n");

        assert!(sql.contains("UPDATE crm.tb_contact SET"));
        assert!(sql.contains("deleted_at = now(),"));
        assert!(sql.contains("deleted_by = auth_user_id"));
        assert!(sql.contains("WHERE pk_contact = v_contact.pk_contact;"));
        assert!(!sql.contains("DELETE FROM"));
    }

    #[test]
    fn test_find_scopes_and_orders() {
        let catalog = catalog();
        let config = ForgeConfig::default();
        let (lines, decls) = compile_first_step(&catalog, &config, "link_company");
        let sql = lines.join("\n");

        assert!(sql.contains("SELECT * INTO v_company"));
        assert!(sql.contains("FROM crm.tb_company"));
        assert!(sql.contains("WHERE (name = input_data.company_name)"));
        assert!(sql.contains("  AND tenant_id = auth_tenant_id"));
        assert!(sql.contains("  AND deleted_at IS NULL"));
        assert!(sql.contains("ORDER BY pk_company"));
        assert!(sql.contains("LIMIT 1;"));
        assert!(decls
            .iter()
            .any(|(n, t)| n == "v_company" && t == "crm.tb_company%ROWTYPE"));
    }

    #[test]
    fn test_cross_entity_update_requires_condition() {
        let catalog = catalog();
        let config = ForgeConfig::default();
        let entity = catalog.get("Contact").unwrap();
        let action = entity.action("archive_contact").unwrap();
        let mut ctx = CompileCtx::new(&catalog, &config, entity, action);
        let mut writer = SqlWriter::new(0);
        let err = compile_update(
            &mut ctx,
            &mut writer,
            &Some("Company".to_string()),
            &[],
            &None,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::InvalidStep { .. }));
    }

    #[test]
    fn test_unknown_target_entity_fails() {
        let catalog = catalog();
        let config = ForgeConfig::default();
        let entity = catalog.get("Contact").unwrap();
        let action = entity.action("archive_contact").unwrap();
        let mut ctx = CompileCtx::new(&catalog, &config, entity, action);
        let mut writer = SqlWriter::new(0);
        let err = compile_insert(&mut ctx, &mut writer, "Ledger", &[], &None).unwrap_err();
        assert!(matches!(err, CompileError::UnknownEntity { .. }));
    }
}
