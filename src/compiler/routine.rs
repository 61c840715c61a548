//! Core routine assembly
//!
//! Builds the `<schema>.<action>_core` function: subject-row preload for
//! existing-row actions, the compiled step sequence, and exactly one
//! success envelope on the fall-through path. Also derives the
//! `app.type_<action>_input` composite from the members the action's
//! expressions actually touch.
//!
//! The core returns `app.mutation_result` directly so a `return` step deep
//! inside a loop can complete the invocation without unwinding machinery;
//! failure paths never return, they raise (§ the wrapper catches).

use std::collections::BTreeSet;

use adl_core::ast::{walk_steps, ActionStep, Collection, FieldType, ReturnValue};
use adl_core::expr::{ExprNode, Expression, PathKind};

use super::context::CompileCtx;
use super::impacts;
use super::mutations::scope_clauses;
use super::sql::{ExprRenderer, SqlWriter};
use super::steps::compile_step;
use crate::contracts::storage_type_of;
use crate::error::CompileError;

/// Compile one action's core routine to SQL text.
pub fn compile_core(ctx: &mut CompileCtx) -> Result<String, CompileError> {
    impacts::validate_impacts(ctx)?;

    let mut body = SqlWriter::new(1);
    if !ctx.create_pattern {
        emit_subject_load(ctx, &mut body);
    }

    let steps = ctx.action.steps.as_slice();
    for step in steps {
        if !body.is_empty() {
            body.blank();
        }
        compile_step(ctx, &mut body, step)?;
    }

    let terminal = matches!(
        steps.last(),
        Some(ActionStep::Return { .. }) | Some(ActionStep::Reject { .. })
    );
    if !terminal {
        if !body.is_empty() {
            body.blank();
        }
        emit_success_return(ctx, &mut body, &ReturnValue::RowData)?;
    }

    let (schema, _) = ctx.catalog.table_parts(ctx.entity);
    let mut out = SqlWriter::new(0);
    out.line(format!(
        "CREATE OR REPLACE FUNCTION {}.{}_core(",
        schema, ctx.action.name
    ));
    out.indent();
    out.line("auth_tenant_id UUID,");
    out.line(format!("input_data app.type_{}_input,", ctx.action.name));
    out.line("auth_user_id UUID");
    out.dedent();
    out.line(") RETURNS app.mutation_result");
    out.line("LANGUAGE plpgsql");
    out.line("AS $$");
    out.line("DECLARE");
    out.indent();
    for (name, sql_type) in ctx.declarations() {
        out.line(format!("{} {};", name, sql_type));
    }
    out.dedent();
    out.line("BEGIN");
    for line in body.finish() {
        out.line(line);
    }
    out.line("END;");
    out.line("$$;");
    Ok(out.finish().join("\n"))
}

/// Load the subject row by `input_data.id`, locked against concurrent
/// writers, and fail `not_found` before any step runs.
fn emit_subject_load(ctx: &CompileCtx, writer: &mut SqlWriter) {
    let table = ctx.catalog.qualified_table(ctx.entity);
    let row_var = ctx.subject_row_var();

    writer.line(format!("SELECT * INTO {}", row_var));
    writer.line(format!("FROM {}", table));
    writer.line("WHERE id = input_data.id");
    for clause in scope_clauses(ctx, ctx.entity) {
        writer.line(format!("  AND {}", clause));
    }
    writer.line("FOR UPDATE;");
    writer.line("IF NOT FOUND THEN");
    writer.indent();
    writer.line("RETURN app.log_and_return_mutation(");
    writer.indent();
    writer.line(format!(
        "auth_tenant_id, auth_user_id, '{}', input_data.id,",
        ctx.entity.name
    ));
    writer.line(format!(
        "'{}', 'failed:not_found', ARRAY[]::TEXT[],",
        ctx.action.name
    ));
    writer.line(format!("'{} not found', NULL, '{{}}'::jsonb", ctx.entity.name));
    writer.dedent();
    writer.line(");");
    writer.dedent();
    writer.line("END IF;");
}

/// The success envelope: one audit record, the declared payload, and any
/// cascade metadata. Used by explicit `return` steps and the implicit
/// fall-through return.
pub fn emit_success_return(
    ctx: &CompileCtx,
    writer: &mut SqlWriter,
    value: &ReturnValue,
) -> Result<(), CompileError> {
    let object_data = match value {
        ReturnValue::RowData => row_data_expr(ctx),
        ReturnValue::Expr(expr) => {
            format!("to_jsonb(({}))", ExprRenderer::ambient(ctx).render(expr))
        }
        ReturnValue::Object(members) => {
            let renderer = ExprRenderer::ambient(ctx);
            let parts: Vec<String> = members
                .iter()
                .map(|(name, expr)| format!("'{}', ({})", name, renderer.render(expr)))
                .collect();
            format!("jsonb_build_object({})", parts.join(", "))
        }
    };
    let extra = impacts::extra_metadata_sql(ctx);

    writer.line("RETURN app.log_and_return_mutation(");
    writer.indent();
    writer.line(format!(
        "auth_tenant_id, auth_user_id, '{}', {},",
        ctx.entity.name,
        ctx.subject_id_expr()
    ));
    writer.line(format!("'{}', 'success', v_updated_fields,", ctx.action.name));
    writer.line(format!(
        "'{} completed', {}, {}",
        ctx.action.name, object_data, extra
    ));
    writer.dedent();
    writer.line(");");
    Ok(())
}

/// Fresh post-mutation image of the subject row, surrogate key and tenant
/// column stripped. NULL when a create-pattern action never inserted its
/// subject.
fn row_data_expr(ctx: &CompileCtx) -> String {
    let Some(pk) = ctx.subject_pk_expr() else {
        return "NULL".to_string();
    };
    let table = ctx.catalog.qualified_table(ctx.entity);
    let snake = ctx.entity.snake_name();
    let (schema, _) = ctx.catalog.table_parts(ctx.entity);
    let strip_tenant = if ctx.config.is_tenant_schema(&schema) {
        " - 'tenant_id'"
    } else {
        ""
    };
    format!(
        "(SELECT to_jsonb(t) - 'pk_{}'{} FROM {} t WHERE t.pk_{} = {})",
        snake, strip_tenant, table, snake, pk
    )
}

// ============================================================================
// Input composite type
// ============================================================================

/// Input members one action reads, collected from its expressions.
pub(super) struct InputMembers {
    /// Member names, implicit `id` excluded.
    pub(super) names: BTreeSet<String>,
    /// Members iterated as arrays by a foreach step.
    pub(super) arrays: BTreeSet<String>,
}

/// Walk every expression of the action and collect the `input_data` members
/// it touches. Create-pattern actions additionally read subject fields from
/// the input, so bare field references count there too.
pub(super) fn input_members(ctx: &CompileCtx) -> InputMembers {
    let mut names: BTreeSet<String> = BTreeSet::new();
    let mut arrays: BTreeSet<String> = BTreeSet::new();

    visit_expressions(&ctx.action.steps, &mut |expr| {
        names.extend(expr.input_refs.iter().cloned());
        if ctx.create_pattern {
            for field in &expr.field_refs {
                if field != "id" && ctx.entity.field(field).is_some() {
                    names.insert(field.clone());
                }
            }
        }
    });

    walk_steps(&ctx.action.steps, &mut |step| {
        if let ActionStep::Foreach {
            collection: Collection::ArrayExpression(expr),
            ..
        } = step
        {
            if let ExprNode::Path(path) = &expr.root {
                if path.kind == PathKind::Input {
                    if let Some(first) = path.members().first() {
                        arrays.insert(first.clone());
                    }
                }
            }
        }
    });

    names.remove("id");
    InputMembers { names, arrays }
}

/// DDL for `app.type_<action>_input`. Existing-row actions always lead
/// with `id UUID`; remaining members are ordered by name so regeneration
/// is stable.
pub fn input_type_sql(ctx: &CompileCtx) -> String {
    let members = input_members(ctx);

    let type_name = format!("app.type_{}_input", ctx.action.name);
    let mut out = SqlWriter::new(0);
    out.line(format!("DROP TYPE IF EXISTS {} CASCADE;", type_name));
    out.line(format!("CREATE TYPE {} AS (", type_name));
    out.indent();

    let mut lines = Vec::new();
    if !ctx.create_pattern {
        lines.push("id UUID".to_string());
    }
    for name in &members.names {
        lines.push(format!("{} {}", name, member_type(ctx, name, &members.arrays)));
    }
    let last = lines.len().saturating_sub(1);
    for (index, line) in lines.iter().enumerate() {
        if index == last {
            out.line(line);
        } else {
            out.line(format!("{},", line));
        }
    }
    out.dedent();
    out.line(");");
    out.finish().join("\n")
}

fn member_type(ctx: &CompileCtx, name: &str, arrays: &BTreeSet<String>) -> String {
    if let Some(field) = ctx.entity.field(name) {
        return match &field.field_type {
            // References arrive as business identifiers or UUIDs in text
            // form and resolve to surrogate keys at the insert site.
            FieldType::Reference(_) => "TEXT".to_string(),
            other => storage_type_of(other),
        };
    }
    if arrays.contains(name) {
        return "JSONB".to_string();
    }
    match name {
        "id" | "tenant_id" => "UUID".to_string(),
        "identifier" => "TEXT".to_string(),
        _ if name.ends_with("_at") => "TIMESTAMPTZ".to_string(),
        _ if name.ends_with("_by") => "UUID".to_string(),
        _ if name.starts_with("pk_") => "INTEGER".to_string(),
        _ => "TEXT".to_string(),
    }
}

/// Visit every expression a step list contains, nested steps included.
fn visit_expressions<'a>(steps: &'a [ActionStep], visit: &mut dyn FnMut(&'a Expression)) {
    walk_steps(steps, &mut |step| match step {
        ActionStep::Validate { condition, .. } => visit(condition),
        ActionStep::Insert { values, .. } => {
            for assignment in values {
                visit(&assignment.value);
            }
        }
        ActionStep::Update { set, condition, .. } => {
            for assignment in set {
                visit(&assignment.value);
            }
            if let Some(cond) = condition {
                visit(cond);
            }
        }
        ActionStep::Delete { condition, .. } => {
            if let Some(cond) = condition {
                visit(cond);
            }
        }
        ActionStep::Find { condition, .. } => visit(condition),
        ActionStep::Call { arguments, .. } | ActionStep::CallFunction { arguments, .. } => {
            for (_, expr) in arguments {
                visit(expr);
            }
        }
        ActionStep::Notify { payload, .. } => {
            for expr in payload {
                visit(expr);
            }
        }
        ActionStep::If { condition, .. } => visit(condition),
        ActionStep::Foreach { collection, .. } => match collection {
            Collection::EntityFilter { condition: Some(cond), .. } => visit(cond),
            Collection::EntityFilter { .. } => {}
            Collection::ArrayExpression(expr) => visit(expr),
        },
        ActionStep::While { condition, exit_when, .. } => {
            visit(condition);
            if let Some(expr) = exit_when {
                visit(expr);
            }
        }
        ActionStep::Switch { subject, cases, .. } => {
            visit(subject);
            for case in cases {
                visit(&case.value);
            }
        }
        ActionStep::Declare { default, .. } => {
            if let Some(expr) = default {
                visit(expr);
            }
        }
        ActionStep::Return { value } => match value {
            ReturnValue::Object(members) => {
                for (_, expr) in members {
                    visit(expr);
                }
            }
            ReturnValue::Expr(expr) => visit(expr),
            ReturnValue::RowData => {}
        },
        ActionStep::ExceptionHandling { .. }
        | ActionStep::ForQuery { .. }
        | ActionStep::Reject { .. } => {}
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EntityCatalog;
    use crate::config::ForgeConfig;
    use adl_core::parse_document;

    fn catalog() -> EntityCatalog {
        let lead = parse_document(
            r#"
entity: Lead
schema: crm
fields:
  status: enum(new, qualified, disqualified) = 'new'
  score: integer
  notes: text
  tags: list(text)
actions:
  - name: qualify_lead
    steps:
      - validate: status = 'new'
        error: not_a_new_lead
        message: "Only new leads can be qualified"
      - update: Lead SET status = 'qualified', notes = input_data.qualification_notes
  - name: create_lead
    steps:
      - insert: Lead
        values:
          status: "'new'"
          score: input_data.score
          notes: input_data.notes
      - return: {id: id}
  - name: tag_lead
    steps:
      - foreach: $tag in input_data.extra_tags
        do:
          - call: audit.tag_seen(tag = $tag)
"#,
        )
        .unwrap();
        let mut c = EntityCatalog::new();
        c.insert(lead).unwrap();
        c
    }

    fn core_sql(catalog: &EntityCatalog, action: &str) -> String {
        let config = ForgeConfig::default();
        let entity = catalog.get("Lead").unwrap();
        let action = entity.action(action).unwrap();
        let mut ctx = CompileCtx::new(catalog, &config, entity, action);
        compile_core(&mut ctx).unwrap()
    }

    fn input_sql(catalog: &EntityCatalog, action: &str) -> String {
        let config = ForgeConfig::default();
        let entity = catalog.get("Lead").unwrap();
        let action = entity.action(action).unwrap();
        let ctx = CompileCtx::new(catalog, &config, entity, action);
        input_type_sql(&ctx)
    }

    #[test]
    fn test_core_signature_and_declarations() {
        let catalog = catalog();
        let sql = core_sql(&catalog, "qualify_lead");

        assert!(sql.starts_with("CREATE OR REPLACE FUNCTION crm.qualify_lead_core("));
        assert!(sql.contains("input_data app.type_qualify_lead_input,"));
        assert!(sql.contains(") RETURNS app.mutation_result"));
        assert!(sql.contains("LANGUAGE plpgsql"));
        assert!(sql.contains("v_lead crm.tb_lead%ROWTYPE;"));
        assert!(sql.contains("v_updated_fields TEXT[] := ARRAY[]::TEXT[];"));
    }

    #[test]
    fn test_existing_row_preload_locks_and_fails_not_found() {
        let catalog = catalog();
        let sql = core_sql(&catalog, "qualify_lead");

        assert!(sql.contains("SELECT * INTO v_lead"));
        assert!(sql.contains("WHERE id = input_data.id"));
        assert!(sql.contains("  AND tenant_id = auth_tenant_id"));
        assert!(sql.contains("  AND deleted_at IS NULL"));
        assert!(sql.contains("FOR UPDATE;"));
        assert!(sql.contains("'failed:not_found'"));
        assert!(sql.contains("'Lead not found'"));

        let load = sql.find("SELECT * INTO v_lead").unwrap();
        let first_step = sql.find("IF NOT ((v_lead.status = 'new'))").unwrap();
        assert!(load < first_step);
    }

    #[test]
    fn test_fall_through_emits_one_success_return() {
        let catalog = catalog();
        let sql = core_sql(&catalog, "qualify_lead");

        assert_eq!(sql.matches("'success', v_updated_fields,").count(), 1);
        assert!(sql.contains("'qualify_lead completed'"));
        assert!(sql.contains(
            "(SELECT to_jsonb(t) - 'pk_lead' - 'tenant_id' FROM crm.tb_lead t WHERE t.pk_lead = v_lead.pk_lead)"
        ));
    }

    #[test]
    fn test_trailing_return_suppresses_implicit_success() {
        let catalog = catalog();
        let sql = core_sql(&catalog, "create_lead");

        // Exactly the explicit return's envelope, no fall-through twin.
        assert_eq!(sql.matches("'success', v_updated_fields,").count(), 1);
        assert!(sql.contains("jsonb_build_object('id', (v_lead_id))"));
    }

    #[test]
    fn test_input_type_existing_row_leads_with_id() {
        let catalog = catalog();
        let sql = input_sql(&catalog, "qualify_lead");

        assert!(sql.contains("DROP TYPE IF EXISTS app.type_qualify_lead_input CASCADE;"));
        assert!(sql.contains("CREATE TYPE app.type_qualify_lead_input AS ("));
        let id_pos = sql.find("id UUID,").unwrap();
        let notes_pos = sql.find("qualification_notes TEXT").unwrap();
        assert!(id_pos < notes_pos);
    }

    #[test]
    fn test_input_type_create_uses_field_storage_types() {
        let catalog = catalog();
        let sql = input_sql(&catalog, "create_lead");

        assert!(!sql.contains("id UUID"));
        assert!(sql.contains("notes TEXT"));
        assert!(sql.contains("score INTEGER"));
    }

    #[test]
    fn test_unknown_array_member_becomes_jsonb() {
        let catalog = catalog();
        let sql = input_sql(&catalog, "tag_lead");

        assert!(sql.contains("extra_tags JSONB"));
    }
}
