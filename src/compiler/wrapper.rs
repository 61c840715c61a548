//! Wrapper routine and API annotation
//!
//! The wrapper is the externally-facing entry point for one action. Its
//! body is a single delegation to the core routine; its exception arms are
//! the only place a failed invocation turns into an `app.mutation_result`
//! instead of a raw error. Business aborts travel on the engine's
//! validation SQLSTATE with the error code in the exception detail;
//! anything else becomes `failed:internal_error` with the SQLSTATE and
//! message preserved for operator diagnosis.
//!
//! Each wrapper also gets a `COMMENT ON FUNCTION` annotation in the
//! `@fraiseql:mutation` dialect so the API-layer generator can register the
//! mutation without parsing SQL.

use std::collections::{BTreeMap, BTreeSet};

use super::calls::SQLSTATE_VALIDATION;
use super::context::CompileCtx;
use super::impacts::has_subject_delete;
use super::routine::input_members;
use super::sql::SqlWriter;
use crate::contracts::{api_type_of, ApiAnnotation};

/// SQL for `<schema>.<action>`, the fixed-signature wrapper.
pub fn wrapper_sql(ctx: &CompileCtx) -> String {
    let (schema, _) = ctx.catalog.table_parts(ctx.entity);
    let action = &ctx.action.name;
    let entity = &ctx.entity.name;
    let entity_id = if ctx.create_pattern {
        "NULL"
    } else {
        "input_data.id"
    };

    let mut out = SqlWriter::new(0);
    out.line(format!("CREATE OR REPLACE FUNCTION {}.{}(", schema, action));
    out.indent();
    out.line("auth_tenant_id UUID,");
    out.line(format!("input_data app.type_{}_input,", action));
    out.line("input_payload JSONB,");
    out.line("auth_user_id UUID");
    out.dedent();
    out.line(") RETURNS app.mutation_result");
    out.line("LANGUAGE plpgsql");
    out.line("AS $$");
    out.line("DECLARE");
    out.indent();
    out.line("v_error_code TEXT;");
    out.dedent();
    out.line("BEGIN");
    out.indent();
    out.line("-- input_payload travels with the call for audit consumers; compiled logic reads input_data.");
    out.line(format!(
        "RETURN {}.{}_core(auth_tenant_id, input_data, auth_user_id);",
        schema, action
    ));
    out.dedent();
    out.line("EXCEPTION");
    out.indent();
    out.line(format!("WHEN SQLSTATE '{}' THEN", SQLSTATE_VALIDATION));
    out.indent();
    out.line("GET STACKED DIAGNOSTICS v_error_code = PG_EXCEPTION_DETAIL;");
    out.line("RETURN app.log_and_return_mutation(");
    out.indent();
    out.line(format!(
        "auth_tenant_id, auth_user_id, '{}', {},",
        entity, entity_id
    ));
    out.line(format!(
        "'{}', 'failed:' || COALESCE(NULLIF(v_error_code, ''), 'validation_failed'),",
        action
    ));
    out.line("ARRAY[]::TEXT[], SQLERRM, NULL, '{}'::jsonb");
    out.dedent();
    out.line(");");
    out.dedent();
    out.line("WHEN OTHERS THEN");
    out.indent();
    out.line("RETURN app.log_and_return_mutation(");
    out.indent();
    out.line(format!(
        "auth_tenant_id, auth_user_id, '{}', {},",
        entity, entity_id
    ));
    out.line(format!(
        "'{}', 'failed:internal_error', ARRAY[]::TEXT[],",
        action
    ));
    out.line("'An unexpected error occurred', NULL,");
    out.line("jsonb_build_object('sqlstate', SQLSTATE, 'context', SQLERRM)");
    out.dedent();
    out.line(");");
    out.dedent();
    out.dedent();
    out.line("END;");
    out.line("$$;");
    out.finish().join("\n")
}

/// `COMMENT ON FUNCTION` annotation attached to the wrapper, consumed by
/// the API-layer generator.
pub fn annotation_sql(ctx: &CompileCtx) -> String {
    let (schema, _) = ctx.catalog.table_parts(ctx.entity);
    let description = action_description(ctx);
    ApiAnnotation::new(
        ctx.entity,
        &ctx.action.name,
        Some(&description),
        input_api_types(ctx),
    )
    .comment_sql(&schema, &ctx.action.name)
}

/// API types for the action's input members, keyed by member name.
/// Existing-row actions carry the implicit required `id`.
fn input_api_types(ctx: &CompileCtx) -> BTreeMap<String, String> {
    let members = input_members(ctx);
    let mut input = BTreeMap::new();
    if !ctx.create_pattern {
        input.insert("id".to_string(), "UUID!".to_string());
    }
    for name in &members.names {
        input.insert(name.clone(), member_api_type(ctx, name, &members.arrays));
    }
    input
}

fn member_api_type(ctx: &CompileCtx, name: &str, arrays: &BTreeSet<String>) -> String {
    if let Some(field) = ctx.entity.field(name) {
        return api_type_of(field);
    }
    if arrays.contains(name) {
        return "JSON".to_string();
    }
    match name {
        "tenant_id" => "UUID".to_string(),
        _ if name.ends_with("_at") => "DateTime".to_string(),
        _ if name.ends_with("_by") => "UUID".to_string(),
        _ => "String".to_string(),
    }
}

fn action_description(ctx: &CompileCtx) -> String {
    let entity = &ctx.entity.name;
    if ctx.create_pattern {
        format!("Creates a new {} record.", entity)
    } else if has_subject_delete(&ctx.action.steps) {
        format!("Deletes a {} record.", entity)
    } else {
        format!("Updates a {} record.", entity)
    }
}
