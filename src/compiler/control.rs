//! Control-flow step emitters
//!
//! Branches, loops, and protected blocks. Every nested step list recurses
//! through the dispatcher in [`super::steps`], so a `validate` nested three
//! loops deep still aborts the whole action.
//!
//! `exception_handling` leans on PL/pgSQL block semantics: a `BEGIN ...
//! EXCEPTION` block is a savepoint, so entering a handler has already
//! rolled back the try branch's writes.

use adl_core::ast::{ActionStep, CatchHandler, Collection, RuntimeErrorKind, SwitchCase};
use adl_core::expr::Expression;

use super::calls::{SQLSTATE_NETWORK, SQLSTATE_PARSE, SQLSTATE_PAYMENT, SQLSTATE_VALIDATION};
use super::context::{CompileCtx, VarKind};
use super::mutations::{check_condition_fields, scope_clauses};
use super::sql::{ExprRenderer, SqlWriter};
use super::steps::compile_steps;
use crate::error::CompileError;

// ============================================================================
// If
// ============================================================================

pub fn compile_if(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    condition: &Expression,
    then_steps: &[ActionStep],
    else_steps: &[ActionStep],
) -> Result<(), CompileError> {
    let rendered = ExprRenderer::ambient(ctx).render(condition);
    writer.line(format!("IF ({}) THEN", rendered));
    writer.indent();
    steps_or_null(ctx, writer, then_steps)?;
    writer.dedent();
    if !else_steps.is_empty() {
        writer.line("ELSE");
        writer.indent();
        compile_steps(ctx, writer, else_steps)?;
        writer.dedent();
    }
    writer.line("END IF;");
    Ok(())
}

// ============================================================================
// Foreach / ForQuery
// ============================================================================

/// `foreach` step. Entity collections iterate live, tenant-visible rows in
/// surrogate-key order; array collections iterate jsonb elements. The
/// collection query is evaluated once at loop entry.
pub fn compile_foreach(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    var: &str,
    collection: &Collection,
    body: &[ActionStep],
) -> Result<(), CompileError> {
    let loop_var = format!("v_{}", var);
    match collection {
        Collection::EntityFilter { entity, condition } => {
            let target = ctx.catalog.require(entity, &ctx.action.name)?;
            if let Some(cond) = condition {
                check_condition_fields(ctx, target, cond)?;
            }
            let table = ctx.catalog.qualified_table(target);
            let snake = target.snake_name();
            ctx.declare(&loop_var, &format!("{}%ROWTYPE", table));
            ctx.bind(var, VarKind::Record { entity: Some(target.name.clone()) });

            let mut clauses = Vec::new();
            if let Some(cond) = condition {
                clauses.push(ExprRenderer::for_target(ctx, target).render(cond));
            }
            clauses.extend(scope_clauses(ctx, target));

            writer.line(format!("FOR {} IN", loop_var));
            writer.indent();
            writer.line(format!("SELECT * FROM {}", table));
            for (i, clause) in clauses.iter().enumerate() {
                if i == 0 {
                    writer.line(format!("WHERE {}", clause));
                } else {
                    writer.line(format!("  AND {}", clause));
                }
            }
            writer.line(format!("ORDER BY pk_{}", snake));
            writer.dedent();
        }
        Collection::ArrayExpression(expr) => {
            ctx.declare(&loop_var, "JSONB");
            ctx.bind(var, VarKind::JsonbElem);
            let rendered = ExprRenderer::ambient(ctx).render(expr);
            writer.line(format!("FOR {} IN", loop_var));
            writer.indent();
            // to_jsonb() lets the same loop consume native arrays and
            // jsonb arrays.
            writer.line(format!(
                "SELECT value FROM jsonb_array_elements(to_jsonb(({}))) AS t(value)",
                rendered
            ));
            writer.dedent();
        }
    }
    writer.line("LOOP");
    writer.indent();
    steps_or_null(ctx, writer, body)?;
    writer.dedent();
    writer.line("END LOOP;");
    Ok(())
}

/// `for_query` step: iterate an arbitrary read-only query. The bind
/// variable is a `RECORD`, so member access renders as plain column
/// access on whatever the query selected.
pub fn compile_for_query(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    query: &str,
    bind: &str,
    body: &[ActionStep],
) -> Result<(), CompileError> {
    let loop_var = format!("v_{}", bind);
    ctx.declare(&loop_var, "RECORD");
    ctx.bind(bind, VarKind::Record { entity: None });

    writer.line(format!("FOR {} IN", loop_var));
    writer.indent();
    for line in query.lines() {
        writer.line(line.trim());
    }
    writer.dedent();
    writer.line("LOOP");
    writer.indent();
    steps_or_null(ctx, writer, body)?;
    writer.dedent();
    writer.line("END LOOP;");
    Ok(())
}

// ============================================================================
// While
// ============================================================================

pub fn compile_while(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    condition: &Expression,
    body: &[ActionStep],
    exit_when: &Option<Expression>,
) -> Result<(), CompileError> {
    let rendered = ExprRenderer::ambient(ctx).render(condition);
    writer.line(format!("WHILE ({}) LOOP", rendered));
    writer.indent();
    steps_or_null(ctx, writer, body)?;
    if let Some(exit) = exit_when {
        let rendered = ExprRenderer::ambient(ctx).render(exit);
        writer.line(format!("EXIT WHEN ({});", rendered));
    }
    writer.dedent();
    writer.line("END LOOP;");
    Ok(())
}

// ============================================================================
// Switch
// ============================================================================

/// `switch` step: a simple `CASE` statement. The `ELSE` arm is always
/// emitted because PL/pgSQL raises `CASE_NOT_FOUND` when no arm matches
/// and no `ELSE` exists; an unmatched subject must be a no-op instead.
pub fn compile_switch(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    subject: &Expression,
    cases: &[SwitchCase],
    default: &[ActionStep],
) -> Result<(), CompileError> {
    let rendered = ExprRenderer::ambient(ctx).render(subject);
    writer.line(format!("CASE ({})", rendered));
    writer.indent();
    for case in cases {
        let value = ExprRenderer::ambient(ctx).render(&case.value);
        writer.line(format!("WHEN {} THEN", value));
        writer.indent();
        steps_or_null(ctx, writer, &case.steps)?;
        writer.dedent();
    }
    writer.line("ELSE");
    writer.indent();
    steps_or_null(ctx, writer, default)?;
    writer.dedent();
    writer.dedent();
    writer.line("END CASE;");
    Ok(())
}

// ============================================================================
// ExceptionHandling
// ============================================================================

/// `exception_handling` step. Handlers compile to `WHEN <sqlstates> THEN`
/// arms in declaration order. A `finally` list wraps everything in an
/// extra block whose `OTHERS` arm runs the finally steps and re-raises,
/// then repeats them on the fall-through path, so they run exactly once
/// whether the try succeeded, a handler ran, a handler itself failed, or
/// the failure was uncaught.
pub fn compile_exception_handling(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    try_steps: &[ActionStep],
    handlers: &[CatchHandler],
    finally_steps: &[ActionStep],
) -> Result<(), CompileError> {
    let has_finally = !finally_steps.is_empty();

    if has_finally {
        writer.line("BEGIN");
        writer.indent();
    }

    if handlers.is_empty() {
        steps_or_null(ctx, writer, try_steps)?;
    } else {
        writer.line("BEGIN");
        writer.indent();
        steps_or_null(ctx, writer, try_steps)?;
        writer.dedent();
        writer.line("EXCEPTION");
        writer.indent();
        for handler in handlers {
            writer.line(format!("WHEN {} THEN", sqlstate_arm(handler.kind)));
            writer.indent();
            steps_or_null(ctx, writer, &handler.steps)?;
            writer.dedent();
        }
        writer.dedent();
        writer.line("END;");
    }

    if has_finally {
        writer.dedent();
        writer.line("EXCEPTION WHEN OTHERS THEN");
        writer.indent();
        compile_steps(ctx, writer, finally_steps)?;
        writer.line("RAISE;");
        writer.dedent();
        writer.line("END;");
        compile_steps(ctx, writer, finally_steps)?;
    }
    Ok(())
}

/// Condition list for one catch arm. Engine codes pair with the closest
/// standard SQLSTATE classes so handlers also catch what Postgres itself
/// raises for that failure kind.
fn sqlstate_arm(kind: RuntimeErrorKind) -> String {
    match kind {
        RuntimeErrorKind::ValidationError => format!("SQLSTATE '{}'", SQLSTATE_VALIDATION),
        RuntimeErrorKind::PaymentFailed => format!("SQLSTATE '{}'", SQLSTATE_PAYMENT),
        RuntimeErrorKind::NetworkError => {
            format!("SQLSTATE '{}' OR connection_exception", SQLSTATE_NETWORK)
        }
        RuntimeErrorKind::DatabaseError => {
            "integrity_constraint_violation OR data_exception OR transaction_rollback".to_string()
        }
        RuntimeErrorKind::ParseError => {
            format!("SQLSTATE '{}' OR invalid_text_representation", SQLSTATE_PARSE)
        }
        RuntimeErrorKind::Others => "OTHERS".to_string(),
    }
}

fn steps_or_null(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    steps: &[ActionStep],
) -> Result<(), CompileError> {
    if steps.is_empty() {
        writer.line("NULL;");
    } else {
        compile_steps(ctx, writer, steps)?;
    }
    Ok(())
}
