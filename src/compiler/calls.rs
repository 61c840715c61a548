//! Guards, scope variables, and routine invocations
//!
//! Compiles the non-mutating leaf steps: `validate`/`reject` (short-circuit
//! aborts), `declare` (hoisted scope variables), `call`/`call_function`
//! (invoking other routines), and `notify` (post-commit side effects).
//!
//! Validate and Reject compile to `RAISE EXCEPTION` rather than an early
//! `RETURN`: in PL/pgSQL only an exception unwinds to the enclosing block's
//! savepoint, so a plain return would leave prior mutations committed.

use adl_core::expr::Expression;
use adl_core::types::{declare_storage_type, zero_value};

use crate::compiler::context::{CompileCtx, VarKind};
use crate::compiler::sql::{raise_message, ExprRenderer, SqlWriter};
use crate::error::CompileError;

// ============================================================================
// SQLSTATEs raised by generated routines
// ============================================================================

/// Declared validation failures: `validate`, `reject`, and unresolvable
/// references. The wrapper turns these into `failed:<code>` statuses.
pub const SQLSTATE_VALIDATION: &str = "AF001";
/// `payment_failed` catch clauses match this code.
pub const SQLSTATE_PAYMENT: &str = "AF002";
/// `network_error` catch clauses match this code.
pub const SQLSTATE_NETWORK: &str = "AF003";
/// `parse_error` catch clauses match this code.
pub const SQLSTATE_PARSE: &str = "AF005";

// ============================================================================
// Validate / Reject
// ============================================================================

/// `validate` step: raise when the condition does not hold. The declared
/// error code travels in the exception detail so the wrapper can surface
/// `failed:<code>` without parsing the message text.
pub fn compile_validate(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    condition: &Expression,
    error_code: &str,
    message: &Option<String>,
) -> Result<(), CompileError> {
    let rendered = ExprRenderer::ambient(ctx).render(condition);
    writer.line(format!("IF NOT ({}) THEN", rendered));
    writer.indent();
    emit_abort(writer, error_code, message);
    writer.dedent();
    writer.line("END IF;");
    Ok(())
}

/// `reject` step: unconditional abort with the declared code.
pub fn compile_reject(writer: &mut SqlWriter, error_code: &str, message: &Option<String>) {
    emit_abort(writer, error_code, message);
}

fn emit_abort(writer: &mut SqlWriter, error_code: &str, message: &Option<String>) {
    let text = message.as_deref().unwrap_or(error_code);
    writer.line(format!(
        "RAISE EXCEPTION '{}' USING ERRCODE = '{}', DETAIL = '{}';",
        raise_message(text),
        SQLSTATE_VALIDATION,
        error_code
    ));
}

// ============================================================================
// Declare
// ============================================================================

/// `declare` step: the variable itself is hoisted into the routine's
/// `DECLARE` section; the step position assigns the default (or the type's
/// zero value) so loop bodies re-initialize on every iteration.
pub fn compile_declare(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    name: &str,
    type_name: &str,
    default: &Option<Expression>,
) -> Result<(), CompileError> {
    let var = format!("v_{}", name);
    ctx.declare(&var, &declare_storage_type(type_name));
    let kind = if type_name.eq_ignore_ascii_case("record") {
        VarKind::Record { entity: None }
    } else {
        VarKind::Scalar
    };
    ctx.bind(name, kind);

    let value = match default {
        Some(expr) => ExprRenderer::ambient(ctx).render(expr),
        None => zero_value(type_name).to_string(),
    };
    writer.line(format!("{} := {};", var, value));
    Ok(())
}

// ============================================================================
// Call / CallFunction
// ============================================================================

/// `call` step: invoke a routine with named arguments, storing the result
/// in a scope variable when `store` is given.
pub fn compile_call(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    function: &str,
    arguments: &[(String, Expression)],
    store: &Option<String>,
) -> Result<(), CompileError> {
    emit_invocation(ctx, writer, function, arguments, store.as_deref())
}

/// `call_function` step: same invocation contract with the long-form YAML
/// surface; `returns` plays the role of `store`.
pub fn compile_call_function(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    function: &str,
    arguments: &[(String, Expression)],
    returns: &Option<String>,
) -> Result<(), CompileError> {
    emit_invocation(ctx, writer, function, arguments, returns.as_deref())
}

fn emit_invocation(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    function: &str,
    arguments: &[(String, Expression)],
    result: Option<&str>,
) -> Result<(), CompileError> {
    let qualified = if function.contains('.') {
        function.to_string()
    } else {
        let (schema, _) = ctx.catalog.table_parts(ctx.entity);
        format!("{}.{}", schema, function)
    };

    // A result variable not introduced by a prior `declare` defaults to
    // TEXT; an explicit declare keeps its own type.
    if let Some(name) = result {
        if ctx.var_kind(name).is_none() {
            ctx.declare(&format!("v_{}", name), "TEXT");
            ctx.bind(name, VarKind::Scalar);
        }
    }

    let renderer = ExprRenderer::ambient(ctx);
    let args = arguments
        .iter()
        .map(|(name, expr)| format!("{} => ({})", name, renderer.render(expr)))
        .collect::<Vec<_>>()
        .join(", ");

    match result {
        Some(name) => writer.line(format!("v_{} := {}({});", name, qualified, args)),
        None => writer.line(format!("PERFORM {}({});", qualified, args)),
    }
    Ok(())
}

// ============================================================================
// Notify
// ============================================================================

/// `notify` step: `pg_notify` in an exception-swallowing block. Delivery
/// happens after commit, so the payload must not assume the transaction
/// succeeded beyond what is already written.
pub fn compile_notify(
    ctx: &CompileCtx,
    writer: &mut SqlWriter,
    recipient: &str,
    channel: &str,
    payload: &[Expression],
) -> Result<(), CompileError> {
    let renderer = ExprRenderer::ambient(ctx);
    let args = payload
        .iter()
        .map(|expr| format!("({})", renderer.render(expr)))
        .collect::<Vec<_>>()
        .join(", ");

    writer.line("-- Notification is best-effort and delivered after commit; it never aborts the action.");
    writer.line("BEGIN");
    writer.indent();
    writer.line(format!("PERFORM pg_notify('{}', jsonb_build_object(", channel));
    writer.indent();
    writer.line(format!("'recipient', '{}',", recipient));
    writer.line(format!("'action', '{}',", ctx.action.name));
    writer.line(format!("'entity', '{}',", ctx.entity.name));
    writer.line(format!("'payload', jsonb_build_array({})", args));
    writer.dedent();
    writer.line(")::text);");
    writer.dedent();
    writer.line("EXCEPTION WHEN OTHERS THEN");
    writer.indent();
    writer.line("NULL;");
    writer.dedent();
    writer.line("END;");
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
        let entity = parse_document(
            r#"
entity: Invoice
schema: tenant
fields:
  amount: decimal!
  status: enum(draft, sent, paid) = 'draft'
actions:
  - name: send_invoice
    steps:
      - validate: status = 'draft'
        error: not_a_draft
        message: "Only draft invoices can be sent"
      - update: Invoice SET status = 'sent'
  - name: void_invoice
    steps:
      - reject: voiding_disabled
  - name: tally_invoice
    steps:
      - declare:
          name: total
          type: decimal
          default: amount * 2
      - call: billing.recalculate_totals(invoice_total = $total)
        store: summary
      - notify: billing_team(invoice_tallied, $total)
"#,
        )
        .unwrap();
        let mut c = EntityCatalog::new();
        c.insert(entity).unwrap();
        c
    }

    fn compile_action(catalog: &EntityCatalog, name: &str) -> (Vec<String>, Vec<(String, String)>) {
        let config = ForgeConfig::default();
        let entity = catalog.get("Invoice").unwrap();
        let action = entity.action(name).unwrap();
        let mut ctx = CompileCtx::new(catalog, &config, entity, action);
        let mut writer = SqlWriter::new(0);
        for step in &action.steps {
            match step {
                ActionStep::Validate { condition, error_code, message } => {
                    compile_validate(&mut ctx, &mut writer, condition, error_code, message).unwrap()
                }
                ActionStep::Reject { error_code, message } => {
                    compile_reject(&mut writer, error_code, message)
                }
                ActionStep::Declare { name, type_name, default } => {
                    compile_declare(&mut ctx, &mut writer, name, type_name, default).unwrap()
                }
                ActionStep::Call { function, arguments, store } => {
                    compile_call(&mut ctx, &mut writer, function, arguments, store).unwrap()
                }
                ActionStep::Notify { recipient, channel, payload } => {
                    compile_notify(&ctx, &mut writer, recipient, channel, payload).unwrap()
                }
                _ => {}
            }
        }
        (writer.finish(), ctx.declarations().to_vec())
    }

    #[test]
    fn test_validate_raises_with_code_in_detail() {
        let catalog = catalog();
        let (lines, _) = compile_action(&catalog, "send_invoice");
        let sql = lines.join("\n");

        assert!(sql.contains("IF NOT ((v_invoice.status = 'draft')) THEN"));
        assert!(sql.contains(
            "RAISE EXCEPTION 'Only draft invoices can be sent' USING ERRCODE = 'AF001', DETAIL = 'not_a_draft';"
        ));
        assert!(sql.contains("END IF;"));
    }

    #[test]
    fn test_reject_is_unconditional() {
        let catalog = catalog();
        let (lines, _) = compile_action(&catalog, "void_invoice");
        let sql = lines.join("\n");

        assert!(!sql.contains("IF NOT"));
        assert!(sql.contains(
            "RAISE EXCEPTION 'voiding_disabled' USING ERRCODE = 'AF001', DETAIL = 'voiding_disabled';"
        ));
    }

    #[test]
    fn test_declare_hoists_and_assigns_at_position() {
        let catalog = catalog();
        let (lines, decls) = compile_action(&catalog, "tally_invoice");
        let sql = lines.join("\n");

        assert!(decls.iter().any(|(n, t)| n == "v_total" && t == "NUMERIC"));
        assert!(sql.contains("v_total := (v_invoice.amount * 2);"));
    }

    #[test]
    fn test_call_with_store_declares_result_and_uses_named_args() {
        let catalog = catalog();
        let (lines, decls) = compile_action(&catalog, "tally_invoice");
        let sql = lines.join("\n");

        assert!(decls.iter().any(|(n, t)| n == "v_summary" && t == "TEXT"));
        assert!(sql.contains("v_summary := billing.recalculate_totals(invoice_total => (v_total));"));
    }

    #[test]
    fn test_notify_swallows_listener_failures() {
        let catalog = catalog();
        let (lines, _) = compile_action(&catalog, "tally_invoice");
        let sql = lines.join("\n");

        assert!(sql.contains("PERFORM pg_notify('invoice_tallied', jsonb_build_object("));
        assert!(sql.contains("'recipient', 'billing_team',"));
        assert!(sql.contains("'action', 'tally_invoice',"));
        assert!(sql.contains("'entity', 'Invoice',"));
        assert!(sql.contains("'payload', jsonb_build_array((v_total))"));
        assert!(sql.contains("EXCEPTION WHEN OTHERS THEN"));
    }
}
