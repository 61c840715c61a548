//! Step dispatch
//!
//! One arm per step kind. Steps compile in declaration order; the order is
//! semantically load-bearing, so no reordering or batching happens here.

use adl_core::ast::ActionStep;

use super::calls;
use super::context::CompileCtx;
use super::control;
use super::mutations;
use super::routine;
use super::sql::SqlWriter;
use crate::error::CompileError;

/// Compile an ordered step list into `writer`.
pub fn compile_steps(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    steps: &[ActionStep],
) -> Result<(), CompileError> {
    for step in steps {
        compile_step(ctx, writer, step)?;
    }
    Ok(())
}

pub fn compile_step(
    ctx: &mut CompileCtx,
    writer: &mut SqlWriter,
    step: &ActionStep,
) -> Result<(), CompileError> {
    match step {
        ActionStep::Validate { condition, error_code, message } => {
            calls::compile_validate(ctx, writer, condition, error_code, message)
        }
        ActionStep::Insert { entity, values, bind } => {
            mutations::compile_insert(ctx, writer, entity, values, bind)
        }
        ActionStep::Update { entity, set, condition } => {
            mutations::compile_update(ctx, writer, entity, set, condition)
        }
        ActionStep::Delete { entity, condition } => {
            mutations::compile_delete(ctx, writer, entity, condition)
        }
        ActionStep::Find { entity, condition, bind } => {
            mutations::compile_find(ctx, writer, entity, condition, bind)
        }
        ActionStep::Call { function, arguments, store } => {
            calls::compile_call(ctx, writer, function, arguments, store)
        }
        ActionStep::Notify { recipient, channel, payload } => {
            calls::compile_notify(ctx, writer, recipient, channel, payload)
        }
        ActionStep::If { condition, then_steps, else_steps } => {
            control::compile_if(ctx, writer, condition, then_steps, else_steps)
        }
        ActionStep::Foreach { var, collection, body } => {
            control::compile_foreach(ctx, writer, var, collection, body)
        }
        ActionStep::While { condition, body, exit_when } => {
            control::compile_while(ctx, writer, condition, body, exit_when)
        }
        ActionStep::Switch { subject, cases, default } => {
            control::compile_switch(ctx, writer, subject, cases, default)
        }
        ActionStep::Declare { name, type_name, default } => {
            calls::compile_declare(ctx, writer, name, type_name, default)
        }
        ActionStep::ExceptionHandling { try_steps, handlers, finally_steps } => {
            control::compile_exception_handling(ctx, writer, try_steps, handlers, finally_steps)
        }
        ActionStep::ForQuery { query, bind, body } => {
            control::compile_for_query(ctx, writer, query, bind, body)
        }
        ActionStep::CallFunction { function, arguments, returns } => {
            calls::compile_call_function(ctx, writer, function, arguments, returns)
        }
        ActionStep::Reject { error_code, message } => {
            calls::compile_reject(writer, error_code, message);
            Ok(())
        }
        ActionStep::Return { value } => routine::emit_success_return(ctx, writer, value),
    }
}
