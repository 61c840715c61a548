//! Cascade/impact metadata
//!
//! Builds the `extra_metadata` expression for the success envelope: a list
//! of affected entities tagged with their operation kind, plus any declared
//! cache invalidations, for downstream cache-invalidation consumers.
//!
//! Delete entries carry the row's identifier only; the full last-known
//! snapshot is an explicit opt-in (`include_data` on the action, falling
//! back to the system-wide default).

use adl_core::ast::{
    walk_steps, ActionImpact, ActionStep, CacheInvalidation, EntityImpact, ImpactOperation,
    InvalidationStrategy,
};
use adl_core::reserved::is_reserved_column;

use super::context::{CompileCtx, VarKind};
use super::sql::sql_string;
use crate::error::CompileError;

/// Check every impact entry against the catalog before any SQL is emitted.
pub fn validate_impacts(ctx: &CompileCtx) -> Result<(), CompileError> {
    let Some(impact) = &ctx.action.impact else {
        return Ok(());
    };
    check_entry(ctx, &impact.primary)?;
    for side in &impact.side_effects {
        check_entry(ctx, side)?;
    }
    Ok(())
}

fn check_entry(ctx: &CompileCtx, entry: &EntityImpact) -> Result<(), CompileError> {
    let entity = ctx.catalog.get(&entry.entity).ok_or_else(|| {
        CompileError::UnknownImpactEntity {
            entity: entry.entity.clone(),
            action: ctx.action.name.clone(),
        }
    })?;
    for field in &entry.fields {
        if entity.field(field).is_none() && !is_reserved_column(field) {
            return Err(CompileError::UnknownField {
                entity: entity.name.clone(),
                field: field.clone(),
                action: ctx.action.name.clone(),
            });
        }
    }
    Ok(())
}

/// The `extra_metadata` argument of the success envelope. Empty jsonb when
/// the action declares no impact and synthesis is off.
pub fn extra_metadata_sql(ctx: &CompileCtx) -> String {
    match &ctx.action.impact {
        Some(impact) => declared_metadata(ctx, impact),
        None if ctx.with_impacts => synthesized_metadata(ctx),
        None => "'{}'::jsonb".to_string(),
    }
}

fn declared_metadata(ctx: &CompileCtx, impact: &ActionImpact) -> String {
    let include_data = impact.include_data.unwrap_or(ctx.config.include_impact_data);
    let mut entries = vec![impact_entry(ctx, &impact.primary, include_data)];
    for side in &impact.side_effects {
        entries.push(impact_entry(ctx, side, include_data));
    }

    let mut parts = vec![format!("'impacts', jsonb_build_array({})", entries.join(", "))];
    if !impact.cache_invalidations.is_empty() {
        let invalidations: Vec<String> = impact
            .cache_invalidations
            .iter()
            .map(invalidation_entry)
            .collect();
        parts.push(format!(
            "'cache_invalidations', jsonb_build_array({})",
            invalidations.join(", ")
        ));
    }
    format!("jsonb_build_object({})", parts.join(", "))
}

/// Default single-entry metadata when `--with-impacts` is on and the action
/// declares nothing: the subject entity with the operation inferred from
/// the action's shape.
fn synthesized_metadata(ctx: &CompileCtx) -> String {
    let operation = if ctx.create_pattern {
        ImpactOperation::Create
    } else if has_subject_delete(&ctx.action.steps) {
        ImpactOperation::Delete
    } else {
        ImpactOperation::Update
    };
    format!(
        "jsonb_build_object('impacts', jsonb_build_array(jsonb_build_object('type', '{}', 'id', {}, 'operation', '{}')))",
        ctx.entity.name,
        ctx.subject_id_expr(),
        operation.past_tense()
    )
}

pub(super) fn has_subject_delete(steps: &[ActionStep]) -> bool {
    let mut found = false;
    walk_steps(steps, &mut |step| {
        if matches!(step, ActionStep::Delete { entity: None, .. }) {
            found = true;
        }
    });
    found
}

fn impact_entry(ctx: &CompileCtx, entry: &EntityImpact, include_data: bool) -> String {
    let id_expr = entry_id(ctx, entry);
    let mut fields = vec![
        format!("'type', '{}'", entry.entity),
        format!("'id', {}", id_expr),
        format!("'operation', '{}'", entry.operation.past_tense()),
    ];
    // Only the loaded subject row still has a pre-delete image to snapshot.
    if include_data
        && entry.operation == ImpactOperation::Delete
        && ctx.is_subject(&entry.entity)
        && !ctx.create_pattern
    {
        fields.push(format!(
            "'entity', to_jsonb({}) - 'pk_{}' - 'tenant_id'",
            ctx.subject_row_var(),
            ctx.entity.snake_name()
        ));
    }
    format!("jsonb_build_object({})", fields.join(", "))
}

/// Identifier for one cascade entry: the subject row's id, a bound row or
/// insert handle named by `collection`, or NULL when nothing identifies
/// the affected rows.
fn entry_id(ctx: &CompileCtx, entry: &EntityImpact) -> String {
    if ctx.is_subject(&entry.entity) {
        return ctx.subject_id_expr();
    }
    if let Some(collection) = &entry.collection {
        match ctx.var_kind(collection) {
            Some(VarKind::InsertHandle) => return format!("v_{}_id", collection),
            Some(VarKind::Record { .. }) => return format!("v_{}.id", collection),
            _ => {}
        }
    }
    "NULL".to_string()
}

fn invalidation_entry(inv: &CacheInvalidation) -> String {
    let strategy = match inv.strategy {
        InvalidationStrategy::Refetch => "REFETCH",
        InvalidationStrategy::Remove => "REMOVE",
        InvalidationStrategy::Update => "UPDATE",
    };
    let mut parts = vec![
        format!("'query', {}", sql_string(&inv.query)),
        format!("'strategy', '{}'", strategy),
    ];
    if !inv.reason.is_empty() {
        parts.push(format!("'reason', {}", sql_string(&inv.reason)));
    }
    format!("jsonb_build_object({})", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EntityCatalog;
    use crate::config::ForgeConfig;
    use adl_core::parse_document;

    fn catalog() -> EntityCatalog {
        let contact = parse_document(
            r#"
entity: Contact
schema: crm
fields:
  status: enum(lead, active, archived) = 'lead'
actions:
  - name: qualify_contact
    steps:
      - update: Contact SET status = 'active'
    impact:
      primary:
        entity: Contact
        operation: UPDATE
        fields: [status]
      cache_invalidations:
        - query: contacts
          strategy: REFETCH
          reason: "status changed"
  - name: archive_contact
    steps:
      - delete
    impact:
      primary:
        entity: Contact
        operation: DELETE
  - name: promote_contact
    steps:
      - update: Contact SET status = 'active'
    impact:
      primary:
        entity: Ghost
        operation: UPDATE
  - name: touch_contact
    steps:
      - update: Contact SET status = 'active'
"#,
        )
        .unwrap();
        let mut c = EntityCatalog::new();
        c.insert(contact).unwrap();
        c
    }

    fn ctx_for<'a>(
        catalog: &'a EntityCatalog,
        config: &'a ForgeConfig,
        action: &str,
    ) -> CompileCtx<'a> {
        let entity = catalog.get("Contact").unwrap();
        let action = entity.action(action).unwrap();
        CompileCtx::new(catalog, config, entity, action)
    }

    #[test]
    fn test_declared_impact_and_invalidations() {
        let catalog = catalog();
        let config = ForgeConfig::default();
        let ctx = ctx_for(&catalog, &config, "qualify_contact");
        let sql = extra_metadata_sql(&ctx);

        assert!(sql.contains(
            "jsonb_build_object('type', 'Contact', 'id', v_contact.id, 'operation', 'UPDATED')"
        ));
        assert!(sql.contains(
            "'cache_invalidations', jsonb_build_array(jsonb_build_object('query', 'contacts', 'strategy', 'REFETCH', 'reason', 'status changed'))"
        ));
    }

    #[test]
    fn test_delete_impact_is_identifier_only_by_default() {
        let catalog = catalog();
        let config = ForgeConfig::default();
        let ctx = ctx_for(&catalog, &config, "archive_contact");
        let sql = extra_metadata_sql(&ctx);

        assert!(sql.contains("'operation', 'DELETED'"));
        assert!(!sql.contains("to_jsonb(v_contact)"));
    }

    #[test]
    fn test_delete_impact_snapshot_is_opt_in() {
        let catalog = catalog();
        let config = ForgeConfig {
            include_impact_data: true,
            ..ForgeConfig::default()
        };
        let ctx = ctx_for(&catalog, &config, "archive_contact");
        let sql = extra_metadata_sql(&ctx);

        assert!(sql.contains("'entity', to_jsonb(v_contact) - 'pk_contact' - 'tenant_id'"));
    }

    #[test]
    fn test_unknown_impact_entity_is_rejected() {
        let catalog = catalog();
        let config = ForgeConfig::default();
        let ctx = ctx_for(&catalog, &config, "promote_contact");

        let err = validate_impacts(&ctx).unwrap_err();
        assert!(matches!(err, CompileError::UnknownImpactEntity { .. }));
    }

    #[test]
    fn test_no_impact_block_yields_empty_metadata() {
        let catalog = catalog();
        let config = ForgeConfig::default();
        let ctx = ctx_for(&catalog, &config, "touch_contact");

        assert_eq!(extra_metadata_sql(&ctx), "'{}'::jsonb");
    }

    #[test]
    fn test_with_impacts_synthesizes_subject_entry() {
        let catalog = catalog();
        let config = ForgeConfig::default();
        let mut ctx = ctx_for(&catalog, &config, "touch_contact");
        ctx.with_impacts = true;
        let sql = extra_metadata_sql(&ctx);

        assert!(sql.contains("'type', 'Contact'"));
        assert!(sql.contains("'operation', 'UPDATED'"));
    }
}
