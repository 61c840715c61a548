//! Trinity helper routines
//!
//! Each entity table carries three identity columns: the surrogate
//! `pk_<entity>`, the stable external `id` UUID, and the optional
//! human-readable `identifier`. These helpers convert between them.
//! Reference resolution in compiled actions calls `<entity>_pk` with a
//! business identifier or a UUID rendered as text; only live,
//! tenant-visible rows resolve.

use adl_core::ast::EntityDefinition;

use crate::catalog::EntityCatalog;
use crate::config::ForgeConfig;

/// Helper SQL for one entity, emitted ahead of its action routines.
pub fn trinity_helpers_sql(
    catalog: &EntityCatalog,
    config: &ForgeConfig,
    entity: &EntityDefinition,
) -> String {
    let (schema, table) = catalog.table_parts(entity);
    let snake = entity.snake_name();
    let qualified = format!("{}.{}", schema, table);
    let tenant = config.is_tenant_schema(&schema);

    let mut out = String::new();

    let (pk_params, pk_arg_types) = if tenant {
        ("p_identifier TEXT, p_tenant_id UUID DEFAULT NULL", "TEXT, UUID")
    } else {
        ("p_identifier TEXT", "TEXT")
    };
    out.push_str(&format!(
        "CREATE OR REPLACE FUNCTION {schema}.{snake}_pk({pk_params})\nRETURNS INTEGER AS $$\n    SELECT pk_{snake}\n    FROM {qualified}\n    WHERE (id::text = p_identifier OR identifier = p_identifier)\n"
    ));
    if tenant {
        out.push_str("      AND (p_tenant_id IS NULL OR tenant_id = p_tenant_id)\n");
    }
    if !entity.hard_delete {
        out.push_str("      AND deleted_at IS NULL\n");
    }
    out.push_str("    LIMIT 1;\n$$ LANGUAGE SQL STABLE;\n\n");

    out.push_str(&format!(
        "CREATE OR REPLACE FUNCTION {schema}.{snake}_id(p_pk INTEGER)\nRETURNS UUID AS $$\n    SELECT id\n    FROM {qualified}\n    WHERE pk_{snake} = p_pk;\n$$ LANGUAGE SQL STABLE;\n\n"
    ));

    out.push_str(&format!(
        "CREATE OR REPLACE FUNCTION {schema}.{snake}_identifier(p_pk INTEGER)\nRETURNS TEXT AS $$\n    SELECT identifier\n    FROM {qualified}\n    WHERE pk_{snake} = p_pk;\n$$ LANGUAGE SQL STABLE;\n\n"
    ));

    out.push_str(&format!(
        "COMMENT ON FUNCTION {schema}.{snake}_pk({pk_arg_types}) IS\n'Convert {entity_name} business identifier or UUID (as TEXT) to INTEGER primary key.\n\nTrinity Pattern Helper: Resolves external identifiers to internal pk_{snake}.\n\n@fraiseql:helper\nentity: {entity_name}\nconverts: TEXT -> INTEGER';\n\n",
        entity_name = entity.name,
    ));
    out.push_str(&format!(
        "COMMENT ON FUNCTION {schema}.{snake}_id(INTEGER) IS\n'Convert {entity_name} INTEGER primary key to UUID.\n\nTrinity Pattern Helper: Resolves internal pk_{snake} to external UUID.\n\n@fraiseql:helper\nentity: {entity_name}\nconverts: INTEGER -> UUID';\n",
        entity_name = entity.name,
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use adl_core::parse_document;

    fn setup(doc: &str) -> (EntityCatalog, ForgeConfig) {
        let entity = parse_document(doc).unwrap();
        let mut catalog = EntityCatalog::new();
        catalog.insert(entity).unwrap();
        (catalog, ForgeConfig::default())
    }

    #[test]
    fn test_tenant_entity_helpers_scope_by_tenant() {
        let (catalog, config) = setup(
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
"#,
        );
        let entity = catalog.get("Contact").unwrap();
        let sql = trinity_helpers_sql(&catalog, &config, entity);

        assert!(sql.contains(
            "CREATE OR REPLACE FUNCTION crm.contact_pk(p_identifier TEXT, p_tenant_id UUID DEFAULT NULL)"
        ));
        assert!(sql.contains("WHERE (id::text = p_identifier OR identifier = p_identifier)"));
        assert!(sql.contains("AND (p_tenant_id IS NULL OR tenant_id = p_tenant_id)"));
        assert!(sql.contains("AND deleted_at IS NULL"));
        assert!(sql.contains("CREATE OR REPLACE FUNCTION crm.contact_id(p_pk INTEGER)"));
        assert!(sql.contains("CREATE OR REPLACE FUNCTION crm.contact_identifier(p_pk INTEGER)"));
        assert!(sql.contains("COMMENT ON FUNCTION crm.contact_pk(TEXT, UUID) IS"));
        assert!(sql.contains("@fraiseql:helper"));
    }

    #[test]
    fn test_shared_schema_helper_has_no_tenant_parameter() {
        let (catalog, config) = setup(
            r#"
entity: Currency
schema: reference
hard_delete: true
fields:
  code: text!
actions:
  - name: create_currency
    steps:
      - insert: Currency
        values:
          code: input_data.code
"#,
        );
        let entity = catalog.get("Currency").unwrap();
        let sql = trinity_helpers_sql(&catalog, &config, entity);

        assert!(sql.contains("CREATE OR REPLACE FUNCTION reference.currency_pk(p_identifier TEXT)"));
        assert!(!sql.contains("p_tenant_id"));
        assert!(!sql.contains("deleted_at"));
        assert!(sql.contains("COMMENT ON FUNCTION reference.currency_pk(TEXT) IS"));
    }
}
