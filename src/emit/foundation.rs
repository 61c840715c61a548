//! App foundation artifacts
//!
//! Emitted once per generation run, before any entity file: the `app`
//! schema, the shared `app.mutation_result` envelope type, the mutation
//! audit table, and `app.log_and_return_mutation`, which every generated
//! routine funnels its outcome through.

/// Foundation SQL. Static text; the run writes it to `app/foundation.sql`.
pub fn foundation_sql() -> &'static str {
    FOUNDATION_SQL
}

const FOUNDATION_SQL: &str = r#"-- Generated by actionforge. Do not edit.

CREATE SCHEMA IF NOT EXISTS app;

-- ============================================================================
-- MUTATION RESULT TYPE
-- Standard output type for all mutations
-- ============================================================================
CREATE TYPE app.mutation_result AS (
    id UUID,
    updated_fields TEXT[],
    status TEXT,
    message TEXT,
    object_data JSONB,
    extra_metadata JSONB
);

COMMENT ON TYPE app.mutation_result IS
  '@fraiseql:type name=MutationResult';

COMMENT ON COLUMN app.mutation_result.id IS
  '@fraiseql:field name=id,type=UUID,description=Entity identifier';

COMMENT ON COLUMN app.mutation_result.updated_fields IS
  '@fraiseql:field name=updatedFields,type=[String],description=Fields that were modified in this mutation';

COMMENT ON COLUMN app.mutation_result.status IS
  'Status: success, failed:*, warning:*';

COMMENT ON COLUMN app.mutation_result.message IS
  '@fraiseql:field name=message,type=String,description=Human-readable success or error message';

COMMENT ON COLUMN app.mutation_result.object_data IS
  '@fraiseql:field name=object,type=JSON,description=Complete entity data after mutation';

COMMENT ON COLUMN app.mutation_result.extra_metadata IS
  '@fraiseql:field name=extra,type=JSON,description=Additional metadata including side effects and impact information';

-- ============================================================================
-- MUTATION AUDIT LOG
-- One row per completed invocation, success or failure
-- ============================================================================
CREATE TABLE IF NOT EXISTS app.tb_mutation_log (
    pk_mutation_log BIGSERIAL PRIMARY KEY,
    id UUID NOT NULL DEFAULT gen_random_uuid(),
    tenant_id UUID,
    user_id UUID,
    entity TEXT NOT NULL,
    entity_id UUID,
    operation TEXT NOT NULL,
    status TEXT NOT NULL,
    updated_fields TEXT[] NOT NULL DEFAULT ARRAY[]::TEXT[],
    message TEXT,
    error_detail JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_mutation_log_entity
    ON app.tb_mutation_log (entity, entity_id);
CREATE INDEX IF NOT EXISTS idx_mutation_log_tenant_created
    ON app.tb_mutation_log (tenant_id, created_at);

-- ============================================================================
-- SHARED UTILITY: app.log_and_return_mutation
-- Used by ALL business schemas for standardized mutation responses
-- ============================================================================
CREATE OR REPLACE FUNCTION app.log_and_return_mutation(
    p_tenant_id UUID,
    p_user_id UUID,
    p_entity TEXT,
    p_entity_id UUID,
    p_operation TEXT,
    p_status TEXT,
    p_updated_fields TEXT[],
    p_message TEXT,
    p_object_data JSONB,
    p_extra_metadata JSONB DEFAULT NULL
) RETURNS app.mutation_result
LANGUAGE plpgsql
AS $$
DECLARE
    v_result app.mutation_result;
BEGIN
    INSERT INTO app.tb_mutation_log (
        tenant_id,
        user_id,
        entity,
        entity_id,
        operation,
        status,
        updated_fields,
        message,
        error_detail
    ) VALUES (
        p_tenant_id,
        p_user_id,
        p_entity,
        p_entity_id,
        p_operation,
        p_status,
        COALESCE(p_updated_fields, ARRAY[]::TEXT[]),
        p_message,
        CASE WHEN p_status = 'success' THEN NULL ELSE p_extra_metadata END
    );

    v_result.id := p_entity_id;
    v_result.updated_fields := COALESCE(p_updated_fields, ARRAY[]::TEXT[]);
    v_result.status := p_status;
    v_result.message := p_message;
    v_result.object_data := p_object_data;
    v_result.extra_metadata := COALESCE(p_extra_metadata, '{}'::jsonb);

    RETURN v_result;
END;
$$;

COMMENT ON FUNCTION app.log_and_return_mutation IS
  '@fraiseql:utility Used by mutations to build standardized responses';
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foundation_declares_envelope_type() {
        let sql = foundation_sql();
        assert!(sql.contains("CREATE SCHEMA IF NOT EXISTS app;"));
        assert!(sql.contains("CREATE TYPE app.mutation_result AS ("));
        for field in [
            "id UUID,",
            "updated_fields TEXT[],",
            "status TEXT,",
            "message TEXT,",
            "object_data JSONB,",
            "extra_metadata JSONB",
        ] {
            assert!(sql.contains(field), "missing {field}");
        }
        assert!(sql.contains("'@fraiseql:type name=MutationResult'"));
    }

    #[test]
    fn test_log_function_writes_audit_row() {
        let sql = foundation_sql();
        assert!(sql.contains("CREATE OR REPLACE FUNCTION app.log_and_return_mutation("));
        assert!(sql.contains("INSERT INTO app.tb_mutation_log ("));
        assert!(sql.contains("p_extra_metadata JSONB DEFAULT NULL"));
        assert!(sql.contains("RETURNS app.mutation_result"));
        // Success metadata (impacts) stays out of the error column.
        assert!(sql.contains("CASE WHEN p_status = 'success' THEN NULL ELSE p_extra_metadata END"));
    }

    #[test]
    fn test_audit_table_columns() {
        let sql = foundation_sql();
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS app.tb_mutation_log ("));
        assert!(sql.contains("pk_mutation_log BIGSERIAL PRIMARY KEY"));
        assert!(sql.contains("updated_fields TEXT[] NOT NULL DEFAULT ARRAY[]::TEXT[]"));
        assert!(sql.contains("error_detail JSONB"));
    }
}
