//! Boundary contracts for external generators
//!
//! Two artifacts cross the compiler boundary without being SQL bodies:
//!
//! - [`SchemaContract`]: the column-level mapping the schema generator
//!   materializes as table DDL. Covers the three Trinity columns, the
//!   tenant column, every declared field, and the six audit columns.
//! - [`ApiAnnotation`]: the `@fraiseql:mutation` comment attached to each
//!   action's wrapper routine, consumed by the API-layer generator.

use std::collections::BTreeMap;

use serde::Serialize;

use adl_core::ast::{EntityDefinition, FieldDefinition, FieldType};
use adl_core::types::{basic_storage_type, composite_type, scalar_type};

use crate::catalog::EntityCatalog;
use crate::config::ForgeConfig;

// ============================================================================
// Schema contract
// ============================================================================

/// Where a column comes from; external generators key DDL conventions off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSource {
    Trinity,
    Tenant,
    Field,
    Audit,
}

/// One physical column the schema generator must materialize.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    pub storage_type: String,
    pub required: bool,
    pub unique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Validation constraint body, e.g. `status IN ('active', 'inactive')`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
    pub api_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub source: ColumnSource,
}

/// Field-to-column mapping for one entity, in column order.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaContract {
    pub entity: String,
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnSpec>,
}

impl SchemaContract {
    pub fn to_json(&self) -> String {
        // Serialization of these plain structs cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Build the schema contract for one entity.
pub fn schema_contract(
    entity: &EntityDefinition,
    catalog: &EntityCatalog,
    config: &ForgeConfig,
) -> SchemaContract {
    let (schema, table) = catalog.table_parts(entity);
    let snake = entity.snake_name();
    let mut columns = Vec::new();

    columns.push(ColumnSpec {
        name: format!("pk_{}", snake),
        storage_type: "INTEGER".to_string(),
        required: true,
        unique: true,
        default: None,
        check: None,
        api_type: "Int!".to_string(),
        comment: Some("Surrogate primary key".to_string()),
        source: ColumnSource::Trinity,
    });
    columns.push(ColumnSpec {
        name: "id".to_string(),
        storage_type: "UUID".to_string(),
        required: true,
        unique: true,
        default: Some("gen_random_uuid()".to_string()),
        check: None,
        api_type: "UUID!".to_string(),
        comment: Some("Stable external identifier".to_string()),
        source: ColumnSource::Trinity,
    });
    columns.push(ColumnSpec {
        name: "identifier".to_string(),
        storage_type: "TEXT".to_string(),
        required: false,
        unique: true,
        default: None,
        check: None,
        api_type: "String".to_string(),
        comment: Some("Optional human-readable identifier".to_string()),
        source: ColumnSource::Trinity,
    });

    if config.is_tenant_schema(&schema) {
        columns.push(ColumnSpec {
            name: "tenant_id".to_string(),
            storage_type: "UUID".to_string(),
            required: true,
            unique: false,
            default: None,
            check: None,
            api_type: "UUID!".to_string(),
            comment: None,
            source: ColumnSource::Tenant,
        });
    }

    for field in &entity.fields {
        columns.extend(field_columns(field));
    }

    for (name, ty, required, default) in audit_columns() {
        columns.push(ColumnSpec {
            name: name.to_string(),
            storage_type: ty.to_string(),
            required,
            unique: false,
            default: default.map(|d| d.to_string()),
            check: None,
            api_type: if ty == "UUID" { "UUID" } else { "DateTime" }.to_string(),
            comment: None,
            source: ColumnSource::Audit,
        });
    }

    SchemaContract {
        entity: entity.name.clone(),
        schema,
        table,
        columns,
    }
}

fn audit_columns() -> [(&'static str, &'static str, bool, Option<&'static str>); 6] {
    [
        ("created_at", "TIMESTAMPTZ", true, Some("now()")),
        ("created_by", "UUID", false, None),
        ("updated_at", "TIMESTAMPTZ", true, Some("now()")),
        ("updated_by", "UUID", false, None),
        ("deleted_at", "TIMESTAMPTZ", false, None),
        ("deleted_by", "UUID", false, None),
    ]
}

/// Columns for one declared field. Polymorphic references produce two:
/// the key column and a discriminator naming which target it points at.
fn field_columns(field: &FieldDefinition) -> Vec<ColumnSpec> {
    let column = field.column_name();
    let mut specs = vec![ColumnSpec {
        name: column.clone(),
        storage_type: storage_type_of(&field.field_type),
        required: field.required,
        unique: field.unique,
        default: field.default.clone(),
        check: check_of(field, &column),
        api_type: api_type_of(field),
        comment: comment_of(&field.field_type),
        source: ColumnSource::Field,
    }];

    if let FieldType::Reference(targets) = &field.field_type {
        if targets.len() > 1 {
            let names: Vec<String> = targets
                .iter()
                .map(|t| format!("'{}'", t.entity))
                .collect();
            specs.push(ColumnSpec {
                name: format!("{}_type", field.name),
                storage_type: "TEXT".to_string(),
                required: field.required,
                unique: false,
                default: None,
                check: Some(format!("{}_type IN ({})", field.name, names.join(", "))),
                api_type: "String".to_string(),
                comment: Some("Discriminator for the polymorphic reference".to_string()),
                source: ColumnSource::Field,
            });
        }
    }

    specs
}

pub fn storage_type_of(field_type: &FieldType) -> String {
    match field_type {
        FieldType::Basic(name) => basic_storage_type(name).unwrap_or("TEXT").to_string(),
        FieldType::Scalar(name) => scalar_type(name)
            .map(|s| s.postgres_type.to_string())
            .unwrap_or_else(|| "TEXT".to_string()),
        FieldType::Composite(_) => "JSONB".to_string(),
        FieldType::Enum(_) => "TEXT".to_string(),
        FieldType::List(inner) => format!("{}[]", storage_type_of(inner)),
        FieldType::Reference(_) => "INTEGER".to_string(),
    }
}

fn check_of(field: &FieldDefinition, column: &str) -> Option<String> {
    if let Some(pattern) = &field.pattern {
        return Some(format!("{} ~ '{}'", column, sql_escape(pattern)));
    }
    match &field.field_type {
        FieldType::Scalar(name) => scalar_type(name)
            .and_then(|s| s.validation_pattern)
            .map(|p| format!("{} ~ '{}'", column, sql_escape(p))),
        FieldType::Enum(values) => {
            let quoted: Vec<String> = values
                .iter()
                .map(|v| format!("'{}'", sql_escape(v)))
                .collect();
            Some(format!("{} IN ({})", column, quoted.join(", ")))
        }
        _ => None,
    }
}

fn comment_of(field_type: &FieldType) -> Option<String> {
    if let FieldType::Composite(name) = field_type {
        if let Some(composite) = composite_type(name) {
            let members: Vec<String> = composite
                .fields
                .iter()
                .map(|m| {
                    if m.required {
                        format!("{}: {}", m.name, m.type_name)
                    } else {
                        format!("{}?: {}", m.name, m.type_name)
                    }
                })
                .collect();
            return Some(format!("{} {{{}}}", composite.name, members.join(", ")));
        }
    }
    None
}

/// External-API type name for a field, `!`-suffixed when required.
pub fn api_type_of(field: &FieldDefinition) -> String {
    let base = api_base_type(&field.field_type);
    if field.required {
        format!("{}!", base)
    } else {
        base
    }
}

fn api_base_type(field_type: &FieldType) -> String {
    match field_type {
        FieldType::Basic(name) => match name.as_str() {
            "integer" | "bigint" | "serial" => "Int",
            "decimal" => "Float",
            "boolean" => "Boolean",
            "date" => "Date",
            "timestamp" => "DateTime",
            _ => "String",
        }
        .to_string(),
        FieldType::Scalar(name) => scalar_type(name)
            .map(|s| s.api_type.to_string())
            .unwrap_or_else(|| "String".to_string()),
        FieldType::Composite(name) => name.clone(),
        FieldType::Enum(_) => "String".to_string(),
        FieldType::List(inner) => format!("[{}]", api_base_type(inner)),
        FieldType::Reference(targets) => {
            let names: Vec<&str> = targets.iter().map(|t| t.entity.as_str()).collect();
            names.join(" | ")
        }
    }
}

// ============================================================================
// API annotation
// ============================================================================

/// Structured annotation attached to a wrapper routine for the API-layer
/// generator. Rendered as a `COMMENT ON FUNCTION` in the
/// `@fraiseql:mutation` dialect.
#[derive(Debug, Clone, Serialize)]
pub struct ApiAnnotation {
    /// camelCase mutation name exposed to the API.
    pub name: String,
    pub entity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input member name to API type.
    pub input: BTreeMap<String, String>,
    pub output: String,
}

impl ApiAnnotation {
    pub fn new(
        entity: &EntityDefinition,
        action_name: &str,
        description: Option<&str>,
        input: BTreeMap<String, String>,
    ) -> Self {
        Self {
            name: to_camel_case(action_name),
            entity: entity.name.clone(),
            description: description.map(|d| d.to_string()),
            input,
            output: "MutationResult".to_string(),
        }
    }

    /// The `COMMENT ON FUNCTION` statement carrying this annotation.
    /// `schema.action` must name the wrapper routine.
    pub fn comment_sql(&self, schema: &str, action: &str) -> String {
        let input_json =
            serde_json::to_string(&self.input).unwrap_or_else(|_| "{}".to_string());
        let mut body = String::new();
        if let Some(description) = &self.description {
            body.push_str(&sql_escape(description));
            body.push_str("\n\n");
        }
        body.push_str("@fraiseql:mutation\n");
        body.push_str(&format!("name: {}\n", self.name));
        body.push_str(&format!("entity: {}\n", self.entity));
        body.push_str(&format!("input: {}\n", sql_escape(&input_json)));
        body.push_str(&format!("output: {}", self.output));
        format!(
            "COMMENT ON FUNCTION {}.{}(UUID, app.type_{}_input, JSONB, UUID) IS\n'{}';",
            schema, action, action, body
        )
    }
}

/// `qualify_lead` -> `qualifyLead`.
pub fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

fn sql_escape(text: &str) -> String {
    text.replace('\'', "''")
}
