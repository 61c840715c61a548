//! Entity catalog
//!
//! Cross-file registry of every entity parsed during a generation run.
//! Steps that touch another entity (insert, update, find, foreach) and
//! `ref(...)` field targets resolve through here; a miss is a
//! `CompileError`, not a silent fallback.
//!
//! Physical naming goes through [`PhysicalNameResolver`] so deployments
//! with different table conventions only swap one impl. The default is
//! `tb_<snake_entity>` in the entity's declared schema.

use std::collections::BTreeMap;

use adl_core::ast::{EntityDefinition, FieldDefinition, RefTarget};

use crate::error::CompileError;

/// Maps a logical entity to its physical (schema, table) location.
pub trait PhysicalNameResolver: Send + Sync {
    fn resolve(&self, entity: &EntityDefinition) -> (String, String);
}

/// Standard naming: the entity's declared schema, table `tb_<snake_name>`.
#[derive(Debug, Default)]
pub struct DefaultNames;

impl PhysicalNameResolver for DefaultNames {
    fn resolve(&self, entity: &EntityDefinition) -> (String, String) {
        (
            entity.schema.clone(),
            format!("tb_{}", entity.snake_name()),
        )
    }
}

/// Append-only registry of parsed entities, keyed by entity name.
pub struct EntityCatalog {
    entities: BTreeMap<String, EntityDefinition>,
    resolver: Box<dyn PhysicalNameResolver>,
}

impl Default for EntityCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityCatalog {
    pub fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
            resolver: Box::new(DefaultNames),
        }
    }

    pub fn with_resolver(resolver: Box<dyn PhysicalNameResolver>) -> Self {
        Self {
            entities: BTreeMap::new(),
            resolver,
        }
    }

    /// Register a parsed entity. Names are global across schemas.
    pub fn insert(&mut self, entity: EntityDefinition) -> Result<(), CompileError> {
        if let Some(existing) = self.entities.get(&entity.name) {
            return Err(CompileError::DuplicateEntity {
                entity: entity.name.clone(),
                schema: existing.schema.clone(),
            });
        }
        self.entities.insert(entity.name.clone(), entity);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&EntityDefinition> {
        self.entities.get(name)
    }

    /// Look up an entity a step targets, failing with the action for context.
    pub fn require(&self, name: &str, action: &str) -> Result<&EntityDefinition, CompileError> {
        self.entities
            .get(name)
            .ok_or_else(|| CompileError::UnknownEntity {
                entity: name.to_string(),
                action: action.to_string(),
            })
    }

    /// Look up a field on a cataloged entity.
    pub fn require_field<'a>(
        &'a self,
        entity: &'a EntityDefinition,
        field: &str,
        action: &str,
    ) -> Result<&'a FieldDefinition, CompileError> {
        entity
            .field(field)
            .ok_or_else(|| CompileError::UnknownField {
                entity: entity.name.clone(),
                field: field.to_string(),
                action: action.to_string(),
            })
    }

    /// Entities in name order. Iteration order feeds emission order, which
    /// must be stable run to run.
    pub fn entities(&self) -> impl Iterator<Item = &EntityDefinition> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Physical (schema, table) of a cataloged entity.
    pub fn table_parts(&self, entity: &EntityDefinition) -> (String, String) {
        self.resolver.resolve(entity)
    }

    /// `schema.table` for direct use in SQL.
    pub fn qualified_table(&self, entity: &EntityDefinition) -> String {
        let (schema, table) = self.table_parts(entity);
        format!("{}.{}", schema, table)
    }

    /// Resolve a `ref(...)` target to the (schema, snake_name) pair that
    /// names its Trinity helpers.
    ///
    /// A schema-qualified target (`ref(management.Org)`) resolves even when
    /// the entity is not cataloged; an unqualified target uses the catalog
    /// entry's schema, falling back to the declaring entity's schema.
    pub fn resolve_ref_target(
        &self,
        target: &RefTarget,
        declaring_schema: &str,
    ) -> (String, String) {
        let snake = target.snake_entity();
        if let Some(schema) = &target.schema {
            return (schema.clone(), snake);
        }
        match self.entities.get(&target.entity) {
            Some(entity) => (entity.schema.clone(), snake),
            None => {
                tracing::warn!(
                    target_entity = %target.entity,
                    schema = declaring_schema,
                    "ref target not cataloged, assuming the declaring schema"
                );
                (declaring_schema.to_string(), snake)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adl_core::parse_document;

    fn contact() -> EntityDefinition {
        parse_document(
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
        )
        .unwrap()
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut catalog = EntityCatalog::new();
        catalog.insert(contact()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get("Contact").is_some());
        assert!(catalog.get("Invoice").is_none());
    }

    #[test]
    fn test_duplicate_entity_rejected() {
        let mut catalog = EntityCatalog::new();
        catalog.insert(contact()).unwrap();
        let err = catalog.insert(contact()).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateEntity { .. }));
        assert!(err.to_string().contains("crm"));
    }

    #[test]
    fn test_require_miss_names_action() {
        let catalog = EntityCatalog::new();
        let err = catalog.require("Invoice", "close_invoice").unwrap_err();
        assert!(err.to_string().contains("Invoice"));
        assert!(err.to_string().contains("close_invoice"));
    }

    #[test]
    fn test_default_physical_names() {
        let mut catalog = EntityCatalog::new();
        catalog.insert(contact()).unwrap();
        let entity = catalog.get("Contact").unwrap();
        assert_eq!(catalog.qualified_table(entity), "crm.tb_contact");
    }

    #[test]
    fn test_ref_target_resolution() {
        let mut catalog = EntityCatalog::new();
        catalog.insert(contact()).unwrap();

        let qualified = RefTarget {
            schema: Some("management".to_string()),
            entity: "Org".to_string(),
        };
        assert_eq!(
            catalog.resolve_ref_target(&qualified, "tenant"),
            ("management".to_string(), "org".to_string())
        );

        let cataloged = RefTarget {
            schema: None,
            entity: "Contact".to_string(),
        };
        assert_eq!(
            catalog.resolve_ref_target(&cataloged, "tenant"),
            ("crm".to_string(), "contact".to_string())
        );

        let unknown = RefTarget {
            schema: None,
            entity: "Widget".to_string(),
        };
        assert_eq!(
            catalog.resolve_ref_target(&unknown, "tenant"),
            ("tenant".to_string(), "widget".to_string())
        );
    }
}
