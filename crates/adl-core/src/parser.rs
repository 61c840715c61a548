//! YAML document parser for ADL entities
//!
//! One document describes one entity: its fields, then its actions as
//! ordered step lists. Steps are dispatched on a closed key set; a step
//! mapping must contain exactly one of those keys, and its remaining keys
//! are that step's modifiers (`error:`, `do:`, `bind:`, ...).
//!
//! Expressions are parsed and resolved in place, so every reference a step
//! makes is checked at parse time against what is actually in scope there:
//! the entity's fields, `input_data`, the auth parameters, and variables
//! bound by earlier steps. Conditions evaluated against a different entity
//! (cross-entity find/update/foreach) defer field checking to the compiler,
//! which holds the full entity catalog.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::ast::{
    to_snake_case, ActionDefinition, ActionImpact, ActionStep, Assignment, CatchHandler,
    Collection, EntityDefinition, FieldDefinition, ReturnValue, RuntimeErrorKind, SwitchCase,
};
use crate::error::{value_kind, ParseError};
use crate::expr::{parse_expression, strip_quoted, ExprError, ExprScope, Expression};
use crate::fields::parse_field;
use crate::reserved::{is_reserved_column, is_reserved_word};

/// The complete step vocabulary. Dispatch is exact-match; anything else in
/// key position is an `UnknownStepKey` error.
pub const STEP_KEYS: &[&str] = &[
    "validate",
    "insert",
    "update",
    "delete",
    "find",
    "call",
    "notify",
    "if",
    "foreach",
    "while",
    "switch",
    "declare",
    "exception_handling",
    "for_query",
    "call_function",
    "reject",
    "return",
];

static ENTITY_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Za-z0-9]*$").unwrap());
static SNAKE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").unwrap());
static QUALIFIED_FN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)?$").unwrap());
static DECLARE_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*(\s*\(\s*\d+(\s*,\s*\d+)?\s*\))?$").unwrap());
static WRITE_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(insert|update|delete|merge|drop|alter|create|truncate|grant|revoke|copy|execute|call|into|vacuum|listen|notify|set)\b",
    )
    .unwrap()
});

// =============================================================================
// ENTRY POINTS
// =============================================================================

/// Parse a single-document ADL source into an entity definition.
pub fn parse_document(source: &str) -> Result<EntityDefinition, ParseError> {
    let value: Value =
        serde_yaml::from_str(source).map_err(|e| ParseError::from_yaml(&e))?;
    parse_entity_value(&value)
}

/// Parse a source that may hold several `---`-separated entity documents.
pub fn parse_documents(source: &str) -> Result<Vec<EntityDefinition>, ParseError> {
    let mut entities = Vec::new();
    for document in serde_yaml::Deserializer::from_str(source) {
        let value =
            Value::deserialize(document).map_err(|e| ParseError::from_yaml(&e))?;
        if value.is_null() {
            continue;
        }
        entities.push(parse_entity_value(&value)?);
    }
    Ok(entities)
}

// =============================================================================
// ENTITY LEVEL
// =============================================================================

fn parse_entity_value(value: &Value) -> Result<EntityDefinition, ParseError> {
    let mapping = value.as_mapping().ok_or_else(|| ParseError::WrongShape {
        expected: "mapping",
        found: value_kind(value).to_string(),
        location: "document".to_string(),
    })?;

    check_keys(
        mapping,
        &[
            "entity",
            "schema",
            "description",
            "identifier",
            "hard_delete",
            "fields",
            "actions",
        ],
        "entity document keys",
        "document",
    )?;

    let name = require_str(mapping, "entity", "document")?;
    if !ENTITY_NAME.is_match(name) {
        return Err(ParseError::InvalidIdentifier {
            name: name.to_string(),
            location: "entity".to_string(),
        });
    }

    let schema = get_str(mapping, "schema", "document")?
        .unwrap_or("tenant")
        .to_string();
    if !SNAKE_NAME.is_match(&schema) {
        return Err(ParseError::InvalidIdentifier {
            name: schema,
            location: "schema".to_string(),
        });
    }

    let description = get_str(mapping, "description", "document")?
        .unwrap_or_default()
        .to_string();
    let hard_delete = get_bool(mapping, "hard_delete", "document")?.unwrap_or(false);

    let fields_value = mapping.get("fields").ok_or_else(|| ParseError::MissingKey {
        key: "fields".to_string(),
        location: "document".to_string(),
    })?;
    let fields = parse_fields(fields_value)?;

    let identifier_field = match get_str(mapping, "identifier", "document")? {
        Some(ident) => {
            if !fields.iter().any(|f| f.name == ident) {
                return Err(ParseError::WrongShape {
                    expected: "a declared field name",
                    found: format!("'{ident}'"),
                    location: "identifier".to_string(),
                });
            }
            Some(ident.to_string())
        }
        None => None,
    };

    let actions = match mapping.get("actions") {
        Some(value) => parse_actions(value, name, &fields)?,
        None => Vec::new(),
    };

    debug!(
        entity = name,
        schema = %schema,
        fields = fields.len(),
        actions = actions.len(),
        "parsed entity document"
    );

    Ok(EntityDefinition {
        name: name.to_string(),
        schema,
        description,
        identifier_field,
        hard_delete,
        fields,
        actions,
    })
}

fn parse_fields(value: &Value) -> Result<Vec<FieldDefinition>, ParseError> {
    let mapping = value.as_mapping().ok_or_else(|| ParseError::WrongShape {
        expected: "mapping",
        found: value_kind(value).to_string(),
        location: "fields".to_string(),
    })?;

    let mut fields = Vec::with_capacity(mapping.len());
    for (key, spec) in mapping {
        let name = key.as_str().ok_or_else(|| ParseError::WrongShape {
            expected: "string key",
            found: value_kind(key).to_string(),
            location: "fields".to_string(),
        })?;
        if fields.iter().any(|f: &FieldDefinition| f.name == name) {
            return Err(ParseError::DuplicateField {
                field: name.to_string(),
            });
        }
        fields.push(parse_field(name, spec, &format!("fields.{name}"))?);
    }
    Ok(fields)
}

// =============================================================================
// ACTION LEVEL
// =============================================================================

fn parse_actions(
    value: &Value,
    entity: &str,
    fields: &[FieldDefinition],
) -> Result<Vec<ActionDefinition>, ParseError> {
    let sequence = value.as_sequence().ok_or_else(|| ParseError::WrongShape {
        expected: "sequence",
        found: value_kind(value).to_string(),
        location: "actions".to_string(),
    })?;

    let mut actions: Vec<ActionDefinition> = Vec::with_capacity(sequence.len());
    for (index, item) in sequence.iter().enumerate() {
        let location = format!("actions[{index}]");
        let action = parse_action(item, entity, fields, &location)?;
        if actions.iter().any(|a| a.name == action.name) {
            return Err(ParseError::DuplicateAction {
                action: action.name,
            });
        }
        actions.push(action);
    }
    Ok(actions)
}

fn parse_action(
    value: &Value,
    entity: &str,
    fields: &[FieldDefinition],
    location: &str,
) -> Result<ActionDefinition, ParseError> {
    let mapping = value.as_mapping().ok_or_else(|| ParseError::WrongShape {
        expected: "mapping",
        found: value_kind(value).to_string(),
        location: location.to_string(),
    })?;

    check_keys(
        mapping,
        &["name", "description", "requires", "steps", "impact"],
        "action keys ('name', 'description', 'requires', 'steps', 'impact')",
        location,
    )?;

    let name = require_str(mapping, "name", location)?;
    if !SNAKE_NAME.is_match(name) || is_reserved_word(name) {
        return Err(ParseError::InvalidIdentifier {
            name: name.to_string(),
            location: format!("{location}.name"),
        });
    }

    let description = get_str(mapping, "description", location)?
        .unwrap_or_default()
        .to_string();
    let requires = get_str(mapping, "requires", location)?.map(str::to_string);

    let steps_value = mapping.get("steps").ok_or_else(|| ParseError::MissingKey {
        key: "steps".to_string(),
        location: location.to_string(),
    })?;
    let steps_seq = steps_value
        .as_sequence()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ParseError::WrongShape {
            expected: "non-empty sequence",
            found: value_kind(steps_value).to_string(),
            location: format!("{location}.steps"),
        })?;

    let mut scope = ExprScope::new(fields.iter().map(|f| f.name.clone()));
    let ctx = StepContext { entity };
    let steps = parse_steps(steps_seq, &ctx, &mut scope, &format!("{location}.steps"))?;

    let impact = match mapping.get("impact") {
        Some(value) => Some(
            serde_yaml::from_value::<ActionImpact>(value.clone())
                .map_err(|e| ParseError::from_yaml(&e))?,
        ),
        None => None,
    };

    Ok(ActionDefinition {
        name: name.to_string(),
        description,
        requires,
        steps,
        impact,
    })
}

// =============================================================================
// STEP DISPATCH
// =============================================================================

/// Fixed context threaded through step parsing.
struct StepContext<'a> {
    /// Subject entity name; decides whether a target's fields are known
    /// here or deferred to the compiler.
    entity: &'a str,
}

impl StepContext<'_> {
    /// Scope for a condition evaluated against `target` rows.
    fn scope_for<'s>(&self, target: Option<&str>, scope: &'s ExprScope) -> ExprScope {
        match target {
            Some(t) if t != self.entity => scope.defer_fields(),
            _ => scope.clone(),
        }
    }
}

fn parse_steps(
    sequence: &[Value],
    ctx: &StepContext,
    scope: &mut ExprScope,
    prefix: &str,
) -> Result<Vec<ActionStep>, ParseError> {
    let mut steps = Vec::with_capacity(sequence.len());
    for (index, item) in sequence.iter().enumerate() {
        let location = format!("{prefix}[{index}]");
        steps.push(parse_step(item, ctx, scope, &location)?);
    }
    Ok(steps)
}

static EMPTY_MAPPING: Lazy<Mapping> = Lazy::new(Mapping::new);
static NULL_VALUE: Lazy<Value> = Lazy::new(|| Value::Null);

fn parse_step(
    value: &Value,
    ctx: &StepContext,
    scope: &mut ExprScope,
    location: &str,
) -> Result<ActionStep, ParseError> {
    // A bare `- return` or `- delete` arrives as a plain string.
    let (key, payload, mapping): (&str, &Value, &Mapping) = match value {
        Value::String(s) if STEP_KEYS.contains(&s.as_str()) => {
            (s, &NULL_VALUE, &EMPTY_MAPPING)
        }
        Value::String(s) => {
            return Err(ParseError::UnknownStepKey {
                keys: format!("'{s}'"),
                location: location.to_string(),
            })
        }
        Value::Mapping(m) => {
            let mut found: Option<&str> = None;
            for key in m.keys() {
                if let Some(key) = key.as_str() {
                    if STEP_KEYS.contains(&key) {
                        if found.is_some() {
                            found = None;
                            break;
                        }
                        found = Some(key);
                    }
                }
            }
            let key = found.ok_or_else(|| ParseError::UnknownStepKey {
                keys: m
                    .keys()
                    .map(|k| format!("'{}'", k.as_str().unwrap_or("?")))
                    .collect::<Vec<_>>()
                    .join(", "),
                location: location.to_string(),
            })?;
            (key, m.get(key).unwrap_or(&NULL_VALUE), m)
        }
        other => {
            return Err(ParseError::WrongShape {
                expected: "step mapping",
                found: value_kind(other).to_string(),
                location: location.to_string(),
            })
        }
    };

    let location = format!("{location}.{key}");
    match key {
        "validate" => parse_validate(payload, mapping, scope, &location),
        "insert" => parse_insert(payload, mapping, scope, &location),
        "update" => parse_update(payload, mapping, ctx, scope, &location),
        "delete" => parse_delete(payload, mapping, ctx, scope, &location),
        "find" => parse_find(payload, mapping, ctx, scope, &location),
        "call" => parse_call(payload, mapping, scope, &location),
        "notify" => parse_notify(payload, mapping, scope, &location),
        "if" => parse_if(payload, mapping, ctx, scope, &location),
        "foreach" => parse_foreach(payload, mapping, ctx, scope, &location),
        "while" => parse_while(payload, mapping, ctx, scope, &location),
        "switch" => parse_switch(payload, mapping, ctx, scope, &location),
        "declare" => parse_declare(payload, mapping, scope, &location),
        "exception_handling" => parse_exception(payload, mapping, ctx, scope, &location),
        "for_query" => parse_for_query(payload, mapping, ctx, scope, &location),
        "call_function" => parse_call_function(payload, mapping, scope, &location),
        "reject" => parse_reject(payload, mapping, &location),
        "return" => parse_return(payload, mapping, scope, &location),
        _ => unreachable!("dispatch covers STEP_KEYS"),
    }
}

// =============================================================================
// SIMPLE STEPS
// =============================================================================

fn parse_validate(
    payload: &Value,
    mapping: &Mapping,
    scope: &ExprScope,
    location: &str,
) -> Result<ActionStep, ParseError> {
    check_keys(mapping, &["validate", "error", "message"], "validate keys ('error', 'message')", location)?;
    let raw = payload_str(payload, location)?;
    let condition = expr_at(raw, scope, location)?;
    let error_code = match get_str(mapping, "error", location)? {
        Some(code) => {
            if !SNAKE_NAME.is_match(code) {
                return Err(ParseError::InvalidIdentifier {
                    name: code.to_string(),
                    location: format!("{location}.error"),
                });
            }
            code.to_string()
        }
        None => "validation_failed".to_string(),
    };
    let message = get_str(mapping, "message", location)?.map(str::to_string);
    Ok(ActionStep::Validate {
        condition,
        error_code,
        message,
    })
}

fn parse_reject(
    payload: &Value,
    mapping: &Mapping,
    location: &str,
) -> Result<ActionStep, ParseError> {
    check_keys(mapping, &["reject", "message"], "reject keys ('message')", location)?;
    let code = payload_str(payload, location)?;
    if !SNAKE_NAME.is_match(code) {
        return Err(ParseError::InvalidIdentifier {
            name: code.to_string(),
            location: location.to_string(),
        });
    }
    let message = get_str(mapping, "message", location)?.map(str::to_string);
    Ok(ActionStep::Reject {
        error_code: code.to_string(),
        message,
    })
}

fn parse_return(
    payload: &Value,
    mapping: &Mapping,
    scope: &ExprScope,
    location: &str,
) -> Result<ActionStep, ParseError> {
    check_keys(mapping, &["return"], "no extra keys for 'return'", location)?;
    let value = match payload {
        Value::Null => ReturnValue::RowData,
        Value::String(raw) => ReturnValue::Expr(expr_at(raw, scope, location)?),
        Value::Mapping(members) => {
            let mut pairs = Vec::with_capacity(members.len());
            for (key, value) in members {
                let name = key.as_str().filter(|k| SNAKE_NAME.is_match(k)).ok_or_else(|| {
                    ParseError::WrongShape {
                        expected: "identifier key",
                        found: value_kind(key).to_string(),
                        location: location.to_string(),
                    }
                })?;
                let raw = value.as_str().ok_or_else(|| ParseError::WrongShape {
                    expected: "expression string",
                    found: value_kind(value).to_string(),
                    location: format!("{location}.{name}"),
                })?;
                pairs.push((name.to_string(), expr_at(raw, scope, location)?));
            }
            ReturnValue::Object(pairs)
        }
        other => {
            return Err(ParseError::WrongShape {
                expected: "null, string, or mapping",
                found: value_kind(other).to_string(),
                location: location.to_string(),
            })
        }
    };
    Ok(ActionStep::Return { value })
}

fn parse_declare(
    payload: &Value,
    mapping: &Mapping,
    scope: &mut ExprScope,
    location: &str,
) -> Result<ActionStep, ParseError> {
    check_keys(mapping, &["declare"], "no extra keys for 'declare'", location)?;
    let body = payload.as_mapping().ok_or_else(|| ParseError::WrongShape {
        expected: "mapping with 'name' and 'type'",
        found: value_kind(payload).to_string(),
        location: location.to_string(),
    })?;
    check_keys(body, &["name", "type", "default"], "declare keys ('name', 'type', 'default')", location)?;

    let type_name = require_str(body, "type", location)?;
    if !DECLARE_TYPE.is_match(type_name) {
        return Err(ParseError::InvalidIdentifier {
            name: type_name.to_string(),
            location: format!("{location}.type"),
        });
    }

    // The default is resolved before the name is bound, so a declaration
    // cannot reference itself.
    let default = match body.get("default") {
        Some(value) => {
            let raw = scalar_as_expr_str(value, &format!("{location}.default"))?;
            Some(expr_at(&raw, scope, location)?)
        }
        None => None,
    };

    let name = bind_var(scope, require_str(body, "name", location)?, location)?;

    Ok(ActionStep::Declare {
        name,
        type_name: type_name.to_string(),
        default,
    })
}

// =============================================================================
// MUTATION STEPS
// =============================================================================

fn parse_insert(
    payload: &Value,
    mapping: &Mapping,
    scope: &mut ExprScope,
    location: &str,
) -> Result<ActionStep, ParseError> {
    check_keys(mapping, &["insert", "values", "bind"], "insert keys ('values', 'bind')", location)?;

    let (entity, values_value, bind_value) = match payload {
        // Compact form: `insert: Order` with sibling `values:`.
        Value::String(entity) => (
            entity.as_str(),
            mapping.get("values"),
            mapping.get("bind"),
        ),
        Value::Mapping(body) => {
            check_keys(body, &["entity", "values", "bind"], "insert keys ('entity', 'values', 'bind')", location)?;
            (
                require_str(body, "entity", location)?,
                body.get("values"),
                body.get("bind"),
            )
        }
        other => {
            return Err(ParseError::WrongShape {
                expected: "entity name or mapping",
                found: value_kind(other).to_string(),
                location: location.to_string(),
            })
        }
    };

    if !ENTITY_NAME.is_match(entity) {
        return Err(ParseError::InvalidIdentifier {
            name: entity.to_string(),
            location: location.to_string(),
        });
    }

    let values_value = values_value.ok_or_else(|| ParseError::MissingKey {
        key: "values".to_string(),
        location: location.to_string(),
    })?;
    let values = parse_value_map(values_value, scope, &format!("{location}.values"))?;

    let bind = match bind_value {
        Some(value) => {
            let raw = value.as_str().ok_or_else(|| ParseError::WrongShape {
                expected: "variable name",
                found: value_kind(value).to_string(),
                location: format!("{location}.bind"),
            })?;
            Some(bind_var(scope, raw, &format!("{location}.bind"))?)
        }
        None => None,
    };

    Ok(ActionStep::Insert {
        entity: entity.to_string(),
        values,
        bind,
    })
}

fn parse_update(
    payload: &Value,
    mapping: &Mapping,
    ctx: &StepContext,
    scope: &ExprScope,
    location: &str,
) -> Result<ActionStep, ParseError> {
    check_keys(mapping, &["update"], "no extra keys for 'update'", location)?;

    match payload {
        // `update: "Contact SET status = 'qualified' WHERE ..."`
        Value::String(raw) => {
            let (entity, rest) = leading_entity(raw).ok_or_else(|| ParseError::InvalidExpression {
                message: "expected 'Entity SET field = expression, ...'".to_string(),
                location: location.to_string(),
            })?;
            let (set_part, where_part) = match split_top_level_word(rest, "set") {
                Some((before, after)) if before.trim().is_empty() => {
                    match split_top_level_word(after, "where") {
                        Some((set, cond)) => (set, Some(cond)),
                        None => (after, None),
                    }
                }
                _ => {
                    return Err(ParseError::InvalidExpression {
                        message: "expected 'Entity SET field = expression, ...'".to_string(),
                        location: location.to_string(),
                    })
                }
            };

            let target_scope = ctx.scope_for(Some(entity), scope);
            let set = parse_assignments(set_part, &target_scope, location)?;
            let condition = match where_part {
                Some(raw) => Some(expr_at(raw.trim(), &target_scope, location)?),
                None => None,
            };
            let entity = if entity == ctx.entity {
                None
            } else {
                Some(entity.to_string())
            };
            Ok(ActionStep::Update {
                entity,
                set,
                condition,
            })
        }
        Value::Mapping(body) => {
            check_keys(body, &["entity", "set", "where"], "update keys ('entity', 'set', 'where')", location)?;
            let entity = get_str(body, "entity", location)?;
            if let Some(entity) = entity {
                if !ENTITY_NAME.is_match(entity) {
                    return Err(ParseError::InvalidIdentifier {
                        name: entity.to_string(),
                        location: location.to_string(),
                    });
                }
            }
            let target_scope = ctx.scope_for(entity, scope);

            let set_value = body.get("set").ok_or_else(|| ParseError::MissingKey {
                key: "set".to_string(),
                location: location.to_string(),
            })?;
            let set = parse_value_map(set_value, &target_scope, &format!("{location}.set"))?;

            let condition = match get_str(body, "where", location)? {
                Some(raw) => Some(expr_at(raw, &target_scope, location)?),
                None => None,
            };

            let entity = entity
                .filter(|e| *e != ctx.entity)
                .map(str::to_string);
            Ok(ActionStep::Update {
                entity,
                set,
                condition,
            })
        }
        other => Err(ParseError::WrongShape {
            expected: "string or mapping",
            found: value_kind(other).to_string(),
            location: location.to_string(),
        }),
    }
}

fn parse_delete(
    payload: &Value,
    mapping: &Mapping,
    ctx: &StepContext,
    scope: &ExprScope,
    location: &str,
) -> Result<ActionStep, ParseError> {
    check_keys(mapping, &["delete"], "no extra keys for 'delete'", location)?;

    match payload {
        // Bare `- delete` removes the subject row.
        Value::Null => Ok(ActionStep::Delete {
            entity: None,
            condition: None,
        }),
        Value::String(raw) => {
            let (entity, rest) = leading_entity(raw).ok_or_else(|| ParseError::InvalidExpression {
                message: "expected 'Entity [WHERE condition]'".to_string(),
                location: location.to_string(),
            })?;
            let target_scope = ctx.scope_for(Some(entity), scope);
            let condition = match split_top_level_word(rest, "where") {
                Some((before, after)) if before.trim().is_empty() => {
                    Some(expr_at(after.trim(), &target_scope, location)?)
                }
                Some(_) => {
                    return Err(ParseError::InvalidExpression {
                        message: "expected 'Entity [WHERE condition]'".to_string(),
                        location: location.to_string(),
                    })
                }
                None if rest.trim().is_empty() => None,
                None => {
                    return Err(ParseError::InvalidExpression {
                        message: "expected 'Entity [WHERE condition]'".to_string(),
                        location: location.to_string(),
                    })
                }
            };
            let entity = if entity == ctx.entity {
                None
            } else {
                Some(entity.to_string())
            };
            Ok(ActionStep::Delete { entity, condition })
        }
        Value::Mapping(body) => {
            check_keys(body, &["entity", "where"], "delete keys ('entity', 'where')", location)?;
            let entity = get_str(body, "entity", location)?;
            if let Some(entity) = entity {
                if !ENTITY_NAME.is_match(entity) {
                    return Err(ParseError::InvalidIdentifier {
                        name: entity.to_string(),
                        location: location.to_string(),
                    });
                }
            }
            let target_scope = ctx.scope_for(entity, scope);
            let condition = match get_str(body, "where", location)? {
                Some(raw) => Some(expr_at(raw, &target_scope, location)?),
                None => None,
            };
            let entity = entity
                .filter(|e| *e != ctx.entity)
                .map(str::to_string);
            Ok(ActionStep::Delete { entity, condition })
        }
        other => Err(ParseError::WrongShape {
            expected: "null, string, or mapping",
            found: value_kind(other).to_string(),
            location: location.to_string(),
        }),
    }
}

fn parse_find(
    payload: &Value,
    mapping: &Mapping,
    ctx: &StepContext,
    scope: &mut ExprScope,
    location: &str,
) -> Result<ActionStep, ParseError> {
    check_keys(mapping, &["find", "bind"], "find keys ('bind')", location)?;
    let raw = payload_str(payload, location)?;

    let (entity, rest) = leading_entity(raw).ok_or_else(|| ParseError::InvalidExpression {
        message: "expected 'Entity WHERE condition'".to_string(),
        location: location.to_string(),
    })?;
    let condition = match split_top_level_word(rest, "where") {
        Some((before, after)) if before.trim().is_empty() => {
            let target_scope = ctx.scope_for(Some(entity), scope);
            expr_at(after.trim(), &target_scope, location)?
        }
        _ => {
            return Err(ParseError::MissingKey {
                key: "WHERE".to_string(),
                location: location.to_string(),
            })
        }
    };

    let bind = match get_str(mapping, "bind", location)? {
        Some(raw) => bind_var(scope, raw, &format!("{location}.bind"))?,
        None => bind_var(scope, &to_snake_case(entity), location)?,
    };

    Ok(ActionStep::Find {
        entity: entity.to_string(),
        condition,
        bind,
    })
}

// =============================================================================
// CALL & NOTIFY STEPS
// =============================================================================

fn parse_call(
    payload: &Value,
    mapping: &Mapping,
    scope: &mut ExprScope,
    location: &str,
) -> Result<ActionStep, ParseError> {
    check_keys(mapping, &["call", "store"], "call keys ('store')", location)?;
    let raw = payload_str(payload, location)?;

    let open = raw.find('(').ok_or_else(|| ParseError::InvalidCall {
        call: raw.to_string(),
        location: location.to_string(),
    })?;
    let function = raw[..open].trim();
    let after = raw[open + 1..].trim_end();
    if !QUALIFIED_FN.is_match(function) || !after.ends_with(')') {
        return Err(ParseError::InvalidCall {
            call: raw.to_string(),
            location: location.to_string(),
        });
    }
    let inner = &after[..after.len() - 1];

    let arguments = parse_named_arguments(inner, scope, raw, location)?;

    let store = match get_str(mapping, "store", location)? {
        Some(raw) => Some(assign_var(scope, raw, &format!("{location}.store"))?),
        None => None,
    };

    Ok(ActionStep::Call {
        function: function.to_string(),
        arguments,
        store,
    })
}

fn parse_call_function(
    payload: &Value,
    mapping: &Mapping,
    scope: &mut ExprScope,
    location: &str,
) -> Result<ActionStep, ParseError> {
    check_keys(mapping, &["call_function"], "no extra keys for 'call_function'", location)?;
    let body = payload.as_mapping().ok_or_else(|| ParseError::WrongShape {
        expected: "mapping with 'function'",
        found: value_kind(payload).to_string(),
        location: location.to_string(),
    })?;
    check_keys(
        body,
        &["function", "arguments", "returns"],
        "call_function keys ('function', 'arguments', 'returns')",
        location,
    )?;

    let function = require_str(body, "function", location)?;
    if !QUALIFIED_FN.is_match(function) {
        return Err(ParseError::InvalidCall {
            call: function.to_string(),
            location: location.to_string(),
        });
    }

    let mut arguments = Vec::new();
    if let Some(value) = body.get("arguments") {
        let args = value.as_mapping().ok_or_else(|| ParseError::WrongShape {
            expected: "mapping",
            found: value_kind(value).to_string(),
            location: format!("{location}.arguments"),
        })?;
        for (key, value) in args {
            let name = key.as_str().filter(|k| SNAKE_NAME.is_match(k)).ok_or_else(|| {
                ParseError::WrongShape {
                    expected: "identifier key",
                    found: value_kind(key).to_string(),
                    location: format!("{location}.arguments"),
                }
            })?;
            let raw = scalar_as_expr_str(value, &format!("{location}.arguments.{name}"))?;
            arguments.push((name.to_string(), expr_at(&raw, scope, location)?));
        }
    }

    let returns = match get_str(body, "returns", location)? {
        Some(raw) => Some(assign_var(scope, raw, &format!("{location}.returns"))?),
        None => None,
    };

    Ok(ActionStep::CallFunction {
        function: function.to_string(),
        arguments,
        returns,
    })
}

fn parse_notify(
    payload: &Value,
    mapping: &Mapping,
    scope: &ExprScope,
    location: &str,
) -> Result<ActionStep, ParseError> {
    check_keys(mapping, &["notify"], "no extra keys for 'notify'", location)?;
    let raw = payload_str(payload, location)?;

    let open = raw.find('(');
    let (recipient, inner) = match open {
        Some(open) if raw.trim_end().ends_with(')') => {
            let trimmed = raw.trim_end();
            (raw[..open].trim(), &trimmed[open + 1..trimmed.len() - 1])
        }
        _ => {
            return Err(ParseError::InvalidNotify {
                location: location.to_string(),
            })
        }
    };
    if !SNAKE_NAME.is_match(recipient) {
        return Err(ParseError::InvalidNotify {
            location: location.to_string(),
        });
    }

    let mut parts = split_top_level_commas(inner);
    if parts.is_empty() || parts[0].trim().is_empty() {
        return Err(ParseError::InvalidNotify {
            location: location.to_string(),
        });
    }
    let channel = parts.remove(0).trim().to_string();
    if !SNAKE_NAME.is_match(&channel) {
        return Err(ParseError::InvalidNotify {
            location: location.to_string(),
        });
    }

    let mut payload_exprs = Vec::with_capacity(parts.len());
    for part in parts {
        payload_exprs.push(expr_at(part.trim(), scope, location)?);
    }

    Ok(ActionStep::Notify {
        recipient: recipient.to_string(),
        channel,
        payload: payload_exprs,
    })
}

// =============================================================================
// CONTROL FLOW STEPS
// =============================================================================

fn parse_if(
    payload: &Value,
    mapping: &Mapping,
    ctx: &StepContext,
    scope: &mut ExprScope,
    location: &str,
) -> Result<ActionStep, ParseError> {
    check_keys(mapping, &["if", "then", "else"], "if keys ('then', 'else')", location)?;
    let raw = payload_str(payload, location)?;
    let condition = expr_at(raw, scope, location)?;

    let then_value = mapping.get("then").ok_or_else(|| ParseError::MissingKey {
        key: "then".to_string(),
        location: location.to_string(),
    })?;
    let then_steps = parse_step_list(then_value, ctx, scope, &format!("{location}.then"))?;
    let else_steps = match mapping.get("else") {
        Some(value) => parse_step_list(value, ctx, scope, &format!("{location}.else"))?,
        None => Vec::new(),
    };

    Ok(ActionStep::If {
        condition,
        then_steps,
        else_steps,
    })
}

fn parse_foreach(
    payload: &Value,
    mapping: &Mapping,
    ctx: &StepContext,
    scope: &mut ExprScope,
    location: &str,
) -> Result<ActionStep, ParseError> {
    check_keys(mapping, &["foreach", "do"], "foreach keys ('do')", location)?;
    let raw = payload_str(payload, location)?;

    let (var_part, rest) = split_top_level_word(raw, "in").ok_or_else(|| {
        ParseError::InvalidExpression {
            message: "expected 'var in <collection>'".to_string(),
            location: location.to_string(),
        }
    })?;
    let var = var_part.trim().trim_start_matches('$');
    if !SNAKE_NAME.is_match(var) {
        return Err(ParseError::InvalidIdentifier {
            name: var.to_string(),
            location: location.to_string(),
        });
    }

    // A capitalized head means entity rows; anything else is an expression
    // that must evaluate to a jsonb array.
    let collection = match leading_entity(rest) {
        Some((entity, tail)) => {
            let condition = match split_top_level_word(tail, "where") {
                Some((before, after)) if before.trim().is_empty() => {
                    let target_scope = ctx.scope_for(Some(entity), scope);
                    Some(expr_at(after.trim(), &target_scope, location)?)
                }
                Some(_) => {
                    return Err(ParseError::InvalidExpression {
                        message: "expected 'Entity [WHERE condition]'".to_string(),
                        location: location.to_string(),
                    })
                }
                None if tail.trim().is_empty() => None,
                None => {
                    return Err(ParseError::InvalidExpression {
                        message: "expected 'Entity [WHERE condition]'".to_string(),
                        location: location.to_string(),
                    })
                }
            };
            Collection::EntityFilter {
                entity: entity.to_string(),
                condition,
            }
        }
        None => Collection::ArrayExpression(expr_at(rest.trim(), scope, location)?),
    };

    let do_value = mapping.get("do").ok_or_else(|| ParseError::MissingKey {
        key: "do".to_string(),
        location: location.to_string(),
    })?;

    // Loop variable is visible only inside the body; declares made in the
    // body stay bound afterwards because declarations hoist.
    let var = bind_var(scope, var, location)?;
    let body = parse_step_list(do_value, ctx, scope, &format!("{location}.do"));
    scope.unbind(&var);
    let body = body?;

    Ok(ActionStep::Foreach {
        var,
        collection,
        body,
    })
}

fn parse_while(
    payload: &Value,
    mapping: &Mapping,
    ctx: &StepContext,
    scope: &mut ExprScope,
    location: &str,
) -> Result<ActionStep, ParseError> {
    check_keys(mapping, &["while", "do", "exit_when"], "while keys ('do', 'exit_when')", location)?;
    let raw = payload_str(payload, location)?;
    let condition = expr_at(raw, scope, location)?;

    let do_value = mapping.get("do").ok_or_else(|| ParseError::MissingKey {
        key: "do".to_string(),
        location: location.to_string(),
    })?;
    let body = parse_step_list(do_value, ctx, scope, &format!("{location}.do"))?;

    // exit_when runs after the body, so it sees the body's bindings.
    let exit_when = match get_str(mapping, "exit_when", location)? {
        Some(raw) => Some(expr_at(raw, scope, &format!("{location}.exit_when"))?),
        None => None,
    };

    Ok(ActionStep::While {
        condition,
        body,
        exit_when,
    })
}

fn parse_switch(
    payload: &Value,
    mapping: &Mapping,
    ctx: &StepContext,
    scope: &mut ExprScope,
    location: &str,
) -> Result<ActionStep, ParseError> {
    check_keys(mapping, &["switch", "cases", "default"], "switch keys ('cases', 'default')", location)?;
    let raw = payload_str(payload, location)?;
    let subject = expr_at(raw, scope, location)?;

    let cases_value = mapping.get("cases").ok_or_else(|| ParseError::MissingKey {
        key: "cases".to_string(),
        location: location.to_string(),
    })?;
    let cases_seq = cases_value
        .as_sequence()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ParseError::WrongShape {
            expected: "non-empty sequence",
            found: value_kind(cases_value).to_string(),
            location: format!("{location}.cases"),
        })?;

    let mut cases = Vec::with_capacity(cases_seq.len());
    for (index, item) in cases_seq.iter().enumerate() {
        let case_location = format!("{location}.cases[{index}]");
        let body = item.as_mapping().ok_or_else(|| ParseError::WrongShape {
            expected: "mapping with 'when' and 'then'",
            found: value_kind(item).to_string(),
            location: case_location.clone(),
        })?;
        check_keys(body, &["when", "then"], "case keys ('when', 'then')", &case_location)?;

        let when_value = body.get("when").ok_or_else(|| ParseError::MissingKey {
            key: "when".to_string(),
            location: case_location.clone(),
        })?;
        let when_raw = scalar_as_expr_str(when_value, &case_location)?;
        let value = expr_at(&when_raw, scope, &case_location)?;

        let then_value = body.get("then").ok_or_else(|| ParseError::MissingKey {
            key: "then".to_string(),
            location: case_location.clone(),
        })?;
        let steps = parse_step_list(then_value, ctx, scope, &format!("{case_location}.then"))?;
        cases.push(SwitchCase { value, steps });
    }

    let default = match mapping.get("default") {
        Some(value) => parse_step_list(value, ctx, scope, &format!("{location}.default"))?,
        None => Vec::new(),
    };

    Ok(ActionStep::Switch {
        subject,
        cases,
        default,
    })
}

fn parse_exception(
    payload: &Value,
    mapping: &Mapping,
    ctx: &StepContext,
    scope: &mut ExprScope,
    location: &str,
) -> Result<ActionStep, ParseError> {
    check_keys(mapping, &["exception_handling"], "no extra keys for 'exception_handling'", location)?;
    let body = payload.as_mapping().ok_or_else(|| ParseError::WrongShape {
        expected: "mapping with 'try'",
        found: value_kind(payload).to_string(),
        location: location.to_string(),
    })?;
    check_keys(body, &["try", "catch", "finally"], "exception_handling keys ('try', 'catch', 'finally')", location)?;

    let try_value = body.get("try").ok_or_else(|| ParseError::MissingKey {
        key: "try".to_string(),
        location: location.to_string(),
    })?;
    let try_steps = parse_step_list(try_value, ctx, scope, &format!("{location}.try"))?;

    let mut handlers = Vec::new();
    if let Some(catch_value) = body.get("catch") {
        let catch_seq = catch_value
            .as_sequence()
            .ok_or_else(|| ParseError::WrongShape {
                expected: "sequence",
                found: value_kind(catch_value).to_string(),
                location: format!("{location}.catch"),
            })?;
        for (index, item) in catch_seq.iter().enumerate() {
            let handler_location = format!("{location}.catch[{index}]");
            let handler = item.as_mapping().ok_or_else(|| ParseError::WrongShape {
                expected: "mapping with 'error' and 'steps'",
                found: value_kind(item).to_string(),
                location: handler_location.clone(),
            })?;
            check_keys(handler, &["error", "steps"], "catch keys ('error', 'steps')", &handler_location)?;

            let kind_str = require_str(handler, "error", &handler_location)?;
            let kind = RuntimeErrorKind::parse(kind_str).ok_or_else(|| {
                ParseError::UnknownErrorKind {
                    kind: kind_str.to_string(),
                    location: handler_location.clone(),
                }
            })?;
            if handlers
                .iter()
                .any(|h: &CatchHandler| h.kind == RuntimeErrorKind::Others)
            {
                return Err(ParseError::OthersNotLast {
                    location: handler_location,
                });
            }

            let steps_value = handler.get("steps").ok_or_else(|| ParseError::MissingKey {
                key: "steps".to_string(),
                location: handler_location.clone(),
            })?;
            let steps =
                parse_step_list(steps_value, ctx, scope, &format!("{handler_location}.steps"))?;
            handlers.push(CatchHandler { kind, steps });
        }
    }

    let finally_steps = match body.get("finally") {
        Some(value) => parse_step_list(value, ctx, scope, &format!("{location}.finally"))?,
        None => Vec::new(),
    };

    if handlers.is_empty() && finally_steps.is_empty() {
        return Err(ParseError::MissingKey {
            key: "catch".to_string(),
            location: location.to_string(),
        });
    }

    Ok(ActionStep::ExceptionHandling {
        try_steps,
        handlers,
        finally_steps,
    })
}

fn parse_for_query(
    payload: &Value,
    mapping: &Mapping,
    ctx: &StepContext,
    scope: &mut ExprScope,
    location: &str,
) -> Result<ActionStep, ParseError> {
    check_keys(mapping, &["for_query", "as", "do"], "for_query keys ('as', 'do')", location)?;
    let query = payload_str(payload, location)?;

    if !is_read_only_query(query) {
        return Err(ParseError::NotReadOnlyQuery {
            location: location.to_string(),
        });
    }

    let bind_raw = get_str(mapping, "as", location)?.ok_or_else(|| ParseError::MissingKey {
        key: "as".to_string(),
        location: location.to_string(),
    })?;

    let do_value = mapping.get("do").ok_or_else(|| ParseError::MissingKey {
        key: "do".to_string(),
        location: location.to_string(),
    })?;

    let bind = bind_var(scope, bind_raw, &format!("{location}.as"))?;
    let body = parse_step_list(do_value, ctx, scope, &format!("{location}.do"));
    scope.unbind(&bind);
    let body = body?;

    Ok(ActionStep::ForQuery {
        query: query.trim().to_string(),
        bind,
        body,
    })
}

/// Read-only check for `for_query` sources: must start with SELECT or WITH,
/// and quoted literals aside, no statement separator or write keyword may
/// appear anywhere.
fn is_read_only_query(query: &str) -> bool {
    let stripped = strip_quoted(query);
    if stripped.contains(';') || stripped.contains("--") || stripped.contains("/*") {
        return false;
    }
    let trimmed = stripped.trim_start();
    let head_ok = ["select ", "select\t", "with "]
        .iter()
        .any(|head| {
            trimmed
                .get(..head.len())
                .map(|t| t.eq_ignore_ascii_case(head))
                .unwrap_or(false)
        });
    head_ok && !WRITE_KEYWORD.is_match(&stripped)
}

// =============================================================================
// SHARED HELPERS
// =============================================================================

fn parse_step_list(
    value: &Value,
    ctx: &StepContext,
    scope: &mut ExprScope,
    location: &str,
) -> Result<Vec<ActionStep>, ParseError> {
    let sequence = value.as_sequence().ok_or_else(|| ParseError::WrongShape {
        expected: "sequence",
        found: value_kind(value).to_string(),
        location: location.to_string(),
    })?;
    parse_steps(sequence, ctx, scope, location)
}

/// `{field: expression}` mapping shared by insert values and update set.
fn parse_value_map(
    value: &Value,
    scope: &ExprScope,
    location: &str,
) -> Result<Vec<Assignment>, ParseError> {
    let mapping = value.as_mapping().ok_or_else(|| ParseError::WrongShape {
        expected: "mapping",
        found: value_kind(value).to_string(),
        location: location.to_string(),
    })?;

    let mut assignments = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let field = key.as_str().filter(|k| SNAKE_NAME.is_match(k)).ok_or_else(|| {
            ParseError::WrongShape {
                expected: "field name key",
                found: value_kind(key).to_string(),
                location: location.to_string(),
            }
        })?;
        if is_reserved_column(field) {
            return Err(ParseError::ReservedField {
                field: field.to_string(),
            });
        }
        let raw = scalar_as_expr_str(value, &format!("{location}.{field}"))?;
        assignments.push(Assignment {
            field: field.to_string(),
            value: expr_at(&raw, scope, location)?,
        });
    }
    Ok(assignments)
}

/// `field = expr, field = expr` list from an update string form.
fn parse_assignments(
    text: &str,
    scope: &ExprScope,
    location: &str,
) -> Result<Vec<Assignment>, ParseError> {
    let parts = split_top_level_commas(text);
    let mut assignments = Vec::with_capacity(parts.len());
    for part in parts {
        let (field, raw) = part.split_once('=').ok_or_else(|| ParseError::InvalidExpression {
            message: format!("expected 'field = expression', got '{}'", part.trim()),
            location: location.to_string(),
        })?;
        let field = field.trim();
        if !SNAKE_NAME.is_match(field) {
            return Err(ParseError::InvalidIdentifier {
                name: field.to_string(),
                location: location.to_string(),
            });
        }
        if is_reserved_column(field) {
            return Err(ParseError::ReservedField {
                field: field.to_string(),
            });
        }
        assignments.push(Assignment {
            field: field.to_string(),
            value: expr_at(raw.trim(), scope, location)?,
        });
    }
    if assignments.is_empty() {
        return Err(ParseError::InvalidExpression {
            message: "empty SET clause".to_string(),
            location: location.to_string(),
        });
    }
    Ok(assignments)
}

/// `name = expr, ...` argument list of a call string form.
fn parse_named_arguments(
    inner: &str,
    scope: &ExprScope,
    call: &str,
    location: &str,
) -> Result<Vec<(String, Expression)>, ParseError> {
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut arguments = Vec::new();
    for part in split_top_level_commas(inner) {
        let (name, raw) = part.split_once('=').ok_or_else(|| ParseError::InvalidCall {
            call: call.to_string(),
            location: location.to_string(),
        })?;
        let name = name.trim();
        if !SNAKE_NAME.is_match(name) {
            return Err(ParseError::InvalidCall {
                call: call.to_string(),
                location: location.to_string(),
            });
        }
        arguments.push((name.to_string(), expr_at(raw.trim(), scope, location)?));
    }
    Ok(arguments)
}

fn expr_at(raw: &str, scope: &ExprScope, location: &str) -> Result<Expression, ParseError> {
    parse_expression(raw, scope).map_err(|err| match err {
        ExprError::Syntax(message) => ParseError::InvalidExpression {
            message,
            location: location.to_string(),
        },
        ExprError::UnknownField(name) => ParseError::UnknownFieldReference {
            name,
            expression: raw.to_string(),
            location: location.to_string(),
        },
        ExprError::UnknownVariable(name) => ParseError::UnknownVariableReference {
            name,
            location: location.to_string(),
        },
        ExprError::UnknownFunction(name) => ParseError::DisallowedConstruct {
            construct: format!("function '{name}'"),
            location: location.to_string(),
        },
        ExprError::Disallowed(construct) => ParseError::DisallowedConstruct {
            construct,
            location: location.to_string(),
        },
    })
}

fn bind_var(scope: &mut ExprScope, raw: &str, location: &str) -> Result<String, ParseError> {
    let name = var_name(raw, location)?;
    if scope.has_variable(&name) {
        return Err(ParseError::DuplicateVariable {
            name,
            location: location.to_string(),
        });
    }
    scope.bind(&name);
    Ok(name)
}

/// Like `bind_var`, but an existing binding is an assignment target rather
/// than an error. Used by call store/returns so a result can land in a
/// variable the action declared with an explicit type.
fn assign_var(scope: &mut ExprScope, raw: &str, location: &str) -> Result<String, ParseError> {
    let name = var_name(raw, location)?;
    scope.bind(&name);
    Ok(name)
}

fn var_name(raw: &str, location: &str) -> Result<String, ParseError> {
    let name = raw.trim().trim_start_matches('$');
    if !SNAKE_NAME.is_match(name) || is_reserved_word(name) {
        return Err(ParseError::InvalidIdentifier {
            name: name.to_string(),
            location: location.to_string(),
        });
    }
    Ok(name.to_string())
}

/// Leading `Entity` token of an update/delete/find/foreach target.
fn leading_entity(text: &str) -> Option<(&str, &str)> {
    let trimmed = text.trim_start();
    let end = trimmed
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(trimmed.len());
    let (head, rest) = trimmed.split_at(end);
    if ENTITY_NAME.is_match(head) {
        Some((head, rest))
    } else {
        None
    }
}

/// First top-level occurrence of `word` outside quotes and parentheses,
/// case-insensitive and word-bounded. Returns the text before and after.
fn split_top_level_word<'a>(input: &'a str, word: &str) -> Option<(&'a str, &'a str)> {
    let bytes = input.as_bytes();
    let wlen = word.len();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'\'' | b'"' => {
                quote = Some(c);
                i += 1;
            }
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth -= 1;
                i += 1;
            }
            _ => {
                if depth == 0
                    && i + wlen <= bytes.len()
                    && input[i..i + wlen].eq_ignore_ascii_case(word)
                    && (i == 0 || !is_word_byte(bytes[i - 1]))
                    && (i + wlen == bytes.len() || !is_word_byte(bytes[i + wlen]))
                {
                    return Some((&input[..i], &input[i + wlen..]));
                }
                i += 1;
            }
        }
    }
    None
}

fn split_top_level_commas(input: &str) -> Vec<&str> {
    let bytes = input.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    for (i, &c) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            b'\'' | b'"' => quote = Some(c),
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = &input[start..];
    if !tail.trim().is_empty() || !parts.is_empty() {
        parts.push(tail);
    }
    parts.retain(|p| !p.trim().is_empty());
    parts
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn payload_str<'a>(payload: &'a Value, location: &str) -> Result<&'a str, ParseError> {
    payload.as_str().ok_or_else(|| ParseError::WrongShape {
        expected: "string",
        found: value_kind(payload).to_string(),
        location: location.to_string(),
    })
}

/// Scalars in expression position: strings verbatim, numbers and booleans
/// through their YAML spelling.
fn scalar_as_expr_str(value: &Value, location: &str) -> Result<String, ParseError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(ParseError::WrongShape {
            expected: "expression string",
            found: value_kind(other).to_string(),
            location: location.to_string(),
        }),
    }
}

fn check_keys(
    mapping: &Mapping,
    allowed: &[&str],
    expected: &'static str,
    location: &str,
) -> Result<(), ParseError> {
    for key in mapping.keys() {
        let name = key.as_str().unwrap_or("?");
        if !allowed.contains(&name) {
            return Err(ParseError::WrongShape {
                expected,
                found: format!("key '{name}'"),
                location: location.to_string(),
            });
        }
    }
    Ok(())
}

fn get_str<'a>(
    mapping: &'a Mapping,
    key: &str,
    location: &str,
) -> Result<Option<&'a str>, ParseError> {
    match mapping.get(key) {
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or_else(|| ParseError::WrongShape {
                expected: "string",
                found: value_kind(value).to_string(),
                location: format!("{location}.{key}"),
            }),
        None => Ok(None),
    }
}

fn require_str<'a>(
    mapping: &'a Mapping,
    key: &str,
    location: &str,
) -> Result<&'a str, ParseError> {
    get_str(mapping, key, location)?.ok_or_else(|| ParseError::MissingKey {
        key: key.to_string(),
        location: location.to_string(),
    })
}

fn get_bool(mapping: &Mapping, key: &str, location: &str) -> Result<Option<bool>, ParseError> {
    match mapping.get(key) {
        Some(value) => value
            .as_bool()
            .map(Some)
            .ok_or_else(|| ParseError::WrongShape {
                expected: "boolean",
                found: value_kind(value).to_string(),
                location: format!("{location}.{key}"),
            }),
        None => Ok(None),
    }
}
