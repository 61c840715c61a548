//! Field declaration grammar
//!
//! A field is declared either as a compact spec string:
//!
//! ```yaml
//! email: email!
//! status: enum(lead, qualified, customer) = lead
//! tags: list(text)
//! company: ref(Company)
//! owner: ref(Person | Company)
//! ```
//!
//! or as a mapping with explicit keys (`type`, `required`, `unique`,
//! `default`, `pattern`, `description`). Both forms produce the same
//! `FieldDefinition`. The `!` suffix marks a field required; `unique`
//! adds a uniqueness constraint; `= value` sets the column default.

use nom::{
    bytes::complete::{take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{all_consuming, opt, recognize, rest, verify},
    error::VerboseError,
    multi::separated_list1,
    sequence::{delimited, pair, preceded, terminated},
    Finish, IResult,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::Value;

use crate::ast::{FieldDefinition, FieldType, RefTarget};
use crate::error::{value_kind, ParseError};
use crate::reserved::{is_reserved_column, is_reserved_word};
use crate::types::{is_basic_type, is_composite_type, is_scalar_type};

type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

static FIELD_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").unwrap());

// =============================================================================
// PUBLIC API
// =============================================================================

/// Parse one `name: spec` field declaration.
pub fn parse_field(name: &str, spec: &Value, location: &str) -> Result<FieldDefinition, ParseError> {
    if !FIELD_NAME.is_match(name) {
        return Err(ParseError::InvalidIdentifier {
            name: name.to_string(),
            location: location.to_string(),
        });
    }
    if is_reserved_column(name) || is_reserved_word(name) {
        return Err(ParseError::ReservedField {
            field: name.to_string(),
        });
    }

    let field = match spec {
        Value::String(s) => from_spec_string(name, s)?,
        Value::Mapping(mapping) => from_mapping(name, mapping, location)?,
        other => {
            return Err(ParseError::WrongShape {
                expected: "string or mapping",
                found: value_kind(other).to_string(),
                location: location.to_string(),
            })
        }
    };

    validate_field(&field)?;
    Ok(field)
}

// =============================================================================
// SPEC STRING FORM
// =============================================================================

#[derive(Debug)]
struct ParsedSpec {
    field_type: FieldType,
    required: bool,
    unique: bool,
    default: Option<String>,
}

fn from_spec_string(name: &str, spec: &str) -> Result<FieldDefinition, ParseError> {
    let parsed = parse_spec(spec).map_err(|reason| ParseError::InvalidFieldSpec {
        field: name.to_string(),
        spec: spec.to_string(),
        reason,
    })?;
    let field_type = classify(parsed.field_type, name)?;
    Ok(FieldDefinition {
        name: name.to_string(),
        field_type,
        required: parsed.required,
        unique: parsed.unique,
        default: parsed.default,
        pattern: None,
        description: String::new(),
    })
}

fn parse_spec(spec: &str) -> Result<ParsedSpec, String> {
    let (_, parsed) = all_consuming(terminated(spec_body, multispace0))(spec)
        .finish()
        .map_err(|_| "unparseable type expression".to_string())?;
    Ok(parsed)
}

fn spec_body(input: &str) -> PResult<ParsedSpec> {
    let (input, field_type) = type_expr(input)?;
    let (input, required) = opt(ws(char('!')))(input)?;
    let (input, unique) = opt(verify(ident, |s: &str| s == "unique"))(input)?;
    let (input, default) = opt(preceded(ws(char('=')), rest))(input)?;
    Ok((
        input,
        ParsedSpec {
            field_type,
            required: required.is_some(),
            unique: unique.is_some(),
            default: default.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
        },
    ))
}

/// `enum(...)`, `list(...)`, `ref(...)`, or a bare type name. Bare names
/// come back as `Basic` and are classified against the registries after
/// the grammar succeeds.
fn type_expr(input: &str) -> PResult<FieldType> {
    let (rest, name) = type_name(input)?;
    match name {
        "enum" => {
            let (rest, variants) = paren_list(ident)(rest)?;
            Ok((
                rest,
                FieldType::Enum(variants.into_iter().map(str::to_string).collect()),
            ))
        }
        "list" => {
            let (rest, elem) = delimited(ws(char('(')), type_expr, ws(char(')')))(rest)?;
            Ok((rest, FieldType::List(Box::new(elem))))
        }
        "ref" => {
            let (rest, targets) = delimited(
                ws(char('(')),
                separated_list1(ws(char('|')), ref_target),
                ws(char(')')),
            )(rest)?;
            Ok((rest, FieldType::Reference(targets)))
        }
        _ => Ok((rest, FieldType::Basic(name.to_string()))),
    }
}

fn ref_target(input: &str) -> PResult<RefTarget> {
    let (input, first) = type_name(input)?;
    let (input, second) = opt(preceded(ws(char('.')), type_name))(input)?;
    let target = match second {
        Some(entity) => RefTarget {
            schema: Some(first.to_string()),
            entity: entity.to_string(),
        },
        None => RefTarget {
            schema: None,
            entity: first.to_string(),
        },
    };
    Ok((input, target))
}

fn classify(field_type: FieldType, field: &str) -> Result<FieldType, ParseError> {
    match field_type {
        FieldType::Basic(name) => {
            if is_basic_type(&name) {
                Ok(FieldType::Basic(name))
            } else if is_scalar_type(&name) {
                Ok(FieldType::Scalar(name))
            } else if is_composite_type(&name) {
                Ok(FieldType::Composite(name))
            } else {
                Err(ParseError::UnknownType {
                    type_name: name,
                    field: field.to_string(),
                })
            }
        }
        FieldType::List(elem) => Ok(FieldType::List(Box::new(classify(*elem, field)?))),
        other => Ok(other),
    }
}

// =============================================================================
// MAPPING FORM
// =============================================================================

fn from_mapping(
    name: &str,
    mapping: &serde_yaml::Mapping,
    location: &str,
) -> Result<FieldDefinition, ParseError> {
    for key in mapping.keys() {
        let key = key.as_str().unwrap_or_default();
        if !matches!(
            key,
            "type" | "required" | "unique" | "default" | "pattern" | "description"
        ) {
            return Err(ParseError::InvalidFieldSpec {
                field: name.to_string(),
                spec: "<mapping>".to_string(),
                reason: format!("unknown key '{key}'"),
            });
        }
    }

    let type_spec = mapping
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ParseError::MissingKey {
            key: "type".to_string(),
            location: location.to_string(),
        })?;

    let mut field = from_spec_string(name, type_spec)?;

    if let Some(required) = mapping.get("required") {
        field.required = required.as_bool().ok_or_else(|| ParseError::WrongShape {
            expected: "boolean",
            found: value_kind(required).to_string(),
            location: format!("{location}.required"),
        })?;
    }
    if let Some(unique) = mapping.get("unique") {
        field.unique = unique.as_bool().ok_or_else(|| ParseError::WrongShape {
            expected: "boolean",
            found: value_kind(unique).to_string(),
            location: format!("{location}.unique"),
        })?;
    }
    if let Some(default) = mapping.get("default") {
        field.default = Some(scalar_to_string(default, &format!("{location}.default"))?);
    }
    if let Some(pattern) = mapping.get("pattern") {
        let pattern = pattern.as_str().ok_or_else(|| ParseError::WrongShape {
            expected: "string",
            found: value_kind(pattern).to_string(),
            location: format!("{location}.pattern"),
        })?;
        Regex::new(pattern).map_err(|e| ParseError::InvalidFieldSpec {
            field: name.to_string(),
            spec: pattern.to_string(),
            reason: format!("invalid pattern: {e}"),
        })?;
        field.pattern = Some(pattern.to_string());
    }
    if let Some(description) = mapping.get("description") {
        field.description = description
            .as_str()
            .ok_or_else(|| ParseError::WrongShape {
                expected: "string",
                found: value_kind(description).to_string(),
                location: format!("{location}.description"),
            })?
            .to_string();
    }

    Ok(field)
}

fn scalar_to_string(value: &Value, location: &str) -> Result<String, ParseError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(ParseError::WrongShape {
            expected: "scalar",
            found: value_kind(other).to_string(),
            location: location.to_string(),
        }),
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

fn validate_field(field: &FieldDefinition) -> Result<(), ParseError> {
    if let FieldType::List(elem) = &field.field_type {
        match elem.as_ref() {
            FieldType::List(_) => {
                return Err(ParseError::InvalidFieldSpec {
                    field: field.name.clone(),
                    spec: "list(list(...))".to_string(),
                    reason: "nested lists are not supported".to_string(),
                })
            }
            FieldType::Reference(_) => {
                return Err(ParseError::InvalidFieldSpec {
                    field: field.name.clone(),
                    spec: "list(ref(...))".to_string(),
                    reason: "lists of references are not supported".to_string(),
                })
            }
            _ => {}
        }
    }

    if let (FieldType::Enum(variants), Some(default)) = (&field.field_type, &field.default) {
        let bare = default.trim_matches('\'');
        if !variants.iter().any(|v| v == bare) {
            return Err(ParseError::InvalidFieldSpec {
                field: field.name.clone(),
                spec: format!("enum default '{default}'"),
                reason: format!("'{bare}' is not one of the declared variants"),
            });
        }
    }

    Ok(())
}

// =============================================================================
// LEXING
// =============================================================================

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    F: FnMut(&'a str) -> PResult<'a, O>,
{
    preceded(multispace0, inner)
}

fn ident(input: &str) -> PResult<&str> {
    ws(recognize(pair(
        take_while1(|c: char| c.is_ascii_lowercase() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    )))(input)
}

/// Type position also admits CamelCase (composites, ref targets).
fn type_name(input: &str) -> PResult<&str> {
    ws(recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    )))(input)
}

fn paren_list<'a, F>(item: F) -> impl FnMut(&'a str) -> PResult<'a, Vec<&'a str>>
where
    F: FnMut(&'a str) -> PResult<'a, &'a str>,
{
    delimited(
        ws(char('(')),
        separated_list1(ws(char(',')), item),
        ws(char(')')),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(name: &str, spec: &str) -> FieldDefinition {
        parse_field(name, &Value::from(spec), &format!("fields.{name}")).unwrap()
    }

    fn parse_err(name: &str, spec: &str) -> ParseError {
        parse_field(name, &Value::from(spec), &format!("fields.{name}")).unwrap_err()
    }

    #[test]
    fn test_required_scalar() {
        let field = parse("email", "email!");
        assert_eq!(field.field_type, FieldType::Scalar("email".to_string()));
        assert!(field.required);
        assert!(!field.unique);
        assert_eq!(field.default, None);
    }

    #[test]
    fn test_basic_with_unique_and_default() {
        let field = parse("code", "text! unique = 'unset'");
        assert_eq!(field.field_type, FieldType::Basic("text".to_string()));
        assert!(field.required);
        assert!(field.unique);
        assert_eq!(field.default.as_deref(), Some("'unset'"));
    }

    #[test]
    fn test_enum_with_default() {
        let field = parse("status", "enum(lead, qualified, customer) = lead");
        assert_eq!(
            field.field_type,
            FieldType::Enum(vec![
                "lead".to_string(),
                "qualified".to_string(),
                "customer".to_string()
            ])
        );
        assert_eq!(field.default.as_deref(), Some("lead"));
    }

    #[test]
    fn test_enum_default_must_be_member() {
        let err = parse_err("status", "enum(lead, qualified) = customer");
        assert!(matches!(err, ParseError::InvalidFieldSpec { .. }));
    }

    #[test]
    fn test_list_of_scalar() {
        let field = parse("tags", "list(text)");
        assert_eq!(
            field.field_type,
            FieldType::List(Box::new(FieldType::Basic("text".to_string())))
        );
        let field = parse("emails", "list(email)");
        assert_eq!(
            field.field_type,
            FieldType::List(Box::new(FieldType::Scalar("email".to_string())))
        );
    }

    #[test]
    fn test_nested_list_rejected() {
        let err = parse_err("matrix", "list(list(text))");
        assert!(matches!(err, ParseError::InvalidFieldSpec { .. }));
    }

    #[test]
    fn test_reference_forms() {
        let field = parse("company", "ref(Company)");
        assert_eq!(
            field.field_type,
            FieldType::Reference(vec![RefTarget {
                schema: None,
                entity: "Company".to_string()
            }])
        );

        let field = parse("org", "ref(management.Organization)!");
        assert_eq!(
            field.field_type,
            FieldType::Reference(vec![RefTarget {
                schema: Some("management".to_string()),
                entity: "Organization".to_string()
            }])
        );
        assert!(field.required);

        let field = parse("owner", "ref(Person | Company)");
        assert!(field.field_type.is_polymorphic());
    }

    #[test]
    fn test_composite_type() {
        let field = parse("address", "SimpleAddress");
        assert_eq!(
            field.field_type,
            FieldType::Composite("SimpleAddress".to_string())
        );
    }

    #[test]
    fn test_unknown_type() {
        let err = parse_err("x", "varchar2");
        assert_eq!(
            err,
            ParseError::UnknownType {
                type_name: "varchar2".to_string(),
                field: "x".to_string()
            }
        );
    }

    #[test]
    fn test_reserved_names_rejected() {
        assert!(matches!(
            parse_err("tenant_id", "uuid"),
            ParseError::ReservedField { .. }
        ));
        assert!(matches!(
            parse_err("deleted_at", "timestamp"),
            ParseError::ReservedField { .. }
        ));
        assert!(matches!(
            parse_err("select", "text"),
            ParseError::ReservedField { .. } | ParseError::InvalidIdentifier { .. }
        ));
    }

    #[test]
    fn test_invalid_field_name() {
        assert!(matches!(
            parse_err("CamelField", "text"),
            ParseError::InvalidIdentifier { .. }
        ));
        assert!(matches!(
            parse_err("9lives", "text"),
            ParseError::InvalidIdentifier { .. }
        ));
    }

    #[test]
    fn test_mapping_form() {
        let yaml = r#"
type: email
required: true
unique: true
pattern: "^[a-z]+@corp\\.example$"
description: Corporate address
"#;
        let spec: Value = serde_yaml::from_str(yaml).unwrap();
        let field = parse_field("email", &spec, "fields.email").unwrap();
        assert_eq!(field.field_type, FieldType::Scalar("email".to_string()));
        assert!(field.required);
        assert!(field.unique);
        assert_eq!(field.pattern.as_deref(), Some("^[a-z]+@corp\\.example$"));
        assert_eq!(field.description, "Corporate address");
    }

    #[test]
    fn test_mapping_rejects_unknown_key() {
        let spec: Value = serde_yaml::from_str("{type: text, nullable: true}").unwrap();
        let err = parse_field("note", &spec, "fields.note").unwrap_err();
        assert!(matches!(err, ParseError::InvalidFieldSpec { .. }));
    }

    #[test]
    fn test_mapping_rejects_bad_pattern() {
        let spec: Value = serde_yaml::from_str("{type: text, pattern: '(unclosed'}").unwrap();
        let err = parse_field("note", &spec, "fields.note").unwrap_err();
        assert!(matches!(err, ParseError::InvalidFieldSpec { .. }));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let err = parse_err("email", "email! garbage");
        assert!(matches!(err, ParseError::InvalidFieldSpec { .. }));
    }
}
