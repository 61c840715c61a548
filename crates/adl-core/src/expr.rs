//! Expression analyzer
//!
//! Conditions and value expressions (`status = 'lead'`,
//! `total > 100 AND region IN ('EU', 'UK')`) are parsed once into a typed
//! node tree. Quoted text becomes literal nodes, so a value like `'lead'`
//! can never be mistaken for a field reference. Every bare identifier is
//! resolved against the entity's fields and the action's bound variables
//! at parse time; the compiler later renders the resolved tree to SQL
//! without re-scanning any text.
//!
//! `$name` is an explicit variable reference. Dotted paths reach into row
//! variables (`item.price`) or the input payload (`input_data.email`).

use std::collections::{BTreeSet, HashSet};

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0, none_of},
    combinator::{all_consuming, map, opt, recognize, verify},
    error::{convert_error, VerboseError},
    multi::{fold_many0, many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    Finish, IResult,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reserved::is_reserved_column;

type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// Grammar keywords that can never be identifiers.
const KEYWORDS: &[&str] = &[
    "and", "or", "not", "is", "null", "true", "false", "in", "like", "ilike",
    "between", "matches",
];

/// Functions allowed inside expressions. Anything else is rejected.
static SAFE_FUNCTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "upper", "lower", "trim", "length", "coalesce", "nullif", "now",
        "current_date", "current_time", "extract", "substring", "position",
        "concat", "abs", "round", "greatest", "least", "date_trunc",
    ]
    .into_iter()
    .collect()
});

// =============================================================================
// NODE TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn sql(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

/// How a dotted path's head name resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathKind {
    /// Entity field or implicit row column.
    Field,
    /// Action-scoped variable (declare/find/foreach/store binding, or `$x`).
    Variable,
    /// Member of the action's input payload (`input_data.x`).
    Input,
    /// Ambient auth parameter (`auth_user_id`, `auth_tenant_id`).
    Auth,
    /// Not yet resolved; only exists between parse and resolve.
    Unresolved,
}

/// A (possibly dotted) name reference: `status`, `item.price`,
/// `input_data.email`, `$total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRef {
    pub kind: PathKind,
    /// Head name plus any member segments, in order.
    pub segments: Vec<String>,
}

impl PathRef {
    pub fn head(&self) -> &str {
        &self.segments[0]
    }

    pub fn members(&self) -> &[String] {
        &self.segments[1..]
    }
}

/// One node of the typed expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprNode {
    String(String),
    Number(String),
    Bool(bool),
    Null,
    Path(PathRef),
    Unary {
        op: UnaryOp,
        operand: Box<ExprNode>,
    },
    Binary {
        op: BinaryOp,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Function {
        name: String,
        args: Vec<ExprNode>,
    },
    Like {
        subject: Box<ExprNode>,
        pattern: Box<ExprNode>,
        case_insensitive: bool,
        negated: bool,
    },
    /// `matches` regex test, rendered as the `~` operator.
    Matches {
        subject: Box<ExprNode>,
        pattern: Box<ExprNode>,
    },
    InList {
        subject: Box<ExprNode>,
        items: Vec<ExprNode>,
        negated: bool,
    },
    IsNull {
        subject: Box<ExprNode>,
        negated: bool,
    },
    Between {
        subject: Box<ExprNode>,
        low: Box<ExprNode>,
        high: Box<ExprNode>,
    },
}

/// A fully analyzed expression: raw text, typed tree, and the names it
/// references, computed once and never re-derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    pub raw: String,
    pub root: ExprNode,
    /// Entity fields (and implicit row columns) the expression reads.
    pub field_refs: BTreeSet<String>,
    /// Action-scoped variables the expression reads.
    pub variable_refs: BTreeSet<String>,
    /// Members of `input_data` the expression reads.
    pub input_refs: BTreeSet<String>,
}

/// Names visible to an expression at its position in the action.
#[derive(Debug, Clone, Default)]
pub struct ExprScope {
    fields: HashSet<String>,
    variables: HashSet<String>,
    deferred: bool,
}

impl ExprScope {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExprScope {
            fields: fields.into_iter().map(Into::into).collect(),
            variables: HashSet::new(),
            deferred: false,
        }
    }

    /// Same variable bindings, but unknown names resolve as field references
    /// instead of erroring. Used for conditions evaluated against another
    /// entity, whose columns are checked against the catalog at compile time
    /// via `Expression::field_refs`.
    pub fn defer_fields(&self) -> ExprScope {
        ExprScope {
            deferred: true,
            ..self.clone()
        }
    }

    /// Bind a variable introduced by declare/find/foreach/store.
    pub fn bind(&mut self, name: &str) {
        self.variables.insert(name.to_string());
    }

    /// Remove a loop-scoped binding once its body has been parsed.
    pub fn unbind(&mut self, name: &str) {
        self.variables.remove(name);
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains(name)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains(name)
    }

    pub fn defers_fields(&self) -> bool {
        self.deferred
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("unknown variable '${0}'")]
    UnknownVariable(String),

    #[error("function '{0}' is not allowed in expressions")]
    UnknownFunction(String),

    #[error("disallowed construct: {0}")]
    Disallowed(String),
}

// =============================================================================
// ENTRY POINT
// =============================================================================

/// Parse and resolve one expression against the given scope.
pub fn parse_expression(raw: &str, scope: &ExprScope) -> Result<Expression, ExprError> {
    check_dangerous(raw)?;

    let (_, tree) = all_consuming(terminated(expression, multispace0))(raw)
        .finish()
        .map_err(|e| ExprError::Syntax(convert_error(raw, e)))?;

    let mut refs = Refs::default();
    let root = resolve(tree, scope, &mut refs)?;

    Ok(Expression {
        raw: raw.to_string(),
        root,
        field_refs: refs.fields,
        variable_refs: refs.variables,
        input_refs: refs.inputs,
    })
}

/// Replace quoted spans with empty strings so structural scans never see
/// literal content.
pub fn strip_quoted(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\'' || c == '"' {
            let quote = c;
            for inner in chars.by_ref() {
                if inner == quote {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn check_dangerous(raw: &str) -> Result<(), ExprError> {
    if raw.contains('\0') || raw.contains('\\') {
        return Err(ExprError::Disallowed("control or escape character".into()));
    }
    let stripped = strip_quoted(raw);
    for marker in [";", "--", "/*", "*/"] {
        if stripped.contains(marker) {
            return Err(ExprError::Disallowed(format!("'{marker}' outside a quoted literal")));
        }
    }
    Ok(())
}

// =============================================================================
// RESOLUTION
// =============================================================================

#[derive(Default)]
struct Refs {
    fields: BTreeSet<String>,
    variables: BTreeSet<String>,
    inputs: BTreeSet<String>,
}

fn resolve(node: ExprNode, scope: &ExprScope, refs: &mut Refs) -> Result<ExprNode, ExprError> {
    match node {
        ExprNode::Path(path) => {
            let head = path.head().to_string();
            let kind = match path.kind {
                // `$name` already marked Variable by the grammar.
                PathKind::Variable => {
                    if !scope.has_variable(&head) {
                        return Err(ExprError::UnknownVariable(head));
                    }
                    PathKind::Variable
                }
                _ => {
                    if head == "input_data" {
                        PathKind::Input
                    } else if head == "auth_user_id" || head == "auth_tenant_id" {
                        PathKind::Auth
                    } else if scope.has_field(&head) || is_reserved_column(&head) {
                        PathKind::Field
                    } else if scope.has_variable(&head) {
                        PathKind::Variable
                    } else if scope.defers_fields() {
                        PathKind::Field
                    } else {
                        return Err(ExprError::UnknownField(head));
                    }
                }
            };
            match kind {
                PathKind::Field => {
                    refs.fields.insert(head);
                }
                PathKind::Variable => {
                    refs.variables.insert(head);
                }
                PathKind::Input => {
                    if let Some(member) = path.members().first() {
                        refs.inputs.insert(member.clone());
                    }
                }
                _ => {}
            }
            Ok(ExprNode::Path(PathRef { kind, segments: path.segments }))
        }
        ExprNode::Function { name, args } => {
            if !SAFE_FUNCTIONS.contains(name.to_ascii_lowercase().as_str()) {
                return Err(ExprError::UnknownFunction(name));
            }
            let args = args
                .into_iter()
                .map(|a| resolve(a, scope, refs))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ExprNode::Function { name, args })
        }
        ExprNode::Unary { op, operand } => Ok(ExprNode::Unary {
            op,
            operand: Box::new(resolve(*operand, scope, refs)?),
        }),
        ExprNode::Binary { op, left, right } => Ok(ExprNode::Binary {
            op,
            left: Box::new(resolve(*left, scope, refs)?),
            right: Box::new(resolve(*right, scope, refs)?),
        }),
        ExprNode::Like { subject, pattern, case_insensitive, negated } => Ok(ExprNode::Like {
            subject: Box::new(resolve(*subject, scope, refs)?),
            pattern: Box::new(resolve(*pattern, scope, refs)?),
            case_insensitive,
            negated,
        }),
        ExprNode::Matches { subject, pattern } => Ok(ExprNode::Matches {
            subject: Box::new(resolve(*subject, scope, refs)?),
            pattern: Box::new(resolve(*pattern, scope, refs)?),
        }),
        ExprNode::InList { subject, items, negated } => Ok(ExprNode::InList {
            subject: Box::new(resolve(*subject, scope, refs)?),
            items: items
                .into_iter()
                .map(|i| resolve(i, scope, refs))
                .collect::<Result<Vec<_>, _>>()?,
            negated,
        }),
        ExprNode::IsNull { subject, negated } => Ok(ExprNode::IsNull {
            subject: Box::new(resolve(*subject, scope, refs)?),
            negated,
        }),
        ExprNode::Between { subject, low, high } => Ok(ExprNode::Between {
            subject: Box::new(resolve(*subject, scope, refs)?),
            low: Box::new(resolve(*low, scope, refs)?),
            high: Box::new(resolve(*high, scope, refs)?),
        }),
        leaf => Ok(leaf),
    }
}

// =============================================================================
// GRAMMAR (nom)
// =============================================================================

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    F: FnMut(&'a str) -> PResult<'a, O>,
{
    preceded(multispace0, inner)
}

/// One keyword token, case-insensitive, bounded by non-identifier chars.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    verify(ws(ident_chars), move |s: &&str| s.eq_ignore_ascii_case(kw))
}

fn ident_chars(input: &str) -> PResult<&str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// An identifier that is not a grammar keyword.
fn identifier(input: &str) -> PResult<&str> {
    verify(ws(ident_chars), |s: &&str| {
        !KEYWORDS.contains(&s.to_ascii_lowercase().as_str())
    })(input)
}

fn quoted_string(input: &str) -> PResult<String> {
    let single = delimited(
        char('\''),
        fold_many0(
            alt((map(tag("''"), |_| '\''), none_of("'"))),
            String::new,
            |mut acc, c| {
                acc.push(c);
                acc
            },
        ),
        char('\''),
    );
    let double = delimited(
        char('"'),
        fold_many0(
            alt((map(tag("\"\""), |_| '"'), none_of("\""))),
            String::new,
            |mut acc, c| {
                acc.push(c);
                acc
            },
        ),
        char('"'),
    );
    ws(alt((single, double)))(input)
}

fn number(input: &str) -> PResult<&str> {
    ws(recognize(pair(digit1, opt(pair(char('.'), digit1)))))(input)
}

fn path(input: &str) -> PResult<ExprNode> {
    let (input, dollar) = opt(ws(char('$')))(input)?;
    let (input, head) = if dollar.is_some() {
        map(ws(ident_chars), |s: &str| s)(input)?
    } else {
        identifier(input)?
    };
    let (input, rest) = many0(preceded(char('.'), ident_chars))(input)?;

    let mut segments = vec![head.to_string()];
    segments.extend(rest.into_iter().map(|s| s.to_string()));
    let kind = if dollar.is_some() {
        PathKind::Variable
    } else {
        PathKind::Unresolved
    };
    Ok((input, ExprNode::Path(PathRef { kind, segments })))
}

fn function_call(input: &str) -> PResult<ExprNode> {
    map(
        tuple((
            identifier,
            preceded(multispace0, char('(')),
            separated_list0(ws(char(',')), expression),
            ws(char(')')),
        )),
        |(name, _, args, _)| ExprNode::Function {
            name: name.to_string(),
            args,
        },
    )(input)
}

fn primary(input: &str) -> PResult<ExprNode> {
    alt((
        map(quoted_string, ExprNode::String),
        map(number, |n: &str| ExprNode::Number(n.to_string())),
        map(keyword("true"), |_| ExprNode::Bool(true)),
        map(keyword("false"), |_| ExprNode::Bool(false)),
        map(keyword("null"), |_| ExprNode::Null),
        delimited(ws(char('(')), expression, ws(char(')'))),
        function_call,
        path,
    ))(input)
}

fn unary(input: &str) -> PResult<ExprNode> {
    alt((
        map(preceded(ws(char('-')), unary), |operand| ExprNode::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(operand),
        }),
        primary,
    ))(input)
}

fn multiplicative(input: &str) -> PResult<ExprNode> {
    let (input, first) = unary(input)?;
    fold_many0(
        pair(ws(alt((char('*'), char('/')))), unary),
        move || first.clone(),
        |acc, (op, rhs)| ExprNode::Binary {
            op: if op == '*' { BinaryOp::Mul } else { BinaryOp::Div },
            left: Box::new(acc),
            right: Box::new(rhs),
        },
    )(input)
}

fn additive(input: &str) -> PResult<ExprNode> {
    let (input, first) = multiplicative(input)?;
    fold_many0(
        pair(ws(alt((char('+'), char('-')))), multiplicative),
        move || first.clone(),
        |acc, (op, rhs)| ExprNode::Binary {
            op: if op == '+' { BinaryOp::Add } else { BinaryOp::Sub },
            left: Box::new(acc),
            right: Box::new(rhs),
        },
    )(input)
}

fn comparison_op(input: &str) -> PResult<BinaryOp> {
    ws(alt((
        map(tag("!="), |_| BinaryOp::NotEq),
        map(tag("<>"), |_| BinaryOp::NotEq),
        map(tag("<="), |_| BinaryOp::LtEq),
        map(tag(">="), |_| BinaryOp::GtEq),
        map(tag("="), |_| BinaryOp::Eq),
        map(tag("<"), |_| BinaryOp::Lt),
        map(tag(">"), |_| BinaryOp::Gt),
    )))(input)
}

/// One comparison over additive operands, or a bare additive expression.
fn comparison(input: &str) -> PResult<ExprNode> {
    let (input, subject) = additive(input)?;

    // IS [NOT] NULL
    if let Ok((rest, negated)) =
        preceded(keyword("is"), opt(keyword("not")))(input).map(|(r, n)| (r, n.is_some()))
    {
        let (rest, _) = keyword("null")(rest)?;
        return Ok((
            rest,
            ExprNode::IsNull {
                subject: Box::new(subject),
                negated,
            },
        ));
    }

    // [NOT] IN (...) / [NOT] LIKE / [NOT] ILIKE
    let (input, negated) = opt(keyword("not"))(input).map(|(r, n)| (r, n.is_some()))?;
    if let Ok((rest, _)) = keyword("in")(input) {
        let (rest, items) = delimited(
            ws(char('(')),
            separated_list0(ws(char(',')), expression),
            ws(char(')')),
        )(rest)?;
        return Ok((
            rest,
            ExprNode::InList {
                subject: Box::new(subject),
                items,
                negated,
            },
        ));
    }
    if let Ok((rest, kw)) = alt((keyword("like"), keyword("ilike")))(input) {
        let (rest, pattern) = additive(rest)?;
        return Ok((
            rest,
            ExprNode::Like {
                subject: Box::new(subject),
                pattern: Box::new(pattern),
                case_insensitive: kw.eq_ignore_ascii_case("ilike"),
                negated,
            },
        ));
    }
    if negated {
        // `NOT` here must introduce IN or LIKE; bare logical NOT is
        // handled one level up.
        return Err(nom::Err::Error(VerboseError {
            errors: vec![(input, nom::error::VerboseErrorKind::Context("IN or LIKE after NOT"))],
        }));
    }

    if let Ok((rest, _)) = keyword("matches")(input) {
        let (rest, pattern) = additive(rest)?;
        return Ok((
            rest,
            ExprNode::Matches {
                subject: Box::new(subject),
                pattern: Box::new(pattern),
            },
        ));
    }
    if let Ok((rest, _)) = keyword("between")(input) {
        let (rest, low) = additive(rest)?;
        let (rest, _) = keyword("and")(rest)?;
        let (rest, high) = additive(rest)?;
        return Ok((
            rest,
            ExprNode::Between {
                subject: Box::new(subject),
                low: Box::new(low),
                high: Box::new(high),
            },
        ));
    }

    if let Ok((rest, op)) = comparison_op(input) {
        let (rest, rhs) = additive(rest)?;
        return Ok((
            rest,
            ExprNode::Binary {
                op,
                left: Box::new(subject),
                right: Box::new(rhs),
            },
        ));
    }

    Ok((input, subject))
}

fn not_expr(input: &str) -> PResult<ExprNode> {
    alt((
        map(preceded(keyword("not"), not_expr), |operand| ExprNode::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        }),
        comparison,
    ))(input)
}

fn and_expr(input: &str) -> PResult<ExprNode> {
    let (input, first) = not_expr(input)?;
    fold_many0(
        preceded(keyword("and"), not_expr),
        move || first.clone(),
        |acc, rhs| ExprNode::Binary {
            op: BinaryOp::And,
            left: Box::new(acc),
            right: Box::new(rhs),
        },
    )(input)
}

fn expression(input: &str) -> PResult<ExprNode> {
    let (input, first) = and_expr(input)?;
    fold_many0(
        preceded(keyword("or"), and_expr),
        move || first.clone(),
        |acc, rhs| ExprNode::Binary {
            op: BinaryOp::Or,
            left: Box::new(acc),
            right: Box::new(rhs),
        },
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn contact_scope() -> ExprScope {
        ExprScope::new(["status", "email", "total", "region", "start_date"])
    }

    #[test]
    fn test_quoted_literal_is_not_a_field() {
        // status = 'lead' references {status}, never {status, lead}
        let expr = parse_expression("status = 'lead'", &contact_scope()).unwrap();
        let refs: Vec<&str> = expr.field_refs.iter().map(|s| s.as_str()).collect();
        assert_eq!(refs, vec!["status"]);
        assert!(expr.variable_refs.is_empty());
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = parse_expression("stattus = 'lead'", &contact_scope()).unwrap_err();
        assert_eq!(err, ExprError::UnknownField("stattus".to_string()));
    }

    #[test]
    fn test_unquoted_literal_position_is_rejected() {
        // `lead` outside quotes is a phantom field and must not parse clean
        let err = parse_expression("status = lead", &contact_scope()).unwrap_err();
        assert_eq!(err, ExprError::UnknownField("lead".to_string()));
    }

    #[test]
    fn test_boolean_precedence() {
        let expr =
            parse_expression("status = 'lead' AND total > 100 OR region = 'EU'", &contact_scope())
                .unwrap();
        match &expr.root {
            ExprNode::Binary { op: BinaryOp::Or, left, .. } => match left.as_ref() {
                ExprNode::Binary { op: BinaryOp::And, .. } => {}
                other => panic!("expected AND under OR, got {other:?}"),
            },
            other => panic!("expected OR at root, got {other:?}"),
        }
    }

    #[test]
    fn test_explicit_variable_reference() {
        let mut scope = contact_scope();
        scope.bind("subtotal");
        let expr = parse_expression("$subtotal > 100", &scope).unwrap();
        assert!(expr.variable_refs.contains("subtotal"));
        assert!(expr.field_refs.is_empty());
    }

    #[test]
    fn test_unbound_variable_is_rejected() {
        let err = parse_expression("$ghost > 1", &contact_scope()).unwrap_err();
        assert_eq!(err, ExprError::UnknownVariable("ghost".to_string()));
    }

    #[test]
    fn test_bound_variable_member_access() {
        let mut scope = contact_scope();
        scope.bind("item");
        let expr = parse_expression("item.price > 10", &scope).unwrap();
        match &expr.root {
            ExprNode::Binary { left, .. } => match left.as_ref() {
                ExprNode::Path(p) => {
                    assert_eq!(p.kind, PathKind::Variable);
                    assert_eq!(p.segments, vec!["item", "price"]);
                }
                other => panic!("expected path, got {other:?}"),
            },
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn test_input_reference() {
        let expr = parse_expression("email = input_data.email", &contact_scope()).unwrap();
        assert!(expr.input_refs.contains("email"));
        assert!(expr.field_refs.contains("email"));
    }

    #[test]
    fn test_audit_columns_resolve_without_declaration() {
        let expr = parse_expression("deleted_at IS NULL", &contact_scope()).unwrap();
        assert!(expr.field_refs.contains("deleted_at"));
    }

    #[test]
    fn test_in_list_and_between() {
        let expr = parse_expression(
            "region IN ('EU', 'UK') AND total BETWEEN 10 AND 20",
            &contact_scope(),
        )
        .unwrap();
        assert!(expr.field_refs.contains("region"));
        assert!(expr.field_refs.contains("total"));
    }

    #[test]
    fn test_is_not_null() {
        let expr = parse_expression("email IS NOT NULL", &contact_scope()).unwrap();
        match &expr.root {
            ExprNode::IsNull { negated, .. } => assert!(*negated),
            other => panic!("expected IsNull, got {other:?}"),
        }
    }

    #[test]
    fn test_function_whitelist() {
        assert!(parse_expression("lower(email) = 'x@y.com'", &contact_scope()).is_ok());
        let err = parse_expression("pg_sleep(10) > 0", &contact_scope()).unwrap_err();
        assert_eq!(err, ExprError::UnknownFunction("pg_sleep".to_string()));
    }

    #[test]
    fn test_now_requires_parens() {
        assert!(parse_expression("start_date > now()", &contact_scope()).is_ok());
    }

    #[test]
    fn test_dangerous_outside_quotes_rejected() {
        let err = parse_expression("status = 'lead'; DROP TABLE x", &contact_scope()).unwrap_err();
        assert!(matches!(err, ExprError::Disallowed(_)));
        let err = parse_expression("status = 'lead' -- sneak", &contact_scope()).unwrap_err();
        assert!(matches!(err, ExprError::Disallowed(_)));
    }

    #[test]
    fn test_dangerous_inside_quotes_allowed() {
        let expr = parse_expression("status = 'a;b--c'", &contact_scope()).unwrap();
        match &expr.root {
            ExprNode::Binary { right, .. } => {
                assert_eq!(**right, ExprNode::String("a;b--c".to_string()));
            }
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn test_escaped_quote_in_literal() {
        let expr = parse_expression("status = 'it''s'", &contact_scope()).unwrap();
        match &expr.root {
            ExprNode::Binary { right, .. } => {
                assert_eq!(**right, ExprNode::String("it's".to_string()));
            }
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn test_strip_quoted() {
        assert_eq!(strip_quoted("a = 'x;y' AND b"), "a =  AND b");
        assert_eq!(strip_quoted(r#"a = "x" OR c"#), "a =  OR c");
    }

    #[test]
    fn test_trailing_garbage_is_syntax_error() {
        let err = parse_expression("status = 'lead' extra!", &contact_scope()).unwrap_err();
        assert!(matches!(err, ExprError::Syntax(_)));
    }

    #[test]
    fn test_deferred_scope_records_unknown_heads_as_fields() {
        let mut scope = contact_scope();
        scope.bind("total");
        let deferred = scope.defer_fields();

        let expr = parse_expression("amount > $total AND region = 'EU'", &deferred).unwrap();
        assert!(expr.field_refs.contains("amount"));
        assert!(expr.field_refs.contains("region"));
        assert!(expr.variable_refs.contains("total"));

        // Unbound variables still fail even when field checks are deferred.
        let err = parse_expression("amount > $missing", &deferred).unwrap_err();
        assert_eq!(err, ExprError::UnknownVariable("missing".to_string()));
    }

    #[test]
    fn test_unbind_removes_loop_variable() {
        let mut scope = contact_scope();
        scope.bind("item");
        assert!(parse_expression("item.price > 0", &scope).is_ok());
        scope.unbind("item");
        assert!(parse_expression("item.price > 0", &scope).is_err());
    }
}
