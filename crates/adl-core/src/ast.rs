//! AST types for parsed ADL documents
//!
//! An `EntityDefinition` is the parser's only product: fields, actions, and
//! entity-level configuration, immutable once built. Step kinds are a closed
//! sum type; the compiler matches exhaustively and an unknown step cannot
//! exist past the parser.

use serde::{Deserialize, Serialize};

use crate::expr::Expression;
use crate::types::FieldTier;

// =============================================================================
// ENTITY & FIELDS
// =============================================================================

/// One parsed entity document: fields, actions, and configuration.
///
/// Every entity implicitly carries the Trinity columns (`pk_<entity>`,
/// `id`, `identifier`) plus tenant and audit columns; those are never
/// declared as fields and the parser rejects collisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    pub schema: String,
    pub description: String,
    /// Field whose value populates the human-readable `identifier` column.
    pub identifier_field: Option<String>,
    /// Rows are removed outright instead of stamped `deleted_at`.
    pub hard_delete: bool,
    pub fields: Vec<FieldDefinition>,
    pub actions: Vec<ActionDefinition>,
}

impl EntityDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn action(&self, name: &str) -> Option<&ActionDefinition> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Entity name in snake_case, as used in table and variable names.
    pub fn snake_name(&self) -> String {
        to_snake_case(&self.name)
    }
}

/// Target of a reference field. `schema` is present for qualified targets
/// (`ref(management.Org)`); unqualified targets resolve through the entity
/// catalog at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefTarget {
    pub schema: Option<String>,
    pub entity: String,
}

impl RefTarget {
    pub fn snake_entity(&self) -> String {
        to_snake_case(&self.entity)
    }
}

/// The type half of a field declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldType {
    /// Raw primitive: `text`, `integer`, `boolean`, ...
    Basic(String),
    /// Registry scalar: `email`, `money`, `color`, ...
    Scalar(String),
    /// Registry composite stored as JSONB: `SimpleAddress`, `MoneyAmount`, ...
    Composite(String),
    /// `enum(a, b, c)`: TEXT plus a membership check.
    Enum(Vec<String>),
    /// `list(T)`: array of the element's storage type.
    List(Box<FieldType>),
    /// `ref(Target)`; more than one target is a polymorphic reference and
    /// stores a discriminator column alongside the key.
    Reference(Vec<RefTarget>),
}

impl FieldType {
    pub fn tier(&self) -> FieldTier {
        match self {
            FieldType::Basic(_) | FieldType::Enum(_) => FieldTier::Basic,
            FieldType::Scalar(_) => FieldTier::Scalar,
            FieldType::Composite(_) => FieldTier::Composite,
            FieldType::Reference(_) => FieldTier::Reference,
            FieldType::List(elem) => elem.tier(),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Reference(_))
    }

    pub fn is_polymorphic(&self) -> bool {
        matches!(self, FieldType::Reference(targets) if targets.len() > 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub unique: bool,
    /// Default value expression, verbatim from the declaration.
    pub default: Option<String>,
    /// Explicit validation pattern overriding the registry's.
    pub pattern: Option<String>,
    pub description: String,
}

impl FieldDefinition {
    pub fn tier(&self) -> FieldTier {
        self.field_type.tier()
    }

    /// Physical column name: references store `fk_<field>`, everything
    /// else stores the field name itself.
    pub fn column_name(&self) -> String {
        if self.field_type.is_reference() {
            format!("fk_{}", self.name)
        } else {
            self.name.clone()
        }
    }
}

// =============================================================================
// ACTIONS & STEPS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    pub description: String,
    /// Capability tag the caller must hold; enforcement is the host's job.
    pub requires: Option<String>,
    pub steps: Vec<ActionStep>,
    pub impact: Option<ActionImpact>,
}

impl ActionDefinition {
    /// Create-pattern actions insert their subject row; everything else
    /// operates on a row loaded by `input_data.id`.
    pub fn is_create_pattern(&self) -> bool {
        self.name.starts_with("create")
    }
}

/// One field assignment inside an insert/update step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub field: String,
    pub value: Expression,
}

/// Source rows for a `foreach` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Collection {
    /// `item in Entity WHERE cond`: tenant-scoped, non-deleted rows.
    EntityFilter {
        entity: String,
        condition: Option<Expression>,
    },
    /// `item in $rows` or any jsonb-array expression.
    ArrayExpression(Expression),
}

/// One arm of a `switch` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub value: Expression,
    pub steps: Vec<ActionStep>,
}

/// Runtime failure kinds an `exception_handling` catch clause can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeErrorKind {
    ValidationError,
    PaymentFailed,
    NetworkError,
    DatabaseError,
    ParseError,
    Others,
}

impl RuntimeErrorKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "validation_error" => Some(RuntimeErrorKind::ValidationError),
            "payment_failed" => Some(RuntimeErrorKind::PaymentFailed),
            "network_error" => Some(RuntimeErrorKind::NetworkError),
            "database_error" => Some(RuntimeErrorKind::DatabaseError),
            "parse_error" => Some(RuntimeErrorKind::ParseError),
            "OTHERS" => Some(RuntimeErrorKind::Others),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeErrorKind::ValidationError => "validation_error",
            RuntimeErrorKind::PaymentFailed => "payment_failed",
            RuntimeErrorKind::NetworkError => "network_error",
            RuntimeErrorKind::DatabaseError => "database_error",
            RuntimeErrorKind::ParseError => "parse_error",
            RuntimeErrorKind::Others => "OTHERS",
        }
    }
}

/// One catch clause: kind plus handler body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchHandler {
    pub kind: RuntimeErrorKind,
    pub steps: Vec<ActionStep>,
}

/// Payload of a `return` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReturnValue {
    /// `return: {a: $x, b: $y}`: named members of the success payload.
    Object(Vec<(String, Expression)>),
    /// `return: $total`: one expression as the success payload.
    Expr(Expression),
    /// Bare `return`: the mutated row is the payload.
    RowData,
}

/// The closed step vocabulary. Order within an action is semantically
/// load-bearing; nested step lists recurse through the same type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionStep {
    Validate {
        condition: Expression,
        error_code: String,
        message: Option<String>,
    },
    Insert {
        entity: String,
        values: Vec<Assignment>,
        /// Variable bound to the inserted row's pk/id pair.
        bind: Option<String>,
    },
    Update {
        /// Defaults to the action's subject entity.
        entity: Option<String>,
        set: Vec<Assignment>,
        condition: Option<Expression>,
    },
    Delete {
        entity: Option<String>,
        condition: Option<Expression>,
    },
    Find {
        entity: String,
        condition: Expression,
        /// Variable the row binds to; the parser defaults it to the
        /// entity's snake_case name when not written out.
        bind: String,
    },
    Call {
        function: String,
        arguments: Vec<(String, Expression)>,
        store: Option<String>,
    },
    Notify {
        recipient: String,
        channel: String,
        payload: Vec<Expression>,
    },
    If {
        condition: Expression,
        then_steps: Vec<ActionStep>,
        else_steps: Vec<ActionStep>,
    },
    Foreach {
        var: String,
        collection: Collection,
        body: Vec<ActionStep>,
    },
    While {
        condition: Expression,
        body: Vec<ActionStep>,
        /// Loop-only early exit, checked after each iteration's body.
        exit_when: Option<Expression>,
    },
    Switch {
        subject: Expression,
        cases: Vec<SwitchCase>,
        default: Vec<ActionStep>,
    },
    Declare {
        name: String,
        type_name: String,
        default: Option<Expression>,
    },
    ExceptionHandling {
        try_steps: Vec<ActionStep>,
        handlers: Vec<CatchHandler>,
        finally_steps: Vec<ActionStep>,
    },
    ForQuery {
        query: String,
        bind: String,
        body: Vec<ActionStep>,
    },
    CallFunction {
        /// Fully qualified routine name (`schema.function`).
        function: String,
        arguments: Vec<(String, Expression)>,
        returns: Option<String>,
    },
    Reject {
        error_code: String,
        message: Option<String>,
    },
    Return {
        value: ReturnValue,
    },
}

impl ActionStep {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ActionStep::Validate { .. } => "validate",
            ActionStep::Insert { .. } => "insert",
            ActionStep::Update { .. } => "update",
            ActionStep::Delete { .. } => "delete",
            ActionStep::Find { .. } => "find",
            ActionStep::Call { .. } => "call",
            ActionStep::Notify { .. } => "notify",
            ActionStep::If { .. } => "if",
            ActionStep::Foreach { .. } => "foreach",
            ActionStep::While { .. } => "while",
            ActionStep::Switch { .. } => "switch",
            ActionStep::Declare { .. } => "declare",
            ActionStep::ExceptionHandling { .. } => "exception_handling",
            ActionStep::ForQuery { .. } => "for_query",
            ActionStep::CallFunction { .. } => "call_function",
            ActionStep::Reject { .. } => "reject",
            ActionStep::Return { .. } => "return",
        }
    }

    /// True for steps that write rows directly.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            ActionStep::Insert { .. } | ActionStep::Update { .. } | ActionStep::Delete { .. }
        )
    }

    /// Immediate child step lists, for tree walks.
    pub fn child_lists(&self) -> Vec<&[ActionStep]> {
        match self {
            ActionStep::If { then_steps, else_steps, .. } => {
                vec![then_steps.as_slice(), else_steps.as_slice()]
            }
            ActionStep::Foreach { body, .. } | ActionStep::While { body, .. } => {
                vec![body.as_slice()]
            }
            ActionStep::ForQuery { body, .. } => vec![body.as_slice()],
            ActionStep::Switch { cases, default, .. } => {
                let mut lists: Vec<&[ActionStep]> =
                    cases.iter().map(|c| c.steps.as_slice()).collect();
                lists.push(default.as_slice());
                lists
            }
            ActionStep::ExceptionHandling { try_steps, handlers, finally_steps } => {
                let mut lists = vec![try_steps.as_slice()];
                lists.extend(handlers.iter().map(|h| h.steps.as_slice()));
                lists.push(finally_steps.as_slice());
                lists
            }
            _ => Vec::new(),
        }
    }
}

/// Walk a step list depth-first, visiting every nested step.
pub fn walk_steps<'a>(steps: &'a [ActionStep], visit: &mut dyn FnMut(&'a ActionStep)) {
    for step in steps {
        visit(step);
        for child in step.child_lists() {
            walk_steps(child, visit);
        }
    }
}

// =============================================================================
// IMPACT METADATA
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImpactOperation {
    Create,
    Update,
    Delete,
}

impl ImpactOperation {
    /// Cascade payload spelling.
    pub fn past_tense(&self) -> &'static str {
        match self {
            ImpactOperation::Create => "CREATED",
            ImpactOperation::Update => "UPDATED",
            ImpactOperation::Delete => "DELETED",
        }
    }
}

/// Impact of an action on one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityImpact {
    pub entity: String,
    pub operation: ImpactOperation,
    #[serde(default)]
    pub fields: Vec<String>,
    /// Client-side collection name for side effects.
    #[serde(default)]
    pub collection: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvalidationStrategy {
    Refetch,
    Remove,
    Update,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheInvalidation {
    /// Client query name to invalidate.
    pub query: String,
    #[serde(default = "default_strategy")]
    pub strategy: InvalidationStrategy,
    #[serde(default)]
    pub reason: String,
}

fn default_strategy() -> InvalidationStrategy {
    InvalidationStrategy::Refetch
}

/// Complete impact metadata for an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionImpact {
    pub primary: EntityImpact,
    #[serde(default)]
    pub side_effects: Vec<EntityImpact>,
    #[serde(default)]
    pub cache_invalidations: Vec<CacheInvalidation>,
    /// Include full row data in cascade entries; overrides the system
    /// default when set.
    #[serde(default)]
    pub include_data: Option<bool>,
}

// =============================================================================
// HELPERS
// =============================================================================

/// `OrderLine` → `order_line`; already-snake input passes through.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{parse_expression, ExprScope};

    fn cond(raw: &str) -> Expression {
        parse_expression(raw, &ExprScope::new(["status"])).unwrap()
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("Contact"), "contact");
        assert_eq!(to_snake_case("OrderLine"), "order_line");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn test_field_tiers() {
        assert_eq!(FieldType::Basic("text".into()).tier(), FieldTier::Basic);
        assert_eq!(FieldType::Enum(vec!["a".into()]).tier(), FieldTier::Basic);
        assert_eq!(FieldType::Scalar("email".into()).tier(), FieldTier::Scalar);
        assert_eq!(
            FieldType::List(Box::new(FieldType::Scalar("email".into()))).tier(),
            FieldTier::Scalar
        );
        let poly = FieldType::Reference(vec![
            RefTarget { schema: None, entity: "Person".into() },
            RefTarget { schema: None, entity: "Company".into() },
        ]);
        assert_eq!(poly.tier(), FieldTier::Reference);
        assert!(poly.is_polymorphic());
    }

    #[test]
    fn test_reference_column_name() {
        let field = FieldDefinition {
            name: "company".into(),
            field_type: FieldType::Reference(vec![RefTarget {
                schema: None,
                entity: "Company".into(),
            }]),
            required: true,
            unique: false,
            default: None,
            pattern: None,
            description: String::new(),
        };
        assert_eq!(field.column_name(), "fk_company");
    }

    #[test]
    fn test_create_pattern_detection() {
        let mk = |name: &str| ActionDefinition {
            name: name.into(),
            description: String::new(),
            requires: None,
            steps: vec![],
            impact: None,
        };
        assert!(mk("create_contact").is_create_pattern());
        assert!(!mk("qualify_lead").is_create_pattern());
        assert!(!mk("update_status").is_create_pattern());
    }

    #[test]
    fn test_walk_steps_reaches_nested() {
        let steps = vec![ActionStep::If {
            condition: cond("status = 'lead'"),
            then_steps: vec![ActionStep::Reject {
                error_code: "nope".into(),
                message: None,
            }],
            else_steps: vec![ActionStep::Foreach {
                var: "item".into(),
                collection: Collection::EntityFilter {
                    entity: "Contact".into(),
                    condition: None,
                },
                body: vec![ActionStep::Return { value: ReturnValue::RowData }],
            }],
        }];
        let mut kinds = Vec::new();
        walk_steps(&steps, &mut |s| kinds.push(s.kind_name()));
        assert_eq!(kinds, vec!["if", "reject", "foreach", "return"]);
    }

    #[test]
    fn test_error_kind_parsing() {
        assert_eq!(
            RuntimeErrorKind::parse("payment_failed"),
            Some(RuntimeErrorKind::PaymentFailed)
        );
        assert_eq!(RuntimeErrorKind::parse("OTHERS"), Some(RuntimeErrorKind::Others));
        assert_eq!(RuntimeErrorKind::parse("others"), None);
        assert_eq!(RuntimeErrorKind::Others.as_str(), "OTHERS");
    }
}
