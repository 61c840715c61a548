//! Expression-to-SQL rendering
//!
//! The parser hands over a fully resolved tree; rendering is a pure
//! function of that tree plus the compile context. Literal text was
//! separated from identifiers at parse time, so nothing here re-scans
//! strings or guesses at quoting.
//!
//! Field references render according to where the expression sits:
//! ambient expressions see the subject row (`v_contact.status`) or, in a
//! create-pattern action, the input payload (`input_data.status`);
//! expressions targeted at another entity's rows (find/foreach/update/
//! delete conditions) render that entity's columns bare, falling back to
//! the subject for names the target does not have.

use adl_core::ast::EntityDefinition;
use adl_core::expr::{ExprNode, Expression, PathRef, UnaryOp};
use adl_core::reserved::is_reserved_column;

use super::context::{CompileCtx, VarKind};

/// Indented line buffer for one routine body.
pub struct SqlWriter {
    lines: Vec<String>,
    indent: usize,
}

impl SqlWriter {
    pub fn new(indent: usize) -> Self {
        Self { lines: Vec::new(), indent }
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        self.lines
            .push(format!("{}{}", "    ".repeat(self.indent), text.as_ref()));
    }

    pub fn blank(&mut self) {
        self.lines.push(String::new());
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn finish(self) -> Vec<String> {
        self.lines
    }
}

/// Single-quoted SQL literal with embedded quotes doubled.
pub fn sql_string(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Message text for a `RAISE` format string: quotes doubled, `%` escaped.
pub fn raise_message(text: &str) -> String {
    text.replace('\'', "''").replace('%', "%%")
}

pub struct ExprRenderer<'a> {
    ctx: &'a CompileCtx<'a>,
    target: Option<&'a EntityDefinition>,
}

impl<'a> ExprRenderer<'a> {
    /// Renderer for expressions evaluated in the subject's context.
    pub fn ambient(ctx: &'a CompileCtx<'a>) -> Self {
        Self { ctx, target: None }
    }

    /// Renderer for conditions over `target`'s rows: unqualified names that
    /// are `target` columns render bare.
    pub fn for_target(ctx: &'a CompileCtx<'a>, target: &'a EntityDefinition) -> Self {
        Self { ctx, target: Some(target) }
    }

    pub fn render(&self, expr: &Expression) -> String {
        self.render_node(&expr.root)
    }

    pub fn render_node(&self, node: &ExprNode) -> String {
        match node {
            ExprNode::String(s) => sql_string(s),
            ExprNode::Number(n) => n.clone(),
            ExprNode::Bool(true) => "TRUE".to_string(),
            ExprNode::Bool(false) => "FALSE".to_string(),
            ExprNode::Null => "NULL".to_string(),
            ExprNode::Path(path) => self.render_path(path),
            ExprNode::Unary { op, operand } => match op {
                UnaryOp::Not => format!("(NOT {})", self.render_node(operand)),
                UnaryOp::Neg => format!("(-{})", self.render_node(operand)),
            },
            ExprNode::Binary { op, left, right } => format!(
                "({} {} {})",
                self.render_node(left),
                op.sql(),
                self.render_node(right)
            ),
            ExprNode::Function { name, args } => {
                let rendered: Vec<String> = args.iter().map(|a| self.render_node(a)).collect();
                format!("{}({})", name.to_ascii_lowercase(), rendered.join(", "))
            }
            ExprNode::Like { subject, pattern, case_insensitive, negated } => {
                let op = match (negated, case_insensitive) {
                    (false, false) => "LIKE",
                    (false, true) => "ILIKE",
                    (true, false) => "NOT LIKE",
                    (true, true) => "NOT ILIKE",
                };
                format!(
                    "({} {} {})",
                    self.render_node(subject),
                    op,
                    self.render_node(pattern)
                )
            }
            ExprNode::Matches { subject, pattern } => format!(
                "({} ~ {})",
                self.render_node(subject),
                self.render_node(pattern)
            ),
            ExprNode::InList { subject, items, negated } => {
                let rendered: Vec<String> = items.iter().map(|i| self.render_node(i)).collect();
                format!(
                    "({} {} ({}))",
                    self.render_node(subject),
                    if *negated { "NOT IN" } else { "IN" },
                    rendered.join(", ")
                )
            }
            ExprNode::IsNull { subject, negated } => format!(
                "({} IS {}NULL)",
                self.render_node(subject),
                if *negated { "NOT " } else { "" }
            ),
            ExprNode::Between { subject, low, high } => format!(
                "({} BETWEEN {} AND {})",
                self.render_node(subject),
                self.render_node(low),
                self.render_node(high)
            ),
        }
    }

    fn render_path(&self, path: &PathRef) -> String {
        use adl_core::expr::PathKind;
        match path.kind {
            PathKind::Auth => path.head().to_string(),
            PathKind::Input => {
                jsonb_member_chain(&format!("input_data.{}", first_member(path)), rest_members(path))
            }
            PathKind::Variable => self.render_variable(path),
            PathKind::Field | PathKind::Unresolved => self.render_field(path),
        }
    }

    fn render_variable(&self, path: &PathRef) -> String {
        let head = path.head();
        let var = format!("v_{}", head);
        match self.ctx.var_kind(head) {
            Some(VarKind::JsonbElem) => jsonb_member_chain(&var, path.members()),
            Some(VarKind::InsertHandle) => match path.members().first().map(|s| s.as_str()) {
                None | Some("id") => format!("{}_id", var),
                Some("pk") => format!("{}_pk", var),
                Some(other) => format!("{}_{}", var, other),
            },
            Some(VarKind::Record { entity }) => {
                let members = path.members();
                if members.is_empty() {
                    return var;
                }
                let column = entity
                    .as_deref()
                    .and_then(|name| self.ctx.catalog.get(name))
                    .and_then(|e| e.field(&members[0]))
                    .map(|f| f.column_name())
                    .unwrap_or_else(|| members[0].clone());
                jsonb_member_chain(&format!("{}.{}", var, column), &members[1..])
            }
            Some(VarKind::Scalar) | None => {
                if path.members().is_empty() {
                    var
                } else {
                    jsonb_member_chain(&format!("{}.{}", var, path.members()[0]), &path.members()[1..])
                }
            }
        }
    }

    fn render_field(&self, path: &PathRef) -> String {
        let head = path.head();

        if let Some(target) = self.target {
            if let Some(field) = target.field(head) {
                return jsonb_member_chain(&field.column_name(), path.members());
            }
            if is_reserved_column(head) {
                return jsonb_member_chain(head, path.members());
            }
        }

        // Subject context: the loaded row, or the input payload for
        // create-pattern actions.
        if self.ctx.create_pattern {
            if head == "id" {
                return self.ctx.subject_id_expr();
            }
            return jsonb_member_chain(&format!("input_data.{}", head), path.members());
        }

        let column = self
            .ctx
            .entity
            .field(head)
            .map(|f| f.column_name())
            .unwrap_or_else(|| head.to_string());
        jsonb_member_chain(
            &format!("{}.{}", self.ctx.subject_row_var(), column),
            path.members(),
        )
    }
}

fn first_member(path: &PathRef) -> String {
    path.members()
        .first()
        .cloned()
        .unwrap_or_else(|| "id".to_string())
}

fn rest_members(path: &PathRef) -> &[String] {
    let members = path.members();
    if members.is_empty() {
        members
    } else {
        &members[1..]
    }
}

/// `base` followed by JSONB member hops: intermediate hops use `->`,
/// the last uses `->>` so the result is text.
fn jsonb_member_chain(base: &str, members: &[String]) -> String {
    if members.is_empty() {
        return base.to_string();
    }
    let mut out = format!("({}", base);
    for (i, member) in members.iter().enumerate() {
        let op = if i + 1 == members.len() { "->>" } else { "->" };
        out.push_str(&format!("{}'{}'", op, member));
    }
    out.push(')');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EntityCatalog;
    use crate::config::ForgeConfig;
    use adl_core::expr::{parse_expression, ExprScope};
    use adl_core::parse_document;
    use pretty_assertions::assert_eq;

    fn fixture() -> EntityCatalog {
        let contact = parse_document(
            r#"
entity: Contact
schema: crm
fields:
  email: email!
  status: enum(lead, active) = 'lead'
  company: ref(Company)
  address: SimpleAddress
actions:
  - name: create_contact
    steps:
      - insert: Contact
        values:
          email: input_data.email
  - name: qualify_lead
    steps:
      - validate: status = 'lead'
"#,
        )
        .unwrap();
        let company = parse_document(
            r#"
entity: Company
schema: crm
fields:
  name: text!
actions:
  - name: create_company
    steps:
      - insert: Company
        values:
          name: input_data.name
"#,
        )
        .unwrap();
        let mut catalog = EntityCatalog::new();
        catalog.insert(contact).unwrap();
        catalog.insert(company).unwrap();
        catalog
    }

    fn render_with<'a>(
        catalog: &'a EntityCatalog,
        config: &'a ForgeConfig,
        action: &str,
        raw: &str,
        scope: &ExprScope,
    ) -> String {
        let entity = catalog.get("Contact").unwrap();
        let action = entity.action(action).unwrap();
        let ctx = CompileCtx::new(catalog, config, entity, action);
        let expr = parse_expression(raw, scope).unwrap();
        ExprRenderer::ambient(&ctx).render(&expr)
    }

    fn contact_scope() -> ExprScope {
        ExprScope::new(["email", "status", "company", "address"])
    }

    #[test]
    fn test_existing_row_field_renders_row_column() {
        let catalog = fixture();
        let config = ForgeConfig::default();
        let sql = render_with(&catalog, &config, "qualify_lead", "status = 'lead'", &contact_scope());
        assert_eq!(sql, "(v_contact.status = 'lead')");
    }

    #[test]
    fn test_create_pattern_field_renders_input() {
        let catalog = fixture();
        let config = ForgeConfig::default();
        let sql = render_with(&catalog, &config, "create_contact", "status = 'lead'", &contact_scope());
        assert_eq!(sql, "(input_data.status = 'lead')");
    }

    #[test]
    fn test_reference_field_maps_to_fk_column() {
        let catalog = fixture();
        let config = ForgeConfig::default();
        let sql = render_with(&catalog, &config, "qualify_lead", "company IS NULL", &contact_scope());
        assert_eq!(sql, "(v_contact.fk_company IS NULL)");
    }

    #[test]
    fn test_composite_member_renders_jsonb_hop() {
        let catalog = fixture();
        let config = ForgeConfig::default();
        let sql = render_with(
            &catalog,
            &config,
            "qualify_lead",
            "address.city = 'Paris'",
            &contact_scope(),
        );
        assert_eq!(sql, "((v_contact.address->>'city') = 'Paris')");
    }

    #[test]
    fn test_target_columns_render_bare() {
        let catalog = fixture();
        let config = ForgeConfig::default();
        let entity = catalog.get("Contact").unwrap();
        let target = catalog.get("Company").unwrap();
        let action = entity.action("qualify_lead").unwrap();
        let ctx = CompileCtx::new(&catalog, &config, entity, action);

        let scope = contact_scope().defer_fields();
        let expr = parse_expression("name = email", &scope).unwrap();
        let sql = ExprRenderer::for_target(&ctx, target).render(&expr);
        // `name` is a Company column; `email` falls back to the subject row.
        assert_eq!(sql, "(name = v_contact.email)");
    }

    #[test]
    fn test_variable_kinds_render_distinctly() {
        let catalog = fixture();
        let config = ForgeConfig::default();
        let entity = catalog.get("Contact").unwrap();
        let action = entity.action("qualify_lead").unwrap();
        let mut ctx = CompileCtx::new(&catalog, &config, entity, action);
        ctx.bind("total", VarKind::Scalar);
        ctx.bind("row", VarKind::Record { entity: Some("Company".to_string()) });
        ctx.bind("item", VarKind::JsonbElem);
        ctx.bind("created", VarKind::InsertHandle);

        let mut scope = contact_scope();
        for name in ["total", "row", "item", "created"] {
            scope.bind(name);
        }

        let render = |raw: &str, ctx: &CompileCtx| {
            let expr = parse_expression(raw, &scope).unwrap();
            ExprRenderer::ambient(ctx).render(&expr)
        };
        assert_eq!(render("$total + 1", &ctx), "(v_total + 1)");
        assert_eq!(render("row.name = 'x'", &ctx), "(v_row.name = 'x')");
        assert_eq!(render("item.price > 2", &ctx), "((v_item->>'price') > 2)");
        assert_eq!(render("$created", &ctx), "v_created_id");
        assert_eq!(render("created.pk > 0", &ctx), "(v_created_pk > 0)");
    }

    #[test]
    fn test_auth_and_input_paths() {
        let catalog = fixture();
        let config = ForgeConfig::default();
        let sql = render_with(
            &catalog,
            &config,
            "qualify_lead",
            "auth_user_id IS NOT NULL AND input_data.reason != ''",
            &contact_scope(),
        );
        assert_eq!(
            sql,
            "((auth_user_id IS NOT NULL) AND (input_data.reason <> ''))"
        );
    }

    #[test]
    fn test_raise_message_escapes() {
        assert_eq!(raise_message("can't do 100%"), "can''t do 100%%");
    }
}
