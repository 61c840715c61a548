//! Reserved words and reserved column names
//!
//! Two distinct sets live here. `is_reserved_word` answers "may this bare
//! identifier appear in an expression without being a field?": SQL
//! keywords, builtin functions, ambient routine parameters, and the
//! generated columns every table carries. `is_reserved_column` answers
//! "may a field be declared with this name?": the Trinity, tenant, and
//! audit columns the generator owns.

use std::collections::HashSet;

use once_cell::sync::Lazy;

/// Bare identifiers allowed in expressions without resolving to a field.
static RESERVED_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // Boolean / comparison syntax
        "and", "or", "not", "is", "null", "true", "false", "in", "like",
        "ilike", "between", "exists", "distinct", "case", "when", "then",
        "else", "end", "asc", "desc",
        // Builtin functions usable in conditions
        "now", "current_date", "current_timestamp", "coalesce", "nullif",
        "lower", "upper", "trim", "length", "abs", "round", "greatest",
        "least", "concat", "substring", "date_trunc", "extract", "interval",
        // Ambient routine parameters
        "auth_user_id", "auth_tenant_id", "input_data", "input_payload",
        // Generated identity and audit columns
        "id", "identifier", "tenant_id", "created_at", "created_by",
        "updated_at", "updated_by", "deleted_at", "deleted_by",
    ]
    .into_iter()
    .collect()
});

/// Column names owned by the generator; user fields must not collide.
static RESERVED_COLUMNS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "id", "identifier", "tenant_id", "created_at", "created_by",
        "updated_at", "updated_by", "deleted_at", "deleted_by",
    ]
    .into_iter()
    .collect()
});

/// Runtime failure kinds recognized by `exception_handling` catch clauses.
pub const ERROR_KINDS: &[&str] = &[
    "validation_error",
    "payment_failed",
    "network_error",
    "database_error",
    "parse_error",
    "OTHERS",
];

pub fn is_reserved_word(word: &str) -> bool {
    RESERVED_WORDS.contains(word.to_ascii_lowercase().as_str())
}

pub fn is_reserved_column(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    RESERVED_COLUMNS.contains(lower.as_str()) || lower.starts_with("pk_") || lower.starts_with("fk_")
}

pub fn is_error_kind(kind: &str) -> bool {
    ERROR_KINDS.contains(&kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_keywords_are_reserved() {
        assert!(is_reserved_word("and"));
        assert!(is_reserved_word("NOT"));
        assert!(is_reserved_word("Null"));
        assert!(is_reserved_word("now"));
    }

    #[test]
    fn test_ambient_params_are_reserved() {
        assert!(is_reserved_word("auth_user_id"));
        assert!(is_reserved_word("auth_tenant_id"));
        assert!(is_reserved_word("input_data"));
    }

    #[test]
    fn test_ordinary_names_are_not_reserved() {
        assert!(!is_reserved_word("status"));
        assert!(!is_reserved_word("lead"));
        assert!(!is_reserved_word("email"));
    }

    #[test]
    fn test_reserved_columns_cover_trinity_and_audit() {
        assert!(is_reserved_column("id"));
        assert!(is_reserved_column("tenant_id"));
        assert!(is_reserved_column("deleted_by"));
        assert!(is_reserved_column("pk_contact"));
        assert!(is_reserved_column("fk_company"));
        assert!(!is_reserved_column("status"));
    }

    #[test]
    fn test_error_kinds_include_wildcard() {
        assert!(is_error_kind("validation_error"));
        assert!(is_error_kind("OTHERS"));
        assert!(!is_error_kind("others"));
        assert!(!is_error_kind("timeout"));
    }
}
