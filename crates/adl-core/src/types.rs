//! Scalar and composite type registries
//!
//! Field types above the basic tier come from two static registries: the
//! scalar registry (format-validated primitives) and the composite registry
//! (structured values stored as one JSONB column). Each entry knows its
//! storage type, its optional validation pattern, and the API-facing scalar
//! name the annotation layer uses. Registry content is fixed at build time;
//! per-project types are out of scope.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Tier classification for a field, driving storage and resolution rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTier {
    Basic,
    Scalar,
    Composite,
    Reference,
}

/// One scalar registry entry.
#[derive(Debug, Clone)]
pub struct ScalarType {
    pub name: &'static str,
    /// Postgres column type, including precision where the type carries one.
    pub postgres_type: &'static str,
    /// Regex the generated CHECK constraint enforces, when format-bound.
    pub validation_pattern: Option<&'static str>,
    /// Scalar name the API annotation layer emits.
    pub api_type: &'static str,
    /// Inclusive numeric bounds, for range-checked scalars.
    pub range: Option<(f64, f64)>,
    pub description: &'static str,
}

/// One member of a composite type.
#[derive(Debug, Clone)]
pub struct CompositeField {
    pub name: &'static str,
    /// Scalar or basic type name of the member.
    pub type_name: &'static str,
    pub required: bool,
}

/// One composite registry entry. Stored as JSONB with this member shape.
#[derive(Debug, Clone)]
pub struct CompositeType {
    pub name: &'static str,
    pub description: &'static str,
    pub fields: &'static [CompositeField],
}

const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";
const PHONE_PATTERN: &str = r"^\+[1-9]\d{1,14}$";
const URL_PATTERN: &str = r"^https?://[^\s/$.?#].[^\s]*$";
const SLUG_PATTERN: &str = r"^[a-z0-9]+(?:-[a-z0-9]+)*$";
const COLOR_PATTERN: &str = r"^#[0-9A-Fa-f]{6}$";

static SCALAR_TYPES: Lazy<HashMap<&'static str, ScalarType>> = Lazy::new(|| {
    let entries = [
        ScalarType {
            name: "email",
            postgres_type: "TEXT",
            validation_pattern: Some(EMAIL_PATTERN),
            api_type: "Email",
            range: None,
            description: "Valid email address (RFC 5322 simplified)",
        },
        ScalarType {
            name: "phoneNumber",
            postgres_type: "TEXT",
            validation_pattern: Some(PHONE_PATTERN),
            api_type: "PhoneNumber",
            range: None,
            description: "International phone number (E.164 format)",
        },
        ScalarType {
            name: "url",
            postgres_type: "TEXT",
            validation_pattern: Some(URL_PATTERN),
            api_type: "Url",
            range: None,
            description: "Valid HTTP or HTTPS URL",
        },
        ScalarType {
            name: "slug",
            postgres_type: "TEXT",
            validation_pattern: Some(SLUG_PATTERN),
            api_type: "Slug",
            range: None,
            description: "URL-friendly slug (lowercase, hyphens)",
        },
        ScalarType {
            name: "markdown",
            postgres_type: "TEXT",
            validation_pattern: None,
            api_type: "Markdown",
            range: None,
            description: "Markdown formatted text",
        },
        ScalarType {
            name: "html",
            postgres_type: "TEXT",
            validation_pattern: None,
            api_type: "Html",
            range: None,
            description: "HTML content (sanitized on input)",
        },
        ScalarType {
            name: "ipAddress",
            postgres_type: "INET",
            validation_pattern: None,
            api_type: "IpAddress",
            range: None,
            description: "IPv4 or IPv6 address",
        },
        ScalarType {
            name: "macAddress",
            postgres_type: "MACADDR",
            validation_pattern: None,
            api_type: "MacAddress",
            range: None,
            description: "MAC address",
        },
        ScalarType {
            name: "money",
            postgres_type: "NUMERIC(19,4)",
            validation_pattern: None,
            api_type: "Money",
            range: Some((0.0, f64::MAX)),
            description: "Monetary amount (use MoneyAmount composite for currency)",
        },
        ScalarType {
            name: "percentage",
            postgres_type: "NUMERIC(5,2)",
            validation_pattern: None,
            api_type: "Percentage",
            range: Some((0.0, 100.0)),
            description: "Percentage value (0-100)",
        },
        ScalarType {
            name: "date",
            postgres_type: "DATE",
            validation_pattern: None,
            api_type: "Date",
            range: None,
            description: "Calendar date (no time)",
        },
        ScalarType {
            name: "datetime",
            postgres_type: "TIMESTAMPTZ",
            validation_pattern: None,
            api_type: "DateTime",
            range: None,
            description: "Timestamp with timezone",
        },
        ScalarType {
            name: "time",
            postgres_type: "TIME",
            validation_pattern: None,
            api_type: "Time",
            range: None,
            description: "Time of day (no date)",
        },
        ScalarType {
            name: "duration",
            postgres_type: "INTERVAL",
            validation_pattern: None,
            api_type: "Duration",
            range: None,
            description: "Time duration (interval)",
        },
        ScalarType {
            name: "coordinates",
            postgres_type: "POINT",
            validation_pattern: None,
            api_type: "Coordinates",
            range: None,
            description: "Geographic coordinates (lat, lng)",
        },
        ScalarType {
            name: "latitude",
            postgres_type: "NUMERIC(10,8)",
            validation_pattern: None,
            api_type: "Latitude",
            range: Some((-90.0, 90.0)),
            description: "Latitude (-90 to 90)",
        },
        ScalarType {
            name: "longitude",
            postgres_type: "NUMERIC(11,8)",
            validation_pattern: None,
            api_type: "Longitude",
            range: Some((-180.0, 180.0)),
            description: "Longitude (-180 to 180)",
        },
        ScalarType {
            name: "image",
            postgres_type: "TEXT",
            validation_pattern: None,
            api_type: "Image",
            range: None,
            description: "Image URL or path",
        },
        ScalarType {
            name: "file",
            postgres_type: "TEXT",
            validation_pattern: None,
            api_type: "File",
            range: None,
            description: "File URL or path",
        },
        ScalarType {
            name: "color",
            postgres_type: "TEXT",
            validation_pattern: Some(COLOR_PATTERN),
            api_type: "Color",
            range: None,
            description: "Hex color code",
        },
        ScalarType {
            name: "uuid",
            postgres_type: "UUID",
            validation_pattern: None,
            api_type: "UUID",
            range: None,
            description: "UUID v4",
        },
        ScalarType {
            name: "boolean",
            postgres_type: "BOOLEAN",
            validation_pattern: None,
            api_type: "Boolean",
            range: None,
            description: "True or false value",
        },
        ScalarType {
            name: "json",
            postgres_type: "JSONB",
            validation_pattern: None,
            api_type: "JSON",
            range: None,
            description: "JSON object or array",
        },
    ];
    entries.into_iter().map(|s| (s.name, s)).collect()
});

static COMPOSITE_TYPES: Lazy<HashMap<&'static str, CompositeType>> = Lazy::new(|| {
    let entries = [
        CompositeType {
            name: "SimpleAddress",
            description: "Basic address information",
            fields: &[
                CompositeField { name: "street", type_name: "text", required: true },
                CompositeField { name: "city", type_name: "text", required: true },
                CompositeField { name: "state", type_name: "text", required: true },
                CompositeField { name: "zipCode", type_name: "text", required: true },
                CompositeField { name: "country", type_name: "text", required: false },
            ],
        },
        CompositeType {
            name: "MoneyAmount",
            description: "Monetary amount with currency",
            fields: &[
                CompositeField { name: "amount", type_name: "money", required: true },
                CompositeField { name: "currency", type_name: "text", required: true },
            ],
        },
        CompositeType {
            name: "PersonName",
            description: "Person's full name",
            fields: &[
                CompositeField { name: "firstName", type_name: "text", required: true },
                CompositeField { name: "lastName", type_name: "text", required: true },
                CompositeField { name: "middleName", type_name: "text", required: false },
                CompositeField { name: "title", type_name: "text", required: false },
                CompositeField { name: "suffix", type_name: "text", required: false },
            ],
        },
        CompositeType {
            name: "ContactInfo",
            description: "Contact information",
            fields: &[
                CompositeField { name: "email", type_name: "email", required: false },
                CompositeField { name: "phone", type_name: "phoneNumber", required: false },
                CompositeField { name: "website", type_name: "url", required: false },
            ],
        },
        CompositeType {
            name: "Coordinates",
            description: "Geographic coordinates",
            fields: &[
                CompositeField { name: "latitude", type_name: "latitude", required: true },
                CompositeField { name: "longitude", type_name: "longitude", required: true },
            ],
        },
        CompositeType {
            name: "TimeRange",
            description: "Time range with start and end",
            fields: &[
                CompositeField { name: "start", type_name: "time", required: true },
                CompositeField { name: "end", type_name: "time", required: true },
            ],
        },
        CompositeType {
            name: "DateRange",
            description: "Date range with start and end",
            fields: &[
                CompositeField { name: "start", type_name: "date", required: true },
                CompositeField { name: "end", type_name: "date", required: true },
            ],
        },
        CompositeType {
            name: "PhoneNumber",
            description: "Phone number with country code",
            fields: &[
                CompositeField { name: "countryCode", type_name: "text", required: true },
                CompositeField { name: "number", type_name: "text", required: true },
            ],
        },
        CompositeType {
            name: "EmailAddress",
            description: "Email address with display name",
            fields: &[
                CompositeField { name: "address", type_name: "email", required: true },
                CompositeField { name: "displayName", type_name: "text", required: false },
            ],
        },
        CompositeType {
            name: "URL",
            description: "URL with components",
            fields: &[
                CompositeField { name: "protocol", type_name: "text", required: true },
                CompositeField { name: "host", type_name: "text", required: true },
                CompositeField { name: "path", type_name: "text", required: false },
                CompositeField { name: "query", type_name: "text", required: false },
                CompositeField { name: "fragment", type_name: "text", required: false },
            ],
        },
        CompositeType {
            name: "Color",
            description: "Color in RGB format with optional alpha",
            fields: &[
                CompositeField { name: "red", type_name: "integer", required: true },
                CompositeField { name: "green", type_name: "integer", required: true },
                CompositeField { name: "blue", type_name: "integer", required: true },
                CompositeField { name: "alpha", type_name: "decimal", required: false },
            ],
        },
    ];
    entries.into_iter().map(|c| (c.name, c)).collect()
});

/// Basic-tier type names and their storage types.
const BASIC_TYPES: &[(&str, &str)] = &[
    ("text", "TEXT"),
    ("integer", "INTEGER"),
    ("bigint", "BIGINT"),
    ("decimal", "NUMERIC"),
    ("boolean", "BOOLEAN"),
    ("date", "DATE"),
    ("timestamp", "TIMESTAMPTZ"),
    ("serial", "SERIAL"),
];

pub fn scalar_type(name: &str) -> Option<&'static ScalarType> {
    SCALAR_TYPES.get(name)
}

pub fn composite_type(name: &str) -> Option<&'static CompositeType> {
    COMPOSITE_TYPES.get(name)
}

pub fn is_scalar_type(name: &str) -> bool {
    SCALAR_TYPES.contains_key(name)
}

pub fn is_composite_type(name: &str) -> bool {
    COMPOSITE_TYPES.contains_key(name)
}

pub fn basic_storage_type(name: &str) -> Option<&'static str> {
    BASIC_TYPES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, pg)| *pg)
}

pub fn is_basic_type(name: &str) -> bool {
    basic_storage_type(name).is_some()
}

/// Compiled validation regex for a scalar, shared across calls.
pub fn validation_regex(name: &str) -> Option<&'static Regex> {
    static COMPILED: Lazy<HashMap<&'static str, Regex>> = Lazy::new(|| {
        SCALAR_TYPES
            .values()
            .filter_map(|s| {
                s.validation_pattern
                    .map(|p| (s.name, Regex::new(p).unwrap()))
            })
            .collect()
    });
    COMPILED.get(name)
}

/// Zero value used when a `declare` step has no default.
pub fn zero_value(type_name: &str) -> &'static str {
    match type_name {
        "integer" | "bigint" | "serial" => "0",
        "decimal" | "numeric" | "money" | "percentage" => "0",
        "boolean" => "FALSE",
        "text" => "''",
        "json" | "jsonb" => "'{}'::jsonb",
        _ => "NULL",
    }
}

/// PL/pgSQL declaration type for a `declare` step's type name.
pub fn declare_storage_type(type_name: &str) -> String {
    if let Some(pg) = basic_storage_type(type_name) {
        return pg.to_string();
    }
    if let Some(scalar) = scalar_type(type_name) {
        return scalar.postgres_type.to_string();
    }
    match type_name {
        "numeric" => "NUMERIC".to_string(),
        "record" => "RECORD".to_string(),
        _ => type_name.to_uppercase(),
    }
}
