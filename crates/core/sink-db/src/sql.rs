//! SQL utilities for safe identifier handling and query building.
//!
//! This module provides:
//! 1. **Validation**: Ensures identifiers are safe PostgreSQL identifiers
//! 2. **Quoting**: Properly escapes identifiers for use in SQL statements
//! 3. **Name derivation**: Maps collection/layer names onto valid table names
//!
//! # Security Model
//!
//! All dynamic SQL identifier handling goes through this module, providing
//! a single auditable boundary for SQL injection prevention:
//!
//! ```text
//! Snapshot Input → validate_identifier() → quote_identifier() → SQL Query
//!                  (sqlparser check)        (pg_escape quoting)
//! ```
//!
//! Row *values* never pass through here; they are always bound as query
//! parameters. Identifiers (schema, table and column names) cannot be
//! parameterized in SQL, which is why this boundary exists.

use pg_escape::{quote_identifier, quote_literal};
use sqlparser::{dialect::PostgreSqlDialect, parser::Parser};

/// Errors that occur during SQL identifier validation.
#[derive(Debug, thiserror::Error)]
pub enum ValidateIdentifierError {
    /// Identifier is empty
    #[error("Identifier cannot be empty")]
    Empty,

    /// Identifier exceeds PostgreSQL's 63-byte limit
    #[error("Identifier exceeds PostgreSQL limit of 63 bytes (got {length})")]
    TooLong { length: usize },

    /// Identifier contains invalid characters
    #[error("Identifier contains invalid character: '{character}'")]
    InvalidCharacter { character: char },

    /// Identifier must start with letter or underscore
    #[error("Identifier must start with letter or underscore, got '{first_char}'")]
    InvalidFirstCharacter { first_char: char },

    /// Identifier failed SQL parser validation
    #[error("Not a valid SQL identifier: {reason}")]
    ParserError { reason: String },

    /// Identifier parsed as multiple SQL statements (injection attempt)
    #[error("Identifier parsed as multiple SQL statements")]
    MultipleStatements,
}

/// Validate that a string is a safe PostgreSQL identifier.
///
/// This function validates that:
/// 1. The name parses successfully as a SQL identifier (via sqlparser)
/// 2. It's a simple, unqualified identifier (no dots for schema.table)
/// 3. It doesn't require quoting (no special characters)
/// 4. It doesn't exceed PostgreSQL's 63-byte limit
///
/// This prevents SQL injection while using a battle-tested SQL parser.
pub fn validate_identifier(name: &str) -> Result<(), ValidateIdentifierError> {
    // Check empty
    if name.is_empty() {
        return Err(ValidateIdentifierError::Empty);
    }

    // Check PostgreSQL length limit (63 bytes for identifiers)
    if name.len() > 63 {
        return Err(ValidateIdentifierError::TooLong { length: name.len() });
    }

    // Reject names that would require quoting or contain problematic characters
    // This ensures we only accept simple, unqualified identifiers
    for ch in name.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '_' && ch != '$' {
            return Err(ValidateIdentifierError::InvalidCharacter { character: ch });
        }
    }

    // First character must be letter or underscore (PostgreSQL rule)
    let first_char = name.chars().next().unwrap(); // Safe: we checked for empty above
    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(ValidateIdentifierError::InvalidFirstCharacter { first_char });
    }

    // Use sqlparser to validate that this is a valid SQL identifier
    // This catches edge cases and SQL injection attempts
    let sql = format!("SELECT * FROM {}", name);
    let dialect = PostgreSqlDialect {};

    match Parser::parse_sql(&dialect, &sql) {
        Ok(statements) => {
            // Successfully parsed - verify it's a single SELECT statement
            if statements.len() != 1 {
                return Err(ValidateIdentifierError::MultipleStatements);
            }
            Ok(())
        }
        Err(e) => Err(ValidateIdentifierError::ParserError {
            reason: e.to_string(),
        }),
    }
}

/// Quote an identifier for safe use in SQL.
///
/// Handles reserved keywords, special characters and case-sensitivity via
/// `pg_escape::quote_identifier()`.
pub fn quote(name: &str) -> String {
    quote_identifier(name).to_string()
}

/// Quote a `schema.table` pair, each part independently.
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

/// Quote a string as a SQL literal.
///
/// Only used where a value genuinely cannot be bound as a parameter
/// (utility statements such as `CREATE TABLE .. AS SELECT` reject
/// placeholders). Everything else binds.
pub fn literal(value: &str) -> String {
    quote_literal(value).to_string()
}

/// Build a column definition for CREATE TABLE with proper identifier quoting.
///
/// Formats a column as: `"column_name" TYPE`
pub fn column_definition(column_name: &str, pg_type: &str) -> String {
    format!("{} {}", quote_identifier(column_name), pg_type)
}

/// Derive a valid table name from collection and layer names.
///
/// Target tables are named `{collection}_{layer}`. Provider names may
/// contain characters that are not valid in an unquoted identifier
/// (hyphens in collection ids, arbitrary layer names), so the derived
/// name is normalized: lowercased, invalid characters replaced with `_`,
/// truncated to the 63-byte limit, and prefixed with `_` if it would
/// start with a digit.
pub fn derive_table_name(collection: &str, layer: &str) -> String {
    let raw = format!("{}_{}", collection, layer);
    let mut name: String = raw
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if name
        .chars()
        .next()
        .is_some_and(|c| !c.is_ascii_alphabetic() && c != '_')
    {
        name.insert(0, '_');
    }

    name.truncate(63);
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_valid() {
        assert!(validate_identifier("byggnader_byggnad").is_ok());
        assert!(validate_identifier("metadata_assets").is_ok());
        assert!(validate_identifier("_subdivision").is_ok());
        assert!(validate_identifier("table123").is_ok());
        assert!(validate_identifier("t$ble").is_ok()); // $ is allowed
    }

    #[test]
    fn test_validate_identifier_empty() {
        let err = validate_identifier("").unwrap_err();
        assert!(matches!(err, ValidateIdentifierError::Empty));
    }

    #[test]
    fn test_validate_identifier_too_long() {
        let long_name = "a".repeat(64);
        let err = validate_identifier(&long_name).unwrap_err();
        assert!(matches!(err, ValidateIdentifierError::TooLong { .. }));
    }

    #[test]
    fn test_validate_identifier_invalid_chars() {
        assert!(validate_identifier("kommun-lan-rike").is_err());
        assert!(validate_identifier("user table").is_err());
        assert!(validate_identifier("data.metadata").is_err());
        assert!(validate_identifier("user'table").is_err());
        assert!(validate_identifier("user\"table").is_err());
    }

    #[test]
    fn test_validate_identifier_invalid_first_char() {
        let err = validate_identifier("123table").unwrap_err();
        assert!(matches!(
            err,
            ValidateIdentifierError::InvalidFirstCharacter { .. }
        ));
    }

    #[test]
    fn test_validate_identifier_sql_injection() {
        assert!(validate_identifier("t; DROP TABLE metadata").is_err());
        assert!(validate_identifier("t--").is_err());
        assert!(validate_identifier("t\"; DROP TABLE metadata; --").is_err());
    }

    #[test]
    fn test_qualified_quotes_both_parts() {
        let name = qualified("staging", "byggnader_byggnad");
        assert!(name.contains('.'));
        assert!(name.contains("staging") || name.contains("\"staging\""));
    }

    #[test]
    fn test_literal_escapes_quotes() {
        let lit = literal("o'fallon");
        assert_eq!(lit, "'o''fallon'");
    }

    #[test]
    fn test_derive_table_name_normalizes() {
        assert_eq!(
            derive_table_name("kommun-lan-rike", "Kommun"),
            "kommun_lan_rike_kommun"
        );
        assert_eq!(derive_table_name("byggnader", "byggnad"), "byggnader_byggnad");
        // Derived names always pass the validation boundary
        assert!(validate_identifier(&derive_table_name("kommun-lan-rike", "riksgräns")).is_ok());
    }

    #[test]
    fn test_derive_table_name_digit_prefix() {
        let name = derive_table_name("3d", "byggnad");
        assert!(name.starts_with('_'));
        assert!(validate_identifier(&name).is_ok());
    }

    #[test]
    fn test_derive_table_name_truncates() {
        let name = derive_table_name(&"c".repeat(60), &"l".repeat(60));
        assert_eq!(name.len(), 63);
        assert!(validate_identifier(&name).is_ok());
    }
}
