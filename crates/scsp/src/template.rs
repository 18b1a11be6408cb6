//! Statement templating.
//!
//! SCSP has no bind protocol: parameters are rendered as SQL literals and
//! spliced into the statement text before it is sent.

use std::collections::HashMap;
use std::fmt::Write as _;

use scsp_core::Value;

/// Values bound to a statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    /// Nothing to bind; the statement is sent as-is
    #[default]
    None,
    /// Values for `?` placeholders, in order
    Positional(Vec<Value>),
    /// Values for `:name` placeholders
    Named(HashMap<String, Value>),
}

impl Params {
    /// Build positional parameters from anything convertible to [`Value`].
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Params::Positional(values.into_iter().map(Into::into).collect())
    }

    /// Build named parameters from `(name, value)` pairs.
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Params::Named(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

impl From<HashMap<String, Value>> for Params {
    fn from(values: HashMap<String, Value>) -> Self {
        Params::Named(values)
    }
}

/// Render a value as an SQL literal.
pub fn escape(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => {
            if f.is_finite() {
                f.to_string()
            } else {
                // SQLite has no literal for NaN or infinity
                "NULL".to_string()
            }
        }
        Value::Text(s) => escape_string(s),
        Value::Blob(b) => escape_bytes(b),
        Value::Json(j) => escape_string(&j.to_string()),
    }
}

fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 2);
    result.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            result.push_str("''");
        } else {
            result.push(ch);
        }
    }
    result.push('\'');
    result
}

fn escape_bytes(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 2 + 3);
    result.push_str("X'");
    for byte in data {
        let _ = write!(result, "{byte:02X}");
    }
    result.push('\'');
    result
}

/// Splice bound values into `sql`.
///
/// `?` placeholders take positional values in order; any beyond the
/// supplied sequence stay literal. `:name` placeholders take named values;
/// names with no matching key stay untouched. Placeholders inside quoted
/// strings and identifiers are never replaced.
pub fn interpolate(sql: &str, params: &Params) -> String {
    if matches!(params, Params::None) {
        return sql.to_string();
    }

    let mut result = String::with_capacity(sql.len() + 32);
    let mut chars = sql.chars().peekable();
    let mut param_index = 0;

    while let Some(ch) = chars.next() {
        match ch {
            '?' => match params {
                Params::Positional(values) if param_index < values.len() => {
                    result.push_str(&escape(&values[param_index]));
                    param_index += 1;
                }
                _ => result.push('?'),
            },
            ':' if chars.peek().is_some_and(|c| c.is_ascii_alphabetic() || *c == '_') => {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match params {
                    Params::Named(values) if values.contains_key(&name) => {
                        result.push_str(&escape(&values[&name]));
                    }
                    _ => {
                        result.push(':');
                        result.push_str(&name);
                    }
                }
            }
            '\'' | '"' | '`' => {
                result.push(ch);
                while let Some(next) = chars.next() {
                    result.push(next);
                    if next == ch {
                        // doubled quote is an escaped quote
                        if chars.peek() == Some(&ch) {
                            result.push(ch);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            _ => result.push(ch),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_literals() {
        assert_eq!(escape(&Value::from("O'Conner")), "'O''Conner'");
        assert_eq!(escape(&Value::from(&b"\x48\x65"[..])), "X'4865'");
        assert_eq!(escape(&Value::Null), "NULL");
        assert_eq!(escape(&Value::Bool(true)), "1");
        assert_eq!(escape(&Value::Bool(false)), "0");
        assert_eq!(escape(&Value::Integer(-12)), "-12");
        assert_eq!(escape(&Value::Float(2.5)), "2.5");
        assert_eq!(escape(&Value::Float(f64::NAN)), "NULL");
    }

    #[test]
    fn test_escape_json() {
        let value = Value::Json(serde_json::json!({"name": "O'Hara"}));
        assert_eq!(escape(&value), r#"'{"name":"O''Hara"}'"#);
    }

    #[test]
    fn test_positional() {
        let sql = interpolate(
            "SELECT * FROM t WHERE a = ? AND b = ?",
            &Params::positional([Value::from(1), Value::from("x")]),
        );
        assert_eq!(sql, "SELECT * FROM t WHERE a = 1 AND b = 'x'");
    }

    #[test]
    fn test_extra_positional_placeholders_stay_literal() {
        let sql = interpolate("VALUES (?, ?, ?)", &Params::positional([1, 2]));
        assert_eq!(sql, "VALUES (1, 2, ?)");
    }

    #[test]
    fn test_named() {
        let params = Params::named([("id", Value::from(7)), ("name", Value::from("Ann"))]);
        let sql = interpolate("UPDATE t SET name = :name WHERE id = :id", &params);
        assert_eq!(sql, "UPDATE t SET name = 'Ann' WHERE id = 7");
    }

    #[test]
    fn test_missing_named_key_is_untouched() {
        let params = Params::named([("id", 1)]);
        let sql = interpolate("SELECT :id, :other", &params);
        assert_eq!(sql, "SELECT 1, :other");
    }

    #[test]
    fn test_placeholders_inside_literals_are_kept() {
        let sql = interpolate(
            "SELECT '?', 'it''s :id', \"col?\" FROM t WHERE x = ?",
            &Params::positional([5]),
        );
        assert_eq!(sql, "SELECT '?', 'it''s :id', \"col?\" FROM t WHERE x = 5");

        let sql = interpolate("SELECT ':id' || :id", &Params::named([("id", 3)]));
        assert_eq!(sql, "SELECT ':id' || 3");
    }

    #[test]
    fn test_no_params_is_verbatim() {
        assert_eq!(interpolate("SELECT ?, :x", &Params::None), "SELECT ?, :x");
    }

    #[test]
    fn test_lone_colon_is_kept() {
        let sql = interpolate("SELECT 1 :: 2, ?", &Params::positional([3]));
        assert_eq!(sql, "SELECT 1 :: 2, 3");
    }
}
