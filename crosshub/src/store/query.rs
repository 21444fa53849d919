//! Typed filters over the persisted cross transaction fields, rendered to parameterised SQL.

use rusqlite::{ToSql, types::ToSqlOutput};

use crate::types::{CrossStatus, Timestamp};

/// A queryable field of a persisted cross transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldName {
    Pk,
    CrossId,
    TxId,
    BlockNumber,
    Timestamp,
    EventName,
    Status,
}

impl FieldName {
    pub(super) fn column(self) -> &'static str {
        match self {
            FieldName::Pk => "pk",
            FieldName::CrossId => "cross_id",
            FieldName::TxId => "tx_id",
            FieldName::BlockNumber => "block_number",
            FieldName::Timestamp => "timestamp",
            FieldName::EventName => "event_name",
            FieldName::Status => "status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Text(String),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<CrossStatus> for Value {
    fn from(value: CrossStatus) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<Timestamp> for Value {
    fn from(value: Timestamp) -> Self {
        Value::Integer(value.as_nanos())
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Integer(i) => i.to_sql(),
            Value::Text(s) => s.to_sql(),
        }
    }
}

/// A filter on persisted cross transactions. A query's filters are combined with `AND`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    Eq(FieldName, Value),
    Ne(FieldName, Value),
    Gt(FieldName, Value),
    Gte(FieldName, Value),
    Lt(FieldName, Value),
    Lte(FieldName, Value),
    In(FieldName, Vec<Value>),
    And(Vec<Matcher>),
    Or(Vec<Matcher>),
    Not(Box<Matcher>),
}

impl Matcher {
    pub fn equal(field: FieldName, value: impl Into<Value>) -> Matcher {
        Matcher::Eq(field, value.into())
    }

    pub fn greater_than(field: FieldName, value: impl Into<Value>) -> Matcher {
        Matcher::Gt(field, value.into())
    }

    pub fn at_least(field: FieldName, value: impl Into<Value>) -> Matcher {
        Matcher::Gte(field, value.into())
    }

    pub fn less_than(field: FieldName, value: impl Into<Value>) -> Matcher {
        Matcher::Lt(field, value.into())
    }

    pub fn at_most(field: FieldName, value: impl Into<Value>) -> Matcher {
        Matcher::Lte(field, value.into())
    }

    pub fn one_of<V: Into<Value>>(field: FieldName, values: impl IntoIterator<Item = V>) -> Matcher {
        Matcher::In(field, values.into_iter().map(Into::into).collect())
    }

    pub fn negate(matcher: Matcher) -> Matcher {
        Matcher::Not(Box::new(matcher))
    }

    /// Appends this matcher as a SQL expression, pushing its parameters in placeholder order.
    pub(super) fn write_sql(&self, sql: &mut String, params: &mut Vec<Value>) {
        fn compare(field: FieldName, op: &str, value: &Value, sql: &mut String, params: &mut Vec<Value>) {
            params.push(value.clone());
            sql.push_str(&format!("{} {op} ?{}", field.column(), params.len()));
        }

        match self {
            Matcher::Eq(field, value) => compare(*field, "=", value, sql, params),
            Matcher::Ne(field, value) => compare(*field, "<>", value, sql, params),
            Matcher::Gt(field, value) => compare(*field, ">", value, sql, params),
            Matcher::Gte(field, value) => compare(*field, ">=", value, sql, params),
            Matcher::Lt(field, value) => compare(*field, "<", value, sql, params),
            Matcher::Lte(field, value) => compare(*field, "<=", value, sql, params),
            Matcher::In(_, values) if values.is_empty() => sql.push('0'),
            Matcher::In(field, values) => {
                sql.push_str(field.column());
                sql.push_str(" IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    params.push(value.clone());
                    sql.push_str(&format!("?{}", params.len()));
                }
                sql.push(')');
            }
            Matcher::And(matchers) => Self::write_joined(matchers, " AND ", '1', sql, params),
            Matcher::Or(matchers) => Self::write_joined(matchers, " OR ", '0', sql, params),
            Matcher::Not(matcher) => {
                sql.push_str("NOT (");
                matcher.write_sql(sql, params);
                sql.push(')');
            }
        }
    }

    fn write_joined(
        matchers: &[Matcher],
        separator: &str,
        empty: char,
        sql: &mut String,
        params: &mut Vec<Value>,
    ) {
        if matchers.is_empty() {
            sql.push(empty);
            return;
        }
        for (i, matcher) in matchers.iter().enumerate() {
            if i > 0 {
                sql.push_str(separator);
            }
            sql.push('(');
            matcher.write_sql(sql, params);
            sql.push(')');
        }
    }
}
