//! Predicate grammar used by `select`'s filter (§6): a single
//! column/operator/literal comparison, or a conjunction/disjunction of two
//! predicates, or no filter at all.
//!
//! Every comparison is type-directed: the literal is validated against the
//! column's declared type before comparing, so a mismatched literal or an
//! out-of-place `LIKE` always surfaces as a `TypeMismatch`-flavored error
//! rather than silently evaluating to `false`.

use byteorder::{BigEndian, ReadBytesExt};

use crate::field::{self, ColumnType};
use crate::row::{Row, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Like,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    None,
    Single { column: String, op: Op, literal: String },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("no column named {0:?} in this table")]
    UnknownColumn(String),
    #[error(transparent)]
    Field(#[from] field::Error),
    #[error("LIKE only applies to VARCHAR columns, not {0}")]
    LikeOnNonVarchar(ColumnType),
}

/// A value reduced to a form two same-typed values can be ordered by.
enum Comparable {
    Int(i64),
    Text(String),
    Bool(bool),
}

fn comparable(column_type: ColumnType, text: &str) -> Result<Comparable, Error> {
    let bytes = field::encode(column_type, text)?;
    Ok(match column_type {
        ColumnType::Int => Comparable::Int(
            (&bytes[..]).read_i32::<BigEndian>().expect("field::encode produced 4 bytes") as i64,
        ),
        ColumnType::Timestamp => Comparable::Int(
            (&bytes[..]).read_i64::<BigEndian>().expect("field::encode produced 8 bytes"),
        ),
        ColumnType::Boolean => Comparable::Bool(bytes[0] == 0x01),
        ColumnType::Varchar => Comparable::Text(text.to_string()),
    })
}

/// `%`-substring match per §9's resolution: leading/trailing `%` select
/// prefix/suffix/substring matching; a `%` anywhere else in the pattern is
/// literal.
fn like_match(text: &str, pattern: &str) -> bool {
    let leading = pattern.starts_with('%');
    let trailing = pattern.ends_with('%') && pattern.len() > 1;
    let core = pattern.trim_start_matches('%');
    let core = if trailing { &core[..core.len() - 1] } else { core };
    match (leading, trailing) {
        (true, true) => text.contains(core),
        (true, false) => text.ends_with(core),
        (false, true) => text.starts_with(core),
        (false, false) => text == core,
    }
}

/// Evaluates `predicate` against one row. `schema` supplies each column's
/// declared type so literals are validated and compared correctly.
pub fn matches(predicate: &Predicate, row: &Row, schema: &Schema) -> Result<bool, Error> {
    match predicate {
        Predicate::None => Ok(true),
        Predicate::And(a, b) => Ok(matches(a, row, schema)? && matches(b, row, schema)?),
        Predicate::Or(a, b) => Ok(matches(a, row, schema)? || matches(b, row, schema)?),
        Predicate::Single { column, op, literal } => {
            let column_type = schema
                .column_type(column)
                .ok_or_else(|| Error::UnknownColumn(column.clone()))?;
            let value = row.get(column).map(String::as_str).unwrap_or("");

            if *op == Op::Like {
                if column_type != ColumnType::Varchar {
                    return Err(Error::LikeOnNonVarchar(column_type));
                }
                return Ok(like_match(value, literal));
            }

            let left = comparable(column_type, value)?;
            let right = comparable(column_type, literal)?;
            Ok(match (left, right) {
                (Comparable::Int(a), Comparable::Int(b)) => compare(a, b, *op),
                (Comparable::Text(a), Comparable::Text(b)) => compare(a, b, *op),
                (Comparable::Bool(a), Comparable::Bool(b)) => compare(a, b, *op),
                _ => unreachable!("comparable() always yields matching variants for a shared column_type"),
            })
        }
    }
}

fn compare<T: PartialEq + PartialOrd>(a: T, b: T, op: Op) -> bool {
    match op {
        Op::Eq => a == b,
        Op::Ne => a != b,
        Op::Gt => a > b,
        Op::Lt => a < b,
        Op::Ge => a >= b,
        Op::Le => a <= b,
        Op::Like => unreachable!("Like is handled before compare() is called"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            ("id".to_string(), ColumnType::Int),
            ("name".to_string(), ColumnType::Varchar),
            ("active".to_string(), ColumnType::Boolean),
        ])
    }

    fn row(id: &str, name: &str, active: &str) -> Row {
        [("id", id), ("name", name), ("active", active)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn equality_on_int() {
        let p = Predicate::Single { column: "id".to_string(), op: Op::Eq, literal: "5".to_string() };
        assert!(matches(&p, &row("5", "a", "true"), &schema()).unwrap());
        assert!(!matches(&p, &row("6", "a", "true"), &schema()).unwrap());
    }

    #[test]
    fn numeric_ordering_on_int() {
        let p = Predicate::Single { column: "id".to_string(), op: Op::Gt, literal: "10".to_string() };
        assert!(matches(&p, &row("11", "a", "true"), &schema()).unwrap());
        assert!(!matches(&p, &row("9", "a", "true"), &schema()).unwrap());
    }

    #[test]
    fn and_or_compose() {
        let schema = schema();
        let r = row("5", "Ada", "true");
        let p1 = Predicate::Single { column: "id".to_string(), op: Op::Eq, literal: "5".to_string() };
        let p2 = Predicate::Single {
            column: "name".to_string(),
            op: Op::Eq,
            literal: "Grace".to_string(),
        };
        assert!(!matches(&Predicate::And(Box::new(p1.clone()), Box::new(p2.clone())), &r, &schema).unwrap());
        assert!(matches(&Predicate::Or(Box::new(p1), Box::new(p2)), &r, &schema).unwrap());
    }

    #[test]
    fn like_prefix_suffix_and_substring() {
        let schema = schema();
        let r = row("1", "hello world", "true");
        let prefix = Predicate::Single { column: "name".to_string(), op: Op::Like, literal: "hello%".to_string() };
        let suffix = Predicate::Single { column: "name".to_string(), op: Op::Like, literal: "%world".to_string() };
        let substring = Predicate::Single { column: "name".to_string(), op: Op::Like, literal: "%lo wo%".to_string() };
        let exact_miss = Predicate::Single { column: "name".to_string(), op: Op::Like, literal: "hello".to_string() };
        assert!(matches(&prefix, &r, &schema).unwrap());
        assert!(matches(&suffix, &r, &schema).unwrap());
        assert!(matches(&substring, &r, &schema).unwrap());
        assert!(!matches(&exact_miss, &r, &schema).unwrap());
    }

    #[test]
    fn like_on_non_varchar_is_type_mismatch() {
        let p = Predicate::Single { column: "id".to_string(), op: Op::Like, literal: "5%".to_string() };
        assert_eq!(
            matches(&p, &row("5", "a", "true"), &schema()),
            Err(Error::LikeOnNonVarchar(ColumnType::Int))
        );
    }

    #[test]
    fn mismatched_literal_type_is_rejected_not_silently_false() {
        let p = Predicate::Single { column: "id".to_string(), op: Op::Eq, literal: "not-a-number".to_string() };
        assert!(matches!(matches(&p, &row("5", "a", "true"), &schema()), Err(Error::Field(_))));
    }

    #[test]
    fn unknown_column_is_rejected() {
        let p = Predicate::Single { column: "ghost".to_string(), op: Op::Eq, literal: "x".to_string() };
        assert_eq!(
            matches(&p, &row("5", "a", "true"), &schema()),
            Err(Error::UnknownColumn("ghost".to_string()))
        );
    }
}
