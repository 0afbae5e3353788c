//! Lowering from the formula AST to SQL
//!
//! Rules:
//! - Column references always emit as double-quoted identifiers; the quoting
//!   function rejects any name containing a quote.
//! - String literals single-quote with doubled embedded quotes.
//! - Function calls dispatch through the catalog templates; `IF` and
//!   `IFERROR` get branch type coercion here.
//! - Unknown columns still emit their quoted identifier so callers that
//!   bypass validation get a precise runtime error from the engine.
//!
//! Branch coercion finds the common type of both branches (string wins over
//! number over boolean; string is the fallback for everything else) and wraps
//! the disagreeing branch: `CAST(… AS VARCHAR)` for string, `CAST(… AS
//! DOUBLE)` for number, a truthiness expansion for boolean.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::functions::{self, ReturnHint};
use crate::validate::resolve_column;
use cleanslate_core::{ColumnInfo, ColumnType};
use std::fmt;

/// Lowering failure (only identifier quoting can fail)
#[derive(Debug, Clone, PartialEq)]
pub struct LowerError {
    /// What went wrong
    pub message: String,
}

impl fmt::Display for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LowerError {}

/// Double-quote an identifier; rejects names containing a quote
pub fn quote_ident(name: &str) -> Result<String, LowerError> {
    if name.contains('"') {
        return Err(LowerError {
            message: format!("column name contains a quote: {name}"),
        });
    }
    Ok(format!("\"{name}\""))
}

/// Single-quote a string literal, doubling embedded quotes
pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Infer the result type of an expression against a schema
pub fn infer_hint(expr: &Expr, schema: &[ColumnInfo]) -> ReturnHint {
    match expr {
        Expr::StringLiteral { .. } => ReturnHint::Text,
        Expr::NumberLiteral { .. } => ReturnHint::Number,
        Expr::BooleanLiteral { .. } => ReturnHint::Boolean,
        Expr::ColumnRef { name } => match resolve_column(name, schema) {
            Some(info) => match info.column_type {
                ColumnType::Varchar => ReturnHint::Text,
                ColumnType::Bigint | ColumnType::Double => ReturnHint::Number,
                ColumnType::Boolean => ReturnHint::Boolean,
                ColumnType::Date | ColumnType::Timestamp => ReturnHint::Date,
            },
            None => ReturnHint::Any,
        },
        Expr::Binary { op, .. } => {
            if op.is_arithmetic() {
                ReturnHint::Number
            } else if *op == BinaryOp::Concat {
                ReturnHint::Text
            } else {
                ReturnHint::Boolean
            }
        }
        Expr::Unary { op, .. } => match op {
            UnaryOp::Neg => ReturnHint::Number,
            UnaryOp::Not => ReturnHint::Boolean,
        },
        Expr::FunctionCall { name, args } => match name.as_str() {
            // Conditionals take the common type of their branches.
            "IF" if args.len() == 3 => {
                common_type(infer_hint(&args[1], schema), infer_hint(&args[2], schema))
            }
            "IFERROR" if args.len() == 2 => {
                common_type(infer_hint(&args[0], schema), infer_hint(&args[1], schema))
            }
            "COALESCE" if !args.is_empty() => args
                .iter()
                .map(|a| infer_hint(a, schema))
                .reduce(common_type)
                .unwrap_or(ReturnHint::Any),
            _ => functions::lookup(name).map_or(ReturnHint::Any, |spec| spec.hint),
        },
        Expr::In { .. } => ReturnHint::Boolean,
    }
}

/// The common type of two branch hints
///
/// String wins over number, number over boolean; `Any` adopts the other
/// side; disagreeing leftovers (e.g. date vs number) fall back to string.
pub fn common_type(a: ReturnHint, b: ReturnHint) -> ReturnHint {
    use ReturnHint::*;
    match (a, b) {
        (x, y) if x == y => x,
        (Any, other) | (other, Any) => other,
        (Text, _) | (_, Text) => Text,
        (Number, Boolean) | (Boolean, Number) => Number,
        _ => Text,
    }
}

fn coerce(sql: String, from: ReturnHint, to: ReturnHint) -> String {
    if from == to {
        return sql;
    }
    match to {
        ReturnHint::Text => format!("CAST({sql} AS VARCHAR)"),
        ReturnHint::Number => format!("CAST({sql} AS DOUBLE)"),
        ReturnHint::Boolean => format!(
            "(CASE WHEN {sql} IS NULL THEN 0 WHEN CAST({sql} AS VARCHAR) IN ('', '0', 'false', 'FALSE') THEN 0 ELSE 1 END)"
        ),
        // Date and Any targets take the value as-is.
        ReturnHint::Date | ReturnHint::Any => sql,
    }
}

/// Lower an expression to SQL against a schema
pub fn lower(expr: &Expr, schema: &[ColumnInfo]) -> Result<String, LowerError> {
    match expr {
        Expr::NumberLiteral { raw } => Ok(raw.clone()),
        Expr::StringLiteral { value } => Ok(quote_string(value)),
        Expr::BooleanLiteral { value } => Ok(if *value { "TRUE" } else { "FALSE" }.to_string()),
        Expr::ColumnRef { name } => {
            // Resolved references emit the schema's canonical casing;
            // unresolved ones emit as written for a precise engine error.
            let canonical = resolve_column(name, schema)
                .map(|c| c.name.as_str())
                .unwrap_or(name.as_str());
            quote_ident(canonical)
        }
        Expr::Unary { op, operand } => {
            let inner = lower(operand, schema)?;
            Ok(match op {
                UnaryOp::Neg => format!("(-{inner})"),
                UnaryOp::Not => format!("(NOT {inner})"),
            })
        }
        Expr::Binary { op, left, right } => {
            let l = lower(left, schema)?;
            let r = lower(right, schema)?;
            let symbol = match op {
                BinaryOp::Concat => {
                    // Concatenation coerces both sides to text.
                    return Ok(format!(
                        "(CAST({l} AS VARCHAR) || CAST({r} AS VARCHAR))"
                    ));
                }
                BinaryOp::Neq => "<>",
                other => other.symbol(),
            };
            Ok(format!("({l} {symbol} {r})"))
        }
        Expr::In { needle, haystack } => {
            let n = lower(needle, schema)?;
            let items = haystack
                .iter()
                .map(|e| lower(e, schema))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("({n} IN ({}))", items.join(", ")))
        }
        Expr::FunctionCall { name, args } => lower_call(name, args, schema),
    }
}

fn lower_call(name: &str, args: &[Expr], schema: &[ColumnInfo]) -> Result<String, LowerError> {
    let lowered: Vec<String> = args
        .iter()
        .map(|a| lower(a, schema))
        .collect::<Result<Vec<_>, _>>()?;

    match name {
        "IF" if args.len() == 3 => {
            let then_hint = infer_hint(&args[1], schema);
            let else_hint = infer_hint(&args[2], schema);
            let target = common_type(then_hint, else_hint);
            let then_sql = coerce(lowered[1].clone(), then_hint, target);
            let else_sql = coerce(lowered[2].clone(), else_hint, target);
            Ok(format!(
                "CASE WHEN {} THEN {} ELSE {} END",
                lowered[0], then_sql, else_sql
            ))
        }
        "IFERROR" if args.len() == 2 => {
            let expr_hint = infer_hint(&args[0], schema);
            let fb_hint = infer_hint(&args[1], schema);
            let target = common_type(expr_hint, fb_hint);
            let expr_sql = coerce(lowered[0].clone(), expr_hint, target);
            let fb_sql = coerce(lowered[1].clone(), fb_hint, target);
            Ok(format!("COALESCE(({expr_sql}), {fb_sql})"))
        }
        _ => match functions::lookup(name) {
            Some(spec) => Ok((spec.template)(&lowered)),
            None => {
                // Unknown functions are a validation error; emit a call so a
                // bypassing caller gets the engine's unknown-function error.
                Ok(format!("{name}({})", lowered.join(", ")))
            }
        },
    }
}
