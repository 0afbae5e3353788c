//! Formula validation
//!
//! Validation is structural: it returns a report, never an error. The report
//! carries every problem found (syntax with position, unknown function, wrong
//! arity, unknown column), non-fatal warnings, and the canonical names of all
//! referenced columns.
//!
//! Column references resolve case-insensitively against the live schema; the
//! report lists the schema's canonical casing.

use crate::ast::{BinaryOp, Expr};
use crate::functions;
use crate::parser::{parse, ParseError};
use cleanslate_core::ColumnInfo;
use serde::Serialize;

/// Kind of validation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Tokenizer or parser failure
    Syntax,
    /// Function name not in the catalog
    UnknownFunction,
    /// Argument count outside the function's bounds
    WrongArity,
    /// Column reference not in the schema
    UnknownColumn,
}

/// One validation failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    /// Failure kind
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
    /// Byte offset for syntax errors; None for semantic ones
    pub position: Option<usize>,
}

/// The validation result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    /// True when `errors` is empty
    pub is_valid: bool,
    /// Failures, in discovery order
    pub errors: Vec<ValidationError>,
    /// Non-fatal findings
    pub warnings: Vec<String>,
    /// Canonical names of referenced columns, first-appearance order
    pub referenced_columns: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<ValidationError>, warnings: Vec<String>, columns: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            referenced_columns: columns,
        }
    }

    /// Report for a formula that failed to parse
    pub fn syntax(err: &ParseError) -> Self {
        Self::from_errors(
            vec![ValidationError {
                kind: ErrorKind::Syntax,
                message: err.message.clone(),
                position: Some(err.pos),
            }],
            Vec::new(),
            Vec::new(),
        )
    }
}

/// Case-insensitive column resolution against the schema
///
/// Returns the schema entry so callers get the canonical casing and declared
/// type.
pub fn resolve_column<'a>(name: &str, schema: &'a [ColumnInfo]) -> Option<&'a ColumnInfo> {
    schema
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(name))
}

/// Validate a formula source string against a schema
pub fn validate(input: &str, schema: &[ColumnInfo]) -> ValidationReport {
    match parse(input) {
        Ok(expr) => validate_expr(&expr, schema),
        Err(err) => ValidationReport::syntax(&err),
    }
}

/// Validate an already-parsed expression against a schema
pub fn validate_expr(expr: &Expr, schema: &[ColumnInfo]) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut columns = Vec::new();
    walk(expr, schema, &mut errors, &mut warnings, &mut columns);
    ValidationReport::from_errors(errors, warnings, columns)
}

fn walk(
    expr: &Expr,
    schema: &[ColumnInfo],
    errors: &mut Vec<ValidationError>,
    warnings: &mut Vec<String>,
    columns: &mut Vec<String>,
) {
    match expr {
        Expr::Binary { op, left, right } => {
            if *op == BinaryOp::Div {
                if let (Expr::NumberLiteral { raw: l }, Expr::NumberLiteral { raw: r }) =
                    (left.as_ref(), right.as_ref())
                {
                    if !l.contains('.') && !r.contains('.') {
                        warnings.push(format!(
                            "{l} / {r} divides two integers; the result is truncated — write {l}.0 / {r} for a fractional result"
                        ));
                    }
                }
            }
            walk(left, schema, errors, warnings, columns);
            walk(right, schema, errors, warnings, columns);
        }
        Expr::Unary { operand, .. } => walk(operand, schema, errors, warnings, columns),
        Expr::FunctionCall { name, args } => {
            match functions::lookup(name) {
                Some(spec) => {
                    if !spec.accepts_arity(args.len()) {
                        errors.push(ValidationError {
                            kind: ErrorKind::WrongArity,
                            message: format!(
                                "{name} takes {} argument(s), got {}",
                                spec.arity_label(),
                                args.len()
                            ),
                            position: None,
                        });
                    }
                }
                None => {
                    errors.push(ValidationError {
                        kind: ErrorKind::UnknownFunction,
                        message: format!("unknown function {name}"),
                        position: None,
                    });
                }
            }
            for a in args {
                walk(a, schema, errors, warnings, columns);
            }
        }
        Expr::ColumnRef { name } => match resolve_column(name, schema) {
            Some(info) => {
                if !columns.iter().any(|c| c == &info.name) {
                    columns.push(info.name.clone());
                }
            }
            None => {
                errors.push(ValidationError {
                    kind: ErrorKind::UnknownColumn,
                    message: format!("unknown column @{name}"),
                    position: None,
                });
                if !columns.iter().any(|c| c == name) {
                    columns.push(name.clone());
                }
            }
        },
        Expr::In { needle, haystack } => {
            walk(needle, schema, errors, warnings, columns);
            for e in haystack {
                walk(e, schema, errors, warnings, columns);
            }
        }
        Expr::StringLiteral { .. } | Expr::NumberLiteral { .. } | Expr::BooleanLiteral { .. } => {}
    }
}
