//! Spreadsheet-formula transpiler
//!
//! Parses the spreadsheet-style surface language (`@column` references,
//! string/number/boolean literals, arithmetic, concatenation, comparisons,
//! AND/OR/NOT, a closed function catalog) into a typed AST, validates it
//! against a live column schema, and lowers it to SQL with type coercion.
//!
//! Validation failures are structural — a [`ValidationReport`], never an
//! error. Lowering proceeds even for unknown columns (the quoted identifier
//! is emitted) so callers that bypass validation get a precise engine error.
//!
//! ```ignore
//! let schema = vec![ColumnInfo::new("name", ColumnType::Varchar)];
//! let out = transpile("=UPPER(@name)", &schema);
//! assert!(out.report.is_valid);
//! assert_eq!(out.sql.as_deref(), Some("UPPER(CAST(\"name\" AS VARCHAR))"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod functions;
pub mod lower;
pub mod parser;
pub mod token;
pub mod validate;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use functions::{lookup, FunctionSpec, ReturnHint, FUNCTIONS};
pub use lower::{lower, quote_ident, quote_string, LowerError};
pub use parser::{parse, ParseError};
pub use validate::{validate, validate_expr, ErrorKind, ValidationError, ValidationReport};

use cleanslate_core::ColumnInfo;

/// Result of transpiling a formula
#[derive(Debug, Clone, PartialEq)]
pub struct TranspileOutput {
    /// Lowered SQL; None when the formula failed to parse or quote
    pub sql: Option<String>,
    /// The validation report
    pub report: ValidationReport,
}

/// Parse, validate, and lower a formula in one call
pub fn transpile(input: &str, schema: &[ColumnInfo]) -> TranspileOutput {
    let expr = match parser::parse(input) {
        Ok(expr) => expr,
        Err(err) => {
            return TranspileOutput {
                sql: None,
                report: ValidationReport::syntax(&err),
            };
        }
    };
    let report = validate::validate_expr(&expr, schema);
    let sql = lower::lower(&expr, schema).ok();
    TranspileOutput { sql, report }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    // A small generator of well-formed formulas.
    fn arb_formula() -> impl Strategy<Value = String> {
        let leaf = prop_oneof![
            "[0-9]{1,4}".prop_map(|n| n),
            "[a-z]{1,6}".prop_map(|s| format!("\"{s}\"")),
            Just("@name".to_string()),
            Just("@age".to_string()),
            Just("TRUE".to_string()),
        ];
        leaf.prop_recursive(3, 16, 3, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a} + {b})")),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a} & {b})")),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("IF(({a} = {b}), {a}, {b})")),
                inner.prop_map(|a| format!("UPPER({a})")),
            ]
        })
    }

    proptest! {
        #[test]
        fn pretty_form_reparses_to_same_tree(src in arb_formula()) {
            let first = parse(&src).unwrap();
            let second = parse(&first.pretty()).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn lowering_never_panics(src in arb_formula()) {
            let schema = vec![
                cleanslate_core::ColumnInfo::new("name", cleanslate_core::ColumnType::Varchar),
                cleanslate_core::ColumnInfo::new("age", cleanslate_core::ColumnType::Bigint),
            ];
            let out = transpile(&src, &schema);
            prop_assert!(out.sql.is_some());
        }
    }
}
