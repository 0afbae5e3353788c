//! Formula AST
//!
//! Tagged expression variants with a deterministic pretty form. The pretty
//! form fully parenthesizes nested operators, so `pretty()` output re-parses
//! to the same tree.

use std::fmt;

/// Binary operators, grouped by precedence tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `OR`
    Or,
    /// `AND`
    And,
    /// `=`
    Eq,
    /// `<>` / `!=`
    Neq,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `&` string concatenation
    Concat,
    /// `*`
    Mul,
    /// `/`
    Div,
}

impl BinaryOp {
    /// Surface-syntax spelling
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "OR",
            BinaryOp::And => "AND",
            BinaryOp::Eq => "=",
            BinaryOp::Neq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Concat => "&",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }

    /// True for `= <> < > <= >=`
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Neq | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge
        )
    }

    /// True for `AND` / `OR`
    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// True for `+ - * /`
    pub fn is_arithmetic(&self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `NOT`
    Not,
}

/// Formula expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `left op right`
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// `op operand`
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Expr>,
    },
    /// `NAME(arg, …)` — name canonicalized to uppercase
    FunctionCall {
        /// Canonical (uppercase) function name
        name: String,
        /// Arguments in order
        args: Vec<Expr>,
    },
    /// `@name` / `@[name]`
    ColumnRef {
        /// Referenced column name as written
        name: String,
    },
    /// `"…"`
    StringLiteral {
        /// Unescaped contents
        value: String,
    },
    /// Number in source form
    NumberLiteral {
        /// Verbatim digits (emitted unchanged into SQL)
        raw: String,
    },
    /// `TRUE` / `FALSE`
    BooleanLiteral {
        /// The value
        value: bool,
    },
    /// `needle IN (a, b, …)`
    In {
        /// Tested expression
        needle: Box<Expr>,
        /// Candidate list
        haystack: Vec<Expr>,
    },
}

impl Expr {
    /// Deterministic pretty form; re-parses to the same tree
    pub fn pretty(&self) -> String {
        match self {
            Expr::Binary { op, left, right } => {
                format!("({} {} {})", left.pretty(), op.symbol(), right.pretty())
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Neg => format!("(-{})", operand.pretty()),
                UnaryOp::Not => format!("(NOT {})", operand.pretty()),
            },
            Expr::FunctionCall { name, args } => {
                let args: Vec<String> = args.iter().map(|a| a.pretty()).collect();
                format!("{}({})", name, args.join(", "))
            }
            Expr::ColumnRef { name } => {
                if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    format!("@{name}")
                } else {
                    format!("@[{name}]")
                }
            }
            Expr::StringLiteral { value } => {
                format!("\"{}\"", value.replace('"', "\"\""))
            }
            Expr::NumberLiteral { raw } => raw.clone(),
            Expr::BooleanLiteral { value } => {
                if *value { "TRUE".to_string() } else { "FALSE".to_string() }
            }
            Expr::In { needle, haystack } => {
                let items: Vec<String> = haystack.iter().map(|e| e.pretty()).collect();
                format!("({} IN ({}))", needle.pretty(), items.join(", "))
            }
        }
    }

    /// Collect every referenced column name, in first-appearance order
    pub fn referenced_columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.walk_columns(&mut out);
        out
    }

    fn walk_columns(&self, out: &mut Vec<String>) {
        match self {
            Expr::Binary { left, right, .. } => {
                left.walk_columns(out);
                right.walk_columns(out);
            }
            Expr::Unary { operand, .. } => operand.walk_columns(out),
            Expr::FunctionCall { args, .. } => {
                for a in args {
                    a.walk_columns(out);
                }
            }
            Expr::ColumnRef { name } => {
                if !out.iter().any(|n| n == name) {
                    out.push(name.clone());
                }
            }
            Expr::In { needle, haystack } => {
                needle.walk_columns(out);
                for e in haystack {
                    e.walk_columns(out);
                }
            }
            Expr::StringLiteral { .. } | Expr::NumberLiteral { .. } | Expr::BooleanLiteral { .. } => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pretty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str) -> Expr {
        Expr::ColumnRef { name: name.into() }
    }

    fn num(raw: &str) -> Expr {
        Expr::NumberLiteral { raw: raw.into() }
    }

    #[test]
    fn test_pretty_binary() {
        let e = Expr::Binary {
            op: BinaryOp::Add,
            left: Box::new(col("a")),
            right: Box::new(num("1")),
        };
        assert_eq!(e.pretty(), "(@a + 1)");
    }

    #[test]
    fn test_pretty_bracketed_column() {
        assert_eq!(col("First Name").pretty(), "@[First Name]");
        assert_eq!(col("plain_name2").pretty(), "@plain_name2");
    }

    #[test]
    fn test_pretty_string_escapes() {
        let e = Expr::StringLiteral { value: "say \"hi\"".into() };
        assert_eq!(e.pretty(), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_pretty_function_and_in() {
        let e = Expr::FunctionCall {
            name: "UPPER".into(),
            args: vec![col("name")],
        };
        assert_eq!(e.pretty(), "UPPER(@name)");

        let e = Expr::In {
            needle: Box::new(col("state")),
            haystack: vec![
                Expr::StringLiteral { value: "CA".into() },
                Expr::StringLiteral { value: "NY".into() },
            ],
        };
        assert_eq!(e.pretty(), "(@state IN (\"CA\", \"NY\"))");
    }

    #[test]
    fn test_referenced_columns_dedupe_in_order() {
        let e = Expr::Binary {
            op: BinaryOp::Concat,
            left: Box::new(Expr::Binary {
                op: BinaryOp::Concat,
                left: Box::new(col("b")),
                right: Box::new(col("a")),
            }),
            right: Box::new(col("b")),
        };
        assert_eq!(e.referenced_columns(), vec!["b", "a"]);
    }

    #[test]
    fn test_op_classification() {
        assert!(BinaryOp::Eq.is_comparison());
        assert!(BinaryOp::And.is_logical());
        assert!(BinaryOp::Mul.is_arithmetic());
        assert!(!BinaryOp::Concat.is_arithmetic());
        assert!(!BinaryOp::Concat.is_comparison());
    }
}
