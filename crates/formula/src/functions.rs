//! Formula function catalog
//!
//! One entry per callable function: arity bounds, return-type hint,
//! description, and the SQL template. The template receives already-lowered
//! argument SQL and produces the call's SQL form.
//!
//! String-producing string functions wrap their string-typed argument in
//! `CAST(… AS VARCHAR)` so numeric columns don't blow up on `LENGTH`,
//! `UPPER`, etc.
//!
//! `IF` and `IFERROR` appear here for arity validation but their lowering
//! lives in the lowering pass, which needs the argument trees for branch
//! type coercion.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Return-type hint used for branch coercion and validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnHint {
    /// Textual result
    Text,
    /// Numeric result
    Number,
    /// Boolean result
    Boolean,
    /// Date/timestamp result
    Date,
    /// Depends on arguments (IF, IFERROR, COALESCE)
    Any,
}

/// One catalog entry
pub struct FunctionSpec {
    /// Canonical (uppercase) name
    pub name: &'static str,
    /// Minimum argument count
    pub min_args: usize,
    /// Maximum argument count; None = variadic
    pub max_args: Option<usize>,
    /// Return-type hint
    pub hint: ReturnHint,
    /// One-line description shown by pickers
    pub description: &'static str,
    /// SQL template over lowered argument SQL
    pub template: fn(&[String]) -> String,
}

impl FunctionSpec {
    /// True when `n` arguments satisfy this entry's arity bounds
    pub fn accepts_arity(&self, n: usize) -> bool {
        n >= self.min_args && self.max_args.map_or(true, |max| n <= max)
    }

    /// Human-readable arity for error messages, e.g. "2", "1-2", "2+"
    pub fn arity_label(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => format!("{max}"),
            Some(max) => format!("{}-{max}", self.min_args),
            None => format!("{}+", self.min_args),
        }
    }
}

fn str_cast(arg: &str) -> String {
    format!("CAST({arg} AS VARCHAR)")
}

/// The function catalog, keyed by canonical name
pub static FUNCTIONS: Lazy<HashMap<&'static str, FunctionSpec>> = Lazy::new(|| {
    let mut m = HashMap::new();
    let mut add = |spec: FunctionSpec| {
        m.insert(spec.name, spec);
    };

    // Conditionals (templates overridden by the coercion-aware lowering)
    add(FunctionSpec {
        name: "IF",
        min_args: 3,
        max_args: Some(3),
        hint: ReturnHint::Any,
        description: "IF(condition, then, else)",
        template: |a| format!("CASE WHEN {} THEN {} ELSE {} END", a[0], a[1], a[2]),
    });
    add(FunctionSpec {
        name: "IFERROR",
        min_args: 2,
        max_args: Some(2),
        hint: ReturnHint::Any,
        description: "IFERROR(expression, fallback) — fallback when the expression fails",
        template: |a| format!("COALESCE(({}), {})", a[0], a[1]),
    });

    // Text
    add(FunctionSpec {
        name: "LEN",
        min_args: 1,
        max_args: Some(1),
        hint: ReturnHint::Number,
        description: "Length of the text value",
        template: |a| format!("LENGTH({})", str_cast(&a[0])),
    });
    add(FunctionSpec {
        name: "UPPER",
        min_args: 1,
        max_args: Some(1),
        hint: ReturnHint::Text,
        description: "Uppercase",
        template: |a| format!("UPPER({})", str_cast(&a[0])),
    });
    add(FunctionSpec {
        name: "LOWER",
        min_args: 1,
        max_args: Some(1),
        hint: ReturnHint::Text,
        description: "Lowercase",
        template: |a| format!("LOWER({})", str_cast(&a[0])),
    });
    add(FunctionSpec {
        name: "LEFT",
        min_args: 2,
        max_args: Some(2),
        hint: ReturnHint::Text,
        description: "LEFT(text, n) — first n characters",
        template: |a| format!("SUBSTR({}, 1, {})", str_cast(&a[0]), a[1]),
    });
    add(FunctionSpec {
        name: "RIGHT",
        min_args: 2,
        max_args: Some(2),
        hint: ReturnHint::Text,
        description: "RIGHT(text, n) — last n characters",
        template: |a| format!("SUBSTR({}, -({}))", str_cast(&a[0]), a[1]),
    });
    add(FunctionSpec {
        name: "MID",
        min_args: 3,
        max_args: Some(3),
        hint: ReturnHint::Text,
        description: "MID(text, start, n) — n characters from 1-indexed start",
        template: |a| format!("SUBSTR({}, {}, {})", str_cast(&a[0]), a[1], a[2]),
    });
    add(FunctionSpec {
        name: "TRIM",
        min_args: 1,
        max_args: Some(1),
        hint: ReturnHint::Text,
        description: "Strip leading and trailing whitespace",
        template: |a| format!("TRIM({})", str_cast(&a[0])),
    });
    add(FunctionSpec {
        name: "CONCAT",
        min_args: 1,
        max_args: None,
        hint: ReturnHint::Text,
        description: "Join values as text; NULL joins as empty",
        template: |a| {
            let parts: Vec<String> = a
                .iter()
                .map(|x| format!("COALESCE({}, '')", str_cast(x)))
                .collect();
            format!("({})", parts.join(" || "))
        },
    });
    add(FunctionSpec {
        name: "SUBSTITUTE",
        min_args: 3,
        max_args: Some(3),
        hint: ReturnHint::Text,
        description: "SUBSTITUTE(text, find, replacement)",
        template: |a| format!("REPLACE({}, {}, {})", str_cast(&a[0]), a[1], a[2]),
    });
    add(FunctionSpec {
        name: "PROPER",
        min_args: 1,
        max_args: Some(1),
        hint: ReturnHint::Text,
        description: "Proper Case Each Word",
        template: |a| format!("PROPER({})", str_cast(&a[0])),
    });
    add(FunctionSpec {
        name: "SPLIT",
        min_args: 3,
        max_args: Some(3),
        hint: ReturnHint::Text,
        description: "SPLIT(text, separator, n) — 1-indexed n-th piece",
        template: |a| format!("SPLIT_PART({}, {}, {})", str_cast(&a[0]), a[1], a[2]),
    });

    // Math
    add(FunctionSpec {
        name: "ROUND",
        min_args: 1,
        max_args: Some(2),
        hint: ReturnHint::Number,
        description: "ROUND(number, digits?)",
        template: |a| {
            if a.len() == 2 {
                format!("ROUND({}, {})", a[0], a[1])
            } else {
                format!("ROUND({})", a[0])
            }
        },
    });
    add(FunctionSpec {
        name: "ABS",
        min_args: 1,
        max_args: Some(1),
        hint: ReturnHint::Number,
        description: "Absolute value",
        template: |a| format!("ABS({})", a[0]),
    });
    add(FunctionSpec {
        name: "CEILING",
        min_args: 1,
        max_args: Some(1),
        hint: ReturnHint::Number,
        description: "Round up to an integer",
        template: |a| format!("CEIL({})", a[0]),
    });
    add(FunctionSpec {
        name: "FLOOR",
        min_args: 1,
        max_args: Some(1),
        hint: ReturnHint::Number,
        description: "Round down to an integer",
        template: |a| format!("FLOOR({})", a[0]),
    });
    add(FunctionSpec {
        name: "MOD",
        min_args: 2,
        max_args: Some(2),
        hint: ReturnHint::Number,
        description: "MOD(a, b) — remainder",
        template: |a| format!("MOD({}, {})", a[0], a[1]),
    });
    add(FunctionSpec {
        name: "POWER",
        min_args: 2,
        max_args: Some(2),
        hint: ReturnHint::Number,
        description: "POWER(base, exponent)",
        template: |a| format!("POWER({}, {})", a[0], a[1]),
    });
    add(FunctionSpec {
        name: "SQRT",
        min_args: 1,
        max_args: Some(1),
        hint: ReturnHint::Number,
        description: "Square root",
        template: |a| format!("SQRT({})", a[0]),
    });

    // Logic
    add(FunctionSpec {
        name: "AND",
        min_args: 2,
        max_args: None,
        hint: ReturnHint::Boolean,
        description: "True when every argument is true",
        template: |a| format!("({})", a.join(" AND ")),
    });
    add(FunctionSpec {
        name: "OR",
        min_args: 2,
        max_args: None,
        hint: ReturnHint::Boolean,
        description: "True when any argument is true",
        template: |a| format!("({})", a.join(" OR ")),
    });
    add(FunctionSpec {
        name: "NOT",
        min_args: 1,
        max_args: Some(1),
        hint: ReturnHint::Boolean,
        description: "Logical negation",
        template: |a| format!("(NOT ({}))", a[0]),
    });
    add(FunctionSpec {
        name: "COALESCE",
        min_args: 2,
        max_args: None,
        hint: ReturnHint::Any,
        description: "First non-NULL argument",
        template: |a| format!("COALESCE({})", a.join(", ")),
    });
    add(FunctionSpec {
        name: "ISBLANK",
        min_args: 1,
        max_args: Some(1),
        hint: ReturnHint::Boolean,
        description: "True for NULL or whitespace-only text",
        template: |a| {
            format!(
                "({} IS NULL OR TRIM({}) = '')",
                a[0],
                str_cast(&a[0])
            )
        },
    });

    // Matching
    add(FunctionSpec {
        name: "CONTAINS",
        min_args: 2,
        max_args: Some(2),
        hint: ReturnHint::Boolean,
        description: "CONTAINS(text, needle) — case-sensitive",
        template: |a| format!("CONTAINS({}, {})", str_cast(&a[0]), a[1]),
    });
    add(FunctionSpec {
        name: "ICONTAINS",
        min_args: 2,
        max_args: Some(2),
        hint: ReturnHint::Boolean,
        description: "CONTAINS ignoring case",
        template: |a| format!("CONTAINS(LOWER({}), LOWER({}))", str_cast(&a[0]), a[1]),
    });
    add(FunctionSpec {
        name: "STARTSWITH",
        min_args: 2,
        max_args: Some(2),
        hint: ReturnHint::Boolean,
        description: "STARTSWITH(text, prefix)",
        template: |a| format!("STARTS_WITH({}, {})", str_cast(&a[0]), a[1]),
    });
    add(FunctionSpec {
        name: "ENDSWITH",
        min_args: 2,
        max_args: Some(2),
        hint: ReturnHint::Boolean,
        description: "ENDSWITH(text, suffix)",
        template: |a| format!("ENDS_WITH({}, {})", str_cast(&a[0]), a[1]),
    });
    add(FunctionSpec {
        name: "LIKE",
        min_args: 2,
        max_args: Some(2),
        hint: ReturnHint::Boolean,
        description: "SQL LIKE pattern match (% and _ wildcards)",
        template: |a| format!("({} LIKE {})", str_cast(&a[0]), a[1]),
    });
    add(FunctionSpec {
        name: "ILIKE",
        min_args: 2,
        max_args: Some(2),
        hint: ReturnHint::Boolean,
        description: "LIKE ignoring case",
        template: |a| format!("(LOWER({}) LIKE LOWER({}))", str_cast(&a[0]), a[1]),
    });
    add(FunctionSpec {
        name: "REGEX",
        min_args: 2,
        max_args: Some(2),
        hint: ReturnHint::Boolean,
        description: "REGEX(text, pattern) — regular-expression match",
        template: |a| format!("REGEXP_MATCHES({}, {})", str_cast(&a[0]), a[1]),
    });
    add(FunctionSpec {
        name: "REGEXEXTRACT",
        min_args: 2,
        max_args: Some(2),
        hint: ReturnHint::Text,
        description: "First regular-expression capture (whole match without groups)",
        template: |a| format!("REGEXP_EXTRACT({}, {})", str_cast(&a[0]), a[1]),
    });
    add(FunctionSpec {
        name: "BETWEEN",
        min_args: 3,
        max_args: Some(3),
        hint: ReturnHint::Boolean,
        description: "BETWEEN(value, low, high) — inclusive",
        template: |a| format!("({} BETWEEN {} AND {})", a[0], a[1], a[2]),
    });

    // Dates
    add(FunctionSpec {
        name: "YEAR",
        min_args: 1,
        max_args: Some(1),
        hint: ReturnHint::Number,
        description: "Year of a date",
        template: |a| format!("CAST(STRFTIME('%Y', {}) AS BIGINT)", a[0]),
    });
    add(FunctionSpec {
        name: "MONTH",
        min_args: 1,
        max_args: Some(1),
        hint: ReturnHint::Number,
        description: "Month of a date (1-12)",
        template: |a| format!("CAST(STRFTIME('%m', {}) AS BIGINT)", a[0]),
    });
    add(FunctionSpec {
        name: "DAY",
        min_args: 1,
        max_args: Some(1),
        hint: ReturnHint::Number,
        description: "Day of month (1-31)",
        template: |a| format!("CAST(STRFTIME('%d', {}) AS BIGINT)", a[0]),
    });
    add(FunctionSpec {
        name: "DATEDIFF",
        min_args: 2,
        max_args: Some(2),
        hint: ReturnHint::Number,
        description: "Whole days between two dates",
        template: |a| format!("DATE_DIFF('day', {}, {})", a[0], a[1]),
    });

    m
});

/// Look up a function by canonical (uppercase) name
pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS.get(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_complete() {
        for name in [
            "IF", "IFERROR", "LEN", "UPPER", "LOWER", "LEFT", "RIGHT", "MID", "TRIM", "CONCAT",
            "SUBSTITUTE", "PROPER", "SPLIT", "ROUND", "ABS", "CEILING", "FLOOR", "MOD", "POWER",
            "SQRT", "AND", "OR", "NOT", "COALESCE", "ISBLANK", "CONTAINS", "ICONTAINS",
            "STARTSWITH", "ENDSWITH", "LIKE", "ILIKE", "REGEX", "REGEXEXTRACT", "BETWEEN", "YEAR",
            "MONTH", "DAY", "DATEDIFF",
        ] {
            assert!(lookup(name).is_some(), "missing catalog entry: {name}");
        }
    }

    #[test]
    fn test_unknown_function() {
        assert!(lookup("VLOOKUP").is_none());
        // Lookup is by canonical name only.
        assert!(lookup("upper").is_none());
    }

    #[test]
    fn test_arity_bounds() {
        let round = lookup("ROUND").unwrap();
        assert!(!round.accepts_arity(0));
        assert!(round.accepts_arity(1));
        assert!(round.accepts_arity(2));
        assert!(!round.accepts_arity(3));
        assert_eq!(round.arity_label(), "1-2");

        let concat = lookup("CONCAT").unwrap();
        assert!(concat.accepts_arity(7));
        assert_eq!(concat.arity_label(), "1+");

        let iff = lookup("IF").unwrap();
        assert_eq!(iff.arity_label(), "3");
    }

    #[test]
    fn test_string_templates_cast_args() {
        let arg = vec!["\"n\"".to_string()];
        let upper = (lookup("UPPER").unwrap().template)(&arg);
        assert_eq!(upper, "UPPER(CAST(\"n\" AS VARCHAR))");

        let len = (lookup("LEN").unwrap().template)(&arg);
        assert_eq!(len, "LENGTH(CAST(\"n\" AS VARCHAR))");
    }

    #[test]
    fn test_mid_is_one_indexed_substr() {
        let args = vec!["\"x\"".to_string(), "2".to_string(), "3".to_string()];
        assert_eq!(
            (lookup("MID").unwrap().template)(&args),
            "SUBSTR(CAST(\"x\" AS VARCHAR), 2, 3)"
        );
    }

    #[test]
    fn test_isblank_shape() {
        let args = vec!["\"x\"".to_string()];
        assert_eq!(
            (lookup("ISBLANK").unwrap().template)(&args),
            "(\"x\" IS NULL OR TRIM(CAST(\"x\" AS VARCHAR)) = '')"
        );
    }

    #[test]
    fn test_icontains_lowers_both_sides() {
        let args = vec!["\"x\"".to_string(), "'N'".to_string()];
        assert_eq!(
            (lookup("ICONTAINS").unwrap().template)(&args),
            "CONTAINS(LOWER(CAST(\"x\" AS VARCHAR)), LOWER('N'))"
        );
    }

    #[test]
    fn test_datediff_template() {
        let args = vec!["\"a\"".to_string(), "\"b\"".to_string()];
        assert_eq!(
            (lookup("DATEDIFF").unwrap().template)(&args),
            "DATE_DIFF('day', \"a\", \"b\")"
        );
    }
}
