//! Scalar shims for the formula dialect
//!
//! The formula transpiler and the transform SQL builders target a small set
//! of scalar functions the engine does not ship natively. They are registered
//! on every connection at open:
//!
//! - `CONTAINS(haystack, needle)`, `STARTS_WITH`, `ENDS_WITH`
//! - `PROPER(text)` — Proper Case Each Word
//! - `LPAD(text, length, fill)`
//! - `SPLIT_PART(text, separator, n)` — 1-indexed, empty when out of range
//! - `REGEXP_MATCHES(text, pattern)`, `REGEXP_EXTRACT(text, pattern)`
//! - `DATE_DIFF(part, a, b)` — whole units from `a` to `b`; `part` is
//!   `'day'`, `'month'`, or `'year'`
//! - `GEN_UUID()` — random v4 UUID text
//!
//! All shims are NULL-propagating: any NULL argument yields NULL.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, Error};
use uuid::Uuid;

const DET: FunctionFlags = FunctionFlags::SQLITE_UTF8.union(FunctionFlags::SQLITE_DETERMINISTIC);

fn invalid(msg: String) -> Error {
    Error::UserFunctionError(msg.into())
}

/// Register every shim on a connection
pub fn register_all(conn: &Connection) -> Result<(), Error> {
    conn.create_scalar_function("CONTAINS", 2, DET, |ctx| {
        let hay: Option<String> = ctx.get(0)?;
        let needle: Option<String> = ctx.get(1)?;
        Ok(match (hay, needle) {
            (Some(h), Some(n)) => Some(h.contains(&n)),
            _ => None,
        })
    })?;

    conn.create_scalar_function("STARTS_WITH", 2, DET, |ctx| {
        let hay: Option<String> = ctx.get(0)?;
        let prefix: Option<String> = ctx.get(1)?;
        Ok(match (hay, prefix) {
            (Some(h), Some(p)) => Some(h.starts_with(&p)),
            _ => None,
        })
    })?;

    conn.create_scalar_function("ENDS_WITH", 2, DET, |ctx| {
        let hay: Option<String> = ctx.get(0)?;
        let suffix: Option<String> = ctx.get(1)?;
        Ok(match (hay, suffix) {
            (Some(h), Some(s)) => Some(h.ends_with(&s)),
            _ => None,
        })
    })?;

    conn.create_scalar_function("PROPER", 1, DET, |ctx| {
        let text: Option<String> = ctx.get(0)?;
        Ok(text.map(|t| proper_case(&t)))
    })?;

    conn.create_scalar_function("LPAD", 3, DET, |ctx| {
        let text: Option<String> = ctx.get(0)?;
        let len: Option<i64> = ctx.get(1)?;
        let fill: Option<String> = ctx.get(2)?;
        Ok(match (text, len, fill) {
            (Some(t), Some(len), Some(fill)) => Some(lpad(&t, len.max(0) as usize, &fill)),
            _ => None,
        })
    })?;

    conn.create_scalar_function("SPLIT_PART", 3, DET, |ctx| {
        let text: Option<String> = ctx.get(0)?;
        let sep: Option<String> = ctx.get(1)?;
        let n: Option<i64> = ctx.get(2)?;
        Ok(match (text, sep, n) {
            (Some(t), Some(sep), Some(n)) => Some(split_part(&t, &sep, n)),
            _ => None,
        })
    })?;

    conn.create_scalar_function("REGEXP_MATCHES", 2, DET, |ctx| {
        let text: Option<String> = ctx.get(0)?;
        let pattern: Option<String> = ctx.get(1)?;
        match (text, pattern) {
            (Some(t), Some(p)) => {
                let re = Regex::new(&p).map_err(|e| invalid(format!("invalid pattern: {e}")))?;
                Ok(Some(re.is_match(&t)))
            }
            _ => Ok(None),
        }
    })?;

    conn.create_scalar_function("REGEXP_EXTRACT", 2, DET, |ctx| {
        let text: Option<String> = ctx.get(0)?;
        let pattern: Option<String> = ctx.get(1)?;
        match (text, pattern) {
            (Some(t), Some(p)) => {
                let re = Regex::new(&p).map_err(|e| invalid(format!("invalid pattern: {e}")))?;
                Ok(re.find(&t).map(|m| m.as_str().to_string()))
            }
            _ => Ok(None),
        }
    })?;

    conn.create_scalar_function("DATE_DIFF", 3, DET, |ctx| {
        let part: Option<String> = ctx.get(0)?;
        let a: Option<String> = ctx.get(1)?;
        let b: Option<String> = ctx.get(2)?;
        match (part, a, b) {
            (Some(part), Some(a), Some(b)) => {
                let a = parse_date(&a).ok_or_else(|| invalid(format!("not a date: {a}")))?;
                let b = parse_date(&b).ok_or_else(|| invalid(format!("not a date: {b}")))?;
                let diff = match part.to_lowercase().as_str() {
                    "day" => (b - a).num_days(),
                    "month" => {
                        i64::from(b.year() - a.year()) * 12 + i64::from(b.month() as i32 - a.month() as i32)
                    }
                    "year" => i64::from(b.year() - a.year()),
                    other => return Err(invalid(format!("unsupported date part: {other}"))),
                };
                Ok(Some(diff))
            }
            _ => Ok(None),
        }
    })?;

    // Not deterministic: each call yields a fresh id.
    conn.create_scalar_function("GEN_UUID", 0, FunctionFlags::SQLITE_UTF8, |_ctx| {
        Ok(Uuid::new_v4().to_string())
    })?;

    Ok(())
}

fn proper_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

fn lpad(text: &str, len: usize, fill: &str) -> String {
    let count = text.chars().count();
    if count >= len || fill.is_empty() {
        return text.to_string();
    }
    let mut pad: String = fill.chars().cycle().take(len - count).collect();
    pad.push_str(text);
    pad
}

fn split_part(text: &str, sep: &str, n: i64) -> String {
    if n < 1 || sep.is_empty() {
        return String::new();
    }
    text.split(sep)
        .nth((n - 1) as usize)
        .unwrap_or("")
        .to_string()
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    None
}
