//! Parse SMT-LIB model output into an [`Assignment`].
//!
//! Solvers answer `(get-model)` with define-fun forms:
//!
//! ```text
//! (model
//!   (define-fun x_0 () Real 0.5)
//!   (define-fun x_1 () Real (- 3.0))
//!   (define-fun x_2 () Real (/ 7 2))
//! )
//! ```
//!
//! Only names following the query convention `x_<id>` are collected; anything
//! else the solver defines is ignored.

use sigma_core::{Assignment, Result, SigmaError, VarId};

/// Extract the assignment from raw solver output.
pub fn parse_assignment(output: &str) -> Result<Assignment> {
    let bytes = output.as_bytes();
    let mut assignment = Assignment::new();
    let mut pos = 0;

    while let Some(found) = output[pos..].find("(define-fun ") {
        pos += found + "(define-fun ".len();

        let (name, after_name) = read_token(bytes, pos).ok_or_else(|| {
            SigmaError::ModelParse("define-fun without a name".to_string())
        })?;
        pos = after_name;

        // Argument list and result sort, e.g. `() Real`.
        pos = skip_past(bytes, pos, b')')
            .ok_or_else(|| SigmaError::ModelParse(format!("no argument list for {}", name)))?;
        let (_sort, after_sort) = read_token(bytes, skip_ws(bytes, pos))
            .ok_or_else(|| SigmaError::ModelParse(format!("no sort for {}", name)))?;
        pos = after_sort;

        let (value, after_value) = parse_value(bytes, pos)
            .ok_or_else(|| SigmaError::ModelParse(format!("bad value for {}", name)))?;
        pos = after_value;

        if let Some(var) = query_var(&name) {
            assignment.insert(var, value);
        }
    }

    Ok(assignment)
}

/// Map a model symbol to a query variable, if it follows the convention.
fn query_var(name: &str) -> Option<VarId> {
    name.strip_prefix("x_")?.parse::<usize>().ok().map(VarId)
}

fn skip_ws(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

fn skip_past(bytes: &[u8], mut pos: usize, target: u8) -> Option<usize> {
    while pos < bytes.len() {
        if bytes[pos] == target {
            return Some(pos + 1);
        }
        pos += 1;
    }
    None
}

/// Read one symbol or literal token, stopping at whitespace or parentheses.
fn read_token(bytes: &[u8], pos: usize) -> Option<(String, usize)> {
    let start = skip_ws(bytes, pos);
    let mut end = start;
    while end < bytes.len()
        && !bytes[end].is_ascii_whitespace()
        && bytes[end] != b'('
        && bytes[end] != b')'
    {
        end += 1;
    }
    if end == start {
        return None;
    }
    Some((String::from_utf8_lossy(&bytes[start..end]).into_owned(), end))
}

/// Parse a numeric value expression: a literal, `(- v)`, `(/ a b)`, or a
/// nesting of those.
fn parse_value(bytes: &[u8], pos: usize) -> Option<(f64, usize)> {
    let pos = skip_ws(bytes, pos);
    if pos >= bytes.len() {
        return None;
    }

    if bytes[pos] != b'(' {
        let (token, end) = read_token(bytes, pos)?;
        return token.parse::<f64>().ok().map(|v| (v, end));
    }

    let (op, mut cursor) = read_token(bytes, pos + 1)?;
    let value = match op.as_str() {
        "-" => {
            let (first, next) = parse_value(bytes, cursor)?;
            cursor = skip_ws(bytes, next);
            if bytes.get(cursor) == Some(&b')') {
                -first
            } else {
                let (second, next) = parse_value(bytes, cursor)?;
                cursor = next;
                first - second
            }
        }
        "/" => {
            let (numerator, next) = parse_value(bytes, cursor)?;
            let (denominator, next) = parse_value(bytes, next)?;
            cursor = next;
            if denominator == 0.0 {
                return None;
            }
            numerator / denominator
        }
        _ => return None,
    };

    let close = skip_ws(bytes, cursor);
    if bytes.get(close) != Some(&b')') {
        return None;
    }
    Some((value, close + 1))
}
