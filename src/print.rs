//! Implementation of the value printer.

use std::fmt::Write;

use crate::error::{Error, Result};
use crate::heap::{Cell, Heap};
use crate::reader::Sexp;
use crate::value::{Address, Value};

/// Textual form of the value at `address`, as written by the `write` interop.
///
/// Strings and characters are written raw. A code address (a function value)
/// renders as `#<procedure N>`.
pub fn render(heap: &Heap, address: Address) -> Result<String> {
    let mut out = String::new();
    render_into(heap, address, &mut out)?;
    Ok(out)
}

fn render_into(heap: &Heap, address: Address, out: &mut String) -> Result<()> {
    let value = match heap.cell(address) {
        Some(Cell::Value(value)) => value,
        Some(Cell::Code(_)) => {
            let _ = write!(out, "#<procedure {}>", address);
            return Ok(());
        }
        _ => return Err(Error::InvalidAddress(address)),
    };

    match value {
        Value::Atom(name) => out.push_str(name),
        Value::Int(n) => {
            let _ = write!(out, "{}", n);
        }
        Value::ByteArray(bytes) => out.push_str(&String::from_utf8_lossy(bytes)),
        Value::Char(c) => out.push(*c),
        Value::True => out.push_str("#t"),
        Value::False => out.push_str("#f"),
        Value::EmptyList => out.push_str("()"),
        Value::Pair(car, cdr) => {
            out.push('(');
            render_into(heap, *car, out)?;
            let mut rest = *cdr;
            loop {
                match heap.resolve(rest) {
                    Ok(Value::EmptyList) => break,
                    Ok(Value::Pair(car, cdr)) => {
                        out.push(' ');
                        render_into(heap, *car, out)?;
                        rest = *cdr;
                    }
                    _ => {
                        out.push_str(" . ");
                        render_into(heap, rest, out)?;
                        break;
                    }
                }
            }
            out.push(')');
        }
    }

    Ok(())
}

/// Converts the datum at `address` back into an expression tree, the inverse
/// of compiling a quoted form. Used to hand macro expansions back to the
/// compiler.
pub fn to_sexp(heap: &Heap, address: Address) -> Result<Sexp> {
    let value = match heap.cell(address) {
        Some(Cell::Value(value)) => value,
        Some(Cell::Code(_)) => {
            return Err(Error::WrongType {
                expected: "datum",
                found: "procedure",
            })
        }
        _ => return Err(Error::InvalidAddress(address)),
    };

    Ok(match value {
        Value::Atom(name) => Sexp::atom(&**name),
        Value::Int(n) => Sexp::atom(n.to_string()),
        Value::ByteArray(bytes) => Sexp::Atom(escape_string(&String::from_utf8_lossy(bytes))),
        Value::Char(' ') => Sexp::atom("#\\space"),
        Value::Char('\t') => Sexp::atom("#\\tab"),
        Value::Char('\n') => Sexp::atom("#\\newline"),
        Value::Char(c) => Sexp::Atom(format!("#\\{}", c)),
        Value::True => Sexp::atom("#t"),
        Value::False => Sexp::atom("#f"),
        Value::EmptyList => Sexp::List(vec![]),
        Value::Pair(car, cdr) => {
            let mut items = vec![to_sexp(heap, *car)?];
            let mut rest = *cdr;
            loop {
                match heap.object(rest)? {
                    Some(Value::EmptyList) => break,
                    Some(Value::Pair(car, cdr)) => {
                        items.push(to_sexp(heap, *car)?);
                        rest = *cdr;
                    }
                    _ => {
                        items.push(Sexp::atom("."));
                        items.push(to_sexp(heap, rest)?);
                        break;
                    }
                }
            }
            Sexp::List(items)
        }
    })
}

fn escape_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
