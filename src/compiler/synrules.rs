//! `syntax-rules` to transformer functions.
//!
//! A rule set becomes an ordinary one-argument function over the quoted macro
//! call:
//!
//! ```text
//! (lambda (expr)
//!   (if (= 3 (length expr))
//!       (apply (lambda (a b) `(template with ,a and ,b)) (cdr expr))
//!       <next rule, or ()>))
//! ```
//!
//! Rules are tried in order. A pattern matches on length alone and binds its
//! elements after the keyword positionally; a dotted pattern `(_ a . rest)`
//! matches any call with at least as many elements as its fixed part and
//! binds the remainder as a list. Literals are accepted but not matched.

use std::collections::HashSet;

use super::split_dotted;
use crate::error::{CompileError, Result};
use crate::reader::Sexp;

fn invalid<T>(reason: &'static str) -> Result<T> {
    Err(CompileError::MalformedSyntaxRules(reason).into())
}

/// Builds the transformer expression for a `(syntax-rules (literals...)
/// (pattern template)...)` form.
pub fn transformer(form: &Sexp) -> Result<Sexp> {
    let Some([keyword, literals, rules @ ..]) = form.as_list() else {
        return invalid("expected (syntax-rules (literals...) rules...)");
    };
    if !keyword.is_atom("syntax-rules") {
        return invalid("expected (syntax-rules (literals...) rules...)");
    }
    if literals.as_list().is_none() {
        return invalid("literals must be a list");
    }

    let mut fallback = Sexp::List(vec![]);
    for rule in rules.iter().rev() {
        fallback = clause(rule, fallback)?;
    }

    Ok(Sexp::list([
        Sexp::atom("lambda"),
        Sexp::list([Sexp::atom("expr")]),
        fallback,
    ]))
}

fn clause(rule: &Sexp, fallback: Sexp) -> Result<Sexp> {
    let Some([pattern, template]) = rule.as_list() else {
        return invalid("each rule must be (pattern template)");
    };
    let Some([_, vars @ ..]) = pattern.as_list() else {
        return invalid("pattern must be a non-empty list");
    };
    let Some((fixed, rest)) = split_dotted(vars) else {
        return invalid("misplaced `.` in pattern");
    };

    let mut names = HashSet::new();
    for var in fixed.iter().chain(rest) {
        let Some(name) = var.as_atom() else {
            return invalid("pattern variables must be symbols");
        };
        names.insert(name);
    }

    let count = Sexp::atom((fixed.len() + 1).to_string());
    let length = Sexp::list([Sexp::atom("length"), Sexp::atom("expr")]);
    let test = match rest {
        None => Sexp::list([Sexp::atom("="), count, length]),
        Some(_) => Sexp::list([Sexp::atom(">="), length, count]),
    };

    let body = Sexp::list([
        Sexp::atom("apply"),
        Sexp::list([
            Sexp::atom("lambda"),
            Sexp::List(vars.to_vec()),
            Sexp::list([Sexp::atom("quasiquote"), unquote_names(template, &names)]),
        ]),
        Sexp::list([Sexp::atom("cdr"), Sexp::atom("expr")]),
    ]);

    Ok(Sexp::list([Sexp::atom("if"), test, body, fallback]))
}

/// Wraps every occurrence of a pattern variable in `template` in `unquote`.
fn unquote_names(template: &Sexp, names: &HashSet<&str>) -> Sexp {
    match template {
        Sexp::Atom(name) if names.contains(name.as_str()) => {
            Sexp::list([Sexp::atom("unquote"), template.clone()])
        }
        Sexp::Atom(_) => template.clone(),
        Sexp::List(items) => Sexp::list(items.iter().map(|item| unquote_names(item, names))),
    }
}
