//! The standard list library every booted [`Vm`](crate::vm::Vm) starts with.
//!
//! The source is compiled once per thread; the bytecode is position
//! independent, so each VM simply appends the cached tokens to its own
//! address space and runs them.

use std::rc::Rc;

use once_cell::unsync::OnceCell;

use crate::compiler::Compiler;
use crate::error::Result;
use crate::op::Token;
use crate::reader;

pub const PRELUDE_SOURCE: &str = include_str!("../lib/list.scm");

thread_local! {
    static PRELUDE: OnceCell<Rc<[Token]>> = OnceCell::new();
}

fn compile_prelude() -> Result<Rc<[Token]>> {
    let forms = reader::read(PRELUDE_SOURCE)?;
    let code = Compiler::new().compile_body(&forms)?;
    log::debug!(target: "boot", "compiled prelude: {} forms, {} tokens", forms.len(), code.len());
    Ok(code.into())
}

/// Compiled prelude bytecode, without a trailing `halt`.
pub fn prelude() -> Result<Rc<[Token]>> {
    PRELUDE.with(|cell| cell.get_or_try_init(compile_prelude).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Op;

    #[test]
    fn prelude_compiles_once_per_thread() {
        let first = prelude().unwrap();
        let second = prelude().unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn prelude_has_no_halt_and_no_macros() {
        let code = prelude().unwrap();
        assert!(!code.is_empty());
        assert!(!matches!(code.last(), Some(Token::Op(Op::Halt))));

        let forms = reader::read(PRELUDE_SOURCE).unwrap();
        assert!(forms
            .iter()
            .all(|form| !form.as_list().map_or(false, |l| l[0].is_atom("define-syntax"))));
    }
}
