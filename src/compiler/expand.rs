//! Macro expansion on a nested VM.
//!
//! The transformer runs to completion on its own booted [`Vm`], which is
//! dropped afterwards; nothing is shared with the VM that will eventually run
//! the compiled program.

use std::io;

use super::Compiler;
use crate::error::Result;
use crate::op::{Op, Token};
use crate::print;
use crate::reader::Sexp;
use crate::tokens;
use crate::vm::Vm;

/// Applies the compiled `transformer` to the quoted `form` and converts the
/// result back into an expression. `None` if the transformer left nothing on
/// the stack.
pub fn expand(transformer: &[Token], form: &Sexp) -> Result<Option<Sexp>> {
    let mut code = Compiler::new().compile_quoted(form)?;
    code.extend(tokens![Op::PushNum, 1, Op::SetArgs]);
    code.extend_from_slice(transformer);
    code.extend(tokens![Op::Call, Op::Halt]);

    let mut vm = Vm::boot(io::sink())?;
    vm.execute(&code)?;

    let Some(&result) = vm.stack().last() else {
        return Ok(None);
    };
    print::to_sexp(vm.heap(), result).map(Some)
}
