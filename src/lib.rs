//! A small Scheme: a reader, a bytecode compiler with `syntax-rules` macros
//! expanded on a nested VM, and a stack-and-heap virtual machine.

pub mod boot;
pub mod compiler;
pub mod error;
pub mod heap;
pub mod op;
pub mod print;
pub mod reader;
pub mod repl;
pub mod value;
pub mod vm;

pub use crate::compiler::Compiler;
pub use crate::error::{CompileError, Error, Result};
pub use crate::reader::Sexp;
pub use crate::value::{Address, Value};
pub use crate::vm::Vm;

#[cfg(test)]
mod tests;
