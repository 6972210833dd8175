//! Error handling.
//!
//! Compile errors surface before any bytecode of the offending form runs. Every
//! other variant is fatal to the `execute`/`resume` call that raised it; a VM is
//! not guaranteed to be usable afterwards.

use thiserror::Error;

use crate::value::Address;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("{0} is not defined")]
    UndefinedVariable(String),

    #[error("call stack too deep")]
    CallStackTooDeep,

    /// A free, out of range or instruction cell was dereferenced as a value.
    #[error("invalid address {0}")]
    InvalidAddress(Address),

    #[error("no value on stack")]
    EmptyStack,

    #[error("expected {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("address {0} is not a procedure")]
    NotAProcedure(Address),

    #[error("too few arguments")]
    MissingArgument,

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("malformed operand at {0}")]
    InvalidOperand(Address),

    #[error("return outside of a function")]
    ReturnFromTopLevel,

    #[error("read error on line {line}: {message}")]
    Read { line: usize, message: String },

    /// The input ended inside an expression.
    #[error("unexpected end of input: {0}")]
    Incomplete(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("cons expects exactly 2 arguments, got {0}")]
    ConsArity(usize),

    #[error("apply expects at least 2 arguments, got {0}")]
    ApplyArity(usize),

    #[error("can only use unquote-splicing with a list")]
    SpliceNotList,

    #[error("invalid number literal `{0}`")]
    InvalidNumber(String),

    #[error("malformed {0}: {1}")]
    MalformedForm(&'static str, &'static str),

    #[error("invalid syntax-rules: {0}")]
    MalformedSyntaxRules(&'static str),
}
