//! Instruction set.
//!
//! Bytecode is a flat sequence of [`Token`]s: an opcode followed by exactly
//! `arity` operand tokens. Code lives in the same address space as data, one
//! token per cell.

use std::fmt::{self, Write};
use std::rc::Rc;

use num::BigInt;

macro_rules! op {
    ($($(#[$doc:meta])* $op:ident $name:literal $arity:literal),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Op {
            $($(#[$doc])* $op,)*
        }

        impl Op {
            pub const ALL: &'static [Op] = &[$(Op::$op,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Op::$op => $name,)*
                }
            }

            /// Number of operand tokens following the opcode.
            pub fn arity(self) -> usize {
                match self {
                    $(Op::$op => $arity,)*
                }
            }
        }
    };
}

op! {
    PushAtom "push-atom" 1,
    PushNum "push-num" 1,
    PushStr "push-str" 1,
    PushChar "push-char" 1,
    PushTrue "push-true" 0,
    PushFalse "push-false" 0,
    PushCar "push-car" 0,
    PushCdr "push-cdr" 0,
    PushCons "push-cons" 0,
    /// Pops a count, then that many addresses, and pushes a proper list.
    PushList "push-list" 0,
    PushLocal "push-local" 1,
    /// Resolves a name by scanning call frames from the innermost outward.
    PushRemote "push-remote" 1,
    PushArg "push-arg" 0,
    PushArgs "push-args" 0,
    /// Pushes the address of the next instruction and skips the body up to
    /// the matching `endf`.
    PushFunc "push-func" 0,
    PushType "push-type" 0,
    Pop "pop" 0,
    Add "add" 0,
    Sub "sub" 0,
    CmpGt "cmp-gt" 0,
    CmpGte "cmp-gte" 0,
    CmpLt "cmp-lt" 0,
    CmpLte "cmp-lte" 0,
    CmpEq "cmp-eq" 0,
    CmpEqv "cmp-eqv" 0,
    CmpEqNum "cmp-eq-num" 0,
    CmpNull "cmp-null" 0,
    Dup "dup" 0,
    EndF "endf" 0,
    Int "int" 1,
    Jump "jump" 1,
    JumpIfFalse "jump-if-false" 1,
    JumpIfTrue "jump-if-true" 1,
    Call "call" 0,
    /// Like `call`, but spreads the last pending argument (a list) first.
    Apply "apply" 0,
    Return "return" 0,
    SetLocal "set-local" 1,
    SetRemote "set-remote" 1,
    SetArgs "set-args" 0,
    Append "append" 0,
    StrRef "str-ref" 0,
    StrLen "str-len" 0,
    ListToStr "list->str" 0,
    Halt "halt" 0,
    Debug "debug" 0,
}

/// `int` operand: write the address held on top of the stack.
pub const INT_WRITE_ADDRESS: i64 = 1;
/// `int` operand: write the rendering of the value on top of the stack.
pub const INT_WRITE: i64 = 2;
/// `int` operand: pop a file name, then read, compile and run that file inline.
pub const INT_INCLUDE: i64 = 3;
/// `int` operand: end of included code; continue after the `include` that
/// loaded it.
pub const INT_END_INCLUDE: i64 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Op(Op),
    Int(i64),
    Num(BigInt),
    Str(Rc<str>),
    Char(char),
}

impl Token {
    pub fn op(&self) -> Option<Op> {
        match self {
            Token::Op(op) => Some(*op),
            _ => None,
        }
    }
}

impl From<Op> for Token {
    fn from(op: Op) -> Self {
        Token::Op(op)
    }
}

impl From<i32> for Token {
    fn from(n: i32) -> Self {
        Token::Int(n as i64)
    }
}

impl From<i64> for Token {
    fn from(n: i64) -> Self {
        Token::Int(n)
    }
}

impl From<usize> for Token {
    fn from(n: usize) -> Self {
        Token::Int(n as i64)
    }
}

impl From<BigInt> for Token {
    fn from(n: BigInt) -> Self {
        Token::Num(n)
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Token::Str(Rc::from(s))
    }
}

impl From<Rc<str>> for Token {
    fn from(s: Rc<str>) -> Self {
        Token::Str(s)
    }
}

impl From<char> for Token {
    fn from(c: char) -> Self {
        Token::Char(c)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Op(op) => f.write_str(op.name()),
            Token::Int(n) => write!(f, "{}", n),
            Token::Num(n) => write!(f, "{}", n),
            Token::Str(s) => write!(f, "{:?}", s),
            Token::Char(c) => write!(f, "{:?}", c),
        }
    }
}

/// Builds a `Vec<Token>` from opcodes and operands.
///
/// ```
/// use scheme_vm::{op::Op, tokens};
/// let code = tokens![Op::PushNum, 1, Op::PushNum, 2, Op::Add, Op::Halt];
/// assert_eq!(code.len(), 6);
/// ```
#[macro_export]
macro_rules! tokens {
    ($($tok:expr),* $(,)?) => {
        vec![$($crate::op::Token::from($tok)),*]
    };
}

/// Renders one instruction per line as `offset name operands...`; nested
/// function bodies are indented.
pub fn disassemble(code: &[Token]) -> String {
    let mut out = String::new();
    let mut depth = 0usize;
    let mut pc = 0;

    while pc < code.len() {
        let start = pc;
        let token = &code[pc];
        pc += 1;

        let Some(op) = token.op() else {
            let _ = writeln!(out, "{:>5}  {}<operand {}>", start, "  ".repeat(depth), token);
            continue;
        };

        if op == Op::EndF {
            depth = depth.saturating_sub(1);
        }

        let _ = write!(out, "{:>5}  {}{}", start, "  ".repeat(depth), op.name());
        for _ in 0..op.arity() {
            match code.get(pc) {
                Some(operand) => {
                    let _ = write!(out, " {}", operand);
                }
                None => out.push_str(" <missing>"),
            }
            pc += 1;
        }
        out.push('\n');

        if op == Op::PushFunc {
            depth += 1;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let mut names = Op::ALL.iter().map(|op| op.name()).collect::<Vec<_>>();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Op::ALL.len());
    }

    #[test]
    fn operand_counts() {
        assert_eq!(Op::PushNum.arity(), 1);
        assert_eq!(Op::Jump.arity(), 1);
        assert_eq!(Op::Int.arity(), 1);
        assert_eq!(Op::PushList.arity(), 0);
        assert_eq!(Op::Append.arity(), 0);
    }

    #[test]
    fn disassembly_indents_function_bodies() {
        let code = tokens![
            Op::PushFunc,
            Op::PushArg,
            Op::SetLocal,
            "x",
            Op::Return,
            Op::EndF,
            Op::Halt
        ];
        let text = disassemble(&code);
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "    0  push-func");
        assert_eq!(lines[2], "    2    set-local \"x\"");
        assert_eq!(lines[4], "    5  endf");
    }
}
