use std::rc::Rc;

use num::BigInt;

/// Index of a cell in the shared code/data address space.
pub type Address = usize;

/// A value occupying exactly one heap cell.
///
/// Pairs refer to their car and cdr by address, so rendering or comparing a
/// list always goes through the owning [`Heap`](crate::heap::Heap).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Atom(Rc<str>),
    Int(BigInt),
    ByteArray(Vec<u8>),
    Char(char),
    Pair(Address, Address),
    EmptyList,
    True,
    False,
}

/// Integer codes pushed by `PUSH_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TypeCode {
    Atom = 0,
    BoolFalse = 1,
    BoolTrue = 2,
    ByteArray = 3,
    Char = 4,
    Int = 5,
    EmptyList = 6,
    Pair = 7,
    /// A code address: the only kind of cell `call` accepts.
    Procedure = 8,
}

impl Value {
    pub fn int(n: impl Into<BigInt>) -> Self {
        Value::Int(n.into())
    }

    pub fn atom(name: impl AsRef<str>) -> Self {
        Value::Atom(Rc::from(name.as_ref()))
    }

    pub fn string(text: impl AsRef<str>) -> Self {
        Value::ByteArray(text.as_ref().as_bytes().to_vec())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Atom(_) => "atom",
            Value::Int(_) => "integer",
            Value::ByteArray(_) => "string",
            Value::Char(_) => "char",
            Value::Pair(..) => "pair",
            Value::EmptyList => "empty list",
            Value::True | Value::False => "boolean",
        }
    }

    pub fn type_code(&self) -> TypeCode {
        match self {
            Value::Atom(_) => TypeCode::Atom,
            Value::False => TypeCode::BoolFalse,
            Value::True => TypeCode::BoolTrue,
            Value::ByteArray(_) => TypeCode::ByteArray,
            Value::Char(_) => TypeCode::Char,
            Value::Int(_) => TypeCode::Int,
            Value::EmptyList => TypeCode::EmptyList,
            Value::Pair(..) => TypeCode::Pair,
        }
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            Value::Int(n) => Some(n),
            _ => None,
        }
    }

    pub fn is_pair(&self) -> bool {
        matches!(self, Value::Pair(..))
    }

    pub fn is_empty_list(&self) -> bool {
        matches!(self, Value::EmptyList)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_are_stable() {
        assert_eq!(Value::int(1).type_code() as u8, 5);
        assert_eq!(Value::EmptyList.type_code(), TypeCode::EmptyList);
        assert_eq!(Value::atom("foo").type_code(), TypeCode::Atom);
    }

    #[test]
    fn string_values_hold_bytes() {
        assert_eq!(Value::string("hi"), Value::ByteArray(vec![b'h', b'i']));
        assert_eq!(Value::string("hi").type_name(), "string");
    }
}
