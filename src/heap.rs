//! Shared code/data address space.
//!
//! One growable array of cells holds instruction tokens and values side by
//! side; an [`Address`] is an index into it. There is no collector: a cell is
//! only reclaimed by an explicit [`Heap::free`], which the VM does for the raw
//! counts consumed by list building and argument staging.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::op::Token;
use crate::value::{Address, TypeCode, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Free,
    Code(Token),
    Value(Value),
}

#[derive(Debug, Default)]
pub struct Heap {
    cells: Vec<Cell>,
    free: BTreeSet<Address>,
    true_address: Option<Address>,
    false_address: Option<Address>,
    empty_list_address: Option<Address>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, address: Address) -> Option<&Cell> {
        self.cells.get(address)
    }

    /// Stores `value` in the lowest free cell, or in a new cell at the end.
    pub fn alloc(&mut self, value: Value) -> Address {
        match self.free.pop_first() {
            Some(address) => {
                self.cells[address] = Cell::Value(value);
                address
            }
            None => {
                self.cells.push(Cell::Value(value));
                self.cells.len() - 1
            }
        }
    }

    pub fn store(&mut self, address: Address, value: Value) -> Result<()> {
        match self.cells.get_mut(address) {
            Some(cell @ (Cell::Free | Cell::Value(_))) => {
                *cell = Cell::Value(value);
                self.free.remove(&address);
                Ok(())
            }
            _ => Err(Error::InvalidAddress(address)),
        }
    }

    pub fn resolve(&self, address: Address) -> Result<&Value> {
        match self.cells.get(address) {
            Some(Cell::Value(value)) => Ok(value),
            _ => Err(Error::InvalidAddress(address)),
        }
    }

    /// The value at `address`, or `None` when the cell holds code, which
    /// makes the address a procedure.
    pub fn object(&self, address: Address) -> Result<Option<&Value>> {
        match self.cells.get(address) {
            Some(Cell::Value(value)) => Ok(Some(value)),
            Some(Cell::Code(_)) => Ok(None),
            _ => Err(Error::InvalidAddress(address)),
        }
    }

    pub fn type_code(&self, address: Address) -> Result<TypeCode> {
        Ok(self
            .object(address)?
            .map_or(TypeCode::Procedure, Value::type_code))
    }

    pub fn type_name(&self, address: Address) -> Result<&'static str> {
        Ok(self.object(address)?.map_or("procedure", Value::type_name))
    }

    /// `WrongType` naming what is actually stored at `address`.
    pub fn wrong_type(&self, expected: &'static str, address: Address) -> Error {
        match self.type_name(address) {
            Ok(found) => Error::WrongType { expected, found },
            Err(err) => err,
        }
    }

    pub fn free(&mut self, address: Address) {
        if let Some(cell) = self.cells.get_mut(address) {
            *cell = Cell::Free;
            self.free.insert(address);
        }
    }

    /// Appends `code` to the end of the address space and returns the address
    /// of its first token.
    pub fn load_code(&mut self, code: &[Token]) -> Address {
        let start = self.cells.len();
        self.cells.extend(code.iter().cloned().map(Cell::Code));
        start
    }

    /// The instruction token at `address`, if that cell holds code.
    pub fn token(&self, address: Address) -> Option<&Token> {
        match self.cells.get(address) {
            Some(Cell::Code(token)) => Some(token),
            _ => None,
        }
    }

    pub fn is_code(&self, address: Address) -> bool {
        matches!(self.cells.get(address), Some(Cell::Code(_)))
    }

    pub fn bool_true(&mut self) -> Address {
        if let Some(address) = self.true_address {
            return address;
        }
        let address = self.alloc(Value::True);
        self.true_address = Some(address);
        address
    }

    pub fn bool_false(&mut self) -> Address {
        if let Some(address) = self.false_address {
            return address;
        }
        let address = self.alloc(Value::False);
        self.false_address = Some(address);
        address
    }

    pub fn empty_list(&mut self) -> Address {
        if let Some(address) = self.empty_list_address {
            return address;
        }
        let address = self.alloc(Value::EmptyList);
        self.empty_list_address = Some(address);
        address
    }

    pub fn boolean(&mut self, b: bool) -> Address {
        if b {
            self.bool_true()
        } else {
            self.bool_false()
        }
    }

    pub fn is_false(&self, address: Address) -> bool {
        self.false_address == Some(address)
    }

    pub fn cons(&mut self, car: Address, cdr: Address) -> Address {
        self.alloc(Value::Pair(car, cdr))
    }

    /// Builds a proper list whose elements are `items` in order.
    pub fn list(&mut self, items: &[Address]) -> Address {
        let mut head = self.empty_list();
        for &item in items.iter().rev() {
            head = self.cons(item, head);
        }
        head
    }

    /// Element addresses of the proper list at `address`.
    pub fn list_items(&self, address: Address) -> Result<Vec<Address>> {
        let mut items = vec![];
        let mut current = address;
        loop {
            match self.object(current)? {
                Some(Value::EmptyList) => return Ok(items),
                Some(Value::Pair(car, cdr)) => {
                    items.push(*car);
                    current = *cdr;
                }
                _ => return Err(self.wrong_type("list", current)),
            }
        }
    }

    /// Shallow equality: atomic values by kind and content, everything else
    /// by identity. Never looks inside pairs.
    pub fn eq(&self, a: Address, b: Address) -> Result<bool> {
        if a == b {
            return Ok(true);
        }
        let (x, y) = match (self.cells.get(a), self.cells.get(b)) {
            (Some(Cell::Value(x)), Some(Cell::Value(y))) => (x, y),
            (Some(Cell::Code(_)), Some(Cell::Code(_) | Cell::Value(_)))
            | (Some(Cell::Value(_)), Some(Cell::Code(_))) => return Ok(false),
            (Some(Cell::Value(_) | Cell::Code(_)), _) => return Err(Error::InvalidAddress(b)),
            _ => return Err(Error::InvalidAddress(a)),
        };

        Ok(match (x, y) {
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Atom(x), Value::Atom(y)) => x == y,
            (Value::Char(x), Value::Char(y)) => x == y,
            (Value::ByteArray(x), Value::ByteArray(y)) => x == y,
            (Value::True, Value::True)
            | (Value::False, Value::False)
            | (Value::EmptyList, Value::EmptyList) => true,
            _ => false,
        })
    }

    /// Structural equality: pairs are compared element by element.
    pub fn eqv(&self, mut a: Address, mut b: Address) -> Result<bool> {
        loop {
            match (self.cells.get(a), self.cells.get(b)) {
                (
                    Some(Cell::Value(Value::Pair(a_car, a_cdr))),
                    Some(Cell::Value(Value::Pair(b_car, b_cdr))),
                ) => {
                    if !self.eqv(*a_car, *b_car)? {
                        return Ok(false);
                    }
                    a = *a_cdr;
                    b = *b_cdr;
                }
                _ => return self.eq(a, b),
            }
        }
    }

    /// Numeric equality; any non-integer operand, procedures included,
    /// compares unequal.
    pub fn num_eq(&self, a: Address, b: Address) -> Result<bool> {
        match (self.object(a)?, self.object(b)?) {
            (Some(Value::Int(x)), Some(Value::Int(y))) => Ok(x == y),
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Op;

    #[test]
    fn alloc_reuses_the_lowest_free_cell() {
        let mut heap = Heap::new();
        let a = heap.alloc(Value::int(1));
        let b = heap.alloc(Value::int(2));
        let c = heap.alloc(Value::int(3));
        heap.free(c);
        heap.free(a);
        assert_eq!(heap.alloc(Value::int(4)), a);
        assert_eq!(heap.alloc(Value::int(5)), c);
        assert_eq!(heap.alloc(Value::int(6)), 3);
        assert_eq!(heap.resolve(b).unwrap(), &Value::int(2));
    }

    #[test]
    fn resolving_free_or_code_cells_fails() {
        let mut heap = Heap::new();
        let start = heap.load_code(&[Token::Op(Op::Halt)]);
        let a = heap.alloc(Value::int(1));
        heap.free(a);
        assert!(matches!(heap.resolve(a), Err(Error::InvalidAddress(x)) if x == a));
        assert!(matches!(heap.resolve(start), Err(Error::InvalidAddress(_))));
        assert!(matches!(heap.resolve(100), Err(Error::InvalidAddress(100))));
        assert!(heap.store(start, Value::int(1)).is_err());
    }

    #[test]
    fn singletons_are_allocated_once() {
        let mut heap = Heap::new();
        let t = heap.bool_true();
        let f = heap.bool_false();
        let nil = heap.empty_list();
        assert_eq!(heap.bool_true(), t);
        assert_eq!(heap.bool_false(), f);
        assert_eq!(heap.empty_list(), nil);
        assert_eq!(heap.len(), 3);
        assert!(heap.is_false(f));
        assert!(!heap.is_false(nil));
    }

    #[test]
    fn list_items_round_trip() {
        let mut heap = Heap::new();
        let items = [Value::int(5), Value::int(7), Value::int(9)].map(|v| heap.alloc(v));
        let list = heap.list(&items);
        assert_eq!(heap.list_items(list).unwrap(), items.to_vec());

        let pair = heap.cons(items[0], items[1]);
        assert!(matches!(
            heap.list_items(pair),
            Err(Error::WrongType { expected: "list", .. })
        ));
    }

    #[test]
    fn shallow_and_structural_equality() {
        let mut heap = Heap::new();
        let one = heap.alloc(Value::int(1));
        let two = heap.alloc(Value::int(2));
        let xs = heap.list(&[one, two]);
        let one_again = heap.alloc(Value::int(1));
        let two_again = heap.alloc(Value::int(2));
        let ys = heap.list(&[one_again, two_again]);

        assert!(heap.eq(one, one_again).unwrap());
        assert!(!heap.eq(xs, ys).unwrap());
        assert!(heap.eq(xs, xs).unwrap());
        assert!(heap.eqv(xs, ys).unwrap());

        let zs = heap.list(&[one, one_again]);
        assert!(!heap.eqv(xs, zs).unwrap());
    }

    #[test]
    fn numeric_equality_rejects_non_numbers() {
        let mut heap = Heap::new();
        let t = heap.bool_true();
        let n = heap.alloc(Value::int(1));
        let m = heap.alloc(Value::int(1));
        assert!(heap.num_eq(n, m).unwrap());
        assert!(!heap.num_eq(t, t).unwrap());
        assert!(!heap.num_eq(n, t).unwrap());
    }

    #[test]
    fn code_cells_are_procedures() {
        let mut heap = Heap::new();
        let function = heap.load_code(&[Token::Op(Op::Return)]);
        let n = heap.alloc(Value::int(1));

        assert_eq!(heap.object(function).unwrap(), None);
        assert_eq!(heap.type_code(function).unwrap(), TypeCode::Procedure);
        assert_eq!(heap.type_name(function).unwrap(), "procedure");
        assert!(!heap.num_eq(function, n).unwrap());
        assert!(matches!(
            heap.list_items(function),
            Err(Error::WrongType { expected: "list", found: "procedure" })
        ));
        assert!(matches!(heap.type_code(100), Err(Error::InvalidAddress(100))));
    }
}
