use std::collections::VecDeque;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::Address;

/// One activation record.
///
/// The root frame has no return address. Bindings keep insertion order so
/// that debug dumps list them the way the program defined them.
#[derive(Debug, Default)]
pub struct Frame {
    pub return_address: Option<Address>,
    pub locals: IndexMap<Rc<str>, Address>,
    /// Arguments not yet consumed by `push-arg`/`push-args`.
    pub args: VecDeque<Address>,
}

impl Frame {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn call(return_address: Address, args: VecDeque<Address>) -> Self {
        Self {
            return_address: Some(return_address),
            locals: IndexMap::new(),
            args,
        }
    }

    pub fn is_root(&self) -> bool {
        self.return_address.is_none()
    }

    pub fn lookup(&self, name: &str) -> Option<Address> {
        self.locals.get(name).copied()
    }

    pub fn bind(&mut self, name: Rc<str>, address: Address) {
        self.locals.insert(name, address);
    }
}
