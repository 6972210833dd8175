//! The stack-and-heap virtual machine.
//!
//! A [`Vm`] owns one [`Heap`] in which code and data share an address space,
//! an operand stack of addresses, and a stack of call [`Frame`]s that always
//! keeps the root frame at the bottom. Variables that are not bound in the
//! current frame are found by scanning the live frames outward, so a function
//! can only see the bindings of callers that have not yet returned.

use std::collections::VecDeque;
use std::io::{self, Write};

use crate::boot;
use crate::error::{Error, Result};
use crate::heap::Heap;
use crate::op::Token;
use crate::print;
use crate::value::{Address, Value};

pub mod frame;
pub mod interpreter;
pub mod options;

pub use self::frame::Frame;

/// Upper bound on live call frames, root frame included.
pub const MAX_CALL_DEPTH: usize = 1000;

pub struct Vm<W: Write = io::Stdout> {
    pub(crate) ip: Address,
    pub(crate) stack: Vec<Address>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) heap: Heap,
    /// Arguments staged by `set-args` for the next `call`/`apply`.
    pub(crate) pending: VecDeque<Address>,
    /// Where to continue once each active `include` finishes, innermost last.
    pub(crate) includes: Vec<Address>,
    pub(crate) out: W,
}

impl Vm<io::Stdout> {
    pub fn stdout() -> Result<Self> {
        Self::boot(io::stdout())
    }
}

impl<W: Write> Vm<W> {
    /// A VM with an empty heap and only the root frame. The standard
    /// library is not loaded; see [`Vm::boot`].
    pub fn new(out: W) -> Self {
        Self {
            ip: 0,
            stack: Vec::new(),
            frames: vec![Frame::root()],
            heap: Heap::new(),
            pending: VecDeque::new(),
            includes: Vec::new(),
            out,
        }
    }

    /// A VM whose root frame already holds the standard library bindings.
    pub fn boot(out: W) -> Result<Self> {
        let mut vm = Self::new(out);
        vm.load_prelude()?;
        Ok(vm)
    }

    pub fn load_prelude(&mut self) -> Result<()> {
        let prelude = boot::prelude()?;
        log::debug!("loading prelude ({} tokens)", prelude.len());
        self.execute(&prelude)?;
        // the last definition leaves its value behind
        self.stack.clear();
        Ok(())
    }

    /// Appends `code` to the address space and runs it from its first token
    /// until `halt` or the end of the code.
    pub fn execute(&mut self, code: &[Token]) -> Result<()> {
        self.ip = self.heap.load_code(code);
        self.run()
    }

    /// Continues from the current instruction pointer, typically right after
    /// a `halt`.
    pub fn resume(&mut self) -> Result<()> {
        self.run()
    }

    /// Drops everything a failed run left behind: the operand stack, every
    /// frame above the root, any staged arguments and any unfinished
    /// includes. Root bindings and the heap survive.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.frames.truncate(1);
        self.pending.clear();
        self.includes.clear();
    }

    pub fn ip(&self) -> Address {
        self.ip
    }

    pub fn stack(&self) -> &[Address] {
        &self.stack
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn output_mut(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    pub fn push(&mut self, address: Address) {
        self.stack.push(address);
    }

    pub fn pop(&mut self) -> Result<Address> {
        self.stack.pop().ok_or(Error::EmptyStack)
    }

    pub fn peek(&self) -> Result<Address> {
        self.stack.last().copied().ok_or(Error::EmptyStack)
    }

    /// Allocates `value` and pushes its address.
    pub fn push_value(&mut self, value: Value) -> Address {
        let address = self.heap.alloc(value);
        self.stack.push(address);
        address
    }

    /// Values currently on the operand stack, bottom first.
    pub fn stack_values(&self) -> Result<Vec<&Value>> {
        self.stack.iter().map(|&a| self.heap.resolve(a)).collect()
    }

    /// Looks `name` up the way `push-remote` does.
    pub fn lookup(&self, name: &str) -> Option<Address> {
        self.frames.iter().rev().find_map(|frame| frame.lookup(name))
    }

    pub fn render(&self, address: Address) -> Result<String> {
        print::render(&self.heap, address)
    }

    pub(crate) fn current_frame(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Op;
    use crate::tokens;

    #[test]
    fn new_vm_has_a_root_frame() {
        let vm = Vm::new(Vec::new());
        assert_eq!(vm.frames().len(), 1);
        assert!(vm.frames()[0].is_root());
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn execute_appends_code_after_existing_cells() {
        let mut vm = Vm::new(Vec::new());
        vm.execute(&tokens![Op::PushNum, 1, Op::Halt]).unwrap();
        let first = vm.heap().len();
        vm.execute(&tokens![Op::PushNum, 2, Op::Halt]).unwrap();
        assert_eq!(vm.ip(), first + 3);
        assert_eq!(
            vm.stack_values().unwrap(),
            vec![&Value::int(1), &Value::int(2)]
        );
    }

    #[test]
    fn boot_binds_the_standard_library() {
        let vm = Vm::boot(Vec::new()).unwrap();
        assert!(vm.lookup("length").is_some());
        assert!(vm.lookup("map").is_some());
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn reset_keeps_root_bindings() {
        let mut vm = Vm::new(Vec::new());
        vm.execute(&tokens![Op::PushNum, 1, Op::SetLocal, "x"]).unwrap();
        vm.push_value(Value::int(2));
        vm.frames.push(Frame::default());
        vm.includes.push(0);
        vm.reset();
        assert!(vm.includes.is_empty());
        assert!(vm.stack().is_empty());
        assert_eq!(vm.frames().len(), 1);
        assert!(vm.lookup("x").is_some());
    }

    #[test]
    fn pop_on_empty_stack_fails() {
        let mut vm = Vm::new(Vec::new());
        assert!(matches!(vm.pop(), Err(Error::EmptyStack)));
        assert!(matches!(vm.peek(), Err(Error::EmptyStack)));
    }
}
