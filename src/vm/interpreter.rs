//! Fetch/decode/execute loop.
//!
//! Conventions:
//! - `ip` addresses the next token to fetch; operands are fetched right after
//!   their opcode, so by the time a handler runs `ip` already points past them.
//! - Branch offsets are relative to the address of the branch's own operand.
//! - Counts consumed by `push-list`, `append` and `set-args` are popped off the
//!   operand stack and their cells are freed.

use std::collections::VecDeque;
use std::io::Write;
use std::rc::Rc;

use num::{BigInt, ToPrimitive};

use super::{Frame, Vm, MAX_CALL_DEPTH};
use crate::compiler::Compiler;
use crate::error::{Error, Result};
use crate::op::{Op, Token, INT_END_INCLUDE, INT_INCLUDE, INT_WRITE, INT_WRITE_ADDRESS};
use crate::tokens;
use crate::print;
use crate::reader;
use crate::value::{Address, TypeCode, Value};

impl<W: Write> Vm<W> {
    pub(crate) fn run(&mut self) -> Result<()> {
        while let Some(op) = self.fetch_op()? {
            log::trace!(target: "vm", "{:>5} {:<15} stack={}", self.ip - 1, op.name(), self.stack.len());

            match op {
                Op::PushAtom => {
                    let name = self.fetch_str()?;
                    self.push_value(Value::Atom(name));
                }
                Op::PushNum => {
                    let n = self.fetch_num()?;
                    self.push_value(Value::Int(n));
                }
                Op::PushStr => {
                    let text = self.fetch_str()?;
                    self.push_value(Value::string(&*text));
                }
                Op::PushChar => {
                    let c = self.fetch_char()?;
                    self.push_value(Value::Char(c));
                }
                Op::PushTrue => {
                    let t = self.heap.bool_true();
                    self.push(t);
                }
                Op::PushFalse => {
                    let f = self.heap.bool_false();
                    self.push(f);
                }
                Op::PushCar => {
                    let (car, _) = self.pop_pair()?;
                    self.push(car);
                }
                Op::PushCdr => {
                    let (_, cdr) = self.pop_pair()?;
                    self.push(cdr);
                }
                Op::PushCons => {
                    let cdr = self.pop()?;
                    let car = self.pop()?;
                    let pair = self.heap.cons(car, cdr);
                    self.push(pair);
                }
                Op::PushList => {
                    let count = self.pop_raw()?;
                    let items = self.pop_n(count)?;
                    let list = self.heap.list(&items);
                    self.push(list);
                }
                Op::PushLocal => {
                    let name = self.fetch_str()?;
                    let address = self
                        .current_frame()
                        .lookup(&name)
                        .ok_or_else(|| Error::UndefinedVariable(name.to_string()))?;
                    self.push(address);
                }
                Op::PushRemote => {
                    let name = self.fetch_str()?;
                    let address = self
                        .lookup(&name)
                        .ok_or_else(|| Error::UndefinedVariable(name.to_string()))?;
                    self.push(address);
                }
                Op::PushArg => {
                    let address = self
                        .current_frame()
                        .args
                        .pop_front()
                        .ok_or(Error::MissingArgument)?;
                    self.push(address);
                }
                Op::PushArgs => {
                    let args = std::mem::take(&mut self.current_frame().args);
                    let items = Vec::from(args);
                    let list = self.heap.list(&items);
                    self.push(list);
                }
                Op::PushFunc => {
                    let start = self.ip;
                    self.push(start);
                    self.skip_function_body()?;
                }
                Op::PushType => {
                    let address = self.pop()?;
                    let code = self.heap.type_code(address)?;
                    self.push_value(Value::int(code as u8));
                }
                Op::Pop => {
                    self.pop()?;
                }
                Op::Add => {
                    let (a, b) = self.pop_ints()?;
                    self.push_value(Value::Int(a + b));
                }
                Op::Sub => {
                    let (a, b) = self.pop_ints()?;
                    self.push_value(Value::Int(a - b));
                }
                Op::CmpGt => self.compare(|a, b| a > b)?,
                Op::CmpGte => self.compare(|a, b| a >= b)?,
                Op::CmpLt => self.compare(|a, b| a < b)?,
                Op::CmpLte => self.compare(|a, b| a <= b)?,
                Op::CmpEq => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let result = self.heap.eq(a, b)?;
                    self.push_bool(result);
                }
                Op::CmpEqv => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let result = self.heap.eqv(a, b)?;
                    self.push_bool(result);
                }
                Op::CmpEqNum => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let result = self.heap.num_eq(a, b)?;
                    self.push_bool(result);
                }
                Op::CmpNull => {
                    let address = self.pop()?;
                    let result = self.heap.type_code(address)? == TypeCode::EmptyList;
                    self.push_bool(result);
                }
                Op::Dup => {
                    let address = self.peek()?;
                    self.push(address);
                }
                Op::EndF => {}
                Op::Int => {
                    let at = self.ip;
                    match self.fetch_int()? {
                        INT_WRITE_ADDRESS => {
                            let address = self.peek()?;
                            write!(self.out, "{}", address)?;
                        }
                        INT_WRITE => {
                            let address = self.peek()?;
                            let text = print::render(&self.heap, address)?;
                            self.out.write_all(text.as_bytes())?;
                        }
                        INT_INCLUDE => self.include()?,
                        INT_END_INCLUDE => {
                            self.ip = self.includes.pop().ok_or(Error::InvalidOperand(at))?;
                        }
                        _ => return Err(Error::InvalidOperand(at)),
                    }
                }
                Op::Jump => {
                    let target = self.fetch_jump_target()?;
                    self.ip = target;
                }
                Op::JumpIfFalse => {
                    let target = self.fetch_jump_target()?;
                    let condition = self.pop()?;
                    if self.heap.is_false(condition) {
                        self.ip = target;
                    }
                }
                Op::JumpIfTrue => {
                    let target = self.fetch_jump_target()?;
                    let condition = self.pop()?;
                    if !self.heap.is_false(condition) {
                        self.ip = target;
                    }
                }
                Op::Call => {
                    let function = self.pop()?;
                    self.call(function)?;
                }
                Op::Apply => {
                    let last = self.pending.pop_back().ok_or(Error::MissingArgument)?;
                    let spread = self.heap.list_items(last)?;
                    self.pending.extend(spread);
                    let function = self.pop()?;
                    self.call(function)?;
                }
                Op::Return => {
                    let Some(return_address) = self.frames.last().and_then(|f| f.return_address) else {
                        return Err(Error::ReturnFromTopLevel);
                    };
                    self.frames.pop();
                    self.ip = return_address;
                }
                Op::SetLocal => {
                    let name = self.fetch_str()?;
                    let address = self.pop()?;
                    self.current_frame().bind(name, address);
                }
                Op::SetRemote => {
                    let name = self.fetch_str()?;
                    let address = self.pop()?;
                    let frame = self
                        .frames
                        .iter_mut()
                        .rev()
                        .find(|frame| frame.locals.contains_key(&*name))
                        .ok_or_else(|| Error::UndefinedVariable(name.to_string()))?;
                    frame.bind(name, address);
                }
                Op::SetArgs => {
                    let count = self.pop_raw()?;
                    let args = self.pop_n(count)?;
                    self.pending = VecDeque::from(args);
                }
                Op::Append => {
                    let count = self.pop_raw()?;
                    let lists = self.pop_n(count)?;
                    let mut items = Vec::new();
                    for list in lists {
                        items.extend(self.heap.list_items(list)?);
                    }
                    let list = self.heap.list(&items);
                    self.push(list);
                }
                Op::StrRef => {
                    let index = self.pop_index()?;
                    let text = self.pop_string()?;
                    let len = text.chars().count();
                    let c = text
                        .chars()
                        .nth(index)
                        .ok_or(Error::IndexOutOfBounds { index, len })?;
                    self.push_value(Value::Char(c));
                }
                Op::StrLen => {
                    let text = self.pop_string()?;
                    self.push_value(Value::int(text.chars().count()));
                }
                Op::ListToStr => {
                    let list = self.pop()?;
                    let mut text = String::new();
                    for item in self.heap.list_items(list)? {
                        match self.heap.object(item)? {
                            Some(Value::Char(c)) => text.push(*c),
                            _ => return Err(self.heap.wrong_type("char", item)),
                        }
                    }
                    self.push_value(Value::string(text));
                }
                Op::Halt => break,
                Op::Debug => self.dump(),
            }
        }

        Ok(())
    }

    /// Fetches the opcode at `ip`. Running off the end of the code, or onto a
    /// data cell, stops the loop.
    fn fetch_op(&mut self) -> Result<Option<Op>> {
        let op = match self.heap.token(self.ip) {
            None => return Ok(None),
            Some(Token::Op(op)) => *op,
            Some(_) => return Err(Error::InvalidOperand(self.ip)),
        };
        self.ip += 1;
        Ok(Some(op))
    }

    fn fetch_operand(&mut self) -> Result<Token> {
        let token = self
            .heap
            .token(self.ip)
            .cloned()
            .ok_or(Error::InvalidOperand(self.ip))?;
        self.ip += 1;
        Ok(token)
    }

    fn fetch_str(&mut self) -> Result<Rc<str>> {
        let at = self.ip;
        match self.fetch_operand()? {
            Token::Str(s) => Ok(s),
            _ => Err(Error::InvalidOperand(at)),
        }
    }

    fn fetch_int(&mut self) -> Result<i64> {
        let at = self.ip;
        match self.fetch_operand()? {
            Token::Int(n) => Ok(n),
            _ => Err(Error::InvalidOperand(at)),
        }
    }

    fn fetch_num(&mut self) -> Result<BigInt> {
        let at = self.ip;
        match self.fetch_operand()? {
            Token::Int(n) => Ok(BigInt::from(n)),
            Token::Num(n) => Ok(n),
            Token::Str(s) => s.parse().map_err(|_| Error::InvalidOperand(at)),
            _ => Err(Error::InvalidOperand(at)),
        }
    }

    fn fetch_char(&mut self) -> Result<char> {
        let at = self.ip;
        match self.fetch_operand()? {
            Token::Char(c) => Ok(c),
            Token::Str(s) => s.chars().next().ok_or(Error::InvalidOperand(at)),
            _ => Err(Error::InvalidOperand(at)),
        }
    }

    fn fetch_jump_target(&mut self) -> Result<Address> {
        let at = self.ip;
        let offset = self.fetch_int()?;
        (at as i64)
            .checked_add(offset)
            .and_then(|target| usize::try_from(target).ok())
            .ok_or(Error::InvalidOperand(at))
    }

    /// Advances `ip` past the body of the function whose `push-func` was just
    /// fetched, including the matching `endf`.
    fn skip_function_body(&mut self) -> Result<()> {
        loop {
            let op = self.fetch_op()?.ok_or(Error::InvalidAddress(self.ip))?;
            match op {
                Op::EndF => return Ok(()),
                Op::PushFunc => self.skip_function_body()?,
                op => {
                    for _ in 0..op.arity() {
                        self.fetch_operand()?;
                    }
                }
            }
        }
    }

    fn call(&mut self, function: Address) -> Result<()> {
        if !self.heap.is_code(function) {
            return Err(Error::NotAProcedure(function));
        }
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(Error::CallStackTooDeep);
        }
        let args = std::mem::take(&mut self.pending);
        self.frames.push(Frame::call(self.ip, args));
        self.ip = function;
        Ok(())
    }

    /// Loads the file named on top of the stack behind the current code and
    /// jumps into it. The loaded code ends in `int INT_END_INCLUDE`, which
    /// comes back here, so a `halt` inside the file suspends the whole run.
    fn include(&mut self) -> Result<()> {
        if self.includes.len() >= MAX_CALL_DEPTH {
            return Err(Error::CallStackTooDeep);
        }
        let address = self.pop()?;
        let path = self.string_at(address)?;
        log::debug!("including {}", path);

        let source = std::fs::read_to_string(&path)?;
        let forms = reader::read(&source)?;
        let mut code = if forms.is_empty() {
            tokens![Op::PushNum, 0, Op::PushList]
        } else {
            Compiler::new().compile_body(&forms)?
        };
        code.extend(tokens![Op::Int, INT_END_INCLUDE]);

        self.includes.push(self.ip);
        self.ip = self.heap.load_code(&code);
        Ok(())
    }

    /// Pops a count pushed by the compiler and frees its cell.
    fn pop_raw(&mut self) -> Result<usize> {
        let address = self.pop()?;
        let count = match self.heap.object(address)? {
            Some(Value::Int(n)) => n.to_usize().ok_or(Error::WrongType {
                expected: "count",
                found: "integer",
            })?,
            _ => return Err(self.heap.wrong_type("count", address)),
        };
        self.heap.free(address);
        Ok(count)
    }

    /// Pops `count` addresses, returned in the order they were pushed.
    fn pop_n(&mut self, count: usize) -> Result<Vec<Address>> {
        if count > self.stack.len() {
            return Err(Error::EmptyStack);
        }
        let at = self.stack.len() - count;
        Ok(self.stack.split_off(at))
    }

    fn pop_pair(&mut self) -> Result<(Address, Address)> {
        let address = self.pop()?;
        match self.heap.object(address)? {
            Some(Value::Pair(car, cdr)) => Ok((*car, *cdr)),
            _ => Err(self.heap.wrong_type("pair", address)),
        }
    }

    fn pop_int(&mut self) -> Result<BigInt> {
        let address = self.pop()?;
        match self.heap.object(address)? {
            Some(Value::Int(n)) => Ok(n.clone()),
            _ => Err(self.heap.wrong_type("integer", address)),
        }
    }

    /// Pops the right operand, then the left one.
    fn pop_ints(&mut self) -> Result<(BigInt, BigInt)> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        Ok((a, b))
    }

    fn pop_index(&mut self) -> Result<usize> {
        let n = self.pop_int()?;
        n.to_usize().ok_or(Error::WrongType {
            expected: "index",
            found: "integer",
        })
    }

    fn pop_string(&mut self) -> Result<String> {
        let address = self.pop()?;
        self.string_at(address)
    }

    fn string_at(&self, address: Address) -> Result<String> {
        match self.heap.object(address)? {
            Some(Value::ByteArray(bytes)) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            _ => Err(self.heap.wrong_type("string", address)),
        }
    }

    fn compare(&mut self, f: impl FnOnce(&BigInt, &BigInt) -> bool) -> Result<()> {
        let (a, b) = self.pop_ints()?;
        self.push_bool(f(&a, &b));
        Ok(())
    }

    fn push_bool(&mut self, b: bool) {
        let address = self.heap.boolean(b);
        self.push(address);
    }

    fn dump(&self) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        log::debug!("op stack --------------------");
        for &address in &self.stack {
            match print::render(&self.heap, address) {
                Ok(text) => log::debug!("{} => {}", address, text),
                Err(_) => log::debug!("{} => error", address),
            }
        }
        log::debug!("call stack ------------------");
        for frame in &self.frames {
            log::debug!("{:?}", frame);
        }
    }
}
