//! Expression trees to bytecode.
//!
//! Every expression is compiled under a use contract: with `use_value` set it
//! leaves exactly one address on the operand stack, otherwise it leaves none
//! (the same code followed by `pop`). Special forms are a closed set resolved
//! here; any other operator name is looked up in the macro table and, failing
//! that, compiled as a call.
//!
//! Macros are `syntax-rules` transformers compiled to bytecode once, when
//! defined, and run on a throwaway VM for every use (see [`expand`]).

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use num::BigInt;
use num_traits::ToPrimitive;

use crate::error::{CompileError, Result};
use crate::op::{Op, Token, INT_INCLUDE, INT_WRITE};
use crate::reader::Sexp;
use crate::tokens;
use crate::value::TypeCode;

pub mod expand;
pub mod synrules;

/// Names bound in the function currently being compiled.
type Locals = HashSet<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Eval,
    Quote,
    Quasiquote,
}

#[derive(Debug, Clone, Copy)]
struct Ctx {
    use_value: bool,
    mode: Mode,
}

impl Ctx {
    const VALUE: Ctx = Ctx {
        use_value: true,
        mode: Mode::Eval,
    };

    const fn eval(use_value: bool) -> Ctx {
        Ctx {
            use_value,
            mode: Mode::Eval,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Form {
    Begin,
    Car,
    Cdr,
    Cons,
    Append,
    IsNull,
    IsPair,
    List,
    StringRef,
    StringLength,
    ListToString,
    Quote,
    Quasiquote,
    Define,
    DefineSyntax,
    Lambda,
    Apply,
    If,
    Set,
    Halt,
    Include,
    Write,
    Binary(Op),
}

impl Form {
    fn from_name(name: &str) -> Option<Form> {
        Some(match name {
            "begin" => Form::Begin,
            "car" => Form::Car,
            "cdr" => Form::Cdr,
            "cons" => Form::Cons,
            "append" => Form::Append,
            "null?" => Form::IsNull,
            "pair?" => Form::IsPair,
            "list" => Form::List,
            "string-ref" => Form::StringRef,
            "string-length" => Form::StringLength,
            "list->string" => Form::ListToString,
            "quote" => Form::Quote,
            "quasiquote" => Form::Quasiquote,
            "define" => Form::Define,
            "define-syntax" => Form::DefineSyntax,
            "lambda" => Form::Lambda,
            "apply" => Form::Apply,
            "if" => Form::If,
            "set!" => Form::Set,
            "halt" => Form::Halt,
            "include" => Form::Include,
            "write" => Form::Write,
            "+" => Form::Binary(Op::Add),
            "-" => Form::Binary(Op::Sub),
            ">" => Form::Binary(Op::CmpGt),
            ">=" => Form::Binary(Op::CmpGte),
            "<" => Form::Binary(Op::CmpLt),
            "<=" => Form::Binary(Op::CmpLte),
            "=" => Form::Binary(Op::CmpEqNum),
            "eq?" => Form::Binary(Op::CmpEq),
            "equal?" => Form::Binary(Op::CmpEqv),
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Form::Begin => "begin",
            Form::Car => "car",
            Form::Cdr => "cdr",
            Form::Cons => "cons",
            Form::Append => "append",
            Form::IsNull => "null?",
            Form::IsPair => "pair?",
            Form::List => "list",
            Form::StringRef => "string-ref",
            Form::StringLength => "string-length",
            Form::ListToString => "list->string",
            Form::Quote => "quote",
            Form::Quasiquote => "quasiquote",
            Form::Define => "define",
            Form::DefineSyntax => "define-syntax",
            Form::Lambda => "lambda",
            Form::Apply => "apply",
            Form::If => "if",
            Form::Set => "set!",
            Form::Halt => "halt",
            Form::Include => "include",
            Form::Write => "write",
            Form::Binary(op) => op.name(),
        }
    }
}

fn malformed<T>(form: Form, reason: &'static str) -> Result<T> {
    Err(CompileError::MalformedForm(form.name(), reason).into())
}

fn pop_maybe(ctx: Ctx, out: &mut Vec<Token>) {
    if !ctx.use_value {
        out.push(Token::Op(Op::Pop));
    }
}

fn empty_list(out: &mut Vec<Token>) {
    out.extend(tokens![Op::PushNum, 0, Op::PushList]);
}

/// Splits `(a b . c)` into `[a, b]` and `c`. `None` if a `.` appears anywhere
/// but second to last.
pub(crate) fn split_dotted(items: &[Sexp]) -> Option<(&[Sexp], Option<&Sexp>)> {
    match items.iter().position(|item| item.is_atom(".")) {
        None => Some((items, None)),
        Some(at) if at + 2 == items.len() => Some((&items[..at], Some(&items[at + 1]))),
        Some(_) => None,
    }
}

fn parse_number(text: &str) -> Option<BigInt> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n = BigInt::parse_bytes(digits.as_bytes(), 10)?;
    Some(if negative { -n } else { n })
}

fn push_number(n: BigInt, out: &mut Vec<Token>) {
    out.push(Token::Op(Op::PushNum));
    match n.to_i64() {
        Some(small) => out.push(Token::Int(small)),
        None => out.push(Token::Num(n)),
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[derive(Default)]
pub struct Compiler {
    syntax: HashMap<String, Rc<[Token]>>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_macro(&self, name: &str) -> bool {
        self.syntax.contains_key(name)
    }

    /// Compiles a program. The value of the last form is left on the stack
    /// and the code ends in `halt`.
    pub fn compile(&mut self, forms: &[Sexp]) -> Result<Vec<Token>> {
        let mut code = self.compile_body(forms)?;
        code.push(Token::Op(Op::Halt));
        Ok(code)
    }

    /// Like [`Compiler::compile`] but without the trailing `halt`, for code
    /// that runs inline in front of other code.
    pub fn compile_body(&mut self, forms: &[Sexp]) -> Result<Vec<Token>> {
        let mut code = Vec::new();
        self.sequence(forms, &mut Locals::new(), true, &mut code)?;
        Ok(code)
    }

    /// Code that pushes `datum` as quoted data.
    pub(crate) fn compile_quoted(&mut self, datum: &Sexp) -> Result<Vec<Token>> {
        let mut code = Vec::new();
        let ctx = Ctx {
            use_value: true,
            mode: Mode::Quote,
        };
        self.expr(datum, &mut Locals::new(), ctx, &mut code)?;
        Ok(code)
    }

    fn sequence(
        &mut self,
        forms: &[Sexp],
        locals: &mut Locals,
        use_last: bool,
        out: &mut Vec<Token>,
    ) -> Result<()> {
        for (i, form) in forms.iter().enumerate() {
            let last = i + 1 == forms.len();
            self.expr(form, locals, Ctx::eval(last && use_last), out)?;
        }
        Ok(())
    }

    fn expr(&mut self, sexp: &Sexp, locals: &mut Locals, ctx: Ctx, out: &mut Vec<Token>) -> Result<()> {
        let items = match sexp {
            Sexp::Atom(text) => return self.literal(text, locals, ctx, out),
            Sexp::List(items) => items,
        };

        let Some((head, args)) = items.split_first() else {
            empty_list(out);
            pop_maybe(ctx, out);
            return Ok(());
        };

        if ctx.mode != Mode::Eval {
            return self.datum_list(items, locals, ctx, out);
        }

        let name = match head {
            Sexp::Atom(name) => name,
            Sexp::List(_) => return self.call(head, args, Op::Call, locals, ctx, out),
        };

        if let Some(form) = Form::from_name(name) {
            return self.form(form, args, locals, ctx, out);
        }

        if let Some(transformer) = self.syntax.get(name).cloned() {
            return self.macro_call(name, &transformer, sexp, locals, ctx, out);
        }

        self.call(head, args, Op::Call, locals, ctx, out)
    }

    fn literal(&mut self, text: &str, locals: &Locals, ctx: Ctx, out: &mut Vec<Token>) -> Result<()> {
        // `#\` followed by a whitespace character is a literal, not padding
        let text = if text.starts_with("#\\") { text } else { text.trim() };
        let quoted = ctx.mode != Mode::Eval;

        if text.starts_with(|c: char| c.is_ascii_lowercase()) {
            if quoted {
                out.extend(tokens![Op::PushAtom, text]);
            } else {
                Self::variable(text, locals, out);
            }
        } else if text == "#t" {
            out.push(Token::Op(Op::PushTrue));
        } else if text == "#f" {
            out.push(Token::Op(Op::PushFalse));
        } else if let Some(name) = text.strip_prefix("#\\") {
            let c = match name {
                "space" => ' ',
                "newline" => '\n',
                "tab" => '\t',
                _ => match name.chars().next() {
                    Some(c) => c,
                    None => return Err(CompileError::MalformedForm("character", "missing character").into()),
                },
            };
            out.extend(tokens![Op::PushChar, c]);
        } else if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
            let body = unescape(&text[1..text.len() - 1]);
            out.extend(tokens![Op::PushStr, body.as_str()]);
        } else {
            match parse_number(text) {
                Some(n) => push_number(n, out),
                None if quoted => out.extend(tokens![Op::PushAtom, text]),
                None => return Err(CompileError::InvalidNumber(text.to_string()).into()),
            }
        }

        pop_maybe(ctx, out);
        Ok(())
    }

    fn variable(name: &str, locals: &Locals, out: &mut Vec<Token>) {
        let op = if locals.contains(name) {
            Op::PushLocal
        } else {
            Op::PushRemote
        };
        out.extend(tokens![op, name]);
    }

    /// A non-empty list under `quote` or `quasiquote`.
    fn datum_list(&mut self, items: &[Sexp], locals: &mut Locals, ctx: Ctx, out: &mut Vec<Token>) -> Result<()> {
        if ctx.mode == Mode::Quasiquote {
            match items[0].as_atom() {
                Some("unquote") => {
                    let [_, operand] = items else {
                        return Err(CompileError::MalformedForm("unquote", "expects 1 argument").into());
                    };
                    return self.expr(operand, locals, Ctx::eval(ctx.use_value), out);
                }
                Some("unquote-splicing") => {
                    return Err(
                        CompileError::MalformedForm("unquote-splicing", "must appear inside a list").into(),
                    )
                }
                _ => {}
            }
        }

        let Some((proper, tail)) = split_dotted(items) else {
            return Err(CompileError::MalformedForm("quote", "misplaced `.`").into());
        };

        let members = self.datum_members(proper, locals, ctx.mode)?;
        let count = members.len();
        for member in members {
            out.extend(member);
        }

        match tail {
            None => out.extend(tokens![Op::PushNum, count, Op::PushList]),
            Some(tail) => {
                let ctx = Ctx {
                    use_value: true,
                    mode: ctx.mode,
                };
                self.expr(tail, locals, ctx, out)?;
                for _ in 0..count {
                    out.push(Token::Op(Op::PushCons));
                }
            }
        }

        pop_maybe(ctx, out);
        Ok(())
    }

    /// Code for each element of a quoted list, one entry per element after
    /// splicing.
    fn datum_members(&mut self, items: &[Sexp], locals: &mut Locals, mode: Mode) -> Result<Vec<Vec<Token>>> {
        let mut members = Vec::with_capacity(items.len());
        for item in items {
            if mode == Mode::Quasiquote {
                if let Some([head, operand]) = item.as_list() {
                    if head.is_atom("unquote-splicing") {
                        members.extend(self.splice(operand, locals)?);
                        continue;
                    }
                }
            }
            let mut code = Vec::new();
            self.expr(item, locals, Ctx { use_value: true, mode }, &mut code)?;
            members.push(code);
        }
        Ok(members)
    }

    /// The operand of `unquote-splicing` must build a list in place: a `list`
    /// form or a quoted proper list.
    fn splice(&mut self, operand: &Sexp, locals: &mut Locals) -> Result<Vec<Vec<Token>>> {
        let Some(items) = operand.as_list() else {
            return Err(CompileError::SpliceNotList.into());
        };

        match items.split_first() {
            Some((head, rest)) if head.is_atom("list") => {
                let mut members = Vec::with_capacity(rest.len());
                for item in rest {
                    let mut code = Vec::new();
                    self.expr(item, locals, Ctx::VALUE, &mut code)?;
                    members.push(code);
                }
                Ok(members)
            }
            Some((head, [datum])) if head.is_atom("quote") || head.is_atom("quasiquote") => {
                let mode = if head.is_atom("quote") {
                    Mode::Quote
                } else {
                    Mode::Quasiquote
                };
                match datum {
                    Sexp::List(data) if !data.iter().any(|d| d.is_atom(".")) => {
                        self.datum_members(data, locals, mode)
                    }
                    _ => Err(CompileError::SpliceNotList.into()),
                }
            }
            _ => Err(CompileError::SpliceNotList.into()),
        }
    }

    fn form(&mut self, form: Form, args: &[Sexp], locals: &mut Locals, ctx: Ctx, out: &mut Vec<Token>) -> Result<()> {
        match form {
            Form::Begin => {
                if args.is_empty() {
                    empty_list(out);
                    pop_maybe(ctx, out);
                    return Ok(());
                }
                return self.sequence(args, locals, ctx.use_value, out);
            }
            Form::Car | Form::Cdr | Form::IsNull | Form::IsPair | Form::StringLength | Form::ListToString => {
                let [arg] = args else {
                    return malformed(form, "expects 1 argument");
                };
                self.expr(arg, locals, Ctx::VALUE, out)?;
                match form {
                    Form::Car => out.push(Token::Op(Op::PushCar)),
                    Form::Cdr => out.push(Token::Op(Op::PushCdr)),
                    Form::IsNull => out.push(Token::Op(Op::CmpNull)),
                    Form::StringLength => out.push(Token::Op(Op::StrLen)),
                    Form::ListToString => out.push(Token::Op(Op::ListToStr)),
                    _ => out.extend(tokens![
                        Op::PushType,
                        Op::PushNum,
                        TypeCode::Pair as i64,
                        Op::CmpEqNum
                    ]),
                }
            }
            Form::Cons => {
                if args.len() != 2 {
                    return Err(CompileError::ConsArity(args.len()).into());
                }
                self.sequence_values(args, locals, out)?;
                out.push(Token::Op(Op::PushCons));
            }
            Form::StringRef | Form::Binary(_) => {
                if args.len() != 2 {
                    return malformed(form, "expects 2 arguments");
                }
                self.sequence_values(args, locals, out)?;
                let op = match form {
                    Form::Binary(op) => op,
                    _ => Op::StrRef,
                };
                out.push(Token::Op(op));
            }
            Form::Append | Form::List => {
                self.sequence_values(args, locals, out)?;
                let op = if form == Form::Append {
                    Op::Append
                } else {
                    Op::PushList
                };
                out.extend(tokens![Op::PushNum, args.len(), op]);
            }
            Form::Quote | Form::Quasiquote => {
                let [datum] = args else {
                    return malformed(form, "expects 1 argument");
                };
                let mode = if form == Form::Quote {
                    Mode::Quote
                } else {
                    Mode::Quasiquote
                };
                let ctx = Ctx {
                    use_value: ctx.use_value,
                    mode,
                };
                return self.expr(datum, locals, ctx, out);
            }
            Form::Define => return self.define(args, locals, ctx, out),
            Form::DefineSyntax => return self.define_syntax(args, ctx, out),
            Form::Lambda => return self.lambda(args, ctx, out),
            Form::Apply => {
                let Some((function, operands)) = args.split_first().filter(|_| args.len() >= 2) else {
                    return Err(CompileError::ApplyArity(args.len()).into());
                };
                return self.call(function, operands, Op::Apply, locals, ctx, out);
            }
            Form::If => return self.branch(args, locals, ctx, out),
            Form::Set => return self.assign(args, locals, ctx, out),
            Form::Halt => {
                if !args.is_empty() {
                    return malformed(form, "expects no arguments");
                }
                out.push(Token::Op(Op::Halt));
                if ctx.use_value {
                    empty_list(out);
                }
                return Ok(());
            }
            Form::Include => {
                let [path] = args else {
                    return malformed(form, "expects 1 argument");
                };
                self.expr(path, locals, Ctx::VALUE, out)?;
                out.extend(tokens![Op::Int, INT_INCLUDE]);
            }
            Form::Write => {
                if args.is_empty() {
                    return malformed(form, "expects at least 1 argument");
                }
                for (i, arg) in args.iter().enumerate() {
                    self.expr(arg, locals, Ctx::VALUE, out)?;
                    out.extend(tokens![Op::Int, INT_WRITE]);
                    if i + 1 < args.len() {
                        out.push(Token::Op(Op::Pop));
                    }
                }
            }
        }

        pop_maybe(ctx, out);
        Ok(())
    }

    /// Compiles each of `args` for its value, left to right.
    fn sequence_values(&mut self, args: &[Sexp], locals: &mut Locals, out: &mut Vec<Token>) -> Result<()> {
        for arg in args {
            self.expr(arg, locals, Ctx::VALUE, out)?;
        }
        Ok(())
    }

    fn define(&mut self, args: &[Sexp], locals: &mut Locals, ctx: Ctx, out: &mut Vec<Token>) -> Result<()> {
        let Some((target, rest)) = args.split_first() else {
            return malformed(Form::Define, "missing name");
        };

        let name = match target {
            Sexp::Atom(name) => {
                let [value] = rest else {
                    return malformed(Form::Define, "expects a name and a value");
                };
                locals.insert(name.clone());
                self.expr(value, locals, Ctx::VALUE, out)?;
                name
            }
            Sexp::List(signature) => {
                let Some((Sexp::Atom(name), params)) = signature.split_first() else {
                    return malformed(Form::Define, "procedure name must be a symbol");
                };
                let mut lambda = Vec::with_capacity(rest.len() + 1);
                lambda.push(Sexp::List(params.to_vec()));
                lambda.extend(rest.iter().cloned());
                locals.insert(name.clone());
                self.lambda(&lambda, Ctx::VALUE, out)?;
                name
            }
        };

        out.extend(tokens![Op::SetLocal, name.as_str()]);
        if ctx.use_value {
            out.extend(tokens![Op::PushLocal, name.as_str()]);
        }
        Ok(())
    }

    fn define_syntax(&mut self, args: &[Sexp], ctx: Ctx, out: &mut Vec<Token>) -> Result<()> {
        let [Sexp::Atom(name), rules] = args else {
            return malformed(Form::DefineSyntax, "expects a name and a syntax-rules form");
        };

        let transformer = synrules::transformer(rules)?;
        let mut code = Vec::new();
        self.expr(&transformer, &mut Locals::new(), Ctx::VALUE, &mut code)?;
        log::debug!("defined syntax {} ({} tokens)", name, code.len());
        self.syntax.insert(name.clone(), Rc::from(code));

        if ctx.use_value {
            empty_list(out);
        }
        Ok(())
    }

    fn lambda(&mut self, args: &[Sexp], ctx: Ctx, out: &mut Vec<Token>) -> Result<()> {
        let Some((params, body)) = args.split_first() else {
            return malformed(Form::Lambda, "missing parameter list");
        };

        let mut inner = Locals::new();
        out.push(Token::Op(Op::PushFunc));

        let (fixed, rest) = match params {
            Sexp::Atom(_) => (&[][..], Some(params)),
            Sexp::List(names) => match split_dotted(names) {
                Some(split) => split,
                None => return malformed(Form::Lambda, "misplaced `.` in parameters"),
            },
        };

        for param in fixed {
            let Some(name) = param.as_atom() else {
                return malformed(Form::Lambda, "parameters must be symbols");
            };
            inner.insert(name.to_string());
            out.extend(tokens![Op::PushArg, Op::SetLocal, name]);
        }
        if let Some(param) = rest {
            let Some(name) = param.as_atom() else {
                return malformed(Form::Lambda, "parameters must be symbols");
            };
            inner.insert(name.to_string());
            out.extend(tokens![Op::PushArgs, Op::SetLocal, name]);
        }

        if body.is_empty() {
            empty_list(out);
        } else {
            self.sequence(body, &mut inner, true, out)?;
        }

        out.extend(tokens![Op::Return, Op::EndF]);
        pop_maybe(ctx, out);
        Ok(())
    }

    /// `call` or `apply` of `function` with `args` staged as pending
    /// arguments. A compound operator is evaluated before the arguments are
    /// staged, since evaluating it may itself stage arguments for a call.
    fn call(
        &mut self,
        function: &Sexp,
        args: &[Sexp],
        op: Op,
        locals: &mut Locals,
        ctx: Ctx,
        out: &mut Vec<Token>,
    ) -> Result<()> {
        let compound = matches!(function, Sexp::List(_));
        if compound {
            self.expr(function, locals, Ctx::VALUE, out)?;
        }

        self.sequence_values(args, locals, out)?;
        if !args.is_empty() || op == Op::Apply {
            out.extend(tokens![Op::PushNum, args.len(), Op::SetArgs]);
        }

        if !compound {
            self.expr(function, locals, Ctx::VALUE, out)?;
        }

        out.push(Token::Op(op));
        pop_maybe(ctx, out);
        Ok(())
    }

    fn branch(&mut self, args: &[Sexp], locals: &mut Locals, ctx: Ctx, out: &mut Vec<Token>) -> Result<()> {
        let (condition, then, otherwise) = match args {
            [condition, then] => (condition, then, None),
            [condition, then, otherwise] => (condition, then, Some(otherwise)),
            _ => return malformed(Form::If, "expects 2 or 3 arguments"),
        };

        self.expr(condition, locals, Ctx::VALUE, out)?;

        let mut then_code = Vec::new();
        self.expr(then, locals, Ctx::VALUE, &mut then_code)?;

        let mut else_code = Vec::new();
        match otherwise {
            Some(otherwise) => self.expr(otherwise, locals, Ctx::VALUE, &mut else_code)?,
            None => empty_list(&mut else_code),
        }

        out.extend(tokens![Op::JumpIfFalse, then_code.len() + 3]);
        out.extend(then_code);
        out.extend(tokens![Op::Jump, else_code.len() + 1]);
        out.extend(else_code);
        pop_maybe(ctx, out);
        Ok(())
    }

    fn assign(&mut self, args: &[Sexp], locals: &mut Locals, ctx: Ctx, out: &mut Vec<Token>) -> Result<()> {
        let [Sexp::Atom(name), value] = args else {
            return malformed(Form::Set, "expects a name and a value");
        };

        self.expr(value, locals, Ctx::VALUE, out)?;
        let op = if locals.contains(name.as_str()) {
            Op::SetLocal
        } else {
            Op::SetRemote
        };
        out.extend(tokens![op, name.as_str()]);

        if ctx.use_value {
            Self::variable(name, locals, out);
        }
        Ok(())
    }

    fn macro_call(
        &mut self,
        name: &str,
        transformer: &[Token],
        form: &Sexp,
        locals: &mut Locals,
        ctx: Ctx,
        out: &mut Vec<Token>,
    ) -> Result<()> {
        let expansion = expand::expand(transformer, form)?.unwrap_or_else(|| Sexp::List(vec![]));
        log::debug!("expanded {} into {}", name, expansion);
        self.expr(&expansion, locals, Ctx::VALUE, out)?;
        pop_maybe(ctx, out);
        Ok(())
    }
}
