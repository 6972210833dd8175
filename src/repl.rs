use std::fmt::Display;
use std::io::Write;

use rustyline::{
    completion::Completer,
    config::Configurer,
    error::ReadlineError,
    highlight::Highlighter,
    hint::Hinter,
    history::DefaultHistory,
    validate::{ValidationContext, ValidationResult, Validator},
    CompletionType, Context, Editor, Helper,
};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::compiler::Compiler;
use crate::error::{Error, Result};
use crate::op;
use crate::reader;
use crate::vm::options::VmOptions;
use crate::vm::Vm;

/// Completes names bound in the root frame and holds input until every
/// list and string is closed.
#[derive(Default)]
pub struct SchemeHelper {
    names: Vec<String>,
}

impl SchemeHelper {
    pub fn set_names(&mut self, names: impl IntoIterator<Item = String>) {
        self.names = names.into_iter().collect();
        self.names.sort();
    }
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '\'' | '`' | ',' | '"' | ';')
}

/// Byte offset where the word ending at `pos` starts.
fn word_start(line: &str, pos: usize) -> usize {
    line[..pos]
        .char_indices()
        .rev()
        .find(|&(_, c)| is_delimiter(c))
        .map_or(0, |(i, c)| i + c.len_utf8())
}

impl Completer for SchemeHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Self::Candidate>)> {
        let start = word_start(line, pos);
        let word = &line[start..pos];
        if word.is_empty() {
            return Ok((pos, vec![]));
        }

        let candidates = self
            .names
            .iter()
            .filter(|name| name.starts_with(word))
            .cloned()
            .collect();
        Ok((start, candidates))
    }
}

impl Validator for SchemeHelper {
    fn validate(&self, ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        Ok(match reader::read(ctx.input()) {
            Ok(_) => ValidationResult::Valid(None),
            Err(Error::Incomplete(_)) => ValidationResult::Incomplete,
            Err(err) => ValidationResult::Invalid(Some(format!("  {}", err))),
        })
    }
}

impl Hinter for SchemeHelper {
    type Hint = String;
}

impl Highlighter for SchemeHelper {}

impl Helper for SchemeHelper {}

/// Prints `error: <message>` to stderr, the prefix in bold red when the
/// terminal supports it.
pub fn report_error(err: &dyn Display) {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true));
    let _ = write!(stderr, "error");
    let _ = stderr.reset();
    let _ = writeln!(stderr, ": {}", err);
}

pub fn boot_vm<W: Write>(options: &VmOptions, out: W) -> Result<Vm<W>> {
    if options.prelude {
        Vm::boot(out)
    } else {
        Ok(Vm::new(out))
    }
}

/// Reads, compiles and runs `source` on `vm`, returning the rendering of the
/// value it produced, if any.
///
/// `compiler` is kept across calls so macros stay defined; root bindings
/// persist in the VM.
pub fn eval<W: Write>(
    vm: &mut Vm<W>,
    compiler: &mut Compiler,
    source: &str,
    disassemble: bool,
) -> Result<Option<String>> {
    let forms = reader::read(source)?;
    if forms.is_empty() {
        return Ok(None);
    }

    let code = compiler.compile(&forms)?;
    if disassemble {
        eprint!("{}", op::disassemble(&code));
    }

    let depth = vm.stack().len();
    vm.execute(&code)?;
    vm.output_mut().flush()?;

    if vm.stack().len() > depth {
        let result = vm.pop()?;
        vm.render(result).map(Some)
    } else {
        Ok(None)
    }
}

fn root_names<W: Write>(vm: &Vm<W>) -> impl Iterator<Item = String> + '_ {
    vm.frames()[0].locals.keys().map(|name| name.to_string())
}

pub fn repl(options: &VmOptions) -> rustyline::Result<()> {
    let mut rl = Editor::<SchemeHelper, DefaultHistory>::new()?;
    rl.set_helper(Some(SchemeHelper::default()));
    rl.set_completion_type(CompletionType::List);
    rl.set_completion_prompt_limit(10);

    let mut vm = match boot_vm(options, std::io::stdout()) {
        Ok(vm) => vm,
        Err(err) => {
            report_error(&err);
            return Ok(());
        }
    };
    let mut compiler = Compiler::new();

    loop {
        if let Some(helper) = rl.helper_mut() {
            helper.set_names(root_names(&vm));
        }

        match rl.readline("scheme> ") {
            Ok(input) => {
                if input.trim().is_empty() {
                    continue;
                }
                rl.add_history_entry(input.as_str())?;

                match eval(&mut vm, &mut compiler, &input, options.disassemble) {
                    Ok(Some(result)) => println!("{}", result),
                    Ok(None) => println!(),
                    Err(err) => {
                        log::debug!(target: "repl", "recovering from {:?}", err);
                        report_error(&err);
                        vm.reset();
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Input interrupted");
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_the_word_under_the_cursor() {
        assert_eq!(word_start("(map ", 5), 5);
        assert_eq!(word_start("(ma", 3), 1);
        assert_eq!(word_start("for-e", 5), 0);
        assert_eq!(word_start("(é fil", 7), 4);
    }

    #[test]
    fn eval_keeps_definitions_between_inputs() {
        let mut vm = Vm::boot(Vec::new()).unwrap();
        let mut compiler = Compiler::new();
        let mut run = |source: &str| eval(&mut vm, &mut compiler, source, false).unwrap();

        assert_eq!(run("(define x 41)").as_deref(), Some("41"));
        assert_eq!(run("(+ x 1)").as_deref(), Some("42"));
        assert_eq!(
            run("(define-syntax twice (syntax-rules () ((_ e) (begin e e))))").as_deref(),
            Some("()")
        );
        assert_eq!(run("(twice (+ x 2))").as_deref(), Some("43"));
        assert_eq!(run("").as_deref(), None);
    }

    #[test]
    fn eval_returns_output_and_value() {
        let mut vm = Vm::boot(Vec::new()).unwrap();
        let mut compiler = Compiler::new();
        let result = eval(&mut vm, &mut compiler, "(write \"hi\") 7", false).unwrap();
        assert_eq!(result.as_deref(), Some("7"));
        assert_eq!(vm.output(), b"hi");
    }

    #[test]
    fn vm_recovers_after_an_error() {
        let mut vm = Vm::boot(Vec::new()).unwrap();
        let mut compiler = Compiler::new();
        assert!(eval(&mut vm, &mut compiler, "(define f (lambda () (car 1))) (f)", false).is_err());
        vm.reset();
        assert_eq!(vm.frames().len(), 1);
        let result = eval(&mut vm, &mut compiler, "(length '(1 2 3))", false).unwrap();
        assert_eq!(result.as_deref(), Some("3"));
    }

    #[test]
    fn validator_distinguishes_incomplete_input() {
        assert!(matches!(reader::read("(define x"), Err(Error::Incomplete(_))));
        assert!(matches!(reader::read(")"), Err(Error::Read { .. })));
    }
}
