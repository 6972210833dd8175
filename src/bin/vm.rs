use std::fs;
use std::io::{self, Write};
use std::path::Path;

use scheme_vm::{
    repl::{self, report_error},
    vm::options::{VmOptions, USAGE},
    Compiler, Result,
};

fn run_file(options: &VmOptions, path: &Path) -> Result<()> {
    let source = fs::read_to_string(path)?;
    let mut vm = repl::boot_vm(options, io::stdout())?;
    let mut compiler = Compiler::new();
    repl::eval(&mut vm, &mut compiler, &source, options.disassemble)?;
    Ok(())
}

fn run_expr(options: &VmOptions, expr: &str) -> Result<()> {
    let mut vm = repl::boot_vm(options, io::stdout())?;
    let mut compiler = Compiler::new();
    let result = repl::eval(&mut vm, &mut compiler, expr, options.disassemble)?;
    let mut out = vm.into_output();
    if let Some(result) = result {
        writeln!(out, "{}", result)?;
    }
    Ok(())
}

fn main() {
    env_logger::init();

    let options = match VmOptions::parse() {
        Ok(options) => options,
        Err(err) => {
            report_error(&err);
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    };

    if options.help {
        println!("{}", USAGE);
        return;
    }

    if options.interactive() {
        if let Err(err) = repl::repl(&options) {
            report_error(&err);
            std::process::exit(1);
        }
        return;
    }

    let result = match (&options.filename, &options.expr) {
        (Some(path), _) => run_file(&options, path),
        (None, Some(expr)) => run_expr(&options, expr),
        (None, None) => Ok(()),
    };

    if let Err(err) = result {
        log::debug!("exiting on {:?}", err);
        report_error(&err);
        std::process::exit(1);
    }
}
