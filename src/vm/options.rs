use std::ffi::OsString;
use std::path::PathBuf;

pub struct VmOptions {
    pub disassemble: bool,
    pub prelude: bool,
    pub expr: Option<String>,
    pub filename: Option<PathBuf>,
    pub help: bool,
}

impl VmOptions {
    pub fn new() -> Self {
        VmOptions {
            disassemble: false,
            prelude: true,
            expr: None,
            filename: None,
            help: false,
        }
    }

    pub fn parse() -> Result<Self, String> {
        parse(pico_args::Arguments::from_env())
    }

    pub fn parse_from(args: Vec<OsString>) -> Result<Self, String> {
        parse(pico_args::Arguments::from_vec(args))
    }

    /// Neither a file nor an expression was given.
    pub fn interactive(&self) -> bool {
        self.filename.is_none() && self.expr.is_none()
    }
}

impl Default for VmOptions {
    fn default() -> Self {
        Self::new()
    }
}

pub const USAGE: &str = "\
Usage: scheme-vm [options] [input file]
Options:
  -h, --help: Print this help message
  -e <expr>: Evaluate an expression and print its value
  --disassemble: Print compiled bytecode before running it
  --no-prelude: Do not load the standard list library";

fn parse(mut args: pico_args::Arguments) -> Result<VmOptions, String> {
    let mut options = VmOptions::new();

    options.help = args.contains(["-h", "--help"]);
    options.disassemble = args.contains("--disassemble");
    options.prelude = !args.contains("--no-prelude");

    options.expr = match args.opt_value_from_str::<_, String>("-e") {
        Ok(expr) => expr,
        Err(e) => return Err(e.to_string()),
    };

    options.filename = match args.opt_free_from_str::<PathBuf>() {
        Ok(filename) => filename,
        Err(e) => return Err(e.to_string()),
    };

    let rest = args.finish();
    if !rest.is_empty() {
        return Err(format!("unexpected arguments: {:?}", rest));
    }

    Ok(options)
}
