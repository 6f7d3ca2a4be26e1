use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, fmt};

use dicelang::asm::{self, Program};
use dicelang::codegen::{self, Toplevel};
use dicelang::diagnostic::{Diagnostic, ansi::AnsiRenderer, json};
use dicelang::vm::{Console, OsFileSystem, Vm, VmConfig, DEFAULT_MAX_REROLL_PASSES};

#[derive(Parser, Debug)]
#[command(name = "dicelang", version)]
#[command(about = "Compile and run dice-rolling programs")]
#[command(group(clap::ArgGroup::new("input").required(true).args(["file", "expr"])))]
struct Args {
    /// Source file, or `-` to read the program from stdin
    file: Option<PathBuf>,

    /// Program text given inline
    #[arg(short = 'e', long = "expr")]
    expr: Option<String>,

    /// Seed the random generator for reproducible rolls
    #[arg(long)]
    seed: Option<u64>,

    /// Print an intermediate form instead of running
    #[arg(long, value_enum)]
    emit: Option<Emit>,

    /// Treat the input as bytecode JSON produced by `--emit bytecode`
    #[arg(long)]
    bytecode: bool,

    /// Maximum passes for a repeating reroll (`r`)
    #[arg(long = "max-rerolls", default_value_t = DEFAULT_MAX_REROLL_PASSES)]
    max_rerolls: usize,

    #[arg(long = "error-format", value_enum, default_value_t = ErrorFormat::Text)]
    error_format: ErrorFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Emit {
    Ast,
    Asm,
    Bytecode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ErrorFormat {
    Text,
    Json,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

fn report(d: Diagnostic, format: ErrorFormat) -> ! {
    match format {
        ErrorFormat::Text => {
            let renderer = AnsiRenderer { use_color: std::io::stderr().is_terminal() };
            eprint!("{}", renderer.render(&d));
        }
        ErrorFormat::Json => eprintln!("{}", json::render(&d)),
    }
    process::exit(1);
}

fn read_input(args: &Args) -> Result<String, String> {
    if let Some(expr) = &args.expr {
        return Ok(expr.clone());
    }
    match &args.file {
        Some(path) if path.as_os_str() == "-" => {
            let mut source = String::new();
            std::io::stdin().read_to_string(&mut source).map_err(|e| format!("Error reading stdin: {}", e))?;
            Ok(source)
        }
        Some(path) => {
            std::fs::read_to_string(path).map_err(|e| format!("Error reading {}: {}", path.display(), e))
        }
        None => Err("no input given".to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        error!("serialization failed: {}", e);
        process::exit(1);
    })
}

fn main() {
    init_logging();
    let args = Args::parse();

    let source = read_input(&args).unwrap_or_else(|msg| {
        eprintln!("{}", msg);
        process::exit(1);
    });

    let program: Program = if args.bytecode {
        serde_json::from_str(&source).unwrap_or_else(|e| {
            eprintln!("Invalid bytecode: {}", e);
            process::exit(1);
        })
    } else {
        let ast = dicelang::parse(&source)
            .unwrap_or_else(|e| report(Diagnostic::from(&e).with_source(source.clone()), args.error_format));

        if let Some(Emit::Ast) = args.emit {
            println!("{}", to_json(&ast));
            return;
        }

        let items = codegen::generate(&ast, Toplevel::Discard);
        if let Some(Emit::Asm) = args.emit {
            print!("{}", asm::listing(&items));
            return;
        }

        asm::assemble(&items).unwrap_or_else(|e| report(Diagnostic::from(&e), args.error_format))
    };

    if let Some(Emit::Bytecode) = args.emit {
        println!("{}", to_json(&program));
        return;
    }

    let config = VmConfig { seed: args.seed, max_reroll_passes: args.max_rerolls, ..VmConfig::default() };
    let result = Vm::new(&program, config).run(&mut Console::stdio(), &mut OsFileSystem);
    match result {
        Ok(exec) => debug!(printed = exec.printed.len(), files = exec.files_written.len(), "finished"),
        Err(e) => report(Diagnostic::from(&e), args.error_format),
    }
}
