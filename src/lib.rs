//! dicelang: dice formulas such as `4d6kh3 + 2` compiled to a small stack
//! machine.
//!
//! The pipeline is [`tokenize`] → [`parse`] → code generation → two-pass
//! assembly ([`compile`]) → [`run`] on a [`Vm`]. Each compilation owns its own
//! label counter and each run its own heap, handle table and random
//! generator, so programs can be compiled and run on separate threads freely.

use tracing::debug;

pub mod asm;
pub mod ast;
pub mod codegen;
pub mod diagnostic;
pub mod lexer;
pub mod parser;
pub mod vm;

pub use asm::{AssemblyError, Program};
pub use lexer::{Token, TokenKind, tokenize};
pub use parser::ParseError;
pub use vm::{Console, Execution, FileSystem, MemoryFileSystem, OsFileSystem, RuntimeError, Value, Vm, VmConfig};

use codegen::Toplevel;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub fn parse(source: &str) -> Result<ast::Program, ParseError> {
    parser::parse(tokenize(source))
}

/// Compile a whole program. Every toplevel value is discarded, so a finished
/// run leaves an empty stack.
pub fn compile(source: &str) -> Result<Program, CompileError> {
    compile_with(source, Toplevel::Discard)
}

/// Compile like [`compile`], but leave the last toplevel value on the stack.
pub fn compile_value(source: &str) -> Result<Program, CompileError> {
    compile_with(source, Toplevel::KeepLast)
}

fn compile_with(source: &str, mode: Toplevel) -> Result<Program, CompileError> {
    let program = parse(source)?;
    debug!(expressions = program.body.len(), "parsed");
    let items = codegen::generate(&program, mode);
    let assembled = asm::assemble(&items)?;
    debug!(symbolic = items.len(), instructions = assembled.code.len(), "assembled");
    Ok(assembled)
}

/// Run with default settings and a fresh random seed.
pub fn run(program: &Program, console: &mut Console, fs: &mut dyn FileSystem) -> Result<Execution, RuntimeError> {
    Vm::new(program, VmConfig::default()).run(console, fs)
}

/// Evaluate a formula and return its value, e.g. `eval("4d6kh3", cfg)`.
///
/// Prompts see no input and files live in memory only.
pub fn eval(source: &str, config: VmConfig) -> Result<Option<Value>, Error> {
    let program = compile_value(source)?;
    let mut execution = Vm::new(&program, config).run(&mut Console::empty(), &mut MemoryFileSystem::new())?;
    Ok(execution.stack.pop())
}
