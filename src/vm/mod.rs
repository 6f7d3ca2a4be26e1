//! Stack machine for assembled dice programs.
//!
//! One [`Vm`] per execution: it owns the value stack, the heap, the file-handle
//! table and the random generator, so concurrent programs never share state.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, trace, warn};

use crate::asm::{Immediate, Instruction, Opcode, Program};

pub mod host;
pub mod pool;
pub mod value;

pub use host::{Console, FileSystem, MemoryFileSystem, OsFileSystem};
pub use value::{Reference, Value};

use pool::{Compare, Select};

pub const DEFAULT_MAX_REROLL_PASSES: usize = 100;
pub const DEFAULT_MAX_POOL_SIZE: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("stack underflow at {ip} ({op})")]
    StackUnderflow { ip: usize, op: Opcode },
    #[error("type mismatch at {ip} ({op}): {message}")]
    TypeMismatch { ip: usize, op: Opcode, message: String },
    #[error("division by zero at {ip} ({op})")]
    DivisionByZero { ip: usize, op: Opcode },
    #[error("no open file handle {reference} at {ip}")]
    UnknownHandle { ip: usize, reference: Reference },
    #[error("file handle {reference} is not open for {mode} at {ip}")]
    WrongHandleMode { ip: usize, reference: Reference, mode: &'static str },
    #[error("read past end of input at {ip}")]
    EndOfInput { ip: usize },
    #[error("invalid operand for {op} at {ip}")]
    BadOperand { ip: usize, op: Opcode },
    #[error("invalid dice at {ip}: {message}")]
    InvalidDice { ip: usize, message: String },
    #[error("jump target {target} out of range at {ip}")]
    InvalidJump { ip: usize, target: usize },
    #[error("i/o error at {ip}: {source}")]
    Io {
        ip: usize,
        #[source]
        source: io::Error,
    },
}

impl RuntimeError {
    pub fn ip(&self) -> usize {
        match self {
            RuntimeError::StackUnderflow { ip, .. }
            | RuntimeError::TypeMismatch { ip, .. }
            | RuntimeError::DivisionByZero { ip, .. }
            | RuntimeError::UnknownHandle { ip, .. }
            | RuntimeError::WrongHandleMode { ip, .. }
            | RuntimeError::EndOfInput { ip }
            | RuntimeError::BadOperand { ip, .. }
            | RuntimeError::InvalidDice { ip, .. }
            | RuntimeError::InvalidJump { ip, .. }
            | RuntimeError::Io { ip, .. } => *ip,
        }
    }
}

type VmResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Fixed seed for reproducible rolls; random when `None`.
    pub seed: Option<u64>,
    /// Upper bound on passes for a repeating reroll.
    pub max_reroll_passes: usize,
    /// Largest number of dice a single roll may produce.
    pub max_pool_size: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            seed: None,
            max_reroll_passes: DEFAULT_MAX_REROLL_PASSES,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
        }
    }
}

/// What a finished program left behind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Execution {
    pub stack: Vec<Value>,
    pub printed: Vec<String>,
    pub files_written: Vec<String>,
}

enum Handle {
    Reader(Box<dyn BufRead>),
    Writer(Box<dyn Write>),
}

pub struct Vm<'a> {
    program: &'a Program,
    config: VmConfig,
    stack: Vec<Value>,
    heap: HashMap<Reference, Value>,
    handles: HashMap<Reference, Handle>,
    ip: usize,
    rng: fastrand::Rng,
    printed: Vec<String>,
    files_written: Vec<String>,
}

impl<'a> Vm<'a> {
    pub fn new(program: &'a Program, config: VmConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        Vm {
            program,
            config,
            stack: Vec::new(),
            heap: HashMap::new(),
            handles: HashMap::new(),
            ip: 0,
            rng,
            printed: Vec::new(),
            files_written: Vec::new(),
        }
    }

    /// Run from the first instruction until the pointer falls off the end.
    ///
    /// Open writers are flushed and every handle is closed before returning,
    /// whether or not the program closed them itself.
    pub fn run(&mut self, console: &mut Console, fs: &mut dyn FileSystem) -> VmResult<Execution> {
        let program = self.program;
        let len = program.code.len();
        debug!(instructions = len, seed = ?self.config.seed, "running program");

        self.ip = 0;
        let outcome = loop {
            if self.ip >= len {
                break Ok(());
            }
            let inst = &program.code[self.ip];
            trace!(ip = self.ip, op = %inst.op, depth = self.stack.len(), "exec");
            match self.step(inst, console, fs) {
                Ok(Some(target)) if target > len => {
                    break Err(RuntimeError::InvalidJump { ip: self.ip, target });
                }
                Ok(Some(target)) => self.ip = target,
                Ok(None) => self.ip += 1,
                Err(e) => break Err(e),
            }
        };

        let flushed = self.close_all();
        outcome?;
        flushed?;

        Ok(Execution {
            stack: std::mem::take(&mut self.stack),
            printed: std::mem::take(&mut self.printed),
            files_written: std::mem::take(&mut self.files_written),
        })
    }

    fn close_all(&mut self) -> VmResult<()> {
        let ip = self.ip;
        for (_, handle) in self.handles.drain() {
            if let Handle::Writer(mut w) = handle {
                w.flush().map_err(|source| RuntimeError::Io { ip, source })?;
            }
        }
        Ok(())
    }

    // ---- Stack helpers ----

    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self, op: Opcode) -> VmResult<Value> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow { ip: self.ip, op })
    }

    fn pop_number(&mut self, op: Opcode) -> VmResult<f64> {
        let v = self.pop(op)?;
        v.to_number().ok_or_else(|| RuntimeError::TypeMismatch {
            ip: self.ip,
            op,
            message: format!("expected a number, found {} '{}'", v.type_name(), v),
        })
    }

    /// Pops the count coordinate, then the sides coordinate.
    fn pop_reference(&mut self, op: Opcode) -> VmResult<Reference> {
        let count = self.pop_number(op)?;
        let sides = self.pop_number(op)?;
        Ok(Reference { count: count.trunc() as i64, sides: sides.trunc() as i64 })
    }

    /// A list as its numbers; a lone scalar is a pool of one.
    fn pop_pool(&mut self, op: Opcode) -> VmResult<Vec<f64>> {
        let v = self.pop(op)?;
        let items = match &v {
            Value::List(items) => items.iter().map(Value::to_number).collect::<Option<Vec<_>>>(),
            other => other.to_number().map(|n| vec![n]),
        };
        items.ok_or_else(|| RuntimeError::TypeMismatch {
            ip: self.ip,
            op,
            message: format!("expected a dice pool, found {} '{}'", v.type_name(), v),
        })
    }

    fn push_pool(&mut self, pool: Vec<f64>) {
        self.push(Value::List(pool.into_iter().map(Value::Number).collect()));
    }

    fn die_size(&self, sides: f64) -> VmResult<i64> {
        let sides = sides.trunc();
        if !sides.is_finite() || sides < 1.0 {
            return Err(RuntimeError::InvalidDice {
                ip: self.ip,
                message: format!("a die needs at least one side, got {}", Value::Number(sides)),
            });
        }
        Ok(sides as i64)
    }

    fn bool_value(b: bool) -> Value {
        Value::Number(if b { 1.0 } else { 0.0 })
    }

    fn io_error(&self, source: io::Error) -> RuntimeError {
        RuntimeError::Io { ip: self.ip, source }
    }

    // ---- Dispatch ----

    /// Execute one instruction; `Some(addr)` is an absolute jump.
    fn step(
        &mut self,
        inst: &Instruction,
        console: &mut Console,
        fs: &mut dyn FileSystem,
    ) -> VmResult<Option<usize>> {
        let op = inst.op;
        match op {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod | Opcode::Pow => {
                let b = self.pop_number(op)?;
                let a = self.pop_number(op)?;
                let result = match op {
                    Opcode::Add => a + b,
                    Opcode::Sub => a - b,
                    Opcode::Mul => a * b,
                    Opcode::Div | Opcode::Mod if b == 0.0 => {
                        return Err(RuntimeError::DivisionByZero { ip: self.ip, op });
                    }
                    Opcode::Div => a / b,
                    Opcode::Mod => a % b,
                    _ => a.powf(b),
                };
                self.push(Value::Number(result));
            }

            Opcode::And | Opcode::Or => {
                let b = self.pop(op)?.truthy();
                let a = self.pop(op)?.truthy();
                let result = if op == Opcode::And { a && b } else { a || b };
                self.push(Self::bool_value(result));
            }
            Opcode::Not => {
                let v = self.pop(op)?;
                self.push(Self::bool_value(!v.truthy()));
            }
            Opcode::Lt | Opcode::Lte | Opcode::Gt | Opcode::Gte => {
                let b = self.pop_number(op)?;
                let a = self.pop_number(op)?;
                let result = match op {
                    Opcode::Lt => a < b,
                    Opcode::Lte => a <= b,
                    Opcode::Gt => a > b,
                    _ => a >= b,
                };
                self.push(Self::bool_value(result));
            }
            Opcode::Eq | Opcode::Ne => {
                let b = self.pop(op)?;
                let a = self.pop(op)?;
                let equal = values_equal(&a, &b);
                self.push(Self::bool_value(if op == Opcode::Eq { equal } else { !equal }));
            }

            Opcode::Push => match inst.imm {
                Immediate::Num(n) => self.push(Value::Number(n)),
                Immediate::Int(n) => self.push(Value::Number(n as f64)),
                _ => return Err(RuntimeError::BadOperand { ip: self.ip, op }),
            },
            Opcode::PushStr => match &inst.imm {
                Immediate::Str(s) => self.push(Value::Str(s.clone())),
                _ => return Err(RuntimeError::BadOperand { ip: self.ip, op }),
            },
            Opcode::Dup => {
                let times = self.count_operand(inst)?;
                let top = self.stack.last().cloned().ok_or(RuntimeError::StackUnderflow { ip: self.ip, op })?;
                for _ in 0..times {
                    self.push(top.clone());
                }
            }
            Opcode::Pop => {
                self.pop(op)?;
            }

            Opcode::MList => {
                let n = self.count_operand(inst)?;
                if n > self.stack.len() {
                    return Err(RuntimeError::StackUnderflow { ip: self.ip, op });
                }
                let items = self.stack.split_off(self.stack.len() - n);
                self.push(Value::List(items));
            }
            Opcode::SortA | Opcode::SortD => {
                let mut items = self.pop_pool(op)?;
                pool::sort(&mut items, op == Opcode::SortD);
                self.push_pool(items);
            }
            Opcode::Kh
            | Opcode::Kl
            | Opcode::Kf
            | Opcode::Kr
            | Opcode::Dh
            | Opcode::Dl
            | Opcode::Df
            | Opcode::Dr => {
                let n = self.pop_number(op)?;
                let items = self.pop_pool(op)?;
                let mode = match op {
                    Opcode::Kh => Select::KeepHigh,
                    Opcode::Kl => Select::KeepLow,
                    Opcode::Kf => Select::KeepFront,
                    Opcode::Kr => Select::KeepRear,
                    Opcode::Dh => Select::DiscardHigh,
                    Opcode::Dl => Select::DiscardLow,
                    Opcode::Df => Select::DiscardFront,
                    _ => Select::DiscardRear,
                };
                let selected = pool::select(&items, mode, pool::clamp_count(n, items.len()));
                self.push_pool(selected);
            }
            Opcode::CcGt | Opcode::CcLt | Opcode::CcEq => {
                let threshold = self.pop_number(op)?;
                let items = self.pop_pool(op)?;
                let cmp = match op {
                    Opcode::CcGt => Compare::Greater,
                    Opcode::CcLt => Compare::Less,
                    _ => Compare::Equal,
                };
                self.push(Value::Number(pool::count_matching(&items, cmp, threshold) as f64));
            }
            Opcode::RrGt | Opcode::RrLt | Opcode::RrEq | Opcode::RoGt | Opcode::RoLt | Opcode::RoEq => {
                self.reroll(op)?;
            }
            Opcode::Sum => {
                let total = self.pop_number(op)?;
                self.push(Value::Number(total));
            }

            Opcode::Roll => {
                let count = self.pop_number(op)?.trunc();
                let sides = self.pop_number(op)?;
                if count.is_nan() || count < 0.0 {
                    return Err(RuntimeError::InvalidDice {
                        ip: self.ip,
                        message: format!("cannot roll {} dice", Value::Number(count)),
                    });
                }
                if count > self.config.max_pool_size as f64 {
                    return Err(RuntimeError::InvalidDice {
                        ip: self.ip,
                        message: format!("cannot roll more than {} dice at once", self.config.max_pool_size),
                    });
                }
                let count = count as usize;
                let dice = if count == 0 {
                    Vec::new()
                } else {
                    let sides = self.die_size(sides)?;
                    (0..count).map(|_| Value::Number(self.rng.i64(1..=sides) as f64)).collect()
                };
                self.push(Value::List(dice));
            }

            Opcode::PushV => {
                let r = self.pop_reference(op)?;
                let v = self.heap.get(&r).cloned().unwrap_or(Value::Number(0.0));
                self.push(v);
            }
            Opcode::PopV => {
                let r = self.pop_reference(op)?;
                let v = self.pop(op)?;
                self.heap.insert(r, v.clone());
                self.push(v);
            }

            Opcode::Read => {
                let line = console.read_line().map_err(|e| self.io_error(e))?;
                let line = line.ok_or(RuntimeError::EndOfInput { ip: self.ip })?;
                self.push(Value::Str(line));
            }
            Opcode::Print => {
                let line = self.pop(op)?.to_string();
                console.write_line(&line).map_err(|e| self.io_error(e))?;
                self.printed.push(line);
            }
            Opcode::FPrint => {
                let r = self.pop_reference(op)?;
                let v = self.pop(op)?;
                let ip = self.ip;
                match self.handles.get_mut(&r) {
                    Some(Handle::Writer(w)) => {
                        writeln!(w, "{}", v).map_err(|source| RuntimeError::Io { ip, source })?;
                    }
                    Some(Handle::Reader(_)) => {
                        return Err(RuntimeError::WrongHandleMode { ip, reference: r, mode: "writing" });
                    }
                    None => return Err(RuntimeError::UnknownHandle { ip, reference: r }),
                }
            }
            Opcode::OpenR | Opcode::OpenW => {
                let r = self.pop_reference(op)?;
                let path = self.pop(op)?.to_string();
                let handle = if op == Opcode::OpenR {
                    Handle::Reader(fs.open_read(&path).map_err(|e| self.io_error(e))?)
                } else {
                    let w = fs.open_write(&path).map_err(|e| self.io_error(e))?;
                    self.files_written.push(path.clone());
                    Handle::Writer(w)
                };
                debug!(handle = %r, path = %path, "opened file");
                if let Some(Handle::Writer(mut old)) = self.handles.insert(r, handle) {
                    old.flush().map_err(|e| self.io_error(e))?;
                }
                self.push(Value::Str(path));
            }
            Opcode::FRead => {
                let r = self.pop_reference(op)?;
                let ip = self.ip;
                let line = match self.handles.get_mut(&r) {
                    Some(Handle::Reader(input)) => {
                        host::read_line(&mut **input).map_err(|source| RuntimeError::Io { ip, source })?
                    }
                    Some(Handle::Writer(_)) => {
                        return Err(RuntimeError::WrongHandleMode { ip, reference: r, mode: "reading" });
                    }
                    None => return Err(RuntimeError::UnknownHandle { ip, reference: r }),
                };
                let line = line.ok_or(RuntimeError::EndOfInput { ip })?;
                self.push(Value::Str(line));
            }
            Opcode::Close => {
                let r = self.pop_reference(op)?;
                match self.handles.remove(&r) {
                    Some(Handle::Writer(mut w)) => w.flush().map_err(|e| self.io_error(e))?,
                    Some(Handle::Reader(_)) => {}
                    None => return Err(RuntimeError::UnknownHandle { ip: self.ip, reference: r }),
                }
                self.push(Value::Number(0.0));
            }

            Opcode::Jmp => return self.jump_target(inst).map(Some),
            Opcode::Jmpz => {
                let target = self.jump_target(inst)?;
                let cond = self.pop(op)?;
                return Ok((!cond.truthy()).then_some(target));
            }

            Opcode::Inc | Opcode::Dec | Opcode::Floor | Opcode::Ceil | Opcode::Neg => {
                let n = self.pop_number(op)?;
                let result = match op {
                    Opcode::Inc => n + 1.0,
                    Opcode::Dec => n - 1.0,
                    Opcode::Floor => n.floor(),
                    Opcode::Ceil => n.ceil(),
                    _ => -n,
                };
                self.push(Value::Number(result));
            }
            Opcode::Time => {
                let ms = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0);
                self.push(Value::Number(ms as f64));
            }
            Opcode::Seed => {
                let seed = self.pop_number(op)?;
                self.rng.seed(seed.trunc() as i64 as u64);
            }
            Opcode::Rand => {
                let r = self.rng.f64();
                self.push(Value::Number(r));
            }
        }
        Ok(None)
    }

    fn count_operand(&self, inst: &Instruction) -> VmResult<usize> {
        match inst.imm {
            Immediate::Int(n) if n >= 0 => Ok(n as usize),
            _ => Err(RuntimeError::BadOperand { ip: self.ip, op: inst.op }),
        }
    }

    fn jump_target(&self, inst: &Instruction) -> VmResult<usize> {
        match inst.imm {
            Immediate::Addr(addr) => Ok(addr),
            _ => Err(RuntimeError::BadOperand { ip: self.ip, op: inst.op }),
        }
    }

    /// Stack: die size, pool, threshold. Pushes the rerolled pool.
    fn reroll(&mut self, op: Opcode) -> VmResult<()> {
        let threshold = self.pop_number(op)?;
        let mut items = self.pop_pool(op)?;
        let sides = self.pop_number(op)?;
        let sides = self.die_size(sides)?;
        let cmp = match op {
            Opcode::RrGt | Opcode::RoGt => Compare::Greater,
            Opcode::RrLt | Opcode::RoLt => Compare::Less,
            _ => Compare::Equal,
        };
        let rng = &mut self.rng;
        let draw = || rng.i64(1..=sides) as f64;
        match op {
            Opcode::RoGt | Opcode::RoLt | Opcode::RoEq => pool::reroll_once(&mut items, cmp, threshold, draw),
            _ => {
                let passes = self.config.max_reroll_passes;
                if !pool::reroll_until(&mut items, cmp, threshold, passes, draw) {
                    warn!(ip = self.ip, passes, "reroll stopped at its pass limit with dice still matching");
                }
            }
        }
        self.push_pool(items);
        Ok(())
    }
}

/// Strings compare as text with each other, everything else numerically.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => x == y,
        _ => match (a.to_number(), b.to_number()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
    }
}
