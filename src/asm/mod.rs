//! Symbolic instructions, the opcode table, and two-pass label resolution.
//!
//! Code generation produces a flat list of [`Item`]s: real instructions whose
//! jump operands are still [`Label`]s, interleaved with zero-width label
//! definitions. [`assemble`] turns that into a [`Program`] of addressed
//! [`Instruction`]s that the VM executes.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("unresolved label {label}")]
    UnresolvedLabel { label: Label },
    #[error("label {label} defined twice")]
    DuplicateLabel { label: Label },
    #[error("unknown mnemonic '{mnemonic}' on line {line}")]
    UnknownMnemonic { mnemonic: String, line: usize },
    #[error("{op} expects {expected}")]
    BadOperand { op: Opcode, expected: &'static str },
    #[error("malformed listing line {line}: {text}")]
    MalformedLine { line: usize, text: String },
}

type Result<T> = std::result::Result<T, AssemblyError>;

/// What kind of immediate an opcode carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Int,
    Num,
    Str,
    Addr,
}

impl OperandKind {
    fn describe(self) -> &'static str {
        match self {
            OperandKind::None => "no operand",
            OperandKind::Int => "an integer operand",
            OperandKind::Num => "a numeric operand",
            OperandKind::Str => "a string operand",
            OperandKind::Addr => "a label operand",
        }
    }
}

macro_rules! opcodes {
    ($($name:ident = $byte:literal, $mnemonic:literal, $operand:ident;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum Opcode {
            $(
                #[serde(rename = $mnemonic)]
                $name = $byte,
            )*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name),*];

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => $mnemonic,)*
                }
            }

            pub fn operand_kind(self) -> OperandKind {
                match self {
                    $(Opcode::$name => OperandKind::$operand,)*
                }
            }

            pub fn from_mnemonic(s: &str) -> Option<Opcode> {
                match s {
                    $($mnemonic => Some(Opcode::$name),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    // Arithmetic: pop b, pop a, push a OP b
    Add = 0, "ADD", None;
    Sub = 1, "SUB", None;
    Mul = 2, "MUL", None;
    Div = 3, "DIV", None;
    Mod = 4, "MOD", None;
    Pow = 5, "POW", None;

    // Logic and comparison, results are 1 or 0
    And = 10, "AND", None;
    Or = 11, "OR", None;
    Not = 12, "NOT", None;
    Lt = 13, "LT", None;
    Lte = 14, "LTE", None;
    Gt = 15, "GT", None;
    Gte = 16, "GTE", None;
    Eq = 17, "EQ", None;
    Ne = 18, "NE", None;

    // Stack and literals
    Push = 20, "PUSH", Num;
    PushStr = 21, "PUSHSTR", Str;
    Dup = 22, "DUP", Int;
    Pop = 23, "POP", None;

    // Lists and dice pools; operands (n, thresholds) come from the stack
    MList = 30, "MLIST", Int;
    SortA = 31, "SORTA", None;
    SortD = 32, "SORTD", None;
    Kh = 33, "KH", None;
    Kl = 34, "KL", None;
    Kf = 35, "KF", None;
    Kr = 36, "KR", None;
    Dh = 37, "DH", None;
    Dl = 38, "DL", None;
    Df = 39, "DF", None;
    Dr = 40, "DR", None;
    CcGt = 41, "CCGT", None;
    CcLt = 42, "CCLT", None;
    CcEq = 43, "CCEQ", None;
    RrGt = 44, "RRGT", None;
    RrLt = 45, "RRLT", None;
    RrEq = 46, "RREQ", None;
    RoGt = 47, "ROGT", None;
    RoLt = 48, "ROLT", None;
    RoEq = 49, "ROEQ", None;
    Sum = 50, "SUM", None;

    Roll = 55, "ROLL", None;

    // Heap
    PushV = 60, "PUSHV", None;
    PopV = 61, "POPV", None;

    // Console and files
    Read = 70, "READ", None;
    Print = 71, "PRINT", None;
    FPrint = 72, "FPRINT", None;
    OpenR = 73, "OPENR", None;
    OpenW = 74, "OPENW", None;
    FRead = 75, "FREAD", None;
    Close = 76, "CLOSE", None;

    // Control flow
    Jmp = 80, "JMP", Addr;
    Jmpz = 81, "JMPZ", Addr;

    // Numeric helpers and randomness
    Inc = 90, "INC", None;
    Dec = 91, "DEC", None;
    Floor = 92, "FLOOR", None;
    Ceil = 93, "CEIL", None;
    Neg = 94, "NEG", None;
    Time = 95, "TIME", None;
    Seed = 96, "SEED", None;
    Rand = 97, "RAND", None;
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

// ---- Symbolic form ----

/// A jump target minted by one code generator; numbering restarts per compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":L{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Int(i64),
    Num(f64),
    Str(String),
    Label(Label),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbolic {
    pub op: Opcode,
    pub operand: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// Zero-width: names the address of the next instruction.
    Label(Label),
    Instr(Symbolic),
}

// ---- Resolved form ----

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Immediate {
    #[default]
    None,
    Int(i64),
    Num(f64),
    Str(String),
    Addr(usize),
}

impl Immediate {
    pub fn is_none(&self) -> bool {
        matches!(self, Immediate::None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Opcode,
    #[serde(default, skip_serializing_if = "Immediate::is_none")]
    pub imm: Immediate,
}

/// Addressed bytecode: instruction `i` lives at address `i`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub code: Vec<Instruction>,
}

/// Resolve labels to addresses.
///
/// Pass one assigns every real instruction the next address and records each
/// label as the address of the instruction that follows it. Pass two rewrites
/// label operands and checks every operand against the opcode table.
pub fn assemble(items: &[Item]) -> Result<Program> {
    let mut addresses: HashMap<Label, usize> = HashMap::new();
    let mut next = 0usize;
    for item in items {
        match item {
            Item::Label(label) => {
                if addresses.insert(*label, next).is_some() {
                    return Err(AssemblyError::DuplicateLabel { label: *label });
                }
            }
            Item::Instr(_) => next += 1,
        }
    }

    let code = items
        .iter()
        .filter_map(|item| match item {
            Item::Instr(sym) => Some(resolve(sym, &addresses)),
            Item::Label(_) => None,
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Program { code })
}

fn resolve(sym: &Symbolic, addresses: &HashMap<Label, usize>) -> Result<Instruction> {
    let kind = sym.op.operand_kind();
    let imm = match (&sym.operand, kind) {
        (Operand::None, OperandKind::None) => Immediate::None,
        (Operand::Int(n), OperandKind::Int) => Immediate::Int(*n),
        (Operand::Num(n), OperandKind::Num) => Immediate::Num(*n),
        (Operand::Int(n), OperandKind::Num) => Immediate::Num(*n as f64),
        (Operand::Str(s), OperandKind::Str) => Immediate::Str(s.clone()),
        (Operand::Label(label), OperandKind::Addr) => {
            let addr = addresses
                .get(label)
                .ok_or(AssemblyError::UnresolvedLabel { label: *label })?;
            Immediate::Addr(*addr)
        }
        _ => return Err(AssemblyError::BadOperand { op: sym.op, expected: kind.describe() }),
    };
    Ok(Instruction { op: sym.op, imm })
}

// ---- Textual listing ----

fn fmt_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn fmt_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("{:?}", s))
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Label(label) => write!(f, "{}", label),
            Item::Instr(Symbolic { op, operand }) => match operand {
                Operand::None => write!(f, "    {}", op),
                Operand::Int(n) => write!(f, "    {} {}", op, n),
                Operand::Num(n) => write!(f, "    {} {}", op, fmt_number(*n)),
                Operand::Str(s) => write!(f, "    {} {}", op, fmt_string(s)),
                Operand::Label(label) => write!(f, "    {} {}", op, label),
            },
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.imm {
            Immediate::None => write!(f, "{}", self.op),
            Immediate::Int(n) => write!(f, "{} {}", self.op, n),
            Immediate::Num(n) => write!(f, "{} {}", self.op, fmt_number(*n)),
            Immediate::Str(s) => write!(f, "{} {}", self.op, fmt_string(s)),
            Immediate::Addr(a) => write!(f, "{} @{}", self.op, a),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (addr, inst) in self.code.iter().enumerate() {
            writeln!(f, "{:04} {}", addr, inst)?;
        }
        Ok(())
    }
}

/// Render symbolic items one per line, the format [`parse_listing`] reads back.
pub fn listing(items: &[Item]) -> String {
    let mut out = String::new();
    for item in items {
        out.push_str(&item.to_string());
        out.push('\n');
    }
    out
}

/// Parse a hand-written listing: `MNEMONIC [operand]` per line, `:name` lines
/// define labels, `;` starts a comment.
pub fn parse_listing(text: &str) -> Result<Vec<Item>> {
    let mut names: HashMap<String, Label> = HashMap::new();
    let mut label_for = |name: &str| {
        let next = Label(names.len() as u32);
        *names.entry(name.to_string()).or_insert(next)
    };

    let mut items = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        if let Some(name) = line.strip_prefix(':') {
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(AssemblyError::MalformedLine { line: line_no, text: raw.to_string() });
            }
            items.push(Item::Label(label_for(name)));
            continue;
        }

        let (mnemonic, rest) = match line.split_once(char::is_whitespace) {
            Some((m, r)) => (m, r.trim()),
            None => (line, ""),
        };
        let op = Opcode::from_mnemonic(&mnemonic.to_ascii_uppercase()).ok_or_else(|| {
            AssemblyError::UnknownMnemonic { mnemonic: mnemonic.to_string(), line: line_no }
        })?;

        let malformed = || AssemblyError::MalformedLine { line: line_no, text: raw.to_string() };
        let operand = match op.operand_kind() {
            OperandKind::None if rest.is_empty() => Operand::None,
            OperandKind::Int => Operand::Int(rest.parse().map_err(|_| malformed())?),
            OperandKind::Num => Operand::Num(rest.parse().map_err(|_| malformed())?),
            OperandKind::Str => Operand::Str(serde_json::from_str(rest).map_err(|_| malformed())?),
            OperandKind::Addr => match rest.strip_prefix(':') {
                Some(name) if !name.is_empty() => Operand::Label(label_for(name)),
                _ => return Err(malformed()),
            },
            OperandKind::None => return Err(malformed()),
        };
        items.push(Item::Instr(Symbolic { op, operand }));
    }
    Ok(items)
}

/// Drops a `;` comment, ignoring semicolons inside a quoted string.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            ';' if !in_string => return &line[..i],
            _ => {}
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr(op: Opcode, operand: Operand) -> Item {
        Item::Instr(Symbolic { op, operand })
    }

    #[test]
    fn labels_take_no_space() {
        let items = vec![
            instr(Opcode::Push, Operand::Num(1.0)),
            instr(Opcode::Jmpz, Operand::Label(Label(0))),
            instr(Opcode::Push, Operand::Num(2.0)),
            instr(Opcode::Jmp, Operand::Label(Label(1))),
            Item::Label(Label(0)),
            instr(Opcode::Push, Operand::Num(3.0)),
            Item::Label(Label(1)),
        ];
        let program = assemble(&items).unwrap();
        assert_eq!(program.code.len(), 5);
        assert_eq!(program.code[1].imm, Immediate::Addr(4));
        // A label after the last instruction resolves to one past the end.
        assert_eq!(program.code[3].imm, Immediate::Addr(5));
    }

    #[test]
    fn unresolved_label_is_an_error() {
        let items = vec![instr(Opcode::Jmp, Operand::Label(Label(7)))];
        assert!(matches!(
            assemble(&items),
            Err(AssemblyError::UnresolvedLabel { label: Label(7) })
        ));
    }

    #[test]
    fn duplicate_label_is_an_error() {
        let items = vec![Item::Label(Label(0)), Item::Label(Label(0))];
        assert!(matches!(assemble(&items), Err(AssemblyError::DuplicateLabel { .. })));
    }

    #[test]
    fn operand_kind_is_checked() {
        let items = vec![instr(Opcode::Add, Operand::Num(1.0))];
        assert!(matches!(assemble(&items), Err(AssemblyError::BadOperand { op: Opcode::Add, .. })));
        let items = vec![instr(Opcode::Push, Operand::Label(Label(0))), Item::Label(Label(0))];
        assert!(assemble(&items).is_err());
    }

    #[test]
    fn assembling_is_deterministic() {
        let items = parse_listing("PUSH 1\nJMPZ :else\nPUSH 2\nJMP :end\n:else\nPUSH 0\n:end").unwrap();
        assert_eq!(assemble(&items).unwrap(), assemble(&items).unwrap());
    }

    #[test]
    fn listing_round_trips_through_parser() {
        let items = vec![
            instr(Opcode::PushStr, Operand::Str("a \"quoted\"; string".into())),
            instr(Opcode::Dup, Operand::Int(1)),
            Item::Label(Label(0)),
            instr(Opcode::Push, Operand::Num(2.5)),
            instr(Opcode::Jmp, Operand::Label(Label(0))),
        ];
        let text = listing(&items);
        assert_eq!(parse_listing(&text).unwrap(), items);
    }

    #[test]
    fn parse_listing_rejects_unknown_mnemonic() {
        let err = parse_listing("PUSH 1\nGOTO :x").unwrap_err();
        assert!(matches!(err, AssemblyError::UnknownMnemonic { line: 2, .. }));
    }

    #[test]
    fn parse_listing_handles_comments_and_case() {
        let items = parse_listing("; header\npush 4 ; four\n  print\n").unwrap();
        assert_eq!(items, vec![instr(Opcode::Push, Operand::Num(4.0)), instr(Opcode::Print, Operand::None)]);
    }

    #[test]
    fn mnemonics_are_unique_and_round_trip() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(*op));
        }
        let json = serde_json::to_string(&Opcode::CcGt).unwrap();
        assert_eq!(json, "\"CCGT\"");
    }

    #[test]
    fn program_display_shows_addresses() {
        let program = assemble(&parse_listing(":top\nPUSH 1\nJMP :top").unwrap()).unwrap();
        assert_eq!(program.to_string(), "0000 PUSH 1\n0001 JMP @0\n");
    }
}
