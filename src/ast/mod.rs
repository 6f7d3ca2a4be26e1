use serde::Serialize;

pub mod source_map;
pub use source_map::SourceMap;

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };
}

// ---- Expressions ----

/// A whole source file: the toplevel expression list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Program {
    pub body: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    /// `!expr` or `!|&ref expr`
    Print {
        target: Option<Reference>,
        value: Box<Expr>,
    },

    /// `|&ref`
    Close { handle: Reference },

    /// `{cond, then | cond, then | else}`
    If {
        clauses: Vec<Clause>,
        otherwise: Option<Box<Expr>>,
    },

    /// A value with an optional prefix and an optional `@ref` destination.
    Store {
        source: Source,
        target: Option<Reference>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Clause {
    pub condition: Expr,
    pub then: Expr,
}

/// What a store expression evaluates before the optional `@ref`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Source {
    Math(Math),
    /// `?`: one line from the console
    Prompt,
    /// `?|&ref`: one line from an open file
    FileRead(Reference),
    /// `^path`
    OpenRead(Math),
    /// `vpath`
    OpenWrite(Math),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Math {
    Value(Value),
    Unary { op: UnaryOp, operand: Value },
    Binary { op: BinOp, lhs: Box<Math>, rhs: Box<Math> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    /// `~`
    Negate,
    /// `+`: collapse a pool to its sum
    Fold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinOp {
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// A base value followed by its dice modifiers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Value {
    pub base: Base,
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Base {
    Atom(Atom),
    /// `count d sides`
    Dice { count: Atom, sides: Atom },
    /// `&ref`
    Load(Reference),
    /// `[expr expr ...]`
    List(Vec<Expr>),
}

/// A number literal or a parenthesised expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Atom {
    Number(f64),
    Group(Box<Expr>),
}

/// A heap/file address written as a dice roll; both coordinates are evaluated, never rolled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reference {
    pub count: Atom,
    pub sides: Atom,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Modifiers {
    pub sort: Option<SortOrder>,
    pub select: Option<Selection>,
    pub repeat: Option<Repeat>,
    pub crit: Option<Comparison>,
}

impl Modifiers {
    pub fn is_empty(&self) -> bool {
        self.sort.is_none() && self.select.is_none() && self.repeat.is_none() && self.crit.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub mode: SelectMode,
    pub count: Atom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SelectMode {
    KeepHigh,
    KeepLow,
    KeepFront,
    KeepRear,
    DiscardHigh,
    DiscardLow,
    DiscardFront,
    DiscardRear,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub op: CompareOp,
    pub threshold: Atom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompareOp {
    Greater,
    Less,
    Equal,
}

/// `r cond` rerolls until nothing matches; `ro cond` rerolls matches once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Repeat {
    pub once: bool,
    pub when: Comparison,
}

impl Expr {
    /// The dice value this expression is a bare wrapper around, if any.
    ///
    /// `(2d10)kh1` needs the two dice of the inner roll rather than their sum,
    /// so a group whose content is nothing but a pool passes the pool through.
    pub fn as_pool(&self) -> Option<&Value> {
        match self {
            Expr::Store { source: Source::Math(Math::Value(v)), target: None } if v.is_pool() => Some(v),
            _ => None,
        }
    }

    /// Splits `(XdY)` back into its coordinates so it can be used as a reference.
    pub fn into_reference(self) -> Result<Reference, Expr> {
        match self {
            Expr::Store {
                source: Source::Math(Math::Value(Value { base: Base::Dice { count, sides }, modifiers })),
                target: None,
            } if modifiers.is_empty() => Ok(Reference { count, sides }),
            other => Err(other),
        }
    }
}

impl Value {
    /// True when the base produces a dice pool that is summed unless counted.
    pub fn is_pool(&self) -> bool {
        match &self.base {
            Base::Dice { .. } => true,
            Base::Atom(Atom::Group(inner)) => inner.as_pool().is_some(),
            _ => false,
        }
    }
}
