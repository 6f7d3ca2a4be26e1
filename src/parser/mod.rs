use crate::ast::*;
use crate::lexer::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Error line {line} column {column}: {message}{}", got_suffix(.found))]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
    /// Text of the offending token; `None` at end of input.
    pub found: Option<String>,
    pub span: Span,
}

fn got_suffix(found: &Option<String>) -> String {
    match found {
        Some(text) => format!(", got \"{}\" instead", text),
        None => String::new(),
    }
}

type Result<T> = std::result::Result<T, ParseError>;

/// Parse a token stream into a program. Stops at the first error.
pub fn parse(tokens: Vec<Token>) -> Result<Program> {
    Parser::new(tokens).parse_program()
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    // ---- Cursor ----

    fn peek(&self) -> Result<&Token> {
        self.tokens.get(self.pos).ok_or_else(|| self.eof_error())
    }

    /// Non-throwing peek for places where running out of tokens is legal.
    fn peek_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos).map(|t| t.kind)
    }

    fn advance(&mut self) -> Result<Token> {
        let tok = self.tokens.get(self.pos).cloned().ok_or_else(|| self.eof_error())?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        let tok = self.advance()?;
        if tok.kind == kind {
            Ok(tok)
        } else {
            Err(error_at(&tok, format!("expected {}", kind.describe())))
        }
    }

    fn eof_error(&self) -> ParseError {
        match self.tokens.last() {
            Some(last) => ParseError {
                line: last.line,
                column: last.column,
                message: "unexpected end of input".into(),
                found: None,
                span: last.span,
            },
            None => ParseError {
                line: 1,
                column: 1,
                message: "unexpected end of input".into(),
                found: None,
                span: Span::UNKNOWN,
            },
        }
    }

    // ---- Expression lists ----

    pub fn parse_program(&mut self) -> Result<Program> {
        let mut body = Vec::new();
        while self.peek_kind().is_some() {
            body.push(self.parse_expr()?);
        }
        Ok(Program { body })
    }

    /// Expressions up to (not including) `terminator`.
    fn parse_expr_list(&mut self, terminator: TokenKind) -> Result<Vec<Expr>> {
        let mut exprs = Vec::new();
        while self.peek()?.kind != terminator {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        match self.peek()?.kind {
            TokenKind::Print | TokenKind::FileWrite => self.parse_print(),
            TokenKind::Pipe => self.parse_close(),
            TokenKind::LBrace => self.parse_if(),
            _ => self.parse_store(),
        }
    }

    /// `!expr` | `!|&ref expr`
    fn parse_print(&mut self) -> Result<Expr> {
        let tok = self.advance()?;
        let target = match tok.kind {
            TokenKind::FileWrite => Some(self.parse_reference(TokenKind::Load)?),
            _ => None,
        };
        let value = self.parse_expr()?;
        Ok(Expr::Print { target, value: Box::new(value) })
    }

    /// `|&ref`
    fn parse_close(&mut self) -> Result<Expr> {
        self.expect(TokenKind::Pipe)?;
        let handle = self.parse_reference(TokenKind::Load)?;
        Ok(Expr::Close { handle })
    }

    /// `{cond, then | cond, then | else}`; a clause without `,` must be the last one.
    fn parse_if(&mut self) -> Result<Expr> {
        self.expect(TokenKind::LBrace)?;
        let mut clauses = Vec::new();
        let mut otherwise = None;

        loop {
            let condition = self.parse_expr()?;
            let tok = self.advance()?;
            match tok.kind {
                TokenKind::Comma => {
                    let then = self.parse_expr()?;
                    clauses.push(Clause { condition, then });
                }
                TokenKind::RBrace => {
                    otherwise = Some(Box::new(condition));
                    break;
                }
                _ => return Err(error_at(&tok, "unexpected symbol in conditional block".into())),
            }

            let sep = self.advance()?;
            match sep.kind {
                TokenKind::Pipe => continue,
                TokenKind::RBrace => break,
                _ => return Err(error_at(&sep, "expected '|' or '}' in conditional block".into())),
            }
        }

        Ok(Expr::If { clauses, otherwise })
    }

    /// Optional prefix, a value, then an optional `@ref`.
    fn parse_store(&mut self) -> Result<Expr> {
        let prefix = self.peek()?.clone();
        let source = match prefix.kind {
            TokenKind::Prompt => {
                self.advance()?;
                Source::Prompt
            }
            TokenKind::FileRead => {
                self.advance()?;
                Source::FileRead(self.parse_reference(TokenKind::Load)?)
            }
            TokenKind::OpenRead => {
                self.advance()?;
                Source::OpenRead(self.parse_math()?)
            }
            TokenKind::OpenWrite => {
                self.advance()?;
                Source::OpenWrite(self.parse_math()?)
            }
            _ => Source::Math(self.parse_math()?),
        };

        let target = match self.peek_kind() {
            Some(TokenKind::Store) => Some(self.parse_reference(TokenKind::Store)?),
            _ => None,
        };

        if matches!(source, Source::OpenRead(_) | Source::OpenWrite(_)) && target.is_none() {
            return Err(error_at(&prefix, "a file open needs a '@' reference to name its handle".into()));
        }

        Ok(Expr::Store { source, target })
    }

    // ---- Arithmetic (left associative) ----

    fn parse_math(&mut self) -> Result<Math> {
        let mut lhs = self.parse_additive()?;
        while let Some(op) = self.peek_kind().and_then(logic_op) {
            self.advance()?;
            let rhs = self.parse_additive()?;
            lhs = Math::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Math> {
        let mut lhs = self.parse_multiplicative()?;
        while let Some(op) = self.peek_kind().and_then(additive_op) {
            self.advance()?;
            let rhs = self.parse_multiplicative()?;
            lhs = Math::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Math> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.peek_kind().and_then(multiplicative_op) {
            self.advance()?;
            let rhs = self.parse_unary()?;
            lhs = Math::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Math> {
        let op = match self.peek()?.kind {
            TokenKind::Negate => Some(UnaryOp::Negate),
            TokenKind::Plus => Some(UnaryOp::Fold),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance()?;
                let operand = self.parse_value()?;
                Ok(Math::Unary { op, operand })
            }
            None => Ok(Math::Value(self.parse_value()?)),
        }
    }

    // ---- Values ----

    fn parse_value(&mut self) -> Result<Value> {
        let base = match self.peek()?.kind {
            TokenKind::Load => Base::Load(self.parse_reference(TokenKind::Load)?),
            TokenKind::LBracket => {
                self.advance()?;
                let items = self.parse_expr_list(TokenKind::RBracket)?;
                self.expect(TokenKind::RBracket)?;
                Base::List(items)
            }
            _ => {
                let count = self.parse_atom()?;
                if self.peek_kind() == Some(TokenKind::Roll) {
                    self.advance()?;
                    let sides = self.parse_atom()?;
                    Base::Dice { count, sides }
                } else {
                    Base::Atom(count)
                }
            }
        };
        let modifiers = self.parse_modifiers(&base)?;
        Ok(Value { base, modifiers })
    }

    /// Number literal or `( expr )`.
    fn parse_atom(&mut self) -> Result<Atom> {
        let tok = self.advance()?;
        match tok.kind {
            TokenKind::Number => tok
                .text
                .parse::<f64>()
                .map(Atom::Number)
                .map_err(|_| error_at(&tok, "malformed number".into())),
            TokenKind::LParen => {
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(Atom::Group(Box::new(inner)))
            }
            TokenKind::Unknown => Err(error_at(&tok, "unrecognised input".into())),
            _ => Err(error_at(&tok, "expected a number or '('".into())),
        }
    }

    fn parse_modifiers(&mut self, base: &Base) -> Result<Modifiers> {
        let mut mods = Modifiers::default();

        while let Some(kind) = self.peek_kind() {
            let tok = self.peek()?.clone();
            match kind {
                TokenKind::Sort | TokenKind::SortDescending => {
                    if mods.sort.is_some() {
                        return Err(error_at(&tok, "only one sort modifier is allowed per value".into()));
                    }
                    self.advance()?;
                    mods.sort = Some(if kind == TokenKind::Sort {
                        SortOrder::Ascending
                    } else {
                        SortOrder::Descending
                    });
                }
                TokenKind::RepeatOnce | TokenKind::Repeat => {
                    if mods.repeat.is_some() {
                        return Err(error_at(&tok, "only one repeat modifier is allowed per value".into()));
                    }
                    if !matches!(base, Base::Dice { .. }) {
                        return Err(error_at(&tok, "a repeat modifier needs a dice roll to reroll".into()));
                    }
                    self.advance()?;
                    let when = self.parse_condition()?;
                    mods.repeat = Some(Repeat { once: kind == TokenKind::RepeatOnce, when });
                }
                TokenKind::Greater | TokenKind::Less | TokenKind::Equals => {
                    if mods.crit.is_some() {
                        return Err(error_at(&tok, "only one crit check is allowed per value".into()));
                    }
                    mods.crit = Some(self.parse_condition()?);
                }
                _ => match select_mode(kind) {
                    Some(mode) => {
                        if mods.select.is_some() {
                            return Err(error_at(&tok, "only one keep/discard modifier is allowed per value".into()));
                        }
                        self.advance()?;
                        let count = self.parse_atom()?;
                        mods.select = Some(Selection { mode, count });
                    }
                    None => break,
                },
            }
        }

        Ok(mods)
    }

    /// `>n`, `<n`, `=n`, or a bare `n` meaning `=n`.
    fn parse_condition(&mut self) -> Result<Comparison> {
        let op = match self.peek()?.kind {
            TokenKind::Greater => Some(CompareOp::Greater),
            TokenKind::Less => Some(CompareOp::Less),
            TokenKind::Equals => Some(CompareOp::Equal),
            _ => None,
        };
        if op.is_some() {
            self.advance()?;
        }
        let threshold = self.parse_atom()?;
        Ok(Comparison { op: op.unwrap_or(CompareOp::Equal), threshold })
    }

    /// `&XdY` / `@XdY`; `&(XdY)` is accepted too.
    fn parse_reference(&mut self, marker: TokenKind) -> Result<Reference> {
        let marker_tok = self.expect(marker)?;
        let count = self.parse_atom()?;
        if self.peek_kind() == Some(TokenKind::Roll) {
            self.advance()?;
            let sides = self.parse_atom()?;
            return Ok(Reference { count, sides });
        }
        match count {
            Atom::Group(inner) => (*inner).into_reference().map_err(|_| {
                error_at(&marker_tok, "expected a dice-style reference such as 1d2".into())
            }),
            Atom::Number(_) => match self.peek() {
                Ok(tok) => Err(error_at(tok, "expected dice marker 'd' in reference".into())),
                Err(eof) => Err(eof),
            },
        }
    }
}

fn error_at(tok: &Token, message: String) -> ParseError {
    ParseError {
        line: tok.line,
        column: tok.column,
        message,
        found: Some(tok.text.clone()),
        span: tok.span,
    }
}

fn logic_op(kind: TokenKind) -> Option<BinOp> {
    match kind {
        TokenKind::And => Some(BinOp::And),
        TokenKind::Or => Some(BinOp::Or),
        _ => None,
    }
}

fn additive_op(kind: TokenKind) -> Option<BinOp> {
    match kind {
        TokenKind::Plus => Some(BinOp::Add),
        TokenKind::Minus => Some(BinOp::Sub),
        _ => None,
    }
}

fn multiplicative_op(kind: TokenKind) -> Option<BinOp> {
    match kind {
        TokenKind::Star => Some(BinOp::Mul),
        TokenKind::Slash => Some(BinOp::Div),
        TokenKind::Percent => Some(BinOp::Mod),
        _ => None,
    }
}

fn select_mode(kind: TokenKind) -> Option<SelectMode> {
    match kind {
        TokenKind::KeepHigh => Some(SelectMode::KeepHigh),
        TokenKind::KeepLow => Some(SelectMode::KeepLow),
        TokenKind::KeepFront => Some(SelectMode::KeepFront),
        TokenKind::KeepRear => Some(SelectMode::KeepRear),
        TokenKind::DiscardHigh => Some(SelectMode::DiscardHigh),
        TokenKind::DiscardLow => Some(SelectMode::DiscardLow),
        TokenKind::DiscardFront => Some(SelectMode::DiscardFront),
        TokenKind::DiscardRear => Some(SelectMode::DiscardRear),
        _ => None,
    }
}
