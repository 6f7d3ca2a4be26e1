use logos::Logos;

use crate::ast::{SourceMap, Span};

#[derive(Logos, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
pub enum TokenKind {
    // File and console markers. `?|`, `!|` and `||` share a prefix with
    // `?`, `!` and `|`; logos always takes the longest match.
    #[token("^")]
    OpenRead,
    #[token("v")]
    OpenWrite,
    #[token("?|")]
    FileRead,
    #[token("!|")]
    FileWrite,
    #[token("|")]
    Pipe,
    #[token("?")]
    Prompt,
    #[token("!")]
    Print,

    #[token("&&")]
    And,
    #[token("||")]
    Or,
    #[token("@")]
    Store,
    #[token("&")]
    Load,
    #[token("~")]
    Negate,

    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,

    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,

    #[token(">")]
    Greater,
    #[token("<")]
    Less,
    #[token("=")]
    Equals,

    // Modifiers
    #[token("ro")]
    RepeatOnce,
    #[token("r")]
    Repeat,
    #[token("kh")]
    KeepHigh,
    #[token("kl")]
    KeepLow,
    #[token("kf")]
    KeepFront,
    #[token("kr")]
    KeepRear,
    #[token("dh")]
    DiscardHigh,
    #[token("dl")]
    DiscardLow,
    #[token("df")]
    DiscardFront,
    #[token("dr")]
    DiscardRear,
    #[token("sd")]
    SortDescending,
    #[token("s")]
    Sort,

    #[token("d")]
    Roll,

    #[regex(r"[0-9]+")]
    Number,

    /// A run of characters that starts no valid token. Never produced by logos
    /// itself; [`tokenize`] builds it from adjacent lexer errors.
    Unknown,
}

impl TokenKind {
    /// Human-readable name used in parse errors.
    pub fn describe(self) -> &'static str {
        use TokenKind::*;
        match self {
            OpenRead => "file open for reading '^'",
            OpenWrite => "file open for writing 'v'",
            FileRead => "file read '?|'",
            FileWrite => "file write '!|'",
            Pipe => "'|'",
            Prompt => "prompt '?'",
            Print => "print '!'",
            And => "'&&'",
            Or => "'||'",
            Store => "store reference '@'",
            Load => "load reference '&'",
            Negate => "'~'",
            LBrace => "'{'",
            RBrace => "'}'",
            LBracket => "'['",
            RBracket => "']'",
            LParen => "'('",
            RParen => "')'",
            Comma => "','",
            Star => "'*'",
            Slash => "'/'",
            Percent => "'%'",
            Plus => "'+'",
            Minus => "'-'",
            Greater => "'>'",
            Less => "'<'",
            Equals => "'='",
            RepeatOnce => "modifier 'ro'",
            Repeat => "modifier 'r'",
            KeepHigh => "modifier 'kh'",
            KeepLow => "modifier 'kl'",
            KeepFront => "modifier 'kf'",
            KeepRear => "modifier 'kr'",
            DiscardHigh => "modifier 'dh'",
            DiscardLow => "modifier 'dl'",
            DiscardFront => "modifier 'df'",
            DiscardRear => "modifier 'dr'",
            SortDescending => "modifier 'sd'",
            Sort => "modifier 's'",
            Roll => "dice marker 'd'",
            Number => "number",
            Unknown => "unrecognised input",
        }
    }
}

/// One lexeme with its source text and 1-based position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub column: usize,
    pub span: Span,
}

/// Lex source text into tokens. Whitespace and `//` comments produce nothing.
///
/// Input that matches no token is not dropped: each maximal run of it becomes a
/// single [`TokenKind::Unknown`] token, which the parser then reports with its
/// exact position.
pub fn tokenize(source: &str) -> Vec<Token> {
    let map = SourceMap::new(source);
    let mut lexer = TokenKind::lexer(source);
    let mut tokens: Vec<Token> = Vec::new();

    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let kind = result.unwrap_or(TokenKind::Unknown);

        if kind == TokenKind::Unknown {
            if let Some(last) = tokens.last_mut() {
                if last.kind == TokenKind::Unknown && last.span.end == range.start {
                    last.span.end = range.end;
                    last.text = source[last.span.start..last.span.end].to_string();
                    continue;
                }
            }
        }

        let (line, column) = map.lookup(source, range.start);
        tokens.push(Token {
            kind,
            text: source[range.clone()].to_string(),
            line,
            column,
            span: Span { start: range.start, end: range.end },
        });
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lex_simple_roll() {
        use TokenKind::*;
        assert_eq!(kinds("4d6kh3"), vec![Number, Roll, Number, KeepHigh, Number]);
    }

    #[test]
    fn longest_match_wins_over_prefix() {
        use TokenKind::*;
        assert_eq!(kinds("?|&1d1"), vec![FileRead, Load, Number, Roll, Number]);
        assert_eq!(kinds("? |"), vec![Prompt, Pipe]);
        assert_eq!(kinds("!|"), vec![FileWrite]);
        assert_eq!(kinds("&&&"), vec![And, Load]);
        assert_eq!(kinds("||"), vec![Or]);
        assert_eq!(kinds("ro r sd s"), vec![RepeatOnce, Repeat, SortDescending, Sort]);
        assert_eq!(kinds("dh dl df dr d"), vec![DiscardHigh, DiscardLow, DiscardFront, DiscardRear, Roll]);
    }

    #[test]
    fn comment_ignored() {
        let tokens = tokenize("// roll for initiative\n1d20 // trailing\n");
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].line, 2);
        assert_eq!(tokens[0].column, 1);
    }

    #[test]
    fn comment_is_not_division() {
        use TokenKind::*;
        assert_eq!(kinds("6 / 2 //x"), vec![Number, Slash, Number]);
    }

    #[test]
    fn positions_track_lines_and_columns() {
        let tokens = tokenize("1d6\n  !2");
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[2].line, tokens[2].column), (1, 3));
        assert_eq!((tokens[3].line, tokens[3].column), (2, 3));
        assert_eq!((tokens[4].line, tokens[4].column), (2, 4));
    }

    #[test]
    fn unknown_run_is_one_token() {
        let tokens = tokenize("1 + xyz 2");
        assert_eq!(tokens[2].kind, TokenKind::Unknown);
        assert_eq!(tokens[2].text, "xyz");
        assert_eq!(tokens[2].column, 5);
        assert_eq!(tokens[3].kind, TokenKind::Number);
    }

    #[test]
    fn unknown_stops_at_valid_token() {
        let tokens = tokenize("#$!3");
        assert_eq!(tokens[0].kind, TokenKind::Unknown);
        assert_eq!(tokens[0].text, "#$");
        assert_eq!(tokens[1].kind, TokenKind::Print);
    }

    #[test]
    fn texts_reconstruct_source_without_whitespace() {
        let source = "{ (2d10)kh(1) > 5 , !|&1d2 3 | 0 } // comment\n [1 2]@3d4";
        let joined: String = tokenize(source).iter().map(|t| t.text.as_str()).collect();
        let expected: String = source
            .lines()
            .map(|l| l.split("//").next().unwrap_or(""))
            .collect::<String>()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        assert_eq!(joined, expected);
    }

    #[test]
    fn retokenizing_is_stable() {
        let source = "4d6dl1 + ~2 // x";
        assert_eq!(tokenize(source), tokenize(source));
    }
}
