//! Schema tokenizer
//!
//! Turns schema text into typed tokens before any structural parsing happens.
//! Identifiers are lexed greedily over `[A-Za-z0-9_-]`, so a type named
//! `owns-metadata` is one identifier and never the `owns` keyword.

use crate::error::{GovResult, GovernanceError};

/// Reserved words of the type-definition language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Define,
    Undefine,
    Redefine,
    Entity,
    Relation,
    Attribute,
    Sub,
    Owns,
    Plays,
    Relates,
    Value,
    As,
}

impl Keyword {
    fn lookup(word: &str) -> Option<Self> {
        let kw = match word {
            "define" => Keyword::Define,
            "undefine" => Keyword::Undefine,
            "redefine" => Keyword::Redefine,
            "entity" => Keyword::Entity,
            "relation" => Keyword::Relation,
            "attribute" => Keyword::Attribute,
            "sub" => Keyword::Sub,
            "owns" => Keyword::Owns,
            "plays" => Keyword::Plays,
            "relates" => Keyword::Relates,
            "value" => Keyword::Value,
            "as" => Keyword::As,
            _ => return None,
        };
        Some(kw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::Define => "define",
            Keyword::Undefine => "undefine",
            Keyword::Redefine => "redefine",
            Keyword::Entity => "entity",
            Keyword::Relation => "relation",
            Keyword::Attribute => "attribute",
            Keyword::Sub => "sub",
            Keyword::Owns => "owns",
            Keyword::Plays => "plays",
            Keyword::Relates => "relates",
            Keyword::Value => "value",
            Keyword::As => "as",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Keyword(Keyword),
    Ident(String),
    /// `@abstract`, `@key`, `@card` ... (name without the `@`)
    Annotation(String),
    Str(String),
    Number(String),
    Symbol(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

impl Token {
    pub fn is_keyword(&self, kw: Keyword) -> bool {
        self.kind == TokenKind::Keyword(kw)
    }

    pub fn is_symbol(&self, ch: char) -> bool {
        self.kind == TokenKind::Symbol(ch)
    }

    /// Source-like rendering used in error messages
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Keyword(kw) => kw.as_str().to_string(),
            TokenKind::Ident(s) => s.clone(),
            TokenKind::Annotation(s) => format!("@{}", s),
            TokenKind::Str(s) => format!("\"{}\"", s),
            TokenKind::Number(s) => s.clone(),
            TokenKind::Symbol(c) => c.to_string(),
        }
    }
}

/// Word characters of the schema language
pub fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

/// Streaming lexer; `next_token` lets callers stop after the first token
pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut value = String::new();
        while let Some(c) = self.chars.peek().copied() {
            if !pred(c) {
                break;
            }
            value.push(c);
            self.bump();
        }
        value
    }

    pub fn next_token(&mut self) -> Option<GovResult<Token>> {
        loop {
            let ch = self.chars.peek().copied()?;

            if ch.is_whitespace() {
                self.bump();
                continue;
            }

            if ch == '#' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
                continue;
            }

            let line = self.line;

            if ch == '"' || ch == '\'' {
                return Some(self.lex_string(ch, line));
            }

            if ch.is_ascii_digit() {
                let value = self.take_while(|c| c.is_ascii_digit() || c == '.');
                return Some(Ok(Token {
                    kind: TokenKind::Number(value),
                    line,
                }));
            }

            if is_ident_start(ch) {
                let word = self.take_while(is_ident_char);
                let kind = match Keyword::lookup(&word) {
                    Some(kw) => TokenKind::Keyword(kw),
                    None => TokenKind::Ident(word),
                };
                return Some(Ok(Token { kind, line }));
            }

            if ch == '@' {
                self.bump();
                let name = self.take_while(is_ident_char);
                if name.is_empty() {
                    return Some(Err(GovernanceError::parse(
                        line,
                        "annotation marker '@' without a name",
                    )));
                }
                return Some(Ok(Token {
                    kind: TokenKind::Annotation(name),
                    line,
                }));
            }

            self.bump();
            return Some(Ok(Token {
                kind: TokenKind::Symbol(ch),
                line,
            }));
        }
    }

    fn lex_string(&mut self, quote: char, line: usize) -> GovResult<Token> {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => break,
                Some('\\') => match self.bump() {
                    Some(escaped) => value.push(escaped),
                    None => break,
                },
                Some(c) => value.push(c),
                None => {
                    return Err(GovernanceError::parse(line, "unterminated string literal"));
                }
            }
        }
        Ok(Token {
            kind: TokenKind::Str(value),
            line,
        })
    }
}

/// Tokenize the full input, comments stripped
pub fn tokenize(input: &str) -> GovResult<Vec<Token>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token() {
        tokens.push(token?);
    }
    Ok(tokens)
}

/// First significant (non-comment, non-whitespace) token of a body
pub fn first_token(input: &str) -> Option<GovResult<Token>> {
    Lexer::new(input).next_token()
}

/// Whole-word, case-insensitive search over raw text, comments included
pub fn contains_word(text: &str, word: &str) -> Option<usize> {
    for (idx, line) in text.lines().enumerate() {
        let found = line
            .split(|c: char| !is_ident_char(c))
            .any(|w| w.eq_ignore_ascii_case(word));
        if found {
            return Some(idx + 1);
        }
    }
    None
}
