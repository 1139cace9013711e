//! Tokenizer for ASN.1 module text (X.680 clause 12, the subset CDR schemas
//! actually use).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Identifier(String),
    Number(i128),
    CString(String),
    BString(String),
    HString(String),
    Assignment,
    Ellipsis,
    Range,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    LeftParen,
    RightParen,
    Comma,
    Semicolon,
    Colon,
    Dot,
    Pipe,
    Exclamation,
    At,
    Less,
    Caret,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LexError {
    #[error("line {0}: unterminated block comment")]
    UnterminatedComment(usize),
    #[error("line {0}: unterminated string literal")]
    UnterminatedString(usize),
    #[error("line {line}: unexpected character {ch:?}")]
    UnexpectedCharacter { ch: char, line: usize },
    #[error("line {0}: number literal out of range")]
    NumberOutOfRange(usize),
}

pub fn tokenize(text: &str) -> Result<Vec<Spanned>, LexError> {
    Lexer::new(text).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    tokens: Vec<Spanned>,
}

impl Lexer {
    fn new(text: &str) -> Self {
        Lexer {
            chars: text.chars().collect(),
            pos: 0,
            line: 1,
            tokens: Vec::new(),
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn push(&mut self, token: Token, line: usize) {
        self.tokens.push(Spanned { token, line });
    }

    fn run(mut self) -> Result<Vec<Spanned>, LexError> {
        while let Some(c) = self.peek(0) {
            let line = self.line;
            match c {
                c if c.is_whitespace() => {
                    self.bump();
                }
                '-' if self.peek(1) == Some('-') => self.line_comment(),
                '/' if self.peek(1) == Some('*') => self.block_comment()?,
                '-' if self.peek(1).is_some_and(|d| d.is_ascii_digit()) => {
                    self.bump();
                    let value = self.number()?;
                    self.push(Token::Number(-value), line);
                }
                c if c.is_ascii_digit() => {
                    let value = self.number()?;
                    self.push(Token::Number(value), line);
                }
                c if c.is_alphabetic() => {
                    let ident = self.identifier();
                    self.push(Token::Identifier(ident), line);
                }
                '"' => {
                    let s = self.cstring()?;
                    self.push(Token::CString(s), line);
                }
                '\'' => {
                    let token = self.bhstring()?;
                    self.push(token, line);
                }
                ':' if self.peek(1) == Some(':') && self.peek(2) == Some('=') => {
                    self.pos += 3;
                    self.push(Token::Assignment, line);
                }
                '.' if self.peek(1) == Some('.') && self.peek(2) == Some('.') => {
                    self.pos += 3;
                    self.push(Token::Ellipsis, line);
                }
                '.' if self.peek(1) == Some('.') => {
                    self.pos += 2;
                    self.push(Token::Range, line);
                }
                _ => {
                    let token = match c {
                        '{' => Token::LeftBrace,
                        '}' => Token::RightBrace,
                        '[' => Token::LeftBracket,
                        ']' => Token::RightBracket,
                        '(' => Token::LeftParen,
                        ')' => Token::RightParen,
                        ',' => Token::Comma,
                        ';' => Token::Semicolon,
                        ':' => Token::Colon,
                        '.' => Token::Dot,
                        '|' => Token::Pipe,
                        '!' => Token::Exclamation,
                        '@' => Token::At,
                        '<' => Token::Less,
                        '^' => Token::Caret,
                        ch => return Err(LexError::UnexpectedCharacter { ch, line }),
                    };
                    self.bump();
                    self.push(token, line);
                }
            }
        }
        Ok(self.tokens)
    }

    // "--" runs until the end of the line or the next "--"
    fn line_comment(&mut self) {
        self.pos += 2;
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                return;
            }
            if c == '-' && self.peek(1) == Some('-') {
                self.pos += 2;
                return;
            }
            self.bump();
        }
    }

    // block comments nest
    fn block_comment(&mut self) -> Result<(), LexError> {
        let start = self.line;
        self.pos += 2;
        let mut depth = 1;
        while depth > 0 {
            match (self.peek(0), self.peek(1)) {
                (Some('/'), Some('*')) => {
                    self.pos += 2;
                    depth += 1;
                }
                (Some('*'), Some('/')) => {
                    self.pos += 2;
                    depth -= 1;
                }
                (Some(_), _) => {
                    self.bump();
                }
                (None, _) => return Err(LexError::UnterminatedComment(start)),
            }
        }
        Ok(())
    }

    fn number(&mut self) -> Result<i128, LexError> {
        let mut value: i128 = 0;
        while let Some(d) = self.peek(0).and_then(|c| c.to_digit(10)) {
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(i128::from(d)))
                .ok_or(LexError::NumberOutOfRange(self.line))?;
            self.bump();
        }
        Ok(value)
    }

    // a hyphen belongs to the identifier only when followed by an
    // alphanumeric, so "name--comment" still starts a comment
    fn identifier(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.peek(0) {
            let continues = c.is_alphanumeric()
                || c == '_'
                || (c == '-' && self.peek(1).is_some_and(|n| n.is_alphanumeric()));
            if !continues {
                break;
            }
            ident.push(c);
            self.bump();
        }
        ident
    }

    fn cstring(&mut self) -> Result<String, LexError> {
        let start = self.line;
        self.bump();
        let mut s = String::new();
        loop {
            match self.bump() {
                Some('"') if self.peek(0) == Some('"') => {
                    self.bump();
                    s.push('"');
                }
                Some('"') => return Ok(s),
                Some(c) => s.push(c),
                None => return Err(LexError::UnterminatedString(start)),
            }
        }
    }

    fn bhstring(&mut self) -> Result<Token, LexError> {
        let start = self.line;
        self.bump();
        let mut s = String::new();
        loop {
            match self.bump() {
                Some('\'') => break,
                Some(c) if c.is_whitespace() => {}
                Some(c) => s.push(c),
                None => return Err(LexError::UnterminatedString(start)),
            }
        }
        match self.bump() {
            Some('B') => Ok(Token::BString(s)),
            Some('H') => Ok(Token::HString(s)),
            _ => Err(LexError::UnterminatedString(start)),
        }
    }
}
