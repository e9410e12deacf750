use common::{DbError, DbResult};

use crate::token::{keyword, Tok, Token};

/// Hand-written SQL lexer with line/column tracking. Supports `--` line
/// comments, `/* */` block comments, single-quoted strings with doubled
/// quotes as the escape, integer and decimal number literals.
pub struct Lexer {
    chars: Vec<char>,
    position: usize,
    line: u32,
    column: u32,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    /// Lex the entire input. The final token is always `Eof`.
    pub fn tokenize(mut self) -> DbResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.tok == Tok::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> DbResult<Token> {
        self.skip_whitespace_and_comments()?;

        let (line, column) = (self.line, self.column);
        let Some(c) = self.current() else {
            return Ok(Token::eof(line, column));
        };

        if c.is_ascii_digit() {
            return self.scan_number(line, column);
        }
        if c == '\'' {
            return self.scan_string(line, column);
        }
        if c.is_alphabetic() || c == '_' {
            return self.scan_identifier(line, column);
        }

        self.advance();
        let simple = |tok| {
            Ok(Token {
                tok,
                lexeme: c.to_string(),
                line,
                column,
            })
        };
        match c {
            '+' => simple(Tok::Plus),
            '-' => simple(Tok::Minus),
            '*' => simple(Tok::Star),
            '/' => simple(Tok::Slash),
            '%' => simple(Tok::Percent),
            '(' => simple(Tok::LParen),
            ')' => simple(Tok::RParen),
            ',' => simple(Tok::Comma),
            ';' => simple(Tok::Semicolon),
            '.' => simple(Tok::Dot),
            '=' => simple(Tok::Eq),
            '!' => {
                if self.eat('=') {
                    Ok(Token {
                        tok: Tok::Ne,
                        lexeme: "!=".into(),
                        line,
                        column,
                    })
                } else {
                    Err(self.error(line, column, "unexpected character '!'"))
                }
            }
            '<' => {
                if self.eat('=') {
                    Ok(Token {
                        tok: Tok::Le,
                        lexeme: "<=".into(),
                        line,
                        column,
                    })
                } else if self.eat('>') {
                    Ok(Token {
                        tok: Tok::Ne,
                        lexeme: "<>".into(),
                        line,
                        column,
                    })
                } else {
                    simple(Tok::Lt)
                }
            }
            '>' => {
                if self.eat('=') {
                    Ok(Token {
                        tok: Tok::Ge,
                        lexeme: ">=".into(),
                        line,
                        column,
                    })
                } else {
                    simple(Tok::Gt)
                }
            }
            other => Err(self.error(line, column, &format!("unexpected character '{other}'"))),
        }
    }

    fn scan_number(&mut self, line: u32, column: u32) -> DbResult<Token> {
        let mut lexeme = String::new();
        while let Some(c) = self.current() {
            if c.is_ascii_digit() {
                lexeme.push(c);
                self.advance();
            } else {
                break;
            }
        }

        // A dot starts the fraction only when a digit follows; `1.id` is a
        // number then a dot.
        let mut is_float = false;
        if self.current() == Some('.')
            && self
                .peek()
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false)
        {
            is_float = true;
            lexeme.push('.');
            self.advance();
            while let Some(c) = self.current() {
                if c.is_ascii_digit() {
                    lexeme.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }

        Ok(Token {
            tok: if is_float { Tok::Float } else { Tok::Integer },
            lexeme,
            line,
            column,
        })
    }

    fn scan_string(&mut self, line: u32, column: u32) -> DbResult<Token> {
        self.advance(); // opening quote
        let mut lexeme = String::new();
        loop {
            match self.current() {
                None => return Err(self.error(line, column, "unterminated string literal")),
                Some('\'') => {
                    self.advance();
                    // Doubled quote is an escaped quote.
                    if self.current() == Some('\'') {
                        lexeme.push('\'');
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some(c) => {
                    lexeme.push(c);
                    self.advance();
                }
            }
        }
        Ok(Token {
            tok: Tok::StringLit,
            lexeme,
            line,
            column,
        })
    }

    fn scan_identifier(&mut self, line: u32, column: u32) -> DbResult<Token> {
        let mut lexeme = String::new();
        while let Some(c) = self.current() {
            if c.is_alphanumeric() || c == '_' {
                lexeme.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let tok = match keyword(&lexeme) {
            Some(kw) => Tok::Kw(kw),
            None => Tok::Ident,
        };
        Ok(Token {
            tok,
            lexeme,
            line,
            column,
        })
    }

    fn skip_whitespace_and_comments(&mut self) -> DbResult<()> {
        loop {
            match self.current() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('-') if self.peek() == Some('-') => {
                    while let Some(c) = self.current() {
                        self.advance();
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('/') if self.peek() == Some('*') => {
                    let (line, column) = (self.line, self.column);
                    self.advance();
                    self.advance();
                    loop {
                        match self.current() {
                            None => {
                                return Err(self.error(line, column, "unterminated comment"))
                            }
                            Some('*') if self.peek() == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => self.advance(),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        if let Some(c) = self.current() {
            self.position += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.current() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, line: u32, column: u32, message: &str) -> DbError {
        DbError::Syntax(format!("{message} at line {line}, column {column}"))
    }
}
