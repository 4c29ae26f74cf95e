//! 算术表达式的词法分析器

use crate::token::{Span, Token, TokenKind};

/// 按需产出 token 的迭代器
pub struct Lexer<'a> {
    input: &'a str,
    /// 输入字符串中的当前位置（字节索引）
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer { input, position: 0 }
    }

    /// 返回当前位置的字符，不推进位置
    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    /// 推进位置一个字符并返回该字符
    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    /// 跳过空白字符
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn bump_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if pred(c) {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// 读取数字字面量 `[0-9]+(\.[0-9]*)?`
    ///
    /// 数字后面紧跟的字符（第二个小数点、字母）会让整段变成非法 token，
    /// 因此 `1.1.1.1` 不会被拆成看似合法的几段。
    fn read_number(&mut self, start: usize) -> Token<'a> {
        self.bump_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') {
            self.bump();
            self.bump_while(|c| c.is_ascii_digit());
        }

        if matches!(self.peek(), Some(c) if is_identifier_char(c)) {
            self.bump_while(is_identifier_char);
            return Token {
                kind: TokenKind::Illegal(&self.input[start..self.position]),
                span: Span::new(start, self.position),
            };
        }

        Token {
            kind: TokenKind::Number(&self.input[start..self.position]),
            span: Span::new(start, self.position),
        }
    }

    /// 读取字段引用，可包含字母、数字、下划线和点
    fn read_identifier(&mut self, start: usize) -> Token<'a> {
        self.bump_while(is_identifier_char);
        Token {
            kind: TokenKind::Identifier(&self.input[start..self.position]),
            span: Span::new(start, self.position),
        }
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.skip_whitespace();
        let start = self.position;

        let c = self.bump()?;

        let token = match c {
            '+' => Token { kind: TokenKind::Plus, span: Span::new(start, self.position) },
            '-' => Token { kind: TokenKind::Minus, span: Span::new(start, self.position) },
            '*' => Token { kind: TokenKind::Star, span: Span::new(start, self.position) },
            '/' => Token { kind: TokenKind::Slash, span: Span::new(start, self.position) },
            c if c.is_ascii_digit() => self.read_number(start),
            c if c.is_ascii_alphabetic() || c == '_' => self.read_identifier(start),
            _ => Token {
                kind: TokenKind::Illegal(&self.input[start..self.position]),
                span: Span::new(start, self.position),
            },
        };
        Some(token)
    }
}
