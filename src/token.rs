//! The token definition for the equation language.

/// A token is a single unit of an equation, with a specific kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

/// The kind of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    // Operands
    Number(&'a str),     // The raw digits, e.g. "12.5"
    Identifier(&'a str), // A field reference, e.g. "spans.http"

    // Operators
    Plus,  // +
    Minus, // -
    Star,  // *
    Slash, // /

    // Special
    Illegal(&'a str), // An unknown character or a malformed number
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Whether `other` starts exactly where this span ends.
    pub fn touches(&self, other: &Span) -> bool {
        self.end == other.start
    }
}
