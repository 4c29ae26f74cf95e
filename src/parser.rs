//! 算术表达式的语法分析器
//!
//! ## 解析流程图
//!
//! ```text
//! parse()
//!   └─ parse_additive()          term (('+' | '-') term)*
//!        └─ parse_multiplicative()   factor (('*' | '/') factor)*
//!             └─ parse_operand()      number | field_reference
//! ```
//!
//! ## 结合性
//!
//! 同一优先级的运算符左结合：`1 + 2 + 3` 解析为 `(1 + 2) + 3`，
//! `1 + 2 * 3` 解析为 `1 + (2 * 3)`。
//!
//! ## 符号
//!
//! 只有在操作数位置且紧贴数字时，`+`/`-` 才被当作符号：
//! `1 - -2` 等价于 `1 - (-2)`，而 `1 -- 1` 和 `+ 1 + 1` 会报错。

use tracing::debug;

use crate::ast::{ExpressionNode, Operator};
use crate::error::ArithmeticError;
use crate::lexer::Lexer;
use crate::token::{Span, Token, TokenKind};

/// [`parse_arithmetic_default`] 使用的运算符上限
pub const DEFAULT_MAX_OPERATORS: usize = 10;

/// 存放表达式的列名前缀, 例如：`equation|a + b`
pub const EQUATION_PREFIX: &str = "equation|";

/// 判断列名是否为表达式列
pub fn is_equation(field: &str) -> bool {
    field.starts_with(EQUATION_PREFIX)
}

/// 去掉列名前缀，返回表达式文本
pub fn strip_equation(field: &str) -> &str {
    field.strip_prefix(EQUATION_PREFIX).unwrap_or(field)
}

/// 解析表达式的入口
///
/// 先词法分析再语法分析，二元运算符个数超过 `max_operators` 时返回
/// [`ArithmeticError::MaxOperators`]。
pub fn parse_arithmetic(equation: &str, max_operators: usize) -> Result<ExpressionNode, ArithmeticError> {
    let tokens: Vec<_> = Lexer::new(equation).collect();
    let tree = Parser::new(&tokens).parse()?;

    let count = tree.operator_count();
    if count > max_operators {
        return Err(ArithmeticError::MaxOperators {
            count,
            max: max_operators,
        });
    }

    debug!(equation, operators = count, "parsed equation");
    Ok(tree)
}

/// 使用默认运算符上限解析表达式
pub fn parse_arithmetic_default(equation: &str) -> Result<ExpressionNode, ArithmeticError> {
    parse_arithmetic(equation, DEFAULT_MAX_OPERATORS)
}

/// 基于 token 切片的递归下降解析器
pub struct Parser<'a> {
    tokens: &'a [Token<'a>],
    /// 当前 token 的索引
    position: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token<'a>]) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// 返回当前 token，不推进位置
    fn peek(&self) -> Option<&'a Token<'a>> {
        self.tokens.get(self.position)
    }

    /// 返回当前 token 并推进位置
    fn advance(&mut self) -> Option<&'a Token<'a>> {
        let token = self.tokens.get(self.position)?;
        self.position += 1;
        Some(token)
    }

    /// 输入末尾的空区间，用于报告"缺少操作数"
    fn last_span(&self) -> Option<Span> {
        self.tokens.last().map(|t| Span::new(t.span.end, t.span.end))
    }

    /// 解析完整的表达式，要求消费掉所有 token
    pub fn parse(&mut self) -> Result<ExpressionNode, ArithmeticError> {
        if self.tokens.is_empty() {
            return Err(ArithmeticError::parse("equation is empty", None));
        }

        let tree = self.parse_additive()?;

        if let Some(token) = self.peek() {
            return Err(ArithmeticError::parse(
                format!("unexpected {} at position {}", describe(&token.kind), token.span.start),
                Some(token.span),
            ));
        }
        Ok(tree)
    }

    /// 解析加减表达式 (最低优先级)
    ///
    /// 语法: `term (('+' | '-') term)*`
    /// 示例: `spans.http + spans.db - 1`
    fn parse_additive(&mut self) -> Result<ExpressionNode, ArithmeticError> {
        let mut left = self.parse_multiplicative()?;

        while let Some(op) = self.match_operator(&[Operator::Add, Operator::Sub]) {
            let right = self.parse_multiplicative()?;
            left = ExpressionNode::binary(op, left, right);
        }

        Ok(left)
    }

    /// 解析乘除表达式
    ///
    /// 语法: `factor (('*' | '/') factor)*`
    /// 示例: `transaction.duration * 2 / 1.5`
    ///
    /// 除数为字面量 0 时照常构建节点，只有求值时才会报错。
    fn parse_multiplicative(&mut self) -> Result<ExpressionNode, ArithmeticError> {
        let mut left = self.parse_operand()?;

        while let Some(op) = self.match_operator(&[Operator::Mul, Operator::Div]) {
            let right = self.parse_operand()?;
            left = ExpressionNode::binary(op, left, right);
        }

        Ok(left)
    }

    /// 当前 token 是 `accepted` 中的运算符时消费它
    fn match_operator(&mut self, accepted: &[Operator]) -> Option<Operator> {
        let op = match self.peek()?.kind {
            TokenKind::Plus => Operator::Add,
            TokenKind::Minus => Operator::Sub,
            TokenKind::Star => Operator::Mul,
            TokenKind::Slash => Operator::Div,
            _ => return None,
        };
        if accepted.contains(&op) {
            self.advance();
            Some(op)
        } else {
            None
        }
    }

    /// 解析操作数 (最高优先级)
    ///
    /// 支持的操作数类型:
    /// - `1`, `2.5` - 数字字面量
    /// - `-2`, `+3` - 紧贴数字的符号
    /// - `spans.http` - 字段引用
    fn parse_operand(&mut self) -> Result<ExpressionNode, ArithmeticError> {
        let Some(token) = self.advance() else {
            return Err(ArithmeticError::parse(
                "expected a number or field after the last operator",
                self.last_span(),
            ));
        };

        match &token.kind {
            TokenKind::Number(text) => parse_number(text, token.span).map(ExpressionNode::Literal),
            TokenKind::Identifier(name) => Ok(ExpressionNode::FieldRef(name.to_string())),
            TokenKind::Plus | TokenKind::Minus => {
                let signed = match self.peek_next_number(token) {
                    Some((text, span)) => {
                        self.advance();
                        let value = parse_number(text, span)?;
                        if token.kind == TokenKind::Minus {
                            -value
                        } else {
                            value
                        }
                    }
                    None => {
                        return Err(ArithmeticError::parse(
                            format!(
                                "expected a number or field at position {}, found {}",
                                token.span.start,
                                describe(&token.kind)
                            ),
                            Some(token.span),
                        ))
                    }
                };
                Ok(ExpressionNode::Literal(signed))
            }
            TokenKind::Star | TokenKind::Slash | TokenKind::Illegal(_) => Err(ArithmeticError::parse(
                format!(
                    "expected a number or field at position {}, found {}",
                    token.span.start,
                    describe(&token.kind)
                ),
                Some(token.span),
            )),
        }
    }

    /// 符号 token 之后紧贴的数字，不紧贴时返回 `None`
    fn peek_next_number(&self, sign: &Token<'a>) -> Option<(&'a str, Span)> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Number(text),
                span,
            }) if sign.span.touches(span) => Some((*text, *span)),
            _ => None,
        }
    }
}

fn parse_number(text: &str, span: Span) -> Result<f64, ArithmeticError> {
    text.parse::<f64>().map_err(|_| {
        ArithmeticError::parse(
            format!("'{}' is not a valid number", text),
            Some(span),
        )
    })
}

/// 错误信息中 token 的描述
fn describe(kind: &TokenKind<'_>) -> String {
    match kind {
        TokenKind::Number(text) => format!("number '{}'", text),
        TokenKind::Identifier(name) => format!("field '{}'", name),
        TokenKind::Plus => "operator '+'".to_string(),
        TokenKind::Minus => "operator '-'".to_string(),
        TokenKind::Star => "operator '*'".to_string(),
        TokenKind::Slash => "operator '/'".to_string(),
        TokenKind::Illegal(text) => format!("invalid token '{}'", text),
    }
}
