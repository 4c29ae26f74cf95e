//! 两个编译器共用的节点类型
//!
//! 表达式解析为 [`ExpressionNode`] 树。搜索条件降级为 [`Condition`] 树，
//! 其叶子用后端运算符 [`Op`] 将 [`Expression`]（列、函数调用或字面量）
//! 与 [`Value`] 进行比较。

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EvaluationError;

/// 表达式语言的二元运算符, 序列化名称与后端的算术函数一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// 加法 (+)
    #[serde(rename = "plus")]
    Add,
    #[serde(rename = "minus")]
    Sub,
    #[serde(rename = "multiply")]
    Mul,
    /// 除法 (/)，除数为 0 时在求值阶段报错
    #[serde(rename = "divide")]
    Div,
}

impl Operator {
    /// 实现该运算符的后端函数名
    pub fn function_name(&self) -> &'static str {
        match self {
            Operator::Add => "plus",
            Operator::Sub => "minus",
            Operator::Mul => "multiply",
            Operator::Div => "divide",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
        }
    }
}

/// 解析后的表达式树
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionNode {
    /// 数字字面量, 例如：`2.5`、`-1`
    Literal(f64),
    /// 字段引用, 例如：`spans.http`
    FieldRef(String),
    /// 二元运算
    BinaryOp {
        op: Operator,
        lhs: Box<ExpressionNode>,
        rhs: Box<ExpressionNode>,
    },
}

impl ExpressionNode {
    pub fn binary(op: Operator, lhs: ExpressionNode, rhs: ExpressionNode) -> Self {
        ExpressionNode::BinaryOp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// 树中二元运算符的个数
    pub fn operator_count(&self) -> usize {
        match self {
            ExpressionNode::BinaryOp { lhs, rhs, .. } => {
                1 + lhs.operator_count() + rhs.operator_count()
            }
            _ => 0,
        }
    }

    /// 按从左到右的顺序返回字段引用（保留重复项）
    pub fn field_refs(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        self.collect_field_refs(&mut fields);
        fields
    }

    fn collect_field_refs<'a>(&'a self, fields: &mut Vec<&'a str>) {
        match self {
            ExpressionNode::FieldRef(name) => fields.push(name),
            ExpressionNode::BinaryOp { lhs, rhs, .. } => {
                lhs.collect_field_refs(fields);
                rhs.collect_field_refs(fields);
            }
            ExpressionNode::Literal(_) => {}
        }
    }

    /// 求值：`lookup` 为每个字段引用提供具体数值
    ///
    /// 字段无法绑定时返回 [`EvaluationError::UnboundField`]，
    /// 除数为 0 时返回 [`EvaluationError::DivisionByZero`]。
    pub fn evaluate(&self, lookup: impl Fn(&str) -> Option<f64>) -> Result<f64, EvaluationError> {
        self.eval(&lookup)
    }

    fn eval(&self, lookup: &dyn Fn(&str) -> Option<f64>) -> Result<f64, EvaluationError> {
        match self {
            ExpressionNode::Literal(value) => Ok(*value),
            ExpressionNode::FieldRef(name) => {
                lookup(name).ok_or_else(|| EvaluationError::UnboundField(name.clone()))
            }
            ExpressionNode::BinaryOp { op, lhs, rhs } => {
                let left = lhs.eval(lookup)?;
                let right = rhs.eval(lookup)?;
                match op {
                    Operator::Add => Ok(left + right),
                    Operator::Sub => Ok(left - right),
                    Operator::Mul => Ok(left * right),
                    Operator::Div if right == 0.0 => {
                        Err(EvaluationError::DivisionByZero(self.to_string()))
                    }
                    Operator::Div => Ok(left / right),
                }
            }
        }
    }
}

impl fmt::Display for ExpressionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionNode::Literal(value) => write!(f, "{}", value),
            ExpressionNode::FieldRef(name) => write!(f, "{}", name),
            ExpressionNode::BinaryOp { op, lhs, rhs } => {
                write!(f, "({} {} {})", lhs, op.symbol(), rhs)
            }
        }
    }
}

/// 字面量, 出现在搜索条件中或比较的右侧
///
/// 反序列化按变体顺序尝试，`String` 排在 `DateTime` 之前，
/// 因此形似时间的字符串仍是字符串。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
    List(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// 空字符串是分词器传来的 "has" 标记
    pub fn is_empty_string(&self) -> bool {
        matches!(self, Value::String(s) if s.is_empty())
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    /// 将标量视为单元素切片，便于统一处理标量与列表
    pub fn as_slice(&self) -> &[Value] {
        match self {
            Value::List(values) => values,
            scalar => std::slice::from_ref(scalar),
        }
    }

    /// 将数字或字符串形式的 `0`/`1` 解释为布尔值
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Value::Int(0) => Some(false),
            Value::Int(1) => Some(true),
            Value::String(s) if s == "0" => Some(false),
            Value::String(s) if s == "1" => Some(true),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Value::String(s) => write!(f, "{}", s),
            Value::List(values) => {
                write!(f, "[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

/// 比较的左侧，或函数调用的参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    /// 已解析的后端列, 例如：`email`、`tags[browser]`
    Column(String),
    /// 后端函数调用, 例如：`ifNull(group_id, 0)`
    Function { name: String, args: Vec<Expression> },
    /// 字面量参数
    Literal(Value),
}

impl Expression {
    pub fn column(name: impl Into<String>) -> Self {
        Expression::Column(name.into())
    }

    pub fn function(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Expression::Function {
            name: name.into(),
            args,
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn column_name(&self) -> Option<&str> {
        match self {
            Expression::Column(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Column(name) => write!(f, "{}", name),
            Expression::Function { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expression::Literal(value) => fmt_literal(f, value),
        }
    }
}

fn fmt_literal(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(_) | Value::DateTime(_) => write!(f, "'{}'", value),
        Value::List(values) => {
            write!(f, "(")?;
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                fmt_literal(f, value)?;
            }
            write!(f, ")")
        }
        _ => write!(f, "{}", value),
    }
}

/// 后端支持的比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Op {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Like,
    NotLike,
    IsNull,
    IsNotNull,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Neq => "!=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::In => "IN",
            Op::NotIn => "NOT IN",
            Op::Like => "LIKE",
            Op::NotLike => "NOT LIKE",
            Op::IsNull => "IS NULL",
            Op::IsNotNull => "IS NOT NULL",
        }
    }

    pub fn is_unary(&self) -> bool {
        matches!(self, Op::IsNull | Op::IsNotNull)
    }
}

/// 交给存储查询层的布尔条件树
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// 叶子比较，当且仅当 `op` 为一元运算符时 `rhs` 为 `None`
    Comparison {
        lhs: Expression,
        op: Op,
        rhs: Option<Value>,
    },
    /// 逻辑与运算 (AND)
    And(Vec<Condition>),
    /// 逻辑或运算 (OR)
    Or(Vec<Condition>),
}

impl Condition {
    /// 构建二元比较，空值检查请使用 [`Condition::is_null`] 和
    /// [`Condition::is_not_null`]
    pub fn compare(lhs: Expression, op: Op, rhs: impl Into<Value>) -> Self {
        debug_assert!(!op.is_unary(), "{} takes no right-hand side", op.as_str());
        Condition::Comparison {
            lhs,
            op,
            rhs: Some(rhs.into()),
        }
    }

    pub fn is_null(lhs: Expression) -> Self {
        Condition::Comparison {
            lhs,
            op: Op::IsNull,
            rhs: None,
        }
    }

    pub fn is_not_null(lhs: Expression) -> Self {
        Condition::Comparison {
            lhs,
            op: Op::IsNotNull,
            rhs: None,
        }
    }

    /// 构建 OR 分组，只有一个子条件时直接返回该子条件
    pub fn or(mut children: Vec<Condition>) -> Self {
        if children.len() == 1 {
            return children.remove(0);
        }
        Condition::Or(children)
    }

    pub fn and(mut children: Vec<Condition>) -> Self {
        if children.len() == 1 {
            return children.remove(0);
        }
        Condition::And(children)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Comparison { lhs, op, rhs: None } => write!(f, "{} {}", lhs, op.as_str()),
            Condition::Comparison {
                lhs,
                op,
                rhs: Some(rhs),
            } => {
                write!(f, "{} {} ", lhs, op.as_str())?;
                fmt_literal(f, rhs)
            }
            Condition::And(children) | Condition::Or(children) => {
                let joiner = if matches!(self, Condition::And(_)) { " AND " } else { " OR " };
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{}", joiner)?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
        }
    }
}
