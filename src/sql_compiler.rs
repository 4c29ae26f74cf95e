//! Renders compiled condition lists to SQL text using sea-query.
//!
//! The output is meant for inspecting what a filter compiles to; the query
//! layer talks to the backend through its own protocol.

use sea_query::{Alias, Asterisk, Expr, Func, Iden, MysqlQueryBuilder, SelectStatement, SimpleExpr};
use thiserror::Error;
use tracing::debug;

use crate::ast::{Condition, Expression, Op, Value};
use crate::filter::CompiledFilter;

/// Column identifier wrapper. Resolved columns such as `tags[browser]` or
/// `exception_stacks.type` are a single identifier.
#[derive(Debug, Clone)]
pub struct ColumnName(pub String);

impl Iden for ColumnName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let _ = s.write_str(&self.0);
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot render condition: {message}")]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub struct SqlCompiler {
    table: String,
}

impl SqlCompiler {
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into() }
    }

    /// Renders `SELECT * FROM <table> WHERE c1 AND c2 ...`.
    pub fn compile(&self, conditions: &[Condition]) -> Result<String, CompileError> {
        let mut select = SelectStatement::new();
        select.column(Asterisk).from(ColumnName(self.table.clone()));

        for condition in conditions {
            select.and_where(self.compile_condition(condition)?);
        }

        let sql = select.to_string(MysqlQueryBuilder);
        debug!(conditions = conditions.len(), "rendered filter to sql");
        Ok(sql)
    }

    pub fn compile_filter(&self, filter: &CompiledFilter) -> Result<String, CompileError> {
        self.compile(&filter.conditions)
    }

    fn compile_condition(&self, condition: &Condition) -> Result<SimpleExpr, CompileError> {
        match condition {
            Condition::Comparison { lhs, op, rhs } => self.compile_comparison(lhs, *op, rhs.as_ref()),
            Condition::And(children) => {
                let exprs = self.compile_children(children)?;
                Ok(combine_conditions(exprs, SimpleExpr::and, true))
            }
            Condition::Or(children) => {
                let exprs = self.compile_children(children)?;
                Ok(combine_conditions(exprs, SimpleExpr::or, false))
            }
        }
    }

    fn compile_children(&self, children: &[Condition]) -> Result<Vec<SimpleExpr>, CompileError> {
        children.iter().map(|child| self.compile_condition(child)).collect()
    }

    fn compile_comparison(&self, lhs: &Expression, op: Op, rhs: Option<&Value>) -> Result<SimpleExpr, CompileError> {
        let expr = Expr::expr(self.compile_expression(lhs)?);

        let rhs = match (op, rhs) {
            (Op::IsNull, _) => return Ok(expr.is_null()),
            (Op::IsNotNull, _) => return Ok(expr.is_not_null()),
            (_, Some(rhs)) => rhs,
            (_, None) => {
                return Err(CompileError::new(format!("{} needs a right-hand side", op.as_str())))
            }
        };

        let compiled = match op {
            Op::In | Op::NotIn => {
                let values = rhs
                    .as_slice()
                    .iter()
                    .map(|v| literal_to_value(v).map(SimpleExpr::Value))
                    .collect::<Result<Vec<_>, _>>()?;
                if op == Op::In {
                    expr.is_in(values)
                } else {
                    expr.is_not_in(values)
                }
            }
            Op::Like | Op::NotLike => {
                let pattern = rhs
                    .as_str()
                    .ok_or_else(|| CompileError::new(format!("{} needs a string pattern", op.as_str())))?
                    .to_string();
                if op == Op::Like {
                    expr.like(pattern)
                } else {
                    expr.not_like(pattern)
                }
            }
            _ => {
                let value = literal_to_simple_expr(rhs)?;
                match op {
                    Op::Eq => expr.eq(value),
                    Op::Neq => expr.ne(value),
                    Op::Gt => expr.gt(value),
                    Op::Gte => expr.gte(value),
                    Op::Lt => expr.lt(value),
                    _ => expr.lte(value),
                }
            }
        };
        Ok(compiled)
    }

    fn compile_expression(&self, expression: &Expression) -> Result<SimpleExpr, CompileError> {
        match expression {
            Expression::Column(name) => Ok(Expr::col(ColumnName(name.clone())).into()),
            Expression::Function { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.compile_expression(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Func::cust(Alias::new(name.as_str())).args(args).into())
            }
            Expression::Literal(value) => literal_to_simple_expr(value),
        }
    }
}

/// Joins conditions with `and`/`or`. An empty group is the identity of the
/// connective.
fn combine_conditions(
    conditions: Vec<SimpleExpr>,
    connective: fn(SimpleExpr, SimpleExpr) -> SimpleExpr,
    identity: bool,
) -> SimpleExpr {
    conditions
        .into_iter()
        .reduce(connective)
        .unwrap_or_else(|| Expr::val(identity).into())
}

fn literal_to_simple_expr(literal: &Value) -> Result<SimpleExpr, CompileError> {
    match literal {
        Value::List(values) => Ok(SimpleExpr::Tuple(
            values
                .iter()
                .map(|v| literal_to_value(v).map(SimpleExpr::Value))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        scalar => literal_to_value(scalar).map(SimpleExpr::Value),
    }
}

/// Convert a scalar literal to a sea-query value.
fn literal_to_value(literal: &Value) -> Result<sea_query::Value, CompileError> {
    match literal {
        Value::Bool(b) => Ok(sea_query::Value::Bool(Some(*b))),
        Value::Int(i) => Ok(sea_query::Value::BigInt(Some(*i))),
        Value::Float(x) => Ok(sea_query::Value::Double(Some(*x))),
        Value::String(s) => Ok(sea_query::Value::String(Some(Box::new(s.clone())))),
        Value::DateTime(dt) => Ok(sea_query::Value::String(Some(Box::new(
            dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        )))),
        Value::List(_) => Err(CompileError::new("nested lists cannot be rendered")),
    }
}
