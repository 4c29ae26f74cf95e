//! Query-expression compiler for an event analytics backend.
//!
//! Two entry points: [`parse_arithmetic`] turns equations such as
//! `spans.http + spans.db` into an [`ExpressionNode`] tree, and
//! [`FilterCompiler`] lowers tokenized search terms into a backend
//! [`Condition`] list bounded by the request's [`FilterParams`].

pub mod ast;
pub mod config;
pub mod converters;
pub mod error;
pub mod filter;
pub mod lexer;
pub mod params;
pub mod parser;
pub mod resolver;
pub mod search;
pub mod sql_compiler;
pub mod token;

pub use ast::{Condition, Expression, ExpressionNode, Op, Operator, Value};
pub use config::DatasetConfig;
pub use error::{ArithmeticError, ConfigError, EvaluationError, FilterError};
pub use filter::{compile_filter, CompiledFilter, FilterCompiler};
pub use params::FilterParams;
pub use parser::{parse_arithmetic, parse_arithmetic_default, DEFAULT_MAX_OPERATORS};
pub use resolver::{Resolver, StaticResolver};
pub use search::{QueryItem, SearchOperator, SearchTerm};
pub use sql_compiler::SqlCompiler;
