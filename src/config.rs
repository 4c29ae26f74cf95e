//! 配置模块，描述公开字段名到后端列的映射
//!
//! 内置的 [`DatasetConfig::discover`] 对应合并后的事件数据集，
//! 结构相同的 JSON 文件可以替换它。

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ast::Expression;
use crate::error::ConfigError;

/// 数据集映射配置结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// 公开字段名到后端列名的映射
    pub columns: HashMap<String, String>,
    /// 以数组存储的字段（异常与堆栈的嵌套数据）
    #[serde(default)]
    pub array_fields: HashSet<String>,
    /// 列值永远不为 null 的字段
    #[serde(default)]
    pub non_nullable_keys: HashSet<String>,
    /// 由计算表达式而非列支撑的字段
    #[serde(default)]
    pub field_aliases: HashMap<String, Expression>,
}

impl DatasetConfig {
    /// 从JSON文件加载数据集配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        let content = fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Json {
            path: path_ref.to_path_buf(),
            source,
        })
    }

    /// 错误与事务合并后的默认数据集
    pub fn discover() -> Self {
        let columns = [
            ("id", "event_id"),
            ("timestamp", "timestamp"),
            ("project_id", "project_id"),
            ("project.id", "project_id"),
            ("issue.id", "group_id"),
            ("environment", "environment"),
            ("release", "release"),
            ("dist", "dist"),
            ("message", "message"),
            ("title", "title"),
            ("location", "location"),
            ("culprit", "culprit"),
            ("event.type", "type"),
            ("platform.name", "platform"),
            ("user.id", "user_id"),
            ("user.email", "email"),
            ("user.username", "username"),
            ("user.ip", "ip_address"),
            ("user.name", "user_name"),
            ("sdk.name", "sdk_name"),
            ("sdk.version", "sdk_version"),
            ("http.method", "http_method"),
            ("http.referer", "http_referer"),
            ("http.url", "tags[url]"),
            ("os.build", "contexts[os.build]"),
            ("os.kernel_version", "contexts[os.kernel_version]"),
            ("device.name", "contexts[device.name]"),
            ("trace", "contexts[trace.trace_id]"),
            ("trace.span", "contexts[trace.span_id]"),
            ("trace.parent_span", "contexts[trace.parent_span_id]"),
            ("transaction", "transaction_name"),
            ("transaction.op", "transaction_op"),
            ("transaction.duration", "duration"),
            ("transaction.status", "transaction_status"),
            ("error.type", "exception_stacks.type"),
            ("error.value", "exception_stacks.value"),
            ("error.mechanism", "exception_stacks.mechanism_type"),
            ("stack.abs_path", "exception_frames.abs_path"),
            ("stack.filename", "exception_frames.filename"),
            ("stack.package", "exception_frames.package"),
            ("stack.module", "exception_frames.module"),
            ("stack.function", "exception_frames.function"),
            ("stack.in_app", "exception_frames.in_app"),
            ("stack.colno", "exception_frames.colno"),
            ("stack.lineno", "exception_frames.lineno"),
            ("stack.stack_level", "exception_frames.stack_level"),
            ("tags.key", "tags.key"),
            ("tags.value", "tags.value"),
        ];

        let array_fields = [
            "error.type",
            "error.value",
            "error.mechanism",
            "stack.abs_path",
            "stack.filename",
            "stack.package",
            "stack.module",
            "stack.function",
            "stack.in_app",
            "stack.colno",
            "stack.lineno",
            "stack.stack_level",
            "tags.key",
            "tags.value",
        ];

        let non_nullable_keys = ["event.type", "project.id", "project_id", "timestamp"];

        let field_aliases = [
            (
                "user.display",
                Expression::function(
                    "coalesce",
                    vec![
                        Expression::column("email"),
                        Expression::column("username"),
                        Expression::column("ip_address"),
                    ],
                ),
            ),
            (
                "http.status_code",
                Expression::function(
                    "coalesce",
                    vec![
                        Expression::column("contexts[response.status_code]"),
                        Expression::column("tags[http.status_code]"),
                    ],
                ),
            ),
            (
                "timestamp.to_hour",
                Expression::function("toStartOfHour", vec![Expression::column("timestamp")]),
            ),
            (
                "timestamp.to_day",
                Expression::function("toStartOfDay", vec![Expression::column("timestamp")]),
            ),
        ];

        Self {
            columns: columns
                .into_iter()
                .map(|(field, column)| (field.to_string(), column.to_string()))
                .collect(),
            array_fields: array_fields.into_iter().map(String::from).collect(),
            non_nullable_keys: non_nullable_keys.into_iter().map(String::from).collect(),
            field_aliases: field_aliases
                .into_iter()
                .map(|(name, expr)| (name.to_string(), expr))
                .collect(),
        }
    }

    /// 将公开字段名解析为后端列名
    ///
    /// 显式的 `tags[..]`/`contexts[..]` 原样返回，
    /// `measurements.` 和 `spans.` 命名空间映射到各自的嵌套列。
    pub fn resolve_column(&self, name: &str) -> Option<String> {
        if let Some(column) = self.columns.get(name) {
            return Some(column.clone());
        }
        if name.starts_with("tags[") || name.starts_with("contexts[") {
            return Some(name.to_string());
        }
        if let Some(measurement) = name.strip_prefix("measurements.") {
            return Some(format!("measurements[{}]", measurement));
        }
        if let Some(op) = name.strip_prefix("spans.") {
            return Some(format!("span_op_breakdowns[ops.{}]", op));
        }
        None
    }

    pub fn field_alias(&self, name: &str) -> Option<&Expression> {
        self.field_aliases.get(name)
    }

    pub fn is_array_field(&self, name: &str) -> bool {
        self.array_fields.contains(name)
    }

    pub fn is_non_nullable(&self, name: &str) -> bool {
        self.non_nullable_keys.contains(name)
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self::discover()
    }
}
