//! 规则引擎错误类型
//!
//! 分三层：
//! - [`BridgeError`]：宿主对象桥接层（字段/方法分派）返回的错误
//! - [`EvalError`]：表达式求值错误，携带失败的路径/操作符
//! - [`RuleError`]：对宿主暴露的顶层错误

use std::fmt;
use thiserror::Error;

/// 求值错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvalErrorKind {
    /// 根符号不存在，或原生对象没有该字段
    UnknownSymbol,
    /// 方法调用失败：参数个数/类型不符、在缺失值上调用方法等
    Invocation,
    /// 操作符作用于不兼容的具体类型
    TypeMismatch,
    /// 除零、整数溢出
    Arithmetic,
}

impl fmt::Display for EvalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnknownSymbol => "UnknownSymbol",
            Self::Invocation => "InvocationError",
            Self::TypeMismatch => "TypeMismatch",
            Self::Arithmetic => "ArithmeticError",
        };
        write!(f, "{}", s)
    }
}

/// 表达式求值错误
///
/// `path` 是出错节点的文本形式（如 `inputs.name.ToLower()` 或 `a < b`），
/// 用于定位规则中的具体位置。
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} 于 `{path}`: {message}")]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub path: String,
    pub message: String,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn unknown_symbol(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::UnknownSymbol, path, message)
    }

    pub fn invocation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::Invocation, path, message)
    }

    pub fn type_mismatch(path: impl Into<String>, expected: &str, actual: &str) -> Self {
        Self::new(
            EvalErrorKind::TypeMismatch,
            path,
            format!("期望 {}, 实际 {}", expected, actual),
        )
    }

    pub fn arithmetic(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::Arithmetic, path, message)
    }

    /// 将桥接层错误映射为求值错误
    pub(crate) fn from_bridge(path: impl Into<String>, err: BridgeError) -> Self {
        let kind = match err {
            BridgeError::UnknownField(_) => EvalErrorKind::UnknownSymbol,
            _ => EvalErrorKind::Invocation,
        };
        Self::new(kind, path, err.to_string())
    }
}

/// 宿主对象桥接错误
///
/// 由 [`Record`](crate::value::Record) 的实现者返回，引擎负责补充路径信息。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("字段不存在: {0}")]
    UnknownField(String),

    #[error("方法不存在: {0}")]
    UnknownMethod(String),

    #[error("字段只读: {0}")]
    ReadOnlyField(String),

    #[error("参数个数不匹配: {method} 需要 {expected} 个, 实际 {actual} 个")]
    Arity {
        method: String,
        expected: usize,
        actual: usize,
    },

    #[error("参数类型不匹配: {method} 第 {index} 个参数期望 {expected}, 实际 {actual}")]
    ArgumentType {
        method: String,
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("字段类型不匹配: {field} 期望 {expected}, 实际 {actual}")]
    FieldType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("{0}")]
    Failed(String),
}

/// 规则引擎顶层错误
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("符号重复绑定: {0}")]
    DuplicateSymbol(String),

    #[error("事实数据解析失败: {name}: {source}")]
    MalformedPayload {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("规则 '{rule}' 执行失败: {source}")]
    Evaluation {
        rule: String,
        #[source]
        source: EvalError,
    },

    #[error("超过最大执行轮数: {max_cycles}")]
    CycleLimitExceeded { max_cycles: u64 },

    #[error("执行超时: 已耗时 {elapsed_ms}ms, 上限 {timeout_ms}ms")]
    Timeout { elapsed_ms: u64, timeout_ms: u64 },

    #[error("规则编译失败: {0}")]
    CompileError(String),

    #[error("知识库未找到: {name}@{version}")]
    KnowledgeBaseNotFound { name: String, version: String },

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RuleError {
    /// 求值错误的分类（非求值错误返回 None）
    pub fn eval_kind(&self) -> Option<EvalErrorKind> {
        match self {
            Self::Evaluation { source, .. } => Some(source.kind),
            _ => None,
        }
    }

    /// 出错的规则名称
    pub fn rule_name(&self) -> Option<&str> {
        match self {
            Self::Evaluation { rule, .. } => Some(rule),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_unknown_field_maps_to_unknown_symbol() {
        let err = EvalError::from_bridge("R.Missing", BridgeError::UnknownField("Missing".into()));
        assert_eq!(err.kind, EvalErrorKind::UnknownSymbol);
        assert_eq!(err.path, "R.Missing");
    }

    #[test]
    fn test_bridge_arity_maps_to_invocation() {
        let err = EvalError::from_bridge(
            "R.IsMatching(\"a\")",
            BridgeError::Arity {
                method: "IsMatching".into(),
                expected: 2,
                actual: 1,
            },
        );
        assert_eq!(err.kind, EvalErrorKind::Invocation);
        assert!(err.to_string().contains("InvocationError"));
    }

    #[test]
    fn test_evaluation_error_context() {
        let err = RuleError::Evaluation {
            rule: "TestRule".into(),
            source: EvalError::type_mismatch("a < b", "number", "absent"),
        };
        assert_eq!(err.eval_kind(), Some(EvalErrorKind::TypeMismatch));
        assert_eq!(err.rule_name(), Some("TestRule"));
        assert!(err.to_string().contains("TestRule"));
        assert!(err.to_string().contains("a < b"));
    }
}
