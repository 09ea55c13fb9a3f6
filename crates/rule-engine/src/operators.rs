//! 表达式操作符定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 二元操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    // 逻辑（短路）
    And,
    Or,

    // 相等比较
    Eq,
    Neq,

    // 有序比较
    Gt,
    Gte,
    Lt,
    Lte,

    // 算术
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOperator {
    /// 结合强度，用于渲染时决定是否加括号
    pub(crate) fn precedence(&self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::Neq => 3,
            Self::Gt | Self::Gte | Self::Lt | Self::Lte => 4,
            Self::Add | Self::Sub => 5,
            Self::Mul | Self::Div | Self::Rem => 6,
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::And => "&&",
            Self::Or => "||",
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
        };
        write!(f, "{}", s)
    }
}

/// 一元操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperator {
    Not,
    Neg,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Not => write!(f, "!"),
            Self::Neg => write!(f, "-"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_names() {
        let op: BinaryOperator = serde_json::from_str("\"gte\"").unwrap();
        assert_eq!(op, BinaryOperator::Gte);
        assert_eq!(serde_json::to_string(&UnaryOperator::Not).unwrap(), "\"not\"");
    }

    #[test]
    fn test_display() {
        assert_eq!(BinaryOperator::And.to_string(), "&&");
        assert_eq!(BinaryOperator::Neq.to_string(), "!=");
        assert_eq!(UnaryOperator::Neg.to_string(), "-");
    }

    #[test]
    fn test_precedence() {
        assert!(BinaryOperator::Mul.precedence() > BinaryOperator::Add.precedence());
        assert!(BinaryOperator::And.precedence() > BinaryOperator::Or.precedence());
    }
}
