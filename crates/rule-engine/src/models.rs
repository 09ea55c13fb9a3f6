//! 规则引擎领域模型
//!
//! 编译后的规则语法树。语法树由外部编译器产出，结构上已校验；
//! 路径能否解析只有在求值时才知道。所有节点均可用 serde 序列化，
//! JSON 中以 `type` 字段区分节点类型。

use crate::operators::{BinaryOperator, UnaryOperator};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 字面量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Float(f) => Value::Float(*f),
            Self::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "nil"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{:?}", x),
            Self::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// 路径段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    /// 字段 / 对象键，纯数字名称可用于数组下标（如 `items.0.name`）
    Field { name: String },
    /// 下标访问，整数索引数组，字符串索引对象
    Index { index: Box<Expr> },
    /// 方法调用
    Method {
        name: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field { name } => write!(f, ".{}", name),
            Self::Index { index } => write!(f, "[{}]", index),
            Self::Method { name, args } => {
                write!(f, ".{}(", name)?;
                write_args(f, args)?;
                write!(f, ")")
            }
        }
    }
}

/// 路径表达式：根符号 + 有序路径段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathExpr {
    pub root: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl PathExpr {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            segments: Vec::new(),
        }
    }

    /// 从点号分隔的字段路径构建（如 "inputs.name.first"）
    pub fn dotted(path: &str) -> Self {
        let mut parts = path.split('.');
        let root = parts.next().unwrap_or_default();
        let mut expr = Self::new(root);
        for part in parts {
            expr = expr.field(part);
        }
        expr
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.segments.push(Segment::Field { name: name.into() });
        self
    }

    pub fn index(mut self, index: impl Into<Expr>) -> Self {
        self.segments.push(Segment::Index {
            index: Box::new(index.into()),
        });
        self
    }

    pub fn method(mut self, name: impl Into<String>, args: Vec<Expr>) -> Self {
        self.segments.push(Segment::Method {
            name: name.into(),
            args,
        });
        self
    }

    /// 截取前 `len` 个路径段，用于错误信息
    pub(crate) fn prefix(&self, len: usize) -> PathPrefix<'_> {
        PathPrefix {
            root: &self.root,
            segments: &self.segments[..len.min(self.segments.len())],
        }
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.prefix(self.segments.len()).fmt(f)
    }
}

/// 路径前缀的渲染视图
pub(crate) struct PathPrefix<'a> {
    root: &'a str,
    segments: &'a [Segment],
}

impl fmt::Display for PathPrefix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for seg in self.segments {
            write!(f, "{}", seg)?;
        }
        Ok(())
    }
}

/// 表达式节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expr {
    Literal {
        value: Literal,
    },
    Path(PathExpr),
    Unary {
        op: UnaryOperator,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// 内置函数调用（IsNil、Retract 等）
    Call {
        function: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn lit(value: impl Into<Literal>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    pub fn null() -> Self {
        Self::lit(Literal::Null)
    }

    pub fn path(path: &str) -> Self {
        Self::Path(PathExpr::dotted(path))
    }

    pub fn call(function: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::Call {
            function: function.into(),
            args,
        }
    }

    pub fn unary(op: UnaryOperator, operand: Expr) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(operand: Expr) -> Self {
        Self::unary(UnaryOperator::Not, operand)
    }

    pub fn and(self, other: Expr) -> Self {
        Self::binary(BinaryOperator::And, self, other)
    }

    pub fn or(self, other: Expr) -> Self {
        Self::binary(BinaryOperator::Or, self, other)
    }

    pub fn eq(self, other: impl Into<Expr>) -> Self {
        Self::binary(BinaryOperator::Eq, self, other.into())
    }

    pub fn neq(self, other: impl Into<Expr>) -> Self {
        Self::binary(BinaryOperator::Neq, self, other.into())
    }

    pub fn gt(self, other: impl Into<Expr>) -> Self {
        Self::binary(BinaryOperator::Gt, self, other.into())
    }

    pub fn gte(self, other: impl Into<Expr>) -> Self {
        Self::binary(BinaryOperator::Gte, self, other.into())
    }

    pub fn lt(self, other: impl Into<Expr>) -> Self {
        Self::binary(BinaryOperator::Lt, self, other.into())
    }

    pub fn lte(self, other: impl Into<Expr>) -> Self {
        Self::binary(BinaryOperator::Lte, self, other.into())
    }

    pub fn add(self, other: impl Into<Expr>) -> Self {
        Self::binary(BinaryOperator::Add, self, other.into())
    }

    /// 左结合地用 `&&` 连接所有表达式
    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().reduce(Expr::and)
    }

    /// 左结合地用 `||` 连接所有表达式
    pub fn any(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().reduce(Expr::or)
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Binary { op, .. } => op.precedence(),
            Self::Unary { .. } => 7,
            _ => 8,
        }
    }
}

impl From<PathExpr> for Expr {
    fn from(path: PathExpr) -> Self {
        Self::Path(path)
    }
}

impl From<Literal> for Expr {
    fn from(value: Literal) -> Self {
        Self::Literal { value }
    }
}

impl From<&str> for Expr {
    fn from(v: &str) -> Self {
        Self::lit(v)
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Self::lit(v)
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Self::lit(v)
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Self::lit(v)
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        Self::lit(v)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal { value } => write!(f, "{}", value),
            Self::Path(path) => write!(f, "{}", path),
            Self::Unary { op, operand } => {
                if operand.precedence() < self.precedence() {
                    write!(f, "{}({})", op, operand)
                } else {
                    write!(f, "{}{}", op, operand)
                }
            }
            Self::Binary { op, left, right } => {
                let prec = op.precedence();
                if left.precedence() < prec {
                    write!(f, "({})", left)?;
                } else {
                    write!(f, "{}", left)?;
                }
                write!(f, " {} ", op)?;
                if right.precedence() <= prec {
                    write!(f, "({})", right)
                } else {
                    write!(f, "{}", right)
                }
            }
            Self::Call { function, args } => {
                write!(f, "{}(", function)?;
                write_args(f, args)?;
                write!(f, ")")
            }
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", arg)?;
    }
    Ok(())
}

/// 动作语句
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// 赋值到原生对象字段：`path = expr`
    Assign { target: PathExpr, value: Expr },
    /// 调用语句：方法调用或内置函数（如 `Retract("name")`）
    Call { call: Expr },
}

impl Action {
    pub fn assign(target: &str, value: impl Into<Expr>) -> Self {
        Self::Assign {
            target: PathExpr::dotted(target),
            value: value.into(),
        }
    }

    pub fn call(call: impl Into<Expr>) -> Self {
        Self::Call { call: call.into() }
    }

    pub fn retract(rule_name: &str) -> Self {
        Self::call(Expr::call("Retract", vec![Expr::lit(rule_name)]))
    }

    pub fn complete() -> Self {
        Self::call(Expr::call("Complete", vec![]))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assign { target, value } => write!(f, "{} = {};", target, value),
            Self::Call { call } => write!(f, "{};", call),
        }
    }
}

/// 规则定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 优先级，数值越大越先评估；相同优先级保持声明顺序
    #[serde(default)]
    pub priority: i32,
    pub when: Expr,
    #[serde(default)]
    pub then: Vec<Action>,
}

impl Rule {
    pub fn new(name: impl Into<String>, when: Expr) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            priority: 0,
            when,
            then: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn then(mut self, action: Action) -> Self {
        self.then.push(action);
        self
    }
}

/// 知识库定义（编译前）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseDefinition {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl KnowledgeBaseDefinition {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_serialization() {
        let rule = Rule::new(
            "TestRule",
            Expr::path("R.Result")
                .eq("NoResult")
                .and(Expr::path("inputs.name.first").eq("john")),
        )
        .with_description("名字为 john 时写入结果")
        .then(Action::assign("R.Result", "ok"))
        .then(Action::retract("TestRule"));

        let json = serde_json::to_string_pretty(&rule).unwrap();
        let parsed: Rule = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, rule);
        assert_eq!(parsed.description, "名字为 john 时写入结果");
    }

    #[test]
    fn test_rule_deserialization() {
        let json = r#"
        {
            "name": "TestRule",
            "priority": 10,
            "when": {
                "type": "binary",
                "op": "or",
                "left": {
                    "type": "binary",
                    "op": "eq",
                    "left": {"type": "path", "root": "inputs", "segments": [
                        {"kind": "field", "name": "i_am_missing"}
                    ]},
                    "right": {"type": "literal", "value": "abc"}
                },
                "right": {
                    "type": "call",
                    "function": "IsNil",
                    "args": [{"type": "path", "root": "inputs", "segments": [
                        {"kind": "field", "name": "another_missing"}
                    ]}]
                }
            },
            "then": [
                {
                    "type": "assign",
                    "target": {"root": "R", "segments": [{"kind": "field", "name": "Result"}]},
                    "value": {"type": "literal", "value": "ok"}
                },
                {
                    "type": "call",
                    "call": {"type": "call", "function": "Retract", "args": [
                        {"type": "literal", "value": "TestRule"}
                    ]}
                }
            ]
        }
        "#;

        let rule: Rule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.name, "TestRule");
        assert_eq!(rule.priority, 10);
        assert_eq!(rule.then.len(), 2);
        assert_eq!(
            rule.when.to_string(),
            r#"inputs.i_am_missing == "abc" || IsNil(inputs.another_missing)"#
        );
    }

    #[test]
    fn test_literal_untagged() {
        let lit: Literal = serde_json::from_str("42").unwrap();
        assert_eq!(lit, Literal::Int(42));
        let lit: Literal = serde_json::from_str("4.5").unwrap();
        assert_eq!(lit, Literal::Float(4.5));
        let lit: Literal = serde_json::from_str("null").unwrap();
        assert_eq!(lit, Literal::Null);
    }

    #[test]
    fn test_path_display() {
        let path = PathExpr::new("R")
            .method(
                "IsMatching",
                vec![Expr::lit("matching"), Expr::path("inputs.missing")],
            )
            .field("x")
            .index(0);
        assert_eq!(
            path.to_string(),
            r#"R.IsMatching("matching", inputs.missing).x[0]"#
        );
        assert_eq!(path.prefix(1).to_string(), r#"R.IsMatching("matching", inputs.missing)"#);
    }

    #[test]
    fn test_expr_display_parenthesizes() {
        let expr = Expr::path("a")
            .or(Expr::path("b"))
            .and(Expr::path("c"));
        assert_eq!(expr.to_string(), "(a || b) && c");

        let expr = Expr::not(Expr::path("a").eq(1));
        assert_eq!(expr.to_string(), "!(a == 1)");
    }

    #[test]
    fn test_all_any() {
        let expr = Expr::all(vec![Expr::lit(true), Expr::lit(false), Expr::lit(true)]).unwrap();
        assert_eq!(expr.to_string(), "true && false && true");
        assert!(Expr::any(Vec::new()).is_none());
    }

    #[test]
    fn test_action_display() {
        assert_eq!(
            Action::assign("R.Result", "ok").to_string(),
            r#"R.Result = "ok";"#
        );
        assert_eq!(Action::retract("A").to_string(), r#"Retract("A");"#);
    }
}
