//! 运行时值与宿主对象桥接
//!
//! [`Value`] 是求值器产出的统一值类型，覆盖 JSON 树节点、宿主原生对象句柄
//! 以及缺失值哨兵 [`Value::Absent`]。宿主通过实现 [`Record`] 向规则暴露字段和方法。

use crate::error::BridgeError;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// 宿主原生对象
///
/// 字段读取、字段写入和方法调用都按名称分派。未知字段返回
/// [`BridgeError::UnknownField`]，未知方法返回 [`BridgeError::UnknownMethod`]。
#[cfg_attr(test, mockall::automock)]
pub trait Record: Send + Sync {
    /// 类型名称，用于错误信息和追踪
    fn type_name(&self) -> &'static str;

    /// 读取字段
    fn field(&self, name: &str) -> Result<Value, BridgeError>;

    /// 写入字段（默认只读）
    fn set_field(&mut self, name: &str, value: Value) -> Result<(), BridgeError> {
        let _ = value;
        Err(BridgeError::ReadOnlyField(name.to_string()))
    }

    /// 调用方法，参数已求值
    fn call(&mut self, method: &str, args: Args) -> Result<Value, BridgeError> {
        let _ = args;
        Err(BridgeError::UnknownMethod(method.to_string()))
    }
}

/// 原生对象句柄
///
/// 宿主保留同一个 `Arc`，执行结束后即可读取动作写入的结果。
/// 同一句柄不应被并发执行同时修改，引擎不提供额外同步。
#[derive(Clone)]
pub struct NativeRef(Arc<RwLock<dyn Record>>);

impl NativeRef {
    pub fn new<T: Record + 'static>(record: T) -> Self {
        Self(Arc::new(RwLock::new(record)))
    }

    /// 从宿主持有的共享对象创建句柄
    pub fn from_shared<T: Record + 'static>(shared: Arc<RwLock<T>>) -> Self {
        let inner: Arc<RwLock<dyn Record>> = shared;
        Self(inner)
    }

    pub fn type_name(&self) -> &'static str {
        self.0.read().type_name()
    }

    pub fn read_field(&self, name: &str) -> Result<Value, BridgeError> {
        self.0.read().field(name)
    }

    pub fn write_field(&self, name: &str, value: Value) -> Result<(), BridgeError> {
        self.0.write().set_field(name, value)
    }

    /// 调用方法；调用期间持有写锁，参数必须在调用前求值完毕
    pub fn invoke(&self, method: &str, args: Args) -> Result<Value, BridgeError> {
        self.0.write().call(method, args)
    }

    pub fn ptr_eq(&self, other: &NativeRef) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl fmt::Debug for NativeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.0.try_read().map(|r| r.type_name()).unwrap_or("<locked>");
        f.debug_tuple("NativeRef").field(&name).finish()
    }
}

impl PartialEq for NativeRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

/// 运行时值
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// 路径经过缺失字段或 null 后的哨兵值，区别于已解析的 `Null`
    #[default]
    Absent,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Time(DateTime<Utc>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Record(NativeRef),
}

impl Value {
    /// 类型名称
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Time(_) => "time",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Record(_) => "record",
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// `IsNil` 语义：缺失或 null
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Absent | Self::Null)
    }

    /// `IsZero` 语义：缺失、null 或该类型的零值
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Absent | Self::Null => true,
            Self::Bool(b) => !b,
            Self::Int(i) => *i == 0,
            Self::Float(f) => *f == 0.0,
            Self::Str(s) => s.is_empty(),
            Self::Time(t) => t.timestamp() == 0 && t.timestamp_subsec_nanos() == 0,
            Self::List(_) | Self::Map(_) | Self::Record(_) => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// 数值（整数或浮点）统一转为 f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Time(t) => Some(*t),
            _ => None,
        }
    }

    /// 从 JSON 节点转换
    pub fn from_json(node: &serde_json::Value) -> Self {
        match node {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::Str(s.clone()),
            serde_json::Value::Array(arr) => Self::List(arr.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// 转换为 JSON（用于追踪和报告输出）
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Absent | Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::Time(t) => {
                serde_json::Value::String(t.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            Self::List(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Self::Record(r) => serde_json::Value::String(format!("<{}>", r.type_name())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "<absent>"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Str(s) => write!(f, "{}", s),
            Self::Time(t) => write!(f, "{}", t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Self::List(_) | Self::Map(_) => write!(f, "{}", self.to_json()),
            Self::Record(r) => write!(f, "<{}>", r.type_name()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Time(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl From<NativeRef> for Value {
    fn from(v: NativeRef) -> Self {
        Self::Record(v)
    }
}

impl From<&serde_json::Value> for Value {
    fn from(v: &serde_json::Value) -> Self {
        Self::from_json(v)
    }
}

/// 已求值的方法参数
///
/// 提供按位置取类型化参数的辅助方法，供 [`Record::call`] 的实现使用。
#[derive(Debug, Clone)]
pub struct Args {
    method: String,
    values: Vec<Value>,
}

impl Args {
    pub fn new(method: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            values,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.values
    }

    /// 校验参数个数
    pub fn expect_len(&self, expected: usize) -> Result<(), BridgeError> {
        if self.values.len() != expected {
            return Err(BridgeError::Arity {
                method: self.method.clone(),
                expected,
                actual: self.values.len(),
            });
        }
        Ok(())
    }

    /// 按位置取原始值
    pub fn value(&self, index: usize) -> Result<&Value, BridgeError> {
        self.values.get(index).ok_or_else(|| BridgeError::Arity {
            method: self.method.clone(),
            expected: index + 1,
            actual: self.values.len(),
        })
    }

    /// 严格字符串参数，缺失值视为类型错误
    pub fn string(&self, index: usize) -> Result<String, BridgeError> {
        match self.value(index)? {
            Value::Str(s) => Ok(s.clone()),
            other => Err(self.type_error(index, "string", other)),
        }
    }

    /// 宽松字符串参数，缺失值和 null 按空字符串处理
    pub fn string_or_default(&self, index: usize) -> Result<String, BridgeError> {
        match self.value(index)? {
            Value::Absent | Value::Null => Ok(String::new()),
            Value::Str(s) => Ok(s.clone()),
            other => Err(self.type_error(index, "string", other)),
        }
    }

    pub fn int(&self, index: usize) -> Result<i64, BridgeError> {
        match self.value(index)? {
            Value::Int(i) => Ok(*i),
            other => Err(self.type_error(index, "integer", other)),
        }
    }

    pub fn float(&self, index: usize) -> Result<f64, BridgeError> {
        let value = self.value(index)?;
        value
            .as_f64()
            .ok_or_else(|| self.type_error(index, "number", value))
    }

    pub fn bool(&self, index: usize) -> Result<bool, BridgeError> {
        match self.value(index)? {
            Value::Bool(b) => Ok(*b),
            other => Err(self.type_error(index, "boolean", other)),
        }
    }

    pub fn time(&self, index: usize) -> Result<DateTime<Utc>, BridgeError> {
        let value = self.value(index)?;
        value
            .as_time()
            .ok_or_else(|| self.type_error(index, "time", value))
    }

    fn type_error(&self, index: usize, expected: &str, actual: &Value) -> BridgeError {
        BridgeError::ArgumentType {
            method: self.method.clone(),
            index: index + 1,
            expected: expected.to_string(),
            actual: actual.type_name().to_string(),
        }
    }
}
