//! 路径解析
//!
//! 按路径段逐步解析根符号，统一处理原生对象和 JSON 树。
//! 缺失键、null 节点、越界下标都产生 [`Value::Absent`]，之后的路径段继续产生 Absent，
//! 不会报错；只有在缺失值上调用方法才是 `InvocationError`。

use crate::error::EvalError;
use crate::evaluator::Evaluator;
use crate::facts::FactValue;
use crate::functions;
use crate::models::{PathExpr, Segment};
use crate::value::{Args, NativeRef, Value};
use serde_json::Value as Json;

/// 解析游标：尽量借用 JSON 树节点，避免复制整棵子树
enum Cursor<'t> {
    Node(&'t Json),
    Owned(Value),
}

impl Cursor<'_> {
    fn into_value(self) -> Value {
        match self {
            Self::Node(node) => Value::from_json(node),
            Self::Owned(value) => value,
        }
    }

    fn absent() -> Self {
        Self::Owned(Value::Absent)
    }
}

impl<'a> Evaluator<'a> {
    /// 解析完整路径
    pub fn resolve_path(&self, path: &PathExpr) -> Result<Value, EvalError> {
        self.resolve_prefix(path, path.segments.len())
            .map(Cursor::into_value)
    }

    /// 解析根符号和前 `count` 个路径段
    fn resolve_prefix(&self, path: &PathExpr, count: usize) -> Result<Cursor<'a>, EvalError> {
        let root = self.facts.get(&path.root).ok_or_else(|| {
            EvalError::unknown_symbol(path.root.as_str(), format!("未绑定的事实: {}", path.root))
        })?;

        let mut cursor = match root {
            FactValue::Native(handle) => Cursor::Owned(Value::Record(handle.clone())),
            FactValue::Tree(tree) => Cursor::Node(tree.as_ref()),
        };

        for (i, segment) in path.segments.iter().take(count).enumerate() {
            cursor = self.step(cursor, segment, path, i)?;
        }

        Ok(cursor)
    }

    fn step(
        &self,
        cursor: Cursor<'a>,
        segment: &Segment,
        path: &PathExpr,
        position: usize,
    ) -> Result<Cursor<'a>, EvalError> {
        match segment {
            Segment::Field { name } => self.step_field(cursor, name, path, position),
            Segment::Index { index } => {
                let key = self.evaluate(index)?;
                self.step_index(cursor, key, path, position)
            }
            Segment::Method { name, args } => {
                // 参数先于接收者加锁求值，参数本身可以是 Absent
                let args = args
                    .iter()
                    .map(|arg| self.evaluate(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.step_method(cursor, name, args, path, position)
            }
        }
    }

    fn step_field(
        &self,
        cursor: Cursor<'a>,
        name: &str,
        path: &PathExpr,
        position: usize,
    ) -> Result<Cursor<'a>, EvalError> {
        match cursor {
            Cursor::Node(Json::Object(map)) => {
                Ok(map.get(name).map(Cursor::Node).unwrap_or_else(Cursor::absent))
            }
            Cursor::Node(Json::Array(items)) => Ok(name
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .map(Cursor::Node)
                .unwrap_or_else(Cursor::absent)),
            Cursor::Node(_) => Ok(Cursor::absent()),
            Cursor::Owned(Value::Record(handle)) => handle
                .read_field(name)
                .map(Cursor::Owned)
                .map_err(|e| EvalError::from_bridge(path.prefix(position + 1).to_string(), e)),
            Cursor::Owned(Value::Map(mut map)) => {
                Ok(map.remove(name).map(Cursor::Owned).unwrap_or_else(Cursor::absent))
            }
            Cursor::Owned(Value::List(mut items)) => {
                match name.parse::<usize>().ok().filter(|i| *i < items.len()) {
                    Some(i) => Ok(Cursor::Owned(items.swap_remove(i))),
                    None => Ok(Cursor::absent()),
                }
            }
            Cursor::Owned(_) => Ok(Cursor::absent()),
        }
    }

    fn step_index(
        &self,
        cursor: Cursor<'a>,
        key: Value,
        path: &PathExpr,
        position: usize,
    ) -> Result<Cursor<'a>, EvalError> {
        if key.is_absent() {
            return Ok(Cursor::absent());
        }

        let mismatch = |expected: &str| {
            EvalError::type_mismatch(
                path.prefix(position + 1).to_string(),
                expected,
                key.type_name(),
            )
        };

        match cursor {
            Cursor::Node(Json::Array(items)) => {
                let index = key.as_i64().ok_or_else(|| mismatch("integer"))?;
                Ok(usize::try_from(index)
                    .ok()
                    .and_then(|i| items.get(i))
                    .map(Cursor::Node)
                    .unwrap_or_else(Cursor::absent))
            }
            Cursor::Node(Json::Object(map)) => {
                let name = key.as_str().ok_or_else(|| mismatch("string"))?;
                Ok(map.get(name).map(Cursor::Node).unwrap_or_else(Cursor::absent))
            }
            Cursor::Node(_) => Ok(Cursor::absent()),
            Cursor::Owned(Value::List(mut items)) => {
                let index = key.as_i64().ok_or_else(|| mismatch("integer"))?;
                match usize::try_from(index).ok().filter(|i| *i < items.len()) {
                    Some(i) => Ok(Cursor::Owned(items.swap_remove(i))),
                    None => Ok(Cursor::absent()),
                }
            }
            Cursor::Owned(Value::Map(mut map)) => {
                let name = key.as_str().ok_or_else(|| mismatch("string"))?;
                Ok(map.remove(name).map(Cursor::Owned).unwrap_or_else(Cursor::absent))
            }
            Cursor::Owned(Value::Record(handle)) => {
                let name = key.as_str().ok_or_else(|| mismatch("string"))?;
                handle
                    .read_field(name)
                    .map(Cursor::Owned)
                    .map_err(|e| EvalError::from_bridge(path.prefix(position + 1).to_string(), e))
            }
            Cursor::Owned(_) => Ok(Cursor::absent()),
        }
    }

    fn step_method(
        &self,
        cursor: Cursor<'a>,
        name: &str,
        args: Vec<Value>,
        path: &PathExpr,
        position: usize,
    ) -> Result<Cursor<'a>, EvalError> {
        let receiver = cursor.into_value();
        let location = || path.prefix(position + 1).to_string();

        if self.null_safe && args.iter().any(|arg| matches!(arg, Value::Absent)) {
            return Ok(Cursor::absent());
        }

        match receiver {
            Value::Absent | Value::Null if self.null_safe => Ok(Cursor::absent()),
            Value::Absent | Value::Null => Err(EvalError::invocation(
                location(),
                format!("无法在缺失值上调用方法 {}", name),
            )),
            Value::Record(handle) => handle
                .invoke(name, Args::new(name, args))
                .map(Cursor::Owned)
                .map_err(|e| EvalError::from_bridge(location(), e)),
            other => functions::call_value_method(&other, name, Args::new(name, args))
                .map(Cursor::Owned)
                .map_err(|e| EvalError::from_bridge(location(), e)),
        }
    }

    /// 解析赋值目标，返回目标原生对象和字段名
    ///
    /// 动态事实只读；路径中途遇到缺失值时无法赋值。
    pub(crate) fn resolve_assign_target<'p>(
        &self,
        target: &'p PathExpr,
    ) -> Result<(NativeRef, &'p str), EvalError> {
        let Some((last, _)) = target.segments.split_last() else {
            return Err(EvalError::invocation(
                target.to_string(),
                "不能对根符号赋值",
            ));
        };

        let Segment::Field { name } = last else {
            return Err(EvalError::invocation(
                target.to_string(),
                "赋值目标必须是字段",
            ));
        };

        if let Some(FactValue::Tree(_)) = self.facts.get(&target.root) {
            return Err(EvalError::invocation(
                target.to_string(),
                format!("动态事实 {} 只读", target.root),
            ));
        }

        let owner = self
            .resolve_prefix(target, target.segments.len() - 1)?
            .into_value();

        match owner {
            Value::Record(handle) => Ok((handle, name.as_str())),
            Value::Absent | Value::Null => Err(EvalError::invocation(
                target.to_string(),
                "赋值路径经过缺失值",
            )),
            other => Err(EvalError::invocation(
                target.to_string(),
                format!("无法对 {} 类型的字段赋值", other.type_name()),
            )),
        }
    }
}
