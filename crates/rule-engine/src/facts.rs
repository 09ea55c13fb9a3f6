//! 事实表
//!
//! 每次执行独享一张事实表，把根符号映射到宿主原生对象或解析后的 JSON 树。
//! 执行开始后符号只增不减。

use crate::error::{Result, RuleError};
use crate::value::{NativeRef, Record};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// 事实值
#[derive(Debug, Clone)]
pub enum FactValue {
    /// 宿主原生对象
    Native(NativeRef),
    /// 动态树（JSON），对求值器只读
    Tree(Arc<serde_json::Value>),
}

/// 事实表
#[derive(Debug, Default)]
pub struct FactTable {
    facts: HashMap<String, FactValue>,
}

impl FactTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定宿主原生对象
    ///
    /// 宿主保留 `record` 的克隆即可在执行后读取结果。
    pub fn bind<T: Record + 'static>(
        &mut self,
        name: impl Into<String>,
        record: Arc<RwLock<T>>,
    ) -> Result<()> {
        self.bind_native(name, NativeRef::from_shared(record))
    }

    /// 绑定已有的原生对象句柄
    pub fn bind_native(&mut self, name: impl Into<String>, handle: NativeRef) -> Result<()> {
        self.insert(name.into(), FactValue::Native(handle))
    }

    /// 解析字节流为 JSON 树并绑定
    ///
    /// 解析失败时不会留下部分绑定。
    pub fn bind_tree(&mut self, name: impl Into<String>, bytes: &[u8]) -> Result<()> {
        let name = name.into();
        if self.facts.contains_key(&name) {
            return Err(RuleError::DuplicateSymbol(name));
        }

        let tree: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|source| RuleError::MalformedPayload {
                name: name.clone(),
                source,
            })?;

        self.insert(name, FactValue::Tree(Arc::new(tree)))
    }

    /// 绑定已解析的 JSON 树
    pub fn bind_json(&mut self, name: impl Into<String>, tree: serde_json::Value) -> Result<()> {
        self.insert(name.into(), FactValue::Tree(Arc::new(tree)))
    }

    fn insert(&mut self, name: String, value: FactValue) -> Result<()> {
        if self.facts.contains_key(&name) {
            return Err(RuleError::DuplicateSymbol(name));
        }

        debug!(symbol = %name, kind = value.kind(), "事实已绑定");
        self.facts.insert(name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FactValue> {
        self.facts.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.facts.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// 所有根符号（已排序）
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.facts.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl FactValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Native(_) => "native",
            Self::Tree(_) => "tree",
        }
    }
}
