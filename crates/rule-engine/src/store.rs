//! 知识库管理
//!
//! 使用 DashMap 按 (名称, 版本) 缓存编译后的知识库，供多个执行并发只读共享。

use crate::compiler::{KnowledgeBase, RuleCompiler};
use crate::error::{Result, RuleError};
use crate::models::KnowledgeBaseDefinition;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

type LibraryKey = (String, String);

/// 知识库仓库
#[derive(Clone)]
pub struct KnowledgeLibrary {
    /// 编译后的知识库缓存
    bases: Arc<DashMap<LibraryKey, Arc<KnowledgeBase>>>,
    /// 知识库编译器
    compiler: Arc<parking_lot::Mutex<RuleCompiler>>,
}

impl KnowledgeLibrary {
    pub fn new() -> Self {
        Self {
            bases: Arc::new(DashMap::new()),
            compiler: Arc::new(parking_lot::Mutex::new(RuleCompiler::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// 编译并加载知识库，同名同版本的旧知识库被替换
    ///
    /// 已取得旧知识库 `Arc` 的执行不受影响。
    #[instrument(skip(self, definition), fields(name = %definition.name, version = %definition.version))]
    pub fn load(&self, definition: KnowledgeBaseDefinition) -> Result<Arc<KnowledgeBase>> {
        let compiled = {
            let mut compiler = self.compiler.lock();
            compiler.compile(definition)?
        };

        Ok(self.insert(compiled))
    }

    /// 从 JSON 字符串加载知识库
    #[instrument(skip(self, json))]
    pub fn load_from_json(&self, json: &str) -> Result<Arc<KnowledgeBase>> {
        let compiled = {
            let mut compiler = self.compiler.lock();
            compiler.compile_from_json(json)?
        };

        Ok(self.insert(compiled))
    }

    fn insert(&self, compiled: KnowledgeBase) -> Arc<KnowledgeBase> {
        let key = (compiled.name().to_string(), compiled.version().to_string());
        let kb = Arc::new(compiled);

        if self.bases.insert(key, kb.clone()).is_some() {
            info!(
                "知识库已替换: {}@{} (编译版本 {})",
                kb.name(),
                kb.version(),
                kb.compile_version
            );
        } else {
            info!("知识库已加载: {}@{} ({} 条规则)", kb.name(), kb.version(), kb.len());
        }

        kb
    }

    /// 获取知识库
    pub fn get(&self, name: &str, version: &str) -> Result<Arc<KnowledgeBase>> {
        self.bases
            .get(&(name.to_string(), version.to_string()))
            .map(|kb| kb.value().clone())
            .ok_or_else(|| RuleError::KnowledgeBaseNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    pub fn contains(&self, name: &str, version: &str) -> bool {
        self.bases
            .contains_key(&(name.to_string(), version.to_string()))
    }

    /// 删除知识库
    #[instrument(skip(self))]
    pub fn remove(&self, name: &str, version: &str) -> Result<()> {
        if self
            .bases
            .remove(&(name.to_string(), version.to_string()))
            .is_some()
        {
            info!("知识库已删除: {}@{}", name, version);
            Ok(())
        } else {
            warn!("删除不存在的知识库: {}@{}", name, version);
            Err(RuleError::KnowledgeBaseNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
        }
    }

    /// 获取所有 (名称, 版本)，按名称和版本排序
    pub fn list(&self) -> Vec<(String, String)> {
        let mut keys: Vec<_> = self.bases.iter().map(|kb| kb.key().clone()).collect();
        keys.sort();
        keys
    }

    /// 清空所有知识库
    #[instrument(skip(self))]
    pub fn clear(&self) {
        let count = self.bases.len();
        self.bases.clear();
        info!("已清空 {} 个知识库", count);
    }

    /// 获取统计信息
    pub fn stats(&self) -> KnowledgeLibraryStats {
        let knowledge_bases = self.bases.len();
        let total_rules: usize = self.bases.iter().map(|kb| kb.len()).sum();

        KnowledgeLibraryStats {
            knowledge_bases,
            total_rules,
            avg_rules_per_base: if knowledge_bases > 0 {
                total_rules as f64 / knowledge_bases as f64
            } else {
                0.0
            },
        }
    }
}

impl Default for KnowledgeLibrary {
    fn default() -> Self {
        Self::new()
    }
}

/// 知识库仓库统计信息
#[derive(Debug, Clone)]
pub struct KnowledgeLibraryStats {
    pub knowledge_bases: usize,
    pub total_rules: usize,
    pub avg_rules_per_base: f64,
}
