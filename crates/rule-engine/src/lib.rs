//! 前向链式规则引擎
//!
//! 提供规则求值与执行能力，支持：
//! - 宿主原生对象与 JSON 树统一寻址的事实表
//! - 缺失数据容忍的表达式求值
//! - 带撤回与轮数上限的前向链式执行循环
//! - 知识库编译和缓存

pub mod compiler;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod facts;
mod functions;
pub mod models;
pub mod operators;
mod resolver;
pub mod store;
pub mod value;

pub use compiler::{KnowledgeBase, RuleCompiler};
pub use error::{BridgeError, EvalError, EvalErrorKind, Result, RuleError};
pub use evaluator::{Directive, Evaluator};
pub use executor::{EngineConfig, ExecutionListener, ExecutionReport, RuleExecutor, execute};
pub use facts::{FactTable, FactValue};
pub use models::{Action, Expr, KnowledgeBaseDefinition, Literal, PathExpr, Rule, Segment};
pub use operators::{BinaryOperator, UnaryOperator};
pub use store::{KnowledgeLibrary, KnowledgeLibraryStats};
pub use value::{Args, NativeRef, Record, Value};
