//! 规则执行器
//!
//! 前向链式执行循环：按优先级逐轮扫描知识库，触发条件成立的规则，
//! 直到某一轮没有规则触发（静止）或超过最大轮数。

use crate::compiler::KnowledgeBase;
use crate::error::{EvalErrorKind, Result, RuleError};
use crate::evaluator::{Directive, Evaluator};
use crate::facts::FactTable;
use crate::models::Rule;
use engine_shared::observability::metrics as engine_metrics;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub use engine_shared::config::EngineConfig;

/// 执行过程回调
///
/// 所有方法都有空实现，按需覆盖。
#[cfg_attr(test, mockall::automock)]
pub trait ExecutionListener: Send + Sync {
    /// 开始第 `cycle` 轮扫描（从 1 开始）
    fn on_cycle_start(&self, _knowledge_base: &str, _cycle: u64) {}

    fn on_rule_evaluated(&self, _rule: &str, _matched: bool) {}

    fn on_rule_fired(&self, _rule: &str) {}

    fn on_rule_retracted(&self, _rule: &str) {}
}

/// 执行报告
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub knowledge_base: String,
    pub version: String,
    /// 实际执行的扫描轮数（含最后一轮无触发的扫描）
    pub cycles: u64,
    /// 按触发顺序记录的规则名称
    pub fired: Vec<String>,
    /// 本次执行中被撤回的规则
    pub retracted: Vec<String>,
    /// 是否通过 Complete() 提前结束
    pub completed: bool,
    /// 评估追踪（仅在启用追踪时记录）
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,
    pub evaluation_time_ms: u64,
}

impl ExecutionReport {
    fn new(kb: &KnowledgeBase) -> Self {
        Self {
            execution_id: Uuid::now_v7(),
            knowledge_base: kb.name().to_string(),
            version: kb.version().to_string(),
            cycles: 0,
            fired: Vec::new(),
            retracted: Vec::new(),
            completed: false,
            trace: Vec::new(),
            evaluation_time_ms: 0,
        }
    }

    /// 规则被触发的次数
    pub fn fired_count(&self, rule: &str) -> usize {
        self.fired.iter().filter(|name| name.as_str() == rule).count()
    }
}

/// 单次执行的状态，撤回集合不跨执行共享
struct ExecutionState {
    retracted: HashSet<String>,
    completed: bool,
}

/// 规则执行器
pub struct RuleExecutor {
    config: EngineConfig,
    listeners: Vec<Arc<dyn ExecutionListener>>,
}

impl RuleExecutor {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            listeners: Vec::new(),
        }
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.config.trace_enabled = true;
        self
    }

    pub fn with_max_cycles(mut self, max_cycles: u64) -> Self {
        self.config.max_cycles = max_cycles;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 执行知识库直到静止
    ///
    /// 失败时事实表保留出错前已执行语句的修改。
    #[instrument(skip_all, fields(knowledge_base = %kb.name(), version = %kb.version()))]
    pub fn execute(&self, facts: &FactTable, kb: &KnowledgeBase) -> Result<ExecutionReport> {
        let start = Instant::now();
        let mut report = ExecutionReport::new(kb);

        let outcome = self.run(facts, kb, start, &mut report);

        let elapsed = start.elapsed();
        report.evaluation_time_ms = elapsed.as_millis() as u64;

        match outcome {
            Ok(()) => {
                engine_metrics::record_execution(
                    kb.name(),
                    "success",
                    report.cycles,
                    elapsed.as_secs_f64(),
                );
                info!(
                    execution_id = %report.execution_id,
                    cycles = report.cycles,
                    fired = report.fired.len(),
                    completed = report.completed,
                    elapsed_ms = report.evaluation_time_ms,
                    "规则执行完成"
                );
                Ok(report)
            }
            Err(e) => {
                engine_metrics::record_execution(
                    kb.name(),
                    "error",
                    report.cycles,
                    elapsed.as_secs_f64(),
                );
                engine_metrics::record_execution_error(kb.name(), error_label(&e));
                warn!(
                    execution_id = %report.execution_id,
                    cycles = report.cycles,
                    error = %e,
                    "规则执行失败"
                );
                Err(e)
            }
        }
    }

    fn run(
        &self,
        facts: &FactTable,
        kb: &KnowledgeBase,
        start: Instant,
        report: &mut ExecutionReport,
    ) -> Result<()> {
        let evaluator = Evaluator::new(facts);
        let mut state = ExecutionState {
            retracted: HashSet::new(),
            completed: false,
        };

        loop {
            if report.cycles >= self.config.max_cycles {
                return Err(RuleError::CycleLimitExceeded {
                    max_cycles: self.config.max_cycles,
                });
            }

            if let Some(timeout_ms) = self.config.timeout_ms {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                if elapsed_ms >= timeout_ms {
                    return Err(RuleError::Timeout {
                        elapsed_ms,
                        timeout_ms,
                    });
                }
            }

            report.cycles += 1;
            for listener in &self.listeners {
                listener.on_cycle_start(kb.name(), report.cycles);
            }

            let fired = self.scan(&evaluator, kb, &mut state, report)?;

            if state.completed {
                report.completed = true;
                debug!(cycle = report.cycles, "Complete() 结束执行");
                return Ok(());
            }

            if fired == 0 {
                debug!(cycle = report.cycles, "没有规则触发，执行静止");
                return Ok(());
            }
        }
    }

    /// 一轮扫描，返回触发的规则数
    fn scan(
        &self,
        evaluator: &Evaluator<'_>,
        kb: &KnowledgeBase,
        state: &mut ExecutionState,
        report: &mut ExecutionReport,
    ) -> Result<usize> {
        let mut fired = 0;

        for rule in kb.rules() {
            // 撤回在到达规则时检查，本轮早先的撤回对后续规则立即生效
            if state.retracted.contains(&rule.name) {
                continue;
            }

            let matched = evaluator
                .evaluate_condition(&rule.when)
                .map_err(|source| RuleError::Evaluation {
                    rule: rule.name.clone(),
                    source,
                })?;

            debug!(rule = %rule.name, matched, "规则条件已评估");
            if self.config.trace_enabled {
                report.trace.push(format!(
                    "cycle {}: {} [{}] => {}",
                    report.cycles,
                    rule.name,
                    rule.when,
                    if matched { "MATCHED" } else { "NOT_MATCHED" }
                ));
            }
            for listener in &self.listeners {
                listener.on_rule_evaluated(&rule.name, matched);
            }

            if !matched {
                continue;
            }

            self.fire(evaluator, kb, rule, state, report)?;
            fired += 1;

            if state.completed {
                break;
            }
        }

        Ok(fired)
    }

    /// 依次执行规则动作
    fn fire(
        &self,
        evaluator: &Evaluator<'_>,
        kb: &KnowledgeBase,
        rule: &Rule,
        state: &mut ExecutionState,
        report: &mut ExecutionReport,
    ) -> Result<()> {
        report.fired.push(rule.name.clone());
        engine_metrics::record_rule_fired(kb.name(), &rule.name);
        for listener in &self.listeners {
            listener.on_rule_fired(&rule.name);
        }

        for action in &rule.then {
            let directive = evaluator
                .execute_action(action)
                .map_err(|source| RuleError::Evaluation {
                    rule: rule.name.clone(),
                    source,
                })?;

            if self.config.trace_enabled {
                report
                    .trace
                    .push(format!("cycle {}: {} -> {}", report.cycles, rule.name, action));
            }

            match directive {
                Some(Directive::Retract(name)) => self.retract(kb, name, state, report),
                Some(Directive::Complete) => state.completed = true,
                None => {}
            }
        }

        Ok(())
    }

    fn retract(
        &self,
        kb: &KnowledgeBase,
        name: String,
        state: &mut ExecutionState,
        report: &mut ExecutionReport,
    ) {
        if !kb.contains_rule(&name) {
            debug!(rule = %name, "撤回未知规则，忽略");
            return;
        }

        if state.retracted.insert(name.clone()) {
            for listener in &self.listeners {
                listener.on_rule_retracted(&name);
            }
            report.retracted.push(name);
        }
    }

    /// 单轮无副作用扫描，按评估顺序返回条件成立的规则名称
    ///
    /// 不执行动作，也不考虑撤回。
    pub fn matching_rules(&self, facts: &FactTable, kb: &KnowledgeBase) -> Result<Vec<String>> {
        let evaluator = Evaluator::new(facts);
        let mut matched = Vec::new();

        for rule in kb.rules() {
            let is_match = evaluator
                .evaluate_condition(&rule.when)
                .map_err(|source| RuleError::Evaluation {
                    rule: rule.name.clone(),
                    source,
                })?;
            if is_match {
                matched.push(rule.name.clone());
            }
        }

        Ok(matched)
    }
}

impl Default for RuleExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// 以指定最大轮数执行知识库
pub fn execute(facts: &FactTable, kb: &KnowledgeBase, max_cycles: u64) -> Result<ExecutionReport> {
    RuleExecutor::new()
        .with_max_cycles(max_cycles)
        .execute(facts, kb)
}

fn error_label(err: &RuleError) -> &'static str {
    match err {
        RuleError::Evaluation { source, .. } => match source.kind {
            EvalErrorKind::UnknownSymbol => "UnknownSymbol",
            EvalErrorKind::Invocation => "InvocationError",
            EvalErrorKind::TypeMismatch => "TypeMismatch",
            EvalErrorKind::Arithmetic => "ArithmeticError",
        },
        RuleError::CycleLimitExceeded { .. } => "CycleLimitExceeded",
        RuleError::Timeout { .. } => "Timeout",
        _ => "Other",
    }
}
