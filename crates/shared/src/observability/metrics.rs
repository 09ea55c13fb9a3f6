//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集。
//! 命令行入口不常驻，不启动 HTTP 端点，通过 [`render`] 获取指标快照。

use anyhow::Result;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;
use std::sync::OnceLock;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 串行化 recorder 安装，检查与安装之间不能被其他线程插入
static INSTALL_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// 安装 Prometheus recorder，重复或并发调用均为空操作
pub fn init(service_name: &str) -> Result<()> {
    let _guard = INSTALL_LOCK.lock();
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle);

    register_common_metrics(service_name);
    Ok(())
}

/// 注册规则引擎指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "rule_engine_executions_total",
        "Total number of knowledge base executions"
    );
    metrics::describe_histogram!(
        "rule_engine_execution_duration_seconds",
        "Knowledge base execution duration in seconds"
    );
    metrics::describe_counter!("rule_engine_rules_fired_total", "Total number of rule firings");
    metrics::describe_counter!(
        "rule_engine_execution_errors_total",
        "Total number of failed executions"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// 渲染当前指标快照（未安装 recorder 时返回 None）
pub fn render() -> Option<String> {
    get_handle().map(|handle| handle.render())
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次知识库执行
#[inline]
pub fn record_execution(knowledge_base: &str, status: &str, cycles: u64, duration_secs: f64) {
    metrics::counter!(
        "rule_engine_executions_total",
        "knowledge_base" => knowledge_base.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "rule_engine_execution_duration_seconds",
        "knowledge_base" => knowledge_base.to_string()
    )
    .record(duration_secs);

    metrics::histogram!(
        "rule_engine_execution_cycles",
        "knowledge_base" => knowledge_base.to_string()
    )
    .record(cycles as f64);
}

/// 记录规则触发
#[inline]
pub fn record_rule_fired(knowledge_base: &str, rule: &str) {
    metrics::counter!(
        "rule_engine_rules_fired_total",
        "knowledge_base" => knowledge_base.to_string(),
        "rule" => rule.to_string()
    )
    .increment(1);
}

/// 记录执行失败
#[inline]
pub fn record_execution_error(knowledge_base: &str, kind: &str) {
    metrics::counter!(
        "rule_engine_execution_errors_total",
        "knowledge_base" => knowledge_base.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_execution("kb", "success", 2, 0.01);
        record_rule_fired("kb", "TestRule");
        record_execution_error("kb", "CycleLimitExceeded");
    }

    #[test]
    fn test_render_requires_recorder() {
        if get_handle().is_none() {
            assert!(render().is_none());
        }
    }
}
