//! 可观测性模块集成测试
//!
//! 安装 Prometheus recorder 后验证引擎指标能被渲染。

use engine_shared::observability::metrics::{
    get_handle, init, record_execution, record_execution_error, record_rule_fired, render,
};

#[test]
fn test_metrics_rendered_after_init() {
    init("rule-engine-test").unwrap();
    // 重复初始化是幂等的
    init("rule-engine-test").unwrap();
    assert!(get_handle().is_some());

    record_execution("Test", "success", 2, 0.002);
    record_rule_fired("Test", "TestRule");
    record_execution_error("Test", "CycleLimitExceeded");

    let snapshot = render().unwrap();
    assert!(snapshot.contains("rule_engine_executions_total"));
    assert!(snapshot.contains("rule_engine_rules_fired_total"));
    assert!(snapshot.contains("rule_engine_execution_errors_total"));
    assert!(snapshot.contains("TestRule"));
}

#[test]
fn test_concurrent_init_is_noop() {
    let handles: Vec<_> = (0..8)
        .map(|_| std::thread::spawn(|| init("rule-engine-test")))
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }
    assert!(get_handle().is_some());
}
