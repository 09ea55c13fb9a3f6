//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "RULE_ENGINE";

/// 规则引擎执行配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 单次执行允许的最大扫描轮数
    pub max_cycles: u64,
    /// 执行截止时间（毫秒），仅在两轮扫描之间检查
    pub timeout_ms: Option<u64>,
    /// 是否记录详细评估追踪
    pub trace_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cycles: 5000,
            timeout_ms: None,
            trace_enabled: false,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
        }
    }
}

impl ObservabilityConfig {
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub engine: EngineConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（RULE_ENGINE_ 前缀，层级用双下划线分隔，
    ///    如 RULE_ENGINE_ENGINE__MAX_CYCLES -> engine.max_cycles）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
        Self::load_from(service_name, Path::new(&config_dir))
    }

    /// 从指定目录加载配置
    pub fn load_from(service_name: &str, config_dir: &Path) -> Result<Self, ConfigError> {
        let env = std::env::var(format!("{}_ENV", ENV_PREFIX))
            .unwrap_or_else(|_| "development".to_string());

        let builder = Config::builder()
            // 默认配置
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            // 加载默认配置文件
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // 加载环境特定配置
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            // 加载服务特定配置
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            // 环境变量覆盖
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.engine.max_cycles, 5000);
        assert_eq!(config.engine.timeout_ms, None);
        assert!(!config.engine.trace_enabled);
        assert_eq!(config.observability.log_level, "info");
        assert!(!config.observability.json_logs());
    }

    #[test]
    fn test_load_without_files() {
        let dir = std::env::temp_dir().join("rule-engine-config-missing");
        let config = AppConfig::load_from("rule-engine", &dir).unwrap();
        assert_eq!(config.service_name, "rule-engine");
        assert_eq!(config.engine.max_cycles, 5000);
    }

    #[test]
    fn test_load_service_file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!(
            "rule-engine-config-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("cycle-test.toml"),
            "[engine]\nmax_cycles = 42\ntimeout_ms = 250\n\n[observability]\nlog_format = \"json\"\n",
        )
        .unwrap();

        let config = AppConfig::load_from("cycle-test", &dir).unwrap();
        assert_eq!(config.engine.max_cycles, 42);
        assert_eq!(config.engine.timeout_ms, Some(250));
        assert!(!config.engine.trace_enabled);
        assert!(config.observability.json_logs());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_engine_config_partial_deserialize() {
        let config: EngineConfig = serde_json::from_str(r#"{"trace_enabled": true}"#).unwrap();
        assert_eq!(config.max_cycles, 5000);
        assert!(config.trace_enabled);
    }
}
