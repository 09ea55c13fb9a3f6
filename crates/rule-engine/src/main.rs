//! 规则引擎命令行
//!
//! 用法：`rule-engine <knowledge-base.json> [name=facts.json ...]`
//!
//! 编译知识库，把每个 `name=path` 绑定为 JSON 事实，执行到静止后
//! 把执行报告以 JSON 输出到 stdout。

use anyhow::{Context, Result, bail};
use engine_shared::config::AppConfig;
use engine_shared::observability;
use rule_engine::{FactTable, KnowledgeLibrary, RuleExecutor};
use std::path::PathBuf;
use tracing::{debug, info};

const SERVICE_NAME: &str = "rule-engine";

/// 命令行参数
struct CliArgs {
    knowledge_base: PathBuf,
    facts: Vec<(String, PathBuf)>,
}

impl CliArgs {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let Some(knowledge_base) = args.next() else {
            bail!("用法: {} <knowledge-base.json> [name=facts.json ...]", SERVICE_NAME);
        };

        let facts = args
            .map(|arg| {
                let (name, path) = arg
                    .split_once('=')
                    .with_context(|| format!("事实参数格式应为 name=path: {}", arg))?;
                if name.is_empty() {
                    bail!("事实名称不能为空: {}", arg);
                }
                Ok((name.to_string(), PathBuf::from(path)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            knowledge_base: PathBuf::from(knowledge_base),
            facts,
        })
    }
}

fn main() -> Result<()> {
    // 从 config/{service_name}.toml 和 RULE_ENGINE_* 环境变量加载
    let config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let guard = observability::init(&config.service_name, &config.observability)?;

    let args = CliArgs::parse(std::env::args().skip(1))?;

    let library = KnowledgeLibrary::new();
    let json = std::fs::read_to_string(&args.knowledge_base)
        .with_context(|| format!("读取知识库失败: {}", args.knowledge_base.display()))?;
    let kb = library.load_from_json(&json)?;

    let mut facts = FactTable::new();
    for (name, path) in &args.facts {
        let bytes = std::fs::read(path)
            .with_context(|| format!("读取事实文件失败: {}", path.display()))?;
        facts.bind_tree(name.as_str(), &bytes)?;
    }

    for missing in kb
        .required_facts()
        .iter()
        .filter(|name| !facts.contains(name))
    {
        info!(symbol = %missing, "知识库引用的事实未绑定");
    }

    let executor = RuleExecutor::with_config(config.engine.clone());
    let report = executor.execute(&facts, &kb)?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if guard.metrics_enabled() {
        if let Some(snapshot) = observability::metrics::render() {
            debug!("metrics snapshot:\n{}", snapshot);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> impl Iterator<Item = String> {
        values
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn test_parse_args() {
        let cli = CliArgs::parse(args(&["kb.json", "inputs=in.json", "R=r.json"])).unwrap();
        assert_eq!(cli.knowledge_base, PathBuf::from("kb.json"));
        assert_eq!(cli.facts.len(), 2);
        assert_eq!(cli.facts[0].0, "inputs");
        assert_eq!(cli.facts[1].1, PathBuf::from("r.json"));
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(CliArgs::parse(args(&[])).is_err());
        assert!(CliArgs::parse(args(&["kb.json", "no-separator"])).is_err());
        assert!(CliArgs::parse(args(&["kb.json", "=x.json"])).is_err());
    }
}
