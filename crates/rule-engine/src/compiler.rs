//! 知识库编译器
//!
//! 校验知识库定义，按优先级排序规则，并预提取规则引用的根事实符号。

use crate::error::{Result, RuleError};
use crate::models::{Action, Expr, KnowledgeBaseDefinition, Literal, PathExpr, Rule, Segment};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// 编译后的知识库
///
/// 编译后不可变，可通过 `Arc` 在多个执行间共享；撤回状态属于单次执行。
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    name: String,
    version: String,
    /// 按优先级降序排列，同优先级保持声明顺序
    rules: Vec<Rule>,
    index: HashMap<String, usize>,
    /// 规则条件与动作中引用的根符号
    required_facts: HashSet<String>,
    /// 编译版本号（用于缓存失效）
    pub compile_version: u64,
    pub compiled_at: DateTime<Utc>,
}

impl KnowledgeBase {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// 评估顺序的规则列表
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.index.get(name).map(|&i| &self.rules[i])
    }

    pub fn contains_rule(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn required_facts(&self) -> &HashSet<String> {
        &self.required_facts
    }
}

/// 知识库编译器
pub struct RuleCompiler {
    compile_version: u64,
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self { compile_version: 0 }
    }

    /// 从 JSON 字符串编译知识库
    pub fn compile_from_json(&mut self, json: &str) -> Result<KnowledgeBase> {
        let definition: KnowledgeBaseDefinition = serde_json::from_str(json)?;
        self.compile(definition)
    }

    /// 编译知识库
    pub fn compile(&mut self, definition: KnowledgeBaseDefinition) -> Result<KnowledgeBase> {
        self.validate(&definition)?;

        let KnowledgeBaseDefinition {
            name,
            version,
            mut rules,
        } = definition;

        // 稳定排序，同优先级保持声明顺序
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let index = rules
            .iter()
            .enumerate()
            .map(|(i, rule)| (rule.name.clone(), i))
            .collect::<HashMap<_, _>>();

        let mut required_facts = HashSet::new();
        for rule in &rules {
            collect_roots(&rule.when, &mut required_facts);
            for action in &rule.then {
                match action {
                    Action::Assign { target, value } => {
                        collect_path_roots(target, &mut required_facts);
                        collect_roots(value, &mut required_facts);
                    }
                    Action::Call { call } => collect_roots(call, &mut required_facts),
                }
            }
        }

        for rule in &rules {
            for target in retract_targets(rule) {
                if !index.contains_key(target) {
                    warn!(
                        knowledge_base = %name,
                        rule = %rule.name,
                        target = %target,
                        "Retract 引用了不存在的规则，执行时将忽略"
                    );
                }
            }
        }

        self.compile_version += 1;
        debug!(
            knowledge_base = %name,
            version = %version,
            rules = rules.len(),
            compile_version = self.compile_version,
            "知识库编译完成"
        );

        Ok(KnowledgeBase {
            name,
            version,
            rules,
            index,
            required_facts,
            compile_version: self.compile_version,
            compiled_at: Utc::now(),
        })
    }

    /// 验证知识库结构
    fn validate(&self, definition: &KnowledgeBaseDefinition) -> Result<()> {
        if definition.name.is_empty() {
            return Err(RuleError::CompileError("知识库名称不能为空".to_string()));
        }

        if definition.version.is_empty() {
            return Err(RuleError::CompileError("知识库版本不能为空".to_string()));
        }

        let mut seen = HashSet::new();
        for rule in &definition.rules {
            if rule.name.is_empty() {
                return Err(RuleError::CompileError("规则名称不能为空".to_string()));
            }
            if !seen.insert(rule.name.as_str()) {
                return Err(RuleError::CompileError(format!(
                    "规则名称重复: {}",
                    rule.name
                )));
            }
            self.validate_actions(rule)?;
        }

        Ok(())
    }

    fn validate_actions(&self, rule: &Rule) -> Result<()> {
        for action in &rule.then {
            if let Action::Assign { target, .. } = action {
                if !matches!(target.segments.last(), Some(Segment::Field { .. })) {
                    return Err(RuleError::CompileError(format!(
                        "规则 '{}' 的赋值目标 '{}' 必须以字段结尾",
                        rule.name, target
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new()
    }
}

/// 规则动作中以字面量调用 `Retract` 的目标名称
fn retract_targets(rule: &Rule) -> impl Iterator<Item = &str> {
    rule.then.iter().filter_map(|action| match action {
        Action::Call {
            call: Expr::Call { function, args },
        } if function == "Retract" => match args.as_slice() {
            [Expr::Literal {
                value: Literal::Str(name),
            }] => Some(name.as_str()),
            _ => None,
        },
        _ => None,
    })
}

/// 递归收集表达式引用的根符号
fn collect_roots(expr: &Expr, roots: &mut HashSet<String>) {
    match expr {
        Expr::Literal { .. } => {}
        Expr::Path(path) => collect_path_roots(path, roots),
        Expr::Unary { operand, .. } => collect_roots(operand, roots),
        Expr::Binary { left, right, .. } => {
            collect_roots(left, roots);
            collect_roots(right, roots);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_roots(arg, roots);
            }
        }
    }
}

fn collect_path_roots(path: &PathExpr, roots: &mut HashSet<String>) {
    roots.insert(path.root.clone());
    for segment in &path.segments {
        match segment {
            Segment::Field { .. } => {}
            Segment::Index { index } => collect_roots(index, roots),
            Segment::Method { args, .. } => {
                for arg in args {
                    collect_roots(arg, roots);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_kb_json() -> &'static str {
        r#"
        {
            "name": "Tutorial",
            "version": "0.1.1",
            "rules": [
                {
                    "name": "Low",
                    "when": {"type": "literal", "value": true},
                    "then": []
                },
                {
                    "name": "High",
                    "priority": 10,
                    "when": {
                        "type": "binary",
                        "op": "eq",
                        "left": {"type": "path", "root": "inputs", "segments": [
                            {"kind": "field", "name": "name"},
                            {"kind": "field", "name": "first"}
                        ]},
                        "right": {"type": "literal", "value": "john"}
                    },
                    "then": [
                        {
                            "type": "assign",
                            "target": {"root": "R", "segments": [{"kind": "field", "name": "Result"}]},
                            "value": {"type": "literal", "value": "ok"}
                        }
                    ]
                },
                {
                    "name": "AlsoLow",
                    "when": {"type": "literal", "value": false}
                }
            ]
        }
        "#
    }

    #[test]
    fn test_compile_from_json() {
        let mut compiler = RuleCompiler::new();
        let kb = compiler.compile_from_json(sample_kb_json()).unwrap();

        assert_eq!(kb.name(), "Tutorial");
        assert_eq!(kb.version(), "0.1.1");
        assert_eq!(kb.len(), 3);
        assert!(kb.contains_rule("High"));
        assert_eq!(kb.rule("High").unwrap().priority, 10);

        let required: Vec<_> = {
            let mut v: Vec<_> = kb.required_facts().iter().cloned().collect();
            v.sort();
            v
        };
        assert_eq!(required, vec!["R".to_string(), "inputs".to_string()]);
    }

    #[test]
    fn test_priority_order_is_stable() {
        let mut compiler = RuleCompiler::new();
        let kb = compiler.compile_from_json(sample_kb_json()).unwrap();

        let order: Vec<_> = kb.rules().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(order, vec!["High", "Low", "AlsoLow"]);
    }

    #[test]
    fn test_compile_version() {
        let mut compiler = RuleCompiler::new();

        let kb1 = compiler.compile_from_json(sample_kb_json()).unwrap();
        let kb2 = compiler.compile_from_json(sample_kb_json()).unwrap();

        assert_eq!(kb1.compile_version, 1);
        assert_eq!(kb2.compile_version, 2);
    }

    #[test]
    fn test_validate_empty_name() {
        let mut compiler = RuleCompiler::new();
        let result = compiler.compile(KnowledgeBaseDefinition::new("", "1.0"));
        assert!(result.unwrap_err().to_string().contains("知识库名称不能为空"));
    }

    #[test]
    fn test_validate_duplicate_rule() {
        let mut compiler = RuleCompiler::new();
        let definition = KnowledgeBaseDefinition::new("kb", "1.0")
            .with_rule(Rule::new("A", Expr::lit(true)))
            .with_rule(Rule::new("A", Expr::lit(false)));

        let err = compiler.compile(definition).unwrap_err();
        assert!(matches!(err, RuleError::CompileError(_)));
        assert!(err.to_string().contains("规则名称重复"));
    }

    #[test]
    fn test_validate_assign_target() {
        let mut compiler = RuleCompiler::new();
        let definition = KnowledgeBaseDefinition::new("kb", "1.0").with_rule(
            Rule::new("A", Expr::lit(true)).then(Action::Assign {
                target: PathExpr::new("R"),
                value: Expr::lit(1),
            }),
        );

        let err = compiler.compile(definition).unwrap_err();
        assert!(err.to_string().contains("必须以字段结尾"));
    }

    #[test]
    fn test_unknown_retract_target_is_not_an_error() {
        let mut compiler = RuleCompiler::new();
        let definition = KnowledgeBaseDefinition::new("kb", "1.0")
            .with_rule(Rule::new("A", Expr::lit(true)).then(Action::retract("Nope")));

        assert!(compiler.compile(definition).is_ok());
    }

    #[test]
    fn test_invalid_json() {
        let mut compiler = RuleCompiler::new();
        let err = compiler.compile_from_json("{not json").unwrap_err();
        assert!(matches!(err, RuleError::JsonError(_)));
    }
}
