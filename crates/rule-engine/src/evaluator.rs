//! 表达式求值器
//!
//! 在事实表上求值条件树和动作语句。缺失值（[`Value::Absent`]）的处理规则：
//!
//! - `==` 任一侧缺失为 false，`!=` 任一侧缺失为 true
//! - 有序比较和算术遇到缺失值报 `TypeMismatch`
//! - `&&` / `||` 把缺失值和 null 视为假
//! - `IsNil` / `IsZero` 对任意路径都不报 `InvocationError`

use crate::error::EvalError;
use crate::facts::FactTable;
use crate::functions;
use crate::models::{Action, Expr};
use crate::operators::{BinaryOperator, UnaryOperator};
use crate::value::{Args, Value};
use std::cmp::Ordering;

/// 动作执行产生的引擎指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// 在本次执行剩余过程中撤回规则
    Retract(String),
    /// 当前规则动作执行完后结束执行循环
    Complete,
}

/// 表达式求值器
pub struct Evaluator<'a> {
    pub(crate) facts: &'a FactTable,
    /// 在 IsNil / IsZero 的参数内部，缺失值上的方法调用产生 Absent 而不报错
    pub(crate) null_safe: bool,
}

impl<'a> Evaluator<'a> {
    pub fn new(facts: &'a FactTable) -> Self {
        Self {
            facts,
            null_safe: false,
        }
    }

    fn null_safe(&self) -> Self {
        Self {
            facts: self.facts,
            null_safe: true,
        }
    }

    /// 求值表达式
    pub fn evaluate(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Literal { value } => Ok(value.to_value()),
            Expr::Path(path) => self.resolve_path(path),
            Expr::Unary { op, operand } => self.evaluate_unary(expr, *op, operand),
            Expr::Binary { op, left, right } => self.evaluate_binary(expr, *op, left, right),
            Expr::Call { function, args } => self.evaluate_call(expr, function, args),
        }
    }

    /// 求值条件，返回真值
    pub fn evaluate_condition(&self, expr: &Expr) -> Result<bool, EvalError> {
        let value = self.evaluate(expr)?;
        truthy(&value, expr)
    }

    /// 执行一条动作语句
    ///
    /// 赋值先求值右侧再解析目标；`Retract` / `Complete` 以指令形式返回给执行循环。
    pub fn execute_action(&self, action: &Action) -> Result<Option<Directive>, EvalError> {
        match action {
            Action::Assign { target, value } => {
                let value = self.evaluate(value)?;
                let (handle, field) = self.resolve_assign_target(target)?;
                handle
                    .write_field(field, value)
                    .map_err(|e| EvalError::from_bridge(target.to_string(), e))?;
                Ok(None)
            }
            Action::Call { call } => match call {
                Expr::Call { function, args } if function == "Retract" => {
                    if args.len() != 1 {
                        return Err(EvalError::invocation(
                            call.to_string(),
                            format!("Retract 需要 1 个参数, 实际 {} 个", args.len()),
                        ));
                    }
                    match self.evaluate(&args[0])? {
                        Value::Str(name) => Ok(Some(Directive::Retract(name))),
                        other => Err(EvalError::invocation(
                            call.to_string(),
                            format!("Retract 需要规则名称字符串, 实际 {}", other.type_name()),
                        )),
                    }
                }
                Expr::Call { function, args } if function == "Complete" => {
                    if !args.is_empty() {
                        return Err(EvalError::invocation(call.to_string(), "Complete 不接受参数"));
                    }
                    Ok(Some(Directive::Complete))
                }
                _ => {
                    self.evaluate(call)?;
                    Ok(None)
                }
            },
        }
    }

    fn evaluate_unary(
        &self,
        expr: &Expr,
        op: UnaryOperator,
        operand: &Expr,
    ) -> Result<Value, EvalError> {
        let value = self.evaluate(operand)?;
        match op {
            UnaryOperator::Not => Ok(Value::Bool(!truthy(&value, expr)?)),
            UnaryOperator::Neg => match value {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| EvalError::arithmetic(expr.to_string(), "整数溢出")),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(EvalError::type_mismatch(
                    expr.to_string(),
                    "number",
                    other.type_name(),
                )),
            },
        }
    }

    fn evaluate_binary(
        &self,
        expr: &Expr,
        op: BinaryOperator,
        left: &Expr,
        right: &Expr,
    ) -> Result<Value, EvalError> {
        // 逻辑操作符短路，右侧按需求值
        let operands = || -> Result<(Value, Value), EvalError> {
            Ok((self.evaluate(left)?, self.evaluate(right)?))
        };

        match op {
            BinaryOperator::And => {
                let result = truthy(&self.evaluate(left)?, left)?
                    && truthy(&self.evaluate(right)?, right)?;
                Ok(Value::Bool(result))
            }
            BinaryOperator::Or => {
                let result = truthy(&self.evaluate(left)?, left)?
                    || truthy(&self.evaluate(right)?, right)?;
                Ok(Value::Bool(result))
            }
            BinaryOperator::Eq => {
                let (l, r) = operands()?;
                Ok(Value::Bool(strict_eq(&l, &r)))
            }
            BinaryOperator::Neq => {
                let (l, r) = operands()?;
                Ok(Value::Bool(!strict_eq(&l, &r)))
            }
            BinaryOperator::Gt | BinaryOperator::Gte | BinaryOperator::Lt | BinaryOperator::Lte => {
                let (l, r) = operands()?;
                let ordering = compare(expr, &l, &r)?;
                let result = match op {
                    BinaryOperator::Gt => ordering == Ordering::Greater,
                    BinaryOperator::Gte => ordering != Ordering::Less,
                    BinaryOperator::Lt => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                };
                Ok(Value::Bool(result))
            }
            BinaryOperator::Add
            | BinaryOperator::Sub
            | BinaryOperator::Mul
            | BinaryOperator::Div
            | BinaryOperator::Rem => {
                let (l, r) = operands()?;
                arithmetic(expr, op, l, r)
            }
        }
    }

    fn evaluate_call(&self, expr: &Expr, function: &str, args: &[Expr]) -> Result<Value, EvalError> {
        match function {
            "IsNil" | "IsZero" => {
                if args.len() != 1 {
                    return Err(EvalError::invocation(
                        expr.to_string(),
                        format!("{} 需要 1 个参数, 实际 {} 个", function, args.len()),
                    ));
                }
                let value = self.null_safe().evaluate(&args[0])?;
                let result = if function == "IsNil" {
                    value.is_nil()
                } else {
                    value.is_zero()
                };
                Ok(Value::Bool(result))
            }
            "Retract" | "Complete" => Err(EvalError::invocation(
                expr.to_string(),
                format!("{} 只能作为动作语句调用", function),
            )),
            _ => {
                let values = args
                    .iter()
                    .map(|arg| self.evaluate(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                if self.null_safe && values.iter().any(|v| matches!(v, Value::Absent)) {
                    return Ok(Value::Absent);
                }
                functions::call_builtin(function, Args::new(function, values))
                    .map_err(|e| EvalError::from_bridge(expr.to_string(), e))
            }
        }
    }
}

/// 真值判断：布尔按值，缺失值与 null 为假，其他类型报错
fn truthy(value: &Value, expr: &Expr) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Absent | Value::Null => Ok(false),
        other => Err(EvalError::type_mismatch(
            expr.to_string(),
            "boolean",
            other.type_name(),
        )),
    }
}

/// `==` 语义：任一侧缺失即不相等
fn strict_eq(l: &Value, r: &Value) -> bool {
    if l.is_absent() || r.is_absent() {
        return false;
    }
    loose_eq(l, r)
}

/// 值相等：整数与浮点按数值比较，类型族不同视为不相等
pub(crate) fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Absent, _) | (_, Value::Absent) => false,
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            l.as_f64() == r.as_f64()
        }
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Time(a), Value::Time(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| loose_eq(x, y))
        }
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| loose_eq(v, other)))
        }
        (Value::Record(a), Value::Record(b)) => a.ptr_eq(b),
        _ => false,
    }
}

/// 有序比较：数值、字符串、时间
fn compare(expr: &Expr, l: &Value, r: &Value) -> Result<Ordering, EvalError> {
    let ordering = match (l, r) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            l.as_f64().zip(r.as_f64()).and_then(|(a, b)| a.partial_cmp(&b))
        }
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
        _ => None,
    };

    ordering.ok_or_else(|| {
        EvalError::type_mismatch(
            expr.to_string(),
            "两侧同为 number、string 或 time",
            &format!("{} 与 {}", l.type_name(), r.type_name()),
        )
    })
}

fn arithmetic(expr: &Expr, op: BinaryOperator, l: Value, r: Value) -> Result<Value, EvalError> {
    let div_zero = || EvalError::arithmetic(expr.to_string(), "除数为零");

    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 && matches!(op, BinaryOperator::Div | BinaryOperator::Rem) {
                return Err(div_zero());
            }
            int_op(op, *a, *b)
                .map(Value::Int)
                .ok_or_else(|| EvalError::arithmetic(expr.to_string(), "整数溢出"))
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (a, b) = (l.as_f64().unwrap_or_default(), r.as_f64().unwrap_or_default());
            if b == 0.0 && matches!(op, BinaryOperator::Div | BinaryOperator::Rem) {
                return Err(div_zero());
            }
            float_op(op, a, b).map(Value::Float).ok_or_else(|| {
                EvalError::type_mismatch(expr.to_string(), "number", l.type_name())
            })
        }
        // 字符串拼接，另一侧可以是任意具体标量
        (Value::Str(_), other) | (other, Value::Str(_))
            if op == BinaryOperator::Add && is_concrete_scalar(other) =>
        {
            Ok(Value::Str(format!("{}{}", l, r)))
        }
        _ => Err(EvalError::type_mismatch(
            expr.to_string(),
            "number（或 string + 标量）",
            &format!("{} {} {}", l.type_name(), op, r.type_name()),
        )),
    }
}

/// 整数运算，溢出返回 None
fn int_op(op: BinaryOperator, a: i64, b: i64) -> Option<i64> {
    match op {
        BinaryOperator::Add => a.checked_add(b),
        BinaryOperator::Sub => a.checked_sub(b),
        BinaryOperator::Mul => a.checked_mul(b),
        BinaryOperator::Div => a.checked_div(b),
        BinaryOperator::Rem => a.checked_rem(b),
        _ => None,
    }
}

fn float_op(op: BinaryOperator, a: f64, b: f64) -> Option<f64> {
    match op {
        BinaryOperator::Add => Some(a + b),
        BinaryOperator::Sub => Some(a - b),
        BinaryOperator::Mul => Some(a * b),
        BinaryOperator::Div => Some(a / b),
        BinaryOperator::Rem => Some(a % b),
        _ => None,
    }
}

fn is_concrete_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) | Value::Time(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalErrorKind;
    use crate::models::PathExpr;
    use serde_json::json;

    fn facts() -> FactTable {
        let mut facts = FactTable::new();
        facts
            .bind_json(
                "inputs",
                json!({
                    "name": {"first": "john", "last": "doe"},
                    "amount": 1500,
                    "ratio": 0.5,
                    "vip": true,
                    "tags": ["a", "b"],
                    "empty": "",
                    "zero": 0,
                    "nothing": null
                }),
            )
            .unwrap();
        facts
    }

    fn eval(expr: &Expr) -> Result<Value, EvalError> {
        let facts = facts();
        Evaluator::new(&facts).evaluate(expr)
    }

    fn cond(expr: &Expr) -> Result<bool, EvalError> {
        let facts = facts();
        Evaluator::new(&facts).evaluate_condition(expr)
    }

    fn missing() -> Expr {
        Expr::path("inputs.i_am_missing")
    }

    #[test]
    fn test_equality_with_absent() {
        assert!(!cond(&missing().eq("abc")).unwrap());
        assert!(cond(&missing().neq("abc")).unwrap());
        // 缺失值与缺失值也不相等
        assert!(!cond(&missing().eq(Expr::path("inputs.other_missing"))).unwrap());
        assert!(cond(&missing().neq(Expr::path("inputs.other_missing"))).unwrap());
        // 缺失值与 null 不相等
        assert!(!cond(&missing().eq(Expr::null())).unwrap());
        assert!(cond(&Expr::path("inputs.nothing").eq(Expr::null())).unwrap());
    }

    #[test]
    fn test_equality_numeric_and_types() {
        assert!(cond(&Expr::path("inputs.amount").eq(1500.0)).unwrap());
        assert!(cond(&Expr::path("inputs.name.first").eq("john")).unwrap());
        assert!(!cond(&Expr::path("inputs.amount").eq("1500")).unwrap());
        assert!(cond(&Expr::path("inputs.amount").neq("1500")).unwrap());
    }

    #[test]
    fn test_ordering() {
        assert!(cond(&Expr::path("inputs.amount").gte(1000)).unwrap());
        assert!(cond(&Expr::path("inputs.ratio").lt(1)).unwrap());
        assert!(cond(&Expr::path("inputs.name.first").gt("alice")).unwrap());

        let err = cond(&missing().gt(1)).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::TypeMismatch);
        assert_eq!(err.path, "inputs.i_am_missing > 1");

        let err = cond(&Expr::path("inputs.amount").lt("x")).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::TypeMismatch);
    }

    #[test]
    fn test_logical_short_circuit_with_absent() {
        // Absent 为假：&& 短路，右侧的错误不会被求值
        let boom = missing().gt(1);
        assert!(!cond(&missing().and(boom.clone())).unwrap());
        // || 继续求值下一项
        assert!(cond(&missing().or(Expr::path("inputs.vip"))).unwrap());
        assert!(cond(&Expr::path("inputs.vip").or(boom)).unwrap());
        assert!(cond(&Expr::not(missing())).unwrap());
    }

    #[test]
    fn test_logical_requires_boolean() {
        let err = cond(&Expr::path("inputs.amount").and(Expr::lit(true))).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::TypeMismatch);
        assert_eq!(err.path, "inputs.amount");

        let err = cond(&Expr::path("inputs.name.first")).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::TypeMismatch);
    }

    #[test]
    fn test_is_nil_is_zero() {
        let is_nil = |e: Expr| cond(&Expr::call("IsNil", vec![e])).unwrap();
        let is_zero = |e: Expr| cond(&Expr::call("IsZero", vec![e])).unwrap();

        assert!(is_nil(missing()));
        assert!(is_nil(Expr::path("inputs.nothing")));
        assert!(is_nil(Expr::path("inputs.a.b.c.d")));
        assert!(!is_nil(Expr::path("inputs.zero")));

        assert!(is_zero(missing()));
        assert!(is_zero(Expr::path("inputs.zero")));
        assert!(is_zero(Expr::path("inputs.empty")));
        assert!(!is_zero(Expr::path("inputs.amount")));

        // 缺失值上的方法调用在 IsNil/IsZero 内部不报错
        let chained = PathExpr::dotted("inputs.i_am_missing")
            .method("ToLower", vec![])
            .method("HasPrefix", vec![Expr::lit("miss")]);
        assert!(is_nil(chained.clone().into()));
        assert!(is_zero(chained.into()));
    }

    #[test]
    fn test_is_nil_is_zero_with_absent_argument() {
        let method: Expr = PathExpr::dotted("inputs.name.first")
            .method("HasPrefix", vec![Expr::path("inputs.missing")])
            .into();
        let builtin = Expr::call("Max", vec![Expr::path("inputs.missing"), Expr::lit(1)]);

        for function in ["IsNil", "IsZero"] {
            for arg in [method.clone(), builtin.clone()] {
                assert!(cond(&Expr::call(function, vec![arg])).unwrap());
            }
        }

        // 非空安全上下文中仍然报错
        let err = eval(&method).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Invocation);
    }

    #[test]
    fn test_is_nil_arity() {
        let err = cond(&Expr::call("IsNil", vec![])).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Invocation);
    }

    #[test]
    fn test_method_on_absent_outside_is_nil() {
        let expr: Expr = PathExpr::dotted("inputs.i_am_missing")
            .method("ToLower", vec![])
            .into();
        let err = eval(&expr).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Invocation);
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval(&Expr::path("inputs.amount").add(500)).unwrap(), Value::Int(2000));
        assert_eq!(eval(&Expr::path("inputs.ratio").add(1)).unwrap(), Value::Float(1.5));
        assert_eq!(
            eval(&Expr::path("inputs.name.first").add("-").add(Expr::path("inputs.amount")))
                .unwrap(),
            Value::from("john-1500")
        );
        assert_eq!(
            eval(&Expr::binary(BinaryOperator::Div, Expr::lit(7), Expr::lit(2))).unwrap(),
            Value::Int(3)
        );
        assert_eq!(
            eval(&Expr::unary(UnaryOperator::Neg, Expr::path("inputs.amount"))).unwrap(),
            Value::Int(-1500)
        );
    }

    #[test]
    fn test_arithmetic_errors() {
        let err = eval(&missing().add(1)).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::TypeMismatch);

        let err = eval(&Expr::path("inputs.name.first").add(missing())).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::TypeMismatch);

        let err = eval(&Expr::binary(BinaryOperator::Div, Expr::lit(1), Expr::lit(0))).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Arithmetic);

        let err = eval(&Expr::lit(i64::MAX).add(1)).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Arithmetic);
    }

    #[test]
    fn test_builtin_calls() {
        assert_eq!(
            eval(&Expr::call("Len", vec![Expr::path("inputs.tags")])).unwrap(),
            Value::Int(2)
        );
        let err = eval(&Expr::call("Len", vec![missing()])).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Invocation);

        let err = eval(&Expr::call("Retract", vec![Expr::lit("x")])).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Invocation);
    }

    #[test]
    fn test_execute_action_directives() {
        let facts = facts();
        let evaluator = Evaluator::new(&facts);

        assert_eq!(
            evaluator.execute_action(&Action::retract("A")).unwrap(),
            Some(Directive::Retract("A".into()))
        );
        assert_eq!(
            evaluator.execute_action(&Action::complete()).unwrap(),
            Some(Directive::Complete)
        );
        assert_eq!(
            evaluator
                .execute_action(&Action::call(Expr::call("Log", vec![Expr::lit("hi")])))
                .unwrap(),
            None
        );

        let err = evaluator
            .execute_action(&Action::call(Expr::call("Retract", vec![missing()])))
            .unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Invocation);
    }

    #[test]
    fn test_assign_into_tree_rejected() {
        let facts = facts();
        let evaluator = Evaluator::new(&facts);
        let err = evaluator
            .execute_action(&Action::assign("inputs.name.first", "jane"))
            .unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Invocation);
    }
}
