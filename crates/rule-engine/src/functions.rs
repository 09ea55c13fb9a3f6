//! 内置函数与值方法
//!
//! 内置函数以裸名调用（如 `Now()`、`Len(x)`）；值方法作用于字符串、列表、
//! 对象和时间（如 `inputs.name.ToLower()`）。副作用内置函数
//! （`Retract`、`Complete`）和缺失值判断（`IsNil`、`IsZero`）由求值器直接处理。

use crate::error::BridgeError;
use crate::value::{Args, Value};
use chrono::format::{Item, StrftimeItems};
use chrono::{Datelike, TimeZone, Utc};
use regex::Regex;
use tracing::info;

/// 调用无副作用的内置函数
pub(crate) fn call_builtin(name: &str, args: Args) -> Result<Value, BridgeError> {
    match name {
        "Now" => {
            args.expect_len(0)?;
            Ok(Value::Time(Utc::now()))
        }
        "MakeTime" => make_time(&args),
        "IsTimeBefore" => {
            args.expect_len(2)?;
            Ok(Value::Bool(args.time(0)? < args.time(1)?))
        }
        "IsTimeAfter" => {
            args.expect_len(2)?;
            Ok(Value::Bool(args.time(0)? > args.time(1)?))
        }
        "Len" => {
            args.expect_len(1)?;
            length(&args, 0)
        }
        "Abs" => {
            args.expect_len(1)?;
            match args.value(0)? {
                Value::Int(i) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| BridgeError::Failed("Abs 整数溢出".to_string())),
                _ => Ok(Value::Float(args.float(0)?.abs())),
            }
        }
        "Max" => extremum(&args, true),
        "Min" => extremum(&args, false),
        "Log" => {
            let message = args
                .into_vec()
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            info!(target: "rule_engine::log", "{}", message);
            Ok(Value::Null)
        }
        _ => Err(BridgeError::UnknownMethod(name.to_string())),
    }
}

/// 调用值方法
pub(crate) fn call_value_method(
    receiver: &Value,
    method: &str,
    args: Args,
) -> Result<Value, BridgeError> {
    match receiver {
        Value::Str(s) => string_method(s, method, &args),
        Value::List(items) => match method {
            "Len" => {
                args.expect_len(0)?;
                Ok(Value::Int(items.len() as i64))
            }
            "Contains" => {
                args.expect_len(1)?;
                let needle = args.value(0)?;
                Ok(Value::Bool(
                    items.iter().any(|item| crate::evaluator::loose_eq(item, needle)),
                ))
            }
            _ => Err(BridgeError::UnknownMethod(format!("list.{}", method))),
        },
        Value::Map(map) => match method {
            "Len" => {
                args.expect_len(0)?;
                Ok(Value::Int(map.len() as i64))
            }
            "HasKey" => {
                args.expect_len(1)?;
                Ok(Value::Bool(map.contains_key(&args.string(0)?)))
            }
            _ => Err(BridgeError::UnknownMethod(format!("map.{}", method))),
        },
        Value::Time(t) => match method {
            "Unix" => {
                args.expect_len(0)?;
                Ok(Value::Int(t.timestamp()))
            }
            "Year" => {
                args.expect_len(0)?;
                Ok(Value::Int(t.year() as i64))
            }
            "Format" => {
                args.expect_len(1)?;
                let pattern = args.string(0)?;
                let items: Vec<Item> = StrftimeItems::new(&pattern).collect();
                if items.iter().any(|item| matches!(item, Item::Error)) {
                    return Err(BridgeError::Failed(format!("无效的时间格式: {}", pattern)));
                }
                Ok(Value::Str(t.format_with_items(items.iter()).to_string()))
            }
            _ => Err(BridgeError::UnknownMethod(format!("time.{}", method))),
        },
        other => Err(BridgeError::UnknownMethod(format!(
            "{}.{}",
            other.type_name(),
            method
        ))),
    }
}

fn string_method(s: &str, method: &str, args: &Args) -> Result<Value, BridgeError> {
    match method {
        "Len" => {
            args.expect_len(0)?;
            Ok(Value::Int(s.chars().count() as i64))
        }
        "ToLower" => {
            args.expect_len(0)?;
            Ok(Value::Str(s.to_lowercase()))
        }
        "ToUpper" => {
            args.expect_len(0)?;
            Ok(Value::Str(s.to_uppercase()))
        }
        "Trim" => {
            args.expect_len(0)?;
            Ok(Value::Str(s.trim().to_string()))
        }
        "HasPrefix" => {
            args.expect_len(1)?;
            Ok(Value::Bool(s.starts_with(&args.string(0)?)))
        }
        "HasSuffix" => {
            args.expect_len(1)?;
            Ok(Value::Bool(s.ends_with(&args.string(0)?)))
        }
        "Contains" => {
            args.expect_len(1)?;
            Ok(Value::Bool(s.contains(&args.string(0)?)))
        }
        "Index" => {
            args.expect_len(1)?;
            let found = s.find(&args.string(0)?).map(|i| i as i64).unwrap_or(-1);
            Ok(Value::Int(found))
        }
        "Replace" => {
            args.expect_len(2)?;
            Ok(Value::Str(s.replace(&args.string(0)?, &args.string(1)?)))
        }
        "Split" => {
            args.expect_len(1)?;
            let sep = args.string(0)?;
            Ok(Value::List(s.split(sep.as_str()).map(Value::from).collect()))
        }
        "MatchString" => {
            args.expect_len(1)?;
            let pattern = args.string(0)?;
            let regex = Regex::new(&pattern).map_err(|e| {
                BridgeError::Failed(format!("无效的正则表达式 '{}': {}", pattern, e))
            })?;
            Ok(Value::Bool(regex.is_match(s)))
        }
        _ => Err(BridgeError::UnknownMethod(format!("string.{}", method))),
    }
}

fn length(args: &Args, index: usize) -> Result<Value, BridgeError> {
    match args.value(index)? {
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::List(items) => Ok(Value::Int(items.len() as i64)),
        Value::Map(map) => Ok(Value::Int(map.len() as i64)),
        other => Err(BridgeError::ArgumentType {
            method: args.method().to_string(),
            index: index + 1,
            expected: "string, list or map".to_string(),
            actual: other.type_name().to_string(),
        }),
    }
}

fn make_time(args: &Args) -> Result<Value, BridgeError> {
    args.expect_len(6)?;
    let mut parts = [0i64; 6];
    for (i, part) in parts.iter_mut().enumerate() {
        *part = args.int(i)?;
    }
    let [year, month, day, hour, minute, second] = parts;

    let to_u32 = |v: i64| u32::try_from(v).ok();
    let time = i32::try_from(year).ok().and_then(|y| {
        Utc.with_ymd_and_hms(
            y,
            to_u32(month)?,
            to_u32(day)?,
            to_u32(hour)?,
            to_u32(minute)?,
            to_u32(second)?,
        )
        .single()
    });

    time.map(Value::Time).ok_or_else(|| {
        BridgeError::Failed(format!(
            "无效的时间: {}-{}-{} {}:{}:{}",
            year, month, day, hour, minute, second
        ))
    })
}

/// Max / Min：全部为整数时返回整数，否则返回浮点
fn extremum(args: &Args, max: bool) -> Result<Value, BridgeError> {
    if args.is_empty() {
        return Err(BridgeError::Arity {
            method: args.method().to_string(),
            expected: 1,
            actual: 0,
        });
    }

    let all_int = (0..args.len()).all(|i| matches!(args.value(i), Ok(Value::Int(_))));
    if all_int {
        let ints = (0..args.len()).map(|i| args.int(i)).collect::<Result<Vec<_>, _>>()?;
        let picked = if max { ints.iter().max() } else { ints.iter().min() };
        return Ok(picked.copied().map(Value::Int).unwrap_or(Value::Null));
    }

    let mut picked = args.float(0)?;
    for i in 1..args.len() {
        let v = args.float(i)?;
        picked = if max { picked.max(v) } else { picked.min(v) };
    }
    Ok(Value::Float(picked))
}
