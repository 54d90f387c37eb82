// 表达式的值类型与参数上下文

use super::Fault;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// 表达式的值
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Num(Decimal),
    Bool(bool),
}

impl Value {
    /// 数字，或可以解析为数字的字符串
    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Str(s) => Decimal::from_str(s.trim()).ok(),
            Value::Bool(_) => None,
        }
    }

    pub(crate) fn as_bool(&self) -> Result<bool, Fault> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Str(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::Str(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            other => Err(Fault::Type(format!("`{}` is not a boolean", other))),
        }
    }

    /// 相等比较：任一侧为数字且两侧都能解析为数字时按数值比较，否则按字符串比较
    pub(crate) fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(_), _) | (_, Value::Num(_)) => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => self.to_string() == other.to_string(),
            },
            _ => self.to_string() == other.to_string(),
        }
    }

    /// 大小比较：两侧都是数字 (或数字字符串) 时按数值比较，两侧都是字符串时按字典序
    pub(crate) fn loose_cmp(&self, other: &Value) -> Result<Ordering, Fault> {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return Ok(a.cmp(&b));
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            _ => Err(Fault::Type(format!("cannot compare `{}` with `{}`", self, other))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Num(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Str(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Decimal> for Value {
    fn from(n: Decimal) -> Self {
        Value::Num(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Num(Decimal::from(n))
    }
}

/// 表达式参数上下文
///
/// 由多个来源按层合并：请求参数 → 渠道静态参数 → 计算参数 (订单号、换算后的金额)。
/// 后合并的层覆盖先合并的层，覆盖行为会以 debug 级别记录。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalContext {
    vars: HashMap<String, Value>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按顺序合并多个命名层
    pub fn layered<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, EvalContext)>,
    {
        let mut ctx = Self::new();
        for (layer, values) in layers {
            ctx.merge(layer, values);
        }
        ctx
    }

    /// 合并一层参数，同名键以新层为准
    pub fn merge(&mut self, layer: &str, other: EvalContext) {
        for (name, value) in other.vars {
            if let Some(previous) = self.vars.get(&name) {
                if *previous != value {
                    log::debug!(
                        "Parameter `{}` overridden by {} layer ({} -> {})",
                        name,
                        layer,
                        previous,
                        value
                    );
                }
            }
            self.vars.insert(name, value);
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.vars.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for EvalContext {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut ctx = EvalContext::new();
        for (name, value) in iter {
            ctx.insert(name, value);
        }
        ctx
    }
}
