// 参数解析工具
// 把表单、查询串、JSON解析为表达式上下文

use crate::expr::{EvalContext, Value};
use actix_web::web;
use rust_decimal::Decimal;
use std::str::FromStr;

/// 解析 `a=1&b=2` 形式的表单或查询串
pub fn parse_urlencoded(input: &str) -> Result<EvalContext, String> {
    let pairs = web::Query::<Vec<(String, String)>>::from_query(input)
        .map_err(|e| format!("invalid urlencoded content: {}", e))?;
    Ok(pairs.into_inner().into_iter().collect())
}

/// 展开JSON为扁平的上下文
///
/// 嵌套对象以 `.` 连接键名 (`data.status`)，数组以下标连接 (`items.0.id`)，
/// 顶层不是对象时整体绑定到 `body`
pub fn flatten_json(value: &serde_json::Value) -> EvalContext {
    let mut ctx = EvalContext::new();
    match value {
        serde_json::Value::Object(_) | serde_json::Value::Array(_) => flatten_into(&mut ctx, "", value),
        scalar => flatten_into(&mut ctx, "body", scalar),
    }
    ctx
}

fn flatten_into(ctx: &mut EvalContext, prefix: &str, value: &serde_json::Value) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        }
    };

    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                flatten_into(ctx, &join(key), child);
            }
        }
        serde_json::Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten_into(ctx, &join(&index.to_string()), child);
            }
        }
        serde_json::Value::String(s) => {
            ctx.insert(prefix, s.as_str());
        }
        serde_json::Value::Number(n) => {
            let value = Decimal::from_str(&n.to_string())
                .or_else(|_| Decimal::from_scientific(&n.to_string()))
                .map(Value::Num)
                .unwrap_or_else(|_| Value::Str(n.to_string()));
            ctx.insert(prefix, value);
        }
        serde_json::Value::Bool(b) => {
            ctx.insert(prefix, *b);
        }
        serde_json::Value::Null => {
            ctx.insert(prefix, "");
        }
    }
}
