// 表达式求值模块
// 渠道配置中的请求参数、响应判定、回调判定都以表达式的形式描述，
// 这里提供一个受限的解释器：字面量、变量、算术、比较、逻辑运算、三元表达式和少量内置函数

mod lexer;
mod parser;
mod value;

pub use value::{EvalContext, Value};

use parser::{Expr, Parser};
use thiserror::Error;

/// 表达式求值错误，均携带出错的表达式原文
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("syntax error in `{expr}`: {message}")]
    Syntax { expr: String, message: String },
    #[error("undefined variable `{name}` in `{expr}`")]
    UndefinedVariable { expr: String, name: String },
    #[error("type error in `{expr}`: {message}")]
    Type { expr: String, message: String },
    #[error("unknown function `{name}` in `{expr}`")]
    UnknownFunction { expr: String, name: String },
}

impl EvalError {
    /// 出错的表达式原文
    pub fn expr(&self) -> &str {
        match self {
            EvalError::Syntax { expr, .. }
            | EvalError::UndefinedVariable { expr, .. }
            | EvalError::Type { expr, .. }
            | EvalError::UnknownFunction { expr, .. } => expr,
        }
    }
}

/// 求值过程中的内部错误，出口处补上表达式原文
#[derive(Debug)]
pub(crate) enum Fault {
    Undefined(String),
    Type(String),
    UnknownFunction(String),
}

impl Fault {
    fn into_error(self, expr: &str) -> EvalError {
        let expr = expr.to_string();
        match self {
            Fault::Undefined(name) => EvalError::UndefinedVariable { expr, name },
            Fault::Type(message) => EvalError::Type { expr, message },
            Fault::UnknownFunction(name) => EvalError::UnknownFunction { expr, name },
        }
    }
}

fn compile(expr: &str) -> Result<Expr, EvalError> {
    let tokens = lexer::tokenize(expr).map_err(|message| EvalError::Syntax {
        expr: expr.to_string(),
        message,
    })?;
    Parser::new(tokens)
        .parse()
        .map_err(|message| EvalError::Syntax {
            expr: expr.to_string(),
            message,
        })
}

/// 计算表达式的值
pub fn evaluate(expr: &str, ctx: &EvalContext) -> Result<Value, EvalError> {
    let ast = compile(expr)?;
    ast.eval(ctx).map_err(|fault| fault.into_error(expr))
}

/// 计算表达式并转为字符串
///
/// # Arguments
/// * `expr` - 表达式
/// * `ctx` - 参数上下文
///
/// # Returns
/// * 字符串结果 (数字按其原始精度输出，布尔值输出 `true`/`false`)
pub fn eval_string(expr: &str, ctx: &EvalContext) -> Result<String, EvalError> {
    evaluate(expr, ctx).map(|value| value.to_string())
}

/// 计算布尔表达式
///
/// 结果必须为布尔值，或字符串 `true`/`false`
pub fn eval_bool(expr: &str, ctx: &EvalContext) -> Result<bool, EvalError> {
    let value = evaluate(expr, ctx)?;
    value
        .as_bool()
        .map_err(|fault| fault.into_error(expr))
}

/// 按顺序计算一组 (参数名, 表达式)
///
/// 每个参数计算完成后立即绑定到上下文中，后面的表达式可以引用前面的参数；
/// 引用尚未定义的参数会得到 `UndefinedVariable`。
///
/// # Arguments
/// * `ctx` - 合并后的参数上下文
/// * `template` - 有序的 (参数名, 表达式) 列表
///
/// # Returns
/// * 有序的 (参数名, 字符串值) 列表
pub fn eval_params<'a, I>(ctx: &EvalContext, template: I) -> Result<Vec<(String, String)>, EvalError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut scope = ctx.clone();
    let mut params = Vec::new();

    for (name, expr) in template {
        let value = evaluate(expr, &scope)?;
        params.push((name.to_string(), value.to_string()));
        scope.insert(name, value);
    }

    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ctx() -> EvalContext {
        let mut ctx = EvalContext::new();
        ctx.insert("order_id", "ABC123");
        ctx.insert("amount_yuan", "12.50");
        ctx.insert("amount_fen", "1250");
        ctx.insert("trade_status", "TRADE_SUCCESS");
        ctx.insert("data.code", Value::Num(dec!(0)));
        ctx.insert("paid", true);
        ctx
    }

    #[test]
    fn test_string_concatenation() {
        let out = eval_string("'order-' + order_id", &ctx()).unwrap();
        assert_eq!(out, "order-ABC123");
    }

    #[test]
    fn test_numeric_comparison_on_string_values() {
        assert!(eval_bool("amount_fen >= 1000", &ctx()).unwrap());
        assert!(eval_bool("amount_yuan == 12.5", &ctx()).unwrap());
        assert!(!eval_bool("amount_yuan > 100", &ctx()).unwrap());
    }

    #[test]
    fn test_boolean_predicates() {
        let expr = "trade_status == \"TRADE_SUCCESS\" && data.code == 0";
        assert!(eval_bool(expr, &ctx()).unwrap());
        assert!(eval_bool("paid || false", &ctx()).unwrap());
        assert!(!eval_bool("!paid", &ctx()).unwrap());
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval_string("amount_fen * 2", &ctx()).unwrap(), "2500");
        assert_eq!(eval_string("(1 + 2) * 3 - 4 % 3", &ctx()).unwrap(), "8");
    }

    #[test]
    fn test_ternary() {
        let out = eval_string("paid ? 'yes' : 'no'", &ctx()).unwrap();
        assert_eq!(out, "yes");
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval_string("upper(order_id + 'x')", &ctx()).unwrap(), "ABC123X");
        assert_eq!(eval_string("len(order_id)", &ctx()).unwrap(), "6");
        assert_eq!(
            eval_string("sha256('abc')", &ctx()).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(eval_bool("contains(trade_status, 'SUCCESS')", &ctx()).unwrap());
    }

    #[test]
    fn test_quoted_identifier() {
        let mut ctx = ctx();
        ctx.insert("out-trade-no", "X1");
        assert_eq!(eval_string("${out-trade-no}", &ctx).unwrap(), "X1");
    }

    #[test]
    fn test_undefined_variable_never_blank() {
        let err = eval_string("'a' + missing", &ctx()).unwrap_err();
        assert_eq!(
            err,
            EvalError::UndefinedVariable {
                expr: "'a' + missing".to_string(),
                name: "missing".to_string(),
            }
        );
        assert_eq!(err.expr(), "'a' + missing");
    }

    #[test]
    fn test_malformed_expression() {
        let err = eval_bool("amount_fen >= ", &ctx()).unwrap_err();
        assert!(matches!(err, EvalError::Syntax { .. }));
        assert_eq!(err.expr(), "amount_fen >= ");
    }

    #[test]
    fn test_non_boolean_result_is_type_error() {
        let err = eval_bool("order_id", &ctx()).unwrap_err();
        assert!(matches!(err, EvalError::Type { .. }));
    }

    #[test]
    fn test_unknown_function() {
        let err = eval_string("md5(order_id)", &ctx()).unwrap_err();
        assert!(matches!(err, EvalError::UnknownFunction { ref name, .. } if name == "md5"));
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let ctx = ctx();
        let expr = "hmac_sha256('key', order_id + amount_fen)";
        assert_eq!(eval_string(expr, &ctx), eval_string(expr, &ctx));
    }

    #[test]
    fn test_eval_params_forward_reference() {
        let template = [
            ("out_trade_no", "order_id"),
            ("total", "amount_fen"),
            ("sign", "upper(out_trade_no + '|' + total)"),
        ];
        let params = eval_params(&ctx(), template).unwrap();
        assert_eq!(
            params,
            vec![
                ("out_trade_no".to_string(), "ABC123".to_string()),
                ("total".to_string(), "1250".to_string()),
                ("sign".to_string(), "ABC123|1250".to_string()),
            ]
        );
    }

    #[test]
    fn test_eval_params_use_before_definition() {
        let template = [("sign", "upper(total)"), ("total", "amount_fen")];
        let err = eval_params(&ctx(), template).unwrap_err();
        assert!(matches!(err, EvalError::UndefinedVariable { ref name, .. } if name == "total"));
    }
}
