// 表达式语法分析与求值
//
// 优先级从低到高：?: , || , && , == != , < <= > >= , + - , * / % , 一元 ! - , 基本项

use super::lexer::Token;
use super::value::{EvalContext, Value};
use super::Fault;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Value),
    Var(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    /// 解析完整表达式，不允许尾随记号
    pub fn parse(mut self) -> Result<Expr, String> {
        if self.tokens.is_empty() {
            return Err("empty expression".to_string());
        }
        let expr = self.ternary()?;
        match self.peek() {
            None => Ok(expr),
            Some(token) => Err(format!("unexpected token {:?}", token)),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(ref token) if *token == expected => Ok(()),
            Some(token) => Err(format!("expected {:?}, found {:?}", expected, token)),
            None => Err(format!("expected {:?}, found end of expression", expected)),
        }
    }

    fn ternary(&mut self) -> Result<Expr, String> {
        let cond = self.or()?;
        if self.eat(&Token::Question) {
            let then = self.ternary()?;
            self.expect(Token::Colon)?;
            let otherwise = self.ternary()?;
            return Ok(Expr::Cond(Box::new(cond), Box::new(then), Box::new(otherwise)));
        }
        Ok(cond)
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut left = self.and()?;
        while self.eat(&Token::OrOr) {
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut left = self.equality()?;
        while self.eat(&Token::AndAnd) {
            let right = self.equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, String> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::NotEq,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Bang) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Lit(Value::Num(n))),
            Some(Token::Str(s)) => Ok(Expr::Lit(Value::Str(s))),
            Some(Token::True) => Ok(Expr::Lit(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Lit(Value::Bool(false))),
            Some(Token::LParen) => {
                let inner = self.ternary()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if !self.eat(&Token::LParen) {
                    return Ok(Expr::Var(name));
                }
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.ternary()?);
                        if self.eat(&Token::Comma) {
                            continue;
                        }
                        self.expect(Token::RParen)?;
                        break;
                    }
                }
                Ok(Expr::Call(name, args))
            }
            Some(token) => Err(format!("unexpected token {:?}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

impl Expr {
    pub fn eval(&self, ctx: &EvalContext) -> Result<Value, Fault> {
        match self {
            Expr::Lit(value) => Ok(value.clone()),
            Expr::Var(name) => ctx
                .get(name)
                .cloned()
                .ok_or_else(|| Fault::Undefined(name.clone())),
            Expr::Not(inner) => Ok(Value::Bool(!inner.eval(ctx)?.as_bool()?)),
            Expr::Neg(inner) => {
                let value = inner.eval(ctx)?;
                let n = number(&value)?;
                Ok(Value::Num(-n))
            }
            Expr::And(left, right) => {
                if !left.eval(ctx)?.as_bool()? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(right.eval(ctx)?.as_bool()?))
            }
            Expr::Or(left, right) => {
                if left.eval(ctx)?.as_bool()? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(right.eval(ctx)?.as_bool()?))
            }
            Expr::Cond(cond, then, otherwise) => {
                if cond.eval(ctx)?.as_bool()? {
                    then.eval(ctx)
                } else {
                    otherwise.eval(ctx)
                }
            }
            Expr::Binary(op, left, right) => {
                let l = left.eval(ctx)?;
                let r = right.eval(ctx)?;
                binary(*op, l, r)
            }
            Expr::Call(name, args) => {
                let values = args
                    .iter()
                    .map(|arg| arg.eval(ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                call(name, values)
            }
        }
    }
}

fn number(value: &Value) -> Result<Decimal, Fault> {
    value
        .as_number()
        .ok_or_else(|| Fault::Type(format!("`{}` is not a number", value)))
}

fn overflow() -> Fault {
    Fault::Type("numeric overflow".to_string())
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, Fault> {
    match op {
        BinaryOp::Add => match (&l, &r) {
            (Value::Num(a), Value::Num(b)) => a.checked_add(*b).map(Value::Num).ok_or_else(overflow),
            _ => Ok(Value::Str(format!("{}{}", l, r))),
        },
        BinaryOp::Sub => {
            let (a, b) = (number(&l)?, number(&r)?);
            a.checked_sub(b).map(Value::Num).ok_or_else(overflow)
        }
        BinaryOp::Mul => {
            let (a, b) = (number(&l)?, number(&r)?);
            a.checked_mul(b).map(Value::Num).ok_or_else(overflow)
        }
        BinaryOp::Div | BinaryOp::Rem => {
            let (a, b) = (number(&l)?, number(&r)?);
            if b.is_zero() {
                return Err(Fault::Type("division by zero".to_string()));
            }
            let result = if op == BinaryOp::Div {
                a.checked_div(b)
            } else {
                a.checked_rem(b)
            };
            result.map(Value::Num).ok_or_else(overflow)
        }
        BinaryOp::Eq => Ok(Value::Bool(l.loose_eq(&r))),
        BinaryOp::NotEq => Ok(Value::Bool(!l.loose_eq(&r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = l.loose_cmp(&r)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
    }
}

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), Fault> {
    if args.len() != expected {
        return Err(Fault::Type(format!(
            "function `{}` expects {} argument(s), got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn call(name: &str, args: Vec<Value>) -> Result<Value, Fault> {
    match name {
        "upper" => {
            arity(name, &args, 1)?;
            Ok(Value::Str(args[0].to_string().to_uppercase()))
        }
        "lower" => {
            arity(name, &args, 1)?;
            Ok(Value::Str(args[0].to_string().to_lowercase()))
        }
        "trim" => {
            arity(name, &args, 1)?;
            Ok(Value::Str(args[0].to_string().trim().to_string()))
        }
        "len" => {
            arity(name, &args, 1)?;
            Ok(Value::Num(Decimal::from(args[0].to_string().chars().count())))
        }
        "concat" => Ok(Value::Str(args.iter().map(|v| v.to_string()).collect())),
        "contains" => {
            arity(name, &args, 2)?;
            Ok(Value::Bool(args[0].to_string().contains(&args[1].to_string())))
        }
        "default_if_empty" => {
            arity(name, &args, 2)?;
            let mut args = args.into_iter();
            let (first, fallback) = (args.next(), args.next());
            match (first, fallback) {
                (Some(first), Some(fallback)) if first.to_string().is_empty() => Ok(fallback),
                (Some(first), _) => Ok(first),
                _ => Err(Fault::Type("default_if_empty expects 2 arguments".to_string())),
            }
        }
        "sha256" => {
            arity(name, &args, 1)?;
            let digest = Sha256::digest(args[0].to_string().as_bytes());
            Ok(Value::Str(hex::encode(digest)))
        }
        "hmac_sha256" => {
            arity(name, &args, 2)?;
            let mut mac = Hmac::<Sha256>::new_from_slice(args[0].to_string().as_bytes())
                .map_err(|e| Fault::Type(format!("invalid hmac key: {}", e)))?;
            mac.update(args[1].to_string().as_bytes());
            Ok(Value::Str(hex::encode(mac.finalize().into_bytes())))
        }
        _ => Err(Fault::UnknownFunction(name.to_string())),
    }
}
