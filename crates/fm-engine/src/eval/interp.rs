use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use fm_infra::types::Instance;

use super::Host;
use super::parser::{BinOp, Expr, Stmt, UnaryOp, parse};
use super::value::{Value, format_number};
use crate::{Error, Result};

pub(crate) const BUILTINS: &[&str] = &[
    "print", "emit", "wait", "len", "keys", "values", "str", "num", "json", "join", "first", "last",
];

/// Tree-walking interpreter for one evaluation context. Declared names
/// persist between programs run on the same interpreter.
pub(crate) struct Interpreter<'h> {
    host: &'h dyn Host,
    constants: HashMap<String, Value>,
    globals: HashMap<String, Value>,
    output: Vec<Value>,
}

impl<'h> Interpreter<'h> {
    pub fn new(host: &'h dyn Host, constants: HashMap<String, Value>) -> Self {
        Self {
            host,
            constants,
            globals: HashMap::new(),
            output: Vec::new(),
        }
    }

    /// Run one program and return everything it emitted, in order.
    pub async fn run(&mut self, src: &str) -> Result<Vec<Value>> {
        let program = parse(src)?;
        self.output.clear();
        for stmt in &program {
            match stmt {
                Stmt::Let(name, expr) => {
                    if self.constants.contains_key(name) || BUILTINS.contains(&name.as_str()) {
                        return Err(Error::Eval(format!("cannot redeclare `{name}`")));
                    }
                    let value = self.eval(expr).await?;
                    self.globals.insert(name.clone(), value);
                }
                Stmt::Expr(expr) => {
                    self.eval(expr).await?;
                }
            }
        }
        Ok(std::mem::take(&mut self.output))
    }

    fn lookup(&self, name: &str) -> Result<Value> {
        if let Some(value) = self.constants.get(name).or_else(|| self.globals.get(name)) {
            return Ok(value.clone());
        }
        BUILTINS
            .iter()
            .find(|b| **b == name)
            .copied()
            .map(Value::Builtin)
            .ok_or_else(|| Error::Eval(format!("`{name}` is not defined")))
    }

    fn assign(&mut self, name: &str, value: Value) -> Result<()> {
        if self.constants.contains_key(name) {
            return Err(Error::Eval(format!("cannot assign to `{name}`")));
        }
        match self.globals.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Error::Eval(format!("assignment to undeclared `{name}`"))),
        }
    }

    fn eval<'a>(&'a mut self, expr: &'a Expr) -> BoxFuture<'a, Result<Value>> {
        async move {
            Ok(match expr {
                Expr::Num(n) => Value::Number(*n),
                Expr::Str(s) => Value::Str(s.clone()),
                Expr::Bool(b) => Value::Bool(*b),
                Expr::Null => Value::Null,
                Expr::Undefined => Value::Undefined,
                Expr::Ident(name) => self.lookup(name)?,
                Expr::List(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.eval(item).await?);
                    }
                    Value::List(out)
                }
                Expr::Object(fields) => {
                    let mut out = BTreeMap::new();
                    for (key, value) in fields {
                        out.insert(key.clone(), self.eval(value).await?);
                    }
                    Value::Object(out)
                }
                Expr::Member(target, name) => {
                    let target = self.eval(target).await?;
                    member(&target, name)?
                }
                Expr::Index(target, index) => {
                    let target = self.eval(target).await?;
                    let index = self.eval(index).await?;
                    element(&target, &index)?
                }
                Expr::Call(callee, args) => self.call(callee, args).await?,
                Expr::Unary(op, operand) => {
                    let value = self.eval(operand).await?;
                    match op {
                        UnaryOp::Not => Value::Bool(!value.truthy()),
                        UnaryOp::Neg => Value::Number(-value.to_number()),
                        UnaryOp::Plus => Value::Number(value.to_number()),
                    }
                }
                // Calls complete before they return, so there is nothing
                // left to wait for.
                Expr::Await(operand) => self.eval(operand).await?,
                Expr::Binary(op, left, right) => {
                    let left = self.eval(left).await?;
                    let right = self.eval(right).await?;
                    binary(*op, &left, &right)
                }
                Expr::And(left, right) => {
                    let left = self.eval(left).await?;
                    if left.truthy() {
                        self.eval(right).await?
                    } else {
                        left
                    }
                }
                Expr::Or(left, right) => {
                    let left = self.eval(left).await?;
                    if left.truthy() {
                        left
                    } else {
                        self.eval(right).await?
                    }
                }
                Expr::Cond(test, then, otherwise) => {
                    if self.eval(test).await?.truthy() {
                        self.eval(then).await?
                    } else {
                        self.eval(otherwise).await?
                    }
                }
                Expr::Assign(name, value) => {
                    let value = self.eval(value).await?;
                    self.assign(name, value.clone())?;
                    value
                }
            })
        }
        .boxed()
    }

    async fn call(&mut self, callee: &Expr, args: &[Expr]) -> Result<Value> {
        if let Expr::Member(receiver, method) = callee {
            let receiver = self.eval(receiver).await?;
            let args = self.eval_args(args).await?;
            return self.call_method(receiver, method, args).await;
        }

        let function = self.eval(callee).await?;
        let args = self.eval_args(args).await?;
        match function {
            Value::Builtin(name) => self.call_builtin(name, args).await,
            other => Err(Error::Eval(format!("{} is not a function", other.type_name()))),
        }
    }

    async fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            out.push(self.eval(arg).await?);
        }
        Ok(out)
    }

    async fn call_builtin(&mut self, name: &str, mut args: Vec<Value>) -> Result<Value> {
        let first = |args: &mut Vec<Value>| {
            if args.is_empty() {
                Value::Undefined
            } else {
                args.remove(0)
            }
        };

        Ok(match name {
            "print" | "emit" => {
                self.output.extend(args);
                Value::Undefined
            }
            "wait" => {
                let ms = first(&mut args).to_number();
                let ms = if ms.is_finite() && ms > 0.0 { ms as u64 } else { 0 };
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Value::Undefined
            }
            "len" => match first(&mut args) {
                Value::Str(s) => Value::Number(s.chars().count() as f64),
                Value::List(items) => Value::Number(items.len() as f64),
                Value::Object(map) => Value::Number(map.len() as f64),
                other => return Err(type_error("len", &other)),
            },
            "keys" => match first(&mut args) {
                Value::Object(map) => Value::List(map.into_keys().map(Value::Str).collect()),
                Value::Instance(instance) => match instance_fields(&instance) {
                    Value::Object(map) => Value::List(map.into_keys().map(Value::Str).collect()),
                    _ => Value::List(Vec::new()),
                },
                other => return Err(type_error("keys", &other)),
            },
            "values" => match first(&mut args) {
                Value::Object(map) => Value::List(map.into_values().collect()),
                Value::List(items) => Value::List(items),
                other => return Err(type_error("values", &other)),
            },
            "str" => Value::Str(first(&mut args).to_display()),
            "num" => Value::Number(first(&mut args).to_number()),
            "json" => match first(&mut args).to_json() {
                Some(json) => Value::Str(json.to_string()),
                None => Value::Undefined,
            },
            "join" => {
                let list = first(&mut args);
                let sep = separator(args.first(), " ");
                match list {
                    Value::List(items) => Value::Str(join(&items, &sep)),
                    other => return Err(type_error("join", &other)),
                }
            }
            "first" | "last" => match first(&mut args) {
                Value::List(mut items) => {
                    let item = if name == "first" {
                        (!items.is_empty()).then(|| items.remove(0))
                    } else {
                        items.pop()
                    };
                    item.unwrap_or(Value::Undefined)
                }
                Value::Str(s) => {
                    let ch = if name == "first" {
                        s.chars().next()
                    } else {
                        s.chars().next_back()
                    };
                    ch.map_or(Value::Undefined, |c| Value::Str(c.to_string()))
                }
                other => return Err(type_error(name, &other)),
            },
            other => return Err(Error::Eval(format!("`{other}` is not a function"))),
        })
    }

    async fn call_method(&mut self, receiver: Value, method: &str, args: Vec<Value>) -> Result<Value> {
        match receiver {
            Value::Instance(instance) => self.instance_method(instance, method, args).await,
            Value::Str(s) => string_method(&s, method, &args),
            Value::List(items) => list_method(&items, method, &args),
            Value::Number(n) => match method {
                "toString" => Ok(Value::Str(format_number(n))),
                "toFixed" => {
                    let digits = args.first().map_or(0.0, Value::to_number).clamp(0.0, 100.0) as usize;
                    Ok(Value::Str(format!("{n:.digits$}")))
                }
                _ => Err(not_a_method("number", method)),
            },
            Value::Undefined | Value::Null => Err(Error::Eval(format!(
                "cannot call `{method}` on {}",
                receiver.type_name()
            ))),
            other => Err(not_a_method(other.type_name(), method)),
        }
    }

    async fn instance_method(&mut self, instance: Arc<Instance>, method: &str, args: Vec<Value>) -> Result<Value> {
        match method {
            "ssh" | "exec" => {
                let command = string_arg(&args, 0, method)?;
                let stdout = self.host.exec(&instance, &command).await?;
                Ok(Value::Str(stdout.trim().to_string()))
            }
            "upload" => {
                let local = string_arg(&args, 0, method)?;
                let remote = string_arg(&args, 1, method)?;
                self.host.upload(&instance, Path::new(&local), &remote).await?;
                Ok(Value::Instance(instance))
            }
            "download" => {
                let remote = string_arg(&args, 0, method)?;
                let local = string_arg(&args, 1, method)?;
                self.host.download(&instance, &remote, Path::new(&local)).await?;
                Ok(Value::Instance(instance))
            }
            _ => Err(not_a_method("instance", method)),
        }
    }
}

fn type_error(function: &str, value: &Value) -> Error {
    Error::Eval(format!("{function}() does not accept {}", value.type_name()))
}

fn not_a_method(type_name: &str, method: &str) -> Error {
    Error::Eval(format!("{type_name}.{method} is not a function"))
}

fn string_arg(args: &[Value], index: usize, method: &str) -> Result<String> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s.clone()),
        Some(other) => Err(Error::Eval(format!(
            "{method}() argument {} must be a string, got {}",
            index + 1,
            other.type_name()
        ))),
        None => Err(Error::Eval(format!("{method}() expects argument {}", index + 1))),
    }
}

fn separator(arg: Option<&Value>, default: &str) -> String {
    match arg {
        None | Some(Value::Undefined) => default.to_string(),
        Some(other) => other.to_display(),
    }
}

fn join(items: &[Value], sep: &str) -> String {
    items
        .iter()
        .map(|v| match v {
            Value::Undefined | Value::Null => String::new(),
            other => other.to_display(),
        })
        .collect::<Vec<_>>()
        .join(sep)
}

fn instance_fields(instance: &Instance) -> Value {
    serde_json::to_value(instance)
        .map(|json| Value::from_json(&json))
        .unwrap_or(Value::Undefined)
}

fn member(target: &Value, name: &str) -> Result<Value> {
    Ok(match target {
        Value::Undefined | Value::Null => {
            return Err(Error::Eval(format!(
                "cannot read `{name}` of {}",
                target.type_name()
            )));
        }
        Value::Str(s) if name == "length" => Value::Number(s.chars().count() as f64),
        Value::List(items) if name == "length" => Value::Number(items.len() as f64),
        Value::Object(map) => map.get(name).cloned().unwrap_or(Value::Undefined),
        Value::Instance(instance) => match instance_fields(instance) {
            Value::Object(mut fields) => fields.remove(name).unwrap_or(Value::Undefined),
            _ => Value::Undefined,
        },
        _ => Value::Undefined,
    })
}

fn element(target: &Value, index: &Value) -> Result<Value> {
    match (target, index) {
        (Value::List(items), Value::Number(n)) => Ok(position(*n, items.len())
            .map(|i| items[i].clone())
            .unwrap_or(Value::Undefined)),
        (Value::Str(s), Value::Number(n)) => Ok(position(*n, usize::MAX)
            .and_then(|i| s.chars().nth(i))
            .map_or(Value::Undefined, |c| Value::Str(c.to_string()))),
        (target, key) => member(target, &key.to_display()),
    }
}

fn position(n: f64, len: usize) -> Option<usize> {
    (n >= 0.0 && n.fract() == 0.0 && n < len as f64).then_some(n as usize)
}

fn binary(op: BinOp, left: &Value, right: &Value) -> Value {
    let is_textual = |v: &Value| {
        matches!(
            v,
            Value::Str(_) | Value::List(_) | Value::Object(_) | Value::Instance(_)
        )
    };
    match op {
        BinOp::Add if is_textual(left) || is_textual(right) => {
            Value::Str(format!("{}{}", left.to_display(), right.to_display()))
        }
        BinOp::Add => Value::Number(left.to_number() + right.to_number()),
        BinOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinOp::Eq => Value::Bool(left.loose_eq(right)),
        BinOp::Ne => Value::Bool(!left.loose_eq(right)),
        BinOp::StrictEq => Value::Bool(left.strict_eq(right)),
        BinOp::StrictNe => Value::Bool(!left.strict_eq(right)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (left, right) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            Value::Bool(ordering.is_some_and(|o| match op {
                BinOp::Lt => o.is_lt(),
                BinOp::Le => o.is_le(),
                BinOp::Gt => o.is_gt(),
                _ => o.is_ge(),
            }))
        }
    }
}

fn string_method(s: &str, method: &str, args: &[Value]) -> Result<Value> {
    let arg = |index: usize| args.get(index).map(Value::to_display).unwrap_or_default();
    Ok(match method {
        "trim" => Value::Str(s.trim().to_string()),
        "toUpperCase" => Value::Str(s.to_uppercase()),
        "toLowerCase" => Value::Str(s.to_lowercase()),
        "toString" => Value::Str(s.to_string()),
        "split" => match args.first() {
            None | Some(Value::Undefined) => Value::List(vec![Value::Str(s.to_string())]),
            Some(sep) => {
                let sep = sep.to_display();
                if sep.is_empty() {
                    Value::List(s.chars().map(|c| Value::Str(c.to_string())).collect())
                } else {
                    Value::List(s.split(sep.as_str()).map(|p| Value::Str(p.to_string())).collect())
                }
            }
        },
        "replace" => Value::Str(s.replacen(&arg(0), &arg(1), 1)),
        "includes" => Value::Bool(s.contains(&arg(0))),
        "startsWith" => Value::Bool(s.starts_with(&arg(0))),
        "endsWith" => Value::Bool(s.ends_with(&arg(0))),
        _ => return Err(not_a_method("string", method)),
    })
}

fn list_method(items: &[Value], method: &str, args: &[Value]) -> Result<Value> {
    Ok(match method {
        "join" => Value::Str(join(items, &separator(args.first(), ","))),
        "includes" => {
            let needle = args.first().cloned().unwrap_or(Value::Undefined);
            Value::Bool(items.iter().any(|item| item.strict_eq(&needle)))
        }
        "toString" => Value::Str(join(items, ",")),
        _ => return Err(not_a_method("list", method)),
    })
}
