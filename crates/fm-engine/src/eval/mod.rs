//! Embedded `<% ... %>` expressions inside script lines.
//!
//! Each span is a small program run by a sandboxed interpreter that sees only
//! the bindings in its [`Context`], a fixed set of builtins, and the
//! instance methods routed through a [`Host`]. Values passed to `print` or
//! `emit` replace the span.

mod interp;
mod lexer;
mod parser;
mod value;

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use fm_infra::types::Instance;

use crate::{Error, Result};
use interp::{BUILTINS, Interpreter};
pub use value::{Value, format_number};

/// Remote capabilities exposed to expressions as instance methods.
#[async_trait]
pub trait Host: Send + Sync {
    /// Run `command` on `instance` and return its stdout.
    async fn exec(&self, instance: &Instance, command: &str) -> Result<String>;

    async fn upload(&self, instance: &Instance, local: &Path, remote: &str) -> Result<()>;

    async fn download(&self, instance: &Instance, remote: &str, local: &Path) -> Result<()>;
}

/// Bindings for one evaluation: the current machine as `this` and the live
/// registry as `i`.
#[derive(Debug, Clone)]
pub struct Context {
    this: Arc<Instance>,
    instances: BTreeMap<String, Arc<Instance>>,
    bindings: BTreeMap<String, Value>,
}

impl Context {
    pub fn new(this: Instance, instances: BTreeMap<String, Instance>) -> Result<Self> {
        if this.name.is_empty() {
            return Err(Error::Context(format!("instance {} has no name", this.id)));
        }
        if let Some((key, instance)) = instances.iter().find(|(key, i)| **key != i.name) {
            return Err(Error::Context(format!(
                "registry key \"{key}\" holds instance \"{}\"",
                instance.name
            )));
        }

        Ok(Self {
            this: Arc::new(this),
            instances: instances
                .into_iter()
                .map(|(name, instance)| (name, Arc::new(instance)))
                .collect(),
            bindings: BTreeMap::new(),
        })
    }

    /// Add an extra top-level name. Reserved names and non-identifiers are
    /// rejected.
    pub fn bind(mut self, name: &str, value: Value) -> Result<Self> {
        let valid = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
        if !valid {
            return Err(Error::Context(format!("\"{name}\" is not a valid binding name")));
        }
        if matches!(name, "this" | "i" | "let" | "const" | "var" | "await")
            || BUILTINS.contains(&name)
        {
            return Err(Error::Context(format!("\"{name}\" is reserved")));
        }
        self.bindings.insert(name.to_string(), value);
        Ok(self)
    }

    pub fn this(&self) -> &Instance {
        &self.this
    }

    fn constants(&self) -> HashMap<String, Value> {
        let mut constants: HashMap<String, Value> = self
            .bindings
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        constants.insert("this".into(), Value::Instance(self.this.clone()));
        constants.insert(
            "i".into(),
            Value::Object(
                self.instances
                    .iter()
                    .map(|(name, instance)| (name.clone(), Value::Instance(instance.clone())))
                    .collect(),
            ),
        );
        constants
    }
}

/// Byte ranges of every `<% ... %>` span in `line`, delimiters included.
/// A span never crosses a line break.
pub fn spans(line: &str) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut from = 0;
    while let Some(rel) = line[from..].find("<%") {
        let start = from + rel;
        let body = start + 2;
        match line[body..].find("%>") {
            Some(len) if !line[body..body + len].contains('\n') => {
                let end = body + len + 2;
                out.push(start..end);
                from = end;
            }
            Some(_) => from = start + 1,
            None => break,
        }
    }
    out
}

/// Evaluates script lines for one machine. Names declared by `let` stay
/// visible to later spans and later lines.
pub struct Evaluator<'h> {
    interp: Interpreter<'h>,
}

impl<'h> Evaluator<'h> {
    pub fn new(host: &'h dyn Host, context: &Context) -> Self {
        Self {
            interp: Interpreter::new(host, context.constants()),
        }
    }

    /// Evaluate one template line, which must be a string.
    pub async fn evaluate(&mut self, command: &serde_json::Value) -> Result<String> {
        match command {
            serde_json::Value::String(line) => self.evaluate_line(line).await,
            other => Err(Error::InvalidCommand(other.to_string())),
        }
    }

    pub async fn evaluate_line(&mut self, line: &str) -> Result<String> {
        let ranges = spans(line);
        if ranges.is_empty() {
            return Ok(line.to_string());
        }

        let mut out = String::with_capacity(line.len());
        let mut last = 0;
        for range in ranges {
            out.push_str(&line[last..range.start]);
            let emitted = self.interp.run(&line[range.start + 2..range.end - 2]).await?;
            out.push_str(&render(&emitted));
            last = range.end;
        }
        out.push_str(&line[last..]);
        Ok(out)
    }
}

/// Join emitted strings and numbers with single spaces, dropping anything
/// else.
fn render(emitted: &[Value]) -> String {
    emitted
        .iter()
        .filter(|v| matches!(v, Value::Str(_) | Value::Number(_)))
        .map(Value::to_display)
        .collect::<Vec<_>>()
        .join(" ")
}
