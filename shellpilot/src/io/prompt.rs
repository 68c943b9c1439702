//! Template rendering for the messages the loop writes into history.
//!
//! Templates come from configuration and are rendered with minijinja in
//! strict mode, so a typo in a variable name fails loudly instead of
//! rendering an empty string.

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use serde_json::{Map, Value};

/// Variables available to a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    vars: Map<String, Value>,
}

impl TemplateVars {
    /// Start from every field of a serializable config struct.
    pub fn from_config<T: Serialize>(config: &T) -> Result<Self> {
        match serde_json::to_value(config).context("serialize template vars")? {
            Value::Object(vars) => Ok(Self { vars }),
            other => Err(anyhow!("template vars must be a table, got {other}")),
        }
    }

    /// Set a variable, replacing any previous value.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }
}

/// Template engine wrapper around minijinja.
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        // Shell output is not HTML.
        env.set_auto_escape_callback(|_| minijinja::AutoEscape::None);
        Self { env }
    }

    /// Render `source`; `name` only labels errors.
    pub fn render(&self, name: &str, source: &str, vars: &TemplateVars) -> Result<String> {
        self.env
            .render_named_str(name, source, &vars.vars)
            .with_context(|| format!("render {name} template"))
    }
}
