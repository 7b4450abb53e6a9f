//! Template rendering for model SQL and source properties
//!
//! Instance variables are available both as top-level names (`{{ region }}`)
//! and through `var()` (`{{ var('region') }}`, `{{ var('x', 'fallback') }}`).
//! `config(...)` keyword arguments are captured so a model can declare
//! options inline, e.g. `{{ config(materialize=true) }}`.

use minijinja::value::{Kwargs, Value};
use minijinja::{Environment, Error, ErrorKind, UndefinedBehavior};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

type ConfigCapture = Arc<Mutex<BTreeMap<String, Value>>>;

/// Output of one render
#[derive(Debug, Clone, Default)]
pub struct Rendered {
    pub text: String,
    /// Keyword arguments passed to `config()`
    pub config: BTreeMap<String, Value>,
}

impl Rendered {
    pub fn config_bool(&self, key: &str) -> Option<bool> {
        self.config.get(key).map(|v| v.is_true())
    }

    pub fn config_str(&self, key: &str) -> Option<String> {
        self.config
            .get(key)
            .and_then(|v| v.as_str().map(str::to_string))
    }
}

/// A render failure with the template line it happened on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateError {
    pub message: String,
    pub line: Option<usize>,
}

impl From<Error> for TemplateError {
    fn from(err: Error) -> Self {
        let message = match err.detail() {
            Some(detail) => format!("{}: {}", err.kind(), detail),
            None => err.to_string(),
        };
        Self {
            message,
            line: err.line(),
        }
    }
}

/// Renders templates against an instance's variables
#[derive(Debug, Clone, Default)]
pub struct TemplateEngine {
    vars: BTreeMap<String, String>,
}

impl TemplateEngine {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Render `template`. Undefined names are errors.
    pub fn render(&self, template: &str) -> Result<Rendered, TemplateError> {
        // Plain text needs no environment
        if !template.contains("{{") && !template.contains("{%") && !template.contains("{#") {
            return Ok(Rendered {
                text: template.to_string(),
                config: BTreeMap::new(),
            });
        }

        let capture: ConfigCapture = Arc::new(Mutex::new(BTreeMap::new()));
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_function("var", make_var_fn(self.vars.clone()));
        env.add_function("config", make_config_fn(Arc::clone(&capture)));

        let text = env.render_str(template, &self.vars)?;
        let config = capture.lock().unwrap_or_else(|p| p.into_inner()).clone();
        Ok(Rendered { text, config })
    }

    /// Render a plain string value (no config capture)
    pub fn render_value(&self, value: &str) -> Result<String, TemplateError> {
        Ok(self.render(value)?.text)
    }
}

fn make_var_fn(
    vars: BTreeMap<String, String>,
) -> impl Fn(&str, Option<Value>) -> Result<Value, Error> + Send + Sync + Clone + 'static {
    move |name: &str, default: Option<Value>| match (vars.get(name), default) {
        (Some(value), _) => Ok(Value::from(value.as_str())),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(Error::new(
            ErrorKind::UndefinedError,
            format!("variable '{name}' is not defined and no default provided"),
        )),
    }
}

fn make_config_fn(
    capture: ConfigCapture,
) -> impl Fn(Kwargs) -> Result<String, Error> + Send + Sync + Clone + 'static {
    move |kwargs: Kwargs| {
        let mut captured = capture.lock().unwrap_or_else(|p| p.into_inner());
        for key in kwargs.args() {
            let value = kwargs.get::<Value>(key)?;
            captured.insert(key.to_string(), value);
        }
        Ok(String::new())
    }
}

#[cfg(test)]
#[path = "template_test.rs"]
mod tests;
