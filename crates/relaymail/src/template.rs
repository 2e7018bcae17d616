//! Template engine abstraction and bundled `minijinja` engines.
//!
//! Both bundled engines share one environment setup:
//!
//! | template                        | output                              |
//! |---------------------------------|-------------------------------------|
//! | `{{ user.name }}`               | the variable, HTML-escaped          |
//! | `{{ footer \| safe }}`          | the variable, verbatim              |
//! | `{% for item in items %}`       | loops, conditionals, filters        |
//!
//! Every template is escaped as HTML regardless of its name, and an
//! undefined variable is an error rather than an empty string.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use minijinja::{AutoEscape, Environment, ErrorKind, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by template engines.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// No template with this name.
    #[error("Template not found: {0}")]
    NotFound(String),

    /// The name is empty or escapes the template root.
    #[error("Invalid template name: {0}")]
    InvalidName(String),

    /// The template source could not be parsed.
    #[error("Syntax error in template {name}: {source}")]
    Syntax {
        /// Template name.
        name: String,
        /// Parser error.
        #[source]
        source: minijinja::Error,
    },

    /// The template refers to a variable that was not supplied.
    #[error("Missing variable in template {name}: {source}")]
    MissingVariable {
        /// Template name.
        name: String,
        /// Engine error naming the expression.
        #[source]
        source: minijinja::Error,
    },

    /// Any other rendering failure.
    #[error("Failed to render template {name}: {source}")]
    Render {
        /// Template name.
        name: String,
        /// Engine error.
        #[source]
        source: minijinja::Error,
    },
}

impl TemplateError {
    fn from_engine(name: &str, source: minijinja::Error) -> Self {
        let name = name.to_string();
        match source.kind() {
            ErrorKind::TemplateNotFound => Self::NotFound(name),
            ErrorKind::SyntaxError => Self::Syntax { name, source },
            ErrorKind::UndefinedError => Self::MissingVariable { name, source },
            _ => Self::Render { name, source },
        }
    }
}

/// A template variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Text.
    String(String),
    /// Ordered list, addressed by index.
    List(Vec<Value>),
    /// Nested variables, addressed by key.
    Map(BTreeMap<String, Value>),
}

/// Variables passed to [`Template::render`].
pub type Variables = BTreeMap<String, Value>;

impl Value {
    /// Textual form of a scalar; `None` for lists and maps.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => Some(String::new()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Int(n) => Some(n.to_string()),
            Self::Float(x) => Some(x.to_string()),
            Self::String(s) => Some(s.clone()),
            Self::List(_) | Self::Map(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List(_) | Self::Map(_) => {
                f.write_str(&serde_json::to_string(self).map_err(|_| fmt::Error)?)
            }
            scalar => f.write_str(&scalar.as_text().unwrap_or_default()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Vec<Self>> for Value {
    fn from(value: Vec<Self>) -> Self {
        Self::List(value)
    }
}

impl From<BTreeMap<String, Self>> for Value {
    fn from(value: BTreeMap<String, Self>) -> Self {
        Self::Map(value)
    }
}

/// A loaded template.
pub trait Template: Send + Sync {
    /// Renders the template to HTML.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced variable is missing or unusable.
    fn render(&self, variables: &Variables) -> Result<String, TemplateError>;
}

/// Loads templates by name.
pub trait TemplateEngine: Send + Sync {
    /// Loads the named template.
    ///
    /// # Errors
    ///
    /// Returns an error if the template does not exist or does not parse.
    fn load(&self, name: &str) -> Result<Box<dyn Template>, TemplateError>;
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    env
}

/// A template resolved from a shared environment.
#[derive(Debug, Clone)]
pub struct JinjaTemplate {
    env: Arc<Environment<'static>>,
    key: String,
}

impl JinjaTemplate {
    fn load(env: &Arc<Environment<'static>>, name: &str, key: String) -> Result<Self, TemplateError> {
        env.get_template(&key)
            .map_err(|e| TemplateError::from_engine(name, e))?;
        Ok(Self {
            env: Arc::clone(env),
            key,
        })
    }

    /// Key the template is registered under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Template for JinjaTemplate {
    fn render(&self, variables: &Variables) -> Result<String, TemplateError> {
        self.env
            .get_template(&self.key)
            .and_then(|template| template.render(variables))
            .map_err(|e| TemplateError::from_engine(&self.key, e))
    }
}

/// Templates held in memory, keyed by name.
///
/// Sources are parsed when added, so syntax errors surface at registration.
#[derive(Debug, Clone)]
pub struct MemoryTemplates {
    env: Arc<Environment<'static>>,
}

impl Default for MemoryTemplates {
    fn default() -> Self {
        Self {
            env: Arc::new(environment()),
        }
    }
}

impl MemoryTemplates {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a template, builder style.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Syntax`] if `source` does not parse.
    pub fn with_template(
        mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Self, TemplateError> {
        self.insert(name, source)?;
        Ok(self)
    }

    /// Adds or replaces a template.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Syntax`] if `source` does not parse.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<(), TemplateError> {
        let name = name.into();
        Arc::make_mut(&mut self.env)
            .add_template_owned(name.clone(), source.into())
            .map_err(|e| TemplateError::from_engine(&name, e))
    }
}

impl TemplateEngine for MemoryTemplates {
    fn load(&self, name: &str) -> Result<Box<dyn Template>, TemplateError> {
        Ok(Box::new(JinjaTemplate::load(&self.env, name, name.to_string())?))
    }
}

/// Templates read from `<root>/<name>.<extension>`.
///
/// Files are read on first use and cached by the environment.
#[derive(Debug, Clone)]
pub struct DirectoryTemplates {
    root: PathBuf,
    extension: String,
    env: Arc<Environment<'static>>,
}

impl DirectoryTemplates {
    /// Serves `*.html` files under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut env = environment();
        env.set_loader(minijinja::path_loader(&root));
        Self {
            root,
            extension: "html".to_string(),
            env: Arc::new(env),
        }
    }

    /// Changes the file extension.
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Template root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_for(&self, name: &str) -> Result<String, TemplateError> {
        if name.is_empty()
            || Path::new(name)
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(TemplateError::InvalidName(name.to_string()));
        }
        Ok(format!("{name}.{}", self.extension))
    }
}

impl TemplateEngine for DirectoryTemplates {
    fn load(&self, name: &str) -> Result<Box<dyn Template>, TemplateError> {
        let key = self.key_for(name)?;
        let template = JinjaTemplate::load(&self.env, name, key)?;
        tracing::debug!(template = name, root = %self.root.display(), "Loaded template");
        Ok(Box::new(template))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use std::fs;

    fn vars(json: &str) -> Variables {
        serde_json::from_str(json).unwrap()
    }

    fn render(source: &str, variables: &Variables) -> Result<String, TemplateError> {
        MemoryTemplates::new()
            .with_template("t", source)?
            .load("t")?
            .render(variables)
    }

    #[test]
    fn test_escaped_and_safe() {
        let v = vars(r#"{"name": "Tom & <Jerry>"}"#);
        assert_eq!(render("Hi {{ name }}!", &v).unwrap(), "Hi Tom &amp; &lt;Jerry&gt;!");
        assert_eq!(render("Hi {{ name|safe }}!", &v).unwrap(), "Hi Tom & <Jerry>!");
    }

    #[test]
    fn test_nested_variables() {
        let v = vars(r#"{"user": {"name": "Ann", "tags": ["a", "b"]}, "n": 3, "ok": true}"#);
        assert_eq!(
            render("{{ user.name }} {{ user.tags[1] }} {{ n }} {{ ok }}", &v).unwrap(),
            "Ann b 3 true"
        );
    }

    #[test]
    fn test_loops_over_lists() {
        let v = vars(r#"{"items": [{"sku": "A1", "qty": 2}, {"sku": "B7", "qty": 1}]}"#);
        assert_eq!(
            render(
                "<ul>{% for item in items %}<li>{{ item.sku }} x{{ item.qty }}</li>{% endfor %}</ul>",
                &v
            )
            .unwrap(),
            "<ul><li>A1 x2</li><li>B7 x1</li></ul>"
        );
    }

    #[test]
    fn test_missing_variable() {
        let err = render("{{ user.email }}", &vars(r#"{"user": {}}"#)).unwrap_err();
        assert!(matches!(err, TemplateError::MissingVariable { ref name, .. } if name == "t"));

        let err = render("{{ nobody }}", &Variables::new()).unwrap_err();
        assert!(matches!(err, TemplateError::MissingVariable { .. }));
    }

    #[test]
    fn test_syntax_error_at_registration() {
        for source in ["Hello {{ name", "{% for x in xs %}", "{{ }}"] {
            assert!(
                matches!(
                    MemoryTemplates::new().with_template("t", source),
                    Err(TemplateError::Syntax { .. })
                ),
                "{source}"
            );
        }
    }

    #[test]
    fn test_text_without_tags() {
        assert_eq!(render("<p>plain</p>", &Variables::new()).unwrap(), "<p>plain</p>");
        assert_eq!(render("", &Variables::new()).unwrap(), "");
    }

    #[test]
    fn test_value_json() {
        let v: Value = serde_json::from_str(r#"[1, 2.5, "x", null, {"k": false}]"#).unwrap();
        let Value::List(items) = &v else {
            panic!("expected list");
        };
        assert_eq!(items[0], Value::Int(1));
        assert_eq!(items[1], Value::Float(2.5));
        assert_eq!(items[2], Value::from("x"));
        assert_eq!(items[3], Value::Null);
        assert_eq!(v.to_string(), r#"[1,2.5,"x",null,{"k":false}]"#);
    }

    #[test]
    fn test_memory_templates() {
        let engine = MemoryTemplates::new()
            .with_template("welcome", "<p>Hi {{ name }}</p>")
            .unwrap();
        let out = engine
            .load("welcome")
            .unwrap()
            .render(&vars(r#"{"name": "Ann"}"#))
            .unwrap();
        assert_eq!(out, "<p>Hi Ann</p>");
        assert!(matches!(engine.load("other"), Err(TemplateError::NotFound(n)) if n == "other"));
    }

    #[test]
    fn test_insert_replaces_and_keeps_clones_apart() {
        let mut engine = MemoryTemplates::new().with_template("t", "one").unwrap();
        let before = engine.clone();
        engine.insert("t", "two").unwrap();

        let empty = Variables::new();
        assert_eq!(engine.load("t").unwrap().render(&empty).unwrap(), "two");
        assert_eq!(before.load("t").unwrap().render(&empty).unwrap(), "one");
    }

    #[test]
    fn test_directory_templates() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("orders")).unwrap();
        fs::write(dir.path().join("orders/shipped.html"), "Order {{ id }} shipped").unwrap();
        fs::write(dir.path().join("plain.txt"), "Hi {{ name }}").unwrap();

        let engine = DirectoryTemplates::new(dir.path());
        let out = engine
            .load("orders/shipped")
            .unwrap()
            .render(&vars(r#"{"id": 42}"#))
            .unwrap();
        assert_eq!(out, "Order 42 shipped");
        assert!(matches!(engine.load("missing"), Err(TemplateError::NotFound(n)) if n == "missing"));

        let text = DirectoryTemplates::new(dir.path()).with_extension("txt");
        let out = text.load("plain").unwrap().render(&vars(r#"{"name": "Bo"}"#)).unwrap();
        assert_eq!(out, "Hi Bo");
    }

    #[test]
    fn test_directory_rejects_escaping_names() {
        let engine = DirectoryTemplates::new("/srv/templates");
        for name in ["", "../secret", "/etc/passwd", "a/../../b"] {
            assert!(
                matches!(engine.load(name), Err(TemplateError::InvalidName(_))),
                "{name}"
            );
        }
    }
}
