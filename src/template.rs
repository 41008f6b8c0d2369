//! Rendering of stored message fragments.
//!
//! Templates are Jinja HTML snippets: `{{ name }}` substitutions plus
//! `{% if %}`/`{% for %}` blocks. Undefined variables render empty.
use minijinja::Environment;
use std::collections::HashMap;

use crate::error::{Error, Result};

pub type TemplateVars = HashMap<String, String>;

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, source: &str, vars: &TemplateVars) -> Result<String>;
}

#[derive(Debug, Default)]
pub struct JinjaRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer for JinjaRenderer {
    fn render(&self, source: &str, vars: &TemplateVars) -> Result<String> {
        self.env
            .render_str(source, vars)
            .map_err(|e| Error::Template(e.to_string()))
    }
}
