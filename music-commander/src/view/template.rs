//! Path template rendering.
//!
//! Templates use handlebars syntax (`{{ artist }} - {{ title }}`) and
//! are compiled once per run. Missing or empty metadata values render
//! as `Unknown`. The `round_to` helper rounds a numeric value to the
//! nearest multiple of its argument: `{{round_to bpm 5}}`.

use handlebars::{
    Context, Handlebars, Helper, HelperResult, Output, RenderContext, RenderErrorReason,
};
use mc_common::{Error, Result};
use std::collections::{BTreeMap, HashSet};

const TEMPLATE_NAME: &str = "path";

/// Placeholder for missing metadata.
pub const UNKNOWN: &str = "Unknown";

fn round_to_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let value = h
        .param(0)
        .and_then(|p| p.value().as_str().map(str::to_string))
        .unwrap_or_default();
    let step = h
        .param(1)
        .and_then(|p| p.value().as_f64())
        .ok_or_else(|| RenderErrorReason::ParamNotFoundForIndex("round_to", 1))?;

    let number = value.parse::<f64>().unwrap_or(0.0);
    let rounded = if step == 0.0 {
        number
    } else {
        (number / step).round() * step
    };

    if rounded.fract() == 0.0 {
        out.write(&format!("{}", rounded as i64))?;
    } else {
        out.write(&format!("{rounded}"))?;
    }
    Ok(())
}

/// A compiled path template.
pub struct PathTemplate {
    registry: Handlebars<'static>,
    variables: HashSet<String>,
}

impl PathTemplate {
    /// Compile a template string; syntax errors are reported up front.
    pub fn compile(template: &str) -> Result<Self> {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        registry.register_helper("round_to", Box::new(round_to_helper));
        registry
            .register_template_string(TEMPLATE_NAME, template)
            .map_err(|e| Error::Template(format!("invalid template syntax: {e}")))?;
        Ok(Self {
            registry,
            variables: template_variables(template),
        })
    }

    /// Variable names referenced by the template.
    pub fn variables(&self) -> &HashSet<String> {
        &self.variables
    }

    /// Render with the given metadata; absent or empty values become
    /// `Unknown`.
    pub fn render(&self, metadata: &BTreeMap<String, Option<String>>) -> Result<String> {
        let mut data: BTreeMap<String, String> = metadata
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    Some(s) if !s.is_empty() => s.clone(),
                    _ => UNKNOWN.to_string(),
                };
                (k.clone(), value)
            })
            .collect();
        // Referenced variables outside the metadata set also render as
        // Unknown rather than vanishing from the path.
        for var in &self.variables {
            data.entry(var.clone()).or_insert_with(|| UNKNOWN.to_string());
        }

        self.registry
            .render(TEMPLATE_NAME, &data)
            .map_err(|e| Error::Template(format!("template render failed: {e}")))
    }
}

/// Extract variable names from a template string.
///
/// Handles plain expressions (`{{artist}}`) and helper calls
/// (`{{round_to bpm 5}}`), where every non-literal helper argument is a
/// variable.
pub fn template_variables(template: &str) -> HashSet<String> {
    let mut variables = HashSet::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start + 2..].find("}}") else {
            break;
        };
        let inner = rest[start + 2..start + 2 + end].trim();
        let tokens: Vec<&str> = inner.split_whitespace().collect();
        match tokens.as_slice() {
            [single] => {
                if is_identifier(single) {
                    variables.insert((*single).to_string());
                }
            }
            [_helper, args @ ..] => {
                for arg in args {
                    if is_identifier(arg) {
                        variables.insert((*arg).to_string());
                    }
                }
            }
            [] => {}
        }
        rest = &rest[start + 2 + end + 2..];
    }
    variables
}

fn is_identifier(token: &str) -> bool {
    !token.is_empty()
        && !token.starts_with('"')
        && !token.chars().next().unwrap().is_ascii_digit()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
