//! Evaluate the `atlantis` locals of a module into [`ModuleSettings`].
//!
//! Two shapes are understood:
//!
//! ```hcl
//! locals {
//!   atlantis = {
//!     workflow           = "custom"
//!     skip               = false
//!     extra_dependencies = ["../shared/*.tf"]
//!   }
//! }
//! ```
//!
//! and the older flat form (`atlantis_workflow`, `atlantis_skip`,
//! `extra_atlantis_dependencies`, ...). When the `atlantis` map is present the
//! flat locals are not consulted.
//!
//! Evaluation is best effort. Locals may reference variables, other locals or
//! functions we do not evaluate; such a field is left unset.

use std::collections::HashMap;

use hcl::eval::{Context, Evaluate};
use hcl::{Expression, ObjectKey, Value};
use tracing::trace;

use crate::resolver::to_slash;

/// Name of the map-valued local holding all settings
pub const ATLANTIS_LOCAL: &str = "atlantis";

/// Per-module settings read from locals. Every field is optional; unset
/// fields fall back to the global defaults in the project builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleSettings {
    pub workflow: Option<String>,
    pub apply_requirements: Option<Vec<String>>,
    pub extra_dependencies: Option<Vec<String>>,
    pub autoplan: Option<bool>,
    pub skip: Option<bool>,
    pub terraform_version: Option<String>,
    pub execution_order_group: i64,
}

impl ModuleSettings {
    pub fn is_skipped(&self) -> bool {
        self.skip == Some(true)
    }
}

/// Logical settings fields and their flat legacy local names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Workflow,
    TerraformVersion,
    Autoplan,
    Skip,
    ApplyRequirements,
    ExtraDependencies,
    ExecutionOrderGroup,
}

impl Field {
    const ALL: [Field; 7] = [
        Field::Workflow,
        Field::TerraformVersion,
        Field::Autoplan,
        Field::Skip,
        Field::ApplyRequirements,
        Field::ExtraDependencies,
        Field::ExecutionOrderGroup,
    ];

    fn map_key(self) -> &'static str {
        match self {
            Field::Workflow => "workflow",
            Field::TerraformVersion => "terraform_version",
            Field::Autoplan => "autoplan",
            Field::Skip => "skip",
            Field::ApplyRequirements => "apply_requirements",
            Field::ExtraDependencies => "extra_dependencies",
            Field::ExecutionOrderGroup => "execution_order_group",
        }
    }

    fn flat_local(self) -> &'static str {
        match self {
            Field::Workflow => "atlantis_workflow",
            Field::TerraformVersion => "atlantis_terraform_version",
            Field::Autoplan => "atlantis_autoplan",
            Field::Skip => "atlantis_skip",
            Field::ApplyRequirements => "atlantis_apply_requirements",
            Field::ExtraDependencies => "extra_atlantis_dependencies",
            Field::ExecutionOrderGroup => "atlantis_execution_order_group",
        }
    }

    fn from_map_key(key: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.map_key() == key)
    }
}

/// Resolve the settings of a module from its locals.
pub fn resolve_locals(locals: &HashMap<String, Expression>) -> ModuleSettings {
    let ctx = Context::new();
    let mut settings = ModuleSettings::default();

    if let Some(atlantis) = locals.get(ATLANTIS_LOCAL) {
        resolve_map(atlantis, &ctx, &mut settings);
    } else {
        for field in Field::ALL {
            if let Some(expr) = locals.get(field.flat_local()) {
                if let Some(value) = evaluate(expr, &ctx, field.flat_local()) {
                    apply(field, &value, &mut settings);
                }
            }
        }
    }

    settings
}

fn resolve_map(expr: &Expression, ctx: &Context, settings: &mut ModuleSettings) {
    match expr {
        // Object literals are evaluated entry by entry so one bad entry does not
        // take the others with it.
        Expression::Object(object) => {
            for (key, value_expr) in object.iter() {
                let Some(field) = object_key_name(key).and_then(Field::from_map_key) else {
                    continue;
                };
                if let Some(value) = evaluate(value_expr, ctx, field.map_key()) {
                    apply(field, &value, settings);
                }
            }
        }
        other => {
            if let Some(Value::Object(map)) = evaluate(other, ctx, ATLANTIS_LOCAL) {
                for (key, value) in map.iter() {
                    if let Some(field) = Field::from_map_key(key) {
                        apply(field, value, settings);
                    }
                }
            }
        }
    }
}

fn object_key_name(key: &ObjectKey) -> Option<&str> {
    match key {
        ObjectKey::Identifier(ident) => Some(ident.as_str()),
        ObjectKey::Expression(Expression::String(s)) => Some(s.as_str()),
        _ => None,
    }
}

fn evaluate(expr: &Expression, ctx: &Context, name: &str) -> Option<Value> {
    match expr.evaluate(ctx) {
        Ok(value) => Some(value),
        Err(e) => {
            trace!(local = name, error = %e, "could not evaluate local, using default");
            None
        }
    }
}

fn apply(field: Field, value: &Value, settings: &mut ModuleSettings) {
    match field {
        Field::Workflow => settings.workflow = as_string(value),
        Field::TerraformVersion => settings.terraform_version = as_string(value),
        Field::Autoplan => settings.autoplan = value.as_bool(),
        Field::Skip => settings.skip = value.as_bool(),
        Field::ApplyRequirements => settings.apply_requirements = as_string_list(value),
        Field::ExtraDependencies => settings.extra_dependencies = as_string_list(value),
        Field::ExecutionOrderGroup => {
            if let Value::Number(n) = value {
                if let Some(group) = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)) {
                    settings.execution_order_group = group;
                }
            }
        }
    }
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Strings of an array, slash-normalized. Empty arrays count as unset.
fn as_string_list(value: &Value) -> Option<Vec<String>> {
    let Value::Array(items) = value else {
        return None;
    };
    let list: Vec<String> = items
        .iter()
        .filter_map(|v| v.as_str())
        .map(to_slash)
        .collect();
    (!list.is_empty()).then_some(list)
}
