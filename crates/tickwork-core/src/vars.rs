//! `${name}` indirection for schedule literals.

use std::collections::BTreeMap;

use tracing::warn;

/// Turns a raw schedule literal into the literal the scheduler should use.
pub trait Resolver: Send + Sync {
    fn resolve(&self, raw: &str) -> String;
}

/// Resolves `${name}` against a fixed variable table.
///
/// Literals that are not wrapped in `${...}` pass through untouched, as do
/// placeholders whose variable is unknown (the scheduler will then reject
/// the literal itself).
#[derive(Debug, Clone, Default)]
pub struct VariableResolver {
    variables: BTreeMap<String, String>,
}

impl VariableResolver {
    pub fn new(variables: BTreeMap<String, String>) -> Self {
        Self { variables }
    }

    /// Return the variable name if `raw` is exactly `${name}`.
    pub fn placeholder(raw: &str) -> Option<&str> {
        raw.strip_prefix("${")?.strip_suffix('}')
    }
}

impl Resolver for VariableResolver {
    fn resolve(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        match Self::placeholder(trimmed) {
            Some(name) => match self.variables.get(name) {
                Some(value) => value.trim().to_string(),
                None => {
                    warn!(variable = %name, "schedule variable is not defined");
                    trimmed.to_string()
                }
            },
            None => trimmed.to_string(),
        }
    }
}
