//! Built-in metric areas.
//!
//! | Module       | Areas |
//! |--------------|-------|
//! | [`pulls`]    | `prs` |
//! | [`issues`]   | `issues` |
//! | [`workflows`]| `workflows` |
//! | [`repository`] | `releases`, `commits`, `contributors`, `branches`, `languages`, `community`, `traffic`, `stars`, `forks` |
//! | [`security`] | `dependabot`, `code-scanning`, `secret-scanning` |
//!
//! Every area reads raw JSON from the API and picks the fields it needs.
//! Missing fields fall back to neutral values rather than failing the area.

pub mod issues;
pub mod pulls;
pub mod repository;
pub mod security;
pub mod workflows;

use serde_json::Value;
use std::sync::Arc;

use crate::traits::AreaFetcher;

/// Every shipped area, in registry order.
pub fn builtin() -> Vec<Arc<dyn AreaFetcher>> {
    vec![
        Arc::new(pulls::PullRequests),
        Arc::new(issues::Issues),
        Arc::new(workflows::Workflows),
        Arc::new(repository::Releases),
        Arc::new(repository::Commits),
        Arc::new(repository::Contributors),
        Arc::new(repository::Branches),
        Arc::new(repository::Languages),
        Arc::new(repository::Community),
        Arc::new(repository::Traffic),
        Arc::new(repository::Stars),
        Arc::new(repository::Forks),
        Arc::new(security::Dependabot),
        Arc::new(security::CodeScanning),
        Arc::new(security::SecretScanning),
    ]
}

/// String at a JSON pointer, e.g. `text(pr, "/user/login")`.
pub(crate) fn text<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// String at a JSON pointer, or `fallback` when absent or empty.
pub(crate) fn text_or(value: &Value, pointer: &str, fallback: &str) -> String {
    text(value, pointer)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// Value at a JSON pointer, or `null`.
pub(crate) fn field(value: &Value, pointer: &str) -> Value {
    value.pointer(pointer).cloned().unwrap_or(Value::Null)
}

/// Whether a field is present and not `null` or `false`.
pub(crate) fn present(value: &Value, pointer: &str) -> bool {
    !matches!(
        value.pointer(pointer),
        None | Some(Value::Null) | Some(Value::Bool(false))
    )
}
