//! User-facing feedback for failed form submissions.

use std::collections::BTreeMap;
use std::future::Future;

use serde_json::Value;
use tracing::debug;

use crate::api::ApiError;

/// Field name used for errors that are not tied to a single field.
pub const NON_FIELD: &str = "__all__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormFeedback {
    /// Validation failures keyed by field.
    FieldErrors(BTreeMap<String, Vec<String>>),
    NotFound(String),
    /// The server wants confirmation before it applies the change.
    Confirm(String),
    ServerError,
    Other(String),
}

impl FormFeedback {
    pub fn classify(err: &ApiError) -> Self {
        let body = err.body().unwrap_or_default();
        match err.status() {
            Some(400) => FormFeedback::FieldErrors(field_errors(body)),
            Some(404) => FormFeedback::NotFound(message(body, "Not found.")),
            Some(422) => FormFeedback::Confirm(message(body, "Please confirm to continue.")),
            Some(500..=599) => FormFeedback::ServerError,
            _ => FormFeedback::Other(message(body, &err.to_string())),
        }
    }

    pub fn is_confirmable(&self) -> bool {
        matches!(self, FormFeedback::Confirm(_))
    }
}

/// Submit a form, and if the server asks for confirmation (422) and the
/// user gives it, submit once more with the override flag set.
pub async fn submit_with_override<T, S, Fut, C>(mut submit: S, confirm: C) -> Result<T, ApiError>
where
    S: FnMut(bool) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
    C: FnOnce(&str) -> bool,
{
    match submit(false).await {
        Err(err) => match FormFeedback::classify(&err) {
            FormFeedback::Confirm(prompt) if confirm(&prompt) => {
                debug!("Re-submitting with override");
                submit(true).await
            }
            _ => Err(err),
        },
        ok => ok,
    }
}

fn field_errors(body: &str) -> BTreeMap<String, Vec<String>> {
    let mut errors: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        if !body.trim().is_empty() {
            errors.insert(NON_FIELD.to_string(), vec![body.trim().to_string()]);
        }
        return errors;
    };

    // allauth: {"errors": [{"param": "email", "message": "..."}]}
    if let Some(list) = value.get("errors").and_then(Value::as_array) {
        for entry in list {
            let Some(text) = entry.get("message").and_then(Value::as_str) else {
                continue;
            };
            let field = entry
                .get("param")
                .and_then(Value::as_str)
                .unwrap_or(NON_FIELD);
            errors.entry(field.to_string()).or_default().push(text.to_string());
        }
        return errors;
    }

    // REST framework: {"field": ["...", "..."], "detail": "..."}
    if let Some(map) = value.as_object() {
        for (field, messages) in map {
            let field = if field == "detail" || field == "non_field_errors" {
                NON_FIELD
            } else {
                field.as_str()
            };
            let texts: Vec<String> = match messages {
                Value::String(s) => vec![s.clone()],
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                _ => continue,
            };
            if !texts.is_empty() {
                errors.entry(field.to_string()).or_default().extend(texts);
            }
        }
    }
    errors
}

fn message(body: &str, fallback: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => ["detail", "message"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str))
            .unwrap_or(fallback)
            .to_string(),
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => fallback.to_string(),
    }
}
