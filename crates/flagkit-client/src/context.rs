//! Evaluation context and its query-string encoding.
//!
//! Contexts are immutable inputs to contextual evaluation calls. They are
//! encoded into the URL query (never a request body): nested user fields
//! become `user_id` / `user_<attr>` pairs and top-level attributes pass
//! through unchanged. Insertion order is preserved so fixtures stay
//! deterministic, although the backend does not require a specific order.

use serde_json::Value;
use url::form_urlencoded;

/// Caller-supplied attributes used for server-side targeted evaluation.
///
/// The context is never stored beyond the call it is passed to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationContext {
    /// Optional user identity block.
    user: Option<UserContext>,
    /// Top-level attributes in insertion order.
    attributes: Vec<(String, Value)>,
}

/// User identity carried inside an [`EvaluationContext`].
#[derive(Debug, Clone, PartialEq)]
pub struct UserContext {
    /// Stable user identifier, encoded as `user_id`.
    id: String,
    /// Additional user attributes in insertion order, encoded as `user_<name>`.
    attributes: Vec<(String, Value)>,
}

impl UserContext {
    /// Creates a user block with the given identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Vec::new(),
        }
    }

    /// Adds a user attribute, keeping insertion order.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }
}

impl EvaluationContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for the common user-only case.
    pub fn for_user(id: impl Into<String>) -> Self {
        Self::new().with_user(UserContext::new(id))
    }

    /// Attaches the user identity block.
    pub fn with_user(mut self, user: UserContext) -> Self {
        self.user = Some(user);
        self
    }

    /// Adds a top-level attribute, keeping insertion order.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    /// Returns the flat `key=value` pairs this context encodes to.
    ///
    /// User pairs come first (`user_id`, then user attributes), followed by
    /// top-level attributes. No keys are filtered; whatever the caller
    /// supplies is forwarded.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(user) = &self.user {
            pairs.push(("user_id".to_string(), user.id.clone()));
            for (name, value) in &user.attributes {
                pairs.push((format!("user_{name}"), stringify(value)));
            }
        }
        for (name, value) in &self.attributes {
            pairs.push((name.clone(), stringify(value)));
        }
        pairs
    }

    /// Percent-encodes the context as a query string (no leading `?`).
    pub fn to_query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in self.to_query_pairs() {
            serializer.append_pair(&key, &value);
        }
        serializer.finish()
    }

    /// Returns `true` when the context carries no attributes at all.
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.attributes.is_empty()
    }
}

/// Renders an attribute value for the query string.
///
/// Strings pass through unquoted; every other JSON value uses its compact
/// serialization (`42`, `true`, `{"a":1}`).
fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
