use crate::step::{StepName, StepResult};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::error;

/// Key of a value in the [`WorkflowContext`] data bag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextKey(String);

impl ContextKey {
    /// Creates a new ContextKey
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContextKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ContextKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::borrow::Borrow<str> for ContextKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// State shared by all steps of one workflow run.
///
/// Keys are not namespaced: two steps writing the same key overwrite each
/// other, and choosing distinct keys is up to the workflow author.
///
/// # Examples
///
/// ```
/// use bulkflow::WorkflowContext;
/// use serde_json::json;
///
/// let mut ctx = WorkflowContext::new("order-sync-20240101-120000");
/// ctx.insert("order_ids", json!([101, 102]));
/// ctx.insert("dry_run", true);
///
/// assert_eq!(ctx.get::<Vec<u32>>("order_ids"), Some(vec![101, 102]));
/// assert_eq!(ctx.get::<bool>("dry_run"), Some(true));
/// assert_eq!(ctx.get::<String>("dry_run"), None);
/// ```
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    workflow_id: String,
    started_at: DateTime<Utc>,
    data: HashMap<ContextKey, Value>,
    step_results: IndexMap<StepName, StepResult>,
    errors: Vec<String>,
}

impl WorkflowContext {
    /// Creates an empty context for the given run
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self::started(workflow_id, Utc::now())
    }

    pub(crate) fn started(workflow_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            started_at,
            data: HashMap::new(),
            step_results: IndexMap::new(),
            errors: Vec::new(),
        }
    }

    /// Identifier of the run this context belongs to
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Stores a value, replacing any previous value under the same key.
    pub fn insert(&mut self, key: impl Into<ContextKey>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Serializes `value` and stores it.
    pub fn set<V: Serialize>(
        &mut self,
        key: impl Into<ContextKey>,
        value: &V,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.data.insert(key.into(), value);
        Ok(())
    }

    /// Returns the value for `key` converted to `T`.
    ///
    /// Returns `None` if the key doesn't exist or the value has another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Returns the raw JSON value for `key`
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_value_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.data.get_mut(key)
    }

    /// Removes a value, returning it if present
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn data(&self) -> &HashMap<ContextKey, Value> {
        &self.data
    }

    /// Inserts every pair, overwriting existing keys
    pub fn extend(&mut self, values: impl IntoIterator<Item = (String, Value)>) {
        self.data
            .extend(values.into_iter().map(|(k, v)| (ContextKey::from(k), v)));
    }

    /// Results recorded so far, in execution order.
    pub fn step_results(&self) -> &IndexMap<StepName, StepResult> {
        &self.step_results
    }

    pub fn step_result(&self, name: &str) -> Option<&StepResult> {
        self.step_results.get(name)
    }

    pub(crate) fn record_step(&mut self, name: StepName, result: StepResult) {
        self.step_results.insert(name, result);
    }

    pub(crate) fn into_step_results(self) -> IndexMap<StepName, StepResult> {
        self.step_results
    }

    /// Appends a timestamped entry to the run's error log.
    pub fn add_error(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        error!(workflow_id = %self.workflow_id, "{}", message);
        self.errors
            .push(format!("[{}] {}", Utc::now().to_rfc3339(), message));
    }

    /// Timestamped error entries, oldest first
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Stringified copy of the data bag, as written to the run record.
    /// String values are kept verbatim, everything else is rendered as JSON.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.data
            .iter()
            .map(|(k, v)| {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.to_string(), rendered)
            })
            .collect()
    }
}
