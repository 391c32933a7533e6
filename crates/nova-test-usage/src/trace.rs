use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What a trace producer reports for one finished test.
///
/// ```json
/// { "test": "com.example.FooTest#adds",
///   "module": "app",
///   "classes": { "com.example.Foo": ["add", "sub"] } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestTrace {
    pub test: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default)]
    pub classes: BTreeMap<String, BTreeSet<String>>,
}

impl TestTrace {
    pub fn new(test: impl Into<String>) -> Self {
        Self {
            test: test.into(),
            ..Self::default()
        }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_methods<I, S>(mut self, class: impl Into<String>, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classes
            .entry(class.into())
            .or_default()
            .extend(methods.into_iter().map(Into::into));
        self
    }

    /// Whether the test touched nothing (no class with at least one method).
    pub fn is_empty(&self) -> bool {
        self.classes.values().all(BTreeSet::is_empty)
    }
}

/// Receives one call per finished test from whatever runs the tests.
pub trait TraceSink {
    fn test_finished(&self, trace: &TestTrace) -> Result<()>;
}

/// Parses a trace document: a single trace object or an array of them.
pub fn parse_traces(text: &str) -> Result<Vec<TestTrace>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let traces = if value.is_array() {
        serde_json::from_value::<Vec<TestTrace>>(value)?
    } else {
        vec![serde_json::from_value::<TestTrace>(value)?]
    };
    Ok(traces)
}

pub fn read_trace_file(path: &Path) -> Result<Vec<TestTrace>> {
    let text = std::fs::read_to_string(path)?;
    let traces = parse_traces(&text)?;
    tracing::debug!(
        target = "nova.test_usage",
        path = %path.display(),
        traces = traces.len(),
        "read trace file"
    );
    Ok(traces)
}
