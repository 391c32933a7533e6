use std::fmt;

use nova_storage::StorageError;

pub type Result<T> = std::result::Result<T, TestUsageError>;

/// A structure that failed to close cleanly during disposal.
#[derive(Debug)]
pub struct CloseFailure {
    pub structure: &'static str,
    pub error: StorageError,
}

impl fmt::Display for CloseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.structure, self.error)
    }
}

/// Errors produced by the test-usage index.
#[derive(Debug, thiserror::Error)]
pub enum TestUsageError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open test usage index after {attempts} attempts: {last}")]
    InitializationFailed {
        attempts: u32,
        #[source]
        last: StorageError,
    },

    #[error("incompatible test usage index version: expected {expected}, found {}", describe_version(.found))]
    VersionMismatch { expected: u32, found: Option<u32> },

    #[error("failed to close {} index structure(s): {}", .failures.len(), describe_failures(.failures))]
    Close { failures: Vec<CloseFailure> },

    #[error("invalid test usage config: {message}")]
    Config { message: String },

    #[error("invalid trace: {message}")]
    Trace { message: String },
}

fn describe_version(found: &Option<u32>) -> String {
    match found {
        Some(found) => found.to_string(),
        None => "no version stamp".to_string(),
    }
}

fn describe_failures(failures: &[CloseFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for TestUsageError {
    fn from(err: serde_json::Error) -> Self {
        // Trace files carry test and class names verbatim; keep them out of error text.
        let message = sanitize_json_error_message(&err.to_string());
        Self::Trace { message }
    }
}

impl From<toml::de::Error> for TestUsageError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` includes a source snippet; keep only the message.
        let message = sanitize_json_error_message(err.message());
        Self::Config { message }
    }
}

pub(crate) fn sanitize_json_error_message(message: &str) -> String {
    // Redact all double-quoted substrings, keeping the overall structure and line/column info.
    let mut out = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(start) = rest.find('"') {
        out.push_str(&rest[..start + 1]);
        rest = &rest[start + 1..];

        let mut end = None;
        let bytes = rest.as_bytes();
        for (idx, &b) in bytes.iter().enumerate() {
            if b != b'"' {
                continue;
            }

            // Treat quotes preceded by an odd number of backslashes as escaped.
            let mut backslashes = 0usize;
            let mut k = idx;
            while k > 0 && bytes[k - 1] == b'\\' {
                backslashes += 1;
                k -= 1;
            }
            if backslashes % 2 == 0 {
                end = Some(idx);
                break;
            }
        }

        let Some(end) = end else {
            out.push_str("<redacted>");
            rest = "";
            break;
        };
        out.push_str("<redacted>\"");
        rest = &rest[end + 1..];
    }
    out.push_str(rest);

    // `serde` wraps unknown fields in backticks: `unknown field `secret`, expected ...`.
    // Only the first segment is redacted so the list of expected fields stays readable.
    if let Some(start) = out.find('`') {
        let after_start = &out[start + 1..];
        let end_rel = after_start
            .find("`, expected")
            .or_else(|| after_start.find('`'));
        if let Some(end_rel) = end_rel {
            let end = start + 1 + end_rel;
            out.replace_range(start + 1..end, "<redacted>");
        }
    }

    out
}
