//! Secret-safe logging helpers and tracing subscriber setup.

use std::fmt;

use tracing_subscriber::{fmt as tracing_fmt, prelude::*, EnvFilter};

use crate::config::ServerConfig;

/// A header/key value with everything past the first 8 characters
/// replaced, safe to pass to `tracing::info!`/`debug!` fields.
#[derive(Clone, Debug)]
pub struct SensitiveValue<'a> {
    inner: &'a str,
}

impl<'a> SensitiveValue<'a> {
    pub fn new(value: &'a str) -> Self {
        Self { inner: value }
    }
}

impl<'a> fmt::Display for SensitiveValue<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible_len = 8.min(self.inner.len());
        if self.inner.len() <= visible_len {
            write!(f, "***")
        } else {
            write!(f, "{}***", &self.inner[..visible_len])
        }
    }
}

const SENSITIVE_PREFIXES: [&str; 6] = ["Bearer ", "sk-", "sk-ant-", "pk-", "key=", "AIza"];

/// Whether a header value looks like it carries an upstream credential
/// (`Authorization: Bearer ...`, `x-api-key: sk-...`, a Gemini `?key=`).
pub fn is_sensitive_value(value: &str) -> bool {
    SENSITIVE_PREFIXES.iter().any(|prefix| value.starts_with(prefix))
}

/// Redacts `value` for logging if it looks sensitive, otherwise returns
/// it unchanged.
pub fn sanitize_header_value(value: &str) -> String {
    if is_sensitive_value(value) {
        SensitiveValue::new(value).to_string()
    } else {
        value.to_string()
    }
}

/// Initializes the global tracing subscriber. `log_format` selects
/// between human-readable and JSON output; `log_level` seeds the default
/// filter when `RUST_LOG` is unset.
pub fn init_tracing(server: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(server.log_level.clone()));

    let registry = tracing_subscriber::registry().with(filter);

    if server.log_format == "json" {
        registry.with(tracing_fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(tracing_fmt::layer().with_target(true)).init();
    }
}
