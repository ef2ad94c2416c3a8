//! Diagnostics context
//!
//! Soft diagnostics are collected rather than raised: the machine records
//! oddities it can survive (e.g. saving an object that references a dirty
//! one) so test harnesses can assert afterwards that none occurred. Nothing
//! here influences control flow.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "realm_vm=info";

#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    /// Log soft diagnostics at warn level instead of debug.
    pub verbose: bool,
    errors: Vec<String>,
}

impl Diagnostics {
    pub fn new(verbose: bool) -> Self {
        Diagnostics {
            verbose,
            errors: Vec::new(),
        }
    }

    pub fn record(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.verbose {
            tracing::warn!(diagnostic = %message, "soft diagnostic");
        } else {
            tracing::debug!(diagnostic = %message, "soft diagnostic");
        }
        self.errors.push(message);
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Hand back everything recorded so far and start over.
    pub fn take(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }
}

/// Install a fmt subscriber driven by `RUST_LOG` (default `realm_vm=info`).
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_take() {
        init_tracing();
        let mut diag = Diagnostics::default();
        assert!(diag.is_clean());

        diag.record("referencing dirty object");
        assert_eq!(diag.errors(), ["referencing dirty object".to_string()]);
        assert!(!diag.is_clean());

        assert_eq!(diag.take().len(), 1);
        assert!(diag.is_clean());
    }

    #[test]
    fn test_verbose_record_only_changes_log_level() {
        init_tracing();
        let mut diag = Diagnostics::new(true);
        diag.record("first");
        diag.record(String::from("second"));
        assert_eq!(diag.take(), vec!["first".to_string(), "second".to_string()]);
        assert!(diag.is_clean());
    }
}
