//! Shared setup for integration tests: tracing, stress sizing, and
//! quiescent-state assertions.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//!     let threads = common::stress_threads();
//!     // ... run the workload ...
//!     common::assert_quiescent(&tree, "my_test");
//! }
//! ```
//!
//! # Configuration
//!
//! Environment variables:
//! - `RUST_LOG`: Filter directives (e.g., `pavt=debug,pavt::tree=trace`)
//! - `PAVT_LOG_DIR`: Log directory (default: `logs/`)
//! - `PAVT_LOG_CONSOLE`: Set to "0" to disable console output
//! - `PAVT_STRESS_THREADS`: Worker threads for stress tests (default: 8)
//! - `PAVT_STRESS_SCALE`: Multiplier on per-thread operation counts (default: 1)
//!
//! Library events only appear when the crate is built with `--features tracing`.
//!
//! # Log Files
//!
//! Events are appended to `logs/pavt.jsonl`, one JSON object per line:
//!
//! ```bash
//! # Restarts of one operation kind
//! jq 'select(.fields.message | startswith("remove:"))' logs/pavt.jsonl
//!
//! # Failed structural checks
//! jq 'select(.level == "WARN")' logs/pavt.jsonl
//!
//! # Rotations per thread
//! jq -r 'select(.fields.message == "rotate") | .threadId' logs/pavt.jsonl | sort | uniq -c
//! ```

#![allow(dead_code)]

use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Once;

use pavt::{KeyComparator, PavtTree, Rebalance};
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

static INIT: Once = Once::new();

/// Install the console and NDJSON file subscribers once per process.
pub fn init_tracing() {
    INIT.call_once(|| {
        install_subscriber(&LogConfig::from_env());
    });
}

// ============================================================================
//  Logging
// ============================================================================

/// Where and how test logs are written.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub dir: PathBuf,
    pub file: String,
    pub console: bool,
    /// Used when `RUST_LOG` is unset.
    pub fallback_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            file: "pavt.jsonl".to_string(),
            console: true,
            fallback_level: Level::INFO,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var("PAVT_LOG_DIR") {
            config.dir = PathBuf::from(dir);
        }
        config.console = !env::var("PAVT_LOG_CONSOLE").is_ok_and(|v| v == "0");

        config
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.fallback_level.to_string()))
    }
}

#[expect(clippy::expect_used)]
fn install_subscriber(config: &LogConfig) {
    std::fs::create_dir_all(&config.dir).expect("create log directory");

    // Append: nextest runs each test binary in its own process.
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.dir.join(&config.file))
        .expect("open log file");

    let console_layer = config.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .compact()
            .with_filter(config.filter())
    });

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::sync::Mutex::new(file))
        .with_thread_ids(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .json()
        .with_filter(config.filter());

    // try_init: another test in the same binary may have installed one.
    let _ = Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

// ============================================================================
//  Stress Sizing
// ============================================================================

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(default)
}

/// Worker thread count for stress tests.
pub fn stress_threads() -> usize {
    env_usize("PAVT_STRESS_THREADS", 8)
}

/// Scale a per-thread operation count by `PAVT_STRESS_SCALE`.
pub fn scaled(ops: usize) -> usize {
    ops * env_usize("PAVT_STRESS_SCALE", 1)
}

// ============================================================================
//  Assertions
// ============================================================================

/// Assert every structural invariant of a tree with no running updates.
pub fn assert_quiescent<K, V, B, C>(tree: &PavtTree<K, V, B, C>, context: &str)
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    B: Rebalance,
    C: KeyComparator<K>,
{
    assert!(tree.check(), "{context}: snapshot chain invalid");
    assert!(tree.check_structure(), "{context}: tree shape invalid");

    let stats = tree.stats();
    tracing::info!(
        context,
        size = tree.size(),
        height = tree.height(),
        add_retries = stats.add_retries,
        remove_retries = stats.remove_retries,
        lookup_retries = stats.lookup_retries,
        rotations = stats.rotations,
        "quiescent check passed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_init_is_idempotent() {
        init_tracing();
        init_tracing();
        tracing::info!("tracing initialized");
        tracing::debug!(threads = stress_threads(), "debug event");
    }
}
