//! Process-wide `tracing` subscriber setup.

use std::sync::Once;

use slotmig_common::config::LogFormat;
use slotmig_common::error::{SmError, SmResult};
use tracing_subscriber::{EnvFilter, prelude::*};

static INIT: Once = Once::new();

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the fmt subscriber once; `RUST_LOG` overrides the default `info` filter.
pub(crate) fn init(log_format: LogFormat) -> SmResult<()> {
    let mut init_result = Ok(());
    INIT.call_once(|| {
        let env_filter = build_env_filter();
        let installed = match log_format {
            LogFormat::Text => tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .compact()
                        .with_filter(env_filter),
                )
                .try_init(),
            LogFormat::Json => tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .json()
                        .with_filter(env_filter),
                )
                .try_init(),
        };
        init_result = installed.map_err(|error| SmError::Io(format!("install subscriber: {error}")));
    });
    init_result
}
