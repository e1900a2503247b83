//! Binary entrypoint for `slotmig-server`.

mod app;
mod network;
mod trace;

use clap::{Parser, ValueEnum};
use slotmig_common::config::{
    DEFAULT_KEYS_PER_BATCH, DEFAULT_MAX_MEMBERS_PER_COMMAND, DEFAULT_MIGRATION_WORKERS, LogFormat,
    MigrationConfig, NodeConfig,
};
use slotmig_common::error::{SmError, SmResult};
use slotmig_common::ids::WorkerCount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

/// RESP key-value node with asynchronous slot migration.
#[derive(Parser, Debug)]
#[command(name = "slotmig-server", version, about)]
struct Args {
    /// RESP listener port
    #[arg(long, default_value_t = 6380)]
    port: u16,

    /// Number of outbound migration connections
    #[arg(long = "migrate-workers", default_value_t = DEFAULT_MIGRATION_WORKERS)]
    migrate_workers: u16,

    /// Per-worker inbox bound and enumeration batch size
    #[arg(long = "migrate-keys-per-batch", default_value_t = DEFAULT_KEYS_PER_BATCH)]
    migrate_keys_per_batch: usize,

    /// Largest number of members sent in one collection command
    #[arg(long = "migrate-max-members", default_value_t = DEFAULT_MAX_MEMBERS_PER_COMMAND)]
    migrate_max_members: usize,

    /// Pipeline key writes instead of waiting for each acknowledgement
    #[arg(long = "migrate-pipelined")]
    migrate_pipelined: bool,

    /// Do not append write commands to the replication journal
    #[arg(long = "no-journal")]
    no_journal: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormatArg::Text)]
    log_format: LogFormatArg,
}

impl Args {
    fn into_config(self) -> SmResult<NodeConfig> {
        let worker_count = WorkerCount::new(self.migrate_workers)
            .ok_or(SmError::InvalidConfig("--migrate-workers must be non-zero"))?;
        Ok(NodeConfig {
            port: self.port,
            journal_enabled: !self.no_journal,
            migration: MigrationConfig {
                worker_count,
                keys_per_batch: self.migrate_keys_per_batch,
                max_members_per_command: self.migrate_max_members,
                pipelined: self.migrate_pipelined,
                ..MigrationConfig::default()
            },
            log_format: match self.log_format {
                LogFormatArg::Text => LogFormat::Text,
                LogFormatArg::Json => LogFormat::Json,
            },
        })
    }
}

fn main() {
    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid slotmig-server arguments: {err}");
            std::process::exit(2);
        }
    };
    if let Err(err) = trace::init(config.log_format) {
        eprintln!("failed to install logging: {err}");
        std::process::exit(1);
    }
    if let Err(err) = app::run(&config) {
        tracing::error!(error = %err, "slotmig-server stopped");
        eprintln!("failed to run slotmig-server: {err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::Args;
    use clap::Parser;
    use googletest::prelude::*;
    use rstest::rstest;
    use slotmig_common::config::{LogFormat, NodeConfig};

    #[rstest]
    fn defaults_match_node_config_defaults() {
        let config = Args::try_parse_from(["slotmig-server"])
            .expect("no arguments must parse")
            .into_config()
            .expect("defaults must be valid");
        assert_that!(&config, eq(&NodeConfig::default()));
    }

    #[rstest]
    fn flags_override_migration_tunables() {
        let config = Args::try_parse_from([
            "slotmig-server",
            "--port",
            "7000",
            "--migrate-workers",
            "2",
            "--migrate-pipelined",
            "--no-journal",
            "--log-format",
            "json",
        ])
        .expect("arguments must parse")
        .into_config()
        .expect("arguments must be valid");
        assert_that!(config.port, eq(7000));
        assert_that!(config.migration.worker_count.get(), eq(2));
        assert_that!(config.migration.pipelined, eq(true));
        assert_that!(config.journal_enabled, eq(false));
        assert_that!(config.log_format, eq(LogFormat::Json));
    }

    #[rstest]
    fn zero_workers_are_rejected() {
        let result = Args::try_parse_from(["slotmig-server", "--migrate-workers", "0"])
            .expect("arguments must parse")
            .into_config();
        assert_that!(result.is_err(), eq(true));
    }
}
