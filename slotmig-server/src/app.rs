//! Node composition root: one keyspace, one replication journal and one migration coordinator.

mod cluster_wire;
mod migrate_wire;

use std::net::SocketAddr;
use std::sync::Arc;

use slotmig_cluster::MigrationManager;
use slotmig_common::config::NodeConfig;
use slotmig_common::error::SmResult;
use slotmig_core::command::{CommandFrame, CommandReply};
use slotmig_replication::ReplicationLog;
use slotmig_storage::Db;
use tracing::info;

use crate::network::{ServerReactor, ServerReactorConfig};

/// Request router shared by every client connection of one node.
#[derive(Debug)]
pub struct NodeApp {
    config: NodeConfig,
    db: Arc<Db>,
    journal: Arc<ReplicationLog>,
    migration: MigrationManager,
}

impl NodeApp {
    /// Builds a node serving `db` operations and migrating out of the same keyspace.
    #[must_use]
    pub fn new(config: NodeConfig, journal: Arc<ReplicationLog>) -> Self {
        let db = Arc::new(Db::new(journal.clone()));
        let migration = MigrationManager::new(db.clone(), config.migration.clone());
        Self {
            config,
            db,
            journal,
            migration,
        }
    }

    /// One-line summary logged at startup.
    #[must_use]
    pub fn startup_summary(&self) -> String {
        format!(
            "slotmig-server port={} journal={} migrate_workers={} keys_per_batch={} pipelined={}",
            self.config.port,
            self.journal.enabled,
            self.config.migration.worker_count.get(),
            self.config.migration.keys_per_batch,
            self.config.migration.pipelined,
        )
    }

    /// Routes one client request to the migration admin surface, `CLUSTER`, or the data table.
    #[must_use]
    pub fn execute(&self, frame: &CommandFrame) -> CommandReply {
        match frame.name.to_ascii_uppercase().as_str() {
            "CLUSTER" => self.execute_cluster(frame),
            "SLOTSMGRTSLOT-ASYNC" => self.execute_migrate_slot(frame),
            "SLOTSMGRTONE-ASYNC" => self.execute_migrate_one(frame),
            "SLOTSMGRT-ASYNC-STATUS" => self.execute_migrate_status(frame),
            "SLOTSMGRT-ASYNC-CANCEL" => self.execute_migrate_cancel(frame),
            _ => self.db.execute(frame),
        }
    }

    #[cfg(test)]
    pub fn migration(&self) -> &MigrationManager {
        &self.migration
    }
}

/// Binds the RESP listener and serves requests until an I/O error stops the reactor.
///
/// # Errors
///
/// Returns `SmError::Io` when the listener cannot be bound or polling fails.
pub fn run(config: &NodeConfig) -> SmResult<()> {
    let journal = Arc::new(ReplicationLog::new(config.journal_enabled));
    let app = NodeApp::new(config.clone(), journal);
    let address = SocketAddr::from(([0, 0, 0, 0], config.port));
    let mut reactor = ServerReactor::bind(address, ServerReactorConfig::default())?;
    info!(addr = %reactor.local_addr()?, "{}", app.startup_summary());
    loop {
        let _ = reactor.poll_once(&app, None)?;
    }
}
