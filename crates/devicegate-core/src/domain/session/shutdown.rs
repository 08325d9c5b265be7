//! Application shutdown handler for graceful session termination
//!
//! Provides centralized shutdown management ensuring all resources are
//! released in the correct order when the process terminates.
//!
//! # Resource Cleanup Order
//!
//! 1. Stop every session's event dispatcher and pairing task
//! 2. Close live network connections
//! 3. Close database connections
//!
//! Dispatchers are stopped before the sockets close so that the resulting
//! `Disconnected` events are not mirrored to the store. Sessions persisted as
//! `connected` therefore reconnect on the next start.
//!
//! # Example
//!
//! ```ignore
//! use devicegate_core::domain::session::{ShutdownConfig, ShutdownHandler};
//!
//! let handler = ShutdownHandler::new(manager, database, ShutdownConfig::default());
//!
//! // On application exit
//! let result = handler.shutdown_gracefully().await;
//! println!("Shutdown complete: {}", result.summary());
//! ```

use super::manager::SessionManager;
use crate::storage::Database;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Whether to close live connections (default: true)
    pub disconnect_clients: bool,

    /// Maximum time to wait for one client to disconnect (default: 5 seconds)
    pub disconnect_timeout: Duration,

    /// Whether to close the database pool (default: true)
    pub close_database: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            disconnect_clients: true,
            disconnect_timeout: Duration::from_secs(5),
            close_database: true,
        }
    }
}

impl ShutdownConfig {
    /// Create config for quick shutdown (short per-client timeout)
    pub fn quick() -> Self {
        Self {
            disconnect_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    /// Set the per-client disconnect timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    /// Leave the database pool open
    pub fn keep_database(mut self) -> Self {
        self.close_database = false;
        self
    }
}

/// Result of a shutdown operation
#[derive(Debug, Clone, Default)]
pub struct ShutdownResult {
    /// Number of dispatchers cancelled
    pub dispatchers_stopped: usize,

    /// Number of live connections closed
    pub sessions_disconnected: usize,

    /// Whether the database was closed
    pub database_closed: bool,

    /// Any errors that occurred (non-fatal)
    pub warnings: Vec<String>,
}

impl ShutdownResult {
    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if self.dispatchers_stopped > 0 {
            parts.push(format!("{} sessions stopped", self.dispatchers_stopped));
        }

        if self.sessions_disconnected > 0 {
            parts.push(format!("{} connections closed", self.sessions_disconnected));
        }

        if self.database_closed {
            parts.push("Database closed".to_string());
        }

        if parts.is_empty() {
            "Shutdown completed (no actions needed)".to_string()
        } else {
            parts.join("; ")
        }
    }

    /// Check if there were any warnings
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Handler for graceful application shutdown
#[derive(Debug)]
pub struct ShutdownHandler {
    session_manager: SessionManager,
    database: Database,
    config: ShutdownConfig,
}

impl ShutdownHandler {
    /// Create a new shutdown handler
    pub fn new(session_manager: SessionManager, database: Database, config: ShutdownConfig) -> Self {
        Self {
            session_manager,
            database,
            config,
        }
    }

    /// Create a shutdown handler with default configuration
    pub fn with_defaults(session_manager: SessionManager, database: Database) -> Self {
        Self::new(session_manager, database, ShutdownConfig::default())
    }

    /// Perform graceful shutdown
    ///
    /// Non-fatal errors are collected as warnings rather than failing the shutdown.
    pub async fn shutdown_gracefully(&self) -> ShutdownResult {
        let mut result = ShutdownResult::default();

        info!("Starting graceful shutdown");

        for handle in self.session_manager.registry().list().await {
            handle.end_pairing().await;
            handle.cancel();
            result.dispatchers_stopped += 1;

            if !self.config.disconnect_clients || !handle.client().is_connected() {
                continue;
            }

            let disconnect = handle.client().disconnect();
            match tokio::time::timeout(self.config.disconnect_timeout, disconnect).await {
                Ok(()) => {
                    result.sessions_disconnected += 1;
                    debug!(session_id = %handle.id(), "Connection closed");
                }
                Err(_) => {
                    let warning = format!(
                        "Session {} did not disconnect within {:?}",
                        handle.display_key(),
                        self.config.disconnect_timeout
                    );
                    warn!("{}", warning);
                    result.warnings.push(warning);
                }
            }
        }

        if self.config.close_database {
            self.database.close().await;
            result.database_closed = true;
            debug!("Database connection closed");
        }

        info!(
            stopped = result.dispatchers_stopped,
            disconnected = result.sessions_disconnected,
            "Graceful shutdown completed"
        );

        result
    }
}
