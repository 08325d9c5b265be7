//! Health API
//!
//! Provides system health checks and diagnostics.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::Config;
use crate::domain::session::SessionManager;
use crate::storage::{Database, migrations};

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
}

/// Health status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Warning,
    Error,
}

/// Overall system health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall_status: HealthStatus,
    pub version: String,
    pub checks: Vec<HealthCheck>,
    pub timestamp: String,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.overall_status != HealthStatus::Error
    }
}

/// Run all health checks
pub async fn check(db: &Database, manager: Option<&SessionManager>) -> HealthReport {
    let mut checks = vec![check_database(db).await, check_config()];
    if let Some(manager) = manager {
        checks.push(check_sessions(manager).await);
    }

    let overall_status = checks
        .iter()
        .map(|c| c.status)
        .fold(HealthStatus::Ok, |worst, status| match (worst, status) {
            (HealthStatus::Error, _) | (_, HealthStatus::Error) => HealthStatus::Error,
            (HealthStatus::Warning, _) | (_, HealthStatus::Warning) => HealthStatus::Warning,
            _ => HealthStatus::Ok,
        });

    HealthReport {
        overall_status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

/// Check database connection
async fn check_database(db: &Database) -> HealthCheck {
    if db.is_closed() {
        return HealthCheck {
            name: "Database".to_string(),
            status: HealthStatus::Error,
            message: Some("Connection pool is closed".to_string()),
        };
    }

    if let Err(e) = db.health_check().await {
        return HealthCheck {
            name: "Database".to_string(),
            status: HealthStatus::Error,
            message: Some(format!("Query failed: {:#}", e)),
        };
    }

    match migrations::migration_status(db.pool()).await {
        Ok(schema) if schema.needs_migration => HealthCheck {
            name: "Database".to_string(),
            status: HealthStatus::Warning,
            message: Some(format!(
                "Schema v{} behind v{} ({})",
                schema.current_version,
                schema.target_version,
                describe(db.path())
            )),
        },
        Ok(schema) => HealthCheck {
            name: "Database".to_string(),
            status: HealthStatus::Ok,
            message: Some(format!(
                "Connected and responsive, schema v{} ({})",
                schema.current_version,
                describe(db.path())
            )),
        },
        Err(e) => HealthCheck {
            name: "Database".to_string(),
            status: HealthStatus::Error,
            message: Some(format!("Schema check failed: {:#}", e)),
        },
    }
}

/// Check config file
fn check_config() -> HealthCheck {
    match Config::config_path() {
        Ok(path) if path.exists() => HealthCheck {
            name: "Configuration".to_string(),
            status: HealthStatus::Ok,
            message: Some(format!("Found at {}", path.display())),
        },
        Ok(path) => HealthCheck {
            name: "Configuration".to_string(),
            status: HealthStatus::Ok,
            message: Some(format!("Not found at {} (using defaults)", path.display())),
        },
        Err(e) => HealthCheck {
            name: "Configuration".to_string(),
            status: HealthStatus::Warning,
            message: Some(e.to_string()),
        },
    }
}

/// Summarize live sessions; sessions in `error` degrade the report
async fn check_sessions(manager: &SessionManager) -> HealthCheck {
    let stats = manager.stats().await;
    let message = format!(
        "{} live ({} connected, {} connecting, {} errored)",
        stats.total, stats.connected, stats.connecting, stats.error
    );

    HealthCheck {
        name: "Sessions".to_string(),
        status: if stats.error > 0 {
            HealthStatus::Warning
        } else {
            HealthStatus::Ok
        },
        message: Some(message),
    }
}

fn describe(path: &Path) -> String {
    if path.as_os_str() == ":memory:" {
        "in-memory".to_string()
    } else {
        path.display().to_string()
    }
}
