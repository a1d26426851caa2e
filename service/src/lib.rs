//! `milestone-service` — two-party milestone sign-off service.
//!
//! Owns the milestone store (SQLite), applies baseline commitment and
//! acceptance certificate transitions under the permission gate, and
//! answers JSON-RPC-lite requests on a Unix domain socket at
//! `$XDG_RUNTIME_DIR/milestone-signoff.sock`.
//!
//! Layers, bottom-up:
//! - [`db`]: pool, migrations, transaction helper, async bridge
//! - [`store`] / [`audit`]: row mapping for milestones, deliverables,
//!   certificates, signatures and the audit log
//! - [`service`]: the orchestrating [`service::MilestoneService`]
//! - [`protocol`] / [`ipc`]: wire types and the socket listener
//! - [`config`]: layered settings for the binary

pub mod audit;
pub mod config;
pub mod db;
pub mod ipc;
pub mod protocol;
pub mod service;
pub mod store;

/// Protocol version for the sign-off service IPC.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Default socket filename.
pub const SOCKET_FILENAME: &str = "milestone-signoff.sock";

/// Get the default socket path using XDG_RUNTIME_DIR.
///
/// Falls back to `/tmp/milestone-signoff-<username>.sock` if XDG_RUNTIME_DIR
/// is not set.
pub fn default_socket_path() -> std::path::PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        std::path::PathBuf::from(runtime_dir).join(SOCKET_FILENAME)
    } else {
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        std::path::PathBuf::from(format!("/tmp/milestone-signoff-{user}.sock"))
    }
}
