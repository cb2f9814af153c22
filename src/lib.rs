//! Data tier for a multi-tenant school records platform.
//!
//! Every school (tenant) gets its own SQLite database next to one shared
//! workspace database holding accounts, global person records, reference
//! catalogs and permanent archives. Components layer as: connection pool
//! registry -> tenant provisioning -> tenant handle factory -> gradebook
//! ledger, invites and section archival. Transport, authentication and
//! marshalling live outside this crate.

pub mod config;
pub mod error;
pub mod gradebook;
pub mod invites;
pub mod pool;
pub mod privileges;
pub mod provision;
pub mod pupils;
pub mod sections;
pub mod tenant;

pub use error::{ConflictKind, Error, Result};
pub use pool::{ConnectionRegistry, DbHandle, PoolLimits, Role};
pub use provision::WORKSPACE_DB;
pub use tenant::TenantHandle;
