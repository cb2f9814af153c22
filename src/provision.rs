//! Tenant database lifecycle: create/drop, schema application, privilege
//! grant/revoke.
//!
//! Provisioning is cooperative: callers that created an admin identity
//! before `create_database` are expected to delete it again when a later
//! step here fails. Nothing in this module rolls back caller-side state.

use rusqlite::Connection;

use crate::error::{DbResultExt, Result};
use crate::pool::{self, ConnectionRegistry, DbHandle, Role};
use crate::privileges;

pub const WORKSPACE_DB: &str = "classbook_workspace";

pub const WORKSPACE_SCHEMA: &str = include_str!("../schema/workspace.sql");

/// Characters MariaDB-era identifiers allowed but database names cannot
/// carry are folded to underscores.
pub fn sanitize_identifier(raw: &str) -> String {
    raw.replace('@', "_").replace('.', "_")
}

pub fn database_name(prefix: &str, tenant_id: &str) -> String {
    format!("{prefix}{}", sanitize_identifier(tenant_id))
}

/// Creates the database file if it does not exist yet. Idempotent; returns
/// the deterministic database name either way.
pub fn create_database(
    registry: &ConnectionRegistry,
    prefix: &str,
    tenant_id: &str,
) -> Result<String> {
    let name = database_name(prefix, tenant_id);
    registry.create_database_file(&name)?;
    tracing::debug!(db = name.as_str(), "database ready");
    Ok(name)
}

/// Revokes role access, then removes the database file and its pooled
/// handles.
pub fn drop_database(registry: &ConnectionRegistry, prefix: &str, tenant_id: &str) -> Result<()> {
    let name = database_name(prefix, tenant_id);
    revoke_role_privileges(registry, &name);
    registry.remove_database_file(&name)
}

/// Creates the workspace database and applies its schema (idempotent DDL).
pub fn ensure_workspace(registry: &ConnectionRegistry) -> Result<()> {
    registry.create_database_file(WORKSPACE_DB)?;
    let handle = registry.get(WORKSPACE_DB, Role::Admin)?;
    apply_schema(&handle, WORKSPACE_SCHEMA)
}

/// Runs a multi-statement schema batch. Supports the client-side
/// `DELIMITER` directive used by the trigger blocks, skips `--`/`#` comment
/// lines and blank lines, and flushes a trailing unterminated statement.
pub fn apply_schema(handle: &DbHandle, sql: &str) -> Result<()> {
    let conn = pool::lock(handle)?;
    for (index, statement) in split_sql_batch(sql).iter().enumerate() {
        conn.execute_batch(statement)
            .ctx(&format!("schema statement {}", index + 1))?;
    }
    Ok(())
}

/// Splits a schema file into executable statements, honoring `DELIMITER`.
pub fn split_sql_batch(content: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut delimiter = ";".to_string();
    let mut current = String::new();

    for raw_line in content.replace("\r\n", "\n").lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with("--") || line.starts_with('#') {
            continue;
        }
        if line.to_uppercase().starts_with("DELIMITER ") {
            delimiter = line["DELIMITER ".len()..].trim().to_string();
            continue;
        }
        current.push_str(raw_line);
        current.push('\n');
        if line.ends_with(delimiter.as_str()) {
            let stmt = current.trim_end();
            let stmt = stmt[..stmt.len() - delimiter.len()].trim();
            if !stmt.is_empty() {
                statements.push(stmt.to_string());
            }
            current.clear();
        }
    }
    let trailing = current.trim();
    if !trailing.is_empty() {
        statements.push(trailing.to_string());
    }
    statements
}

/// Marks the database accessible to the non-admin roles. Matrix tables
/// missing from the schema are logged and skipped, never fatal.
pub fn grant_role_privileges(registry: &ConnectionRegistry, db_name: &str) -> Result<()> {
    let handle = registry.get(db_name, Role::Admin)?;
    {
        let conn = pool::lock(&handle)?;
        for role in [Role::Staff, Role::Learner, Role::Service] {
            let Some(matrix) = privileges::table_privileges(role) else {
                continue;
            };
            for privilege in matrix {
                match table_exists(&conn, privilege.table) {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(
                            db = db_name,
                            role = %role,
                            table = privilege.table,
                            "grant target missing from schema, skipping"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            db = db_name,
                            table = privilege.table,
                            error = %e,
                            "grant check failed, skipping"
                        );
                    }
                }
            }
        }
    }
    registry.grant_database(db_name);
    Ok(())
}

/// Withdraws role access. Idempotent; never fails the caller.
pub fn revoke_role_privileges(registry: &ConnectionRegistry, db_name: &str) {
    if !registry.is_granted(db_name) {
        tracing::warn!(db = db_name, "revoke of an ungranted database, continuing");
    }
    registry.revoke_database(db_name);
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .ctx("checking table existence")?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_email_style_identifiers() {
        assert_eq!(sanitize_identifier("user@school.ba"), "user_school_ba");
        assert_eq!(database_name("prefix_", "12"), "prefix_12");
    }

    #[test]
    fn splits_plain_statements() {
        let batch = "CREATE TABLE a(x INTEGER);\n\n-- comment\nCREATE TABLE b(y INTEGER);\n";
        let stmts = split_sql_batch(batch);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0], "CREATE TABLE a(x INTEGER)");
    }

    #[test]
    fn honors_delimiter_directive() {
        let batch = "CREATE TABLE a(x INTEGER);\nDELIMITER //\nCREATE TRIGGER t AFTER INSERT ON a\nBEGIN\n  SELECT 1;\nEND//\nDELIMITER ;\nCREATE TABLE b(y INTEGER);\n";
        let stmts = split_sql_batch(batch);
        assert_eq!(stmts.len(), 3);
        assert!(stmts[1].starts_with("CREATE TRIGGER"));
        assert!(stmts[1].ends_with("END"));
        assert!(stmts[1].contains("SELECT 1;"));
    }

    #[test]
    fn flushes_trailing_unterminated_statement() {
        let stmts = split_sql_batch("CREATE TABLE a(x INTEGER)");
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn skips_hash_comments_and_crlf() {
        let stmts = split_sql_batch("# header\r\nCREATE TABLE a(x INTEGER);\r\n");
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn schema_files_split_cleanly() {
        assert!(!split_sql_batch(WORKSPACE_SCHEMA).is_empty());
        let primary = split_sql_batch(crate::config::tenant_config(
            crate::config::TenantCategory::Primary,
        )
        .schema_sql);
        assert!(primary.iter().any(|s| s.contains("CREATE TRIGGER")));
        assert!(primary.iter().all(|s| !s.contains("DELIMITER")));
    }
}
