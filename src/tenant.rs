//! Tenant lookup and the handle factory every per-tenant operation goes
//! through: one resolved tenant row, its category config, and a live pair
//! of role-scoped connections (workspace + tenant database).

use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use crate::config::{self, TenantCategory, TenantConfig};
use crate::error::{DbResultExt, Error, Result};
use crate::pool::{self, ConnectionRegistry, DbHandle, Role};
use crate::provision::{self, WORKSPACE_DB};

#[derive(Debug, Clone, Serialize)]
pub struct Tenant {
    pub id: i64,
    pub tenant_name: String,
    pub category: TenantCategory,
    pub canton_code: String,
    pub canton_name: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub director_name: String,
    pub color_config: String,
    pub tenant_city: String,
    pub specialization: String,
}

#[derive(Debug, Clone)]
pub struct NewTenant {
    pub tenant_name: String,
    pub category: TenantCategory,
    pub canton_code: String,
    pub address: String,
    pub phone: String,
    pub email: String,
    pub director_name: String,
    pub color_config: String,
    pub tenant_city: String,
    pub specialization: String,
    pub domain: Option<String>,
}

const TENANT_COLUMNS: &str = "t.id, t.tenant_name, t.tenant_type, t.canton_code, c.canton_name, \
     t.address, t.phone, t.email, t.director_name, t.color_config, t.tenant_city, t.specialization";

fn row_to_tenant(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Tenant, String)> {
    let raw_type: String = row.get(2)?;
    Ok((
        Tenant {
            id: row.get(0)?,
            tenant_name: row.get(1)?,
            // normalized after the row closure, parse errors surface there
            category: TenantCategory::Primary,
            canton_code: row.get(3)?,
            canton_name: row.get(4)?,
            address: row.get(5)?,
            phone: row.get(6)?,
            email: row.get(7)?,
            director_name: row.get(8)?,
            color_config: row.get(9)?,
            tenant_city: row.get(10)?,
            specialization: row.get(11)?,
        },
        raw_type,
    ))
}

pub fn tenant_by_id(workspace: &DbHandle, tenant_id: i64) -> Result<Tenant> {
    let conn = pool::lock(workspace)?;
    let row = conn
        .query_row(
            &format!(
                "SELECT {TENANT_COLUMNS} FROM tenant t \
                 JOIN cantons c ON c.canton_code = t.canton_code WHERE t.id = ?1"
            ),
            params![tenant_id],
            row_to_tenant,
        )
        .optional()
        .ctx("loading tenant")?;
    let (mut tenant, raw_type) =
        row.ok_or_else(|| Error::not_found(format!("tenant {tenant_id}")))?;
    tenant.category = TenantCategory::parse(&raw_type)?;
    Ok(tenant)
}

/// All tenant ids, for service-role fan-out across tenant databases.
pub fn all_tenant_ids(workspace: &DbHandle) -> Result<Vec<i64>> {
    let conn = pool::lock(workspace)?;
    let mut stmt = conn
        .prepare("SELECT id FROM tenant ORDER BY id")
        .ctx("listing tenant ids")?;
    let ids = stmt
        .query_map([], |row| row.get(0))
        .ctx("listing tenant ids")?
        .collect::<std::result::Result<Vec<i64>, _>>()
        .ctx("listing tenant ids")?;
    Ok(ids)
}

/// Inserts a tenant row; duplicate domains surface as typed conflicts.
pub fn create_tenant(workspace: &DbHandle, new: &NewTenant) -> Result<Tenant> {
    let tenant_id = {
        let conn = pool::lock(workspace)?;
        conn.execute(
            "INSERT INTO tenant(tenant_name, tenant_type, canton_code, address, phone, email, \
             director_name, color_config, tenant_city, specialization, domain) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                new.tenant_name,
                new.category.as_str(),
                new.canton_code,
                new.address,
                new.phone,
                new.email,
                new.director_name,
                new.color_config,
                new.tenant_city,
                new.specialization,
                new.domain,
            ],
        )
        .ctx("inserting tenant")?;
        conn.last_insert_rowid()
    };
    tenant_by_id(workspace, tenant_id)
}

/// One resolved tenant: row, category config, and the two connections every
/// tenant-scoped operation runs against. The workspace schema is also
/// attached to the tenant connection for read joins.
pub struct TenantHandle {
    pub tenant: Tenant,
    pub config: &'static TenantConfig,
    pub workspace: DbHandle,
    pub tenant_db: DbHandle,
    pub role: Role,
}

impl TenantHandle {
    /// Workspace connection, tenant row, config, tenant connection, in that
    /// order. Any failure leaves nothing to clean up.
    pub fn resolve(registry: &ConnectionRegistry, tenant_id: i64, role: Role) -> Result<Self> {
        let workspace = registry.get(WORKSPACE_DB, role)?;
        let tenant = tenant_by_id(&workspace, tenant_id)?;
        Self::with_row(registry, tenant, role, workspace)
    }

    /// Same as `resolve` when the caller already holds the tenant row
    /// (authenticated request path).
    pub fn for_tenant(registry: &ConnectionRegistry, tenant: Tenant, role: Role) -> Result<Self> {
        let workspace = registry.get(WORKSPACE_DB, role)?;
        Self::with_row(registry, tenant, role, workspace)
    }

    /// Fixed service role, for backend-initiated fan-out.
    pub fn service(registry: &ConnectionRegistry, tenant_id: i64) -> Result<Self> {
        Self::resolve(registry, tenant_id, Role::Service)
    }

    /// Provisioning variant: creates the tenant database file before
    /// resolving the handle.
    pub fn create(registry: &ConnectionRegistry, tenant: Tenant, role: Role) -> Result<Self> {
        let config = config::tenant_config(tenant.category);
        provision::create_database(registry, config.db_prefix, &tenant.id.to_string())?;
        Self::for_tenant(registry, tenant, role)
    }

    fn with_row(
        registry: &ConnectionRegistry,
        tenant: Tenant,
        role: Role,
        workspace: DbHandle,
    ) -> Result<Self> {
        let config = config::tenant_config(tenant.category);
        let db_name = provision::database_name(config.db_prefix, &tenant.id.to_string());
        let tenant_db = registry.get(&db_name, role)?;
        Ok(TenantHandle {
            tenant,
            config,
            workspace,
            tenant_db,
            role,
        })
    }

    pub fn db_name(&self) -> String {
        provision::database_name(self.config.db_prefix, &self.tenant.id.to_string())
    }

    /// Applies the category schema and grants the role matrix. Runs on an
    /// administrative connection regardless of the handle's own role.
    pub fn create_schema(&self, registry: &ConnectionRegistry) -> Result<()> {
        let admin = registry.get(&self.db_name(), Role::Admin)?;
        provision::apply_schema(&admin, self.config.schema_sql)?;
        provision::grant_role_privileges(registry, &self.db_name())
    }

    /// Revokes role access and deletes the tenant database.
    pub fn drop_db(&self, registry: &ConnectionRegistry) -> Result<()> {
        provision::drop_database(registry, self.config.db_prefix, &self.tenant.id.to_string())
    }
}
