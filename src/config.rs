use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// School category a tenant belongs to. Stored tenant rows may still carry
/// the legacy spellings; `parse` normalizes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantCategory {
    Primary,
    Secondary,
}

impl TenantCategory {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "primary" | "osnovna škola" => Ok(TenantCategory::Primary),
            "secondary" | "srednja škola" => Ok(TenantCategory::Secondary),
            other => Err(Error::not_found(format!("tenant category {other:?}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TenantCategory::Primary => "primary",
            TenantCategory::Secondary => "secondary",
        }
    }
}

/// Per-category settings: database naming, which schema to apply, which
/// permanent workspace tables archival writes to, and the final semester of
/// a school year for that category.
#[derive(Debug, Clone, Copy)]
pub struct TenantConfig {
    pub category: TenantCategory,
    pub db_prefix: &'static str,
    pub schema_sql: &'static str,
    pub final_grade_table: &'static str,
    pub behaviour_grade_table: &'static str,
    pub max_semester_code: &'static str,
    pub enrollment_flag_column: &'static str,
}

const PRIMARY: TenantConfig = TenantConfig {
    category: TenantCategory::Primary,
    db_prefix: "classbook_tenant_db_tenant_id_",
    schema_sql: include_str!("../schema/tenant_primary.sql"),
    final_grade_table: "primary_school_final_grades",
    behaviour_grade_table: "primary_school_behaviour_grades",
    max_semester_code: "2POL",
    enrollment_flag_column: "available_for_enrollment",
};

const SECONDARY: TenantConfig = TenantConfig {
    category: TenantCategory::Secondary,
    db_prefix: "classbook_tenant_db_tenant_id_",
    schema_sql: include_str!("../schema/tenant_secondary.sql"),
    final_grade_table: "high_school_final_grades",
    behaviour_grade_table: "high_school_behaviour_grades",
    max_semester_code: "2POL",
    enrollment_flag_column: "available_for_enrollment",
};

pub fn tenant_config(category: TenantCategory) -> &'static TenantConfig {
    match category {
        TenantCategory::Primary => &PRIMARY,
        TenantCategory::Secondary => &SECONDARY,
    }
}
