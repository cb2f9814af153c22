//! Pupil and teacher record lookups shared by the ledger, invites and
//! archival.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{DbResultExt, Error, Result};
use crate::pool::{self, DbHandle};

#[derive(Debug, Clone, Serialize)]
pub struct Pupil {
    pub id: i64,
    pub account_id: i64,
    pub name: String,
    pub last_name: String,
    pub gender: String,
    pub address: String,
    pub guardian_name: String,
    pub phone_number: Option<String>,
    pub guardian_number: String,
    pub date_of_birth: String,
    pub religion: String,
    pub place_of_birth: String,
    pub email: String,
    /// True when the pupil's membership row in the section is inactive.
    pub unenrolled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Teacher {
    pub id: i64,
    pub account_id: i64,
    pub name: String,
    pub last_name: String,
    pub email: String,
    pub title: String,
}

fn pupil_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pupil> {
    Ok(Pupil {
        id: row.get(0)?,
        account_id: row.get(1)?,
        name: row.get(2)?,
        last_name: row.get(3)?,
        gender: row.get(4)?,
        address: row.get(5)?,
        guardian_name: row.get(6)?,
        phone_number: row.get(7)?,
        guardian_number: row.get(8)?,
        date_of_birth: row.get(9)?,
        religion: row.get(10)?,
        place_of_birth: row.get(11)?,
        email: row.get(12)?,
        unenrolled: false,
    })
}

pub fn global_pupil_by_id(workspace: &DbHandle, pupil_id: i64) -> Result<Pupil> {
    let conn = pool::lock(workspace)?;
    conn.query_row(
        "SELECT p.id, p.account_id, p.name, p.last_name, p.gender, p.address, \
         p.guardian_name, p.phone_number, p.guardian_number, p.date_of_birth, \
         p.religion, p.place_of_birth, a.email \
         FROM pupil_global p JOIN accounts a ON a.id = p.account_id WHERE p.id = ?1",
        params![pupil_id],
        pupil_from_row,
    )
    .optional()
    .ctx("loading pupil")?
    .ok_or_else(|| Error::not_found(format!("pupil {pupil_id}")))
}

/// Same lookup through a tenant connection, where the workspace tables are
/// only reachable under the attached schema name.
pub(crate) fn attached_global_pupil(conn: &Connection, pupil_id: i64) -> Result<Pupil> {
    conn.query_row(
        "SELECT p.id, p.account_id, p.name, p.last_name, p.gender, p.address, \
         p.guardian_name, p.phone_number, p.guardian_number, p.date_of_birth, \
         p.religion, p.place_of_birth, a.email \
         FROM workspace.pupil_global p \
         JOIN workspace.accounts a ON a.id = p.account_id WHERE p.id = ?1",
        params![pupil_id],
        pupil_from_row,
    )
    .optional()
    .ctx("loading pupil")?
    .ok_or_else(|| Error::not_found(format!("pupil {pupil_id}")))
}

/// Pupils enrolled in a section, ordered by last name. Inactive memberships
/// are included only on request and flagged via `unenrolled`.
pub fn pupils_for_section(
    tenant_db: &DbHandle,
    section_id: i64,
    include_inactive: bool,
) -> Result<Vec<Pupil>> {
    let conn = pool::lock(tenant_db)?;
    pupils_for_section_conn(&conn, section_id, include_inactive)
}

pub(crate) fn pupils_for_section_conn(
    conn: &Connection,
    section_id: i64,
    include_inactive: bool,
) -> Result<Vec<Pupil>> {
    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.account_id, p.name, p.last_name, p.gender, p.address, \
             p.guardian_name, p.phone_number, p.guardian_number, p.date_of_birth, \
             p.religion, p.place_of_birth, COALESCE(a.email, ''), ps.is_active \
             FROM pupils p \
             JOIN pupils_sections ps ON ps.pupil_id = p.id \
             LEFT JOIN workspace.accounts a ON a.id = p.account_id \
             WHERE ps.section_id = ?1 AND (?2 OR ps.is_active = 1) \
             ORDER BY p.last_name, p.name",
        )
        .ctx("listing section pupils")?;
    let pupils = stmt
        .query_map(params![section_id, include_inactive], |row| {
            let mut pupil = pupil_from_row(row)?;
            let is_active: i64 = row.get(13)?;
            pupil.unenrolled = is_active == 0;
            Ok(pupil)
        })
        .ctx("listing section pupils")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .ctx("listing section pupils")?;
    Ok(pupils)
}

pub fn pupil_account_id(workspace: &DbHandle, pupil_id: i64) -> Result<i64> {
    let conn = pool::lock(workspace)?;
    conn.query_row(
        "SELECT account_id FROM pupil_global WHERE id = ?1",
        params![pupil_id],
        |row| row.get(0),
    )
    .optional()
    .ctx("loading pupil account")?
    .ok_or_else(|| Error::not_found(format!("pupil {pupil_id}")))
}

pub fn teacher_by_id(workspace: &DbHandle, teacher_id: i64) -> Result<Teacher> {
    let conn = pool::lock(workspace)?;
    teacher_by_id_conn(&conn, teacher_id)
}

pub(crate) fn teacher_by_id_conn(conn: &Connection, teacher_id: i64) -> Result<Teacher> {
    conn.query_row(
        "SELECT t.id, t.account_id, t.name, t.last_name, a.email, t.title \
         FROM teachers t JOIN accounts a ON a.id = t.account_id WHERE t.id = ?1",
        params![teacher_id],
        |row| {
            Ok(Teacher {
                id: row.get(0)?,
                account_id: row.get(1)?,
                name: row.get(2)?,
                last_name: row.get(3)?,
                email: row.get(4)?,
                title: row.get(5)?,
            })
        },
    )
    .optional()
    .ctx("loading teacher")?
    .ok_or_else(|| Error::not_found(format!("teacher {teacher_id}")))
}

pub fn teacher_account_id(workspace: &DbHandle, teacher_id: i64) -> Result<i64> {
    let conn = pool::lock(workspace)?;
    conn.query_row(
        "SELECT account_id FROM teachers WHERE id = ?1",
        params![teacher_id],
        |row| row.get(0),
    )
    .optional()
    .ctx("loading teacher account")?
    .ok_or_else(|| Error::not_found(format!("teacher {teacher_id}")))
}
