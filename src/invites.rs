//! Pupil and teacher section invites.
//!
//! Invites live in the tenant database; a row per invite is mirrored into
//! `workspace.invite_index` so an account's inbox can be assembled without
//! touching every tenant database. Cross-database flows write the tenant
//! side first and commit it first; index maintenance is idempotent and
//! deletes always match the exact (invite, account, tenant) triple, since
//! invite ids are only unique per tenant database.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{DbResultExt, Error, Result};
use crate::pool;
use crate::pupils::{self, Pupil};
use crate::sections::Subject;
use crate::tenant::TenantHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Declined,
}

impl InviteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Pending => "pending",
            InviteStatus::Accepted => "accepted",
            InviteStatus::Declined => "declined",
        }
    }
}

impl FromSql for InviteStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "pending" => Ok(InviteStatus::Pending),
            "accepted" => Ok(InviteStatus::Accepted),
            "declined" => Ok(InviteStatus::Declined),
            other => Err(FromSqlError::Other(
                format!("unknown invite status {other:?}").into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PupilSectionInvite {
    pub id: i64,
    pub pupil_id: i64,
    pub pupil_full_name: String,
    pub pupil_email: String,
    pub section_id: i64,
    pub section_name: String,
    pub invite_date: String,
    pub status: InviteStatus,
    pub tenant_id: i64,
    pub tenant_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeacherSectionInvite {
    pub id: i64,
    pub teacher_id: i64,
    pub teacher_full_name: String,
    pub teacher_email: String,
    pub section_id: i64,
    pub section_name: String,
    pub invite_date: String,
    pub status: InviteStatus,
    pub homeroom_teacher: bool,
    pub tenant_id: i64,
    pub tenant_name: String,
    pub subjects: Vec<Subject>,
}

/// One row of an account's cross-tenant invite inbox.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalInvite {
    pub id: i64,
    pub invite_id: i64,
    pub account_id: i64,
    pub tenant_id: i64,
    pub tenant_name: String,
}

/// Desired state of one teacher/section pairing, as submitted by the
/// assignment management screen.
#[derive(Debug, Clone)]
pub struct SectionAssignment {
    pub section_id: i64,
    pub homeroom_request: bool,
    pub subjects: Vec<SubjectSelection>,
}

#[derive(Debug, Clone)]
pub struct SubjectSelection {
    pub subject_code: String,
    pub selected: bool,
}

fn pupil_invite_query(filter: &str) -> String {
    format!(
        "SELECT i.id, i.pupil_id, p.name || ' ' || p.last_name, COALESCE(a.email, ''), \
         i.section_id, 'Section ' || s.class_code || '-' || s.section_code, \
         i.invite_date, i.status \
         FROM pupils_sections_invite i \
         JOIN workspace.pupil_global p ON p.id = i.pupil_id \
         JOIN sections s ON s.id = i.section_id \
         LEFT JOIN workspace.accounts a ON a.id = p.account_id \
         {filter} ORDER BY i.invite_date, i.id"
    )
}

fn pupil_invite_from_row(
    handle: &TenantHandle,
) -> impl Fn(&rusqlite::Row<'_>) -> rusqlite::Result<PupilSectionInvite> + '_ {
    move |row| {
        Ok(PupilSectionInvite {
            id: row.get(0)?,
            pupil_id: row.get(1)?,
            pupil_full_name: row.get(2)?,
            pupil_email: row.get(3)?,
            section_id: row.get(4)?,
            section_name: row.get(5)?,
            invite_date: row.get(6)?,
            status: row.get(7)?,
            tenant_id: handle.tenant.id,
            tenant_name: handle.tenant.tenant_name.clone(),
        })
    }
}

pub fn pupil_invite_by_id(handle: &TenantHandle, invite_id: i64) -> Result<PupilSectionInvite> {
    let conn = pool::lock(&handle.tenant_db)?;
    conn.query_row(
        &pupil_invite_query("WHERE i.id = ?1"),
        params![invite_id],
        pupil_invite_from_row(handle),
    )
    .optional()
    .ctx("loading pupil invite")?
    .ok_or_else(|| Error::not_found(format!("invite {invite_id}")))
}

pub fn pupil_invites_for_section(
    handle: &TenantHandle,
    section_id: i64,
) -> Result<Vec<PupilSectionInvite>> {
    let conn = pool::lock(&handle.tenant_db)?;
    let mut stmt = conn
        .prepare(&pupil_invite_query("WHERE i.section_id = ?1"))
        .ctx("listing pupil invites")?;
    let invites = stmt
        .query_map(params![section_id], pupil_invite_from_row(handle))
        .ctx("listing pupil invites")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .ctx("listing pupil invites")?;
    Ok(invites)
}

/// Creates a pending invite and mirrors it into the workspace index. The
/// tenant row is written first; an index failure leaves a tenant-only
/// invite the delete path can still clean up.
pub fn send_pupil_invite(
    handle: &TenantHandle,
    pupil_id: i64,
    section_id: i64,
) -> Result<PupilSectionInvite> {
    let account_id = pupils::pupil_account_id(&handle.workspace, pupil_id)?;
    let invite_id = {
        let conn = pool::lock(&handle.tenant_db)?;
        conn.execute(
            "INSERT INTO pupils_sections_invite(pupil_id, section_id) VALUES (?1, ?2)",
            params![pupil_id, section_id],
        )
        .ctx("inserting pupil invite")?;
        conn.last_insert_rowid()
    };
    insert_invite_index(handle, invite_id, account_id)?;
    pupil_invite_by_id(handle, invite_id)
}

/// Accepts an invite: flips the status, materializes the pupil into the
/// tenant database, activates the membership and records the tenant
/// membership in the workspace. Tenant transaction commits first.
/// Re-accepting an already-accepted invite is an idempotent no-op; a
/// declined invite is terminal and cannot be accepted.
pub fn accept_pupil_invite(handle: &TenantHandle, invite_id: i64) -> Result<()> {
    let mut tenant_conn = pool::lock(&handle.tenant_db)?;
    let tenant_tx = tenant_conn.transaction().ctx("starting invite transaction")?;

    let (pupil_id, status): (i64, InviteStatus) = tenant_tx
        .query_row(
            "SELECT pupil_id, status FROM pupils_sections_invite WHERE id = ?1",
            params![invite_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .ctx("loading pupil invite")?
        .ok_or_else(|| Error::not_found(format!("invite {invite_id}")))?;
    match status {
        InviteStatus::Accepted => return Ok(()),
        InviteStatus::Declined => {
            return Err(Error::Precondition(format!(
                "invite {invite_id} was declined"
            )))
        }
        InviteStatus::Pending => {}
    }
    tenant_tx
        .execute(
            "UPDATE pupils_sections_invite SET status = 'accepted' WHERE id = ?1",
            params![invite_id],
        )
        .ctx("accepting pupil invite")?;
    tenant_tx
        .execute(
            "INSERT OR IGNORE INTO pupils(id, account_id, name, last_name, gender, address, \
             guardian_name, phone_number, guardian_number, date_of_birth, religion, place_of_birth) \
             SELECT p.id, p.account_id, p.name, p.last_name, p.gender, p.address, \
             p.guardian_name, p.phone_number, p.guardian_number, p.date_of_birth, p.religion, \
             p.place_of_birth FROM workspace.pupil_global p WHERE p.id = ?1",
            params![pupil_id],
        )
        .ctx("materializing pupil")?;
    tenant_tx
        .execute(
            "INSERT INTO pupils_sections(pupil_id, section_id, is_active) \
             SELECT pupil_id, section_id, 1 FROM pupils_sections_invite WHERE id = ?1 \
             ON CONFLICT(pupil_id, section_id) DO UPDATE SET is_active = 1",
            params![invite_id],
        )
        .ctx("activating membership")?;

    let mut workspace_conn = pool::lock(&handle.workspace)?;
    let workspace_tx = workspace_conn
        .transaction()
        .ctx("starting workspace transaction")?;
    workspace_tx
        .execute(
            "INSERT OR IGNORE INTO pupil_tenant(pupil_id, tenant_id) VALUES (?1, ?2)",
            params![pupil_id, handle.tenant.id],
        )
        .ctx("recording tenant membership")?;

    tenant_tx.commit().ctx("committing invite")?;
    workspace_tx.commit().ctx("committing tenant membership")
}

pub fn decline_pupil_invite(handle: &TenantHandle, invite_id: i64) -> Result<()> {
    let conn = pool::lock(&handle.tenant_db)?;
    flip_pending(
        &conn,
        "pupils_sections_invite",
        "pupil_id",
        invite_id,
        InviteStatus::Declined,
    )?;
    Ok(())
}

/// Deletes the invite and its index mirror.
pub fn delete_pupil_invite(handle: &TenantHandle, invite_id: i64) -> Result<()> {
    let pupil_id: i64 = {
        let conn = pool::lock(&handle.tenant_db)?;
        let pupil_id = conn
            .query_row(
                "SELECT pupil_id FROM pupils_sections_invite WHERE id = ?1",
                params![invite_id],
                |row| row.get(0),
            )
            .optional()
            .ctx("loading pupil invite")?
            .ok_or_else(|| Error::not_found(format!("invite {invite_id}")))?;
        conn.execute(
            "DELETE FROM pupils_sections_invite WHERE id = ?1",
            params![invite_id],
        )
        .ctx("deleting pupil invite")?;
        pupil_id
    };
    let account_id = pupils::pupil_account_id(&handle.workspace, pupil_id)?;
    delete_invite_index(handle, invite_id, account_id)
}

/// Pupils that can still be invited to the section: members of the tenant,
/// not already active in it, without a pending invite, and not active in
/// another section of the same class level unless they have been released
/// for re-enrollment (repeating a failed year).
pub fn pupils_eligible_for_section(handle: &TenantHandle, section_id: i64) -> Result<Vec<Pupil>> {
    let conn = pool::lock(&handle.tenant_db)?;
    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.account_id, p.name, p.last_name, p.gender, p.address, \
             p.guardian_name, p.phone_number, p.guardian_number, p.date_of_birth, \
             p.religion, p.place_of_birth, COALESCE(a.email, '') \
             FROM workspace.pupil_global p \
             LEFT JOIN workspace.accounts a ON a.id = p.account_id \
             JOIN workspace.pupil_tenant pt ON pt.pupil_id = p.id AND pt.tenant_id = ?1 \
             WHERE NOT EXISTS (SELECT 1 FROM pupils_sections ps \
                   WHERE ps.pupil_id = p.id AND ps.section_id = ?2 AND ps.is_active = 1) \
               AND NOT EXISTS (SELECT 1 FROM pupils_sections_invite i \
                   WHERE i.pupil_id = p.id AND i.section_id = ?2 AND i.status = 'pending') \
               AND (pt.available_for_enrollment = 1 OR NOT EXISTS ( \
                   SELECT 1 FROM pupils_sections ps2 \
                   JOIN sections s2 ON s2.id = ps2.section_id \
                   WHERE ps2.pupil_id = p.id AND ps2.is_active = 1 \
                     AND s2.class_code = (SELECT class_code FROM sections WHERE id = ?2))) \
             ORDER BY p.last_name, p.name",
        )
        .ctx("listing eligible pupils")?;
    let pupils = stmt
        .query_map(params![handle.tenant.id, section_id], pupil_row)
        .ctx("listing eligible pupils")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .ctx("listing eligible pupils")?;
    Ok(pupils)
}

/// Pupils holding a pending invite for the section.
pub fn pupils_with_pending_invites(
    handle: &TenantHandle,
    section_id: i64,
) -> Result<Vec<Pupil>> {
    let conn = pool::lock(&handle.tenant_db)?;
    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.account_id, p.name, p.last_name, p.gender, p.address, \
             p.guardian_name, p.phone_number, p.guardian_number, p.date_of_birth, \
             p.religion, p.place_of_birth, COALESCE(a.email, '') \
             FROM workspace.pupil_global p \
             LEFT JOIN workspace.accounts a ON a.id = p.account_id \
             JOIN pupils_sections_invite i ON i.pupil_id = p.id \
             WHERE i.section_id = ?1 AND i.status = 'pending' \
             ORDER BY p.last_name, p.name",
        )
        .ctx("listing invited pupils")?;
    let pupils = stmt
        .query_map(params![section_id], pupil_row)
        .ctx("listing invited pupils")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .ctx("listing invited pupils")?;
    Ok(pupils)
}

fn pupil_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pupil> {
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

/// An account's invite inbox across every tenant.
pub fn global_invites_for_account(
    workspace: &crate::pool::DbHandle,
    account_id: i64,
) -> Result<Vec<GlobalInvite>> {
    let conn = pool::lock(workspace)?;
    let mut stmt = conn
        .prepare(
            "SELECT i.id, i.invite_id, i.account_id, i.tenant_id, t.tenant_name \
             FROM invite_index i JOIN tenant t ON t.id = i.tenant_id \
             WHERE i.account_id = ?1 ORDER BY i.id",
        )
        .ctx("listing account invites")?;
    let invites = stmt
        .query_map(params![account_id], |row| {
            Ok(GlobalInvite {
                id: row.get(0)?,
                invite_id: row.get(1)?,
                account_id: row.get(2)?,
                tenant_id: row.get(3)?,
                tenant_name: row.get(4)?,
            })
        })
        .ctx("listing account invites")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .ctx("listing account invites")?;
    Ok(invites)
}

fn teacher_invite_query(filter: &str) -> String {
    format!(
        "SELECT i.id, i.teacher_id, t.name || ' ' || t.last_name, COALESCE(a.email, ''), \
         i.section_id, 'Section ' || s.class_code || '-' || s.section_code, \
         i.invite_date, i.status, i.homeroom_teacher, \
         sub.subject_code, sub.subject_name \
         FROM teachers_sections_invite i \
         JOIN workspace.teachers t ON t.id = i.teacher_id \
         JOIN sections s ON s.id = i.section_id \
         LEFT JOIN workspace.accounts a ON a.id = t.account_id \
         LEFT JOIN teachers_sections_invite_subjects isub ON isub.invite_id = i.id \
         LEFT JOIN workspace.subjects sub ON sub.subject_code = isub.subject_code \
         {filter} ORDER BY i.id, sub.subject_name"
    )
}

fn collect_teacher_invites(
    handle: &TenantHandle,
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<TeacherSectionInvite>> {
    let mut stmt = conn.prepare(sql).ctx("listing teacher invites")?;
    let mut rows = stmt.query(params).ctx("listing teacher invites")?;
    let mut invites: Vec<TeacherSectionInvite> = Vec::new();
    while let Some(row) = rows.next().ctx("listing teacher invites")? {
        let id: i64 = row.get(0).ctx("listing teacher invites")?;
        if invites.last().map(|i| i.id) != Some(id) {
            invites.push(TeacherSectionInvite {
                id,
                teacher_id: row.get(1).ctx("listing teacher invites")?,
                teacher_full_name: row.get(2).ctx("listing teacher invites")?,
                teacher_email: row.get(3).ctx("listing teacher invites")?,
                section_id: row.get(4).ctx("listing teacher invites")?,
                section_name: row.get(5).ctx("listing teacher invites")?,
                invite_date: row.get(6).ctx("listing teacher invites")?,
                status: row.get(7).ctx("listing teacher invites")?,
                homeroom_teacher: row.get::<_, i64>(8).ctx("listing teacher invites")? != 0,
                tenant_id: handle.tenant.id,
                tenant_name: handle.tenant.tenant_name.clone(),
                subjects: Vec::new(),
            });
        }
        let subject_code: Option<String> = row.get(9).ctx("listing teacher invites")?;
        if let (Some(code), Some(invite)) = (subject_code, invites.last_mut()) {
            let subject_name: String = row.get(10).ctx("listing teacher invites")?;
            invite.subjects.push(Subject {
                subject_code: code,
                subject_name,
            });
        }
    }
    Ok(invites)
}

pub fn teacher_invite_by_id(handle: &TenantHandle, invite_id: i64) -> Result<TeacherSectionInvite> {
    let conn = pool::lock(&handle.tenant_db)?;
    let invites = collect_teacher_invites(
        handle,
        &conn,
        &teacher_invite_query("WHERE i.id = ?1"),
        params![invite_id],
    )?;
    invites
        .into_iter()
        .next()
        .ok_or_else(|| Error::not_found(format!("invite {invite_id}")))
}

pub fn teacher_invites_for_tenant(handle: &TenantHandle) -> Result<Vec<TeacherSectionInvite>> {
    let conn = pool::lock(&handle.tenant_db)?;
    collect_teacher_invites(handle, &conn, &teacher_invite_query(""), params![])
}

pub fn teacher_invites_for_teacher(
    handle: &TenantHandle,
    teacher_id: i64,
) -> Result<Vec<TeacherSectionInvite>> {
    let conn = pool::lock(&handle.tenant_db)?;
    collect_teacher_invites(
        handle,
        &conn,
        &teacher_invite_query("WHERE i.teacher_id = ?1"),
        params![teacher_id],
    )
}

/// Accepts a pending teacher invite: membership row, materialized subject
/// assignments, and, for homeroom invites, the single homeroom slot of the
/// section (last accept wins). Tenant transaction commits first.
pub fn accept_teacher_invite(handle: &TenantHandle, invite_id: i64) -> Result<()> {
    let mut tenant_conn = pool::lock(&handle.tenant_db)?;
    let tenant_tx = tenant_conn.transaction().ctx("starting invite transaction")?;

    let (teacher_id, section_id, homeroom) = {
        let row = tenant_tx
            .query_row(
                "SELECT teacher_id, section_id, homeroom_teacher, status \
                 FROM teachers_sections_invite WHERE id = ?1",
                params![invite_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)? != 0,
                        row.get::<_, InviteStatus>(3)?,
                    ))
                },
            )
            .optional()
            .ctx("loading teacher invite")?
            .ok_or_else(|| Error::not_found(format!("invite {invite_id}")))?;
        if row.3 != InviteStatus::Pending {
            return Err(Error::Precondition(format!(
                "invite {invite_id} is not pending"
            )));
        }
        (row.0, row.1, row.2)
    };

    tenant_tx
        .execute(
            "UPDATE teachers_sections_invite SET status = 'accepted' WHERE id = ?1",
            params![invite_id],
        )
        .ctx("accepting teacher invite")?;
    tenant_tx
        .execute(
            "INSERT OR IGNORE INTO teachers_sections(teacher_id, section_id) VALUES (?1, ?2)",
            params![teacher_id, section_id],
        )
        .ctx("inserting teacher membership")?;
    tenant_tx
        .execute(
            "INSERT OR IGNORE INTO teachers_sections_subjects(section_id, subject_code, teacher_id) \
             SELECT ?1, subject_code, ?2 FROM teachers_sections_invite_subjects WHERE invite_id = ?3",
            params![section_id, teacher_id, invite_id],
        )
        .ctx("materializing subject assignments")?;
    if homeroom {
        tenant_tx
            .execute(
                "INSERT INTO homeroom_assignments(section_id, teacher_id) VALUES (?1, ?2) \
                 ON CONFLICT(section_id) DO UPDATE SET teacher_id = excluded.teacher_id",
                params![section_id, teacher_id],
            )
            .ctx("assigning homeroom teacher")?;
    }

    let mut workspace_conn = pool::lock(&handle.workspace)?;
    let workspace_tx = workspace_conn
        .transaction()
        .ctx("starting workspace transaction")?;
    workspace_tx
        .execute(
            "INSERT OR IGNORE INTO teacher_tenant(teacher_id, tenant_id) VALUES (?1, ?2)",
            params![teacher_id, handle.tenant.id],
        )
        .ctx("recording tenant membership")?;

    tenant_tx.commit().ctx("committing invite")?;
    workspace_tx.commit().ctx("committing tenant membership")
}

pub fn decline_teacher_invite(handle: &TenantHandle, invite_id: i64) -> Result<()> {
    let conn = pool::lock(&handle.tenant_db)?;
    flip_pending(
        &conn,
        "teachers_sections_invite",
        "teacher_id",
        invite_id,
        InviteStatus::Declined,
    )?;
    Ok(())
}

/// Deletes the invite (its pending subjects cascade) and the index mirror.
pub fn delete_teacher_invite(handle: &TenantHandle, invite_id: i64) -> Result<()> {
    let teacher_id: i64 = {
        let conn = pool::lock(&handle.tenant_db)?;
        let teacher_id = conn
            .query_row(
                "SELECT teacher_id FROM teachers_sections_invite WHERE id = ?1",
                params![invite_id],
                |row| row.get(0),
            )
            .optional()
            .ctx("loading teacher invite")?
            .ok_or_else(|| Error::not_found(format!("invite {invite_id}")))?;
        conn.execute(
            "DELETE FROM teachers_sections_invite WHERE id = ?1",
            params![invite_id],
        )
        .ctx("deleting teacher invite")?;
        teacher_id
    };
    let account_id = pupils::teacher_account_id(&handle.workspace, teacher_id)?;
    delete_invite_index(handle, invite_id, account_id)
}

/// Reconciles one teacher's section assignments against the submitted
/// desired state: creates or extends pending invites for newly selected
/// subjects, withdraws deselected ones (pending and already assigned),
/// handles homeroom requests and withdrawals, and cleans up invites left
/// empty. An invite still flagged as a homeroom request is never cleaned
/// up by the empty-subject path.
pub fn manage_teacher_assignments(
    handle: &TenantHandle,
    teacher_id: i64,
    assignments: &[SectionAssignment],
) -> Result<Vec<TeacherSectionInvite>> {
    let account_id = pupils::teacher_account_id(&handle.workspace, teacher_id)?;
    let mut index_adds: Vec<i64> = Vec::new();
    let mut index_removes: Vec<i64> = Vec::new();

    {
        let mut conn = pool::lock(&handle.tenant_db)?;
        let tx = conn.transaction().ctx("starting assignment transaction")?;
        for assignment in assignments {
            reconcile_section(
                &tx,
                teacher_id,
                assignment,
                &mut index_adds,
                &mut index_removes,
            )?;
        }
        tx.commit().ctx("committing assignments")?;
    }

    for invite_id in index_removes {
        delete_invite_index(handle, invite_id, account_id)?;
    }
    for invite_id in index_adds {
        insert_invite_index(handle, invite_id, account_id)?;
    }

    teacher_invites_for_teacher(handle, teacher_id)
}

fn reconcile_section(
    tx: &Connection,
    teacher_id: i64,
    assignment: &SectionAssignment,
    index_adds: &mut Vec<i64>,
    index_removes: &mut Vec<i64>,
) -> Result<()> {
    let section_id = assignment.section_id;
    let mut pending_invite: Option<(i64, bool)> = tx
        .query_row(
            "SELECT id, homeroom_teacher FROM teachers_sections_invite \
             WHERE teacher_id = ?1 AND section_id = ?2 AND status = 'pending'",
            params![teacher_id, section_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? != 0)),
        )
        .optional()
        .ctx("loading pending invite")?;

    let wants_subjects = assignment.subjects.iter().any(|s| s.selected);
    if (wants_subjects || assignment.homeroom_request) && pending_invite.is_none() {
        tx.execute(
            "INSERT INTO teachers_sections_invite(teacher_id, section_id, homeroom_teacher) \
             VALUES (?1, ?2, ?3)",
            params![teacher_id, section_id, assignment.homeroom_request],
        )
        .ctx("creating teacher invite")?;
        let invite_id = tx.last_insert_rowid();
        index_adds.push(invite_id);
        pending_invite = Some((invite_id, assignment.homeroom_request));
    }

    if let Some((invite_id, had_homeroom)) = pending_invite {
        if had_homeroom != assignment.homeroom_request {
            tx.execute(
                "UPDATE teachers_sections_invite SET homeroom_teacher = ?1 WHERE id = ?2",
                params![assignment.homeroom_request, invite_id],
            )
            .ctx("updating homeroom request")?;
        }
        for subject in &assignment.subjects {
            if subject.selected {
                tx.execute(
                    "INSERT OR IGNORE INTO teachers_sections_invite_subjects(invite_id, subject_code) \
                     VALUES (?1, ?2)",
                    params![invite_id, subject.subject_code],
                )
                .ctx("adding pending subject")?;
            } else {
                tx.execute(
                    "DELETE FROM teachers_sections_invite_subjects \
                     WHERE invite_id = ?1 AND subject_code = ?2",
                    params![invite_id, subject.subject_code],
                )
                .ctx("removing pending subject")?;
            }
        }
    }

    // Withdrawals of subjects that were already accepted.
    for subject in assignment.subjects.iter().filter(|s| !s.selected) {
        tx.execute(
            "DELETE FROM teachers_sections_subjects \
             WHERE section_id = ?1 AND subject_code = ?2 AND teacher_id = ?3",
            params![section_id, subject.subject_code, teacher_id],
        )
        .ctx("withdrawing subject assignment")?;
    }
    if !assignment.homeroom_request {
        tx.execute(
            "DELETE FROM homeroom_assignments WHERE section_id = ?1 AND teacher_id = ?2",
            params![section_id, teacher_id],
        )
        .ctx("withdrawing homeroom assignment")?;
    }

    // Drop an invite left with no pending subjects, unless it still asks
    // for the homeroom role.
    if let Some((invite_id, _)) = pending_invite {
        let left: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM teachers_sections_invite_subjects WHERE invite_id = ?1",
                params![invite_id],
                |row| row.get(0),
            )
            .ctx("counting pending subjects")?;
        if left == 0 && !assignment.homeroom_request {
            tx.execute(
                "DELETE FROM teachers_sections_invite WHERE id = ?1",
                params![invite_id],
            )
            .ctx("removing empty invite")?;
            index_removes.push(invite_id);
        }
    }

    // Membership row goes away when nothing assigned remains.
    tx.execute(
        "DELETE FROM teachers_sections WHERE teacher_id = ?1 AND section_id = ?2 \
         AND NOT EXISTS (SELECT 1 FROM teachers_sections_subjects tss \
             WHERE tss.section_id = ?2 AND tss.teacher_id = ?1) \
         AND NOT EXISTS (SELECT 1 FROM homeroom_assignments ha \
             WHERE ha.section_id = ?2 AND ha.teacher_id = ?1)",
        params![teacher_id, section_id],
    )
    .ctx("removing empty membership")?;
    Ok(())
}

/// Flips a pending invite to the target status, returning the invited
/// person's id. Non-pending invites are a precondition error, missing ones
/// a not-found.
fn flip_pending(
    conn: &Connection,
    table: &str,
    person_column: &str,
    invite_id: i64,
    target: InviteStatus,
) -> Result<i64> {
    let row: Option<(i64, InviteStatus)> = conn
        .query_row(
            &format!("SELECT {person_column}, status FROM {table} WHERE id = ?1"),
            params![invite_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .ctx("loading invite")?;
    let (person_id, status) =
        row.ok_or_else(|| Error::not_found(format!("invite {invite_id}")))?;
    if status != InviteStatus::Pending {
        return Err(Error::Precondition(format!(
            "invite {invite_id} is not pending"
        )));
    }
    conn.execute(
        &format!("UPDATE {table} SET status = ?1 WHERE id = ?2"),
        params![target.as_str(), invite_id],
    )
    .ctx("updating invite status")?;
    Ok(person_id)
}

fn insert_invite_index(handle: &TenantHandle, invite_id: i64, account_id: i64) -> Result<()> {
    let conn = pool::lock(&handle.workspace)?;
    conn.execute(
        "INSERT INTO invite_index(invite_id, account_id, tenant_id) VALUES (?1, ?2, ?3)",
        params![invite_id, account_id, handle.tenant.id],
    )
    .ctx("inserting invite index")?;
    Ok(())
}

fn delete_invite_index(handle: &TenantHandle, invite_id: i64, account_id: i64) -> Result<()> {
    let conn = pool::lock(&handle.workspace)?;
    conn.execute(
        "DELETE FROM invite_index \
         WHERE invite_id = ?1 AND account_id = ?2 AND tenant_id = ?3",
        params![invite_id, account_id, handle.tenant.id],
    )
    .ctx("deleting invite index")?;
    Ok(())
}
