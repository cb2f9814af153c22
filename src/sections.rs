//! Section queries, curriculum/semester catalogs and the archival workflow.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{DbResultExt, Error, Result};
use crate::gradebook;
use crate::pool::{self, DbHandle};
use crate::pupils;
use crate::tenant::TenantHandle;

#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub id: i64,
    pub section_code: String,
    pub class_code: String,
    pub year: String,
    pub tenant_id: i64,
    pub curriculum_code: String,
    pub curriculum_name: String,
    pub course_name: Option<String>,
    pub homeroom_teacher_id: Option<i64>,
    pub homeroom_teacher_full_name: Option<String>,
    pub homeroom_teacher_email: Option<String>,
    pub archived: bool,
    /// Display name composed from class and section code.
    pub name: String,
    pub color_config: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Subject {
    pub subject_code: String,
    pub subject_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Semester {
    pub semester_code: String,
    pub semester_name: String,
    pub progress_level: i64,
}

#[derive(Debug, Clone)]
pub struct SectionUpdate {
    pub section_code: String,
    pub class_code: String,
    pub year: String,
    pub curriculum_code: String,
}

const SECTION_COLUMNS: &str = "s.id, s.section_code, s.class_code, s.year, s.tenant_id, \
     s.curriculum_code, c.curriculum_name, cs.course_name, \
     ha.teacher_id, t.name || ' ' || t.last_name, a.email, s.archived";

const SECTION_JOINS: &str = "FROM sections s \
     JOIN workspace.curriculum c ON c.curriculum_code = s.curriculum_code \
     LEFT JOIN workspace.courses_secondary cs ON cs.course_code = c.course_code \
     LEFT JOIN homeroom_assignments ha ON ha.section_id = s.id \
     LEFT JOIN workspace.teachers t ON t.id = ha.teacher_id \
     LEFT JOIN workspace.accounts a ON a.id = t.account_id";

fn section_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Section> {
    let section_code: String = row.get(1)?;
    let class_code: String = row.get(2)?;
    let name = format!("Section {class_code}-{section_code}");
    Ok(Section {
        id: row.get(0)?,
        section_code,
        class_code,
        year: row.get(3)?,
        tenant_id: row.get(4)?,
        curriculum_code: row.get(5)?,
        curriculum_name: row.get(6)?,
        course_name: row.get(7)?,
        homeroom_teacher_id: row.get(8)?,
        homeroom_teacher_full_name: row.get(9)?,
        homeroom_teacher_email: row.get(10)?,
        archived: row.get::<_, i64>(11)? != 0,
        name,
        color_config: None,
    })
}

pub fn section_by_id(tenant_db: &DbHandle, section_id: i64) -> Result<Section> {
    let conn = pool::lock(tenant_db)?;
    section_by_id_conn(&conn, section_id)
}

pub(crate) fn section_by_id_conn(conn: &Connection, section_id: i64) -> Result<Section> {
    conn.query_row(
        &format!("SELECT {SECTION_COLUMNS} {SECTION_JOINS} WHERE s.id = ?1"),
        params![section_id],
        section_from_row,
    )
    .optional()
    .ctx("loading section")?
    .ok_or_else(|| Error::not_found(format!("section {section_id}")))
}

fn collect_sections(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    color_config: Option<&str>,
) -> Result<Vec<Section>> {
    let mut stmt = conn.prepare(sql).ctx("listing sections")?;
    let mut sections = stmt
        .query_map(params, section_from_row)
        .ctx("listing sections")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .ctx("listing sections")?;
    if let Some(color) = color_config {
        for section in &mut sections {
            section.color_config = Some(color.to_string());
        }
    }
    Ok(sections)
}

pub fn sections_for_tenant(handle: &TenantHandle, archived: bool) -> Result<Vec<Section>> {
    let conn = pool::lock(&handle.tenant_db)?;
    collect_sections(
        &conn,
        &format!(
            "SELECT {SECTION_COLUMNS} {SECTION_JOINS} WHERE s.archived = ?1 \
             ORDER BY s.class_code, s.section_code"
        ),
        params![archived],
        Some(&handle.tenant.color_config),
    )
}

/// Sections the teacher is assigned to, with the tenant's color config
/// passed through for the display layer.
pub fn sections_for_teacher(
    handle: &TenantHandle,
    teacher_id: i64,
    archived: bool,
) -> Result<Vec<Section>> {
    let conn = pool::lock(&handle.tenant_db)?;
    collect_sections(
        &conn,
        &format!(
            "SELECT DISTINCT {SECTION_COLUMNS} {SECTION_JOINS} \
             JOIN teachers_sections ts ON ts.section_id = s.id \
             WHERE ts.teacher_id = ?1 AND s.archived = ?2 \
             ORDER BY s.class_code, s.section_code"
        ),
        params![teacher_id, archived],
        Some(&handle.tenant.color_config),
    )
}

pub fn sections_for_pupil(
    handle: &TenantHandle,
    pupil_id: i64,
    archived: bool,
) -> Result<Vec<Section>> {
    let conn = pool::lock(&handle.tenant_db)?;
    collect_sections(
        &conn,
        &format!(
            "SELECT {SECTION_COLUMNS} {SECTION_JOINS} \
             JOIN pupils_sections ps ON ps.section_id = s.id \
             WHERE ps.pupil_id = ?1 AND ps.is_active = 1 AND s.archived = ?2 \
             ORDER BY s.class_code, s.section_code"
        ),
        params![pupil_id, archived],
        Some(&handle.tenant.color_config),
    )
}

pub fn create_section(
    handle: &TenantHandle,
    update: &SectionUpdate,
) -> Result<Section> {
    let section_id = {
        let conn = pool::lock(&handle.tenant_db)?;
        conn.execute(
            "INSERT INTO sections(section_code, class_code, year, tenant_id, curriculum_code) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                update.section_code,
                update.class_code,
                update.year,
                handle.tenant.id,
                update.curriculum_code,
            ],
        )
        .ctx("inserting section")?;
        conn.last_insert_rowid()
    };
    section_by_id(&handle.tenant_db, section_id)
}

pub fn update_section(
    handle: &TenantHandle,
    section_id: i64,
    update: &SectionUpdate,
) -> Result<Section> {
    let changed = {
        let conn = pool::lock(&handle.tenant_db)?;
        conn.execute(
            "UPDATE sections SET section_code = ?1, class_code = ?2, year = ?3, \
             curriculum_code = ?4 WHERE id = ?5",
            params![
                update.section_code,
                update.class_code,
                update.year,
                update.curriculum_code,
                section_id,
            ],
        )
        .ctx("updating section")?
    };
    if changed == 0 {
        return Err(Error::not_found(format!("section {section_id}")));
    }
    section_by_id(&handle.tenant_db, section_id)
}

/// Deletes the section and, via cascading keys, its memberships and
/// invites. Workspace-side invite index rows are removed first.
pub fn delete_section(handle: &TenantHandle, section_id: i64) -> Result<()> {
    let invite_ids = invite_account_records_for_section(handle, section_id)?;
    {
        let conn = pool::lock(&handle.workspace)?;
        for (invite_id, account_id) in &invite_ids {
            conn.execute(
                "DELETE FROM invite_index \
                 WHERE invite_id = ?1 AND account_id = ?2 AND tenant_id = ?3",
                params![invite_id, account_id, handle.tenant.id],
            )
            .ctx("deleting invite index")?;
        }
    }
    let conn = pool::lock(&handle.tenant_db)?;
    let changed = conn
        .execute("DELETE FROM sections WHERE id = ?1", params![section_id])
        .ctx("deleting section")?;
    if changed == 0 {
        return Err(Error::not_found(format!("section {section_id}")));
    }
    Ok(())
}

/// (invite id, invited account id) pairs for every invite of the section,
/// pupil and teacher invites both.
pub fn invite_account_records_for_section(
    handle: &TenantHandle,
    section_id: i64,
) -> Result<Vec<(i64, i64)>> {
    let conn = pool::lock(&handle.tenant_db)?;
    let mut stmt = conn
        .prepare(
            "SELECT i.id, p.account_id FROM pupils_sections_invite i \
             JOIN workspace.pupil_global p ON p.id = i.pupil_id \
             WHERE i.section_id = ?1 \
             UNION ALL \
             SELECT i.id, t.account_id FROM teachers_sections_invite i \
             JOIN workspace.teachers t ON t.id = i.teacher_id \
             WHERE i.section_id = ?1",
        )
        .ctx("listing section invites")?;
    let rows = stmt
        .query_map(params![section_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })
        .ctx("listing section invites")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .ctx("listing section invites")?;
    Ok(rows)
}

/// Subjects of a curriculum, by name.
pub fn subjects_for_curriculum(tenant_db: &DbHandle, curriculum_code: &str) -> Result<Vec<Subject>> {
    let conn = pool::lock(tenant_db)?;
    subjects_for_curriculum_conn(&conn, curriculum_code)
}

pub(crate) fn subjects_for_curriculum_conn(
    conn: &Connection,
    curriculum_code: &str,
) -> Result<Vec<Subject>> {
    let mut stmt = conn
        .prepare(
            "SELECT s.subject_code, s.subject_name \
             FROM workspace.subjects s \
             JOIN workspace.curriculum_subjects cs ON cs.subject_code = s.subject_code \
             WHERE cs.curriculum_code = ?1 ORDER BY s.subject_name",
        )
        .ctx("listing curriculum subjects")?;
    let subjects = stmt
        .query_map(params![curriculum_code], |row| {
            Ok(Subject {
                subject_code: row.get(0)?,
                subject_name: row.get(1)?,
            })
        })
        .ctx("listing curriculum subjects")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .ctx("listing curriculum subjects")?;
    Ok(subjects)
}

pub(crate) fn subjects_for_section_conn(conn: &Connection, section_id: i64) -> Result<Vec<Subject>> {
    let section = section_by_id_conn(conn, section_id)?;
    subjects_for_curriculum_conn(conn, &section.curriculum_code)
}

/// Semesters applicable to a section: the tenant's semesters whose teaching
/// plan matches the section's curriculum.
pub fn semesters_for_section(handle: &TenantHandle, section_id: i64) -> Result<Vec<Semester>> {
    let conn = pool::lock(&handle.tenant_db)?;
    semesters_for_section_conn(&conn, handle.tenant.id, section_id)
}

pub(crate) fn semesters_for_section_conn(
    conn: &Connection,
    tenant_id: i64,
    section_id: i64,
) -> Result<Vec<Semester>> {
    let mut stmt = conn
        .prepare(
            "SELECT sem.semester_code, sem.semester_name, sem.progress_level \
             FROM workspace.tenant_semesters ts \
             JOIN workspace.semester sem ON sem.semester_code = ts.semester_code \
             JOIN sections s ON s.id = ?2 \
             JOIN workspace.curriculum c ON c.curriculum_code = s.curriculum_code \
             WHERE ts.tenant_id = ?1 AND ts.npp_code = c.npp_code \
             ORDER BY sem.progress_level ASC",
        )
        .ctx("listing section semesters")?;
    let semesters = stmt
        .query_map(params![tenant_id, section_id], |row| {
            Ok(Semester {
                semester_code: row.get(0)?,
                semester_name: row.get(1)?,
                progress_level: row.get(2)?,
            })
        })
        .ctx("listing section semesters")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .ctx("listing section semesters")?;
    Ok(semesters)
}

/// Rolls a finished section up into the permanent workspace archive.
///
/// Write order: all workspace rows (guard-delete then copy, per pupil)
/// commit first, then the tenant-side `archived` flag flips in its own
/// statement. A crash between the two leaves the archive written and the
/// section unarchived; re-running is safe because the guard deletes make
/// the copy idempotent.
pub fn archive_section(handle: &TenantHandle, section_id: i64) -> Result<()> {
    let tenant_id = handle.tenant.id;
    let config = handle.config;

    // Collect everything from the tenant database first; no writes yet.
    let (section, pupils, subjects, semesters, final_grades, behaviour_by_pupil) = {
        let conn = pool::lock(&handle.tenant_db)?;
        let section = section_by_id_conn(&conn, section_id)?;
        if section.archived {
            return Ok(());
        }
        let pupils = pupils::pupils_for_section_conn(&conn, section_id, false)?;
        if pupils.is_empty() {
            return Err(Error::Precondition(
                "an empty section cannot be archived".to_string(),
            ));
        }
        let subjects = subjects_for_curriculum_conn(&conn, &section.curriculum_code)?;
        let semesters = semesters_for_section_conn(&conn, tenant_id, section_id)?;
        let final_grades = gradebook::final_grades_for_section_conn(&conn, section_id)?;
        let behaviour =
            gradebook::behaviour_for_section_semester(&conn, section_id, config.max_semester_code)?;
        (section, pupils, subjects, semesters, final_grades, behaviour)
    };

    // Every (pupil, subject, semester) cell must hold a final grade.
    for pupil in &pupils {
        for subject in &subjects {
            for semester in &semesters {
                let present = final_grades.iter().any(|g| {
                    g.pupil_id == pupil.id
                        && g.subject_code == subject.subject_code
                        && g.semester_code == semester.semester_code
                });
                if !present {
                    return Err(Error::Precondition(format!(
                        "final grades are incomplete: pupil {} is missing {} for {}",
                        pupil.id, subject.subject_code, semester.semester_code
                    )));
                }
            }
        }
    }

    let final_curriculum: bool = {
        let conn = pool::lock(&handle.workspace)?;
        conn.query_row(
            "SELECT final_curriculum FROM curriculum WHERE curriculum_code = ?1",
            params![section.curriculum_code],
            |row| row.get::<_, i64>(0).map(|v| v != 0),
        )
        .optional()
        .ctx("loading curriculum")?
        .ok_or_else(|| Error::not_found(format!("curriculum {}", section.curriculum_code)))?
    };

    {
        let mut conn = pool::lock(&handle.workspace)?;
        let tx = conn.transaction().ctx("starting archive transaction")?;
        for pupil in &pupils {
            let pupil_grades: Vec<_> = final_grades
                .iter()
                .filter(|g| {
                    g.pupil_id == pupil.id && g.semester_code == config.max_semester_code
                })
                .collect();
            let failing = pupil_grades.iter().any(|g| g.grade < 2);

            // Guard-delete keyed on (pupil, class level, specialization)
            // across all tenants: a pupil repeating the class level at
            // another school replaces the earlier attempt's rows instead of
            // accumulating next to them, and a re-run overwrites instead of
            // duplicating.
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE pupil_id = ?1 \
                     AND class_code = ?2 AND school_specialization = ?3",
                    config.final_grade_table
                ),
                params![pupil.id, section.class_code, handle.tenant.specialization],
            )
            .ctx("clearing archived final grades")?;
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE pupil_id = ?1 \
                     AND class_code = ?2 AND school_specialization = ?3",
                    config.behaviour_grade_table
                ),
                params![pupil.id, section.class_code, handle.tenant.specialization],
            )
            .ctx("clearing archived behaviour grades")?;

            // A failing final grade keeps the year's subject grades out of
            // the permanent record; the behaviour grade is copied either way.
            if !failing {
                for grade in &pupil_grades {
                    tx.execute(
                        &format!(
                            "INSERT INTO {}(pupil_id, tenant_id, subject_code, class_code, \
                             grade, school_specialization) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                            config.final_grade_table
                        ),
                        params![
                            pupil.id,
                            tenant_id,
                            grade.subject_code,
                            section.class_code,
                            grade.grade,
                            handle.tenant.specialization
                        ],
                    )
                    .ctx("copying final grade")?;
                }
            }
            if let Some(behaviour) = behaviour_by_pupil.get(&pupil.id) {
                tx.execute(
                    &format!(
                        "INSERT INTO {}(pupil_id, tenant_id, class_code, behaviour, \
                         school_specialization) VALUES (?1, ?2, ?3, ?4, ?5)",
                        config.behaviour_grade_table
                    ),
                    params![
                        pupil.id,
                        tenant_id,
                        section.class_code,
                        behaviour,
                        handle.tenant.specialization
                    ],
                )
                .ctx("copying behaviour grade")?;
            }
            if final_curriculum && !failing {
                tx.execute(
                    &format!(
                        "UPDATE pupil_tenant SET {} = 1 \
                         WHERE pupil_id = ?1 AND tenant_id = ?2",
                        config.enrollment_flag_column
                    ),
                    params![pupil.id, tenant_id],
                )
                .ctx("releasing pupil for enrollment")?;
            }
        }
        tx.commit().ctx("committing archive")?;
    }

    let conn = pool::lock(&handle.tenant_db)?;
    conn.execute(
        "UPDATE sections SET archived = 1 WHERE id = ?1",
        params![section_id],
    )
    .ctx("marking section archived")?;
    tracing::debug!(section = section_id, tenant = tenant_id, "section archived");
    Ok(())
}
