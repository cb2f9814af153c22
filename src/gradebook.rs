//! Versioned grade and behaviour ledger.
//!
//! Current rows live in `student_grades` / `pupil_behaviour` with an
//! open-ended `row_end`; every UPDATE or DELETE moves the superseded
//! version into the matching `_history` table via schema triggers. Reads
//! reconstruct the latest version of every fact, flagging edits and
//! soft-deleted facts instead of hiding them.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{DbResultExt, Error, Result};
use crate::pool::{self, DbHandle};
use crate::pupils::{self, Pupil};
use crate::sections::Subject;

/// First calendar year outside every real validity interval. Current rows
/// carry a `row_end` in this year; history rows always end before it.
const SENTINEL_YEAR: &str = "2038";

#[derive(Debug, Clone, Serialize)]
pub struct Grade {
    pub id: i64,
    pub pupil_id: i64,
    pub section_id: i64,
    pub subject_code: String,
    pub grade: i64,
    pub grade_date: String,
    pub kind: String,
    pub teacher_id: Option<i64>,
    pub teacher_name: String,
    pub teacher_last_name: String,
    pub subject_name: String,
    pub semester_code: String,
    pub signature: String,
    pub is_edited: bool,
    pub is_deleted: bool,
    /// End of the version's validity interval; `None` on current facts.
    pub valid_until: Option<String>,
}

/// Input for the grade write operations. `id` is required for edit and
/// delete, ignored on create.
#[derive(Debug, Clone)]
pub struct GradeInput {
    pub id: Option<i64>,
    pub pupil_id: i64,
    pub section_id: i64,
    pub subject_code: String,
    pub grade: i64,
    pub grade_date: String,
    pub kind: String,
    pub teacher_id: i64,
    pub semester_code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GradePupilGroup {
    pub pupil: Pupil,
    pub grades: Vec<Grade>,
    pub average_grade: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GradeSubjectGroup {
    pub subject: Subject,
    pub grades: Vec<Grade>,
    pub average_grade: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BehaviourGrade {
    pub id: i64,
    pub pupil_id: i64,
    pub section_id: i64,
    pub behaviour: String,
    pub semester_code: String,
    pub semester_name: String,
    pub signature: String,
    pub valid_until: Option<String>,
}

// Latest version per fact: current rows as-is, plus the newest history row
// of every fact that no longer has a current row. Deleted facts sort last,
// then date ascending.
const GRADE_RECONSTRUCT: &str = "\
    WITH latest_hist AS ( \
        SELECT h.* FROM student_grades_history h \
        JOIN ( \
            SELECT id, MAX(version_id) AS last_version \
            FROM student_grades_history GROUP BY id \
        ) m ON m.id = h.id AND m.last_version = h.version_id \
    ) \
    SELECT g.id AS id, g.pupil_id, g.section_id, g.subject_code, g.grade, g.grade_date, \
           g.kind, g.teacher_id, COALESCE(t.name, ''), COALESCE(t.last_name, ''), \
           s.subject_name, g.semester_code, g.signature, \
           EXISTS(SELECT 1 FROM student_grades_history h WHERE h.id = g.id) AS is_edited, \
           0 AS is_deleted \
    FROM student_grades g \
    JOIN workspace.subjects s ON s.subject_code = g.subject_code \
    LEFT JOIN workspace.teachers t ON t.id = g.teacher_id \
    WHERE g.section_id = ?1 AND g.semester_code = ?2 \
      AND (?3 IS NULL OR g.subject_code = ?3) \
      AND (?4 IS NULL OR g.pupil_id = ?4) \
    UNION ALL \
    SELECT lh.id, lh.pupil_id, lh.section_id, lh.subject_code, lh.grade, lh.grade_date, \
           lh.kind, lh.teacher_id, COALESCE(t.name, ''), COALESCE(t.last_name, ''), \
           s.subject_name, lh.semester_code, lh.signature, \
           0 AS is_edited, 1 AS is_deleted \
    FROM latest_hist lh \
    JOIN workspace.subjects s ON s.subject_code = lh.subject_code \
    LEFT JOIN workspace.teachers t ON t.id = lh.teacher_id \
    WHERE NOT EXISTS (SELECT 1 FROM student_grades g2 WHERE g2.id = lh.id) \
      AND lh.section_id = ?1 AND lh.semester_code = ?2 \
      AND (?3 IS NULL OR lh.subject_code = ?3) \
      AND (?4 IS NULL OR lh.pupil_id = ?4) \
    ORDER BY is_deleted ASC, grade_date ASC, id ASC";

fn grade_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Grade> {
    Ok(Grade {
        id: row.get(0)?,
        pupil_id: row.get(1)?,
        section_id: row.get(2)?,
        subject_code: row.get(3)?,
        grade: row.get(4)?,
        grade_date: row.get(5)?,
        kind: row.get(6)?,
        teacher_id: row.get(7)?,
        teacher_name: row.get(8)?,
        teacher_last_name: row.get(9)?,
        subject_name: row.get(10)?,
        semester_code: row.get(11)?,
        signature: row.get(12)?,
        is_edited: row.get::<_, i64>(13)? != 0,
        is_deleted: row.get::<_, i64>(14)? != 0,
        valid_until: None,
    })
}

fn reconstruct(
    conn: &Connection,
    section_id: i64,
    semester_code: &str,
    subject_code: Option<&str>,
    pupil_id: Option<i64>,
) -> Result<Vec<Grade>> {
    let mut stmt = conn.prepare(GRADE_RECONSTRUCT).ctx("reconstructing grades")?;
    let grades = stmt
        .query_map(
            params![section_id, semester_code, subject_code, pupil_id],
            grade_from_row,
        )
        .ctx("reconstructing grades")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .ctx("reconstructing grades")?;
    Ok(grades)
}

pub fn grades_for_section_subject(
    tenant_db: &DbHandle,
    section_id: i64,
    subject_code: &str,
    semester_code: &str,
) -> Result<Vec<Grade>> {
    let conn = pool::lock(tenant_db)?;
    reconstruct(&conn, section_id, semester_code, Some(subject_code), None)
}

pub fn grades_for_section_pupil(
    tenant_db: &DbHandle,
    section_id: i64,
    pupil_id: i64,
    semester_code: &str,
) -> Result<Vec<Grade>> {
    let conn = pool::lock(tenant_db)?;
    reconstruct(&conn, section_id, semester_code, None, Some(pupil_id))
}

pub fn grades_for_section_subject_pupil(
    tenant_db: &DbHandle,
    section_id: i64,
    subject_code: &str,
    pupil_id: i64,
    semester_code: &str,
) -> Result<GradePupilGroup> {
    let conn = pool::lock(tenant_db)?;
    pupil_group(&conn, section_id, subject_code, pupil_id, semester_code)
}

fn pupil_group(
    conn: &Connection,
    section_id: i64,
    subject_code: &str,
    pupil_id: i64,
    semester_code: &str,
) -> Result<GradePupilGroup> {
    let pupil = pupils::attached_global_pupil(conn, pupil_id)?;
    let grades = reconstruct(conn, section_id, semester_code, Some(subject_code), Some(pupil_id))?;
    let average_grade = average_grade(&grades);
    Ok(GradePupilGroup {
        pupil,
        grades,
        average_grade,
    })
}

/// Grades of one section+subject+semester, grouped per enrolled pupil with
/// the running average.
pub fn pupil_grades_for_section_subject(
    tenant_db: &DbHandle,
    section_id: i64,
    subject_code: &str,
    semester_code: &str,
) -> Result<Vec<GradePupilGroup>> {
    let conn = pool::lock(tenant_db)?;
    let pupils = pupils::pupils_for_section_conn(&conn, section_id, true)?;
    let grades = reconstruct(&conn, section_id, semester_code, Some(subject_code), None)?;
    let groups = pupils
        .into_iter()
        .map(|pupil| {
            let own: Vec<Grade> = grades
                .iter()
                .filter(|g| g.pupil_id == pupil.id)
                .cloned()
                .collect();
            let average_grade = average_grade(&own);
            GradePupilGroup {
                pupil,
                grades: own,
                average_grade,
            }
        })
        .collect();
    Ok(groups)
}

/// One pupil's grades in a section, grouped per curriculum subject (empty
/// groups included so the display layer shows every subject).
pub fn pupil_grades_by_subject(
    tenant_db: &DbHandle,
    section_id: i64,
    pupil_id: i64,
    semester_code: &str,
) -> Result<Vec<GradeSubjectGroup>> {
    let conn = pool::lock(tenant_db)?;
    let subjects = crate::sections::subjects_for_section_conn(&conn, section_id)?;
    let grades = reconstruct(&conn, section_id, semester_code, None, Some(pupil_id))?;
    let groups = subjects
        .into_iter()
        .map(|subject| {
            let own: Vec<Grade> = grades
                .iter()
                .filter(|g| g.subject_code == subject.subject_code)
                .cloned()
                .collect();
            let average_grade = average_grade(&own);
            GradeSubjectGroup {
                subject,
                grades: own,
                average_grade,
            }
        })
        .collect();
    Ok(groups)
}

fn validate_input(input: &GradeInput) -> Result<String> {
    if !(1..=5).contains(&input.grade) {
        return Err(Error::Validation(
            "grade must be between 1 and 5".to_string(),
        ));
    }
    if input.grade_date.is_empty() {
        return Ok(chrono::Local::now().format("%Y-%m-%d").to_string());
    }
    NaiveDate::parse_from_str(&input.grade_date, "%Y-%m-%d")
        .map_err(|_| Error::Validation("grade date must use the YYYY-MM-DD format".to_string()))?;
    Ok(input.grade_date.clone())
}

fn staff_signature(conn: &Connection, teacher_id: i64) -> Result<String> {
    conn.query_row(
        "SELECT name || ' ' || last_name FROM workspace.teachers WHERE id = ?1",
        params![teacher_id],
        |row| row.get(0),
    )
    .optional()
    .ctx("resolving signature")?
    .ok_or_else(|| Error::not_found(format!("teacher {teacher_id}")))
}

/// Inserts a grade and returns the pupil's reconstructed group for the
/// subject, read inside the same transaction.
pub fn create_grade(tenant_db: &DbHandle, input: &GradeInput) -> Result<GradePupilGroup> {
    let grade_date = validate_input(input)?;
    let mut conn = pool::lock(tenant_db)?;
    let tx = conn.transaction().ctx("starting grade transaction")?;
    let signature = staff_signature(&tx, input.teacher_id)?;
    tx.execute(
        "INSERT INTO student_grades(pupil_id, section_id, subject_code, grade, grade_date, \
         kind, teacher_id, semester_code, signature) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            input.pupil_id,
            input.section_id,
            input.subject_code,
            input.grade,
            grade_date,
            input.kind,
            input.teacher_id,
            input.semester_code,
            signature,
        ],
    )
    .ctx("inserting grade")?;
    let group = pupil_group(
        &tx,
        input.section_id,
        &input.subject_code,
        input.pupil_id,
        &input.semester_code,
    )?;
    tx.commit().ctx("committing grade")?;
    Ok(group)
}

/// Updates a grade in place; the trigger moves the old version to history.
pub fn edit_grade(tenant_db: &DbHandle, input: &GradeInput) -> Result<GradePupilGroup> {
    let grade_id = input
        .id
        .ok_or_else(|| Error::Validation("grade id is required".to_string()))?;
    let grade_date = validate_input(input)?;
    let mut conn = pool::lock(tenant_db)?;
    let tx = conn.transaction().ctx("starting grade transaction")?;
    let signature = staff_signature(&tx, input.teacher_id)?;
    let changed = tx
        .execute(
            "UPDATE student_grades SET grade = ?1, grade_date = ?2, kind = ?3, \
             teacher_id = ?4, signature = ?5 WHERE id = ?6",
            params![
                input.grade,
                grade_date,
                input.kind,
                input.teacher_id,
                signature,
                grade_id,
            ],
        )
        .ctx("updating grade")?;
    if changed == 0 {
        return Err(Error::not_found(format!("grade {grade_id}")));
    }
    let group = pupil_group(
        &tx,
        input.section_id,
        &input.subject_code,
        input.pupil_id,
        &input.semester_code,
    )?;
    tx.commit().ctx("committing grade")?;
    Ok(group)
}

/// Deletes a grade. The deleter's signature is written first so the final
/// history version names who removed the fact; both statements share one
/// transaction.
pub fn delete_grade(
    tenant_db: &DbHandle,
    input: &GradeInput,
    deleted_by: i64,
) -> Result<GradePupilGroup> {
    let grade_id = input
        .id
        .ok_or_else(|| Error::Validation("grade id is required".to_string()))?;
    let mut conn = pool::lock(tenant_db)?;
    let tx = conn.transaction().ctx("starting grade transaction")?;
    let signature = staff_signature(&tx, deleted_by)?;
    let changed = tx
        .execute(
            "UPDATE student_grades SET signature = ?1 WHERE id = ?2",
            params![signature, grade_id],
        )
        .ctx("signing grade deletion")?;
    if changed == 0 {
        return Err(Error::not_found(format!("grade {grade_id}")));
    }
    tx.execute(
        "DELETE FROM student_grades WHERE id = ?1",
        params![grade_id],
    )
    .ctx("deleting grade")?;
    let group = pupil_group(
        &tx,
        input.section_id,
        &input.subject_code,
        input.pupil_id,
        &input.semester_code,
    )?;
    tx.commit().ctx("committing grade")?;
    Ok(group)
}

/// Superseded versions of one grade, oldest first. Current rows never
/// appear here: every history interval closes before the sentinel year.
pub fn grade_edit_history(tenant_db: &DbHandle, grade_id: i64) -> Result<Vec<Grade>> {
    let conn = pool::lock(tenant_db)?;
    let mut stmt = conn
        .prepare(
            "SELECT h.id, h.pupil_id, h.section_id, h.subject_code, h.grade, h.grade_date, \
             h.kind, h.teacher_id, COALESCE(t.name, ''), COALESCE(t.last_name, ''), \
             s.subject_name, h.semester_code, h.signature, h.row_end \
             FROM student_grades_history h \
             JOIN workspace.subjects s ON s.subject_code = h.subject_code \
             LEFT JOIN workspace.teachers t ON t.id = h.teacher_id \
             WHERE h.id = ?1 AND substr(h.row_end, 1, 4) < ?2 \
             ORDER BY h.row_start ASC, h.version_id ASC",
        )
        .ctx("loading grade history")?;
    let grades = stmt
        .query_map(params![grade_id, SENTINEL_YEAR], |row| {
            Ok(Grade {
                id: row.get(0)?,
                pupil_id: row.get(1)?,
                section_id: row.get(2)?,
                subject_code: row.get(3)?,
                grade: row.get(4)?,
                grade_date: row.get(5)?,
                kind: row.get(6)?,
                teacher_id: row.get(7)?,
                teacher_name: row.get(8)?,
                teacher_last_name: row.get(9)?,
                subject_name: row.get(10)?,
                semester_code: row.get(11)?,
                signature: row.get(12)?,
                is_edited: false,
                is_deleted: false,
                valid_until: Some(row.get(13)?),
            })
        })
        .ctx("loading grade history")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .ctx("loading grade history")?;
    Ok(grades)
}

/// Current final-kind grades of a section, the archival input.
pub fn final_grades_for_section(tenant_db: &DbHandle, section_id: i64) -> Result<Vec<Grade>> {
    let conn = pool::lock(tenant_db)?;
    final_grades_for_section_conn(&conn, section_id)
}

pub(crate) fn final_grades_for_section_conn(
    conn: &Connection,
    section_id: i64,
) -> Result<Vec<Grade>> {
    let mut stmt = conn
        .prepare(
            "SELECT g.id, g.pupil_id, g.section_id, g.subject_code, g.grade, g.grade_date, \
             g.kind, g.teacher_id, COALESCE(t.name, ''), COALESCE(t.last_name, ''), \
             s.subject_name, g.semester_code, g.signature, 0, 0 \
             FROM student_grades g \
             JOIN workspace.subjects s ON s.subject_code = g.subject_code \
             LEFT JOIN workspace.teachers t ON t.id = g.teacher_id \
             WHERE g.section_id = ?1 AND g.kind = 'final' \
             ORDER BY g.pupil_id, g.subject_code",
        )
        .ctx("loading final grades")?;
    let grades = stmt
        .query_map(params![section_id], grade_from_row)
        .ctx("loading final grades")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .ctx("loading final grades")?;
    Ok(grades)
}

/// Average of the regular grades, final kind and soft-deleted facts
/// excluded. Empty input averages to 0.
pub fn average_grade(grades: &[Grade]) -> f64 {
    average_of(grades, |g| g.kind != "final" && !g.is_deleted)
}

/// Average over final-kind grades only.
pub fn average_final_grade(grades: &[Grade]) -> f64 {
    average_of(grades, |g| g.kind == "final" && !g.is_deleted)
}

fn average_of(grades: &[Grade], keep: impl Fn(&Grade) -> bool) -> f64 {
    let mut sum = 0i64;
    let mut count = 0i64;
    for grade in grades.iter().filter(|g| keep(g)) {
        sum += grade.grade;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    round2(sum as f64 / count as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn behaviour_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BehaviourGrade> {
    Ok(BehaviourGrade {
        id: row.get(0)?,
        pupil_id: row.get(1)?,
        section_id: row.get(2)?,
        behaviour: row.get(3)?,
        semester_code: row.get(4)?,
        semester_name: row.get(5)?,
        signature: row.get(6)?,
        valid_until: None,
    })
}

/// A pupil's behaviour grades in a section, one per semester in progress
/// order.
pub fn behaviour_grades_for_pupil(
    tenant_db: &DbHandle,
    pupil_id: i64,
    section_id: i64,
) -> Result<Vec<BehaviourGrade>> {
    let conn = pool::lock(tenant_db)?;
    let mut stmt = conn
        .prepare(
            "SELECT b.id, b.pupil_id, b.section_id, b.behaviour, b.semester_code, \
             s.semester_name, b.signature \
             FROM pupil_behaviour b \
             JOIN workspace.semester s ON s.semester_code = b.semester_code \
             WHERE b.pupil_id = ?1 AND b.section_id = ?2 \
             ORDER BY s.progress_level ASC",
        )
        .ctx("listing behaviour grades")?;
    let grades = stmt
        .query_map(params![pupil_id, section_id], behaviour_from_row)
        .ctx("listing behaviour grades")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .ctx("listing behaviour grades")?;
    Ok(grades)
}

pub fn behaviour_grade_by_id(tenant_db: &DbHandle, id: i64) -> Result<BehaviourGrade> {
    let conn = pool::lock(tenant_db)?;
    conn.query_row(
        "SELECT b.id, b.pupil_id, b.section_id, b.behaviour, b.semester_code, \
         s.semester_name, b.signature \
         FROM pupil_behaviour b \
         JOIN workspace.semester s ON s.semester_code = b.semester_code \
         WHERE b.id = ?1",
        params![id],
        behaviour_from_row,
    )
    .optional()
    .ctx("loading behaviour grade")?
    .ok_or_else(|| Error::not_found(format!("behaviour grade {id}")))
}

/// Creates or replaces the pupil's behaviour grade for the semester. The
/// unique (pupil, section, semester) key makes the write idempotent; an
/// overwrite versions the previous value through the update trigger.
pub fn set_behaviour_grade(
    tenant_db: &DbHandle,
    pupil_id: i64,
    section_id: i64,
    behaviour: &str,
    semester_code: &str,
    teacher_id: i64,
) -> Result<BehaviourGrade> {
    let id = {
        let mut conn = pool::lock(tenant_db)?;
        let tx = conn.transaction().ctx("starting behaviour transaction")?;
        let signature = staff_signature(&tx, teacher_id)?;
        tx.execute(
            "INSERT INTO pupil_behaviour(pupil_id, section_id, behaviour, semester_code, signature) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(pupil_id, section_id, semester_code) \
             DO UPDATE SET behaviour = excluded.behaviour, signature = excluded.signature",
            params![pupil_id, section_id, behaviour, semester_code, signature],
        )
        .ctx("writing behaviour grade")?;
        let id: i64 = tx
            .query_row(
                "SELECT id FROM pupil_behaviour \
                 WHERE pupil_id = ?1 AND section_id = ?2 AND semester_code = ?3",
                params![pupil_id, section_id, semester_code],
                |row| row.get(0),
            )
            .ctx("reading behaviour grade id")?;
        tx.commit().ctx("committing behaviour grade")?;
        id
    };
    behaviour_grade_by_id(tenant_db, id)
}

/// Deletes a behaviour grade, signing the removal first like the grade
/// delete path.
pub fn delete_behaviour_grade(tenant_db: &DbHandle, id: i64, deleted_by: i64) -> Result<()> {
    let mut conn = pool::lock(tenant_db)?;
    let tx = conn.transaction().ctx("starting behaviour transaction")?;
    let signature = staff_signature(&tx, deleted_by)?;
    let changed = tx
        .execute(
            "UPDATE pupil_behaviour SET signature = ?1 WHERE id = ?2",
            params![signature, id],
        )
        .ctx("signing behaviour deletion")?;
    if changed == 0 {
        return Err(Error::not_found(format!("behaviour grade {id}")));
    }
    tx.execute("DELETE FROM pupil_behaviour WHERE id = ?1", params![id])
        .ctx("deleting behaviour grade")?;
    tx.commit().ctx("committing behaviour grade")
}

/// Superseded versions of one behaviour grade, oldest first.
pub fn behaviour_grade_history(tenant_db: &DbHandle, id: i64) -> Result<Vec<BehaviourGrade>> {
    let conn = pool::lock(tenant_db)?;
    let mut stmt = conn
        .prepare(
            "SELECT h.id, h.pupil_id, h.section_id, h.behaviour, h.semester_code, \
             s.semester_name, h.signature, h.row_end \
             FROM pupil_behaviour_history h \
             JOIN workspace.semester s ON s.semester_code = h.semester_code \
             WHERE h.id = ?1 AND substr(h.row_end, 1, 4) < ?2 \
             ORDER BY h.row_start ASC, h.version_id ASC",
        )
        .ctx("loading behaviour history")?;
    let grades = stmt
        .query_map(params![id, SENTINEL_YEAR], |row| {
            let mut grade = behaviour_from_row(row)?;
            grade.valid_until = Some(row.get(7)?);
            Ok(grade)
        })
        .ctx("loading behaviour history")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .ctx("loading behaviour history")?;
    Ok(grades)
}

/// Behaviour values per pupil for one section+semester (archival input).
pub(crate) fn behaviour_for_section_semester(
    conn: &Connection,
    section_id: i64,
    semester_code: &str,
) -> Result<std::collections::HashMap<i64, String>> {
    let mut stmt = conn
        .prepare(
            "SELECT pupil_id, behaviour FROM pupil_behaviour \
             WHERE section_id = ?1 AND semester_code = ?2",
        )
        .ctx("loading section behaviour")?;
    let rows = stmt
        .query_map(params![section_id, semester_code], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })
        .ctx("loading section behaviour")?
        .collect::<std::result::Result<std::collections::HashMap<_, _>, _>>()
        .ctx("loading section behaviour")?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grade(value: i64, kind: &str, deleted: bool) -> Grade {
        Grade {
            id: 0,
            pupil_id: 1,
            section_id: 1,
            subject_code: "MAT".to_string(),
            grade: value,
            grade_date: "2026-03-01".to_string(),
            kind: kind.to_string(),
            teacher_id: Some(1),
            teacher_name: String::new(),
            teacher_last_name: String::new(),
            subject_name: String::new(),
            semester_code: "1POL".to_string(),
            signature: String::new(),
            is_edited: false,
            is_deleted: deleted,
            valid_until: None,
        }
    }

    #[test]
    fn average_skips_final_and_deleted() {
        let grades = vec![
            grade(5, "regular", false),
            grade(4, "regular", false),
            grade(1, "final", false),
            grade(1, "regular", true),
        ];
        assert_eq!(average_grade(&grades), 4.5);
    }

    #[test]
    fn average_rounds_to_two_decimals() {
        let grades = vec![
            grade(5, "regular", false),
            grade(4, "regular", false),
            grade(4, "regular", false),
        ];
        // 13 / 3 = 4.333...
        assert_eq!(average_grade(&grades), 4.33);
    }

    #[test]
    fn empty_average_is_zero() {
        assert_eq!(average_grade(&[]), 0.0);
        assert_eq!(average_final_grade(&[grade(3, "regular", false)]), 0.0);
    }

    #[test]
    fn final_average_restricts_to_final_kind() {
        let grades = vec![
            grade(2, "regular", false),
            grade(5, "final", false),
            grade(4, "final", false),
        ];
        assert_eq!(average_final_grade(&grades), 4.5);
    }

    #[test]
    fn validation_rejects_out_of_range_grades() {
        let input = GradeInput {
            id: None,
            pupil_id: 1,
            section_id: 1,
            subject_code: "MAT".to_string(),
            grade: 6,
            grade_date: "2026-03-01".to_string(),
            kind: "regular".to_string(),
            teacher_id: 1,
            semester_code: "1POL".to_string(),
        };
        assert!(matches!(
            validate_input(&input),
            Err(crate::error::Error::Validation(_))
        ));
    }

    #[test]
    fn validation_defaults_missing_date() {
        let input = GradeInput {
            id: None,
            pupil_id: 1,
            section_id: 1,
            subject_code: "MAT".to_string(),
            grade: 3,
            grade_date: String::new(),
            kind: "regular".to_string(),
            teacher_id: 1,
            semester_code: "1POL".to_string(),
        };
        let date = validate_input(&input).unwrap();
        assert!(NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_ok());
    }
}
