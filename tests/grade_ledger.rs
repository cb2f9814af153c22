use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use classbook_core::config::TenantCategory;
use classbook_core::gradebook::{self, GradeInput};
use classbook_core::sections::{self, SectionUpdate};
use classbook_core::tenant::{self, NewTenant};
use classbook_core::{provision, ConnectionRegistry, Error, Role, TenantHandle, WORKSPACE_DB};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

const WORKSPACE_SEED: &str = "
    INSERT INTO cantons(canton_code, canton_name) VALUES ('KS', 'Sarajevo');
    INSERT INTO accounts(id, email) VALUES
        (1, 'lejla@school.ba'), (2, 'emir@school.ba'),
        (3, 'amina@pupils.ba'), (4, 'tarik@pupils.ba');
    INSERT INTO teachers(id, account_id, name, last_name, phone) VALUES
        (1, 1, 'Lejla', 'Hodzic', '061-111-111'),
        (2, 2, 'Emir', 'Kovac', '061-222-222');
    INSERT INTO pupil_global(id, account_id, name, last_name) VALUES
        (10, 3, 'Amina', 'Begic'), (11, 4, 'Tarik', 'Imamovic');
    INSERT INTO subjects(subject_code, subject_name) VALUES
        ('MAT', 'Mathematics'), ('BOS', 'Bosnian Language');
    INSERT INTO curriculum(curriculum_code, curriculum_name, npp_code, final_curriculum)
        VALUES ('IX-NPP', 'Ninth Grade', 'NPP9', 1);
    INSERT INTO curriculum_subjects(curriculum_code, subject_code) VALUES
        ('IX-NPP', 'MAT'), ('IX-NPP', 'BOS');
    INSERT INTO semester(semester_code, semester_name, progress_level) VALUES
        ('1POL', 'First Semester', 1), ('2POL', 'Second Semester', 2);
";

/// Workspace with reference data, one provisioned tenant, one section with
/// both pupils enrolled. Returns the handle and the section id.
fn setup(prefix: &str) -> (ConnectionRegistry, TenantHandle, i64) {
    let registry = ConnectionRegistry::new(temp_dir(prefix)).expect("registry");
    provision::ensure_workspace(&registry).expect("workspace");
    let workspace = registry.get(WORKSPACE_DB, Role::Admin).expect("workspace handle");
    {
        let conn = workspace.lock().expect("lock");
        conn.execute_batch(WORKSPACE_SEED).expect("seed");
    }
    let row = tenant::create_tenant(
        &workspace,
        &NewTenant {
            tenant_name: "OS Centar".to_string(),
            category: TenantCategory::Primary,
            canton_code: "KS".to_string(),
            address: String::new(),
            phone: String::new(),
            email: "info@os-centar.ba".to_string(),
            director_name: String::new(),
            color_config: "{\"accent\":\"#204080\"}".to_string(),
            tenant_city: "Sarajevo".to_string(),
            specialization: String::new(),
            domain: Some("os-centar.ba".to_string()),
        },
    )
    .expect("tenant");
    {
        let conn = workspace.lock().expect("lock");
        conn.execute(
            "INSERT INTO tenant_semesters(tenant_id, semester_code, npp_code) \
             VALUES (?1, '1POL', 'NPP9'), (?1, '2POL', 'NPP9')",
            [row.id],
        )
        .expect("tenant semesters");
    }

    let handle = TenantHandle::create(&registry, row, Role::Admin).expect("handle");
    handle.create_schema(&registry).expect("schema");

    let section = sections::create_section(
        &handle,
        &SectionUpdate {
            section_code: "A".to_string(),
            class_code: "IX".to_string(),
            year: "2025/2026".to_string(),
            curriculum_code: "IX-NPP".to_string(),
        },
    )
    .expect("section");
    {
        let conn = handle.tenant_db.lock().expect("lock");
        conn.execute_batch(&format!(
            "INSERT INTO pupils(id, account_id, name, last_name) VALUES
                 (10, 3, 'Amina', 'Begic'), (11, 4, 'Tarik', 'Imamovic');
             INSERT INTO pupils_sections(pupil_id, section_id, is_active) VALUES
                 (10, {id}, 1), (11, {id}, 1);",
            id = section.id
        ))
        .expect("enroll");
    }
    (registry, handle, section.id)
}

fn grade_input(section_id: i64, pupil_id: i64, grade: i64) -> GradeInput {
    GradeInput {
        id: None,
        pupil_id,
        section_id,
        subject_code: "MAT".to_string(),
        grade,
        grade_date: "2026-03-02".to_string(),
        kind: "regular".to_string(),
        teacher_id: 1,
        semester_code: "1POL".to_string(),
    }
}

#[test]
fn created_grade_carries_the_staff_signature() {
    let (_registry, handle, section_id) = setup("classbook-ledger-create");
    let group = gradebook::create_grade(&handle.tenant_db, &grade_input(section_id, 10, 5))
        .expect("create grade");
    assert_eq!(group.pupil.id, 10);
    assert_eq!(group.grades.len(), 1);
    let grade = &group.grades[0];
    assert_eq!(grade.grade, 5);
    assert_eq!(grade.signature, "Lejla Hodzic");
    assert_eq!(grade.subject_name, "Mathematics");
    assert!(!grade.is_edited);
    assert!(!grade.is_deleted);
    assert_eq!(group.average_grade, 5.0);
}

#[test]
fn out_of_range_grade_is_rejected() {
    let (_registry, handle, section_id) = setup("classbook-ledger-range");
    let err =
        gradebook::create_grade(&handle.tenant_db, &grade_input(section_id, 10, 6)).unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    let grades =
        gradebook::grades_for_section_subject(&handle.tenant_db, section_id, "MAT", "1POL")
            .expect("list");
    assert!(grades.is_empty(), "rejected grade must not be written");
}

#[test]
fn editing_versions_the_previous_value() {
    let (_registry, handle, section_id) = setup("classbook-ledger-edit");
    let group = gradebook::create_grade(&handle.tenant_db, &grade_input(section_id, 10, 3))
        .expect("create");
    let grade_id = group.grades[0].id;

    let mut edit = grade_input(section_id, 10, 5);
    edit.id = Some(grade_id);
    edit.teacher_id = 2;
    let group = gradebook::edit_grade(&handle.tenant_db, &edit).expect("edit");
    let current = &group.grades[0];
    assert_eq!(current.grade, 5);
    assert_eq!(current.signature, "Emir Kovac");
    assert!(current.is_edited, "edited fact must be flagged");

    let history = gradebook::grade_edit_history(&handle.tenant_db, grade_id).expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].grade, 3);
    assert_eq!(history[0].signature, "Lejla Hodzic");
    assert!(history[0].valid_until.is_some());

    // A second edit appends, oldest first.
    let mut edit2 = edit.clone();
    edit2.grade = 4;
    gradebook::edit_grade(&handle.tenant_db, &edit2).expect("second edit");
    let history = gradebook::grade_edit_history(&handle.tenant_db, grade_id).expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].grade, 3);
    assert_eq!(history[1].grade, 5);
}

#[test]
fn deleted_grade_stays_visible_with_the_deleter_signature() {
    let (_registry, handle, section_id) = setup("classbook-ledger-delete");
    let group = gradebook::create_grade(&handle.tenant_db, &grade_input(section_id, 10, 2))
        .expect("create");
    let grade_id = group.grades[0].id;
    gradebook::create_grade(&handle.tenant_db, &grade_input(section_id, 10, 4)).expect("second");

    let mut delete = grade_input(section_id, 10, 2);
    delete.id = Some(grade_id);
    let group = gradebook::delete_grade(&handle.tenant_db, &delete, 2).expect("delete");

    assert_eq!(group.grades.len(), 2);
    let last = group.grades.last().expect("deleted fact");
    assert_eq!(last.id, grade_id);
    assert!(last.is_deleted, "deleted facts sort last and stay visible");
    assert_eq!(last.signature, "Emir Kovac", "deleter signs the final version");
    assert!(!group.grades[0].is_deleted);

    // The average ignores the deleted fact.
    assert_eq!(group.average_grade, 4.0);
}

#[test]
fn editing_a_missing_grade_is_not_found() {
    let (_registry, handle, section_id) = setup("classbook-ledger-missing");
    let mut edit = grade_input(section_id, 10, 4);
    edit.id = Some(4242);
    assert!(gradebook::edit_grade(&handle.tenant_db, &edit).unwrap_err().is_not_found());
}

#[test]
fn final_kind_grades_are_excluded_from_running_averages() {
    let (_registry, handle, section_id) = setup("classbook-ledger-final");
    gradebook::create_grade(&handle.tenant_db, &grade_input(section_id, 10, 5)).expect("regular");
    gradebook::create_grade(&handle.tenant_db, &grade_input(section_id, 10, 4)).expect("regular");
    let mut final_grade = grade_input(section_id, 10, 2);
    final_grade.kind = "final".to_string();
    let group = gradebook::create_grade(&handle.tenant_db, &final_grade).expect("final");
    assert_eq!(group.average_grade, 4.5, "final kind must not drag the average");

    let finals = gradebook::final_grades_for_section(&handle.tenant_db, section_id).expect("finals");
    assert_eq!(finals.len(), 1);
    assert_eq!(finals[0].grade, 2);
    assert_eq!(gradebook::average_final_grade(&group.grades), 2.0);
}

#[test]
fn section_subject_view_groups_by_pupil() {
    let (_registry, handle, section_id) = setup("classbook-ledger-groups");
    gradebook::create_grade(&handle.tenant_db, &grade_input(section_id, 10, 5)).expect("a1");
    gradebook::create_grade(&handle.tenant_db, &grade_input(section_id, 10, 4)).expect("a2");
    gradebook::create_grade(&handle.tenant_db, &grade_input(section_id, 11, 3)).expect("t1");

    let groups =
        gradebook::pupil_grades_for_section_subject(&handle.tenant_db, section_id, "MAT", "1POL")
            .expect("groups");
    assert_eq!(groups.len(), 2);
    let amina = groups.iter().find(|g| g.pupil.id == 10).expect("amina");
    assert_eq!(amina.grades.len(), 2);
    assert_eq!(amina.average_grade, 4.5);
    let tarik = groups.iter().find(|g| g.pupil.id == 11).expect("tarik");
    assert_eq!(tarik.average_grade, 3.0);
}

#[test]
fn pupil_view_groups_by_curriculum_subject() {
    let (_registry, handle, section_id) = setup("classbook-ledger-subjects");
    gradebook::create_grade(&handle.tenant_db, &grade_input(section_id, 10, 5)).expect("mat");

    let groups =
        gradebook::pupil_grades_by_subject(&handle.tenant_db, section_id, 10, "1POL")
            .expect("groups");
    // Both curriculum subjects appear, the ungraded one empty.
    assert_eq!(groups.len(), 2);
    let bos = groups
        .iter()
        .find(|g| g.subject.subject_code == "BOS")
        .expect("bos group");
    assert!(bos.grades.is_empty());
    assert_eq!(bos.average_grade, 0.0);
}

#[test]
fn behaviour_grades_upsert_and_version() {
    let (_registry, handle, section_id) = setup("classbook-ledger-behaviour");
    let first = gradebook::set_behaviour_grade(&handle.tenant_db, 10, section_id, "exemplary", "1POL", 1)
        .expect("set");
    assert_eq!(first.behaviour, "exemplary");
    assert_eq!(first.signature, "Lejla Hodzic");

    let second = gradebook::set_behaviour_grade(&handle.tenant_db, 10, section_id, "good", "1POL", 2)
        .expect("overwrite");
    assert_eq!(second.id, first.id, "same semester row is replaced, not duplicated");
    assert_eq!(second.behaviour, "good");
    assert_eq!(second.signature, "Emir Kovac");

    let history =
        gradebook::behaviour_grade_history(&handle.tenant_db, first.id).expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].behaviour, "exemplary");

    let all = gradebook::behaviour_grades_for_pupil(&handle.tenant_db, 10, section_id)
        .expect("list");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].semester_name, "First Semester");

    gradebook::delete_behaviour_grade(&handle.tenant_db, first.id, 1).expect("delete");
    let all = gradebook::behaviour_grades_for_pupil(&handle.tenant_db, 10, section_id)
        .expect("list after delete");
    assert!(all.is_empty());
}

#[test]
fn grades_serialize_with_their_flags() {
    let (_registry, handle, section_id) = setup("classbook-ledger-serialize");
    gradebook::create_grade(&handle.tenant_db, &grade_input(section_id, 10, 4)).expect("create");

    let grades =
        gradebook::grades_for_section_subject(&handle.tenant_db, section_id, "MAT", "1POL")
            .expect("grades");
    let json = serde_json::to_value(&grades[0]).expect("serialize");
    assert_eq!(json["grade"], 4);
    assert_eq!(json["subject_name"], "Mathematics");
    assert_eq!(json["is_edited"], false);
    assert_eq!(json["is_deleted"], false);
    assert!(json["valid_until"].is_null());
}
