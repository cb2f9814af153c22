use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use classbook_core::config::TenantCategory;
use classbook_core::invites::{self, InviteStatus, SectionAssignment, SubjectSelection};
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
        (1, 'lejla@school.ba'), (3, 'amina@pupils.ba'), (4, 'tarik@pupils.ba');
    INSERT INTO teachers(id, account_id, name, last_name, phone) VALUES
        (1, 1, 'Lejla', 'Hodzic', '061-111-111');
    INSERT INTO pupil_global(id, account_id, name, last_name) VALUES
        (10, 3, 'Amina', 'Begic'), (11, 4, 'Tarik', 'Imamovic');
    INSERT INTO subjects(subject_code, subject_name) VALUES
        ('MAT', 'Mathematics'), ('BOS', 'Bosnian Language');
    INSERT INTO curriculum(curriculum_code, curriculum_name, npp_code, final_curriculum)
        VALUES ('IX-NPP', 'Ninth Grade', 'NPP9', 0);
    INSERT INTO curriculum_subjects(curriculum_code, subject_code) VALUES
        ('IX-NPP', 'MAT'), ('IX-NPP', 'BOS');
    INSERT INTO semester(semester_code, semester_name, progress_level) VALUES
        ('1POL', 'First Semester', 1), ('2POL', 'Second Semester', 2);
    INSERT INTO pupil_tenant(pupil_id, tenant_id) VALUES (10, 1), (11, 1);
";

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
            email: String::new(),
            director_name: String::new(),
            color_config: "{}".to_string(),
            tenant_city: "Sarajevo".to_string(),
            specialization: String::new(),
            domain: None,
        },
    )
    .expect("tenant");
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
    (registry, handle, section.id)
}

fn membership(handle: &TenantHandle, pupil_id: i64, section_id: i64) -> Option<bool> {
    let conn = handle.tenant_db.lock().expect("lock");
    conn.query_row(
        "SELECT is_active FROM pupils_sections WHERE pupil_id = ?1 AND section_id = ?2",
        [pupil_id, section_id],
        |row| row.get::<_, i64>(0).map(|v| v != 0),
    )
    .ok()
}

#[test]
fn sending_an_invite_mirrors_it_into_the_inbox() {
    let (_registry, handle, section_id) = setup("classbook-invite-send");
    let invite = invites::send_pupil_invite(&handle, 10, section_id).expect("send");
    assert_eq!(invite.status, InviteStatus::Pending);
    assert_eq!(invite.pupil_full_name, "Amina Begic");
    assert_eq!(invite.section_name, "Section IX-A");

    let inbox = invites::global_invites_for_account(&handle.workspace, 3).expect("inbox");
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].invite_id, invite.id);
    assert_eq!(inbox[0].tenant_id, handle.tenant.id);
    assert_eq!(inbox[0].tenant_name, "OS Centar");
}

#[test]
fn accepting_materializes_pupil_and_membership() {
    let (_registry, handle, section_id) = setup("classbook-invite-accept");
    let invite = invites::send_pupil_invite(&handle, 10, section_id).expect("send");
    invites::accept_pupil_invite(&handle, invite.id).expect("accept");

    assert_eq!(membership(&handle, 10, section_id), Some(true));
    {
        let conn = handle.tenant_db.lock().expect("lock");
        let name: String = conn
            .query_row("SELECT name FROM pupils WHERE id = 10", [], |row| row.get(0))
            .expect("materialized pupil");
        assert_eq!(name, "Amina");
    }
    let accepted = invites::pupil_invite_by_id(&handle, invite.id).expect("reload");
    assert_eq!(accepted.status, InviteStatus::Accepted);

    // Accepting again is an idempotent no-op, not a second membership.
    invites::accept_pupil_invite(&handle, invite.id).expect("re-accept");
    assert_eq!(membership(&handle, 10, section_id), Some(true));
    {
        let conn = handle.tenant_db.lock().expect("lock");
        let memberships: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pupils_sections WHERE pupil_id = 10",
                [],
                |row| row.get(0),
            )
            .expect("count");
        assert_eq!(memberships, 1);
    }
    let reloaded = invites::pupil_invite_by_id(&handle, invite.id).expect("reload again");
    assert_eq!(reloaded.status, InviteStatus::Accepted);
}

#[test]
fn accepting_reactivates_an_inactive_membership() {
    let (_registry, handle, section_id) = setup("classbook-invite-reactivate");
    let invite = invites::send_pupil_invite(&handle, 10, section_id).expect("send");
    invites::accept_pupil_invite(&handle, invite.id).expect("accept");
    {
        let conn = handle.tenant_db.lock().expect("lock");
        conn.execute(
            "UPDATE pupils_sections SET is_active = 0 WHERE pupil_id = 10",
            [],
        )
        .expect("unenroll");
    }
    let second = invites::send_pupil_invite(&handle, 10, section_id).expect("re-invite");
    invites::accept_pupil_invite(&handle, second.id).expect("re-accept");
    assert_eq!(membership(&handle, 10, section_id), Some(true));
}

#[test]
fn declining_leaves_no_membership() {
    let (_registry, handle, section_id) = setup("classbook-invite-decline");
    let invite = invites::send_pupil_invite(&handle, 11, section_id).expect("send");
    invites::decline_pupil_invite(&handle, invite.id).expect("decline");
    assert_eq!(membership(&handle, 11, section_id), None);
    let declined = invites::pupil_invite_by_id(&handle, invite.id).expect("reload");
    assert_eq!(declined.status, InviteStatus::Declined);

    // A declined invite is terminal; it cannot be accepted afterwards.
    let err = invites::accept_pupil_invite(&handle, invite.id).unwrap_err();
    assert!(matches!(err, Error::Precondition(_)), "got {err:?}");
    assert_eq!(membership(&handle, 11, section_id), None);
}

#[test]
fn deleting_an_invite_removes_exactly_its_index_row() {
    let (_registry, handle, section_id) = setup("classbook-invite-delete");
    let first = invites::send_pupil_invite(&handle, 10, section_id).expect("send a");
    let second = invites::send_pupil_invite(&handle, 11, section_id).expect("send b");

    invites::delete_pupil_invite(&handle, first.id).expect("delete");
    assert!(invites::pupil_invite_by_id(&handle, first.id).unwrap_err().is_not_found());

    let amina_inbox = invites::global_invites_for_account(&handle.workspace, 3).expect("inbox a");
    assert!(amina_inbox.is_empty());
    let tarik_inbox = invites::global_invites_for_account(&handle.workspace, 4).expect("inbox b");
    assert_eq!(tarik_inbox.len(), 1);
    assert_eq!(tarik_inbox[0].invite_id, second.id);
}

#[test]
fn eligible_pupils_shrink_as_invites_and_memberships_appear() {
    let (_registry, handle, section_id) = setup("classbook-invite-eligible");
    let eligible = invites::pupils_eligible_for_section(&handle, section_id).expect("eligible");
    assert_eq!(eligible.len(), 2);

    let invite = invites::send_pupil_invite(&handle, 10, section_id).expect("send");
    let eligible = invites::pupils_eligible_for_section(&handle, section_id).expect("eligible");
    assert_eq!(eligible.len(), 1, "pending invitee is no longer eligible");
    assert_eq!(eligible[0].id, 11);

    let pending = invites::pupils_with_pending_invites(&handle, section_id).expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, 10);

    invites::accept_pupil_invite(&handle, invite.id).expect("accept");
    let eligible = invites::pupils_eligible_for_section(&handle, section_id).expect("eligible");
    assert_eq!(eligible.len(), 1, "active member is not eligible");
    assert_eq!(eligible[0].id, 11);
}

fn assignment(section_id: i64, homeroom: bool, picks: &[(&str, bool)]) -> SectionAssignment {
    SectionAssignment {
        section_id,
        homeroom_request: homeroom,
        subjects: picks
            .iter()
            .map(|(code, selected)| SubjectSelection {
                subject_code: code.to_string(),
                selected: *selected,
            })
            .collect(),
    }
}

#[test]
fn teacher_assignment_flow_from_invite_to_materialized_subjects() {
    let (_registry, handle, section_id) = setup("classbook-invite-teacher");
    let invites_out = invites::manage_teacher_assignments(
        &handle,
        1,
        &[assignment(section_id, true, &[("MAT", true), ("BOS", true)])],
    )
    .expect("manage");
    assert_eq!(invites_out.len(), 1);
    let invite = &invites_out[0];
    assert_eq!(invite.status, InviteStatus::Pending);
    assert!(invite.homeroom_teacher);
    assert_eq!(invite.subjects.len(), 2);
    assert_eq!(invite.teacher_full_name, "Lejla Hodzic");

    // Mirrored into the teacher's inbox.
    let inbox = invites::global_invites_for_account(&handle.workspace, 1).expect("inbox");
    assert_eq!(inbox.len(), 1);

    invites::accept_teacher_invite(&handle, invite.id).expect("accept");
    let conn = handle.tenant_db.lock().expect("lock");
    let member: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM teachers_sections WHERE teacher_id = 1 AND section_id = ?1",
            [section_id],
            |row| row.get(0),
        )
        .expect("membership");
    assert_eq!(member, 1);
    let subjects: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM teachers_sections_subjects WHERE teacher_id = 1 AND section_id = ?1",
            [section_id],
            |row| row.get(0),
        )
        .expect("subjects");
    assert_eq!(subjects, 2);
    let homeroom: i64 = conn
        .query_row(
            "SELECT teacher_id FROM homeroom_assignments WHERE section_id = ?1",
            [section_id],
            |row| row.get(0),
        )
        .expect("homeroom");
    assert_eq!(homeroom, 1);
}

#[test]
fn deselecting_everything_cleans_up_the_assignment() {
    let (_registry, handle, section_id) = setup("classbook-invite-teacher-cleanup");
    let created = invites::manage_teacher_assignments(
        &handle,
        1,
        &[assignment(section_id, false, &[("MAT", true)])],
    )
    .expect("create");
    invites::accept_teacher_invite(&handle, created[0].id).expect("accept");

    let after = invites::manage_teacher_assignments(
        &handle,
        1,
        &[assignment(section_id, false, &[("MAT", false)])],
    )
    .expect("withdraw");
    // A fresh invite for the withdrawal is neither needed nor kept.
    assert!(after.iter().all(|i| i.status != InviteStatus::Pending));

    let conn = handle.tenant_db.lock().expect("lock");
    let subjects: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM teachers_sections_subjects WHERE teacher_id = 1",
            [],
            |row| row.get(0),
        )
        .expect("subjects");
    assert_eq!(subjects, 0);
    let member: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM teachers_sections WHERE teacher_id = 1",
            [],
            |row| row.get(0),
        )
        .expect("membership");
    assert_eq!(member, 0, "membership goes away with its last assignment");
}

#[test]
fn homeroom_request_survives_empty_subject_cleanup() {
    let (_registry, handle, section_id) = setup("classbook-invite-homeroom-keep");
    invites::manage_teacher_assignments(
        &handle,
        1,
        &[assignment(section_id, true, &[("MAT", true)])],
    )
    .expect("create");
    let after = invites::manage_teacher_assignments(
        &handle,
        1,
        &[assignment(section_id, true, &[("MAT", false)])],
    )
    .expect("deselect subject");
    assert_eq!(after.len(), 1, "homeroom-flagged invite must survive");
    assert!(after[0].homeroom_teacher);
    assert!(after[0].subjects.is_empty());

    // The inbox mirror survives with it.
    let inbox = invites::global_invites_for_account(&handle.workspace, 1).expect("inbox");
    assert_eq!(inbox.len(), 1);
}
