//! Role/table/verb privilege matrix for tenant databases.
//!
//! One declarative table per role, consumed by the grant/revoke paths in
//! `provision` and by the per-connection authorizer in `pool`. The
//! administrative role is a blanket grant and has no matrix.

use crate::pool::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy)]
pub struct TablePrivilege {
    pub table: &'static str,
    pub verbs: &'static [Verb],
}

use Verb::{Delete, Insert, Select, Update};

const ALL: &[Verb] = &[Select, Insert, Update, Delete];
const READ: &[Verb] = &[Select];

const STAFF: &[TablePrivilege] = &[
    TablePrivilege { table: "pupils", verbs: ALL },
    TablePrivilege { table: "sections", verbs: &[Select, Update] },
    TablePrivilege { table: "pupils_sections", verbs: ALL },
    TablePrivilege { table: "student_grades", verbs: ALL },
    TablePrivilege { table: "pupils_sections_invite", verbs: ALL },
    TablePrivilege { table: "teachers_sections_invite", verbs: READ },
    TablePrivilege { table: "teachers_sections_invite_subjects", verbs: READ },
    TablePrivilege { table: "homeroom_assignments", verbs: READ },
    TablePrivilege { table: "teachers_sections", verbs: READ },
    TablePrivilege { table: "teachers_sections_subjects", verbs: READ },
    TablePrivilege { table: "classroom", verbs: READ },
    TablePrivilege { table: "schedule", verbs: READ },
    TablePrivilege { table: "time_periods", verbs: READ },
    TablePrivilege { table: "class_lesson", verbs: ALL },
    TablePrivilege { table: "pupil_attendance", verbs: ALL },
    TablePrivilege { table: "pupil_behaviour", verbs: ALL },
];

const LEARNER: &[TablePrivilege] = &[
    TablePrivilege { table: "pupils", verbs: READ },
    TablePrivilege { table: "sections", verbs: READ },
    TablePrivilege { table: "pupils_sections", verbs: READ },
    TablePrivilege { table: "student_grades", verbs: READ },
    TablePrivilege { table: "pupils_sections_invite", verbs: READ },
    TablePrivilege { table: "homeroom_assignments", verbs: READ },
    TablePrivilege { table: "classroom", verbs: READ },
    TablePrivilege { table: "schedule", verbs: READ },
    TablePrivilege { table: "time_periods", verbs: READ },
    TablePrivilege { table: "class_lesson", verbs: READ },
    TablePrivilege { table: "pupil_attendance", verbs: READ },
    TablePrivilege { table: "pupil_behaviour", verbs: READ },
];

const SERVICE: &[TablePrivilege] = &[
    TablePrivilege { table: "pupils", verbs: ALL },
    TablePrivilege { table: "sections", verbs: &[Select, Update] },
    TablePrivilege { table: "pupils_sections", verbs: ALL },
    TablePrivilege { table: "student_grades", verbs: ALL },
    TablePrivilege { table: "pupils_sections_invite", verbs: ALL },
    TablePrivilege { table: "teachers_sections_invite", verbs: &[Select, Update] },
    TablePrivilege { table: "teachers_sections_invite_subjects", verbs: READ },
    TablePrivilege { table: "teachers_sections", verbs: &[Insert, Select] },
    TablePrivilege { table: "teachers_sections_subjects", verbs: &[Insert, Select] },
    TablePrivilege { table: "homeroom_assignments", verbs: &[Select, Insert, Update] },
    TablePrivilege { table: "classroom", verbs: READ },
    TablePrivilege { table: "schedule", verbs: READ },
    TablePrivilege { table: "time_periods", verbs: READ },
    TablePrivilege { table: "class_lesson", verbs: ALL },
    TablePrivilege { table: "pupil_attendance", verbs: ALL },
    TablePrivilege { table: "pupil_behaviour", verbs: ALL },
];

pub fn staff_table_privileges() -> &'static [TablePrivilege] {
    STAFF
}

pub fn learner_table_privileges() -> &'static [TablePrivilege] {
    LEARNER
}

pub fn service_table_privileges() -> &'static [TablePrivilege] {
    SERVICE
}

pub fn table_privileges(role: Role) -> Option<&'static [TablePrivilege]> {
    match role {
        Role::Admin => None,
        Role::Staff => Some(STAFF),
        Role::Learner => Some(LEARNER),
        Role::Service => Some(SERVICE),
    }
}

/// Verbs a role holds on a table, or `None` when the table is off limits.
/// History tables are readable exactly when the base table is; they are
/// never directly writable (only the versioning triggers append to them).
pub fn verbs_for(role: Role, table: &str) -> Option<&'static [Verb]> {
    let matrix = table_privileges(role)?;
    if let Some(base) = table.strip_suffix("_history") {
        let readable = matrix
            .iter()
            .any(|p| p.table == base && p.verbs.contains(&Select));
        return readable.then_some(READ);
    }
    matrix.iter().find(|p| p.table == table).map(|p| p.verbs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Role;

    #[test]
    fn matrix_row_counts() {
        assert_eq!(staff_table_privileges().len(), 16);
        assert_eq!(learner_table_privileges().len(), 12);
        assert_eq!(service_table_privileges().len(), 16);
    }

    #[test]
    fn learner_is_read_only() {
        for p in learner_table_privileges() {
            assert_eq!(p.verbs, READ, "learner must only read {}", p.table);
        }
    }

    #[test]
    fn staff_cannot_delete_sections() {
        let verbs = verbs_for(Role::Staff, "sections").unwrap();
        assert!(verbs.contains(&Select));
        assert!(verbs.contains(&Update));
        assert!(!verbs.contains(&Delete));
        assert!(!verbs.contains(&Insert));
    }

    #[test]
    fn history_tables_follow_base_reads() {
        assert_eq!(verbs_for(Role::Learner, "student_grades_history"), Some(READ));
        assert_eq!(verbs_for(Role::Staff, "pupil_behaviour_history"), Some(READ));
        assert_eq!(verbs_for(Role::Staff, "unknown_history"), None);
    }

    #[test]
    fn service_can_materialize_teacher_membership() {
        let verbs = verbs_for(Role::Service, "teachers_sections").unwrap();
        assert!(verbs.contains(&Insert));
        assert!(!verbs.contains(&Delete));
    }

    #[test]
    fn admin_has_no_matrix() {
        assert!(table_privileges(Role::Admin).is_none());
    }
}
