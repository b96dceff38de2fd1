//! Repair pass that rebuilds mirror records from the ledger.

use serde::Serialize;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::Result;
use crate::mirror::{ApplicationSnapshot, MirrorOutcome};
use crate::models::{Actor, Application, ApplicationStatus, Capability, PostingKind};

pub const SYSTEM_ACTOR: &str = "System";

#[derive(Debug, Default, Serialize)]
pub struct ReconcileStats {
    pub scanned: usize,
    pub created: usize,
    pub resynced: usize,
    pub errors: usize,
}

pub fn reconcile(db: &Database, actor: &Actor, dry_run: bool) -> Result<ReconcileStats> {
    actor.require(Capability::Reconcile)?;

    let mut stats = ReconcileStats::default();
    for (kind, application) in db.ledger().all_applications()? {
        stats.scanned += 1;
        match repair_one(db, kind, &application, dry_run) {
            Ok(Repair::Created) => stats.created += 1,
            Ok(Repair::Resynced) => stats.resynced += 1,
            Ok(Repair::InSync) => {}
            Err(e) => {
                stats.errors += 1;
                warn!(application_id = application.id, error = %e, "could not repair mirror record");
            }
        }
    }

    info!(
        scanned = stats.scanned,
        created = stats.created,
        resynced = stats.resynced,
        errors = stats.errors,
        dry_run,
        "reconciliation finished"
    );
    Ok(stats)
}

enum Repair {
    Created,
    Resynced,
    InSync,
}

fn repair_one(db: &Database, kind: PostingKind, application: &Application, dry_run: bool) -> Result<Repair> {
    let mirror = db.mirror();
    let note = format!("Reconciled with ledger status {}", application.status);

    if let Some(record) = mirror.get_record(application.student_id, kind, application.posting_id)? {
        if record.current_status == application.status {
            return Ok(Repair::InSync);
        }
        if !dry_run {
            mirror.apply_transition(
                application.student_id,
                kind,
                application.posting_id,
                application.status,
                SYSTEM_ACTOR,
                &note,
            )?;
        }
        return Ok(Repair::Resynced);
    }

    if dry_run {
        return Ok(Repair::Created);
    }

    // Snapshot the posting as it is now; wording at submission time is lost.
    let (company_name, position) = match db.get_posting(kind, application.posting_id)? {
        Some(posting) => (posting.organization, posting.title),
        None => (String::new(), String::new()),
    };
    let snapshot = ApplicationSnapshot {
        kind,
        posting_id: application.posting_id,
        company_name,
        position,
        applied_date: application.submitted_at.clone(),
        cover_letter: application.cover_letter.clone(),
        additional_info: application.additional_info.clone(),
    };
    if let MirrorOutcome::NoOp = mirror.record_application(application.student_id, &snapshot)? {
        return Ok(Repair::InSync);
    }
    if application.status != ApplicationStatus::Applied {
        mirror.apply_transition(
            application.student_id,
            kind,
            application.posting_id,
            application.status,
            SYSTEM_ACTOR,
            &note,
        )?;
    }
    info!(
        application_id = application.id,
        student_id = application.student_id,
        "mirror record rebuilt"
    );
    Ok(Repair::Created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{update_application_status, StatusUpdate};
    use crate::db::testing::*;
    use crate::error::PortalError;
    use crate::ledger::RequestMeta;
    use crate::models::Role;
    use crate::submission::{submit_application, SubmitRequest};

    fn admin() -> Actor {
        Actor::staff("admin@x.com", Role::Admin)
    }

    fn submit(db: &Database, posting: i64, student: i64) -> i64 {
        submit_application(
            db,
            &Actor::student("s@college.edu", student),
            &SubmitRequest {
                kind: PostingKind::Job,
                posting_id: posting,
                student_id: student,
                cover_letter: COVER_LETTER.to_string(),
                additional_info: None,
                eligibility_acknowledged: true,
            },
            &RequestMeta::from_headers([("user-agent", "test")]),
        )
        .unwrap()
        .application_id
    }

    #[test]
    fn rebuilds_records_lost_during_submission() {
        let db = fresh_db();
        let posting = seed_job(&db);
        let student = seed_student(&db, "S1");
        db.conn().execute_batch("DROP TABLE status_history; DROP TABLE student_applications;").unwrap();
        let app_id = submit(&db, posting, student);

        db.ledger()
            .update_status(PostingKind::Job, posting, app_id, ApplicationStatus::InterviewScheduled)
            .unwrap();
        db.init().unwrap();

        let stats = reconcile(&db, &admin(), false).unwrap();
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.errors, 0);

        let record = db.mirror().get_record(student, PostingKind::Job, posting).unwrap().unwrap();
        assert_eq!(record.current_status, ApplicationStatus::InterviewScheduled);
        assert_eq!(record.status_history.len(), 2);
        assert_eq!(record.status_history[1].updated_by, SYSTEM_ACTOR);
        assert_eq!(record.position, "Backend Engineer");
    }

    #[test]
    fn resyncs_lagging_status_and_is_idempotent() {
        let db = fresh_db();
        let posting = seed_job(&db);
        let student = seed_student(&db, "S1");
        let app_id = submit(&db, posting, student);
        db.ledger()
            .update_status(PostingKind::Job, posting, app_id, ApplicationStatus::Selected)
            .unwrap();

        let stats = reconcile(&db, &admin(), false).unwrap();
        assert_eq!(stats.resynced, 1);
        let record = db.mirror().get_record(student, PostingKind::Job, posting).unwrap().unwrap();
        assert_eq!(record.current_status, ApplicationStatus::Selected);

        let again = reconcile(&db, &admin(), false).unwrap();
        assert_eq!((again.created, again.resynced), (0, 0));
    }

    #[test]
    fn dry_run_counts_without_writing() {
        let db = fresh_db();
        let posting = seed_job(&db);
        let student = seed_student(&db, "S1");
        let app_id = submit(&db, posting, student);
        db.ledger()
            .update_status(PostingKind::Job, posting, app_id, ApplicationStatus::Reviewed)
            .unwrap();

        let stats = reconcile(&db, &admin(), true).unwrap();
        assert_eq!(stats.resynced, 1);
        let record = db.mirror().get_record(student, PostingKind::Job, posting).unwrap().unwrap();
        assert_eq!(record.current_status, ApplicationStatus::Applied);
    }

    #[test]
    fn in_sync_mirror_is_untouched() {
        let db = fresh_db();
        let posting = seed_job(&db);
        let student = seed_student(&db, "S1");
        let app_id = submit(&db, posting, student);
        update_application_status(
            &db,
            &admin(),
            &StatusUpdate {
                kind: PostingKind::Job,
                posting_id: posting,
                application_id: app_id,
                new_status: "Interview Scheduled".to_string(),
                notes: None,
            },
        )
        .unwrap();

        let stats = reconcile(&db, &admin(), false).unwrap();
        assert_eq!((stats.scanned, stats.created, stats.resynced), (1, 0, 0));
    }

    #[test]
    fn only_admins_may_reconcile() {
        let db = fresh_db();
        let err = reconcile(&db, &Actor::staff("spc@x.com", Role::Spc), false).unwrap_err();
        assert!(matches!(err, PortalError::Forbidden(_)));
    }
}
