//! Status transitions. The ledger is written first; the mirror follows on a
//! best-effort basis and never rolls the ledger back.

use tracing::{info, warn};

use crate::db::Database;
use crate::error::{PortalError, Result};
use crate::models::{Actor, Application, ApplicationStatus, Capability, PostingKind};

#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub kind: PostingKind,
    pub posting_id: i64,
    pub application_id: i64,
    /// Raw value as received; must be one of the five status names.
    pub new_status: String,
    pub notes: Option<String>,
}

pub fn update_application_status(
    db: &Database,
    actor: &Actor,
    update: &StatusUpdate,
) -> Result<Application> {
    let status: ApplicationStatus = update.new_status.parse()?;
    actor.require(Capability::UpdateStatus)?;

    let (application, previous) =
        db.ledger()
            .update_status(update.kind, update.posting_id, update.application_id, status)?;
    info!(
        application_id = application.id,
        posting_id = application.posting_id,
        from = %previous,
        to = %status,
        actor = %actor.identity,
        "application status updated"
    );

    let reopened = previous.is_terminal() && previous != status;
    if reopened {
        warn!(
            application_id = application.id,
            from = %previous,
            to = %status,
            "application moved out of a final decision"
        );
    }
    let notes = history_note(update.notes.as_deref(), previous, status, &actor.identity, reopened);

    if let Err(e) = propagate(db, &application, update.kind, status, &actor.identity, &notes) {
        warn!(
            application_id = application.id,
            student_id = application.student_id,
            error = %e,
            "mirror lagging ledger after status update"
        );
    }

    Ok(application)
}

fn history_note(
    notes: Option<&str>,
    previous: ApplicationStatus,
    status: ApplicationStatus,
    actor: &str,
    reopened: bool,
) -> String {
    let base = match notes.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => n.to_string(),
        None => format!("Status updated to {} by {}", status, actor),
    };
    if reopened {
        format!("Reopened from {}: {}", previous, base)
    } else {
        base
    }
}

fn propagate(
    db: &Database,
    application: &Application,
    kind: PostingKind,
    status: ApplicationStatus,
    actor: &str,
    notes: &str,
) -> Result<()> {
    if db.get_student_profile(application.student_id)?.is_none() {
        return Err(PortalError::MirrorWriteFailed(format!(
            "student #{} not found",
            application.student_id
        )));
    }

    let found = db
        .mirror()
        .apply_transition(application.student_id, kind, application.posting_id, status, actor, notes)
        .map_err(|e| PortalError::MirrorWriteFailed(e.to_string()))?;
    if !found {
        return Err(PortalError::MirrorWriteFailed(format!(
            "no mirror record for student #{} on {} #{}",
            application.student_id, kind, application.posting_id
        )));
    }
    Ok(())
}
