//! Apply flow: validate, score eligibility, write the ledger, then the mirror.

use serde::Serialize;
use tracing::{info, warn};

use crate::db::Database;
use crate::eligibility::{self, EligibilityVerdict};
use crate::error::{PortalError, Result};
use crate::ledger::{NewApplication, RequestMeta};
use crate::mirror::{ApplicationSnapshot, MirrorOutcome};
use crate::models::{Actor, Capability, PostingKind};

pub const MIN_COVER_LETTER_CHARS: usize = 50;

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub kind: PostingKind,
    pub posting_id: i64,
    pub student_id: i64,
    pub cover_letter: String,
    pub additional_info: Option<String>,
    pub eligibility_acknowledged: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    pub application_id: i64,
    pub submitted_at: String,
    pub posting_title: String,
    pub organization_name: String,
    pub eligibility: Vec<EligibilityVerdict>,
    pub is_eligible: bool,
}

fn validate(request: &SubmitRequest) -> Result<()> {
    let length = request.cover_letter.trim().chars().count();
    if length < MIN_COVER_LETTER_CHARS {
        return Err(PortalError::ValidationFailed(format!(
            "cover letter must be at least {} characters (got {})",
            MIN_COVER_LETTER_CHARS, length
        )));
    }
    Ok(())
}

/// Eligibility is attached to the receipt but never decides the outcome.
/// A failed mirror write is logged and does not fail the submission.
pub fn submit_application(
    db: &Database,
    actor: &Actor,
    request: &SubmitRequest,
    meta: &RequestMeta,
) -> Result<SubmissionReceipt> {
    validate(request)?;
    actor.require(Capability::Apply)?;
    if actor.student_id != Some(request.student_id) {
        return Err(PortalError::Forbidden(format!(
            "{} cannot apply on behalf of student #{}",
            actor.identity, request.student_id
        )));
    }

    let posting = db
        .get_posting(request.kind, request.posting_id)?
        .ok_or_else(|| PortalError::NotFound(format!("{} #{}", request.kind, request.posting_id)))?;
    let student = db
        .get_student_profile(request.student_id)?
        .ok_or_else(|| PortalError::NotFound(format!("student #{}", request.student_id)))?;

    let verdicts = eligibility::evaluate(&posting, &student);
    let is_eligible = eligibility::is_eligible(&verdicts);

    let cover_letter = request.cover_letter.trim().to_string();
    let additional_info = request
        .additional_info
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let application = db.ledger().submit(
        request.kind,
        posting.id,
        student.id,
        &NewApplication {
            cover_letter: cover_letter.clone(),
            additional_info: additional_info.clone(),
            eligibility_acknowledged: request.eligibility_acknowledged,
        },
        meta,
    )?;
    info!(
        application_id = application.id,
        posting = %posting.title,
        student = %student.student_number,
        is_eligible,
        "submission accepted"
    );

    let snapshot = ApplicationSnapshot {
        kind: request.kind,
        posting_id: posting.id,
        company_name: posting.organization.clone(),
        position: posting.title.clone(),
        applied_date: application.submitted_at.clone(),
        cover_letter,
        additional_info,
    };
    match db.mirror().record_application(student.id, &snapshot) {
        Ok(MirrorOutcome::Recorded(_)) => {}
        Ok(MirrorOutcome::NoOp) => {
            warn!(application_id = application.id, "mirror record already existed for new application");
        }
        Err(e) => {
            let err = PortalError::MirrorWriteFailed(e.to_string());
            warn!(application_id = application.id, student_id = student.id, error = %err, "mirror lagging ledger");
        }
    }

    Ok(SubmissionReceipt {
        application_id: application.id,
        submitted_at: application.submitted_at,
        posting_title: posting.title,
        organization_name: posting.organization,
        eligibility: verdicts,
        is_eligible,
    })
}

/// Eligibility preview without submitting.
pub fn check_eligibility(
    db: &Database,
    kind: PostingKind,
    posting_id: i64,
    student_id: i64,
) -> Result<Vec<EligibilityVerdict>> {
    let posting = db
        .get_posting(kind, posting_id)?
        .ok_or_else(|| PortalError::NotFound(format!("{} #{}", kind, posting_id)))?;
    let student = db
        .get_student_profile(student_id)?
        .ok_or_else(|| PortalError::NotFound(format!("student #{}", student_id)))?;
    Ok(eligibility::evaluate(&posting, &student))
}
