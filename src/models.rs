use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::PortalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostingKind {
    Job,
    Internship,
}

impl PostingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostingKind::Job => "job",
            PostingKind::Internship => "internship",
        }
    }
}

impl fmt::Display for PostingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostingKind {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "job" | "jobs" => Ok(PostingKind::Job),
            "internship" | "internships" => Ok(PostingKind::Internship),
            other => Err(PortalError::ValidationFailed(format!(
                "unknown posting type '{}' (expected job or internship)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplicationStatus {
    Applied,
    Reviewed,
    #[serde(rename = "Interview Scheduled")]
    InterviewScheduled,
    Selected,
    Rejected,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 5] = [
        ApplicationStatus::Applied,
        ApplicationStatus::Reviewed,
        ApplicationStatus::InterviewScheduled,
        ApplicationStatus::Selected,
        ApplicationStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Applied => "Applied",
            ApplicationStatus::Reviewed => "Reviewed",
            ApplicationStatus::InterviewScheduled => "Interview Scheduled",
            ApplicationStatus::Selected => "Selected",
            ApplicationStatus::Rejected => "Rejected",
        }
    }

    /// No transition out of these is expected, though one is not refused.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ApplicationStatus::Selected | ApplicationStatus::Rejected)
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ApplicationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| PortalError::InvalidStatus(s.to_string()))
    }
}

/// Stored as TEXT; parsing back out of the database should never fail
/// because of the CHECK constraint on every status column.
pub(crate) fn status_from_sql(raw: String, idx: usize) -> rusqlite::Result<ApplicationStatus> {
    raw.parse().map_err(|e: PortalError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn kind_from_sql(raw: String, idx: usize) -> rusqlite::Result<PostingKind> {
    raw.parse().map_err(|e: PortalError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requirements {
    /// Free text, e.g. "7.5 CGPA and above".
    pub cgpa_requirement: Option<String>,
    pub required_programs: Vec<String>,
    /// Degree level ("btech", "mtech", ...) -> eligible branches.
    pub required_branches: BTreeMap<String, Vec<String>>,
    pub all_branches_applicable: bool,
    pub eligible_years: Vec<String>,
    pub other_requirements: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posting {
    pub id: i64,
    pub kind: PostingKind,
    pub title: String,
    pub organization: String,
    pub requirements: Requirements,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudentProfile {
    pub id: i64,
    pub student_number: String,
    pub name: String,
    pub email: String,
    pub degree_level: Option<String>,
    pub program: Option<String>,
    pub branch: Option<String>,
    pub year: Option<String>,
    pub cgpa: Option<f64>,
    pub active_backlogs: u32,
    pub available_for_placement: bool,
}

/// Ledger entry. Owned by the posting; `student_id` points at the student.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub posting_id: i64,
    pub student_id: i64,
    pub status: ApplicationStatus,
    pub cover_letter: String,
    pub additional_info: Option<String>,
    pub eligibility_acknowledged: bool,
    pub submission_ip: String,
    pub user_agent: String,
    pub submitted_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentSummary {
    pub name: String,
    pub email: String,
    pub student_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationWithStudent {
    #[serde(flatten)]
    pub application: Application,
    pub student: StudentSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: ApplicationStatus,
    pub updated_date: String,
    pub updated_by: String,
    pub notes: Option<String>,
}

/// Student-owned copy of an application. `company_name` and `position` are
/// snapshots taken at submission time and are not kept in sync with the posting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentApplicationRecord {
    pub id: i64,
    pub student_id: i64,
    pub kind: PostingKind,
    pub posting_id: i64,
    pub company_name: String,
    pub position: String,
    pub applied_date: String,
    pub current_status: ApplicationStatus,
    pub cover_letter: String,
    pub additional_info: Option<String>,
    pub status_history: Vec<StatusHistoryEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Student,
    Spc,
    Admin,
}

impl FromStr for Role {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "spc" => Ok(Role::Spc),
            "admin" => Ok(Role::Admin),
            other => Err(PortalError::ValidationFailed(format!("unknown role '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Apply,
    ReviewApplications,
    UpdateStatus,
    Reconcile,
}

/// Who is calling. Passed into every write path; there is no ambient session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub identity: String,
    pub role: Role,
    /// Set for students; the only student id they may act for.
    pub student_id: Option<i64>,
}

impl Actor {
    pub fn student(identity: &str, student_id: i64) -> Self {
        Self {
            identity: identity.to_string(),
            role: Role::Student,
            student_id: Some(student_id),
        }
    }

    pub fn staff(identity: &str, role: Role) -> Self {
        Self {
            identity: identity.to_string(),
            role,
            student_id: None,
        }
    }

    pub fn can(&self, capability: Capability) -> bool {
        match capability {
            Capability::Apply => self.role == Role::Student,
            Capability::ReviewApplications | Capability::UpdateStatus => {
                matches!(self.role, Role::Spc | Role::Admin)
            }
            Capability::Reconcile => self.role == Role::Admin,
        }
    }

    pub fn require(&self, capability: Capability) -> crate::error::Result<()> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(PortalError::Forbidden(format!(
                "{} ({:?}) lacks {:?}",
                self.identity, self.role, capability
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_only_the_five_values() {
        assert_eq!(
            "Interview Scheduled".parse::<ApplicationStatus>().unwrap(),
            ApplicationStatus::InterviewScheduled
        );
        assert!(matches!(
            "Hired".parse::<ApplicationStatus>(),
            Err(PortalError::InvalidStatus(s)) if s == "Hired"
        ));
        assert!("selected".parse::<ApplicationStatus>().is_err());
    }

    #[test]
    fn status_serializes_with_display_names() {
        let json = serde_json::to_string(&ApplicationStatus::InterviewScheduled).unwrap();
        assert_eq!(json, "\"Interview Scheduled\"");
    }

    #[test]
    fn capabilities_follow_role() {
        let student = Actor::student("s1@x.com", 1);
        let spc = Actor::staff("spc@x.com", Role::Spc);
        let admin = Actor::staff("admin@x.com", Role::Admin);

        assert!(student.can(Capability::Apply));
        assert!(!student.can(Capability::UpdateStatus));
        assert!(spc.can(Capability::UpdateStatus));
        assert!(!spc.can(Capability::Reconcile));
        assert!(admin.can(Capability::Reconcile));
        assert!(matches!(
            student.require(Capability::ReviewApplications),
            Err(PortalError::Forbidden(_))
        ));
    }
}
