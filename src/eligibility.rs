//! Advisory eligibility scoring.
//!
//! `evaluate` compares a student profile against a posting's stated
//! requirements and reports one verdict per criterion. Nothing here performs
//! I/O or returns an error, and no verdict ever prevents a submission.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

use crate::models::{Posting, PostingKind, Requirements, StudentProfile};

static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid number pattern"));

static YEAR_DIGIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([1-5])(?:st|nd|rd|th)?\b").expect("valid year pattern"));

static NO_BACKLOG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:no|zero|nil|without(?:\s+any)?)\s+(?:active\s+|current\s+|live\s+)?(?:backlogs?|arrears?)\b|\bbacklogs?\s+(?:are\s+)?not\s+allowed\b",
    )
    .expect("valid backlog pattern")
});

const YEAR_WORDS: [(&str, u8); 5] = [
    ("first", 1),
    ("second", 2),
    ("third", 3),
    ("fourth", 4),
    ("fifth", 5),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Pass,
    Fail,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityVerdict {
    pub criterion: String,
    pub status: VerdictStatus,
    pub message: String,
}

impl EligibilityVerdict {
    fn new(criterion: &str, status: VerdictStatus, message: impl Into<String>) -> Self {
        Self {
            criterion: criterion.to_string(),
            status,
            message: message.into(),
        }
    }
}

pub fn evaluate(posting: &Posting, student: &StudentProfile) -> Vec<EligibilityVerdict> {
    let req = &posting.requirements;
    let mut verdicts = vec![
        check_cgpa(req, student),
        check_program(req, student),
        check_branch(req, student),
        check_year(req, student),
    ];
    if posting.kind == PostingKind::Job {
        verdicts.push(check_backlogs(req, student));
    }
    verdicts.push(check_availability(student));

    debug!(
        posting_id = posting.id,
        student_id = student.id,
        failed = verdicts.iter().filter(|v| v.status == VerdictStatus::Fail).count(),
        "evaluated eligibility"
    );
    verdicts
}

/// For display only.
pub fn is_eligible(verdicts: &[EligibilityVerdict]) -> bool {
    verdicts.iter().all(|v| v.status != VerdictStatus::Fail)
}

fn check_cgpa(req: &Requirements, student: &StudentProfile) -> EligibilityVerdict {
    const CRITERION: &str = "CGPA";

    let Some(text) = req.cgpa_requirement.as_deref().filter(|t| !t.trim().is_empty()) else {
        return EligibilityVerdict::new(CRITERION, VerdictStatus::Pass, "No minimum CGPA specified");
    };
    let Some(required) = FIRST_NUMBER
        .find(text)
        .and_then(|m| m.as_str().parse::<f64>().ok())
    else {
        return EligibilityVerdict::new(
            CRITERION,
            VerdictStatus::Warning,
            format!("CGPA requirement format unclear: '{}'", text),
        );
    };
    let Some(actual) = student.cgpa else {
        return EligibilityVerdict::new(
            CRITERION,
            VerdictStatus::Warning,
            format!("Requires {:.2}; no CGPA on your profile", required),
        );
    };

    if actual >= required {
        EligibilityVerdict::new(
            CRITERION,
            VerdictStatus::Pass,
            format!("Your CGPA {:.2} meets the requirement of {:.2}", actual, required),
        )
    } else {
        EligibilityVerdict::new(
            CRITERION,
            VerdictStatus::Fail,
            format!("Your CGPA {:.2} is below the requirement of {:.2}", actual, required),
        )
    }
}

/// True when the student's value appears within the listed entry, ignoring case.
fn listed_contains(listed: &str, value: &str) -> bool {
    let listed = listed.trim().to_lowercase();
    let value = value.trim().to_lowercase();
    !listed.is_empty() && !value.is_empty() && listed.contains(&value)
}

fn check_program(req: &Requirements, student: &StudentProfile) -> EligibilityVerdict {
    const CRITERION: &str = "Program";

    if req.required_programs.is_empty() {
        return EligibilityVerdict::new(CRITERION, VerdictStatus::Pass, "Open to all programs");
    }
    let Some(program) = student.program.as_deref().filter(|p| !p.trim().is_empty()) else {
        return EligibilityVerdict::new(
            CRITERION,
            VerdictStatus::Warning,
            "Program information missing from your profile",
        );
    };

    if req.required_programs.iter().any(|p| listed_contains(p, program)) {
        EligibilityVerdict::new(CRITERION, VerdictStatus::Pass, format!("{} is eligible", program))
    } else {
        EligibilityVerdict::new(
            CRITERION,
            VerdictStatus::Fail,
            format!("{} is not among: {}", program, req.required_programs.join(", ")),
        )
    }
}

fn check_branch(req: &Requirements, student: &StudentProfile) -> EligibilityVerdict {
    const CRITERION: &str = "Branch";

    if req.all_branches_applicable {
        return EligibilityVerdict::new(CRITERION, VerdictStatus::Pass, "All branches are eligible");
    }
    let Some(branch) = student.branch.as_deref().filter(|b| !b.trim().is_empty()) else {
        return EligibilityVerdict::new(
            CRITERION,
            VerdictStatus::Warning,
            "Branch information missing from your profile",
        );
    };
    if req.required_branches.values().all(|list| list.is_empty()) {
        return EligibilityVerdict::new(
            CRITERION,
            VerdictStatus::Warning,
            "Posting does not list eligible branches",
        );
    }

    // Prefer the list for the student's degree level; without one, any level counts.
    let level_list = student.degree_level.as_deref().and_then(|level| {
        req.required_branches
            .iter()
            .find(|(key, _)| key.trim().eq_ignore_ascii_case(level.trim()))
            .map(|(_, list)| list)
    });
    let matched = match level_list {
        Some(list) => list.iter().any(|b| listed_contains(b, branch)),
        None if student.degree_level.is_some() => false,
        None => req
            .required_branches
            .values()
            .flatten()
            .any(|b| listed_contains(b, branch)),
    };

    if matched {
        EligibilityVerdict::new(CRITERION, VerdictStatus::Pass, format!("{} is eligible", branch))
    } else {
        EligibilityVerdict::new(
            CRITERION,
            VerdictStatus::Fail,
            format!("{} is not listed for your degree level", branch),
        )
    }
}

/// Every year named in `raw`, so "3rd and 4th year" yields `[3, 4]`.
/// "3rd year", "third year", "year 3" and "3" all map to the same bucket.
pub fn year_buckets(raw: &str) -> Vec<u8> {
    let lower = raw.to_lowercase();
    let mut buckets: Vec<u8> = YEAR_WORDS
        .iter()
        .filter(|(word, _)| lower.contains(word))
        .map(|(_, n)| *n)
        .collect();
    buckets.extend(
        YEAR_DIGIT
            .captures_iter(&lower)
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| m.as_str().parse::<u8>().ok()),
    );
    buckets.sort_unstable();
    buckets.dedup();
    buckets
}

pub fn year_bucket(raw: &str) -> Option<u8> {
    year_buckets(raw).first().copied()
}

fn check_year(req: &Requirements, student: &StudentProfile) -> EligibilityVerdict {
    const CRITERION: &str = "Year";

    if req.eligible_years.is_empty() {
        return EligibilityVerdict::new(CRITERION, VerdictStatus::Pass, "Open to all years");
    }
    let Some(bucket) = student.year.as_deref().and_then(year_bucket) else {
        return EligibilityVerdict::new(
            CRITERION,
            VerdictStatus::Warning,
            "Academic year missing or unrecognised on your profile",
        );
    };
    let eligible: Vec<u8> = req.eligible_years.iter().flat_map(|y| year_buckets(y)).collect();
    if eligible.is_empty() {
        return EligibilityVerdict::new(
            CRITERION,
            VerdictStatus::Warning,
            format!("Eligible years format unclear: {}", req.eligible_years.join(", ")),
        );
    }

    if eligible.contains(&bucket) {
        EligibilityVerdict::new(CRITERION, VerdictStatus::Pass, format!("Year {} is eligible", bucket))
    } else {
        EligibilityVerdict::new(
            CRITERION,
            VerdictStatus::Fail,
            format!("Year {} is not among: {}", bucket, req.eligible_years.join(", ")),
        )
    }
}

fn check_backlogs(req: &Requirements, student: &StudentProfile) -> EligibilityVerdict {
    const CRITERION: &str = "Backlogs";

    let forbids = req
        .other_requirements
        .as_deref()
        .is_some_and(|text| NO_BACKLOG.is_match(text));

    match (forbids, student.active_backlogs) {
        (true, 0) => EligibilityVerdict::new(CRITERION, VerdictStatus::Pass, "No active backlogs"),
        (true, n) => EligibilityVerdict::new(
            CRITERION,
            VerdictStatus::Fail,
            format!("Posting requires no backlogs; you have {} active", n),
        ),
        (false, 0) => EligibilityVerdict::new(CRITERION, VerdictStatus::Pass, "No active backlogs"),
        (false, n) => EligibilityVerdict::new(
            CRITERION,
            VerdictStatus::Warning,
            format!("You have {} active backlog(s); confirm the recruiter's policy", n),
        ),
    }
}

fn check_availability(student: &StudentProfile) -> EligibilityVerdict {
    const CRITERION: &str = "Placement Availability";

    if student.available_for_placement {
        EligibilityVerdict::new(CRITERION, VerdictStatus::Pass, "Available for placement")
    } else {
        EligibilityVerdict::new(
            CRITERION,
            VerdictStatus::Fail,
            "You are marked as not available for placement",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{sample_requirements, sample_student};

    fn posting(kind: PostingKind, requirements: Requirements) -> Posting {
        Posting {
            id: 1,
            kind,
            title: "Backend Engineer".to_string(),
            organization: "Acme Corp".to_string(),
            requirements,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn status_of(verdicts: &[EligibilityVerdict], criterion: &str) -> VerdictStatus {
        verdicts
            .iter()
            .find(|v| v.criterion == criterion)
            .map(|v| v.status)
            .unwrap_or_else(|| panic!("no verdict for {}", criterion))
    }

    #[test]
    fn strong_candidate_passes_everything() {
        let verdicts = evaluate(&posting(PostingKind::Job, sample_requirements()), &sample_student("S1"));
        assert!(verdicts.iter().all(|v| v.status == VerdictStatus::Pass), "{:?}", verdicts);
        assert!(is_eligible(&verdicts));
    }

    #[test]
    fn cgpa_uses_first_number_in_free_text() {
        let mut req = sample_requirements();
        req.cgpa_requirement = Some("Minimum 8.5 CGPA (out of 10)".to_string());
        let verdicts = evaluate(&posting(PostingKind::Job, req), &sample_student("S1"));
        assert_eq!(status_of(&verdicts, "CGPA"), VerdictStatus::Fail);
        assert!(!is_eligible(&verdicts));
    }

    #[test]
    fn cgpa_without_number_is_a_warning() {
        let mut req = sample_requirements();
        req.cgpa_requirement = Some("Good academic record".to_string());
        let verdicts = evaluate(&posting(PostingKind::Job, req), &sample_student("S1"));
        assert_eq!(status_of(&verdicts, "CGPA"), VerdictStatus::Warning);
        assert!(is_eligible(&verdicts));
    }

    #[test]
    fn all_branches_flag_short_circuits() {
        let mut req = sample_requirements();
        req.required_branches.clear();
        req.all_branches_applicable = true;
        let mut student = sample_student("S1");
        student.branch = Some("Civil".to_string());
        let verdicts = evaluate(&posting(PostingKind::Job, req), &student);
        assert_eq!(status_of(&verdicts, "Branch"), VerdictStatus::Pass);
    }

    #[test]
    fn branch_matching_is_case_insensitive_substring() {
        let mut student = sample_student("S1");
        student.branch = Some("computer science".to_string());
        let verdicts = evaluate(&posting(PostingKind::Job, sample_requirements()), &student);
        assert_eq!(status_of(&verdicts, "Branch"), VerdictStatus::Pass);

        student.branch = Some("Mechanical".to_string());
        let verdicts = evaluate(&posting(PostingKind::Job, sample_requirements()), &student);
        assert_eq!(status_of(&verdicts, "Branch"), VerdictStatus::Fail);
    }

    #[test]
    fn branch_for_other_degree_level_does_not_count() {
        let mut student = sample_student("S1");
        student.degree_level = Some("mtech".to_string());
        let verdicts = evaluate(&posting(PostingKind::Job, sample_requirements()), &student);
        assert_eq!(status_of(&verdicts, "Branch"), VerdictStatus::Fail);
    }

    #[test]
    fn missing_branch_is_a_warning() {
        let mut student = sample_student("S1");
        student.branch = None;
        let verdicts = evaluate(&posting(PostingKind::Job, sample_requirements()), &student);
        assert_eq!(status_of(&verdicts, "Branch"), VerdictStatus::Warning);
    }

    #[test]
    fn year_synonyms_share_a_bucket() {
        assert_eq!(year_bucket("3rd year"), Some(3));
        assert_eq!(year_bucket("Third Year"), Some(3));
        assert_eq!(year_bucket("year 3"), Some(3));
        assert_eq!(year_bucket("3"), Some(3));
        assert_eq!(year_bucket("Batch 2025"), None);
        assert_eq!(year_bucket("final"), None);
        assert_eq!(year_buckets("3rd and 4th year"), vec![3, 4]);
        assert_eq!(year_buckets("Third or fourth year"), vec![3, 4]);
    }

    #[test]
    fn combined_year_entry_admits_each_named_year() {
        let mut req = sample_requirements();
        req.eligible_years = vec!["3rd and 4th year".to_string()];
        let mut student = sample_student("S1");
        student.year = Some("4th year".to_string());
        let verdicts = evaluate(&posting(PostingKind::Job, req.clone()), &student);
        assert_eq!(status_of(&verdicts, "Year"), VerdictStatus::Pass);

        student.year = Some("2nd year".to_string());
        let verdicts = evaluate(&posting(PostingKind::Job, req), &student);
        assert_eq!(status_of(&verdicts, "Year"), VerdictStatus::Fail);
    }

    #[test]
    fn short_listed_branch_does_not_match_longer_student_branch() {
        let mut req = sample_requirements();
        req.required_branches.insert("btech".to_string(), vec!["IT".to_string()]);
        let mut student = sample_student("S1");
        student.branch = Some("Architecture".to_string());
        let verdicts = evaluate(&posting(PostingKind::Job, req.clone()), &student);
        assert_eq!(status_of(&verdicts, "Branch"), VerdictStatus::Fail);

        student.branch = Some("it".to_string());
        let verdicts = evaluate(&posting(PostingKind::Job, req), &student);
        assert_eq!(status_of(&verdicts, "Branch"), VerdictStatus::Pass);
    }

    #[test]
    fn short_listed_program_does_not_match_longer_student_program() {
        let mut req = sample_requirements();
        req.required_programs = vec!["MA".to_string()];
        let mut student = sample_student("S1");
        student.program = Some("Mathematics and Computing".to_string());
        let verdicts = evaluate(&posting(PostingKind::Job, req), &student);
        assert_eq!(status_of(&verdicts, "Program"), VerdictStatus::Fail);
    }

    #[test]
    fn year_outside_list_fails_and_empty_list_passes() {
        let mut student = sample_student("S1");
        student.year = Some("second year".to_string());
        let verdicts = evaluate(&posting(PostingKind::Job, sample_requirements()), &student);
        assert_eq!(status_of(&verdicts, "Year"), VerdictStatus::Fail);

        let mut req = sample_requirements();
        req.eligible_years.clear();
        let verdicts = evaluate(&posting(PostingKind::Job, req), &student);
        assert_eq!(status_of(&verdicts, "Year"), VerdictStatus::Pass);
    }

    #[test]
    fn backlog_rule_needs_phrase_and_active_backlog() {
        let mut student = sample_student("S1");
        student.active_backlogs = 2;
        let verdicts = evaluate(&posting(PostingKind::Job, sample_requirements()), &student);
        assert_eq!(status_of(&verdicts, "Backlogs"), VerdictStatus::Fail);

        let mut req = sample_requirements();
        req.other_requirements = Some("Strong communication skills".to_string());
        let verdicts = evaluate(&posting(PostingKind::Job, req), &student);
        assert_eq!(status_of(&verdicts, "Backlogs"), VerdictStatus::Warning);
    }

    #[test]
    fn internships_skip_backlog_check() {
        let mut student = sample_student("S1");
        student.active_backlogs = 3;
        let verdicts = evaluate(&posting(PostingKind::Internship, sample_requirements()), &student);
        assert!(verdicts.iter().all(|v| v.criterion != "Backlogs"));
    }

    #[test]
    fn unavailable_student_fails_availability() {
        let mut student = sample_student("S1");
        student.available_for_placement = false;
        let verdicts = evaluate(&posting(PostingKind::Job, sample_requirements()), &student);
        assert_eq!(status_of(&verdicts, "Placement Availability"), VerdictStatus::Fail);
    }

    #[test]
    fn backlog_phrases() {
        for text in ["No backlogs", "zero active backlogs", "without any arrears", "Backlogs are not allowed"] {
            assert!(NO_BACKLOG.is_match(text), "{}", text);
        }
        assert!(!NO_BACKLOG.is_match("Backlogs cleared before joining are fine"));
    }
}
