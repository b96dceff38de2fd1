mod config;
mod coordinator;
mod db;
mod eligibility;
mod error;
mod ledger;
mod mirror;
mod models;
mod reconcile;
mod submission;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use coordinator::{update_application_status, StatusUpdate};
use db::Database;
use eligibility::{EligibilityVerdict, VerdictStatus};
use ledger::RequestMeta;
use models::{Actor, PostingKind, Requirements, Role, StudentProfile};
use std::collections::BTreeMap;
use std::path::PathBuf;
use submission::{check_eligibility, submit_application, SubmitRequest};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "placement")]
#[command(about = "Placement portal application tracker - apply, review, and track status")]
struct Cli {
    /// Database file (overrides PLACEMENT_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage student profiles
    Student {
        #[command(subcommand)]
        command: StudentCommands,
    },

    /// Manage postings
    Posting {
        #[command(subcommand)]
        command: PostingCommands,
    },

    /// Preview eligibility for a posting without applying
    Eligibility {
        /// Posting type (job, internship)
        kind: PostingKind,
        posting_id: i64,
        #[arg(short, long)]
        student: i64,
    },

    /// Submit an application
    Apply {
        /// Posting type (job, internship)
        kind: PostingKind,
        posting_id: i64,

        #[arg(short, long)]
        student: i64,

        #[arg(short, long)]
        cover_letter: String,

        #[arg(short, long)]
        additional_info: Option<String>,

        /// Student has seen the eligibility report
        #[arg(long)]
        acknowledge: bool,

        /// Request header as "Name: value" (x-forwarded-for, x-real-ip, user-agent)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },

    /// Change an application's status
    Status {
        /// Posting type (job, internship)
        kind: PostingKind,
        posting_id: i64,
        application_id: i64,

        /// Applied, Reviewed, "Interview Scheduled", Selected, Rejected
        status: String,

        #[arg(long)]
        actor: String,

        /// spc or admin
        #[arg(long, default_value = "admin")]
        role: Role,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// List applications received by a posting
    Applications {
        /// Posting type (job, internship)
        kind: PostingKind,
        posting_id: i64,

        #[arg(long)]
        actor: String,

        #[arg(long, default_value = "admin")]
        role: Role,
    },

    /// Show a student's own applications and status history
    History {
        student_id: i64,

        /// Filter by posting type (job, internship)
        #[arg(short, long)]
        kind: Option<PostingKind>,
    },

    /// Rebuild student records that lag the posting ledger
    Reconcile {
        #[arg(long)]
        actor: String,

        /// Show what would change without writing
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum StudentCommands {
    /// Add a student profile
    Add {
        #[arg(long)]
        number: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Degree level key, e.g. btech, mtech
        #[arg(long)]
        degree: Option<String>,
        #[arg(long)]
        program: Option<String>,
        #[arg(long)]
        branch: Option<String>,
        /// e.g. "3rd year"
        #[arg(long)]
        year: Option<String>,
        #[arg(long)]
        cgpa: Option<f64>,
        #[arg(long, default_value = "0")]
        backlogs: u32,
        /// Mark as not available for placement
        #[arg(long)]
        unavailable: bool,
    },

    /// Show a student profile
    Show { id: i64 },
}

#[derive(Subcommand)]
enum PostingCommands {
    /// Add a job or internship posting
    Add {
        /// Posting type (job, internship)
        kind: PostingKind,
        #[arg(long)]
        title: String,
        #[arg(long)]
        organization: String,
        /// Free text, e.g. "7.5 CGPA and above"
        #[arg(long)]
        cgpa: Option<String>,
        #[arg(long, value_delimiter = ',')]
        programs: Vec<String>,
        /// LEVEL=BRANCH,BRANCH (repeatable), e.g. btech=CSE,ECE
        #[arg(long = "branches")]
        branches: Vec<String>,
        #[arg(long)]
        all_branches: bool,
        #[arg(long, value_delimiter = ',')]
        years: Vec<String>,
        /// Other requirements, e.g. "No active backlogs"
        #[arg(long)]
        other: Option<String>,
    },

    /// Show a posting
    Show {
        kind: PostingKind,
        id: i64,
    },
}

fn parse_branches(flags: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for flag in flags {
        let (level, list) = flag
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected LEVEL=BRANCH,BRANCH but got '{}'", flag))?;
        map.entry(level.trim().to_lowercase()).or_default().extend(
            list.split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_string),
        );
    }
    Ok(map)
}

fn parse_headers(raw: &[String]) -> Result<RequestMeta> {
    let mut pairs = Vec::with_capacity(raw.len());
    for header in raw {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| anyhow!("Expected 'Name: value' header but got '{}'", header))?;
        pairs.push((name.trim(), value.trim()));
    }
    Ok(RequestMeta::from_headers(pairs))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_verdicts(verdicts: &[EligibilityVerdict]) {
    println!("{:<24} {:<8} {}", "CRITERION", "RESULT", "DETAIL");
    println!("{}", "-".repeat(72));
    for v in verdicts {
        let status = match v.status {
            VerdictStatus::Pass => "pass",
            VerdictStatus::Fail => "FAIL",
            VerdictStatus::Warning => "warn",
        };
        println!("{:<24} {:<8} {}", v.criterion, status, v.message);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PLACEMENT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;

    let db_path = cli.db.clone().unwrap_or_else(|| config.db_path.clone());
    let db = Database::open(&db_path, config.busy_timeout)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

    if !matches!(cli.command, Commands::Init) {
        db.ensure_initialized()?;
    }

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db_path.display());
        }

        Commands::Student { command } => match command {
            StudentCommands::Add {
                number,
                name,
                email,
                degree,
                program,
                branch,
                year,
                cgpa,
                backlogs,
                unavailable,
            } => {
                let id = db.add_student(&StudentProfile {
                    id: 0,
                    student_number: number,
                    name,
                    email,
                    degree_level: degree,
                    program,
                    branch,
                    year,
                    cgpa,
                    active_backlogs: backlogs,
                    available_for_placement: !unavailable,
                })?;
                println!("Added student #{}", id);
            }

            StudentCommands::Show { id } => {
                let student = db
                    .get_student_profile(id)?
                    .ok_or_else(|| anyhow!("Student #{} not found", id))?;
                print_json(&student)?;
            }
        },

        Commands::Posting { command } => match command {
            PostingCommands::Add {
                kind,
                title,
                organization,
                cgpa,
                programs,
                branches,
                all_branches,
                years,
                other,
            } => {
                let requirements = Requirements {
                    cgpa_requirement: cgpa,
                    required_programs: programs,
                    required_branches: parse_branches(&branches)?,
                    all_branches_applicable: all_branches,
                    eligible_years: years,
                    other_requirements: other,
                };
                let id = db.add_posting(kind, &title, &organization, &requirements)?;
                println!("Added {} #{}", kind, id);
            }

            PostingCommands::Show { kind, id } => {
                let posting = db
                    .get_posting(kind, id)?
                    .ok_or_else(|| anyhow!("{} #{} not found", kind, id))?;
                print_json(&posting)?;
            }
        },

        Commands::Eligibility {
            kind,
            posting_id,
            student,
        } => {
            let verdicts = check_eligibility(&db, kind, posting_id, student)?;
            if cli.json {
                print_json(&verdicts)?;
            } else {
                print_verdicts(&verdicts);
                if eligibility::is_eligible(&verdicts) {
                    println!("\nYou meet the stated requirements.");
                } else {
                    println!("\nSome requirements are not met. You can still apply.");
                }
            }
        }

        Commands::Apply {
            kind,
            posting_id,
            student,
            cover_letter,
            additional_info,
            acknowledge,
            headers,
        } => {
            let meta = parse_headers(&headers)?;
            let identity = db
                .get_student_profile(student)?
                .map(|s| s.email)
                .unwrap_or_else(|| format!("student#{}", student));
            let actor = Actor::student(&identity, student);

            let receipt = submit_application(
                &db,
                &actor,
                &SubmitRequest {
                    kind,
                    posting_id,
                    student_id: student,
                    cover_letter,
                    additional_info,
                    eligibility_acknowledged: acknowledge,
                },
                &meta,
            )?;

            if cli.json {
                print_json(&receipt)?;
            } else {
                println!(
                    "Application #{} submitted to {} at {}",
                    receipt.application_id, receipt.posting_title, receipt.organization_name
                );
                println!("Submitted: {}", receipt.submitted_at);
                if !receipt.is_eligible {
                    println!("\nNote: some eligibility criteria are not met.\n");
                    print_verdicts(&receipt.eligibility);
                }
            }
        }

        Commands::Status {
            kind,
            posting_id,
            application_id,
            status,
            actor,
            role,
            notes,
        } => {
            let actor = Actor::staff(&actor, role);
            let application = update_application_status(
                &db,
                &actor,
                &StatusUpdate {
                    kind,
                    posting_id,
                    application_id,
                    new_status: status,
                    notes,
                },
            )?;
            if cli.json {
                print_json(&application)?;
            } else {
                println!("Application #{} is now {}", application.id, application.status);
            }
        }

        Commands::Applications {
            kind,
            posting_id,
            actor,
            role,
        } => {
            let applications = db
                .ledger()
                .list_applications(&Actor::staff(&actor, role), kind, posting_id)?;
            if cli.json {
                print_json(&applications)?;
            } else if applications.is_empty() {
                println!("No applications yet.");
            } else {
                println!(
                    "{:<6} {:<12} {:<22} {:<28} {:<20} {:<20}",
                    "ID", "NUMBER", "NAME", "EMAIL", "STATUS", "SUBMITTED"
                );
                println!("{}", "-".repeat(112));
                for entry in applications {
                    println!(
                        "{:<6} {:<12} {:<22} {:<28} {:<20} {:<20}",
                        entry.application.id,
                        truncate(&entry.student.student_number, 10),
                        truncate(&entry.student.name, 20),
                        truncate(&entry.student.email, 26),
                        entry.application.status,
                        truncate(&entry.application.submitted_at, 19)
                    );
                }
            }
        }

        Commands::History { student_id, kind } => {
            let records = db.mirror().list_records(student_id, kind)?;
            if cli.json {
                print_json(&records)?;
            } else if records.is_empty() {
                println!("No applications found.");
            } else {
                for record in records {
                    println!(
                        "{} #{} - {} at {} [{}]",
                        record.kind,
                        record.posting_id,
                        record.position,
                        record.company_name,
                        record.current_status
                    );
                    for entry in &record.status_history {
                        println!(
                            "    {:<20} {:<20} {:<24} {}",
                            truncate(&entry.updated_date, 19),
                            entry.status,
                            truncate(&entry.updated_by, 22),
                            entry.notes.as_deref().unwrap_or("")
                        );
                    }
                }
            }
        }

        Commands::Reconcile { actor, dry_run } => {
            let actor = Actor::staff(&actor, Role::Admin);
            let stats = reconcile::reconcile(&db, &actor, dry_run)?;
            if cli.json {
                print_json(&stats)?;
            } else {
                println!("Results:");
                println!("  Applications scanned: {}", stats.scanned);
                println!("  Records created:      {}", stats.created);
                println!("  Records resynced:     {}", stats.resynced);
                if stats.errors > 0 {
                    println!("  Errors:               {}", stats.errors);
                }
                if dry_run {
                    println!("\n(Dry run - nothing was written)");
                }
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
