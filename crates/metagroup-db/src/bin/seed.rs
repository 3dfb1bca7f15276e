//! # Seed Data Generator
//!
//! Populates the database with a small demo site for trying the engine.
//!
//! ## Usage
//! ```bash
//! # 20 users per source group (default)
//! cargo run -p metagroup-db --bin seed
//!
//! # Custom amount
//! cargo run -p metagroup-db --bin seed -- --users 200
//!
//! # Specify database path
//! cargo run -p metagroup-db --bin seed -- --db ./data/metagroup.db
//! ```
//!
//! ## Generated Site
//! ```text
//! BIO101 ── group "Lab A" ──┐
//!                           ├──► SCI200 (target course, no links yet)
//! CHEM101 ─ group "Lab B" ──┘
//! ```
//! Every user gets a manual enrolment in their source course, membership of
//! the source group and the student role. Every fifth enrolment is
//! suspended, every seventh has an end date.
//!
//! Create links afterwards with `metagroup links create`.

use std::env;

use metagroup_core::{EnrolStatus, InstanceStatus, MANUAL_COMPONENT};
use metagroup_db::{Database, DbConfig};
use tracing_subscriber::EnvFilter;

/// Student role id on the demo site.
const STUDENT_ROLE: i64 = 5;

/// Source courses: (shortname, fullname, group name, first user id).
const SOURCES: &[(&str, &str, &str, i64)] = &[
    ("BIO101", "Biology 101", "Lab A", 1000),
    ("CHEM101", "Chemistry 101", "Lab B", 2000),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args: Vec<String> = env::args().collect();

    let mut users: i64 = 20;
    let mut db_path = String::from("./metagroup_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--users" | "-u" => {
                if i + 1 < args.len() {
                    users = args[i + 1].parse().unwrap_or(20);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Metagroup Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -u, --users <N>    Users per source group (default: 20)");
                println!("  -d, --db <PATH>    Database file path (default: ./metagroup_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Metagroup Seed Data Generator");
    println!("=============================");
    println!("Database: {}", db_path);
    println!("Users per group: {}", users);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.courses().list().await?;
    if !existing.is_empty() {
        println!("⚠ Database already has {} courses", existing.len());
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let start = std::time::Instant::now();
    let mut enrolled = 0;

    for (shortname, fullname, group_name, first_user) in SOURCES {
        let course = db.courses().insert(shortname, fullname).await?;
        let group = db.groups().create(course, group_name).await?;
        let manual = db
            .enrolments()
            .add_instance(course, "manual", InstanceStatus::Enabled, None)
            .await?;

        for n in 0..users {
            let user = first_user + n;
            let status = if n % 5 == 4 {
                EnrolStatus::Suspended
            } else {
                EnrolStatus::Active
            };
            let time_end = if n % 7 == 6 { 2_000_000_000 } else { 0 };

            if let Err(e) = db
                .enrolments()
                .enrol(manual, user, Some(STUDENT_ROLE), 0, time_end, status)
                .await
            {
                eprintln!("Failed to enrol user {} in {}: {}", user, shortname, e);
                continue;
            }
            db.groups().add_member(group, user, MANUAL_COMPONENT, 0).await?;
            enrolled += 1;
        }

        println!("  {} (course {}), group \"{}\" (id {})", shortname, course, group_name, group);
    }

    let target = db.courses().insert("SCI200", "Science 200").await?;
    db.enrolments()
        .add_instance(target, "manual", InstanceStatus::Enabled, None)
        .await?;
    println!("  SCI200 (course {}), target course", target);

    println!();
    println!("✓ Enrolled {} users in {:?}", enrolled, start.elapsed());
    println!("✓ Seed complete!");

    Ok(())
}
