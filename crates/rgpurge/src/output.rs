//! Human-facing summaries on stdout

use colored::Colorize;
use rgpurge_cloud::ResourceId;
use rgpurge_core::{ActionRecord, BlockerRecord, Inventory, TeardownOutcome, TeardownReport};

fn print_records(title: &str, records: &[ActionRecord], marker: colored::ColoredString) {
    if records.is_empty() {
        return;
    }
    println!();
    println!("{}", format!("{} ({}):", title, records.len()).bold());
    for record in records {
        println!(
            "  {} [{}] {} {}",
            marker,
            record.phase,
            short_name(&record.target).cyan(),
            format!("{}: {}", record.kind, record.message).dimmed()
        );
    }
}

/// Last two segments of a resource id, enough to tell resources apart
fn short_name(target: &str) -> String {
    let parts: Vec<&str> = target.rsplit('/').take(2).collect();
    match parts.as_slice() {
        [name, kind, ..] if !kind.is_empty() => format!("{}/{}", kind, name),
        _ => target.to_string(),
    }
}

pub fn print_report(report: &TeardownReport) {
    print_records("Removed", &report.removed, "✓".green());
    print_records("Skipped", &report.skipped, "-".dimmed());
    print_records("Failed", &report.failed, "✗".red());

    if !report.deferred_subnets.is_empty() {
        println!();
        println!("{}", "Subnets left in place:".yellow().bold());
        for subnet in &report.deferred_subnets {
            println!("  • {}", subnet.name().yellow());
        }
    }

    if !report.remaining.is_empty() {
        println!();
        println!(
            "{}",
            format!("Still present ({}):", report.remaining.len()).yellow().bold()
        );
        for id in &report.remaining {
            println!("  • {}", short_name(id.as_str()));
        }
    }

    println!();
    let retries = report.retries();
    if retries > 0 {
        println!("{} {}", "Retries:".dimmed(), retries);
    }
    if let Some(duration) = report.duration() {
        println!("{} {}s", "Elapsed:".dimmed(), duration.num_seconds());
    }
}

pub fn print_outcome(outcome: TeardownOutcome) {
    let label = outcome.to_string();
    let line = match outcome {
        TeardownOutcome::Deleted | TeardownOutcome::DeleteIssued => label.green().bold(),
        TeardownOutcome::Declined | TeardownOutcome::Cancelled => label.yellow().bold(),
        _ => label.red().bold(),
    };
    println!("{} {}", "Outcome:".bold(), line);

    match outcome {
        TeardownOutcome::DeleteIssued => println!(
            "  {}",
            "Deletion continues in the background; use --wait to follow it".dimmed()
        ),
        TeardownOutcome::RolledBackDetected => println!(
            "  {}",
            "The platform reverted the delete. Run again once the remaining blockers are cleared"
                .dimmed()
        ),
        _ => {}
    }
}

fn print_blockers(owner: &ResourceId, records: &[BlockerRecord]) {
    let status = if records.is_empty() {
        "clear".green()
    } else {
        format!("{} blocker(s)", records.len()).yellow()
    };
    println!("  {} {}", owner.name().cyan(), status);
    for record in records {
        println!(
            "    {} {}",
            record.kind.to_string().dimmed(),
            short_name(record.owner.as_str())
        );
    }
}

pub fn print_inventory(inventory: &Inventory) {
    let sections: [(&str, &[ResourceId]); 2] = [
        ("Locks", &inventory.locks),
        ("Heavy compute", &inventory.heavy_compute),
    ];
    for (title, ids) in sections {
        if ids.is_empty() {
            continue;
        }
        println!();
        println!("{}", format!("{} ({}):", title, ids.len()).bold());
        for id in ids {
            println!("  • {}", short_name(id.as_str()));
        }
    }

    let groups: [(&str, &[(ResourceId, Vec<BlockerRecord>)]); 3] = [
        ("Security groups", &inventory.security_groups),
        ("Subnets", &inventory.subnets),
        ("Virtual networks", &inventory.networks),
    ];
    for (title, entries) in groups {
        if entries.is_empty() {
            continue;
        }
        println!();
        println!("{}", format!("{}:", title).bold());
        for (owner, records) in entries {
            print_blockers(owner, records);
        }
    }

    println!();
    println!(
        "{} {}",
        "Blockers found:".bold(),
        inventory.blocker_count()
    );
}
