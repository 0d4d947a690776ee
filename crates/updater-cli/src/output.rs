use updater_domain::{Backup, HistoryEvent, UpgradeJob};
use updater_orchestrator::PlanOutcome;

/// Render the latest job as human-readable text.
pub fn print_job(job: &UpgradeJob) {
    println!("job        {}", job.job_id);
    println!("state      {}", job.state);
    println!("mode       {}", job.mode);
    println!("requested  {}", job.requested_target);
    if !job.resolved_target.is_empty() {
        println!("resolved   {}", job.resolved_target);
    }
    if let Some(code) = job.failure_code {
        println!("failure    {}", code);
    }
    if !job.message.is_empty() {
        println!("message    {}", job.message);
    }
    if !job.backup_path.is_empty() {
        println!("backup     {}", job.backup_path);
    }
    if let Some(sha) = &job.backup_sha256 {
        println!("sha256     {}", sha);
    }
    println!("created    {}", job.created_at.to_rfc3339());
    println!("updated    {}", job.updated_at.to_rfc3339());
}

pub fn print_plan(outcome: &PlanOutcome) {
    println!("state      {}", outcome.state);
    println!("mode       {}", outcome.mode);
    println!("requested  {}", outcome.requested_target);
    if !outcome.resolved_target.is_empty() {
        println!("resolved   {}", outcome.resolved_target);
    }
    if !outcome.image_repo.is_empty() {
        println!("image      {}", outcome.image_repo);
    }
    if !outcome.container_name.is_empty() {
        println!("container  {}", outcome.container_name);
    }
    if let Some(current) = &outcome.current_version {
        println!("current    {}", current);
    }
    if let Some(code) = outcome.failure_code {
        println!("failure    {}", code);
    }
    if !outcome.message.is_empty() {
        println!("message    {}", outcome.message);
    }
}

pub fn print_backups(backups: &[Backup]) {
    if backups.is_empty() {
        println!("No backups.");
        return;
    }
    for backup in backups {
        println!(
            "{}  {:>12}  {} -> {}  {}",
            backup.created_at.format("%Y-%m-%d %H:%M:%S"),
            backup.size_bytes,
            backup.from_version,
            backup.to_version,
            backup.file_name,
        );
    }
}

pub fn print_events(events: &[HistoryEvent]) {
    if events.is_empty() {
        println!("No events.");
        return;
    }
    for event in events {
        println!(
            "{}  {:<8} {:<10} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", event.event_type).to_lowercase(),
            format!("{:?}", event.status).to_lowercase(),
            event.message,
        );
    }
}
