use anyhow::Result;
use ansi_term::Colour;
use chrono::{Local, NaiveDate};
use clap::Args;

use crate::{
    storage::{
        activity_store::ActivityStore,
        entities::{CheckCategory, CheckResult, DailyRollup},
    },
    utils::percentage::Percentage,
};

const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Args)]
pub struct SummaryCommand {
    #[arg(long, help = "Day to summarize as YYYY-MM-DD. Defaults to today")]
    date: Option<NaiveDate>,
    #[arg(long, help = "Rebuild the rollup from the check log before printing")]
    recompute: bool,
    #[arg(long, help = "Print JSON instead of text")]
    json: bool,
}

#[derive(Debug, Args)]
pub struct HistoryCommand {
    #[arg(short, long, default_value_t = DEFAULT_HISTORY_LIMIT)]
    limit: usize,
    #[arg(long, help = "Print JSON instead of text")]
    json: bool,
}

pub async fn process_summary_command(
    SummaryCommand {
        date,
        recompute,
        json,
    }: SummaryCommand,
    store: &dyn ActivityStore,
) -> Result<()> {
    let summary = match (date, recompute) {
        (Some(date), true) => store.recompute_rollup(date).await?,
        (None, true) => store.recompute_today_rollup().await?,
        (Some(date), false) => store.get_summary_for(date).await?,
        (None, false) => store.get_today_summary().await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", format_summary(&summary));
    }
    Ok(())
}

pub async fn process_history_command(
    HistoryCommand { limit, json }: HistoryCommand,
    store: &dyn ActivityStore,
) -> Result<()> {
    let records = store.get_recent_checks(limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No checks yet");
    }
    for record in &records {
        print_check(&record.check, record.task_description.as_deref());
    }
    Ok(())
}

pub fn print_check(check: &CheckResult, task_description: Option<&str>) {
    println!("{}", format_check(check, task_description));
}

fn category_label(category: CheckCategory) -> String {
    match category {
        CheckCategory::OnTask => Colour::Green.paint("on task").to_string(),
        CheckCategory::OffTask => Colour::Red.paint("off task").to_string(),
        CheckCategory::Idle => Colour::Yellow.paint("idle").to_string(),
    }
}

fn format_check(check: &CheckResult, task_description: Option<&str>) -> String {
    format!(
        "{}\t{}\t{:.2}\t{}\t{}",
        check.timestamp.with_timezone(&Local).format("%x %H:%M:%S"),
        category_label(check.category()),
        check.confidence,
        task_description.unwrap_or("-"),
        check.rationale
    )
}

fn format_summary(summary: &DailyRollup) -> String {
    let share = |count| Percentage::of(count, summary.total_checks);
    format!(
        "{}\n\
         checks\t{}\n\
         on task\t{}\t{}\n\
         off task\t{}\t{}\n\
         idle\t{}\t{}\n",
        summary.date,
        summary.total_checks,
        summary.on_task_count,
        share(summary.on_task_count),
        summary.off_task_count,
        share(summary.off_task_count),
        summary.idle_count,
        share(summary.idle_count),
    )
}
