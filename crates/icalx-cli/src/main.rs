use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use icalx_core::{
    Calendar, CalendarDate, Component, CoreError, EventFailure, EventPolicy, PartialCalendar,
    TransformError, TransformOptions, canonical_json,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "ICALX_LOG";

#[derive(Parser, Debug)]
#[command(version, about = "RFC5545 calendar parser + validator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the generic component tree of a calendar.
    Parse(ParseArgs),
    /// Validate a calendar and print its events and metadata.
    Transform(TransformArgs),
    /// Validate a calendar and print a short summary.
    Check(TransformArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Args, Debug)]
struct InputArgs {
    /// iCalendar file to read, or `-` for stdin
    #[arg(long, value_name = "PATH|-")]
    ics: PathBuf,

    #[arg(long, default_value = "json")]
    format: OutputFormat,
}

#[derive(Args, Debug)]
struct ParseArgs {
    #[command(flatten)]
    input: InputArgs,
}

#[derive(Args, Debug)]
struct TransformArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Abort on the first invalid event instead of collecting failures
    #[arg(long)]
    fail_fast: bool,
}

impl TransformArgs {
    fn policy(&self) -> EventPolicy {
        if self.fail_fast {
            EventPolicy::FailFast
        } else {
            EventPolicy::CollectAll
        }
    }
}

#[derive(Debug, Serialize)]
struct CheckSummary {
    timezone: String,
    events: usize,
    rejected: usize,
    defined_timezones: usize,
}

impl CheckSummary {
    fn new(calendar: &Calendar, rejected: usize) -> Self {
        Self {
            timezone: calendar.metadata.timezone.clone(),
            events: calendar.events.len(),
            rejected,
            defined_timezones: calendar.metadata.defined_timezones.len(),
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Parse(args) => run_parse(args),
        Commands::Transform(args) => run_transform(args),
        Commands::Check(args) => run_check(args),
    }
}

fn run_parse(args: ParseArgs) -> Result<()> {
    let raw = read_input(&args.input)?;
    let root = icalx_core::parse(&raw).map_err(CoreError::from)?;

    match args.input.format {
        OutputFormat::Json => print_json(&root)?,
        OutputFormat::Text => print_component_text(&root, "VCALENDAR", 0),
    }

    Ok(())
}

fn run_transform(args: TransformArgs) -> Result<()> {
    let raw = read_input(&args.input)?;
    let options = TransformOptions::default().with_policy(args.policy());

    match icalx_core::parse_calendar(&raw, &options) {
        Ok(calendar) => print_calendar(&calendar, args.input.format),
        Err(CoreError::Transform(TransformError::PartialEvents(partial))) => {
            print_calendar(&partial.calendar, args.input.format)?;
            Err(CoreError::Transform(TransformError::PartialEvents(partial)).into())
        }
        Err(err) => Err(err.into()),
    }
}

fn run_check(args: TransformArgs) -> Result<()> {
    let raw = read_input(&args.input)?;
    let options = TransformOptions::default().with_policy(args.policy());

    match icalx_core::parse_calendar(&raw, &options) {
        Ok(calendar) => print_summary(&CheckSummary::new(&calendar, 0), args.input.format),
        Err(CoreError::Transform(TransformError::PartialEvents(partial))) => {
            let summary = CheckSummary::new(&partial.calendar, partial.failures.len());
            print_summary(&summary, args.input.format)?;
            Err(CoreError::Transform(TransformError::PartialEvents(partial)).into())
        }
        Err(err) => Err(err.into()),
    }
}

fn read_input(input: &InputArgs) -> Result<String> {
    let raw = if input.ics.as_os_str() == "-" {
        let mut raw = String::new();
        io::stdin()
            .read_to_string(&mut raw)
            .context("failed to read calendar from stdin")?;
        raw
    } else {
        fs::read_to_string(&input.ics)
            .with_context(|| format!("failed to read ICS file {}", input.ics.display()))?
    };
    tracing::debug!(source = %input.ics.display(), bytes = raw.len(), "Read calendar input");
    Ok(raw)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let raw = serde_json::to_value(value)?;
    let canonical = canonical_json(&raw);
    println!("{}", serde_json::to_string_pretty(&canonical)?);
    Ok(())
}

fn print_calendar(calendar: &Calendar, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(calendar)?,
        OutputFormat::Text => print_calendar_text(calendar),
    }
    Ok(())
}

fn print_summary(summary: &CheckSummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(summary)?,
        OutputFormat::Text => println!(
            "{} events ({} rejected), timezone {}, {} VTIMEZONE definitions",
            summary.events, summary.rejected, summary.timezone, summary.defined_timezones
        ),
    }
    Ok(())
}

fn print_component_text(component: &Component, name: &str, depth: usize) {
    let indent = "  ".repeat(depth);
    println!("{indent}{name}");
    for (key, occurrences) in &component.properties {
        for occurrence in occurrences {
            let parameters: String = occurrence
                .parameters
                .iter()
                .map(|(param, value)| format!(";{param}={value}"))
                .collect();
            println!("{indent}  {key}{parameters}: {}", occurrence.value.escape_debug());
        }
    }
    for (child_name, children) in &component.components {
        for child in children {
            print_component_text(child, child_name, depth + 1);
        }
    }
}

fn print_calendar_text(calendar: &Calendar) {
    println!("timezone: {}", calendar.metadata.timezone);
    for definition in &calendar.metadata.defined_timezones {
        println!(
            "vtimezone: {} ({} standard, {} daylight)",
            definition.tzid,
            definition.standard.len(),
            definition.daylight.len()
        );
    }
    for event in &calendar.events {
        println!(
            "{} .. {} {} \"{}\"",
            format_date(&event.start),
            format_date(&event.end),
            event.uid,
            event.title
        );
        if let Some(rule) = &event.recurrence.rrule {
            println!("  rrule: {}", rule.as_str());
        }
        for excluded in &event.recurrence.exdate {
            println!("  exdate: {}", format_date(excluded));
        }
    }
}

fn format_date(date: &CalendarDate) -> String {
    let mut out = if date.is_all_day {
        format!("{} (all day)", date.date.format("%Y-%m-%dT%H:%MZ"))
    } else {
        date.date.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    };
    if let Some(timezone) = &date.timezone {
        out.push_str(&format!(" [{timezone}]"));
    }
    out
}

fn partial_calendar(err: &anyhow::Error) -> Option<&PartialCalendar> {
    match err.downcast_ref::<CoreError>() {
        Some(CoreError::Transform(TransformError::PartialEvents(partial))) => Some(partial),
        _ => None,
    }
}

fn exit_code_for_error(err: &anyhow::Error) -> u8 {
    if partial_calendar(err).is_some() { 3 } else { 2 }
}

fn report_failure(failure: &EventFailure) {
    match &failure.uid {
        Some(uid) => eprintln!("  [{}] {uid}: {}", failure.index, failure.error),
        None => eprintln!("  [{}] {}", failure.index, failure.error),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_tracing();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match partial_calendar(&err) {
                Some(partial) => {
                    eprintln!(
                        "Error: rejected {} of {} events",
                        partial.failures.len(),
                        partial.failures.len() + partial.events().len()
                    );
                    partial.failures.iter().for_each(report_failure);
                }
                None => eprintln!("Error: {err:#}"),
            }
            ExitCode::from(exit_code_for_error(&err))
        }
    }
}
