use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use skiptrack::calendar::now_epoch_ms;
use skiptrack::config;
use skiptrack::model::PlaybackEvent;
use skiptrack::patterns;
use skiptrack::pipeline::Engine;
use skiptrack::queries;
use skiptrack::store::{self, StoreFile};
use std::io::Read;
use std::path::PathBuf;

const DEFAULT_LIMIT: usize = 10;

#[derive(Debug)]
enum Command {
    Record(Option<PathBuf>),
    Summary,
    Sessions(usize),
    Skipped(usize),
    Artists(usize),
    Patterns,
    Candidates,
    Export(PathBuf),
    Clear,
}

fn main() -> anyhow::Result<()> {
    let command = parse_args(std::env::args().skip(1).collect())?;
    let settings = config::load_settings()?;
    config::init_logging(&settings);
    let calendar = settings.calendar();

    match command {
        Command::Record(source) => {
            let mut engine = Engine::open_default(&settings)?;
            let events = read_events(source)?;
            let total = events.len();
            let failed = events.iter().filter(|event| !engine.record(event)).count();
            if failed > 0 {
                anyhow::bail!("{failed} of {total} events could not be recorded");
            }
            println!("recorded {total} events");
        }
        Command::Summary => {
            let stats = StoreFile::default_location()?.load()?;
            print_json(&queries::summary(&stats, &calendar, now_epoch_ms())?)?;
        }
        Command::Sessions(limit) => {
            let stats = StoreFile::default_location()?.load()?;
            print_json(&queries::recent_sessions(&stats, limit))?;
        }
        Command::Skipped(limit) => {
            let stats = StoreFile::default_location()?.load()?;
            print_json(&queries::recent_skipped_tracks(&stats, limit))?;
        }
        Command::Artists(limit) => {
            let stats = StoreFile::default_location()?.load()?;
            print_json(&queries::top_skipped_artists(&stats, limit))?;
        }
        Command::Patterns => {
            let history = patterns::load_skip_history(&config::skipped_tracks_path()?)?;
            print_json(&serde_json::json!({
                "manual_vs_automatic": patterns::manual_vs_automatic(&history),
                "contexts": patterns::context_skips(&history),
                "temporal": patterns::temporal_distribution(&history, &calendar),
            }))?;
        }
        Command::Candidates => {
            let history = patterns::load_skip_history(&config::skipped_tracks_path()?)?;
            print_json(&patterns::threshold_candidates(
                &history,
                &calendar,
                settings.skip_threshold,
                settings.skip_threshold_days,
                now_epoch_ms(),
            ))?;
        }
        Command::Export(path) => {
            let stats = StoreFile::default_location()?.load()?;
            store::export_to(&stats, &path)?;
            println!("exported stats to {}", path.display());
        }
        Command::Clear => {
            let mut engine = Engine::open_default(&settings)?;
            engine.clear()?;
            println!("stats cleared");
        }
    }
    Ok(())
}

/// Accepts one event object or an array of them; `-` or no path reads stdin.
fn read_events(source: Option<PathBuf>) -> anyhow::Result<Vec<PlaybackEvent>> {
    let raw = match source {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        _ => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read events from stdin")?;
            raw
        }
    };

    let value: Value = serde_json::from_str(&raw).context("events are not valid JSON")?;
    let events = match value {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<PlaybackEvent>, _>>()
            .context("invalid playback event")?,
        other => vec![serde_json::from_value(other).context("invalid playback event")?],
    };
    Ok(events)
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_args(args: Vec<String>) -> anyhow::Result<Command> {
    let Some(name) = args.first() else {
        print_help();
        std::process::exit(0);
    };
    let rest = &args[1..];
    if rest.len() > 1 {
        anyhow::bail!("too many arguments for {name}");
    }
    let value = rest.first().map(|arg| arg.trim());

    let command = match name.as_str() {
        "record" => Command::Record(value.map(PathBuf::from)),
        "summary" => Command::Summary,
        "sessions" => Command::Sessions(parse_limit(value)?),
        "skipped" => Command::Skipped(parse_limit(value)?),
        "artists" => Command::Artists(parse_limit(value)?),
        "patterns" => Command::Patterns,
        "candidates" => Command::Candidates,
        "export" => {
            let Some(path) = value.filter(|path| !path.is_empty()) else {
                anyhow::bail!("export requires an output path");
            };
            Command::Export(PathBuf::from(path))
        }
        "clear" => Command::Clear,
        "-h" | "--help" => {
            print_help();
            std::process::exit(0);
        }
        other => anyhow::bail!("unknown command {other}"),
    };

    let takes_value = matches!(
        command,
        Command::Record(_)
            | Command::Sessions(_)
            | Command::Skipped(_)
            | Command::Artists(_)
            | Command::Export(_)
    );
    if !takes_value && value.is_some() {
        anyhow::bail!("{name} takes no arguments");
    }
    Ok(command)
}

fn parse_limit(value: Option<&str>) -> anyhow::Result<usize> {
    match value {
        None => Ok(DEFAULT_LIMIT),
        Some(raw) => raw
            .parse()
            .with_context(|| format!("expected a count, got {raw}")),
    }
}

fn print_help() {
    println!("skiptrack");
    println!("  record [file|-]   Record playback events (JSON object or array)");
    println!("  summary           Skip counts for today, this week and this month");
    println!("  sessions [n]      Most recent listening sessions");
    println!("  skipped [n]       Most recently skipped tracks");
    println!("  artists [n]       Most skipped artists");
    println!("  patterns          Skip analysis over the skipped-tracks history");
    println!("  candidates        Tracks over the configured skip threshold");
    println!("  export path       Write the full stats store as JSON");
    println!("  clear             Reset all listening stats");
    println!();
    println!("Data lives in $SKIPTRACK_DATA_DIR or ~/.local/share/skiptrack.");
}
