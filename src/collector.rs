use std::{io::Write, str::FromStr};

use _model::{Coordinate, CoordinateRecord, CoordinateStore, Label, Repository};
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use inquire::{InquireError, Select, Text};
use tracing::{info, warn};

// closer than this to an existing record is probably the same spot twice
const NEAR_DUPLICATE_METRES: f64 = 5.0;

const HELP: &str = r#"Enter a coordinate followed by its label and an optional name:
  19.1738, -96.1342, positive
  19.1738, -96.1342, positive, SiteA
  19°11'19"N 96°07'32"W, negative, Field
Leave out the label to be asked for it and for a name.
Labels: positive (pos, p, pool) or negative (neg, n, no_pool).
Commands: list [label], save, help, quit"#;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Add(CoordinateRecord),
    /// A coordinate without a label; the prompt asks for the rest.
    Partial(Coordinate),
    List(Option<Label>),
    Save,
    Quit,
    Help,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        Ok(match word.to_lowercase().as_str() {
            "" => bail!("empty input"),
            "list" | "ls" => Command::List(match rest {
                "" => None,
                x => Some(x.parse()?),
            }),
            "save" if rest.is_empty() => Command::Save,
            "quit" | "exit" | "q" if rest.is_empty() => Command::Quit,
            "help" | "?" if rest.is_empty() => Command::Help,
            _ => parse_record(line)?,
        })
    }
}

fn parse_record(line: &str) -> Result<Command> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let (coordinate, rest) = if fields[0].contains('°') {
        // `19°11'19"N, 96°07'32"W` splits the pair across two fields
        match fields.get(1) {
            Some(x) if x.contains('°') => (
                format!("{} {x}", fields[0]).parse::<Coordinate>()?,
                &fields[2..],
            ),
            _ => (fields[0].parse::<Coordinate>()?, &fields[1..]),
        }
    } else {
        if fields.len() < 2 {
            bail!("expected `lat, lon, label[, name]`, try `help`");
        }
        (
            format!("{},{}", fields[0], fields[1]).parse::<Coordinate>()?,
            &fields[2..],
        )
    };

    if rest.iter().all(|x| x.is_empty()) {
        return Ok(Command::Partial(coordinate));
    }

    let label: Label = rest
        .first()
        .context("missing label (positive or negative)")?
        .parse()?;
    let name = match rest.get(1) {
        Some(x) if !x.is_empty() => x.to_string(),
        _ => coordinate.default_name(),
    };
    if rest.len() > 2 {
        bail!("too many fields, names can't contain commas");
    }

    Ok(Command::Add(CoordinateRecord::new(label, name, coordinate)?))
}

/// Applies one command to the store. Adds are persisted straight away; if
/// that save fails the record stays in memory and the error is returned.
pub fn dispatch<R: Repository>(
    store: &mut CoordinateStore<R>,
    command: Command,
    out: &mut impl Write,
) -> Result<Flow> {
    match command {
        Command::Add(record) => {
            if let Some((near, distance)) = store.nearest(&record.coordinate()) {
                if distance < NEAR_DUPLICATE_METRES {
                    warn!(existing = near.name(), distance, "near-duplicate coordinate");
                    writeln!(
                        out,
                        "note: {distance:.1}m from existing record {}",
                        near.name()
                    )?;
                }
            }

            let record = store.add(record)?;
            writeln!(
                out,
                "added {} record {} at ({})",
                record.label(),
                record.name(),
                record.coordinate()
            )?;
            info!(name = record.name(), label = %record.label(), "added record");
            store.save().context("record added but not saved")?;
        }
        Command::Partial(coordinate) => {
            bail!("missing label for ({coordinate}), expected positive or negative")
        }
        Command::List(label) => {
            let mut empty = true;
            for (i, x) in store.list(label).enumerate() {
                empty = false;
                writeln!(
                    out,
                    "{:>3}. [{}] {} ({}) {}",
                    i + 1,
                    x.label(),
                    x.name(),
                    x.coordinate(),
                    if x.processed() { "captured" } else { "pending" }
                )?;
            }
            if empty {
                writeln!(out, "no records")?;
            }
            let counts = store.counts();
            writeln!(
                out,
                "{} positive, {} negative, {} of {} captured",
                counts.positive,
                counts.negative,
                counts.processed,
                store.len()
            )?;
        }
        Command::Save => {
            store.save()?;
            writeln!(out, "saved {} records", store.len())?;
        }
        Command::Quit => {
            store.save()?;
            return Ok(Flow::Quit);
        }
        Command::Help => writeln!(out, "{HELP}")?,
    }

    Ok(Flow::Continue)
}

/// Interactive loop. Errors from a single line are reported and the loop
/// carries on; Ctrl-C / Esc behave like `quit`.
pub fn run<R: Repository>(store: &mut CoordinateStore<R>) -> Result<()> {
    let mut out = std::io::stdout();
    writeln!(out, "{HELP}")?;

    loop {
        let line = match Text::new(">")
            .with_help_message("coordinate, label and name, or a command")
            .prompt()
        {
            Ok(x) => x,
            Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
                dispatch(store, Command::Quit, &mut out)?;
                break;
            }
            Err(e) => return Err(e.into()),
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(Command::Partial(coordinate)) => match complete(coordinate) {
                Ok(Some(record)) => Command::Add(record),
                Ok(None) => continue,
                Err(e) => {
                    eprintln!("{e:#}");
                    continue;
                }
            },
            Ok(x) => x,
            Err(e) => {
                eprintln!("{e:#}");
                continue;
            }
        };
        match dispatch(store, command, &mut out) {
            Ok(Flow::Quit) => break,
            Ok(Flow::Continue) => {}
            Err(e) => eprintln!("{e:#}"),
        }
    }

    writeln!(out, "saved {} records", store.len())?;
    Ok(())
}

/// Asks for the label and name of a bare coordinate. `None` if the user
/// backs out with Esc.
fn complete(coordinate: Coordinate) -> Result<Option<CoordinateRecord>> {
    let label = match Select::new("label", Label::value_variants().to_vec()).prompt() {
        Ok(x) => x,
        Err(InquireError::OperationCanceled) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let default = coordinate.default_name();
    let name = match Text::new("name")
        .with_placeholder(&default)
        .with_help_message("empty for the default name")
        .prompt()
    {
        Ok(x) if x.trim().is_empty() => coordinate.default_name(),
        Ok(x) => x.trim().to_string(),
        Err(InquireError::OperationCanceled) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    Ok(Some(CoordinateRecord::new(label, name, coordinate)?))
}
