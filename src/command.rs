//! Interactive commands: parsing a line of user input and running it
//! against the backup manager.

use crate::backup::{self, BackupManager};
use std::path::PathBuf;
use thiserror::Error;

pub const HELP: &str = "\
Available commands:
  add <source> <target> [<target> ...] - Start backup
  end <source> <target> [<target> ...] - Stop backup
  help - Show this help
  list - Show active backups
  restore <backup> <source> - Restore backup to source
  exit - Exit program";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add { source: PathBuf, targets: Vec<PathBuf> },
    End { source: PathBuf, targets: Vec<PathBuf> },
    List,
    Help,
    Restore { backup: PathBuf, source: PathBuf },
    Exit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("unmatched quote in command")]
    UnmatchedQuote,

    #[error("unexpected quote in token")]
    UnexpectedQuote,

    #[error("'{0}' requires source and target path(s)")]
    MissingPaths(&'static str),

    #[error("'restore' requires backup and source path")]
    RestoreArguments,

    #[error("'{0}' takes no arguments")]
    UnexpectedArguments(&'static str),

    #[error("Unknown command '{0}'")]
    Unknown(String),
}

/// Split a line into whitespace-separated tokens. A token opening with `"`
/// runs to the next `"` and may contain spaces.
pub fn tokenize(line: &str) -> Result<Vec<String>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else {
            break;
        };

        let mut token = String::new();
        if first == '"' {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some(c) => token.push(c),
                    None => return Err(ParseError::UnmatchedQuote),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                if c == '"' {
                    return Err(ParseError::UnexpectedQuote);
                }
                token.push(c);
            }
        }
        tokens.push(token);
    }

    Ok(tokens)
}

/// Parse one line of input. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Command>, ParseError> {
    let tokens = tokenize(line)?;
    let Some((name, args)) = tokens.split_first() else {
        return Ok(None);
    };

    let command = match name.as_str() {
        "add" => {
            let (source, targets) = source_and_targets(args, "add")?;
            Command::Add { source, targets }
        }
        "end" => {
            let (source, targets) = source_and_targets(args, "end")?;
            Command::End { source, targets }
        }
        "restore" => match args {
            [backup, source] => Command::Restore {
                backup: PathBuf::from(backup),
                source: PathBuf::from(source),
            },
            _ => return Err(ParseError::RestoreArguments),
        },
        "list" => no_arguments(args, "list", Command::List)?,
        "help" => no_arguments(args, "help", Command::Help)?,
        "exit" => no_arguments(args, "exit", Command::Exit)?,
        other => return Err(ParseError::Unknown(other.to_string())),
    };

    Ok(Some(command))
}

fn source_and_targets(
    args: &[String],
    name: &'static str,
) -> Result<(PathBuf, Vec<PathBuf>), ParseError> {
    match args {
        [source, targets @ ..] if !targets.is_empty() => Ok((
            PathBuf::from(source),
            targets.iter().map(PathBuf::from).collect(),
        )),
        _ => Err(ParseError::MissingPaths(name)),
    }
}

fn no_arguments(
    args: &[String],
    name: &'static str,
    command: Command,
) -> Result<Command, ParseError> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(ParseError::UnexpectedArguments(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok(String),
    Err(String),
}

/// Outcome of running one command.
#[derive(Debug, Default)]
pub struct Dispatch {
    pub replies: Vec<Reply>,
    pub exit: bool,
}

/// Run `command` against `manager`. Each target of `add`/`end` gets its own
/// reply; a failure for one target does not stop the others.
pub fn dispatch(manager: &mut BackupManager, command: Command) -> Dispatch {
    let mut out = Dispatch::default();

    match command {
        Command::Add { source, targets } => {
            for target in targets {
                let reply = match manager.add(&source, &target) {
                    Ok(pair) => Reply::Ok(format!(
                        "Backup added successfully: {} -> {}",
                        pair.source.display(),
                        pair.target.display()
                    )),
                    Err(e) => Reply::Err(format!(
                        "Failed to create backup for {} -> {}: {}",
                        source.display(),
                        target.display(),
                        e
                    )),
                };
                out.replies.push(reply);
            }
        }
        Command::End { source, targets } => {
            for target in targets {
                let reply = match manager.remove(&source, &target) {
                    Ok(()) => Reply::Ok(format!(
                        "Backup ended: {} -> {}",
                        source.display(),
                        target.display()
                    )),
                    Err(e) => Reply::Err(e.to_string()),
                };
                out.replies.push(reply);
            }
        }
        Command::List => {
            if manager.is_empty() {
                out.replies.push(Reply::Ok("No active backups.".to_string()));
            }
            for pair in manager.list() {
                out.replies.push(Reply::Ok(format!(
                    "{}. {} -> {} (worker {}, {}, up {}, session {})",
                    pair.index,
                    pair.source.display(),
                    pair.target.display(),
                    pair.worker_id,
                    pair.status,
                    pair.uptime_display(),
                    pair.session_id
                )));
            }
        }
        Command::Restore { backup, source } => {
            let reply = match backup::restore(&source, &backup) {
                Ok(report) => Reply::Ok(format!(
                    "Restore from {} to {} completed ({} copied, {} unchanged, {} removed)",
                    backup.display(),
                    source.display(),
                    report.files_copied,
                    report.files_unchanged,
                    report.removed
                )),
                Err(e) => Reply::Err(format!("Restore failed: {}", e)),
            };
            out.replies.push(reply);
        }
        Command::Help => out.replies.push(Reply::Ok(HELP.to_string())),
        Command::Exit => out.exit = true,
    }

    out
}
