//! Parsing of the terminal client's input lines.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    Send,
    Attach(PathBuf),
    Clear,
    React { index: usize, emoji: String },
    Channels,
    Join(String),
    Create(String),
    Delete(String),
    Nick(String),
    SignOut,
    Check,
    TestUpload,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown command: /{0} (try /help)")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),
}

pub const HELP: &str = "\
Commands:
  <text>               send a message (with the selected file, if any)
  /send                send the selected file without text
  /attach <path>       select a file (max 5MB)
  /clear               drop the selected file
  /react <n> <emoji>   react to message n
  /channels            list channels
  /join <name>         open a channel
  /create <name>       create a channel
  /delete <name>       delete a channel
  /nick <name>         sign in under a name
  /signout             sign out
  /check               storage diagnostics
  /test-upload         write a test object to storage
  /quit                exit";

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(escaped) = line.strip_prefix("//") {
        return Ok(Some(Command::Say(format!("/{}", escaped))));
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Say(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "send" => Command::Send,
        "attach" => Command::Attach(PathBuf::from(required(arg, "/attach <path>")?)),
        "clear" => Command::Clear,
        "react" => {
            let usage = "/react <n> <emoji>";
            let (index, emoji) = arg.split_once(char::is_whitespace).ok_or(ParseError::Usage(usage))?;
            let index = index
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ParseError::Usage(usage))?;
            Command::React {
                index,
                emoji: required(emoji.trim(), usage)?,
            }
        }
        "channels" => Command::Channels,
        "join" => Command::Join(required(arg, "/join <name>")?),
        "create" => Command::Create(required(arg, "/create <name>")?),
        "delete" => Command::Delete(required(arg, "/delete <name>")?),
        "nick" => Command::Nick(required(arg, "/nick <name>")?),
        "signout" => Command::SignOut,
        "check" => Command::Check,
        "test-upload" => Command::TestUpload,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn required(arg: &str, usage: &'static str) -> Result<String, ParseError> {
    if arg.is_empty() {
        Err(ParseError::Usage(usage))
    } else {
        Ok(arg.to_string())
    }
}
