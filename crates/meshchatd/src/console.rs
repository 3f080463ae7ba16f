//! Console commands typed at the meshchatd prompt.

use std::fmt;

pub const USAGE: &str = "commands: connect <host:port> | say <text> | peers | exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect(String),
    Say(String),
    Peers,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    MissingArgument(&'static str),
    Unknown(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "{USAGE}"),
            ParseError::MissingArgument(cmd) => write!(f, "{cmd}: missing argument\n{USAGE}"),
            ParseError::Unknown(word) => write!(f, "unknown command '{word}'\n{USAGE}"),
        }
    }
}

impl Command {
    /// Parse one input line. `say` keeps the rest of the line verbatim.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_start();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest),
            None => (line.trim_end(), ""),
        };
        match word {
            "" => Err(ParseError::Empty),
            "connect" => {
                let addr = rest.trim();
                if addr.is_empty() {
                    Err(ParseError::MissingArgument("connect"))
                } else {
                    Ok(Command::Connect(addr.to_string()))
                }
            }
            "say" => {
                let text = rest.trim_end_matches(['\r', '\n']);
                if text.is_empty() {
                    Err(ParseError::MissingArgument("say"))
                } else {
                    Ok(Command::Say(text.to_string()))
                }
            }
            "peers" => Ok(Command::Peers),
            "exit" | "quit" => Ok(Command::Exit),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}
