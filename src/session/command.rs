//! Free-text control commands

/// A control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start broadcasting the default source
    Start,
    /// Stop broadcasting
    Stop,
    /// Mix the named clip into the broadcast
    Effect(String),
}

impl Command {
    /// Parse a command from free text
    ///
    /// `start` and `stop` are recognised anywhere in the text, ignoring case,
    /// and take priority. Any other non-empty text names an effect clip.
    pub fn parse(text: &str) -> Option<Command> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let lower = text.to_lowercase();
        if lower.contains("start") {
            Some(Command::Start)
        } else if lower.contains("stop") {
            Some(Command::Stop)
        } else {
            Some(Command::Effect(text.to_string()))
        }
    }
}

/// Result of handling a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command was carried out
    Ok,
    /// The command did not apply and nothing changed
    Ignored,
}
