//! Interactive control surface read from stdin while a session streams.

/// One line typed by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Print current settings.
    ShowSettings,
    /// Change one setting.
    Set { key: String, value: String },
    /// Stop the session.
    Exit,
    Help,
    Empty,
    Unknown(String),
}

pub const HELP: &str = "Commands: settings | set KEY VALUE | exit | help";

pub fn parse_control_command(line: &str) -> ControlCommand {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return ControlCommand::Empty;
    };

    match verb.to_ascii_lowercase().as_str() {
        "settings" | "show" => ControlCommand::ShowSettings,
        "exit" | "quit" | "q" => ControlCommand::Exit,
        "help" | "?" => ControlCommand::Help,
        "set" => {
            let (Some(key), Some(value), None) = (words.next(), words.next(), words.next()) else {
                return ControlCommand::Unknown(line.trim().to_string());
            };
            ControlCommand::Set {
                key: key.to_string(),
                value: value.to_string(),
            }
        }
        _ => ControlCommand::Unknown(line.trim().to_string()),
    }
}
