//! Controller command set.
//!
//! Every command is a single newline-terminated line; the controller answers with one line.
//! Framing and reply checks come from a fixed table keyed by command kind.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Ping,
    GetVersion,
    SetPwm,
    Raw,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        spec_for(self).name
    }
}

/// What counts as a valid reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyGrammar {
    /// Reply must equal this line exactly.
    Exact(&'static str),
    /// Any non-empty line.
    NonEmpty,
    /// Anything, including an empty line.
    Any,
}

impl ReplyGrammar {
    pub fn accepts(self, reply: &str) -> bool {
        match self {
            ReplyGrammar::Exact(expected) => reply == expected,
            ReplyGrammar::NonEmpty => !reply.is_empty(),
            ReplyGrammar::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub kind: CommandKind,
    pub name: &'static str,
    /// Fixed wire text; `None` when the payload supplies the line.
    pub wire: Option<&'static str>,
    pub reply: ReplyGrammar,
}

pub const COMMAND_TABLE: [CommandSpec; 4] = [
    CommandSpec { kind: CommandKind::Ping, name: "PING", wire: Some("PING"), reply: ReplyGrammar::Exact("PONG") },
    CommandSpec { kind: CommandKind::GetVersion, name: "VERSION", wire: Some("VERSION"), reply: ReplyGrammar::NonEmpty },
    CommandSpec { kind: CommandKind::SetPwm, name: "SET_PWM", wire: None, reply: ReplyGrammar::NonEmpty },
    CommandSpec { kind: CommandKind::Raw, name: "RAW", wire: None, reply: ReplyGrammar::Any },
];

pub fn spec_for(kind: CommandKind) -> &'static CommandSpec {
    match kind {
        CommandKind::Ping => &COMMAND_TABLE[0],
        CommandKind::GetVersion => &COMMAND_TABLE[1],
        CommandKind::SetPwm => &COMMAND_TABLE[2],
        CommandKind::Raw => &COMMAND_TABLE[3],
    }
}

/// A typed request to the fan controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCommand {
    Ping,
    GetVersion,
    /// Duty cycle in percent, 0..=100.
    SetPwm(u8),
    Raw(String),
}

impl ControllerCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            ControllerCommand::Ping => CommandKind::Ping,
            ControllerCommand::GetVersion => CommandKind::GetVersion,
            ControllerCommand::SetPwm(_) => CommandKind::SetPwm,
            ControllerCommand::Raw(_) => CommandKind::Raw,
        }
    }

    pub fn spec(&self) -> &'static CommandSpec {
        spec_for(self.kind())
    }

    /// The exact bytes written to the port, newline included.
    pub fn encode(&self) -> String {
        let body = match (self, self.spec().wire) {
            (_, Some(fixed)) => fixed.to_string(),
            (ControllerCommand::SetPwm(value), None) => (*value).min(100).to_string(),
            (ControllerCommand::Raw(text), None) => text.trim().to_string(),
            (_, None) => String::new(),
        };
        format!("{}\n", body)
    }

    pub fn accepts(&self, reply: &str) -> bool {
        self.spec().reply.accepts(reply)
    }

    /// Short label for logs and errors, e.g. `SET_PWM(40)`.
    pub fn label(&self) -> String {
        match self {
            ControllerCommand::SetPwm(value) => format!("SET_PWM({})", value),
            ControllerCommand::Raw(text) => format!("RAW({:?})", text.trim()),
            other => other.spec().name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_keyed_by_kind() {
        for kind in [CommandKind::Ping, CommandKind::GetVersion, CommandKind::SetPwm, CommandKind::Raw] {
            assert_eq!(spec_for(kind).kind, kind);
        }
    }

    #[test]
    fn wire_framing() {
        assert_eq!(ControllerCommand::Ping.encode(), "PING\n");
        assert_eq!(ControllerCommand::GetVersion.encode(), "VERSION\n");
        assert_eq!(ControllerCommand::SetPwm(42).encode(), "42\n");
        assert_eq!(ControllerCommand::SetPwm(250).encode(), "100\n");
        assert_eq!(ControllerCommand::Raw("  HELP \r\n".into()).encode(), "HELP\n");
    }

    #[test]
    fn reply_grammar() {
        assert!(ControllerCommand::Ping.accepts("PONG"));
        assert!(!ControllerCommand::Ping.accepts("pong"));
        assert!(!ControllerCommand::Ping.accepts("PONG!"));
        assert!(!ControllerCommand::Ping.accepts("OK"));
        assert!(ControllerCommand::GetVersion.accepts("fanbridge-fw 1.2"));
        assert!(!ControllerCommand::GetVersion.accepts(""));
        assert!(ControllerCommand::SetPwm(10).accepts("OK 10"));
        assert!(!ControllerCommand::SetPwm(10).accepts(""));
        assert!(ControllerCommand::Raw("x".into()).accepts(""));
    }

    #[test]
    fn labels() {
        assert_eq!(ControllerCommand::SetPwm(40).label(), "SET_PWM(40)");
        assert_eq!(ControllerCommand::Ping.label(), "PING");
        assert_eq!(CommandKind::GetVersion.as_str(), "VERSION");
    }
}
