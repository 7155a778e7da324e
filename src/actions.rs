use crate::telegram::{Attachment, MessageBody, CHOICE_MARKER};

/// Prefix that turns a chat message into a command
pub const COMMAND_MARKER: char = '/';

/// A `/name argument` message, split but not yet interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub name: String,
    pub argument: String,
}

impl CommandInvocation {
    /// `None` unless `text` starts with the command marker
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.trim().strip_prefix(COMMAND_MARKER)?;
        let (head, argument) = match rest.split_once(char::is_whitespace) {
            Some((head, argument)) => (head, argument.trim()),
            None => (rest, ""),
        };
        // "/status@my_bot" addresses this bot explicitly
        let name = head.split('@').next().unwrap_or(head);
        Some(Self {
            name: name.to_string(),
            argument: argument.to_string(),
        })
    }
}

/// What an inbound message asks the relay to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Ping,
    Status,
    /// Show the last screenful of the pane
    View,
    /// Press Escape in the pane
    Escape,
    Help,
    ChangeDir(String),
    Shell(String),
    /// A prompt button was pressed
    Choice { callback_id: String, option: u32 },
    /// Plain text typed straight into the pane
    Literal(String),
    Attachment(Attachment),
    /// A known command was sent without its argument
    MissingArgument { usage: &'static str },
    Unknown(String),
    /// Nothing to do
    Ignore,
}

impl Action {
    pub fn from_message(body: &MessageBody) -> Self {
        match body {
            MessageBody::Text(text) => Self::from_text(text),
            MessageBody::Choice { callback_id, data } => data
                .strip_prefix(CHOICE_MARKER)
                .and_then(|n| n.trim().parse().ok())
                .map(|option| Action::Choice {
                    callback_id: callback_id.clone(),
                    option,
                })
                .unwrap_or(Action::Ignore),
            MessageBody::Attachment(attachment) => Action::Attachment(attachment.clone()),
            MessageBody::Other => Action::Ignore,
        }
    }

    pub fn from_text(text: &str) -> Self {
        match CommandInvocation::parse(text) {
            Some(invocation) => Self::from_invocation(invocation),
            None if text.trim().is_empty() => Action::Ignore,
            None => Action::Literal(text.to_string()),
        }
    }

    fn from_invocation(invocation: CommandInvocation) -> Self {
        let CommandInvocation { name, argument } = invocation;
        match name.as_str() {
            "ping" => Action::Ping,
            "status" => Action::Status,
            "view" | "screen" => Action::View,
            "esc" => Action::Escape,
            "help" | "start" => Action::Help,
            "cd" if argument.is_empty() => Action::MissingArgument { usage: "/cd <path>" },
            "cd" => Action::ChangeDir(argument),
            "cmd" if argument.is_empty() => Action::MissingArgument { usage: "/cmd <command>" },
            "cmd" => Action::Shell(argument),
            _ => Action::Unknown(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_split() {
        let inv = CommandInvocation::parse("/cmd  git status --short ").unwrap();
        assert_eq!(inv.name, "cmd");
        assert_eq!(inv.argument, "git status --short");

        let inv = CommandInvocation::parse("/status@couch_bot").unwrap();
        assert_eq!(inv.name, "status");
        assert!(inv.argument.is_empty());

        assert!(CommandInvocation::parse("hello /cmd").is_none());
    }

    #[test]
    fn test_commands() {
        assert_eq!(Action::from_text("/ping"), Action::Ping);
        assert_eq!(Action::from_text("/screen"), Action::View);
        assert_eq!(
            Action::from_text("/cd ~/src/app"),
            Action::ChangeDir("~/src/app".into())
        );
        assert_eq!(
            Action::from_text("/cmd git status"),
            Action::Shell("git status".into())
        );
        assert_eq!(
            Action::from_text("/cd"),
            Action::MissingArgument { usage: "/cd <path>" }
        );
    }

    #[test]
    fn test_names_are_case_sensitive() {
        assert_eq!(Action::from_text("/PING"), Action::Unknown("PING".into()));
        assert_eq!(Action::from_text("/deploy now"), Action::Unknown("deploy".into()));
    }

    #[test]
    fn test_plain_text_is_literal() {
        assert_eq!(
            Action::from_text("hello there"),
            Action::Literal("hello there".into())
        );
        assert_eq!(Action::from_text("   "), Action::Ignore);
    }

    #[test]
    fn test_choice_marker() {
        let body = MessageBody::Choice {
            callback_id: "cb".into(),
            data: "choice:3".into(),
        };
        assert_eq!(
            Action::from_message(&body),
            Action::Choice {
                callback_id: "cb".into(),
                option: 3
            }
        );

        let stale = MessageBody::Choice {
            callback_id: "cb".into(),
            data: "3".into(),
        };
        assert_eq!(Action::from_message(&stale), Action::Ignore);
    }
}
