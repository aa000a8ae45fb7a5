//! Input-line parsing: maps a typed line to an outbound record.

use crate::proto::{ChatCommand, ChatMessage};

/// What to do with a typed line.
#[derive(Debug, PartialEq, Eq)]
pub enum InputAction {
    /// Transmit the record (echoing it locally first).
    Send(ChatMessage),
    /// Render locally, nothing goes on the wire (`/help`).
    Local(ChatMessage),
    /// Terminate the client session.
    Exit,
    /// Show the error locally; nothing is sent.
    Invalid(String),
    /// Empty or incomplete line, silently dropped.
    Nothing,
}

pub const HELP_TEXT: &str = "Available commands:\n\
/pm (user name)- private message\n\
/setname (new name) - change name\n\
/listusers - show current active users\n\
/exit - exit program";

/// Parse one line. A leading `/` selects a command by its first
/// whitespace-delimited token; anything else broadcasts the whole line.
pub fn parse_line(line: &str, from: &str) -> InputAction {
    if line.is_empty() {
        return InputAction::Nothing;
    }
    if line == "/exit" {
        return InputAction::Exit;
    }

    let command = if line.starts_with('/') {
        let keyword = line.split_whitespace().next().unwrap_or(line);
        match ChatCommand::from_keyword(keyword) {
            Some(command) => command,
            None => return InputAction::Invalid(format!("Invalid command {keyword}")),
        }
    } else {
        ChatCommand::Broadcast
    };

    let record = ChatMessage::new(command, from);
    match command {
        ChatCommand::Help => InputAction::Local(record.with_msg(HELP_TEXT)),
        ChatCommand::ListUsers => InputAction::Send(record),
        ChatCommand::ChangeName => match nth_token(line, 1) {
            Some(name) => InputAction::Send(record.with_msg(name)),
            None => InputAction::Invalid("Can't change name - no name specified".to_string()),
        },
        ChatCommand::Private => {
            let (target, text) = split_target_and_text(line);
            let Some(target) = target else {
                return InputAction::Invalid(
                    "No client name was specified for private message".to_string(),
                );
            };
            if text.is_empty() {
                return InputAction::Nothing;
            }
            InputAction::Send(record.with_pm_to(target).with_msg(text))
        }
        ChatCommand::Broadcast => InputAction::Send(record.with_msg(line)),
        // Never produced by the keyword table.
        ChatCommand::Connect | ChatCommand::ServerMsg => InputAction::Nothing,
    }
}

fn nth_token(line: &str, n: usize) -> Option<&str> {
    line.split_whitespace().nth(n)
}

/// For `/pm <target> <text>`: the second token and the remainder after the
/// single character separating it from the text.
fn split_target_and_text(line: &str) -> (Option<&str>, &str) {
    let after_keyword = match line.find(char::is_whitespace) {
        Some(end) => &line[end..],
        None => return (None, ""),
    };
    let at_target = after_keyword.trim_start();
    if at_target.is_empty() {
        return (None, "");
    }
    let target_end = at_target
        .find(char::is_whitespace)
        .unwrap_or(at_target.len());
    let (target, rest) = at_target.split_at(target_end);
    let mut text = rest.chars();
    text.next();
    (Some(target), text.as_str())
}
