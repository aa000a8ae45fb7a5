//! Command dispatch: the record handlers behind every session worker.

use std::sync::Arc;

use crate::proto::{ChatCommand, ChatMessage};

use super::ServerError;
use super::registry::Registry;
use super::session::Session;

/// In-band marker prefixing a duplicate-name rejection notice.
pub const NAME_TAKEN_MARKER: &str = "ErrorNameAlreadyExists";

pub(crate) fn dispatch(
    registry: &Arc<Registry>,
    record: &ChatMessage,
    origin: &Arc<Session>,
) -> Result<(), ServerError> {
    match record.command {
        ChatCommand::Broadcast => broadcast(registry, record, Some(origin.id())),
        ChatCommand::Private => private(registry, record, origin),
        ChatCommand::ChangeName => change_name(registry, record, origin),
        ChatCommand::ListUsers => list_users(registry, origin),
        ChatCommand::Connect | ChatCommand::ServerMsg | ChatCommand::Help => {
            Err(ServerError::UnexpectedCommand(record.command))
        }
    }
}

/// Fan the record out to every live session except `exclude`. Send failures
/// to individual recipients are logged and skipped; the fan-out continues.
pub(crate) fn broadcast(
    registry: &Registry,
    record: &ChatMessage,
    exclude: Option<u64>,
) -> Result<(), ServerError> {
    let body = record.encode()?;
    registry.for_each_live(|session| {
        if exclude == Some(session.id()) {
            return;
        }
        if let Err(err) = session.send(&body) {
            tracing::warn!(id = session.id(), name = %session.name(), "send failed: {err}");
        }
    });
    Ok(())
}

fn private(
    registry: &Registry,
    record: &ChatMessage,
    origin: &Arc<Session>,
) -> Result<(), ServerError> {
    match registry.find_by_name(&record.pm_to) {
        Some(target) => {
            let body = record.encode()?;
            target.send(&body)?;
        }
        None => {
            let notice = ChatMessage::server_notice(format!(
                "There is no user with name {}",
                record.pm_to
            ));
            origin.send(&notice.encode()?)?;
        }
    }
    Ok(())
}

fn change_name(
    registry: &Registry,
    record: &ChatMessage,
    origin: &Arc<Session>,
) -> Result<(), ServerError> {
    match registry.try_rename(origin, &record.msg) {
        Ok(old_name) => {
            let notice = ChatMessage::server_notice(format!(
                "{} changed his name to {}",
                old_name, record.msg
            ));
            // Everyone hears about the rename, the origin included; this is
            // how the origin learns its new canonical name.
            broadcast(registry, &notice, None)
        }
        Err(_) => reject_name(&record.msg, origin),
    }
}

/// Unicast the current user list; serves ListUsers requests and the tail
/// of the connect handshake.
pub(crate) fn list_users(registry: &Registry, origin: &Arc<Session>) -> Result<(), ServerError> {
    let names = registry.list_names();
    let listing = if names.is_empty() {
        "there are no active users".to_string()
    } else {
        format!("Current active users:\n{}", names.join("\n"))
    };
    let notice = ChatMessage::server_notice(listing);
    origin.send(&notice.encode()?)?;
    Ok(())
}

/// Tell `origin` the name it asked for is taken. The notice carries the
/// attempted name and the session's current name; on a connect rejection
/// the two are the same string.
pub(crate) fn reject_name(attempted: &str, origin: &Arc<Session>) -> Result<(), ServerError> {
    let notice = ChatMessage::server_notice(format!(
        "{NAME_TAKEN_MARKER} {attempted} {}",
        origin.name()
    ));
    origin.send(&notice.encode()?)?;
    Ok(())
}
