//! Interactive chat client: prompt loop, outbound path, receive task.

use std::io;
use std::net::{Ipv4Addr, Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use thiserror::Error;
use time::{OffsetDateTime, UtcOffset};

use crate::config::ClientConfig;
use crate::console::{Color, Console};
use crate::proto::{ChatCommand, ChatMessage, CodecError, FrameError, FrameReader, FrameWriter};
use crate::server::NAME_TAKEN_MARKER;

pub mod input;

use input::InputAction;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("input closed")]
    InputClosed,
    #[error("server assigned an empty name")]
    EmptyAssignedName,
    #[error("receive task failed")]
    ReceiveFailed,
}

/// State shared between the input loop and the receive task.
struct SharedState {
    /// Our display name; rewritten by `/setname` and by the server's
    /// duplicate-name correction.
    name: Mutex<String>,
    exit: AtomicBool,
    /// Captured before any thread spawns; querying the local offset later
    /// would be refused in a multithreaded process.
    utc_offset: UtcOffset,
}

impl SharedState {
    fn new(name: String) -> Self {
        Self {
            name: Mutex::new(name),
            exit: AtomicBool::new(false),
            utc_offset: UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        }
    }

    fn name(&self) -> String {
        self.name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_name(&self, name: String) {
        *self.name.lock().unwrap_or_else(PoisonError::into_inner) = name;
    }
}

/// Run a full client session on the console: prompts, connect handshake,
/// then the input loop until `/exit`, disconnect, or a fatal error.
pub fn run(console: &Arc<Console>) -> Result<(), ClientError> {
    console.write("Welcome to the chat\n", Color::White)?;

    let config = prompt_config(console)?;
    let stream = match TcpStream::connect(config.server_addr) {
        Ok(stream) => stream,
        Err(err) => {
            console.write(&format!("Connection failed: {err}\n"), Color::Red)?;
            return Err(err.into());
        }
    };

    let state = Arc::new(SharedState::new(config.name));
    let mut writer = FrameWriter::new(stream.try_clone()?);

    let hello = ChatMessage::new(ChatCommand::Connect, state.name());
    writer.write_frame(&hello.encode()?)?;

    let receiver = thread::spawn({
        let stream = stream.try_clone()?;
        let console = Arc::clone(console);
        let state = Arc::clone(&state);
        move || receive_loop(stream, console, state)
    });

    let outcome = input_loop(console, &state, &mut writer);

    state.exit.store(true, Ordering::Relaxed);
    let _ = stream.shutdown(Shutdown::Both);
    let receive_clean = receiver.join().unwrap_or(false);

    outcome?;
    if receive_clean {
        Ok(())
    } else {
        Err(ClientError::ReceiveFailed)
    }
}

fn input_loop(
    console: &Arc<Console>,
    state: &Arc<SharedState>,
    writer: &mut FrameWriter<TcpStream>,
) -> Result<(), ClientError> {
    loop {
        let Some(line) = console.read_line()? else {
            return Ok(());
        };
        // The receive task may have ended the session while we were typing.
        if state.exit.load(Ordering::Relaxed) {
            return Ok(());
        }

        match input::parse_line(&line, &state.name()) {
            InputAction::Nothing => {}
            InputAction::Exit => return Ok(()),
            InputAction::Invalid(text) => {
                console.write(&format!("{text}\n"), Color::Red)?;
            }
            InputAction::Local(record) => {
                echo_own_record(console, state, &record, &line);
            }
            InputAction::Send(record) => {
                echo_own_record(console, state, &record, &line);
                let body = match record.encode() {
                    Ok(body) => body,
                    Err(err) => {
                        tracing::debug!("refusing to send: {err}");
                        console.write("Serialization failed\n", Color::Red)?;
                        continue;
                    }
                };
                if let Err(err) = writer.write_frame(&body) {
                    console.write("Message was not sent\n", Color::Red)?;
                    return Err(err.into());
                }
                if record.command == ChatCommand::ChangeName {
                    // Adopt the new name right away; a duplicate-name reply
                    // from the server rolls it back.
                    state.set_name(record.msg);
                }
            }
        }
    }
}

/// Decode inbound records and drive the display until the peer goes away.
/// Returns false only on a fault that should fail the whole client.
fn receive_loop(stream: TcpStream, console: Arc<Console>, state: Arc<SharedState>) -> bool {
    let mut reader = FrameReader::new(&stream);
    let mut clean = true;

    while !state.exit.load(Ordering::Relaxed) {
        match reader.read_frame() {
            Ok(None) => {
                if !state.exit.load(Ordering::Relaxed) {
                    let _ = console.write("You were disconnected\n", Color::White);
                }
                break;
            }
            Ok(Some(bytes)) => match ChatMessage::decode(&bytes) {
                Ok(mut record) => {
                    if is_name_rejection(&record) {
                        match adopt_assigned_name(&record.msg, &state) {
                            Ok(attempted) => {
                                record.msg =
                                    format!("User with name '{attempted}' already exists");
                            }
                            Err(err) => {
                                let _ = console.write(&format!("{err}\n"), Color::Red);
                                clean = false;
                                break;
                            }
                        }
                    }
                    render_received(&console, &state, &record);
                }
                // Malformed inbound records are dropped, not fatal.
                Err(err) => tracing::warn!("ignoring malformed record: {err}"),
            },
            Err(FrameError::Io(err)) if err.kind() == io::ErrorKind::ConnectionReset => {
                if !state.exit.load(Ordering::Relaxed) {
                    let _ = console.write("Server shutdown\n", Color::White);
                }
                break;
            }
            Err(err) => {
                if !state.exit.load(Ordering::Relaxed) {
                    let _ = console.write(&format!("Receive error: {err}\n"), Color::Red);
                    clean = false;
                }
                break;
            }
        }
    }

    state.exit.store(true, Ordering::Relaxed);
    clean
}

// The marker must be followed by its separating space, so a chat message
// that merely begins with the word cannot trigger the correction path.
fn is_name_rejection(record: &ChatMessage) -> bool {
    record.command == ChatCommand::ServerMsg
        && record
            .msg
            .strip_prefix(NAME_TAKEN_MARKER)
            .is_some_and(|rest| rest.starts_with(' '))
}

/// `ErrorNameAlreadyExists <attempted> <assigned>`: adopt the assigned
/// name and hand back the attempted one for display. An empty assigned
/// name leaves us nameless, which is fatal.
fn adopt_assigned_name(msg: &str, state: &SharedState) -> Result<String, ClientError> {
    let mut tokens = msg.split_whitespace();
    let _marker = tokens.next();
    let attempted = tokens.next().unwrap_or("").to_string();
    let assigned = tokens.next().unwrap_or("").to_string();
    if assigned.is_empty() {
        return Err(ClientError::EmptyAssignedName);
    }
    state.set_name(assigned);
    Ok(attempted)
}

fn render_received(console: &Console, state: &SharedState, record: &ChatMessage) {
    let stamp = format_time(record.timestamp, state.utc_offset);
    let (text, color) = match record.command {
        ChatCommand::ServerMsg => (
            format!("{stamp}{}: {}\n", record.from, record.msg),
            Color::Cyan,
        ),
        ChatCommand::Broadcast => (
            format!("{stamp}{}: {}\n", record.from, record.msg),
            Color::Yellow,
        ),
        ChatCommand::Private => (
            format!("{stamp}From {}: {}\n", record.from, record.msg),
            Color::Magenta,
        ),
        _ => return,
    };
    let _ = console.write(&text, color);
}

/// Replace the just-echoed input line with its formatted rendering. The
/// erase and the rewrite happen under one console lock so a concurrently
/// arriving message cannot land in between.
fn echo_own_record(console: &Console, state: &SharedState, record: &ChatMessage, typed: &str) {
    let stamp = format_time(record.timestamp, state.utc_offset);
    let (text, color) = match record.command {
        ChatCommand::Private => (
            format!("{stamp}You to {}: {}\n", record.pm_to, record.msg),
            Color::Magenta,
        ),
        ChatCommand::Broadcast => (format!("{stamp}You: {}\n", record.msg), Color::Green),
        ChatCommand::Help => (format!("{}\n", record.msg), Color::Cyan),
        _ => (String::new(), Color::White),
    };

    let mut lock = console.lock();
    let width = usize::from(lock.size().0.max(1));
    let typed_cells = typed.chars().count();
    let cells = typed_cells.div_ceil(width) * width;
    let _ = lock.erase_chars(u16::try_from(cells).unwrap_or(u16::MAX));
    if !text.is_empty() {
        let _ = lock.write(&text, color);
    }
}

fn format_time(timestamp: u64, offset: UtcOffset) -> String {
    let seconds = i64::try_from(timestamp).unwrap_or(i64::MAX);
    match OffsetDateTime::from_unix_timestamp(seconds) {
        Ok(moment) => {
            let local = moment.to_offset(offset);
            format!(
                "[{:02}:{:02}:{:02}] ",
                local.hour(),
                local.minute(),
                local.second()
            )
        }
        Err(_) => "[Error time] ".to_string(),
    }
}

/// Prompt for name, server address, and port, re-prompting until each is
/// valid.
fn prompt_config(console: &Console) -> Result<ClientConfig, ClientError> {
    let name = loop {
        console.write("Enter your name: ", Color::White)?;
        let Some(line) = console.read_line()? else {
            return Err(ClientError::InputClosed);
        };
        let name = line.trim().to_string();
        if !name.is_empty() && name.chars().all(char::is_alphanumeric) {
            break name;
        }
        console.write(
            "Invalid name. Names consist of letters and numbers only\n",
            Color::Red,
        )?;
    };

    let addr = loop {
        console.write("Enter server ip address: ", Color::White)?;
        let Some(line) = console.read_line()? else {
            return Err(ClientError::InputClosed);
        };
        match line.trim().parse::<Ipv4Addr>() {
            Ok(addr) => break addr,
            Err(_) => console.write("Incorrect address\n", Color::Red)?,
        }
    };

    let port = loop {
        console.write("Enter server port: ", Color::White)?;
        let Some(line) = console.read_line()? else {
            return Err(ClientError::InputClosed);
        };
        match line.trim().parse::<u16>() {
            Ok(port) if port != 0 => break port,
            _ => console.write("Invalid port\n", Color::Red)?,
        }
    };

    Ok(ClientConfig::new(name, addr, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_rejection_adopts_third_token() {
        let state = SharedState::new("hopeful".to_string());
        let attempted =
            adopt_assigned_name("ErrorNameAlreadyExists hopeful original", &state).unwrap();
        assert_eq!(attempted, "hopeful");
        assert_eq!(state.name(), "original");
    }

    #[test]
    fn name_rejection_without_assigned_name_is_fatal() {
        let state = SharedState::new("hopeful".to_string());
        let err = adopt_assigned_name("ErrorNameAlreadyExists hopeful", &state).unwrap_err();
        assert!(matches!(err, ClientError::EmptyAssignedName));
        assert_eq!(state.name(), "hopeful");
    }

    #[test]
    fn marker_requires_the_separating_space() {
        let mut record = ChatMessage::server_notice("ErrorNameAlreadyExistsForReal");
        assert!(!is_name_rejection(&record));
        record.msg = "ErrorNameAlreadyExists bob bob".to_string();
        assert!(is_name_rejection(&record));
    }

    #[test]
    fn time_formatting_is_stable() {
        assert_eq!(format_time(0, UtcOffset::UTC), "[00:00:00] ");
        assert_eq!(format_time(3_661, UtcOffset::UTC), "[01:01:01] ");
    }
}
