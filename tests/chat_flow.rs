//! End-to-end chat flows against a real server over loopback TCP.
//!
//! Each test drives raw protocol peers (frame + codec, no terminal) so the
//! asserted traffic is exactly what a client would see on the wire.

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use parlor::config::ServerConfig;
use parlor::proto::{ChatCommand, ChatMessage, FrameError, FrameReader, FrameWriter};
use parlor::server::{Server, ServerHandle};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const QUIET_WINDOW: Duration = Duration::from_millis(200);

fn start_server() -> ServerHandle {
    let config = ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
    };
    Server::new(config).start().expect("start server")
}

/// A raw protocol peer: connects, handshakes, and exchanges records.
struct Peer {
    stream: TcpStream,
    reader: FrameReader<TcpStream>,
}

impl Peer {
    /// Connect and send the handshake record, but drain nothing.
    fn connect(addr: SocketAddr, name: &str) -> Peer {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(RECV_TIMEOUT))
            .expect("set timeout");
        let reader = FrameReader::new(stream.try_clone().expect("clone stream"));
        let mut peer = Peer { stream, reader };
        peer.send(ChatMessage::new(ChatCommand::Connect, name));
        peer
    }

    /// Connect and consume the user-list reply every joiner receives.
    fn join(addr: SocketAddr, name: &str) -> Peer {
        let mut peer = Peer::connect(addr, name);
        let list = peer.recv();
        assert_eq!(list.command, ChatCommand::ServerMsg);
        assert!(
            list.msg.starts_with("Current active users:"),
            "unexpected join reply: {}",
            list.msg
        );
        peer
    }

    fn send(&mut self, record: ChatMessage) {
        let body = record.encode().expect("encode");
        FrameWriter::new(&self.stream)
            .write_frame(&body)
            .expect("send frame");
    }

    fn send_raw(&mut self, body: &[u8]) {
        FrameWriter::new(&self.stream)
            .write_frame(body)
            .expect("send raw frame");
    }

    fn recv(&mut self) -> ChatMessage {
        let bytes = self
            .reader
            .read_frame()
            .expect("read frame")
            .expect("peer closed");
        ChatMessage::decode(&bytes).expect("decode")
    }

    fn expect_server_msg(&mut self, expected: &str) {
        let record = self.recv();
        assert_eq!(record.command, ChatCommand::ServerMsg);
        assert_eq!(record.from, "Server");
        assert_eq!(record.msg, expected);
    }

    /// Assert nothing arrives within the quiet window.
    fn expect_quiet(&mut self) {
        self.stream
            .set_read_timeout(Some(QUIET_WINDOW))
            .expect("set timeout");
        match self.reader.read_frame() {
            Err(FrameError::Io(err))
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut => {}
            other => panic!("expected no traffic, got {other:?}"),
        }
        self.stream
            .set_read_timeout(Some(RECV_TIMEOUT))
            .expect("set timeout");
    }

    /// Assert the server closed the connection (EOF or reset).
    fn expect_closed(&mut self) {
        match self.reader.read_frame() {
            Ok(None) => {}
            Err(FrameError::Io(err)) if err.kind() == io::ErrorKind::ConnectionReset => {}
            other => panic!("expected close, got {other:?}"),
        }
    }
}

#[test]
fn joiner_receives_a_list_naming_itself() {
    let handle = start_server();
    let mut alice = Peer::connect(handle.local_addr(), "Alice");
    alice.expect_server_msg("Current active users:\nAlice");

    alice.send(ChatMessage::new(ChatCommand::ListUsers, "Alice"));
    alice.expect_server_msg("Current active users:\nAlice");

    handle.shutdown().expect("clean shutdown");
}

#[test]
fn join_notifies_peers_and_lists_both_names() {
    let handle = start_server();
    let mut alice = Peer::join(handle.local_addr(), "Alice");

    let mut bob = Peer::connect(handle.local_addr(), "Bob");
    bob.expect_server_msg("Current active users:\nAlice\nBob");
    alice.expect_server_msg("Bob joined to the chat.");

    handle.shutdown().expect("clean shutdown");
}

#[test]
fn duplicate_name_on_connect_is_rejected() {
    let handle = start_server();
    let mut bob = Peer::join(handle.local_addr(), "Bob");

    let mut impostor = Peer::connect(handle.local_addr(), "Bob");
    let rejection = impostor.recv();
    assert_eq!(rejection.command, ChatCommand::ServerMsg);
    assert!(rejection.msg.starts_with("ErrorNameAlreadyExists "));
    assert_eq!(rejection.msg, "ErrorNameAlreadyExists Bob Bob");
    impostor.expect_closed();

    // The resident Bob saw no join notice and is still the only user.
    bob.send(ChatMessage::new(ChatCommand::ListUsers, "Bob"));
    bob.expect_server_msg("Current active users:\nBob");

    handle.shutdown().expect("clean shutdown");
}

#[test]
fn broadcast_reaches_everyone_except_the_origin() {
    let handle = start_server();
    let mut alice = Peer::join(handle.local_addr(), "Alice");
    let mut bob = Peer::join(handle.local_addr(), "Bob");
    alice.expect_server_msg("Bob joined to the chat.");
    let mut carol = Peer::join(handle.local_addr(), "Carol");
    alice.expect_server_msg("Carol joined to the chat.");
    bob.expect_server_msg("Carol joined to the chat.");

    alice.send(ChatMessage::new(ChatCommand::Broadcast, "Alice").with_msg("hello everyone"));

    for peer in [&mut bob, &mut carol] {
        let record = peer.recv();
        assert_eq!(record.command, ChatCommand::Broadcast);
        assert_eq!(record.from, "Alice");
        assert_eq!(record.msg, "hello everyone");
        peer.expect_quiet();
    }
    alice.expect_quiet();

    handle.shutdown().expect("clean shutdown");
}

#[test]
fn private_message_goes_to_the_target_only() {
    let handle = start_server();
    let mut alice = Peer::join(handle.local_addr(), "Alice");
    let mut bob = Peer::join(handle.local_addr(), "Bob");
    alice.expect_server_msg("Bob joined to the chat.");
    let mut carol = Peer::join(handle.local_addr(), "Carol");
    alice.expect_server_msg("Carol joined to the chat.");
    bob.expect_server_msg("Carol joined to the chat.");

    alice.send(
        ChatMessage::new(ChatCommand::Private, "Alice")
            .with_pm_to("Bob")
            .with_msg("psst"),
    );

    let record = bob.recv();
    assert_eq!(record.command, ChatCommand::Private);
    assert_eq!(record.from, "Alice");
    assert_eq!(record.pm_to, "Bob");
    assert_eq!(record.msg, "psst");

    carol.expect_quiet();
    alice.expect_quiet();

    handle.shutdown().expect("clean shutdown");
}

#[test]
fn private_message_to_unknown_user_bounces() {
    let handle = start_server();
    let mut alice = Peer::join(handle.local_addr(), "Alice");

    alice.send(
        ChatMessage::new(ChatCommand::Private, "Alice")
            .with_pm_to("Nobody")
            .with_msg("hi"),
    );
    alice.expect_server_msg("There is no user with name Nobody");

    handle.shutdown().expect("clean shutdown");
}

#[test]
fn rename_is_announced_to_everyone_including_origin() {
    let handle = start_server();
    let mut alice = Peer::join(handle.local_addr(), "Alice");
    let mut bob = Peer::join(handle.local_addr(), "Bob");
    alice.expect_server_msg("Bob joined to the chat.");

    alice.send(ChatMessage::new(ChatCommand::ChangeName, "Alice").with_msg("Carol"));
    alice.expect_server_msg("Alice changed his name to Carol");
    bob.expect_server_msg("Alice changed his name to Carol");

    bob.send(ChatMessage::new(ChatCommand::ListUsers, "Bob"));
    bob.expect_server_msg("Current active users:\nCarol\nBob");

    handle.shutdown().expect("clean shutdown");
}

#[test]
fn rename_to_a_taken_name_is_rejected() {
    let handle = start_server();
    let mut alice = Peer::join(handle.local_addr(), "Alice");
    let mut bob = Peer::join(handle.local_addr(), "Bob");
    alice.expect_server_msg("Bob joined to the chat.");

    bob.send(ChatMessage::new(ChatCommand::ChangeName, "Bob").with_msg("Alice"));
    bob.expect_server_msg("ErrorNameAlreadyExists Alice Bob");
    alice.expect_quiet();

    bob.send(ChatMessage::new(ChatCommand::ListUsers, "Bob"));
    bob.expect_server_msg("Current active users:\nAlice\nBob");

    handle.shutdown().expect("clean shutdown");
}

#[test]
fn leaving_peer_is_announced() {
    let handle = start_server();
    let mut alice = Peer::join(handle.local_addr(), "Alice");
    let bob = Peer::join(handle.local_addr(), "Bob");
    alice.expect_server_msg("Bob joined to the chat.");

    drop(bob);
    alice.expect_server_msg("Bob leaves the chat.");

    alice.send(ChatMessage::new(ChatCommand::ListUsers, "Alice"));
    alice.expect_server_msg("Current active users:\nAlice");

    handle.shutdown().expect("clean shutdown");
}

#[test]
fn malformed_record_terminates_only_the_offender() {
    let handle = start_server();
    let mut alice = Peer::join(handle.local_addr(), "Alice");
    let mut bob = Peer::join(handle.local_addr(), "Bob");
    alice.expect_server_msg("Bob joined to the chat.");

    alice.send_raw(&[1, 2, 3]);
    bob.expect_server_msg("Alice leaves the chat.");
    alice.expect_closed();

    // The fault stayed isolated: the server still routes for Bob.
    bob.send(ChatMessage::new(ChatCommand::ListUsers, "Bob"));
    bob.expect_server_msg("Current active users:\nBob");

    handle.shutdown().expect("clean shutdown");
}

#[test]
fn shutdown_closes_every_session() {
    let handle = start_server();
    let mut alice = Peer::join(handle.local_addr(), "Alice");
    let mut bob = Peer::join(handle.local_addr(), "Bob");
    alice.expect_server_msg("Bob joined to the chat.");
    let mut carol = Peer::join(handle.local_addr(), "Carol");
    alice.expect_server_msg("Carol joined to the chat.");
    bob.expect_server_msg("Carol joined to the chat.");

    handle.shutdown().expect("clean shutdown");

    for peer in [&mut alice, &mut bob, &mut carol] {
        peer.expect_closed();
    }
}

#[test]
fn handshake_must_start_with_connect() {
    let handle = start_server();

    let stream = TcpStream::connect(handle.local_addr()).expect("connect");
    stream
        .set_read_timeout(Some(RECV_TIMEOUT))
        .expect("set timeout");
    let body = ChatMessage::new(ChatCommand::Broadcast, "Sneaky")
        .with_msg("no handshake")
        .encode()
        .expect("encode");
    FrameWriter::new(&stream).write_frame(&body).expect("send");

    // Refused without a reply: the socket just closes.
    let mut reader = FrameReader::new(stream.try_clone().expect("clone"));
    match reader.read_frame() {
        Ok(None) => {}
        Err(FrameError::Io(err)) if err.kind() == io::ErrorKind::ConnectionReset => {}
        other => panic!("expected close, got {other:?}"),
    }

    handle.shutdown().expect("clean shutdown");
}
