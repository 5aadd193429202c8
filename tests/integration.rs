//! End-to-end scenarios exercised over real loopback sockets, driving the
//! whole Acceptor → Event Loop → Connection Pair pipeline the way a real
//! IRC client would.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use rust_irc::server::{self, ServerConfig};

fn test_server_config() -> ServerConfig {
    ServerConfig {
        server_name: "irc.test".to_string(),
        server_info: "test server".to_string(),
        version: "rust_irc-test".to_string(),
        created_date: "today".to_string(),
        motd: "hello".to_string(),
        wakeup_time: Duration::from_millis(20),
        ping_time: Duration::from_millis(200),
        dead_time: Duration::from_millis(400),
    }
}

async fn spawn_server(operators: HashMap<String, String>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = test_server_config();
    tokio::spawn(server::run(listener, config, operators));
    addr
}

async fn connect(addr: std::net::SocketAddr) -> (BufReader<tokio::net::tcp::OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, write) = stream.into_split();
    (BufReader::new(read), write)
}

async fn send(write: &mut tokio::net::tcp::OwnedWriteHalf, line: &str) {
    write.write_all(line.as_bytes()).await.unwrap();
    write.write_all(b"\r\n").await.unwrap();
}

async fn recv_line(read: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
    let mut line = String::new();
    read.read_line(&mut line).await.unwrap();
    line.trim_end_matches(['\r', '\n']).to_string()
}

async fn register(addr: std::net::SocketAddr, nick: &str) -> (BufReader<tokio::net::tcp::OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf) {
    let (mut read, mut write) = connect(addr).await;
    send(&mut write, &format!("NICK {}", nick)).await;
    send(&mut write, &format!("USER {} 0 * :{} Realname", nick, nick)).await;
    for _ in 0..9 {
        recv_line(&mut read).await;
    }
    (read, write)
}

#[tokio::test]
async fn registration_welcome_block() {
    let addr = spawn_server(HashMap::new()).await;
    let (mut read, mut write) = connect(addr).await;

    send(&mut write, "NICK alice").await;
    send(&mut write, "USER alice 0 * :Alice").await;

    let welcome = recv_line(&mut read).await;
    assert!(welcome.contains(" 001 "), "{welcome}");
    assert!(recv_line(&mut read).await.contains(" 002 "));
    assert!(recv_line(&mut read).await.contains(" 003 "));
    assert!(recv_line(&mut read).await.contains(" 004 "));
    assert!(recv_line(&mut read).await.contains(" 251 "));
    assert!(recv_line(&mut read).await.contains(" 255 "));
    assert!(recv_line(&mut read).await.contains(" 375 "));
    assert!(recv_line(&mut read).await.contains(" 372 "));
    assert!(recv_line(&mut read).await.contains(" 376 "));
}

#[tokio::test]
async fn join_names_part() {
    let addr = spawn_server(HashMap::new()).await;
    let (mut alice_read, mut alice_write) = register(addr, "alice").await;

    send(&mut alice_write, "JOIN #lobby").await;
    let join = recv_line(&mut alice_read).await;
    assert!(join.starts_with(":alice!~alice@"));
    assert!(join.contains("JOIN"));
    let names = recv_line(&mut alice_read).await;
    assert!(names.contains(" 353 "));
    assert!(names.ends_with(":alice"));
    let end_names = recv_line(&mut alice_read).await;
    assert!(end_names.contains(" 366 "));

    let (mut bob_read, mut bob_write) = register(addr, "bob").await;
    send(&mut bob_write, "JOIN #lobby").await;
    recv_line(&mut bob_read).await;
    let bob_names = recv_line(&mut bob_read).await;
    assert!(bob_names.contains("alice") && bob_names.contains("bob"));
    recv_line(&mut bob_read).await;

    let alice_sees_bob = recv_line(&mut alice_read).await;
    assert!(alice_sees_bob.starts_with(":bob!~bob@"));
    assert!(alice_sees_bob.contains("JOIN"));

    send(&mut alice_write, "PART #lobby :bye").await;
    let alice_part = recv_line(&mut alice_read).await;
    assert!(alice_part.starts_with(":alice!~alice@"));
    assert!(alice_part.contains("PART #lobby :bye"));
    let bob_part = recv_line(&mut bob_read).await;
    assert_eq!(alice_part, bob_part);
}

#[tokio::test]
async fn nick_collision() {
    let addr = spawn_server(HashMap::new()).await;
    let (_alice_read, _alice_write) = register(addr, "alice").await;

    let (mut other_read, mut other_write) = connect(addr).await;
    send(&mut other_write, "NICK alice").await;
    let reply = recv_line(&mut other_read).await;
    assert!(reply.contains(" 432 "));
    assert!(reply.contains("Nickname is already in use"));
}

#[tokio::test]
async fn privmsg_to_channel() {
    let addr = spawn_server(HashMap::new()).await;
    let (mut alice_read, mut alice_write) = register(addr, "alice").await;
    let (mut bob_read, mut bob_write) = register(addr, "bob").await;
    let (mut carol_read, mut carol_write) = register(addr, "carol").await;

    // Join one at a time, draining each joiner's own echo before the next
    // JOIN is sent, so every peer broadcast lands in a known order.
    send(&mut alice_write, "JOIN #lobby").await;
    for _ in 0..3 {
        recv_line(&mut alice_read).await;
    }

    send(&mut bob_write, "JOIN #lobby").await;
    for _ in 0..3 {
        recv_line(&mut bob_read).await;
    }
    recv_line(&mut alice_read).await; // alice sees bob's JOIN

    send(&mut carol_write, "JOIN #lobby").await;
    for _ in 0..3 {
        recv_line(&mut carol_read).await;
    }
    recv_line(&mut bob_read).await; // bob sees carol's JOIN
    recv_line(&mut alice_read).await; // alice sees carol's JOIN

    send(&mut alice_write, "PRIVMSG #lobby :hi").await;
    let bob_line = recv_line(&mut bob_read).await;
    assert!(bob_line.starts_with(":alice!~alice@"));
    assert!(bob_line.contains("PRIVMSG #lobby :hi"));
    let carol_line = recv_line(&mut carol_read).await;
    assert_eq!(bob_line, carol_line);
}

#[tokio::test]
async fn oper_and_user_mode() {
    let mut operators = HashMap::new();
    operators.insert("admin".to_string(), "secret".to_string());
    let addr = spawn_server(operators).await;
    let (mut read, mut write) = register(addr, "alice").await;

    send(&mut write, "OPER admin secret").await;
    let mode_echo = recv_line(&mut read).await;
    assert!(mode_echo.contains("MODE") && mode_echo.contains("+o"));
    let oper_reply = recv_line(&mut read).await;
    assert!(oper_reply.contains(" 381 "));

    send(&mut write, "MODE alice").await;
    let umode = recv_line(&mut read).await;
    assert!(umode.contains(" 221 ") && umode.contains("+o"));
}
