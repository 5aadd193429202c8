use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::codec::Message;

/// A connected user. Mutated exclusively by the event loop (spec §3).
#[derive(Debug)]
pub struct Client {
    pub id: u64,
    pub peer_ip: IpAddr,
    pub nickname: String,
    pub username: String,
    pub realname: String,
    pub registered: bool,
    pub modes: HashSet<char>,
    pub channels: HashSet<String>,
    pub last_activity: Instant,
    pub last_ping: Instant,
    pub outbox: mpsc::Sender<Message>,
}

impl Client {
    pub fn new(id: u64, peer_ip: IpAddr, outbox: mpsc::Sender<Message>) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer_ip,
            nickname: String::new(),
            username: String::new(),
            realname: String::new(),
            registered: false,
            modes: HashSet::new(),
            channels: HashSet::new(),
            last_activity: now,
            last_ping: now,
            outbox,
        }
    }

    /// The `nick!~user@ip` source identity this client's messages carry.
    pub fn prefix(&self) -> String {
        format!("{}!~{}@{}", self.nickname, self.username, self.peer_ip)
    }

    /// Nickname to address replies to, `*` before one has been claimed.
    pub fn display_nick(&self) -> &str {
        if self.nickname.is_empty() {
            "*"
        } else {
            &self.nickname
        }
    }
}
