//! The Protocol Dispatcher (spec §4.5). Runs inside the event loop, so it
//! is single-threaded with respect to state; every handler either enqueues
//! replies on a Client's outbox or completes without side effect.

use std::collections::HashSet;

use crate::codec::{Message, MAX_LINE_LEN};
use crate::names;
use crate::numeric::*;
use crate::server::Server;

impl Server {
    /// Common preamble, then routes to the per-command handler.
    pub(crate) async fn dispatch(&mut self, client_id: u64, message: Message) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_activity = std::time::Instant::now();
        } else {
            return;
        }

        if message.prefix.is_some() {
            self.send_error(client_id, "Do not send a prefix").await;
            return;
        }

        let command = message.command.to_uppercase();
        if command == "CAP" {
            return;
        }

        let registered = self
            .clients
            .get(&client_id)
            .map(|c| c.registered)
            .unwrap_or(false);

        if !registered && !matches!(command.as_str(), "NICK" | "USER" | "QUIT" | "PONG") {
            self.reply_numeric(client_id, ERR_NOTREGISTERED, &["You have not registered."])
                .await;
            return;
        }

        match command.as_str() {
            "NICK" => self.cmd_nick(client_id, message).await,
            "USER" => self.cmd_user(client_id, message).await,
            "JOIN" => self.cmd_join(client_id, message).await,
            "PART" => self.cmd_part(client_id, message).await,
            "PRIVMSG" => self.cmd_privmsg(client_id, message).await,
            "LUSERS" => self.cmd_lusers(client_id).await,
            "MOTD" => self.cmd_motd(client_id).await,
            "QUIT" => self.cmd_quit(client_id, message).await,
            "PING" => self.cmd_ping(client_id, message).await,
            "PONG" => {}
            "DIE" => self.cmd_die().await,
            "WHOIS" => self.cmd_whois(client_id, message).await,
            "OPER" => self.cmd_oper(client_id, message).await,
            "MODE" => self.cmd_mode(client_id, message).await,
            "WHO" => self.cmd_who(client_id, message).await,
            other => {
                self.reply_numeric(client_id, ERR_UNKNOWNCOMMAND, &[other, "Unknown command"])
                    .await;
            }
        }
    }

    // -- NICK -------------------------------------------------------------

    async fn cmd_nick(&mut self, client_id: u64, message: Message) {
        let Some(raw) = message.all_params().into_iter().next() else {
            self.reply_numeric(client_id, ERR_NONICKNAMEGIVEN, &["No nickname given"])
                .await;
            return;
        };

        let Some(canon) = names::validate_nick(&raw) else {
            self.reply_numeric(client_id, ERR_ERRONEUSNICKNAME, &[&raw, "Erroneous nickname"])
                .await;
            return;
        };

        if let Some(&holder) = self.nicks.get(&canon) {
            if holder != client_id {
                self.reply_numeric(
                    client_id,
                    ERR_ERRONEUSNICKNAME,
                    &[&raw, "Nickname is already in use"],
                )
                .await;
                return;
            }
        }

        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        let registered = client.registered;
        let old_nick = client.nickname.clone();
        let old_prefix = client.prefix();
        let new_nick = raw.clone();

        if registered {
            let recipients = self.channel_peer_union(client_id);
            let nick_msg = Message::new("NICK")
                .with_prefix(old_prefix)
                .trailing(new_nick.clone());
            if recipients.is_empty() {
                self.send_to(client_id, nick_msg).await;
            } else {
                for peer in recipients {
                    self.send_to(peer, nick_msg.clone()).await;
                }
            }
        }

        if !old_nick.is_empty() {
            self.nicks.remove(&old_nick);
        }
        self.nicks.insert(canon, client_id);
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.nickname = new_nick;
        }
    }

    // -- USER ---------------------------------------------------------------

    async fn cmd_user(&mut self, client_id: u64, message: Message) {
        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        if client.registered {
            self.reply_numeric(
                client_id,
                ERR_ALREADYREGISTRED,
                &["Unauthorized command (already registered)"],
            )
            .await;
            return;
        }
        if client.nickname.is_empty() {
            self.send_error(client_id, "Please send NICK first").await;
            return;
        }

        let params = message.all_params();
        if params.len() != 4 {
            self.reply_numeric(
                client_id,
                ERR_NEEDMOREPARAMS,
                &["USER", "Not enough parameters"],
            )
            .await;
            return;
        }

        let username = params[0].clone();
        let realname = params[3].clone();
        if realname.len() > 64 {
            self.reply_numeric(
                client_id,
                ERR_NEEDMOREPARAMS,
                &["USER", "Not enough parameters"],
            )
            .await;
            return;
        }

        if let Some(client) = self.clients.get_mut(&client_id) {
            client.username = username;
            client.realname = realname;
            client.registered = true;
        }

        self.send_welcome(client_id).await;
        self.cmd_lusers(client_id).await;
        self.cmd_motd(client_id).await;
    }

    async fn send_welcome(&mut self, client_id: u64) {
        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        let nick = client.nickname.clone();
        let server_name = self.config.server_name.clone();
        let version = self.config.version.clone();
        let created = self.config.created_date.clone();

        self.reply_numeric(
            client_id,
            RPL_WELCOME,
            &[&format!(
                "Welcome to the Internet Relay Network {}",
                nick
            )],
        )
        .await;
        self.reply_numeric(
            client_id,
            RPL_YOURHOST,
            &[&format!(
                "Your host is {}, running version {}",
                server_name, version
            )],
        )
        .await;
        self.reply_numeric(
            client_id,
            RPL_CREATED,
            &[&format!("This server was created {}", created)],
        )
        .await;
        self.reply_numeric(
            client_id,
            RPL_MYINFO,
            &[&server_name, &version, "o", "n"],
        )
        .await;
    }

    // -- JOIN -----------------------------------------------------------

    async fn cmd_join(&mut self, client_id: u64, message: Message) {
        let params = message.all_params();
        let Some(raw) = params.into_iter().next() else {
            self.reply_numeric(
                client_id,
                ERR_NEEDMOREPARAMS,
                &["JOIN", "Not enough parameters"],
            )
            .await;
            return;
        };

        if raw == "0" {
            let channels: Vec<String> = self
                .clients
                .get(&client_id)
                .map(|c| c.channels.iter().cloned().collect())
                .unwrap_or_default();
            for chan in channels {
                self.part_channel(client_id, &chan, None).await;
            }
            return;
        }

        let Some(canon) = names::validate_channel(&raw) else {
            self.reply_numeric(client_id, ERR_NOSUCHCHANNEL, &[&raw, "No such channel"])
                .await;
            return;
        };

        let already_member = self
            .clients
            .get(&client_id)
            .map(|c| c.channels.contains(&canon))
            .unwrap_or(false);
        if already_member {
            self.send_error(client_id, "You are on that channel").await;
            return;
        }

        let channel = self
            .channels
            .entry(canon.clone())
            .or_insert_with(|| crate::channel::Channel::new(canon.clone()));
        let existing_members: Vec<u64> = channel.members.iter().copied().collect();
        channel.members.insert(client_id);

        if let Some(client) = self.clients.get_mut(&client_id) {
            client.channels.insert(canon.clone());
        }

        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        let prefix = client.prefix();
        let nick = client.nickname.clone();

        let join_msg = Message::new("JOIN")
            .with_prefix(prefix.clone())
            .trailing(canon.clone());
        self.send_to(client_id, join_msg.clone()).await;

        let mut names_list = vec![nick.clone()];
        for member_id in &existing_members {
            if let Some(member) = self.clients.get(member_id) {
                names_list.push(member.nickname.clone());
            }
        }
        self.reply_numeric(
            client_id,
            RPL_NAMREPLY,
            &["=", &canon, &names_list.join(" ")],
        )
        .await;
        self.reply_numeric(
            client_id,
            RPL_ENDOFNAMES,
            &[&canon, "End of NAMES list"],
        )
        .await;

        for member_id in existing_members {
            self.send_to(member_id, join_msg.clone()).await;
        }
    }

    // -- PART -------------------------------------------------------------

    async fn cmd_part(&mut self, client_id: u64, message: Message) {
        let params = message.all_params();
        let Some(raw) = params.first().cloned() else {
            self.reply_numeric(
                client_id,
                ERR_NEEDMOREPARAMS,
                &["PART", "Not enough parameters"],
            )
            .await;
            return;
        };
        let msg = params.get(1).cloned();

        let Some(canon) = names::validate_channel(&raw) else {
            self.reply_numeric(client_id, ERR_NOSUCHCHANNEL, &[&raw, "No such channel"])
                .await;
            return;
        };
        if !self.channels.contains_key(&canon) {
            self.reply_numeric(client_id, ERR_NOSUCHCHANNEL, &[&canon, "No such channel"])
                .await;
            return;
        }
        let is_member = self
            .clients
            .get(&client_id)
            .map(|c| c.channels.contains(&canon))
            .unwrap_or(false);
        if !is_member {
            self.reply_numeric(
                client_id,
                ERR_NOSUCHCHANNEL,
                &[&canon, "You're not on that channel"],
            )
            .await;
            return;
        }

        self.part_channel(client_id, &canon, msg).await;
    }

    /// Broadcasts `PART` to every member (including the parter), removes
    /// the client from the channel, and deletes the channel if emptied.
    async fn part_channel(&mut self, client_id: u64, canon: &str, msg: Option<String>) {
        let Some(channel) = self.channels.get(canon) else {
            return;
        };
        let members: Vec<u64> = channel.members.iter().copied().collect();

        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        let prefix = client.prefix();

        let mut part_msg = Message::new("PART")
            .with_prefix(prefix)
            .param(canon.to_string());
        if let Some(text) = msg {
            part_msg = part_msg.trailing(text);
        }

        for member_id in members {
            self.send_to(member_id, part_msg.clone()).await;
        }

        if let Some(client) = self.clients.get_mut(&client_id) {
            client.channels.remove(canon);
        }
        if let Some(channel) = self.channels.get_mut(canon) {
            channel.members.remove(&client_id);
            if channel.members.is_empty() {
                self.channels.remove(canon);
            }
        }
    }

    // -- PRIVMSG ------------------------------------------------------------

    async fn cmd_privmsg(&mut self, client_id: u64, message: Message) {
        let mut params = message.params.clone();
        let target = if !params.is_empty() {
            Some(params.remove(0))
        } else {
            None
        };
        let Some(target) = target else {
            self.reply_numeric(client_id, ERR_NORECIPIENT, &["No recipient given (PRIVMSG)"])
                .await;
            return;
        };

        let Some(mut text) = message.trailing.clone().or_else(|| params.into_iter().next())
        else {
            self.reply_numeric(client_id, ERR_NOTEXTTOSEND, &["No text to send"]).await;
            return;
        };

        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        let prefix = client.prefix();

        let overhead = format!(":{} PRIVMSG {} :\r\n", prefix, target).len();
        if overhead + text.len() > MAX_LINE_LEN {
            let budget = MAX_LINE_LEN.saturating_sub(overhead);
            let mut cut = budget.min(text.len());
            while cut > 0 && !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }

        if let Some(canon) = target.strip_prefix('#') {
            let canon = format!("#{}", names::canonical(canon));
            let Some(channel) = self.channels.get(&canon) else {
                if names::validate_channel(&target).is_none() {
                    self.reply_numeric(client_id, ERR_CANNOTSENDTOCHAN, &[&target, "No such channel"])
                        .await;
                } else {
                    self.reply_numeric(client_id, ERR_NOSUCHCHANNEL, &[&target, "No such channel"])
                        .await;
                }
                return;
            };
            let is_member = channel.members.contains(&client_id);
            if !is_member {
                self.reply_numeric(
                    client_id,
                    ERR_CANNOTSENDTOCHAN,
                    &[&canon, "Cannot send to channel"],
                )
                .await;
                return;
            }
            let recipients: Vec<u64> = channel
                .members
                .iter()
                .copied()
                .filter(|&id| id != client_id)
                .collect();
            let privmsg = Message::new("PRIVMSG")
                .with_prefix(prefix)
                .param(canon)
                .trailing(text);
            for recipient in recipients {
                self.send_to(recipient, privmsg.clone()).await;
            }
        } else {
            let Some(canon) = names::validate_nick(&target) else {
                self.reply_numeric(client_id, ERR_NOSUCHNICK, &[&target, "No such nick/channel"])
                    .await;
                return;
            };
            let Some(&recipient) = self.nicks.get(&canon) else {
                self.reply_numeric(client_id, ERR_NOSUCHNICK, &[&target, "No such nick/channel"])
                    .await;
                return;
            };
            let privmsg = Message::new("PRIVMSG")
                .with_prefix(prefix)
                .param(target)
                .trailing(text);
            self.send_to(recipient, privmsg).await;
        }
    }

    // -- LUSERS / MOTD ------------------------------------------------------

    async fn cmd_lusers(&mut self, client_id: u64) {
        let total = self.clients.len();
        self.reply_numeric(
            client_id,
            RPL_LUSERCLIENT,
            &[&format!("There are {} users and 0 services on 1 server", total)],
        )
        .await;

        let unknown = self.clients.len().saturating_sub(self.nicks.len());
        if unknown > 0 {
            self.reply_numeric(
                client_id,
                RPL_LUSERUNKNOWN,
                &[&unknown.to_string(), "unknown connection(s)"],
            )
            .await;
        }

        if !self.channels.is_empty() {
            self.reply_numeric(
                client_id,
                RPL_LUSERCHANNELS,
                &[&self.channels.len().to_string(), "channels formed"],
            )
            .await;
        }

        self.reply_numeric(
            client_id,
            RPL_LUSERME,
            &[&format!("I have {} clients and 1 servers", total)],
        )
        .await;
    }

    async fn cmd_motd(&mut self, client_id: u64) {
        let server_name = self.config.server_name.clone();
        let motd = self.config.motd.clone();
        self.reply_numeric(
            client_id,
            RPL_MOTDSTART,
            &[&format!("- {} Message of the day -", server_name)],
        )
        .await;
        self.reply_numeric(client_id, RPL_MOTD, &[&format!("- {}", motd)]).await;
        self.reply_numeric(client_id, RPL_ENDOFMOTD, &["End of MOTD command"]).await;
    }

    // -- QUIT / PING ----------------------------------------------------------

    async fn cmd_quit(&mut self, client_id: u64, message: Message) {
        let reason = message
            .all_params()
            .into_iter()
            .next()
            .unwrap_or_else(|| "Client Quit".to_string());
        let prefixed = format!("Quit: {}", reason);
        self.quit_client(client_id, &prefixed).await;
    }

    async fn cmd_ping(&mut self, client_id: u64, message: Message) {
        let Some(server_name) = message.all_params().into_iter().next() else {
            self.reply_numeric(client_id, ERR_NOORIGIN, &["No origin specified"])
                .await;
            return;
        };
        if server_name != self.config.server_name {
            self.reply_numeric(client_id, ERR_NOSUCHSERVER, &[&server_name, "No such server"])
                .await;
            return;
        }
        let pong = Message::new("PONG").param(server_name);
        self.send_to(client_id, pong).await;
    }

    async fn cmd_die(&mut self) {
        let _ = self.notify_shutdown.send(());
    }

    // -- WHOIS --------------------------------------------------------------

    async fn cmd_whois(&mut self, client_id: u64, message: Message) {
        let Some(raw) = message.all_params().into_iter().next() else {
            self.reply_numeric(client_id, ERR_NONICKNAMEGIVEN, &["No nickname given"])
                .await;
            return;
        };
        let Some(canon) = names::validate_nick(&raw) else {
            self.reply_numeric(client_id, ERR_NOSUCHNICK, &[&raw, "No such nick/channel"])
                .await;
            return;
        };
        let Some(&target_id) = self.nicks.get(&canon) else {
            self.reply_numeric(client_id, ERR_NOSUCHNICK, &[&raw, "No such nick/channel"])
                .await;
            return;
        };
        let Some(target) = self.clients.get(&target_id) else {
            return;
        };

        let nick = target.nickname.clone();
        let username = target.username.clone();
        let ip = target.peer_ip.to_string();
        let realname = target.realname.clone();
        let is_oper = target.modes.contains(&'o');
        let idle = target.last_activity.elapsed().as_secs();
        let server_name = self.config.server_name.clone();
        let server_info = self.config.server_info.clone();

        self.reply_numeric(client_id, RPL_WHOISUSER, &[&nick, &username, &ip, "*", &realname])
            .await;
        self.reply_numeric(client_id, RPL_WHOISSERVER, &[&nick, &server_name, &server_info])
            .await;
        if is_oper {
            self.reply_numeric(client_id, RPL_WHOISOPERATOR, &[&nick, "is an IRC operator"])
                .await;
        }
        self.reply_numeric(
            client_id,
            RPL_WHOISIDLE,
            &[&nick, &idle.to_string(), "seconds idle"],
        )
        .await;
        self.reply_numeric(client_id, RPL_ENDOFWHOIS, &[&nick, "End of WHOIS list"])
            .await;
    }

    // -- OPER -----------------------------------------------------------------

    async fn cmd_oper(&mut self, client_id: u64, message: Message) {
        let params = message.all_params();
        if params.len() < 2 {
            self.reply_numeric(
                client_id,
                ERR_NEEDMOREPARAMS,
                &["OPER", "Not enough parameters"],
            )
            .await;
            return;
        }
        let name = &params[0];
        let password = &params[1];

        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        if client.modes.contains(&'o') {
            self.send_error(client_id, "You are already an IRC operator")
                .await;
            return;
        }

        let matches = self
            .operators
            .get(name)
            .map(|stored| stored == password)
            .unwrap_or(false);
        if !matches {
            self.reply_numeric(client_id, ERR_PASSWDMISMATCH, &["Password incorrect"])
                .await;
            return;
        }

        if let Some(client) = self.clients.get_mut(&client_id) {
            client.modes.insert('o');
        }

        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        let nick = client.nickname.clone();
        let mode_msg = Message::new("MODE").param(nick.clone()).param("+o");
        self.send_to(client_id, mode_msg).await;
        self.reply_numeric(client_id, RPL_YOUREOPER, &["You are now an IRC operator"])
            .await;
    }

    // -- MODE -----------------------------------------------------------------

    async fn cmd_mode(&mut self, client_id: u64, message: Message) {
        let params = message.all_params();
        let Some(target) = params.first().cloned() else {
            self.reply_numeric(
                client_id,
                ERR_NEEDMOREPARAMS,
                &["MODE", "Not enough parameters"],
            )
            .await;
            return;
        };
        let modes = params.get(1).cloned();

        if let Some(&target_id) = names::validate_nick(&target)
            .as_deref()
            .and_then(|canon| self.nicks.get(canon))
        {
            self.mode_user(client_id, target_id, modes).await;
        } else if let Some(canon) = names::validate_channel(&target) {
            if self.channels.contains_key(&canon) {
                self.mode_channel(client_id, &canon, modes).await;
            } else {
                self.reply_numeric(client_id, ERR_NOSUCHCHANNEL, &[&target, "No such channel"])
                    .await;
            }
        } else {
            self.reply_numeric(client_id, ERR_NOSUCHCHANNEL, &[&target, "No such channel"])
                .await;
        }
    }

    async fn mode_user(&mut self, client_id: u64, target_id: u64, modes: Option<String>) {
        if target_id != client_id {
            self.reply_numeric(client_id, ERR_USERSDONTMATCH, &["Cannot change mode for other users"])
                .await;
            return;
        }

        let Some(modes) = modes else {
            let Some(client) = self.clients.get(&client_id) else {
                return;
            };
            let flags: String = client.modes.iter().collect();
            self.reply_numeric(client_id, RPL_UMODEIS, &[&format!("+{}", flags)])
                .await;
            return;
        };

        let mut sign = None;
        for c in modes.chars() {
            match c {
                '+' | '-' => sign = Some(c),
                'i' | 'w' | 's' => {}
                'o' => {
                    let Some(sign) = sign else {
                        self.send_error(client_id, "Malformed MODE").await;
                        return;
                    };
                    if sign == '-' {
                        if let Some(client) = self.clients.get_mut(&client_id) {
                            client.modes.remove(&'o');
                        }
                        let Some(client) = self.clients.get(&client_id) else {
                            return;
                        };
                        let nick = client.nickname.clone();
                        let mode_msg = Message::new("MODE").param("-o").param(nick);
                        self.send_to(client_id, mode_msg).await;
                    }
                    // +o is silently ignored; operator status is gained only via OPER.
                }
                other => {
                    if sign.is_none() {
                        self.send_error(client_id, "Malformed MODE").await;
                        return;
                    }
                    self.reply_numeric(
                        client_id,
                        ERR_UMODEUNKNOWNFLAG,
                        &[&other.to_string(), "Unknown MODE flag"],
                    )
                    .await;
                    return;
                }
            }
        }
    }

    async fn mode_channel(&mut self, client_id: u64, canon: &str, modes: Option<String>) {
        let is_member = self
            .channels
            .get(canon)
            .map(|c| c.members.contains(&client_id))
            .unwrap_or(false);
        if !is_member {
            self.reply_numeric(
                client_id,
                ERR_NOTONCHANNEL,
                &[canon, "You're not on that channel"],
            )
            .await;
            return;
        }

        let Some(modes) = modes else {
            self.reply_numeric(client_id, RPL_CHANNELMODEIS, &[canon, "+n"]).await;
            return;
        };

        if modes == "b" || modes == "+b" {
            self.reply_numeric(client_id, RPL_ENDOFBANLIST, &[canon, "End of channel ban list"])
                .await;
            return;
        }

        self.reply_numeric(
            client_id,
            ERR_CHANOPRIVSNEEDED,
            &[canon, "You're not channel operator"],
        )
        .await;
    }

    // -- WHO ------------------------------------------------------------------

    async fn cmd_who(&mut self, client_id: u64, message: Message) {
        let Some(raw) = message.all_params().into_iter().next() else {
            self.reply_numeric(
                client_id,
                ERR_NEEDMOREPARAMS,
                &["WHO", "Not enough parameters"],
            )
            .await;
            return;
        };
        let Some(canon) = names::validate_channel(&raw) else {
            self.reply_numeric(client_id, ERR_NOSUCHCHANNEL, &[&raw, "No such channel"])
                .await;
            return;
        };
        let Some(channel) = self.channels.get(&canon) else {
            self.reply_numeric(client_id, ERR_NOSUCHCHANNEL, &[&canon, "No such channel"])
                .await;
            return;
        };
        let is_member = channel.members.contains(&client_id);
        if !is_member {
            self.reply_numeric(
                client_id,
                ERR_NOTONCHANNEL,
                &[&canon, "You're not on that channel"],
            )
            .await;
            return;
        }

        let members: Vec<u64> = channel.members.iter().copied().collect();
        let server_name = self.config.server_name.clone();
        for member_id in members {
            let Some(member) = self.clients.get(&member_id) else {
                continue;
            };
            let flags = if member.modes.contains(&'o') { "H*" } else { "H" };
            let hopcount_and_realname = format!("0 {}", member.realname);
            self.reply_numeric(
                client_id,
                RPL_WHOREPLY,
                &[
                    &canon,
                    &member.username,
                    &member.peer_ip.to_string(),
                    &server_name,
                    &member.nickname,
                    flags,
                    &hopcount_and_realname,
                ],
            )
            .await;
        }
        self.reply_numeric(client_id, RPL_ENDOFWHO, &[&canon, "End of WHO list"])
            .await;
    }

    // -- Client-quit procedure (§4.7) ----------------------------------------

    pub(crate) async fn quit_client(&mut self, client_id: u64, reason: &str) {
        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        let registered = client.registered;
        let prefix = client.prefix();
        let channels: Vec<String> = client.channels.iter().cloned().collect();
        let nickname = client.nickname.clone();

        if registered {
            let recipients = self.channel_peer_union(client_id);
            let quit_msg = Message::new("QUIT")
                .with_prefix(prefix)
                .trailing(reason.to_string());
            if recipients.is_empty() {
                self.send_to(client_id, quit_msg).await;
            } else {
                for peer in recipients {
                    self.send_to(peer, quit_msg.clone()).await;
                }
            }

            for canon in channels {
                if let Some(channel) = self.channels.get_mut(&canon) {
                    channel.members.remove(&client_id);
                    if channel.members.is_empty() {
                        self.channels.remove(&canon);
                    }
                }
            }
        }

        if !nickname.is_empty() {
            self.nicks.remove(&nickname);
        }

        self.send_error(client_id, reason).await;
        self.clients.remove(&client_id);
    }

    /// The union of members across every channel the client belongs to,
    /// deduplicated. Includes the client itself: it is, after all, a member
    /// of its own channels. The empty-union self-echo fallback in `cmd_nick`
    /// and `quit_client` exists precisely for the case this does NOT cover —
    /// a client in no channel at all.
    fn channel_peer_union(&self, client_id: u64) -> HashSet<u64> {
        let mut set = HashSet::new();
        if let Some(client) = self.clients.get(&client_id) {
            for canon in &client.channels {
                if let Some(channel) = self.channels.get(canon) {
                    set.extend(channel.members.iter().copied());
                }
            }
        }
        set
    }

    // -- Outbound helpers -----------------------------------------------------

    pub(crate) async fn send_to(&self, client_id: u64, message: Message) {
        if let Some(client) = self.clients.get(&client_id) {
            let _ = client.outbox.send(message).await;
        }
    }

    async fn send_error(&self, client_id: u64, text: &str) {
        self.send_to(client_id, Message::new("ERROR").trailing(text.to_string()))
            .await;
    }

    async fn reply_numeric(&self, client_id: u64, numeric: u16, params: &[&str]) {
        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        let server_name = self.config.server_name.clone();
        let nick = client.display_nick().to_string();

        let mut msg = Message::new(format!("{:03}", numeric))
            .with_prefix(server_name)
            .param(nick);
        if let Some((last, head)) = params.split_last() {
            for p in head {
                msg = msg.param(p.to_string());
            }
            msg = msg.trailing(last.to_string());
        }
        self.send_to(client_id, msg).await;
    }
}
