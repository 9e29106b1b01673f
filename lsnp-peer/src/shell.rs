//! Interactive command shell: thin adapter between stdin and the core's
//! command surface. State lives in the core; this module only parses,
//! invokes, and prints.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use lsnp_core::{Avatar, LsnpCore, Notification, OutboundAction};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

use crate::net::{self, now_epoch};

const HELP: &str = "\
Commands:
  profile <status> [avatar_path]   update own profile, broadcast PROFILE
  post <body>                      broadcast a public post to followers
  dm <user> <body>                 send a direct message
  follow <user> / unfollow <user>  subscribe to / drop a peer's posts
  like <user> <timestamp>          like a post by author and timestamp
  peers | posts | dms | groups     list state
  followers | following            list the social graph
  group create <id> <title>        create a group
  group update <id> add|remove <user>
  group msg <id> <body>            message every group member
  file_offer <user> <path>         offer a file transfer
  file_accept <file_id>            accept an incoming offer
  tictactoe_invite <user>          invite to a game (you play X)
  tictactoe_accept <game_id>       accept an invitation (you play O)
  tictactoe_move <game_id> <0..8>  claim a cell
  verbose                          toggle frame-level logging
  help                             this text
  quit                             shut down";

pub struct Shell {
    core: Arc<Mutex<LsnpCore>>,
    socket: Arc<UdpSocket>,
    bcast: SocketAddr,
    notify_tx: mpsc::UnboundedSender<Notification>,
}

impl Shell {
    pub fn new(
        core: Arc<Mutex<LsnpCore>>,
        socket: Arc<UdpSocket>,
        bcast: SocketAddr,
        notify_tx: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        Self {
            core,
            socket,
            bcast,
            notify_tx,
        }
    }

    /// Read commands until EOF or `quit`.
    pub async fn run(&self) -> std::io::Result<()> {
        println!("Type 'help' for a list of commands.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (cmd, rest) = split_word(line);
            if cmd == "quit" {
                break;
            }
            self.execute(cmd, rest).await;
        }
        Ok(())
    }

    async fn execute(&self, cmd: &str, rest: &str) {
        match cmd {
            "help" => println!("{HELP}"),
            "verbose" => {
                let on = self.core.lock().await.toggle_verbose();
                println!("Verbose mode is now {}.", if on { "ON" } else { "OFF" });
            }
            "profile" => self.cmd_profile(rest).await,
            "post" => {
                if rest.is_empty() {
                    println!("Usage: post <body>");
                    return;
                }
                let result = self.core.lock().await.post(rest, now_epoch());
                self.finish(result, "Post broadcasted.").await;
            }
            "dm" => {
                let (user, body) = split_word(rest);
                if user.is_empty() || body.is_empty() {
                    println!("Usage: dm <user> <body>");
                    return;
                }
                let result = self.core.lock().await.dm(user, body, now_epoch());
                self.finish(result, &format!("DM sent to {user}.")).await;
            }
            "follow" => {
                if rest.is_empty() {
                    println!("Usage: follow <user>");
                    return;
                }
                let result = self.core.lock().await.follow(rest, now_epoch());
                self.finish(result, &format!("You are now following {rest}."))
                    .await;
            }
            "unfollow" => {
                if rest.is_empty() {
                    println!("Usage: unfollow <user>");
                    return;
                }
                let result = self.core.lock().await.unfollow(rest, now_epoch());
                self.finish(result, &format!("You have unfollowed {rest}."))
                    .await;
            }
            "like" => {
                let (user, ts) = split_word(rest);
                let Ok(ts) = ts.parse::<u64>() else {
                    println!("Usage: like <user> <timestamp>");
                    return;
                };
                let result = self.core.lock().await.like(user, ts, now_epoch());
                self.finish(result, &format!("Like sent to {user}.")).await;
            }
            "peers" => self.print_peers().await,
            "posts" => self.print_posts().await,
            "dms" => self.print_dms().await,
            "groups" => self.print_groups().await,
            "followers" => {
                let core = self.core.lock().await;
                print_list("Your followers", core.followers());
            }
            "following" => {
                let core = self.core.lock().await;
                print_list("You follow", core.following());
            }
            "group" => self.cmd_group(rest).await,
            "file_offer" => self.cmd_file_offer(rest).await,
            "file_accept" => {
                if rest.is_empty() {
                    println!("Usage: file_accept <file_id>");
                    return;
                }
                let result = self.core.lock().await.file_accept(rest, now_epoch());
                self.finish(result, &format!("Accepted transfer {rest}.")).await;
            }
            "tictactoe_invite" => {
                if rest.is_empty() {
                    println!("Usage: tictactoe_invite <user>");
                    return;
                }
                let result = self.core.lock().await.tictactoe_invite(rest, now_epoch());
                self.finish(result, "").await;
            }
            "tictactoe_accept" => {
                if rest.is_empty() {
                    println!("Usage: tictactoe_accept <game_id>");
                    return;
                }
                let result = self.core.lock().await.tictactoe_accept(rest, now_epoch());
                self.finish(result, "").await;
            }
            "tictactoe_move" => {
                let (game_id, pos) = split_word(rest);
                let Ok(pos) = pos.parse::<u8>() else {
                    println!("Usage: tictactoe_move <game_id> <pos 0..8>");
                    return;
                };
                let result = self
                    .core
                    .lock()
                    .await
                    .tictactoe_move(game_id, pos, now_epoch());
                self.finish(result, "").await;
            }
            other => {
                println!("Unknown command: '{other}'. Type 'help' for a list of commands.");
            }
        }
    }

    async fn cmd_profile(&self, rest: &str) {
        let (status, avatar_path) = split_word(rest);
        if status.is_empty() {
            println!("Usage: profile <status> [avatar_path]");
            return;
        }
        let avatar = if avatar_path.is_empty() {
            None
        } else {
            match std::fs::read(avatar_path) {
                Ok(bytes) => Some(Avatar {
                    mime: mime_for(avatar_path),
                    bytes,
                }),
                Err(err) => {
                    println!("Could not read avatar '{avatar_path}': {err}");
                    return;
                }
            }
        };
        let result = self.core.lock().await.profile(status, avatar, now_epoch());
        self.finish(result, "Profile broadcasted.").await;
    }

    async fn cmd_group(&self, rest: &str) {
        let (sub, rest) = split_word(rest);
        match sub {
            "create" => {
                let (id, title) = split_word(rest);
                if id.is_empty() || title.is_empty() {
                    println!("Usage: group create <id> <title>");
                    return;
                }
                let title = title.trim_matches('"');
                let result = self.core.lock().await.group_create(id, title, now_epoch());
                self.finish(result, &format!("Group '{title}' created with id '{id}'."))
                    .await;
            }
            "update" => {
                let (id, rest) = split_word(rest);
                let (op, user) = split_word(rest);
                if id.is_empty() || user.is_empty() || !matches!(op, "add" | "remove") {
                    println!("Usage: group update <id> add|remove <user>");
                    return;
                }
                let (add, remove) = if op == "add" {
                    (vec![user.to_owned()], vec![])
                } else {
                    (vec![], vec![user.to_owned()])
                };
                let result = self
                    .core
                    .lock()
                    .await
                    .group_update(id, &add, &remove, now_epoch());
                self.finish(result, &format!("Group '{id}' membership updated."))
                    .await;
            }
            "msg" => {
                let (id, body) = split_word(rest);
                if id.is_empty() || body.is_empty() {
                    println!("Usage: group msg <id> <body>");
                    return;
                }
                let body = body.trim_matches('"');
                let result = self.core.lock().await.group_message(id, body, now_epoch());
                self.finish(result, &format!("Message sent to group '{id}'."))
                    .await;
            }
            _ => println!("Unknown group command. Use 'group create', 'group update' or 'group msg'."),
        }
    }

    async fn cmd_file_offer(&self, rest: &str) {
        let (user, path) = split_word(rest);
        if user.is_empty() || path.is_empty() {
            println!("Usage: file_offer <user> <path>");
            return;
        }
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) => {
                println!("Could not read '{path}': {err}");
                return;
            }
        };
        let filename = Path::new(path)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_owned());
        let result = self
            .core
            .lock()
            .await
            .file_offer(user, &filename, data, now_epoch());
        self.finish(result, "").await;
    }

    /// Dispatch a command's actions, or report its error.
    async fn finish(
        &self,
        result: Result<Vec<OutboundAction>, lsnp_core::CommandError>,
        done: &str,
    ) {
        match result {
            Ok(actions) => {
                net::dispatch(&self.socket, self.bcast, actions, &self.notify_tx).await;
                if !done.is_empty() {
                    println!("{done}");
                }
            }
            Err(err) => println!("Error: {err}"),
        }
    }

    async fn print_peers(&self) {
        let core = self.core.lock().await;
        let peers = core.peers();
        if peers.is_empty() {
            println!("No peers discovered yet. Wait for a presence broadcast.");
            return;
        }
        println!("Known peers:");
        for p in peers {
            println!("- {} ({}): {}", p.display_name, p.user_id, p.status);
        }
    }

    async fn print_posts(&self) {
        let core = self.core.lock().await;
        let posts = core.posts();
        if posts.is_empty() {
            println!("No posts received yet.");
            return;
        }
        println!("Posts from peers you follow:");
        for (i, post) in posts.iter().enumerate() {
            println!(
                "{}. (TS: {}) From {}: {}",
                i + 1,
                post.timestamp,
                post.author,
                post.content
            );
        }
    }

    async fn print_dms(&self) {
        let core = self.core.lock().await;
        let dms = core.dms();
        if dms.is_empty() {
            println!("No direct messages yet.");
            return;
        }
        println!("Direct messages:");
        for (i, dm) in dms.iter().enumerate() {
            println!("{}. From {}: {}", i + 1, dm.from, dm.content);
        }
    }

    async fn print_groups(&self) {
        let core = self.core.lock().await;
        let groups = core.groups();
        if groups.is_empty() {
            println!("No groups yet.");
            return;
        }
        println!("Groups:");
        for g in groups {
            println!(
                "- {} '{}' (owner {}, {} members)",
                g.id,
                g.title,
                g.owner,
                g.members.len()
            );
        }
    }
}

fn print_list<'a>(label: &str, items: Vec<&'a String>) {
    if items.is_empty() {
        println!("{label}: nobody yet.");
        return;
    }
    println!("{label}:");
    for item in items {
        println!("- {item}");
    }
}

/// Split off the first whitespace-delimited word; the rest keeps its spaces.
fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim_start()),
        None => (s, ""),
    }
}

fn mime_for(path: &str) -> String {
    match Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
    .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_word_keeps_body_spaces() {
        assert_eq!(split_word("dm bob@1 hello there"), ("dm", "bob@1 hello there"));
        assert_eq!(split_word("peers"), ("peers", ""));
        assert_eq!(split_word(""), ("", ""));
    }

    #[test]
    fn mime_guessing() {
        assert_eq!(mime_for("me.PNG"), "image/png");
        assert_eq!(mime_for("pic.jpeg"), "image/jpeg");
        assert_eq!(mime_for("data.bin"), "application/octet-stream");
    }
}
