//! Dispatcher: one serialized stream of inbound datagrams, timer ticks, and
//! user commands. The host performs all I/O; the core returns actions.

use std::net::SocketAddr;

use tracing::{debug, warn};

use crate::game::{GameManager, GameTickAction, LocalMove, RemoteMove};
use crate::group::{GroupManager, RemoteUpdate};
use crate::peers::{PeerDirectory, PeerRecord};
use crate::presence;
use crate::protocol::{Avatar, Frame, Scope, UserId};
use crate::social::{LikeOutcome, Post, SocialState};
use crate::token::{self, TokenError};
use crate::transfer::{
    AcceptOutcome, AckOutcome, ChunkOutcome, TickAction, TransferManager,
};
use crate::wire::{decode_frame, encode_frame, FrameTooLarge};

/// Runtime knobs, spec defaults. The host may override them from its config.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub presence_interval_secs: u64,
    pub prune_interval_secs: u64,
    pub chunk_size: u32,
    pub token_ttl_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            presence_interval_secs: presence::PRESENCE_INTERVAL_SECS,
            prune_interval_secs: presence::PRUNE_INTERVAL_SECS,
            chunk_size: crate::transfer::DEFAULT_CHUNK_SIZE,
            token_ttl_secs: token::DEFAULT_TTL_SECS,
        }
    }
}

/// What the host must do with the outcome of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    Unicast(SocketAddr, Vec<u8>),
    Broadcast(Vec<u8>),
    Notify(Notification),
}

/// A received direct message, kept for the `dms` listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMessage {
    pub from: UserId,
    pub content: String,
    pub timestamp: u64,
}

/// User-visible events. `Display` renders the exact shell line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    PeerDiscovered(UserId),
    NewPost {
        author: UserId,
        content: String,
    },
    Dm {
        from: UserId,
        content: String,
    },
    FollowerAdded(UserId),
    FollowerRemoved(UserId),
    Like {
        from: UserId,
        post_timestamp: u64,
    },
    GroupJoined {
        title: String,
    },
    GroupUpdated {
        title: String,
    },
    GroupRemoved {
        title: String,
    },
    GroupMessage {
        title: String,
        from: UserId,
        content: String,
    },
    FileOffer {
        from: UserId,
        file_id: String,
        filename: String,
        size: u64,
    },
    FileOfferSent {
        to: UserId,
        file_id: String,
        filename: String,
    },
    /// The host writes `data` to `received_<filename>` before printing.
    FileReceived {
        file_id: String,
        filename: String,
        data: Vec<u8>,
    },
    FileSent {
        file_id: String,
        filename: String,
    },
    TransferCancelled {
        file_id: String,
        filename: String,
        reason: String,
    },
    GameInvite {
        from: UserId,
        game_id: String,
    },
    GameInviteSent {
        to: UserId,
        game_id: String,
    },
    GameStarted {
        game_id: String,
        opponent: UserId,
    },
    GameMove {
        game_id: String,
        by: UserId,
        position: u8,
        board: String,
    },
    GameOver {
        game_id: String,
        text: String,
    },
    GameCancelled {
        game_id: String,
        reason: String,
    },
    Security {
        message_type: &'static str,
        from: UserId,
        reason: TokenError,
    },
    Verbose(String),
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::PeerDiscovered(id) => {
                write!(f, "[Discovery] New peer discovered: {id}")
            }
            Notification::NewPost { author, content } => {
                write!(f, "[New Post] From {author}: {content}")
            }
            Notification::Dm { from, content } => write!(f, "[DM] From {from}: {content}"),
            Notification::FollowerAdded(id) => {
                write!(f, "[Notification] User {id} has followed you.")
            }
            Notification::FollowerRemoved(id) => {
                write!(f, "[Notification] User {id} has unfollowed you.")
            }
            Notification::Like {
                from,
                post_timestamp,
            } => write!(f, "[Notification] {from} liked your post from {post_timestamp}."),
            Notification::GroupJoined { title } => {
                write!(f, "[Notification] You've been added to group: '{title}'")
            }
            Notification::GroupUpdated { title } => {
                write!(f, "[Group] Membership of '{title}' changed.")
            }
            Notification::GroupRemoved { title } => {
                write!(f, "[Notification] You were removed from group: '{title}'")
            }
            Notification::GroupMessage {
                title,
                from,
                content,
            } => write!(f, "[Group: '{title}'] {from}: {content}"),
            Notification::FileOffer {
                from,
                file_id,
                filename,
                size,
            } => write!(
                f,
                "[File Offer] {from} offers '{filename}' ({size} bytes). Accept with: file_accept {file_id}"
            ),
            Notification::FileOfferSent {
                to,
                file_id,
                filename,
            } => write!(f, "[File] Offered '{filename}' to {to} (transfer {file_id})."),
            Notification::FileReceived {
                file_id,
                filename,
                data,
            } => write!(
                f,
                "[File] Transfer {file_id} complete: '{filename}' ({} bytes) saved as received_{filename}",
                data.len()
            ),
            Notification::FileSent { file_id, filename } => {
                write!(f, "[File] '{filename}' delivered (transfer {file_id} complete).")
            }
            Notification::TransferCancelled {
                file_id,
                filename,
                reason,
            } => write!(f, "[File] Transfer {file_id} ('{filename}') cancelled: {reason}"),
            Notification::GameInvite { from, game_id } => write!(
                f,
                "[New Game] {from} invites you to tic-tac-toe. Accept with: tictactoe_accept {game_id}"
            ),
            Notification::GameInviteSent { to, game_id } => {
                write!(f, "[Game] Invitation sent to {to} (game {game_id}).")
            }
            Notification::GameStarted { game_id, opponent } => {
                write!(f, "[Game] {game_id} active against {opponent}. X moves first.")
            }
            Notification::GameMove {
                game_id,
                by,
                position,
                board,
            } => write!(f, "[Game {game_id}] {by} played cell {position}:\n{board}"),
            Notification::GameOver { text, .. } => write!(f, "[Game Over] {text}"),
            Notification::GameCancelled { game_id, reason } => {
                write!(f, "[Game] {game_id} cancelled: {reason}")
            }
            Notification::Security {
                message_type,
                from,
                reason,
            } => write!(f, "[Security] Invalid token for {message_type} from {from}: {reason}"),
            Notification::Verbose(text) => f.write_str(text),
        }
    }
}

/// User-initiated failures, reported back through the shell.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown peer {0}; wait for their presence broadcast")]
    UnknownPeer(String),
    #[error("unknown transfer {0}")]
    UnknownTransfer(String),
    #[error("command cannot target yourself")]
    SelfTarget,
    #[error(transparent)]
    Group(#[from] crate::group::GroupError),
    #[error(transparent)]
    Game(#[from] crate::game::GameError),
    #[error(transparent)]
    FrameTooLarge(#[from] FrameTooLarge),
}

/// The peer runtime. The host serializes every call; state is never shared.
pub struct LsnpCore {
    user_id: UserId,
    display_name: String,
    status: String,
    avatar: Option<Avatar>,
    verbose: bool,
    tick_count: u64,
    config: CoreConfig,
    peers: PeerDirectory,
    social: SocialState,
    groups: GroupManager,
    transfers: TransferManager,
    games: GameManager,
    dms: Vec<DirectMessage>,
}

impl LsnpCore {
    pub fn new(username: &str, ip: &str) -> Self {
        Self::with_config(username, ip, CoreConfig::default())
    }

    pub fn with_config(username: &str, ip: &str, config: CoreConfig) -> Self {
        let peer_ttl = 3 * config.presence_interval_secs;
        Self {
            user_id: format!("{username}@{ip}"),
            display_name: username.to_owned(),
            status: "Online".to_owned(),
            avatar: None,
            verbose: false,
            tick_count: 0,
            config,
            peers: PeerDirectory::new(peer_ttl),
            social: SocialState::new(),
            groups: GroupManager::new(),
            transfers: TransferManager::new(),
            games: GameManager::new(),
            dms: Vec::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn toggle_verbose(&mut self) -> bool {
        self.verbose = !self.verbose;
        self.verbose
    }

    // ------------------------------------------------------------------
    // State listings for the shell
    // ------------------------------------------------------------------

    pub fn peers(&self) -> Vec<&PeerRecord> {
        self.peers.list()
    }

    pub fn posts(&self) -> &[Post] {
        self.social.feed()
    }

    pub fn own_posts(&self) -> &[Post] {
        self.social.own_posts()
    }

    pub fn dms(&self) -> &[DirectMessage] {
        &self.dms
    }

    pub fn groups(&self) -> Vec<&crate::group::Group> {
        self.groups.list()
    }

    pub fn following(&self) -> Vec<&UserId> {
        self.social.following().collect()
    }

    pub fn followers(&self) -> Vec<&UserId> {
        self.social.followers().collect()
    }

    pub fn active_transfers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .transfers
            .outgoing_ids()
            .chain(self.transfers.incoming_ids())
            .map(str::to_owned)
            .collect();
        ids.sort();
        ids
    }

    pub fn active_games(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.games.active_ids().map(str::to_owned).collect();
        ids.sort();
        ids
    }

    // ------------------------------------------------------------------
    // Inbound datagrams
    // ------------------------------------------------------------------

    pub fn handle_datagram(
        &mut self,
        bytes: &[u8],
        src: SocketAddr,
        now: u64,
    ) -> Vec<OutboundAction> {
        let mut out = Vec::new();
        if self.verbose {
            out.push(OutboundAction::Notify(Notification::Verbose(format!(
                "RECV from {src} ({} bytes):\n{}",
                bytes.len(),
                String::from_utf8_lossy(bytes).trim_end()
            ))));
        }
        let map = match decode_frame(bytes) {
            Ok(map) => map,
            Err(err) => {
                debug!(%src, %err, "dropping undecodable datagram");
                if self.verbose {
                    out.push(OutboundAction::Notify(Notification::Verbose(format!(
                        "DROP from {src}: {err}"
                    ))));
                }
                return out;
            }
        };
        let frame = match Frame::from_wire(&map) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(%src, %err, "dropping invalid frame");
                if self.verbose {
                    out.push(OutboundAction::Notify(Notification::Verbose(format!(
                        "DROP from {src}: {err} (parsed {map:?})"
                    ))));
                }
                return out;
            }
        };
        // Our own broadcasts come back to us; ignore them.
        if frame.sender() == self.user_id {
            return out;
        }
        if self.peers.observe(frame.sender(), src, now) {
            out.push(OutboundAction::Notify(Notification::PeerDiscovered(
                frame.sender().to_owned(),
            )));
        }
        if let Some(required) = frame.required_scope() {
            let verdict = match frame.token() {
                Some(tok) => token::validate(tok, frame.sender(), required, now),
                None if frame.token_optional() => Ok(()),
                None => Err(TokenError::BadFormat),
            };
            if let Err(reason) = verdict {
                out.push(OutboundAction::Notify(Notification::Security {
                    message_type: frame.type_name(),
                    from: frame.sender().to_owned(),
                    reason,
                }));
                return out;
            }
        }
        self.route(frame, src, now, &mut out);
        out
    }

    fn route(&mut self, frame: Frame, src: SocketAddr, now: u64, out: &mut Vec<OutboundAction>) {
        match frame {
            Frame::Ping { .. } => {}
            Frame::Profile {
                user_id,
                display_name,
                status,
                avatar,
                ..
            } => {
                self.peers
                    .apply_profile(&user_id, &display_name, &status, avatar);
            }
            Frame::Post {
                user_id,
                content,
                timestamp,
                ..
            } => {
                if self.social.accept_post(&user_id, &content, timestamp) {
                    out.push(OutboundAction::Notify(Notification::NewPost {
                        author: user_id,
                        content,
                    }));
                } else {
                    debug!(author = %user_id, "post from non-followed author dropped");
                }
            }
            Frame::Dm {
                from,
                to,
                content,
                timestamp,
                ..
            } => {
                if to != self.user_id {
                    debug!(%to, "misaddressed DM dropped");
                    return;
                }
                self.dms.push(DirectMessage {
                    from: from.clone(),
                    content: content.clone(),
                    timestamp,
                });
                out.push(OutboundAction::Notify(Notification::Dm { from, content }));
            }
            Frame::Follow { from, to, .. } => {
                if to == self.user_id && self.social.add_follower(&from) {
                    out.push(OutboundAction::Notify(Notification::FollowerAdded(from)));
                }
            }
            Frame::Unfollow { from, to, .. } => {
                if to == self.user_id && self.social.remove_follower(&from) {
                    out.push(OutboundAction::Notify(Notification::FollowerRemoved(from)));
                }
            }
            Frame::Like {
                from,
                to,
                post_timestamp,
                ..
            } => {
                if to != self.user_id {
                    return;
                }
                match self.social.record_like(&from, post_timestamp) {
                    LikeOutcome::New => {
                        out.push(OutboundAction::Notify(Notification::Like {
                            from,
                            post_timestamp,
                        }));
                    }
                    LikeOutcome::Duplicate => {}
                    LikeOutcome::NoSuchPost => {
                        debug!(%from, post_timestamp, "like for unknown post dropped");
                    }
                }
            }
            Frame::GroupCreate {
                from,
                group_id,
                group_name,
                members,
                ..
            } => {
                if self
                    .groups
                    .apply_remote_create(&from, &group_id, &group_name, &members, &self.user_id)
                {
                    out.push(OutboundAction::Notify(Notification::GroupJoined {
                        title: group_name,
                    }));
                }
            }
            Frame::GroupUpdate {
                from,
                group_id,
                group_name,
                members,
                ..
            } => match self.groups.apply_remote_update(
                &from,
                &group_id,
                &group_name,
                &members,
                &self.user_id,
            ) {
                RemoteUpdate::Joined { title, new_to_us } => {
                    let note = if new_to_us {
                        Notification::GroupJoined { title }
                    } else {
                        Notification::GroupUpdated { title }
                    };
                    out.push(OutboundAction::Notify(note));
                }
                RemoteUpdate::RemovedSelf { title } => {
                    out.push(OutboundAction::Notify(Notification::GroupRemoved { title }));
                }
                RemoteUpdate::Ignored => {
                    debug!(%from, %group_id, "group update from non-owner ignored");
                }
            },
            Frame::GroupMessage {
                from,
                group_id,
                content,
                ..
            } => {
                if !self.groups.is_member(&group_id, &from) {
                    debug!(%from, %group_id, "group message from non-member dropped");
                    return;
                }
                let title = self
                    .groups
                    .get(&group_id)
                    .map(|g| g.title.clone())
                    .unwrap_or_else(|| group_id.clone());
                out.push(OutboundAction::Notify(Notification::GroupMessage {
                    title,
                    from,
                    content,
                }));
            }
            Frame::FileOffer {
                from,
                file_id,
                filename,
                file_size,
                chunk_size,
                total_chunks,
                ..
            } => {
                if self.transfers.on_offer(
                    &from,
                    &file_id,
                    &filename,
                    file_size,
                    chunk_size,
                    total_chunks,
                    self.tick_count,
                ) {
                    out.push(OutboundAction::Notify(Notification::FileOffer {
                        from,
                        file_id,
                        filename,
                        size: file_size,
                    }));
                } else {
                    debug!(%file_id, "duplicate or inconsistent file offer dropped");
                }
            }
            Frame::FileAccept { from, file_id, .. } => {
                match self.transfers.on_accept(&file_id, &from, self.tick_count) {
                    AcceptOutcome::Start(seqs) => {
                        for seq in seqs {
                            self.send_chunk(&file_id, seq, now, out);
                        }
                    }
                    AcceptOutcome::Empty { filename } => {
                        let complete = Frame::FileComplete {
                            from: self.user_id.clone(),
                            to: from,
                            file_id: file_id.clone(),
                            token: self.mint(Scope::File, now),
                        };
                        self.emit_lossy(&complete, Some(src), out);
                        out.push(OutboundAction::Notify(Notification::FileSent {
                            file_id,
                            filename,
                        }));
                    }
                    AcceptOutcome::Ignored => {
                        debug!(%file_id, %from, "unmatched file accept dropped");
                    }
                }
            }
            Frame::FileChunk {
                from,
                file_id,
                seq,
                data,
                ..
            } => {
                match self
                    .transfers
                    .on_chunk(&file_id, &from, seq, data, self.tick_count)
                {
                    ChunkOutcome::Ack => {
                        self.send_ack(&file_id, seq, src, out);
                    }
                    ChunkOutcome::AckAndComplete { filename, data } => {
                        self.send_ack(&file_id, seq, src, out);
                        out.push(OutboundAction::Notify(Notification::FileReceived {
                            file_id,
                            filename,
                            data,
                        }));
                    }
                    ChunkOutcome::Invalid => {
                        debug!(%file_id, seq, "invalid file chunk dropped");
                    }
                }
            }
            Frame::FileComplete { from, file_id, .. } => {
                if let Some((filename, data)) = self.transfers.on_complete(&file_id, &from) {
                    out.push(OutboundAction::Notify(Notification::FileReceived {
                        file_id,
                        filename,
                        data,
                    }));
                }
            }
            Frame::Ack { from, file_id, seq } => {
                match self.transfers.on_ack(&file_id, &from, seq, self.tick_count) {
                    AckOutcome::SendMore(seqs) => {
                        for seq in seqs {
                            self.send_chunk(&file_id, seq, now, out);
                        }
                    }
                    AckOutcome::Finished { filename, to } => {
                        let complete = Frame::FileComplete {
                            from: self.user_id.clone(),
                            to,
                            file_id: file_id.clone(),
                            token: self.mint(Scope::File, now),
                        };
                        self.emit_lossy(&complete, Some(src), out);
                        out.push(OutboundAction::Notify(Notification::FileSent {
                            file_id,
                            filename,
                        }));
                    }
                    AckOutcome::Ignored => {}
                }
            }
            Frame::TicTacToeInvite {
                from, to, game_id, ..
            } => {
                if to != self.user_id {
                    return;
                }
                if self
                    .games
                    .on_invite(&game_id, &from, &self.user_id, self.tick_count)
                {
                    out.push(OutboundAction::Notify(Notification::GameInvite {
                        from,
                        game_id,
                    }));
                }
            }
            Frame::TicTacToeAccept { from, game_id, .. } => {
                if self.games.on_accept(&game_id, &from, self.tick_count) {
                    out.push(OutboundAction::Notify(Notification::GameStarted {
                        game_id,
                        opponent: from,
                    }));
                }
            }
            Frame::TicTacToeMove {
                from,
                game_id,
                position,
                move_seq,
                ..
            } => {
                match self
                    .games
                    .on_move(&game_id, &from, position, move_seq, self.tick_count)
                {
                    RemoteMove::Applied {
                        by,
                        position,
                        outcome,
                        board,
                    } => {
                        out.push(OutboundAction::Notify(Notification::GameMove {
                            game_id: game_id.clone(),
                            by,
                            position,
                            board,
                        }));
                        if let Some(done) = outcome {
                            out.push(OutboundAction::Notify(Notification::GameOver {
                                game_id,
                                text: done.describe(),
                            }));
                        }
                    }
                    RemoteMove::Duplicate { resend } => {
                        if let Some((to, position, seq)) = resend {
                            self.send_move(&game_id, &to, position, seq, now, out);
                        }
                    }
                    RemoteMove::Rejected(err) => {
                        debug!(%game_id, %from, %err, "move rejected");
                    }
                    RemoteMove::Unknown => {
                        debug!(%game_id, "move for unknown game dropped");
                    }
                }
            }
            Frame::TicTacToeResult {
                from,
                game_id,
                result,
                ..
            } => {
                if let Some(done) = self.games.on_result(&game_id, &from, result) {
                    out.push(OutboundAction::Notify(Notification::GameOver {
                        game_id,
                        text: done.describe(),
                    }));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Timer tick, 1 Hz
    // ------------------------------------------------------------------

    pub fn tick(&mut self, now: u64) -> Vec<OutboundAction> {
        self.tick_count += 1;
        let mut out = Vec::new();

        if self.tick_count == 1 || self.tick_count % self.config.presence_interval_secs == 0 {
            let ping = presence::ping(&self.user_id);
            self.emit_lossy(&ping, None, &mut out);
            let profile = presence::profile(
                &self.user_id,
                &self.display_name,
                &self.status,
                self.avatar.clone(),
                self.mint(Scope::Broadcast, now),
            );
            self.emit_lossy(&profile, None, &mut out);
        }

        if self.tick_count % self.config.prune_interval_secs == 0 {
            for gone in self.peers.prune(now) {
                debug!(peer = %gone, "peer aged out");
                if self.verbose {
                    out.push(OutboundAction::Notify(Notification::Verbose(format!(
                        "PRUNE {gone}: no presence for {}s",
                        3 * self.config.presence_interval_secs
                    ))));
                }
            }
        }

        for action in self.transfers.tick(self.tick_count) {
            match action {
                TickAction::ResendChunk { file_id, seq, .. } => {
                    self.send_chunk(&file_id, seq, now, &mut out);
                }
                TickAction::CancelOutgoing {
                    file_id,
                    filename,
                    reason,
                    ..
                }
                | TickAction::CancelIncoming {
                    file_id,
                    filename,
                    reason,
                    ..
                } => {
                    out.push(OutboundAction::Notify(Notification::TransferCancelled {
                        file_id,
                        filename,
                        reason: reason.to_string(),
                    }));
                }
            }
        }

        for action in self.games.tick(self.tick_count) {
            match action {
                GameTickAction::ResendMove {
                    game_id,
                    to,
                    position,
                    seq,
                } => {
                    self.send_move(&game_id, &to, position, seq, now, &mut out);
                }
                GameTickAction::Abandon { game_id, .. } => {
                    out.push(OutboundAction::Notify(Notification::GameCancelled {
                        game_id,
                        reason: "no response from opponent".to_owned(),
                    }));
                }
            }
        }

        out
    }

    // ------------------------------------------------------------------
    // Commands (invoked by the shell)
    // ------------------------------------------------------------------

    /// `profile <status> [avatar]`: update own profile and broadcast it.
    pub fn profile(
        &mut self,
        status: &str,
        avatar: Option<Avatar>,
        now: u64,
    ) -> Result<Vec<OutboundAction>, CommandError> {
        self.status = status.to_owned();
        if avatar.is_some() {
            self.avatar = avatar;
        }
        let frame = presence::profile(
            &self.user_id,
            &self.display_name,
            &self.status,
            self.avatar.clone(),
            self.mint(Scope::Broadcast, now),
        );
        let mut out = Vec::new();
        self.emit(&frame, None, &mut out)?;
        Ok(out)
    }

    /// `post <body>`: append to the own-post log and broadcast.
    pub fn post(&mut self, content: &str, now: u64) -> Result<Vec<OutboundAction>, CommandError> {
        let frame = Frame::Post {
            user_id: self.user_id.clone(),
            content: content.to_owned(),
            timestamp: now,
            message_id: Some(new_message_id()),
            token: self.mint(Scope::Broadcast, now),
        };
        let mut out = Vec::new();
        self.emit(&frame, None, &mut out)?;
        self.social.record_own_post(&self.user_id, content, now);
        Ok(out)
    }

    /// `dm <user> <body>`: unicast a direct message.
    pub fn dm(
        &mut self,
        to: &str,
        content: &str,
        now: u64,
    ) -> Result<Vec<OutboundAction>, CommandError> {
        let addr = self.resolve(to)?;
        let frame = Frame::Dm {
            from: self.user_id.clone(),
            to: to.to_owned(),
            content: content.to_owned(),
            timestamp: now,
            message_id: Some(new_message_id()),
            token: self.mint(Scope::Chat, now),
        };
        let mut out = Vec::new();
        self.emit(&frame, Some(addr), &mut out)?;
        Ok(out)
    }

    /// `follow <user>`: subscribe to a peer's posts.
    pub fn follow(&mut self, target: &str, now: u64) -> Result<Vec<OutboundAction>, CommandError> {
        if target == self.user_id {
            return Err(CommandError::SelfTarget);
        }
        let addr = self.resolve(target)?;
        let frame = Frame::Follow {
            from: self.user_id.clone(),
            to: target.to_owned(),
            timestamp: now,
            message_id: Some(new_message_id()),
            token: self.mint(Scope::Follow, now),
        };
        let mut out = Vec::new();
        self.emit(&frame, Some(addr), &mut out)?;
        self.social.follow(target);
        Ok(out)
    }

    /// `unfollow <user>`.
    pub fn unfollow(
        &mut self,
        target: &str,
        now: u64,
    ) -> Result<Vec<OutboundAction>, CommandError> {
        let addr = self.resolve(target)?;
        let frame = Frame::Unfollow {
            from: self.user_id.clone(),
            to: target.to_owned(),
            timestamp: now,
            message_id: Some(new_message_id()),
            token: self.mint(Scope::Follow, now),
        };
        let mut out = Vec::new();
        self.emit(&frame, Some(addr), &mut out)?;
        self.social.unfollow(target);
        Ok(out)
    }

    /// `like <user> <timestamp>`: like a post by its author and timestamp.
    pub fn like(
        &mut self,
        author: &str,
        post_timestamp: u64,
        now: u64,
    ) -> Result<Vec<OutboundAction>, CommandError> {
        let addr = self.resolve(author)?;
        let frame = Frame::Like {
            from: self.user_id.clone(),
            to: author.to_owned(),
            post_timestamp,
            timestamp: now,
            token: self.mint(Scope::Broadcast, now),
        };
        let mut out = Vec::new();
        self.emit(&frame, Some(addr), &mut out)?;
        Ok(out)
    }

    /// `group create <id> <title>`.
    pub fn group_create(
        &mut self,
        group_id: &str,
        title: &str,
        now: u64,
    ) -> Result<Vec<OutboundAction>, CommandError> {
        let user_id = self.user_id.clone();
        self.groups.create(group_id, title, &user_id)?;
        let frame = Frame::GroupCreate {
            from: user_id.clone(),
            group_id: group_id.to_owned(),
            group_name: title.to_owned(),
            members: vec![user_id],
            timestamp: now,
            token: self.mint(Scope::Group, now),
        };
        let mut out = Vec::new();
        self.emit(&frame, None, &mut out)?;
        Ok(out)
    }

    /// `group update <id> add|remove <user>`: owner-only membership change.
    /// Every affected member gets the full resulting set.
    pub fn group_update(
        &mut self,
        group_id: &str,
        add: &[UserId],
        remove: &[UserId],
        now: u64,
    ) -> Result<Vec<OutboundAction>, CommandError> {
        // Added members must be reachable before the set is mutated.
        for user in add {
            self.resolve(user)?;
        }
        let user_id = self.user_id.clone();
        let (group, recipients) = self
            .groups
            .update_membership(group_id, &user_id, add, remove)?;
        let mut out = Vec::new();
        for member in recipients {
            let Some(addr) = self.peers.resolve(&member) else {
                warn!(%member, "group member unreachable, update not delivered");
                continue;
            };
            let frame = Frame::GroupUpdate {
                from: user_id.clone(),
                group_id: group.id.clone(),
                group_name: group.title.clone(),
                members: group.member_list(),
                timestamp: now,
                token: self.mint(Scope::Group, now),
            };
            self.emit(&frame, Some(addr), &mut out)?;
        }
        Ok(out)
    }

    /// `group msg <id> <body>`: unicast to every current member but self.
    pub fn group_message(
        &mut self,
        group_id: &str,
        content: &str,
        now: u64,
    ) -> Result<Vec<OutboundAction>, CommandError> {
        let group = self
            .groups
            .get(group_id)
            .ok_or_else(|| crate::group::GroupError::Unknown(group_id.to_owned()))?;
        if !group.members.contains(&self.user_id) {
            return Err(crate::group::GroupError::NotMember(group_id.to_owned()).into());
        }
        let members = group.member_list();
        let mut out = Vec::new();
        for member in members {
            if member == self.user_id {
                continue;
            }
            let Some(addr) = self.peers.resolve(&member) else {
                warn!(%member, "group member unreachable, message not delivered");
                continue;
            };
            let frame = Frame::GroupMessage {
                from: self.user_id.clone(),
                group_id: group_id.to_owned(),
                content: content.to_owned(),
                timestamp: now,
                token: self.mint(Scope::Chat, now),
            };
            self.emit(&frame, Some(addr), &mut out)?;
        }
        Ok(out)
    }

    /// `file_offer <user> <path>`: the host reads the file; the core chunks
    /// it and keeps it in memory until the last ACK.
    pub fn file_offer(
        &mut self,
        to: &str,
        filename: &str,
        data: Vec<u8>,
        now: u64,
    ) -> Result<Vec<OutboundAction>, CommandError> {
        let addr = self.resolve(to)?;
        let file_id = crate::transfer::new_file_id();
        let (file_size, chunk_size, total_chunks) = {
            let transfer = self.transfers.start_outgoing(
                &file_id,
                to,
                filename,
                data,
                self.config.chunk_size,
                self.tick_count,
            );
            (transfer.file_size(), transfer.chunk_size, transfer.total_chunks)
        };
        let frame = Frame::FileOffer {
            from: self.user_id.clone(),
            to: to.to_owned(),
            file_id: file_id.clone(),
            filename: filename.to_owned(),
            file_size,
            chunk_size,
            total_chunks,
            timestamp: now,
            token: self.mint(Scope::File, now),
        };
        let mut out = Vec::new();
        if let Err(err) = self.emit(&frame, Some(addr), &mut out) {
            self.transfers.cancel(&file_id);
            return Err(err.into());
        }
        out.push(OutboundAction::Notify(Notification::FileOfferSent {
            to: to.to_owned(),
            file_id,
            filename: filename.to_owned(),
        }));
        Ok(out)
    }

    /// `file_accept <file_id>`: accept a pending inbound offer.
    pub fn file_accept(
        &mut self,
        file_id: &str,
        now: u64,
    ) -> Result<Vec<OutboundAction>, CommandError> {
        let sender = self
            .transfers
            .accept_local(file_id, self.tick_count)
            .ok_or_else(|| CommandError::UnknownTransfer(file_id.to_owned()))?;
        let addr = self.resolve(&sender)?;
        let frame = Frame::FileAccept {
            from: self.user_id.clone(),
            to: sender,
            file_id: file_id.to_owned(),
            token: self.mint(Scope::File, now),
        };
        let mut out = Vec::new();
        self.emit(&frame, Some(addr), &mut out)?;
        Ok(out)
    }

    /// `tictactoe_invite <user>`: we play X.
    pub fn tictactoe_invite(
        &mut self,
        opponent: &str,
        now: u64,
    ) -> Result<Vec<OutboundAction>, CommandError> {
        if opponent == self.user_id {
            return Err(CommandError::SelfTarget);
        }
        let addr = self.resolve(opponent)?;
        let game_id = crate::game::new_game_id();
        self.games
            .invite_local(&game_id, &self.user_id, opponent, self.tick_count);
        let frame = Frame::TicTacToeInvite {
            from: self.user_id.clone(),
            to: opponent.to_owned(),
            game_id: game_id.clone(),
            symbol: "X".to_owned(),
            timestamp: now,
            token: self.mint(Scope::Game, now),
        };
        let mut out = Vec::new();
        self.emit(&frame, Some(addr), &mut out)?;
        out.push(OutboundAction::Notify(Notification::GameInviteSent {
            to: opponent.to_owned(),
            game_id,
        }));
        Ok(out)
    }

    /// `tictactoe_accept <game_id>`: accept as O; X moves first.
    pub fn tictactoe_accept(
        &mut self,
        game_id: &str,
        now: u64,
    ) -> Result<Vec<OutboundAction>, CommandError> {
        let inviter = self.games.accept_local(game_id, self.tick_count)?;
        let addr = self.resolve(&inviter)?;
        let frame = Frame::TicTacToeAccept {
            from: self.user_id.clone(),
            to: inviter.clone(),
            game_id: game_id.to_owned(),
            token: self.mint(Scope::Game, now),
        };
        let mut out = Vec::new();
        self.emit(&frame, Some(addr), &mut out)?;
        out.push(OutboundAction::Notify(Notification::GameStarted {
            game_id: game_id.to_owned(),
            opponent: inviter,
        }));
        Ok(out)
    }

    /// `tictactoe_move <game_id> <pos>`: play a cell; on a terminal move the
    /// result is sent to the opponent alongside the move itself.
    pub fn tictactoe_move(
        &mut self,
        game_id: &str,
        position: u8,
        now: u64,
    ) -> Result<Vec<OutboundAction>, CommandError> {
        let user_id = self.user_id.clone();
        let LocalMove {
            seq,
            opponent,
            outcome,
            board,
        } = self
            .games
            .play_local(game_id, &user_id, position, self.tick_count)?;
        let addr = self.resolve(&opponent)?;
        let mut out = Vec::new();
        let mv = Frame::TicTacToeMove {
            from: user_id.clone(),
            to: opponent.clone(),
            game_id: game_id.to_owned(),
            position,
            move_seq: seq,
            token: self.mint(Scope::Game, now),
        };
        self.emit(&mv, Some(addr), &mut out)?;
        out.push(OutboundAction::Notify(Notification::GameMove {
            game_id: game_id.to_owned(),
            by: user_id.clone(),
            position,
            board,
        }));
        if let Some(done) = outcome {
            let result = Frame::TicTacToeResult {
                from: user_id,
                to: opponent,
                game_id: game_id.to_owned(),
                result: done.outcome,
                token: self.mint(Scope::Game, now),
            };
            self.emit(&result, Some(addr), &mut out)?;
            out.push(OutboundAction::Notify(Notification::GameOver {
                game_id: game_id.to_owned(),
                text: done.describe(),
            }));
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn mint(&self, scope: Scope, now: u64) -> String {
        token::issue(&self.user_id, scope, self.config.token_ttl_secs, now)
    }

    fn resolve(&self, user: &str) -> Result<SocketAddr, CommandError> {
        self.peers
            .resolve(user)
            .ok_or_else(|| CommandError::UnknownPeer(user.to_owned()))
    }

    /// Encode and queue a frame; oversized frames surface to the caller.
    fn emit(
        &self,
        frame: &Frame,
        dest: Option<SocketAddr>,
        out: &mut Vec<OutboundAction>,
    ) -> Result<(), FrameTooLarge> {
        let bytes = encode_frame(&frame.to_wire())?;
        if self.verbose {
            let where_to = match dest {
                Some(addr) => format!("to {addr}"),
                None => "broadcast".to_owned(),
            };
            out.push(OutboundAction::Notify(Notification::Verbose(format!(
                "SEND {where_to}:\n{}",
                String::from_utf8_lossy(&bytes).trim_end()
            ))));
        }
        out.push(match dest {
            Some(addr) => OutboundAction::Unicast(addr, bytes),
            None => OutboundAction::Broadcast(bytes),
        });
        Ok(())
    }

    /// Best-effort emit for protocol-driven traffic; failures are logged.
    fn emit_lossy(&self, frame: &Frame, dest: Option<SocketAddr>, out: &mut Vec<OutboundAction>) {
        if let Err(err) = self.emit(frame, dest, out) {
            warn!(kind = frame.type_name(), %err, "dropping outbound frame");
        }
    }

    fn send_chunk(&self, file_id: &str, seq: u32, now: u64, out: &mut Vec<OutboundAction>) {
        let Some((to, payload)) = self.transfers.chunk(file_id, seq) else {
            return;
        };
        let Some(addr) = self.peers.resolve(to) else {
            warn!(%to, "chunk destination unreachable");
            return;
        };
        let frame = Frame::FileChunk {
            from: self.user_id.clone(),
            to: to.to_owned(),
            file_id: file_id.to_owned(),
            seq,
            data: payload.to_vec(),
            token: self.mint(Scope::File, now),
        };
        self.emit_lossy(&frame, Some(addr), out);
    }

    fn send_ack(&self, file_id: &str, seq: u32, dest: SocketAddr, out: &mut Vec<OutboundAction>) {
        let frame = Frame::Ack {
            from: self.user_id.clone(),
            file_id: file_id.to_owned(),
            seq,
        };
        self.emit_lossy(&frame, Some(dest), out);
    }

    fn send_move(
        &self,
        game_id: &str,
        to: &str,
        position: u8,
        seq: u32,
        now: u64,
        out: &mut Vec<OutboundAction>,
    ) {
        let Some(addr) = self.peers.resolve(to) else {
            warn!(%to, "move destination unreachable");
            return;
        };
        let frame = Frame::TicTacToeMove {
            from: self.user_id.clone(),
            to: to.to_owned(),
            game_id: game_id.to_owned(),
            position,
            move_seq: seq,
            token: self.mint(Scope::Game, now),
        };
        self.emit_lossy(&frame, Some(addr), out);
    }
}

/// Short per-message id, uuid v4 hex prefix.
fn new_message_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::WireMap;

    const T0: u64 = 1_700_000_000;

    struct Peer {
        core: LsnpCore,
        addr: SocketAddr,
    }

    impl Peer {
        fn new(name: &str, last_octet: u8) -> Self {
            Self {
                core: LsnpCore::new(name, &format!("127.0.0.{last_octet}")),
                addr: format!("127.0.0.{last_octet}:50999").parse().unwrap(),
            }
        }
    }

    /// Deliver a batch of actions into the network and keep going until no
    /// datagrams remain in flight. Returns (receiving peer index,
    /// notification) pairs; the origin's own notifications are index
    /// `origin`.
    fn pump(
        net: &mut [Peer],
        origin: usize,
        actions: Vec<OutboundAction>,
        now: u64,
    ) -> Vec<(usize, Notification)> {
        let addrs: Vec<SocketAddr> = net.iter().map(|p| p.addr).collect();
        let mut notes = Vec::new();
        let mut queue: std::collections::VecDeque<(usize, OutboundAction)> =
            actions.into_iter().map(|a| (origin, a)).collect();
        while let Some((from, action)) = queue.pop_front() {
            match action {
                OutboundAction::Notify(n) => notes.push((from, n)),
                OutboundAction::Unicast(addr, bytes) => {
                    if let Some(idx) = addrs.iter().position(|a| *a == addr) {
                        let replies = net[idx].core.handle_datagram(&bytes, addrs[from], now);
                        queue.extend(replies.into_iter().map(|a| (idx, a)));
                    }
                }
                OutboundAction::Broadcast(bytes) => {
                    for idx in 0..net.len() {
                        if idx == from {
                            continue;
                        }
                        let replies = net[idx].core.handle_datagram(&bytes, addrs[from], now);
                        queue.extend(replies.into_iter().map(|a| (idx, a)));
                    }
                }
            }
        }
        notes
    }

    /// One presence round: every peer ticks once and the broadcasts land.
    fn discover(net: &mut [Peer], now: u64) -> Vec<(usize, Notification)> {
        let mut notes = Vec::new();
        for i in 0..net.len() {
            let actions = net[i].core.tick(now);
            notes.extend(pump(net, i, actions, now));
        }
        notes
    }

    fn notes_for(notes: &[(usize, Notification)], idx: usize) -> Vec<&Notification> {
        notes.iter().filter(|(i, _)| *i == idx).map(|(_, n)| n).collect()
    }

    #[test]
    fn discovery_after_first_presence_round() {
        let mut net = vec![Peer::new("alice", 1), Peer::new("bob", 2)];
        let notes = discover(&mut net, T0);
        assert!(notes_for(&notes, 1)
            .iter()
            .any(|n| matches!(n, Notification::PeerDiscovered(id) if id == "alice@127.0.0.1")));
        assert!(notes_for(&notes, 0)
            .iter()
            .any(|n| matches!(n, Notification::PeerDiscovered(id) if id == "bob@127.0.0.2")));
        let a_sees: Vec<&str> = net[0].core.peers().iter().map(|p| p.user_id.as_str()).collect();
        assert_eq!(a_sees, vec!["bob@127.0.0.2"]);
        // Discovery fires once; the next round refreshes silently.
        let notes = discover(&mut net, T0 + 30);
        assert!(!notes
            .iter()
            .any(|(_, n)| matches!(n, Notification::PeerDiscovered(_))));
    }

    #[test]
    fn posts_only_flow_to_followers() {
        let mut net = vec![Peer::new("alice", 1), Peer::new("bob", 2)];
        discover(&mut net, T0);

        let actions = net[0].core.follow("bob@127.0.0.2", T0 + 1).unwrap();
        let notes = pump(&mut net, 0, actions, T0 + 1);
        assert!(notes_for(&notes, 1)
            .iter()
            .any(|n| matches!(n, Notification::FollowerAdded(id) if id == "alice@127.0.0.1")));

        // Bob posts; Alice follows him, so she sees it.
        let actions = net[1].core.post("Hello", T0 + 2).unwrap();
        let notes = pump(&mut net, 1, actions, T0 + 2);
        assert!(notes_for(&notes, 0)
            .iter()
            .any(|n| matches!(n, Notification::NewPost { author, content }
                if author == "bob@127.0.0.2" && content == "Hello")));
        assert_eq!(net[0].core.posts().len(), 1);
        assert_eq!(net[0].core.posts()[0].author, "bob@127.0.0.2");

        // Alice posts; Bob does not follow her, so nothing lands.
        let actions = net[0].core.post("Hi", T0 + 3).unwrap();
        let notes = pump(&mut net, 0, actions, T0 + 3);
        assert!(notes_for(&notes, 1).is_empty());
        assert!(net[1].core.posts().is_empty());
    }

    #[test]
    fn wrong_scope_token_surfaces_security_event() {
        let mut net = vec![Peer::new("alice", 1), Peer::new("bob", 2)];
        discover(&mut net, T0);

        // A DM whose token was minted for the game scope.
        let frame = Frame::Dm {
            from: "alice@127.0.0.1".into(),
            to: "bob@127.0.0.2".into(),
            content: "psst".into(),
            timestamp: T0,
            message_id: None,
            token: token::issue("alice@127.0.0.1", Scope::Game, 3600, T0),
        };
        let bytes = encode_frame(&frame.to_wire()).unwrap();
        let src = net[0].addr;
        let actions = net[1].core.handle_datagram(&bytes, src, T0);
        let security = actions
            .iter()
            .find_map(|a| match a {
                OutboundAction::Notify(n @ Notification::Security { .. }) => Some(n),
                _ => None,
            })
            .expect("security notification");
        assert_eq!(
            security.to_string(),
            "[Security] Invalid token for DM from alice@127.0.0.1: \
             ScopeMismatch (expected chat, got game)"
        );
        assert!(net[1].core.dms().is_empty());
    }

    #[test]
    fn missing_token_rejected_expired_token_rejected() {
        let mut net = vec![Peer::new("alice", 1), Peer::new("bob", 2)];
        discover(&mut net, T0);

        let mut map = WireMap::new();
        map.push("TYPE", "FOLLOW");
        map.push("FROM", "alice@127.0.0.1");
        map.push("TO", "bob@127.0.0.2");
        map.push("TIMESTAMP", T0.to_string());
        // No TOKEN at all: the typed decode already refuses the frame.
        let bytes = encode_frame(&map).unwrap();
        let src = net[0].addr;
        let actions = net[1].core.handle_datagram(&bytes, src, T0);
        assert!(actions.is_empty());
        assert_eq!(net[1].core.followers().len(), 0);

        // Expired token: minted long ago, presented past expiry plus skew.
        let frame = Frame::Follow {
            from: "alice@127.0.0.1".into(),
            to: "bob@127.0.0.2".into(),
            timestamp: T0,
            message_id: None,
            token: token::issue("alice@127.0.0.1", Scope::Follow, 10, T0 - 1000),
        };
        let bytes = encode_frame(&frame.to_wire()).unwrap();
        let actions = net[1].core.handle_datagram(&bytes, src, T0);
        assert!(actions.iter().any(|a| matches!(
            a,
            OutboundAction::Notify(Notification::Security {
                reason: TokenError::Expired,
                ..
            })
        )));
        assert_eq!(net[1].core.followers().len(), 0);
    }

    #[test]
    fn group_lifecycle_message_reaches_all_members() {
        let mut net = vec![
            Peer::new("alice", 1),
            Peer::new("bob", 2),
            Peer::new("charlie", 3),
        ];
        discover(&mut net, T0);

        let actions = net[0]
            .core
            .group_create("studygroup", "CSNETWK Study Group", T0)
            .unwrap();
        pump(&mut net, 0, actions, T0);

        let actions = net[0]
            .core
            .group_update("studygroup", &["bob@127.0.0.2".into()], &[], T0 + 1)
            .unwrap();
        let notes = pump(&mut net, 0, actions, T0 + 1);
        assert!(notes_for(&notes, 1).iter().any(|n| matches!(
            n,
            Notification::GroupJoined { title } if title == "CSNETWK Study Group"
        )));

        let actions = net[0]
            .core
            .group_update("studygroup", &["charlie@127.0.0.3".into()], &[], T0 + 2)
            .unwrap();
        let notes = pump(&mut net, 0, actions, T0 + 2);
        assert!(notes_for(&notes, 2).iter().any(|n| matches!(
            n,
            Notification::GroupJoined { .. }
        )));
        // Bob already knew the group; for him this is a membership change.
        assert!(notes_for(&notes, 1).iter().any(|n| matches!(
            n,
            Notification::GroupUpdated { .. }
        )));

        let actions = net[1]
            .core
            .group_message("studygroup", "When is the deadline?", T0 + 3)
            .unwrap();
        let notes = pump(&mut net, 1, actions, T0 + 3);
        let expected =
            "[Group: 'CSNETWK Study Group'] bob@127.0.0.2: When is the deadline?";
        for idx in [0usize, 2] {
            let got: Vec<String> = notes_for(&notes, idx)
                .iter()
                .map(|n| n.to_string())
                .collect();
            assert!(got.iter().any(|s| s == expected), "peer {idx}: {got:?}");
        }
    }

    #[test]
    fn group_message_from_non_member_dropped() {
        let mut net = vec![Peer::new("alice", 1), Peer::new("mallory", 2)];
        discover(&mut net, T0);
        net[0].core.group_create("sg", "Study", T0).unwrap();

        let frame = Frame::GroupMessage {
            from: "mallory@127.0.0.2".into(),
            group_id: "sg".into(),
            content: "let me in".into(),
            timestamp: T0,
            token: token::issue("mallory@127.0.0.2", Scope::Chat, 3600, T0),
        };
        let bytes = encode_frame(&frame.to_wire()).unwrap();
        let src = net[1].addr;
        let actions = net[0].core.handle_datagram(&bytes, src, T0);
        assert!(!actions
            .iter()
            .any(|a| matches!(a, OutboundAction::Notify(Notification::GroupMessage { .. }))));
    }

    #[test]
    fn non_owner_group_update_ignored() {
        let mut net = vec![Peer::new("alice", 1), Peer::new("bob", 2)];
        discover(&mut net, T0);
        let actions = net[0].core.group_create("sg", "Study", T0).unwrap();
        pump(&mut net, 0, actions, T0);
        let actions = net[0]
            .core
            .group_update("sg", &["bob@127.0.0.2".into()], &[], T0)
            .unwrap();
        pump(&mut net, 0, actions, T0);

        // Bob tries to evict Alice from her own group.
        let frame = Frame::GroupUpdate {
            from: "bob@127.0.0.2".into(),
            group_id: "sg".into(),
            group_name: "Study".into(),
            members: vec!["bob@127.0.0.2".into()],
            timestamp: T0 + 1,
            token: token::issue("bob@127.0.0.2", Scope::Group, 3600, T0),
        };
        let bytes = encode_frame(&frame.to_wire()).unwrap();
        let src = net[1].addr;
        net[0].core.handle_datagram(&bytes, src, T0 + 1);
        let group = net[0].core.groups()[0];
        assert_eq!(group.owner, "alice@127.0.0.1");
        assert!(group.members.contains("alice@127.0.0.1"));
    }

    #[test]
    fn file_transfer_end_to_end() {
        let mut net = vec![Peer::new("alice", 1), Peer::new("bob", 2)];
        discover(&mut net, T0);
        let payload = b"Hello LSNP file transfer!".to_vec();
        assert_eq!(payload.len(), 25);

        let actions = net[0]
            .core
            .file_offer("bob@127.0.0.2", "testfile.txt", payload.clone(), T0)
            .unwrap();
        let notes = pump(&mut net, 0, actions, T0);
        let file_id = notes_for(&notes, 1)
            .iter()
            .find_map(|n| match n {
                Notification::FileOffer { file_id, filename, size, .. } => {
                    assert_eq!(filename, "testfile.txt");
                    assert_eq!(*size, 25);
                    Some(file_id.clone())
                }
                _ => None,
            })
            .expect("offer surfaced");

        // Accepting triggers the whole chunk/ack/complete exchange.
        let actions = net[1].core.file_accept(&file_id, T0 + 1).unwrap();
        let notes = pump(&mut net, 1, actions, T0 + 1);
        let received = notes_for(&notes, 1)
            .iter()
            .find_map(|n| match n {
                Notification::FileReceived { filename, data, .. } => {
                    Some((filename.clone(), data.clone()))
                }
                _ => None,
            })
            .expect("file received");
        assert_eq!(received.0, "testfile.txt");
        assert_eq!(received.1, payload);
        assert!(notes_for(&notes, 0)
            .iter()
            .any(|n| matches!(n, Notification::FileSent { .. })));
        // Both sides have forgotten the transfer id.
        assert!(net[0].core.active_transfers().is_empty());
        assert!(net[1].core.active_transfers().is_empty());
    }

    #[test]
    fn multi_chunk_transfer_preserves_bytes() {
        let mut net = vec![Peer::new("alice", 1), Peer::new("bob", 2)];
        discover(&mut net, T0);
        // 20 chunks, larger than the send window.
        let payload: Vec<u8> = (0..20_480u32).map(|i| (i % 251) as u8).collect();

        let actions = net[0]
            .core
            .file_offer("bob@127.0.0.2", "blob.bin", payload.clone(), T0)
            .unwrap();
        let notes = pump(&mut net, 0, actions, T0);
        let file_id = notes_for(&notes, 1)
            .iter()
            .find_map(|n| match n {
                Notification::FileOffer { file_id, .. } => Some(file_id.clone()),
                _ => None,
            })
            .unwrap();
        let actions = net[1].core.file_accept(&file_id, T0 + 1).unwrap();
        let notes = pump(&mut net, 1, actions, T0 + 1);
        let received = notes_for(&notes, 1)
            .iter()
            .find_map(|n| match n {
                Notification::FileReceived { data, .. } => Some(data.clone()),
                _ => None,
            })
            .expect("file received");
        assert_eq!(received, payload);
    }

    #[test]
    fn tictactoe_win_reported_on_both_sides() {
        let mut net = vec![Peer::new("alice", 1), Peer::new("bob", 2)];
        discover(&mut net, T0);

        let actions = net[0].core.tictactoe_invite("bob@127.0.0.2", T0).unwrap();
        let notes = pump(&mut net, 0, actions, T0);
        let game_id = notes_for(&notes, 1)
            .iter()
            .find_map(|n| match n {
                Notification::GameInvite { game_id, .. } => Some(game_id.clone()),
                _ => None,
            })
            .expect("invite surfaced");

        let actions = net[1].core.tictactoe_accept(&game_id, T0 + 1).unwrap();
        pump(&mut net, 1, actions, T0 + 1);

        // X=0, O=4, X=1, O=5, X=2: top row wins for X.
        let script = [(0usize, 0u8), (1, 4), (0, 1), (1, 5), (0, 2)];
        let mut all_notes = Vec::new();
        for (peer, pos) in script {
            let actions = net[peer]
                .core
                .tictactoe_move(&game_id, pos, T0 + 2)
                .unwrap();
            all_notes.extend(pump(&mut net, peer, actions, T0 + 2));
        }
        for idx in [0usize, 1] {
            let over: Vec<String> = notes_for(&all_notes, idx)
                .iter()
                .filter(|n| matches!(n, Notification::GameOver { .. }))
                .map(|n| n.to_string())
                .collect();
            assert!(
                over.iter().any(|s| s == "[Game Over] alice@127.0.0.1 wins!"),
                "peer {idx}: {over:?}"
            );
        }
        assert!(net[0].core.active_games().is_empty());
        assert!(net[1].core.active_games().is_empty());
    }

    #[test]
    fn duplicate_like_notifies_once() {
        let mut net = vec![Peer::new("alice", 1), Peer::new("bob", 2)];
        discover(&mut net, T0);
        let actions = net[0].core.post("likeable", T0 + 1).unwrap();
        pump(&mut net, 0, actions, T0 + 1);

        let mut like_notes = 0;
        for _ in 0..2 {
            let actions = net[1].core.like("alice@127.0.0.1", T0 + 1, T0 + 2).unwrap();
            let notes = pump(&mut net, 1, actions, T0 + 2);
            like_notes += notes_for(&notes, 0)
                .iter()
                .filter(|n| matches!(n, Notification::Like { .. }))
                .count();
        }
        assert_eq!(like_notes, 1);
    }

    #[test]
    fn silent_peer_pruned_within_one_cycle() {
        let mut net = vec![Peer::new("alice", 1), Peer::new("bob", 2)];
        discover(&mut net, T0);
        assert_eq!(net[0].core.peers().len(), 1);
        // Bob goes silent; Alice keeps ticking alone. The prune sweep at
        // tick 120 sees a last-seen more than 90 seconds old.
        for i in 2..=120u64 {
            net[0].core.tick(T0 + i);
        }
        assert!(net[0].core.peers().is_empty());
    }

    #[test]
    fn unknown_type_logged_in_verbose(){
        let mut peer = Peer::new("alice", 1);
        peer.core.toggle_verbose();
        let src: SocketAddr = "127.0.0.9:50999".parse().unwrap();
        let actions = peer
            .core
            .handle_datagram(b"TYPE: GOSSIP\nUSER_ID: x@127.0.0.9\n\n", src, T0);
        assert!(actions.iter().any(|a| matches!(
            a,
            OutboundAction::Notify(Notification::Verbose(text))
                if text.contains("unknown message type GOSSIP")
        )));
    }

    #[test]
    fn commands_against_unknown_peers_fail() {
        let mut core = LsnpCore::new("alice", "127.0.0.1");
        assert!(matches!(
            core.dm("ghost@127.0.0.9", "hi", T0),
            Err(CommandError::UnknownPeer(_))
        ));
        assert!(matches!(
            core.follow("ghost@127.0.0.9", T0),
            Err(CommandError::UnknownPeer(_))
        ));
        assert!(matches!(
            core.follow("alice@127.0.0.1", T0),
            Err(CommandError::SelfTarget)
        ));
        assert!(matches!(
            core.file_accept("feedfacefeedface", T0),
            Err(CommandError::UnknownTransfer(_))
        ));
    }

    #[test]
    fn own_broadcast_echo_ignored() {
        let mut peer = Peer::new("alice", 1);
        let actions = peer.core.post("hello me", T0).unwrap();
        let OutboundAction::Broadcast(bytes) = &actions[0] else {
            panic!("expected broadcast");
        };
        let echo = bytes.clone();
        let own_addr = peer.addr;
        let replies = peer.core.handle_datagram(&echo, own_addr, T0);
        assert!(replies.is_empty());
        // Not even a peer-directory entry for ourselves.
        assert!(peer.core.peers().is_empty());
    }
}
