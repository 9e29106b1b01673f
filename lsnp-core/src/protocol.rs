//! Message vocabulary: one tagged variant per wire TYPE, with the codec as
//! the boundary between the untyped key/value map and the typed frame.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::wire::{WireError, WireMap};

/// Textual peer identifier of the form `name@ip`. Stable per peer process.
pub type UserId = String;

/// Permitted purpose of a token, enforced per message TYPE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Chat,
    Broadcast,
    Follow,
    Group,
    File,
    Game,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Chat => "chat",
            Scope::Broadcast => "broadcast",
            Scope::Follow => "follow",
            Scope::Group => "group",
            Scope::File => "file",
            Scope::Game => "game",
        }
    }

    pub fn parse(s: &str) -> Option<Scope> {
        match s {
            "chat" => Some(Scope::Chat),
            "broadcast" => Some(Scope::Broadcast),
            "follow" => Some(Scope::Follow),
            "group" => Some(Scope::Group),
            "file" => Some(Scope::File),
            "game" => Some(Scope::Game),
            _ => None,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profile picture: MIME type plus raw bytes (base64 on the wire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Avatar {
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Terminal outcome of a tic-tac-toe session, as carried by TICTACTOE_RESULT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    WonX,
    WonO,
    Draw,
}

impl GameOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            GameOutcome::WonX => "WON_X",
            GameOutcome::WonO => "WON_O",
            GameOutcome::Draw => "DRAW",
        }
    }

    pub fn parse(s: &str) -> Option<GameOutcome> {
        match s {
            "WON_X" => Some(GameOutcome::WonX),
            "WON_O" => Some(GameOutcome::WonO),
            "DRAW" => Some(GameOutcome::Draw),
            _ => None,
        }
    }
}

/// All wire message types. Field names mirror the wire keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ping {
        user_id: UserId,
    },
    Profile {
        user_id: UserId,
        display_name: String,
        status: String,
        avatar: Option<Avatar>,
        token: Option<String>,
    },
    Post {
        user_id: UserId,
        content: String,
        timestamp: u64,
        message_id: Option<String>,
        token: String,
    },
    Dm {
        from: UserId,
        to: UserId,
        content: String,
        timestamp: u64,
        message_id: Option<String>,
        token: String,
    },
    Follow {
        from: UserId,
        to: UserId,
        timestamp: u64,
        message_id: Option<String>,
        token: String,
    },
    Unfollow {
        from: UserId,
        to: UserId,
        timestamp: u64,
        message_id: Option<String>,
        token: String,
    },
    Like {
        from: UserId,
        to: UserId,
        post_timestamp: u64,
        timestamp: u64,
        token: String,
    },
    GroupCreate {
        from: UserId,
        group_id: String,
        group_name: String,
        members: Vec<UserId>,
        timestamp: u64,
        token: String,
    },
    GroupUpdate {
        from: UserId,
        group_id: String,
        group_name: String,
        members: Vec<UserId>,
        timestamp: u64,
        token: String,
    },
    GroupMessage {
        from: UserId,
        group_id: String,
        content: String,
        timestamp: u64,
        token: String,
    },
    FileOffer {
        from: UserId,
        to: UserId,
        file_id: String,
        filename: String,
        file_size: u64,
        chunk_size: u32,
        total_chunks: u32,
        timestamp: u64,
        token: String,
    },
    FileAccept {
        from: UserId,
        to: UserId,
        file_id: String,
        token: String,
    },
    FileChunk {
        from: UserId,
        to: UserId,
        file_id: String,
        seq: u32,
        data: Vec<u8>,
        token: String,
    },
    FileComplete {
        from: UserId,
        to: UserId,
        file_id: String,
        token: String,
    },
    Ack {
        from: UserId,
        file_id: String,
        seq: u32,
    },
    TicTacToeInvite {
        from: UserId,
        to: UserId,
        game_id: String,
        symbol: String,
        timestamp: u64,
        token: String,
    },
    TicTacToeAccept {
        from: UserId,
        to: UserId,
        game_id: String,
        token: String,
    },
    TicTacToeMove {
        from: UserId,
        to: UserId,
        game_id: String,
        position: u8,
        move_seq: u32,
        token: String,
    },
    TicTacToeResult {
        from: UserId,
        to: UserId,
        game_id: String,
        result: GameOutcome,
        token: String,
    },
}

fn req<'a>(map: &'a WireMap, key: &'static str) -> Result<&'a str, WireError> {
    map.get(key).ok_or(WireError::MissingField(key))
}

fn req_u64(map: &WireMap, key: &'static str) -> Result<u64, WireError> {
    req(map, key)?
        .parse()
        .map_err(|_| WireError::InvalidField(key))
}

fn req_u32(map: &WireMap, key: &'static str) -> Result<u32, WireError> {
    req(map, key)?
        .parse()
        .map_err(|_| WireError::InvalidField(key))
}

fn req_owned(map: &WireMap, key: &'static str) -> Result<String, WireError> {
    req(map, key).map(str::to_owned)
}

fn opt_owned(map: &WireMap, key: &str) -> Option<String> {
    map.get(key).map(str::to_owned)
}

fn split_members(raw: &str) -> Vec<UserId> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_owned)
        .collect()
}

fn join_members(members: &[UserId]) -> String {
    members.join(",")
}

impl Frame {
    /// Validate required fields and lift a parsed map into a typed frame.
    pub fn from_wire(map: &WireMap) -> Result<Frame, WireError> {
        let type_name = map.type_name().ok_or(WireError::MissingField("TYPE"))?;
        match type_name {
            "PING" => Ok(Frame::Ping {
                user_id: req_owned(map, "USER_ID")?,
            }),
            "PROFILE" => {
                let avatar = match (map.get("AVATAR_TYPE"), map.get("AVATAR_DATA")) {
                    (Some(mime), Some(data)) => Some(Avatar {
                        mime: mime.to_owned(),
                        bytes: BASE64
                            .decode(data)
                            .map_err(|_| WireError::InvalidField("AVATAR_DATA"))?,
                    }),
                    _ => None,
                };
                Ok(Frame::Profile {
                    user_id: req_owned(map, "USER_ID")?,
                    display_name: req_owned(map, "DISPLAY_NAME")?,
                    status: req_owned(map, "STATUS")?,
                    avatar,
                    token: opt_owned(map, "TOKEN"),
                })
            }
            "POST" => Ok(Frame::Post {
                user_id: req_owned(map, "USER_ID")?,
                content: req_owned(map, "CONTENT")?,
                timestamp: req_u64(map, "TIMESTAMP")?,
                message_id: opt_owned(map, "MESSAGE_ID"),
                token: req_owned(map, "TOKEN")?,
            }),
            "DM" => Ok(Frame::Dm {
                from: req_owned(map, "FROM")?,
                to: req_owned(map, "TO")?,
                content: req_owned(map, "CONTENT")?,
                timestamp: req_u64(map, "TIMESTAMP")?,
                message_id: opt_owned(map, "MESSAGE_ID"),
                token: req_owned(map, "TOKEN")?,
            }),
            "FOLLOW" => Ok(Frame::Follow {
                from: req_owned(map, "FROM")?,
                to: req_owned(map, "TO")?,
                timestamp: req_u64(map, "TIMESTAMP")?,
                message_id: opt_owned(map, "MESSAGE_ID"),
                token: req_owned(map, "TOKEN")?,
            }),
            "UNFOLLOW" => Ok(Frame::Unfollow {
                from: req_owned(map, "FROM")?,
                to: req_owned(map, "TO")?,
                timestamp: req_u64(map, "TIMESTAMP")?,
                message_id: opt_owned(map, "MESSAGE_ID"),
                token: req_owned(map, "TOKEN")?,
            }),
            "LIKE" => Ok(Frame::Like {
                from: req_owned(map, "FROM")?,
                to: req_owned(map, "TO")?,
                post_timestamp: req_u64(map, "POST_TIMESTAMP")?,
                timestamp: req_u64(map, "TIMESTAMP")?,
                token: req_owned(map, "TOKEN")?,
            }),
            "GROUP_CREATE" => Ok(Frame::GroupCreate {
                from: req_owned(map, "FROM")?,
                group_id: req_owned(map, "GROUP_ID")?,
                group_name: req_owned(map, "GROUP_NAME")?,
                members: split_members(req(map, "MEMBERS")?),
                timestamp: req_u64(map, "TIMESTAMP")?,
                token: req_owned(map, "TOKEN")?,
            }),
            "GROUP_UPDATE" => Ok(Frame::GroupUpdate {
                from: req_owned(map, "FROM")?,
                group_id: req_owned(map, "GROUP_ID")?,
                group_name: req_owned(map, "GROUP_NAME")?,
                members: split_members(req(map, "MEMBERS")?),
                timestamp: req_u64(map, "TIMESTAMP")?,
                token: req_owned(map, "TOKEN")?,
            }),
            "GROUP_MESSAGE" => Ok(Frame::GroupMessage {
                from: req_owned(map, "FROM")?,
                group_id: req_owned(map, "GROUP_ID")?,
                content: req_owned(map, "CONTENT")?,
                timestamp: req_u64(map, "TIMESTAMP")?,
                token: req_owned(map, "TOKEN")?,
            }),
            "FILE_OFFER" => Ok(Frame::FileOffer {
                from: req_owned(map, "FROM")?,
                to: req_owned(map, "TO")?,
                file_id: req_owned(map, "FILE_ID")?,
                filename: req_owned(map, "FILENAME")?,
                file_size: req_u64(map, "FILE_SIZE")?,
                chunk_size: req_u32(map, "CHUNK_SIZE")?,
                total_chunks: req_u32(map, "TOTAL_CHUNKS")?,
                timestamp: req_u64(map, "TIMESTAMP")?,
                token: req_owned(map, "TOKEN")?,
            }),
            "FILE_ACCEPT" => Ok(Frame::FileAccept {
                from: req_owned(map, "FROM")?,
                to: req_owned(map, "TO")?,
                file_id: req_owned(map, "FILE_ID")?,
                token: req_owned(map, "TOKEN")?,
            }),
            "FILE_CHUNK" => Ok(Frame::FileChunk {
                from: req_owned(map, "FROM")?,
                to: req_owned(map, "TO")?,
                file_id: req_owned(map, "FILE_ID")?,
                seq: req_u32(map, "SEQ")?,
                data: BASE64
                    .decode(req(map, "DATA")?)
                    .map_err(|_| WireError::InvalidField("DATA"))?,
                token: req_owned(map, "TOKEN")?,
            }),
            "FILE_COMPLETE" => Ok(Frame::FileComplete {
                from: req_owned(map, "FROM")?,
                to: req_owned(map, "TO")?,
                file_id: req_owned(map, "FILE_ID")?,
                token: req_owned(map, "TOKEN")?,
            }),
            "ACK" => Ok(Frame::Ack {
                from: req_owned(map, "FROM")?,
                file_id: req_owned(map, "FILE_ID")?,
                seq: req_u32(map, "SEQ")?,
            }),
            "TICTACTOE_INVITE" => Ok(Frame::TicTacToeInvite {
                from: req_owned(map, "FROM")?,
                to: req_owned(map, "TO")?,
                game_id: req_owned(map, "GAME_ID")?,
                symbol: req_owned(map, "SYMBOL")?,
                timestamp: req_u64(map, "TIMESTAMP")?,
                token: req_owned(map, "TOKEN")?,
            }),
            "TICTACTOE_ACCEPT" => Ok(Frame::TicTacToeAccept {
                from: req_owned(map, "FROM")?,
                to: req_owned(map, "TO")?,
                game_id: req_owned(map, "GAME_ID")?,
                token: req_owned(map, "TOKEN")?,
            }),
            "TICTACTOE_MOVE" => {
                let position: u8 = req(map, "POSITION")?
                    .parse()
                    .map_err(|_| WireError::InvalidField("POSITION"))?;
                if position > 8 {
                    return Err(WireError::InvalidField("POSITION"));
                }
                Ok(Frame::TicTacToeMove {
                    from: req_owned(map, "FROM")?,
                    to: req_owned(map, "TO")?,
                    game_id: req_owned(map, "GAME_ID")?,
                    position,
                    move_seq: req_u32(map, "MOVE_SEQ")?,
                    token: req_owned(map, "TOKEN")?,
                })
            }
            "TICTACTOE_RESULT" => Ok(Frame::TicTacToeResult {
                from: req_owned(map, "FROM")?,
                to: req_owned(map, "TO")?,
                game_id: req_owned(map, "GAME_ID")?,
                result: GameOutcome::parse(req(map, "RESULT")?)
                    .ok_or(WireError::InvalidField("RESULT"))?,
                token: req_owned(map, "TOKEN")?,
            }),
            other => Err(WireError::UnknownType(other.to_owned())),
        }
    }

    /// Lower a typed frame to its wire map. TYPE always comes first.
    pub fn to_wire(&self) -> WireMap {
        let mut m = WireMap::new();
        m.push("TYPE", self.type_name());
        match self {
            Frame::Ping { user_id } => {
                m.push("USER_ID", user_id);
            }
            Frame::Profile {
                user_id,
                display_name,
                status,
                avatar,
                token,
            } => {
                m.push("USER_ID", user_id);
                m.push("DISPLAY_NAME", display_name);
                m.push("STATUS", status);
                if let Some(avatar) = avatar {
                    m.push("AVATAR_TYPE", &avatar.mime);
                    m.push("AVATAR_DATA", BASE64.encode(&avatar.bytes));
                }
                if let Some(token) = token {
                    m.push("TOKEN", token);
                }
            }
            Frame::Post {
                user_id,
                content,
                timestamp,
                message_id,
                token,
            } => {
                m.push("USER_ID", user_id);
                m.push("CONTENT", content);
                m.push("TIMESTAMP", timestamp.to_string());
                if let Some(id) = message_id {
                    m.push("MESSAGE_ID", id);
                }
                m.push("TOKEN", token);
            }
            Frame::Dm {
                from,
                to,
                content,
                timestamp,
                message_id,
                token,
            } => {
                m.push("FROM", from);
                m.push("TO", to);
                m.push("CONTENT", content);
                m.push("TIMESTAMP", timestamp.to_string());
                if let Some(id) = message_id {
                    m.push("MESSAGE_ID", id);
                }
                m.push("TOKEN", token);
            }
            Frame::Follow {
                from,
                to,
                timestamp,
                message_id,
                token,
            }
            | Frame::Unfollow {
                from,
                to,
                timestamp,
                message_id,
                token,
            } => {
                m.push("FROM", from);
                m.push("TO", to);
                m.push("TIMESTAMP", timestamp.to_string());
                if let Some(id) = message_id {
                    m.push("MESSAGE_ID", id);
                }
                m.push("TOKEN", token);
            }
            Frame::Like {
                from,
                to,
                post_timestamp,
                timestamp,
                token,
            } => {
                m.push("FROM", from);
                m.push("TO", to);
                m.push("POST_TIMESTAMP", post_timestamp.to_string());
                m.push("TIMESTAMP", timestamp.to_string());
                m.push("TOKEN", token);
            }
            Frame::GroupCreate {
                from,
                group_id,
                group_name,
                members,
                timestamp,
                token,
            }
            | Frame::GroupUpdate {
                from,
                group_id,
                group_name,
                members,
                timestamp,
                token,
            } => {
                m.push("FROM", from);
                m.push("GROUP_ID", group_id);
                m.push("GROUP_NAME", group_name);
                m.push("MEMBERS", join_members(members));
                m.push("TIMESTAMP", timestamp.to_string());
                m.push("TOKEN", token);
            }
            Frame::GroupMessage {
                from,
                group_id,
                content,
                timestamp,
                token,
            } => {
                m.push("FROM", from);
                m.push("GROUP_ID", group_id);
                m.push("CONTENT", content);
                m.push("TIMESTAMP", timestamp.to_string());
                m.push("TOKEN", token);
            }
            Frame::FileOffer {
                from,
                to,
                file_id,
                filename,
                file_size,
                chunk_size,
                total_chunks,
                timestamp,
                token,
            } => {
                m.push("FROM", from);
                m.push("TO", to);
                m.push("FILE_ID", file_id);
                m.push("FILENAME", filename);
                m.push("FILE_SIZE", file_size.to_string());
                m.push("CHUNK_SIZE", chunk_size.to_string());
                m.push("TOTAL_CHUNKS", total_chunks.to_string());
                m.push("TIMESTAMP", timestamp.to_string());
                m.push("TOKEN", token);
            }
            Frame::FileAccept {
                from,
                to,
                file_id,
                token,
            }
            | Frame::FileComplete {
                from,
                to,
                file_id,
                token,
            } => {
                m.push("FROM", from);
                m.push("TO", to);
                m.push("FILE_ID", file_id);
                m.push("TOKEN", token);
            }
            Frame::FileChunk {
                from,
                to,
                file_id,
                seq,
                data,
                token,
            } => {
                m.push("FROM", from);
                m.push("TO", to);
                m.push("FILE_ID", file_id);
                m.push("SEQ", seq.to_string());
                m.push("DATA", BASE64.encode(data));
                m.push("TOKEN", token);
            }
            Frame::Ack { from, file_id, seq } => {
                m.push("FROM", from);
                m.push("FILE_ID", file_id);
                m.push("SEQ", seq.to_string());
            }
            Frame::TicTacToeInvite {
                from,
                to,
                game_id,
                symbol,
                timestamp,
                token,
            } => {
                m.push("FROM", from);
                m.push("TO", to);
                m.push("GAME_ID", game_id);
                m.push("SYMBOL", symbol);
                m.push("TIMESTAMP", timestamp.to_string());
                m.push("TOKEN", token);
            }
            Frame::TicTacToeAccept {
                from,
                to,
                game_id,
                token,
            } => {
                m.push("FROM", from);
                m.push("TO", to);
                m.push("GAME_ID", game_id);
                m.push("TOKEN", token);
            }
            Frame::TicTacToeMove {
                from,
                to,
                game_id,
                position,
                move_seq,
                token,
            } => {
                m.push("FROM", from);
                m.push("TO", to);
                m.push("GAME_ID", game_id);
                m.push("POSITION", position.to_string());
                m.push("MOVE_SEQ", move_seq.to_string());
                m.push("TOKEN", token);
            }
            Frame::TicTacToeResult {
                from,
                to,
                game_id,
                result,
                token,
            } => {
                m.push("FROM", from);
                m.push("TO", to);
                m.push("GAME_ID", game_id);
                m.push("RESULT", result.as_str());
                m.push("TOKEN", token);
            }
        }
        m
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Frame::Ping { .. } => "PING",
            Frame::Profile { .. } => "PROFILE",
            Frame::Post { .. } => "POST",
            Frame::Dm { .. } => "DM",
            Frame::Follow { .. } => "FOLLOW",
            Frame::Unfollow { .. } => "UNFOLLOW",
            Frame::Like { .. } => "LIKE",
            Frame::GroupCreate { .. } => "GROUP_CREATE",
            Frame::GroupUpdate { .. } => "GROUP_UPDATE",
            Frame::GroupMessage { .. } => "GROUP_MESSAGE",
            Frame::FileOffer { .. } => "FILE_OFFER",
            Frame::FileAccept { .. } => "FILE_ACCEPT",
            Frame::FileChunk { .. } => "FILE_CHUNK",
            Frame::FileComplete { .. } => "FILE_COMPLETE",
            Frame::Ack { .. } => "ACK",
            Frame::TicTacToeInvite { .. } => "TICTACTOE_INVITE",
            Frame::TicTacToeAccept { .. } => "TICTACTOE_ACCEPT",
            Frame::TicTacToeMove { .. } => "TICTACTOE_MOVE",
            Frame::TicTacToeResult { .. } => "TICTACTOE_RESULT",
        }
    }

    /// The claimed sender: USER_ID for broadcast-authored types, FROM otherwise.
    pub fn sender(&self) -> &str {
        match self {
            Frame::Ping { user_id }
            | Frame::Profile { user_id, .. }
            | Frame::Post { user_id, .. } => user_id,
            Frame::Dm { from, .. }
            | Frame::Follow { from, .. }
            | Frame::Unfollow { from, .. }
            | Frame::Like { from, .. }
            | Frame::GroupCreate { from, .. }
            | Frame::GroupUpdate { from, .. }
            | Frame::GroupMessage { from, .. }
            | Frame::FileOffer { from, .. }
            | Frame::FileAccept { from, .. }
            | Frame::FileChunk { from, .. }
            | Frame::FileComplete { from, .. }
            | Frame::Ack { from, .. }
            | Frame::TicTacToeInvite { from, .. }
            | Frame::TicTacToeAccept { from, .. }
            | Frame::TicTacToeMove { from, .. }
            | Frame::TicTacToeResult { from, .. } => from,
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            Frame::Ping { .. } | Frame::Ack { .. } => None,
            Frame::Profile { token, .. } => token.as_deref(),
            Frame::Post { token, .. }
            | Frame::Dm { token, .. }
            | Frame::Follow { token, .. }
            | Frame::Unfollow { token, .. }
            | Frame::Like { token, .. }
            | Frame::GroupCreate { token, .. }
            | Frame::GroupUpdate { token, .. }
            | Frame::GroupMessage { token, .. }
            | Frame::FileOffer { token, .. }
            | Frame::FileAccept { token, .. }
            | Frame::FileChunk { token, .. }
            | Frame::FileComplete { token, .. }
            | Frame::TicTacToeInvite { token, .. }
            | Frame::TicTacToeAccept { token, .. }
            | Frame::TicTacToeMove { token, .. }
            | Frame::TicTacToeResult { token, .. } => Some(token),
        }
    }

    /// Scope a valid token must carry for this TYPE. `None` means the TYPE is
    /// never token-checked (PING, ACK).
    pub fn required_scope(&self) -> Option<Scope> {
        match self {
            Frame::Ping { .. } | Frame::Ack { .. } => None,
            Frame::Profile { .. } | Frame::Post { .. } | Frame::Like { .. } => {
                Some(Scope::Broadcast)
            }
            Frame::Dm { .. } | Frame::GroupMessage { .. } => Some(Scope::Chat),
            Frame::Follow { .. } | Frame::Unfollow { .. } => Some(Scope::Follow),
            Frame::GroupCreate { .. } | Frame::GroupUpdate { .. } => Some(Scope::Group),
            Frame::FileOffer { .. }
            | Frame::FileAccept { .. }
            | Frame::FileChunk { .. }
            | Frame::FileComplete { .. } => Some(Scope::File),
            Frame::TicTacToeInvite { .. }
            | Frame::TicTacToeAccept { .. }
            | Frame::TicTacToeMove { .. }
            | Frame::TicTacToeResult { .. } => Some(Scope::Game),
        }
    }

    /// PROFILE may arrive untokened: presence has to bootstrap before any
    /// peer is known well enough to be worth rejecting.
    pub fn token_optional(&self) -> bool {
        matches!(self, Frame::Profile { .. })
    }
}
