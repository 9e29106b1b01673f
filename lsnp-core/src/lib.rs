//! Local Social Networking Protocol reference implementation.
//! Host-driven: no I/O; the host passes datagrams, ticks, and commands, and
//! performs the actions the core returns.
//!
//! ## Host responsibilities
//!
//! - **Transport**: bind the UDP socket, feed received datagrams into
//!   [`LsnpCore::handle_datagram`] together with the source address, and send
//!   the `Unicast`/`Broadcast` actions the core emits. Send failures are
//!   best-effort drops.
//! - **Time**: call [`LsnpCore::tick`] once per second with the current epoch
//!   second; the core schedules presence, pruning, and retransmission off
//!   that tick.
//! - **Files**: read files for `file_offer` commands and write the bytes of
//!   `Notification::FileReceived` to `received_<filename>`.
//! - **Serialization**: every core call happens on one logical event stream;
//!   state is never shared outside it.

pub mod core;
pub mod game;
pub mod group;
pub mod peers;
pub mod presence;
pub mod protocol;
pub mod social;
pub mod token;
pub mod transfer;
pub mod wire;

pub use crate::core::{
    CommandError, CoreConfig, DirectMessage, LsnpCore, Notification, OutboundAction,
};
pub use crate::peers::PeerRecord;
pub use crate::protocol::{Avatar, Frame, GameOutcome, Scope, UserId};
pub use crate::social::Post;
pub use crate::token::TokenError;
pub use crate::wire::{decode_frame, encode_frame, WireError, WireMap};
