//! Presence beacons and directory aging intervals.

use crate::protocol::{Avatar, Frame, UserId};

/// Seconds between PING/PROFILE broadcasts.
pub const PRESENCE_INTERVAL_SECS: u64 = 30;
/// Seconds between directory prune sweeps.
pub const PRUNE_INTERVAL_SECS: u64 = 60;

pub fn ping(user_id: &str) -> Frame {
    Frame::Ping {
        user_id: user_id.to_owned(),
    }
}

pub fn profile(
    user_id: &UserId,
    display_name: &str,
    status: &str,
    avatar: Option<Avatar>,
    token: String,
) -> Frame {
    Frame::Profile {
        user_id: user_id.clone(),
        display_name: display_name.to_owned(),
        status: status.to_owned(),
        avatar,
        token: Some(token),
    }
}
