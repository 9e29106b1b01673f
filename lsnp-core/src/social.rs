//! Social graph state: follow sets, post logs, likes.

use std::collections::{BTreeSet, HashSet};

use crate::protocol::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub author: UserId,
    pub timestamp: u64,
    pub content: String,
}

/// Outcome of an inbound LIKE against our own post log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeOutcome {
    /// New like on one of our posts; surface a notification.
    New,
    /// Same liker and post already recorded; stay silent.
    Duplicate,
    /// No post of ours carries that timestamp.
    NoSuchPost,
}

/// Owned store behind the event loop; every mutation is one event.
#[derive(Debug, Default)]
pub struct SocialState {
    following: BTreeSet<UserId>,
    followers: BTreeSet<UserId>,
    own_posts: Vec<Post>,
    feed: Vec<Post>,
    likes_received: HashSet<(UserId, u64)>,
}

impl SocialState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if we already followed the target.
    pub fn follow(&mut self, target: &str) -> bool {
        self.following.insert(target.to_owned())
    }

    pub fn unfollow(&mut self, target: &str) -> bool {
        self.following.remove(target)
    }

    pub fn is_following(&self, user: &str) -> bool {
        self.following.contains(user)
    }

    /// Returns true when this is a new follower; duplicates are idempotent.
    pub fn add_follower(&mut self, user: &str) -> bool {
        self.followers.insert(user.to_owned())
    }

    pub fn remove_follower(&mut self, user: &str) -> bool {
        self.followers.remove(user)
    }

    /// Append to our own post log. Own posts are retained indefinitely.
    pub fn record_own_post(&mut self, author: &str, content: &str, timestamp: u64) {
        self.own_posts.push(Post {
            author: author.to_owned(),
            timestamp,
            content: content.to_owned(),
        });
    }

    /// Accept an inbound post only if we follow the author.
    pub fn accept_post(&mut self, author: &str, content: &str, timestamp: u64) -> bool {
        if !self.following.contains(author) {
            return false;
        }
        self.feed.push(Post {
            author: author.to_owned(),
            timestamp,
            content: content.to_owned(),
        });
        true
    }

    /// Match an inbound LIKE against our own posts, deduplicating per
    /// (liker, post timestamp).
    pub fn record_like(&mut self, liker: &str, post_timestamp: u64) -> LikeOutcome {
        if !self.own_posts.iter().any(|p| p.timestamp == post_timestamp) {
            return LikeOutcome::NoSuchPost;
        }
        if self.likes_received.insert((liker.to_owned(), post_timestamp)) {
            LikeOutcome::New
        } else {
            LikeOutcome::Duplicate
        }
    }

    pub fn own_posts(&self) -> &[Post] {
        &self.own_posts
    }

    pub fn feed(&self) -> &[Post] {
        &self.feed
    }

    pub fn following(&self) -> impl Iterator<Item = &UserId> {
        self.following.iter()
    }

    pub fn followers(&self) -> impl Iterator<Item = &UserId> {
        self.followers.iter()
    }
}
