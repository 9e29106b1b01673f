//! Named groups: owner-controlled membership, member-gated message fan-out.

use std::collections::{BTreeSet, HashMap};

use crate::protocol::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: String,
    pub title: String,
    pub owner: UserId,
    pub members: BTreeSet<UserId>,
}

impl Group {
    pub fn member_list(&self) -> Vec<UserId> {
        self.members.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupError {
    #[error("unknown group {0}")]
    Unknown(String),
    #[error("group {0} already exists")]
    AlreadyExists(String),
    #[error("only the group owner can change membership")]
    NotOwner,
    #[error("not a member of group {0}")]
    NotMember(String),
}

/// Result of applying a GROUP_UPDATE received from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteUpdate {
    /// Sender is not the owner we know for this group; drop it.
    Ignored,
    /// Our view of the member set was replaced. `new_to_us` marks the update
    /// that first brought us into the group.
    Joined { title: String, new_to_us: bool },
    /// The new member set no longer contains us; group forgotten.
    RemovedSelf { title: String },
}

/// Groups this peer participates in. Ids are only locally meaningful.
#[derive(Debug, Default)]
pub struct GroupManager {
    groups: HashMap<String, Group>,
}

impl GroupManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new group with `owner` as creator and sole member.
    pub fn create(&mut self, id: &str, title: &str, owner: &str) -> Result<&Group, GroupError> {
        if self.groups.contains_key(id) {
            return Err(GroupError::AlreadyExists(id.to_owned()));
        }
        let mut members = BTreeSet::new();
        members.insert(owner.to_owned());
        self.groups.insert(
            id.to_owned(),
            Group {
                id: id.to_owned(),
                title: title.to_owned(),
                owner: owner.to_owned(),
                members,
            },
        );
        Ok(&self.groups[id])
    }

    /// Owner-only membership change. Returns the updated group plus every
    /// UserId that must be told (the resulting set and the removed peers).
    pub fn update_membership(
        &mut self,
        id: &str,
        acting_user: &str,
        add: &[UserId],
        remove: &[UserId],
    ) -> Result<(Group, Vec<UserId>), GroupError> {
        let group = self
            .groups
            .get_mut(id)
            .ok_or_else(|| GroupError::Unknown(id.to_owned()))?;
        if group.owner != acting_user {
            return Err(GroupError::NotOwner);
        }
        for user in add {
            group.members.insert(user.clone());
        }
        for user in remove {
            group.members.remove(user);
        }
        let mut recipients: BTreeSet<UserId> = group.members.clone();
        recipients.extend(remove.iter().cloned());
        recipients.remove(acting_user);
        Ok((group.clone(), recipients.into_iter().collect()))
    }

    /// Inbound GROUP_CREATE: adopt the group if we are named a member.
    pub fn apply_remote_create(
        &mut self,
        from: &str,
        id: &str,
        title: &str,
        members: &[UserId],
        self_id: &str,
    ) -> bool {
        if !members.iter().any(|m| m == self_id) {
            return false;
        }
        self.groups.insert(
            id.to_owned(),
            Group {
                id: id.to_owned(),
                title: title.to_owned(),
                owner: from.to_owned(),
                members: members.iter().cloned().collect(),
            },
        );
        true
    }

    /// Inbound GROUP_UPDATE: the conveyed member set authoritatively replaces
    /// our view. For an unknown group the sender is trusted as owner, since
    /// a newly added member first learns of the group through this message.
    pub fn apply_remote_update(
        &mut self,
        from: &str,
        id: &str,
        title: &str,
        members: &[UserId],
        self_id: &str,
    ) -> RemoteUpdate {
        let known = match self.groups.get(id) {
            Some(group) if group.owner != from => return RemoteUpdate::Ignored,
            Some(_) => true,
            None => false,
        };
        if !members.iter().any(|m| m == self_id) {
            return match self.groups.remove(id) {
                Some(group) => RemoteUpdate::RemovedSelf { title: group.title },
                None => RemoteUpdate::Ignored,
            };
        }
        self.groups.insert(
            id.to_owned(),
            Group {
                id: id.to_owned(),
                title: title.to_owned(),
                owner: from.to_owned(),
                members: members.iter().cloned().collect(),
            },
        );
        RemoteUpdate::Joined {
            title: title.to_owned(),
            new_to_us: !known,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn is_member(&self, id: &str, user: &str) -> bool {
        self.groups
            .get(id)
            .map(|g| g.members.contains(user))
            .unwrap_or(false)
    }

    /// Groups ordered by id for stable listings.
    pub fn list(&self) -> Vec<&Group> {
        let mut out: Vec<&Group> = self.groups.values().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "alice@127.0.0.1";
    const BOB: &str = "bob@127.0.0.2";
    const CHARLIE: &str = "charlie@127.0.0.3";

    #[test]
    fn create_owner_is_sole_member() {
        let mut gm = GroupManager::new();
        let g = gm.create("study", "Study Group", ALICE).unwrap();
        assert_eq!(g.owner, ALICE);
        assert_eq!(g.member_list(), vec![ALICE.to_string()]);
        assert!(matches!(
            gm.create("study", "again", ALICE),
            Err(GroupError::AlreadyExists(_))
        ));
    }

    #[test]
    fn update_adds_and_removes() {
        let mut gm = GroupManager::new();
        gm.create("study", "Study Group", ALICE).unwrap();
        let (g, recipients) = gm
            .update_membership("study", ALICE, &[BOB.into(), CHARLIE.into()], &[])
            .unwrap();
        assert!(g.members.contains(BOB) && g.members.contains(CHARLIE));
        assert_eq!(recipients, vec![BOB.to_string(), CHARLIE.to_string()]);

        let (g, recipients) = gm
            .update_membership("study", ALICE, &[], &[CHARLIE.into()])
            .unwrap();
        assert!(!g.members.contains(CHARLIE));
        // The removed peer still has to hear about it.
        assert!(recipients.contains(&CHARLIE.to_string()));
        assert!(recipients.contains(&BOB.to_string()));
    }

    #[test]
    fn non_owner_update_rejected() {
        let mut gm = GroupManager::new();
        gm.create("study", "Study Group", ALICE).unwrap();
        assert_eq!(
            gm.update_membership("study", BOB, &[BOB.into()], &[]),
            Err(GroupError::NotOwner)
        );
    }

    #[test]
    fn remote_create_only_for_members() {
        let mut gm = GroupManager::new();
        assert!(!gm.apply_remote_create(ALICE, "g1", "One", &[ALICE.into()], BOB));
        assert!(gm.get("g1").is_none());
        assert!(gm.apply_remote_create(ALICE, "g1", "One", &[ALICE.into(), BOB.into()], BOB));
        assert_eq!(gm.get("g1").unwrap().owner, ALICE);
    }

    #[test]
    fn remote_update_replaces_member_set() {
        let mut gm = GroupManager::new();
        gm.apply_remote_create(ALICE, "g1", "One", &[ALICE.into(), BOB.into()], BOB);
        let res = gm.apply_remote_update(
            ALICE,
            "g1",
            "One",
            &[ALICE.into(), BOB.into(), CHARLIE.into()],
            BOB,
        );
        assert_eq!(
            res,
            RemoteUpdate::Joined {
                title: "One".into(),
                new_to_us: false
            }
        );
        assert!(gm.is_member("g1", CHARLIE));
    }

    #[test]
    fn remote_update_from_non_owner_ignored() {
        let mut gm = GroupManager::new();
        gm.apply_remote_create(ALICE, "g1", "One", &[ALICE.into(), BOB.into()], BOB);
        let res = gm.apply_remote_update(CHARLIE, "g1", "One", &[CHARLIE.into()], BOB);
        assert_eq!(res, RemoteUpdate::Ignored);
        assert_eq!(gm.get("g1").unwrap().owner, ALICE);
    }

    #[test]
    fn remote_update_for_unknown_group_adopts_it() {
        let mut gm = GroupManager::new();
        let res = gm.apply_remote_update(ALICE, "g2", "Two", &[ALICE.into(), BOB.into()], BOB);
        assert_eq!(
            res,
            RemoteUpdate::Joined {
                title: "Two".into(),
                new_to_us: true
            }
        );
        assert_eq!(gm.get("g2").unwrap().owner, ALICE);
    }

    #[test]
    fn remote_update_dropping_self_forgets_group() {
        let mut gm = GroupManager::new();
        gm.apply_remote_create(ALICE, "g1", "One", &[ALICE.into(), BOB.into()], BOB);
        let res = gm.apply_remote_update(ALICE, "g1", "One", &[ALICE.into()], BOB);
        assert_eq!(res, RemoteUpdate::RemovedSelf { title: "One".into() });
        assert!(gm.get("g1").is_none());
    }
}
