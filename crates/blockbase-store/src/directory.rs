//! Host team/channel directory.
//!
//! The ownership and category migrations need to know who is in which
//! channel and team. In plugin mode the host provides a [`TeamDirectory`];
//! [`MemoryDirectory`] serves standalone deployments and tests.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use thiserror::Error;

/// Errors from a directory lookup. A failure concerns one item only; the
/// migrations skip that item and carry on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("user {0} has no active team")]
    NoActiveTeam(String),

    #[error("creator {creator} of channel {channel} is not in any member team")]
    CreatorNotInTeam { channel: String, creator: String },

    #[error("channel {0} has no members")]
    NoMembers(String),

    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Kind of a host channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Open,
    Private,
    Direct,
    Group,
}

impl ChannelKind {
    /// Direct and group messages live outside any team.
    pub fn is_direct_or_group(self) -> bool {
        matches!(self, ChannelKind::Direct | ChannelKind::Group)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    pub id: String,
    /// Empty for direct and group messages.
    pub team_id: String,
    pub display_name: String,
    pub kind: ChannelKind,
    pub creator_id: String,
}

impl Channel {
    pub fn new(id: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            id: id.into(),
            team_id: String::new(),
            display_name: String::new(),
            kind,
            creator_id: String::new(),
        }
    }

    pub fn with_team(mut self, team_id: impl Into<String>) -> Self {
        self.team_id = team_id.into();
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_creator(mut self, user_id: impl Into<String>) -> Self {
        self.creator_id = user_id.into();
        self
    }
}

/// State of a user's membership in a team.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Membership {
    Active,
    /// The user left or was removed.
    Deleted,
    /// The user never belonged to the team.
    None,
}

/// Channel and team membership answers supplied by the host.
pub trait TeamDirectory: Send + Sync {
    fn channel(&self, channel_id: &str) -> Result<Option<Channel>, DirectoryError>;

    /// Member user ids of a channel, in id order.
    fn channel_members(&self, channel_id: &str) -> Result<Vec<String>, DirectoryError>;

    /// Teams a user is an active member of, in the host's team order.
    fn user_teams(&self, user_id: &str) -> Result<Vec<String>, DirectoryError>;

    fn team_membership(&self, team_id: &str, user_id: &str) -> Result<Membership, DirectoryError>;

    /// Active teams of every channel member, keyed by user id.
    fn channel_member_teams(
        &self,
        channel_id: &str,
    ) -> Result<BTreeMap<String, Vec<String>>, DirectoryError> {
        self.channel_members(channel_id)?
            .into_iter()
            .map(|user| {
                let teams = self.user_teams(&user)?;
                Ok((user, teams))
            })
            .collect()
    }
}

#[derive(Default)]
struct DirectoryState {
    channels: BTreeMap<String, Channel>,
    members: BTreeMap<String, BTreeSet<String>>,
    teams: BTreeMap<String, Vec<(String, Membership)>>,
    unavailable_channels: BTreeSet<String>,
}

/// In-process [`TeamDirectory`].
#[derive(Default)]
pub struct MemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&self, channel: Channel) {
        self.state
            .write()
            .channels
            .insert(channel.id.clone(), channel);
    }

    pub fn add_channel_member(&self, channel_id: &str, user_id: &str) {
        self.state
            .write()
            .members
            .entry(channel_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    /// Add (or reactivate) a team membership. Team order is insertion order.
    pub fn add_team_member(&self, team_id: &str, user_id: &str) {
        let mut state = self.state.write();
        let teams = state.teams.entry(user_id.to_string()).or_default();
        match teams.iter_mut().find(|(t, _)| t == team_id) {
            Some((_, membership)) => *membership = Membership::Active,
            None => teams.push((team_id.to_string(), Membership::Active)),
        }
    }

    /// Mark a membership deleted; the user keeps a record of having belonged.
    pub fn remove_team_member(&self, team_id: &str, user_id: &str) {
        let mut state = self.state.write();
        if let Some(teams) = state.teams.get_mut(user_id) {
            for (t, membership) in teams.iter_mut() {
                if t == team_id {
                    *membership = Membership::Deleted;
                }
            }
        }
    }

    /// Make every lookup touching `channel_id` fail.
    pub fn set_channel_unavailable(&self, channel_id: &str) {
        self.state
            .write()
            .unavailable_channels
            .insert(channel_id.to_string());
    }

    fn check_available(state: &DirectoryState, channel_id: &str) -> Result<(), DirectoryError> {
        if state.unavailable_channels.contains(channel_id) {
            return Err(DirectoryError::Unavailable(format!("channel {channel_id}")));
        }
        Ok(())
    }
}

impl TeamDirectory for MemoryDirectory {
    fn channel(&self, channel_id: &str) -> Result<Option<Channel>, DirectoryError> {
        let state = self.state.read();
        Self::check_available(&state, channel_id)?;
        Ok(state.channels.get(channel_id).cloned())
    }

    fn channel_members(&self, channel_id: &str) -> Result<Vec<String>, DirectoryError> {
        let state = self.state.read();
        Self::check_available(&state, channel_id)?;
        Ok(state
            .members
            .get(channel_id)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn user_teams(&self, user_id: &str) -> Result<Vec<String>, DirectoryError> {
        Ok(self
            .state
            .read()
            .teams
            .get(user_id)
            .map(|teams| {
                teams
                    .iter()
                    .filter(|(_, m)| *m == Membership::Active)
                    .map(|(t, _)| t.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn team_membership(&self, team_id: &str, user_id: &str) -> Result<Membership, DirectoryError> {
        Ok(self
            .state
            .read()
            .teams
            .get(user_id)
            .and_then(|teams| teams.iter().find(|(t, _)| t == team_id))
            .map_or(Membership::None, |(_, m)| *m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memberships() {
        let dir = MemoryDirectory::new();
        dir.add_team_member("team-a", "alice");
        dir.add_team_member("team-b", "alice");
        dir.remove_team_member("team-a", "alice");

        assert_eq!(dir.user_teams("alice").unwrap(), vec!["team-b".to_string()]);
        assert_eq!(dir.team_membership("team-a", "alice").unwrap(), Membership::Deleted);
        assert_eq!(dir.team_membership("team-b", "alice").unwrap(), Membership::Active);
        assert_eq!(dir.team_membership("team-c", "alice").unwrap(), Membership::None);

        dir.add_team_member("team-a", "alice");
        assert_eq!(dir.user_teams("alice").unwrap(), vec!["team-a", "team-b"]);
    }

    #[test]
    fn test_channel_member_teams() {
        let dir = MemoryDirectory::new();
        dir.add_channel(Channel::new("dm", ChannelKind::Direct).with_creator("bob"));
        dir.add_channel_member("dm", "bob");
        dir.add_channel_member("dm", "alice");
        dir.add_team_member("team-a", "alice");

        let teams = dir.channel_member_teams("dm").unwrap();
        assert_eq!(teams.keys().collect::<Vec<_>>(), vec!["alice", "bob"]);
        assert!(teams["bob"].is_empty());
        assert!(dir.channel("dm").unwrap().unwrap().kind.is_direct_or_group());
        assert_eq!(dir.channel("nope").unwrap(), None);
    }

    #[test]
    fn test_unavailable_channel() {
        let dir = MemoryDirectory::new();
        dir.add_channel(Channel::new("c1", ChannelKind::Group));
        dir.set_channel_unavailable("c1");
        assert!(matches!(dir.channel("c1"), Err(DirectoryError::Unavailable(_))));
        assert!(dir.channel_member_teams("c1").is_err());
    }
}
