//! Follow/leave rules driven by voice-state updates.

use crate::connection::LinkSnapshot;
use crate::platform::VoiceStateChange;
use std::collections::HashMap;
use vcbridge_types::{ChannelId, IdFilter, UserId};

/// Who is in which voice channel, as learned from voice-state updates.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    members: HashMap<UserId, Member>,
}

#[derive(Debug, Clone)]
struct Member {
    channel: ChannelId,
    is_bot: bool,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, change: &VoiceStateChange) {
        match &change.new_channel {
            Some(channel) => {
                self.members.insert(
                    change.user_id.clone(),
                    Member {
                        channel: channel.clone(),
                        is_bot: change.is_bot,
                    },
                );
            }
            None => {
                self.members.remove(&change.user_id);
            }
        }
    }

    /// Non-bot members currently in `channel`.
    pub fn humans_in(&self, channel: &str) -> usize {
        self.members
            .values()
            .filter(|m| m.channel == channel && !m.is_bot)
            .count()
    }

    pub fn channel_of(&self, user: &str) -> Option<&str> {
        self.members.get(user).map(|m| m.channel.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceDecision {
    /// Switch to this channel and connect.
    Follow(ChannelId),
    Leave(LeaveReason),
    Stay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    FollowedUserLeft,
    ChannelEmpty,
}

impl LeaveReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FollowedUserLeft => "followed user left",
            Self::ChannelEmpty => "no humans left",
        }
    }
}

pub struct PresenceRules {
    pub follow: IdFilter,
    pub leave_when_empty: bool,
}

impl PresenceRules {
    /// Decides what one voice-state update means for the bridge.
    ///
    /// `tracker` must already reflect `change`.
    pub fn decide(
        &self,
        change: &VoiceStateChange,
        link: &LinkSnapshot,
        tracker: &PresenceTracker,
    ) -> PresenceDecision {
        let followed = self.follow.lists(&change.user_id);

        if followed {
            if let Some(new) = &change.new_channel {
                let elsewhere = link.target.as_deref() != Some(new.as_str());
                if elsewhere || link.connected_to.is_none() || !link.want_connected {
                    return PresenceDecision::Follow(new.clone());
                }
            }
        }

        let Some(target) = link.target.as_deref() else {
            return PresenceDecision::Stay;
        };

        let left_target = change.old_channel.as_deref() == Some(target)
            && change.new_channel.as_deref() != Some(target);
        if !left_target {
            return PresenceDecision::Stay;
        }
        if followed {
            return PresenceDecision::Leave(LeaveReason::FollowedUserLeft);
        }
        if self.leave_when_empty && link.want_connected && tracker.humans_in(target) == 0 {
            return PresenceDecision::Leave(LeaveReason::ChannelEmpty);
        }
        PresenceDecision::Stay
    }
}
