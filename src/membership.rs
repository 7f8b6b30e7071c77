// src/membership.rs

//! Room membership policy.
//!
//! Maps a member's groups against a room's access policy to a MUC
//! affiliation. Admin precedence is total: one admin-granting group
//! overrides any number of member-granting groups.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::groupkey::GroupKey;

/// A user's persistent role in a MUC room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affiliation {
    Owner,
    Admin,
    Member,
    Outcast,
    None,
}

impl Affiliation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
            Self::Outcast => "outcast",
            Self::None => "none",
        }
    }

    /// Affiliations that grant room access (and therefore a bookmark)
    pub const fn grants_access(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin | Self::Member)
    }
}

impl fmt::Display for Affiliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Affiliation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            "outcast" => Ok(Self::Outcast),
            "none" => Ok(Self::None),
            other => Err(format!("unknown affiliation: {}", other)),
        }
    }
}

/// Compute the affiliation a user should hold in a room.
///
/// `admin` if the user shares a group with the room's admins, else
/// `member` if with the room's members, else `none`.
pub fn affiliation(
    user_groups: &BTreeSet<GroupKey>,
    room_admins: &BTreeSet<GroupKey>,
    room_members: &BTreeSet<GroupKey>,
) -> Affiliation {
    if !user_groups.is_disjoint(room_admins) {
        Affiliation::Admin
    } else if !user_groups.is_disjoint(room_members) {
        Affiliation::Member
    } else {
        Affiliation::None
    }
}
