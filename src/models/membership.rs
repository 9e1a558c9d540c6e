// src/models/membership.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::serde_helpers::remote_datetime_opt;

/// Роль участника в организации
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// Статус членства. Всё, что не `pending`/`active`, считается неактивным.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Pending,
    Active,
    #[serde(other)]
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Cannot {action} a membership that is {from}")]
pub struct TransitionError {
    pub from: MembershipStatus,
    pub action: &'static str,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Pending => "pending",
            MembershipStatus::Active => "active",
            MembershipStatus::Inactive => "inactive",
        }
    }

    /// pending → active (приглашение принято), inactive → active
    pub fn activate(self) -> Result<Self, TransitionError> {
        match self {
            MembershipStatus::Pending | MembershipStatus::Inactive => Ok(MembershipStatus::Active),
            MembershipStatus::Active => Err(TransitionError { from: self, action: "activate" }),
        }
    }

    /// active → inactive
    pub fn deactivate(self) -> Result<Self, TransitionError> {
        match self {
            MembershipStatus::Active => Ok(MembershipStatus::Inactive),
            _ => Err(TransitionError { from: self, action: "deactivate" }),
        }
    }
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Связь пользователь ↔ организация (коллекция `OrganisationMembers`).
/// `id` в статусе `pending` служит кодом приглашения.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub id: String,
    pub organisation: String,
    pub member: String,
    pub role: Role,
    pub status: MembershipStatus,
    #[serde(default, with = "remote_datetime_opt")]
    pub last_active: Option<DateTime<Utc>>,
}

impl Membership {
    pub fn is_active(&self) -> bool {
        self.status == MembershipStatus::Active
    }

    /// Может ли это членство быть погашено как приглашение в `organisation_id`
    pub fn is_redeemable_for(&self, organisation_id: &str) -> bool {
        self.status == MembershipStatus::Pending && self.organisation == organisation_id
    }
}

/// Запись участника для экрана управления составом
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct MemberView {
    pub membership_id: String,
    pub identity_id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub status: MembershipStatus,
    pub last_active: Option<DateTime<Utc>>,
}
