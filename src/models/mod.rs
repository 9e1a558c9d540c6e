// src/models/mod.rs

pub mod identity;
pub mod organization;
pub mod membership;
pub mod serde_helpers;

// Re-exports

pub use identity::Identity;
pub use organization::{Organization, OrganizationPatch};
pub use membership::{MemberView, Membership, MembershipStatus, Role, TransitionError};

/// Имена коллекций удалённого сервиса данных
pub mod collections {
    pub const USERS: &str = "users";
    pub const ORGANISATION: &str = "Organisation";
    pub const ORGANISATION_MEMBERS: &str = "OrganisationMembers";
    pub const CCTV_FOOTAGE: &str = "CctvFootage";
    pub const REFERENCE_PHOTO: &str = "ReferencePhoto";
    pub const CASES: &str = "Cases";
}
