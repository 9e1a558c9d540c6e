// src/directory.rs

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::models::collections::{ORGANISATION, ORGANISATION_MEMBERS, USERS};
use crate::models::serde_helpers::format_remote_datetime;
use crate::models::*;
use crate::remote::{FileUpload, Filter, ListQuery, Record, RecordBody, RemoteDataService, RemoteError};

/// Типизированный доступ к записям пользователей, организаций и членств
/// поверх общего API записей.
#[derive(Clone)]
pub struct Directory {
    remote: Arc<dyn RemoteDataService>,
}

/// Поля новой записи членства
#[derive(Debug, Clone)]
pub struct NewMembership<'a> {
    pub organisation: &'a str,
    pub member: &'a str,
    pub role: Role,
    pub status: MembershipStatus,
}

/// Частичное обновление членства
#[derive(Debug, Clone, Default)]
pub struct MembershipPatch<'a> {
    pub organisation: Option<&'a str>,
    pub member: Option<&'a str>,
    pub role: Option<Role>,
    pub status: Option<MembershipStatus>,
    pub touch: bool,
}

impl MembershipPatch<'_> {
    fn into_body(self) -> RecordBody {
        let mut body = RecordBody::new();
        if let Some(organisation) = self.organisation {
            body = body.field("organisation", organisation);
        }
        if let Some(member) = self.member {
            body = body.field("member", member);
        }
        if let Some(role) = self.role {
            body = body.field("role", role.as_str());
        }
        if let Some(status) = self.status {
            body = body.field("status", status.as_str());
        }
        if self.touch {
            body = body.field("last_active", format_remote_datetime(&Utc::now()));
        }
        body
    }
}

impl Directory {
    pub fn new(remote: Arc<dyn RemoteDataService>) -> Self {
        Self { remote }
    }

    pub fn remote(&self) -> &Arc<dyn RemoteDataService> {
        &self.remote
    }

    // === IDENTITY ===

    pub async fn get_identity(&self, id: &str) -> Result<Identity, RemoteError> {
        self.remote.get_record(USERS, id).await?.decode()
    }

    /// Поиск по точному совпадению email
    pub async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, RemoteError> {
        let query = ListQuery::filtered(Filter::eq("email", email)).per_page(1);
        let page = self.remote.list_records(USERS, &query).await?;
        page.items.first().map(Record::decode).transpose()
    }

    pub async fn create_identity(&self, email: &str, name: &str, password: &str) -> Result<Identity, RemoteError> {
        let body = RecordBody::new()
            .field("email", email)
            .field("name", name)
            .field("password", password)
            .field("passwordConfirm", password)
            .field("emailVisibility", true);
        self.remote.create_record(USERS, body).await?.decode()
    }

    pub async fn get_identities(&self, ids: &BTreeSet<String>) -> Result<Vec<Identity>, RemoteError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = ListQuery::filtered(Filter::any_of("id", ids.iter().map(String::as_str)));
        let records = self.remote.list_all(USERS, &query).await?;
        records.iter().map(Record::decode).collect()
    }

    // === ORGANIZATION ===

    pub async fn get_organization(&self, id: &str) -> Result<Organization, RemoteError> {
        self.remote.get_record(ORGANISATION, id).await?.decode()
    }

    pub async fn create_organization(&self, name: &str, created_by: &str) -> Result<Organization, RemoteError> {
        let body = RecordBody::new()
            .field("name", name)
            .field("created_by", created_by);
        self.remote.create_record(ORGANISATION, body).await?.decode()
    }

    /// Обновление всегда пересылает обязательные поля (`name`, `created_by`)
    pub async fn update_organization(
        &self,
        id: &str,
        name: &str,
        created_by: &str,
        logo: Option<FileUpload>,
    ) -> Result<Organization, RemoteError> {
        let mut body = RecordBody::new()
            .field("name", name)
            .field("created_by", created_by);
        if let Some(mut upload) = logo {
            upload.field = "logo".to_string();
            body = body.file(upload);
        }
        self.remote.update_record(ORGANISATION, id, body).await?.decode()
    }

    pub async fn delete_organization(&self, id: &str) -> Result<(), RemoteError> {
        self.remote.delete_record(ORGANISATION, id).await
    }

    /// Число активных членств организации
    pub async fn count_active_members(&self, organisation_id: &str) -> Result<u64, RemoteError> {
        let query = ListQuery::filtered(
            Filter::eq("organisation", organisation_id).and(Filter::eq("status", MembershipStatus::Active.as_str())),
        )
        .per_page(1);
        Ok(self.remote.list_records(ORGANISATION_MEMBERS, &query).await?.total_items)
    }

    /// Организация вместе со счётчиком активных участников
    pub async fn load_organization(&self, id: &str) -> Result<Organization, RemoteError> {
        let mut org = self.get_organization(id).await?;
        org.member_count = self.count_active_members(id).await?;
        Ok(org)
    }

    // === MEMBERSHIP ===

    pub async fn get_membership(&self, id: &str) -> Result<Membership, RemoteError> {
        self.remote.get_record(ORGANISATION_MEMBERS, id).await?.decode()
    }

    /// Самое свежее активное членство пользователя
    pub async fn find_active_membership(&self, member_id: &str) -> Result<Option<Membership>, RemoteError> {
        let query = ListQuery::filtered(
            Filter::eq("member", member_id).and(Filter::eq("status", MembershipStatus::Active.as_str())),
        )
        .sort("-created")
        .per_page(1);
        let page = self.remote.list_records(ORGANISATION_MEMBERS, &query).await?;
        page.items.first().map(Record::decode).transpose()
    }

    /// Все членства организации, в любом статусе
    pub async fn list_memberships(&self, organisation_id: &str) -> Result<Vec<Membership>, RemoteError> {
        let query = ListQuery::filtered(Filter::eq("organisation", organisation_id)).sort("created");
        let records = self.remote.list_all(ORGANISATION_MEMBERS, &query).await?;
        records.iter().map(Record::decode).collect()
    }

    pub async fn create_membership(&self, new: NewMembership<'_>) -> Result<Membership, RemoteError> {
        let mut body = RecordBody::new()
            .field("organisation", new.organisation)
            .field("member", new.member)
            .field("role", new.role.as_str())
            .field("status", new.status.as_str());
        if new.status == MembershipStatus::Active {
            body = body.field("last_active", format_remote_datetime(&Utc::now()));
        } else {
            body = body.field("last_active", Value::String(String::new()));
        }
        self.remote.create_record(ORGANISATION_MEMBERS, body).await?.decode()
    }

    pub async fn update_membership(&self, id: &str, patch: MembershipPatch<'_>) -> Result<Membership, RemoteError> {
        self.remote
            .update_record(ORGANISATION_MEMBERS, id, patch.into_body())
            .await?
            .decode()
    }

    pub async fn delete_membership(&self, id: &str) -> Result<(), RemoteError> {
        self.remote.delete_record(ORGANISATION_MEMBERS, id).await
    }

    // === FILES ===

    pub fn organization_logo_url(&self, org: &Organization) -> Option<String> {
        let logo = org.logo.as_deref()?;
        self.remote.file_url(ORGANISATION, &org.id, logo)
    }
}
