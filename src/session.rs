// src/session.rs

use rand::RngCore;
use reqwest::Url;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::credential::{Credential, CREDENTIAL_KEY};
use crate::directory::{Directory, MembershipPatch, NewMembership};
use crate::events::{EventHub, SessionEvent, SessionEventKind};
use crate::models::*;
use crate::oauth::OAuthHandshake;
use crate::remote::{AuthResponse, OAuthCodeExchange, RemoteDataService, RemoteError};
use crate::storage::{LocalStore, StorageError};

/// Ошибки менеджера сессии
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to deliver verification code: {0}")]
    Delivery(#[source] RemoteError),
    #[error("Invalid or expired verification code")]
    InvalidCode,
    #[error("OAuth2 sign-in failed: {0}")]
    OAuth(String),
    #[error("Invalid invite: no pending membership {token} in organization {organization_id}")]
    InvalidInvite { organization_id: String, token: String },
    #[error("No registered user with email {0}")]
    UserNotFound(String),
    #[error("Not signed in")]
    NotAuthenticated,
    #[error("No current organization")]
    NoOrganization,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Публичное состояние сессии. Потребители получают только снимки.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub organization: Option<Organization>,
    pub role: Option<Role>,
    pub is_loading: bool,
    pub needs_organization_selection: bool,
}

impl SessionState {
    /// До первого `bootstrap()`
    pub fn initial() -> Self {
        Self {
            is_loading: true,
            ..Self::signed_out()
        }
    }

    pub fn signed_out() -> Self {
        Self {
            identity: None,
            organization: None,
            role: None,
            is_loading: false,
            needs_organization_selection: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}

/// Настройки менеджера
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub oauth_provider: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            oauth_provider: "google".to_string(),
        }
    }
}

/// Приглашение: передаётся приглашённому вне системы
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invite {
    pub organization_id: String,
    pub token: String,
}

impl fmt::Display for Invite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "organization={} invite={}", self.organization_id, self.token)
    }
}

struct Refreshed {
    identity: Identity,
    organization: Option<Organization>,
    role: Option<Role>,
}

/// Менеджер сессии и членства: единственный владелец учётных данных
/// и кэша пользователя/организации.
pub struct SessionManager {
    directory: Directory,
    remote: Arc<dyn RemoteDataService>,
    store: Arc<dyn LocalStore>,
    handshake: Option<Arc<dyn OAuthHandshake>>,
    settings: SessionSettings,
    state: watch::Sender<SessionState>,
    events: EventHub,
}

impl SessionManager {
    pub fn new(remote: Arc<dyn RemoteDataService>, store: Arc<dyn LocalStore>) -> Self {
        let (state, _) = watch::channel(SessionState::initial());
        Self {
            directory: Directory::new(remote.clone()),
            remote,
            store,
            handshake: None,
            settings: SessionSettings::default(),
            state,
            events: EventHub::new(),
        }
    }

    pub fn with_oauth(mut self, handshake: Arc<dyn OAuthHandshake>, provider: impl Into<String>) -> Self {
        self.handshake = Some(handshake);
        self.settings.oauth_provider = provider.into();
        self
    }

    /// Завершить жизненный цикл менеджера. Сессию не закрывает:
    /// учётные данные остаются в хранилище.
    pub fn dispose(self) {
        if let Err(e) = self.store.flush() {
            warn!(error = %e, "failed to flush local store on dispose");
        }
        debug!("session manager disposed");
    }

    // === STATE ===

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    pub fn organization(&self) -> Option<Organization> {
        self.state.borrow().organization.clone()
    }

    pub fn role(&self) -> Option<Role> {
        self.state.borrow().role
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn needs_organization_selection(&self) -> bool {
        self.state.borrow().needs_organization_selection
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn organization_logo_url(&self) -> Option<String> {
        let org = self.organization()?;
        self.directory.organization_logo_url(&org)
    }

    fn set_loading(&self, loading: bool) {
        self.state.send_if_modified(|s| {
            let changed = s.is_loading != loading;
            s.is_loading = loading;
            changed
        });
    }

    fn require_identity(&self) -> Result<Identity, SessionError> {
        self.identity().ok_or(SessionError::NotAuthenticated)
    }

    fn require_organization_id(&self) -> Result<String, SessionError> {
        let state = self.state.borrow();
        if state.identity.is_none() {
            return Err(SessionError::NotAuthenticated);
        }
        state
            .organization
            .as_ref()
            .map(|org| org.id.clone())
            .ok_or(SessionError::NoOrganization)
    }

    // === CREDENTIAL ===

    fn load_credential(&self) -> Option<Credential> {
        let raw = self.store.get(CREDENTIAL_KEY)?;
        match serde_json::from_value::<Credential>(raw) {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!(error = %e, "stored credential is unreadable");
                None
            }
        }
    }

    fn discard_credential(&self) {
        self.remote.set_auth_token(None);
        if let Err(e) = self.store.remove(CREDENTIAL_KEY) {
            warn!(error = %e, "failed to remove stored credential");
        }
    }

    fn accept_credential(&self, auth: AuthResponse) -> Result<(), SessionError> {
        let credential = Credential::new(auth.token, auth.record.id());
        let value = serde_json::to_value(&credential)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.store.set(CREDENTIAL_KEY, value)?;
        self.remote.set_auth_token(Some(credential.token));
        Ok(())
    }

    // === BOOTSTRAP ===

    /// Восстановить сессию из сохранённых учётных данных.
    /// Никогда не падает: при ошибке остаётся состояние «не вошёл».
    #[instrument(name = "session_bootstrap", skip(self))]
    pub async fn bootstrap(&self) {
        if let Err(e) = self.reload().await {
            warn!(error = %e, "session refresh failed; continuing signed out");
        }
    }

    /// То же, что `bootstrap`, но ошибка обновления возвращается вызывающему.
    /// Состояние публикуется в любом случае.
    async fn reload(&self) -> Result<(), SessionError> {
        self.set_loading(true);
        let previous = self.identity().map(|i| i.id);

        let (next, outcome) = match self.refresh_session().await {
            Ok(Some(refreshed)) => (
                SessionState {
                    needs_organization_selection: !refreshed.identity.has_organization(),
                    identity: Some(refreshed.identity),
                    organization: refreshed.organization,
                    role: refreshed.role,
                    is_loading: false,
                },
                Ok(()),
            ),
            Ok(None) => (SessionState::signed_out(), Ok(())),
            Err(e) => (SessionState::signed_out(), Err(e)),
        };

        let current = next.identity.as_ref().map(|i| i.id.clone());
        let org_id = next.organization.as_ref().map(|o| o.id.clone());
        self.state.send_replace(next);

        match (previous, current) {
            (prev, Some(id)) if prev.as_deref() != Some(id.as_str()) => {
                info!(identity_id = %id, organization_id = ?org_id, "signed in");
                self.events.emit(SessionEventKind::SignedIn { identity_id: id });
            }
            (Some(_), None) => {
                info!("signed out");
                self.events.emit(SessionEventKind::SignedOut);
            }
            _ => {}
        }
        outcome
    }

    /// Загрузить сессию после получения учётных данных: вход без личности
    /// считается неудачным
    async fn complete_login(&self) -> Result<SessionState, SessionError> {
        if let Err(e) = self.reload().await {
            warn!(error = %e, "credential accepted but session could not be loaded");
            return Err(e);
        }
        let state = self.snapshot();
        if state.identity.is_none() {
            return Err(SessionError::NotAuthenticated);
        }
        Ok(state)
    }

    async fn refresh_session(&self) -> Result<Option<Refreshed>, SessionError> {
        let Some(credential) = self.load_credential() else {
            self.remote.set_auth_token(None);
            return Ok(None);
        };
        let subject = credential.subject();
        let identity_id = match subject {
            Some(id) if credential.is_structurally_valid() => id,
            _ => {
                info!("discarding malformed or expired credential");
                self.discard_credential();
                return Ok(None);
            }
        };
        self.remote.set_auth_token(Some(credential.token.clone()));

        let mut identity = self.directory.get_identity(&identity_id).await?;
        let membership = self.directory.find_active_membership(&identity.id).await?;

        // членство единственный источник организации
        identity.organisation_id.clear();
        let (organization, role) = match membership {
            Some(membership) => {
                identity.organisation_id = membership.organisation.clone();
                let org = self.directory.load_organization(&membership.organisation).await?;
                (Some(org), Some(membership.role))
            }
            None => (None, None),
        };

        Ok(Some(Refreshed {
            identity,
            organization,
            role,
        }))
    }

    // === CREDENTIAL ACQUISITION ===

    /// Убедиться, что пользователь существует, и отправить одноразовый код.
    /// Возвращает идентификатор вызова.
    #[instrument(name = "session_request_code", skip(self, name))]
    pub async fn request_verification_code(&self, name: &str, email: &str) -> Result<String, SessionError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(SessionError::InvalidInput("Email must not be empty".to_string()));
        }

        let password = throwaway_password();
        match self.directory.create_identity(email, name.trim(), &password).await {
            Ok(identity) => info!(identity_id = %identity.id, "registered new identity"),
            Err(e) if e.is_duplicate() => debug!("identity already exists"),
            Err(e) => {
                warn!(error = %e, "identity creation failed");
                return Err(SessionError::Remote(e));
            }
        }

        self.remote.request_otp(email).await.map_err(|e| {
            warn!(error = %e, "verification code delivery failed");
            SessionError::Delivery(e)
        })
    }

    /// Обменять идентификатор вызова и код на учётные данные и загрузить сессию
    #[instrument(name = "session_verify_code", skip(self, code))]
    pub async fn verify_code_and_login(&self, challenge_id: &str, code: &str) -> Result<SessionState, SessionError> {
        self.set_loading(true);
        let auth = match self.remote.auth_with_otp(challenge_id.trim(), code.trim()).await {
            Ok(auth) => auth,
            Err(e) => {
                self.set_loading(false);
                return Err(match e.status() {
                    Some(400) | Some(401) | Some(404) => SessionError::InvalidCode,
                    _ => SessionError::Remote(e),
                });
            }
        };
        if let Err(e) = self.accept_credential(auth) {
            self.set_loading(false);
            return Err(e);
        }
        self.complete_login().await
    }

    /// Вход через OAuth2-провайдера
    #[instrument(name = "session_login_provider", skip(self))]
    pub async fn login_with_provider(&self) -> Result<SessionState, SessionError> {
        let handshake = self
            .handshake
            .clone()
            .ok_or_else(|| SessionError::OAuth("no OAuth2 handshake configured".to_string()))?;

        self.set_loading(true);
        let auth = match self.provider_exchange(handshake.as_ref()).await {
            Ok(auth) => auth,
            Err(e) => {
                self.set_loading(false);
                return Err(e);
            }
        };
        if let Err(e) = self.accept_credential(auth) {
            self.set_loading(false);
            return Err(e);
        }
        self.complete_login().await
    }

    async fn provider_exchange(&self, handshake: &dyn OAuthHandshake) -> Result<AuthResponse, SessionError> {
        let wanted = self.settings.oauth_provider.as_str();
        let provider = self
            .remote
            .auth_methods()
            .await
            .map_err(|e| SessionError::OAuth(e.to_string()))?
            .into_iter()
            .find(|p| p.name == wanted)
            .ok_or_else(|| SessionError::OAuth(format!("provider {} is not enabled", wanted)))?;

        let redirect_url = handshake.redirect_url();
        let auth_url = with_redirect(&provider.auth_url, &redirect_url)?;
        let callback = handshake
            .authorize(&auth_url)
            .await
            .map_err(|e| SessionError::OAuth(e.to_string()))?;
        if callback.state != provider.state {
            return Err(SessionError::OAuth("state mismatch in provider callback".to_string()));
        }

        let exchange = OAuthCodeExchange {
            provider: provider.name,
            code: callback.code,
            code_verifier: provider.code_verifier,
            redirect_url,
            create_data: Some(serde_json::json!({ "emailVisibility": true })),
        };
        self.remote
            .auth_with_oauth2(&exchange)
            .await
            .map_err(|e| SessionError::OAuth(e.to_string()))
    }

    // === ORGANIZATION ===

    /// Создать организацию и членство основателя (`admin`, `active`).
    /// Если членство не создалось, организация удаляется.
    #[instrument(name = "session_create_organization", skip(self))]
    pub async fn create_organization(&self, name: &str) -> Result<Organization, SessionError> {
        let identity = self.require_identity()?;
        let name = Organization::normalize_name(name).map_err(SessionError::InvalidInput)?;

        let org = self.directory.create_organization(&name, &identity.id).await?;
        let founder = NewMembership {
            organisation: &org.id,
            member: &identity.id,
            role: Role::Admin,
            status: MembershipStatus::Active,
        };
        if let Err(e) = self.directory.create_membership(founder).await {
            warn!(organization_id = %org.id, error = %e, "founding membership failed; deleting organization");
            if let Err(cleanup) = self.directory.delete_organization(&org.id).await {
                error!(organization_id = %org.id, error = %cleanup, "organization left without members");
            }
            return Err(e.into());
        }
        info!(organization_id = %org.id, "organization created");

        if let Err(e) = self.reload().await {
            warn!(organization_id = %org.id, error = %e, "organization created but session reload failed");
            return Err(e);
        }
        self.events.emit(SessionEventKind::OrganizationChanged {
            organization_id: org.id.clone(),
        });
        Ok(self.organization().filter(|current| current.id == org.id).unwrap_or(org))
    }

    /// Погасить приглашение: существующее `pending`-членство организации
    #[instrument(name = "session_join_organization", skip(self, membership_token))]
    pub async fn join_organization(&self, organization_id: &str, membership_token: &str) -> Result<Organization, SessionError> {
        let identity = self.require_identity()?;
        let organization_id = organization_id.trim();
        let token = membership_token.trim().to_lowercase();
        let invalid = || SessionError::InvalidInvite {
            organization_id: organization_id.to_string(),
            token: token.clone(),
        };
        if organization_id.is_empty() || token.is_empty() {
            return Err(invalid());
        }

        let invite = match self.directory.get_membership(&token).await {
            Ok(invite) => invite,
            Err(e) if e.is_not_found() => return Err(invalid()),
            Err(e) => return Err(e.into()),
        };
        if !invite.is_redeemable_for(organization_id) {
            debug!(status = %invite.status, "membership is not a pending invite for this organization");
            return Err(invalid());
        }

        let patch = MembershipPatch {
            organisation: Some(organization_id),
            member: Some(&identity.id),
            role: Some(Role::Member),
            status: Some(invite.status.activate()?),
            touch: true,
        };
        match self.directory.update_membership(&invite.id, patch).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Err(invalid()),
            Err(e) => return Err(e.into()),
        }
        info!(organization_id, "joined organization");

        if let Err(e) = self.reload().await {
            warn!(organization_id, error = %e, "joined organization but session reload failed");
            return Err(e);
        }
        self.events.emit(SessionEventKind::OrganizationChanged {
            organization_id: organization_id.to_string(),
        });
        self.events.emit(SessionEventKind::MembersChanged {
            organization_id: organization_id.to_string(),
        });
        self.organization().ok_or(SessionError::NoOrganization)
    }

    /// Частичное обновление организации (имя и/или логотип)
    #[instrument(name = "session_update_organization", skip(self, patch))]
    pub async fn update_organization(&self, id: &str, patch: OrganizationPatch) -> Result<Organization, SessionError> {
        if patch.is_empty() {
            return Err(SessionError::InvalidInput("Nothing to update".to_string()));
        }

        let current = match self.organization().filter(|org| org.id == id) {
            Some(org) => org,
            None => self.directory.get_organization(id).await?,
        };
        let name = match &patch.name {
            Some(name) => Organization::normalize_name(name).map_err(SessionError::InvalidInput)?,
            None => current.name.clone(),
        };

        let updated = self
            .directory
            .update_organization(id, &name, &current.created_by, patch.logo)
            .await?;

        self.state.send_if_modified(|s| match s.organization.as_mut() {
            Some(org) if org.id == id => {
                org.merge_from(updated.clone());
                true
            }
            _ => false,
        });
        self.events.emit(SessionEventKind::OrganizationChanged {
            organization_id: id.to_string(),
        });
        Ok(self.organization().filter(|org| org.id == id).unwrap_or(updated))
    }

    /// Перечитать текущую организацию и счётчик активных участников
    #[instrument(name = "session_refresh_organization", skip(self))]
    pub async fn refresh_organization(&self) -> Result<Organization, SessionError> {
        let org_id = self.require_organization_id()?;
        let org = self.directory.load_organization(&org_id).await?;
        self.state.send_if_modified(|s| match s.organization.as_ref() {
            Some(current) if current.id == org.id => {
                s.organization = Some(org.clone());
                true
            }
            _ => false,
        });
        Ok(org)
    }

    // === MEMBERSHIP ADMINISTRATION ===

    /// Пригласить зарегистрированного пользователя в текущую организацию
    #[instrument(name = "session_invite_member", skip(self))]
    pub async fn create_member_invite(&self, email: &str) -> Result<Invite, SessionError> {
        let organization_id = self.require_organization_id()?;
        let email = email.trim();
        if email.is_empty() {
            return Err(SessionError::InvalidInput("Email must not be empty".to_string()));
        }

        let invitee = self
            .directory
            .find_identity_by_email(email)
            .await?
            .ok_or_else(|| SessionError::UserNotFound(email.to_string()))?;
        let membership = self
            .directory
            .create_membership(NewMembership {
                organisation: &organization_id,
                member: &invitee.id,
                role: Role::Member,
                status: MembershipStatus::Pending,
            })
            .await?;
        info!(membership_id = %membership.id, "invite created");

        self.events.emit(SessionEventKind::MembersChanged {
            organization_id: organization_id.clone(),
        });
        Ok(Invite {
            organization_id,
            token: membership.id,
        })
    }

    /// Все членства текущей организации с email и именем пользователя
    #[instrument(name = "session_fetch_members", skip(self))]
    pub async fn fetch_organization_members(&self) -> Result<Vec<MemberView>, SessionError> {
        let organization_id = self.require_organization_id()?;
        let memberships = self.directory.list_memberships(&organization_id).await?;

        let ids: BTreeSet<String> = memberships.iter().map(|m| m.member.clone()).collect();
        let identities: HashMap<String, Identity> = self
            .directory
            .get_identities(&ids)
            .await?
            .into_iter()
            .map(|identity| (identity.id.clone(), identity))
            .collect();

        Ok(memberships
            .into_iter()
            .map(|m| {
                let identity = identities.get(&m.member);
                MemberView {
                    email: identity.map(|i| i.email.clone()).unwrap_or_default(),
                    name: identity.map(|i| i.name.clone()).unwrap_or_default(),
                    membership_id: m.id,
                    identity_id: m.member,
                    role: m.role,
                    status: m.status,
                    last_active: m.last_active,
                }
            })
            .collect())
    }

    #[instrument(name = "session_update_member_role", skip(self))]
    pub async fn update_member_role(&self, membership_id: &str, role: Role) -> Result<Membership, SessionError> {
        let patch = MembershipPatch {
            role: Some(role),
            ..MembershipPatch::default()
        };
        let membership = self
            .directory
            .update_membership(membership_id, patch)
            .await
            .inspect_err(|e| warn!(membership_id, error = %e, "role change failed"))?;
        self.events.emit(SessionEventKind::MembersChanged {
            organization_id: membership.organisation.clone(),
        });
        Ok(membership)
    }

    /// Включить или отключить участника
    #[instrument(name = "session_set_member_active", skip(self))]
    pub async fn set_member_active(&self, membership_id: &str, active: bool) -> Result<Membership, SessionError> {
        let membership = self
            .directory
            .get_membership(membership_id)
            .await
            .inspect_err(|e| warn!(membership_id, error = %e, "membership lookup failed"))?;
        let status = if active {
            membership.status.activate()?
        } else {
            membership.status.deactivate()?
        };
        let patch = MembershipPatch {
            status: Some(status),
            touch: active,
            ..MembershipPatch::default()
        };
        let membership = self
            .directory
            .update_membership(membership_id, patch)
            .await
            .inspect_err(|e| warn!(membership_id, error = %e, "status change failed"))?;
        self.events.emit(SessionEventKind::MembersChanged {
            organization_id: membership.organisation.clone(),
        });
        Ok(membership)
    }

    #[instrument(name = "session_remove_member", skip(self))]
    pub async fn remove_member(&self, membership_id: &str) -> Result<(), SessionError> {
        self.directory
            .delete_membership(membership_id)
            .await
            .inspect_err(|e| warn!(membership_id, error = %e, "member removal failed"))?;
        if let Ok(organization_id) = self.require_organization_id() {
            self.events.emit(SessionEventKind::MembersChanged { organization_id });
        }
        Ok(())
    }

    // === TEARDOWN ===

    /// Закрыть сессию: стереть учётные данные, кэш и всё локальное хранилище.
    /// Идемпотентно, ошибки только пишутся в журнал.
    pub fn end_session(&self) {
        self.remote.set_auth_token(None);
        if let Err(e) = self.store.remove(CREDENTIAL_KEY) {
            warn!(error = %e, "failed to remove stored credential");
        }
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "failed to clear local store");
        }

        let previous = self.state.send_replace(SessionState::signed_out());
        if previous.identity.is_some() {
            info!("signed out");
            self.events.emit(SessionEventKind::SignedOut);
        }
    }
}

/// Подставить адрес возврата в URL провайдера (`redirect_uri`)
fn with_redirect(auth_url: &str, redirect_url: &str) -> Result<String, SessionError> {
    let mut url = Url::parse(auth_url).map_err(|e| SessionError::OAuth(format!("invalid provider url: {}", e)))?;
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "redirect_uri")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair("redirect_uri", redirect_url);
    Ok(url.to_string())
}

/// Одноразовый пароль для регистрации: вход всё равно только по коду
fn throwaway_password() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
