// tests/integration/session.rs

use async_trait::async_trait;
use reqwest::Url;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio_test::{assert_err, assert_ok};

use nirikshan::credential::CREDENTIAL_KEY;
use nirikshan::events::SessionEventKind;
use nirikshan::models::collections::{ORGANISATION, ORGANISATION_MEMBERS, USERS};
use nirikshan::models::{MembershipStatus, OrganizationPatch, Role};
use nirikshan::oauth::{AuthorizationCallback, HandshakeError, OAuthHandshake};
use nirikshan::remote::memory::FailPoint;
use nirikshan::remote::{FileUpload, MemoryRemote};
use nirikshan::storage::{LocalStore, MemoryStore};
use nirikshan::{SessionError, SessionManager, SessionState};

fn manager_on(remote: &Arc<MemoryRemote>) -> (SessionManager, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let manager = SessionManager::new(remote.clone(), store.clone());
    (manager, store)
}

async fn sign_in(remote: &Arc<MemoryRemote>, name: &str, email: &str) -> (SessionManager, Arc<MemoryStore>) {
    let (manager, store) = manager_on(remote);
    manager.bootstrap().await;
    let challenge = assert_ok!(manager.request_verification_code(name, email).await);
    let code = remote.last_code_for(email).expect("code delivered");
    assert_ok!(manager.verify_code_and_login(&challenge, &code).await);
    (manager, store)
}

async fn admin_with_org(remote: &Arc<MemoryRemote>) -> (SessionManager, Arc<MemoryStore>, String) {
    let (manager, store) = sign_in(remote, "Asha", "asha@precinct.io").await;
    let org = assert_ok!(manager.create_organization("Acme").await);
    (manager, store, org.id)
}

// === Вход ===

#[tokio::test]
async fn state_is_loading_until_bootstrap() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _) = manager_on(&remote);
    assert!(manager.is_loading());

    manager.bootstrap().await;
    assert_eq!(manager.snapshot(), SessionState::signed_out());
}

#[tokio::test]
async fn requesting_code_twice_for_new_email_succeeds() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _) = manager_on(&remote);

    assert_ok!(manager.request_verification_code("Ravi", "ravi@precinct.io").await);
    assert_ok!(manager.request_verification_code("Ravi", "ravi@precinct.io").await);

    assert_eq!(remote.records(USERS).len(), 1);
    let creates = remote.calls().iter().filter(|c| *c == "create:users").count();
    assert_eq!(creates, 2);
}

#[tokio::test]
async fn other_creation_failures_abort_code_request() {
    let remote = Arc::new(MemoryRemote::new());
    remote.fail_on(FailPoint::Create(USERS.to_string()));
    let (manager, _) = manager_on(&remote);

    let err = assert_err!(manager.request_verification_code("Ravi", "ravi@precinct.io").await);
    assert!(matches!(err, SessionError::Remote(_)));
    assert!(!remote.calls().contains(&"request_otp".to_string()));
}

#[tokio::test]
async fn delivery_failure_is_reported() {
    let remote = Arc::new(MemoryRemote::new());
    remote.fail_on(FailPoint::OtpDelivery);
    let (manager, _) = manager_on(&remote);

    let err = assert_err!(manager.request_verification_code("Ravi", "ravi@precinct.io").await);
    assert!(matches!(err, SessionError::Delivery(_)));
}

#[tokio::test]
async fn verified_login_without_membership_needs_organization() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, store) = manager_on(&remote);
    manager.bootstrap().await;
    let mut events = manager.events();

    let challenge = assert_ok!(manager.request_verification_code("Asha", "asha@precinct.io").await);
    let code = remote.last_code_for("asha@precinct.io").unwrap();
    let state = assert_ok!(manager.verify_code_and_login(&challenge, &code).await);

    let identity = state.identity.expect("signed in");
    assert_eq!(identity.email, "asha@precinct.io");
    assert!(identity.organisation_id.is_empty());
    assert!(state.needs_organization_selection);
    assert!(!state.is_loading);
    assert!(state.organization.is_none());
    assert!(store.get(CREDENTIAL_KEY).is_some());
    assert!(remote.auth_token().is_some());

    let event = events.try_recv().unwrap();
    assert_eq!(event.kind, SessionEventKind::SignedIn { identity_id: identity.id });
}

#[tokio::test]
async fn wrong_code_leaves_no_identity() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, store) = manager_on(&remote);
    manager.bootstrap().await;

    let challenge = assert_ok!(manager.request_verification_code("Asha", "asha@precinct.io").await);
    let err = assert_err!(manager.verify_code_and_login(&challenge, "not-the-code").await);

    assert!(matches!(err, SessionError::InvalidCode));
    assert!(manager.identity().is_none());
    assert!(!manager.is_loading());
    assert!(store.get(CREDENTIAL_KEY).is_none());
}

struct ProviderConsent {
    remote: Arc<MemoryRemote>,
    email: String,
    opened: Mutex<Option<String>>,
}

#[async_trait]
impl OAuthHandshake for ProviderConsent {
    fn redirect_url(&self) -> String {
        "http://127.0.0.1:9/oauth2-redirect".to_string()
    }

    async fn authorize(&self, auth_url: &str) -> Result<AuthorizationCallback, HandshakeError> {
        let url = Url::parse(auth_url).map_err(|e| HandshakeError::InvalidCallback(e.to_string()))?;
        let state = url
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();
        *self.opened.lock().unwrap() = Some(auth_url.to_string());
        Ok(AuthorizationCallback {
            code: self.remote.grant_oauth(&self.email, "Olga"),
            state,
        })
    }
}

#[tokio::test]
async fn provider_login_creates_and_signs_in_identity() {
    let remote = Arc::new(MemoryRemote::new().with_oauth_provider("google"));
    let consent = Arc::new(ProviderConsent {
        remote: remote.clone(),
        email: "olga@precinct.io".to_string(),
        opened: Mutex::new(None),
    });
    let store = Arc::new(MemoryStore::new());
    let manager = SessionManager::new(remote.clone(), store.clone()).with_oauth(consent.clone(), "google");
    manager.bootstrap().await;

    let state = assert_ok!(manager.login_with_provider().await);
    assert_eq!(state.identity.unwrap().email, "olga@precinct.io");
    assert!(state.needs_organization_selection);
    assert!(store.get(CREDENTIAL_KEY).is_some());

    let opened = consent.opened.lock().unwrap().clone().unwrap();
    assert!(opened.contains("redirect_uri=http%3A%2F%2F127.0.0.1%3A9%2Foauth2-redirect"));
}

#[tokio::test]
async fn provider_login_fails_when_provider_is_disabled() {
    let remote = Arc::new(MemoryRemote::new());
    let consent = Arc::new(ProviderConsent {
        remote: remote.clone(),
        email: "olga@precinct.io".to_string(),
        opened: Mutex::new(None),
    });
    let manager = SessionManager::new(remote.clone(), Arc::new(MemoryStore::new())).with_oauth(consent, "google");
    manager.bootstrap().await;

    let err = assert_err!(manager.login_with_provider().await);
    assert!(matches!(err, SessionError::OAuth(_)));
    assert!(manager.identity().is_none());
    assert!(!manager.is_loading());
}

// === Восстановление сессии ===

#[tokio::test]
async fn bootstrap_restores_persisted_session() {
    let remote = Arc::new(MemoryRemote::new());
    let (first, store, org_id) = admin_with_org(&remote).await;
    let identity_id = first.identity().unwrap().id;
    first.dispose();

    let second = SessionManager::new(remote.clone(), store.clone());
    second.bootstrap().await;

    let state = second.snapshot();
    assert_eq!(state.identity.as_ref().map(|i| i.id.as_str()), Some(identity_id.as_str()));
    assert_eq!(state.organization.as_ref().map(|o| o.id.as_str()), Some(org_id.as_str()));
    assert_eq!(state.identity.unwrap().organisation_id, org_id);
    assert_eq!(state.role, Some(Role::Admin));
}

#[tokio::test]
async fn bootstrap_discards_malformed_credential() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, store) = manager_on(&remote);
    store
        .set(CREDENTIAL_KEY, json!({"token": "not-a-token", "identity_id": "u1"}))
        .unwrap();

    manager.bootstrap().await;
    assert_eq!(manager.snapshot(), SessionState::signed_out());
    assert!(store.get(CREDENTIAL_KEY).is_none());
    assert!(!remote.calls().iter().any(|c| c.starts_with("get:")));
}

#[tokio::test]
async fn bootstrap_keeps_credential_when_refresh_fails() {
    let remote = Arc::new(MemoryRemote::new());
    let (_, store) = sign_in(&remote, "Asha", "asha@precinct.io").await;

    remote.fail_on(FailPoint::Read(USERS.to_string()));
    let manager = SessionManager::new(remote.clone(), store.clone());
    manager.bootstrap().await;

    assert!(manager.identity().is_none());
    assert!(!manager.is_loading());
    assert!(store.get(CREDENTIAL_KEY).is_some());
}

#[tokio::test]
async fn login_fails_when_session_cannot_be_loaded() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _) = manager_on(&remote);
    manager.bootstrap().await;

    let challenge = assert_ok!(manager.request_verification_code("Asha", "asha@precinct.io").await);
    let code = remote.last_code_for("asha@precinct.io").unwrap();
    remote.fail_on(FailPoint::Read(USERS.to_string()));

    let err = assert_err!(manager.verify_code_and_login(&challenge, &code).await);
    assert!(matches!(err, SessionError::Remote(_)));
    assert!(manager.identity().is_none());
    assert!(!manager.is_loading());
}

#[tokio::test]
async fn organisation_id_comes_only_from_active_membership() {
    let remote = Arc::new(MemoryRemote::new());
    remote.seed(
        USERS,
        json!({"email": "asha@precinct.io", "name": "Asha", "organisation_id": "gone"}),
    );
    let (manager, _) = sign_in(&remote, "Asha", "asha@precinct.io").await;

    let state = manager.snapshot();
    assert!(state.identity.unwrap().organisation_id.is_empty());
    assert!(state.needs_organization_selection);
    assert!(state.organization.is_none());
}

// === Организация ===

#[tokio::test]
async fn created_organization_has_single_admin_founder() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _, org_id) = admin_with_org(&remote).await;
    let me = manager.identity().unwrap();

    let members = assert_ok!(manager.fetch_organization_members().await);
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].identity_id, me.id);
    assert_eq!(members[0].email, "asha@precinct.io");
    assert_eq!(members[0].role, Role::Admin);
    assert_eq!(members[0].status, MembershipStatus::Active);
    assert!(members[0].last_active.is_some());

    let state = manager.snapshot();
    assert_eq!(state.role, Some(Role::Admin));
    assert!(!state.needs_organization_selection);
    assert_eq!(state.organization.unwrap().member_count, 1);
    assert_eq!(me.organisation_id, org_id);

    let calls = remote.calls();
    let org_at = calls.iter().position(|c| c == "create:Organisation").unwrap();
    let member_at = calls.iter().position(|c| c == "create:OrganisationMembers").unwrap();
    assert!(org_at < member_at);
}

#[tokio::test]
async fn organization_name_is_validated_before_any_write() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _) = sign_in(&remote, "Asha", "asha@precinct.io").await;

    let err = assert_err!(manager.create_organization("  A ").await);
    assert!(matches!(err, SessionError::InvalidInput(_)));
    let err = assert_err!(manager.create_organization(&"x".repeat(51)).await);
    assert!(matches!(err, SessionError::InvalidInput(_)));
    assert!(!remote.calls().contains(&"create:Organisation".to_string()));
}

#[tokio::test]
async fn failed_founding_membership_removes_organization() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _) = sign_in(&remote, "Asha", "asha@precinct.io").await;
    let before = manager.snapshot();

    remote.fail_on(FailPoint::Create(ORGANISATION_MEMBERS.to_string()));
    let err = assert_err!(manager.create_organization("Acme").await);

    assert!(matches!(err, SessionError::Remote(_)));
    assert!(remote.records(ORGANISATION).is_empty());
    assert!(remote.calls().contains(&"delete:Organisation".to_string()));
    assert_eq!(manager.snapshot(), before);
}

#[tokio::test]
async fn organization_creation_reports_failed_reload() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _) = sign_in(&remote, "Asha", "asha@precinct.io").await;
    remote.fail_on(FailPoint::Read(USERS.to_string()));

    let err = assert_err!(manager.create_organization("Acme").await);
    assert!(matches!(err, SessionError::Remote(_)));
    assert_eq!(remote.records(ORGANISATION).len(), 1);
    assert_eq!(remote.records(ORGANISATION_MEMBERS).len(), 1);
    assert!(manager.organization().is_none());
}

#[tokio::test]
async fn anonymous_caller_cannot_create_organization() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _) = manager_on(&remote);
    manager.bootstrap().await;

    let err = assert_err!(manager.create_organization("Acme").await);
    assert!(matches!(err, SessionError::NotAuthenticated));
}

#[tokio::test]
async fn rename_survives_bootstrap() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _, org_id) = admin_with_org(&remote).await;

    let updated = assert_ok!(manager.update_organization(&org_id, OrganizationPatch::rename("  Precinct 9 ")).await);
    assert_eq!(updated.name, "Precinct 9");
    assert_eq!(updated.member_count, 1);

    manager.bootstrap().await;
    assert_eq!(manager.organization().unwrap().name, "Precinct 9");
}

#[tokio::test]
async fn logo_upload_keeps_required_fields() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _, org_id) = admin_with_org(&remote).await;
    let me = manager.identity().unwrap();

    let upload = FileUpload {
        field: "logo".to_string(),
        filename: "crest.png".to_string(),
        content_type: "image/png".to_string(),
        bytes: vec![0x89, 0x50, 0x4e, 0x47],
    };
    let org = assert_ok!(manager.update_organization(&org_id, OrganizationPatch::logo(upload)).await);

    assert_eq!(org.name, "Acme");
    assert_eq!(org.created_by, me.id);
    let url = manager.organization_logo_url().unwrap();
    assert!(url.ends_with(&format!("/api/files/Organisation/{}/crest.png", org_id)));
}

#[tokio::test]
async fn empty_patch_is_rejected() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _, org_id) = admin_with_org(&remote).await;

    let err = assert_err!(manager.update_organization(&org_id, OrganizationPatch::default()).await);
    assert!(matches!(err, SessionError::InvalidInput(_)));
}

// === Приглашения и участники ===

#[tokio::test]
async fn invite_for_unknown_email_fails() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _, _) = admin_with_org(&remote).await;

    let err = assert_err!(manager.create_member_invite("ghost@precinct.io").await);
    assert!(matches!(err, SessionError::UserNotFound(_)));
}

#[tokio::test]
async fn invite_is_redeemed_by_invitee() {
    let remote = Arc::new(MemoryRemote::new());
    let (admin, _, org_id) = admin_with_org(&remote).await;
    remote.seed(USERS, json!({"email": "bala@precinct.io", "name": "Bala"}));

    let invite = assert_ok!(admin.create_member_invite("bala@precinct.io").await);
    assert_eq!(invite.organization_id, org_id);

    let (invitee, _) = sign_in(&remote, "Bala", "bala@precinct.io").await;
    assert!(invitee.needs_organization_selection());

    let token = format!("  {}  ", invite.token.to_uppercase());
    let org = assert_ok!(invitee.join_organization(&org_id, &token).await);
    assert_eq!(org.id, org_id);
    assert_eq!(org.member_count, 2);
    assert_eq!(invitee.role(), Some(Role::Member));
    assert!(!invitee.needs_organization_selection());

    let members = assert_ok!(admin.fetch_organization_members().await);
    let bala = members.iter().find(|m| m.email == "bala@precinct.io").unwrap();
    assert_eq!(bala.status, MembershipStatus::Active);
    assert_eq!(bala.role, Role::Member);
    assert!(bala.last_active.is_some());
}

#[tokio::test]
async fn unknown_invite_leaves_organization_unchanged() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _, org_id) = admin_with_org(&remote).await;
    let before = manager.organization();

    let err = assert_err!(manager.join_organization(&org_id, "nosuchinvite01").await);
    assert!(matches!(err, SessionError::InvalidInvite { .. }));
    assert_eq!(manager.organization(), before);
}

#[tokio::test]
async fn active_membership_is_not_an_invite() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _, org_id) = admin_with_org(&remote).await;
    let own = assert_ok!(manager.fetch_organization_members().await).remove(0);

    let err = assert_err!(manager.join_organization(&org_id, &own.membership_id).await);
    assert!(matches!(err, SessionError::InvalidInvite { .. }));

    let err = assert_err!(manager.join_organization("someotherorg", &own.membership_id).await);
    assert!(matches!(err, SessionError::InvalidInvite { .. }));
}

#[tokio::test]
async fn removing_active_member_decrements_count() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _, org_id) = admin_with_org(&remote).await;
    let seeded = remote.seed(
        ORGANISATION_MEMBERS,
        json!({"organisation": org_id, "member": "u2", "role": "member", "status": "active"}),
    );

    let before = assert_ok!(manager.refresh_organization().await).member_count;
    assert_eq!(before, 2);

    assert_ok!(manager.remove_member(seeded.id()).await);
    let after = assert_ok!(manager.refresh_organization().await).member_count;
    assert_eq!(after, before - 1);
    assert_eq!(manager.organization().unwrap().member_count, after);
}

#[tokio::test]
async fn member_status_and_role_changes() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _, org_id) = admin_with_org(&remote).await;
    let seeded = remote.seed(
        ORGANISATION_MEMBERS,
        json!({"organisation": org_id, "member": "u2", "role": "member", "status": "pending"}),
    );

    let activated = assert_ok!(manager.set_member_active(seeded.id(), true).await);
    assert_eq!(activated.status, MembershipStatus::Active);
    assert!(activated.last_active.is_some());

    let err = assert_err!(manager.set_member_active(seeded.id(), true).await);
    assert!(matches!(err, SessionError::InvalidTransition(_)));

    let promoted = assert_ok!(manager.update_member_role(seeded.id(), Role::Admin).await);
    assert_eq!(promoted.role, Role::Admin);

    let deactivated = assert_ok!(manager.set_member_active(seeded.id(), false).await);
    assert_eq!(deactivated.status, MembershipStatus::Inactive);
    assert_eq!(assert_ok!(manager.refresh_organization().await).member_count, 1);
}

#[tokio::test]
async fn unknown_membership_changes_fail_without_touching_state() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _, org_id) = admin_with_org(&remote).await;
    let before = manager.snapshot();
    let members_before = remote.records(ORGANISATION_MEMBERS);

    let err = assert_err!(manager.update_member_role("no_such_membership", Role::Admin).await);
    assert!(matches!(err, SessionError::Remote(ref e) if e.is_not_found()));

    let err = assert_err!(manager.set_member_active("no_such_membership", false).await);
    assert!(matches!(err, SessionError::Remote(ref e) if e.is_not_found()));

    let err = assert_err!(manager.remove_member("no_such_membership").await);
    assert!(matches!(err, SessionError::Remote(ref e) if e.is_not_found()));

    assert_eq!(manager.snapshot(), before);
    assert_eq!(remote.records(ORGANISATION_MEMBERS), members_before);
    assert_eq!(assert_ok!(manager.refresh_organization().await).id, org_id);
}

#[tokio::test]
async fn member_listing_requires_organization() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _) = sign_in(&remote, "Asha", "asha@precinct.io").await;

    let err = assert_err!(manager.fetch_organization_members().await);
    assert!(matches!(err, SessionError::NoOrganization));
}

// === Выход ===

#[tokio::test]
async fn end_session_is_idempotent() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, store, _) = admin_with_org(&remote).await;
    store.set("theme", json!("dark")).unwrap();

    manager.end_session();
    let first = manager.snapshot();
    manager.end_session();

    assert_eq!(first, SessionState::signed_out());
    assert_eq!(manager.snapshot(), first);
    assert!(store.is_empty());
    assert!(remote.auth_token().is_none());
}

#[tokio::test]
async fn watchers_see_sign_out() {
    let remote = Arc::new(MemoryRemote::new());
    let (manager, _) = sign_in(&remote, "Asha", "asha@precinct.io").await;
    let mut watcher = manager.subscribe();

    manager.end_session();
    assert!(watcher.has_changed().unwrap());
    assert!(watcher.borrow_and_update().identity.is_none());
}
