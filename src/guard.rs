// src/guard.rs

use serde::Serialize;
use std::fmt;

use crate::models::Role;
use crate::session::SessionState;

/// Экраны консоли
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    Loading,
    Login,
    OrganizationSelection,
    JoinOrganization,
    CreateOrganization,
    AdminDashboard,
    MemberDashboard,
}

impl Screen {
    pub fn as_str(&self) -> &'static str {
        match self {
            Screen::Loading => "loading",
            Screen::Login => "login",
            Screen::OrganizationSelection => "organization_selection",
            Screen::JoinOrganization => "join_organization",
            Screen::CreateOrganization => "create_organization",
            Screen::AdminDashboard => "admin_dashboard",
            Screen::MemberDashboard => "member_dashboard",
        }
    }

    fn is_onboarding(&self) -> bool {
        matches!(self, Screen::JoinOrganization | Screen::CreateOrganization)
    }

    fn is_dashboard(&self) -> bool {
        matches!(self, Screen::AdminDashboard | Screen::MemberDashboard)
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Панель для роли; всё, что не `admin`, видит панель участника
pub fn dashboard_for(role: Option<Role>) -> Screen {
    match role {
        Some(Role::Admin) => Screen::AdminDashboard,
        _ => Screen::MemberDashboard,
    }
}

/// Какой экран показать вместо запрошенного
pub fn resolve(state: &SessionState, requested: Screen) -> Screen {
    if state.is_loading {
        return Screen::Loading;
    }
    if state.identity.is_none() {
        return Screen::Login;
    }
    if requested.is_onboarding() {
        return requested;
    }
    if state.needs_organization_selection {
        return Screen::OrganizationSelection;
    }
    match requested {
        Screen::AdminDashboard => match require_role(state, Role::Admin) {
            Ok(()) => Screen::AdminDashboard,
            Err(redirect) => redirect,
        },
        screen if screen.is_dashboard() => screen,
        _ => dashboard_for(state.role),
    }
}

/// Проверка роли для экрана; при несовпадении возвращает экран,
/// на который нужно перенаправить.
pub fn require_role(state: &SessionState, role: Role) -> Result<(), Screen> {
    if state.role == Some(role) {
        Ok(())
    } else {
        Err(dashboard_for(state.role))
    }
}
