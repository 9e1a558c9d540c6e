// src/oauth.rs

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Параметры, с которыми провайдер вернул пользователя
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCallback {
    pub code: String,
    pub state: String,
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Provider rejected the request: {0}")]
    Rejected(String),
    #[error("Invalid callback: {0}")]
    InvalidCallback(String),
}

/// Взаимодействие с пользователем в окне провайдера: открыть страницу входа
/// и дождаться перенаправления обратно.
#[async_trait]
pub trait OAuthHandshake: Send + Sync {
    /// URL, на который провайдер перенаправит после входа
    fn redirect_url(&self) -> String;

    async fn authorize(&self, auth_url: &str) -> Result<AuthorizationCallback, HandshakeError>;
}

/// Разобрать параметры перенаправления провайдера
pub fn parse_callback(params: &HashMap<String, String>) -> Result<AuthorizationCallback, HandshakeError> {
    if let Some(error) = params.get("error") {
        return Err(HandshakeError::Rejected(error.clone()));
    }
    match (params.get("code"), params.get("state")) {
        (Some(code), Some(state)) if !code.is_empty() => Ok(AuthorizationCallback {
            code: code.clone(),
            state: state.clone(),
        }),
        _ => Err(HandshakeError::InvalidCallback("missing code or state".to_string())),
    }
}

const CALLBACK_PATH: &str = "/oauth2-redirect";

const DONE_PAGE: &str = "<html><body><p>Вход выполнен. Окно можно закрыть.</p></body></html>";

type CallbackResult = Result<AuthorizationCallback, HandshakeError>;

/// Первый ответ провайдера забирает отправитель, повторные запросы игнорируются
type CallbackSlot = Arc<Mutex<Option<oneshot::Sender<CallbackResult>>>>;

async fn receive_callback(
    State(slot): State<CallbackSlot>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<&'static str> {
    let sender = match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    match sender {
        Some(sender) => {
            debug!(params = params.len(), "oauth callback received");
            let _ = sender.send(parse_callback(&params));
        }
        None => debug!("repeated oauth callback ignored"),
    }
    Html(DONE_PAGE)
}

/// Перенаправление на локальный адрес: короткоживущий axum-сервер с одним маршрутом.
pub struct LoopbackHandshake {
    addr: String,
    bound: Mutex<Option<std::net::TcpListener>>,
}

impl LoopbackHandshake {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            bound: Mutex::new(None),
        }
    }

    /// Использовать уже открытый сокет (например, порт 0, выбранный системой)
    pub fn with_listener(listener: std::net::TcpListener) -> std::io::Result<Self> {
        let addr = listener.local_addr()?.to_string();
        Ok(Self {
            addr,
            bound: Mutex::new(Some(listener)),
        })
    }

    async fn listener(&self) -> std::io::Result<TcpListener> {
        let bound = match self.bound.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match bound {
            Some(listener) => {
                listener.set_nonblocking(true)?;
                TcpListener::from_std(listener)
            }
            None => TcpListener::bind(&self.addr).await,
        }
    }
}

#[async_trait]
impl OAuthHandshake for LoopbackHandshake {
    fn redirect_url(&self) -> String {
        format!("http://{}{}", self.addr, CALLBACK_PATH)
    }

    async fn authorize(&self, auth_url: &str) -> Result<AuthorizationCallback, HandshakeError> {
        let listener = self.listener().await?;

        let (result_tx, result_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let slot: CallbackSlot = Arc::new(Mutex::new(Some(result_tx)));

        let app = Router::new()
            .route(CALLBACK_PATH, get(receive_callback))
            .with_state(slot);

        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        info!(url = %auth_url, "open the provider sign-in page in a browser");
        println!("🔑 Откройте в браузере: {}", auth_url);

        let result = result_rx.await;
        let _ = stop_tx.send(());
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "oauth callback server stopped with error"),
            Err(e) => warn!(error = %e, "oauth callback server task failed"),
        }

        result.map_err(|_| HandshakeError::InvalidCallback("callback server stopped".to_string()))?
    }
}
