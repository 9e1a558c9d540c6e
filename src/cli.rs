// src/cli.rs

use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::{default_config_path, AppConfig};
use crate::guard::{dashboard_for, resolve};
use crate::logging;
use crate::media::{MediaCollection, MediaLibrary};
use crate::models::{MembershipStatus, OrganizationPatch, Role};
use crate::oauth::LoopbackHandshake;
use crate::remote::{FileUpload, HttpRemote, RemoteDataService};
use crate::session::{SessionManager, SessionState};
use crate::storage::FileStore;

/// Точка входа CLI: сам собирает конфигурацию, журнал и менеджер сессии
pub async fn run_cli() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = AppConfig::load(&config_path)?;
    logging::init(&config.logging)?;

    if let Command::Config { cmd } = &cli.command {
        return handle_config(cmd, &config, &config_path);
    }

    let remote: Arc<dyn RemoteDataService> = Arc::new(HttpRemote::new(&config.remote.base_url)?);
    let store = Arc::new(FileStore::open(config.storage.resolved_path())?);
    let handshake = Arc::new(LoopbackHandshake::new(config.remote.oauth_redirect_addr.clone()));
    let manager = SessionManager::new(remote.clone(), store).with_oauth(handshake, config.remote.oauth_provider.clone());

    manager.bootstrap().await;

    let result = match cli.command {
        Command::Login { name, email, code } => handle_login(&manager, &name, &email, code).await,
        Command::LoginOauth => handle_login_oauth(&manager).await,
        Command::Status { json } => handle_status(&manager, json),
        Command::Logout => {
            manager.end_session();
            println!("✅ Сессия завершена");
            Ok(())
        }
        Command::Org { cmd } => handle_org(cmd, &manager).await,
        Command::Member { cmd } => handle_member(cmd, &manager).await,
        Command::Media { cmd } => handle_media(cmd, &manager, remote).await,
        Command::Config { .. } => Ok(()),
    };

    manager.dispose();
    result
}

// === CLI ===

#[derive(Parser)]
#[command(name = "nirikshan")]
#[command(author, version, about = "Консоль сессии и организаций Nirikshan", long_about = None)]
struct Cli {
    /// Путь к config.yaml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Вход по одноразовому коду из письма
    Login {
        #[clap(short, long, default_value = "")]
        name: String,
        #[clap(short, long)]
        email: String,
        /// Код, если не нужно спрашивать его интерактивно
        #[clap(long)]
        code: Option<String>,
    },
    /// Вход через OAuth2-провайдера
    LoginOauth,
    /// Текущая сессия
    Status {
        #[clap(short, long)]
        json: bool,
    },
    /// Выход и очистка локального хранилища
    Logout,
    /// Управление организацией
    Org {
        #[command(subcommand)]
        cmd: OrgCommand,
    },
    /// Управление участниками текущей организации
    Member {
        #[command(subcommand)]
        cmd: MemberCommand,
    },
    /// Материалы организации
    Media {
        #[command(subcommand)]
        cmd: MediaCommand,
    },
    /// Конфигурация
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },
}

// === Подкоманды ===

#[derive(clap::Subcommand)]
enum OrgCommand {
    Create { name: String },
    Join {
        organization_id: String,
        token: String,
    },
    Rename { name: String },
    Logo { path: PathBuf },
    Refresh,
}

#[derive(clap::Subcommand)]
enum MemberCommand {
    List { #[clap(short, long)] json: bool },
    Invite { email: String },
    Role { membership_id: String, role: Role },
    Remove { membership_id: String },
    Activate { membership_id: String },
    Deactivate { membership_id: String },
}

#[derive(clap::Subcommand)]
enum MediaCommand {
    List {
        kind: MediaCollection,
        #[clap(short, long)]
        json: bool,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommand {
    Show,
    /// Записать текущую конфигурацию в файл
    Init,
}

// === Обработчики ===

async fn prompt(label: &str) -> Result<String, Box<dyn std::error::Error>> {
    print!("{}", label);
    std::io::stdout().flush()?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(line.trim().to_string())
}

fn print_session(state: &SessionState) {
    match &state.identity {
        Some(identity) => println!("👤 {} <{}>", identity.display_name(), identity.email),
        None => println!("👤 Не выполнен вход"),
    }
    if let Some(org) = &state.organization {
        println!("🏢 {} ({}): {} активных участников", org.name, org.id, org.member_count);
    }
    if let Some(role) = state.role {
        println!("🔑 Роль: {}", role);
    }
    println!("🧭 Экран: {}", resolve(state, dashboard_for(state.role)));
}

async fn handle_login(
    manager: &SessionManager,
    name: &str,
    email: &str,
    code: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let challenge_id = manager.request_verification_code(name, email).await?;
    println!("📧 Код отправлен на {}", email);

    let code = match code {
        Some(code) => code,
        None => prompt("Код: ").await?,
    };
    let state = manager.verify_code_and_login(&challenge_id, &code).await?;
    println!("✅ Вход выполнен");
    print_session(&state);
    Ok(())
}

async fn handle_login_oauth(manager: &SessionManager) -> Result<(), Box<dyn std::error::Error>> {
    let state = manager.login_with_provider().await?;
    println!("✅ Вход выполнен");
    print_session(&state);
    Ok(())
}

fn handle_status(manager: &SessionManager, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let state = manager.snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print_session(&state);
        if let Some(url) = manager.organization_logo_url() {
            println!("🖼  Логотип: {}", url);
        }
    }
    Ok(())
}

fn logo_upload(path: &Path) -> Result<FileUpload, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("logo")
        .to_string();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    let content_type = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    };
    Ok(FileUpload {
        field: "logo".to_string(),
        filename,
        content_type: content_type.to_string(),
        bytes,
    })
}

async fn handle_org(cmd: OrgCommand, manager: &SessionManager) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        OrgCommand::Create { name } => {
            let org = manager.create_organization(&name).await?;
            println!("✅ Организация создана: {} ({})", org.name, org.id);
        }
        OrgCommand::Join { organization_id, token } => {
            let org = manager.join_organization(&organization_id, &token).await?;
            println!("✅ Вы вступили в организацию: {}", org.name);
        }
        OrgCommand::Rename { name } => {
            let Some(current) = manager.organization() else {
                eprintln!("❌ Нет текущей организации");
                return Ok(());
            };
            let org = manager.update_organization(&current.id, OrganizationPatch::rename(name)).await?;
            println!("✅ Организация переименована: {}", org.name);
        }
        OrgCommand::Logo { path } => {
            let Some(current) = manager.organization() else {
                eprintln!("❌ Нет текущей организации");
                return Ok(());
            };
            let upload = logo_upload(&path)?;
            manager.update_organization(&current.id, OrganizationPatch::logo(upload)).await?;
            println!("✅ Логотип обновлён");
            if let Some(url) = manager.organization_logo_url() {
                println!("🖼  {}", url);
            }
        }
        OrgCommand::Refresh => {
            let org = manager.refresh_organization().await?;
            println!("🏢 {}: {} активных участников", org.name, org.member_count);
        }
    }
    Ok(())
}

async fn handle_member(cmd: MemberCommand, manager: &SessionManager) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        MemberCommand::List { json } => {
            let members = manager.fetch_organization_members().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&members)?);
            } else {
                for m in &members {
                    let last_active = m
                        .last_active
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{} | {} <{}> | {} | {} | {}",
                        m.membership_id, m.name, m.email, m.role, m.status, last_active
                    );
                }
                let active = members.iter().filter(|m| m.status == MembershipStatus::Active).count();
                let pending = members.iter().filter(|m| m.status == MembershipStatus::Pending).count();
                println!("Всего: {}, активных: {}, ожидают: {}", members.len(), active, pending);
            }
        }
        MemberCommand::Invite { email } => {
            let invite = manager.create_member_invite(&email).await?;
            println!("✅ Приглашение создано для {}", email);
            println!("   Организация: {}", invite.organization_id);
            println!("   Код приглашения: {}", invite.token);
        }
        MemberCommand::Role { membership_id, role } => {
            let membership = manager.update_member_role(&membership_id, role).await?;
            println!("✅ Роль изменена: {} → {}", membership.id, membership.role);
        }
        MemberCommand::Remove { membership_id } => {
            manager.remove_member(&membership_id).await?;
            println!("✅ Участник удалён: {}", membership_id);
        }
        MemberCommand::Activate { membership_id } => {
            let membership = manager.set_member_active(&membership_id, true).await?;
            println!("✅ Участник активирован: {}", membership.id);
        }
        MemberCommand::Deactivate { membership_id } => {
            let membership = manager.set_member_active(&membership_id, false).await?;
            println!("✅ Участник отключён: {}", membership.id);
        }
    }
    Ok(())
}

async fn handle_media(
    cmd: MediaCommand,
    manager: &SessionManager,
    remote: Arc<dyn RemoteDataService>,
) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        MediaCommand::List { kind, json } => {
            let Some(org) = manager.organization() else {
                eprintln!("❌ Нет текущей организации");
                return Ok(());
            };
            let records = MediaLibrary::new(remote).list(kind, &org.id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    let created = record.get_str("created").unwrap_or_default();
                    println!("{} | {}", record.id(), created);
                }
                println!("{}: {} записей", kind, records.len());
            }
        }
    }
    Ok(())
}

fn handle_config(cmd: &ConfigCommand, config: &AppConfig, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        ConfigCommand::Show => {
            println!("# {}", path.display());
            print!("{}", serde_yaml::to_string(config)?);
        }
        ConfigCommand::Init => {
            config.save(path)?;
            println!("✅ Конфигурация записана: {}", path.display());
        }
    }
    Ok(())
}
