use std::io::{self, Write};
use std::sync::Arc;

use color_eyre::eyre::{Context, Result};
use mikan_core::{OutgoingMessage, jid};
use mikan_session::{ApiResponse, Config, SessionEvent, SessionRegistry, SessionService, SessionStatus};
use mikan_transport::{Bridge, BridgeConnector};
use owo_colors::OwoColorize;
use uuid::Uuid;

const PAGE_SIZE: usize = 20;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .from_env_lossy()
                .add_directive("mikan_cli=info".parse()?)
                .add_directive("mikan_session=info".parse()?)
                .add_directive("mikan_transport=info".parse()?)
                .add_directive("mikan_store=info".parse()?),
        )
        .init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let config = Config::load(config_path.as_deref()).wrap_err("Failed to load config")?;

    let storage = config
        .open_storage()
        .await
        .wrap_err("Failed to open session storage")?;

    let bridge_dir = config.bridge_dir();
    println!("📁 Bridge directory: {}", bridge_dir.display());
    let bridge = Arc::new(Bridge::new(bridge_dir, config.request_timeout()));
    let connector = Arc::new(BridgeConnector::new(bridge.clone()));

    let registry = Arc::new(SessionRegistry::new(
        connector,
        storage,
        config.session_settings(),
    ));

    let mut events = registry.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => handle_event(event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event printer fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let report = registry
        .restore_all()
        .await
        .wrap_err("Failed to restore sessions")?;
    println!(
        "🔄 Restored {} session(s), {} failed",
        report.restored.len(),
        report.failed.len()
    );
    for (id, error) in &report.failed {
        println!("   {} {}: {}", "✗".red(), id, error);
    }

    let service = SessionService::new(registry.clone());

    loop {
        print_menu();
        let choice = read_line("Choice: ")?;

        match choice.as_str() {
            "1" => create_session(&service).await?,
            "2" => list_sessions(&service).await,
            "3" => show_status(&service).await?,
            "4" => show_qr(&service).await?,
            "5" => list_chats(&service).await?,
            "6" => list_contacts(&service).await?,
            "7" => list_messages(&service).await?,
            "8" => send_text(&service).await?,
            "9" => check_number(&service).await?,
            "10" => delete_session(&service).await?,
            "0" => {
                println!("👋 Shutting down...");
                registry.shutdown().await;
                bridge.stop().await.wrap_err("Failed to stop bridge")?;
                break;
            }
            _ => println!("❌ Invalid choice"),
        }
    }

    Ok(())
}

fn print_menu() {
    println!();
    println!("╔════════════════════════════════════╗");
    println!("║        MIKAN - Session Gateway     ║");
    println!("╠════════════════════════════════════╣");
    println!("║  1. Create / Reconnect Session     ║");
    println!("║  2. List Sessions                  ║");
    println!("║  3. Session Status                 ║");
    println!("║  4. Show Pairing QR                ║");
    println!("║  5. List Chats                     ║");
    println!("║  6. List Contacts                  ║");
    println!("║  7. List Messages                  ║");
    println!("║  8. Send Text                      ║");
    println!("║  9. Check Number                   ║");
    println!("║ 10. Delete Session                 ║");
    println!("║  0. Exit                           ║");
    println!("╚════════════════════════════════════╝");
}

fn handle_event(event: SessionEvent) {
    match event {
        SessionEvent::StatusChanged { session_id, status } => {
            println!("\n🔁 {} is now {}", session_id, paint_status(status));
        }
        SessionEvent::PairingChallenge { session_id, qr } => {
            println!("\n📱 QR Code for session {}:", session_id);
            print_qr_code(&qr);
        }
        SessionEvent::Connected {
            session_id,
            phone_number,
            name,
        } => {
            println!(
                "\n✅ Connected: {} (phone: {}, name: {})",
                session_id,
                phone_number.unwrap_or_default(),
                name.unwrap_or_default()
            );
        }
        SessionEvent::Disconnected {
            session_id,
            reason,
            will_reconnect,
        } => {
            println!(
                "\n❌ Disconnected: {} - {}{}",
                session_id,
                reason.unwrap_or_else(|| "unknown".to_string()),
                if will_reconnect { " (reconnecting)" } else { "" }
            );
        }
        SessionEvent::LoggedOut { session_id } => {
            println!("\n🚪 Logged out: {}", session_id);
        }
        SessionEvent::ChatsSynced { session_id, count } => {
            println!("\n💬 Synced {} chats for {}", count, session_id);
        }
        SessionEvent::ContactsSynced { session_id, count } => {
            println!("\n📇 Synced {} contacts for {}", count, session_id);
        }
        SessionEvent::MessagesSynced {
            session_id,
            kind,
            count,
        } => {
            println!("\n📨 Synced {} {:?} messages for {}", count, kind, session_id);
        }
        SessionEvent::Error { session_id, error } => {
            println!("\n❌ Error ({}): {}", session_id, error.red());
        }
    }
}

fn paint_status(status: SessionStatus) -> String {
    match status {
        SessionStatus::Connected => status.bright_green().to_string(),
        SessionStatus::Connecting | SessionStatus::QrReady => status.yellow().to_string(),
        SessionStatus::Disconnected => status.dimmed().to_string(),
        SessionStatus::Error => status.red().to_string(),
    }
}

fn print_qr_code(qr: &str) {
    if let Err(e) = qr2term::print_qr(qr) {
        eprintln!("Failed to print QR code: {}", e);
        println!("Raw QR data: {}", qr);
    }
}

/// Prints the failure line and hands back the payload on success.
fn report<T>(response: ApiResponse<T>) -> Option<T> {
    if response.success {
        response.data
    } else {
        println!("❌ {}", response.message.red());
        None
    }
}

async fn create_session(service: &SessionService) -> Result<()> {
    let id = read_line("Session ID (empty to generate): ")?;
    let id = if id.is_empty() {
        format!("mikan-{}", Uuid::new_v4().simple())
    } else {
        id
    };

    if let Some(info) = report(service.create_or_reconnect(&id).await) {
        println!(
            "🔄 Session {} is {}, watch for the QR code",
            info.id,
            paint_status(info.status)
        );
    }
    Ok(())
}

async fn list_sessions(service: &SessionService) {
    let Some(sessions) = report(service.list_sessions().await) else {
        return;
    };

    if sessions.is_empty() {
        println!("📭 No sessions");
        return;
    }

    println!("\n📋 Sessions:");
    for info in sessions {
        let phone = info
            .identity
            .as_ref()
            .and_then(|i| i.phone_number.as_deref())
            .unwrap_or("-");
        println!("  {} - {} {}", info.id, paint_status(info.status), phone);
    }
}

async fn show_status(service: &SessionService) -> Result<()> {
    let id = read_line("Session ID: ")?;
    if let Some(info) = report(service.get_status(&id).await) {
        println!("  Status:    {}", paint_status(info.status));
        if let Some(identity) = &info.identity {
            println!("  Account:   {}", identity.jid);
            println!("  Name:      {}", identity.name.as_deref().unwrap_or("-"));
        }
        println!("  QR ready:  {}", info.has_challenge);
        if let Some(error) = &info.last_error {
            println!("  Last error: {}", error.red());
        }
    }
    Ok(())
}

async fn show_qr(service: &SessionService) -> Result<()> {
    let id = read_line("Session ID: ")?;
    if let Some(challenge) = report(service.get_pairing_challenge(&id).await) {
        print_qr_code(&challenge.raw);
    }
    Ok(())
}

async fn list_chats(service: &SessionService) -> Result<()> {
    let id = read_line("Session ID: ")?;
    let filter = read_line("Filter (all/personal/group): ")?;

    let Some(page) = report(service.overview(&id, PAGE_SIZE, 0, &filter).await) else {
        return Ok(());
    };

    if page.items.is_empty() {
        println!("📭 No chats found");
        return Ok(());
    }

    println!("\n💬 Chats ({}):", page.total);
    for (i, chat) in page.items.iter().enumerate() {
        let marker = if chat.is_group { "👥" } else { "👤" };
        let preview = chat
            .last_message
            .as_ref()
            .and_then(|m| m.text.as_deref())
            .unwrap_or("");
        let unread = if chat.unread_count > 0 {
            format!(" ({})", chat.unread_count).bright_green().to_string()
        } else {
            String::new()
        };
        println!("  {}. {} {}{} {}", i + 1, marker, chat.name, unread, preview.dimmed());
    }
    if page.has_more {
        println!("  ... and {} more", page.total - page.items.len());
    }
    Ok(())
}

async fn list_contacts(service: &SessionService) -> Result<()> {
    let id = read_line("Session ID: ")?;
    let search = read_line("Search (empty for all): ")?;

    let Some(page) = report(service.contacts(&id, PAGE_SIZE, 0, &search).await) else {
        return Ok(());
    };

    if page.items.is_empty() {
        println!("📭 No contacts found");
        return Ok(());
    }

    println!("\n📇 Contacts ({}):", page.total);
    for contact in &page.items {
        println!(
            "  📱 {} - {} ({})",
            contact.id,
            contact
                .name
                .as_deref()
                .or(contact.notify.as_deref())
                .unwrap_or("?"),
            contact.phone_number.as_deref().unwrap_or("?")
        );
    }
    if page.has_more {
        println!("  ... and {} more", page.total - page.items.len());
    }
    Ok(())
}

async fn list_messages(service: &SessionService) -> Result<()> {
    let id = read_line("Session ID: ")?;
    let chat = read_line("Chat (JID or phone number): ")?;
    let Some(chat_id) = jid::to_jid(&chat) else {
        println!("❌ Invalid chat");
        return Ok(());
    };

    let mut cursor: Option<String> = None;
    loop {
        let Some(page) = report(
            service
                .messages(&id, &chat_id, PAGE_SIZE, cursor.as_deref())
                .await,
        ) else {
            return Ok(());
        };

        if page.messages.is_empty() {
            println!("📭 No messages found");
            return Ok(());
        }

        for message in &page.messages {
            let direction = if message.from_me { "→" } else { "←" };
            let sender = message
                .push_name
                .as_deref()
                .or(message.sender.as_deref())
                .unwrap_or("");
            println!(
                "  {} [{}] {}: {}",
                direction,
                message.content.kind(),
                sender,
                message
                    .content
                    .preview_text()
                    .unwrap_or_else(|| "[media]".to_string())
            );
        }

        match page.next_cursor {
            Some(next) if read_line("Older messages? (y/N): ")?.eq_ignore_ascii_case("y") => {
                cursor = Some(next);
            }
            _ => return Ok(()),
        }
    }
}

async fn send_text(service: &SessionService) -> Result<()> {
    let id = read_line("Session ID: ")?;
    let to = read_line("To (JID or phone number): ")?;
    let text = read_line("Message: ")?;

    if let Some(sent) = report(service.send(&id, &to, OutgoingMessage::Text { text }).await) {
        println!("📤 Message sent! ({})", sent.message_id);
    }
    Ok(())
}

async fn check_number(service: &SessionService) -> Result<()> {
    let id = read_line("Session ID: ")?;
    let number = read_line("Phone number: ")?;

    if let Some(status) = report(service.check_number(&id, &number).await) {
        if status.exists {
            println!("✅ {} is registered", status.jid.bright_green());
        } else {
            println!("❌ {} is not registered", status.jid);
        }
    }
    Ok(())
}

async fn delete_session(service: &SessionService) -> Result<()> {
    let id = read_line("Session ID to delete: ")?;
    let confirm = read_line(&format!("Log out and delete {}? (y/N): ", id))?;
    if !confirm.eq_ignore_ascii_case("y") {
        return Ok(());
    }

    let response = service.delete_session(&id).await;
    if response.success {
        println!("🗑️  {}", response.message);
    } else {
        println!("❌ {}", response.message.red());
    }
    Ok(())
}

fn read_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
