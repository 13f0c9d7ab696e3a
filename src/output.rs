use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::backend::{ChatKind, UserEntity};
use crate::chats::{ChatInfo, InboxSummary};
use crate::error::ActionReport;
use crate::folders::FolderInfo;
use crate::members::{ContactInfo, MemberInfo};
use crate::messages::{MessageHistory, MessageInfo, SearchResultGroup, SentMessage};
use crate::store::OutputFormat;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn json_string<T: Serialize + ?Sized>(value: &T) -> Result<String, OutputError> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), OutputError> {
    let payload = json_string(value)?;
    println!("{payload}");
    Ok(())
}

pub fn print_chats(chats: &[ChatInfo], format: OutputFormat) -> Result<(), OutputError> {
    match format {
        OutputFormat::Json => print_json(chats),
        OutputFormat::Markdown => {
            println!("{}", markdown_chats(chats));
            Ok(())
        }
        OutputFormat::Plain => {
            if chats.is_empty() {
                println!("No chats found.");
                return Ok(());
            }
            let now = Utc::now().timestamp();
            let mut title_width = display_width("title");
            let mut last_width = display_width("last message");
            for chat in chats {
                title_width = title_width.max(display_width(&chat_label(chat)));
                if let Some(last) = &chat.last_message {
                    last_width = last_width.max(display_width(&single_line(last)));
                }
            }
            title_width = title_width.min(36);
            last_width = last_width.min(60);

            println!(
                "{}  {}  {}  {}  {}  {}",
                pad_left("id", 14),
                pad_right("type", 10),
                pad_right("title", title_width),
                pad_left("unread", 6),
                pad_right("when", 8),
                pad_right("last message", last_width),
            );
            for chat in chats {
                let when = chat
                    .last_message_date
                    .map(|date| format_relative_date(date.timestamp(), now))
                    .unwrap_or_else(|| "-".to_string());
                let preview = chat.last_message.as_deref().map(single_line).unwrap_or_default();
                println!(
                    "{}  {}  {}  {}  {}  {}",
                    pad_left(&chat.id.to_string(), 14),
                    pad_right(chat.kind.as_str(), 10),
                    pad_right(&truncate_display(&chat_label(chat), title_width), title_width),
                    pad_left(&chat.unread_count.to_string(), 6),
                    pad_right(&when, 8),
                    pad_right(&truncate_display(&preview, last_width), last_width),
                );
            }
            Ok(())
        }
    }
}

pub fn print_inbox(inbox: &InboxSummary, format: OutputFormat) -> Result<(), OutputError> {
    match format {
        OutputFormat::Json => print_json(inbox),
        OutputFormat::Markdown => {
            println!("{}", markdown_inbox(inbox));
            Ok(())
        }
        OutputFormat::Plain => {
            if inbox.chats.is_empty() {
                println!("No unread messages!");
                return Ok(());
            }
            println!(
                "{} unread in {} chat{}:",
                inbox.total_unread,
                inbox.chats_with_unread,
                plural(inbox.chats_with_unread)
            );
            print_chats(&by_unread(inbox), OutputFormat::Plain)
        }
    }
}

pub fn print_history(history: &MessageHistory, format: OutputFormat) -> Result<(), OutputError> {
    match format {
        OutputFormat::Json => print_json(history),
        OutputFormat::Markdown => {
            println!("{}", markdown_messages(&history.messages, Some(&history.chat_title)));
            Ok(())
        }
        OutputFormat::Plain => {
            println!("--- {} ---", history.chat_title);
            print_message_table(&history.messages);
            Ok(())
        }
    }
}

pub fn print_search(groups: &[SearchResultGroup], format: OutputFormat) -> Result<(), OutputError> {
    if format == OutputFormat::Json {
        return print_json(groups);
    }
    for group in groups {
        if group.messages.is_empty() {
            println!("No results found.");
            continue;
        }
        match format {
            OutputFormat::Markdown => {
                println!("{}", markdown_messages(&group.messages, group.chat_title.as_deref()));
            }
            _ => {
                if let Some(title) = &group.chat_title {
                    println!("--- {title} ---");
                }
                print_message_table(&group.messages);
            }
        }
    }
    Ok(())
}

fn print_message_table(messages: &[MessageInfo]) {
    if messages.is_empty() {
        println!("No messages.");
        return;
    }
    let now = Utc::now().timestamp();
    let mut from_width = display_width("from");
    for message in messages {
        from_width = from_width.max(display_width(message_sender(message)));
    }
    from_width = from_width.min(18);

    println!(
        "{}  {}  {}  {}",
        pad_left("id", 8),
        pad_right("when", 8),
        pad_right("from", from_width),
        "text",
    );
    for message in messages {
        let mut text = if message.text.is_empty() {
            "(no text)".to_string()
        } else {
            single_line(&message.text)
        };
        if let Some(reply) = message.reply_to_msg_id {
            text = format!("[reply to #{reply}] {text}");
        }
        println!(
            "{}  {}  {}  {}",
            pad_left(&message.id.to_string(), 8),
            pad_right(&format_relative_date(message.date.timestamp(), now), 8),
            pad_right(&truncate_display(message_sender(message), from_width), from_width),
            truncate_display(&text, 72),
        );
    }
}

pub fn print_contact(contact: &ContactInfo, format: OutputFormat) -> Result<(), OutputError> {
    match format {
        OutputFormat::Json => print_json(contact),
        OutputFormat::Markdown => {
            println!("{}", markdown_contact(contact));
            Ok(())
        }
        OutputFormat::Plain => {
            println!("{}", contact_name(contact));
            if let Some(username) = &contact.username {
                println!("@{username}");
            }
            if let Some(phone) = &contact.phone {
                println!("Phone: {phone}");
            }
            if let Some(bio) = &contact.bio {
                println!("Bio: {bio}");
            }
            if contact.is_bot {
                println!("Bot");
            }
            if contact.is_mutual_contact {
                println!("Mutual contact");
            }
            println!("ID: {}", contact.id);
            Ok(())
        }
    }
}

pub fn print_members(members: &[MemberInfo], format: OutputFormat) -> Result<(), OutputError> {
    match format {
        OutputFormat::Json => print_json(members),
        OutputFormat::Markdown => {
            println!("{}", markdown_members(members));
            Ok(())
        }
        OutputFormat::Plain => {
            if members.is_empty() {
                println!("No members found.");
                return Ok(());
            }
            let mut name_width = display_width("name");
            let mut username_width = display_width("username");
            for member in members {
                name_width = name_width.max(display_width(&member.name));
                if let Some(username) = &member.username {
                    username_width = username_width.max(display_width(username) + 1);
                }
            }
            name_width = name_width.min(28);
            username_width = username_width.min(24);

            println!(
                "{}  {}  {}  {}",
                pad_left("id", 12),
                pad_right("name", name_width),
                pad_right("username", username_width),
                "role",
            );
            for member in members {
                let username = member
                    .username
                    .as_deref()
                    .map(|username| format!("@{username}"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {}  {}  {}",
                    pad_left(&member.id.to_string(), 12),
                    pad_right(&truncate_display(&member.name, name_width), name_width),
                    pad_right(&truncate_display(&username, username_width), username_width),
                    if member.is_admin { "admin" } else { "member" },
                );
            }
            Ok(())
        }
    }
}

pub fn print_folders(folders: &[FolderInfo], json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(folders);
    }
    if folders.is_empty() {
        println!("No folders found.");
        return Ok(());
    }
    println!("{} folder{}:", folders.len(), plural(folders.len()));
    for folder in folders {
        let count = folder.included_chats.len();
        println!(
            "{}{} ({} chat{})",
            folder_icon(folder),
            folder.title,
            count,
            plural(count)
        );
    }
    Ok(())
}

pub fn print_folder(folder: &FolderInfo, json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(folder);
    }
    println!("{}{}", folder_icon(folder), folder.title);
    if folder.included_chats.is_empty() {
        println!("  No chats in this folder");
        return Ok(());
    }
    let count = folder.included_chats.len();
    println!("  {count} chat{}:", plural(count));
    for chat in &folder.included_chats {
        println!("  {} {}", kind_icon(chat.kind), chat.title);
    }
    Ok(())
}

pub fn print_sent(sent: &SentMessage, json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(sent);
    }
    println!("Message ID: {}", sent.id);
    Ok(())
}

pub fn print_report(report: &ActionReport, json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(report);
    }
    if report.success {
        println!("{}", report.message);
    } else {
        eprintln!("{}", report.message);
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccountOutput<'a> {
    id: i64,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
}

pub fn print_account(user: &UserEntity, json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(&AccountOutput {
            id: user.id,
            name: user.full_name(),
            username: user.username.as_deref(),
            phone: user.phone.as_deref(),
        });
    }
    println!("Name:     {}", user.full_name());
    println!("Username: @{}", user.username.as_deref().unwrap_or("no username"));
    println!("Phone:    {}", user.phone.as_deref().unwrap_or("-"));
    println!("ID:       {}", user.id);
    Ok(())
}

pub fn markdown_chats(chats: &[ChatInfo]) -> String {
    let mut lines = vec!["# Telegram Chats".to_string(), String::new()];
    for chat in chats {
        let username = chat
            .username
            .as_deref()
            .map(|username| format!(" (@{username})"))
            .unwrap_or_default();
        let unread = if chat.unread_count > 0 {
            format!(" **({} unread)**", chat.unread_count)
        } else {
            String::new()
        };
        lines.push(format!("## {}{username}{unread}", chat.title));
        lines.push(format!("- Type: {}", capitalize(chat.kind.as_str())));
        lines.push(format!("- ID: {}", chat.id));
        if let Some(last) = &chat.last_message {
            lines.push(format!("- Last message: {}", preview(last, 100)));
        }
        if let Some(date) = chat.last_message_date {
            lines.push(format!("- Last activity: {}", iso(date)));
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

pub fn markdown_inbox(inbox: &InboxSummary) -> String {
    if inbox.chats.is_empty() {
        return "# Inbox\n\nNo unread messages!".to_string();
    }
    let mut lines = vec![
        "# Inbox".to_string(),
        String::new(),
        format!("**{} chats with unread messages**", inbox.chats_with_unread),
        String::new(),
        "| Chat | Type | Unread | Last Message |".to_string(),
        "|------|------|--------|--------------|".to_string(),
    ];
    for chat in by_unread(inbox) {
        let last = chat
            .last_message
            .as_deref()
            .map(|last| preview(last, 30))
            .unwrap_or_else(|| "-".to_string());
        lines.push(format!(
            "| {} | {} | {} | {} |",
            escape_cell(&chat.title),
            chat.kind,
            chat.unread_count,
            escape_cell(&last)
        ));
    }
    lines.join("\n")
}

pub fn markdown_messages(messages: &[MessageInfo], chat_title: Option<&str>) -> String {
    let mut lines = Vec::new();
    if let Some(title) = chat_title {
        lines.push(format!("# Messages from {title}"));
        lines.push(String::new());
    }
    for message in messages {
        let reply = message
            .reply_to_msg_id
            .map(|id| format!(" (reply to #{id})"))
            .unwrap_or_default();
        lines.push(format!("### {} - {}{reply}", message_sender(message), iso(message.date)));
        lines.push(format!("*Message ID: {}*", message.id));
        lines.push(String::new());
        lines.push(if message.text.is_empty() {
            "*(no text)*".to_string()
        } else {
            message.text.clone()
        });
        lines.push(String::new());
        lines.push("---".to_string());
        lines.push(String::new());
    }
    lines.join("\n")
}

pub fn markdown_contact(contact: &ContactInfo) -> String {
    let mut lines = vec![
        format!("# {}", contact_name(contact)),
        String::new(),
        "| Field | Value |".to_string(),
        "|-------|-------|".to_string(),
        format!("| ID | {} |", contact.id),
    ];
    if let Some(username) = &contact.username {
        lines.push(format!("| Username | @{username} |"));
    }
    if let Some(phone) = &contact.phone {
        lines.push(format!("| Phone | {phone} |"));
    }
    lines.push(format!("| Bot | {} |", yes_no(contact.is_bot)));
    lines.push(format!("| Mutual Contact | {} |", yes_no(contact.is_mutual_contact)));
    if let Some(bio) = &contact.bio {
        lines.push(String::new());
        lines.push("## Bio".to_string());
        lines.push(bio.clone());
    }
    lines.join("\n")
}

pub fn markdown_members(members: &[MemberInfo]) -> String {
    let mut lines = vec![
        "# Group Members".to_string(),
        String::new(),
        "| Name | Username | Role |".to_string(),
        "|------|----------|------|".to_string(),
    ];
    for member in members {
        let username = member
            .username
            .as_deref()
            .map(|username| format!("@{username}"))
            .unwrap_or_else(|| "-".to_string());
        let role = if member.is_admin { "Admin" } else { "Member" };
        lines.push(format!("| {} | {username} | {role} |", escape_cell(&member.name)));
    }
    lines.join("\n")
}

fn by_unread(inbox: &InboxSummary) -> Vec<ChatInfo> {
    let mut chats = inbox.chats.clone();
    chats.sort_by(|a, b| b.unread_count.cmp(&a.unread_count));
    chats
}

fn chat_label(chat: &ChatInfo) -> String {
    match &chat.username {
        Some(username) => format!("{} @{username}", chat.title),
        None => chat.title.clone(),
    }
}

fn contact_name(contact: &ContactInfo) -> String {
    let name = [contact.first_name.as_deref(), contact.last_name.as_deref()]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if name.is_empty() { "Unknown".to_string() } else { name }
}

fn message_sender(message: &MessageInfo) -> &str {
    if message.is_outgoing { "You" } else { &message.sender }
}

fn folder_icon(folder: &FolderInfo) -> String {
    match &folder.emoticon {
        Some(emoticon) => format!("{emoticon} "),
        None => "📁 ".to_string(),
    }
}

fn kind_icon(kind: ChatKind) -> &'static str {
    match kind {
        ChatKind::User => "👤",
        ChatKind::Group | ChatKind::Supergroup => "👥",
        ChatKind::Channel => "📢",
    }
}

fn iso(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "Yes" } else { "No" }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// First `max_chars` characters on one line, with "..." when cut.
fn preview(value: &str, max_chars: usize) -> String {
    let line = single_line(value);
    if line.chars().count() <= max_chars {
        return line;
    }
    let mut cut: String = line.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|")
}

fn format_relative_date(timestamp: i64, now: i64) -> String {
    if now <= 0 || timestamp <= 0 {
        return "-".to_string();
    }
    let delta = (now - timestamp).max(0);
    if delta < 10 {
        return "now".to_string();
    }
    if delta < 60 {
        return format!("{delta}s ago");
    }
    let minutes = delta / 60;
    if minutes < 60 {
        return format!("{minutes}m ago");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h ago");
    }
    let days = hours / 24;
    if days < 7 {
        return format!("{days}d ago");
    }
    let weeks = days / 7;
    if weeks < 4 {
        return format!("{weeks}w ago");
    }
    let months = days / 30;
    if months < 12 {
        return format!("{months}mo ago");
    }
    format!("{}y ago", days / 365)
}

fn display_width(value: &str) -> usize {
    UnicodeWidthStr::width(value)
}

fn truncate_display(value: &str, max_width: usize) -> String {
    if display_width(value) <= max_width {
        return value.to_string();
    }
    let ellipsis = "...";
    let mut width = 0usize;
    let mut output = String::new();
    for ch in value.chars() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + ch_width + ellipsis.len() > max_width {
            break;
        }
        output.push(ch);
        width += ch_width;
    }
    output.push_str(ellipsis);
    output
}

fn pad_right(value: &str, width: usize) -> String {
    let mut output = value.to_string();
    let current = display_width(value);
    if current < width {
        output.push_str(&" ".repeat(width - current));
    }
    output
}

fn pad_left(value: &str, width: usize) -> String {
    let current = display_width(value);
    if current >= width {
        return value.to_string();
    }
    let mut output = " ".repeat(width - current);
    output.push_str(value);
    output
}
