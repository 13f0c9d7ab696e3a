mod backend;
mod bridge;
mod chats;
mod config;
mod duration;
mod error;
#[cfg(test)]
mod fake_backend;
mod folders;
mod logging;
mod login;
mod members;
mod messages;
mod notify;
mod output;
mod resolver;
mod session;
mod store;
mod sync;

use std::error::Error;
use std::path::PathBuf;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};

use crate::backend::{Backend, ChatKind, Connector, UserEntity};
use crate::bridge::BridgeConnector;
use crate::config::Config;
use crate::error::{ActionReport, CoreError};
use crate::login::{LoginOutcome, TerminalPrompter};
use crate::members::{DEFAULT_MEMBER_LIMIT, MemberQuery};
use crate::messages::{DEFAULT_MESSAGE_LIMIT, HistoryQuery};
use crate::session::SessionManager;
use crate::store::{ConfigStore, OutputFormat};
use crate::sync::SyncOptions;

#[derive(Parser)]
#[command(
    name = "tg",
    version,
    about = "Fast Telegram CLI for reading, searching, and sending messages",
    after_help = "Examples:\n  tg auth\n  tg chats --type group\n  tg read \"Team\" --since 2h\n  tg search \"deploy\" --chat @devs\n  tg send @alice \"hello\"\n  tg mute \"Noisy group\" --duration 8h\n  tg folder-add Work \"Team\"\n  tg sync --days 3 --output ./telegram-sync"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, short = 'v', global = true, help = "Log debug output to stderr")]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Authenticate with Telegram")]
    Auth,
    #[command(about = "Verify session and credentials")]
    Check,
    #[command(about = "Show logged-in account information")]
    Whoami(JsonArgs),
    #[command(about = "List chats")]
    Chats(ChatsArgs),
    #[command(about = "Read messages from a chat")]
    Read(ReadArgs),
    #[command(about = "Search messages")]
    Search(SearchArgs),
    #[command(about = "Show chats with unread messages")]
    Inbox(FormatArgs),
    #[command(about = "Show contact information")]
    Contact(ContactArgs),
    #[command(about = "List members of a group")]
    Members(MembersArgs),
    #[command(about = "List admins of a group")]
    Admins(AdminsArgs),
    #[command(about = "List groups")]
    Groups(GroupsArgs),
    #[command(about = "Remove a user from a group")]
    Kick(KickArgs),
    #[command(about = "Mute notifications for a chat")]
    Mute(MuteArgs),
    #[command(about = "Unmute notifications for a chat")]
    Unmute(ChatArgs),
    #[command(about = "List chat folders")]
    Folders(JsonArgs),
    #[command(about = "Show the chats in a folder")]
    Folder(FolderArgs),
    #[command(about = "Add a chat to a folder")]
    FolderAdd(FolderChatArgs),
    #[command(about = "Remove a chat from a folder")]
    FolderRemove(FolderChatArgs),
    #[command(about = "Send a message")]
    Send(SendArgs),
    #[command(about = "Reply to a message")]
    Reply(ReplyArgs),
    #[command(about = "Export recent messages to markdown files")]
    Sync(SyncArgs),
    #[command(about = "Log out and clear the stored session")]
    Logout(LogoutArgs),
}

#[derive(Args, Clone, Copy)]
struct FormatArgs {
    #[arg(long, conflicts_with = "markdown", help = "Output as JSON")]
    json: bool,

    #[arg(long, help = "Output as Markdown")]
    markdown: bool,
}

impl FormatArgs {
    fn resolve(self, default: OutputFormat) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else if self.markdown {
            OutputFormat::Markdown
        } else {
            default
        }
    }
}

#[derive(Args)]
struct JsonArgs {
    #[arg(long, help = "Output as JSON")]
    json: bool,
}

#[derive(Args)]
struct ChatsArgs {
    #[arg(short = 'n', long, default_value_t = chats::DEFAULT_DIALOG_LIMIT, help = "Maximum number of chats")]
    limit: usize,

    #[arg(long = "type", value_enum, help = "Filter by chat type")]
    kind: Option<ChatKind>,

    #[command(flatten)]
    format: FormatArgs,
}

#[derive(Args)]
struct ReadArgs {
    #[arg(help = "Chat name, username (@user), or ID")]
    chat: String,

    #[arg(short = 'n', long, default_value_t = DEFAULT_MESSAGE_LIMIT, help = "Number of messages to fetch")]
    limit: usize,

    #[arg(long, help = "Only messages newer than this (e.g. 30m, 1h, 7d)")]
    since: Option<String>,

    #[arg(long, help = "Only messages older than this (e.g. 30m, 1h, 7d)")]
    until: Option<String>,

    #[arg(long, help = "Start reading before this message id")]
    offset_id: Option<i32>,

    #[command(flatten)]
    format: FormatArgs,
}

#[derive(Args)]
struct SearchArgs {
    #[arg(help = "Search query")]
    query: String,

    #[arg(long, conflicts_with = "all", help = "Search within a specific chat")]
    chat: Option<String>,

    #[arg(long, help = "Search all chats (the default without --chat)")]
    all: bool,

    #[arg(short = 'n', long, default_value_t = DEFAULT_MESSAGE_LIMIT, help = "Maximum results")]
    limit: usize,

    #[command(flatten)]
    format: FormatArgs,
}

#[derive(Args)]
struct ContactArgs {
    #[arg(help = "Username (@user) or phone number")]
    user: String,

    #[command(flatten)]
    format: FormatArgs,
}

#[derive(Args)]
struct MembersArgs {
    #[arg(help = "Group name or username")]
    group: String,

    #[arg(short = 'n', long, default_value_t = DEFAULT_MEMBER_LIMIT, help = "Maximum members to fetch")]
    limit: usize,

    #[command(flatten)]
    format: FormatArgs,
}

#[derive(Args)]
struct AdminsArgs {
    #[arg(help = "Group name or username")]
    group: String,

    #[command(flatten)]
    format: FormatArgs,
}

#[derive(Args)]
struct GroupsArgs {
    #[arg(long, help = "Only groups where you are admin")]
    admin: bool,

    #[command(flatten)]
    format: FormatArgs,
}

#[derive(Args)]
struct KickArgs {
    #[arg(help = "Group name or username")]
    group: String,

    #[arg(help = "User to remove (e.g. @username)")]
    user: String,

    #[arg(long, help = "Output as JSON")]
    json: bool,
}

#[derive(Args)]
struct MuteArgs {
    #[arg(help = "Chat name, username, or ID")]
    chat: String,

    #[arg(short = 'd', long, default_value = "forever", help = "Duration (30m, 8h, 1d, 1w, or forever)")]
    duration: String,

    #[arg(long, help = "Output as JSON")]
    json: bool,
}

#[derive(Args)]
struct ChatArgs {
    #[arg(help = "Chat name, username, or ID")]
    chat: String,

    #[arg(long, help = "Output as JSON")]
    json: bool,
}

#[derive(Args)]
struct FolderArgs {
    #[arg(help = "Folder name")]
    name: String,

    #[arg(long, help = "Output as JSON")]
    json: bool,
}

#[derive(Args)]
struct FolderChatArgs {
    #[arg(help = "Folder name")]
    folder: String,

    #[arg(help = "Chat name, username, or ID")]
    chat: String,

    #[arg(long, help = "Output as JSON")]
    json: bool,
}

#[derive(Args)]
struct SendArgs {
    #[arg(help = "Chat name, username (@user), or ID")]
    chat: String,

    #[arg(help = "Message text")]
    text: String,

    #[arg(long, help = "Output as JSON")]
    json: bool,
}

#[derive(Args)]
struct ReplyArgs {
    #[arg(help = "Chat name, username (@user), or ID")]
    chat: String,

    #[arg(help = "Message ID to reply to")]
    msg_id: i32,

    #[arg(help = "Reply text")]
    text: String,

    #[arg(long, help = "Output as JSON")]
    json: bool,
}

#[derive(Args)]
struct SyncArgs {
    #[arg(long, default_value_t = 7, help = "Number of days to sync")]
    days: i64,

    #[arg(long, help = "Sync chats whose title contains this text")]
    chat: Option<String>,

    #[arg(long, default_value = "./telegram-sync", help = "Output directory")]
    output: PathBuf,
}

#[derive(Args)]
struct LogoutArgs {
    #[arg(long, help = "Also remove the API credentials")]
    all: bool,
}

/// Whether the process should exit cleanly. Failures that were already
/// reported to the user come back as `Failure` rather than an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    fn from_report(report: &ActionReport) -> Self {
        if report.success {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(Outcome::Success) => {}
        Ok(Outcome::Failure) => std::process::exit(1),
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<Outcome, Box<dyn Error>> {
    let cli = Cli::parse();
    let config = Config::load()?;
    logging::init(config.log_filter.as_deref(), cli.verbose);

    let store = ConfigStore::new(config.config_path.clone());
    let mut sessions = SessionManager::new(store, BridgeConnector::new(config.bridge_url.clone()));

    let result = dispatch(cli.command, &mut sessions).await;
    sessions.release().await;
    result
}

async fn dispatch<C: Connector>(
    command: Command,
    sessions: &mut SessionManager<C>,
) -> Result<Outcome, Box<dyn Error>> {
    let default_format = sessions.store().load().output_format();

    match command {
        Command::Auth => handle_auth(sessions).await,
        Command::Check => Ok(handle_check(sessions).await),
        Command::Whoami(args) => {
            let backend = sessions.acquire().await?;
            let me = UserEntity::from(backend.get_me().await.map_err(CoreError::from_backend)?);
            output::print_account(&me, args.json)?;
            Ok(Outcome::Success)
        }
        Command::Chats(args) => {
            let backend = sessions.acquire().await?;
            let chats = chats::filter_by_kind(chats::get_dialogs(backend, args.limit).await?, args.kind);
            output::print_chats(&chats, args.format.resolve(default_format))?;
            Ok(Outcome::Success)
        }
        Command::Read(args) => {
            let now = Utc::now();
            let query = HistoryQuery {
                limit: args.limit,
                offset_id: args.offset_id,
                min_date: args
                    .since
                    .as_deref()
                    .map(|since| duration::parse_time_offset(since, now))
                    .transpose()?,
                max_date: args
                    .until
                    .as_deref()
                    .map(|until| duration::parse_time_offset(until, now))
                    .transpose()?,
            };
            let backend = sessions.acquire().await?;
            let history = messages::get_messages(backend, &args.chat, query).await?;
            output::print_history(&history, args.format.resolve(default_format))?;
            Ok(Outcome::Success)
        }
        Command::Search(args) => {
            let backend = sessions.acquire().await?;
            let chat = if args.all { None } else { args.chat.as_deref() };
            let results = messages::search_messages(backend, &args.query, chat, args.limit).await?;
            output::print_search(&results, args.format.resolve(default_format))?;
            Ok(Outcome::Success)
        }
        Command::Inbox(format) => {
            let backend = sessions.acquire().await?;
            let inbox = chats::get_inbox(backend).await?;
            output::print_inbox(&inbox, format.resolve(default_format))?;
            Ok(Outcome::Success)
        }
        Command::Contact(args) => {
            let backend = sessions.acquire().await?;
            let contact = members::get_contact_info(backend, &args.user).await?;
            output::print_contact(&contact, args.format.resolve(default_format))?;
            Ok(Outcome::Success)
        }
        Command::Members(args) => {
            let backend = sessions.acquire().await?;
            let query = MemberQuery {
                admins_only: false,
                limit: args.limit,
            };
            let members = members::get_chat_members(backend, &args.group, query).await?;
            output::print_members(&members, args.format.resolve(default_format))?;
            Ok(Outcome::Success)
        }
        Command::Admins(args) => {
            let backend = sessions.acquire().await?;
            let query = MemberQuery {
                admins_only: true,
                ..MemberQuery::default()
            };
            let admins = members::get_chat_members(backend, &args.group, query).await?;
            output::print_members(&admins, args.format.resolve(default_format))?;
            Ok(Outcome::Success)
        }
        Command::Groups(args) => {
            let backend = sessions.acquire().await?;
            let groups = if args.admin {
                chats::get_admin_groups(backend).await?
            } else {
                chats::get_groups(backend).await?
            };
            output::print_chats(&groups, args.format.resolve(default_format))?;
            Ok(Outcome::Success)
        }
        Command::Kick(args) => {
            let backend = sessions.acquire().await?;
            let report = ActionReport::from(members::kick_user(backend, &args.group, &args.user).await);
            report_outcome(&report, args.json)
        }
        Command::Mute(args) => {
            let duration = duration::parse_mute_duration(&args.duration)?;
            let backend = sessions.acquire().await?;
            let report = ActionReport::from(notify::mute_chat(backend, &args.chat, &duration).await);
            report_outcome(&report, args.json)
        }
        Command::Unmute(args) => {
            let backend = sessions.acquire().await?;
            let report = ActionReport::from(notify::unmute_chat(backend, &args.chat).await);
            report_outcome(&report, args.json)
        }
        Command::Folders(args) => {
            let backend = sessions.acquire().await?;
            let folders = folders::list_folders(backend).await?;
            output::print_folders(&folders, args.json)?;
            Ok(Outcome::Success)
        }
        Command::Folder(args) => {
            let backend = sessions.acquire().await?;
            let folder = folders::get_folder(backend, &args.name)
                .await?
                .ok_or(CoreError::FolderNotFound(args.name))?;
            output::print_folder(&folder, args.json)?;
            Ok(Outcome::Success)
        }
        Command::FolderAdd(args) => {
            let backend = sessions.acquire().await?;
            let report = ActionReport::from(folders::add_chat(backend, &args.folder, &args.chat).await);
            report_outcome(&report, args.json)
        }
        Command::FolderRemove(args) => {
            let backend = sessions.acquire().await?;
            let report = ActionReport::from(folders::remove_chat(backend, &args.folder, &args.chat).await);
            report_outcome(&report, args.json)
        }
        Command::Send(args) => {
            let backend = sessions.acquire().await?;
            let sent = messages::send_message(backend, &args.chat, &args.text, None).await?;
            output::print_sent(&sent, args.json)?;
            Ok(Outcome::Success)
        }
        Command::Reply(args) => {
            let backend = sessions.acquire().await?;
            let sent = messages::send_message(backend, &args.chat, &args.text, Some(args.msg_id)).await?;
            output::print_sent(&sent, args.json)?;
            Ok(Outcome::Success)
        }
        Command::Sync(args) => {
            let options = SyncOptions {
                days: args.days,
                chat: args.chat,
                output: args.output,
            };
            let backend = sessions.acquire().await?;
            let report = sync::sync_chats(backend, &options, Utc::now()).await?;
            println!(
                "Synced {} chat{} to {}",
                report.synced,
                if report.synced == 1 { "" } else { "s" },
                report.output.display()
            );
            if report.failed > 0 {
                eprintln!("{} chat(s) could not be synced", report.failed);
            }
            Ok(Outcome::Success)
        }
        Command::Logout(args) => {
            sessions.release().await;
            let store = sessions.store();
            if args.all {
                store.clear_all()?;
                println!("Logged out and cleared all credentials.");
                println!("Removed: {}", store.path().display());
            } else {
                store.clear_session()?;
                println!("Logged out and cleared session.");
                println!("API credentials preserved. Run \"tg auth\" to log in again.");
                println!("Use --all to also remove API credentials.");
            }
            Ok(Outcome::Success)
        }
    }
}

async fn handle_auth<C: Connector>(sessions: &mut SessionManager<C>) -> Result<Outcome, Box<dyn Error>> {
    match login::login(sessions, &mut TerminalPrompter).await? {
        LoginOutcome::AlreadyLoggedIn => {
            println!("Already configured. Run \"tg check\" to verify your session.");
            println!(
                "To re-authenticate, run \"tg logout\" (or delete {}) and then \"tg auth\" again.",
                sessions.store().path().display()
            );
        }
        LoginOutcome::LoggedIn { name } => {
            match name {
                Some(name) => println!("Logged in as {name}"),
                None => println!("Logged in."),
            }
            println!("Session saved to {}", sessions.store().path().display());
        }
    }
    Ok(Outcome::Success)
}

async fn handle_check<C: Connector>(sessions: &mut SessionManager<C>) -> Outcome {
    if !sessions.store().is_configured() {
        println!("{}", CoreError::NotConfigured);
        return Outcome::Failure;
    }

    let result = async {
        let backend = sessions.acquire().await?;
        let me = backend.get_me().await.map_err(CoreError::from_backend)?;
        Ok::<_, CoreError>(UserEntity::from(me))
    }
    .await;

    match result {
        Ok(me) => {
            println!("Session valid");
            println!(
                "Logged in as: {} (@{})",
                me.full_name(),
                me.username.as_deref().unwrap_or("no username")
            );
            Outcome::Success
        }
        Err(err) => {
            eprintln!("Session invalid or expired");
            eprintln!("{err}");
            println!("\nRun \"tg auth\" to re-authenticate.");
            Outcome::Failure
        }
    }
}

fn report_outcome(report: &ActionReport, json: bool) -> Result<Outcome, Box<dyn Error>> {
    output::print_report(report, json)?;
    Ok(Outcome::from_report(report))
}
