mod api;
mod auth;
mod cache;
mod config;
mod dates;
mod groups;
mod output;

use std::io::{self, Read};

use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use dialoguer::Input;
use tokio::io::AsyncBufReadExt;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::api::{ApiClient, ApiError, AuthorizedClient, Message};
use crate::auth::{Session, SessionStore};
use crate::cache::{CacheError, ConversationCache, ConversationKey, Draft};
use crate::config::Config;
use crate::groups::{GroupRegistry, Membership};
use crate::output::{
    GroupListOutput, GroupMembersOutput, GroupSummary, MessageListOutput, MessageSummary,
};

#[derive(Parser)]
#[command(
    name = "orgchat",
    version,
    about = "Messenger CLI for the org attendance portal",
    after_help = "Examples:\n  orgchat auth login --user-id 42\n  orgchat messages list\n  orgchat messages list --user-id 42\n  orgchat messages send --group-id 3 --text \"meeting moved to 5pm\"\n  orgchat messages send --user-id 42 --image ./poster.png\n  orgchat groups list\n  orgchat groups create --name officers --member 8 --member 9\n  orgchat groups members add --id 3 --user 11\n  orgchat chat --user-id 42"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, global = true, help = "Output JSON instead of a table")]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Store or clear the API token")]
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
    #[command(about = "Read and send messages")]
    Messages {
        #[command(subcommand)]
        command: MessagesCommand,
    },
    #[command(about = "Manage custom group chats")]
    Groups {
        #[command(subcommand)]
        command: GroupsCommand,
    },
    #[command(about = "Watch a conversation and send messages interactively")]
    Chat(ChatArgs),
}

#[derive(Subcommand)]
enum AuthCommand {
    #[command(about = "Save an API token (prompts when --token is omitted)")]
    Login(AuthLoginArgs),
    #[command(about = "Clear the saved token")]
    Logout,
}

#[derive(Args)]
struct AuthLoginArgs {
    #[arg(long, help = "Bearer token issued by the portal")]
    token: Option<String>,

    #[arg(long, help = "Your user id (labels your own messages)")]
    user_id: Option<i64>,

    #[arg(long, help = "Your display name")]
    name: Option<String>,
}

#[derive(Subcommand)]
enum MessagesCommand {
    #[command(about = "List messages for a conversation")]
    List(ConversationArgs),
    #[command(about = "Send a message (text, image, or both)")]
    Send(MessagesSendArgs),
}

#[derive(Args)]
struct ConversationArgs {
    #[arg(long, help = "Custom group chat id")]
    group_id: Option<i64>,

    #[arg(long, help = "User id (for direct messages)")]
    user_id: Option<i64>,

    #[arg(long, help = "Show only the last N messages")]
    limit: Option<usize>,
}

#[derive(Args)]
struct MessagesSendArgs {
    #[arg(long, help = "Custom group chat id")]
    group_id: Option<i64>,

    #[arg(long, help = "User id (for direct messages)")]
    user_id: Option<i64>,

    #[arg(long, help = "Message text")]
    text: Option<String>,

    #[arg(long, value_name = "PATH", help = "Image attachment path")]
    image: Option<std::path::PathBuf>,

    #[arg(long, help = "Read message text from stdin")]
    stdin: bool,
}

#[derive(Subcommand)]
enum GroupsCommand {
    #[command(about = "List your group chats")]
    List,
    #[command(about = "Create a group chat (you become its admin)")]
    Create(GroupsCreateArgs),
    #[command(about = "Rename a group chat")]
    Rename(GroupsRenameArgs),
    #[command(about = "Change a group chat's avatar color")]
    Recolor(GroupsRecolorArgs),
    #[command(about = "Manage a group chat's roster")]
    Members {
        #[command(subcommand)]
        command: MembersCommand,
    },
    #[command(about = "Leave a group chat")]
    Leave(GroupsLeaveArgs),
}

#[derive(Args)]
struct GroupsCreateArgs {
    #[arg(long, help = "Group name")]
    name: String,

    #[arg(
        long = "member",
        value_name = "USER_ID",
        num_args = 1..,
        action = ArgAction::Append,
        help = "Initial member user id (repeatable)"
    )]
    members: Vec<i64>,

    #[arg(long, help = "Avatar color (hex)")]
    color: Option<String>,
}

#[derive(Args)]
struct GroupsRenameArgs {
    #[arg(long, help = "Group id")]
    id: i64,

    #[arg(long, help = "New name")]
    name: String,
}

#[derive(Args)]
struct GroupsRecolorArgs {
    #[arg(long, help = "Group id")]
    id: i64,

    #[arg(long, help = "New avatar color (hex)")]
    color: String,
}

#[derive(Subcommand)]
enum MembersCommand {
    #[command(about = "Add members to a group chat")]
    Add(MembersAddArgs),
    #[command(about = "Remove a member from a group chat")]
    Remove(MembersRemoveArgs),
}

#[derive(Args)]
struct MembersAddArgs {
    #[arg(long, help = "Group id")]
    id: i64,

    #[arg(
        long = "user",
        value_name = "USER_ID",
        num_args = 1..,
        action = ArgAction::Append,
        help = "User id to add (repeatable)"
    )]
    users: Vec<i64>,
}

#[derive(Args)]
struct MembersRemoveArgs {
    #[arg(long, help = "Group id")]
    id: i64,

    #[arg(long, help = "User id to remove")]
    user: i64,
}

#[derive(Args)]
struct GroupsLeaveArgs {
    #[arg(long, help = "Group id")]
    id: i64,
}

#[derive(Args)]
struct ChatArgs {
    #[arg(long, help = "Custom group chat id")]
    group_id: Option<i64>,

    #[arg(long, help = "User id (for direct messages)")]
    user_id: Option<i64>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(error) = run().await {
        eprintln!("{error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::load();
    let sessions = SessionStore::new(config.session_path.clone(), config.api_base_url.clone());
    let api = ApiClient::new(config.api_base_url.clone());

    match cli.command {
        Command::Auth { command } => match command {
            AuthCommand::Login(args) => {
                let token = match args.token {
                    Some(token) => token,
                    None => Input::<String>::new()
                        .with_prompt("API token")
                        .interact_text()?,
                };
                let token = token.trim().to_string();
                if token.is_empty() {
                    return Err("Token must not be empty".into());
                }
                sessions.store(&token, args.user_id, args.name.as_deref())?;
                println!("Token saved.");
            }
            AuthCommand::Logout => {
                sessions.clear()?;
                println!("Logged out.");
            }
        },
        Command::Messages { command } => match command {
            MessagesCommand::List(args) => {
                let session = sessions.load()?;
                let token = require_token(&session)?;
                let conversation = conversation_from_args(args.group_id, args.user_id)?;
                let current_user_id = session.user_id;
                let gateway = AuthorizedClient::new(api, token);
                let mut conversations = ConversationCache::new(gateway);

                conversations.load_initial(&conversation).await?;
                let messages = conversations.messages(&conversation);
                let start = args
                    .limit
                    .map(|limit| messages.len().saturating_sub(limit))
                    .unwrap_or(0);
                let output = MessageListOutput {
                    conversation: conversation_label(&conversation),
                    items: summarize_messages(&messages[start..], current_user_id),
                };
                output::print_messages(&output, cli.json)?;
            }
            MessagesCommand::Send(args) => {
                let token = require_token(&sessions.load()?)?;
                let conversation = conversation_from_args(args.group_id, args.user_id)?;
                let text = resolve_message_text(args.text, args.stdin)?;
                let draft = Draft {
                    text,
                    image: args.image,
                };

                let gateway = AuthorizedClient::new(api, token);
                let mut conversations = ConversationCache::new(gateway);
                let message = conversations.send(&conversation, &draft).await?;
                if cli.json {
                    output::print_json(&message)?;
                } else {
                    println!(
                        "Message {} sent to {}.",
                        message.id,
                        conversation_label(&conversation)
                    );
                }
            }
        },
        Command::Groups { command } => {
            let session = sessions.load()?;
            let token = require_token(&session)?;
            let current_user_id = session.user_id;
            let gateway = AuthorizedClient::new(api, token);
            let mut registry = GroupRegistry::new(gateway, current_user_id);
            handle_groups(command, &mut registry, current_user_id, cli.json).await?;
        }
        Command::Chat(args) => {
            let session = sessions.load()?;
            let token = require_token(&session)?;
            let conversation = conversation_from_args(args.group_id, args.user_id)?;
            let current_user_id = session.user_id;
            let gateway = AuthorizedClient::new(api, token);
            let conversations = ConversationCache::new(gateway);
            watch_conversation(
                conversations,
                conversation,
                current_user_id,
                config.poll_interval,
            )
            .await?;
        }
    }

    Ok(())
}

async fn handle_groups(
    command: GroupsCommand,
    registry: &mut GroupRegistry<AuthorizedClient>,
    current_user_id: Option<i64>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        GroupsCommand::List => {
            registry.refresh().await?;
            let output = summarize_groups(registry, current_user_id);
            output::print_groups(&output, json)?;
        }
        GroupsCommand::Create(args) => {
            if args.members.is_empty() {
                return Err("Provide at least one --member".into());
            }
            let group = registry
                .create(&args.name, &args.members, args.color.as_deref())
                .await?;
            if json {
                output::print_json(group)?;
            } else {
                println!("Created group {} ({}).", group.name, group.id);
            }
        }
        GroupsCommand::Rename(args) => {
            registry.refresh().await?;
            let group = registry.rename(args.id, &args.name).await?;
            if json {
                output::print_json(group)?;
            } else {
                println!("Group {} renamed to {}.", group.id, group.name);
            }
        }
        GroupsCommand::Recolor(args) => {
            registry.refresh().await?;
            let group = registry.recolor(args.id, &args.color).await?;
            if json {
                output::print_json(group)?;
            } else {
                println!("Group {} recolored.", group.id);
            }
        }
        GroupsCommand::Members { command } => match command {
            MembersCommand::Add(args) => {
                if args.users.is_empty() {
                    return Err("Provide at least one --user".into());
                }
                registry.refresh().await?;
                let group = registry.add_members(args.id, &args.users).await?;
                if json {
                    output::print_json(group)?;
                } else {
                    let output = GroupMembersOutput {
                        group_name: group.name.clone(),
                        members: group.members.clone(),
                    };
                    output::print_group_members(&output, false)?;
                }
            }
            MembersCommand::Remove(args) => {
                registry.refresh().await?;
                registry.remove_member(args.id, args.user).await?;
                println!("Removed user {} from group {}.", args.user, args.id);
            }
        },
        GroupsCommand::Leave(args) => {
            let user_id = current_user_id
                .ok_or("No user id on record. Run `orgchat auth login --user-id <id>` first.")?;
            registry.refresh().await?;
            registry.remove_member(args.id, user_id).await?;
            println!("Left group {}.", args.id);
        }
    }
    Ok(())
}

/// Interactive watch loop: prints history, then polls on the configured
/// interval while forwarding stdin lines as sends. Poll failures are
/// logged and retried on the next tick; a 401 stops the loop.
async fn watch_conversation(
    mut conversations: ConversationCache<AuthorizedClient>,
    conversation: ConversationKey,
    current_user_id: Option<i64>,
    poll_interval: std::time::Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    const HISTORY_LINES: usize = 25;

    match conversations.load_initial(&conversation).await {
        Ok(messages) => {
            let start = messages.len().saturating_sub(HISTORY_LINES);
            for item in summarize_messages(&messages[start..], current_user_id) {
                println!("{}", output::message_line(&item));
            }
        }
        Err(CacheError::Fetch(ApiError::Unauthorized)) => {
            return Err("Not authenticated. Run `orgchat auth login` first.".into());
        }
        Err(error) => {
            eprintln!("Could not load history: {error} (retrying in the background)");
        }
    }
    println!(
        "Watching {}. Type a message and press enter to send; ctrl-d to quit.",
        conversation_label(&conversation)
    );

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match conversations.poll(&conversation).await {
                    Ok(added) => {
                        for item in summarize_messages(&added, current_user_id) {
                            println!("{}", output::message_line(&item));
                        }
                    }
                    Err(CacheError::Fetch(ApiError::Unauthorized)) => {
                        eprintln!("Session expired; stopping.");
                        break;
                    }
                    Err(error) => debug!("poll failed, retrying next tick: {error}"),
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let draft = Draft::text(line);
                if draft.is_empty() {
                    continue;
                }
                match conversations.send(&conversation, &draft).await {
                    Ok(message) => {
                        let item = summarize_message(&message, current_user_id, Utc::now());
                        println!("{}", output::message_line(&item));
                    }
                    Err(error) => eprintln!("Send failed: {error}"),
                }
            }
        }
    }
    Ok(())
}

fn require_token(session: &Session) -> Result<String, Box<dyn std::error::Error>> {
    match &session.token {
        Some(token) => Ok(token.clone()),
        None => Err("No token found. Run `orgchat auth login` first.".into()),
    }
}

fn conversation_from_args(
    group_id: Option<i64>,
    user_id: Option<i64>,
) -> Result<ConversationKey, Box<dyn std::error::Error>> {
    match (group_id, user_id) {
        (Some(_), Some(_)) => Err("Provide only one of --group-id or --user-id".into()),
        (Some(group_id), None) => Ok(ConversationKey::CustomGroup { group_id }),
        (None, Some(peer_user_id)) => Ok(ConversationKey::Direct { peer_user_id }),
        (None, None) => Ok(ConversationKey::OrgWide),
    }
}

fn conversation_label(conversation: &ConversationKey) -> String {
    match conversation {
        ConversationKey::OrgWide => "the org-wide group".to_string(),
        ConversationKey::CustomGroup { group_id } => format!("group {group_id}"),
        ConversationKey::Direct { peer_user_id } => format!("user {peer_user_id}"),
    }
}

fn resolve_message_text(
    text: Option<String>,
    use_stdin: bool,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    if !use_stdin {
        return Ok(text);
    }
    if text.is_some() {
        return Err("Provide only one of --text or --stdin".into());
    }
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(trimmed.to_string()))
}

fn summarize_messages(messages: &[Message], current_user_id: Option<i64>) -> Vec<MessageSummary> {
    let now = Utc::now();
    messages
        .iter()
        .map(|message| summarize_message(message, current_user_id, now))
        .collect()
}

fn summarize_message(
    message: &Message,
    current_user_id: Option<i64>,
    now: chrono::DateTime<Utc>,
) -> MessageSummary {
    MessageSummary {
        preview: output::message_preview(message),
        sender_name: message.sender_name.clone(),
        own: current_user_id == Some(message.sender_id),
        relative_date: dates::format_relative_date(message.created_at, now),
        message: message.clone(),
    }
}

fn summarize_groups(
    registry: &GroupRegistry<AuthorizedClient>,
    current_user_id: Option<i64>,
) -> GroupListOutput {
    let groups = registry
        .groups()
        .into_iter()
        .map(|group| {
            let role = match current_user_id
                .map(|user_id| registry.membership(group.id, user_id))
                .unwrap_or(Membership::NotMember)
            {
                Membership::Admin => "admin",
                Membership::Member => "member",
                Membership::NotMember => "-",
            };
            GroupSummary {
                member_count: group.members.len(),
                role: role.to_string(),
                group: group.clone(),
            }
        })
        .collect();
    GroupListOutput { groups }
}
