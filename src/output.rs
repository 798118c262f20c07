use serde::Serialize;
use thiserror::Error;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::api::{Group, GroupMember, Message};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Serialize)]
pub struct MessageSummary {
    pub message: Message,
    pub preview: String,
    pub sender_name: String,
    pub own: bool,
    pub relative_date: String,
}

#[derive(Clone, Serialize)]
pub struct MessageListOutput {
    pub conversation: String,
    pub items: Vec<MessageSummary>,
}

#[derive(Clone, Serialize)]
pub struct GroupSummary {
    pub group: Group,
    pub member_count: usize,
    pub role: String,
}

#[derive(Clone, Serialize)]
pub struct GroupListOutput {
    pub groups: Vec<GroupSummary>,
}

#[derive(Clone, Serialize)]
pub struct GroupMembersOutput {
    pub group_name: String,
    pub members: Vec<GroupMember>,
}

pub fn message_preview(message: &Message) -> String {
    match (message.body.as_deref(), message.image_url.as_deref()) {
        (Some(body), Some(_)) => format!("{body} [image]"),
        (Some(body), None) => body.to_string(),
        (None, Some(url)) => format!("[image] {url}"),
        (None, None) => String::new(),
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), OutputError> {
    let payload = serde_json::to_string_pretty(value)?;
    println!("{payload}");
    Ok(())
}

pub fn print_messages(output: &MessageListOutput, json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(output);
    }

    println!("Messages for {}", output.conversation);

    let mut from_width = display_width("from");
    let mut when_width = display_width("when");
    for item in &output.items {
        from_width = from_width.max(display_width(&item.sender_name));
        when_width = when_width.max(display_width(&item.relative_date));
    }
    from_width = from_width.min(18);
    when_width = when_width.min(10);

    println!(
        "{}  {}  {}  {}",
        pad_left("id", 6),
        pad_right("when", when_width),
        pad_right("from", from_width),
        pad_right("text", 72),
    );
    for item in &output.items {
        println!(
            "{}  {}  {}  {}",
            pad_left(&item.message.id.to_string(), 6),
            pad_right(&item.relative_date, when_width),
            pad_right(&truncate_display(&item.sender_name, from_width), from_width),
            pad_right(&truncate_display(&item.preview, 72), 72),
        );
    }
    Ok(())
}

/// One-line rendering used by the interactive chat loop.
pub fn message_line(item: &MessageSummary) -> String {
    let sender = if item.own { "you" } else { &item.sender_name };
    format!("[{}] {}: {}", item.relative_date, sender, item.preview)
}

pub fn print_groups(output: &GroupListOutput, json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(output);
    }

    let mut name_width = display_width("name");
    for group in &output.groups {
        name_width = name_width.max(display_width(&group.group.name));
    }
    name_width = name_width.min(28);

    println!(
        "{}  {}  {}  {}  {}",
        pad_left("id", 6),
        pad_right("name", name_width),
        pad_left("members", 7),
        pad_right("role", 9),
        pad_right("color", 8),
    );
    for group in &output.groups {
        let color = group.group.avatar_color.as_deref().unwrap_or("-");
        println!(
            "{}  {}  {}  {}  {}",
            pad_left(&group.group.id.to_string(), 6),
            pad_right(&truncate_display(&group.group.name, name_width), name_width),
            pad_left(&group.member_count.to_string(), 7),
            pad_right(&group.role, 9),
            pad_right(&truncate_display(color, 8), 8),
        );
    }
    Ok(())
}

pub fn print_group_members(output: &GroupMembersOutput, json: bool) -> Result<(), OutputError> {
    if json {
        return print_json(output);
    }

    println!("Members of {}", output.group_name);

    let mut name_width = display_width("name");
    for member in &output.members {
        name_width = name_width.max(display_width(&member.name));
    }
    name_width = name_width.min(28);

    println!(
        "{}  {}  {}",
        pad_left("user", 6),
        pad_right("name", name_width),
        pad_right("role", 8),
    );
    for member in &output.members {
        let role = match member.role {
            crate::api::GroupRole::Admin => "admin",
            crate::api::GroupRole::Member => "member",
        };
        println!(
            "{}  {}  {}",
            pad_left(&member.user_id.to_string(), 6),
            pad_right(&truncate_display(&member.name, name_width), name_width),
            pad_right(role, 8),
        );
    }
    Ok(())
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
