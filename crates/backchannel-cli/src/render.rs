use uuid::Uuid;

use backchannel_types::models::{Channel, FileRecord, Message};

/// One message as printed in the terminal. `index` is 1-based and is what
/// `/react` refers to.
pub fn message(index: usize, message: &Message) -> String {
    let mut out = format!(
        "#{:<3} [{}] {}: {}",
        index,
        message.created_at.format("%H:%M"),
        message.username,
        message.content
    );
    for file in &message.files {
        out.push_str("\n       ");
        out.push_str(&attachment(file));
    }
    let reactions = reactions(message);
    if !reactions.is_empty() {
        out.push_str("\n       ");
        out.push_str(&reactions);
    }
    out
}

fn attachment(file: &FileRecord) -> String {
    format!(
        "[file] {} ({}, {}) {}",
        file.file_name,
        file.file_type,
        size(file.file_size),
        file.file_url
    )
}

/// Reactions grouped by emoji in first-seen order, e.g. `👍 2  🎉 1`.
pub fn reactions(message: &Message) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for reaction in &message.reactions {
        match counts.iter_mut().find(|(emoji, _)| *emoji == reaction.emoji) {
            Some((_, n)) => *n += 1,
            None => counts.push((&reaction.emoji, 1)),
        }
    }
    counts
        .iter()
        .map(|(emoji, n)| format!("{} {}", emoji, n))
        .collect::<Vec<_>>()
        .join("  ")
}

pub fn channels(channels: &[Channel], selected: Option<Uuid>) -> String {
    if channels.is_empty() {
        return "No channels yet. Use /create <name>.".to_string();
    }
    channels
        .iter()
        .map(|c| {
            let marker = if Some(c.id) == selected { '*' } else { ' ' };
            format!("{} #{}", marker, c.name)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn size(bytes: i64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KIB {
        format!("{} B", bytes)
    } else if b < KIB * KIB {
        format!("{:.1} KB", b / KIB)
    } else {
        format!("{:.1} MB", b / (KIB * KIB))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backchannel_types::models::Reaction;

    fn sample() -> Message {
        let id = Uuid::new_v4();
        let at = "2024-05-01T12:34:00Z".parse().unwrap();
        let reaction = |emoji: &str| Reaction {
            id: Uuid::new_v4(),
            message_id: id,
            user_id: "bob".into(),
            emoji: emoji.into(),
            created_at: at,
        };
        Message {
            id,
            channel_id: Uuid::new_v4(),
            username: "ada".into(),
            content: "hello".into(),
            created_at: at,
            reactions: vec![reaction("👍"), reaction("🎉"), reaction("👍")],
            files: vec![FileRecord {
                id: Uuid::new_v4(),
                message_id: id,
                file_name: "notes.txt".into(),
                file_type: "text/plain".into(),
                file_size: 2048,
                file_url: "https://cdn.example/notes.txt".into(),
                created_at: at,
            }],
        }
    }

    #[test]
    fn message_lists_files_and_grouped_reactions() {
        let text = message(3, &sample());
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "#3   [12:34] ada: hello");
        assert_eq!(lines[1].trim(), "[file] notes.txt (text/plain, 2.0 KB) https://cdn.example/notes.txt");
        assert_eq!(lines[2].trim(), "👍 2  🎉 1");
    }

    #[test]
    fn selected_channel_is_marked() {
        let at = "2024-05-01T12:00:00Z".parse().unwrap();
        let general = Channel { id: Uuid::new_v4(), name: "general".into(), created_at: at };
        let random = Channel { id: Uuid::new_v4(), name: "random".into(), created_at: at };
        assert_eq!(
            channels(&[general.clone(), random], Some(general.id)),
            "* #general\n  #random"
        );
        assert!(channels(&[], None).starts_with("No channels"));
    }
}
