//! Messages of one channel, the composer, and the two live subscriptions
//! that keep them current.

use tracing::{debug, info, warn};
use uuid::Uuid;

use backchannel_db::{DataError, Repo};
use backchannel_realtime::{ChangeFeed, RealtimeError, Subscription};
use backchannel_types::events::{ChangeEvent, ChangeFilter};
use backchannel_types::models::{Attachment, Message, Reaction, Table};

use crate::composer::Composer;
use crate::notice::Notices;

/// What a live event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatUpdate {
    Message(Uuid),
    Reaction { message_id: Uuid, reaction_id: Uuid },
}

pub struct ChatView {
    repo: Repo,
    channel_id: Uuid,
    username: String,
    messages: Vec<Message>,
    composer: Composer,
    message_feed: Option<Subscription>,
    reaction_feed: Option<Subscription>,
}

impl ChatView {
    /// Subscribe to the channel's message inserts and to reaction inserts,
    /// then load the history. Events that race the load are merged by id.
    pub async fn open(
        repo: Repo,
        feed: &dyn ChangeFeed,
        channel_id: Uuid,
        username: impl Into<String>,
        notices: &mut Notices,
    ) -> Result<Self, RealtimeError> {
        let message_feed = feed
            .subscribe(ChangeFilter::inserts(Table::Messages).eq("channel_id", channel_id))
            .await?;
        let reaction_feed = feed.subscribe(ChangeFilter::inserts(Table::Reactions)).await?;

        let mut view = Self {
            repo,
            channel_id,
            username: username.into(),
            messages: Vec::new(),
            composer: Composer::new(),
            message_feed: Some(message_feed),
            reaction_feed: Some(reaction_feed),
        };
        view.reload(notices).await;
        Ok(view)
    }

    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn composer_mut(&mut self) -> &mut Composer {
        &mut self.composer
    }

    pub fn select_file(&mut self, attachment: Attachment, notices: &mut Notices) -> bool {
        self.composer.select_file(attachment, notices)
    }

    pub async fn reload(&mut self, notices: &mut Notices) -> bool {
        match self.repo.get_messages(self.channel_id).await {
            Ok(history) => {
                let live = std::mem::replace(&mut self.messages, history);
                for message in live {
                    self.merge_message(message);
                }
                true
            }
            Err(e) => {
                warn!("Loading messages for {} failed: {}", self.channel_id, e);
                notices.error("Failed to fetch messages. Please try again.");
                false
            }
        }
    }

    /// Send the composer contents. On failure the composer is left as is.
    pub async fn send(&mut self, notices: &mut Notices) -> bool {
        if !self.composer.is_ready() {
            return false;
        }

        let result = self
            .repo
            .add_message(
                self.channel_id,
                &self.username,
                self.composer.text().trim(),
                self.composer.attachment(),
            )
            .await;

        match result {
            Ok(message) => {
                self.merge_message(message);
                self.composer.clear();
                notices.success("Message sent successfully");
                true
            }
            Err(DataError::Upload(e)) => {
                notices.error(format!("Failed to upload file: {}", e));
                false
            }
            Err(DataError::MissingBucket(bucket)) => {
                warn!("Storage bucket '{}' is missing", bucket);
                notices.error("Storage is not properly configured. Please contact support.");
                false
            }
            Err(e) => {
                notices.error(format!("Failed to send message: {}", e));
                false
            }
        }
    }

    /// Add a reaction as the current user. Never fails outward.
    pub async fn react(&mut self, message_id: Uuid, emoji: &str, notices: &mut Notices) -> bool {
        match self.repo.add_reaction(message_id, &self.username, emoji).await {
            Ok(Some(reaction)) => self.merge_reaction(reaction),
            Ok(None) => {
                info!("{}", DataError::ReactionsUnavailable);
                false
            }
            Err(e) => {
                warn!("Reaction on {} failed: {}", message_id, e);
                notices.error("Failed to add reaction. Please try again.");
                false
            }
        }
    }

    /// Apply one live event. Returns what changed, if anything.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> Option<ChatUpdate> {
        match event.table {
            Table::Messages => match event.decode_new::<Message>() {
                Ok(message) if message.channel_id == self.channel_id => {
                    let id = message.id;
                    self.merge_message(message).then_some(ChatUpdate::Message(id))
                }
                Ok(_) => None,
                Err(e) => {
                    warn!("Ignoring malformed message insert: {}", e);
                    None
                }
            },
            Table::Reactions => match event.decode_new::<Reaction>() {
                Ok(reaction) => {
                    let update = ChatUpdate::Reaction {
                        message_id: reaction.message_id,
                        reaction_id: reaction.id,
                    };
                    self.merge_reaction(reaction).then_some(update)
                }
                Err(e) => {
                    warn!("Ignoring malformed reaction insert: {}", e);
                    None
                }
            },
            _ => None,
        }
    }

    /// Wait for the next live event that changes the view. `None` once both
    /// feeds are closed.
    pub async fn next_event(&mut self) -> Option<ChatUpdate> {
        loop {
            let event = tokio::select! {
                event = recv(&mut self.message_feed), if self.message_feed.is_some() => match event {
                    Some(event) => event,
                    None => {
                        self.message_feed = None;
                        continue;
                    }
                },
                event = recv(&mut self.reaction_feed), if self.reaction_feed.is_some() => match event {
                    Some(event) => event,
                    None => {
                        self.reaction_feed = None;
                        continue;
                    }
                },
                else => return None,
            };
            if let Some(update) = self.apply_event(&event) {
                return Some(update);
            }
        }
    }

    /// Apply every event already delivered without waiting.
    pub fn drain_pending(&mut self) -> Vec<ChatUpdate> {
        let mut events = Vec::new();
        for feed in [&mut self.message_feed, &mut self.reaction_feed].into_iter().flatten() {
            while let Some(event) = feed.try_recv() {
                events.push(event);
            }
        }
        events
            .iter()
            .filter_map(|event| self.apply_event(event))
            .collect()
    }

    /// Insert a message or fold its reactions and files into the copy we
    /// already hold. Returns true when the view changed.
    fn merge_message(&mut self, message: Message) -> bool {
        let Some(existing) = self.messages.iter_mut().find(|m| m.id == message.id) else {
            self.messages.push(message);
            return true;
        };

        let mut changed = false;
        for reaction in message.reactions {
            changed |= existing.merge_reaction(reaction);
        }
        for file in message.files {
            if !existing.files.iter().any(|f| f.id == file.id) {
                existing.files.push(file);
                changed = true;
            }
        }
        changed
    }

    fn merge_reaction(&mut self, reaction: Reaction) -> bool {
        match self.messages.iter_mut().find(|m| m.id == reaction.message_id) {
            Some(message) => message.merge_reaction(reaction),
            None => {
                debug!("Reaction {} for a message not in view", reaction.id);
                false
            }
        }
    }
}

async fn recv(feed: &mut Option<Subscription>) -> Option<ChangeEvent> {
    match feed {
        Some(feed) => feed.recv().await,
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use backchannel_db::LocalBackend;
    use backchannel_types::models::Channel;

    use crate::notice::NoticeLevel;

    struct Fixture {
        backend: Arc<LocalBackend>,
        repo: Repo,
        channel: Channel,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(LocalBackend::ephemeral(dir.path(), "files").await.unwrap());
        let repo = Repo::new(backend.clone(), "files");
        let channel = repo.add_channel("general").await.unwrap();
        Fixture {
            backend,
            repo,
            channel,
            _dir: dir,
        }
    }

    async fn open_view(fx: &Fixture, username: &str) -> ChatView {
        ChatView::open(
            fx.repo.clone(),
            &fx.backend.feed(),
            fx.channel.id,
            username,
            &mut Notices::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn own_message_appears_once_after_echo() {
        let fx = fixture().await;
        let mut view = open_view(&fx, "ada").await;
        let mut notices = Notices::new();

        view.composer_mut().set_text("  hello  ");
        assert!(view.send(&mut notices).await);
        assert_eq!(notices.last().unwrap().text, "Message sent successfully");
        assert_eq!(view.composer().text(), "");

        let echo = tokio::time::timeout(Duration::from_millis(100), view.next_event()).await;
        assert!(echo.is_err(), "echo must merge without a visible change");

        assert_eq!(view.messages().len(), 1);
        assert_eq!(view.messages()[0].content, "hello");
        assert_eq!(fx.repo.get_messages(fx.channel.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_composer_sends_nothing() {
        let fx = fixture().await;
        let mut view = open_view(&fx, "ada").await;

        view.composer_mut().set_text("   ");
        assert!(!view.send(&mut Notices::new()).await);
        assert!(fx.repo.get_messages(fx.channel.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_users_messages_and_reactions_arrive_live() {
        let fx = fixture().await;
        let mut view = open_view(&fx, "ada").await;

        let msg = fx.repo.add_message(fx.channel.id, "bob", "hi ada", None).await.unwrap();
        assert_eq!(view.next_event().await, Some(ChatUpdate::Message(msg.id)));

        let reaction = fx.repo.add_reaction(msg.id, "bob", "👋").await.unwrap().unwrap();
        assert_eq!(
            view.next_event().await,
            Some(ChatUpdate::Reaction {
                message_id: msg.id,
                reaction_id: reaction.id
            })
        );
        assert_eq!(view.messages()[0].reactions, vec![reaction]);
    }

    #[tokio::test]
    async fn messages_from_other_channels_are_not_shown() {
        let fx = fixture().await;
        let mut view = open_view(&fx, "ada").await;
        let elsewhere = fx.repo.add_channel("random").await.unwrap();

        fx.repo.add_message(elsewhere.id, "bob", "not here", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(view.drain_pending().is_empty());
        assert!(view.messages().is_empty());
    }

    #[tokio::test]
    async fn history_is_loaded_on_open() {
        let fx = fixture().await;
        fx.repo.add_message(fx.channel.id, "bob", "first", None).await.unwrap();
        fx.repo.add_message(fx.channel.id, "bob", "second", None).await.unwrap();

        let view = open_view(&fx, "ada").await;
        let contents: Vec<_> = view.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["first", "second"]);
    }

    #[tokio::test]
    async fn reaction_without_table_leaves_state_unchanged() {
        let fx = fixture().await;
        let mut view = open_view(&fx, "ada").await;
        let mut notices = Notices::new();

        view.composer_mut().set_text("react to me");
        view.send(&mut notices).await;
        notices.drain();
        let before = view.messages().to_vec();

        fx.backend
            .database()
            .with_conn(|conn| Ok(conn.execute_batch("DROP TABLE reactions")?))
            .unwrap();

        assert!(!view.react(before[0].id, "👍", &mut notices).await);
        assert_eq!(view.messages(), &before[..]);
        assert!(notices.is_empty());
    }

    #[tokio::test]
    async fn own_reaction_is_merged_once() {
        let fx = fixture().await;
        let mut view = open_view(&fx, "ada").await;
        let mut notices = Notices::new();

        view.composer_mut().set_text("hi");
        view.send(&mut notices).await;
        let id = view.messages()[0].id;

        assert!(view.react(id, "🎉", &mut notices).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(view.drain_pending().is_empty());
        assert_eq!(view.messages()[0].reactions.len(), 1);
        assert_eq!(view.messages()[0].reactions[0].user_id, "ada");
    }

    #[tokio::test]
    async fn missing_bucket_keeps_the_draft() {
        let fx = fixture().await;
        let repo = Repo::new(fx.backend.clone(), "no-such-bucket");
        let mut view = ChatView::open(repo, &fx.backend.feed(), fx.channel.id, "ada", &mut Notices::new())
            .await
            .unwrap();
        let mut notices = Notices::new();

        view.composer_mut().set_text("with file");
        view.select_file(Attachment::new("a.txt", "text/plain", &b"a"[..]), &mut notices);
        assert!(!view.send(&mut notices).await);

        let last = notices.last().unwrap();
        assert_eq!(last.level, NoticeLevel::Error);
        assert_eq!(last.text, "Storage is not properly configured. Please contact support.");
        assert_eq!(view.composer().text(), "with file");
        assert!(view.composer().attachment().is_some());
        assert!(view.messages().is_empty());
    }

    #[tokio::test]
    async fn attachment_is_sent_with_its_file_row() {
        let fx = fixture().await;
        let mut view = open_view(&fx, "ada").await;
        let mut notices = Notices::new();

        view.select_file(Attachment::new("notes.txt", "text/plain", &b"notes"[..]), &mut notices);
        assert!(view.send(&mut notices).await);

        let sent = &view.messages()[0];
        assert_eq!(sent.content, "");
        assert_eq!(sent.files.len(), 1);
        assert_eq!(sent.files[0].file_name, "notes.txt");
        assert!(view.composer().attachment().is_none());
    }
}
