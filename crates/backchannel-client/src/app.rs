//! Top-level state: who is signed in, which channel is open, and the chat
//! view for it.

use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use backchannel_db::Repo;
use backchannel_realtime::{ChangeFeed, RealtimeError};
use backchannel_types::models::Attachment;

use crate::channels::{ChannelChange, ChannelList};
use crate::chat::{ChatUpdate, ChatView};
use crate::notice::{Notice, Notices};
use crate::session::{SessionError, SessionStore};

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Channels(ChannelChange),
    Chat(ChatUpdate),
}

pub struct App {
    repo: Repo,
    feed: Arc<dyn ChangeFeed>,
    session: SessionStore,
    channels: ChannelList,
    chat: Option<ChatView>,
    notices: Notices,
}

impl App {
    /// Subscribe to channels, load them and open the selected channel when
    /// a user is already signed in.
    pub async fn start(
        repo: Repo,
        feed: Arc<dyn ChangeFeed>,
        session: SessionStore,
    ) -> Result<Self, RealtimeError> {
        let mut channels = ChannelList::new(repo.clone());
        channels.subscribe(feed.as_ref()).await?;

        let mut app = Self {
            repo,
            feed,
            session,
            channels,
            chat: None,
            notices: Notices::new(),
        };
        app.channels.load(&mut app.notices).await;
        app.sync_chat().await;
        Ok(app)
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    pub fn username(&self) -> Option<&str> {
        self.session.username()
    }

    pub fn channels(&self) -> &ChannelList {
        &self.channels
    }

    pub fn chat(&self) -> Option<&ChatView> {
        self.chat.as_ref()
    }

    pub fn chat_mut(&mut self) -> Option<&mut ChatView> {
        self.chat.as_mut()
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain()
    }

    pub async fn sign_in(&mut self, name: &str) -> Result<(), SessionError> {
        let previous = self.session.username().map(str::to_string);
        let name = self.session.sign_in(name)?;
        // A new name means a new author for the open view.
        if previous.as_deref() != Some(name.as_str()) {
            self.chat = None;
        }
        self.channels.ensure_selection();
        self.sync_chat().await;
        Ok(())
    }

    /// Forget the user and the open channel.
    pub fn sign_out(&mut self) -> Result<(), SessionError> {
        self.session.sign_out()?;
        self.channels.clear_selection();
        self.chat = None;
        Ok(())
    }

    pub async fn select_channel(&mut self, id: Uuid) -> bool {
        if !self.channels.select(id) {
            return false;
        }
        self.sync_chat().await;
        true
    }

    pub async fn create_channel(&mut self, name: &str) -> bool {
        let created = self.channels.create(name, &mut self.notices).await.is_some();
        if created {
            self.sync_chat().await;
        }
        created
    }

    pub async fn delete_channel(&mut self, id: Uuid) -> bool {
        let deleted = self.channels.delete(id, &mut self.notices).await;
        if deleted {
            self.sync_chat().await;
        }
        deleted
    }

    pub fn select_file(&mut self, attachment: Attachment) -> bool {
        match self.chat.as_mut() {
            Some(chat) => chat.select_file(attachment, &mut self.notices),
            None => {
                self.notices.error("Select a channel first");
                false
            }
        }
    }

    pub fn clear_file(&mut self) {
        if let Some(chat) = self.chat.as_mut() {
            chat.composer_mut().clear_file();
        }
    }

    pub async fn send(&mut self, text: &str) -> bool {
        let Some(chat) = self.chat.as_mut() else {
            self.notices.error("Select a channel first");
            return false;
        };
        chat.composer_mut().set_text(text);
        chat.send(&mut self.notices).await
    }

    pub async fn react(&mut self, message_id: Uuid, emoji: &str) -> bool {
        match self.chat.as_mut() {
            Some(chat) => chat.react(message_id, emoji, &mut self.notices).await,
            None => false,
        }
    }

    /// Wait for the next live change to the channel list or the open chat.
    /// `None` once the feed is closed. Cancel safe: a view switch cut short
    /// is finished on the next call.
    pub async fn next_event(&mut self) -> Option<AppEvent> {
        self.sync_chat().await;

        let event = match self.chat.as_mut() {
            Some(chat) => tokio::select! {
                change = self.channels.next_event() => change.map(AppEvent::Channels),
                update = chat.next_event() => update.map(AppEvent::Chat),
            },
            None => self.channels.next_event().await.map(AppEvent::Channels),
        };

        if let Some(AppEvent::Channels(_)) = &event {
            self.sync_chat().await;
        }
        event
    }

    /// Make the chat view follow the selected channel. Dropping the old
    /// view releases its subscriptions.
    async fn sync_chat(&mut self) {
        let wanted = match self.session.username() {
            Some(_) => self.channels.selected(),
            None => None,
        };
        if self.chat.as_ref().map(ChatView::channel_id) == wanted {
            return;
        }

        self.chat = None;
        let (Some(channel_id), Some(username)) = (wanted, self.session.username()) else {
            return;
        };

        match ChatView::open(
            self.repo.clone(),
            self.feed.as_ref(),
            channel_id,
            username,
            &mut self.notices,
        )
        .await
        {
            Ok(view) => {
                info!("Opened channel {}", channel_id);
                self.chat = Some(view);
            }
            Err(e) => {
                error!("Subscribing to channel {} failed: {}", channel_id, e);
                self.notices.error(format!("Failed to open channel: {}", e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use backchannel_db::LocalBackend;

    async fn start(dir: &std::path::Path, session: SessionStore) -> (App, Repo) {
        let backend = Arc::new(LocalBackend::ephemeral(dir, "files").await.unwrap());
        let repo = Repo::new(backend.clone(), "files");
        let app = App::start(repo.clone(), Arc::new(backend.feed()), session).await.unwrap();
        (app, repo)
    }

    #[tokio::test]
    async fn signed_out_user_sees_no_chat() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _) = start(dir.path(), SessionStore::in_memory()).await;

        app.create_channel("general").await;
        assert!(app.channels().selected().is_some());
        assert!(app.chat().is_none());

        app.sign_in("ada").await.unwrap();
        let chat = app.chat().unwrap();
        assert_eq!(chat.username(), "ada");
        assert_eq!(Some(chat.channel_id()), app.channels().selected());
    }

    #[tokio::test]
    async fn switching_channels_reopens_the_view() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = SessionStore::in_memory();
        session.sign_in("ada").unwrap();
        let (mut app, repo) = start(dir.path(), session).await;

        app.create_channel("one").await;
        let one = app.channels().selected().unwrap();
        assert!(app.send("in one").await);

        app.create_channel("two").await;
        let two = app.channels().selected().unwrap();
        assert_eq!(app.chat().unwrap().channel_id(), two);
        assert!(app.chat().unwrap().messages().is_empty());

        assert!(app.select_channel(one).await);
        assert_eq!(app.chat().unwrap().messages().len(), 1);
        assert_eq!(repo.get_messages(one).await.unwrap()[0].username, "ada");
    }

    #[tokio::test]
    async fn sign_out_clears_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = SessionStore::in_memory();
        session.sign_in("ada").unwrap();
        let (mut app, _) = start(dir.path(), session).await;

        app.create_channel("general").await;
        assert!(app.chat().is_some());

        app.sign_out().unwrap();
        assert_eq!(app.username(), None);
        assert_eq!(app.channels().selected(), None);
        assert!(app.chat().is_none());
    }

    #[tokio::test]
    async fn signing_back_in_reopens_the_first_channel() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = SessionStore::in_memory();
        session.sign_in("ada").unwrap();
        let (mut app, _) = start(dir.path(), session).await;

        app.create_channel("general").await;
        app.create_channel("random").await;
        let general = app.channels().channels()[0].id;

        app.sign_out().unwrap();
        app.sign_in("ada").await.unwrap();

        assert_eq!(app.channels().selected(), Some(general));
        assert_eq!(app.chat().unwrap().channel_id(), general);
    }

    #[tokio::test]
    async fn same_name_sign_in_keeps_the_draft() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = SessionStore::in_memory();
        session.sign_in("ada").unwrap();
        let (mut app, _) = start(dir.path(), session).await;

        app.create_channel("general").await;
        app.chat_mut().unwrap().composer_mut().set_text("half written");
        assert!(app.select_file(Attachment::new("a.txt", "text/plain", &b"a"[..])));

        app.sign_in(" ada ").await.unwrap();
        let composer = app.chat().unwrap().composer();
        assert_eq!(composer.text(), "half written");
        assert!(composer.attachment().is_some());

        app.sign_in("bob").await.unwrap();
        let chat = app.chat().unwrap();
        assert_eq!(chat.username(), "bob");
        assert_eq!(chat.composer().text(), "");
    }

    #[tokio::test]
    async fn remote_delete_of_open_channel_moves_the_view() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = SessionStore::in_memory();
        session.sign_in("ada").unwrap();
        let (mut app, repo) = start(dir.path(), session).await;

        let first = repo.add_channel("first").await.unwrap();
        let second = repo.add_channel("second").await.unwrap();
        assert_eq!(app.next_event().await, Some(AppEvent::Channels(ChannelChange::Added(first.clone()))));
        assert_eq!(app.chat().unwrap().channel_id(), first.id);
        assert_eq!(app.next_event().await, Some(AppEvent::Channels(ChannelChange::Added(second.clone()))));

        assert!(app.select_channel(second.id).await);
        repo.delete_channel(second.id).await.unwrap();
        assert_eq!(app.next_event().await, Some(AppEvent::Channels(ChannelChange::Removed(second.id))));
        assert_eq!(app.chat().unwrap().channel_id(), first.id);
    }
}
