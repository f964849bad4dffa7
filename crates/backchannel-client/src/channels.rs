//! Channel list with the current selection, kept live by a subscription to
//! the channels table.

use tracing::{debug, warn};
use uuid::Uuid;

use backchannel_db::Repo;
use backchannel_realtime::{ChangeFeed, RealtimeError, Subscription};
use backchannel_types::events::{ChangeEvent, ChangeFilter, ChangeKind};
use backchannel_types::models::{Channel, Table};

use crate::notice::Notices;

/// A change applied from the live feed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelChange {
    Added(Channel),
    Removed(Uuid),
}

pub struct ChannelList {
    repo: Repo,
    channels: Vec<Channel>,
    selected: Option<Uuid>,
    subscription: Option<Subscription>,
}

impl ChannelList {
    pub fn new(repo: Repo) -> Self {
        Self {
            repo,
            channels: Vec::new(),
            selected: None,
            subscription: None,
        }
    }

    /// Follow channel inserts and deletes. Replaces any earlier subscription.
    pub async fn subscribe(&mut self, feed: &dyn ChangeFeed) -> Result<(), RealtimeError> {
        self.subscription = Some(feed.subscribe(ChangeFilter::table(Table::Channels)).await?);
        Ok(())
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn selected(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn selected_channel(&self) -> Option<&Channel> {
        self.selected
            .and_then(|id| self.channels.iter().find(|c| c.id == id))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn select(&mut self, id: Uuid) -> bool {
        if self.channels.iter().any(|c| c.id == id) {
            self.selected = Some(id);
            true
        } else {
            false
        }
    }

    /// Select the first channel when nothing valid is selected.
    pub fn ensure_selection(&mut self) {
        if self.selected_channel().is_none() {
            self.selected = self.channels.first().map(|c| c.id);
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Fetch all channels, selecting the first when nothing is selected.
    pub async fn load(&mut self, notices: &mut Notices) -> bool {
        match self.repo.get_channels().await {
            Ok(channels) => {
                self.channels = channels;
                self.ensure_selection();
                true
            }
            Err(e) => {
                notices.error(format!("Failed to fetch channels: {}", e));
                false
            }
        }
    }

    pub async fn create(&mut self, name: &str, notices: &mut Notices) -> Option<Channel> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        match self.repo.add_channel(name).await {
            Ok(channel) => {
                self.insert(channel.clone());
                self.selected = Some(channel.id);
                notices.success("Channel created successfully");
                Some(channel)
            }
            Err(e) => {
                notices.error(format!("Failed to create channel: {}", e));
                None
            }
        }
    }

    pub async fn delete(&mut self, id: Uuid, notices: &mut Notices) -> bool {
        match self.repo.delete_channel(id).await {
            Ok(()) => {
                self.remove(id);
                true
            }
            Err(e) => {
                notices.error(format!("Failed to delete channel: {}", e));
                false
            }
        }
    }

    /// Apply one live change. Returns what changed, if anything.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> Option<ChannelChange> {
        if event.table != Table::Channels {
            return None;
        }
        match event.kind {
            ChangeKind::Insert => match event.decode_new::<Channel>() {
                Ok(channel) => {
                    let added = self.insert(channel.clone());
                    if added && self.selected.is_none() {
                        self.selected = Some(channel.id);
                    }
                    added.then_some(ChannelChange::Added(channel))
                }
                Err(e) => {
                    warn!("Ignoring malformed channel insert: {}", e);
                    None
                }
            },
            ChangeKind::Delete => {
                let id = event.column("id").and_then(|v| v.parse::<Uuid>().ok())?;
                self.remove(id).then_some(ChannelChange::Removed(id))
            }
            ChangeKind::Update => None,
        }
    }

    /// Wait for the next change that alters the list. `None` once the feed
    /// is closed or was never opened.
    pub async fn next_event(&mut self) -> Option<ChannelChange> {
        loop {
            let event = self.subscription.as_mut()?.recv().await?;
            if let Some(change) = self.apply_event(&event) {
                return Some(change);
            }
        }
    }

    fn insert(&mut self, channel: Channel) -> bool {
        if self.channels.iter().any(|c| c.id == channel.id) {
            debug!("Channel {} already listed", channel.id);
            return false;
        }
        self.channels.push(channel);
        true
    }

    fn remove(&mut self, id: Uuid) -> bool {
        let before = self.channels.len();
        self.channels.retain(|c| c.id != id);
        let removed = self.channels.len() != before;
        if self.selected == Some(id) {
            self.selected = self.channels.first().map(|c| c.id);
        }
        removed
    }
}
