//! Front-end state for the chat: session, channel list, composer and the
//! message view of one channel. Front ends drive it from a single loop and
//! render whatever it holds.

pub mod app;
pub mod channels;
pub mod chat;
pub mod composer;
pub mod notice;
pub mod session;

pub use app::{App, AppEvent};
pub use channels::{ChannelChange, ChannelList};
pub use chat::{ChatUpdate, ChatView};
pub use composer::Composer;
pub use notice::{Notice, NoticeLevel, Notices};
pub use session::{SessionError, SessionStore};
