use tracing::debug;

use backchannel_types::models::{Attachment, MAX_ATTACHMENT_BYTES};

use crate::notice::Notices;

/// Draft message: pending text and at most one selected file.
#[derive(Debug, Default)]
pub struct Composer {
    text: String,
    attachment: Option<Attachment>,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    /// Select a file, keeping the previous selection when it is too large.
    pub fn select_file(&mut self, attachment: Attachment, notices: &mut Notices) -> bool {
        if attachment.exceeds_limit() {
            debug!(
                "Rejected '{}': {} bytes exceeds {}",
                attachment.name,
                attachment.size(),
                MAX_ATTACHMENT_BYTES
            );
            notices.error("File size exceeds 5MB limit");
            return false;
        }
        notices.success(format!("File \"{}\" selected", attachment.name));
        self.attachment = Some(attachment);
        true
    }

    pub fn clear_file(&mut self) {
        self.attachment = None;
    }

    pub fn is_ready(&self) -> bool {
        !self.text.trim().is_empty() || self.attachment.is_some()
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.attachment = None;
    }
}
