//! Recipients and letters loaded from RON files into the in-memory
//! collaborators.
//!
//! ```ron
//! seed: (
//!     recipients: Some("/etc/missive/recipients.ron"),
//!     content: Some("/etc/missive/letters.ron"),
//! )
//! ```

use std::{path::PathBuf, sync::Arc};

use missive_common::internal;
use missive_delivery::{
    content::ContentItem,
    directory::{MemoryContentSource, MemoryRecipientDirectory},
    recipient::Recipient,
};
use serde::Deserialize;

use crate::config::read_ron;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedConfig {
    /// A RON list of recipients
    #[serde(default)]
    pub recipients: Option<PathBuf>,

    /// A RON list of published letters
    #[serde(default)]
    pub content: Option<PathBuf>,
}

/// The collaborators the daemon runs against.
#[derive(Debug, Clone)]
pub struct Seeded {
    pub directory: Arc<MemoryRecipientDirectory>,
    pub content: Arc<MemoryContentSource>,
}

impl SeedConfig {
    /// Load whichever files are configured; missing entries yield empty
    /// collaborators.
    ///
    /// # Errors
    ///
    /// A configured file that cannot be read or parsed.
    pub fn load(&self) -> anyhow::Result<Seeded> {
        let recipients: Vec<Recipient> = match &self.recipients {
            Some(path) => read_ron(path)?,
            None => Vec::new(),
        };
        let letters: Vec<ContentItem> = match &self.content {
            Some(path) => read_ron(path)?,
            None => Vec::new(),
        };

        internal!(
            level = INFO,
            "Seeded {} recipient(s) and {} letter(s)",
            recipients.len(),
            letters.len()
        );

        Ok(Seeded {
            directory: Arc::new(MemoryRecipientDirectory::with_recipients(recipients)),
            content: Arc::new(MemoryContentSource::with_items(letters)),
        })
    }
}

#[cfg(test)]
mod tests {
    use missive_common::RecipientId;

    use super::*;

    #[test]
    fn loads_recipient_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recipients.ron");
        std::fs::write(
            &path,
            r#"[
                (
                    id: 1,
                    email: Some("reader@example.com"),
                    status: Active,
                    verified: true,
                    frequency: Some(Weekly),
                    digest_opt_in: true,
                ),
            ]"#,
        )
        .unwrap();

        let seeded = SeedConfig {
            recipients: Some(path),
            content: None,
        }
        .load()
        .unwrap();

        assert_eq!(seeded.directory.len(), 1);
        let reader = seeded.directory.snapshot(RecipientId(1)).unwrap();
        assert_eq!(reader.email.as_deref(), Some("reader@example.com"));
        assert!(!reader.newsletter_opt_in);
    }

    #[test]
    fn unreadable_file_names_the_path() {
        let err = SeedConfig {
            recipients: None,
            content: Some(PathBuf::from("/nonexistent/letters.ron")),
        }
        .load()
        .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/letters.ron"));
    }
}
