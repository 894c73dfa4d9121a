use std::sync::Arc;

use async_trait::async_trait;
use deskmate_common::{Message, Nudge, Result};
use deskmate_db::NudgeStore;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::prompt::nudge_notice;

/// Read-only source of a user's unread notifications.
#[async_trait]
pub trait NotificationFeed: Send + Sync {
    async fn unread(&self, user_id: &str, limit: usize) -> Result<Vec<Nudge>>;
}

pub struct StoreFeed {
    store: Arc<Mutex<NudgeStore>>,
}

impl StoreFeed {
    pub fn new(store: Arc<Mutex<NudgeStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NotificationFeed for StoreFeed {
    async fn unread(&self, user_id: &str, limit: usize) -> Result<Vec<Nudge>> {
        self.store.lock().await.unread(user_id, Some(limit))
    }
}

/// Build the pinned notice for this turn. A failing feed only costs the notice.
pub async fn fetch_notice(feed: &dyn NotificationFeed, user_id: &str, limit: usize) -> Option<Message> {
    if limit == 0 {
        return None;
    }
    match feed.unread(user_id, limit).await {
        Ok(nudges) => {
            if !nudges.is_empty() {
                debug!("injecting {} unread nudge(s) for {}", nudges.len(), user_id);
            }
            nudge_notice(&nudges)
        }
        Err(e) => {
            warn!("failed to load nudges for {}, continuing without: {}", user_id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskmate_common::Error;
    use serde_json::json;

    struct BrokenFeed;

    #[async_trait]
    impl NotificationFeed for BrokenFeed {
        async fn unread(&self, _user_id: &str, _limit: usize) -> Result<Vec<Nudge>> {
            Err(Error::Database("disk on fire".into()))
        }
    }

    #[tokio::test]
    async fn notice_respects_limit() {
        let store = NudgeStore::in_memory().unwrap();
        for i in 0..5 {
            store
                .create("u-1", "info", &format!("Item {i}"), "details", json!({}))
                .unwrap();
        }
        let feed = StoreFeed::new(Arc::new(Mutex::new(store)));

        let notice = fetch_notice(&feed, "u-1", 3).await.unwrap();
        let text = notice.text().unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("- ")).count(), 3);

        assert!(fetch_notice(&feed, "u-2", 3).await.is_none());
        assert!(fetch_notice(&feed, "u-1", 0).await.is_none());
    }

    #[tokio::test]
    async fn feed_errors_are_swallowed() {
        assert!(fetch_notice(&BrokenFeed, "u-1", 3).await.is_none());
    }
}
