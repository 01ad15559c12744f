use crate::snapshot::ContentSnapshot;
use crate::store::{SnapshotStore, ThreadFilter};
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// In-process store for tests. Built with the `test-util` feature.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    inner: RwLock<StoreData>,
    unavailable: AtomicBool,
}

#[derive(Default)]
struct StoreData {
    threads: HashMap<String, ContentSnapshot>,
    follows: HashMap<String, HashSet<String>>,
    likes: HashSet<(String, String)>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn insert(&self, snapshot: ContentSnapshot) {
        self.write().threads.insert(snapshot.id.clone(), snapshot);
    }

    pub fn remove(&self, id: &str) -> Option<ContentSnapshot> {
        let mut data = self.write();
        data.likes.retain(|(_, thread)| thread != id);
        data.threads.remove(id)
    }

    pub fn follow(&self, follower_id: &str, followee_id: &str) {
        self.write()
            .follows
            .entry(follower_id.to_string())
            .or_default()
            .insert(followee_id.to_string());
    }

    pub fn unfollow(&self, follower_id: &str, followee_id: &str) {
        if let Some(set) = self.write().follows.get_mut(follower_id) {
            set.remove(followee_id);
        }
    }

    pub fn like(&self, user_id: &str, thread_id: &str) {
        let mut data = self.write();
        if data.likes.insert((user_id.to_string(), thread_id.to_string())) {
            if let Some(thread) = data.threads.get_mut(thread_id) {
                thread.stats.likes += 1;
            }
        }
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, StoreData>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".into()));
        }
        Ok(self.inner.read().unwrap_or_else(|p| p.into_inner()))
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreData> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    fn ordered<'a>(threads: impl Iterator<Item = &'a ContentSnapshot>) -> Vec<ContentSnapshot> {
        let mut out: Vec<ContentSnapshot> = threads.cloned().collect();
        out.sort_by(|a, b| a.recency_cmp(b));
        out
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn recent(&self, offset: usize, limit: usize) -> StoreResult<Vec<ContentSnapshot>> {
        let data = self.read()?;
        Ok(Self::ordered(data.threads.values())
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn recent_by_authors(
        &self,
        author_ids: &[String],
        cursor: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<ContentSnapshot>> {
        let data = self.read()?;
        let ordered = Self::ordered(
            data.threads
                .values()
                .filter(|t| author_ids.contains(&t.author.id)),
        );

        let start = match cursor {
            // Cursor row excluded, like cursor + skip 1
            Some(cursor_id) => match data.threads.get(cursor_id) {
                Some(anchor) => ordered
                    .iter()
                    .position(|t| t.recency_cmp(anchor).is_gt())
                    .unwrap_or(ordered.len()),
                None => ordered.len(),
            },
            None => 0,
        };

        Ok(ordered.into_iter().skip(start).take(limit).collect())
    }

    async fn fetch_by_ids(&self, ids: &[String]) -> StoreResult<Vec<ContentSnapshot>> {
        let data = self.read()?;
        Ok(ids
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter_map(|id| data.threads.get(id).cloned())
            .collect())
    }

    async fn fetch_one(&self, id: &str) -> StoreResult<Option<ContentSnapshot>> {
        Ok(self.read()?.threads.get(id).cloned())
    }

    async fn count(&self, filter: &ThreadFilter) -> StoreResult<u64> {
        let data = self.read()?;
        let count = match &filter.author_ids {
            Some(authors) => data
                .threads
                .values()
                .filter(|t| authors.contains(&t.author.id))
                .count(),
            None => data.threads.len(),
        };
        Ok(count as u64)
    }

    async fn following_ids(&self, actor_id: &str) -> StoreResult<Vec<String>> {
        let data = self.read()?;
        let mut ids: Vec<String> = data
            .follows
            .get(actor_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }

    async fn follower_ids(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let data = self.read()?;
        let mut ids: Vec<String> = data
            .follows
            .iter()
            .filter(|(_, followees)| followees.contains(user_id))
            .map(|(follower, _)| follower.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn liked_ids(&self, actor_id: &str, thread_ids: &[String]) -> StoreResult<HashSet<String>> {
        let data = self.read()?;
        Ok(thread_ids
            .iter()
            .filter(|id| data.likes.contains(&(actor_id.to_string(), (*id).clone())))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{AuthorSummary, PostType};
    use chrono::{TimeZone, Utc};

    fn thread(id: &str, author: &str, secs: i64) -> ContentSnapshot {
        ContentSnapshot::new(
            id,
            "hello",
            PostType::Normal,
            None,
            Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            AuthorSummary {
                id: author.into(),
                username: author.into(),
                avatar_url: None,
            },
        )
    }

    #[tokio::test]
    async fn test_recent_orders_by_time_then_id() {
        let store = InMemorySnapshotStore::new();
        store.insert(thread("a", "u1", 1));
        store.insert(thread("b", "u1", 1));
        store.insert(thread("c", "u1", 2));

        let ids: Vec<String> = store.recent(0, 10).await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        let ids: Vec<String> = store.recent(1, 1).await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn test_recent_by_authors_skips_cursor_row() {
        let store = InMemorySnapshotStore::new();
        store.insert(thread("t1", "u1", 1));
        store.insert(thread("t2", "u2", 2));
        store.insert(thread("t3", "u1", 3));
        store.insert(thread("t4", "u3", 4));

        let authors = vec!["u1".to_string(), "u2".to_string()];
        let page: Vec<String> = store
            .recent_by_authors(&authors, Some("t3"), 10)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(page, vec!["t2", "t1"]);
    }

    #[tokio::test]
    async fn test_count_and_likes() {
        let store = InMemorySnapshotStore::new();
        store.insert(thread("t1", "u1", 1));
        store.insert(thread("t2", "u2", 2));
        store.like("u9", "t2");

        assert_eq!(store.count(&ThreadFilter::all()).await.unwrap(), 2);
        assert_eq!(
            store.count(&ThreadFilter::by_authors(vec!["u1".into()])).await.unwrap(),
            1
        );
        let liked = store
            .liked_ids("u9", &["t1".to_string(), "t2".to_string()])
            .await
            .unwrap();
        assert!(liked.contains("t2") && !liked.contains("t1"));
        assert_eq!(store.fetch_one("t2").await.unwrap().unwrap().stats.likes, 1);
    }

    #[tokio::test]
    async fn test_follow_edges_both_directions() {
        let store = InMemorySnapshotStore::new();
        store.follow("a", "b");
        store.follow("c", "b");
        store.follow("a", "c");
        store.unfollow("c", "b");

        assert_eq!(store.following_ids("a").await.unwrap(), vec!["b", "c"]);
        assert_eq!(store.follower_ids("b").await.unwrap(), vec!["a"]);
        assert!(store.follower_ids("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = InMemorySnapshotStore::new();
        store.set_available(false);
        assert!(matches!(store.recent(0, 1).await, Err(StoreError::Unavailable(_))));
    }
}
