//! Inbox Store (component C, §4.3).
//!
//! Per-agent append-only durable mailbox. Each agent gets a directory of
//! one JSON file per entry, keyed by its monotonic sequence number, plus a
//! counter file recording the next sequence to hand out (§6: "per-agent
//! directory of message records plus a metadata file with read/ack flags
//! and the monotonic sequence" — flags live on each entry record itself,
//! the metadata file carries only the counter).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::domain_types::{AgentId, MessageId, SequenceNumber};
use crate::message::{Direction, InboxEntry};
use crate::persistence::{self, PersistenceError};

/// Errors raised by the Inbox Store.
#[derive(Debug, Error)]
pub enum InboxError {
    /// No entry with the given sequence exists for the given agent.
    #[error("no inbox entry {sequence} for agent {agent_id}")]
    NotFound {
        /// Agent whose inbox was searched.
        agent_id: AgentId,
        /// Sequence number that was not found.
        sequence: SequenceNumber,
    },

    /// A read or write against the backing store failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Selects which entries [`InboxStore::list`] returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct InboxFilter {
    /// Restrict to this direction, if set.
    pub direction: Option<Direction>,
    /// Restrict to unread entries only.
    pub unread_only: bool,
}

/// Unread/total counters for one agent's inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboxCounts {
    /// Number of entries with `read == false`.
    pub unread: usize,
    /// Total number of entries.
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct SequenceCounter {
    next: u64,
}

/// Durable per-agent message log (§4.3).
pub struct InboxStore {
    data_root: PathBuf,
    agent_locks: DashMap<AgentId, Arc<Mutex<()>>>,
}

impl InboxStore {
    /// Opens (without yet touching the filesystem) an inbox store rooted at
    /// `data_root/inboxes`.
    #[must_use]
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            agent_locks: DashMap::new(),
        }
    }

    fn agent_dir(&self, agent_id: &AgentId) -> PathBuf {
        self.data_root.join("inboxes").join(agent_id.as_ref())
    }

    fn entries_dir(&self, agent_id: &AgentId) -> PathBuf {
        self.agent_dir(agent_id).join("entries")
    }

    fn counter_path(&self, agent_id: &AgentId) -> PathBuf {
        self.agent_dir(agent_id).join("meta.json")
    }

    fn entry_path(&self, agent_id: &AgentId, sequence: SequenceNumber) -> PathBuf {
        self.entries_dir(agent_id)
            .join(format!("{sequence:020}.json"))
    }

    fn lock_for(&self, agent_id: &AgentId) -> Arc<Mutex<()>> {
        self.agent_locks
            .entry(agent_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Appends a new entry to `agent_id`'s inbox and returns its assigned
    /// sequence number.
    ///
    /// Appends for the same agent are serialized so sequence assignment is
    /// monotonic and gap-free (§4.3 "monotonic sequence").
    ///
    /// # Errors
    ///
    /// Returns [`InboxError::Persistence`] if the counter or entry file
    /// cannot be read or written.
    #[instrument(skip(self), fields(%agent_id))]
    pub async fn append(
        &self,
        agent_id: &AgentId,
        message_id: MessageId,
        sender: AgentId,
        direction: Direction,
    ) -> Result<SequenceNumber, InboxError> {
        let lock = self.lock_for(agent_id);
        let _guard = lock.lock().await;

        let counter_path = self.counter_path(agent_id);
        let mut counter = persistence::read_json_lenient::<SequenceCounter>(&counter_path)
            .await?
            .unwrap_or_default();

        let sequence =
            SequenceNumber::try_new(counter.next).expect("sequence counter stays in range");
        let entry = InboxEntry {
            sequence,
            message_id,
            sender,
            direction,
            read: false,
            acknowledged: false,
            received_at: Utc::now(),
        };

        persistence::write_json_atomic(&self.entry_path(agent_id, sequence), &entry).await?;

        counter.next += 1;
        persistence::write_json_atomic(&counter_path, &counter).await?;

        Ok(sequence)
    }

    /// Lists entries for `agent_id` matching `filter`, ordered by sequence.
    ///
    /// # Errors
    ///
    /// Returns [`InboxError::Persistence`] if an entry file cannot be read.
    pub async fn list(
        &self,
        agent_id: &AgentId,
        filter: InboxFilter,
    ) -> Result<Vec<InboxEntry>, InboxError> {
        let mut entries = self.load_all(agent_id).await?;
        entries.sort_by_key(|entry| entry.sequence);

        if let Some(direction) = filter.direction {
            entries.retain(|entry| entry.direction == direction);
        }
        if filter.unread_only {
            entries.retain(|entry| !entry.read);
        }

        Ok(entries)
    }

    async fn load_all(&self, agent_id: &AgentId) -> Result<Vec<InboxEntry>, InboxError> {
        let paths =
            persistence::list_files_with_extension(&self.entries_dir(agent_id), "json").await?;

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(entry) = persistence::read_json_lenient::<InboxEntry>(&path).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Marks the entry at `sequence` as read. Idempotent: marking an
    /// already-read entry leaves it unchanged (§4.3, §8 property 5).
    ///
    /// # Errors
    ///
    /// Returns [`InboxError::NotFound`] if no such entry exists, or
    /// [`InboxError::Persistence`] on a read/write failure.
    pub async fn mark_read(
        &self,
        agent_id: &AgentId,
        sequence: SequenceNumber,
    ) -> Result<(), InboxError> {
        self.update_entry(agent_id, sequence, |entry| entry.read = true)
            .await
    }

    /// Marks the entry at `sequence` as acknowledged. Idempotent, as with
    /// [`Self::mark_read`].
    ///
    /// # Errors
    ///
    /// Returns [`InboxError::NotFound`] if no such entry exists, or
    /// [`InboxError::Persistence`] on a read/write failure.
    pub async fn acknowledge(
        &self,
        agent_id: &AgentId,
        sequence: SequenceNumber,
    ) -> Result<(), InboxError> {
        self.update_entry(agent_id, sequence, |entry| entry.acknowledged = true)
            .await
    }

    async fn update_entry(
        &self,
        agent_id: &AgentId,
        sequence: SequenceNumber,
        mutate: impl FnOnce(&mut InboxEntry),
    ) -> Result<(), InboxError> {
        let path = self.entry_path(agent_id, sequence);
        let mut entry = persistence::read_json_lenient::<InboxEntry>(&path)
            .await?
            .ok_or_else(|| InboxError::NotFound {
                agent_id: agent_id.clone(),
                sequence,
            })?;
        mutate(&mut entry);
        persistence::write_json_atomic(&path, &entry).await?;
        Ok(())
    }

    /// Returns unread/total counters for `agent_id`.
    ///
    /// # Errors
    ///
    /// Returns [`InboxError::Persistence`] if an entry file cannot be read.
    pub async fn counts(&self, agent_id: &AgentId) -> Result<InboxCounts, InboxError> {
        let entries = self.load_all(agent_id).await?;
        let unread = entries.iter().filter(|entry| !entry.read).count();
        Ok(InboxCounts {
            unread,
            total: entries.len(),
        })
    }

    /// Deletes every entry received strictly before `cutoff` (retention).
    ///
    /// # Errors
    ///
    /// Returns [`InboxError::Persistence`] if an entry file cannot be read
    /// or removed.
    pub async fn purge_before(
        &self,
        agent_id: &AgentId,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, InboxError> {
        let paths =
            persistence::list_files_with_extension(&self.entries_dir(agent_id), "json").await?;

        let mut purged = 0;
        for path in paths {
            if let Some(entry) = persistence::read_json_lenient::<InboxEntry>(&path).await?
                && entry.received_at < cutoff
            {
                remove_file(&path).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}

async fn remove_file(path: &Path) -> Result<(), PersistenceError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PersistenceError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str) -> AgentId {
        AgentId::try_new(id).unwrap()
    }

    #[tokio::test]
    async fn append_assigns_increasing_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let store = InboxStore::new(dir.path());
        let a = agent("Agent-1");

        let s1 = store
            .append(&a, MessageId::generate(), agent("Agent-2"), Direction::Inbound)
            .await
            .unwrap();
        let s2 = store
            .append(&a, MessageId::generate(), agent("Agent-2"), Direction::Inbound)
            .await
            .unwrap();

        assert!(s1 < s2);
        let entries = store.list(&a, InboxFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, s1);
        assert_eq!(entries[1].sequence, s2);
    }

    #[tokio::test]
    async fn mark_read_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = InboxStore::new(dir.path());
        let a = agent("Agent-1");

        let seq = store
            .append(&a, MessageId::generate(), agent("Agent-2"), Direction::Inbound)
            .await
            .unwrap();

        store.mark_read(&a, seq).await.unwrap();
        store.mark_read(&a, seq).await.unwrap();

        let counts = store.counts(&a).await.unwrap();
        assert_eq!(counts, InboxCounts { unread: 0, total: 1 });
    }

    #[tokio::test]
    async fn unread_only_filter_excludes_read_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = InboxStore::new(dir.path());
        let a = agent("Agent-1");

        let seq = store
            .append(&a, MessageId::generate(), agent("Agent-2"), Direction::Inbound)
            .await
            .unwrap();
        store
            .append(&a, MessageId::generate(), agent("Agent-2"), Direction::Inbound)
            .await
            .unwrap();
        store.mark_read(&a, seq).await.unwrap();

        let unread = store
            .list(
                &a,
                InboxFilter {
                    unread_only: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(unread.len(), 1);
    }
}
