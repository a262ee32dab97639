use reelchat_messaging::{EntityId, Notification};
use std::cmp::Ordering;

/// Newest-first notifications, one entry per id, capped at `limit`.
#[derive(Debug, Clone)]
pub struct NotificationFeed {
    entries: Vec<Notification>,
    limit: usize,
}

fn newest_first(a: &Notification, b: &Notification) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.as_str().cmp(b.id.as_str()))
}

impl NotificationFeed {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            limit,
        }
    }

    pub fn entries(&self) -> &[Notification] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &EntityId) -> Option<&Notification> {
        self.entries.iter().find(|entry| &entry.id == id)
    }

    fn position(&self, id: &EntityId) -> Option<usize> {
        self.entries.iter().position(|entry| &entry.id == id)
    }

    fn settle(&mut self) {
        self.entries.sort_by(newest_first);
        self.entries.dedup_by(|a, b| a.id == b.id);
        self.entries.truncate(self.limit);
    }

    pub fn replace_all(&mut self, entries: Vec<Notification>) {
        self.entries = entries;
        self.settle();
    }

    /// Add a new notification, or refresh the held copy. Returns false for an exact
    /// redelivery.
    pub fn insert(&mut self, notification: Notification) -> bool {
        match self.position(&notification.id) {
            Some(index) if self.entries[index] == notification => false,
            Some(index) => {
                self.entries[index] = notification;
                self.settle();
                true
            }
            None => {
                self.entries.push(notification);
                self.settle();
                true
            }
        }
    }

    /// Apply a change to a held notification; unknown ids are ignored so a late update
    /// cannot resurrect something deleted here.
    pub fn update(&mut self, notification: Notification) -> bool {
        match self.position(&notification.id) {
            Some(index) => {
                self.entries[index] = notification;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<Notification> {
        let index = self.position(id)?;
        Some(self.entries.remove(index))
    }

    /// Sets the read flag and returns the previous one.
    pub fn set_read(&mut self, id: &EntityId, read: bool) -> Option<bool> {
        let index = self.position(id)?;
        Some(std::mem::replace(&mut self.entries[index].read, read))
    }

    /// Marks everything read and returns the ids that were unread.
    pub fn mark_all_read(&mut self) -> Vec<EntityId> {
        self.entries
            .iter_mut()
            .filter(|entry| !entry.read)
            .map(|entry| {
                entry.read = true;
                entry.id.clone()
            })
            .collect()
    }

    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.read).count()
    }
}
