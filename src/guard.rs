use crate::models::{EntityId, EntityKind};
use std::collections::BTreeMap;

/// What a request is about. Only the newest request per subject may touch state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Subject {
    InitialData,
    Images(String),
    Comments(EntityId),
    Reactions(EntityId),
    Reaction(EntityId),
    Comment(EntityId),
    Record(EntityKind, EntityId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

#[derive(Debug, Clone, Copy)]
struct Latest {
    token: RequestToken,
    settled: bool,
}

/// Tracks the most recently issued request per subject.
///
/// Superseded requests are not cancelled; their answers are dropped when they
/// arrive because their token is no longer current.
#[derive(Debug)]
pub struct RequestGuard<K = Subject> {
    next: u64,
    latest: BTreeMap<K, Latest>,
}

impl<K> Default for RequestGuard<K> {
    fn default() -> Self {
        Self {
            next: 0,
            latest: BTreeMap::new(),
        }
    }
}

impl<K: Ord> RequestGuard<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self, subject: K) -> RequestToken {
        self.next += 1;
        let token = RequestToken(self.next);
        self.latest.insert(
            subject,
            Latest {
                token,
                settled: false,
            },
        );
        token
    }

    pub fn is_current(&self, subject: &K, token: RequestToken) -> bool {
        self.latest
            .get(subject)
            .is_some_and(|latest| latest.token == token)
    }

    /// Records that the answer for `token` arrived. Returns whether it is still
    /// the current request and may therefore be applied.
    pub fn settle(&mut self, subject: &K, token: RequestToken) -> bool {
        match self.latest.get_mut(subject) {
            Some(latest) if latest.token == token => {
                latest.settled = true;
                true
            }
            _ => false,
        }
    }

    /// Whether the newest request for the subject is still waiting for its answer.
    pub fn in_flight(&self, subject: &K) -> bool {
        self.latest
            .get(subject)
            .is_some_and(|latest| !latest.settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_request_supersedes_older_one() {
        let mut guard = RequestGuard::new();
        let photo = Subject::Comments(EntityId::from("IMG_0001.jpg"));
        let first = guard.issue(photo.clone());
        let second = guard.issue(photo.clone());
        assert!(first < second);
        assert!(!guard.is_current(&photo, first));
        assert!(guard.is_current(&photo, second));

        assert!(guard.settle(&photo, second));
        assert!(!guard.settle(&photo, first));
    }

    #[test]
    fn subjects_are_tracked_independently() {
        let mut guard = RequestGuard::new();
        let a = Subject::Reaction(EntityId::from("c-1"));
        let b = Subject::Reaction(EntityId::from("c-2"));
        let token_a = guard.issue(a.clone());
        let token_b = guard.issue(b.clone());
        assert!(guard.is_current(&a, token_a));
        assert!(guard.is_current(&b, token_b));
        assert!(!guard.is_current(&a, token_b));
        assert!(!guard.is_current(&Subject::InitialData, token_a));
    }

    #[test]
    fn in_flight_clears_once_current_answer_settles() {
        let mut guard: RequestGuard<&str> = RequestGuard::new();
        assert!(!guard.in_flight(&"sync"));
        let first = guard.issue("sync");
        let second = guard.issue("sync");
        assert!(guard.in_flight(&"sync"));
        guard.settle(&"sync", first);
        assert!(guard.in_flight(&"sync"));
        guard.settle(&"sync", second);
        assert!(!guard.in_flight(&"sync"));
    }
}
