//! Outstanding prompts for a single user.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{PromptError, PromptResult};
use crate::maxid::PromptId;
use crate::prompts::models::{Prompt, PromptConstraints, PromptMetadata};
use crate::prompts::timer::ExpirationTimer;

/// Dense list of prompts plus an index from ID to list position.
///
/// Removal swaps the last prompt into the vacated slot, so list order is
/// not stable.
pub(crate) struct UserPromptDb {
    ids: HashMap<PromptId, usize>,
    prompts: Vec<Prompt>,
    expiration_timer: ExpirationTimer,
}

impl UserPromptDb {
    pub(crate) fn new(expiration_timer: ExpirationTimer) -> Self {
        Self {
            ids: HashMap::new(),
            prompts: Vec::new(),
            expiration_timer,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.prompts.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    pub(crate) fn prompts(&self) -> &[Prompt] {
        &self.prompts
    }

    pub(crate) fn get(&self, id: PromptId) -> PromptResult<&Prompt> {
        let index = *self.ids.get(&id).ok_or(PromptError::NotFound)?;
        Ok(&self.prompts[index])
    }

    pub(crate) fn get_mut(&mut self, id: PromptId) -> PromptResult<&mut Prompt> {
        let index = *self.ids.get(&id).ok_or(PromptError::NotFound)?;
        Ok(&mut self.prompts[index])
    }

    pub(crate) fn find_matching_mut(
        &mut self,
        metadata: &PromptMetadata,
        constraints: &PromptConstraints,
    ) -> Option<&mut Prompt> {
        self.prompts
            .iter_mut()
            .find(|prompt| prompt.matches(metadata, constraints))
    }

    pub(crate) fn add(&mut self, prompt: Prompt) {
        self.ids.insert(prompt.id, self.prompts.len());
        self.prompts.push(prompt);
    }

    pub(crate) fn remove(&mut self, id: PromptId) -> PromptResult<Prompt> {
        let index = self.ids.remove(&id).ok_or(PromptError::NotFound)?;
        let prompt = self.prompts.swap_remove(index);
        // Nothing moved when the removed prompt was the last one.
        if let Some(moved) = self.prompts.get(index) {
            self.ids.insert(moved.id, index);
        }
        Ok(prompt)
    }

    /// Remove and return every prompt.
    pub(crate) fn take_all(&mut self) -> Vec<Prompt> {
        self.ids.clear();
        std::mem::take(&mut self.prompts)
    }

    pub(crate) fn timer(&self) -> &ExpirationTimer {
        &self.expiration_timer
    }

    /// Extend expiration after a client retrieved this user's prompts.
    /// Returns true if the timer had been active.
    pub(crate) fn activity_reset_expiration(&self, activity_timeout: Duration) -> bool {
        self.expiration_timer.reset(activity_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReplyError;
    use crate::listener::ListenerRequest;
    use crate::permissions::ReplyPermission;
    use std::sync::Arc;
    use tokio::runtime::Handle;

    struct Noop;

    impl ListenerRequest for Noop {
        fn reply(&self, _: &ReplyPermission) -> Result<(), ReplyError> {
            Ok(())
        }
    }

    fn prompt(id: u64) -> Prompt {
        let metadata = PromptMetadata::new(1000, "firefox", "home");
        let constraints = PromptConstraints::new(
            format!("/home/test/{id}"),
            vec!["read".to_string()],
            vec!["read".to_string()],
            vec!["read".to_string(), "write".to_string(), "execute".to_string()],
        );
        Prompt::new(PromptId(id), &metadata, constraints, Arc::new(Noop))
    }

    fn db() -> UserPromptDb {
        let timer = ExpirationTimer::start(&Handle::current(), Duration::from_secs(3600), || {});
        UserPromptDb::new(timer)
    }

    fn assert_index_consistent(db: &UserPromptDb) {
        assert_eq!(db.ids.len(), db.prompts.len());
        for (index, prompt) in db.prompts.iter().enumerate() {
            assert_eq!(db.ids.get(&prompt.id), Some(&index));
        }
    }

    #[tokio::test]
    async fn test_add_get_remove() {
        let mut db = db();
        for id in 1..=4 {
            db.add(prompt(id));
        }
        assert_eq!(db.len(), 4);
        assert_eq!(db.get(PromptId(3)).unwrap().id, PromptId(3));

        let removed = db.remove(PromptId(2)).unwrap();
        assert_eq!(removed.id, PromptId(2));
        assert_index_consistent(&db);
        // The last prompt took the removed one's slot.
        assert_eq!(db.prompts()[1].id, PromptId(4));

        assert!(matches!(db.get(PromptId(2)), Err(PromptError::NotFound)));
        assert!(matches!(db.remove(PromptId(2)), Err(PromptError::NotFound)));
    }

    #[tokio::test]
    async fn test_remove_last_element() {
        let mut db = db();
        db.add(prompt(1));
        db.add(prompt(2));

        db.remove(PromptId(2)).unwrap();
        assert_index_consistent(&db);
        assert!(!db.ids.contains_key(&PromptId(2)));

        db.remove(PromptId(1)).unwrap();
        assert!(db.is_empty());
        assert!(db.ids.is_empty());
    }

    #[tokio::test]
    async fn test_take_all() {
        let mut db = db();
        db.add(prompt(1));
        db.add(prompt(2));
        let taken = db.take_all();
        assert_eq!(taken.len(), 2);
        assert!(db.is_empty());
        assert_index_consistent(&db);
        assert!(matches!(db.get(PromptId(1)), Err(PromptError::NotFound)));
    }
}
