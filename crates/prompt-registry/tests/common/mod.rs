//! Test utilities and common setup.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use prompt_registry::{
    BuiltinVocabulary, IdAllocator, ListenerRequest, MaxIdFile, PermissionVocabulary,
    PromptError, PromptId, PromptNotifier, PromptRegistry, PromptResult, RegistryConfig,
    ReplyError, ReplyPermission,
};
use tempfile::TempDir;

/// Listener request which records every reply it accepts.
#[derive(Default)]
pub struct RecordingListener {
    replies: Mutex<Vec<ReplyPermission>>,
    reject: AtomicBool,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn replies(&self) -> Vec<ReplyPermission> {
        self.replies.lock().unwrap().clone()
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }
}

impl ListenerRequest for RecordingListener {
    fn reply(&self, allowed: &ReplyPermission) -> Result<(), ReplyError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(ReplyError("unexpected permission type".to_string()));
        }
        self.replies.lock().unwrap().push(*allowed);
        Ok(())
    }
}

/// A recorded notice: user, prompt ID, and the `resolved` value if any.
pub type Notice = (u32, PromptId, Option<String>);

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.notices.lock().unwrap().clear();
    }
}

impl PromptNotifier for RecordingNotifier {
    fn notify_prompt(
        &self,
        user: u32,
        id: PromptId,
        data: Option<&HashMap<String, String>>,
    ) -> anyhow::Result<()> {
        let resolved = data.and_then(|d| d.get("resolved").cloned());
        self.notices.lock().unwrap().push((user, id, resolved));
        Ok(())
    }
}

/// Allocator whose storage cannot be closed.
#[derive(Default)]
pub struct StuckAllocator {
    next: u64,
}

impl IdAllocator for StuckAllocator {
    fn next_id(&mut self) -> PromptResult<PromptId> {
        self.next += 1;
        Ok(PromptId(self.next))
    }

    fn close(&mut self) -> PromptResult<()> {
        Err(PromptError::Storage {
            context: "cannot sync max ID file".to_string(),
            source: io::Error::other("disk on fire"),
        })
    }

    fn is_closed(&self) -> bool {
        false
    }
}

pub struct TestRegistry {
    pub registry: PromptRegistry,
    pub notifier: Arc<RecordingNotifier>,
    pub dir: TempDir,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut RegistryConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = RegistryConfig {
            max_id_path: dir.path().join("max-id"),
            ..RegistryConfig::default()
        };
        configure(&mut config);
        let ids = MaxIdFile::open(&config.max_id_path).unwrap();
        Self::build(config, Box::new(ids), dir)
    }

    pub fn with_allocator(ids: Box<dyn IdAllocator>) -> Self {
        let dir = TempDir::new().unwrap();
        Self::build(RegistryConfig::default(), ids, dir)
    }

    fn build(config: RegistryConfig, ids: Box<dyn IdAllocator>, dir: TempDir) -> Self {
        let notifier = Arc::new(RecordingNotifier::default());
        let registry =
            PromptRegistry::new(config, ids, Arc::new(BuiltinVocabulary), notifier.clone())
                .unwrap();
        Self {
            registry,
            notifier,
            dir,
        }
    }
}

pub fn perms(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Concrete reply the built-in vocabulary produces for `home` permissions.
pub fn home_reply(names: &[&str]) -> ReplyPermission {
    BuiltinVocabulary
        .abstract_to_concrete("home", &perms(names))
        .unwrap()
}
