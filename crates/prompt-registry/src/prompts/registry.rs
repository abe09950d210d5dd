//! Registry of outstanding prompts for all users.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use log::{debug, info, warn};
use tokio::runtime::Handle;

use crate::config::RegistryConfig;
use crate::error::{PromptError, PromptResult};
use crate::listener::ListenerRequest;
use crate::maxid::{IdAllocator, PromptId};
use crate::notice::{PromptNotifier, Resolution};
use crate::permissions::{Outcome, PermissionVocabulary};
use crate::prompts::models::{Prompt, PromptConstraints, PromptMetadata, reply_permission};
use crate::prompts::timer::ExpirationTimer;
use crate::prompts::user_db::UserPromptDb;
use crate::rules::RuleConstraints;

struct RegistryState {
    /// Closed once the registry has been shut down.
    ids: Box<dyn IdAllocator>,
    per_user: HashMap<u32, UserPromptDb>,
}

impl RegistryState {
    fn is_closed(&self) -> bool {
        self.ids.is_closed()
    }

    fn ensure_open(&self) -> PromptResult<()> {
        if self.is_closed() {
            return Err(PromptError::Closed);
        }
        Ok(())
    }
}

struct Inner {
    state: RwLock<RegistryState>,
    vocabulary: Arc<dyn PermissionVocabulary>,
    notifier: Arc<dyn PromptNotifier>,
    config: RegistryConfig,
    runtime: Handle,
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, user: u32, id: PromptId, resolution: Option<Resolution>) {
        let data = resolution.map(Resolution::notice_data);
        if let Err(e) = self.notifier.notify_prompt(user, id, data.as_ref()) {
            warn!("cannot record notice for prompt {id} of user {user}: {e:#}");
        }
    }
}

/// Stores outstanding prompts in memory and hands out persistent IDs.
///
/// All state sits behind one read/write lock. Notices are recorded while the
/// lock is held, so the notifier must not block and must not call back into
/// the registry.
#[derive(Clone)]
pub struct PromptRegistry {
    inner: Arc<Inner>,
}

impl PromptRegistry {
    /// Create a registry. Must be called from within a tokio runtime, which
    /// drives the per-user expiration timers.
    pub fn new(
        config: RegistryConfig,
        ids: Box<dyn IdAllocator>,
        vocabulary: Arc<dyn PermissionVocabulary>,
        notifier: Arc<dyn PromptNotifier>,
    ) -> PromptResult<Self> {
        let runtime = Handle::try_current().map_err(|_| PromptError::NoRuntime)?;
        Ok(Self {
            inner: Arc::new(Inner {
                state: RwLock::new(RegistryState {
                    ids,
                    per_user: HashMap::new(),
                }),
                vocabulary,
                notifier,
                config,
                runtime,
            }),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().is_closed()
    }

    /// Merge the request into an identical outstanding prompt, or add a new
    /// prompt for it.
    ///
    /// Returns the prompt and whether the request was merged. On error the
    /// registry is unchanged. Permissions must be given in the interface's
    /// canonical order.
    pub fn add_or_merge(
        &self,
        metadata: &PromptMetadata,
        path: &str,
        requested_permissions: Vec<String>,
        remaining_permissions: Vec<String>,
        listener_req: Arc<dyn ListenerRequest>,
    ) -> PromptResult<(Prompt, bool)> {
        let available = self
            .inner
            .vocabulary
            .available_permissions(&metadata.interface)?;

        let mut guard = self.inner.write();
        let state = &mut *guard;
        state.ensure_open()?;

        let user = metadata.user;
        let constraints = PromptConstraints::new(
            path.to_string(),
            requested_permissions,
            remaining_permissions,
            available,
        );

        if let Some(user_db) = state.per_user.get_mut(&user) {
            if let Some(prompt) = user_db.find_matching_mut(metadata, &constraints) {
                prompt.merge(listener_req);
                let merged = prompt.clone();
                // Re-notify so a client which dropped this prompt after a
                // malformed reply gets another chance to answer it.
                self.inner.notify(user, merged.id, None);
                return Ok((merged, true));
            }

            if user_db.len() >= self.inner.config.max_prompts_per_user {
                warn!("too many outstanding prompts for user {user}; auto-denying new one");
                let allowed = reply_permission(
                    self.inner.vocabulary.as_ref(),
                    &metadata.interface,
                    &constraints,
                    Outcome::Deny,
                );
                if let Err(e) = listener_req.reply(&allowed) {
                    debug!("cannot auto-deny request for user {user}: {e}");
                }
                return Err(PromptError::TooManyPrompts);
            }
        }

        let id = state.ids.next_id()?;
        let user_db = state
            .per_user
            .entry(user)
            .or_insert_with(|| UserPromptDb::new(self.start_expiration_timer(user)));

        let prompt = Prompt::new(id, metadata, constraints, listener_req);
        user_db.add(prompt.clone());
        debug!(
            "added prompt {id} for user {user}: {} wants {:?} on {}",
            metadata.snap,
            prompt.constraints.original_permissions(),
            path
        );
        self.inner.notify(user, id, None);
        Ok((prompt, false))
    }

    /// All outstanding prompts for the user.
    ///
    /// If `client_activity` is set and the user has prompts, their expiration
    /// is extended to the activity timeout.
    pub fn prompts(&self, user: u32, client_activity: bool) -> PromptResult<Vec<Prompt>> {
        let state = self.inner.read();
        state.ensure_open()?;
        let Some(user_db) = state.per_user.get(&user) else {
            return Ok(Vec::new());
        };
        if user_db.is_empty() {
            return Ok(Vec::new());
        }
        if client_activity {
            user_db.activity_reset_expiration(self.inner.config.activity_timeout());
        }
        Ok(user_db.prompts().to_vec())
    }

    /// The prompt with the given ID for the user.
    ///
    /// If `client_activity` is set, the user's expiration is extended to the
    /// activity timeout even when the ID is unknown.
    pub fn prompt_with_id(
        &self,
        user: u32,
        id: PromptId,
        client_activity: bool,
    ) -> PromptResult<Prompt> {
        let state = self.inner.read();
        let user_db = self.user_db_with_activity(&state, user, client_activity)?;
        user_db.get(id).cloned()
    }

    fn user_db_with_activity<'a>(
        &self,
        state: &'a RegistryState,
        user: u32,
        client_activity: bool,
    ) -> PromptResult<&'a UserPromptDb> {
        state.ensure_open()?;
        let user_db = state.per_user.get(&user).ok_or(PromptError::NotFound)?;
        if client_activity {
            user_db.activity_reset_expiration(self.inner.config.activity_timeout());
        }
        Ok(user_db)
    }

    /// Resolve the prompt with the given outcome, replying to every merged
    /// request, and return the prompt's former contents.
    ///
    /// A malformed reply leaves the prompt in place so the client may retry.
    pub fn reply(
        &self,
        user: u32,
        id: PromptId,
        outcome: Outcome,
        client_activity: bool,
    ) -> PromptResult<Prompt> {
        let mut guard = self.inner.write();
        let state = &mut *guard;
        self.user_db_with_activity(state, user, client_activity)?
            .get(id)?
            .send_reply(self.inner.vocabulary.as_ref(), outcome)?;

        let user_db = state.per_user.get_mut(&user).ok_or(PromptError::NotFound)?;
        let prompt = user_db.remove(id)?;
        info!("prompt {id} for user {user} replied: {outcome}");
        self.inner.notify(user, id, Some(Resolution::Replied));
        Ok(prompt)
    }

    /// Apply a newly added rule to the user's outstanding prompts.
    ///
    /// Prompts with the same snap and interface whose path matches the rule
    /// have the rule's permissions subtracted. A prompt is resolved once no
    /// permissions remain, or immediately when a deny rule overlaps any of
    /// its remaining permissions. Returns the IDs of resolved prompts.
    pub fn handle_new_rule(
        &self,
        metadata: &PromptMetadata,
        rule: &RuleConstraints,
        outcome: Outcome,
    ) -> PromptResult<Vec<PromptId>> {
        let mut state = self.inner.write();
        state.ensure_open()?;

        let user = metadata.user;
        let Some(user_db) = state.per_user.get_mut(&user) else {
            return Ok(Vec::new());
        };

        // Match every candidate first so a failing pattern changes nothing.
        let mut matched = Vec::new();
        for prompt in user_db.prompts() {
            if prompt.snap != metadata.snap || prompt.interface != metadata.interface {
                continue;
            }
            if rule.matches(prompt.constraints.path())? {
                matched.push(prompt.id);
            }
        }

        let mut satisfied = Vec::new();
        for id in matched {
            let prompt = user_db.get_mut(id)?;
            // Computed before subtracting, in case the rule denies and the
            // reply must allow only what was granted earlier.
            let allowed = reply_permission(
                self.inner.vocabulary.as_ref(),
                &metadata.interface,
                &prompt.constraints,
                outcome,
            );
            if !prompt.constraints.subtract_permissions(&rule.permissions) {
                continue;
            }
            if !prompt.constraints.remaining_permissions().is_empty() && outcome.as_bool() {
                self.inner.notify(user, id, None);
                continue;
            }

            let rejected = prompt.reply_to_all(&allowed);
            if rejected > 0 {
                warn!(
                    "{rejected} of {} requests for prompt {id} rejected the reply to rule {}",
                    prompt.listener_count(),
                    rule.path_pattern.as_str()
                );
            }
            user_db.remove(id)?;
            satisfied.push(id);
            self.inner.notify(user, id, Some(Resolution::Satisfied));
        }
        Ok(satisfied)
    }

    /// Close the registry, recording a cancellation notice for every
    /// outstanding prompt.
    ///
    /// No replies are sent: the listener denies its outstanding requests when
    /// it shuts down. If the ID storage cannot be closed the registry stays
    /// open.
    pub fn close(&self) -> PromptResult<()> {
        let mut guard = self.inner.write();
        let state = &mut *guard;
        state.ensure_open()?;

        state.ids.close().map_err(|e| match e {
            PromptError::Storage { context, source } => PromptError::Storage {
                context: format!("cannot close max ID file: {context}"),
                source,
            },
            other => other,
        })?;

        for (user, user_db) in state.per_user.drain() {
            for prompt in user_db.prompts() {
                self.inner.notify(user, prompt.id, Some(Resolution::Cancelled));
            }
        }
        Ok(())
    }

    fn start_expiration_timer(&self, user: u32) -> ExpirationTimer {
        let weak = Arc::downgrade(&self.inner);
        ExpirationTimer::start(
            &self.inner.runtime,
            self.inner.config.initial_timeout(),
            move || handle_expiration(&weak, user),
        )
    }
}

/// Expiration timer callback for one user's prompts.
fn handle_expiration(weak: &Weak<Inner>, user: u32) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let expired = {
        let mut state = inner.write();
        // A closed registry is being torn down; nothing to expire.
        if state.is_closed() {
            return;
        }
        let Some(user_db) = state.per_user.get_mut(&user) else {
            return;
        };
        // Re-arm while holding the lock so a concurrent activity timeout is
        // never overwritten. If the timer was already active again, activity
        // happened between firing and acquiring the lock: keep the prompts.
        if user_db.timer().reset(inner.config.initial_timeout()) {
            user_db.activity_reset_expiration(inner.config.activity_timeout());
            return;
        }
        user_db.take_all()
    };

    if !expired.is_empty() {
        info!("expired {} prompts for user {user}", expired.len());
    }
    for prompt in expired {
        inner.notify(user, prompt.id, Some(Resolution::Expired));
        let denied = reply_permission(
            inner.vocabulary.as_ref(),
            &prompt.interface,
            &prompt.constraints,
            Outcome::Deny,
        );
        let rejected = prompt.reply_to_all(&denied);
        if rejected > 0 {
            debug!(
                "{rejected} of {} requests for expired prompt {} rejected the denial",
                prompt.listener_count(),
                prompt.id
            );
        }
    }
}
