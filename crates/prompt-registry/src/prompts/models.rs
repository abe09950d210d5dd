//! Prompt data models.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::error::ReplyError;
use crate::listener::ListenerRequest;
use crate::maxid::PromptId;
use crate::permissions::{Outcome, PermissionVocabulary, ReplyPermission};

/// Who is asking, and through which interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMetadata {
    /// UID of the user to be prompted.
    pub user: u32,
    /// Snap whose process triggered the request.
    pub snap: String,
    /// Interface mediating the request.
    pub interface: String,
}

impl PromptMetadata {
    pub fn new(user: u32, snap: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            user,
            snap: snap.into(),
            interface: interface.into(),
        }
    }
}

/// Requested path and permission bookkeeping for one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptConstraints {
    path: String,
    /// Permissions still awaiting a decision; always a subset of `original`.
    remaining: Vec<String>,
    /// Every permission the interface supports, for clients that want to
    /// reply with a broader grant than was requested.
    available: Vec<String>,
    /// Permissions of the original request, kept so that a final reply can
    /// still allow whatever rules granted in the meantime.
    original: Vec<String>,
}

impl PromptConstraints {
    pub(crate) fn new(
        path: String,
        original: Vec<String>,
        remaining: Vec<String>,
        available: Vec<String>,
    ) -> Self {
        Self {
            path,
            remaining,
            available,
            original,
        }
    }

    /// Two constraints are equal when they were created for the same path
    /// with the same originally requested permissions, in the same order.
    pub fn equals(&self, other: &PromptConstraints) -> bool {
        self.path == other.path && self.original == other.original
    }

    /// Remove the given permissions from the remaining set, returning
    /// whether anything was removed.
    pub fn subtract_permissions(&mut self, permissions: &[String]) -> bool {
        let before = self.remaining.len();
        self.remaining.retain(|perm| !permissions.contains(perm));
        self.remaining.len() != before
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn remaining_permissions(&self) -> &[String] {
        &self.remaining
    }

    pub fn available_permissions(&self) -> &[String] {
        &self.available
    }

    pub fn original_permissions(&self) -> &[String] {
        &self.original
    }

    /// Abstract permissions to allow in a reply with the given outcome.
    ///
    /// Allow grants everything originally requested. Deny refuses only what
    /// is still remaining, so permissions already granted by rules stay
    /// granted.
    pub fn allowed_permissions(&self, outcome: Outcome) -> Vec<String> {
        match outcome {
            Outcome::Allow => self.original.clone(),
            Outcome::Deny => self
                .original
                .iter()
                .filter(|perm| !self.remaining.contains(*perm))
                .cloned()
                .collect(),
        }
    }
}

/// Build the concrete reply for the given constraints and outcome.
///
/// A conversion failure means the vocabulary is out of sync with the
/// interfaces; the reply degrades to [`ReplyPermission::None`].
pub(crate) fn reply_permission(
    vocabulary: &dyn PermissionVocabulary,
    interface: &str,
    constraints: &PromptConstraints,
    outcome: Outcome,
) -> ReplyPermission {
    let allowed = constraints.allowed_permissions(outcome);
    vocabulary
        .abstract_to_concrete(interface, &allowed)
        .unwrap_or_else(|e| {
            warn!("internal error: cannot convert abstract permissions {allowed:?}: {e}");
            ReplyPermission::None
        })
}

/// An outstanding request awaiting a user decision.
///
/// A prompt may stand for several identical blocked requests; all of them
/// receive the same reply when the prompt is resolved.
#[derive(Clone)]
pub struct Prompt {
    pub id: PromptId,
    pub timestamp: DateTime<Utc>,
    pub snap: String,
    pub interface: String,
    pub constraints: PromptConstraints,
    listener_reqs: Vec<Arc<dyn ListenerRequest>>,
}

impl Prompt {
    pub(crate) fn new(
        id: PromptId,
        metadata: &PromptMetadata,
        constraints: PromptConstraints,
        listener_req: Arc<dyn ListenerRequest>,
    ) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            snap: metadata.snap.clone(),
            interface: metadata.interface.clone(),
            constraints,
            listener_reqs: vec![listener_req],
        }
    }

    /// Number of blocked requests merged into this prompt.
    pub fn listener_count(&self) -> usize {
        self.listener_reqs.len()
    }

    pub(crate) fn matches(
        &self,
        metadata: &PromptMetadata,
        constraints: &PromptConstraints,
    ) -> bool {
        self.snap == metadata.snap
            && self.interface == metadata.interface
            && self.constraints.equals(constraints)
    }

    pub(crate) fn merge(&mut self, listener_req: Arc<dyn ListenerRequest>) {
        self.listener_reqs.push(listener_req);
    }

    pub(crate) fn send_reply(
        &self,
        vocabulary: &dyn PermissionVocabulary,
        outcome: Outcome,
    ) -> Result<(), ReplyError> {
        let allowed = reply_permission(vocabulary, &self.interface, &self.constraints, outcome);
        self.send_reply_with_permission(&allowed)
    }

    /// Reply to every merged request.
    ///
    /// Merged requests are identical, so a reply malformed for one is
    /// malformed for all and nothing further is sent.
    pub(crate) fn send_reply_with_permission(
        &self,
        allowed: &ReplyPermission,
    ) -> Result<(), ReplyError> {
        for req in &self.listener_reqs {
            req.reply(allowed)?;
        }
        Ok(())
    }

    /// Reply to every merged request, carrying on past rejections.
    ///
    /// Used once the prompt is being discarded regardless of the outcome.
    /// Returns the number of requests which rejected the reply.
    pub(crate) fn reply_to_all(&self, allowed: &ReplyPermission) -> usize {
        let mut rejected = 0;
        for req in &self.listener_reqs {
            if let Err(e) = req.reply(allowed) {
                debug!("listener request for prompt {} rejected reply: {e}", self.id);
                rejected += 1;
            }
        }
        rejected
    }
}

impl fmt::Debug for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prompt")
            .field("id", &self.id)
            .field("timestamp", &self.timestamp)
            .field("snap", &self.snap)
            .field("interface", &self.interface)
            .field("constraints", &self.constraints)
            .field("listener_reqs", &self.listener_reqs.len())
            .finish()
    }
}

struct ConstraintsJson<'a>(&'a PromptConstraints);

impl Serialize for ConstraintsJson<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("PromptConstraints", 3)?;
        s.serialize_field("path", &self.0.path)?;
        s.serialize_field("requested-permissions", &self.0.remaining)?;
        s.serialize_field("available-permissions", &self.0.available)?;
        s.end()
    }
}

impl Serialize for Prompt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Prompt", 5)?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("timestamp", &self.timestamp)?;
        s.serialize_field("snap", &self.snap)?;
        s.serialize_field("interface", &self.interface)?;
        s.serialize_field("constraints", &ConstraintsJson(&self.constraints))?;
        s.end()
    }
}
