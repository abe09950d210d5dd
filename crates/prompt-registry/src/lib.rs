//! Registry of outstanding access-control prompts.
//!
//! Blocked requests from the kernel listener are registered as prompts,
//! deduplicated, expired per user, partially satisfied by new rules, and
//! answered exactly once.

pub mod config;
pub mod error;
pub mod listener;
pub mod maxid;
pub mod notice;
pub mod permissions;
pub mod prompts;
pub mod rules;

pub use config::RegistryConfig;
pub use error::{PromptError, PromptResult, ReplyError};
pub use listener::ListenerRequest;
pub use maxid::{IdAllocator, MaxIdFile, PromptId};
pub use notice::{PromptNotifier, Resolution};
pub use permissions::{
    BuiltinVocabulary, FileAccess, Outcome, PermissionVocabulary, ReplyPermission,
};
pub use prompts::{Prompt, PromptConstraints, PromptMetadata, PromptRegistry};
pub use rules::{PathPattern, RuleConstraints};
