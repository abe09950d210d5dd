//! Outstanding prompts awaiting a user decision.
//!
//! ## Architecture
//!
//! ```text
//! kernel listener
//!     │  blocked request
//!     ▼
//! PromptRegistry::add_or_merge ──► UserPromptDb (per UID, with expiration timer)
//!     │                                 │
//!     │  reply / new rule / timeout / close
//!     ▼                                 ▼
//! ListenerRequest::reply          PromptNotifier (notices, under the lock)
//! ```
//!
//! Identical requests (same user, snap, interface, path and requested
//! permissions) share one prompt. Every resolution path removes the prompt
//! in the same critical section that decides to reply, so no request is
//! replied to twice.

mod models;
mod registry;
mod timer;
mod user_db;

pub use models::{Prompt, PromptConstraints, PromptMetadata};
pub use registry::PromptRegistry;
