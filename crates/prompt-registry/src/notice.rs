//! Change notices emitted for prompt state transitions.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::maxid::PromptId;

/// Notice data key recording why a prompt was resolved.
pub const RESOLVED_KEY: &str = "resolved";

/// Why a prompt left the registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// A client replied explicitly.
    Replied,
    /// A newly added rule satisfied the prompt.
    Satisfied,
    /// The user's expiration timer fired.
    Expired,
    /// The registry was closed.
    Cancelled,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Replied => "replied",
            Resolution::Satisfied => "satisfied",
            Resolution::Expired => "expired",
            Resolution::Cancelled => "cancelled",
        }
    }

    /// The `{"resolved": ...}` map attached to the notice.
    pub fn notice_data(self) -> HashMap<String, String> {
        HashMap::from([(RESOLVED_KEY.to_string(), self.as_str().to_string())])
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of prompt notices.
///
/// Called with the registry lock held so that notices are recorded in the
/// same order as the transitions they describe. Implementations must return
/// quickly and must never call back into the registry.
pub trait PromptNotifier: Send + Sync {
    fn notify_prompt(
        &self,
        user: u32,
        id: PromptId,
        data: Option<&HashMap<String, String>>,
    ) -> anyhow::Result<()>;
}

impl<F> PromptNotifier for F
where
    F: Fn(u32, PromptId, Option<&HashMap<String, String>>) -> anyhow::Result<()> + Send + Sync,
{
    fn notify_prompt(
        &self,
        user: u32,
        id: PromptId,
        data: Option<&HashMap<String, String>>,
    ) -> anyhow::Result<()> {
        self(user, id, data)
    }
}
