//! Outcomes and the interface permission vocabulary.

use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PromptError, PromptResult};

/// Decision applied to a prompt or carried by a rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Allow,
    Deny,
}

impl Outcome {
    pub fn as_bool(self) -> bool {
        matches!(self, Outcome::Allow)
    }
}

impl FromStr for Outcome {
    type Err = PromptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Outcome::Allow),
            "deny" => Ok(Outcome::Deny),
            other => Err(PromptError::InvalidOutcome(other.to_string())),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Allow => write!(f, "allow"),
            Outcome::Deny => write!(f, "deny"),
        }
    }
}

/// Kernel file permission mask.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct FileAccess(pub u32);

impl FileAccess {
    pub const EXEC: FileAccess = FileAccess(1 << 0);
    pub const WRITE: FileAccess = FileAccess(1 << 1);
    pub const READ: FileAccess = FileAccess(1 << 2);
    pub const APPEND: FileAccess = FileAccess(1 << 3);
    pub const CREATE: FileAccess = FileAccess(1 << 4);
    pub const DELETE: FileAccess = FileAccess(1 << 5);
    pub const OPEN: FileAccess = FileAccess(1 << 6);
    pub const RENAME: FileAccess = FileAccess(1 << 7);
    pub const SETATTR: FileAccess = FileAccess(1 << 8);
    pub const GETATTR: FileAccess = FileAccess(1 << 9);
    pub const CHMOD: FileAccess = FileAccess(1 << 12);
    pub const CHOWN: FileAccess = FileAccess(1 << 13);
    pub const LOCK: FileAccess = FileAccess(1 << 15);
    pub const EXEC_MMAP: FileAccess = FileAccess(1 << 16);

    pub const fn empty() -> Self {
        FileAccess(0)
    }

    pub fn contains(self, other: FileAccess) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for FileAccess {
    type Output = FileAccess;

    fn bitor(self, rhs: Self) -> Self::Output {
        FileAccess(self.0 | rhs.0)
    }
}

/// Concrete permission payload sent back to a listener request.
///
/// The registry never inspects this value; only the vocabulary builds it.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "mask", rename_all = "snake_case")]
pub enum ReplyPermission {
    #[default]
    None,
    File(FileAccess),
}

/// Interface-specific permission vocabulary.
pub trait PermissionVocabulary: Send + Sync {
    /// Permissions supported by the interface, in canonical order.
    fn available_permissions(&self, interface: &str) -> PromptResult<Vec<String>>;

    /// Convert abstract permission names into the concrete reply payload.
    fn abstract_to_concrete(
        &self,
        interface: &str,
        permissions: &[String],
    ) -> PromptResult<ReplyPermission>;
}

/// Vocabulary for the interfaces which support prompting.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinVocabulary;

impl BuiltinVocabulary {
    fn file_permissions(interface: &str) -> Option<&'static [(&'static str, FileAccess)]> {
        const HOME: &[(&str, FileAccess)] = &[
            (
                "read",
                FileAccess(FileAccess::READ.0 | FileAccess::OPEN.0 | FileAccess::GETATTR.0),
            ),
            (
                "write",
                FileAccess(
                    FileAccess::WRITE.0
                        | FileAccess::APPEND.0
                        | FileAccess::CREATE.0
                        | FileAccess::DELETE.0
                        | FileAccess::RENAME.0
                        | FileAccess::SETATTR.0
                        | FileAccess::CHMOD.0
                        | FileAccess::CHOWN.0
                        | FileAccess::LOCK.0,
                ),
            ),
            (
                "execute",
                FileAccess(FileAccess::EXEC.0 | FileAccess::EXEC_MMAP.0),
            ),
        ];
        const CAMERA: &[(&str, FileAccess)] = &[(
            "access",
            FileAccess(
                FileAccess::READ.0
                    | FileAccess::WRITE.0
                    | FileAccess::APPEND.0
                    | FileAccess::OPEN.0
                    | FileAccess::GETATTR.0,
            ),
        )];
        match interface {
            "home" => Some(HOME),
            "camera" => Some(CAMERA),
            _ => None,
        }
    }
}

impl PermissionVocabulary for BuiltinVocabulary {
    fn available_permissions(&self, interface: &str) -> PromptResult<Vec<String>> {
        let table = Self::file_permissions(interface)
            .ok_or_else(|| PromptError::UnknownInterface(interface.to_string()))?;
        Ok(table.iter().map(|(name, _)| name.to_string()).collect())
    }

    fn abstract_to_concrete(
        &self,
        interface: &str,
        permissions: &[String],
    ) -> PromptResult<ReplyPermission> {
        let table = Self::file_permissions(interface)
            .ok_or_else(|| PromptError::UnknownInterface(interface.to_string()))?;
        let mut mask = FileAccess::empty();
        for perm in permissions {
            let (_, access) = table
                .iter()
                .find(|(name, _)| name == perm)
                .ok_or_else(|| PromptError::UnknownPermission {
                    interface: interface.to_string(),
                    permission: perm.clone(),
                })?;
            mask = mask | *access;
        }
        Ok(ReplyPermission::File(mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perms(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_outcome_parse() {
        assert_eq!("allow".parse::<Outcome>().unwrap(), Outcome::Allow);
        assert_eq!("deny".parse::<Outcome>().unwrap(), Outcome::Deny);
        assert!(matches!(
            "maybe".parse::<Outcome>(),
            Err(PromptError::InvalidOutcome(s)) if s == "maybe"
        ));
        assert!(Outcome::Allow.as_bool());
        assert!(!Outcome::Deny.as_bool());
    }

    #[test]
    fn test_available_permissions_order() {
        let vocab = BuiltinVocabulary;
        assert_eq!(
            vocab.available_permissions("home").unwrap(),
            perms(&["read", "write", "execute"])
        );
        assert_eq!(vocab.available_permissions("camera").unwrap(), perms(&["access"]));
        assert!(matches!(
            vocab.available_permissions("network"),
            Err(PromptError::UnknownInterface(_))
        ));
    }

    #[test]
    fn test_abstract_to_concrete() {
        let vocab = BuiltinVocabulary;
        let ReplyPermission::File(mask) = vocab
            .abstract_to_concrete("home", &perms(&["read", "execute"]))
            .unwrap()
        else {
            panic!("expected file permission");
        };
        assert!(mask.contains(FileAccess::READ));
        assert!(mask.contains(FileAccess::EXEC));
        assert!(!mask.contains(FileAccess::WRITE));

        assert_eq!(
            vocab.abstract_to_concrete("home", &[]).unwrap(),
            ReplyPermission::File(FileAccess::empty())
        );
        assert!(matches!(
            vocab.abstract_to_concrete("home", &perms(&["fly"])),
            Err(PromptError::UnknownPermission { .. })
        ));
    }
}
