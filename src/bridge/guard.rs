//! Validation guard for command invocations.
//!
//! Evaluation order (strict priority):
//! 1. Allow-list — the command must match an entry exactly or by base name
//! 2. Metacharacter scan — any shell operator in an argument rejects the
//!    call as potential injection
//! 3. Traversal scan — parent-directory tokens in arguments or the working
//!    directory reject the call as a potential path escape
//!
//! Every deny decision is logged at error level before it is returned.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use crate::error::QuillError;

/// Shell operator sequences that could splice a second command into an
/// argument if it ever reached a shell.
const SHELL_METACHARACTERS: &[&str] = &[";", "&", "|", "`", "$(", "${"];

/// Parent-directory tokens scanned in arguments and working directories.
const TRAVERSAL_TOKENS: &[&str] = &["../", "..\\"];

/// Check whether a string contains any shell metacharacter.
pub fn contains_metacharacter(s: &str) -> bool {
    SHELL_METACHARACTERS.iter().any(|m| s.contains(m))
}

/// Check whether a string contains a parent-directory traversal token.
///
/// A bare `..` counts: it escapes one level without containing a slash.
pub fn contains_traversal(s: &str) -> bool {
    s == ".." || TRAVERSAL_TOKENS.iter().any(|t| s.contains(t))
}

/// Allow-list + pattern guard applied before any subprocess exists.
pub struct CommandGuard {
    allowed: Vec<String>,
}

impl CommandGuard {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    /// Validate a command and its arguments. Rejections are fatal to the
    /// call and logged for audit visibility.
    pub fn check(&self, command: &str, args: &[String]) -> crate::Result<()> {
        if !self.is_allowed(command) {
            tracing::error!(command = %command, "command rejected: not in allow list");
            return Err(QuillError::CommandNotAllowed(command.to_string()));
        }

        for arg in args {
            if contains_metacharacter(arg) {
                tracing::error!(
                    command = %command,
                    argument = %arg,
                    "argument rejected: shell metacharacter (potential injection)"
                );
                return Err(QuillError::UnsafeArgument(arg.clone()));
            }
        }

        for arg in args {
            if contains_traversal(arg) {
                tracing::error!(
                    command = %command,
                    argument = %arg,
                    "argument rejected: parent-directory traversal"
                );
                return Err(QuillError::PathEscape(arg.clone()));
            }
        }

        Ok(())
    }

    /// A command matches by its exact spelling or by its base name, so both
    /// "quill" and "/usr/local/bin/quill" satisfy an allow-list entry of
    /// "quill".
    fn is_allowed(&self, command: &str) -> bool {
        let base = Path::new(command).file_name().unwrap_or(OsStr::new(command));
        self.allowed
            .iter()
            .any(|a| a == command || OsStr::new(a) == base)
    }
}

/// Resolve a working directory against the workspace base and verify the
/// result stays inside it.
///
/// Containment is decided by component-wise relativization
/// (`Path::strip_prefix` after lexical normalization), not string-prefix
/// comparison, so `/base-evil` never passes for base `/base`.
pub fn resolve_within_base(base: &Path, candidate: &Path) -> crate::Result<PathBuf> {
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    };

    let base = normalize(base)?;
    let resolved = normalize(&joined)?;

    if resolved.strip_prefix(&base).is_err() {
        tracing::error!(
            base = %base.display(),
            requested = %resolved.display(),
            "working directory rejected: outside workspace base"
        );
        return Err(QuillError::PathEscape(
            resolved.to_string_lossy().into_owned(),
        ));
    }
    Ok(resolved)
}

/// Lexically fold `.` and `..` components without touching the filesystem,
/// so containment can be decided before the directory exists.
fn normalize(path: &Path) -> crate::Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return Err(QuillError::PathEscape(
                        path.to_string_lossy().into_owned(),
                    ));
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}
