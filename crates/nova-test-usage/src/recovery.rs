//! The open sequence of a writable index.
//!
//! ```text
//! CheckVersion ──ok──────────────────────────────▶ Opening ──ok──▶ open
//!      │ stale / missing stamp                        ▲   │ corrupt store
//!      ▼                                              │   ▼
//! VersionMismatch ──▶ Rebuilding (wipe + stamp) ──────┘  Rebuilding (attempts left)
//! ```
//!
//! Every pass through `Opening` counts as an attempt; a corrupt store on the
//! last allowed attempt fails the open. Environmental errors (permissions, a
//! held lock, a full disk) are returned as-is since wiping would not fix them.

use nova_storage::StorageError;

use crate::error::{Result, TestUsageError};

/// The side effects the open sequence drives.
pub(crate) trait OpenSteps {
    type Opened;

    fn read_version(&mut self) -> std::result::Result<Option<u32>, StorageError>;
    /// Deletes every index file and writes a fresh version stamp.
    fn rebuild(&mut self) -> std::result::Result<(), StorageError>;
    fn open_stores(&mut self) -> std::result::Result<Self::Opened, StorageError>;
}

#[derive(Debug)]
enum OpenState {
    CheckVersion,
    VersionMismatch { found: Option<u32> },
    Rebuilding,
    Opening,
}

pub(crate) fn open_with_recovery<S: OpenSteps>(
    steps: &mut S,
    expected_version: u32,
    max_attempts: u32,
) -> Result<S::Opened> {
    let mut attempts = 0u32;
    let mut state = OpenState::CheckVersion;
    loop {
        state = match state {
            OpenState::CheckVersion => match steps.read_version() {
                Ok(Some(found)) if found == expected_version => OpenState::Opening,
                Ok(found) => OpenState::VersionMismatch { found },
                Err(err) if err.is_corruption() => {
                    tracing::warn!(
                        target = "nova.test_usage",
                        error = %err,
                        "unreadable index version stamp; rebuilding"
                    );
                    OpenState::Rebuilding
                }
                Err(err) => return Err(err.into()),
            },
            OpenState::VersionMismatch { found: None } => {
                tracing::info!(
                    target = "nova.test_usage",
                    version = expected_version,
                    "creating test usage index"
                );
                OpenState::Rebuilding
            }
            OpenState::VersionMismatch { found: Some(found) } => {
                tracing::warn!(
                    target = "nova.test_usage",
                    expected = expected_version,
                    found,
                    "test usage index version changed; rebuilding"
                );
                OpenState::Rebuilding
            }
            OpenState::Rebuilding => {
                steps.rebuild()?;
                OpenState::Opening
            }
            OpenState::Opening => {
                attempts += 1;
                match steps.open_stores() {
                    Ok(opened) => return Ok(opened),
                    Err(err) if err.is_corruption() => {
                        if attempts >= max_attempts {
                            tracing::error!(
                                target = "nova.test_usage",
                                attempts,
                                error = %err,
                                "giving up on test usage index"
                            );
                            return Err(TestUsageError::InitializationFailed {
                                attempts,
                                last: err,
                            });
                        }
                        tracing::warn!(
                            target = "nova.test_usage",
                            attempt = attempts,
                            max_attempts,
                            error = %err,
                            "test usage index is corrupted; rebuilding"
                        );
                        OpenState::Rebuilding
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };
    }
}
