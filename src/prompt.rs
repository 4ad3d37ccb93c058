//! Confirmation gate for destructive actions
//!
//! Clearing a non-empty directory or replacing a descriptor found in a source
//! tree asks a [`Confirm`] implementation first. The library default is
//! [`Decline`]; headless callers opt into [`AssumeYes`] through
//! [`crate::StrataBuilder::assume_yes`].

/// Yes/no decision for a destructive action
pub trait Confirm: Send + Sync {
    /// Return `true` to go ahead with the action described by `message`
    fn confirm(&self, message: &str) -> bool;
}

/// Answers every question with "yes"
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, message: &str) -> bool {
        tracing::debug!("Assuming yes: {}", message);
        true
    }
}

/// Answers every question with "no"
#[derive(Debug, Clone, Copy, Default)]
pub struct Decline;

impl Confirm for Decline {
    fn confirm(&self, message: &str) -> bool {
        tracing::debug!("Declining: {}", message);
        false
    }
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn confirm(&self, message: &str) -> bool {
        self(message)
    }
}
