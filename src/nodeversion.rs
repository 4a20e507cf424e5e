//! Filepath: src/nodeversion.rs
//!
//! Node version latch for optimistic lock coupling.
//!
//! [`NodeVersion`] packs lock state, retirement state, and a sequence
//! counter into a single `AtomicU64`. Readers never mutate it; writers
//! acquire it by CAS and advance the sequence on unlock.
//!
//! # Concurrency Model
//! 1. Readers: call `begin_read()` to obtain a token, read node fields,
//!    then call `validate(token)`. On `Restart`, retry from the root.
//! 2. Writers: call `try_upgrade(token)` (or `try_write_lock()`), modify
//!    the node, then call `write_unlock()`.
//!
//! A reader's token is only valid if *no* writer unlocked the node between
//! `begin_read` and `validate`. Because unlocking always advances the
//! sequence, comparing the raw version word for exact equality is enough.

use std::hint;
use std::sync::atomic::AtomicU64;

use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, READ_ORD, UNLOCK_ORD};

// ============================================================================
//  Bit Constants
// ============================================================================

/// Obsolete bit: node is logically retired. Terminal; readers restart forever.
const OBSOLETE_BIT: u64 = 1;

/// Lock bit: node is write-locked.
const LOCK_BIT: u64 = 1 << 1;

/// Low bit of the sequence counter (bits 2..63).
///
/// Lock and unlock both add `LOCK_BIT`; the unlock's addition carries out
/// of the lock bit and bumps the sequence by one step.
#[cfg(test)]
const SEQ_LOWBIT: u64 = 1 << 2;

// ============================================================================
//  Restart
// ============================================================================

/// Signal that an optimistic read or lock attempt observed concurrent
/// modification and the operation must be retried from the root.
///
/// Never surfaced to callers of the map interface; every public operation
/// absorbs it in a retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restart;

// ============================================================================
//  NodeVersion
// ============================================================================

/// A versioned latch for tree nodes.
///
/// # Layout
/// Bit 0: `obsolete` | Bit 1: `locked` | Bits 2..63: `sequence`
///
/// The sequence is 62 bits wide and must not wrap; at one unlock per
/// nanosecond that takes over a century, so wrap is not handled.
///
/// # Example
///
/// ```
/// use blink_tree::nodeversion::NodeVersion;
///
/// let v = NodeVersion::new();
/// let token = v.begin_read().unwrap();
///
/// // No writer intervened, so the token still validates.
/// assert!(v.validate(token).is_ok());
/// ```
#[derive(Debug)]
pub struct NodeVersion {
    value: AtomicU64,
}

impl NodeVersion {
    /// Create a new unlocked version with sequence zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    // ========================================================================
    //  Raw Accessors
    // ========================================================================

    /// Atomically load the raw version word.
    #[inline]
    #[must_use]
    pub fn observe(&self) -> u64 {
        self.value.load(READ_ORD)
    }

    /// Check whether a raw version word has the lock bit set.
    #[inline]
    #[must_use]
    pub const fn is_locked(version: u64) -> bool {
        (version & LOCK_BIT) != 0
    }

    /// Check whether a raw version word has the obsolete bit set.
    #[inline]
    #[must_use]
    pub const fn is_obsolete(version: u64) -> bool {
        (version & OBSOLETE_BIT) != 0
    }

    // ========================================================================
    //  Optimistic Read Protocol
    // ========================================================================

    /// Begin an optimistic read, returning the observed version as a token.
    ///
    /// # Errors
    /// [`Restart`] if the node is currently locked or obsolete. Emits a
    /// spin hint before failing so tight retry loops back off a little.
    #[inline]
    pub fn begin_read(&self) -> Result<u64, Restart> {
        let version: u64 = self.observe();

        if Self::is_locked(version) || Self::is_obsolete(version) {
            hint::spin_loop();
            return Err(Restart);
        }

        Ok(version)
    }

    /// Check that the version is still exactly `token`.
    ///
    /// Any difference, including a set lock or obsolete bit, means a writer
    /// has touched the node since `begin_read` and the read is invalid.
    ///
    /// # Errors
    /// [`Restart`] on any mismatch.
    #[inline]
    pub fn validate(&self, token: u64) -> Result<(), Restart> {
        if self.observe() == token {
            Ok(())
        } else {
            Err(Restart)
        }
    }

    // ========================================================================
    //  Write Lock Protocol
    // ========================================================================

    /// Try to acquire the write lock from an unlocked state.
    ///
    /// # Errors
    /// [`Restart`] if the node is locked, obsolete, or the CAS loses a race.
    #[inline]
    pub fn try_write_lock(&self) -> Result<(), Restart> {
        let version: u64 = self.observe();

        if Self::is_locked(version) || Self::is_obsolete(version) {
            hint::spin_loop();
            return Err(Restart);
        }

        match self
            .value
            .compare_exchange(version, version + LOCK_BIT, CAS_SUCCESS, CAS_FAILURE)
        {
            Ok(_) => Ok(()),
            Err(_) => {
                hint::spin_loop();
                Err(Restart)
            }
        }
    }

    /// Try to upgrade a read token to the write lock.
    ///
    /// Succeeds only if no writer has intervened since the token was taken,
    /// so the caller's prior reads remain valid under the lock.
    ///
    /// # Errors
    /// [`Restart`] if the version no longer equals `token`.
    #[inline]
    pub fn try_upgrade(&self, token: u64) -> Result<(), Restart> {
        match self
            .value
            .compare_exchange(token, token + LOCK_BIT, CAS_SUCCESS, CAS_FAILURE)
        {
            Ok(_) => Ok(()),
            Err(_) => {
                hint::spin_loop();
                Err(Restart)
            }
        }
    }

    /// Release the write lock, advancing the sequence.
    ///
    /// Must only be called by the lock holder. The addition clears the lock
    /// bit and carries into the sequence, invalidating outstanding tokens.
    #[inline]
    pub fn write_unlock(&self) {
        debug_assert!(
            Self::is_locked(self.value.load(crate::ordering::RELAXED)),
            "write_unlock on unlocked version"
        );

        self.value.fetch_add(LOCK_BIT, UNLOCK_ORD);
    }

    /// Release the write lock and mark the node obsolete.
    ///
    /// Once observed, readers restart forever at this node. The node may
    /// then be handed to whatever deferred-reclamation scheme the host uses.
    #[inline]
    pub fn write_unlock_obsolete(&self) {
        debug_assert!(
            Self::is_locked(self.value.load(crate::ordering::RELAXED)),
            "write_unlock_obsolete on unlocked version"
        );

        self.value.fetch_add(LOCK_BIT | OBSOLETE_BIT, UNLOCK_ORD);
    }
}

impl Default for NodeVersion {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
//  Tests
// ============================================================================
