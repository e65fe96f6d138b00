//! Hook for an external two-phase-commit coordinator
//!
//! A transaction-manager integration only needs the core to expose
//! callbacks, not implement them: `tpc_vote` sends `REQ_PREPARE`,
//! `tpc_finish` sends `REQ_COMMIT`, `tpc_abort`/`abort` send `REQ_ROLLBACK`,
//! and `sort_key` gives the coordinator a stable ordering key per
//! connection. Rather than keep a process-wide registry of
//! `(connection, tx)` pairs to avoid joining the same transaction twice,
//! this attaches that join-state to the connection value itself (see
//! DESIGN.md).

/// A participant in an externally-driven two-phase commit.
///
/// [`crate::connection::NetfsConnection`] implements this directly: its
/// three methods are thin wrappers over [`crate::connection::NetfsConnection::prepare`],
/// [`crate::connection::NetfsConnection::commit`], and
/// [`crate::connection::NetfsConnection::rollback`].
pub trait TwoPhaseParticipant {
    /// Vote on whether this connection's pending uploads can be committed.
    /// Called by the coordinator's prepare phase.
    ///
    /// # Errors
    ///
    /// Returns an error if the vote request fails or any backend votes no.
    fn tpc_vote(&mut self) -> Result<(), crate::error::ClientError>;

    /// Make this connection's pending uploads durable. Called once every
    /// participant has voted yes.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit request fails.
    fn tpc_finish(&mut self) -> Result<(), crate::error::ClientError>;

    /// Discard this connection's pending uploads. Called if any participant
    /// votes no, or the coordinator itself aborts.
    fn tpc_abort(&mut self);

    /// A stable, unique string identifying this connection for the
    /// coordinator's join-ordering and deduplication.
    fn sort_key(&self) -> String;
}

/// Whether this connection has already joined a particular coordinator's
/// transaction, keyed by whatever identity the coordinator uses — attached
/// to the connection instead of a process-global table.
#[derive(Debug, Clone, Default)]
pub struct JoinState {
    joined: Option<String>,
}

impl JoinState {
    /// Record that this connection has joined the coordinator transaction
    /// identified by `id`, unless it already had joined one.
    ///
    /// Returns `true` if this call actually recorded a new join (the caller
    /// should register with the coordinator); `false` if a join was already
    /// recorded (the caller should skip registering again).
    pub fn join(&mut self, id: impl Into<String>) -> bool {
        if self.joined.is_some() {
            return false;
        }
        self.joined = Some(id.into());
        true
    }

    /// Clear any recorded join, e.g. after the transaction finishes or aborts.
    pub fn clear(&mut self) {
        self.joined = None;
    }

    /// Whether a join is currently recorded.
    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.joined.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_join_succeeds_second_is_a_no_op() {
        let mut state = JoinState::default();
        assert!(state.join("tx-1"));
        assert!(!state.join("tx-1"));
        assert!(state.is_joined());
    }

    #[test]
    fn clear_allows_rejoining() {
        let mut state = JoinState::default();
        state.join("tx-1");
        state.clear();
        assert!(!state.is_joined());
        assert!(state.join("tx-2"));
    }
}
