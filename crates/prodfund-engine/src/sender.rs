//! # Sender Authentication
//!
//! Resolves which participant a call acts for.
//!
//! A trusted relayer forwards calls on behalf of participants by appending the
//! participant's 32-byte identity to the payload. The suffix is honoured only
//! when the immediate caller is a registered relayer; for anyone else it is
//! ordinary call data, so an untrusted relayer cannot assert another identity.
//!
//! ```text
//! payload from relayer:  [ call data ... | participant id (32 bytes) ]
//! payload from anyone:   [ call data ...                            ]
//! ```

use prodfund_core::{ParticipantId, IDENTITY_LEN};
use std::collections::HashSet;

/// A call as it arrives at the engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallContext {
    /// Immediate caller
    pub caller: ParticipantId,
    /// Raw call payload
    pub payload: Vec<u8>,
}

impl CallContext {
    /// Call made by the participant itself
    pub fn direct(caller: ParticipantId) -> Self {
        Self {
            caller,
            payload: Vec::new(),
        }
    }

    /// Call made by `caller` carrying arbitrary payload
    pub fn with_payload(caller: ParticipantId, payload: Vec<u8>) -> Self {
        Self { caller, payload }
    }

    /// Call forwarded by `relayer` on behalf of `participant`
    pub fn relayed(relayer: ParticipantId, participant: ParticipantId, data: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(data.len() + IDENTITY_LEN);
        payload.extend_from_slice(data);
        payload.extend_from_slice(participant.as_bytes());
        Self {
            caller: relayer,
            payload,
        }
    }
}

/// Source of trusted relayer identities
pub trait RelayerRegistry: Send + Sync {
    fn is_trusted_relayer(&self, who: &ParticipantId) -> bool;
}

/// Fixed set of trusted forwarders
#[derive(Clone, Debug, Default)]
pub struct TrustedForwarders {
    relayers: HashSet<ParticipantId>,
}

impl TrustedForwarders {
    /// No relayer is trusted
    pub fn none() -> Self {
        Self::default()
    }

    /// Trust a single relayer
    pub fn single(relayer: ParticipantId) -> Self {
        Self {
            relayers: HashSet::from([relayer]),
        }
    }

    pub fn from_relayers(relayers: impl IntoIterator<Item = ParticipantId>) -> Self {
        Self {
            relayers: relayers.into_iter().collect(),
        }
    }
}

impl RelayerRegistry for TrustedForwarders {
    fn is_trusted_relayer(&self, who: &ParticipantId) -> bool {
        self.relayers.contains(who)
    }
}

/// The participant a call acts for
pub fn resolve_sender(registry: &dyn RelayerRegistry, ctx: &CallContext) -> ParticipantId {
    if ctx.payload.len() >= IDENTITY_LEN && registry.is_trusted_relayer(&ctx.caller) {
        let suffix = &ctx.payload[ctx.payload.len() - IDENTITY_LEN..];
        if let Ok(id) = ParticipantId::from_slice(suffix) {
            return id;
        }
    }
    ctx.caller
}

/// The call data with any honoured identity suffix stripped
pub fn resolve_data<'a>(registry: &dyn RelayerRegistry, ctx: &'a CallContext) -> &'a [u8] {
    if ctx.payload.len() >= IDENTITY_LEN && registry.is_trusted_relayer(&ctx.caller) {
        &ctx.payload[..ctx.payload.len() - IDENTITY_LEN]
    } else {
        &ctx.payload
    }
}
