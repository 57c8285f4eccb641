//! Versioned snapshot envelope
//!
//! ```text
//! { "version": 1, "block_number": 1234, "state": { ... } }
//! ```
//!
//! The version is checked before the state is decoded, so an envelope
//! from an unknown layout fails with `SchemaMismatch` rather than a
//! field-level decode error. Collaborators and the event log are not part
//! of a snapshot.

use crate::state::ProtocolState;
use graph_core::{BlockNumber, GraphError, Result};
use serde::{Deserialize, Serialize};

/// Envelope layout written by this build
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    version: u32,
    block_number: BlockNumber,
    state: &'a ProtocolState,
}

#[derive(Deserialize)]
struct Header {
    version: u32,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    state: ProtocolState,
}

pub fn encode(state: &ProtocolState) -> Result<Vec<u8>> {
    serde_json::to_vec(&EnvelopeOut {
        version: SNAPSHOT_VERSION,
        block_number: state.clock.block_number(),
        state,
    })
    .map_err(|e| GraphError::Serialization(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<ProtocolState> {
    let header: Header = serde_json::from_slice(bytes).map_err(|e| GraphError::Serialization(e.to_string()))?;
    if header.version != SNAPSHOT_VERSION {
        return Err(GraphError::SchemaMismatch {
            required: SNAPSHOT_VERSION,
            found: header.version,
        });
    }
    let envelope: EnvelopeIn = serde_json::from_slice(bytes).map_err(|e| GraphError::Serialization(e.to_string()))?;
    Ok(envelope.state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;
    use graph_core::{tokens, Address};
    use graph_economics::TokenMinter;

    #[test]
    fn test_roundtrip_preserves_state() {
        let mut state = ProtocolState::from_config(&ProtocolConfig::default()).unwrap();
        let indexer = Address::repeat_byte(0x1d);
        state.token.mint(&indexer, tokens(500_000)).unwrap();
        state.stake(&indexer, tokens(200_000)).unwrap();
        state.advance(10, 120).unwrap();

        let decoded = decode(&encode(&state).unwrap()).unwrap();
        assert_eq!(decoded.clock, state.clock);
        assert_eq!(decoded.token, state.token);
        assert_eq!(decoded.stakes, state.stakes);
        assert_eq!(decoded.rewards.state, state.rewards.state);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let err = decode(br#"{"version": 7, "state": {}}"#).unwrap_err();
        assert_eq!(err, GraphError::SchemaMismatch { required: 1, found: 7 });

        assert!(matches!(decode(b"not json"), Err(GraphError::Serialization(_))));
    }
}
