//! Wire vocabulary for Meshroom.
//!
//! This crate defines what peers say to each other over a data channel:
//!
//! - **Types** ([`PeerId`], [`ChannelMetadata`], [`PeerMessage`]): the
//!   values that travel between participants.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those values are
//!   converted to/from bytes.
//! - **Errors** ([`ProtocolError`]): what can go wrong while doing so.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about endpoints, calls, or sessions.
//! It only names peers and serializes the few payloads they exchange.
//!
//! ```text
//! Fabric (bytes on a channel) → Protocol (PeerMessage) → Mesh (roster, calls)
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{ChannelMetadata, PeerId, PeerMessage};
