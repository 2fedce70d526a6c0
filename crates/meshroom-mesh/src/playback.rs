//! Where remote audio goes.

use std::sync::Arc;

use meshroom_fabric::MediaStream;
use meshroom_protocol::PeerId;

/// Local playback of remote peers' audio.
///
/// Called once per established call with the remote peer's stream. A
/// desktop client would attach the stream to an output device; headless
/// clients can log it or record it.
pub trait AudioSink<S>: Send + Sync + 'static {
    /// Starts playing `stream`, which belongs to `peer_id`.
    fn play(&self, peer_id: &PeerId, stream: S);
}

impl<S, T> AudioSink<S> for Arc<T>
where
    T: AudioSink<S> + ?Sized,
{
    fn play(&self, peer_id: &PeerId, stream: S) {
        (**self).play(peer_id, stream);
    }
}

/// Logs each remote stream instead of playing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl<S: MediaStream> AudioSink<S> for TracingSink {
    fn play(&self, peer_id: &PeerId, stream: S) {
        tracing::info!(%peer_id, stream_id = stream.id(), "remote audio ready for playback");
    }
}
