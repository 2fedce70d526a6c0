//! Integration tests for the in-process loopback fabric.
//!
//! These exercise the fabric contract end to end: two endpoints on one
//! switchboard open a channel, exchange payloads, place a call, and tear
//! everything down again.

#[cfg(feature = "loopback")]
mod loopback {
    use std::time::Duration;

    use meshroom_fabric::{
        CaptureMode, Call, Channel, ChannelEvent, Endpoint, EndpointEvent, Fabric,
        FabricError, LoopbackChannel, LoopbackEndpoint, LoopbackFabric, LoopbackOptions,
        MediaStream,
    };
    use meshroom_protocol::{ChannelMetadata, PeerId};

    fn pid(id: &str) -> PeerId {
        PeerId::from(id)
    }

    async fn open(fabric: &LoopbackFabric, id: &str) -> LoopbackEndpoint {
        fabric.open(&pid(id)).await.expect("open should succeed")
    }

    /// Opens a channel from `guest` to `host` and returns both halves.
    async fn connect_pair(
        host: &LoopbackEndpoint,
        guest: &LoopbackEndpoint,
    ) -> (LoopbackChannel, LoopbackChannel) {
        let meta = ChannelMetadata::new("Bo", guest.id().clone());
        let outbound = guest
            .connect(host.id(), meta)
            .await
            .expect("connect should succeed");
        let inbound = match host.next_event().await {
            Some(EndpointEvent::IncomingChannel(ch)) => ch,
            other => panic!("expected incoming channel, got {other:?}"),
        };
        (inbound, outbound)
    }

    // =====================================================================
    // open()
    // =====================================================================

    #[tokio::test]
    async fn test_open_registers_endpoint() {
        let fabric = LoopbackFabric::new();
        let ep = open(&fabric, "host").await;

        assert_eq!(ep.id(), &pid("host"));
        assert!(fabric.is_registered(&pid("host")));
        assert_eq!(fabric.endpoint_count(), 1);
    }

    #[tokio::test]
    async fn test_open_duplicate_id_returns_id_taken() {
        let fabric = LoopbackFabric::new();
        let _first = open(&fabric, "host").await;

        let result = fabric.open(&pid("host")).await;

        assert!(matches!(result, Err(FabricError::IdTaken(id)) if id == pid("host")));
    }

    #[tokio::test]
    async fn test_destroy_releases_id_for_reuse() {
        let fabric = LoopbackFabric::new();
        let first = open(&fabric, "host").await;
        first.destroy();

        assert!(!fabric.is_registered(&pid("host")));
        let _second = open(&fabric, "host").await;
        assert!(fabric.is_registered(&pid("host")));
    }

    #[tokio::test]
    async fn test_stale_destroy_does_not_unregister_successor() {
        let fabric = LoopbackFabric::new();
        let first = open(&fabric, "host").await;
        first.disconnect();
        let _second = open(&fabric, "host").await;

        // The first endpoint already left; destroying it again must not
        // evict the endpoint that now owns the id.
        first.destroy();

        assert!(fabric.is_registered(&pid("host")));
    }

    #[tokio::test]
    async fn test_drop_behaves_like_destroy() {
        let fabric = LoopbackFabric::new();
        {
            let _ep = open(&fabric, "host").await;
        }
        assert_eq!(fabric.endpoint_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_honors_configured_delay() {
        let fabric = LoopbackFabric::with_options(LoopbackOptions {
            open_delay: Some(Duration::from_secs(2)),
            ..LoopbackOptions::default()
        });
        let started = tokio::time::Instant::now();

        let _ep = open(&fabric, "slow").await;

        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    // =====================================================================
    // acquire_local_audio()
    // =====================================================================

    #[tokio::test]
    async fn test_capture_yields_distinct_active_streams() {
        let fabric = LoopbackFabric::new();
        let a = fabric.acquire_local_audio().await.unwrap();
        let b = fabric.acquire_local_audio().await.unwrap();

        assert_ne!(a.id(), b.id());
        assert!(a.is_active());
    }

    #[tokio::test]
    async fn test_capture_denied_and_unavailable() {
        let fabric = LoopbackFabric::new();

        fabric.set_capture(CaptureMode::Denied);
        let denied = fabric.acquire_local_audio().await;
        assert!(matches!(denied, Err(FabricError::CaptureDenied(_))));

        fabric.set_capture(CaptureMode::Unavailable);
        let missing = fabric.acquire_local_audio().await;
        assert!(matches!(missing, Err(FabricError::CaptureUnavailable(_))));
    }

    #[tokio::test]
    async fn test_stream_stop_is_shared_by_clones() {
        let fabric = LoopbackFabric::new();
        let stream = fabric.acquire_local_audio().await.unwrap();
        let clone = stream.clone();

        clone.stop();

        assert!(!stream.is_active());
    }

    // =====================================================================
    // Channels
    // =====================================================================

    #[tokio::test]
    async fn test_connect_unknown_peer_returns_unavailable() {
        let fabric = LoopbackFabric::new();
        let guest = open(&fabric, "guest").await;

        let result = guest
            .connect(&pid("nobody"), ChannelMetadata::new("Bo", pid("guest")))
            .await;

        assert!(matches!(result, Err(FabricError::PeerUnavailable(id)) if id == pid("nobody")));
    }

    #[tokio::test]
    async fn test_connect_delivers_metadata_and_open_to_both_sides() {
        let fabric = LoopbackFabric::new();
        let host = open(&fabric, "host").await;
        let guest = open(&fabric, "guest").await;

        let (inbound, outbound) = connect_pair(&host, &guest).await;

        assert_eq!(inbound.remote_id(), &pid("guest"));
        assert_eq!(outbound.remote_id(), &pid("host"));
        assert_eq!(inbound.metadata().display_name, "Bo");
        assert_eq!(inbound.metadata().local_id, pid("guest"));
        assert_eq!(inbound.next_event().await, Some(ChannelEvent::Open));
        assert_eq!(outbound.next_event().await, Some(ChannelEvent::Open));
        assert_eq!(fabric.open_link_count(), 1);
    }

    #[tokio::test]
    async fn test_channel_data_flows_both_ways() {
        let fabric = LoopbackFabric::new();
        let host = open(&fabric, "host").await;
        let guest = open(&fabric, "guest").await;
        let (inbound, outbound) = connect_pair(&host, &guest).await;
        let _ = inbound.next_event().await;
        let _ = outbound.next_event().await;

        outbound.send(b"hello, host").await.unwrap();
        inbound.send(b"ping").await.unwrap();

        assert_eq!(
            inbound.next_event().await,
            Some(ChannelEvent::Data(b"hello, host".to_vec()))
        );
        assert_eq!(
            outbound.next_event().await,
            Some(ChannelEvent::Data(b"ping".to_vec()))
        );
    }

    #[tokio::test]
    async fn test_sever_closes_both_ends_and_rejects_send() {
        let fabric = LoopbackFabric::new();
        let host = open(&fabric, "host").await;
        let guest = open(&fabric, "guest").await;
        let (inbound, outbound) = connect_pair(&host, &guest).await;
        let _ = inbound.next_event().await;
        let _ = outbound.next_event().await;

        assert_eq!(fabric.sever(&pid("host"), &pid("guest")), 1);

        assert_eq!(inbound.next_event().await, Some(ChannelEvent::Close));
        assert_eq!(outbound.next_event().await, Some(ChannelEvent::Close));
        assert_eq!(inbound.next_event().await, None);
        assert!(matches!(
            outbound.send(b"late").await,
            Err(FabricError::ChannelClosed(_))
        ));
        assert_eq!(fabric.open_link_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_link_reports_error_then_close() {
        let fabric = LoopbackFabric::new();
        let host = open(&fabric, "host").await;
        let guest = open(&fabric, "guest").await;
        let (inbound, _outbound) = connect_pair(&host, &guest).await;
        let _ = inbound.next_event().await;

        let err = FabricError::Signaling("ice failed".into());
        assert_eq!(fabric.fail_link(&pid("guest"), &pid("host"), err.clone()), 1);

        assert_eq!(inbound.next_event().await, Some(ChannelEvent::Error(err)));
        assert_eq!(inbound.next_event().await, Some(ChannelEvent::Close));
    }

    #[tokio::test]
    async fn test_destroy_closes_channels_of_that_endpoint() {
        let fabric = LoopbackFabric::new();
        let host = open(&fabric, "host").await;
        let guest = open(&fabric, "guest").await;
        let (inbound, _outbound) = connect_pair(&host, &guest).await;
        let _ = inbound.next_event().await;

        guest.destroy();

        assert_eq!(inbound.next_event().await, Some(ChannelEvent::Close));
        assert_eq!(fabric.open_link_count(), 0);
        assert!(fabric.is_registered(host.id()));
    }

    #[tokio::test]
    async fn test_connect_after_disconnect_is_signaling_error() {
        let fabric = LoopbackFabric::new();
        let _host = open(&fabric, "host").await;
        let guest = open(&fabric, "guest").await;
        guest.disconnect();

        let result = guest
            .connect(&pid("host"), ChannelMetadata::new("Bo", pid("guest")))
            .await;

        assert!(matches!(result, Err(FabricError::Signaling(_))));
    }

    // =====================================================================
    // Calls
    // =====================================================================

    #[tokio::test]
    async fn test_call_answered_with_media_flows_both_ways() {
        let fabric = LoopbackFabric::new();
        let host = open(&fabric, "host").await;
        let guest = open(&fabric, "guest").await;
        let host_audio = fabric.acquire_local_audio().await.unwrap();
        let guest_audio = fabric.acquire_local_audio().await.unwrap();

        let outbound = host.call(&pid("guest"), &host_audio).await.unwrap();
        let inbound = match guest.next_event().await {
            Some(EndpointEvent::IncomingCall(call)) => call,
            other => panic!("expected incoming call, got {other:?}"),
        };
        assert_eq!(inbound.peer_id(), &pid("host"));

        inbound.answer(Some(guest_audio.clone())).unwrap();

        assert_eq!(inbound.remote_stream().await.unwrap(), host_audio);
        assert_eq!(outbound.remote_stream().await.unwrap(), guest_audio);
    }

    #[tokio::test]
    async fn test_call_answered_without_media_fails_for_caller() {
        let fabric = LoopbackFabric::new();
        let host = open(&fabric, "host").await;
        let guest = open(&fabric, "guest").await;
        let audio = fabric.acquire_local_audio().await.unwrap();

        let outbound = host.call(&pid("guest"), &audio).await.unwrap();
        let Some(EndpointEvent::IncomingCall(inbound)) = guest.next_event().await else {
            panic!("expected incoming call");
        };
        inbound.answer(None).unwrap();

        assert!(matches!(
            outbound.remote_stream().await,
            Err(FabricError::Negotiation(_))
        ));
    }

    #[tokio::test]
    async fn test_call_answer_twice_is_rejected() {
        let fabric = LoopbackFabric::new();
        let host = open(&fabric, "host").await;
        let guest = open(&fabric, "guest").await;
        let audio = fabric.acquire_local_audio().await.unwrap();

        let _outbound = host.call(&pid("guest"), &audio).await.unwrap();
        let Some(EndpointEvent::IncomingCall(inbound)) = guest.next_event().await else {
            panic!("expected incoming call");
        };

        inbound.answer(None).unwrap();
        assert!(inbound.answer(None).is_err());
    }

    #[tokio::test]
    async fn test_call_dropped_unanswered_fails_for_caller() {
        let fabric = LoopbackFabric::new();
        let host = open(&fabric, "host").await;
        let guest = open(&fabric, "guest").await;
        let audio = fabric.acquire_local_audio().await.unwrap();

        let outbound = host.call(&pid("guest"), &audio).await.unwrap();
        drop(guest.next_event().await);

        assert!(matches!(
            outbound.remote_stream().await,
            Err(FabricError::Negotiation(_))
        ));
    }

    // =====================================================================
    // Endpoint errors
    // =====================================================================

    #[tokio::test]
    async fn test_inject_error_surfaces_as_endpoint_event() {
        let fabric = LoopbackFabric::new();
        let host = open(&fabric, "host").await;

        assert!(fabric.inject_error(&pid("host"), FabricError::Signaling("lost".into())));

        match host.next_event().await {
            Some(EndpointEvent::Error(FabricError::Signaling(msg))) => assert_eq!(msg, "lost"),
            other => panic!("expected endpoint error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_next_event_ends_after_destroy() {
        let fabric = LoopbackFabric::new();
        let host = open(&fabric, "host").await;

        host.destroy();

        assert!(host.next_event().await.is_none());
        assert!(!fabric.inject_error(&pid("host"), FabricError::Destroyed));
    }
}
