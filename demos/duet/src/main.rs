//! A host and two guests share a room on the in-process loopback fabric.
//!
//! Run with `RUST_LOG=debug cargo run -p duet` to see every transition.

use std::time::Duration;

use meshroom::prelude::*;
use meshroom::{FabricError, SnapshotOf};

type Client = MeshroomClient<LoopbackFabric>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn until(
    client: &Client,
    what: &str,
    predicate: impl FnMut(&SnapshotOf<LoopbackFabric>) -> bool,
) -> Result<(), MeshroomError> {
    match tokio::time::timeout(Duration::from_secs(5), client.wait_until(predicate)).await {
        Ok(result) => result.map(|_| ()),
        Err(_) => {
            tracing::error!(%what, "gave up waiting");
            Err(MeshroomError::ClientStopped)
        }
    }
}

fn describe(name: &str, client: &Client) {
    let state = client.state();
    let summary = state.session.fold(
        || "idle".to_string(),
        |membership| format!("joining as {}", membership.role()),
        |ready| {
            let peers: Vec<String> = ready
                .roster()
                .peer_ids()
                .iter()
                .map(short)
                .collect();
            format!("in room as {}, peers [{}]", ready.membership().role(), peers.join(", "))
        },
    );
    println!("{name:>6}: {summary}");
}

fn short(id: &PeerId) -> String {
    id.as_str().chars().take(8).collect()
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), MeshroomError> {
    init_tracing();

    let fabric = LoopbackFabric::new();
    let alice = MeshroomClientBuilder::new().build(fabric.clone(), TracingSink);
    let bob = MeshroomClientBuilder::new().build(fabric.clone(), TracingSink);
    let carol = MeshroomClientBuilder::new().build(fabric.clone(), TracingSink);

    alice.create_room("alice")?;
    until(&alice, "alice ready", |s| s.session.kind() == SessionKind::Ready).await?;
    let room_code = alice.local_id().ok_or(MeshroomError::ClientStopped)?;
    println!("room code: {room_code}");

    bob.join_room("bob", room_code.as_str())?;
    carol.join_room("carol", room_code.as_str())?;
    until(&alice, "two guests", |s| {
        s.session.roster().is_some_and(|r| r.len() == 2)
    })
    .await?;
    for (name, client) in [("alice", &alice), ("bob", &bob), ("carol", &carol)] {
        describe(name, client);
    }

    println!("-- bob leaves");
    bob.leave_room()?;
    until(&alice, "bob gone", |s| s.session.roster().is_some_and(|r| r.len() == 1)).await?;
    describe("alice", &alice);
    describe("bob", &bob);

    println!("-- alice loses the signaling server");
    fabric.inject_error(&room_code, FabricError::Signaling("server went away".into()));
    until(&alice, "alice idle", |s| s.session.is_idle()).await?;
    until(&carol, "carol alone", |s| s.session.roster().is_some_and(|r| r.is_empty())).await?;
    if let Some(error) = alice.last_error() {
        println!(" alice: {error}");
    }
    describe("carol", &carol);

    for client in [alice, bob, carol] {
        client.shutdown().await?;
    }
    Ok(())
}
