//! Socket-based integration tests: real clients pushing to a real server.

use std::time::Duration;

use serde_json::json;
use world_client::WorldClient;
use world_server::server::bind_ephemeral;
use world_shared::{
    config::ServerConfig,
    math::Vec3,
    net::{PawnUpdate, UpdateMsg},
    world::{EntityIndex, OwnerId},
};
use world_tests::{init_tracing, pump_until};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn register_then_partial_updates() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = bind_ephemeral(ServerConfig::default()).await?;

    let mut client = WorldClient::connect(addr).await?;
    server.accept_one().await?;

    client.register(OwnerId(7)).await?;
    client
        .push_pawns([(EntityIndex(3), Vec3::new(1.0, 1.0, 1.0), Some(80.0))])
        .await?;
    pump_until(&mut server, WAIT, |s| s.counters().updates == 1).await?;
    {
        let e = server
            .world()
            .find_owner(OwnerId(7))
            .and_then(|o| o.entity(EntityIndex(3)))
            .expect("entity 3");
        assert_eq!(e.position, Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(e.health, Some(80.0));
    }

    client
        .push_pawns([(EntityIndex(3), Vec3::new(2.0, 2.0, 2.0), None)])
        .await?;
    pump_until(&mut server, WAIT, |s| s.counters().updates == 2).await?;

    let owner = server.world().find_owner(OwnerId(7)).expect("owner 7");
    assert_eq!(owner.entity_count(), 1);
    let e = owner.entity(EntityIndex(3)).expect("entity 3");
    assert_eq!(e.position, Vec3::new(2.0, 2.0, 2.0));
    assert_eq!(e.health, Some(80.0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ignored_messages_are_counted_and_connection_survives() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = bind_ephemeral(ServerConfig::default()).await?;

    let mut client = WorldClient::connect(addr).await?;
    server.accept_one().await?;

    client.send_raw(&json!({ "uuid": 1 })).await?;
    client.send_raw(&json!({ "t": "register" })).await?;
    client.send_raw(&json!({ "t": "teleport", "uuid": 1 })).await?;
    client.send_bytes(b"{ not json").await?;
    client
        .send_update(UpdateMsg::new().pawn(OwnerId(99), EntityIndex(0), PawnUpdate::at(1.0, 2.0, 3.0)))
        .await?;
    client.register(OwnerId(1)).await?;

    pump_until(&mut server, WAIT, |s| s.counters().registrations == 1).await?;

    let c = server.counters();
    assert_eq!(c.untagged, 1);
    assert_eq!(c.missing_uuid, 1);
    assert_eq!(c.unknown_tag, 1);
    assert_eq!(c.undecodable, 1);
    assert_eq!(c.unknown_owner, 1);
    assert_eq!(server.connection_count(), 1);
    assert_eq!(server.world().owner_count(), 1);
    assert!(server.world().find_owner(OwnerId(99)).is_none());
    assert_eq!(server.world().entity_count(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_clients_stay_isolated() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = bind_ephemeral(ServerConfig::default()).await?;

    let mut a = WorldClient::connect(addr).await?;
    server.accept_one().await?;
    let mut b = WorldClient::connect(addr).await?;
    server.accept_one().await?;

    a.register(OwnerId(1)).await?;
    b.register(OwnerId(2)).await?;
    pump_until(&mut server, WAIT, |s| s.world().owner_count() == 2).await?;

    b.push_pawns([(EntityIndex(0), Vec3::new(5.0, 5.0, 5.0), Some(50.0))])
        .await?;
    pump_until(&mut server, WAIT, |s| s.counters().updates == 1).await?;

    // One message naming both owners, sent by A.
    a.send_update(
        UpdateMsg::new()
            .pawn(OwnerId(1), EntityIndex(0), PawnUpdate::at(1.0, 0.0, 0.0).with_hp(10.0))
            .pawn(OwnerId(1), EntityIndex(1), PawnUpdate::at(2.0, 0.0, 0.0))
            .pawn(OwnerId(2), EntityIndex(1), PawnUpdate::at(9.0, 9.0, 9.0).with_hp(90.0)),
    )
    .await?;
    pump_until(&mut server, WAIT, |s| s.counters().updates == 2).await?;

    let world = server.world();
    let a_owner = world.find_owner(OwnerId(1)).unwrap();
    assert_eq!(a_owner.entity_count(), 2);
    assert!(a_owner.entities().all(|e| e.owner() == OwnerId(1)));
    assert_eq!(a_owner.entity(EntityIndex(0)).unwrap().position, Vec3::new(1.0, 0.0, 0.0));
    assert_eq!(a_owner.entity(EntityIndex(1)).unwrap().position, Vec3::new(2.0, 0.0, 0.0));

    let b_owner = world.find_owner(OwnerId(2)).unwrap();
    assert_eq!(b_owner.entity_count(), 2);
    let b_pawn = b_owner.entity(EntityIndex(0)).unwrap();
    assert_eq!(b_pawn.position, Vec3::new(5.0, 5.0, 5.0));
    assert_eq!(b_pawn.health, Some(50.0));
    assert_eq!(b_pawn.owner(), OwnerId(2));
    let b_new = b_owner.entity(EntityIndex(1)).unwrap();
    assert_eq!(b_new.position, Vec3::new(9.0, 9.0, 9.0));
    assert_eq!(b_new.health, Some(90.0));
    assert_eq!(b_new.owner(), OwnerId(2));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_keeps_owner_and_oversized_frame_closes() -> anyhow::Result<()> {
    init_tracing();
    let cfg = ServerConfig {
        max_frame_len: 128,
        ..Default::default()
    };
    let (mut server, addr) = bind_ephemeral(cfg).await?;

    let mut client = WorldClient::connect(addr).await?;
    server.accept_one().await?;
    client.register(OwnerId(4)).await?;
    pump_until(&mut server, WAIT, |s| s.world().owner_count() == 1).await?;
    drop(client);
    pump_until(&mut server, WAIT, |s| s.connection_count() == 0).await?;
    assert!(server.world().find_owner(OwnerId(4)).is_some());

    let mut noisy = WorldClient::connect(addr).await?;
    server.accept_one().await?;
    noisy.send_bytes(&[b' '; 512]).await?;
    pump_until(&mut server, WAIT, |s| s.connection_count() == 0).await?;
    assert_eq!(server.counters().undecodable, 0);
    assert_eq!(server.world().owner_count(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_pawn_leaves_other_owner_applied() -> anyhow::Result<()> {
    init_tracing();
    let (mut server, addr) = bind_ephemeral(ServerConfig::default()).await?;

    let mut client = WorldClient::connect(addr).await?;
    server.accept_one().await?;
    client.register(OwnerId(1)).await?;
    client.register(OwnerId(2)).await?;
    pump_until(&mut server, WAIT, |s| s.world().owner_count() == 2).await?;

    client
        .send_raw(&json!({
            "t": "update",
            "players": {
                "0": {"uuid": 1, "pawns": {"0": {"x": 16777217, "y": 2, "z": 123456.789}}},
                "1": {"uuid": 2, "pawns": {"0": {"x": 1, "y": 2}}}
            }
        }))
        .await?;
    pump_until(&mut server, WAIT, |s| s.counters().updates == 1).await?;

    let pawn = server
        .world()
        .find_owner(OwnerId(1))
        .and_then(|o| o.entity(EntityIndex(0)))
        .unwrap();
    assert_eq!(pawn.position, Vec3::new(16777217.0, 2.0, 123456.789));
    assert_eq!(server.world().find_owner(OwnerId(2)).unwrap().entity_count(), 0);
    assert_eq!(server.counters().bad_entry, 1);
    assert_eq!(server.counters().undecodable, 0);
    Ok(())
}
