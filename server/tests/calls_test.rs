//! Call bridge HTTP surface and join flow.

mod helpers;

use std::time::Duration;

use chapper_server::config::Config;
use helpers::{next_json, spawn_test_server, spawn_test_server_with, TestServer};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;

fn join_url(server: &TestServer, room: &str, username: &str, token: &str) -> String {
    server.ws_url(&format!("/calls/join/{room}?username={username}&token={token}"))
}

async fn join_status(url: String) -> u16 {
    match connect_async(url).await {
        Err(WsError::Http(response)) => response.status().as_u16(),
        Err(e) => panic!("Unexpected join error: {e}"),
        Ok(_) => 101,
    }
}

async fn wait_for_rooms(server: &TestServer, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while server.state.bridge.room_count().await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Room count never settled");
}

#[tokio::test]
async fn test_health() {
    let server = spawn_test_server().await;

    let body: serde_json::Value = reqwest::get(format!("{}/health", server.url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["rooms"], 0);
}

#[tokio::test]
async fn test_call_token_requires_valid_bearer() {
    let server = spawn_test_server().await;
    let client = reqwest::Client::new();

    let missing = client
        .get(format!("{}/calls/token", server.url))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 401);

    let forged = client
        .get(format!("{}/calls/token", server.url))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(forged.status(), 401);
    let body: serde_json::Value = forged.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_TOKEN");

    assert!(!server.fetch_token("/calls/token", "alice").await.is_empty());
}

#[tokio::test]
async fn test_join_with_bad_token_is_rejected_before_upgrade() {
    let server = spawn_test_server().await;
    let _ = server.fetch_token("/calls/token", "alice").await;

    assert_eq!(join_status(join_url(&server, "r1", "alice", "forged")).await, 401);
    assert_eq!(join_status(join_url(&server, "r1", "", "")).await, 401);
    assert_eq!(server.state.bridge.room_count().await, 0);
}

#[tokio::test]
async fn test_join_announces_identity_and_reaps_room_on_leave() {
    let server = spawn_test_server().await;
    let token = server.fetch_token("/calls/token", "alice").await;

    let (mut socket, _) = connect_async(join_url(&server, "r1", "alice", &token))
        .await
        .expect("Join failed");

    let user = next_json(&mut socket).await;
    assert_eq!(user["type"], "user");
    assert_eq!(user["user"]["username"], "alice");
    assert_eq!(user["user"]["mute"], false);
    assert_eq!(server.state.bridge.room_count().await, 1);

    // The token was consumed by the join.
    assert_eq!(join_status(join_url(&server, "r1", "alice", &token)).await, 401);

    drop(socket);
    wait_for_rooms(&server, 0).await;
}

#[tokio::test]
async fn test_second_participant_is_announced() {
    let server = spawn_test_server().await;
    let alice_token = server.fetch_token("/calls/token", "alice").await;
    let bob_token = server.fetch_token("/calls/token", "bob").await;

    let (mut alice, _) = connect_async(join_url(&server, "r1", "alice", &alice_token))
        .await
        .unwrap();
    assert_eq!(next_json(&mut alice).await["type"], "user");

    let (mut bob, _) = connect_async(join_url(&server, "r1", "bob", &bob_token))
        .await
        .unwrap();
    let bob_user = next_json(&mut bob).await;
    assert_eq!(bob_user["type"], "user");

    let join = next_json(&mut alice).await;
    assert_eq!(join["type"], "join");
    assert_eq!(join["user"]["id"], bob_user["user"]["id"]);

    drop(bob);
    let leave = next_json(&mut alice).await;
    assert_eq!(leave["type"], "leave");
    assert_eq!(leave["user"]["username"], "bob");
}

#[tokio::test]
async fn test_remove_room() {
    let server = spawn_test_server().await;
    let client = reqwest::Client::new();
    let bearer = server.bearer("admin");

    let missing = client
        .delete(format!("{}/calls/nowhere", server.url))
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    let body: serde_json::Value = missing.json().await.unwrap();
    assert_eq!(body["code"], "NO_SUCH_ROOM");

    server.state.bridge.add_room("r1").await.unwrap();
    let removed = client
        .delete(format!("{}/calls/r1", server.url))
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap();
    assert_eq!(removed.status(), 204);
    assert_eq!(server.state.bridge.room_count().await, 0);
}

#[tokio::test]
async fn test_ice_servers() {
    let mut config = Config::default_for_test();
    config.turn_enabled = true;
    config.turn_public_ip = "203.0.113.7".into();
    config.turn_username = Some("relay".into());
    config.turn_credential = Some("secret".into());
    let server = spawn_test_server_with(config).await;

    let body: serde_json::Value = reqwest::Client::new()
        .get(format!("{}/calls/ice-servers", server.url))
        .bearer_auth(server.bearer("alice"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let servers = body["ice_servers"].as_array().unwrap();
    assert_eq!(servers.len(), 2);
    assert_eq!(servers[0]["urls"][0], "stun:stun.l.google.com:19302");
    assert!(servers[0].get("username").is_none());
    assert_eq!(servers[1]["urls"][0], "turn:203.0.113.7:50554?transport=udp");
    assert_eq!(servers[1]["username"], "relay");
    assert_eq!(servers[1]["credential"], "secret");
}
