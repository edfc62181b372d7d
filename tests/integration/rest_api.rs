//! Integration tests for the REST surface: history, deletes, group
//! membership and media records.

use std::net::SocketAddr;
use std::sync::Arc;

use linkroom_relay::http::{USER_HEADER, start_server_with_state};
use linkroom_relay::state::RelayState;
use reqwest::StatusCode;
use serde_json::{Value, json};

struct Api {
    base: String,
    http: reqwest::Client,
}

impl Api {
    async fn start() -> Self {
        let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::new(RelayState::new()))
            .await
            .expect("failed to start relay server");
        Self::at(addr)
    }

    fn at(addr: SocketAddr) -> Self {
        Self {
            base: format!("http://{addr}"),
            http: reqwest::Client::new(),
        }
    }

    async fn get(&self, user: &str, path: &str) -> (StatusCode, Value) {
        let response = self
            .http
            .get(format!("{}{path}", self.base))
            .header(USER_HEADER, user)
            .send()
            .await
            .unwrap();
        read(response).await
    }

    async fn post(&self, user: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .http
            .post(format!("{}{path}", self.base))
            .header(USER_HEADER, user)
            .json(&body)
            .send()
            .await
            .unwrap();
        read(response).await
    }

    async fn delete(&self, user: &str, path: &str) -> (StatusCode, Value) {
        let response = self
            .http
            .delete(format!("{}{path}", self.base))
            .header(USER_HEADER, user)
            .send()
            .await
            .unwrap();
        read(response).await
    }

    /// Creates a group owned by `creator` and returns its id.
    async fn group(&self, creator: &str, members: &[&str]) -> String {
        let (status, group) = self
            .post(creator, "/api/groups", json!({"name": "weekend hike"}))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = group["id"].as_str().unwrap().to_string();
        if !members.is_empty() {
            let (status, _) = self
                .post(
                    creator,
                    &format!("/api/groups/{id}/members"),
                    json!({"memberIds": members}),
                )
                .await;
            assert_eq!(status, StatusCode::OK);
        }
        id
    }

    async fn send(&self, user: &str, room: &str, content: &str) -> Value {
        let (status, body) = self
            .post(
                user,
                &format!("/api/rooms/{room}/messages"),
                json!({"content": content}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }
}

async fn read(response: reqwest::Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = response.json().await.unwrap_or(Value::Null);
    (status, body)
}

fn contents(page: &Value) -> Vec<String> {
    page["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap().to_string())
        .collect()
}

// =============================================================================
// Basics
// =============================================================================

#[tokio::test]
async fn health_needs_no_identity() {
    let api = Api::start().await;
    let body: Value = api
        .http
        .get(format!("{}/api/health", api.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn missing_identity_rejected() {
    let api = Api::start().await;
    let response = api
        .http
        .get(format!("{}/api/groups", api.base))
        .send()
        .await
        .unwrap();
    let (status, body) = read(response).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "notAuthenticated");
}

// =============================================================================
// Groups
// =============================================================================

#[tokio::test]
async fn create_group_and_manage_members() {
    let api = Api::start().await;
    let (status, group) = api
        .post(
            "alice",
            "/api/groups",
            json!({"name": "  climbing  ", "description": "tuesdays"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(group["name"], "climbing");
    assert_eq!(group["creator"], "alice");
    assert_eq!(group["members"], json!(["alice"]));
    let id = group["id"].as_str().unwrap();
    assert_eq!(group["roomId"], format!("group:{id}"));

    let (status, body) = api
        .post(
            "alice",
            &format!("/api/groups/{id}/members"),
            json!({"memberIds": ["bob", "carol", "bob"]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], json!(["bob", "carol"]));
    assert_eq!(body["members"], json!(["alice", "bob", "carol"]));

    let (status, members) = api.get("bob", &format!("/api/groups/{id}/members")).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = members
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["alice", "bob", "carol"]);
    assert_eq!(members[1]["displayName"], "Unknown");

    let (_, mine) = api.get("carol", "/api/groups").await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    let (_, theirs) = api.get("dave", "/api/groups").await;
    assert!(theirs.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn blank_group_name_rejected() {
    let api = Api::start().await;
    let (status, body) = api.post("alice", "/api/groups", json!({"name": "   "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalidArgument");
}

#[tokio::test]
async fn malformed_json_body_rejected_with_error_body() {
    let api = Api::start().await;
    let response = api
        .http
        .post(format!("{}/api/groups", api.base))
        .header(USER_HEADER, "alice")
        .header("content-type", "application/json")
        .body("{\"name\": ")
        .send()
        .await
        .unwrap();
    let (status, body) = read(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalidArgument");
    assert!(body["message"].is_string());

    let (status, body) = api
        .post("alice", "/api/groups", json!({"name": 42}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalidArgument");
}

#[tokio::test]
async fn malformed_history_query_rejected_with_error_body() {
    let api = Api::start().await;
    let id = api.group("alice", &[]).await;

    let (status, body) = api
        .get("alice", &format!("/api/rooms/group:{id}/messages?page=abc"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalidArgument");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn creator_cannot_be_removed() {
    let api = Api::start().await;
    let id = api.group("alice", &["bob"]).await;

    let (status, body) = api
        .delete("alice", &format!("/api/groups/{id}/members/alice"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (_, group) = api.get("alice", &format!("/api/groups/{id}")).await;
    assert_eq!(group["members"], json!(["alice", "bob"]));
}

#[tokio::test]
async fn members_can_leave_and_be_removed() {
    let api = Api::start().await;
    let id = api.group("alice", &["bob", "carol"]).await;

    let (status, body) = api
        .delete("bob", &format!("/api/groups/{id}/members/bob"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);

    let (status, body) = api
        .delete("alice", &format!("/api/groups/{id}/members/carol"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);

    // Outsiders cannot add themselves.
    let (status, _) = api
        .post(
            "bob",
            &format!("/api/groups/{id}/members"),
            json!({"memberIds": ["bob"]}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_group_not_found() {
    let api = Api::start().await;

    let (status, body) = api.get("alice", "/api/groups/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "roomNotFound");

    let (status, _) = api.get("alice", "/api/rooms/group:nope/messages").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// History
// =============================================================================

#[tokio::test]
async fn new_group_has_empty_history() {
    let api = Api::start().await;
    let id = api.group("alice", &[]).await;

    let (status, page) = api
        .get("alice", &format!("/api/rooms/group:{id}/messages"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["page"], 1);
    assert_eq!(page["pageSize"], 20);
    assert!(page["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn direct_room_without_history_not_found() {
    let api = Api::start().await;
    let (status, _) = api.get("alice", "/api/rooms/dm:alice:bob/messages").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn history_pages_newest_first() {
    let api = Api::start().await;
    let id = api.group("alice", &["bob"]).await;
    let room = format!("group:{id}");
    for i in 0..25 {
        api.send("alice", &room, &format!("m{i}")).await;
    }

    let (_, first) = api.get("bob", &format!("/api/rooms/{room}/messages")).await;
    let first = contents(&first);
    assert_eq!(first.len(), 20);
    assert_eq!(first[0], "m24");
    assert_eq!(first[19], "m5");

    let (_, second) = api
        .get("bob", &format!("/api/rooms/{room}/messages?page=2"))
        .await;
    assert_eq!(contents(&second), ["m4", "m3", "m2", "m1", "m0"]);

    let (_, small) = api
        .get("bob", &format!("/api/rooms/{room}/messages?page=3&limit=10"))
        .await;
    assert_eq!(small["pageSize"], 10);
    assert_eq!(contents(&small).len(), 5);

    let (_, past_end) = api
        .get("bob", &format!("/api/rooms/{room}/messages?page=9"))
        .await;
    assert!(contents(&past_end).is_empty());

    let (status, body) = api
        .get("bob", &format!("/api/rooms/{room}/messages?page=0"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalidArgument");
}

#[tokio::test]
async fn history_hidden_from_outsiders() {
    let api = Api::start().await;
    let id = api.group("alice", &[]).await;
    api.send("alice", &format!("group:{id}"), "private").await;

    let (status, body) = api
        .get("eve", &format!("/api/rooms/group:{id}/messages"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    api.send("alice", "dm:alice:bob", "psst").await;
    let (status, _) = api.get("eve", "/api/rooms/dm:alice:bob/messages").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn concurrent_sends_both_recorded_in_stable_order() {
    let api = Api::start().await;
    let id = api.group("alice", &["bob"]).await;
    let room = format!("group:{id}");

    let (a, b) = tokio::join!(
        api.send("alice", &room, "from alice"),
        api.send("bob", &room, "from bob"),
    );
    assert_ne!(a["message"]["id"], b["message"]["id"]);
    assert_ne!(a["message"]["seq"], b["message"]["seq"]);

    let path = format!("/api/rooms/{room}/messages");
    let (_, first) = api.get("alice", &path).await;
    let order = contents(&first);
    assert_eq!(order.len(), 2);
    assert!(order.contains(&"from alice".to_string()));
    assert!(order.contains(&"from bob".to_string()));

    for _ in 0..5 {
        let (_, again) = api.get("bob", &path).await;
        assert_eq!(contents(&again), order);
    }
}

#[tokio::test]
async fn spoofed_sender_rejected_over_rest() {
    let api = Api::start().await;
    let (status, body) = api
        .post(
            "mallory",
            "/api/rooms/dm:bob:mallory/messages",
            json!({"senderId": "bob", "content": "hi"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
}

// =============================================================================
// Deletes
// =============================================================================

#[tokio::test]
async fn delete_selected_with_no_ids_rejected() {
    let api = Api::start().await;
    let id = api.group("alice", &[]).await;
    let room = format!("group:{id}");
    api.send("alice", &room, "keep me").await;

    let (status, body) = api
        .post(
            "alice",
            &format!("/api/rooms/{room}/messages/delete-selected"),
            json!({"messageIds": []}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalidArgument");

    let (_, page) = api.get("alice", &format!("/api/rooms/{room}/messages")).await;
    assert_eq!(contents(&page), ["keep me"]);
}

#[tokio::test]
async fn delete_selected_removes_only_listed() {
    let api = Api::start().await;
    let id = api.group("alice", &[]).await;
    let room = format!("group:{id}");
    let first = api.send("alice", &room, "one").await;
    api.send("alice", &room, "two").await;
    let third = api.send("alice", &room, "three").await;

    let (status, body) = api
        .post(
            "alice",
            &format!("/api/rooms/{room}/messages/delete-selected"),
            json!({"messageIds": [first["message"]["id"], third["message"]["id"]]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 2);

    let (_, page) = api.get("alice", &format!("/api/rooms/{room}/messages")).await;
    assert_eq!(contents(&page), ["two"]);
}

#[tokio::test]
async fn delete_all_keeps_room_readable() {
    let api = Api::start().await;
    api.send("alice", "dm:alice:bob", "one").await;
    api.send("bob", "dm:alice:bob", "two").await;

    let (status, body) = api.delete("alice", "/api/rooms/dm:alice:bob/messages").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 2);

    let (status, page) = api.get("bob", "/api/rooms/dm:alice:bob/messages").await;
    assert_eq!(status, StatusCode::OK);
    assert!(contents(&page).is_empty());
}

// =============================================================================
// Media
// =============================================================================

#[tokio::test]
async fn media_reference_recorded_in_upload_order() {
    let api = Api::start().await;
    let id = api.group("alice", &["bob"]).await;
    let path = format!("/api/groups/{id}/media");

    let (status, record) = api
        .post(
            "alice",
            &path,
            json!({"url": "https://cdn.example/cat.png", "kind": "image"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(record["uploadedBy"], "alice");

    let response = api
        .http
        .post(format!("{}{path}", api.base))
        .header(USER_HEADER, "bob")
        .header(reqwest::header::CONTENT_TYPE, "video/mp4")
        .body(vec![0_u8, 1, 2, 3])
        .send()
        .await
        .unwrap();
    let (status, blob) = read(response).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(blob["kind"], "video");
    assert!(blob["url"].as_str().unwrap().starts_with("/uploads/"));

    let (status, listed) = api.get("bob", &path).await;
    assert_eq!(status, StatusCode::OK);
    let urls: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["url"].as_str().unwrap())
        .collect();
    assert_eq!(urls, ["https://cdn.example/cat.png", blob["url"].as_str().unwrap()]);
}

#[tokio::test]
async fn media_upload_requires_membership_and_content() {
    let api = Api::start().await;
    let id = api.group("alice", &[]).await;
    let path = format!("/api/groups/{id}/media");

    let (status, _) = api
        .post("eve", &path, json!({"url": "https://x/y.png", "kind": "image"}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let response = api
        .http
        .post(format!("{}{path}", api.base))
        .header(USER_HEADER, "alice")
        .header(reqwest::header::CONTENT_TYPE, "image/png")
        .body(Vec::<u8>::new())
        .send()
        .await
        .unwrap();
    let (status, body) = read(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalidArgument");
}
