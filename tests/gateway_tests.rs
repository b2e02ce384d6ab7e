//! End-to-end tests of the guarded request pipeline over a real socket.
//!
//! A minimal in-process HTTP server plays the Cloz API with scripted
//! responses, so these tests observe exactly what goes over the wire:
//! which endpoints get hit, in what order, and with which credentials.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use url::Url;

use cloz::{
    config::Config,
    error::ErrorKind,
    gateway::{Gateway, HttpAuthConnector},
    http::Client as HttpClient,
    lifecycle::{Navigator, Screen, SessionEvent, SessionManager},
    protocol::{Role, UserRecord},
    state::SessionState,
    store::{keys, CredentialStore, MemoryStore},
};

/// One scripted HTTP response, served in FIFO order.
struct Scripted {
    status: u16,
    body: &'static str,
}

/// What the server saw for one request.
#[derive(Clone, Debug)]
struct Recorded {
    method: String,
    path: String,
    authorization: Option<String>,
    session_id: Option<String>,
}

struct TestServer {
    url: Url,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl TestServer {
    async fn start(responses: Vec<Scripted>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));

        let accept_requests = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let requests = Arc::clone(&accept_requests);
                let queue = Arc::clone(&queue);

                tokio::spawn(async move {
                    let Some(recorded) = read_request(&mut socket).await else {
                        return;
                    };
                    requests.lock().unwrap().push(recorded);

                    let response = queue
                        .lock()
                        .unwrap()
                        .pop_front()
                        .unwrap_or(Scripted {
                            status: 500,
                            body: r#"{"message":"unscripted request"}"#,
                        });
                    let payload = format!(
                        "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        response.status,
                        response.body.len(),
                        response.body,
                    );
                    let _ = socket.write_all(payload.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            url: Url::parse(&format!("http://{addr}/")).unwrap(),
            requests,
        }
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

/// Reads one HTTP/1.1 request (head plus `Content-Length` body).
async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<Recorded> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_head_end(&buffer) {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut authorization = None;
    let mut session_id = None;
    let mut content_length = 0usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match name.to_ascii_lowercase().as_str() {
            "authorization" => authorization = Some(value),
            "x-session-id" => session_id = Some(value),
            "content-length" => content_length = value.parse().unwrap_or(0),
            _ => {}
        }
    }

    // Drain the body so the client finishes writing cleanly.
    let mut body_read = buffer.len() - (head_end + 4);
    while body_read < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body_read += n;
    }

    Some(Recorded {
        method,
        path,
        authorization,
        session_id,
    })
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|window| window == b"\r\n\r\n")
}

struct Harness {
    gateway: Gateway,
    manager: SessionManager,
    store: Arc<MemoryStore>,
    events: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
}

fn alice() -> UserRecord {
    UserRecord {
        username: "alice".to_string(),
        role: Role::User,
        name: None,
        email: None,
        gender: None,
        dark_mode: None,
    }
}

/// Wires a gateway, manager and state against the test server, optionally
/// pre-seeding a signed-in user with session id `sess1`.
async fn harness(server: &TestServer, signed_in: bool) -> Harness {
    let store = Arc::new(MemoryStore::new());
    if signed_in {
        store
            .set(keys::CURRENT_USER, &serde_json::to_string(&alice()).unwrap())
            .await
            .unwrap();
        store.set(keys::SESSION_ID, "sess1").await.unwrap();
    }

    let config = Config::new(server.url.clone());
    let state = SessionState::initialize(Arc::clone(&store) as Arc<dyn CredentialStore>)
        .await
        .unwrap();
    let (navigator, events) = Navigator::new(Screen::Wardrobe);

    let http_client = Arc::new(HttpClient::new(&config).unwrap());
    let connector = Arc::new(HttpAuthConnector::new(Arc::clone(&http_client), &config));
    let manager = SessionManager::new(state.clone(), connector, navigator);
    let gateway = Gateway::new(http_client, &config, state, manager.coordinator().clone());

    Harness {
        gateway,
        manager,
        store,
        events,
    }
}

#[tokio::test]
async fn due_token_is_rotated_before_the_request_goes_out() {
    let server = TestServer::start(vec![
        Scripted {
            status: 200,
            body: r#"{"accessToken":"tok2","expiresIn":300}"#,
        },
        Scripted {
            status: 200,
            body: "[]",
        },
    ])
    .await;
    let harness = harness(&server, true).await;

    // A token whose whole lifetime fits inside the safety buffer is due
    // for refresh the moment it is set.
    harness
        .manager
        .state()
        .set_access_token("tok1", Some(Duration::from_secs(40)))
        .await;

    let items = harness.gateway.list_items().await.unwrap();
    assert!(items.is_empty());

    let requests = server.requests();
    assert_eq!(requests.len(), 2);

    assert_eq!(requests[0].path, "/auth/refresh");
    assert_eq!(requests[0].session_id.as_deref(), Some("sess1"));
    assert_eq!(
        requests[0].authorization, None,
        "the refresh endpoint never carries a bearer token"
    );

    assert_eq!(requests[1].path, "/wardrobe/items");
    assert_eq!(
        requests[1].authorization.as_deref(),
        Some("Bearer tok2"),
        "the request that follows a proactive refresh carries the new token"
    );
}

#[tokio::test]
async fn rejected_request_is_retried_once_with_a_fresh_token() {
    let server = TestServer::start(vec![
        Scripted {
            status: 401,
            body: r#"{"message":"token expired"}"#,
        },
        Scripted {
            status: 200,
            body: r#"{"accessToken":"tok2","expiresIn":300}"#,
        },
        Scripted {
            status: 200,
            body: r#"[{"id":1,"category":"upper","name":"Linen shirt"}]"#,
        },
    ])
    .await;
    let harness = harness(&server, true).await;
    harness
        .manager
        .state()
        .set_access_token("tok1", Some(Duration::from_secs(300)))
        .await;

    let items = harness.gateway.list_items().await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].name, "Linen shirt");

    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer tok1"));
    assert_eq!(requests[1].path, "/auth/refresh");
    assert_eq!(requests[2].authorization.as_deref(), Some("Bearer tok2"));
}

#[tokio::test]
async fn second_rejection_surfaces_without_another_refresh() {
    let server = TestServer::start(vec![
        Scripted {
            status: 401,
            body: r#"{"message":"token expired"}"#,
        },
        Scripted {
            status: 200,
            body: r#"{"accessToken":"tok2","expiresIn":300}"#,
        },
        Scripted {
            status: 401,
            body: r#"{"message":"token revoked"}"#,
        },
    ])
    .await;
    let harness = harness(&server, true).await;
    harness
        .manager
        .state()
        .set_access_token("tok1", Some(Duration::from_secs(300)))
        .await;

    let error = harness.gateway.list_items().await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Unauthenticated);
    assert!(error.to_string().contains("token revoked"));

    // One original call, one refresh, one retry. No loop.
    assert_eq!(server.requests().len(), 3);
}

#[tokio::test]
async fn transient_refresh_failure_surfaces_the_original_rejection() {
    let server = TestServer::start(vec![
        Scripted {
            status: 401,
            body: r#"{"message":"token expired"}"#,
        },
        Scripted {
            status: 503,
            body: r#"{"message":"maintenance"}"#,
        },
    ])
    .await;
    let mut harness = harness(&server, true).await;
    harness
        .manager
        .state()
        .set_access_token("tok1", Some(Duration::from_secs(300)))
        .await;

    let error = harness.gateway.list_items().await.unwrap_err();
    // The caller sees the request's own failure, not the refresh attempt's.
    assert_eq!(error.kind, ErrorKind::Unauthenticated);
    assert!(error.to_string().contains("token expired"));

    // And a transient refresh failure never ends the session.
    assert!(harness.manager.state().is_logged_in());
    assert_eq!(
        harness.store.get(keys::SESSION_ID).await.unwrap().as_deref(),
        Some("sess1")
    );
    assert!(harness.events.try_recv().is_err());
}

#[tokio::test]
async fn session_rejection_during_reactive_refresh_signs_out() {
    let server = TestServer::start(vec![
        Scripted {
            status: 401,
            body: r#"{"message":"token expired"}"#,
        },
        Scripted {
            status: 401,
            body: r#"{"message":"unknown session"}"#,
        },
    ])
    .await;
    let mut harness = harness(&server, true).await;
    harness
        .manager
        .state()
        .set_access_token("tok1", Some(Duration::from_secs(300)))
        .await;

    let error = harness.gateway.list_items().await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Unauthenticated);

    assert!(!harness.manager.state().is_logged_in());
    assert_eq!(harness.store.get(keys::CURRENT_USER).await.unwrap(), None);
    assert_eq!(
        harness.events.try_recv().unwrap(),
        SessionEvent::RedirectToLogin
    );
}

#[tokio::test]
async fn login_grant_is_persisted_end_to_end() {
    let server = TestServer::start(vec![Scripted {
        status: 200,
        body: r#"{
            "accessToken": "tok1",
            "expiresIn": 300,
            "sessionId": "sess9",
            "user": {"username": "alice", "role": "user"}
        }"#,
    }])
    .await;
    let harness = harness(&server, false).await;

    let response = harness.gateway.login("alice", "hunter2").await.unwrap();
    let grant = response.grant.expect("grant");
    harness.manager.complete_authentication(grant).await;

    assert!(harness.manager.state().is_logged_in());
    assert_eq!(
        harness.manager.state().bearer_token().as_deref(),
        Some("tok1")
    );
    assert_eq!(
        harness.store.get(keys::SESSION_ID).await.unwrap().as_deref(),
        Some("sess9")
    );

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/auth/login");
}

#[tokio::test]
async fn mfa_challenge_leaves_the_session_signed_out() {
    let server = TestServer::start(vec![Scripted {
        status: 200,
        body: r#"{"mfaRequired":true}"#,
    }])
    .await;
    let harness = harness(&server, false).await;

    let response = harness.gateway.login("alice", "hunter2").await.unwrap();
    assert!(response.mfa_required);
    assert!(response.grant.is_none());
    assert!(!harness.manager.state().is_logged_in());
}

#[tokio::test]
async fn admin_listing_is_refused_client_side_for_plain_users() {
    let server = TestServer::start(vec![]).await;
    let harness = harness(&server, true).await;

    let error = harness.gateway.list_users().await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::PermissionDenied);
    assert!(server.requests().is_empty(), "refused before the network");
}
