//! Room-based real-time fanout over WebSockets.
//!
//! Clients connect to `GET /ws` with a bearer token (header, or `?token=`)
//! and join rooms; the server pushes [`RealtimeMessage`]s published to those
//! rooms. Delivery is best effort: nothing is persisted, lagging clients skip
//! messages, and publishing to a room nobody joined is a no-op. Rooms are
//! dropped once their last receiver goes.
//!
//! Who may join what is decided by [`Room::admits`]: date rooms are open to
//! any signed-in user, `client:{id}` and `practitioner:{id}` only to that
//! user, and `staff` to admins and front desk. A refused join gets a
//! `join_refused` message back.
//!
//! # Message Protocol
//!
//! **Client → Server:**
//! ```json
//! { "type": "join", "room": "date:2025-06-01" }
//! { "type": "leave", "room": "client:42" }
//! { "type": "ping" }
//! ```
//!
//! **Server → Client:**
//! ```json
//! {
//!   "event": "nueva_cita",
//!   "room": "staff",
//!   "payload": { ... },
//!   "timestamp": "2025-06-01T09:00:00Z"
//! }
//! ```

use crate::extractors::AuthUser;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use chrono::{DateTime, NaiveDate, Utc};
use dentalbook_auth::{AuthenticatedUser, Role};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, info, warn};

/// A broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// Everyone watching one calendar day (availability refresh)
    Date(NaiveDate),
    /// One client's own notifications
    Client(i64),
    /// One practitioner's notifications
    Practitioner(i64),
    /// Front desk and admins
    Staff,
}

impl Room {
    /// `true` if `user` may receive this room's messages.
    #[must_use]
    pub fn admits(&self, user: &AuthenticatedUser) -> bool {
        match self {
            Self::Date(_) => true,
            Self::Client(id) => user.role == Role::Client && user.id == *id,
            Self::Practitioner(id) => user.role == Role::Practitioner && user.id == *id,
            Self::Staff => user.role.is_staff(),
        }
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(date) => write!(f, "date:{}", date.format("%Y-%m-%d")),
            Self::Client(id) => write!(f, "client:{id}"),
            Self::Practitioner(id) => write!(f, "practitioner:{id}"),
            Self::Staff => f.write_str("staff"),
        }
    }
}

impl FromStr for Room {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "staff" {
            return Ok(Self::Staff);
        }
        let (kind, value) = s.split_once(':').ok_or_else(|| format!("Unknown room: {s}"))?;
        match kind {
            "date" => NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(Self::Date)
                .map_err(|_| format!("Invalid date room: {s}")),
            "client" => value
                .parse()
                .map(Self::Client)
                .map_err(|_| format!("Invalid client room: {s}")),
            "practitioner" => value
                .parse()
                .map(Self::Practitioner)
                .map_err(|_| format!("Invalid practitioner room: {s}")),
            _ => Err(format!("Unknown room: {s}")),
        }
    }
}

/// A message pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    /// Event name (`horarios_updated`, `nueva_cita`, ...)
    pub event: String,
    /// Room it was published to
    pub room: String,
    /// Event data
    pub payload: serde_json::Value,
    /// When it was published
    pub timestamp: DateTime<Utc>,
}

impl RealtimeMessage {
    /// Build a message for `room`.
    #[must_use]
    pub fn new(
        event: impl Into<String>,
        room: &Room,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event: event.into(),
            room: room.to_string(),
            payload,
            timestamp,
        }
    }
}

type RoomChannels = Arc<RwLock<HashMap<Room, broadcast::Sender<RealtimeMessage>>>>;

/// Per-room broadcast channels.
///
/// Cheap to clone; clones share the same rooms.
#[derive(Clone, Default)]
pub struct RoomBroadcaster {
    channels: RoomChannels,
}

impl fmt::Debug for RoomBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomBroadcaster").finish_non_exhaustive()
    }
}

impl RoomBroadcaster {
    /// Create a broadcaster with no rooms.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `message` to everyone in `room`; returns how many receivers got it.
    pub async fn publish(&self, room: &Room, message: RealtimeMessage) -> usize {
        let sent = self
            .channels
            .read()
            .await
            .get(room)
            .map(|sender| sender.send(message).ok());
        let delivered = match sent {
            Some(Some(delivered)) => delivered,
            // Every receiver is gone
            Some(None) => {
                self.release(room).await;
                0
            },
            None => 0,
        };

        metrics::counter!("realtime_messages_total").increment(1);
        debug!(room = %room, delivered, "Real-time message published");
        delivered
    }

    /// Build and push a message in one step.
    pub async fn emit(
        &self,
        room: &Room,
        event: &str,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> usize {
        self.publish(room, RealtimeMessage::new(event, room, payload, timestamp))
            .await
    }

    /// Receive everything published to `room` from now on.
    pub async fn subscribe(&self, room: &Room) -> broadcast::Receiver<RealtimeMessage> {
        let mut channels = self.channels.write().await;
        channels
            .entry(room.clone())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe()
    }

    /// Drop `room` if nobody is receiving it any more.
    pub async fn release(&self, room: &Room) {
        let mut channels = self.channels.write().await;
        if channels.get(room).is_some_and(|sender| sender.receiver_count() == 0) {
            channels.remove(room);
            debug!(room = %room, "Real-time room closed");
        }
    }

    /// Number of open rooms.
    pub async fn room_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving a room
    Join {
        /// Room name, e.g. `date:2025-06-01`
        room: String,
    },
    /// Stop receiving a room
    Leave {
        /// Room name
        room: String,
    },
    /// Keep-alive
    Ping,
}

/// `GET /ws` upgrade handler. Unauthenticated upgrades get 401.
#[allow(clippy::unused_async)]
pub async fn ws_handler(
    auth: AuthUser,
    State(broadcaster): State<RoomBroadcaster>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster, auth.user))
}

/// The answer to a join: `joined`, or `join_refused` with a reason.
fn join_reply(room: &str, refusal: Option<&str>) -> RealtimeMessage {
    let (event, payload) = match refusal {
        None => ("joined", serde_json::Value::Null),
        Some(reason) => ("join_refused", serde_json::json!({ "reason": reason })),
    };
    RealtimeMessage {
        event: event.to_string(),
        room: room.to_string(),
        payload,
        timestamp: Utc::now(),
    }
}

async fn leave(broadcaster: &RoomBroadcaster, room: &Room, handle: tokio::task::JoinHandle<()>) {
    handle.abort();
    // The receiver is dropped once the aborted task has finished
    if handle.await.is_err_and(|e| e.is_panic()) {
        warn!(room = %room, "Room forwarder panicked");
    }
    broadcaster.release(room).await;
}

async fn handle_socket(socket: WebSocket, broadcaster: RoomBroadcaster, user: AuthenticatedUser) {
    info!(user_id = user.id, role = %user.role, "Real-time connection established");
    metrics::gauge!("realtime_connections").increment(1.0);

    let (mut sink, mut stream) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<RealtimeMessage>(256);

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let Ok(json) = serde_json::to_string(&message) else {
                continue;
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        let mut joined: HashMap<Room, tokio::task::JoinHandle<()>> = HashMap::new();

        while let Some(Ok(frame)) = stream.next().await {
            match frame {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Join { room: name }) => {
                        let reply = match name.parse::<Room>() {
                            Ok(room) if !room.admits(&user) => {
                                warn!(user_id = user.id, room = %room, "Join refused");
                                join_reply(&name, Some("forbidden"))
                            },
                            Ok(room) => {
                                if !joined.contains_key(&room) {
                                    let rx = broadcaster.subscribe(&room).await;
                                    joined.insert(room.clone(), tokio::spawn(forward(rx, outbound.clone())));
                                    debug!(user_id = user.id, room = %room, "Client joined room");
                                }
                                join_reply(&name, None)
                            },
                            Err(e) => {
                                warn!(error = %e, "Join of an unknown room");
                                join_reply(&name, Some("unknown room"))
                            },
                        };
                        if outbound.send(reply).await.is_err() {
                            break;
                        }
                    },
                    Ok(ClientMessage::Leave { room }) => {
                        if let Some((room, handle)) = room.parse::<Room>().ok().and_then(|r| joined.remove_entry(&r)) {
                            leave(&broadcaster, &room, handle).await;
                            debug!(user_id = user.id, room = %room, "Client left room");
                        }
                    },
                    Ok(ClientMessage::Ping) => {},
                    Err(e) => warn!(error = %e, "Unparseable client frame"),
                },
                Message::Close(_) => break,
                Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {},
            }
        }

        for (room, handle) in joined {
            leave(&broadcaster, &room, handle).await;
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    metrics::gauge!("realtime_connections").decrement(1.0);
    info!("Real-time connection closed");
}

async fn forward(mut rx: broadcast::Receiver<RealtimeMessage>, outbound: mpsc::Sender<RealtimeMessage>) {
    loop {
        match rx.recv().await {
            Ok(message) => {
                if outbound.send(message).await.is_err() {
                    return;
                }
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Client lagging, skipped real-time messages");
            },
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::extractors::AuthState;
    use axum::{Router, async_trait, extract::FromRef, routing::get};
    use dentalbook_auth::{AuthError, TokenValidator};
    use std::time::Duration;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn user(id: i64, role: Role) -> AuthenticatedUser {
        AuthenticatedUser {
            id,
            email: format!("user{id}@example.com"),
            role,
            name: "Test".to_string(),
            surname: "User".to_string(),
        }
    }

    /// Tokens look like `client-4` or `front_desk-2`.
    struct RoleTokens;

    #[async_trait]
    impl TokenValidator for RoleTokens {
        async fn validate(&self, token: &str) -> dentalbook_auth::Result<AuthenticatedUser> {
            let invalid = || AuthError::InvalidToken(token.to_string());
            let (role, id) = token.rsplit_once('-').ok_or_else(invalid)?;
            Ok(user(id.parse().map_err(|_| invalid())?, role.parse().map_err(|_| invalid())?))
        }
    }

    #[derive(Clone)]
    struct SocketState {
        auth: AuthState,
        rooms: RoomBroadcaster,
    }

    impl FromRef<SocketState> for AuthState {
        fn from_ref(state: &SocketState) -> Self {
            state.auth.clone()
        }
    }

    impl FromRef<SocketState> for RoomBroadcaster {
        fn from_ref(state: &SocketState) -> Self {
            state.rooms.clone()
        }
    }

    fn router(rooms: RoomBroadcaster) -> Router {
        Router::new().route("/ws", get(ws_handler)).with_state(SocketState {
            auth: AuthState::new(Arc::new(RoleTokens), "svc-key"),
            rooms,
        })
    }

    type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    /// Serve the rooms on an ephemeral port and connect with `token`.
    async fn connect(rooms: &RoomBroadcaster, token: &str) -> Socket {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(rooms.clone());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let (socket, _) = connect_async(format!("ws://{addr}/ws?token={token}")).await.unwrap();
        socket
    }

    async fn send(socket: &mut Socket, frame: serde_json::Value) {
        socket
            .send(tungstenite::Message::Text(frame.to_string()))
            .await
            .unwrap();
    }

    async fn next_message(socket: &mut Socket) -> RealtimeMessage {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
                .await
                .expect("no frame within 5s")
                .unwrap()
                .unwrap();
            if let tungstenite::Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn wait_for_rooms(rooms: &RoomBroadcaster, expected: usize) {
        for _ in 0..100 {
            if rooms.room_count().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(rooms.room_count().await, expected);
    }

    #[test]
    fn rooms_admit_their_owner_and_staff_room_admits_staff() {
        let client = user(4, Role::Client);
        let practitioner = user(7, Role::Practitioner);
        let desk = user(2, Role::FrontDesk);
        let admin = user(1, Role::Admin);

        assert!(Room::Client(4).admits(&client));
        assert!(!Room::Client(5).admits(&client));
        assert!(!Room::Client(7).admits(&practitioner));
        assert!(Room::Practitioner(7).admits(&practitioner));
        assert!(!Room::Practitioner(4).admits(&client));
        assert!(Room::Staff.admits(&desk));
        assert!(Room::Staff.admits(&admin));
        assert!(!Room::Staff.admits(&client));
        assert!(!Room::Staff.admits(&practitioner));
        assert!(Room::Date(day("2025-06-01")).admits(&client));
    }

    #[tokio::test]
    async fn rooms_close_when_their_receivers_are_dropped() {
        let broadcaster = RoomBroadcaster::new();
        let staff = broadcaster.subscribe(&Room::Staff).await;
        let client = broadcaster.subscribe(&Room::Client(4)).await;
        let second = broadcaster.subscribe(&Room::Client(4)).await;
        assert_eq!(broadcaster.room_count().await, 2);

        drop(client);
        broadcaster.release(&Room::Client(4)).await;
        assert_eq!(broadcaster.room_count().await, 2);

        drop(second);
        broadcaster.release(&Room::Client(4)).await;
        assert_eq!(broadcaster.room_count().await, 1);

        drop(staff);
        let delivered = broadcaster
            .emit(&Room::Staff, "nueva_cita", serde_json::Value::Null, Utc::now())
            .await;
        assert_eq!(delivered, 0);
        assert_eq!(broadcaster.room_count().await, 0);
    }

    #[tokio::test]
    async fn upgrade_without_a_token_is_unauthorized() {
        use axum::http::{Request, StatusCode};
        use tower::ServiceExt;

        let response = router(RoomBroadcaster::new())
            .oneshot(
                Request::builder()
                    .uri("/ws")
                    .header("Connection", "upgrade")
                    .header("Upgrade", "websocket")
                    .header("Sec-WebSocket-Version", "13")
                    .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn socket_joins_receives_and_leaves() {
        let rooms = RoomBroadcaster::new();
        let mut socket = connect(&rooms, "client-4").await;

        send(&mut socket, serde_json::json!({ "type": "join", "room": "client:4" })).await;
        let ack = next_message(&mut socket).await;
        assert_eq!((ack.event.as_str(), ack.room.as_str()), ("joined", "client:4"));

        let delivered = rooms
            .emit(&Room::Client(4), "cita_confirmada", serde_json::json!({ "id": 9 }), Utc::now())
            .await;
        assert_eq!(delivered, 1);
        let pushed = next_message(&mut socket).await;
        assert_eq!(pushed.event, "cita_confirmada");
        assert_eq!(pushed.payload["id"], 9);

        send(&mut socket, serde_json::json!({ "type": "leave", "room": "client:4" })).await;
        wait_for_rooms(&rooms, 0).await;
    }

    #[tokio::test]
    async fn socket_refuses_rooms_the_caller_may_not_see() {
        let rooms = RoomBroadcaster::new();
        let mut socket = connect(&rooms, "client-4").await;

        for room in ["staff", "client:5", "practitioner:4"] {
            send(&mut socket, serde_json::json!({ "type": "join", "room": room })).await;
            let reply = next_message(&mut socket).await;
            assert_eq!(reply.event, "join_refused");
            assert_eq!(reply.room, room);
        }
        assert_eq!(rooms.room_count().await, 0);

        let delivered = rooms
            .emit(&Room::Staff, "nueva_cita", serde_json::Value::Null, Utc::now())
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn closing_the_socket_closes_its_rooms() {
        let rooms = RoomBroadcaster::new();
        let mut socket = connect(&rooms, "front_desk-2").await;

        send(&mut socket, serde_json::json!({ "type": "join", "room": "staff" })).await;
        assert_eq!(next_message(&mut socket).await.event, "joined");
        assert_eq!(rooms.room_count().await, 1);

        socket.close(None).await.unwrap();
        wait_for_rooms(&rooms, 0).await;
    }

    #[test]
    fn room_names_round_trip() {
        for room in [
            Room::Date(day("2025-06-01")),
            Room::Client(42),
            Room::Practitioner(7),
            Room::Staff,
        ] {
            assert_eq!(room.to_string().parse::<Room>().unwrap(), room);
        }
        assert_eq!(Room::Date(day("2025-06-01")).to_string(), "date:2025-06-01");
        assert!("date:tomorrow".parse::<Room>().is_err());
        assert!("lobby".parse::<Room>().is_err());
    }

    #[tokio::test]
    async fn messages_reach_only_their_room() {
        let broadcaster = RoomBroadcaster::new();
        let mut staff = broadcaster.subscribe(&Room::Staff).await;
        let mut client = broadcaster.subscribe(&Room::Client(4)).await;

        let delivered = broadcaster
            .emit(&Room::Staff, "nueva_cita", serde_json::json!({ "id": 1 }), Utc::now())
            .await;

        assert_eq!(delivered, 1);
        let message = staff.recv().await.unwrap();
        assert_eq!(message.event, "nueva_cita");
        assert_eq!(message.room, "staff");
        assert_eq!(message.payload["id"], 1);
        assert!(client.try_recv().is_err());
    }

    #[tokio::test]
    async fn publishing_to_an_empty_room_is_silent() {
        let broadcaster = RoomBroadcaster::new();
        let delivered = broadcaster
            .emit(&Room::Practitioner(9), "cita_asignada", serde_json::Value::Null, Utc::now())
            .await;
        assert_eq!(delivered, 0);
        assert_eq!(broadcaster.room_count().await, 0);
    }

    #[test]
    fn client_frames_parse() {
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"join","room":"staff"}"#).unwrap(),
            ClientMessage::Join {
                room: "staff".to_string()
            }
        );
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
    }
}
