//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMsg {
    /// Request to enter the room lobby
    Join {
        /// Display name
        #[serde(default)]
        name: String,
    },

    /// Steering update
    Input {
        /// Turn intent; anything outside -1..=1 is clamped
        turn: i32,
    },

    /// Start the match from the lobby
    Start,

    /// Request a new match after the previous one ended
    Restart,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMsg {
    /// Bootstrap for a new participant
    Init {
        /// Assigned competitor id
        id: Uuid,
        /// Full state snapshot
        state: Snapshot,
    },

    /// Periodic delta snapshot
    State(Snapshot),

    /// A round is starting now
    GameStart,

    /// Roster and scoreboard
    PlayerList {
        players: BTreeMap<Uuid, RosterEntry>,
    },

    /// A participant disconnected
    PlayerLeft { id: Uuid },

    /// Human-readable notice for the initiating participant
    Notice { message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// World snapshot, full or delta
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    /// Per-competitor state
    #[serde(rename = "p")]
    pub players: BTreeMap<Uuid, CompetitorSnapshot>,
    #[serde(rename = "ra")]
    pub round_active: bool,
    /// Countdown seconds remaining, 0 when not counting down
    #[serde(rename = "cd")]
    pub countdown: u32,
    /// Unix millis when the current round started
    #[serde(rename = "rs")]
    pub round_start: Option<u64>,
    #[serde(rename = "mw")]
    pub match_winner: Option<Uuid>,
    /// Unix millis when the snapshot was built
    #[serde(rename = "st")]
    pub server_time: u64,
}

/// Competitor state in a snapshot.
///
/// Positions are fixed point with one decimal (`round(v * 10)`), heading with
/// three (`round(v * 1000)`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompetitorSnapshot {
    pub x: i32,
    pub y: i32,
    #[serde(rename = "h")]
    pub heading: i32,
    #[serde(rename = "t")]
    pub turn: i8,
    /// Trail length
    #[serde(rename = "tl")]
    pub trail_len: u32,
    /// Trail ring start
    #[serde(rename = "ts")]
    pub trail_start: u32,
    /// Samples already transmitted before this snapshot
    #[serde(rename = "tc")]
    pub trail_sent: u32,
    #[serde(rename = "al")]
    pub alive: bool,
    #[serde(rename = "sc")]
    pub score: u32,
    #[serde(rename = "lv")]
    pub lives: u32,
    /// New trail samples as flattened fixed-point x,y pairs
    #[serde(rename = "nt", skip_serializing_if = "Option::is_none")]
    pub new_trail: Option<Vec<i32>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(rename = "n", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "c", skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(rename = "sp", skip_serializing_if = "Option::is_none")]
    pub spawn_slot: Option<u8>,
}

/// Scoreboard entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub score: u32,
    pub lives: u32,
    pub color: String,
    pub alive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_parse() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"input","turn":-1}"#).unwrap();
        assert!(matches!(msg, ClientMsg::Input { turn: -1 }));

        let msg: ClientMsg = serde_json::from_str(r#"{"type":"join","name":"neo"}"#).unwrap();
        assert!(matches!(msg, ClientMsg::Join { name } if name == "neo"));

        let msg: ClientMsg = serde_json::from_str(r#"{"type":"join"}"#).unwrap();
        assert!(matches!(msg, ClientMsg::Join { name } if name.is_empty()));

        let msg: ClientMsg = serde_json::from_str(r#"{"type":"restart"}"#).unwrap();
        assert!(matches!(msg, ClientMsg::Restart));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"teleport"}"#).is_err());
    }

    #[test]
    fn test_state_uses_short_keys_and_skips_absent_fields() {
        let mut snapshot = Snapshot {
            round_active: true,
            countdown: 0,
            server_time: 42,
            ..Default::default()
        };
        let id = Uuid::nil();
        snapshot.players.insert(
            id,
            CompetitorSnapshot {
                x: 1234,
                y: 56,
                heading: 785,
                trail_len: 3,
                alive: true,
                lives: 6,
                ..Default::default()
            },
        );

        let json = serde_json::to_value(ServerMsg::State(snapshot.clone())).unwrap();
        assert_eq!(json["type"], "state");
        assert_eq!(json["ra"], true);
        let player = &json["p"][id.to_string()];
        assert_eq!(player["x"], 1234);
        assert_eq!(player["h"], 785);
        assert_eq!(player["tl"], 3);
        assert!(player.get("nt").is_none());
        assert!(player.get("n").is_none());

        let back: ServerMsg = serde_json::from_value(json).unwrap();
        assert!(matches!(back, ServerMsg::State(s) if s == snapshot));
    }

    #[test]
    fn test_snapshot_tolerates_missing_fields() {
        let snapshot: Snapshot =
            serde_json::from_str(r#"{"p":{"00000000-0000-0000-0000-000000000000":{"x":5}}}"#)
                .unwrap();
        let player = &snapshot.players[&Uuid::nil()];
        assert_eq!(player.x, 5);
        assert_eq!(player.trail_len, 0);
        assert!(player.new_trail.is_none());
        assert!(!snapshot.round_active);
    }
}
