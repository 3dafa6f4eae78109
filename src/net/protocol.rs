use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::game::dispatch::{ActionResponse, GameAction};
use crate::game::error::ErrorKind;
use crate::game::snapshot::SessionSnapshot;
use crate::game::state::{Color, GameMode, GameSettings, SessionId, UserId};
use crate::lobby::manager::NegotiationSnapshot;
use crate::lobby::negotiation::NegotiationId;
use crate::lobby::player::{UserRecord, UserStatus};

/// Lobby-level commands; everything else on the wire is a [`GameAction`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum LobbyCommand {
    /// First message on a connection: binds it to an identity
    Hello {
        user_id: UserId,
        nickname: String,
    },
    ChallengeUser {
        opponent_id: UserId,
        mode: GameMode,
        #[serde(default)]
        settings: GameSettings,
        #[serde(default)]
        ranked: bool,
    },
    SendChallenge {
        negotiation_id: NegotiationId,
        #[serde(default)]
        settings: GameSettings,
    },
    UpdateNegotiation {
        negotiation_id: NegotiationId,
        settings: GameSettings,
    },
    AcceptNegotiation {
        negotiation_id: NegotiationId,
    },
    DeclineNegotiation {
        negotiation_id: NegotiationId,
    },
    RequestRematch {
        game_id: SessionId,
    },
    SpectateGame {
        game_id: SessionId,
    },
    LeaveSpectate {
        game_id: SessionId,
    },
    EnterWaitingRoom {},
    LeaveWaitingRoom {},
    StartAiGame {
        mode: GameMode,
        #[serde(default)]
        settings: GameSettings,
        ai_color: Color,
        /// Tower floor; a plain AI game when absent
        #[serde(default)]
        floor: Option<u32>,
    },
}

impl LobbyCommand {
    /// Wire tags routed to the lobby rather than a session
    pub const TAGS: &'static [&'static str] = &[
        "HELLO",
        "CHALLENGE_USER",
        "SEND_CHALLENGE",
        "UPDATE_NEGOTIATION",
        "ACCEPT_NEGOTIATION",
        "DECLINE_NEGOTIATION",
        "REQUEST_REMATCH",
        "SPECTATE_GAME",
        "LEAVE_SPECTATE",
        "ENTER_WAITING_ROOM",
        "LEAVE_WAITING_ROOM",
        "START_AI_GAME",
    ];
}

/// A decoded inbound command
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Lobby(LobbyCommand),
    Game {
        game_id: SessionId,
        action: GameAction,
    },
}

/// Inbound frame: the command plus the client's correlation id
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub request_id: Option<u64>,
    pub command: ClientCommand,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Message has no type tag")]
    MissingType,
    #[error("Game command without a gameId")]
    MissingGameId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameTarget {
    game_id: SessionId,
}

/// Decode `{ "type": TAG, "payload": {...}, "requestId"?: n }`
pub fn decode_command(bytes: &[u8]) -> Result<Envelope, ProtocolError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let request_id = value.get("requestId").and_then(serde_json::Value::as_u64);
    let tag = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(ProtocolError::MissingType)?;

    let command = if LobbyCommand::TAGS.contains(&tag) {
        ClientCommand::Lobby(LobbyCommand::deserialize(&value)?)
    } else {
        let target = value
            .get("payload")
            .map(GameTarget::deserialize)
            .transpose()
            .map_err(|_| ProtocolError::MissingGameId)?
            .ok_or(ProtocolError::MissingGameId)?;
        ClientCommand::Game {
            game_id: target.game_id,
            action: GameAction::deserialize(&value)?,
        }
    };

    Ok(Envelope {
        request_id,
        command,
    })
}

/// `clientResponse` body of a successful command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClientResponse {
    Action(ActionResponse),
    #[serde(rename_all = "camelCase")]
    Negotiation { negotiation_id: NegotiationId },
    #[serde(rename_all = "camelCase")]
    Game { game_id: SessionId },
    /// Reply to `HELLO`
    User { user: UserRecord },
}

impl From<ActionResponse> for ClientResponse {
    fn from(response: ActionResponse) -> Self {
        ClientResponse::Action(response)
    }
}

/// Reply to one command: `{ clientResponse }` or `{ error, kind }`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_response: Option<ClientResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl CommandReply {
    pub fn ok(request_id: Option<u64>, response: impl Into<ClientResponse>) -> Self {
        Self {
            request_id,
            client_response: Some(response.into()),
            error: None,
            kind: None,
        }
    }

    pub fn err(request_id: Option<u64>, error: impl ToString, kind: ErrorKind) -> Self {
        Self {
            request_id,
            client_response: None,
            error: Some(error.to_string()),
            kind: Some(kind),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Pushes from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    GameUpdate(Box<SessionSnapshot>),
    NegotiationUpdate(NegotiationSnapshot),
    UserStatusUpdate {
        user_statuses: HashMap<UserId, UserStatus>,
    },
    NegotiationDeclined {
        negotiation_id: NegotiationId,
        declined_by: UserId,
    },
    CommandResult(CommandReply),
}

impl ServerMessage {
    pub fn tag(&self) -> &'static str {
        match self {
            ServerMessage::GameUpdate(_) => "GAME_UPDATE",
            ServerMessage::NegotiationUpdate(_) => "NEGOTIATION_UPDATE",
            ServerMessage::UserStatusUpdate { .. } => "USER_STATUS_UPDATE",
            ServerMessage::NegotiationDeclined { .. } => "NEGOTIATION_DECLINED",
            ServerMessage::CommandResult(_) => "COMMAND_RESULT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::error::ErrorKind;
    use uuid::Uuid;

    #[test]
    fn test_decode_lobby_command() {
        let opponent = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"CHALLENGE_USER","payload":{{"opponentId":"{}","mode":"capture"}},"requestId":7}}"#,
            opponent
        );
        let envelope = decode_command(raw.as_bytes()).unwrap();
        assert_eq!(envelope.request_id, Some(7));
        match envelope.command {
            ClientCommand::Lobby(LobbyCommand::ChallengeUser {
                opponent_id,
                mode,
                settings,
                ranked,
            }) => {
                assert_eq!(opponent_id, opponent);
                assert_eq!(mode, GameMode::Capture);
                assert_eq!(settings, GameSettings::default());
                assert!(!ranked);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_decode_game_command() {
        let game = Uuid::new_v4();
        let raw = format!(
            r#"{{"type":"PLACE_STONE","payload":{{"gameId":"{}","x":3,"y":4}}}}"#,
            game
        );
        let envelope = decode_command(raw.as_bytes()).unwrap();
        assert_eq!(envelope.request_id, None);
        assert_eq!(
            envelope.command,
            ClientCommand::Game {
                game_id: game,
                action: GameAction::PlaceStone {
                    x: 3,
                    y: 4,
                    hidden: false
                },
            }
        );
    }

    #[test]
    fn test_decode_rejects_missing_game_id() {
        let raw = br#"{"type":"PASS_TURN","payload":{}}"#;
        assert!(matches!(
            decode_command(raw),
            Err(ProtocolError::MissingGameId)
        ));
        assert!(matches!(
            decode_command(br#"{"payload":{}}"#),
            Err(ProtocolError::MissingType)
        ));
    }

    #[test]
    fn test_decode_unknown_tag() {
        let raw = format!(
            r#"{{"type":"FLY_AWAY","payload":{{"gameId":"{}"}}}}"#,
            Uuid::new_v4()
        );
        assert!(matches!(
            decode_command(raw.as_bytes()),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_reply_shapes() {
        let ok = CommandReply::ok(Some(1), ActionResponse::Captured { count: 2 });
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["clientResponse"]["kind"], "captured");
        assert_eq!(json["clientResponse"]["count"], 2);
        assert!(json.get("error").is_none());

        let err = CommandReply::err(None, "Not your turn", ErrorKind::Validation);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"], "Not your turn");
        assert_eq!(json["kind"], "validation");
        assert!(json.get("clientResponse").is_none());
        assert!(!err.is_ok());
    }

    #[test]
    fn test_push_wire_format() {
        let id = Uuid::new_v4();
        let by = Uuid::new_v4();
        let message = ServerMessage::NegotiationDeclined {
            negotiation_id: id,
            declined_by: by,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "NEGOTIATION_DECLINED");
        assert_eq!(json["payload"]["negotiationId"], id.to_string());
        assert_eq!(message.tag(), "NEGOTIATION_DECLINED");
    }
}
