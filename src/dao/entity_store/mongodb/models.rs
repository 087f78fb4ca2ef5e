use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::{
    entity_store::Versioned,
    models::{
        Branch, PlayStyle, SchemaError, Session, SessionStatus, SessionType, UserIdentity,
        UserStatus, parse_id,
    },
};

/// Identifiers are stored as their hyphenated string form.
pub fn id_filter(id: Uuid) -> Document {
    doc! { "_id": id.to_string() }
}

fn parse_optional(value: Option<String>) -> Result<Option<Uuid>, SchemaError> {
    value.as_deref().map(parse_id).transpose()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MongoUserDocument {
    #[serde(rename = "_id")]
    id: String,
    username: String,
    status: UserStatus,
    branch_id: String,
    #[serde(default)]
    current_queue_id: Option<String>,
    #[serde(default)]
    is_guest: bool,
    #[serde(default)]
    added_by: Option<String>,
    #[serde(default)]
    rank: u32,
    #[serde(default)]
    play_style: PlayStyle,
    created_at: DateTime,
    #[serde(default)]
    pub version: i64,
}

impl MongoUserDocument {
    pub fn from_entity(user: &UserIdentity, version: u64) -> Self {
        Self {
            id: user.id.to_string(),
            username: user.username.clone(),
            status: user.status,
            branch_id: user.branch_id.clone(),
            current_queue_id: user.current_queue_id.map(|id| id.to_string()),
            is_guest: user.is_guest,
            added_by: user.added_by.map(|id| id.to_string()),
            rank: user.rank,
            play_style: user.play_style,
            created_at: DateTime::from_system_time(user.created_at),
            version: version as i64,
        }
    }
}

impl TryFrom<MongoUserDocument> for Versioned<UserIdentity> {
    type Error = SchemaError;

    fn try_from(value: MongoUserDocument) -> Result<Self, Self::Error> {
        let user = UserIdentity {
            id: parse_id(&value.id)?,
            username: value.username,
            status: value.status,
            branch_id: value.branch_id,
            current_queue_id: parse_optional(value.current_queue_id)?,
            is_guest: value.is_guest,
            added_by: parse_optional(value.added_by)?,
            rank: value.rank,
            play_style: value.play_style,
            created_at: value.created_at.to_system_time(),
        };
        user.validate()?;
        Ok(Versioned {
            data: user,
            version: value.version.max(0) as u64,
        })
    }
}

/// Session document with the player list kept as parallel arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    branch_id: String,
    #[serde(rename = "type")]
    kind: SessionType,
    status: SessionStatus,
    players: Vec<String>,
    player_names: Vec<String>,
    player_count: u32,
    created_at: DateTime,
    #[serde(default)]
    started_at: Option<DateTime>,
    #[serde(default)]
    ended_at: Option<DateTime>,
    #[serde(default)]
    pub version: i64,
}

impl MongoSessionDocument {
    pub fn from_entity(session: &Session, version: u64) -> Self {
        Self {
            id: session.id.to_string(),
            branch_id: session.branch_id.clone(),
            kind: session.kind,
            status: session.status,
            players: session
                .player_ids()
                .into_iter()
                .map(|id| id.to_string())
                .collect(),
            player_names: session.player_names(),
            player_count: session.player_count() as u32,
            created_at: DateTime::from_system_time(session.created_at),
            started_at: session.started_at.map(DateTime::from_system_time),
            ended_at: session.ended_at.map(DateTime::from_system_time),
            version: version as i64,
        }
    }
}

impl TryFrom<MongoSessionDocument> for Versioned<Session> {
    type Error = SchemaError;

    fn try_from(value: MongoSessionDocument) -> Result<Self, Self::Error> {
        let id = parse_id(&value.id)?;
        let players = value
            .players
            .iter()
            .map(|player| parse_id(player))
            .collect::<Result<Vec<_>, _>>()?;
        let seats = Session::seats_from_parallel(
            id,
            players,
            value.player_names,
            value.player_count as usize,
        )?;

        let session = Session {
            id,
            branch_id: value.branch_id,
            kind: value.kind,
            status: value.status,
            seats,
            created_at: value.created_at.to_system_time(),
            started_at: value.started_at.map(DateTime::to_system_time),
            ended_at: value.ended_at.map(DateTime::to_system_time),
        };
        session.validate()?;
        Ok(Versioned {
            data: session,
            version: value.version.max(0) as u64,
        })
    }
}

/// Branch document keyed by its branch code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MongoBranchDocument {
    #[serde(rename = "_id")]
    branch_code: String,
    #[serde(default)]
    branch_name: String,
    #[serde(default)]
    cabinet_count: Option<u32>,
    #[serde(default)]
    status: Option<String>,
}

impl From<MongoBranchDocument> for Branch {
    fn from(value: MongoBranchDocument) -> Self {
        Self {
            branch_id: value.branch_code,
            name: value.branch_name,
            cabinet_count: value.cabinet_count,
            open: value
                .status
                .is_none_or(|status| status.eq_ignore_ascii_case("open")),
        }
    }
}

/// Version counter of a branch queue guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGuardDocument {
    #[serde(rename = "_id")]
    pub branch_id: String,
    #[serde(default)]
    pub version: i64,
}
