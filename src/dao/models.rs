use std::{collections::HashSet, time::SystemTime};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status of a person (registered or guest) with respect to a branch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// Not present at any branch.
    Offline,
    /// Present at a branch, waiting to be admitted to the queue.
    Waiting,
    /// Linked to a queued session.
    InQueue,
    /// Linked to a session currently holding a cabinet.
    Playing,
}

impl UserStatus {
    /// Whether the status requires a linked session.
    pub fn is_busy(self) -> bool {
        matches!(self, UserStatus::InQueue | UserStatus::Playing)
    }
}

/// Play style advertised by a player, used for partner suggestions only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum PlayStyle {
    /// Plays for fun, no particular goal.
    #[default]
    #[serde(rename = "Casual")]
    Casual,
    /// Grinds area progress.
    #[serde(rename = "Chiho Grinder")]
    Grinder,
    /// Pushes scores on top difficulty charts.
    #[serde(rename = "14k Spammer")]
    Spammer,
    /// Prefers to play alone.
    #[serde(rename = "Lone Wolf")]
    LoneWolf,
    /// Plays solo and would rather not be paired.
    #[serde(rename = "Solo Boring")]
    SoloBoring,
}

/// Whether a session is played alone or by a pair sharing one cabinet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    /// One player on one cabinet.
    Solo,
    /// Two players sharing one cabinet.
    Sync,
}

impl SessionType {
    /// Number of seats a full session of this type holds.
    pub fn capacity(self) -> usize {
        match self {
            SessionType::Solo => 1,
            SessionType::Sync => 2,
        }
    }
}

/// Progress of a session through the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Waiting in line for a cabinet.
    Queued,
    /// Holding a cabinet.
    Playing,
    /// Finished normally; kept as history.
    Completed,
    /// Ended without finishing; kept as history.
    Abandoned,
}

/// Violation of an entity invariant detected at the storage boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// Busy status and queue link disagree.
    #[error("user `{id}` is {status:?} but current queue link is {linked}")]
    QueueLink {
        /// User concerned.
        id: Uuid,
        /// Status found.
        status: UserStatus,
        /// Whether a link was present.
        linked: &'static str,
    },
    /// Guest flag set without an owner, or the other way around.
    #[error("user `{id}` guest flag disagrees with its owner reference")]
    GuestOwner {
        /// User concerned.
        id: Uuid,
    },
    /// Session with no seats.
    #[error("session `{id}` has no players")]
    EmptySession {
        /// Session concerned.
        id: Uuid,
    },
    /// More seats than the session type allows.
    #[error("session `{id}` of type {kind:?} cannot hold {count} players")]
    SeatCount {
        /// Session concerned.
        id: Uuid,
        /// Session type.
        kind: SessionType,
        /// Seats found.
        count: usize,
    },
    /// Same player seated twice.
    #[error("session `{id}` lists player `{player}` twice")]
    DuplicatePlayer {
        /// Session concerned.
        id: Uuid,
        /// Player seated twice.
        player: Uuid,
    },
    /// Status requires a timestamp that is missing.
    #[error("session `{id}` is {status:?} without a {field} timestamp")]
    MissingTimestamp {
        /// Session concerned.
        id: Uuid,
        /// Status found.
        status: SessionStatus,
        /// Missing field.
        field: &'static str,
    },
    /// Persisted player, name and count fields have different lengths.
    #[error("session `{id}` players, names and count disagree ({players}/{names}/{count})")]
    ParallelArrays {
        /// Session concerned.
        id: Uuid,
        /// Player ids found.
        players: usize,
        /// Names found.
        names: usize,
        /// Stored count.
        count: usize,
    },
    /// Identifier that is not a UUID.
    #[error("malformed identifier `{value}`")]
    Identifier {
        /// Raw stored value.
        value: String,
    },
}

/// Identity of a registered player or a guest they brought along.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Stable identifier, never reused.
    pub id: Uuid,
    /// Display name, snapshotted into sessions at join time.
    pub username: String,
    /// Where the identity stands in the queue lifecycle.
    pub status: UserStatus,
    /// Branch of the identity's latest queue activity; may be stale.
    pub branch_id: String,
    /// Session this identity is seated in, if any.
    pub current_queue_id: Option<Uuid>,
    /// Whether the identity is a guest without an account.
    pub is_guest: bool,
    /// Sponsoring identity of a guest.
    pub added_by: Option<Uuid>,
    /// Player rank as advertised to partner matching.
    pub rank: u32,
    /// Preferred way of playing.
    pub play_style: PlayStyle,
    /// Registration time.
    pub created_at: SystemTime,
}

impl UserIdentity {
    /// Build a registered (non-guest) identity that is not present at any branch yet.
    pub fn registered(
        username: String,
        branch_id: String,
        rank: u32,
        play_style: PlayStyle,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            status: UserStatus::Offline,
            branch_id,
            current_queue_id: None,
            is_guest: false,
            added_by: None,
            rank,
            play_style,
            created_at: SystemTime::now(),
        }
    }

    /// Build a guest owned by `host` for the given branch.
    pub fn guest(host: Uuid, username: String, branch_id: String, status: UserStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            status,
            branch_id,
            current_queue_id: None,
            is_guest: true,
            added_by: Some(host),
            rank: 0,
            play_style: PlayStyle::default(),
            created_at: SystemTime::now(),
        }
    }

    /// Link the identity to a session with a busy status.
    pub fn seat(&mut self, session_id: Uuid, status: UserStatus) {
        self.status = status;
        self.current_queue_id = Some(session_id);
    }

    /// Return the identity to the waiting pool, clearing its session link.
    pub fn unseat(&mut self) {
        self.status = UserStatus::Waiting;
        self.current_queue_id = None;
    }

    /// Check the status/link and guest/owner invariants.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.status.is_busy() != self.current_queue_id.is_some() {
            return Err(SchemaError::QueueLink {
                id: self.id,
                status: self.status,
                linked: if self.current_queue_id.is_some() {
                    "set"
                } else {
                    "missing"
                },
            });
        }
        if self.is_guest != self.added_by.is_some() {
            return Err(SchemaError::GuestOwner { id: self.id });
        }
        Ok(())
    }
}

/// One occupied seat of a session: the player and the name they joined with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    /// Seated player.
    pub user_id: Uuid,
    /// Name snapshotted when the player joined.
    pub name: String,
}

/// A solo or paired play slot moving through the branch queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Stable identifier.
    pub id: Uuid,
    /// Branch whose cabinets the session competes for.
    pub branch_id: String,
    /// Solo or sync.
    pub kind: SessionType,
    /// Queue progress.
    pub status: SessionStatus,
    /// Ordered seats; players, names and count are all derived from this list.
    pub seats: Vec<Seat>,
    /// Creation time; queue order follows it.
    pub created_at: SystemTime,
    /// Time the session took a cabinet.
    pub started_at: Option<SystemTime>,
    /// Time the session was finished.
    pub ended_at: Option<SystemTime>,
}

impl Session {
    /// Open a new session with its first player.
    pub fn open(branch_id: String, kind: SessionType, first: Seat) -> Self {
        Self {
            id: Uuid::new_v4(),
            branch_id,
            kind,
            status: SessionStatus::Queued,
            seats: vec![first],
            created_at: SystemTime::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Number of seated players.
    pub fn player_count(&self) -> usize {
        self.seats.len()
    }

    /// Seated players, in seat order.
    pub fn player_ids(&self) -> Vec<Uuid> {
        self.seats.iter().map(|seat| seat.user_id).collect()
    }

    /// Seated player names, in seat order.
    pub fn player_names(&self) -> Vec<String> {
        self.seats.iter().map(|seat| seat.name.clone()).collect()
    }

    /// Whether `user_id` holds a seat.
    pub fn contains(&self, user_id: Uuid) -> bool {
        self.seats.iter().any(|seat| seat.user_id == user_id)
    }

    /// Whether the session still sits in the queue or holds a cabinet.
    pub fn is_active(&self) -> bool {
        matches!(self.status, SessionStatus::Queued | SessionStatus::Playing)
    }

    /// Whether another player may still take a seat.
    pub fn has_open_seat(&self) -> bool {
        self.player_count() < self.kind.capacity()
    }

    /// Move the session onto a cabinet, stamping the start time.
    pub fn start(&mut self, now: SystemTime) {
        self.status = SessionStatus::Playing;
        self.started_at = Some(now);
    }

    /// Drop every seat whose player is listed in `ids`, keeping order.
    pub fn remove_players(&mut self, ids: &[Uuid]) {
        self.seats.retain(|seat| !ids.contains(&seat.user_id));
    }

    /// Check seat-count, uniqueness and timestamp invariants.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let count = self.player_count();
        if count == 0 {
            return Err(SchemaError::EmptySession { id: self.id });
        }
        if count > self.kind.capacity() {
            return Err(SchemaError::SeatCount {
                id: self.id,
                kind: self.kind,
                count,
            });
        }

        let mut seen = HashSet::with_capacity(count);
        for seat in &self.seats {
            if !seen.insert(seat.user_id) {
                return Err(SchemaError::DuplicatePlayer {
                    id: self.id,
                    player: seat.user_id,
                });
            }
        }

        match self.status {
            SessionStatus::Playing if self.started_at.is_none() => {
                Err(SchemaError::MissingTimestamp {
                    id: self.id,
                    status: self.status,
                    field: "startedAt",
                })
            }
            SessionStatus::Completed if self.ended_at.is_none() => {
                Err(SchemaError::MissingTimestamp {
                    id: self.id,
                    status: self.status,
                    field: "endedAt",
                })
            }
            _ => Ok(()),
        }
    }

    /// Rebuild seats from the persisted parallel arrays, rejecting misaligned documents.
    pub fn seats_from_parallel(
        id: Uuid,
        players: Vec<Uuid>,
        names: Vec<String>,
        count: usize,
    ) -> Result<Vec<Seat>, SchemaError> {
        if players.len() != names.len() || players.len() != count {
            return Err(SchemaError::ParallelArrays {
                id,
                players: players.len(),
                names: names.len(),
                count,
            });
        }

        Ok(players
            .into_iter()
            .zip(names)
            .map(|(user_id, name)| Seat { user_id, name })
            .collect())
    }
}

/// Physical location with its own cabinet pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Stable branch code.
    pub branch_id: String,
    /// Display name.
    pub name: String,
    /// Number of sessions that may play simultaneously; unset means one.
    pub cabinet_count: Option<u32>,
    /// Whether the branch accepts players.
    pub open: bool,
}

impl Branch {
    /// Cabinets available at the branch, at least one.
    pub fn capacity(&self) -> u32 {
        self.cabinet_count.filter(|count| *count > 0).unwrap_or(1)
    }
}

/// Parse a persisted identifier, reporting the raw value on failure.
pub fn parse_id(value: &str) -> Result<Uuid, SchemaError> {
    Uuid::parse_str(value).map_err(|_| SchemaError::Identifier {
        value: value.to_owned(),
    })
}
