//! SQL-backed race store using PostgreSQL via sqlx.
//!
//! Tables:
//! - `tracks` — provisioned tracks and their capacity
//! - `matchmaking` — players waiting for their track to fill
//! - `race_history` — append-only results of completed races
//!
//! Finishing positions come from the `detailed_matchmaking` view. Both write
//! units lock the track row with `SELECT ... FOR UPDATE`, which serializes
//! concurrent requests for the same track.
//!
//! This module is only available when the `sql` feature is enabled.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow, Postgres};
use sqlx::{Row, Transaction};

use crate::error::GridError;
use crate::matchmaking::{Placement, RaceStore};
use crate::types::{MatchmakingTicket, MotorcycleStats, RaceResult, Track, TrackId};

/// PostgreSQL-backed race store.
pub struct SqlRaceStore {
    pool: PgPool,
}

fn persistence(context: &'static str) -> impl FnOnce(sqlx::Error) -> GridError {
    move |e| GridError::PersistenceError {
        reason: format!("{context}: {e}"),
        source: Some(Box::new(e)),
    }
}

impl SqlRaceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<(), GridError> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|e| GridError::PersistenceError {
                reason: format!("migration failed: {e}"),
                source: Some(Box::new(e)),
            })
    }

    /// Insert or update the given tracks.
    pub async fn provision_tracks(&self, tracks: &[Track]) -> Result<(), GridError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(persistence("failed to begin transaction"))?;
        for track in tracks {
            sqlx::query(
                "INSERT INTO tracks (id, name, capacity) VALUES ($1, $2, $3)
                 ON CONFLICT (id) DO UPDATE SET name = $2, capacity = $3",
            )
            .bind(track.id.0)
            .bind(&track.name)
            .bind(track.capacity as i32)
            .execute(&mut *tx)
            .await
            .map_err(persistence("failed to provision track"))?;
        }
        tx.commit()
            .await
            .map_err(persistence("failed to commit tracks"))
    }

    async fn lock_track(
        tx: &mut Transaction<'static, Postgres>,
        placement: Placement,
    ) -> Result<Track, GridError> {
        let row = match placement {
            Placement::Random => {
                sqlx::query(
                    "SELECT id, name, capacity FROM tracks ORDER BY random() LIMIT 1 FOR UPDATE",
                )
                .fetch_optional(&mut **tx)
                .await
            }
            Placement::Track(id) => {
                sqlx::query("SELECT id, name, capacity FROM tracks WHERE id = $1 FOR UPDATE")
                    .bind(id.0)
                    .fetch_optional(&mut **tx)
                    .await
            }
        }
        .map_err(persistence("failed to lock track"))?;

        let row = row.ok_or_else(|| match placement {
            Placement::Random => GridError::not_found("any track"),
            Placement::Track(id) => GridError::not_found(format!("track {id}")),
        })?;
        TrackRow::from_row(&row)?.into_track()
    }
}

fn corrupt(reason: String) -> GridError {
    GridError::PersistenceError {
        reason,
        source: None,
    }
}

/// Reject a negative integer read from a column that can only count up.
fn unsigned(column: &str, value: i32) -> Result<u32, GridError> {
    u32::try_from(value).map_err(|_| corrupt(format!("{column} must not be negative, got {value}")))
}

struct TrackRow {
    id: i32,
    name: String,
    capacity: i32,
}

impl TrackRow {
    fn from_row(row: &PgRow) -> Result<Self, GridError> {
        Ok(Self {
            id: row.try_get("id").map_err(persistence("failed to read track id"))?,
            name: row
                .try_get("name")
                .map_err(persistence("failed to read track name"))?,
            capacity: row
                .try_get("capacity")
                .map_err(persistence("failed to read track capacity"))?,
        })
    }

    fn into_track(self) -> Result<Track, GridError> {
        let capacity = unsigned("capacity", self.capacity)?;
        if capacity == 0 {
            return Err(corrupt(format!("track {} has no capacity", self.id)));
        }
        Ok(Track {
            id: TrackId(self.id),
            name: self.name,
            capacity,
        })
    }
}

/// One rider's line from `detailed_matchmaking` or `race_history`.
struct StandingRow {
    username: String,
    motorcycle_id: i32,
    motorcycle_name: String,
    motorcycle_level: i32,
    position: i32,
    total_motorcycles: i32,
    track_name: String,
    completed_at: DateTime<Utc>,
}

impl StandingRow {
    fn from_row(row: &PgRow) -> Result<Self, GridError> {
        Ok(Self {
            username: row.try_get("username").map_err(persistence("failed to read username"))?,
            motorcycle_id: row
                .try_get("motorcycle_id")
                .map_err(persistence("failed to read motorcycle_id"))?,
            motorcycle_name: row
                .try_get("motorcycle_name")
                .map_err(persistence("failed to read motorcycle_name"))?,
            motorcycle_level: row
                .try_get("motorcycle_level")
                .map_err(persistence("failed to read motorcycle_level"))?,
            position: row.try_get("position").map_err(persistence("failed to read position"))?,
            total_motorcycles: row
                .try_get("total_motorcycles")
                .map_err(persistence("failed to read total_motorcycles"))?,
            track_name: row
                .try_get("track_name")
                .map_err(persistence("failed to read track_name"))?,
            completed_at: row
                .try_get("completed_at")
                .map_err(persistence("failed to read completed_at"))?,
        })
    }

    fn into_result(self) -> Result<RaceResult, GridError> {
        let position = unsigned("position", self.position)?;
        let total = unsigned("total_motorcycles", self.total_motorcycles)?;
        if position == 0 || position > total {
            return Err(corrupt(format!(
                "position {position} out of range for {total} riders"
            )));
        }
        Ok(RaceResult {
            username: self.username,
            motorcycle_id: self.motorcycle_id,
            motorcycle_name: self.motorcycle_name,
            motorcycle_level: self.motorcycle_level,
            position,
            total,
            track_name: self.track_name,
            completed_at: self.completed_at,
        })
    }
}

/// Order the standings of one track, winner first, and check they cover
/// positions `1..=n` exactly once with a consistent rider count.
fn decode_standings(track_id: TrackId, mut rows: Vec<StandingRow>) -> Result<Vec<RaceResult>, GridError> {
    rows.sort_by(|a, b| {
        a.position
            .cmp(&b.position)
            .then_with(|| a.username.cmp(&b.username))
    });
    let total = rows.len();
    let results = rows
        .into_iter()
        .map(StandingRow::into_result)
        .collect::<Result<Vec<_>, _>>()?;
    if results
        .iter()
        .enumerate()
        .any(|(i, r)| r.position as usize != i + 1 || r.total as usize != total)
    {
        return Err(corrupt(format!(
            "standings for track {track_id} are not a permutation"
        )));
    }
    Ok(results)
}

fn slots_left(free_slots: i32) -> Result<u32, GridError> {
    unsigned("free_slots", free_slots)
}

#[async_trait]
impl RaceStore for SqlRaceStore {
    async fn tracks(&self) -> Result<Vec<Track>, GridError> {
        let rows = sqlx::query("SELECT id, name, capacity FROM tracks ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(persistence("failed to list tracks"))?;
        rows.iter()
            .map(|row| TrackRow::from_row(row)?.into_track())
            .collect()
    }

    async fn enqueue(
        &self,
        username: &str,
        motorcycle: &MotorcycleStats,
        placement: Placement,
    ) -> Result<MatchmakingTicket, GridError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(persistence("failed to begin transaction"))?;
        let track = Self::lock_track(&mut tx, placement).await?;

        let occupied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM matchmaking WHERE track_id = $1")
            .bind(track.id.0)
            .fetch_one(&mut *tx)
            .await
            .map_err(persistence("failed to count occupants"))?;
        if occupied >= i64::from(track.capacity) {
            return Err(GridError::TrackFull { track_id: track.id });
        }

        let inserted = sqlx::query(
            "INSERT INTO matchmaking
                (username, motorcycle_id, motorcycle_name, motorcycle_level,
                 engine, brakes, agility, aerodynamics, track_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (username, motorcycle_id) DO NOTHING",
        )
        .bind(username)
        .bind(motorcycle.id)
        .bind(&motorcycle.name)
        .bind(motorcycle.level)
        .bind(motorcycle.engine)
        .bind(motorcycle.brakes)
        .bind(motorcycle.agility)
        .bind(motorcycle.aerodynamics)
        .bind(track.id.0)
        .execute(&mut *tx)
        .await
        .map_err(persistence("failed to insert matchmaking entry"))?;
        if inserted.rows_affected() == 0 {
            return Err(GridError::AlreadyRacing {
                username: username.to_string(),
                motorcycle_id: motorcycle.id,
            });
        }

        let free_slots: i32 = sqlx::query_scalar(
            "SELECT free_slots FROM detailed_matchmaking WHERE track_id = $1 LIMIT 1",
        )
        .bind(track.id.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(persistence("failed to read free slots"))?;

        tx.commit()
            .await
            .map_err(persistence("failed to commit matchmaking"))?;

        Ok(MatchmakingTicket {
            track_id: track.id,
            slots_left: slots_left(free_slots)?,
        })
    }

    async fn complete_race(&self, track_id: TrackId) -> Result<Vec<RaceResult>, GridError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(persistence("failed to begin transaction"))?;
        Self::lock_track(&mut tx, Placement::Track(track_id)).await?;

        let completed_at = Utc::now();
        let rows = sqlx::query(
            "SELECT username, motorcycle_id, motorcycle_name, motorcycle_level,
                    position, total_motorcycles, track_name, $2::TIMESTAMPTZ AS completed_at
             FROM detailed_matchmaking
             WHERE track_id = $1
             ORDER BY position",
        )
        .bind(track_id.0)
        .bind(completed_at)
        .fetch_all(&mut *tx)
        .await
        .map_err(persistence("failed to read standings"))?;
        let rows = rows
            .iter()
            .map(StandingRow::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let results = decode_standings(track_id, rows)?;

        sqlx::query(
            "INSERT INTO race_history
                (race_id, username, motorcycle_id, motorcycle_name, motorcycle_level,
                 position, total_motorcycles, track_name, completed_at)
             SELECT $1, username, motorcycle_id, motorcycle_name, motorcycle_level,
                    position, total_motorcycles, track_name, $2
             FROM detailed_matchmaking
             WHERE track_id = $3",
        )
        .bind(uuid::Uuid::new_v4())
        .bind(completed_at)
        .bind(track_id.0)
        .execute(&mut *tx)
        .await
        .map_err(persistence("failed to append history"))?;

        sqlx::query("DELETE FROM matchmaking WHERE track_id = $1")
            .bind(track_id.0)
            .execute(&mut *tx)
            .await
            .map_err(persistence("failed to clear track"))?;

        tx.commit()
            .await
            .map_err(persistence("failed to commit race completion"))?;
        Ok(results)
    }

    async fn racing_track(
        &self,
        username: &str,
        motorcycle_id: i32,
    ) -> Result<Option<String>, GridError> {
        sqlx::query_scalar(
            "SELECT track_name FROM detailed_matchmaking
             WHERE username = $1 AND motorcycle_id = $2",
        )
        .bind(username)
        .bind(motorcycle_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(persistence("failed to check racing status"))
    }

    async fn history(&self, username: &str) -> Result<Vec<RaceResult>, GridError> {
        let rows = sqlx::query(
            "SELECT username, motorcycle_id, motorcycle_name, motorcycle_level,
                    position, total_motorcycles, track_name, completed_at
             FROM race_history
             WHERE username = $1
             ORDER BY id DESC",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await
        .map_err(persistence("failed to read history"))?;
        rows.iter()
            .map(|row| StandingRow::from_row(row)?.into_result())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(username: &str, position: i32, total: i32) -> StandingRow {
        StandingRow {
            username: username.to_string(),
            motorcycle_id: 1,
            motorcycle_name: "Yamaha R1".to_string(),
            motorcycle_level: 1,
            position,
            total_motorcycles: total,
            track_name: "Assen".to_string(),
            completed_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn standings_sort_winner_first() {
        let rows = vec![row("carol", 3, 3), row("alice", 1, 3), row("bob", 2, 3)];
        let results = decode_standings(TrackId(2), rows).expect("decode standings");
        let names: Vec<&str> = results.iter().map(|r| r.username.as_str()).collect();
        assert_eq!(names, ["alice", "bob", "carol"]);
        assert!(results.iter().all(|r| r.total == 3));
        assert_eq!(results[2].position, 3);
    }

    #[test]
    fn empty_track_has_no_standings() {
        assert!(decode_standings(TrackId(1), Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn standings_with_gaps_or_ties_are_rejected() {
        let tie = vec![row("alice", 1, 2), row("bob", 1, 2)];
        let err = decode_standings(TrackId(1), tie).unwrap_err();
        assert!(err.to_string().contains("not a permutation"));

        let stale_total = vec![row("alice", 1, 3), row("bob", 2, 3)];
        assert!(decode_standings(TrackId(1), stale_total).is_err());
    }

    #[test]
    fn negative_columns_are_rejected() {
        let err = decode_standings(TrackId(1), vec![row("alice", -1, 1)]).unwrap_err();
        assert!(err.to_string().contains("position must not be negative"));

        assert!(row("alice", 1, -1).into_result().is_err());
        assert!(row("alice", 0, 1).into_result().is_err());
        assert!(slots_left(-1).is_err());
        assert_eq!(slots_left(3).unwrap(), 3);
    }

    #[test]
    fn track_rows_need_positive_capacity() {
        let track = TrackRow {
            id: 3,
            name: "Phillip Island".to_string(),
            capacity: 6,
        }
        .into_track()
        .unwrap();
        assert_eq!(track, Track::new(3, "Phillip Island", 6));

        for capacity in [0, -4] {
            let row = TrackRow {
                id: 3,
                name: "Phillip Island".to_string(),
                capacity,
            };
            assert!(row.into_track().is_err());
        }
    }
}
