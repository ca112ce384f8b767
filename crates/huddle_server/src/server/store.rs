#![forbid(unsafe_code)]

use anyhow::{Context, anyhow};
use huddle_domain::{InviteKind, RoomId, RoomKind, RoomSummary, UserId};
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

/// Typed gateway to the relational store. The database is the single
/// source of truth; every write is idempotent under concurrent retries
/// and cross-request atomicity lives here, not in process-local state.
#[derive(Clone)]
pub struct ChatStore {
	backend: StoreBackend,
}

#[derive(Clone)]
enum StoreBackend {
	Sqlite(sqlx::SqlitePool),
	Postgres(sqlx::PgPool),
}

#[derive(Debug, Clone)]
pub struct RoomRecord {
	pub id: RoomId,
	pub title: Option<String>,
	pub kind: RoomKind,
	pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
	pub id: String,
	pub room_id: String,
	pub author_id: String,
	pub text: String,
	pub at: i64,
}

#[derive(Debug, Clone)]
pub struct InviteRecord {
	pub token: String,
	pub kind: InviteKind,
	pub inviter_id: UserId,
	pub room_id: Option<RoomId>,
	pub created_at: i64,
	pub expires_at: Option<i64>,
	pub used_at: Option<i64>,
}

const ENSURE_ROOM: &str = "INSERT INTO rooms (id, title, type, created_at) VALUES ($1, $2, $3, $4) \
	ON CONFLICT (id) DO NOTHING";

const GET_ROOM: &str = "SELECT id, title, type, created_at FROM rooms WHERE id = $1";

const ENSURE_MEMBER: &str = "INSERT INTO room_members (room_id, user_id) VALUES ($1, $2) \
	ON CONFLICT (room_id, user_id) DO UPDATE SET deleted_at = NULL";

const COUNT_LIVE_MEMBER: &str =
	"SELECT COUNT(*) FROM room_members WHERE room_id = $1 AND user_id = $2 AND deleted_at IS NULL";

const LIST_ROOMS: &str = "SELECT r.id, r.title, r.type, r.created_at, \
	(SELECT m.text FROM messages m WHERE m.room_id = r.id ORDER BY m.at DESC, m.id DESC LIMIT 1), \
	(SELECT m.at FROM messages m WHERE m.room_id = r.id ORDER BY m.at DESC, m.id DESC LIMIT 1), \
	rm.unread, rm.pinned, rm.muted \
	FROM room_members rm JOIN rooms r ON r.id = rm.room_id \
	WHERE rm.user_id = $1 AND rm.deleted_at IS NULL";

const INSERT_MESSAGE: &str = "INSERT INTO messages (id, room_id, author_id, text, at) VALUES ($1, $2, $3, $4, $5)";

const HISTORY_NEWEST: &str = "SELECT id, room_id, author_id, text, at FROM messages \
	WHERE room_id = $1 ORDER BY at DESC, id DESC LIMIT $2";

const HISTORY_BEFORE: &str = "SELECT id, room_id, author_id, text, at FROM messages \
	WHERE room_id = $1 AND at < $2 ORDER BY at DESC, id DESC LIMIT $3";

const BUMP_UNREAD: &str = "UPDATE room_members SET unread = unread + 1 \
	WHERE room_id = $1 AND user_id <> $2 AND deleted_at IS NULL";

const RESET_UNREAD: &str =
	"UPDATE room_members SET unread = 0 WHERE room_id = $1 AND user_id = $2 AND deleted_at IS NULL";

const MEMBER_UNREADS: &str = "SELECT user_id, unread FROM room_members WHERE room_id = $1 AND deleted_at IS NULL";

const SET_PINNED: &str =
	"UPDATE room_members SET pinned = $1 WHERE room_id = $2 AND user_id = $3 AND deleted_at IS NULL";

const SET_MUTED: &str =
	"UPDATE room_members SET muted = $1 WHERE room_id = $2 AND user_id = $3 AND deleted_at IS NULL";

const TOMBSTONE_UPDATE: &str = "UPDATE room_members SET deleted_at = $1 WHERE room_id = $2 AND user_id = $3";

// Creating the row already tombstoned closes the race with a stale
// re-add: a just-removed room must never reappear in the list.
const TOMBSTONE_INSERT: &str = "INSERT INTO room_members (room_id, user_id, deleted_at) VALUES ($1, $2, $3) \
	ON CONFLICT (room_id, user_id) DO UPDATE SET deleted_at = EXCLUDED.deleted_at";

const ADD_CONTACT: &str = "INSERT INTO contacts (a_user_id, b_user_id, created_at) VALUES ($1, $2, $3) \
	ON CONFLICT (a_user_id, b_user_id) DO NOTHING";

const CREATE_INVITE: &str = "INSERT INTO invites (token, type, inviter_id, room_id, created_at, expires_at) \
	VALUES ($1, $2, $3, $4, $5, $6)";

const GET_INVITE: &str =
	"SELECT token, type, inviter_id, room_id, created_at, expires_at, used_at FROM invites WHERE token = $1";

// The exactly-once serialization point: only the request that flips
// used_at from NULL observes rows_affected = 1.
const CLAIM_INVITE: &str = "UPDATE invites SET used_at = $1 WHERE token = $2 AND used_at IS NULL \
	AND (expires_at IS NULL OR expires_at > $3)";

const FIND_USER_BY_EMAIL: &str = "SELECT id FROM users WHERE LOWER(email) = LOWER($1) LIMIT 1";

impl ChatStore {
	/// Connect by URL prefix (`sqlite:` or `postgres:`) and run the
	/// backend's embedded migrations.
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		if database_url.starts_with("sqlite:") {
			// An in-memory sqlite database exists per connection; the pool
			// must stay at one connection for state to be shared.
			let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };
			let pool = SqlitePoolOptions::new()
				.max_connections(max_connections)
				.connect(database_url)
				.await
				.context("connect sqlite")?;
			sqlx::migrate!("migrations/sqlite")
				.run(&pool)
				.await
				.context("run sqlite migrations")?;

			Ok(Self {
				backend: StoreBackend::Sqlite(pool),
			})
		} else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
			let pool = sqlx::PgPool::connect(database_url).await.context("connect postgres")?;
			sqlx::migrate!("migrations/postgres")
				.run(&pool)
				.await
				.context("run postgres migrations")?;

			Ok(Self {
				backend: StoreBackend::Postgres(pool),
			})
		} else {
			Err(anyhow!("unsupported database_url (use sqlite: or postgres:)"))
		}
	}

	/// Idempotent insert-if-absent.
	pub async fn ensure_room(
		&self,
		room: &RoomId,
		title: Option<&str>,
		kind: RoomKind,
		created_at: i64,
	) -> anyhow::Result<()> {
		match &self.backend {
			StoreBackend::Sqlite(pool) => {
				sqlx::query(ENSURE_ROOM)
					.bind(room.as_str())
					.bind(title)
					.bind(kind.as_str())
					.bind(created_at)
					.execute(pool)
					.await
					.context("ensure room (sqlite)")?;
			}
			StoreBackend::Postgres(pool) => {
				sqlx::query(ENSURE_ROOM)
					.bind(room.as_str())
					.bind(title)
					.bind(kind.as_str())
					.bind(created_at)
					.execute(pool)
					.await
					.context("ensure room (postgres)")?;
			}
		}

		Ok(())
	}

	pub async fn get_room(&self, room: &RoomId) -> anyhow::Result<Option<RoomRecord>> {
		let row: Option<(String, Option<String>, String, i64)> = match &self.backend {
			StoreBackend::Sqlite(pool) => sqlx::query_as(GET_ROOM)
				.bind(room.as_str())
				.fetch_optional(pool)
				.await
				.context("get room (sqlite)")?,
			StoreBackend::Postgres(pool) => sqlx::query_as(GET_ROOM)
				.bind(room.as_str())
				.fetch_optional(pool)
				.await
				.context("get room (postgres)")?,
		};

		row.map(|(id, title, kind, created_at)| {
			Ok(RoomRecord {
				id: RoomId::new(id).map_err(|e| anyhow!("corrupt room id: {e}"))?,
				title,
				kind: kind.parse().map_err(|e| anyhow!("corrupt room type: {e}"))?,
				created_at,
			})
		})
		.transpose()
	}

	/// Idempotent insert-or-clear-tombstone.
	pub async fn ensure_membership(&self, room: &RoomId, user: &UserId) -> anyhow::Result<()> {
		match &self.backend {
			StoreBackend::Sqlite(pool) => {
				sqlx::query(ENSURE_MEMBER)
					.bind(room.as_str())
					.bind(user.as_str())
					.execute(pool)
					.await
					.context("ensure membership (sqlite)")?;
			}
			StoreBackend::Postgres(pool) => {
				sqlx::query(ENSURE_MEMBER)
					.bind(room.as_str())
					.bind(user.as_str())
					.execute(pool)
					.await
					.context("ensure membership (postgres)")?;
			}
		}

		Ok(())
	}

	pub async fn is_live_member(&self, room: &RoomId, user: &UserId) -> anyhow::Result<bool> {
		let (count,): (i64,) = match &self.backend {
			StoreBackend::Sqlite(pool) => sqlx::query_as(COUNT_LIVE_MEMBER)
				.bind(room.as_str())
				.bind(user.as_str())
				.fetch_one(pool)
				.await
				.context("membership check (sqlite)")?,
			StoreBackend::Postgres(pool) => sqlx::query_as(COUNT_LIVE_MEMBER)
				.bind(room.as_str())
				.bind(user.as_str())
				.fetch_one(pool)
				.await
				.context("membership check (postgres)")?,
		};

		Ok(count > 0)
	}

	/// All rooms with a live membership for the user, annotated with the
	/// last-message preview and per-membership flags. Unordered; the
	/// caller applies the shared ordering.
	pub async fn list_rooms_for_user(&self, user: &UserId) -> anyhow::Result<Vec<RoomSummary>> {
		type Row = (String, Option<String>, String, i64, Option<String>, Option<i64>, i32, bool, bool);

		let rows: Vec<Row> = match &self.backend {
			StoreBackend::Sqlite(pool) => sqlx::query_as(LIST_ROOMS)
				.bind(user.as_str())
				.fetch_all(pool)
				.await
				.context("list rooms (sqlite)")?,
			StoreBackend::Postgres(pool) => sqlx::query_as(LIST_ROOMS)
				.bind(user.as_str())
				.fetch_all(pool)
				.await
				.context("list rooms (postgres)")?,
		};

		rows.into_iter()
			.map(|(id, title, kind, created_at, last_message, last_at, unread, pinned, muted)| {
				Ok(RoomSummary {
					id: RoomId::new(id).map_err(|e| anyhow!("corrupt room id: {e}"))?,
					title,
					kind: kind.parse().map_err(|e| anyhow!("corrupt room type: {e}"))?,
					created_at,
					last_message,
					last_at,
					unread: unread.max(0) as u32,
					pinned,
					muted,
				})
			})
			.collect()
	}

	pub async fn insert_message(
		&self,
		room: &RoomId,
		author: &UserId,
		text: &str,
		at: i64,
	) -> anyhow::Result<MessageRecord> {
		let record = MessageRecord {
			id: Uuid::new_v4().to_string(),
			room_id: room.as_str().to_string(),
			author_id: author.as_str().to_string(),
			text: text.to_string(),
			at,
		};

		match &self.backend {
			StoreBackend::Sqlite(pool) => {
				sqlx::query(INSERT_MESSAGE)
					.bind(&record.id)
					.bind(&record.room_id)
					.bind(&record.author_id)
					.bind(&record.text)
					.bind(record.at)
					.execute(pool)
					.await
					.context("insert message (sqlite)")?;
			}
			StoreBackend::Postgres(pool) => {
				sqlx::query(INSERT_MESSAGE)
					.bind(&record.id)
					.bind(&record.room_id)
					.bind(&record.author_id)
					.bind(&record.text)
					.bind(record.at)
					.execute(pool)
					.await
					.context("insert message (postgres)")?;
			}
		}

		Ok(record)
	}

	/// Newest-first page of messages, optionally strictly older than
	/// `before`. The caller probes `limit + 1` for has-more.
	pub async fn history_page(
		&self,
		room: &RoomId,
		before: Option<i64>,
		limit: u32,
	) -> anyhow::Result<Vec<MessageRecord>> {
		type Row = (String, String, String, String, i64);

		let rows: Vec<Row> = match (&self.backend, before) {
			(StoreBackend::Sqlite(pool), None) => sqlx::query_as(HISTORY_NEWEST)
				.bind(room.as_str())
				.bind(limit as i64)
				.fetch_all(pool)
				.await
				.context("history page (sqlite)")?,
			(StoreBackend::Sqlite(pool), Some(before)) => sqlx::query_as(HISTORY_BEFORE)
				.bind(room.as_str())
				.bind(before)
				.bind(limit as i64)
				.fetch_all(pool)
				.await
				.context("history page (sqlite)")?,
			(StoreBackend::Postgres(pool), None) => sqlx::query_as(HISTORY_NEWEST)
				.bind(room.as_str())
				.bind(limit as i64)
				.fetch_all(pool)
				.await
				.context("history page (postgres)")?,
			(StoreBackend::Postgres(pool), Some(before)) => sqlx::query_as(HISTORY_BEFORE)
				.bind(room.as_str())
				.bind(before)
				.bind(limit as i64)
				.fetch_all(pool)
				.await
				.context("history page (postgres)")?,
		};

		Ok(rows
			.into_iter()
			.map(|(id, room_id, author_id, text, at)| MessageRecord {
				id,
				room_id,
				author_id,
				text,
				at,
			})
			.collect())
	}

	/// Increment unread for every live member except the author.
	pub async fn bump_unread_others(&self, room: &RoomId, author: &UserId) -> anyhow::Result<()> {
		match &self.backend {
			StoreBackend::Sqlite(pool) => {
				sqlx::query(BUMP_UNREAD)
					.bind(room.as_str())
					.bind(author.as_str())
					.execute(pool)
					.await
					.context("bump unread (sqlite)")?;
			}
			StoreBackend::Postgres(pool) => {
				sqlx::query(BUMP_UNREAD)
					.bind(room.as_str())
					.bind(author.as_str())
					.execute(pool)
					.await
					.context("bump unread (postgres)")?;
			}
		}

		Ok(())
	}

	pub async fn reset_unread(&self, room: &RoomId, user: &UserId) -> anyhow::Result<()> {
		match &self.backend {
			StoreBackend::Sqlite(pool) => {
				sqlx::query(RESET_UNREAD)
					.bind(room.as_str())
					.bind(user.as_str())
					.execute(pool)
					.await
					.context("reset unread (sqlite)")?;
			}
			StoreBackend::Postgres(pool) => {
				sqlx::query(RESET_UNREAD)
					.bind(room.as_str())
					.bind(user.as_str())
					.execute(pool)
					.await
					.context("reset unread (postgres)")?;
			}
		}

		Ok(())
	}

	/// Live members of a room with their current unread counts.
	pub async fn member_unreads(&self, room: &RoomId) -> anyhow::Result<Vec<(UserId, u32)>> {
		let rows: Vec<(String, i32)> = match &self.backend {
			StoreBackend::Sqlite(pool) => sqlx::query_as(MEMBER_UNREADS)
				.bind(room.as_str())
				.fetch_all(pool)
				.await
				.context("member unreads (sqlite)")?,
			StoreBackend::Postgres(pool) => sqlx::query_as(MEMBER_UNREADS)
				.bind(room.as_str())
				.fetch_all(pool)
				.await
				.context("member unreads (postgres)")?,
		};

		rows.into_iter()
			.map(|(user, unread)| {
				Ok((
					UserId::new(user).map_err(|e| anyhow!("corrupt user id: {e}"))?,
					unread.max(0) as u32,
				))
			})
			.collect()
	}

	/// Returns false when no live membership row was there to update.
	pub async fn set_pinned(&self, room: &RoomId, user: &UserId, pinned: bool) -> anyhow::Result<bool> {
		let affected = match &self.backend {
			StoreBackend::Sqlite(pool) => sqlx::query(SET_PINNED)
				.bind(pinned)
				.bind(room.as_str())
				.bind(user.as_str())
				.execute(pool)
				.await
				.context("set pinned (sqlite)")?
				.rows_affected(),
			StoreBackend::Postgres(pool) => sqlx::query(SET_PINNED)
				.bind(pinned)
				.bind(room.as_str())
				.bind(user.as_str())
				.execute(pool)
				.await
				.context("set pinned (postgres)")?
				.rows_affected(),
		};

		Ok(affected > 0)
	}

	pub async fn set_muted(&self, room: &RoomId, user: &UserId, muted: bool) -> anyhow::Result<bool> {
		let affected = match &self.backend {
			StoreBackend::Sqlite(pool) => sqlx::query(SET_MUTED)
				.bind(muted)
				.bind(room.as_str())
				.bind(user.as_str())
				.execute(pool)
				.await
				.context("set muted (sqlite)")?
				.rows_affected(),
			StoreBackend::Postgres(pool) => sqlx::query(SET_MUTED)
				.bind(muted)
				.bind(room.as_str())
				.bind(user.as_str())
				.execute(pool)
				.await
				.context("set muted (postgres)")?
				.rows_affected(),
		};

		Ok(affected > 0)
	}

	/// Tombstone the membership; when no row exists the row is created
	/// already tombstoned.
	pub async fn soft_delete_membership(&self, room: &RoomId, user: &UserId, at: i64) -> anyhow::Result<()> {
		let affected = match &self.backend {
			StoreBackend::Sqlite(pool) => sqlx::query(TOMBSTONE_UPDATE)
				.bind(at)
				.bind(room.as_str())
				.bind(user.as_str())
				.execute(pool)
				.await
				.context("tombstone membership (sqlite)")?
				.rows_affected(),
			StoreBackend::Postgres(pool) => sqlx::query(TOMBSTONE_UPDATE)
				.bind(at)
				.bind(room.as_str())
				.bind(user.as_str())
				.execute(pool)
				.await
				.context("tombstone membership (postgres)")?
				.rows_affected(),
		};

		if affected > 0 {
			return Ok(());
		}

		match &self.backend {
			StoreBackend::Sqlite(pool) => {
				sqlx::query(TOMBSTONE_INSERT)
					.bind(room.as_str())
					.bind(user.as_str())
					.bind(at)
					.execute(pool)
					.await
					.context("insert tombstoned membership (sqlite)")?;
			}
			StoreBackend::Postgres(pool) => {
				sqlx::query(TOMBSTONE_INSERT)
					.bind(room.as_str())
					.bind(user.as_str())
					.bind(at)
					.execute(pool)
					.await
					.context("insert tombstoned membership (postgres)")?;
			}
		}

		Ok(())
	}

	/// Insert the canonical pair; duplicates are a no-op, not an error.
	pub async fn add_contact_pair(&self, a: &UserId, b: &UserId, created_at: i64) -> anyhow::Result<()> {
		let (first, second) = huddle_domain::contact_pair(a, b);

		match &self.backend {
			StoreBackend::Sqlite(pool) => {
				sqlx::query(ADD_CONTACT)
					.bind(first.as_str())
					.bind(second.as_str())
					.bind(created_at)
					.execute(pool)
					.await
					.context("add contact pair (sqlite)")?;
			}
			StoreBackend::Postgres(pool) => {
				sqlx::query(ADD_CONTACT)
					.bind(first.as_str())
					.bind(second.as_str())
					.bind(created_at)
					.execute(pool)
					.await
					.context("add contact pair (postgres)")?;
			}
		}

		Ok(())
	}

	pub async fn create_invite(&self, invite: &InviteRecord) -> anyhow::Result<()> {
		match &self.backend {
			StoreBackend::Sqlite(pool) => {
				sqlx::query(CREATE_INVITE)
					.bind(&invite.token)
					.bind(invite.kind.as_str())
					.bind(invite.inviter_id.as_str())
					.bind(invite.room_id.as_ref().map(|r| r.as_str()))
					.bind(invite.created_at)
					.bind(invite.expires_at)
					.execute(pool)
					.await
					.context("create invite (sqlite)")?;
			}
			StoreBackend::Postgres(pool) => {
				sqlx::query(CREATE_INVITE)
					.bind(&invite.token)
					.bind(invite.kind.as_str())
					.bind(invite.inviter_id.as_str())
					.bind(invite.room_id.as_ref().map(|r| r.as_str()))
					.bind(invite.created_at)
					.bind(invite.expires_at)
					.execute(pool)
					.await
					.context("create invite (postgres)")?;
			}
		}

		Ok(())
	}

	pub async fn get_invite(&self, token: &str) -> anyhow::Result<Option<InviteRecord>> {
		type Row = (String, String, String, Option<String>, i64, Option<i64>, Option<i64>);

		let row: Option<Row> = match &self.backend {
			StoreBackend::Sqlite(pool) => sqlx::query_as(GET_INVITE)
				.bind(token)
				.fetch_optional(pool)
				.await
				.context("get invite (sqlite)")?,
			StoreBackend::Postgres(pool) => sqlx::query_as(GET_INVITE)
				.bind(token)
				.fetch_optional(pool)
				.await
				.context("get invite (postgres)")?,
		};

		row.map(|(token, kind, inviter_id, room_id, created_at, expires_at, used_at)| {
			Ok(InviteRecord {
				token,
				kind: kind.parse().map_err(|e| anyhow!("corrupt invite type: {e}"))?,
				inviter_id: UserId::new(inviter_id).map_err(|e| anyhow!("corrupt inviter id: {e}"))?,
				room_id: room_id
					.map(|r| RoomId::new(r).map_err(|e| anyhow!("corrupt invite room id: {e}")))
					.transpose()?,
				created_at,
				expires_at,
				used_at,
			})
		})
		.transpose()
	}

	/// Atomically flip used_at from NULL; returns whether this caller won
	/// the claim. Losers must re-read to learn why.
	pub async fn claim_invite(&self, token: &str, now: i64) -> anyhow::Result<bool> {
		let affected = match &self.backend {
			StoreBackend::Sqlite(pool) => sqlx::query(CLAIM_INVITE)
				.bind(now)
				.bind(token)
				.bind(now)
				.execute(pool)
				.await
				.context("claim invite (sqlite)")?
				.rows_affected(),
			StoreBackend::Postgres(pool) => sqlx::query(CLAIM_INVITE)
				.bind(now)
				.bind(token)
				.bind(now)
				.execute(pool)
				.await
				.context("claim invite (postgres)")?
				.rows_affected(),
		};

		Ok(affected > 0)
	}

	/// Email lookup against the identity service's mirror. Read-only.
	pub async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<UserId>> {
		let row: Option<(String,)> = match &self.backend {
			StoreBackend::Sqlite(pool) => sqlx::query_as(FIND_USER_BY_EMAIL)
				.bind(email)
				.fetch_optional(pool)
				.await
				.context("find user by email (sqlite)")?,
			StoreBackend::Postgres(pool) => sqlx::query_as(FIND_USER_BY_EMAIL)
				.bind(email)
				.fetch_optional(pool)
				.await
				.context("find user by email (postgres)")?,
		};

		row.map(|(id,)| UserId::new(id).map_err(|e| anyhow!("corrupt user id: {e}")))
			.transpose()
	}

	#[cfg(test)]
	pub(crate) async fn seed_user(&self, id: &str, email: &str, name: &str) -> anyhow::Result<()> {
		const SQL: &str = "INSERT INTO users (id, email, name) VALUES ($1, $2, $3)";

		match &self.backend {
			StoreBackend::Sqlite(pool) => {
				sqlx::query(SQL).bind(id).bind(email).bind(name).execute(pool).await?;
			}
			StoreBackend::Postgres(pool) => {
				sqlx::query(SQL).bind(id).bind(email).bind(name).execute(pool).await?;
			}
		}

		Ok(())
	}
}
