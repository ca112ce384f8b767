#![forbid(unsafe_code)]

use huddle_domain::{InviteKind, RoomId, RoomKind, UserId, contact_pair, direct_room_id};
use huddle_protocol::pb;
use tracing::info;
use uuid::Uuid;

use crate::server::error::{OpError, OpResult};
use crate::server::store::{ChatStore, InviteRecord};
use crate::util::time::unix_ms_now;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Issues and redeems single-use tokens that create contact pairs or room
/// memberships. Redemption is serialized by the store's conditional
/// claim: only the winner applies side effects.
#[derive(Clone)]
pub struct InviteService {
	store: ChatStore,
	public_base_url: Option<String>,
	default_ttl_days: u32,
}

impl InviteService {
	pub fn new(store: ChatStore, public_base_url: Option<String>, default_ttl_days: u32) -> Self {
		Self {
			store,
			public_base_url,
			default_ttl_days,
		}
	}

	pub async fn create_invite(
		&self,
		user: &UserId,
		kind: i32,
		room_id: &str,
		ttl_days: u32,
	) -> OpResult<pb::InviteCreated> {
		let kind = match pb::InviteKind::try_from(kind) {
			Ok(pb::InviteKind::Contact) => InviteKind::Contact,
			Ok(pb::InviteKind::Room) => InviteKind::Room,
			_ => return Err(OpError::validation("BAD_TYPE", "invite type must be contact or room")),
		};

		let room = match kind {
			InviteKind::Contact => None,
			InviteKind::Room => {
				let room = RoomId::new(room_id)
					.map_err(|_| OpError::validation("NO_ROOM", "room invite requires a room id"))?;
				if !self.store.is_live_member(&room, user).await.map_err(OpError::transient)? {
					return Err(OpError::authorization("NOT_A_MEMBER", format!("not a member of room {room}")));
				}
				Some(room)
			}
		};

		let now = unix_ms_now();
		let ttl_days = if ttl_days == 0 { self.default_ttl_days } else { ttl_days };
		let expires_at = (ttl_days > 0).then(|| now + i64::from(ttl_days) * MS_PER_DAY);

		let invite = InviteRecord {
			token: Uuid::new_v4().to_string(),
			kind,
			inviter_id: user.clone(),
			room_id: room,
			created_at: now,
			expires_at,
			used_at: None,
		};

		self.store.create_invite(&invite).await.map_err(OpError::transient)?;
		metrics::counter!("huddle_server_invites_created_total").increment(1);
		info!(kind = %kind, inviter = %user, "invite created");

		let url = self
			.public_base_url
			.as_deref()
			.map(|base| format!("{}/invite/{}", base.trim_end_matches('/'), invite.token))
			.unwrap_or_default();

		Ok(pb::InviteCreated {
			token: invite.token,
			url,
			expires_unix_ms: expires_at.unwrap_or(0),
		})
	}

	pub async fn accept_invite(&self, user: &UserId, token: &str) -> OpResult<pb::InviteAccepted> {
		let token = token.trim();
		if token.is_empty() {
			return Err(OpError::validation("NO_TOKEN", "invite token is required"));
		}

		let invite = self
			.store
			.get_invite(token)
			.await
			.map_err(OpError::transient)?
			.ok_or_else(|| OpError::not_found("BAD_TOKEN", "unknown invite token"))?;

		// Preconditions that must not burn the token.
		enum Redemption {
			Contact { inviter: UserId },
			Room { room: RoomId },
		}

		let plan = match invite.kind {
			InviteKind::Contact => {
				if invite.inviter_id == *user {
					return Err(OpError::validation("SELF_NOT_ALLOWED", "cannot accept your own contact invite"));
				}
				Redemption::Contact {
					inviter: invite.inviter_id.clone(),
				}
			}
			InviteKind::Room => match invite.room_id.clone() {
				Some(room) => Redemption::Room { room },
				None => return Err(OpError::validation("NO_ROOM_IN_INVITE", "room invite carries no room id")),
			},
		};

		let now = unix_ms_now();
		if !self.store.claim_invite(token, now).await.map_err(OpError::transient)? {
			// Lost the claim; re-read to report why. Expiry wins over used.
			let current = self.store.get_invite(token).await.map_err(OpError::transient)?;
			if let Some(current) = current
				&& current.used_at.is_none()
				&& current.expires_at.is_some_and(|e| e <= now)
			{
				return Err(OpError::conflict("EXPIRED", "invite has expired"));
			}
			return Err(OpError::conflict("USED", "invite was already redeemed"));
		}

		let room = match plan {
			Redemption::Contact { inviter } => {
				let (a, b) = contact_pair(user, &inviter);
				self.store.add_contact_pair(&a, &b, now).await.map_err(OpError::transient)?;

				let room = direct_room_id(user, &inviter);
				self.store
					.ensure_room(&room, None, RoomKind::Direct, now)
					.await
					.map_err(OpError::transient)?;
				self.store.ensure_membership(&room, user).await.map_err(OpError::transient)?;
				self.store.ensure_membership(&room, &inviter).await.map_err(OpError::transient)?;
				room
			}
			Redemption::Room { room } => {
				self.store.ensure_membership(&room, user).await.map_err(OpError::transient)?;
				room
			}
		};

		metrics::counter!("huddle_server_invites_accepted_total").increment(1);
		info!(kind = %invite.kind, redeemer = %user, room = %room, "invite accepted");

		Ok(pb::InviteAccepted {
			room_id: room.into_string(),
		})
	}

	/// Zero-token shortcut of the contact-invite flow; shares its
	/// idempotency guarantees.
	pub async fn add_contact_by_email(&self, user: &UserId, email: &str) -> OpResult<pb::ContactAdded> {
		let email = email.trim();
		if email.is_empty() {
			return Err(OpError::validation("NO_EMAIL", "email is required"));
		}

		let other = self
			.store
			.find_user_by_email(email)
			.await
			.map_err(OpError::transient)?
			.ok_or_else(|| OpError::not_found("USER_NOT_FOUND", "no user with that email"))?;

		if other == *user {
			return Err(OpError::validation("SELF_NOT_ALLOWED", "cannot add yourself as a contact"));
		}

		let now = unix_ms_now();
		let (a, b) = contact_pair(user, &other);
		self.store.add_contact_pair(&a, &b, now).await.map_err(OpError::transient)?;

		let room = direct_room_id(user, &other);
		self.store
			.ensure_room(&room, None, RoomKind::Direct, now)
			.await
			.map_err(OpError::transient)?;
		self.store.ensure_membership(&room, user).await.map_err(OpError::transient)?;
		self.store.ensure_membership(&room, &other).await.map_err(OpError::transient)?;

		Ok(pb::ContactAdded {
			room_id: room.into_string(),
		})
	}
}
