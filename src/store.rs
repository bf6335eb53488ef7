//! Storage contracts and built-in store implementations for server records, client
//! registrations, and PKCE flow state.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{ProfileId, ServerId},
	flows::PkceFlowState,
	registration::RegistrationRecord,
	server::{Profile, ServerRecord},
};

/// Boxed future returned by every [`OAuthStore`] operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persistence capability consumed by the orchestrator.
///
/// PKCE rows are write-once and read-once: [`insert_pkce_state`](OAuthStore::insert_pkce_state)
/// must refuse to overwrite an existing state and
/// [`take_pkce_state`](OAuthStore::take_pkce_state) must remove the row it returns.
pub trait OAuthStore
where
	Self: Send + Sync,
{
	/// Loads a server record.
	fn fetch_server<'a>(&'a self, id: &'a ServerId) -> StoreFuture<'a, Option<ServerRecord>>;

	/// Inserts or replaces a server record.
	fn save_server(&self, record: ServerRecord) -> StoreFuture<'_, ()>;

	/// Loads a profile.
	fn fetch_profile<'a>(&'a self, id: &'a ProfileId) -> StoreFuture<'a, Option<Profile>>;

	/// Loads the cached client registration for a server.
	fn fetch_registration<'a>(
		&'a self,
		server: &'a ServerId,
	) -> StoreFuture<'a, Option<RegistrationRecord>>;

	/// Inserts or replaces the client registration for a server.
	fn save_registration(&self, record: RegistrationRecord) -> StoreFuture<'_, ()>;

	/// Inserts a PKCE flow state row; fails with [`StoreError::Conflict`] if the state exists.
	fn insert_pkce_state(&self, row: PkceFlowState) -> StoreFuture<'_, ()>;

	/// Removes and returns the PKCE row for `state`.
	fn take_pkce_state<'a>(&'a self, state: &'a str) -> StoreFuture<'a, Option<PkceFlowState>>;

	/// Deletes PKCE rows whose expiry is at or before `now`, returning how many were removed.
	fn purge_expired_pkce(&self, now: OffsetDateTime) -> StoreFuture<'_, usize>;
}

/// Error type produced by [`OAuthStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// A write-once row already exists.
	#[error("Conflict: {message}.")]
	Conflict {
		/// Human-readable error payload.
		message: String,
	},
}

/// Whole-store contents; shared by the memory and file backends.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct Snapshot {
	#[serde(default)]
	pub(crate) servers: HashMap<ServerId, ServerRecord>,
	#[serde(default)]
	pub(crate) profiles: HashMap<ProfileId, Profile>,
	#[serde(default)]
	pub(crate) registrations: HashMap<ServerId, RegistrationRecord>,
	#[serde(default)]
	pub(crate) pkce_states: HashMap<String, PkceFlowState>,
}
impl Snapshot {
	pub(crate) fn insert_pkce(&mut self, row: PkceFlowState) -> Result<(), StoreError> {
		if self.pkce_states.contains_key(&row.state) {
			return Err(StoreError::Conflict { message: "PKCE state already issued".into() });
		}

		self.pkce_states.insert(row.state.clone(), row);

		Ok(())
	}

	pub(crate) fn purge_expired(&mut self, now: OffsetDateTime) -> usize {
		let before = self.pkce_states.len();

		self.pkce_states.retain(|_, row| row.expires_at > now);

		before - self.pkce_states.len()
	}
}
