//! Thread-safe in-memory [`OAuthStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::{ProfileId, ServerId},
	flows::PkceFlowState,
	registration::RegistrationRecord,
	server::{Profile, ServerRecord},
	store::{OAuthStore, Snapshot, StoreError, StoreFuture},
};

type StoreMap = Arc<RwLock<Snapshot>>;

/// Storage backend that keeps records in-process for tests and demos.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Seeds a server record.
	pub fn insert_server(&self, record: ServerRecord) {
		self.0.write().servers.insert(record.id.clone(), record);
	}

	/// Seeds a profile.
	pub fn insert_profile(&self, profile: Profile) {
		self.0.write().profiles.insert(profile.id.clone(), profile);
	}

	/// Returns a copy of a server record without going through the async contract.
	pub fn server(&self, id: &ServerId) -> Option<ServerRecord> {
		self.0.read().servers.get(id).cloned()
	}

	/// Returns a copy of a registration without going through the async contract.
	pub fn registration(&self, id: &ServerId) -> Option<RegistrationRecord> {
		self.0.read().registrations.get(id).cloned()
	}

	/// Number of PKCE rows currently held.
	pub fn pkce_state_count(&self) -> usize {
		self.0.read().pkce_states.len()
	}
}
impl OAuthStore for MemoryStore {
	fn fetch_server<'a>(&'a self, id: &'a ServerId) -> StoreFuture<'a, Option<ServerRecord>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.read().servers.get(id).cloned()) })
	}

	fn save_server(&self, record: ServerRecord) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().servers.insert(record.id.clone(), record);

			Ok(())
		})
	}

	fn fetch_profile<'a>(&'a self, id: &'a ProfileId) -> StoreFuture<'a, Option<Profile>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.read().profiles.get(id).cloned()) })
	}

	fn fetch_registration<'a>(
		&'a self,
		server: &'a ServerId,
	) -> StoreFuture<'a, Option<RegistrationRecord>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.read().registrations.get(server).cloned()) })
	}

	fn save_registration(&self, record: RegistrationRecord) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move {
			map.write().registrations.insert(record.server_id.clone(), record);

			Ok(())
		})
	}

	fn insert_pkce_state(&self, row: PkceFlowState) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move { map.write().insert_pkce(row) })
	}

	fn take_pkce_state<'a>(&'a self, state: &'a str) -> StoreFuture<'a, Option<PkceFlowState>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.write().pkce_states.remove(state)) })
	}

	fn purge_expired_pkce(&self, now: OffsetDateTime) -> StoreFuture<'_, usize> {
		let map = self.0.clone();

		Box::pin(async move { Ok::<_, StoreError>(map.write().purge_expired(now)) })
	}
}
