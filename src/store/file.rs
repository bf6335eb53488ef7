//! Simple file-backed [`OAuthStore`] for single-node deployments.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{ProfileId, ServerId},
	flows::PkceFlowState,
	registration::RegistrationRecord,
	server::{Profile, ServerRecord},
	store::{OAuthStore, Snapshot, StoreError, StoreFuture},
};

/// Persists the whole store to a JSON file after each mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Snapshot>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Seeds a profile and persists the snapshot.
	pub fn insert_profile(&self, profile: Profile) -> Result<(), StoreError> {
		let mut guard = self.inner.write();

		guard.profiles.insert(profile.id.clone(), profile);

		self.persist_locked(&guard)
	}

	fn load_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
		if !path.exists() {
			return Ok(Snapshot::default());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(Snapshot::default());
		}

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(&self, contents: &Snapshot) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let serialized =
			serde_json::to_vec_pretty(contents).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	fn mutate<T>(&self, f: impl FnOnce(&mut Snapshot) -> Result<T, StoreError>) -> Result<T, StoreError> {
		let mut guard = self.inner.write();
		let value = f(&mut guard)?;

		self.persist_locked(&guard)?;

		Ok(value)
	}
}
impl OAuthStore for FileStore {
	fn fetch_server<'a>(&'a self, id: &'a ServerId) -> StoreFuture<'a, Option<ServerRecord>> {
		Box::pin(async move { Ok(self.inner.read().servers.get(id).cloned()) })
	}

	fn save_server(&self, record: ServerRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.mutate(|snapshot| {
				snapshot.servers.insert(record.id.clone(), record);

				Ok(())
			})
		})
	}

	fn fetch_profile<'a>(&'a self, id: &'a ProfileId) -> StoreFuture<'a, Option<Profile>> {
		Box::pin(async move { Ok(self.inner.read().profiles.get(id).cloned()) })
	}

	fn fetch_registration<'a>(
		&'a self,
		server: &'a ServerId,
	) -> StoreFuture<'a, Option<RegistrationRecord>> {
		Box::pin(async move { Ok(self.inner.read().registrations.get(server).cloned()) })
	}

	fn save_registration(&self, record: RegistrationRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.mutate(|snapshot| {
				snapshot.registrations.insert(record.server_id.clone(), record);

				Ok(())
			})
		})
	}

	fn insert_pkce_state(&self, row: PkceFlowState) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.mutate(|snapshot| snapshot.insert_pkce(row)) })
	}

	fn take_pkce_state<'a>(&'a self, state: &'a str) -> StoreFuture<'a, Option<PkceFlowState>> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let row = guard.pkce_states.remove(state);

			if row.is_some() {
				self.persist_locked(&guard)?;
			}

			Ok(row)
		})
	}

	fn purge_expired_pkce(&self, now: OffsetDateTime) -> StoreFuture<'_, usize> {
		Box::pin(async move { self.mutate(|snapshot| Ok(snapshot.purge_expired(now))) })
	}
}
