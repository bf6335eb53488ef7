//! Optional sandbox wrappers for helper processes.
//!
//! Backends are detected on `PATH` and tried in preference order. A missing backend is never an
//! error; the helper then runs unsandboxed.

// std
use std::{
	ffi::{OsStr, OsString},
	path::{Path, PathBuf},
};
// self
use crate::{_prelude::*, launcher::CommandSpec};

/// Supported sandboxing programs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SandboxBackend {
	/// bubblewrap (`bwrap`).
	Bubblewrap,
	/// firejail.
	Firejail,
}
impl SandboxBackend {
	/// Backends in the order they are tried.
	pub const PREFERENCE: [Self; 2] = [Self::Bubblewrap, Self::Firejail];

	/// Executable name looked up on `PATH`.
	pub const fn program(self) -> &'static str {
		match self {
			Self::Bubblewrap => "bwrap",
			Self::Firejail => "firejail",
		}
	}

	/// Wraps `spec` when the backend is installed; `search_path` overrides `PATH`.
	pub fn try_wrap(self, spec: &CommandSpec, search_path: Option<&OsStr>) -> Option<CommandSpec> {
		let program = find_executable(self.program(), search_path)?;

		Some(self.wrap_with(&program, spec))
	}

	fn wrap_with(self, program: &Path, spec: &CommandSpec) -> CommandSpec {
		let mut args = match self {
			Self::Bubblewrap => {
				let mut args = [
					"--ro-bind", "/", "/", "--dev", "/dev", "--proc", "/proc", "--tmpfs", "/tmp",
				]
				.map(String::from)
				.to_vec();

				// Helpers keep a token cache under the home directory.
				if let Some(home) = home_dir(spec) {
					args.extend(["--bind".into(), home.clone(), home]);
				}

				args.extend(["--share-net", "--die-with-parent", "--"].map(String::from));

				args
			},
			Self::Firejail => ["--quiet", "--private-tmp"].map(String::from).to_vec(),
		};

		args.push(spec.program.clone());
		args.extend(spec.args.iter().cloned());

		CommandSpec { program: program.to_string_lossy().into_owned(), args, env: spec.env.clone() }
	}
}
impl Display for SandboxBackend {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.program())
	}
}

/// Sandbox selection policy.
#[derive(Clone, Debug)]
pub struct Sandbox {
	backends: Vec<SandboxBackend>,
	search_path: Option<OsString>,
}
impl Sandbox {
	/// Tries every backend in [`SandboxBackend::PREFERENCE`] order against the process `PATH`.
	pub fn new() -> Self {
		Self { backends: SandboxBackend::PREFERENCE.to_vec(), search_path: None }
	}

	/// Never wraps commands.
	pub fn disabled() -> Self {
		Self { backends: Vec::new(), search_path: None }
	}

	/// Looks up backends in `path` instead of the process `PATH`.
	pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
		self.search_path = Some(path.into());

		self
	}

	/// Wraps `spec` with the first available backend, or returns it unchanged.
	pub fn wrap(&self, spec: CommandSpec) -> (CommandSpec, Option<SandboxBackend>) {
		for backend in &self.backends {
			if let Some(wrapped) = backend.try_wrap(&spec, self.search_path.as_deref()) {
				tracing::debug!(backend = %backend, "Wrapping helper process in sandbox.");

				return (wrapped, Some(*backend));
			}
		}

		if !self.backends.is_empty() {
			tracing::warn!(program = %spec.program, "No sandbox backend available; running helper unsandboxed.");
		}

		(spec, None)
	}
}
impl Default for Sandbox {
	fn default() -> Self {
		Self::new()
	}
}

fn home_dir(spec: &CommandSpec) -> Option<String> {
	spec.env
		.get("HOME")
		.cloned()
		.or_else(|| std::env::var("HOME").ok())
		.filter(|home| !home.is_empty())
}

fn find_executable(name: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
	let path = match search_path {
		Some(path) => path.to_owned(),
		None => std::env::var_os("PATH")?,
	};

	std::env::split_paths(&path).map(|dir| dir.join(name)).find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
	// std
	use std::os::unix::fs::PermissionsExt;

	path.metadata().is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
	path.is_file()
}
