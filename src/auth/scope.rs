//! Scope normalization and the denylist applied before requesting advertised scopes.
//!
//! Authorization servers often advertise every scope they know about. Some categories need
//! manual pre-approval by the server operator (identity scopes, vendor metadata scopes,
//! offline access), and requesting them makes the whole authorization fail. Those are stripped
//! before the `scope` parameter is built.

// std
use std::collections::BTreeSet;
// self
use crate::_prelude::*;

/// Exact scope names that are never requested automatically.
pub const DENIED_SCOPES: &[&str] =
	&["openid", "profile", "email", "address", "phone", "offline_access", "read:metadata"];
/// Scope suffixes that mark vendor metadata scopes.
pub const DENIED_SCOPE_SUFFIXES: &[&str] = &[":metadata", ".metadata"];

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// Empty scope entries are not allowed.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace characters.
	#[error("Scope contains whitespace: {scope}.")]
	ContainsWhitespace {
		/// The offending scope string.
		scope: String,
	},
}

/// Deduplicated, sorted set of OAuth scopes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ScopeSet(BTreeSet<String>);
impl ScopeSet {
	/// Creates a normalized scope set, rejecting empty or whitespace-bearing entries.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut set = BTreeSet::new();

		for scope in scopes {
			let owned = scope.into();

			validate(&owned)?;
			set.insert(owned);
		}

		Ok(Self(set))
	}

	/// Builds a set from server-advertised values, silently dropping malformed entries.
	pub fn from_advertised<'a, I>(scopes: I) -> Self
	where
		I: IntoIterator<Item = &'a String>,
	{
		Self(scopes.into_iter().filter(|scope| validate(scope).is_ok()).cloned().collect())
	}

	/// Returns the subset that may be requested without manual pre-approval.
	pub fn requestable(&self) -> Self {
		Self(self.0.iter().filter(|scope| !is_denied(scope)).cloned().collect())
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true if no scopes are defined.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns true if the set contains the provided scope.
	pub fn contains(&self, scope: &str) -> bool {
		self.0.contains(scope)
	}

	/// Iterator over normalized scopes.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(String::as_str)
	}

	/// Space-delimited representation used for the `scope` parameter.
	pub fn normalized(&self) -> String {
		self.iter().collect::<Vec<_>>().join(" ")
	}
}
impl TryFrom<Vec<String>> for ScopeSet {
	type Error = ScopeValidationError;

	fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}
impl From<ScopeSet> for Vec<String> {
	fn from(value: ScopeSet) -> Self {
		value.0.into_iter().collect()
	}
}
impl FromStr for ScopeSet {
	type Err = ScopeValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s.split_whitespace())
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.normalized())
	}
}

/// Returns true when a scope belongs to a category that needs manual pre-approval.
pub fn is_denied(scope: &str) -> bool {
	let lowered = scope.to_ascii_lowercase();

	DENIED_SCOPES.contains(&lowered.as_str())
		|| DENIED_SCOPE_SUFFIXES.iter().any(|suffix| lowered.ends_with(suffix))
}

fn validate(scope: &str) -> Result<(), ScopeValidationError> {
	if scope.is_empty() {
		return Err(ScopeValidationError::Empty);
	}
	if scope.chars().any(char::is_whitespace) {
		return Err(ScopeValidationError::ContainsWhitespace { scope: scope.to_owned() });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn scopes_normalize_and_dedupe() {
		let scopes = ScopeSet::new(["write", "read", "read"]).expect("Scope fixture should be valid.");

		assert_eq!(scopes.normalized(), "read write");
		assert_eq!(scopes.len(), 2);
		assert!(ScopeSet::new(["has space"]).is_err());
		assert!(ScopeSet::new([""]).is_err());
	}

	#[test]
	fn requestable_strips_denied_categories() {
		let advertised = ["openid", "profile", "email", "offline_access", "repo", "org:metadata"]
			.map(String::from);
		let scopes = ScopeSet::from_advertised(advertised.iter());

		assert_eq!(scopes.requestable().normalized(), "repo");
	}

	#[test]
	fn fully_denied_sets_become_empty() {
		let advertised = ["openid", "OFFLINE_ACCESS", "read:metadata"].map(String::from);
		let scopes = ScopeSet::from_advertised(advertised.iter()).requestable();

		assert!(scopes.is_empty());
	}

	#[test]
	fn advertised_values_skip_malformed_entries() {
		let advertised = ["", "bad scope", "tools:call"].map(String::from);
		let scopes = ScopeSet::from_advertised(advertised.iter());

		assert_eq!(scopes.iter().collect::<Vec<_>>(), vec!["tools:call"]);
	}
}
