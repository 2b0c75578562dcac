//! Error codes

/// LDAP result codes the browser core reacts to.
///
/// See RFC 4511 appendix A for the full list.
pub mod result_code {
	/// The operation completed successfully.
	pub const SUCCESS: u32 = 0;
	/// The time limit of a search was exceeded.
	pub const TIME_LIMIT_EXCEEDED: u32 = 3;
	/// The size (count) limit of a search was exceeded.
	pub const SIZE_LIMIT_EXCEEDED: u32 = 4;
	/// The server returned a referral instead of a result.
	pub const REFERRAL: u32 = 10;
	/// An administrative limit of the server was exceeded.
	pub const ADMIN_LIMIT_EXCEEDED: u32 = 11;
	/// The target entry does not exist.
	pub const NO_SUCH_OBJECT: u32 = 32;
	/// The operation is only allowed on leaf entries.
	pub const NOT_ALLOWED_ON_NON_LEAF: u32 = 66;
	/// The target entry already exists.
	pub const ENTRY_ALREADY_EXISTS: u32 = 68;
}

/// Errors that can occur when using this library
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// A required attribute or record was missing.
	#[error("Missing data: {0}")]
	Missing(String),
	/// The contents of an attribute, file or setting did not conform to the
	/// expected syntax.
	#[error("Malformed data: {0}")]
	Invalid(String),
	/// A distinguished name could not be parsed.
	#[error("Malformed DN {dn:?}: {reason}")]
	InvalidDn {
		/// The offending input
		dn: String,
		/// What is wrong with it
		reason: &'static str,
	},
	/// The Root DSE does not name a subschema subentry.
	#[error("Missing schema location in the Root DSE")]
	MissingSchemaLocation,
	/// The subschema subentry could not be read.
	#[error("No schema information returned by the server")]
	NoSchemaInformation,
	/// A schema description could not be parsed.
	#[error("Unparsable schema description: {0}")]
	Schema(String),
	/// The server answered an operation with a non-success result code.
	#[error("LDAP error {code}: {message}")]
	Directory {
		/// The LDAP result code
		code: u32,
		/// Diagnostic message sent by the server
		message: String,
	},
	/// An operation was attempted on an entry which is no longer cached.
	#[error("Entry is not cached: {0}")]
	Uncached(String),
	/// A persisted state file has a version this library cannot read.
	#[error("Unsupported state file version {0}")]
	UnsupportedVersion(u32),
	/// An underlying protocol error or similar occurred, or the LDAP library
	/// was used incorrectly.
	#[error(transparent)]
	Ldap(#[from] ldap3::LdapError),
	/// Reading or writing a file failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),
	/// A persisted state file could not be encoded or decoded.
	#[error(transparent)]
	Json(#[from] serde_json::Error),
	/// An LDAP URL could not be parsed.
	#[error(transparent)]
	Url(#[from] url::ParseError),
}

impl Error {
	/// Shorthand for a [`Error::Directory`] error.
	pub fn directory(code: u32, message: impl Into<String>) -> Self {
		Self::Directory { code, message: message.into() }
	}

	/// The LDAP result code behind this error, if there is one.
	#[must_use]
	pub fn result_code(&self) -> Option<u32> {
		match self {
			Self::Directory { code, .. } => Some(*code),
			Self::Ldap(ldap3::LdapError::LdapResult { result }) => Some(result.rc),
			_ => None,
		}
	}

	/// Whether this error only signals that a limit cut the result short.
	#[must_use]
	pub fn is_limit_exceeded(&self) -> bool {
		matches!(
			self.result_code(),
			Some(
				result_code::TIME_LIMIT_EXCEEDED
					| result_code::SIZE_LIMIT_EXCEEDED
					| result_code::ADMIN_LIMIT_EXCEEDED
			)
		)
	}

	/// Whether the server refused to rename an entry because it has children.
	#[must_use]
	pub fn is_non_leaf(&self) -> bool {
		self.result_code() == Some(result_code::NOT_ALLOWED_ON_NON_LEAF)
	}
}
