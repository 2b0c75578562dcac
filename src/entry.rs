//! Directory entries as the browser models them, and helper methods for
//! extracting data from search results.
use std::sync::atomic::{AtomicU64, Ordering};

use ldap3::SearchEntry;

use crate::{
	connection::{BrowserConnection, ConnectionId},
	directory::LdapUrl,
	dn::Dn,
	error::Error,
};

/// An extension trait for [`SearchEntry`] that provides convenience methods for
/// extracting data. Attribute names are matched case-insensitively, as LDAP
/// servers are free to return them in any case.
pub trait SearchEntryExt {
	/// All values of an attribute. Values which are not valid UTF-8 are
	/// skipped.
	fn attr_values(&self, attr: &str) -> &[String];

	/// Get the first value of an attribute, in binary form
	fn bin_attr_first(&self, attr: &str) -> Option<&[u8]>;

	/// Get the first value of an attribute. Will return `None` if attribute
	/// value is not valid UTF-8.
	fn attr_first(&self, attr: &str) -> Option<&str> {
		self.attr_values(attr).first().map(String::as_str)
	}

	/// Whether an attribute holds the given value, ignoring case.
	fn has_value(&self, attr: &str, value: &str) -> bool {
		self.attr_values(attr).iter().any(|v| v.eq_ignore_ascii_case(value))
	}

	/// Get the first value of an attribute, interpreted as a boolean.
	fn bool_first(&self, attr: &str) -> Option<Result<bool, Error>> {
		match self.attr_first(attr) {
			Some(v) if v.eq_ignore_ascii_case("TRUE") => Some(Ok(true)),
			Some(v) if v.eq_ignore_ascii_case("FALSE") => Some(Ok(false)),
			Some(_) => Some(Err(Error::Invalid(attr.to_owned()))),
			None => None,
		}
	}
}

impl SearchEntryExt for SearchEntry {
	fn attr_values(&self, attr: &str) -> &[String] {
		if let Some(values) = self.attrs.get(attr) {
			return values;
		}
		self.attrs
			.iter()
			.find(|(name, _)| name.eq_ignore_ascii_case(attr))
			.map_or(&[], |(_, values)| values.as_slice())
	}

	fn bin_attr_first(&self, attr: &str) -> Option<&[u8]> {
		if let Some(value) = self.attr_first(attr) {
			return Some(value.as_bytes());
		}

		self.bin_attrs
			.iter()
			.find(|(name, _)| name.eq_ignore_ascii_case(attr))
			.and_then(|(_, values)| values.first().map(Vec::as_slice))
	}
}

/// Identity of a cached entry. Identifiers are never reused, so an
/// identifier of an uncached entry can not alias a newer one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl EntryId {
	/// Allocate a fresh identifier.
	pub(crate) fn next() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new(1);
		Self(NEXT.fetch_add(1, Ordering::Relaxed))
	}
}

/// What kind of node an entry is in the browser tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
	/// The Root DSE
	Root,
	/// A naming context or configured base entry
	BaseDn,
	/// An entry advertised by the Root DSE, like the subschema subentry
	Metadata,
	/// An ordinary entry found by a search
	Directory,
	/// A search continuation the server did not resolve; the entry stands in
	/// for the referred-to entry
	Continuation {
		/// The referral URL
		url: String,
	},
}

/// Flags derived from the object classes and operational attributes of an
/// entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryFlags {
	/// The entry is an alias
	pub alias: bool,
	/// The entry is a referral
	pub referral: bool,
	/// The entry is a subentry
	pub subentry: bool,
	/// Whether the entry may have children. A hint only
	pub has_children_hint: bool,
}

impl Default for EntryFlags {
	fn default() -> Self {
		Self { alias: false, referral: false, subentry: false, has_children_hint: true }
	}
}

/// One directory object.
#[derive(Clone, Debug)]
pub struct Entry {
	/// The identity of this entry
	pub(crate) id: EntryId,
	/// The DN as the server spelled it
	pub(crate) dn: Dn,
	/// Back-pointer for tree navigation, not an ownership edge
	pub(crate) parent: Option<EntryId>,
	/// Node kind
	pub(crate) kind: EntryKind,
	/// Alias/referral/subentry flags
	pub(crate) flags: EntryFlags,
}

impl Entry {
	/// Create a new, not yet cached entry.
	pub(crate) fn new(dn: Dn, kind: EntryKind) -> Self {
		Self { id: EntryId::next(), dn, parent: None, kind, flags: EntryFlags::default() }
	}

	/// The identity of this entry.
	#[must_use]
	pub fn id(&self) -> EntryId {
		self.id
	}

	/// The DN of this entry.
	#[must_use]
	pub fn dn(&self) -> &Dn {
		&self.dn
	}

	/// The parent in the browser tree.
	#[must_use]
	pub fn parent(&self) -> Option<EntryId> {
		self.parent
	}

	/// Node kind.
	#[must_use]
	pub fn kind(&self) -> &EntryKind {
		&self.kind
	}

	/// Alias/referral/subentry flags.
	#[must_use]
	pub fn flags(&self) -> EntryFlags {
		self.flags
	}

	/// Whether the entry is an alias.
	#[must_use]
	pub fn is_alias(&self) -> bool {
		self.flags.alias
	}

	/// Whether the entry is a referral.
	#[must_use]
	pub fn is_referral(&self) -> bool {
		self.flags.referral
	}

	/// Whether the entry is a subentry.
	#[must_use]
	pub fn is_subentry(&self) -> bool {
		self.flags.subentry
	}
}

/// A reference to an entry which may not have been read yet: bookmarks,
/// alias targets and referral targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryRef {
	/// The entry is cached
	Resolved(EntryId),
	/// Only the location of the entry is known
	Unresolved {
		/// The connection the entry lives on
		connection: ConnectionId,
		/// The DN of the entry
		dn: Dn,
	},
}

impl EntryRef {
	/// Reference the target of an alias, from its `aliasedObjectName` value.
	pub fn alias_target(
		connection: ConnectionId,
		aliased_object_name: &str,
	) -> Result<Self, Error> {
		Ok(Self::Unresolved { connection, dn: Dn::parse(aliased_object_name)? })
	}

	/// Reference the target of a referral on the connection serving `url`.
	#[must_use]
	pub fn referral_target(connection: ConnectionId, url: &LdapUrl) -> Self {
		Self::Unresolved { connection, dn: url.dn.clone() }
	}

	/// Look the entry up in the cache of `connection`. `None` if the entry is
	/// not cached there (anymore).
	#[must_use]
	pub fn resolve(&self, connection: &BrowserConnection) -> Option<EntryId> {
		match self {
			Self::Resolved(id) => connection.cache().entry(*id).map(Entry::id),
			Self::Unresolved { connection: id, dn } if id == connection.id() => {
				connection.cache().get(dn, connection.schema())
			}
			Self::Unresolved { .. } => None,
		}
	}
}
