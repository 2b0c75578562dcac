//! The per-connection browser model: entry cache, schema, saved searches and
//! bookmarks
use std::{fmt, sync::Arc};

use ldap3::SearchEntry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
	cache::EntryCache,
	config::BrowserOptions,
	dn::Dn,
	entry::{EntryId, EntryKind, SearchEntryExt},
	error::Error,
	events::{BrowserEvent, Notifier},
	manager::{BookmarkManager, SearchManager},
	monitor::Monitor,
	schema::Schema,
	search::{oid, SearchOutcome, SearchParameter, SearchResult, ALL_USER_ATTRIBUTES, NO_ATTRIBUTES},
};

/// Attributes telling whether an entry has children, in order of preference.
const HAS_CHILDREN_ATTRIBUTES: [&str; 3] =
	["hasSubordinates", "numSubordinates", "subordinateCount"];
/// Root DSE attribute listing the supported controls
const SUPPORTED_CONTROL: &str = "supportedControl";

/// Stable identifier of a connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
	/// The identifier as string.
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<&str> for ConnectionId {
	fn from(id: &str) -> Self {
		Self(id.to_owned())
	}
}

impl From<String> for ConnectionId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

impl fmt::Display for ConnectionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Everything the browser knows about one connection. Operations that change
/// the model take `&mut self`, so there is at most one of them in flight per
/// connection.
#[derive(Debug)]
pub struct BrowserConnection {
	/// Identifier of the connection
	id: ConnectionId,
	/// Search limits and behaviour
	options: BrowserOptions,
	/// Current schema, replaced as a whole
	schema: Arc<Schema>,
	/// Entry cache
	cache: EntryCache,
	/// Saved searches
	searches: SearchManager,
	/// Bookmarks
	bookmarks: BookmarkManager,
	/// Event delivery
	notifier: Notifier,
}

impl BrowserConnection {
	/// A connection with an empty cache and the default schema.
	#[must_use]
	pub fn new(id: ConnectionId, options: BrowserOptions, notifier: Notifier) -> Self {
		Self {
			id,
			options,
			schema: Schema::default_schema(),
			cache: EntryCache::new(),
			searches: SearchManager::default(),
			bookmarks: BookmarkManager::default(),
			notifier,
		}
	}

	/// Identifier of the connection.
	#[must_use]
	pub fn id(&self) -> &ConnectionId {
		&self.id
	}

	/// Search limits and behaviour.
	#[must_use]
	pub fn options(&self) -> &BrowserOptions {
		&self.options
	}

	/// The current schema.
	#[must_use]
	pub fn schema(&self) -> &Arc<Schema> {
		&self.schema
	}

	/// Install a new schema and re-key the cache under it. Entries which are
	/// equal under the new schema are merged, saved searches follow.
	pub fn set_schema(&mut self, schema: Arc<Schema>) {
		self.schema = schema;
		let merged = self.cache.reindex(&self.schema);
		if !merged.is_empty() {
			debug!(merged = merged.len(), "Merged entries with equal DNs");
		}
		for (old, new) in merged {
			for search in self.searches.iter_mut() {
				search.replace_entry(old, new);
			}
		}
	}

	/// Fall back to the default schema.
	pub fn reset_schema(&mut self) {
		if !self.schema.is_default() {
			self.set_schema(Schema::default_schema());
			self.notifier.send(BrowserEvent::SchemaReset);
		}
	}

	/// The entry cache.
	#[must_use]
	pub fn cache(&self) -> &EntryCache {
		&self.cache
	}

	/// The entry cache, for modification.
	pub fn cache_mut(&mut self) -> &mut EntryCache {
		&mut self.cache
	}

	/// The Root DSE entry.
	#[must_use]
	pub fn root(&self) -> EntryId {
		self.cache.root()
	}

	/// Look up a cached entry by DN.
	#[must_use]
	pub fn get(&self, dn: &Dn) -> Option<EntryId> {
		self.cache.get(dn, &self.schema)
	}

	/// Saved searches.
	#[must_use]
	pub fn searches(&self) -> &SearchManager {
		&self.searches
	}

	/// Saved searches, for modification.
	pub fn searches_mut(&mut self) -> &mut SearchManager {
		&mut self.searches
	}

	/// Bookmarks.
	#[must_use]
	pub fn bookmarks(&self) -> &BookmarkManager {
		&self.bookmarks
	}

	/// Bookmarks, for modification.
	pub fn bookmarks_mut(&mut self) -> &mut BookmarkManager {
		&mut self.bookmarks
	}

	/// Event delivery.
	#[must_use]
	pub fn notifier(&self) -> &Notifier {
		&self.notifier
	}

	/// Forget everything read from the server: search results, the entry
	/// cache and the schema.
	pub fn close(&mut self) {
		info!(connection = %self.id, "Closing browser connection");
		for search in self.searches.iter_mut() {
			search.invalidate();
		}
		self.cache.clear();
		self.reset_schema();
	}

	/// Whether the server advertises a control. Servers which advertise no
	/// controls at all are assumed to support every control.
	#[must_use]
	pub fn supports_control(&self, control: &str) -> bool {
		let advertised = self
			.cache
			.attributes(self.root())
			.map(|info| info.values(SUPPORTED_CONTROL))
			.unwrap_or_default();
		advertised.is_empty() || advertised.iter().any(|oid| oid == control)
	}

	/// Complete a search before it is sent: request the attributes needed to
	/// classify results and drop controls the server does not support.
	pub fn prepare_parameter(&self, parameter: &mut SearchParameter) {
		let requested = |attributes: &[String], name: &str| {
			attributes.iter().any(|a| a.eq_ignore_ascii_case(name) || a == ALL_USER_ATTRIBUTES)
		};
		let mut extra = Vec::new();
		if parameter.init_has_children_flag {
			// the default schema knows no attribute types, assume the common one
			let attribute = if self.schema.is_default() {
				Some(HAS_CHILDREN_ATTRIBUTES[0])
			} else {
				HAS_CHILDREN_ATTRIBUTES.into_iter().find(|a| self.schema.has_attribute_type(a))
			};
			if let Some(attribute) = attribute {
				if !parameter.attributes.iter().any(|a| a.eq_ignore_ascii_case(attribute)) {
					extra.push(attribute.to_owned());
				}
			}
		}
		if !requested(&parameter.attributes, "objectClass") {
			extra.push("objectClass".to_owned());
		}
		if !extra.is_empty() {
			parameter.attributes.retain(|a| a != NO_ATTRIBUTES);
			parameter.attributes.extend(extra);
		}

		parameter.controls.retain(|control| self.supports_control(&control.oid));
		if parameter.paged.is_some() && !self.supports_control(oid::PAGED_RESULTS) {
			debug!("Server does not support paged results");
			parameter.paged = None;
		}
	}

	/// Store the entries of a search outcome in the cache, creating missing
	/// entries and ancestors, and return them as search results.
	pub fn update_model(
		&mut self,
		parameter: &SearchParameter,
		outcome: &SearchOutcome,
		monitor: &Monitor,
	) -> Vec<SearchResult> {
		let all_attributes = parameter.attributes.iter().any(|a| a == ALL_USER_ATTRIBUTES);
		let mut results = Vec::with_capacity(outcome.entries.len());
		for record in &outcome.entries {
			let dn = match Dn::parse(&record.dn) {
				Ok(dn) => dn,
				Err(err) => {
					monitor.report_error(err);
					continue;
				}
			};
			let id = self.cache_entry(&dn);
			self.init_flags(id, record);
			let info = self.cache.attributes_mut(id);
			info.merge(record);
			info.initialized |= all_attributes;
			results.push(SearchResult { dn, entry: id });
		}
		results
	}

	/// The cached entry for `dn`, created together with any missing ancestor.
	pub(crate) fn cache_entry(&mut self, dn: &Dn) -> EntryId {
		if let Some(id) = self.cache.get(dn, &self.schema) {
			return id;
		}
		let parent = match dn.parent() {
			Some(parent) if !parent.is_root() => self.cache_entry(&parent),
			_ => self.root(),
		};
		let id = self.cache.get_or_insert(dn, EntryKind::Directory, &self.schema);
		if let Some(entry) = self.cache.entry_mut(id) {
			entry.parent = Some(parent);
		}
		id
	}

	/// Derive alias, referral, subentry and has-children flags from a search
	/// result.
	fn init_flags(&mut self, id: EntryId, record: &SearchEntry) {
		let Some(entry) = self.cache.entry_mut(id) else { return };
		if !record.attr_values("objectClass").is_empty() {
			entry.flags.alias = record.has_value("objectClass", "alias");
			entry.flags.referral = record.has_value("objectClass", "referral");
			entry.flags.subentry = record.has_value("objectClass", "subentry");
		}
		if let Some(has_children) = has_children(record) {
			entry.flags.has_children_hint = has_children;
		}
	}

	/// Invalidate every saved search with one of `entries` among its
	/// results.
	pub(crate) fn invalidate_searches(&mut self, entries: &[EntryId]) -> usize {
		entries.iter().map(|&entry| self.searches.invalidate_containing(entry)).sum()
	}

	/// Resolve the DN of a cached entry.
	pub(crate) fn dn_of(&self, id: EntryId) -> Result<Dn, Error> {
		self.cache
			.entry(id)
			.map(|entry| entry.dn.clone())
			.ok_or_else(|| Error::Uncached(format!("{id:?}")))
	}
}

/// Interpret the has-children attributes of a search result.
fn has_children(record: &SearchEntry) -> Option<bool> {
	if let Some(Ok(value)) = record.bool_first(HAS_CHILDREN_ATTRIBUTES[0]) {
		return Some(value);
	}
	HAS_CHILDREN_ATTRIBUTES[1..]
		.iter()
		.find_map(|attribute| record.attr_first(attribute))
		.and_then(|count| count.trim().parse::<u64>().ok())
		.map(|count| count > 0)
}
