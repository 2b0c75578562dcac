//! The entry cache of a browser connection
use std::collections::HashMap;

use ldap3::SearchEntry;

use crate::{
	dn::Dn,
	entry::{Entry, EntryId, EntryKind},
	schema::Schema,
	search::{PagedResultsControl, DEFAULT_FILTER},
};

/// Attributes of an entry as last read from the server.
#[derive(Clone, Debug, Default)]
pub struct AttributeInfo {
	/// Textual values
	pub attributes: HashMap<String, Vec<String>>,
	/// Values which are not valid UTF-8
	pub binary: HashMap<String, Vec<Vec<u8>>>,
	/// Whether all user attributes were read
	pub initialized: bool,
}

impl AttributeInfo {
	/// Values of an attribute, matching the name case-insensitively.
	#[must_use]
	pub fn values(&self, name: &str) -> &[String] {
		self.attributes
			.iter()
			.find(|(attribute, _)| attribute.eq_ignore_ascii_case(name))
			.map_or(&[], |(_, values)| values.as_slice())
	}

	/// Store the attributes of a search result, replacing previous values of
	/// the same attributes.
	pub fn merge(&mut self, record: &SearchEntry) {
		for (name, values) in &record.attrs {
			self.attributes.retain(|attribute, _| !attribute.eq_ignore_ascii_case(name));
			self.attributes.insert(name.clone(), values.clone());
		}
		for (name, values) in &record.bin_attrs {
			self.binary.retain(|attribute, _| !attribute.eq_ignore_ascii_case(name));
			self.binary.insert(name.clone(), values.clone());
		}
	}
}

/// Children of an entry as last listed.
#[derive(Clone, Debug, Default)]
pub struct ChildrenInfo {
	/// Children in the order the server returned them
	pub children: Vec<EntryId>,
	/// Whether the children were listed
	pub initialized: bool,
	/// Whether the listing was cut short
	pub has_more: bool,
	/// Scroll mode cursor back to the first page
	pub top_page: Option<PagedResultsControl>,
	/// Scroll mode cursor to the following page
	pub next_page: Option<PagedResultsControl>,
}

/// Maps distinguished names to entries. There is at most one entry per
/// distinct DN; DNs are compared in their normalized form.
#[derive(Debug)]
pub struct EntryCache {
	/// All cached entries
	entries: HashMap<EntryId, Entry>,
	/// Normalized DN to entry
	index: HashMap<String, EntryId>,
	/// Attribute side table
	attributes: HashMap<EntryId, AttributeInfo>,
	/// Children side table
	children: HashMap<EntryId, ChildrenInfo>,
	/// Children filter overrides
	children_filters: HashMap<EntryId, String>,
	/// The Root DSE entry
	root: EntryId,
}

impl Default for EntryCache {
	fn default() -> Self {
		Self::new()
	}
}

impl EntryCache {
	/// A cache holding only a fresh root entry.
	#[must_use]
	pub fn new() -> Self {
		let root = Entry::new(Dn::root(), EntryKind::Root);
		let id = root.id;
		Self {
			entries: HashMap::from([(id, root)]),
			index: HashMap::new(),
			attributes: HashMap::new(),
			children: HashMap::new(),
			children_filters: HashMap::new(),
			root: id,
		}
	}

	/// The Root DSE entry.
	#[must_use]
	pub fn root(&self) -> EntryId {
		self.root
	}

	/// Number of cached entries, the root included.
	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether only the root is cached.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.len() == 1
	}

	/// Look up an entry by identity.
	#[must_use]
	pub fn entry(&self, id: EntryId) -> Option<&Entry> {
		self.entries.get(&id)
	}

	/// Mutable access to an entry.
	pub(crate) fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
		self.entries.get_mut(&id)
	}

	/// Look up an entry by DN. The root DN always yields the root entry.
	#[must_use]
	pub fn get(&self, dn: &Dn, schema: &Schema) -> Option<EntryId> {
		if dn.is_root() {
			return Some(self.root);
		}
		self.index.get(&dn.normalize(schema)).copied()
	}

	/// Look up an entry by DN and return it.
	#[must_use]
	pub fn get_entry(&self, dn: &Dn, schema: &Schema) -> Option<&Entry> {
		self.get(dn, schema).and_then(|id| self.entries.get(&id))
	}

	/// Insert an entry. An entry previously cached under an equivalent DN is
	/// replaced, together with its side tables.
	pub fn put(&mut self, entry: Entry, schema: &Schema) -> EntryId {
		let id = entry.id;
		if entry.dn.is_root() {
			self.entries.remove(&self.root);
			self.root = id;
		} else if let Some(old) = self.index.insert(entry.dn.normalize(schema), id) {
			if old != id {
				self.forget(old);
			}
		}
		self.entries.insert(id, entry);
		id
	}

	/// The entry cached under `dn`, or a new one of the given kind.
	pub fn get_or_insert(&mut self, dn: &Dn, kind: EntryKind, schema: &Schema) -> EntryId {
		match self.get(dn, schema) {
			Some(id) => id,
			None => self.put(Entry::new(dn.clone(), kind), schema),
		}
	}

	/// Uncache a single entry and drop its side tables, paging cursors
	/// included. Its children stay cached.
	pub fn remove(&mut self, id: EntryId) -> Option<Entry> {
		let entry = self.forget(id)?;
		self.index.retain(|_, cached| *cached != id);
		Some(entry)
	}

	/// Uncache an entry and everything below it, descendants first.
	pub fn remove_recursive(&mut self, id: EntryId) -> Vec<Entry> {
		self.descendants_post_order(id).into_iter().filter_map(|id| self.remove(id)).collect()
	}

	/// Drop every entry and side table and seed a fresh root.
	pub fn clear(&mut self) {
		*self = Self::new();
	}

	/// Rebuild the DN index after the schema changed. When two entries now
	/// share a key, the most recently created one stays and takes over the
	/// links of the other one. Returns the replaced entries with their
	/// replacements.
	pub(crate) fn reindex(&mut self, schema: &Schema) -> Vec<(EntryId, EntryId)> {
		let mut ids: Vec<EntryId> = self.entries.keys().copied().collect();
		ids.sort();
		self.index.clear();
		let mut merged = Vec::new();
		for id in ids {
			let Some(entry) = self.entries.get(&id) else { continue };
			if entry.dn.is_root() {
				continue;
			}
			if let Some(previous) = self.index.insert(entry.dn.normalize(schema), id) {
				merged.push((previous, id));
			}
		}
		for &(old, new) in &merged {
			self.replace_entry(old, new);
		}
		merged
	}

	/// Replace every link to `old` with `new` and drop `old`. Side tables of
	/// `old` are kept where `new` has none.
	fn replace_entry(&mut self, old: EntryId, new: EntryId) {
		for entry in self.entries.values_mut() {
			if entry.parent == Some(old) {
				entry.parent = Some(new);
			}
		}
		for info in self.children.values_mut() {
			let mut seen = Vec::with_capacity(info.children.len());
			for child in info.children.drain(..) {
				let child = if child == old { new } else { child };
				if !seen.contains(&child) {
					seen.push(child);
				}
			}
			info.children = seen;
		}
		if let Some(info) = self.attributes.remove(&old) {
			self.attributes.entry(new).or_insert(info);
		}
		if let Some(info) = self.children.remove(&old) {
			self.children.entry(new).or_insert(info);
		}
		if let Some(filter) = self.children_filters.remove(&old) {
			self.children_filters.entry(new).or_insert(filter);
		}
		self.entries.remove(&old);
	}

	/// Link `child` below `parent`, unless it already is.
	pub fn attach_child(&mut self, parent: EntryId, child: EntryId) {
		if let Some(entry) = self.entries.get_mut(&child) {
			entry.parent = Some(parent);
		}
		let info = self.children.entry(parent).or_default();
		if !info.children.contains(&child) {
			info.children.push(child);
		}
	}

	/// Unlink an entry from its parent's children.
	pub fn detach(&mut self, child: EntryId) {
		let parent = self.entries.get(&child).and_then(|entry| entry.parent);
		if let Some(info) = parent.and_then(|parent| self.children.get_mut(&parent)) {
			info.children.retain(|&id| id != child);
		}
	}

	/// Children of an entry, `None` if they were never listed.
	#[must_use]
	pub fn children(&self, id: EntryId) -> Option<&ChildrenInfo> {
		self.children.get(&id)
	}

	/// Mutable children info, created on demand.
	pub fn children_mut(&mut self, id: EntryId) -> &mut ChildrenInfo {
		self.children.entry(id).or_default()
	}

	/// Cached attributes of an entry.
	#[must_use]
	pub fn attributes(&self, id: EntryId) -> Option<&AttributeInfo> {
		self.attributes.get(&id)
	}

	/// Mutable attribute info, created on demand.
	pub fn attributes_mut(&mut self, id: EntryId) -> &mut AttributeInfo {
		self.attributes.entry(id).or_default()
	}

	/// The filter used to list the children of an entry.
	#[must_use]
	pub fn children_filter(&self, id: EntryId) -> &str {
		self.children_filters.get(&id).map_or(DEFAULT_FILTER, String::as_str)
	}

	/// Override the filter used to list the children of an entry. `None`
	/// restores the default.
	pub fn set_children_filter(&mut self, id: EntryId, filter: Option<String>) {
		match filter {
			Some(filter) => self.children_filters.insert(id, filter),
			None => self.children_filters.remove(&id),
		};
	}

	/// All cached entries, in no particular order.
	pub fn iter(&self) -> impl Iterator<Item = &Entry> {
		self.entries.values()
	}

	/// Drop an entry and its side tables, but not its index slot.
	fn forget(&mut self, id: EntryId) -> Option<Entry> {
		self.attributes.remove(&id);
		self.children.remove(&id);
		self.children_filters.remove(&id);
		self.entries.remove(&id)
	}

	/// `id` and every entry below it, linked either as listed child or by
	/// parent pointer, descendants before their ancestors.
	fn descendants_post_order(&self, id: EntryId) -> Vec<EntryId> {
		let mut below: HashMap<EntryId, Vec<EntryId>> = HashMap::new();
		for entry in self.entries.values() {
			if let Some(parent) = entry.parent {
				below.entry(parent).or_default().push(entry.id);
			}
		}
		for (parent, info) in &self.children {
			let linked = below.entry(*parent).or_default();
			for child in &info.children {
				if !linked.contains(child) {
					linked.push(*child);
				}
			}
		}

		let mut order = Vec::new();
		let mut stack = vec![(id, false)];
		while let Some((current, expanded)) = stack.pop() {
			if expanded || order.contains(&current) {
				if !order.contains(&current) {
					order.push(current);
				}
				continue;
			}
			stack.push((current, true));
			for child in below.get(&current).into_iter().flatten() {
				if *child != current {
					stack.push((*child, false));
				}
			}
		}
		order
	}
}
