//! Saved searches and bookmarks of a connection
use crate::{
	connection::ConnectionId,
	dn::Dn,
	entry::{EntryId, EntryRef},
	search::Search,
};

/// Items kept in a [`NamedList`].
pub trait Named {
	/// The unique name of the item
	fn name(&self) -> &str;
	/// Rename the item
	fn set_name(&mut self, name: String);
}

impl Named for Search {
	fn name(&self) -> &str {
		&self.parameter.name
	}

	fn set_name(&mut self, name: String) {
		self.parameter.name = name;
	}
}

/// A bookmarked entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bookmark {
	/// Display name
	pub name: String,
	/// Connection the entry lives on
	pub connection: ConnectionId,
	/// DN of the entry
	pub dn: Dn,
}

impl Bookmark {
	/// The bookmarked entry, to be resolved against a connection.
	#[must_use]
	pub fn target(&self) -> EntryRef {
		EntryRef::Unresolved { connection: self.connection.clone(), dn: self.dn.clone() }
	}
}

impl Named for Bookmark {
	fn name(&self) -> &str {
		&self.name
	}

	fn set_name(&mut self, name: String) {
		self.name = name;
	}
}

/// An ordered list of uniquely named items.
#[derive(Clone, Debug)]
pub struct NamedList<T> {
	/// Items in insertion order
	items: Vec<T>,
}

impl<T> Default for NamedList<T> {
	fn default() -> Self {
		Self { items: Vec::new() }
	}
}

/// Saved searches of a connection
pub type SearchManager = NamedList<Search>;
/// Bookmarks of a connection
pub type BookmarkManager = NamedList<Bookmark>;

impl<T: Named> NamedList<T> {
	/// Append an item. If its name is taken, it is renamed to
	/// `copy of <name>`, then `copy 2 of <name>`, `copy 3 of <name>`, and so
	/// on. Returns the final name.
	pub fn add(&mut self, mut item: T) -> &str {
		if self.get(item.name()).is_some() {
			let name = item.name().to_owned();
			let mut candidate = format!("copy of {name}");
			let mut n = 2;
			while self.get(&candidate).is_some() {
				candidate = format!("copy {n} of {name}");
				n += 1;
			}
			item.set_name(candidate);
		}
		self.items.push(item);
		self.items.last().map_or("", Named::name)
	}

	/// Look an item up by name.
	#[must_use]
	pub fn get(&self, name: &str) -> Option<&T> {
		self.items.iter().find(|item| item.name() == name)
	}

	/// Look an item up by name for modification.
	pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
		self.items.iter_mut().find(|item| item.name() == name)
	}

	/// Remove an item by name.
	pub fn remove(&mut self, name: &str) -> Option<T> {
		let position = self.items.iter().position(|item| item.name() == name)?;
		Some(self.items.remove(position))
	}

	/// Items in insertion order.
	pub fn iter(&self) -> std::slice::Iter<'_, T> {
		self.items.iter()
	}

	/// Items in insertion order, mutably.
	pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
		self.items.iter_mut()
	}

	/// Number of items.
	#[must_use]
	pub fn len(&self) -> usize {
		self.items.len()
	}

	/// Whether the list is empty.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}
}

impl SearchManager {
	/// Mark every search with `entry` among its results for re-execution.
	/// Returns the number of invalidated searches.
	pub fn invalidate_containing(&mut self, entry: EntryId) -> usize {
		let mut count = 0;
		for search in self.items.iter_mut().filter(|search| search.contains(entry)) {
			search.invalidate();
			count += 1;
		}
		count
	}
}
