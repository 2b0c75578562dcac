//! Listing the children of an entry
//!
//! One run clears the children cached so far, lists the entries one level
//! below the parent and attaches them. Depending on the browser options the
//! listing is paged, and subentries as well as alias and referral objects are
//! listed by additional searches:
//!
//! * In transparent paging mode, pages are requested until the server stops
//!   handing out cookies or the count limit is reached. Page N+1 is only
//!   requested after the entries of page N are attached.
//! * In scroll mode, a single page is attached and cursors to the first and
//!   the following page are stored with the parent. [`next_page`] and
//!   [`top_page`] follow them.
//!
//! The children are marked initialized even when searches failed, errors are
//! left in the monitor. Whether the listing is complete is tracked in
//! [`ChildrenInfo::has_more`](crate::cache::ChildrenInfo::has_more).
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{
	cache::ChildrenInfo,
	connection::BrowserConnection,
	directory::{Directory, LdapUrl},
	entry::{Entry, EntryId, EntryKind},
	error::Error,
	events::{BrowserEvent, EventBatch},
	monitor::Monitor,
	root_dse::load_root_dse,
	search::{
		self, AliasDereferencing, Control, PagedResultsControl, ReferralHandling, Scope,
		SearchOutcome, SearchParameter, ALIAS_FILTER, ALIAS_OR_REFERRAL_FILTER, NO_ATTRIBUTES,
		REFERRAL_FILTER, SUBENTRY_FILTER,
	},
};

/// Which of the searches of a run a parameter is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Listing {
	/// The primary listing with the children filter
	Children,
	/// Subentries only
	Subentries,
	/// Alias objects
	Aliases,
	/// Referral objects
	Referrals,
	/// Alias and referral objects
	AliasesAndReferrals,
}

impl Listing {
	/// Whether the listing targets alias objects.
	fn includes_aliases(self) -> bool {
		matches!(self, Self::Aliases | Self::AliasesAndReferrals)
	}

	/// Whether the listing targets referral objects.
	fn includes_referrals(self) -> bool {
		matches!(self, Self::Referrals | Self::AliasesAndReferrals)
	}
}

/// List the children of an entry. The children of the root entry are the
/// base and metadata entries announced by the Root DSE.
///
/// With `purge_all_caches`, cached attributes and the has-children hint of
/// the parent are dropped as well.
pub async fn initialize_children(
	connection: &mut BrowserConnection,
	directory: &mut dyn Directory,
	entry: EntryId,
	purge_all_caches: bool,
	monitor: &Monitor,
) {
	initialize_children_of(connection, directory, &[entry], purge_all_caches, monitor).await;
}

/// List the children of several entries. Observers are notified once, after
/// all listings are done.
pub async fn initialize_children_of(
	connection: &mut BrowserConnection,
	directory: &mut dyn Directory,
	entries: &[EntryId],
	purge_all_caches: bool,
	monitor: &Monitor,
) {
	let mut batch = connection.notifier().batch();
	for &entry in entries {
		run(connection, directory, entry, purge_all_caches, None, monitor, &mut batch).await;
	}
}

/// Scroll mode: replace the children with the following page.
pub async fn next_page(
	connection: &mut BrowserConnection,
	directory: &mut dyn Directory,
	entry: EntryId,
	monitor: &Monitor,
) {
	let cursor = connection.cache().children(entry).and_then(|info| info.next_page.clone());
	follow_cursor(connection, directory, entry, cursor, monitor).await;
}

/// Scroll mode: go back to the first page of children.
pub async fn top_page(
	connection: &mut BrowserConnection,
	directory: &mut dyn Directory,
	entry: EntryId,
	monitor: &Monitor,
) {
	let cursor = connection.cache().children(entry).and_then(|info| info.top_page.clone());
	follow_cursor(connection, directory, entry, cursor, monitor).await;
}

/// Re-run the listing with a stored page cursor.
async fn follow_cursor(
	connection: &mut BrowserConnection,
	directory: &mut dyn Directory,
	entry: EntryId,
	cursor: Option<PagedResultsControl>,
	monitor: &Monitor,
) {
	let Some(cursor) = cursor else {
		debug!("No page to go to");
		return;
	};
	let mut batch = connection.notifier().batch();
	run(connection, directory, entry, false, Some(cursor), monitor, &mut batch).await;
}

/// One listing of the children of `id`.
#[instrument(skip_all, fields(entry = ?id))]
async fn run(
	connection: &mut BrowserConnection,
	directory: &mut dyn Directory,
	id: EntryId,
	purge_all_caches: bool,
	page: Option<PagedResultsControl>,
	monitor: &Monitor,
	batch: &mut EventBatch,
) {
	if id == connection.root() {
		load_root_dse(connection, directory, monitor).await;
		return;
	}
	let Some(parent) = connection.cache().entry(id).cloned() else {
		monitor.report_error(Error::Uncached(format!("{id:?}")));
		return;
	};
	monitor.report_progress(&format!("Listing children of {}", parent.dn()));

	clear_caches(connection, id, purge_all_caches);

	let options = connection.options().clone();
	let paged = page.or_else(|| {
		options.paged_search.map(|paged| PagedResultsControl::new(paged.size, paged.scroll_mode))
	});
	let filter = connection.cache().children_filter(id).to_owned();
	let mut parameter = child_search(connection, &parent, &filter, Listing::Children, paged);

	let mut listed = 0;
	let mut first_page = true;
	let primary_limited = loop {
		let outcome = search::execute(directory, &parameter, monitor).await;
		if first_page {
			clear_caches(connection, id, false);
			first_page = false;
		}
		listed += populate(connection, id, &parameter, &outcome, monitor);

		let Some(next) = parameter.next_page(&outcome) else {
			if parameter.paged.as_ref().is_some_and(|paged| paged.scroll_mode) {
				connection.cache_mut().children_mut(id).top_page = parameter.top_page();
			}
			break outcome.count_limit_exceeded;
		};
		if next.scroll_mode {
			let info = connection.cache_mut().children_mut(id);
			info.top_page = parameter.top_page();
			info.next_page = Some(next);
			break true;
		}
		let limit = parameter.count_limit as usize;
		if monitor.is_canceled() || (limit > 0 && listed >= limit) || outcome.is_empty() {
			break true;
		}
		debug!(listed, "Requesting next page");
		parameter = parameter.with_page(next);
	};
	if listed == 0 && !monitor.is_canceled() {
		if let Some(entry) = connection.cache_mut().entry_mut(id) {
			entry.flags.has_children_hint = false;
		}
	}

	let mut subentries_limited = false;
	if options.fetch_subentries && !monitor.is_canceled() {
		let parameter =
			child_search(connection, &parent, SUBENTRY_FILTER, Listing::Subentries, None);
		let outcome = search::execute(directory, &parameter, monitor).await;
		populate(connection, id, &parameter, &outcome, monitor);
		subentries_limited = outcome.count_limit_exceeded;
	}

	let fetch_aliases = options.alias_dereferencing.hides_aliases() && !parent.is_alias();
	let fetch_referrals = options.referral_handling == ReferralHandling::Follow;
	let listing = match (fetch_aliases, fetch_referrals) {
		(true, true) => Some((Listing::AliasesAndReferrals, ALIAS_OR_REFERRAL_FILTER)),
		(true, false) => Some((Listing::Aliases, ALIAS_FILTER)),
		(false, true) => Some((Listing::Referrals, REFERRAL_FILTER)),
		(false, false) => None,
	};
	let mut aliases_limited = false;
	if let Some((listing, filter)) = listing.filter(|_| !monitor.is_canceled()) {
		let parameter = child_search(connection, &parent, filter, listing, None);
		let outcome = search::execute(directory, &parameter, monitor).await;
		populate(connection, id, &parameter, &outcome, monitor);
		aliases_limited = outcome.count_limit_exceeded;
	}

	let info = connection.cache_mut().children_mut(id);
	info.has_more =
		primary_limited || subentries_limited || aliases_limited || monitor.is_canceled();
	info.initialized = true;
	debug!(children = info.children.len(), has_more = info.has_more, "Children initialized");
	batch.push(BrowserEvent::ChildrenInitialized { entry: id });
}

/// Build one of the one-level searches of a run.
fn child_search(
	connection: &BrowserConnection,
	parent: &Entry,
	filter: &str,
	listing: Listing,
	paged: Option<PagedResultsControl>,
) -> SearchParameter {
	let options = connection.options();
	let mut parameter = SearchParameter::new(parent.dn().clone(), filter, Scope::OneLevel);
	parameter.attributes = vec![NO_ATTRIBUTES.to_owned()];
	parameter.count_limit = options.count_limit;
	parameter.time_limit = options.time_limit;
	parameter.alias_dereferencing = if parent.is_alias() || listing.includes_aliases() {
		AliasDereferencing::Never
	} else {
		options.alias_dereferencing
	};
	parameter.referral_handling = options.referral_handling;
	parameter.init_has_children_flag = options.check_for_children;
	if parent.is_referral() || listing.includes_referrals() || options.manage_dsa_it {
		parameter.add_control(Control::manage_dsa_it());
		parameter.referral_handling = ReferralHandling::Manage;
	}
	if listing == Listing::Subentries {
		parameter.add_control(Control::subentries());
	}
	parameter.paged = paged;
	connection.prepare_parameter(&mut parameter);
	parameter
}

/// Attach the results and continuations of one search as children. Returns
/// the number of attached children.
fn populate(
	connection: &mut BrowserConnection,
	parent: EntryId,
	parameter: &SearchParameter,
	outcome: &SearchOutcome,
	monitor: &Monitor,
) -> usize {
	let results = connection.update_model(parameter, outcome, monitor);
	let mut attached = 0;
	for result in results {
		if result.entry != parent {
			connection.cache_mut().attach_child(parent, result.entry);
			attached += 1;
		}
	}

	let schema = Arc::clone(connection.schema());
	for url in &outcome.continuations {
		let target = match LdapUrl::parse(url) {
			Ok(target) => target,
			Err(err) => {
				monitor.report_error(err);
				continue;
			}
		};
		let cache = connection.cache_mut();
		let child = match cache.get(&target.dn, &schema) {
			Some(id) => id,
			None => {
				let kind = EntryKind::Continuation { url: url.clone() };
				cache.put(Entry::new(target.dn, kind), &schema)
			}
		};
		cache.attach_child(parent, child);
		attached += 1;
	}
	attached
}

/// Uncache the children of an entry. With `purge`, the cached attributes
/// and the has-children hint of the entry are reset as well.
fn clear_caches(connection: &mut BrowserConnection, id: EntryId, purge: bool) {
	let cache = connection.cache_mut();
	let children = cache.children(id).map(|info| info.children.clone()).unwrap_or_default();
	for child in children {
		cache.remove_recursive(child);
	}
	*cache.children_mut(id) = ChildrenInfo::default();

	if purge {
		cache.attributes_mut(id).initialized = false;
		if let Some(entry) = cache.entry_mut(id) {
			entry.flags.has_children_hint = true;
		}
	}
}
