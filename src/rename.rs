//! Renaming and moving entries
//!
//! The server is first asked to rename or move the entry itself. Servers
//! that refuse to do so for entries with children answer with
//! `notAllowedOnNonLeaf`; in that case the caller decides whether the
//! operation is simulated by copying the subtree to its new location and
//! deleting the original.
//!
//! Afterwards the old subtree is uncached, saved searches listing any of its
//! entries are invalidated and the entry is read back from its new location.
use std::sync::Arc;

use ldap3::SearchEntry;
use tracing::{debug, info, instrument, warn};

use crate::{
	connection::BrowserConnection,
	directory::Directory,
	dn::{Dn, Rdn},
	entry::{Entry, EntryId},
	error::Error,
	events::{BrowserEvent, EventBatch},
	monitor::Monitor,
	search::{
		self, AliasDereferencing, Control, ReferralHandling, Scope, SearchParameter, DEFAULT_FILTER,
	},
};

/// Decides whether a rename the server refused for a non-leaf entry is
/// simulated by copy and delete.
pub trait SimulateRenamePolicy: Send + Sync {
	/// Whether to simulate renaming the entry at `dn`.
	fn simulate_rename(&self, dn: &Dn) -> bool;
}

/// A policy giving the same answer every time.
#[derive(Clone, Copy, Debug)]
pub struct FixedPolicy(pub bool);

impl SimulateRenamePolicy for FixedPolicy {
	fn simulate_rename(&self, _dn: &Dn) -> bool {
		self.0
	}
}

/// What happened to one entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenameOutcome {
	/// The server renamed or moved the entry
	Renamed {
		/// The entry read back from its new location, if that worked
		entry: Option<EntryId>,
	},
	/// The subtree was copied to the new location and deleted at the old one
	Simulated {
		/// The entry read back from its new location, if that worked
		entry: Option<EntryId>,
		/// Number of created entries
		created: usize,
		/// Number of deleted entries
		deleted: usize,
	},
	/// Nothing was changed, the reason is in the monitor
	Failed,
}

/// Give an entry a new RDN.
pub async fn rename_entry(
	connection: &mut BrowserConnection,
	directory: &mut dyn Directory,
	entry: EntryId,
	new_rdn: Rdn,
	policy: &dyn SimulateRenamePolicy,
	monitor: &Monitor,
) -> RenameOutcome {
	let new_dn = match connection.dn_of(entry) {
		Ok(dn) => dn.parent().unwrap_or_default().child(new_rdn),
		Err(err) => {
			monitor.report_error(err);
			return RenameOutcome::Failed;
		}
	};
	let mut batch = connection.notifier().batch();
	let outcome = relocate(connection, directory, entry, new_dn, policy, monitor, &mut batch).await;
	outcome
}

/// Move entries below a new parent. When two or more entries are moved,
/// observers get a single [`BrowserEvent::BulkModification`] instead of one
/// event per entry, and the old and new parents have to list their children
/// again.
pub async fn move_entries(
	connection: &mut BrowserConnection,
	directory: &mut dyn Directory,
	entries: &[EntryId],
	new_parent: EntryId,
	policy: &dyn SimulateRenamePolicy,
	monitor: &Monitor,
) -> Vec<RenameOutcome> {
	let parent_dn = match connection.dn_of(new_parent) {
		Ok(dn) => dn,
		Err(err) => {
			monitor.report_error(err);
			return vec![RenameOutcome::Failed; entries.len()];
		}
	};

	let mut batch = connection.notifier().batch();
	let mut old_parents = Vec::new();
	let mut outcomes = Vec::with_capacity(entries.len());
	for &entry in entries {
		let Some(old) = connection.cache().entry(entry).cloned() else {
			monitor.report_error(Error::Uncached(format!("{entry:?}")));
			outcomes.push(RenameOutcome::Failed);
			continue;
		};
		let Some(rdn) = old.dn().rdn().cloned() else {
			monitor.report_error(Error::Invalid("The Root DSE can not be moved".to_owned()));
			outcomes.push(RenameOutcome::Failed);
			continue;
		};
		old_parents.extend(old.parent());
		let new_dn = parent_dn.child(rdn);
		let outcome =
			relocate(connection, directory, entry, new_dn, policy, monitor, &mut batch).await;
		outcomes.push(outcome);
	}

	if entries.len() < 2 {
		return outcomes;
	}
	for parent in old_parents.into_iter().chain([new_parent]) {
		connection.cache_mut().children_mut(parent).initialized = false;
	}
	batch.discard();
	batch.push(BrowserEvent::BulkModification);
	outcomes
}

/// Rename or move one entry to `new_dn`.
#[instrument(skip_all, fields(entry = ?id, new_dn = %new_dn))]
async fn relocate(
	connection: &mut BrowserConnection,
	directory: &mut dyn Directory,
	id: EntryId,
	new_dn: Dn,
	policy: &dyn SimulateRenamePolicy,
	monitor: &Monitor,
	batch: &mut EventBatch,
) -> RenameOutcome {
	let Some(old) = connection.cache().entry(id).cloned() else {
		monitor.report_error(Error::Uncached(format!("{id:?}")));
		return RenameOutcome::Failed;
	};
	let (Some(new_rdn), Some(new_parent)) = (new_dn.rdn(), new_dn.parent()) else {
		monitor.report_error(Error::Invalid("The Root DSE can not be renamed".to_owned()));
		return RenameOutcome::Failed;
	};
	let controls = if old.is_referral() { vec![Control::manage_dsa_it()] } else { Vec::new() };
	let old_parent = old.dn().parent().unwrap_or_default();
	let schema = connection.schema();
	let new_superior =
		(old_parent.normalize(schema) != new_parent.normalize(schema)).then_some(&new_parent);

	let result = directory.rename(old.dn(), new_rdn, new_superior, true, &controls).await;
	let outcome = match result {
		Ok(()) => {
			info!(old_dn = %old.dn(), "Entry renamed");
			let entry = repair_cache(connection, directory, &old, &new_dn, monitor).await;
			RenameOutcome::Renamed { entry }
		}
		Err(err) if err.is_non_leaf() && policy.simulate_rename(old.dn()) => {
			debug!("Server refused to rename a non-leaf entry, simulating");
			match simulate(connection, directory, &old, &new_dn, &controls, monitor).await {
				Some((created, deleted)) => {
					let entry = repair_cache(connection, directory, &old, &new_dn, monitor).await;
					let cache = connection.cache_mut();
					let new_parent =
						entry.and_then(|entry| cache.entry(entry)).and_then(Entry::parent);
					for parent in old.parent().into_iter().chain(new_parent) {
						cache.children_mut(parent).initialized = false;
					}
					RenameOutcome::Simulated { entry, created, deleted }
				}
				None => RenameOutcome::Failed,
			}
		}
		Err(err) => {
			monitor.report_error(err);
			RenameOutcome::Failed
		}
	};

	if !matches!(outcome, RenameOutcome::Failed) {
		if new_superior.is_some() {
			batch.push(BrowserEvent::EntryMoved { old_dn: old.dn().clone(), new_dn });
		} else {
			batch.push(BrowserEvent::EntryRenamed { old_dn: old.dn().clone(), new_dn });
		}
	}
	outcome
}

/// Copy the subtree of `old` to `new_dn`, then delete the original
/// subtree. Nothing is deleted unless every entry was copied. Returns the
/// number of created and deleted entries, `None` if copying failed.
async fn simulate(
	connection: &BrowserConnection,
	directory: &mut dyn Directory,
	old: &Entry,
	new_dn: &Dn,
	controls: &[Control],
	monitor: &Monitor,
) -> Option<(usize, usize)> {
	let mut parameter = SearchParameter::new(old.dn().clone(), DEFAULT_FILTER, Scope::Subtree);
	parameter.attributes = vec!["*".to_owned(), "ref".to_owned()];
	parameter.alias_dereferencing = AliasDereferencing::Never;
	parameter.referral_handling = ReferralHandling::Manage;
	parameter.controls = vec![Control::manage_dsa_it()];

	let errors = monitor.error_count();
	let outcome = search::execute(directory, &parameter, monitor).await;
	let failed = monitor.error_count() > errors || outcome.count_limit_exceeded;
	if failed || outcome.entries.is_empty() {
		monitor.report_error(Error::Invalid(format!("Could not read the subtree of {}", old.dn())));
		return None;
	}

	let schema = Arc::clone(connection.schema());
	let mut subtree = Vec::with_capacity(outcome.entries.len());
	for record in outcome.entries {
		let dn = match Dn::parse(&record.dn) {
			Ok(dn) => dn,
			Err(err) => {
				monitor.report_error(err);
				return None;
			}
		};
		let Some(target) = dn.rebase(old.dn(), new_dn, &schema) else {
			monitor.report_error(Error::Invalid(format!("{dn} is not below {}", old.dn())));
			return None;
		};
		subtree.push((dn, target, record));
	}
	subtree.sort_by_key(|(dn, _, _)| dn.depth());

	let mut created = 0;
	for (dn, target, record) in &subtree {
		let mut copy = SearchEntry { dn: target.to_string(), ..record.clone() };
		if dn.depth() == old.dn().depth() {
			if let (Some(old_rdn), Some(new_rdn)) = (old.dn().rdn(), new_dn.rdn()) {
				apply_new_rdn(&mut copy, old_rdn, new_rdn);
			}
		}
		if let Err(err) = directory.add(&copy, controls).await {
			warn!(dn = %target, "Copying entry failed");
			monitor.report_error(err);
			return None;
		}
		created += 1;
	}

	let mut deleted = 0;
	for (dn, _, _) in subtree.iter().rev() {
		match directory.delete(dn, controls).await {
			Ok(()) => deleted += 1,
			Err(err) => monitor.report_error(err),
		}
	}
	info!(created, deleted, "Rename simulated");
	Some((created, deleted))
}

/// Replace the values of the old RDN with the values of the new one.
fn apply_new_rdn(record: &mut SearchEntry, old_rdn: &Rdn, new_rdn: &Rdn) {
	for ava in &old_rdn.avas {
		if let Some((_, values)) =
			record.attrs.iter_mut().find(|(name, _)| name.eq_ignore_ascii_case(&ava.attribute))
		{
			values.retain(|value| value != &ava.value);
		}
	}
	record.attrs.retain(|_, values| !values.is_empty());
	for ava in &new_rdn.avas {
		let key = record
			.attrs
			.keys()
			.find(|name| name.eq_ignore_ascii_case(&ava.attribute))
			.cloned()
			.unwrap_or_else(|| ava.attribute.clone());
		let values = record.attrs.entry(key).or_default();
		if !values.contains(&ava.value) {
			values.push(ava.value.clone());
		}
	}
}

/// Uncache the old subtree, invalidate searches listing any of its entries
/// and read the entry back from its new location.
async fn repair_cache(
	connection: &mut BrowserConnection,
	directory: &mut dyn Directory,
	old: &Entry,
	new_dn: &Dn,
	monitor: &Monitor,
) -> Option<EntryId> {
	connection.cache_mut().detach(old.id());
	let removed: Vec<EntryId> =
		connection.cache_mut().remove_recursive(old.id()).iter().map(Entry::id).collect();
	let invalidated = connection.invalidate_searches(&removed);
	debug!(uncached = removed.len(), invalidated, "Old subtree uncached");

	// some servers can not read the entry back right away, this is not an error
	let sub = monitor.sub();
	let mut parameter = SearchParameter::object(new_dn.clone(), &[]);
	parameter.alias_dereferencing = AliasDereferencing::Never;
	parameter.referral_handling = ReferralHandling::Manage;
	parameter.init_has_children_flag = connection.options().check_for_children;
	if old.is_referral() {
		parameter.add_control(Control::manage_dsa_it());
	}
	connection.prepare_parameter(&mut parameter);
	let outcome = search::execute(directory, &parameter, &sub).await;
	let results = connection.update_model(&parameter, &outcome, &sub);
	let entry = results.first().map(|result| result.entry)?;

	let parent = connection.cache().entry(entry).and_then(Entry::parent);
	if let Some(parent) = parent {
		connection.cache_mut().attach_child(parent, entry);
	}
	Some(entry)
}
