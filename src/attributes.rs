//! Reading the attributes of a single entry
use tracing::{debug, instrument};

use crate::{
	cache::AttributeInfo,
	connection::BrowserConnection,
	directory::Directory,
	entry::EntryId,
	error::Error,
	events::BrowserEvent,
	monitor::Monitor,
	root_dse::load_root_dse,
	search::{
		self, Control, ReferralHandling, SearchParameter, ALL_OPERATIONAL_ATTRIBUTES,
		ALL_USER_ATTRIBUTES, SUBENTRY_FILTER,
	},
};

/// The attribute holding the URLs of a referral object.
const REFERRAL_ATTRIBUTE: &str = "ref";

/// Read all user attributes of an entry and, with `operational`, its
/// operational attributes too. The attributes are marked initialized even
/// when the search failed, the error is left in the monitor.
///
/// The Root DSE is read by [`load_root_dse`], which lists its children as
/// well.
#[instrument(skip_all, fields(entry = ?entry))]
pub async fn initialize_attributes(
	connection: &mut BrowserConnection,
	directory: &mut dyn Directory,
	entry: EntryId,
	operational: bool,
	monitor: &Monitor,
) {
	if entry == connection.root() {
		load_root_dse(connection, directory, monitor).await;
		connection.notifier().send(BrowserEvent::AttributesInitialized { entry });
		return;
	}
	let Some(cached) = connection.cache().entry(entry).cloned() else {
		monitor.report_error(Error::Uncached(format!("{entry:?}")));
		return;
	};
	monitor.report_progress(&format!("Reading attributes of {}", cached.dn()));

	let mut attributes = vec![ALL_USER_ATTRIBUTES.to_owned()];
	if operational {
		attributes.extend(connection.schema().operational_attribute_names().map(str::to_owned));
		attributes.push(ALL_OPERATIONAL_ATTRIBUTES.to_owned());
	}
	let mut parameter = SearchParameter::object(cached.dn().clone(), &[]);
	if cached.is_subentry() {
		parameter.filter = SUBENTRY_FILTER.to_owned();
		parameter.add_control(Control::subentries());
	}
	if cached.is_referral() {
		attributes.push(REFERRAL_ATTRIBUTE.to_owned());
		parameter.add_control(Control::manage_dsa_it());
		parameter.referral_handling = ReferralHandling::Manage;
	}
	parameter.attributes = attributes;
	connection.prepare_parameter(&mut parameter);

	let outcome = search::execute(directory, &parameter, monitor).await;
	if !outcome.entries.is_empty() {
		*connection.cache_mut().attributes_mut(entry) = AttributeInfo::default();
	}
	connection.update_model(&parameter, &outcome, monitor);
	let info = connection.cache_mut().attributes_mut(entry);
	info.initialized = true;
	debug!(attributes = info.attributes.len(), "Attributes initialized");
	connection.notifier().send(BrowserEvent::AttributesInitialized { entry });
}
