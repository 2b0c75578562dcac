//! Reading the Root DSE and discovering the base entries below it
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{
	cache::ChildrenInfo,
	connection::BrowserConnection,
	directory::Directory,
	dn::Dn,
	entry::{EntryId, EntryKind},
	events::BrowserEvent,
	monitor::Monitor,
	search::{
		self, Scope, SearchParameter, ALL_OPERATIONAL_ATTRIBUTES, ALL_USER_ATTRIBUTES,
		DEFAULT_FILTER, NO_ATTRIBUTES,
	},
};

/// Root DSE attributes to request explicitly, some servers only return them
/// when asked by name.
const ROOT_DSE_ATTRIBUTES: [&str; 15] = [
	ALL_USER_ATTRIBUTES,
	ALL_OPERATIONAL_ATTRIBUTES,
	"namingContexts",
	"subschemaSubentry",
	"supportedControl",
	"supportedExtension",
	"supportedFeatures",
	"supportedLDAPVersion",
	"supportedSASLMechanisms",
	"altServer",
	"monitorContext",
	"configContext",
	"dsaName",
	"vendorName",
	"vendorVersion",
];

/// Root DSE attributes naming entries with server metadata.
const METADATA_ATTRIBUTES: [&str; 4] =
	["subschemaSubentry", "monitorContext", "configContext", "dsaName"];

/// Read the Root DSE into the root entry and list the base and metadata
/// entries as its children.
#[instrument(skip_all, fields(connection = %connection.id()))]
pub async fn load_root_dse(
	connection: &mut BrowserConnection,
	directory: &mut dyn Directory,
	monitor: &Monitor,
) {
	monitor.report_progress("Reading Root DSE");
	let root = connection.root();
	clear_children(connection, root);

	let parameter = SearchParameter::object(Dn::root(), &ROOT_DSE_ATTRIBUTES);
	let outcome = search::execute(directory, &parameter, monitor).await;
	connection.update_model(&parameter, &outcome, monitor);
	let attribute = |name: &str| {
		let info = connection.cache().attributes(root);
		info.map(|info| info.values(name).to_vec()).unwrap_or_default()
	};

	let mut bases = Vec::new();
	if connection.options().fetch_base_dns {
		for context in attribute("namingContexts") {
			if context.trim().is_empty() {
				bases.extend(list_root_children(directory, monitor).await);
			} else {
				match Dn::parse(&context) {
					Ok(dn) => bases.push(dn),
					Err(err) => monitor.report_error(err),
				}
			}
		}
	} else {
		match Dn::parse(&connection.options().base_dn) {
			Ok(dn) if !dn.is_root() => bases.push(dn),
			Ok(_) => {}
			Err(err) => monitor.report_error(err),
		}
	}

	let mut metadata = Vec::new();
	for name in METADATA_ATTRIBUTES {
		for value in attribute(name) {
			match Dn::parse(&value) {
				Ok(dn) if !dn.is_root() => metadata.push(dn),
				Ok(_) => {}
				Err(err) => monitor.report_error(err),
			}
		}
	}
	debug!(bases = bases.len(), metadata = metadata.len(), "Root DSE read");

	for dn in bases {
		attach(connection, root, &dn, EntryKind::BaseDn);
	}
	for dn in metadata {
		attach(connection, root, &dn, EntryKind::Metadata);
	}

	let info = connection.cache_mut().children_mut(root);
	info.initialized = true;
	info.has_more = false;
	connection.notifier().send(BrowserEvent::ChildrenInitialized { entry: root });
}

/// Entries directly below the empty DN, for servers announcing an empty
/// naming context.
async fn list_root_children(directory: &mut dyn Directory, monitor: &Monitor) -> Vec<Dn> {
	let mut parameter = SearchParameter::new(Dn::root(), DEFAULT_FILTER, Scope::OneLevel);
	parameter.attributes = vec![NO_ATTRIBUTES.to_owned()];
	let outcome = search::execute(directory, &parameter, monitor).await;
	outcome.entries.iter().filter_map(|record| Dn::parse(&record.dn).ok()).collect()
}

/// Uncache all children of an entry.
fn clear_children(connection: &mut BrowserConnection, id: EntryId) {
	let children =
		connection.cache().children(id).map(|info| info.children.clone()).unwrap_or_default();
	for child in children {
		connection.cache_mut().remove_recursive(child);
	}
	*connection.cache_mut().children_mut(id) = ChildrenInfo::default();
}

/// Cache an entry of the given kind and list it below the root.
fn attach(connection: &mut BrowserConnection, root: EntryId, dn: &Dn, kind: EntryKind) {
	let schema = Arc::clone(connection.schema());
	let id = connection.cache_mut().get_or_insert(dn, kind.clone(), &schema);
	if let Some(entry) = connection.cache_mut().entry_mut(id) {
		if entry.kind == EntryKind::Directory {
			entry.kind = kind;
		}
	}
	connection.cache_mut().attach_child(root, id);
}
