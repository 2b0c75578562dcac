//! Keeping the schema of a connection up to date
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::{
	connection::BrowserConnection,
	directory::Directory,
	dn::Dn,
	entry::SearchEntryExt,
	error::Error,
	events::BrowserEvent,
	monitor::Monitor,
	schema::{
		Schema, SchemaParser, ATTRIBUTE_TYPES, CREATE_TIMESTAMP, LDAP_SYNTAXES, MATCHING_RULES,
		MATCHING_RULE_USE, MODIFY_TIMESTAMP, OBJECT_CLASSES, SCHEMA_FILTER,
	},
	search::{self, SearchParameter},
};

/// Root DSE attribute naming the subschema subentry
const SUBSCHEMA_SUBENTRY: &str = "subschemaSubentry";

/// Whether a cached schema is older than the one on the server.
///
/// The modify timestamp is compared, falling back to the create timestamp.
/// GeneralizedTime values have a fixed width, so comparing the strings
/// compares the points in time. A schema without timestamps is always stale.
#[must_use]
pub fn must_reload(
	cached: &Schema,
	server_create: Option<&str>,
	server_modify: Option<&str>,
) -> bool {
	let Some(cached) = cached.timestamp() else {
		return true;
	};
	server_modify.or(server_create).is_some_and(|server| server > cached)
}

/// Read the DN of the subschema subentry from the Root DSE.
pub async fn schema_location(
	directory: &mut dyn Directory,
	monitor: &Monitor,
) -> Result<Dn, Error> {
	let parameter = SearchParameter::object(Dn::root(), &[SUBSCHEMA_SUBENTRY]);
	let outcome = search::execute(directory, &parameter, monitor).await;
	let location = outcome
		.entries
		.first()
		.and_then(|root| root.attr_first(SUBSCHEMA_SUBENTRY))
		.ok_or(Error::MissingSchemaLocation)?;
	Dn::parse(location)
}

/// Read the create and modify timestamps of the subschema subentry.
/// `None` if the server returned no subschema subentry.
pub async fn fetch_schema_timestamps(
	directory: &mut dyn Directory,
	location: &Dn,
	monitor: &Monitor,
) -> Option<(Option<String>, Option<String>)> {
	let mut parameter =
		SearchParameter::object(location.clone(), &[CREATE_TIMESTAMP, MODIFY_TIMESTAMP]);
	parameter.filter = SCHEMA_FILTER.to_owned();
	let outcome = search::execute(directory, &parameter, monitor).await;
	let record = outcome.entries.first()?;
	Some((
		record.attr_first(CREATE_TIMESTAMP).map(str::to_owned),
		record.attr_first(MODIFY_TIMESTAMP).map(str::to_owned),
	))
}

/// Reload the schema if it is stale, or unconditionally with `force`.
/// Returns whether a new schema was installed.
///
/// While loading, and after any failure, the connection uses the default
/// schema. Failures are reported to the monitor.
#[instrument(skip_all, fields(connection = %connection.id(), force))]
pub async fn reload_schema(
	force: bool,
	connection: &mut BrowserConnection,
	directory: &mut dyn Directory,
	parser: &dyn SchemaParser,
	monitor: &Monitor,
) -> bool {
	let location = match schema_location(directory, monitor).await {
		Ok(location) => location,
		Err(err) => {
			connection.reset_schema();
			monitor.report_error(err);
			return false;
		}
	};

	let reload = force
		|| connection.schema().is_default()
		|| match fetch_schema_timestamps(directory, &location, monitor).await {
			Some((create, modify)) => {
				must_reload(connection.schema(), create.as_deref(), modify.as_deref())
			}
			None => true,
		};
	if !reload {
		debug!("Schema is up to date");
		return false;
	}

	monitor.report_progress(&format!("Loading schema from {location}"));
	connection.reset_schema();
	let mut parameter = SearchParameter::object(
		location,
		&[
			OBJECT_CLASSES,
			ATTRIBUTE_TYPES,
			LDAP_SYNTAXES,
			MATCHING_RULES,
			MATCHING_RULE_USE,
			CREATE_TIMESTAMP,
			MODIFY_TIMESTAMP,
		],
	);
	parameter.filter = SCHEMA_FILTER.to_owned();
	let outcome = search::execute(directory, &parameter, monitor).await;
	let Some(record) = outcome.entries.first() else {
		monitor.report_error(Error::NoSchemaInformation);
		return false;
	};

	match parser.parse(record) {
		Ok(schema) => {
			info!(
				attribute_types = schema.attribute_types.len(),
				object_classes = schema.object_classes.len(),
				"Schema loaded"
			);
			connection.set_schema(Arc::new(schema));
			connection.notifier().send(BrowserEvent::SchemaLoaded);
			true
		}
		Err(err) => {
			monitor.report_error(err);
			false
		}
	}
}
