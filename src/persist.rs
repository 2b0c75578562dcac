//! Saving searches, bookmarks and the schema of a connection to disk
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::{
	config::TIME_FORMAT,
	connection::{BrowserConnection, ConnectionId},
	dn::Dn,
	error::Error,
	ldif::{parse_ldif, to_ldif},
	manager::Bookmark,
	monitor::Monitor,
	schema::SchemaParser,
	search::{
		oid, AliasDereferencing, Control, PagedResultsControl, ReferralHandling, Scope, Search,
		SearchParameter,
	},
};

/// Version of the state file format
pub const STATE_VERSION: u32 = 1;

/// A control as stored on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedControl {
	/// Control type
	pub oid: String,
	/// Criticality
	#[serde(default)]
	pub critical: bool,
	/// Base64 encoded control value
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<String>,
}

impl From<&Control> for SavedControl {
	fn from(control: &Control) -> Self {
		Self {
			oid: control.oid.clone(),
			critical: control.critical,
			value: control.value.as_ref().map(|value| STANDARD.encode(value)),
		}
	}
}

impl TryFrom<&SavedControl> for Control {
	type Error = Error;

	fn try_from(saved: &SavedControl) -> Result<Self, Error> {
		let value = saved
			.value
			.as_ref()
			.map(|value| STANDARD.decode(value))
			.transpose()
			.map_err(|err| {
				Error::Invalid(format!("Invalid value of control {}: {err}", saved.oid))
			})?;
		Ok(Self { oid: saved.oid.clone(), critical: saved.critical, value })
	}
}

/// A saved search as stored on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSearch {
	/// Display name
	pub name: String,
	/// Base DN
	pub base: String,
	/// Filter
	pub filter: String,
	/// Scope
	pub scope: Scope,
	/// Requested attributes
	#[serde(default)]
	pub attributes: Vec<String>,
	/// Count limit
	#[serde(default)]
	pub count_limit: u32,
	/// Time limit
	#[serde(default)]
	pub time_limit: u32,
	/// Alias dereferencing
	pub alias_dereferencing: AliasDereferencing,
	/// Referral handling
	pub referral_handling: ReferralHandling,
	/// Request controls, the paged results control included
	#[serde(default)]
	pub controls: Vec<SavedControl>,
	/// Whether paged results are presented one page at a time
	#[serde(default)]
	pub scroll_mode: bool,
	/// Whether the has-children attribute is requested
	#[serde(default)]
	pub init_has_children_flag: bool,
}

impl From<&SearchParameter> for SavedSearch {
	fn from(parameter: &SearchParameter) -> Self {
		Self {
			name: parameter.name.clone(),
			base: parameter.base.to_string(),
			filter: parameter.filter.clone(),
			scope: parameter.scope,
			attributes: parameter.attributes.clone(),
			count_limit: parameter.count_limit,
			time_limit: parameter.time_limit,
			alias_dereferencing: parameter.alias_dereferencing,
			referral_handling: parameter.referral_handling,
			controls: parameter.request_controls().iter().map(SavedControl::from).collect(),
			scroll_mode: parameter.paged.as_ref().is_some_and(|paged| paged.scroll_mode),
			init_has_children_flag: parameter.init_has_children_flag,
		}
	}
}

impl TryFrom<&SavedSearch> for SearchParameter {
	type Error = Error;

	fn try_from(saved: &SavedSearch) -> Result<Self, Error> {
		let mut parameter =
			SearchParameter::new(Dn::parse(&saved.base)?, &saved.filter, saved.scope);
		parameter.name.clone_from(&saved.name);
		parameter.attributes.clone_from(&saved.attributes);
		parameter.count_limit = saved.count_limit;
		parameter.time_limit = saved.time_limit;
		parameter.alias_dereferencing = saved.alias_dereferencing;
		parameter.referral_handling = saved.referral_handling;
		parameter.init_has_children_flag = saved.init_has_children_flag;
		for saved_control in &saved.controls {
			let control = Control::try_from(saved_control)?;
			if control.oid == oid::PAGED_RESULTS {
				let paged = PagedResultsControl::from_control(&control, saved.scroll_mode)?;
				// Saved searches always start over at the first page
				parameter.paged = Some(PagedResultsControl { cookie: Vec::new(), ..paged });
			} else {
				parameter.controls.push(control);
			}
		}
		Ok(parameter)
	}
}

/// A bookmark as stored on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedBookmark {
	/// Display name
	pub name: String,
	/// DN of the bookmarked entry
	pub dn: String,
}

/// The persistent state of a connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
	/// File format version
	pub version: u32,
	/// When the state was saved, as GeneralizedTime
	pub saved_at: String,
	/// Saved searches
	#[serde(default)]
	pub searches: Vec<SavedSearch>,
	/// Bookmarks
	#[serde(default)]
	pub bookmarks: Vec<SavedBookmark>,
}

impl ConnectionState {
	/// The saved searches and bookmarks of a connection.
	pub fn capture(connection: &BrowserConnection) -> Result<Self, Error> {
		let saved_at = OffsetDateTime::now_utc()
			.format(&TIME_FORMAT)
			.map_err(|err| Error::Invalid(format!("Cannot format save time: {err}")))?;
		Ok(Self {
			version: STATE_VERSION,
			saved_at,
			searches: connection
				.searches()
				.iter()
				.map(|search| SavedSearch::from(&search.parameter))
				.collect(),
			bookmarks: connection
				.bookmarks()
				.iter()
				.map(|bookmark| SavedBookmark {
					name: bookmark.name.clone(),
					dn: bookmark.dn.to_string(),
				})
				.collect(),
		})
	}

	/// Add the saved searches and bookmarks to a connection. Records that
	/// cannot be restored are reported and skipped. Returns the number of
	/// restored records.
	pub fn restore(&self, connection: &mut BrowserConnection, monitor: &Monitor) -> usize {
		let mut restored = 0;
		for saved in &self.searches {
			match SearchParameter::try_from(saved) {
				Ok(parameter) => {
					connection.searches_mut().add(Search::new(parameter));
					restored += 1;
				}
				Err(err) => monitor.report_error(err),
			}
		}
		for saved in &self.bookmarks {
			match Dn::parse(&saved.dn) {
				Ok(dn) => {
					let bookmark = Bookmark {
						name: saved.name.clone(),
						connection: connection.id().clone(),
						dn,
					};
					connection.bookmarks_mut().add(bookmark);
					restored += 1;
				}
				Err(err) => monitor.report_error(err),
			}
		}
		restored
	}
}

/// File name stem for a connection, with everything but letters, digits,
/// `-` and `_` replaced.
fn file_stem(id: &ConnectionId) -> String {
	id.as_str()
		.chars()
		.map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
		.collect()
}

/// Path of the state file of a connection.
#[must_use]
pub fn state_path(dir: &Path, id: &ConnectionId) -> PathBuf {
	dir.join(format!("{}.json", file_stem(id)))
}

/// Path of the schema file of a connection.
#[must_use]
pub fn schema_path(dir: &Path, id: &ConnectionId) -> PathBuf {
	dir.join(format!("{}.ldif", file_stem(id)))
}

/// Write the saved searches and bookmarks of a connection to `dir`.
pub async fn save_state(dir: &Path, connection: &BrowserConnection) -> Result<PathBuf, Error> {
	let state = ConnectionState::capture(connection)?;
	let path = state_path(dir, connection.id());
	tokio::fs::create_dir_all(dir).await?;
	tokio::fs::write(&path, serde_json::to_vec_pretty(&state)?).await?;
	debug!(path = %path.display(), searches = state.searches.len(), "Connection state saved");
	Ok(path)
}

/// Restore the saved searches and bookmarks of a connection from `dir`.
/// Returns `false` if nothing was saved for the connection.
pub async fn load_state(
	dir: &Path,
	connection: &mut BrowserConnection,
	monitor: &Monitor,
) -> Result<bool, Error> {
	let path = state_path(dir, connection.id());
	let data = match tokio::fs::read(&path).await {
		Ok(data) => data,
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
		Err(err) => return Err(err.into()),
	};
	let state: ConnectionState = serde_json::from_slice(&data)?;
	if state.version != STATE_VERSION {
		return Err(Error::UnsupportedVersion(state.version));
	}
	let restored = state.restore(connection, monitor);
	info!(restored, saved_at = %state.saved_at, "Connection state loaded");
	Ok(true)
}

/// Write the schema of a connection to `dir` as LDIF. Returns `None` if the
/// connection has not loaded a schema.
pub async fn save_schema(
	dir: &Path,
	connection: &BrowserConnection,
) -> Result<Option<PathBuf>, Error> {
	let Some(record) = connection.schema().source() else {
		return Ok(None);
	};
	let path = schema_path(dir, connection.id());
	tokio::fs::create_dir_all(dir).await?;
	tokio::fs::write(&path, to_ldif([record])).await?;
	debug!(path = %path.display(), "Schema saved");
	Ok(Some(path))
}

/// Install the schema saved for a connection. Returns `false` if none was
/// saved.
pub async fn load_schema(
	dir: &Path,
	connection: &mut BrowserConnection,
	parser: &dyn SchemaParser,
) -> Result<bool, Error> {
	let path = schema_path(dir, connection.id());
	let text = match tokio::fs::read_to_string(&path).await {
		Ok(text) => text,
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
		Err(err) => return Err(err.into()),
	};
	let records = parse_ldif(&text)?;
	let record = records.first().ok_or(Error::NoSchemaInformation)?;
	let schema = parser.parse(record)?;
	connection.set_schema(schema.into());
	debug!(path = %path.display(), "Cached schema loaded");
	Ok(true)
}
