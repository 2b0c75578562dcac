//! Search parameters, protocol controls, and the search executor
use ldap3::controls::{PagedResults, RawControl};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
	connection::BrowserConnection,
	directory::{Directory, SearchResponse},
	dn::Dn,
	entry::EntryId,
	error::{result_code, Error},
	events::BrowserEvent,
	monitor::Monitor,
};

/// Filter matching every entry
pub const DEFAULT_FILTER: &str = "(objectClass=*)";
/// Filter matching subentries
pub const SUBENTRY_FILTER: &str = "(objectClass=subentry)";
/// Filter matching aliases
pub const ALIAS_FILTER: &str = "(objectClass=alias)";
/// Filter matching referrals
pub const REFERRAL_FILTER: &str = "(objectClass=referral)";
/// Filter matching aliases and referrals
pub const ALIAS_OR_REFERRAL_FILTER: &str = "(|(objectClass=alias)(objectClass=referral))";
/// Attribute list requesting no attributes at all
pub const NO_ATTRIBUTES: &str = "1.1";
/// Attribute list entry requesting all user attributes
pub const ALL_USER_ATTRIBUTES: &str = "*";
/// Attribute list entry requesting all operational attributes
pub const ALL_OPERATIONAL_ATTRIBUTES: &str = "+";

/// OIDs of the controls the browser sends.
pub mod oid {
	/// ManageDsaIT, RFC 3296
	pub const MANAGE_DSA_IT: &str = "2.16.840.1.113730.3.4.2";
	/// Subentries, RFC 3672
	pub const SUBENTRIES: &str = "1.3.6.1.4.1.4203.1.10.1";
	/// Simple paged results, RFC 2696
	pub const PAGED_RESULTS: &str = "1.2.840.113556.1.4.319";
}

/// Scope of a search
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
	/// Only the base entry
	Object,
	/// Direct children of the base entry
	OneLevel,
	/// The base entry and all its descendants
	Subtree,
}

/// When aliases are dereferenced
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasDereferencing {
	/// Never
	Never,
	/// While searching below the base entry
	Search,
	/// While locating the base entry
	Finding,
	/// Both while locating the base entry and while searching
	Always,
}

impl AliasDereferencing {
	/// Whether alias entries are replaced by their targets in search results,
	/// which hides the aliases themselves.
	#[must_use]
	pub fn hides_aliases(self) -> bool {
		matches!(self, Self::Search | Self::Always)
	}
}

/// How referrals are treated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralHandling {
	/// Drop search continuations
	Ignore,
	/// Return search continuations to the caller
	Follow,
	/// Treat referral objects as ordinary entries (ManageDsaIT)
	Manage,
}

/// A request or response control.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Control {
	/// Control type
	pub oid: String,
	/// Whether the server must refuse the operation if it does not support
	/// the control
	pub critical: bool,
	/// BER encoded control value
	pub value: Option<Vec<u8>>,
}

impl Control {
	/// The ManageDsaIT control.
	#[must_use]
	pub fn manage_dsa_it() -> Self {
		Self { oid: oid::MANAGE_DSA_IT.to_owned(), critical: false, value: None }
	}

	/// The subentries control, requesting only subentries to be returned.
	#[must_use]
	pub fn subentries() -> Self {
		// BER BOOLEAN TRUE
		Self {
			oid: oid::SUBENTRIES.to_owned(),
			critical: false,
			value: Some(vec![0x01, 0x01, 0xff]),
		}
	}
}

impl From<&Control> for RawControl {
	fn from(control: &Control) -> Self {
		RawControl {
			ctype: control.oid.clone(),
			crit: control.critical,
			val: control.value.clone(),
		}
	}
}

impl From<RawControl> for Control {
	fn from(control: RawControl) -> Self {
		Self { oid: control.ctype, critical: control.crit, value: control.val }
	}
}

/// The simple paged results request control.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PagedResultsControl {
	/// Page size
	pub size: u32,
	/// Cookie from the previous response, empty for the first page
	pub cookie: Vec<u8>,
	/// Criticality of the control
	pub critical: bool,
	/// Whether pages are presented one at a time
	pub scroll_mode: bool,
}

impl PagedResultsControl {
	/// A request for the first page.
	#[must_use]
	pub fn new(size: u32, scroll_mode: bool) -> Self {
		Self { size, cookie: Vec::new(), critical: false, scroll_mode }
	}

	/// Encode as a protocol control.
	#[must_use]
	pub fn to_control(&self) -> Control {
		let raw: RawControl = PagedResults {
			size: i32::try_from(self.size).unwrap_or(i32::MAX),
			cookie: self.cookie.clone(),
		}
		.into();
		Control { critical: self.critical, ..Control::from(raw) }
	}

	/// Decode a paged results request control.
	pub fn from_control(control: &Control, scroll_mode: bool) -> Result<Self, Error> {
		let response = PagedResultsResponse::from_control(control)?;
		Ok(Self {
			size: response.size,
			cookie: response.cookie,
			critical: control.critical,
			scroll_mode,
		})
	}
}

/// The simple paged results response control.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PagedResultsResponse {
	/// The server's estimate of the result size
	pub size: u32,
	/// Cookie to continue with, empty once the search is exhausted
	pub cookie: Vec<u8>,
}

impl PagedResultsResponse {
	/// Decode a paged results control value.
	pub fn from_control(control: &Control) -> Result<Self, Error> {
		if control.oid != oid::PAGED_RESULTS || control.value.is_none() {
			return Err(Error::Invalid(format!("Not a paged results control: {}", control.oid)));
		}
		let paged: PagedResults = RawControl::from(control).parse();
		Ok(Self { size: u32::try_from(paged.size).unwrap_or_default(), cookie: paged.cookie })
	}

	/// Encode as a protocol control.
	#[must_use]
	pub fn to_control(&self) -> Control {
		let raw: RawControl = PagedResults {
			size: i32::try_from(self.size).unwrap_or(i32::MAX),
			cookie: self.cookie.clone(),
		}
		.into();
		raw.into()
	}
}

/// Everything needed to issue one search.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchParameter {
	/// Display name of a saved search
	pub name: String,
	/// Base entry
	pub base: Dn,
	/// LDAP filter
	pub filter: String,
	/// Scope
	pub scope: Scope,
	/// Attributes to return
	pub attributes: Vec<String>,
	/// Maximum number of entries, 0 means unlimited
	pub count_limit: u32,
	/// Maximum duration in seconds, 0 means unlimited
	pub time_limit: u32,
	/// Alias dereferencing
	pub alias_dereferencing: AliasDereferencing,
	/// Referral handling
	pub referral_handling: ReferralHandling,
	/// Request controls other than paging
	pub controls: Vec<Control>,
	/// Paging request, sent as an additional control
	pub paged: Option<PagedResultsControl>,
	/// Whether to request an attribute telling if result entries have
	/// children
	pub init_has_children_flag: bool,
}

impl SearchParameter {
	/// A search with no limits that dereferences nothing.
	#[must_use]
	pub fn new(base: Dn, filter: impl Into<String>, scope: Scope) -> Self {
		Self {
			name: String::new(),
			base,
			filter: filter.into(),
			scope,
			attributes: Vec::new(),
			count_limit: 0,
			time_limit: 0,
			alias_dereferencing: AliasDereferencing::Never,
			referral_handling: ReferralHandling::Ignore,
			controls: Vec::new(),
			paged: None,
			init_has_children_flag: false,
		}
	}

	/// A base object search for the given attributes.
	#[must_use]
	pub fn object(base: Dn, attributes: &[&str]) -> Self {
		Self {
			attributes: attributes.iter().map(|&a| a.to_owned()).collect(),
			..Self::new(base, DEFAULT_FILTER, Scope::Object)
		}
	}

	/// All controls to send, paging included.
	#[must_use]
	pub fn request_controls(&self) -> Vec<Control> {
		let mut controls = self.controls.clone();
		controls.extend(self.paged.as_ref().map(PagedResultsControl::to_control));
		controls
	}

	/// Whether a control with the given OID is sent.
	#[must_use]
	pub fn has_control(&self, oid: &str) -> bool {
		self.controls.iter().any(|c| c.oid == oid)
			|| (oid == oid::PAGED_RESULTS && self.paged.is_some())
	}

	/// Add a control unless one with the same OID is already present.
	pub fn add_control(&mut self, control: Control) {
		if !self.has_control(&control.oid) {
			self.controls.push(control);
		}
	}

	/// The request for the page after `outcome`, if the server handed out a
	/// cookie to continue with.
	#[must_use]
	pub fn next_page(&self, outcome: &SearchOutcome) -> Option<PagedResultsControl> {
		let request = self.paged.as_ref()?;
		let response = outcome.paged_response()?;
		(!response.cookie.is_empty())
			.then(|| PagedResultsControl { cookie: response.cookie, ..request.clone() })
	}

	/// The request for the first page, if this is a continuation.
	#[must_use]
	pub fn top_page(&self) -> Option<PagedResultsControl> {
		let request = self.paged.as_ref()?;
		(!request.cookie.is_empty())
			.then(|| PagedResultsControl { cookie: Vec::new(), ..request.clone() })
	}

	/// This search continued with another page request.
	#[must_use]
	pub fn with_page(&self, paged: PagedResultsControl) -> Self {
		Self { paged: Some(paged), ..self.clone() }
	}
}

/// What a single search returned.
#[derive(Clone, Debug, Default)]
pub struct SearchOutcome {
	/// Result entries
	pub entries: Vec<ldap3::SearchEntry>,
	/// Referral URLs the search did not resolve
	pub continuations: Vec<String>,
	/// Response controls
	pub response_controls: Vec<Control>,
	/// Whether a limit cut the result short, or more pages are available
	pub count_limit_exceeded: bool,
}

impl SearchOutcome {
	/// The paged results response, if the server sent one.
	#[must_use]
	pub fn paged_response(&self) -> Option<PagedResultsResponse> {
		self.response_controls
			.iter()
			.find(|c| c.oid == oid::PAGED_RESULTS)
			.and_then(|c| PagedResultsResponse::from_control(c).ok())
	}

	/// Whether nothing at all was returned.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty() && self.continuations.is_empty()
	}
}

/// Issue one search. Failures are reported to the monitor; limit errors only
/// set [`SearchOutcome::count_limit_exceeded`] and keep partial results.
#[instrument(skip_all, fields(base = %parameter.base, filter = %parameter.filter))]
pub async fn execute(
	directory: &mut dyn Directory,
	parameter: &SearchParameter,
	monitor: &Monitor,
) -> SearchOutcome {
	let mut outcome = SearchOutcome::default();
	if monitor.is_canceled() {
		return outcome;
	}
	monitor.report_progress(&format!("Searching {}", parameter.base));

	let response = tokio::select! {
		response = directory.search(parameter) => response,
		() = monitor.canceled() => {
			debug!("Search canceled");
			return outcome;
		}
	};
	let response = match response {
		Ok(response) => response,
		Err(err) if err.is_limit_exceeded() => {
			outcome.count_limit_exceeded = true;
			return outcome;
		}
		Err(err) => {
			monitor.report_error(err);
			return outcome;
		}
	};
	let SearchResponse { entries, references, controls, result_code, message } = response;
	outcome.entries = entries;
	outcome.response_controls = controls;
	if parameter.referral_handling != ReferralHandling::Ignore {
		outcome.continuations = references;
	}

	match result_code {
		result_code::SUCCESS | result_code::REFERRAL => {}
		_ if Error::directory(result_code, "").is_limit_exceeded() => {
			outcome.count_limit_exceeded = true;
		}
		code => monitor.report_error(Error::directory(code, message)),
	}
	if outcome.paged_response().is_some_and(|paged| !paged.cookie.is_empty()) {
		outcome.count_limit_exceeded = true;
	}
	debug!(
		entries = outcome.entries.len(),
		continuations = outcome.continuations.len(),
		limited = outcome.count_limit_exceeded,
		"Search finished"
	);
	outcome
}

/// One entry in the result list of a saved search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchResult {
	/// DN of the result
	pub dn: Dn,
	/// The cached entry
	pub entry: EntryId,
}

/// A saved search and its result state.
#[derive(Clone, Debug)]
pub struct Search {
	/// What to search for
	pub parameter: SearchParameter,
	/// `None` until executed, or after being invalidated
	pub(crate) results: Option<Vec<SearchResult>>,
	/// Referral URLs returned by the last run
	continuations: Vec<String>,
	/// Whether the last run was cut short
	count_limit_exceeded: bool,
	/// Response controls of the last page
	response_controls: Vec<Control>,
	/// Scroll mode cursor back to the first page
	top_page: Option<PagedResultsControl>,
	/// Scroll mode cursor to the following page
	next_page: Option<PagedResultsControl>,
}

impl Search {
	/// A search which has not run yet.
	#[must_use]
	pub fn new(parameter: SearchParameter) -> Self {
		Self {
			parameter,
			results: None,
			continuations: Vec::new(),
			count_limit_exceeded: false,
			response_controls: Vec::new(),
			top_page: None,
			next_page: None,
		}
	}

	/// Display name
	#[must_use]
	pub fn name(&self) -> &str {
		&self.parameter.name
	}

	/// Results of the last run, `None` if the search has to be run (again).
	#[must_use]
	pub fn results(&self) -> Option<&[SearchResult]> {
		self.results.as_deref()
	}

	/// Referral URLs returned by the last run.
	#[must_use]
	pub fn continuations(&self) -> &[String] {
		&self.continuations
	}

	/// Whether the last run was cut short.
	#[must_use]
	pub fn count_limit_exceeded(&self) -> bool {
		self.count_limit_exceeded
	}

	/// Response controls of the last page.
	#[must_use]
	pub fn response_controls(&self) -> &[Control] {
		&self.response_controls
	}

	/// Scroll mode cursor back to the first page.
	#[must_use]
	pub fn top_page(&self) -> Option<&PagedResultsControl> {
		self.top_page.as_ref()
	}

	/// Scroll mode cursor to the following page.
	#[must_use]
	pub fn next_page(&self) -> Option<&PagedResultsControl> {
		self.next_page.as_ref()
	}

	/// Whether the entry is among the results.
	#[must_use]
	pub fn contains(&self, entry: EntryId) -> bool {
		self.results.as_ref().is_some_and(|results| results.iter().any(|r| r.entry == entry))
	}

	/// Mark the search for re-execution.
	pub fn invalidate(&mut self) {
		self.results = None;
	}

	/// Point results at `old` to `new` instead, keeping one result per entry.
	pub(crate) fn replace_entry(&mut self, old: EntryId, new: EntryId) {
		let Some(results) = &mut self.results else { return };
		let mut kept: Vec<SearchResult> = Vec::with_capacity(results.len());
		for mut result in results.drain(..) {
			if result.entry == old {
				result.entry = new;
			}
			if !kept.iter().any(|r| r.entry == result.entry) {
				kept.push(result);
			}
		}
		*results = kept;
	}
}

/// Run a saved search and store its results, following transparent paging
/// until the cookie is exhausted or the count limit is reached. In scroll
/// mode only one page is fetched and the page cursors are stored instead.
#[instrument(skip_all, fields(search = %search.parameter.name))]
pub async fn run_search(
	connection: &mut BrowserConnection,
	directory: &mut dyn Directory,
	search: &mut Search,
	monitor: &Monitor,
) {
	let mut parameter = search.parameter.clone();
	connection.prepare_parameter(&mut parameter);

	let mut results = Vec::new();
	let mut continuations = Vec::new();
	search.top_page = None;
	search.next_page = None;
	loop {
		let outcome = execute(directory, &parameter, monitor).await;
		results.extend(connection.update_model(&parameter, &outcome, monitor));
		continuations.extend(outcome.continuations.iter().cloned());
		search.response_controls.clone_from(&outcome.response_controls);
		search.count_limit_exceeded = outcome.count_limit_exceeded;

		let Some(next) = parameter.next_page(&outcome) else { break };
		if next.scroll_mode {
			search.top_page = parameter.top_page();
			search.next_page = Some(next);
			break;
		}
		let limit = parameter.count_limit as usize;
		if monitor.is_canceled() || (limit > 0 && results.len() >= limit) || outcome.is_empty() {
			break;
		}
		parameter = parameter.with_page(next);
	}
	if monitor.is_canceled() {
		search.count_limit_exceeded = true;
	}
	search.results = Some(results);
	search.continuations = continuations;
	let name = search.parameter.name.clone();
	connection.notifier().send(BrowserEvent::SearchPerformed { name });
}
