//! The protocol operations the browser needs from a directory server
use async_trait::async_trait;
use ldap3::SearchEntry;
use percent_encoding::percent_decode_str;
use url::Url;

use crate::{
	dn::{Dn, Rdn},
	error::Error,
	search::{Control, SearchParameter},
};

/// Everything a search returned, before any interpretation of the result
/// code.
#[derive(Clone, Debug, Default)]
pub struct SearchResponse {
	/// Result entries
	pub entries: Vec<SearchEntry>,
	/// URLs of search references, and of a referral result
	pub references: Vec<String>,
	/// Response controls
	pub controls: Vec<Control>,
	/// LDAP result code of the search
	pub result_code: u32,
	/// Diagnostic message
	pub message: String,
}

/// A directory server. Every method corresponds to one protocol operation.
/// Non-success results of modifying operations are returned as
/// [`Error::Directory`].
#[async_trait]
pub trait Directory: Send {
	/// Search the directory.
	async fn search(&mut self, parameter: &SearchParameter) -> Result<SearchResponse, Error>;

	/// Rename and/or move an entry (modify DN).
	async fn rename(
		&mut self,
		dn: &Dn,
		new_rdn: &Rdn,
		new_superior: Option<&Dn>,
		delete_old_rdn: bool,
		controls: &[Control],
	) -> Result<(), Error>;

	/// Create an entry with the DN and attributes of `entry`.
	async fn add(&mut self, entry: &SearchEntry, controls: &[Control]) -> Result<(), Error>;

	/// Delete a leaf entry.
	async fn delete(&mut self, dn: &Dn, controls: &[Control]) -> Result<(), Error>;
}

/// An LDAP URL as found in referrals and search continuations, e.g.
/// `ldap://ldap2.example.org:389/ou=people,dc=example,dc=org??one`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LdapUrl {
	/// The full URL
	pub url: Url,
	/// The DN the URL points at
	pub dn: Dn,
}

impl LdapUrl {
	/// Parse an LDAP URL.
	pub fn parse(url: &str) -> Result<Self, Error> {
		let url = Url::parse(url)?;
		if !matches!(url.scheme(), "ldap" | "ldaps" | "ldapi") {
			return Err(Error::Invalid(format!("Not an LDAP URL: {url}")));
		}
		let path = percent_decode_str(url.path().trim_start_matches('/'))
			.decode_utf8()
			.map_err(|_| Error::Invalid(format!("DN of {url} is not UTF-8")))?;
		let dn = Dn::parse(&path)?;
		Ok(Self { url, dn })
	}

	/// The `host:port` the URL refers to.
	#[must_use]
	pub fn server(&self) -> String {
		let port = self.url.port().unwrap_or(if self.url.scheme() == "ldaps" { 636 } else { 389 });
		format!("{}:{port}", self.url.host_str().unwrap_or_default())
	}
}
