//! Config for the browser connection.
use std::{path::PathBuf, sync::Arc, time::Duration};

use ldap3::LdapConnSettings;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
	error::Error,
	search::{AliasDereferencing, ReferralHandling},
};

/// Configuration for which variant of ISO8601 to use for parsing and
/// serializing time. Configured according the syntax definition
/// `( 1.3.6.1.4.1.1466.115.121.1.24 DESC 'Generalized Time' )` described in
/// RFC4517 section 3.1.13
pub const TIME_FORMAT: &[time::format_description::FormatItem] =
	time::macros::format_description!("[year][month][day][hour][minute][second]Z");

/// Connection configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
	/// The URL to connect to the server with. Supports ldap, ldaps, and ldapi
	/// schemes
	pub url: Url,
	/// Connection settings.
	#[serde(default)]
	pub connection: ConnectionConfig,
	/// The DN to bind as. An empty DN binds anonymously.
	#[serde(default)]
	pub bind_dn: String,
	/// The password for the bind DN
	#[serde(default)]
	pub bind_password: String,
	/// Limits and behaviour of the browser
	#[serde(default)]
	pub browser: BrowserOptions,
}

/// Configuration for how to connect to the LDAP server
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
	/// Timeout to establish a connection in seconds.
	pub timeout: u64,

	/// LDAP operation timeout. For search per reply.
	pub operation_timeout: Duration,

	/// TLS config
	#[serde(default)]
	pub tls: TLSConfig,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		Self { timeout: 5, operation_timeout: Duration::from_secs(30), tls: TLSConfig::default() }
	}
}

/// TLS Configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TLSConfig {
	/// Use StartTLS extended operation for establishing a secure connection,
	/// rather than TLS on a dedicated port.
	pub starttls: bool,

	/// Disable verification of TLS certificates
	pub no_tls_verify: bool,

	/// TLS root certificates path
	pub root_certificates_path: Option<PathBuf>,

	/// Path of the TLS client key to use for the connection
	pub client_key_path: Option<PathBuf>,

	/// Path of the TLS client certificate to use for the connection
	pub client_certificate_path: Option<PathBuf>,
}

/// Limits and behaviour applied to every search the browser issues.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserOptions {
	/// Maximum number of entries per search, 0 means unlimited
	pub count_limit: u32,
	/// Maximum search duration in seconds, 0 means unlimited
	pub time_limit: u32,
	/// How aliases are dereferenced while searching
	pub alias_dereferencing: AliasDereferencing,
	/// How referrals are handled while searching
	pub referral_handling: ReferralHandling,
	/// If set, enables the [simple paged search control] for child listings
	///
	/// [simple paged search control]: https://www.rfc-editor.org/rfc/rfc2696.html
	pub paged_search: Option<PagedSearchConfig>,
	/// Whether subentries are listed as children
	pub fetch_subentries: bool,
	/// Whether every child listing sends the ManageDsaIT control
	pub manage_dsa_it: bool,
	/// Whether searches request an attribute telling if an entry has children
	pub check_for_children: bool,
	/// Whether base entries are discovered from the Root DSE naming contexts
	pub fetch_base_dns: bool,
	/// The base entry to use when `fetch_base_dns` is disabled
	pub base_dn: String,
}

impl Default for BrowserOptions {
	fn default() -> Self {
		Self {
			count_limit: 1000,
			time_limit: 0,
			alias_dereferencing: AliasDereferencing::Always,
			referral_handling: ReferralHandling::Follow,
			paged_search: None,
			fetch_subentries: false,
			manage_dsa_it: false,
			check_for_children: true,
			fetch_base_dns: true,
			base_dn: String::new(),
		}
	}
}

/// Page size and mode of paged searches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedSearchConfig {
	/// Number of entries the server should return per page
	pub size: u32,
	/// Whether pages are presented one at a time instead of being fetched
	/// until exhaustion
	#[serde(default)]
	pub scroll_mode: bool,
}

impl ConnectionConfig {
	/// Create a [`LdapConnSettings`] based on this [`ConnectionConfig`]
	pub(crate) async fn to_settings(&self) -> Result<LdapConnSettings, Error> {
		let mut settings = LdapConnSettings::new();

		settings = settings.set_conn_timeout(Duration::from_secs(self.timeout));
		settings = settings.set_starttls(self.tls.starttls);
		settings = settings.set_no_tls_verify(self.tls.no_tls_verify);

		if let Some(path) = &self.tls.root_certificates_path {
			let mut roots = RootCertStore::empty();
			let pem = tokio::fs::read(path).await?;
			let certificates = rustls_pemfile::certs(&mut pem.as_slice())?;
			if certificates.is_empty() {
				return Err(Error::Invalid("Could not read root certificate".to_owned()));
			}
			for certificate in certificates {
				roots
					.add(&Certificate(certificate))
					.map_err(|_| Error::Invalid("Could not read root certificate".to_owned()))?;
			}

			let builder =
				ClientConfig::builder().with_safe_defaults().with_root_certificates(roots);
			let config = match (&self.tls.client_key_path, &self.tls.client_certificate_path) {
				(Some(key_path), Some(cert_path)) => {
					let chain = rustls_pemfile::certs(
						&mut tokio::fs::read(cert_path).await?.as_slice(),
					)?
					.into_iter()
					.map(Certificate)
					.collect::<Vec<_>>();
					let key = rustls_pemfile::pkcs8_private_keys(
						&mut tokio::fs::read(key_path).await?.as_slice(),
					)?
					.into_iter()
					.next()
					.ok_or_else(|| Error::Invalid("Could not read client key".to_owned()))?;
					builder.with_client_auth_cert(chain, PrivateKey(key)).map_err(|_| {
						Error::Invalid("Could not read client certificates".to_owned())
					})?
				}
				(None, None) => builder.with_no_client_auth(),
				_ => Err(Error::Invalid(
					"Both a client certificate and key file in PKCS8 format must be specified"
						.to_owned(),
				))?,
			};
			settings = settings.set_config(Arc::new(config));
		}
		Ok(settings)
	}
}
