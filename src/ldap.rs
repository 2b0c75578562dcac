//! [`Directory`] implementation talking to an LDAP server

use std::{collections::HashSet, time::Duration};

use async_trait::async_trait;
use ldap3::{
	controls::RawControl, parse_refs, DerefAliases, LdapConnAsync, LdapResult, SearchEntry,
	SearchOptions,
};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::{
	config::Config,
	directory::{Directory, SearchResponse},
	dn::{Dn, Rdn},
	error::{result_code, Error},
	search::{AliasDereferencing, Control, Scope, SearchParameter},
};

/// A bound connection to an LDAP server.
#[derive(Debug)]
pub struct LdapDirectory {
	/// Handle for issuing operations
	ldap: ldap3::Ldap,
	/// Task driving the connection
	driver: JoinHandle<()>,
	/// Timeout of a single operation
	operation_timeout: Duration,
}

impl LdapDirectory {
	/// Connect to the server at the configured URL and bind with the
	/// configured credentials. An empty bind DN binds anonymously.
	#[instrument(skip_all, fields(url = %config.url))]
	pub async fn connect(config: &Config) -> Result<Self, Error> {
		let settings = config.connection.to_settings().await?;
		let (conn, mut ldap) = LdapConnAsync::from_url_with_settings(settings, &config.url).await?;
		let driver = tokio::spawn(async move {
			if let Err(err) = conn.drive().await {
				warn!("Ldap connection error {err}");
			}
		});

		ldap.simple_bind(&config.bind_dn, &config.bind_password).await?.success()?;
		debug!("Bound to directory");
		Ok(Self { ldap, driver, operation_timeout: config.connection.operation_timeout })
	}

	/// Unbind and wait for the connection to shut down.
	pub async fn unbind(mut self) -> Result<(), Error> {
		self.ldap.unbind().await?;
		if let Err(err) = self.driver.await {
			warn!("Failed to join background task: {err}");
		}
		Ok(())
	}

	/// Prepare the handle for the next operation.
	fn next_operation(&mut self, controls: &[Control]) -> &mut ldap3::Ldap {
		self.ldap.with_timeout(self.operation_timeout);
		if !controls.is_empty() {
			self.ldap.with_controls(controls.iter().map(RawControl::from).collect::<Vec<_>>());
		}
		&mut self.ldap
	}
}

/// Turn the result of a modifying operation into an error unless it
/// succeeded.
fn check(result: LdapResult) -> Result<(), Error> {
	if result.rc == result_code::SUCCESS {
		Ok(())
	} else {
		Err(Error::directory(result.rc, result.text))
	}
}

/// The attributes of a record in the form `add` expects.
fn attributes_of(record: &SearchEntry) -> Vec<(Vec<u8>, HashSet<Vec<u8>>)> {
	let text = record.attrs.iter().map(|(name, values)| {
		(name.as_bytes().to_vec(), values.iter().map(|v| v.as_bytes().to_vec()).collect())
	});
	let binary = record
		.bin_attrs
		.iter()
		.map(|(name, values)| (name.as_bytes().to_vec(), values.iter().cloned().collect()));
	text.chain(binary).collect()
}

#[async_trait]
impl Directory for LdapDirectory {
	async fn search(&mut self, parameter: &SearchParameter) -> Result<SearchResponse, Error> {
		let options = SearchOptions::new()
			.deref(match parameter.alias_dereferencing {
				AliasDereferencing::Never => DerefAliases::Never,
				AliasDereferencing::Search => DerefAliases::Searching,
				AliasDereferencing::Finding => DerefAliases::Finding,
				AliasDereferencing::Always => DerefAliases::Always,
			})
			.sizelimit(i32::try_from(parameter.count_limit).unwrap_or(i32::MAX))
			.timelimit(i32::try_from(parameter.time_limit).unwrap_or(i32::MAX));
		let scope = match parameter.scope {
			Scope::Object => ldap3::Scope::Base,
			Scope::OneLevel => ldap3::Scope::OneLevel,
			Scope::Subtree => ldap3::Scope::Subtree,
		};
		let base = parameter.base.to_string();
		let attributes: Vec<&str> = parameter.attributes.iter().map(String::as_str).collect();

		let ldap = self.next_operation(&parameter.request_controls());
		ldap.with_search_options(options);
		let ldap3::SearchResult(results, result) =
			ldap.search(&base, scope, &parameter.filter, attributes).await?;

		let mut response = SearchResponse::default();
		for entry in results {
			if entry.is_ref() {
				response.references.extend(parse_refs(entry.0));
			} else if !entry.is_intermediate() {
				response.entries.push(SearchEntry::construct(entry));
			}
		}
		if result.rc == result_code::REFERRAL {
			response.references.extend(result.refs);
		}
		response.controls =
			result.ctrls.into_iter().map(|control| Control::from(control.1)).collect();
		response.result_code = result.rc;
		response.message = result.text;
		Ok(response)
	}

	async fn rename(
		&mut self,
		dn: &Dn,
		new_rdn: &Rdn,
		new_superior: Option<&Dn>,
		delete_old_rdn: bool,
		controls: &[Control],
	) -> Result<(), Error> {
		let new_superior = new_superior.map(ToString::to_string);
		let result = self
			.next_operation(controls)
			.modifydn(
				&dn.to_string(),
				&new_rdn.to_string(),
				delete_old_rdn,
				new_superior.as_deref(),
			)
			.await?;
		check(result)
	}

	async fn add(&mut self, entry: &SearchEntry, controls: &[Control]) -> Result<(), Error> {
		let attributes = attributes_of(entry);
		let result = self.next_operation(controls).add(&entry.dn, attributes).await?;
		check(result)
	}

	async fn delete(&mut self, dn: &Dn, controls: &[Control]) -> Result<(), Error> {
		let result = self.next_operation(controls).delete(&dn.to_string()).await?;
		check(result)
	}
}
