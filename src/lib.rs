//! The connection core of an LDAP directory browser.
//!
//! For every connection the browser keeps a model of the part of the
//! directory tree that has been looked at so far: the cached entries, their
//! children and attributes, the schema of the server, saved searches and
//! bookmarks. The operations in this crate keep that model consistent with
//! the server while entries are listed, searched, renamed and moved.
//!
//! Protocol operations go through the [`Directory`] trait, which
//! [`LdapDirectory`] implements on top of `ldap3`. Observers learn about
//! changes of the model through [`BrowserEvent`]s sent over a channel, and
//! every long running operation reports progress, errors and cancellation
//! through a [`Monitor`].
//!
//! For a general primer on LDAP, the [introduction] in the `ldap3` crate which
//! is used here for interfacing with LDAP is an excellent resource. The site
//! "firstyear's blog-a-log" also has [a guide][firstyear] which is more
//! visually oriented and goes into more detail about searching
//!
//! [introduction]: https://github.com/inejge/ldap3/blob/master/LDAP-primer.md
//! [firstyear]: https://fy.blackhats.net.au/blog/html/pages/ldap_guide_part_1_foundations.html
//!
//! # Getting started
//! Listing the top of the tree might look like so:
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use url::Url;
//! use ldap_browser_core::{
//!     children::initialize_children, config::{BrowserOptions, Config, ConnectionConfig},
//!     events::Notifier, schema::DescriptionParser, schema_reload::reload_schema,
//!     BrowserConnection, LdapDirectory, Monitor,
//! };
//!
//! // Configuration can also be deserialized with serde. It's hand-constructed
//! // here for demonstration purposes.
//! let config = Config {
//!     url: Url::parse("ldap://localhost")?,
//!     connection: ConnectionConfig::default(),
//!     bind_dn: "cn=admin,dc=example,dc=org".to_owned(),
//!     bind_password: "verysecret".to_owned(),
//!     browser: BrowserOptions::default(),
//! };
//!
//! let mut directory = LdapDirectory::connect(&config).await?;
//! let (notifier, mut events) = Notifier::channel("localhost".into());
//! let mut connection =
//!     BrowserConnection::new("localhost".into(), config.browser.clone(), notifier);
//! let monitor = Monitor::new();
//!
//! reload_schema(false, &mut connection, &mut directory, &DescriptionParser, &monitor).await;
//! let root = connection.root();
//! initialize_children(&mut connection, &mut directory, root, false, &monitor).await;
//! for &child in &connection.cache().children(root).expect("listed").children {
//!     println!("{}", connection.cache().entry(child).expect("cached").dn());
//! }
//! while let Ok(notification) = events.try_recv() {
//!     println!("{:?}", notification.event);
//! }
//! directory.unbind().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//! * Referrals are not chased. Search continuations are listed as placeholder
//!   entries carrying the referral URL.
//! * The schema parser keeps only the parts of RFC 4512 descriptions the
//!   browser needs.
//! * Values of LDIF files that refer to URLs (`attr:< file://...`) cannot be
//!   read.
//! * [secrecy](https://docs.rs/secrecy) is not used for storing the bind
//!   password, it probably should be

pub mod attributes;
pub mod cache;
pub mod children;
pub mod config;
pub mod connection;
pub mod directory;
pub mod dn;
pub mod entry;
pub mod error;
pub mod events;
pub mod export;
pub mod ldap;
pub mod ldif;
pub mod manager;
pub mod monitor;
pub mod persist;
pub mod rename;
pub mod root_dse;
pub mod schema;
pub mod schema_reload;
pub mod search;

pub use ldap3::{self, SearchEntry};

pub use crate::{
	config::{BrowserOptions, Config, ConnectionConfig},
	connection::{BrowserConnection, ConnectionId},
	directory::Directory,
	dn::{Dn, Rdn},
	entry::{EntryId, SearchEntryExt},
	error::Error,
	events::BrowserEvent,
	ldap::LdapDirectory,
	monitor::Monitor,
	search::{Search, SearchParameter},
};
