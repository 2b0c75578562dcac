#![allow(
	clippy::dbg_macro,
	clippy::expect_used,
	clippy::missing_docs_in_private_items,
	clippy::print_stderr,
	clippy::print_stdout,
	clippy::unwrap_used,
	clippy::bool_assert_comparison
)]
use std::{collections::BTreeSet, error::Error};

use ldap_browser_core::{
	attributes::initialize_attributes,
	children::{initialize_children, next_page, top_page},
	config::{BrowserOptions, Config, ConnectionConfig, PagedSearchConfig},
	entry::EntryKind,
	events::{Notification, Notifier},
	export::export_ldif,
	rename::{move_entries, rename_entry, FixedPolicy, RenameOutcome},
	schema::DescriptionParser,
	schema_reload::reload_schema,
	search::{
		run_search, AliasDereferencing, PagedResultsControl, ReferralHandling, Scope, Search,
		SearchParameter,
	},
	BrowserConnection, BrowserEvent, Directory, Dn, EntryId, LdapDirectory, Monitor, Rdn,
};
use serial_test::serial;
use tokio::sync::mpsc::Receiver;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};
use url::Url;

mod common;

use common::{
	ldap_add_organizational_unit, ldap_add_user, ldap_connect, ldap_delete_organizational_unit,
	ldap_delete_user, MockDirectory, Operation, SUFFIX,
};

const PEOPLE: &str = "ou=people,dc=example,dc=org";
const GROUPS: &str = "ou=groups,dc=example,dc=org";

/// Options that make every child listing a single search.
fn options() -> BrowserOptions {
	BrowserOptions {
		alias_dereferencing: AliasDereferencing::Never,
		referral_handling: ReferralHandling::Ignore,
		..BrowserOptions::default()
	}
}

/// A directory with two organizational units and `people` entries in the
/// first one.
fn directory(people: usize) -> MockDirectory {
	let mut directory = MockDirectory::new();
	let unit = ["top", "organizationalUnit"];
	directory.insert(PEOPLE, &[("objectClass", &unit), ("ou", &["people"])]);
	directory.insert(GROUPS, &[("objectClass", &unit), ("ou", &["groups"])]);
	directory.insert_people(PEOPLE, people);
	directory
}

fn dn(dn: &str) -> Dn {
	Dn::parse(dn).unwrap()
}

fn drain(events: &mut Receiver<Notification>) -> Vec<BrowserEvent> {
	let mut drained = Vec::new();
	while let Ok(notification) = events.try_recv() {
		drained.push(notification.event);
	}
	drained
}

fn children(connection: &BrowserConnection, id: EntryId) -> Vec<Dn> {
	connection
		.cache()
		.children(id)
		.map(|info| info.children.clone())
		.unwrap_or_default()
		.into_iter()
		.map(|child| connection.cache().entry(child).unwrap().dn().clone())
		.collect()
}

/// Reload the schema with the description parser.
async fn reload(
	force: bool,
	connection: &mut BrowserConnection,
	directory: &mut dyn Directory,
	monitor: &Monitor,
) -> bool {
	reload_schema(force, connection, directory, &DescriptionParser, monitor).await
}

/// Load the schema, list the Root DSE and the base entry, and return the
/// connection with the event receiver.
async fn open(
	directory: &mut MockDirectory,
	options: BrowserOptions,
) -> (BrowserConnection, Receiver<Notification>) {
	let (notifier, events) = Notifier::channel("mock".into());
	let mut connection = BrowserConnection::new("mock".into(), options, notifier);
	let monitor = Monitor::new();
	assert!(reload(false, &mut connection, directory, &monitor).await);
	let root = connection.root();
	initialize_children(&mut connection, directory, root, false, &monitor).await;
	let base = connection.get(&dn(SUFFIX)).expect("base entry listed below the root");
	initialize_children(&mut connection, directory, base, false, &monitor).await;
	assert_eq!(monitor.first_error(), None);
	(connection, events)
}

#[tokio::test]
async fn root_dse_lists_base_and_metadata_entries() {
	let mut directory = directory(0);
	let (connection, mut events) = open(&mut directory, options()).await;
	let root = connection.root();

	let listed = children(&connection, root);
	assert_eq!(listed, [dn(SUFFIX), dn("cn=Subschema")]);
	let base = connection.cache().get_entry(&dn(SUFFIX), connection.schema()).unwrap();
	assert_eq!(base.kind(), &EntryKind::BaseDn);
	assert_eq!(children(&connection, base.id()), [dn(GROUPS), dn(PEOPLE)]);

	let events = drain(&mut events);
	assert!(events.contains(&BrowserEvent::SchemaLoaded));
	assert!(events.contains(&BrowserEvent::ChildrenInitialized { entry: root }));
	assert!(events.contains(&BrowserEvent::ChildrenInitialized { entry: base.id() }));
}

#[tokio::test]
async fn equal_dns_share_one_entry() {
	let mut directory = directory(3);
	let (mut connection, _events) = open(&mut directory, options()).await;
	let people = connection.get(&dn(PEOPLE)).unwrap();
	assert_eq!(connection.get(&dn("OU=People, DC=Example,DC=ORG")), Some(people));
	assert!(connection.cache().entry(people).unwrap().flags().has_children_hint);
	let groups = connection.get(&dn(GROUPS)).unwrap();
	assert!(!connection.cache().entry(groups).unwrap().flags().has_children_hint);

	let monitor = Monitor::new();
	initialize_children(&mut connection, &mut directory, people, false, &monitor).await;
	let listed = connection.cache().children(people).unwrap().children.clone();
	assert_eq!(listed.len(), 3);
	assert_eq!(connection.get(&dn("UID=USER000,ou=people,dc=example,dc=org")), Some(listed[0]));
	assert_eq!(connection.cache().entry(listed[0]).unwrap().parent(), Some(people));
}

#[tokio::test]
async fn listing_again_replaces_the_children() {
	let mut directory = directory(3);
	let (mut connection, _events) = open(&mut directory, options()).await;
	let people = connection.get(&dn(PEOPLE)).unwrap();
	let monitor = Monitor::new();

	let before = directory.search_count();
	initialize_children(&mut connection, &mut directory, people, false, &monitor).await;
	let first = children(&connection, people);
	let cached = connection.cache().len();
	assert_eq!(directory.search_count(), before + 1);

	initialize_children(&mut connection, &mut directory, people, false, &monitor).await;
	assert_eq!(directory.search_count(), before + 2);
	assert_eq!(children(&connection, people), first);
	assert_eq!(connection.cache().len(), cached, "No entry is cached twice");
	assert!(!monitor.errors_reported());
}

#[tokio::test]
async fn transparent_paging_fetches_every_page() {
	let mut directory = directory(25);
	let options = BrowserOptions {
		paged_search: Some(PagedSearchConfig { size: 10, scroll_mode: false }),
		..options()
	};
	let (mut connection, _events) = open(&mut directory, options).await;
	let people = connection.get(&dn(PEOPLE)).unwrap();
	let monitor = Monitor::new();

	let before = directory.search_count();
	initialize_children(&mut connection, &mut directory, people, false, &monitor).await;
	assert_eq!(directory.search_count() - before, 3, "Pages of 10, 10 and 5 entries");
	let info = connection.cache().children(people).unwrap();
	assert_eq!(info.children.len(), 25);
	assert!(info.initialized);
	assert!(!info.has_more);
	assert!(info.next_page.is_none());

	let cookies: Vec<Vec<u8>> = directory.searches()[before..]
		.iter()
		.map(|search| search.paged.as_ref().unwrap().cookie.clone())
		.collect();
	assert_eq!(cookies, [b"".to_vec(), b"10".to_vec(), b"20".to_vec()]);
}

#[tokio::test]
async fn scroll_mode_moves_between_pages() {
	let mut directory = directory(25);
	let options = BrowserOptions {
		paged_search: Some(PagedSearchConfig { size: 10, scroll_mode: true }),
		..options()
	};
	let (mut connection, _events) = open(&mut directory, options).await;
	let people = connection.get(&dn(PEOPLE)).unwrap();
	let monitor = Monitor::new();

	initialize_children(&mut connection, &mut directory, people, false, &monitor).await;
	let info = connection.cache().children(people).unwrap();
	assert_eq!(info.children.len(), 10);
	assert!(info.has_more);
	assert!(info.top_page.is_none(), "Already on the first page");
	assert_eq!(info.next_page.as_ref().unwrap().cookie, b"10");

	next_page(&mut connection, &mut directory, people, &monitor).await;
	let listed = children(&connection, people);
	assert_eq!(listed.len(), 10);
	assert_eq!(listed[0], dn("uid=user010,ou=people,dc=example,dc=org"));
	assert!(connection.cache().children(people).unwrap().top_page.is_some());

	next_page(&mut connection, &mut directory, people, &monitor).await;
	let info = connection.cache().children(people).unwrap();
	assert_eq!(info.children.len(), 5);
	assert!(!info.has_more);
	assert!(info.next_page.is_none());
	assert!(info.top_page.is_some(), "The last page can go back to the first one");

	top_page(&mut connection, &mut directory, people, &monitor).await;
	assert_eq!(children(&connection, people)[0], dn("uid=user000,ou=people,dc=example,dc=org"));
	assert!(!monitor.errors_reported());
}

#[tokio::test]
async fn count_limit_marks_the_listing_incomplete() {
	let mut directory = directory(8);
	let (mut connection, _events) =
		open(&mut directory, BrowserOptions { count_limit: 5, ..options() }).await;
	let people = connection.get(&dn(PEOPLE)).unwrap();
	let monitor = Monitor::new();

	initialize_children(&mut connection, &mut directory, people, false, &monitor).await;
	let info = connection.cache().children(people).unwrap();
	assert_eq!(info.children.len(), 5);
	assert!(info.has_more);
	assert!(!monitor.errors_reported(), "Hitting a limit is not an error");
}

#[tokio::test]
async fn continuations_become_placeholders() {
	let mut directory = directory(0);
	directory.insert(
		"cn=remote,dc=example,dc=org",
		&[
			("objectClass", &["top", "referral", "extensibleObject"]),
			("cn", &["remote"]),
			("ref", &["ldap://ldap.example.net/ou=remote,dc=example,dc=net"]),
		],
	);
	let options = BrowserOptions { referral_handling: ReferralHandling::Follow, ..options() };
	let (connection, _events) = open(&mut directory, options).await;
	let base = connection.get(&dn(SUFFIX)).unwrap();

	let listed = &connection.cache().children(base).unwrap().children;
	let placeholder = listed
		.iter()
		.filter_map(|&child| connection.cache().entry(child))
		.find(|entry| matches!(entry.kind(), EntryKind::Continuation { .. }))
		.unwrap();
	assert_eq!(placeholder.dn(), &dn("ou=remote,dc=example,dc=net"));
	let url = "ldap://ldap.example.net/ou=remote,dc=example,dc=net".to_owned();
	assert_eq!(placeholder.kind(), &EntryKind::Continuation { url });

	let referral = connection.get(&dn("cn=remote,dc=example,dc=org")).unwrap();
	assert!(connection.cache().entry(referral).unwrap().is_referral());
	assert!(listed.contains(&referral), "Referral objects are listed with ManageDsaIT");
}

#[tokio::test]
async fn canceled_listings_finish_incomplete() {
	let mut directory = directory(3);
	let (mut connection, mut events) = open(&mut directory, options()).await;
	let people = connection.get(&dn(PEOPLE)).unwrap();
	drain(&mut events);
	let monitor = Monitor::new();
	monitor.cancel();

	let before = directory.search_count();
	initialize_children(&mut connection, &mut directory, people, false, &monitor).await;
	assert_eq!(directory.search_count(), before, "Canceled monitors send no search");
	let info = connection.cache().children(people).unwrap();
	assert!(info.initialized);
	assert!(info.has_more);
	assert!(info.children.is_empty());
	let hint = connection.cache().entry(people).unwrap().flags().has_children_hint;
	assert!(hint, "Nothing was learned about the children");
	assert_eq!(drain(&mut events), [BrowserEvent::ChildrenInitialized { entry: people }]);
}

#[tokio::test]
async fn empty_listing_clears_the_children_hint() {
	let mut directory = directory(0);
	let options = BrowserOptions { check_for_children: false, ..options() };
	let (mut connection, _events) = open(&mut directory, options).await;
	let groups = connection.get(&dn(GROUPS)).unwrap();
	assert!(connection.cache().entry(groups).unwrap().flags().has_children_hint);

	let monitor = Monitor::new();
	initialize_children(&mut connection, &mut directory, groups, false, &monitor).await;
	let info = connection.cache().children(groups).unwrap();
	assert!(info.initialized);
	assert!(info.children.is_empty());
	assert!(!info.has_more);
	assert!(!connection.cache().entry(groups).unwrap().flags().has_children_hint);
	assert!(!monitor.errors_reported());
}

#[tokio::test]
async fn attributes_survive_a_purging_listing() {
	let mut directory = directory(0);
	let (mut connection, mut events) = open(&mut directory, options()).await;
	let people = connection.get(&dn(PEOPLE)).unwrap();
	assert!(!connection.cache().entry(people).unwrap().flags().has_children_hint);
	drain(&mut events);
	directory.insert_people(PEOPLE, 2);
	let monitor = Monitor::new();

	initialize_attributes(&mut connection, &mut directory, people, false, &monitor).await;
	let info = connection.cache().attributes(people).unwrap();
	assert!(info.initialized);
	assert_eq!(info.values("ou"), ["people"]);
	assert_eq!(drain(&mut events), [BrowserEvent::AttributesInitialized { entry: people }]);

	initialize_children(&mut connection, &mut directory, people, true, &monitor).await;
	let info = connection.cache().attributes(people).unwrap();
	assert!(!info.initialized, "Purged attributes have to be read again");
	assert_eq!(info.values("ou"), ["people"], "Purging keeps the values");
	assert!(connection.cache().entry(people).unwrap().flags().has_children_hint);
	assert_eq!(children(&connection, people).len(), 2);
	assert!(!monitor.errors_reported());
}

#[tokio::test]
async fn operational_attributes_are_requested_by_name() {
	let mut directory = directory(2);
	let (mut connection, _events) = open(&mut directory, options()).await;
	let people = connection.get(&dn(PEOPLE)).unwrap();
	let monitor = Monitor::new();

	initialize_attributes(&mut connection, &mut directory, people, true, &monitor).await;
	let search = directory.searches().last().copied().cloned().unwrap();
	assert_eq!(search.scope, Scope::Object);
	assert_eq!(search.base, dn(PEOPLE));
	assert_eq!(search.attributes, ["*", "ref", "hasSubordinates", "+"]);
	let info = connection.cache().attributes(people).unwrap();
	assert!(info.initialized);
	assert_eq!(info.values("hasSubordinates"), ["TRUE"]);
	assert!(!monitor.errors_reported());
}

#[tokio::test]
async fn schema_is_reloaded_only_when_stale() {
	let mut directory = directory(0);
	let (notifier, mut events) = Notifier::channel("mock".into());
	let mut connection = BrowserConnection::new("mock".into(), options(), notifier);
	let monitor = Monitor::new();

	assert!(reload(false, &mut connection, &mut directory, &monitor).await);
	assert!(!connection.schema().is_default());
	assert_eq!(directory.search_count(), 2, "Location and content");
	assert_eq!(drain(&mut events), [BrowserEvent::SchemaLoaded]);

	assert!(!reload(false, &mut connection, &mut directory, &monitor).await);
	assert_eq!(directory.search_count(), 4, "Location and timestamps");
	assert!(drain(&mut events).is_empty());

	directory.set_schema_timestamp("20250101000000Z");
	assert!(reload(false, &mut connection, &mut directory, &monitor).await);
	assert_eq!(directory.search_count(), 7);
	assert_eq!(connection.schema().timestamp(), Some("20250101000000Z"));
	assert_eq!(drain(&mut events), [BrowserEvent::SchemaReset, BrowserEvent::SchemaLoaded]);

	assert!(reload(true, &mut connection, &mut directory, &monitor).await);
	assert!(!monitor.errors_reported());
}

#[tokio::test]
async fn missing_schema_location_falls_back_to_the_default_schema() {
	let mut directory = directory(0);
	directory.remove_root_dse_attribute("subschemaSubentry");
	let (notifier, _events) = Notifier::channel("mock".into());
	let mut connection = BrowserConnection::new("mock".into(), options(), notifier);
	let monitor = Monitor::new();

	assert!(!reload(true, &mut connection, &mut directory, &monitor).await);
	assert!(connection.schema().is_default());
	assert_eq!(monitor.first_error().as_deref(), Some("Missing schema location in the Root DSE"));
}

#[tokio::test]
async fn renaming_a_leaf() {
	let mut directory = directory(2);
	let (mut connection, mut events) = open(&mut directory, options()).await;
	let people = connection.get(&dn(PEOPLE)).unwrap();
	let monitor = Monitor::new();
	initialize_children(&mut connection, &mut directory, people, false, &monitor).await;
	let old_dn = dn("uid=user000,ou=people,dc=example,dc=org");
	let new_dn = dn("uid=renamed,ou=people,dc=example,dc=org");
	let old = connection.get(&old_dn).unwrap();
	drain(&mut events);

	let outcome = rename_entry(
		&mut connection,
		&mut directory,
		old,
		Rdn::new("uid", "renamed"),
		&FixedPolicy(false),
		&monitor,
	)
	.await;
	let RenameOutcome::Renamed { entry: Some(renamed) } = outcome else {
		panic!("unexpected outcome {outcome:?}");
	};
	assert!(connection.get(&old_dn).is_none());
	assert_eq!(connection.get(&new_dn), Some(renamed));
	let listed = &connection.cache().children(people).unwrap().children;
	assert!(listed.contains(&renamed) && !listed.contains(&old));

	let renamed_on_server = directory.log.iter().any(|operation| match operation {
		Operation::Rename { dn, new_dn: target } => {
			*dn == old_dn.to_string() && *target == new_dn.to_string()
		}
		_ => false,
	});
	assert!(renamed_on_server);
	assert_eq!(directory.get(&new_dn.to_string()).unwrap().attrs["uid"], ["renamed"]);
	assert_eq!(drain(&mut events), [BrowserEvent::EntryRenamed { old_dn, new_dn }]);
	assert!(!monitor.errors_reported());
}

#[tokio::test]
async fn refused_subtree_rename_is_simulated() {
	let mut directory = directory(3);
	directory.refuse_non_leaf_rename = true;
	let (mut connection, _events) = open(&mut directory, options()).await;
	let people = connection.get(&dn(PEOPLE)).unwrap();
	let base = connection.get(&dn(SUFFIX)).unwrap();
	let monitor = Monitor::new();
	initialize_children(&mut connection, &mut directory, people, false, &monitor).await;
	let user = connection.get(&dn("uid=user001,ou=people,dc=example,dc=org")).unwrap();

	let outcome = rename_entry(
		&mut connection,
		&mut directory,
		people,
		Rdn::new("ou", "staff"),
		&FixedPolicy(true),
		&monitor,
	)
	.await;
	let RenameOutcome::Simulated { entry: Some(staff), created, deleted } = outcome else {
		panic!("unexpected outcome {outcome:?}");
	};
	assert_eq!((created, deleted), (4, 4));
	assert_eq!(directory.add_count(), 4);
	assert_eq!(directory.delete_count(), 4);
	let subtree_searches =
		directory.searches().iter().filter(|search| search.scope == Scope::Subtree).count();
	assert_eq!(subtree_searches, 1, "The subtree is read once");

	assert!(!directory.contains(PEOPLE));
	assert!(directory.contains("uid=user001,ou=staff,dc=example,dc=org"));
	assert_eq!(directory.get("ou=staff,dc=example,dc=org").unwrap().attrs["ou"], ["staff"]);

	assert!(connection.get(&dn(PEOPLE)).is_none());
	assert!(connection.cache().entry(user).is_none(), "The old subtree is uncached");
	assert_eq!(connection.get(&dn("ou=staff,dc=example,dc=org")), Some(staff));
	let base_children = connection.cache().children(base).unwrap();
	assert!(!base_children.initialized, "The parent lists its children again");
	assert!(!monitor.errors_reported());
}

#[tokio::test]
async fn declined_simulation_changes_nothing() {
	let mut directory = directory(3);
	directory.refuse_non_leaf_rename = true;
	let (mut connection, mut events) = open(&mut directory, options()).await;
	let people = connection.get(&dn(PEOPLE)).unwrap();
	let monitor = Monitor::new();
	drain(&mut events);

	let outcome = rename_entry(
		&mut connection,
		&mut directory,
		people,
		Rdn::new("ou", "staff"),
		&FixedPolicy(false),
		&monitor,
	)
	.await;
	assert_eq!(outcome, RenameOutcome::Failed);
	assert!(monitor.take_errors()[0].is_non_leaf());
	assert_eq!(directory.add_count(), 0);
	assert!(directory.contains(PEOPLE));
	assert_eq!(connection.get(&dn(PEOPLE)), Some(people));
	assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn moving_invalidates_saved_searches() {
	let mut directory = directory(2);
	let (mut connection, mut events) = open(&mut directory, options()).await;
	let people = connection.get(&dn(PEOPLE)).unwrap();
	let groups = connection.get(&dn(GROUPS)).unwrap();
	let monitor = Monitor::new();
	initialize_children(&mut connection, &mut directory, people, false, &monitor).await;
	let user = connection.get(&dn("uid=user000,ou=people,dc=example,dc=org")).unwrap();

	for (name, base) in [("people", PEOPLE), ("groups", GROUPS)] {
		let mut parameter = SearchParameter::new(dn(base), "(objectClass=person)", Scope::Subtree);
		parameter.name = name.to_owned();
		let mut search = Search::new(parameter);
		run_search(&mut connection, &mut directory, &mut search, &monitor).await;
		connection.searches_mut().add(search);
	}
	assert!(connection.searches().get("people").unwrap().contains(user));
	assert_eq!(connection.searches().get("groups").unwrap().results().map(<[_]>::len), Some(0));
	drain(&mut events);

	let policy = FixedPolicy(false);
	let outcomes =
		move_entries(&mut connection, &mut directory, &[user], groups, &policy, &monitor).await;
	assert!(matches!(outcomes[..], [RenameOutcome::Renamed { entry: Some(_) }]));
	assert!(connection.searches().get("people").unwrap().results().is_none());
	assert!(connection.searches().get("groups").unwrap().results().is_some());
	assert!(directory.contains("uid=user000,ou=groups,dc=example,dc=org"));
	assert_eq!(
		drain(&mut events),
		[BrowserEvent::EntryMoved {
			old_dn: dn("uid=user000,ou=people,dc=example,dc=org"),
			new_dn: dn("uid=user000,ou=groups,dc=example,dc=org"),
		}]
	);
}

#[tokio::test]
async fn moving_several_entries_is_one_bulk_modification() {
	let mut directory = directory(3);
	let (mut connection, mut events) = open(&mut directory, options()).await;
	let people = connection.get(&dn(PEOPLE)).unwrap();
	let groups = connection.get(&dn(GROUPS)).unwrap();
	let monitor = Monitor::new();
	initialize_children(&mut connection, &mut directory, people, false, &monitor).await;
	let moved: Vec<EntryId> = ["user000", "user001"]
		.iter()
		.map(|uid| connection.get(&dn(&format!("uid={uid},{PEOPLE}"))).unwrap())
		.collect();
	drain(&mut events);

	let policy = FixedPolicy(false);
	let outcomes =
		move_entries(&mut connection, &mut directory, &moved, groups, &policy, &monitor).await;
	assert_eq!(outcomes.len(), 2);
	assert!(outcomes.iter().all(|outcome| matches!(outcome, RenameOutcome::Renamed { .. })));
	assert_eq!(drain(&mut events), [BrowserEvent::BulkModification]);
	assert!(!connection.cache().children(people).unwrap().initialized);
	assert!(!connection.cache().children(groups).unwrap().initialized);
	assert_eq!(children(&connection, people), [dn("uid=user002,ou=people,dc=example,dc=org")]);
}

#[tokio::test]
async fn saved_search_names_stay_unique() {
	let mut directory = directory(0);
	let (mut connection, _events) = open(&mut directory, options()).await;
	let mut names = BTreeSet::new();
	for _ in 0..3 {
		let mut parameter = SearchParameter::new(dn(PEOPLE), "(uid=*)", Scope::OneLevel);
		parameter.name = "People".to_owned();
		names.insert(connection.searches_mut().add(Search::new(parameter)).to_owned());
	}
	let expected = ["People", "copy of People", "copy 2 of People"].map(str::to_owned);
	assert_eq!(names, BTreeSet::from(expected));
	assert_eq!(connection.searches().len(), 3);
}

#[tokio::test]
async fn export_follows_every_page() {
	let mut directory = directory(25);
	let mut parameter = SearchParameter::new(dn(PEOPLE), "(objectClass=person)", Scope::Subtree);
	parameter.paged = Some(PagedResultsControl::new(10, true));
	let monitor = Monitor::new();

	let mut out = Vec::new();
	let exported = export_ldif(&mut directory, &parameter, &mut out, &monitor).await.unwrap();
	assert_eq!(exported, 25);
	assert_eq!(directory.search_count(), 3, "Exports never stop at a scroll page");

	let ldif = String::from_utf8(out).unwrap();
	assert!(ldif.starts_with("version: 1\n\n"));
	assert_eq!(ldif.matches("\ndn: ").count(), 25);
	assert!(ldif.contains("dn: uid=user024,ou=people,dc=example,dc=org\n"));
}

#[tokio::test]
async fn export_stops_at_the_count_limit() {
	let mut directory = directory(25);
	let mut parameter = SearchParameter::new(dn(PEOPLE), "(objectClass=person)", Scope::Subtree);
	parameter.paged = Some(PagedResultsControl::new(10, false));
	parameter.count_limit = 15;
	let monitor = Monitor::new();

	let mut out = Vec::new();
	let exported = export_ldif(&mut directory, &parameter, &mut out, &monitor).await.unwrap();
	assert_eq!(exported, 15);
	assert_eq!(directory.search_count(), 2, "No page is requested past the limit");
	let ldif = String::from_utf8(out).unwrap();
	assert_eq!(ldif.matches("\ndn: ").count(), 15);
	assert!(!ldif.contains("uid=user015,"));
}

#[ignore = "docker"]
#[tokio::test]
#[serial]
async fn browse_live_directory() -> Result<(), Box<dyn Error>> {
	let tracing_filter = EnvFilter::default().add_directive(LevelFilter::DEBUG.into());
	tracing_subscriber::fmt().with_env_filter(tracing_filter).init();

	let mut ldap = ldap_connect().await?;
	let _ = ldap_delete_organizational_unit(&mut ldap, "browser").await;
	ldap_add_organizational_unit(&mut ldap, "browser").await?;
	ldap_add_user(&mut ldap, "browser", "user01", "User1").await?;
	ldap_add_user(&mut ldap, "browser", "user02", "User2").await?;

	let config = Config {
		url: Url::parse("ldap://localhost:1389")?,
		connection: ConnectionConfig::default(),
		bind_dn: "cn=admin,dc=example,dc=org".to_owned(),
		bind_password: "adminpassword".to_owned(),
		browser: BrowserOptions::default(),
	};
	let mut directory = LdapDirectory::connect(&config).await?;
	let (notifier, _events) = Notifier::channel("docker".into());
	let mut connection = BrowserConnection::new("docker".into(), config.browser.clone(), notifier);
	let monitor = Monitor::new();

	reload(false, &mut connection, &mut directory, &monitor).await;
	assert!(!connection.schema().is_default());
	let root = connection.root();
	initialize_children(&mut connection, &mut directory, root, false, &monitor).await;
	let base = connection.get(&dn(SUFFIX)).expect("naming context");
	initialize_children(&mut connection, &mut directory, base, false, &monitor).await;
	let unit = connection.get(&dn("ou=browser,dc=example,dc=org")).expect("organizational unit");
	initialize_children(&mut connection, &mut directory, unit, false, &monitor).await;
	assert_eq!(children(&connection, unit).len(), 2);

	let user = connection.get(&dn("cn=user02,ou=browser,dc=example,dc=org")).expect("user");
	let outcome = rename_entry(
		&mut connection,
		&mut directory,
		user,
		Rdn::new("cn", "user03"),
		&FixedPolicy(false),
		&monitor,
	)
	.await;
	assert!(matches!(outcome, RenameOutcome::Renamed { entry: Some(_) }));
	assert_eq!(monitor.first_error(), None);

	ldap_delete_user(&mut ldap, "browser", "user01").await?;
	ldap_delete_user(&mut ldap, "browser", "user03").await?;
	ldap_delete_organizational_unit(&mut ldap, "browser").await?;
	directory.unbind().await?;
	ldap.unbind().await?;

	Ok(())
}
