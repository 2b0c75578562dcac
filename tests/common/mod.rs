use std::{
	collections::{BTreeMap, HashMap},
	error::Error,
};

use async_trait::async_trait;
use ldap3::{LdapConnAsync, SearchEntry};
use ldap_browser_core::{
	directory::{Directory, SearchResponse},
	error::{self, result_code},
	search::{oid, Control, PagedResultsResponse, Scope, SearchParameter},
	Dn, Rdn,
};

pub const SUFFIX: &str = "dc=example,dc=org";
pub const SUBSCHEMA: &str = "cn=Subschema";

/// A protocol operation the mock directory received.
#[derive(Clone, Debug)]
pub enum Operation {
	Search(SearchParameter),
	Add(String),
	Delete(String),
	Rename { dn: String, new_dn: String },
}

/// An in-memory directory tree below [`SUFFIX`].
#[derive(Debug)]
pub struct MockDirectory {
	root_dse: SearchEntry,
	entries: BTreeMap<String, SearchEntry>,
	pub log: Vec<Operation>,
	pub refuse_non_leaf_rename: bool,
}

pub fn record(dn: &str, attrs: &[(&str, &[&str])]) -> SearchEntry {
	SearchEntry {
		dn: dn.to_owned(),
		attrs: attrs
			.iter()
			.map(|(name, values)| {
				((*name).to_owned(), values.iter().map(|&v| v.to_owned()).collect())
			})
			.collect(),
		bin_attrs: HashMap::new(),
	}
}

/// Attribute types of the test schema
const ATTRIBUTE_TYPES: [&str; 9] = [
	"( 2.5.4.41 NAME 'name' EQUALITY caseIgnoreMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
	"( 2.5.4.3 NAME ( 'cn' 'commonName' ) SUP name )",
	"( 2.5.4.11 NAME ( 'ou' 'organizationalUnitName' ) SUP name )",
	"( 2.5.4.4 NAME ( 'sn' 'surname' ) SUP name )",
	"( 0.9.2342.19200300.100.1.25 NAME ( 'dc' 'domainComponent' ) \
	 EQUALITY caseIgnoreIA5Match )",
	"( 0.9.2342.19200300.100.1.1 NAME ( 'uid' 'userid' ) EQUALITY caseIgnoreMatch )",
	"( 2.5.4.0 NAME 'objectClass' EQUALITY objectIdentifierMatch )",
	"( 2.16.840.1.113730.3.1.34 NAME 'ref' EQUALITY caseExactMatch \
	 USAGE distributedOperation )",
	"( 2.5.18.9 NAME 'hasSubordinates' EQUALITY booleanMatch SINGLE-VALUE \
	 NO-USER-MODIFICATION USAGE directoryOperation )",
];

pub fn schema_record(modify_timestamp: &str) -> SearchEntry {
	let mut schema = record(
		SUBSCHEMA,
		&[
			("objectClass", &["top", "subschema"]),
			("attributeTypes", &ATTRIBUTE_TYPES),
			("objectClasses", &["( 2.5.6.0 NAME 'top' ABSTRACT MUST objectClass )"]),
			("createTimestamp", &["20240101000000Z"]),
		],
	);
	schema.attrs.insert("modifyTimestamp".to_owned(), vec![modify_timestamp.to_owned()]);
	schema
}

/// Lowercased string form of a DN, the key entries are stored under.
fn key(dn: &str) -> String {
	Dn::parse(dn).map(|dn| dn.to_string()).unwrap_or_else(|_| dn.to_owned()).to_lowercase()
}

/// Whether the entry at `dn` lies at or below `base`, both given as keys.
fn is_below(dn: &str, base: &str) -> bool {
	base.is_empty() || dn == base || dn.ends_with(&format!(",{base}"))
}

/// The parent key of a key.
fn parent_key(dn: &str) -> String {
	Dn::parse(dn).ok().and_then(|dn| dn.parent()).map(|dn| dn.to_string()).unwrap_or_default()
}

fn values<'a>(record: &'a SearchEntry, attribute: &str) -> &'a [String] {
	record
		.attrs
		.iter()
		.find(|(name, _)| name.eq_ignore_ascii_case(attribute))
		.map(|(_, values)| values.as_slice())
		.unwrap_or_default()
}

fn has_object_class(record: &SearchEntry, class: &str) -> bool {
	values(record, "objectClass").iter().any(|value| value.eq_ignore_ascii_case(class))
}

/// Split the operands of `&`, `|` filters.
fn operands(filters: &str) -> Vec<&str> {
	let mut operands = Vec::new();
	let mut depth = 0;
	let mut start = 0;
	for (i, c) in filters.char_indices() {
		match c {
			'(' => {
				if depth == 0 {
					start = i;
				}
				depth += 1;
			}
			')' => {
				depth -= 1;
				if depth == 0 {
					operands.push(&filters[start..=i]);
				}
			}
			_ => {}
		}
	}
	operands
}

/// Evaluate the subset of LDAP filters the browser sends.
fn matches(filter: &str, record: &SearchEntry) -> bool {
	let Some(inner) = filter.trim().strip_prefix('(').and_then(|f| f.strip_suffix(')')) else {
		return false;
	};
	if let Some(rest) = inner.strip_prefix('|') {
		return operands(rest).iter().any(|f| matches(f, record));
	}
	if let Some(rest) = inner.strip_prefix('&') {
		return operands(rest).iter().all(|f| matches(f, record));
	}
	if let Some(rest) = inner.strip_prefix('!') {
		return !matches(rest, record);
	}
	let Some((attribute, value)) = inner.split_once('=') else {
		return false;
	};
	let values = values(record, attribute);
	if value == "*" {
		!values.is_empty()
	} else {
		values.iter().any(|v| v.eq_ignore_ascii_case(value))
	}
}

impl MockDirectory {
	/// A directory with the suffix entry, the subschema subentry and a Root
	/// DSE announcing both.
	pub fn new() -> Self {
		let root_dse = record(
			"",
			&[
				("objectClass", &["top"]),
				("namingContexts", &[SUFFIX]),
				("subschemaSubentry", &[SUBSCHEMA]),
				("supportedControl", &[oid::MANAGE_DSA_IT, oid::SUBENTRIES, oid::PAGED_RESULTS]),
				("supportedLDAPVersion", &["3"]),
			],
		);
		let mut directory = Self {
			root_dse,
			entries: BTreeMap::new(),
			log: Vec::new(),
			refuse_non_leaf_rename: false,
		};
		directory.insert(SUFFIX, &[("objectClass", &["top", "domain"]), ("dc", &["example"])]);
		directory.entries.insert(key(SUBSCHEMA), schema_record("20240101000000Z"));
		directory
	}

	/// Store an entry without any checks.
	pub fn insert(&mut self, dn: &str, attrs: &[(&str, &[&str])]) {
		let dn = Dn::parse(dn).unwrap().to_string();
		self.entries.insert(key(&dn), record(&dn, attrs));
	}

	/// Store `count` people `uid=user<n>` below `parent`.
	pub fn insert_people(&mut self, parent: &str, count: usize) {
		for i in 0..count {
			let uid = format!("user{i:03}");
			self.insert(
				&format!("uid={uid},{parent}"),
				&[("objectClass", &["top", "person"]), ("uid", &[uid.as_str()]), ("sn", &["Doe"])],
			);
		}
	}

	pub fn remove_root_dse_attribute(&mut self, attribute: &str) {
		self.root_dse.attrs.retain(|name, _| !name.eq_ignore_ascii_case(attribute));
	}

	pub fn set_schema_timestamp(&mut self, modify_timestamp: &str) {
		self.entries.insert(key(SUBSCHEMA), schema_record(modify_timestamp));
	}

	pub fn contains(&self, dn: &str) -> bool {
		self.entries.contains_key(&key(dn))
	}

	pub fn get(&self, dn: &str) -> Option<&SearchEntry> {
		self.entries.get(&key(dn))
	}

	pub fn searches(&self) -> Vec<&SearchParameter> {
		self.log
			.iter()
			.filter_map(|operation| match operation {
				Operation::Search(parameter) => Some(parameter),
				_ => None,
			})
			.collect()
	}

	pub fn search_count(&self) -> usize {
		self.searches().len()
	}

	pub fn add_count(&self) -> usize {
		self.log.iter().filter(|operation| matches!(operation, Operation::Add(_))).count()
	}

	pub fn delete_count(&self) -> usize {
		self.log.iter().filter(|operation| matches!(operation, Operation::Delete(_))).count()
	}

	fn has_children(&self, key: &str) -> bool {
		self.entries.keys().any(|k| k != key && parent_key(k) == key)
	}

	/// Copy of a record with only the requested attributes.
	fn project(&self, record: &SearchEntry, attributes: &[String]) -> SearchEntry {
		let wants = |name: &str| attributes.iter().any(|a| a.eq_ignore_ascii_case(name));
		let all_user = attributes.is_empty() || wants("*");
		let mut projected = SearchEntry {
			dn: record.dn.clone(),
			attrs: record
				.attrs
				.iter()
				.filter(|(name, _)| all_user || wants(name.as_str()))
				.map(|(name, values)| (name.clone(), values.clone()))
				.collect(),
			bin_attrs: HashMap::new(),
		};
		if wants("hasSubordinates") || wants("+") {
			let value = if self.has_children(&key(&record.dn)) { "TRUE" } else { "FALSE" };
			projected.attrs.insert("hasSubordinates".to_owned(), vec![value.to_owned()]);
		}
		projected
	}
}

#[async_trait]
impl Directory for MockDirectory {
	async fn search(
		&mut self,
		parameter: &SearchParameter,
	) -> Result<SearchResponse, error::Error> {
		self.log.push(Operation::Search(parameter.clone()));
		let base = parameter.base.to_string().to_lowercase();
		let mut response = SearchResponse::default();

		if base.is_empty() && parameter.scope == Scope::Object {
			response.entries.push(self.project(&self.root_dse, &parameter.attributes));
			return Ok(response);
		}
		if !self.entries.contains_key(&base) {
			response.result_code = result_code::NO_SUCH_OBJECT;
			response.message = format!("{base} does not exist");
			return Ok(response);
		}

		let manage = parameter.has_control(oid::MANAGE_DSA_IT);
		let subentries = parameter.has_control(oid::SUBENTRIES);
		let mut found = Vec::new();
		for (key, record) in &self.entries {
			let in_scope = match parameter.scope {
				Scope::Object => *key == base,
				Scope::OneLevel => parent_key(key) == base,
				Scope::Subtree => is_below(key, &base),
			};
			if !in_scope || has_object_class(record, "subentry") != subentries {
				continue;
			}
			if !matches(&parameter.filter, record) {
				continue;
			}
			if has_object_class(record, "referral") && !manage {
				response.references.extend(values(record, "ref").iter().cloned());
				continue;
			}
			found.push(self.project(record, &parameter.attributes));
		}

		if let Some(paged) = &parameter.paged {
			let offset: usize =
				String::from_utf8_lossy(&paged.cookie).parse().unwrap_or_default();
			let end = (offset + paged.size as usize).min(found.len());
			let cookie = if end < found.len() { end.to_string().into_bytes() } else { Vec::new() };
			response.entries = found.drain(offset.min(end)..end).collect();
			let total = u32::try_from(found.len() + response.entries.len()).unwrap();
			response.controls.push(PagedResultsResponse { size: total, cookie }.to_control());
		} else {
			let limit = parameter.count_limit as usize;
			if limit > 0 && found.len() > limit {
				found.truncate(limit);
				response.result_code = result_code::SIZE_LIMIT_EXCEEDED;
			}
			response.entries = found;
		}
		Ok(response)
	}

	async fn rename(
		&mut self,
		dn: &Dn,
		new_rdn: &Rdn,
		new_superior: Option<&Dn>,
		delete_old_rdn: bool,
		_controls: &[Control],
	) -> Result<(), error::Error> {
		let parent = new_superior.cloned().or_else(|| dn.parent()).unwrap_or_default();
		let new_dn = parent.child(new_rdn.clone());
		self.log.push(Operation::Rename { dn: dn.to_string(), new_dn: new_dn.to_string() });

		let old_key = key(&dn.to_string());
		let new_key = key(&new_dn.to_string());
		if !self.entries.contains_key(&old_key) {
			return Err(error::Error::directory(result_code::NO_SUCH_OBJECT, "no such object"));
		}
		if self.refuse_non_leaf_rename && self.has_children(&old_key) {
			let code = result_code::NOT_ALLOWED_ON_NON_LEAF;
			return Err(error::Error::directory(code, "subtree rename"));
		}
		if self.entries.contains_key(&new_key) {
			return Err(error::Error::directory(result_code::ENTRY_ALREADY_EXISTS, "exists"));
		}

		let old_dn = dn.to_string();
		let moved: Vec<String> =
			self.entries.keys().filter(|k| is_below(k, &old_key)).cloned().collect();
		for key in moved {
			let Some(mut record) = self.entries.remove(&key) else { continue };
			let prefix = record.dn[..record.dn.len() - old_dn.len()].to_owned();
			record.dn = format!("{prefix}{new_dn}");
			if prefix.is_empty() {
				for ava in dn.rdn().map(|rdn| rdn.avas.clone()).unwrap_or_default() {
					if let Some(values) = record.attrs.get_mut(&ava.attribute) {
						if delete_old_rdn {
							values.retain(|value| value != &ava.value);
						}
					}
				}
				for ava in &new_rdn.avas {
					record.attrs.entry(ava.attribute.clone()).or_default().push(ava.value.clone());
				}
			}
			self.entries.insert(record.dn.to_lowercase(), record);
		}
		Ok(())
	}

	async fn add(
		&mut self,
		entry: &SearchEntry,
		_controls: &[Control],
	) -> Result<(), error::Error> {
		self.log.push(Operation::Add(entry.dn.clone()));
		let entry_key = key(&entry.dn);
		let parent = parent_key(&entry_key);
		if self.entries.contains_key(&entry_key) {
			return Err(error::Error::directory(result_code::ENTRY_ALREADY_EXISTS, "exists"));
		}
		if is_below(&parent, &key(SUFFIX)) && !self.entries.contains_key(&parent) {
			return Err(error::Error::directory(result_code::NO_SUCH_OBJECT, "no parent"));
		}
		let dn = Dn::parse(&entry.dn)?.to_string();
		self.entries.insert(entry_key, SearchEntry { dn, ..entry.clone() });
		Ok(())
	}

	async fn delete(&mut self, dn: &Dn, _controls: &[Control]) -> Result<(), error::Error> {
		self.log.push(Operation::Delete(dn.to_string()));
		let key = key(&dn.to_string());
		if !self.entries.contains_key(&key) {
			return Err(error::Error::directory(result_code::NO_SUCH_OBJECT, "no such object"));
		}
		if self.has_children(&key) {
			return Err(error::Error::directory(result_code::NOT_ALLOWED_ON_NON_LEAF, "not a leaf"));
		}
		self.entries.remove(&key);
		Ok(())
	}
}

pub async fn ldap_add_organizational_unit(
	ldap: &mut ldap3::Ldap,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("ou={},dc=example,dc=org", ou),
		vec![("objectClass", ["organizationalUnit"].into())],
	)
	.await?
	.success()?;
	Ok(())
}

pub async fn ldap_delete_organizational_unit(
	ldap: &mut ldap3::Ldap,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.delete(&format!("ou={},dc=example,dc=org", ou)).await?.success()?;
	Ok(())
}

pub async fn ldap_connect() -> Result<ldap3::Ldap, Box<dyn Error>> {
	let (conn, mut ldap) = LdapConnAsync::new("ldap://localhost:1389").await?;
	let _handle = tokio::spawn(async move {
		if let Err(err) = conn.drive().await {
			panic!("Ldap connection error {err}");
		}
	});
	ldap.simple_bind("cn=admin,dc=example,dc=org", "adminpassword").await?;
	Ok(ldap)
}

pub async fn ldap_add_user(
	ldap: &mut ldap3::Ldap,
	ou: &str,
	cn: &str,
	sn: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("cn={},ou={},dc=example,dc=org", cn, ou),
		vec![("objectClass", ["inetOrgPerson"].into()), ("sn", [sn].into())],
	)
	.await?
	.success()?;
	Ok(())
}

pub async fn ldap_delete_user(
	ldap: &mut ldap3::Ldap,
	ou: &str,
	cn: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.delete(&format!("cn={},ou={},dc=example,dc=org", cn, ou)).await?.success()?;
	Ok(())
}
