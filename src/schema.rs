//! Schema store: the attribute types, object classes and rules a server
//! publishes in its subschema subentry.
use std::{
	collections::HashMap,
	sync::{Arc, OnceLock},
};

use ldap3::SearchEntry;

use crate::{entry::SearchEntryExt, error::Error};

/// Filter selecting the subschema subentry.
pub const SCHEMA_FILTER: &str = "(objectClass=subschema)";
/// Attribute holding object class descriptions.
pub const OBJECT_CLASSES: &str = "objectClasses";
/// Attribute holding attribute type descriptions.
pub const ATTRIBUTE_TYPES: &str = "attributeTypes";
/// Attribute holding syntax descriptions.
pub const LDAP_SYNTAXES: &str = "ldapSyntaxes";
/// Attribute holding matching rule descriptions.
pub const MATCHING_RULES: &str = "matchingRules";
/// Attribute holding matching rule use descriptions.
pub const MATCHING_RULE_USE: &str = "matchingRuleUse";
/// Operational attribute holding the creation time of an entry.
pub const CREATE_TIMESTAMP: &str = "createTimestamp";
/// Operational attribute holding the last modification time of an entry.
pub const MODIFY_TIMESTAMP: &str = "modifyTimestamp";

/// How an attribute type is used (RFC 4512 section 4.1.2).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AttributeUsage {
	/// A user attribute
	#[default]
	UserApplications,
	/// An operational attribute
	DirectoryOperation,
	/// An operational attribute shared between servers
	DistributedOperation,
	/// An operational attribute local to a server
	DsaOperation,
}

/// Kind of an object class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ObjectClassKind {
	/// Only used to derive other classes
	Abstract,
	/// Defines the basic type of an entry
	#[default]
	Structural,
	/// Adds attributes to an entry
	Auxiliary,
}

/// An attribute type description.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeTypeDescription {
	/// Numeric OID
	pub oid: String,
	/// Short names
	pub names: Vec<String>,
	/// Free-form description
	pub description: Option<String>,
	/// Super type
	pub superior: Option<String>,
	/// Equality matching rule
	pub equality: Option<String>,
	/// Ordering matching rule
	pub ordering: Option<String>,
	/// Substring matching rule
	pub substring: Option<String>,
	/// Syntax OID, without length bound
	pub syntax: Option<String>,
	/// Whether only one value is allowed
	pub single_value: bool,
	/// Whether the attribute is collective
	pub collective: bool,
	/// Whether users may not modify it
	pub no_user_modification: bool,
	/// How the attribute is used
	pub usage: AttributeUsage,
}

/// An object class description.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectClassDescription {
	/// Numeric OID
	pub oid: String,
	/// Short names
	pub names: Vec<String>,
	/// Free-form description
	pub description: Option<String>,
	/// Superior classes
	pub superiors: Vec<String>,
	/// Kind of the class
	pub kind: ObjectClassKind,
	/// Required attributes
	pub must: Vec<String>,
	/// Allowed attributes
	pub may: Vec<String>,
}

/// A syntax description.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LdapSyntaxDescription {
	/// Numeric OID
	pub oid: String,
	/// Free-form description
	pub description: Option<String>,
}

/// A matching rule description.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchingRuleDescription {
	/// Numeric OID
	pub oid: String,
	/// Short names
	pub names: Vec<String>,
	/// Free-form description
	pub description: Option<String>,
	/// Syntax of the assertion value
	pub syntax: Option<String>,
}

/// A matching rule use description.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchingRuleUseDescription {
	/// OID of the matching rule
	pub oid: String,
	/// Short names
	pub names: Vec<String>,
	/// Free-form description
	pub description: Option<String>,
	/// Attribute types the rule applies to
	pub applies: Vec<String>,
}

/// The schema of a connection. Never mutated once built; a reload replaces
/// the whole value.
#[derive(Clone, Debug, Default)]
pub struct Schema {
	/// Object class descriptions
	pub object_classes: Vec<ObjectClassDescription>,
	/// Attribute type descriptions
	pub attribute_types: Vec<AttributeTypeDescription>,
	/// Syntax descriptions
	pub syntaxes: Vec<LdapSyntaxDescription>,
	/// Matching rule descriptions
	pub matching_rules: Vec<MatchingRuleDescription>,
	/// Matching rule use descriptions
	pub matching_rule_uses: Vec<MatchingRuleUseDescription>,
	/// `createTimestamp` of the subschema subentry
	pub create_timestamp: Option<String>,
	/// `modifyTimestamp` of the subschema subentry
	pub modify_timestamp: Option<String>,
	/// The record the schema was parsed from
	source: Option<SearchEntry>,
	/// Lowercased names and OIDs to attribute type positions
	attribute_index: HashMap<String, usize>,
	/// Whether this is the sentinel used while no schema is known
	default: bool,
}

impl Schema {
	/// The sentinel schema in use while no schema has been loaded.
	#[must_use]
	pub fn default_schema() -> Arc<Schema> {
		static DEFAULT: OnceLock<Arc<Schema>> = OnceLock::new();
		DEFAULT.get_or_init(|| Arc::new(Schema { default: true, ..Schema::default() })).clone()
	}

	/// Whether this is the sentinel schema.
	#[must_use]
	pub fn is_default(&self) -> bool {
		self.default
	}

	/// The timestamp used to decide whether the schema is stale: the modify
	/// timestamp, falling back to the create timestamp.
	#[must_use]
	pub fn timestamp(&self) -> Option<&str> {
		self.modify_timestamp.as_deref().or(self.create_timestamp.as_deref())
	}

	/// The record this schema was parsed from, used to persist it.
	#[must_use]
	pub fn source(&self) -> Option<&SearchEntry> {
		self.source.as_ref()
	}

	/// Look up an attribute type by name or OID, ignoring case and options.
	#[must_use]
	pub fn attribute_type(&self, name: &str) -> Option<&AttributeTypeDescription> {
		let name = name.split(';').next().unwrap_or(name).to_ascii_lowercase();
		self.attribute_index.get(&name).and_then(|&i| self.attribute_types.get(i))
	}

	/// Whether the schema knows the given attribute type.
	#[must_use]
	pub fn has_attribute_type(&self, name: &str) -> bool {
		self.attribute_type(name).is_some()
	}

	/// Names of the operational attribute types, for servers which only
	/// return them when asked by name.
	pub fn operational_attribute_names(&self) -> impl Iterator<Item = &str> {
		self.attribute_types
			.iter()
			.filter(|attribute_type| attribute_type.usage != AttributeUsage::UserApplications)
			.map(|attribute_type| {
				attribute_type.names.first().map_or(attribute_type.oid.as_str(), String::as_str)
			})
	}

	/// The equality rule of an attribute type, inherited from its super types
	/// if necessary.
	#[must_use]
	pub fn equality_rule(&self, name: &str) -> Option<&str> {
		let mut current = self.attribute_type(name)?;
		// bounded walk, schemas with cyclic SUP chains exist in the wild
		for _ in 0..16 {
			if let Some(equality) = &current.equality {
				return Some(equality);
			}
			current = self.attribute_type(current.superior.as_deref()?)?;
		}
		None
	}

	/// Normalize an attribute type name for use in cache keys.
	#[must_use]
	pub fn normalize_attribute_name(&self, name: &str) -> String {
		match self.attribute_type(name) {
			Some(attribute_type) if !attribute_type.oid.is_empty() => {
				attribute_type.oid.to_ascii_lowercase()
			}
			_ => name.trim().to_ascii_lowercase(),
		}
	}

	/// Normalize an attribute value according to the equality rule of its
	/// attribute type. Values of unknown types are only trimmed.
	#[must_use]
	pub fn normalize_value(&self, attribute: &str, value: &str) -> String {
		let rule = self.equality_rule(attribute).map(str::to_ascii_lowercase);
		match rule.as_deref() {
			Some(rule)
				if rule.starts_with("caseignore")
					|| rule == "2.5.13.2" || rule == "1.3.6.1.4.1.1466.109.114.2" =>
			{
				collapse_whitespace(value).to_lowercase()
			}
			Some(rule) if rule.starts_with("caseexact") || rule == "2.5.13.5" => {
				collapse_whitespace(value)
			}
			Some("numericstringmatch" | "telephonenumbermatch" | "2.5.13.8" | "2.5.13.20") => {
				value.chars().filter(|c| !c.is_whitespace() && *c != '-').collect()
			}
			_ => value.trim().to_owned(),
		}
	}

	/// Rebuild the name index after the description lists changed.
	fn reindex(&mut self) {
		self.attribute_index.clear();
		for (i, attribute_type) in self.attribute_types.iter().enumerate() {
			self.attribute_index.insert(attribute_type.oid.to_ascii_lowercase(), i);
			for name in &attribute_type.names {
				self.attribute_index.insert(name.to_ascii_lowercase(), i);
			}
		}
	}
}

/// Collapse inner runs of whitespace to a single space and trim the ends.
fn collapse_whitespace(value: &str) -> String {
	value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Turns the subschema subentry record into a [`Schema`].
pub trait SchemaParser: Send + Sync {
	/// Parse the record returned for the subschema subentry.
	fn parse(&self, record: &SearchEntry) -> Result<Schema, Error>;
}

/// A [`SchemaParser`] for the RFC 4512 description syntax.
#[derive(Clone, Copy, Debug, Default)]
pub struct DescriptionParser;

impl SchemaParser for DescriptionParser {
	fn parse(&self, record: &SearchEntry) -> Result<Schema, Error> {
		let mut schema = Schema::default();

		for text in record.attr_values(ATTRIBUTE_TYPES) {
			let raw = RawDescription::parse(text)?;
			schema.attribute_types.push(AttributeTypeDescription {
				names: raw.list("NAME"),
				description: raw.single("DESC"),
				superior: raw.single("SUP"),
				equality: raw.single("EQUALITY"),
				ordering: raw.single("ORDERING"),
				substring: raw.single("SUBSTR"),
				syntax: raw
					.single("SYNTAX")
					.map(|syntax| syntax.split('{').next().unwrap_or_default().to_owned()),
				single_value: raw.flag("SINGLE-VALUE"),
				collective: raw.flag("COLLECTIVE"),
				no_user_modification: raw.flag("NO-USER-MODIFICATION"),
				usage: match raw.single("USAGE").as_deref() {
					Some("directoryOperation") => AttributeUsage::DirectoryOperation,
					Some("distributedOperation") => AttributeUsage::DistributedOperation,
					Some("dSAOperation") => AttributeUsage::DsaOperation,
					_ => AttributeUsage::UserApplications,
				},
				oid: raw.oid,
			});
		}

		for text in record.attr_values(OBJECT_CLASSES) {
			let raw = RawDescription::parse(text)?;
			schema.object_classes.push(ObjectClassDescription {
				names: raw.list("NAME"),
				description: raw.single("DESC"),
				superiors: raw.list("SUP"),
				kind: if raw.flag("ABSTRACT") {
					ObjectClassKind::Abstract
				} else if raw.flag("AUXILIARY") {
					ObjectClassKind::Auxiliary
				} else {
					ObjectClassKind::Structural
				},
				must: raw.list("MUST"),
				may: raw.list("MAY"),
				oid: raw.oid,
			});
		}

		for text in record.attr_values(LDAP_SYNTAXES) {
			let raw = RawDescription::parse(text)?;
			schema
				.syntaxes
				.push(LdapSyntaxDescription { description: raw.single("DESC"), oid: raw.oid });
		}

		for text in record.attr_values(MATCHING_RULES) {
			let raw = RawDescription::parse(text)?;
			schema.matching_rules.push(MatchingRuleDescription {
				names: raw.list("NAME"),
				description: raw.single("DESC"),
				syntax: raw.single("SYNTAX"),
				oid: raw.oid,
			});
		}

		for text in record.attr_values(MATCHING_RULE_USE) {
			let raw = RawDescription::parse(text)?;
			schema.matching_rule_uses.push(MatchingRuleUseDescription {
				names: raw.list("NAME"),
				description: raw.single("DESC"),
				applies: raw.list("APPLIES"),
				oid: raw.oid,
			});
		}

		schema.create_timestamp = record.attr_first(CREATE_TIMESTAMP).map(str::to_owned);
		schema.modify_timestamp = record.attr_first(MODIFY_TIMESTAMP).map(str::to_owned);
		schema.source = Some(record.clone());
		schema.reindex();
		Ok(schema)
	}
}

/// Keywords that are not followed by a value.
const FLAG_KEYWORDS: &[&str] = &[
	"OBSOLETE",
	"SINGLE-VALUE",
	"COLLECTIVE",
	"NO-USER-MODIFICATION",
	"ABSTRACT",
	"STRUCTURAL",
	"AUXILIARY",
];

/// A description split into its OID and keyword/value pairs.
#[derive(Debug)]
struct RawDescription {
	/// The leading numeric OID (or descriptor, some servers use names)
	oid: String,
	/// Keyword and values, in order of appearance
	fields: Vec<(String, Vec<String>)>,
}

/// A lexical element of a description.
#[derive(Debug, PartialEq)]
enum Token {
	/// `(`
	Open,
	/// `)`
	Close,
	/// `$`
	Dollar,
	/// `'...'`
	Quoted(String),
	/// Anything else
	Word(String),
}

impl RawDescription {
	/// Parse a description such as `( 2.5.4.3 NAME 'cn' SUP name )`.
	fn parse(text: &str) -> Result<Self, Error> {
		let malformed = || Error::Schema(text.to_owned());
		let mut tokens = lex(text).ok_or_else(malformed)?.into_iter();
		if tokens.next() != Some(Token::Open) {
			return Err(malformed());
		}
		let oid = match tokens.next() {
			Some(Token::Word(oid)) => oid,
			_ => return Err(malformed()),
		};

		let mut fields = Vec::new();
		loop {
			let keyword = match tokens.next() {
				Some(Token::Close) => break,
				Some(Token::Word(keyword)) => keyword,
				_ => return Err(malformed()),
			};
			if FLAG_KEYWORDS.contains(&keyword.as_str()) {
				fields.push((keyword, Vec::new()));
				continue;
			}
			let values = match tokens.next() {
				Some(Token::Quoted(value) | Token::Word(value)) => vec![value],
				Some(Token::Open) => {
					let mut values = Vec::new();
					loop {
						match tokens.next() {
							Some(Token::Close) => break,
							Some(Token::Dollar) => {}
							Some(Token::Quoted(value) | Token::Word(value)) => values.push(value),
							_ => return Err(malformed()),
						}
					}
					values
				}
				_ => return Err(malformed()),
			};
			fields.push((keyword, values));
		}
		Ok(Self { oid, fields })
	}

	/// Values of a keyword.
	fn list(&self, keyword: &str) -> Vec<String> {
		self.fields
			.iter()
			.find(|(k, _)| k == keyword)
			.map(|(_, values)| values.clone())
			.unwrap_or_default()
	}

	/// First value of a keyword.
	fn single(&self, keyword: &str) -> Option<String> {
		self.list(keyword).into_iter().next()
	}

	/// Whether a keyword is present.
	fn flag(&self, keyword: &str) -> bool {
		self.fields.iter().any(|(k, _)| k == keyword)
	}
}

/// Split a description into tokens. `None` on an unterminated quote.
fn lex(text: &str) -> Option<Vec<Token>> {
	let mut tokens = Vec::new();
	let mut chars = text.chars().peekable();
	while let Some(c) = chars.next() {
		match c {
			'(' => tokens.push(Token::Open),
			')' => tokens.push(Token::Close),
			'$' => tokens.push(Token::Dollar),
			'\'' => {
				let mut quoted = String::new();
				loop {
					match chars.next()? {
						'\'' => break,
						c => quoted.push(c),
					}
				}
				tokens.push(Token::Quoted(quoted));
			}
			c if c.is_whitespace() => {}
			c => {
				let mut word = String::from(c);
				while let Some(&next) = chars.peek() {
					if next.is_whitespace() || matches!(next, '(' | ')' | '$' | '\'') {
						break;
					}
					word.push(next);
					chars.next();
				}
				tokens.push(Token::Word(word));
			}
		}
	}
	Some(tokens)
}
