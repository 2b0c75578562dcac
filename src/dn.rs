//! Distinguished names (RFC 4514) and their schema-aware normalization.
use std::fmt;

use crate::{error::Error, schema::Schema};

/// One `type=value` assertion of a relative distinguished name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ava {
	/// The attribute type as written, e.g. `cn` or `2.5.4.3`
	pub attribute: String,
	/// The unescaped attribute value
	pub value: String,
}

impl Ava {
	/// Create a new assertion.
	pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
		Self { attribute: attribute.into(), value: value.into() }
	}
}

/// A relative distinguished name, possibly multi-valued (`cn=a+sn=b`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Rdn {
	/// The assertions in the order they were written
	pub avas: Vec<Ava>,
}

impl Rdn {
	/// A single-valued RDN.
	pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
		Self { avas: vec![Ava::new(attribute, value)] }
	}

	/// Parse a single RDN such as `cn=foo+uid=bar`.
	pub fn parse(rdn: &str) -> Result<Self, Error> {
		let dn = Dn::parse(rdn)?;
		match <[Rdn; 1]>::try_from(dn.rdns) {
			Ok([rdn]) => Ok(rdn),
			Err(_) => {
				Err(Error::InvalidDn { dn: rdn.to_owned(), reason: "expected exactly one RDN" })
			}
		}
	}

	/// Normalized form used as part of cache keys.
	fn normalize(&self, schema: &Schema) -> String {
		let mut avas: Vec<String> = self
			.avas
			.iter()
			.map(|ava| {
				format!(
					"{}={}",
					schema.normalize_attribute_name(&ava.attribute),
					escape_value(&schema.normalize_value(&ava.attribute, &ava.value))
				)
			})
			.collect();
		avas.sort();
		avas.join("+")
	}
}

impl fmt::Display for Rdn {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, ava) in self.avas.iter().enumerate() {
			if i > 0 {
				f.write_str("+")?;
			}
			write!(f, "{}={}", ava.attribute, escape_value(&ava.value))?;
		}
		Ok(())
	}
}

/// A distinguished name. The first RDN is the most specific one, the empty
/// DN names the Root DSE.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Dn {
	/// The RDNs, most specific first
	rdns: Vec<Rdn>,
}

impl Dn {
	/// The empty DN of the Root DSE.
	#[must_use]
	pub fn root() -> Self {
		Self::default()
	}

	/// Parse a string representation of a DN.
	pub fn parse(dn: &str) -> Result<Self, Error> {
		let invalid = |reason| Error::InvalidDn { dn: dn.to_owned(), reason };
		if dn.trim().is_empty() {
			return Ok(Self::root());
		}

		let tokens = tokenize(dn).map_err(invalid)?;
		let mut rdns = Vec::new();
		for rdn_tokens in split_unescaped(&tokens, &[',', ';']) {
			let mut avas = Vec::new();
			for ava_tokens in split_unescaped(&rdn_tokens, &['+']) {
				let (key, value) =
					split_at_first_equals(&ava_tokens).ok_or_else(|| invalid("missing '='"))?;
				let attribute = String::from_utf8(tokens_to_bytes(&key))
					.map_err(|_| invalid("attribute type is not UTF-8"))?
					.trim()
					.to_owned();
				if attribute.is_empty() {
					return Err(invalid("empty attribute type"));
				}
				let value = String::from_utf8(trim_value(&value))
					.map_err(|_| invalid("attribute value is not UTF-8"))?;
				avas.push(Ava { attribute, value });
			}
			rdns.push(Rdn { avas });
		}
		Ok(Self { rdns })
	}

	/// Build a DN from its RDNs, most specific first.
	#[must_use]
	pub fn from_rdns(rdns: Vec<Rdn>) -> Self {
		Self { rdns }
	}

	/// Whether this is the empty DN.
	#[must_use]
	pub fn is_root(&self) -> bool {
		self.rdns.is_empty()
	}

	/// The RDNs, most specific first.
	#[must_use]
	pub fn rdns(&self) -> &[Rdn] {
		&self.rdns
	}

	/// The most specific RDN.
	#[must_use]
	pub fn rdn(&self) -> Option<&Rdn> {
		self.rdns.first()
	}

	/// Number of RDNs.
	#[must_use]
	pub fn depth(&self) -> usize {
		self.rdns.len()
	}

	/// The DN of the parent entry, `None` for the Root DSE.
	#[must_use]
	pub fn parent(&self) -> Option<Dn> {
		if self.is_root() {
			None
		} else {
			Some(Self { rdns: self.rdns[1..].to_vec() })
		}
	}

	/// The DN of a child entry below this one.
	#[must_use]
	pub fn child(&self, rdn: Rdn) -> Dn {
		let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
		rdns.push(rdn);
		rdns.extend_from_slice(&self.rdns);
		Self { rdns }
	}

	/// Whether `self` lies at or below `base`.
	#[must_use]
	pub fn is_descendant_of(&self, base: &Dn, schema: &Schema) -> bool {
		if base.rdns.len() > self.rdns.len() {
			return false;
		}
		let offset = self.rdns.len() - base.rdns.len();
		self.rdns[offset..]
			.iter()
			.zip(&base.rdns)
			.all(|(a, b)| a.normalize(schema) == b.normalize(schema))
	}

	/// Replace the `old_base` suffix of this DN with `new_base`. Returns
	/// `None` if this DN does not lie below `old_base`.
	#[must_use]
	pub fn rebase(&self, old_base: &Dn, new_base: &Dn, schema: &Schema) -> Option<Dn> {
		if !self.is_descendant_of(old_base, schema) {
			return None;
		}
		let keep = self.rdns.len() - old_base.rdns.len();
		let mut rdns = self.rdns[..keep].to_vec();
		rdns.extend_from_slice(&new_base.rdns);
		Some(Self { rdns })
	}

	/// The key this DN is cached under. DNs that are equal according to the
	/// matching rules of `schema` share the same key.
	#[must_use]
	pub fn normalize(&self, schema: &Schema) -> String {
		self.rdns.iter().map(|rdn| rdn.normalize(schema)).collect::<Vec<_>>().join(",")
	}
}

impl fmt::Display for Dn {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, rdn) in self.rdns.iter().enumerate() {
			if i > 0 {
				f.write_str(",")?;
			}
			write!(f, "{rdn}")?;
		}
		Ok(())
	}
}

impl std::str::FromStr for Dn {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

/// Escape an attribute value for its string representation.
fn escape_value(value: &str) -> String {
	let mut escaped = String::with_capacity(value.len());
	let last = value.chars().count().saturating_sub(1);
	for (i, c) in value.chars().enumerate() {
		match c {
			',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
				escaped.push('\\');
				escaped.push(c);
			}
			'#' if i == 0 => escaped.push_str("\\#"),
			' ' if i == 0 || i == last => escaped.push_str("\\ "),
			'\0' => escaped.push_str("\\00"),
			_ => escaped.push(c),
		}
	}
	escaped
}

/// A piece of a DN string, either verbatim text or one escaped byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Token<'a> {
	/// Text without escapes
	UnescapedSlice(&'a str),
	/// A byte given as `\XX` or `\c`
	EscapedByte(u8),
}

/// Tokenizes the given DN string.
///
/// Used to abstract away escapes.
fn tokenize(dn: &str) -> Result<Vec<Token<'_>>, &'static str> {
	let mut tokens = Vec::new();
	let mut rest = dn;
	while let Some(backslash) = rest.find('\\') {
		if backslash > 0 {
			tokens.push(Token::UnescapedSlice(&rest[..backslash]));
		}
		let after = &rest[backslash + 1..];
		let mut chars = after.chars();
		match chars.next() {
			None => return Err("backslash at the end"),
			Some(c) if c.is_ascii_hexdigit() => {
				let hex = after.get(..2).ok_or("truncated hex escape")?;
				let byte = u8::from_str_radix(hex, 16).map_err(|_| "invalid hex escape")?;
				tokens.push(Token::EscapedByte(byte));
				rest = &after[2..];
			}
			Some(c) if c.is_ascii() => {
				tokens.push(Token::EscapedByte(c as u8));
				rest = &after[1..];
			}
			Some(_) => return Err("invalid escape"),
		}
	}
	if !rest.is_empty() {
		tokens.push(Token::UnescapedSlice(rest));
	}
	Ok(tokens)
}

/// Split tokens at every unescaped occurrence of one of `separators`.
fn split_unescaped<'a>(tokens: &[Token<'a>], separators: &[char]) -> Vec<Vec<Token<'a>>> {
	let mut pieces = Vec::new();
	let mut current = Vec::new();
	for token in tokens {
		match *token {
			Token::EscapedByte(_) => current.push(*token),
			Token::UnescapedSlice(mut s) => {
				while let Some(index) = s.find(separators) {
					if index > 0 {
						current.push(Token::UnescapedSlice(&s[..index]));
					}
					pieces.push(std::mem::take(&mut current));
					s = &s[index + 1..];
				}
				if !s.is_empty() {
					current.push(Token::UnescapedSlice(s));
				}
			}
		}
	}
	pieces.push(current);
	pieces
}

/// Split tokens at the first unescaped `=`.
fn split_at_first_equals<'a>(tokens: &[Token<'a>]) -> Option<(Vec<Token<'a>>, Vec<Token<'a>>)> {
	for (i, token) in tokens.iter().enumerate() {
		if let Token::UnescapedSlice(s) = *token {
			if let Some(index) = s.find('=') {
				let mut front = tokens[..i].to_vec();
				if index > 0 {
					front.push(Token::UnescapedSlice(&s[..index]));
				}
				let mut rear = Vec::new();
				if index + 1 < s.len() {
					rear.push(Token::UnescapedSlice(&s[index + 1..]));
				}
				rear.extend_from_slice(&tokens[i + 1..]);
				return Some((front, rear));
			}
		}
	}
	None
}

/// Concatenate tokens into the raw bytes they stand for.
fn tokens_to_bytes(tokens: &[Token<'_>]) -> Vec<u8> {
	let mut bytes = Vec::new();
	for token in tokens {
		match token {
			Token::EscapedByte(b) => bytes.push(*b),
			Token::UnescapedSlice(s) => bytes.extend_from_slice(s.as_bytes()),
		}
	}
	bytes
}

/// Unescaped leading and trailing spaces are not part of a value.
fn trim_value(tokens: &[Token<'_>]) -> Vec<u8> {
	let mut tokens = tokens.to_vec();
	if let Some(Token::UnescapedSlice(s)) = tokens.first_mut() {
		*s = s.trim_start();
	}
	if let Some(Token::UnescapedSlice(s)) = tokens.last_mut() {
		*s = s.trim_end();
	}
	tokens_to_bytes(&tokens)
}
