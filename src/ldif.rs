//! Reading and writing LDIF content records (RFC 2849)
use std::{collections::HashMap, fmt::Write as _};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ldap3::SearchEntry;
use tracing::warn;

use crate::error::Error;

/// Maximum length of an output line in bytes, folded continuations included
const LINE_WIDTH: usize = 76;

/// Header line of an LDIF file
pub const VERSION_LINE: &str = "version: 1";

/// Whether a value can be written as is, or must be base64 encoded.
fn is_safe(value: &str) -> bool {
	let Some(first) = value.chars().next() else {
		return true;
	};
	!matches!(first, ' ' | ':' | '<')
		&& !value.ends_with(' ')
		&& value.chars().all(|c| c.is_ascii() && !matches!(c, '\0' | '\n' | '\r'))
}

/// Append one logical line, folded to [`LINE_WIDTH`].
fn push_folded(out: &mut String, line: &str) {
	let mut rest = line;
	let mut width = LINE_WIDTH;
	loop {
		if rest.len() <= width {
			out.push_str(rest);
			out.push('\n');
			return;
		}
		let mut cut = width;
		while !rest.is_char_boundary(cut) {
			cut -= 1;
		}
		out.push_str(&rest[..cut]);
		out.push_str("\n ");
		rest = &rest[cut..];
		// The leading space of a continuation counts towards the width
		width = LINE_WIDTH - 1;
	}
}

/// Append an `attribute: value` line, base64 encoding the value if needed.
fn push_value(out: &mut String, attribute: &str, value: &str) {
	let line = if is_safe(value) {
		format!("{attribute}: {value}")
	} else {
		format!("{attribute}:: {}", STANDARD.encode(value))
	};
	push_folded(out, &line);
}

/// Append a record in LDIF, followed by an empty line. Attributes are written
/// in alphabetical order, binary values base64 encoded.
pub fn write_record(out: &mut String, record: &SearchEntry) {
	push_value(out, "dn", &record.dn);

	let mut names: Vec<&String> = record.attrs.keys().chain(record.bin_attrs.keys()).collect();
	names.sort_by_key(|name| name.to_lowercase());
	names.dedup();
	for name in names {
		for value in record.attrs.get(name).into_iter().flatten() {
			push_value(out, name, value);
		}
		for value in record.bin_attrs.get(name).into_iter().flatten() {
			push_folded(out, &format!("{name}:: {}", STANDARD.encode(value)));
		}
	}
	out.push('\n');
}

/// Render records as a complete LDIF document.
#[must_use]
pub fn to_ldif<'a>(records: impl IntoIterator<Item = &'a SearchEntry>) -> String {
	let mut out = String::new();
	let _ = writeln!(out, "{VERSION_LINE}");
	out.push('\n');
	for record in records {
		write_record(&mut out, record);
	}
	out
}

/// Unfold continuation lines and drop comments.
fn logical_lines(ldif: &str) -> Vec<String> {
	let mut lines: Vec<String> = Vec::new();
	let mut in_comment = false;
	for line in ldif.lines() {
		if let Some(continuation) = line.strip_prefix(' ') {
			if !in_comment {
				if let Some(last) = lines.last_mut() {
					last.push_str(continuation);
				}
			}
			continue;
		}
		in_comment = line.starts_with('#');
		if !in_comment {
			lines.push(line.to_owned());
		}
	}
	lines
}

/// Parse LDIF content records. Change records and values referring to URLs
/// are not supported.
pub fn parse_ldif(ldif: &str) -> Result<Vec<SearchEntry>, Error> {
	let mut records = Vec::new();
	let mut current: Option<SearchEntry> = None;

	for line in logical_lines(ldif) {
		if line.trim().is_empty() {
			records.extend(current.take());
			continue;
		}
		let (name, rest) = line
			.split_once(':')
			.ok_or_else(|| Error::Invalid(format!("LDIF line without a colon: {line}")))?;
		let value: Vec<u8> = if let Some(encoded) = rest.strip_prefix(':') {
			STANDARD
				.decode(encoded.trim())
				.map_err(|err| Error::Invalid(format!("Invalid base64 value of {name}: {err}")))?
		} else if rest.starts_with('<') {
			return Err(Error::Invalid(format!("URL values are not supported: {name}")));
		} else {
			rest.trim_start_matches(' ').as_bytes().to_vec()
		};

		match current.as_mut() {
			None if name.eq_ignore_ascii_case("version") => {
				if value != b"1" {
					return Err(Error::Invalid(format!(
						"Unsupported LDIF version {}",
						String::from_utf8_lossy(&value)
					)));
				}
			}
			None if name.eq_ignore_ascii_case("dn") => {
				let dn = String::from_utf8(value)
					.map_err(|_| Error::Invalid("DN is not valid UTF-8".to_owned()))?;
				current =
					Some(SearchEntry { dn, attrs: HashMap::new(), bin_attrs: HashMap::new() });
			}
			None => {
				return Err(Error::Invalid(format!("LDIF record does not start with a DN: {line}")));
			}
			Some(_) if name.eq_ignore_ascii_case("changetype") => {
				return Err(Error::Invalid("LDIF change records are not supported".to_owned()));
			}
			Some(record) => match String::from_utf8(value) {
				Ok(text) => record.attrs.entry(name.to_owned()).or_default().push(text),
				Err(err) => {
					record.bin_attrs.entry(name.to_owned()).or_default().push(err.into_bytes());
				}
			},
		}
	}
	records.extend(current);

	if records.is_empty() && !ldif.trim().is_empty() {
		warn!("LDIF document without records");
	}
	Ok(records)
}
