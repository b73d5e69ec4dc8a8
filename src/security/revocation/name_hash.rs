//! Canonical X.509 name encoding
//!
//! Hashed CRL directories name their files after the issuer's subject-name
//! hash (`<hash>.r<N>`, as produced by `c_rehash` / `openssl rehash`). The hash
//! is SHA-1 over a canonical re-encoding of the name in which string values
//! are case-folded, trimmed and whitespace-collapsed, so equivalent names both
//! hash and compare equal.

use ring::digest;
use x509_parser::x509::{AttributeTypeAndValue, X509Name};

const TAG_OID: u8 = 0x06;
const TAG_UTF8_STRING: u8 = 0x0c;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;

// Universal tag numbers of the string types that are canonicalized
const UTF8_STRING: u32 = 12;
const PRINTABLE_STRING: u32 = 19;
const T61_STRING: u32 = 20;
const IA5_STRING: u32 = 22;
const VISIBLE_STRING: u32 = 26;
const UNIVERSAL_STRING: u32 = 28;
const BMP_STRING: u32 = 30;

/// Canonical encoding of a distinguished name.
///
/// Each RDN is emitted as a DER `SET` of its canonical attribute encodings; the
/// RDNs are concatenated without an outer `SEQUENCE` header.
pub fn canonical_name(name: &X509Name<'_>) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.as_raw().len());
    for rdn in name.iter() {
        let mut entries: Vec<Vec<u8>> = rdn.iter().map(canonical_attribute).collect();
        // DER SET OF ordering
        entries.sort();
        push_tlv(&mut out, TAG_SET, &entries.concat());
    }
    out
}

/// OpenSSL-compatible subject name hash used for hashed directory lookups
pub fn subject_name_hash(name: &X509Name<'_>) -> u32 {
    let canonical = canonical_name(name);
    let sha1 = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &canonical);
    let bytes = sha1.as_ref();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// File name of the `index`-th CRL stored under `hash` in a hashed directory
pub fn hashed_crl_file_name(hash: u32, index: u32) -> String {
    format!("{:08x}.r{}", hash, index)
}

/// Whether two names are equal after canonicalization
pub fn names_match(a: &X509Name<'_>, b: &X509Name<'_>) -> bool {
    a.as_raw() == b.as_raw() || canonical_name(a) == canonical_name(b)
}

fn canonical_attribute(attr: &AttributeTypeAndValue<'_>) -> Vec<u8> {
    let mut body = Vec::new();
    push_tlv(&mut body, TAG_OID, attr.attr_type().as_bytes());

    let value = attr.attr_value();
    let tag = value.header.tag().0;
    match decode_string(tag, value.data) {
        Some(text) => push_tlv(&mut body, TAG_UTF8_STRING, canonical_text(&text).as_bytes()),
        None => push_tlv(&mut body, tag as u8, value.data),
    }

    let mut out = Vec::with_capacity(body.len() + 4);
    push_tlv(&mut out, TAG_SEQUENCE, &body);
    out
}

fn decode_string(tag: u32, data: &[u8]) -> Option<String> {
    match tag {
        UTF8_STRING | PRINTABLE_STRING | IA5_STRING | VISIBLE_STRING => {
            Some(String::from_utf8_lossy(data).into_owned())
        }
        // Teletex content is treated as Latin-1
        T61_STRING => Some(data.iter().map(|&b| b as char).collect()),
        BMP_STRING => {
            let units: Vec<u16> = data
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            Some(String::from_utf16_lossy(&units))
        }
        UNIVERSAL_STRING => Some(
            data.chunks_exact(4)
                .map(|quad| {
                    char::from_u32(u32::from_be_bytes([quad[0], quad[1], quad[2], quad[3]]))
                        .unwrap_or(char::REPLACEMENT_CHARACTER)
                })
                .collect(),
        ),
        _ => None,
    }
}

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\u{0b}' | '\u{0c}' | '\r')
}

/// Trim, collapse internal whitespace runs to one space and fold ASCII case
fn canonical_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.trim_matches(is_space).chars() {
        if is_space(c) {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}

fn push_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
}
