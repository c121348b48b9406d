use std::collections::HashMap;

use encoding_rs::Encoding;
use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

use crate::error::{RebuildError, RebuildResult};
use crate::model::{Tag, Vr};

lazy_static! {
    static ref TAG_PAIR: Regex =
        Regex::new(r"^\(?\s*(?:0x)?([0-9A-Fa-f]{4})\s*,\s*(?:0x)?([0-9A-Fa-f]{4})\s*\)?$")
            .expect("tag pair pattern");
    static ref TAG_PACKED: Regex =
        Regex::new(r"^(?:0x)?([0-9A-Fa-f]{4})([0-9A-Fa-f]{4})$").expect("packed tag pattern");
    static ref UID_SYNTAX: Regex =
        Regex::new(r"^(0|[1-9][0-9]*)(\.(0|[1-9][0-9]*))*$").expect("uid pattern");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryEntry {
    pub vr: Vr,
    pub keyword: String,
}

/// Exact tags and repeating-group patterns (e.g. `60xx,3000`).
pub struct TagMapping {
    pub full: HashMap<Tag, DictionaryEntry>,
    pub partial: Vec<(Regex, DictionaryEntry)>,
}

/// Parse the tab-separated dictionary: `GGGG,EEEE<TAB>VR<TAB>Keyword`.
///
/// Malformed lines are skipped rather than failing the whole table.
pub fn load_and_convert_tag_mapping(text: &str) -> TagMapping {
    let mut full = HashMap::new();
    let mut partial = Vec::new();

    for line in text.lines() {
        let content_vec = line.split('\t').collect::<Vec<&str>>();

        if content_vec.len() < 3 {
            continue;
        }

        let standard_tag = content_vec[0].trim();
        let Some(vr) = Vr::from_code(content_vec[1]) else {
            continue;
        };
        let entry = DictionaryEntry {
            vr,
            keyword: content_vec[2].trim().to_string(),
        };

        if standard_tag.contains('x') {
            let pattern = format!("^{}$", standard_tag.replace('x', "[0-9A-F]"));
            if let Ok(regex) = Regex::new(&pattern) {
                partial.push((regex, entry));
            }
        } else if let Ok(tag) = parse_tag(standard_tag) {
            full.insert(tag, entry);
        }
    }

    TagMapping { full, partial }
}

/// Look a tag up in the public dictionary. Private tags never match.
pub fn lookup_tag(tag: Tag) -> Option<&'static DictionaryEntry> {
    if tag.is_private() {
        return None;
    }

    let mapping: &'static TagMapping = &crate::TAG_MAPPING;

    if let Some(entry) = mapping.full.get(&tag) {
        return Some(entry);
    }

    let key = tag.to_key();
    mapping
        .partial
        .iter()
        .find(|(regex, _)| regex.is_match(&key))
        .map(|(_, entry)| entry)
}

pub fn get_tag_keyword(tag: Tag) -> &'static str {
    match lookup_tag(tag) {
        Some(entry) => entry.keyword.as_str(),
        None if tag.is_private() => "Private",
        None => "Unknown",
    }
}

/// Parse `GGGG,EEEE`, `(GGGG,EEEE)` or `GGGGEEEE` (hex).
pub fn parse_tag(text: &str) -> RebuildResult<Tag> {
    let text = text.trim();

    let captures = TAG_PAIR
        .captures(text)
        .or_else(|| TAG_PACKED.captures(text))
        .ok_or_else(|| RebuildError::InvalidTag(text.to_string()))?;

    let group = u16::from_str_radix(&captures[1], 16)
        .map_err(|_| RebuildError::InvalidTag(text.to_string()))?;
    let element = u16::from_str_radix(&captures[2], 16)
        .map_err(|_| RebuildError::InvalidTag(text.to_string()))?;

    Ok(Tag::new(group, element))
}

/// A fresh UID under the `2.25` (UUID derived) root.
pub fn generate_uid() -> String {
    format!("2.25.{}", Uuid::new_v4().as_u128())
}

pub fn is_valid_uid(uid: &str) -> bool {
    !uid.is_empty() && uid.len() <= 64 && UID_SYNTAX.is_match(uid)
}

/// Map Specific Character Set to an encoding. Multi-valued sets use the last
/// term, which is where the non-ASCII repertoire is declared.
pub fn text_encoding(charset: Option<&str>) -> &'static Encoding {
    let term = charset
        .and_then(|c| c.split('\\').map(str::trim).filter(|t| !t.is_empty()).last())
        .unwrap_or("");

    match term {
        "GB18030" => encoding_rs::GB18030,
        "GBK" | "ISO 2022 IR 58" => encoding_rs::GBK,
        "ISO_IR 100" | "ISO 2022 IR 100" => encoding_rs::WINDOWS_1252,
        "ISO_IR 13" | "ISO 2022 IR 13" | "ISO 2022 IR 87" => encoding_rs::SHIFT_JIS,
        "ISO_IR 149" | "ISO 2022 IR 149" => encoding_rs::EUC_KR,
        "ISO_IR 144" => encoding_rs::ISO_8859_5,
        "ISO_IR 127" => encoding_rs::ISO_8859_6,
        "ISO_IR 126" => encoding_rs::ISO_8859_7,
        "ISO_IR 138" => encoding_rs::ISO_8859_8,
        "ISO_IR 166" => encoding_rs::WINDOWS_874,
        _ => encoding_rs::UTF_8,
    }
}

pub fn encode_text(text: &str, encoding: &'static Encoding) -> Vec<u8> {
    let (bytes, _, _) = encoding.encode(text);

    bytes.into_owned()
}

pub fn decode_text(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _, _) = encoding.decode(bytes);

    text.into_owned()
}

/// Two ASCII bytes of an explicit VR header.
pub fn process_vec_to_vr(buffer: &[u8]) -> Option<Vr> {
    if buffer.len() != 2 || !buffer.iter().all(u8::is_ascii_uppercase) {
        return None;
    }

    std::str::from_utf8(buffer).ok().and_then(Vr::from_code)
}

pub fn pad_to_even(mut bytes: Vec<u8>, padding: u8) -> Vec<u8> {
    if bytes.len() % 2 == 1 {
        bytes.push(padding);
    }

    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tag_forms() {
        let expected = Tag::new(0x0008, 0x103E);
        assert_eq!(parse_tag("0008,103E").unwrap(), expected);
        assert_eq!(parse_tag("0008,103e").unwrap(), expected);
        assert_eq!(parse_tag("(0008,103E)").unwrap(), expected);
        assert_eq!(parse_tag("0008103E").unwrap(), expected);
        assert!(parse_tag("0008-103E").is_err());
        assert!(parse_tag("8,103E").is_err());
    }

    #[test]
    fn dictionary_has_core_tags() {
        let rows = lookup_tag(Tag::new(0x0028, 0x0010)).unwrap();
        assert_eq!(rows.vr, Vr::US);
        assert_eq!(rows.keyword, "Rows");

        let ts = lookup_tag(Tag::new(0x0002, 0x0010)).unwrap();
        assert_eq!(ts.vr, Vr::UI);
    }

    #[test]
    fn dictionary_matches_repeating_groups() {
        let overlay = lookup_tag(Tag::new(0x6002, 0x3000)).unwrap();
        assert_eq!(overlay.keyword, "OverlayData");
        assert_eq!(lookup_tag(Tag::new(0x6003, 0x0010)), None);
    }

    #[test]
    fn dual_vr_is_loaded() {
        let smallest = lookup_tag(Tag::new(0x0028, 0x0106)).unwrap();
        assert_eq!(smallest.vr, Vr::UsOrSs);
    }

    #[test]
    fn private_tags_are_unknown() {
        assert_eq!(lookup_tag(Tag::new(0x0029, 0x0010)), None);
        assert_eq!(get_tag_keyword(Tag::new(0x0029, 0x1010)), "Private");
    }

    #[test]
    fn generated_uids_are_valid_and_distinct() {
        let a = generate_uid();
        let b = generate_uid();
        assert!(is_valid_uid(&a), "{a}");
        assert!(a.starts_with("2.25."));
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_malformed_uids() {
        assert!(!is_valid_uid(""));
        assert!(!is_valid_uid("1.02.3"));
        assert!(!is_valid_uid("1..2"));
        assert!(!is_valid_uid("1.2.a"));
    }

    #[test]
    fn charset_selects_encoding() {
        assert_eq!(text_encoding(Some("GB18030")), encoding_rs::GB18030);
        assert_eq!(text_encoding(Some("\\ISO 2022 IR 58")), encoding_rs::GBK);
        assert_eq!(text_encoding(None), encoding_rs::UTF_8);

        let bytes = encode_text("张三", encoding_rs::GB18030);
        assert_eq!(bytes.len(), 4);
        assert_eq!(decode_text(&bytes, encoding_rs::GB18030), "张三");
    }
}
