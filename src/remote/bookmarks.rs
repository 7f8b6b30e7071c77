// src/remote/bookmarks.rs

//! XEP-0048 bookmark payloads.
//!
//! Bookmarks cross the admin API as an XML string of the shape
//!
//! ```text
//! <storage xmlns="storage:bookmarks">
//!   <conference jid="officers@conference.example.org" autojoin="true" name="Officers">
//!     <nick>alice</nick>
//!   </conference>
//! </storage>
//! ```
//!
//! Attribute values escape `&`, `<`, `>` and `"`. The decoder is lenient:
//! unknown attributes and elements are skipped, `autojoin` coerces from
//! `"true"`/`"1"`, and a missing attribute falls back to the empty value.

use super::Bookmark;

/// Namespace of the legacy bookmark storage element
pub const STORAGE_NS: &str = "storage:bookmarks";

/// Serialize bookmarks to the `<storage/>` payload
pub fn to_storage_xml(bookmarks: &[Bookmark]) -> String {
    let mut xml = format!("<storage xmlns=\"{}\">", STORAGE_NS);

    for bookmark in bookmarks {
        xml.push_str(&format!(
            "<conference jid=\"{}\" autojoin=\"{}\" name=\"{}\"",
            escape_attr(&bookmark.jid),
            bookmark.autojoin,
            escape_attr(&bookmark.name),
        ));
        match &bookmark.nick {
            Some(nick) => {
                xml.push('>');
                xml.push_str(&format!("<nick>{}</nick>", escape_text(nick)));
                xml.push_str("</conference>");
            }
            None => xml.push_str("/>"),
        }
    }

    xml.push_str("</storage>");
    xml
}

/// Parse conference bookmarks out of a `<storage/>` payload.
///
/// Anything that is not a well-formed `<conference/>` element is skipped.
pub fn from_storage_xml(xml: &str) -> Vec<Bookmark> {
    let mut bookmarks = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find("<conference") {
        rest = &rest[start + "<conference".len()..];
        let Some(tag_end) = rest.find('>') else { break };
        let tag = &rest[..tag_end];
        let self_closing = tag.trim_end().ends_with('/');

        let jid = attr_value(tag, "jid").unwrap_or_default();
        let name = attr_value(tag, "name").unwrap_or_default();
        let autojoin = attr_value(tag, "autojoin")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        rest = &rest[tag_end + 1..];
        let mut nick = None;
        if !self_closing {
            if let Some(close) = rest.find("</conference>") {
                let body = &rest[..close];
                if let Some(open) = body.find("<nick>") {
                    if let Some(end) = body[open..].find("</nick>") {
                        nick = Some(unescape(&body[open + "<nick>".len()..open + end]));
                    }
                }
                rest = &rest[close + "</conference>".len()..];
            }
        }

        if !jid.is_empty() {
            bookmarks.push(Bookmark {
                jid: unescape(&jid),
                name: unescape(&name),
                autojoin,
                nick,
            });
        }
    }

    bookmarks
}

fn attr_value(tag: &str, attr: &str) -> Option<String> {
    let needle = format!("{}=\"", attr);
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')?;
    Some(tag[start..start + end].to_string())
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Bookmark {
        Bookmark {
            jid: "officers@conference.example.org".to_string(),
            name: "Officers".to_string(),
            autojoin: true,
            nick: Some("alice".to_string()),
        }
    }

    #[test]
    fn test_encode() {
        let xml = to_storage_xml(&[sample()]);
        assert!(xml.starts_with("<storage xmlns=\"storage:bookmarks\">"));
        assert!(xml.contains("jid=\"officers@conference.example.org\""));
        assert!(xml.contains("autojoin=\"true\""));
        assert!(xml.contains("<nick>alice</nick>"));
    }

    #[test]
    fn test_round_trip() {
        let original = vec![
            sample(),
            Bookmark {
                jid: "lounge@conference.example.org".to_string(),
                name: "The \"Lounge\" & Friends <3".to_string(),
                autojoin: false,
                nick: None,
            },
        ];

        let parsed = from_storage_xml(&to_storage_xml(&original));
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_attribute_escaping() {
        let bookmark = Bookmark {
            jid: "room@muc".to_string(),
            name: "a&b<c>\"d\"".to_string(),
            autojoin: true,
            nick: None,
        };

        let xml = to_storage_xml(&[bookmark]);
        assert!(xml.contains("name=\"a&amp;b&lt;c&gt;&quot;d&quot;\""));
    }

    #[test]
    fn test_autojoin_coercion() {
        let xml = "<storage xmlns=\"storage:bookmarks\">\
                   <conference jid=\"a@muc\" autojoin=\"1\" name=\"A\"/>\
                   <conference jid=\"b@muc\" autojoin=\"nope\" name=\"B\"/>\
                   <conference jid=\"c@muc\" name=\"C\"/>\
                   </storage>";

        let parsed = from_storage_xml(xml);
        assert_eq!(parsed.len(), 3);
        assert!(parsed[0].autojoin);
        assert!(!parsed[1].autojoin);
        assert!(!parsed[2].autojoin);
    }

    #[test]
    fn test_empty_storage() {
        assert!(from_storage_xml("<storage xmlns=\"storage:bookmarks\"/>").is_empty());
        assert!(from_storage_xml("").is_empty());
    }
}
