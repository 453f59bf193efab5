//! GENA property-set XML parsing.
//!
//! The NOTIFY body wraps changed state variables in `property` elements:
//!
//! ```xml
//! <e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
//!   <e:property><Volume>5</Volume></e:property>
//! </e:propertyset>
//! ```
//!
//! Every element whose immediate parent is named `property` (compared
//! case-insensitively on the local name) contributes one entry: key is the
//! element's local name, value is the trimmed concatenation of character
//! data across all its descendants. Duplicate keys within one notification
//! resolve last-writer-wins.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

/// Characters stripped from both ends of a property value.
const TRIM_SET: &[char] = &[' ', '\t', '\n', '\r'];

const PROPERTY: &str = "property";

/// Why a NOTIFY body could not be parsed as a property set.
#[derive(Debug, thiserror::Error)]
pub enum PropertySetError {
    #[error("body is not valid UTF-8")]
    Encoding,
    #[error("document contains no XML element")]
    NotXml,
    #[error("document ends inside an open element")]
    Truncated,
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
}

struct Frame {
    name: String,
    text: String,
}

/// Parse a property-set document into its variable map.
///
/// Fails on non-UTF-8 input and on malformed XML; the root element name is
/// irrelevant.
pub fn parse_property_set(body: &[u8]) -> Result<HashMap<String, String>, PropertySetError> {
    let text = std::str::from_utf8(body).map_err(|_| PropertySetError::Encoding)?;
    let mut reader = Reader::from_str(text);

    let mut properties = HashMap::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut seen_element = false;
    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                seen_element = true;
                let name = local_name(start.local_name().as_ref());
                stack.push(Frame {
                    name,
                    text: String::new(),
                });
            }
            Event::Empty(empty) => {
                seen_element = true;
                if let Some(parent) = stack.last() {
                    if parent.name.eq_ignore_ascii_case(PROPERTY) {
                        let name = local_name(empty.local_name().as_ref());
                        properties.insert(name, String::new());
                    }
                }
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(cdata) => {
                if let Some(top) = stack.last_mut() {
                    let raw = cdata.into_inner();
                    top.text.push_str(&String::from_utf8_lossy(&raw));
                }
            }
            Event::End(_) => {
                // mismatched tags are rejected by the reader itself
                let Some(frame) = stack.pop() else { continue };
                if let Some(parent) = stack.last_mut() {
                    if parent.name.eq_ignore_ascii_case(PROPERTY) {
                        properties.insert(
                            frame.name,
                            frame.text.trim_matches(TRIM_SET).to_string(),
                        );
                    }
                    // character data flows up so outer values include it
                    parent.text.push_str(&frame.text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if !seen_element {
        return Err(PropertySetError::NotXml);
    }
    if !stack.is_empty() {
        return Err(PropertySetError::Truncated);
    }
    Ok(properties)
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}
