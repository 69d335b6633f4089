//! XML parsing for ListObjectsV2 responses and S3 error bodies.

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::S3Error;

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    /// Raw `LastModified` value (ISO 8601, e.g. `2025-01-15T10:00:00.000Z`).
    pub last_modified: Option<String>,
}

pub(crate) fn parse_list_objects_xml(
    xml: &str,
) -> Result<(Vec<ObjectSummary>, Option<String>), S3Error> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut objects = Vec::new();
    let mut next_token = None;

    let mut in_contents = false;
    let mut field: Option<&'static str> = None;
    let mut current_key = String::new();
    let mut current_size = String::new();
    let mut current_modified = String::new();
    let mut current_text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let qname = e.name();
                let name = std::str::from_utf8(qname.as_ref()).unwrap_or("");
                match name {
                    "Contents" => {
                        in_contents = true;
                        current_key.clear();
                        current_size.clear();
                        current_modified.clear();
                    }
                    "Key" if in_contents => field = Some("Key"),
                    "Size" if in_contents => field = Some("Size"),
                    "LastModified" if in_contents => field = Some("LastModified"),
                    "NextContinuationToken" => field = Some("NextContinuationToken"),
                    _ => {}
                }
                if field.is_some() {
                    current_text.clear();
                }
            }
            Ok(Event::Text(ref e)) => {
                if field.is_some()
                    && let Ok(text) = e.unescape()
                {
                    current_text.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => {
                let qname = e.name();
                let name = std::str::from_utf8(qname.as_ref()).unwrap_or("");
                match (name, field) {
                    ("Key", Some("Key")) => current_key = current_text.clone(),
                    ("Size", Some("Size")) => current_size = current_text.clone(),
                    ("LastModified", Some("LastModified")) => {
                        current_modified = current_text.clone()
                    }
                    ("NextContinuationToken", Some("NextContinuationToken")) => {
                        next_token = Some(current_text.clone())
                    }
                    ("Contents", _) if in_contents => {
                        // Directory placeholder objects carry no data.
                        if !current_key.is_empty() && !current_key.ends_with('/') {
                            objects.push(ObjectSummary {
                                key: current_key.clone(),
                                size: current_size.trim().parse::<u64>().unwrap_or(0),
                                last_modified: (!current_modified.is_empty())
                                    .then(|| current_modified.clone()),
                            });
                        }
                        in_contents = false;
                    }
                    _ => {}
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(S3Error::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok((objects, next_token))
}

/// Extract `(Code, Message)` from an S3 `<Error>` body. Non-XML bodies yield `(None, None)`.
pub(crate) fn parse_error_xml(xml: &str) -> (Option<String>, Option<String>) {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut code = None;
    let mut message = None;
    let mut field: Option<&'static str> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                field = match e.name().as_ref() {
                    b"Code" => Some("Code"),
                    b"Message" => Some("Message"),
                    _ => None,
                };
            }
            Ok(Event::Text(ref e)) => {
                if let Some(f) = field
                    && let Ok(text) = e.unescape()
                {
                    match f {
                        "Code" => code = Some(text.into_owned()),
                        _ => message = Some(text.into_owned()),
                    }
                }
            }
            Ok(Event::End(_)) => field = None,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    (code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_contents_and_skips_placeholders() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <Name>docs</Name>
  <Prefix>extracted-texts/</Prefix>
  <Contents>
    <Key>extracted-texts/</Key>
    <Size>0</Size>
  </Contents>
  <Contents>
    <Key>extracted-texts/report.txt</Key>
    <LastModified>2025-01-15T10:00:00.000Z</LastModified>
    <Size>1234</Size>
  </Contents>
  <Contents>
    <Key>extracted-texts/a &amp; b.txt</Key>
    <Size>7</Size>
  </Contents>
</ListBucketResult>"#;
        let (objects, token) = parse_list_objects_xml(xml).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].key, "extracted-texts/report.txt");
        assert_eq!(objects[0].size, 1234);
        assert_eq!(
            objects[0].last_modified.as_deref(),
            Some("2025-01-15T10:00:00.000Z")
        );
        assert_eq!(objects[1].key, "extracted-texts/a & b.txt");
        assert!(objects[1].last_modified.is_none());
        assert!(token.is_none());
    }

    #[test]
    fn parses_continuation_token() {
        let xml = r#"<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <Contents><Key>input-articles/a.pdf</Key><Size>10</Size></Contents>
  <NextContinuationToken>1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=</NextContinuationToken>
</ListBucketResult>"#;
        let (objects, token) = parse_list_objects_xml(xml).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(
            token.as_deref(),
            Some("1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=")
        );
    }

    #[test]
    fn empty_listing() {
        let xml = "<ListBucketResult><KeyCount>0</KeyCount></ListBucketResult>";
        let (objects, token) = parse_list_objects_xml(xml).unwrap();
        assert!(objects.is_empty());
        assert!(token.is_none());
    }

    #[test]
    fn parses_error_body() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>NoSuchBucket</Code><Message>The specified bucket does not exist</Message></Error>"#;
        let (code, message) = parse_error_xml(xml);
        assert_eq!(code.as_deref(), Some("NoSuchBucket"));
        assert_eq!(
            message.as_deref(),
            Some("The specified bucket does not exist")
        );
    }

    #[test]
    fn non_xml_error_body() {
        assert_eq!(parse_error_xml(""), (None, None));
    }
}
