//! Snapshot description building and metadata parsing.
//!
//! All snapshot state lives in the hypervisor; this module only shapes the
//! minimal creation XML and extracts metadata from what the hypervisor
//! returns.

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{HypervisorError, Result};
use crate::types::SnapshotMeta;

/// Minimal snapshot definition XML.
pub fn snapshot_definition_xml(name: &str, description: &str) -> String {
    format!(
        "<domainsnapshot>\n  <name>{}</name>\n  <description>{}</description>\n</domainsnapshot>\n",
        escape(name),
        escape(description)
    )
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Parse snapshot metadata out of the hypervisor's snapshot description.
///
/// The embedded `<domain>` subtree carries its own `<name>` and friends and
/// is skipped wholesale.
pub fn parse_snapshot_meta(xml: &str) -> Result<SnapshotMeta> {
    let mut reader = Reader::from_str(xml);

    let mut name = None;
    let mut description = String::new();
    let mut state = String::new();
    let mut created_at = None;

    let mut in_domain = false;
    let mut capture: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"domain" => in_domain = true,
                b"name" if !in_domain => capture = Some("name"),
                b"description" if !in_domain => capture = Some("description"),
                b"state" if !in_domain => capture = Some("state"),
                b"creationTime" if !in_domain => capture = Some("creationTime"),
                _ => capture = None,
            },
            Ok(Event::Text(t)) => {
                if let Some(which) = capture {
                    let text = t
                        .unescape()
                        .map_err(|e| HypervisorError::Integrity(e.to_string()))?
                        .trim()
                        .to_string();
                    match which {
                        "name" => name = Some(text),
                        "description" => description = text,
                        "state" => state = text,
                        "creationTime" => {
                            created_at = text
                                .parse::<i64>()
                                .ok()
                                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"domain" {
                    in_domain = false;
                }
                capture = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(HypervisorError::Integrity(e.to_string())),
            _ => {}
        }
    }

    let name = name.ok_or_else(|| {
        HypervisorError::Integrity("snapshot metadata has no name".to_string())
    })?;

    Ok(SnapshotMeta {
        name,
        description,
        state,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_round_trips() {
        let xml = snapshot_definition_xml("baseline", "first");
        let meta = parse_snapshot_meta(&xml).unwrap();
        assert_eq!(meta.name, "baseline");
        assert_eq!(meta.description, "first");
        assert!(meta.created_at.is_none());
    }

    #[test]
    fn full_metadata_parses() {
        let xml = r#"<domainsnapshot>
  <name>baseline</name>
  <description>first</description>
  <state>running</state>
  <creationTime>1718000000</creationTime>
  <domain type='kvm'>
    <name>web-01</name>
    <uuid>f47ac10b-58cc-4372-a567-0e02b2c3d479</uuid>
  </domain>
</domainsnapshot>"#;
        let meta = parse_snapshot_meta(xml).unwrap();
        assert_eq!(meta.name, "baseline");
        assert_eq!(meta.state, "running");
        assert_eq!(meta.created_at.unwrap().timestamp(), 1718000000);
    }

    #[test]
    fn embedded_domain_name_does_not_leak() {
        let xml = r#"<domainsnapshot>
  <domain><name>the-vm</name></domain>
  <name>snap-1</name>
</domainsnapshot>"#;
        let meta = parse_snapshot_meta(xml).unwrap();
        assert_eq!(meta.name, "snap-1");
    }

    #[test]
    fn nameless_metadata_is_integrity_error() {
        assert!(matches!(
            parse_snapshot_meta("<domainsnapshot/>"),
            Err(HypervisorError::Integrity(_))
        ));
    }

    #[test]
    fn definition_escapes_markup() {
        let xml = snapshot_definition_xml("a<b", "c&d");
        assert!(xml.contains("<name>a&lt;b</name>"));
        assert!(xml.contains("<description>c&amp;d</description>"));
    }
}
