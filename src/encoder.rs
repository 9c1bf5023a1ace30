use chrono::Utc;

use crate::cohorts::Participant;
use crate::transport::ContactArtifact;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("no participants to encode")]
    Empty,
    #[error("encoding failed: {0}")]
    Failed(String),
}

/// Contact-file encoder seam: turns a participant snapshot into a
/// downloadable artifact.
pub trait ContactEncoder: Send + Sync {
    fn encode(
        &self,
        cohort_id: &str,
        tier: u32,
        participants: &[Participant],
    ) -> Result<ContactArtifact, EncodeError>;
}

/// vCard 3.0 encoder. Display names carry an optional watermark suffix
/// so exported files are attributable to this service.
pub struct VcfEncoder {
    watermark: String,
}

impl VcfEncoder {
    pub fn new(watermark: impl Into<String>) -> Self {
        Self {
            watermark: watermark.into(),
        }
    }
}

impl ContactEncoder for VcfEncoder {
    fn encode(
        &self,
        cohort_id: &str,
        tier: u32,
        participants: &[Participant],
    ) -> Result<ContactArtifact, EncodeError> {
        if participants.is_empty() {
            return Err(EncodeError::Empty);
        }

        let mut out = String::new();
        for participant in participants {
            let name = if self.watermark.is_empty() {
                participant.display_name.clone()
            } else {
                format!("{} {}", participant.display_name, self.watermark)
            };
            out.push_str("BEGIN:VCARD\r\n");
            out.push_str("VERSION:3.0\r\n");
            out.push_str(&format!("FN:{}\r\n", escape_vcard(&name)));
            out.push_str(&format!("N:{};;;;\r\n", escape_vcard(&name)));
            out.push_str(&format!("TEL;TYPE=CELL:{}\r\n", participant.phone_number));
            out.push_str("END:VCARD\r\n");
        }

        let today = Utc::now();
        let file_name = format!("VCF_{}_{}.vcf", tier, today.format("%Y-%m-%d"));
        let caption = format!(
            "📁 Group: {} VCF\n👥 Total Contacts: {}\n📅 Generated on: {}\n⚠️ Warning: Do NOT download this file if you didn't submit to this group.",
            cohort_id,
            participants.len(),
            today.format("%b %d, %Y"),
        );

        Ok(ContactArtifact {
            file_name,
            content: out.into_bytes(),
            caption,
        })
    }
}

/// Escape per RFC 6350: backslash, comma, semicolon, newline.
fn escape_vcard(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            ',' => escaped.push_str("\\,"),
            ';' => escaped.push_str("\\;"),
            '\n' => escaped.push_str("\\n"),
            '\r' => {}
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn participant(user_id: i64, name: &str, number: &str) -> Participant {
        Participant {
            user_id,
            display_name: name.to_string(),
            phone_number: number.to_string(),
            cohort_id: "ID-XP2GROUP".to_string(),
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn encodes_one_vcard_per_participant() {
        let encoder = VcfEncoder::new("🔥");
        let artifact = encoder
            .encode(
                "ID-XP2GROUP",
                2,
                &[
                    participant(1, "John Doe", "+256787000001"),
                    participant(2, "Jane Doe", "+256787000002"),
                ],
            )
            .unwrap();

        let text = String::from_utf8(artifact.content).unwrap();
        assert_eq!(text.matches("BEGIN:VCARD").count(), 2);
        assert_eq!(text.matches("END:VCARD").count(), 2);
        assert!(text.contains("FN:John Doe 🔥"));
        assert!(text.contains("TEL;TYPE=CELL:+256787000002"));
        assert!(artifact.file_name.starts_with("VCF_2_"));
        assert!(artifact.caption.contains("Total Contacts: 2"));
    }

    #[test]
    fn empty_snapshot_is_an_error() {
        let encoder = VcfEncoder::new("");
        assert!(matches!(
            encoder.encode("ID-XP2GROUP", 2, &[]),
            Err(EncodeError::Empty)
        ));
    }

    #[test]
    fn special_characters_are_escaped() {
        let encoder = VcfEncoder::new("");
        let artifact = encoder
            .encode("ID-XP1GROUP", 1, &[participant(1, "Doe; John, Jr", "+1")])
            .unwrap();
        let text = String::from_utf8(artifact.content).unwrap();
        assert!(text.contains("FN:Doe\\; John\\, Jr"));
    }
}
