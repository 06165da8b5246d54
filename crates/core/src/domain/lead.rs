use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::ConversationId;
use crate::domain::tenant::TenantId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadId(pub String);

impl LeadId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for LeadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Won,
    Lost,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Contacted => "contacted",
            Self::Won => "won",
            Self::Lost => "lost",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "contacted" => Some(Self::Contacted),
            "won" => Some(Self::Won),
            "lost" => Some(Self::Lost),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadIntent {
    RoomBooking,
    Event,
    FbInquiry,
    General,
}

impl LeadIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoomBooking => "room_booking",
            Self::Event => "event",
            Self::FbInquiry => "fb_inquiry",
            Self::General => "general",
        }
    }

    /// Unknown categories collapse to `General`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "room_booking" => Self::RoomBooking,
            "event" => Self::Event,
            "fb_inquiry" => Self::FbInquiry,
            _ => Self::General,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub conversation_id: ConversationId,
    pub tenant_id: TenantId,
    pub guest_name: Option<String>,
    pub guest_phone: Option<String>,
    pub guest_email: Option<String>,
    pub intent: LeadIntent,
    pub estimated_value: Decimal,
    pub status: LeadStatus,
    pub notes: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl Lead {
    pub fn has_contact(&self) -> bool {
        [&self.guest_name, &self.guest_phone, &self.guest_email]
            .iter()
            .any(|field| field.as_deref().is_some_and(|value| !value.trim().is_empty()))
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if !self.has_contact() {
            return Err(DomainError::InvariantViolation(
                "lead requires at least one of guest name, phone or email".to_string(),
            ));
        }
        if self.estimated_value.is_sign_negative() {
            return Err(DomainError::InvariantViolation(
                "lead estimated value cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{Lead, LeadId, LeadIntent, LeadStatus};
    use crate::domain::conversation::ConversationId;
    use crate::domain::tenant::TenantId;

    fn lead() -> Lead {
        Lead {
            id: LeadId::generate(),
            conversation_id: ConversationId("conv-1".to_string()),
            tenant_id: TenantId("tenant-a".to_string()),
            guest_name: None,
            guest_phone: None,
            guest_email: None,
            intent: LeadIntent::RoomBooking,
            estimated_value: Decimal::new(230, 0),
            status: LeadStatus::New,
            notes: None,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn intent_alone_is_not_a_lead() {
        assert!(lead().validate().is_err());
    }

    #[test]
    fn blank_contact_fields_do_not_count() {
        let mut lead = lead();
        lead.guest_name = Some("   ".to_string());
        assert!(!lead.has_contact());

        lead.guest_email = Some("ali@test.com".to_string());
        assert!(lead.validate().is_ok());
    }

    #[test]
    fn unknown_intent_maps_to_general() {
        assert_eq!(LeadIntent::parse_lenient("wedding_party"), LeadIntent::General);
        assert_eq!(LeadIntent::parse_lenient("Room_Booking"), LeadIntent::RoomBooking);
    }
}
