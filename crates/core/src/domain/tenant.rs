use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Daily staffed window, local to `timezone`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHours {
    pub start: String,
    pub end: String,
    pub timezone: String,
}

impl Default for OperatingHours {
    fn default() -> Self {
        Self {
            start: "09:00".to_string(),
            end: "18:00".to_string(),
            timezone: "Asia/Kuala_Lumpur".to_string(),
        }
    }
}

impl OperatingHours {
    pub fn display_window(&self) -> String {
        format!("{} - {}", self.start, self.end)
    }

    /// Returns `None` when any part of the window cannot be parsed.
    pub fn is_after_hours_at(&self, now: DateTime<Utc>) -> Option<bool> {
        let timezone: Tz = self.timezone.trim().parse().ok()?;
        let start = parse_clock(&self.start)?;
        let end = parse_clock(&self.end)?;
        let local = now.with_timezone(&timezone).time();

        let open = if start <= end {
            local >= start && local < end
        } else {
            // window wraps past midnight, e.g. 22:00 - 06:00
            local >= start || local < end
        };
        Some(!open)
    }
}

fn parse_clock(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Overrides the deployment-wide cosine distance cutoff for this tenant.
    #[serde(default)]
    pub relevance_threshold: Option<f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub operating_hours: Option<OperatingHours>,
    pub average_daily_rate: Decimal,
    pub knowledge_config: KnowledgeConfig,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Tenant {
    pub fn new(name: impl Into<String>, average_daily_rate: Decimal) -> Self {
        Self {
            id: TenantId::generate(),
            name: name.into(),
            operating_hours: None,
            average_daily_rate,
            knowledge_config: KnowledgeConfig::default(),
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Tenants without configured hours, or with hours that do not parse, are
    /// treated as always staffed.
    pub fn is_after_hours_at(&self, now: DateTime<Utc>) -> bool {
        let Some(hours) = &self.operating_hours else {
            return false;
        };
        match hours.is_after_hours_at(now) {
            Some(after_hours) => after_hours,
            None => {
                tracing::warn!(
                    event_name = "tenant.operating_hours.invalid",
                    tenant_id = %self.id,
                    timezone = %hours.timezone,
                    "operating hours could not be parsed; treating as staffed"
                );
                false
            }
        }
    }

    pub fn operating_window(&self) -> String {
        self.operating_hours.clone().unwrap_or_default().display_window()
    }
}
