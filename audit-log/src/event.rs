use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Actions recorded by the upstream tariff and insurance services.
/// `submit` accepts any action string; this is the vocabulary known
/// producers use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    CreateTariff,
    UpdateTariff,
    DeleteTariff,
    CalculateInsurance,
    CreateInsuranceRequest,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CreateTariff => "CREATE_TARIFF",
            AuditAction::UpdateTariff => "UPDATE_TARIFF",
            AuditAction::DeleteTariff => "DELETE_TARIFF",
            AuditAction::CalculateInsurance => "CALCULATE_INSURANCE",
            AuditAction::CreateInsuranceRequest => "CREATE_INSURANCE_REQUEST",
        }
    }
}

/// One buffered audit event. Created when a producer submits, never
/// mutated afterwards; either persisted and published by a flush or
/// dropped with its batch on failure.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub topic: String,
    pub action: String,
    pub details: Map<String, Value>,
    pub user_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    /// The wire form published to the event's topic.
    pub fn broker_message(&self) -> BrokerMessage<'_> {
        BrokerMessage {
            user_id: self.user_id,
            action: &self.action,
            details: &self.details,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Serialize)]
pub struct BrokerMessage<'a> {
    pub user_id: Option<i64>,
    pub action: &'a str,
    pub details: &'a Map<String, Value>,
    #[serde(serialize_with = "serialize_datetime")]
    pub timestamp: DateTime<Utc>,
}

pub fn serialize_datetime<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Micros, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_message_serialization() {
        use chrono::prelude::*;

        let mut details = Map::new();
        details.insert("cargo_type".to_owned(), Value::from("GLASS"));
        details.insert("rate".to_owned(), Value::from(0.035));

        let event = LogEvent {
            topic: "tariff_logs".to_owned(),
            action: AuditAction::CreateTariff.as_str().to_owned(),
            details,
            user_id: Some(42),
            timestamp: Utc.with_ymd_and_hms(2023, 12, 14, 12, 2, 0).unwrap(),
        };

        let serialized_json = serde_json::to_string(&event.broker_message()).unwrap();

        let expected_json = r#"{"user_id":42,"action":"CREATE_TARIFF","details":{"cargo_type":"GLASS","rate":0.035},"timestamp":"2023-12-14T12:02:00.000000Z"}"#;

        assert_eq!(serialized_json, expected_json);
    }

    #[test]
    fn test_missing_user_serializes_as_null() {
        use chrono::prelude::*;

        let event = LogEvent {
            topic: "insurance_logs".to_owned(),
            action: AuditAction::CalculateInsurance.as_str().to_owned(),
            details: Map::new(),
            user_id: None,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        };

        let serialized_json = serde_json::to_string(&event.broker_message()).unwrap();

        let expected_json = r#"{"user_id":null,"action":"CALCULATE_INSURANCE","details":{},"timestamp":"2024-01-02T03:04:05.000000Z"}"#;

        assert_eq!(serialized_json, expected_json);
    }

    #[test]
    fn action_names_match_their_serialized_form() {
        for action in [
            AuditAction::CreateTariff,
            AuditAction::UpdateTariff,
            AuditAction::DeleteTariff,
            AuditAction::CalculateInsurance,
            AuditAction::CreateInsuranceRequest,
        ] {
            let serialized = serde_json::to_value(action).unwrap();
            assert_eq!(serialized, Value::from(action.as_str()));
        }
    }
}
