//! Wire messages of `workflow.template.v1.TemplateService`.
//!
//! Messages are protobuf on the RPC transport and JSON on the REST gateway.
//! Unset JSON fields decode to their empty value.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Fully-qualified service name.
pub const SERVICE_NAME: &str = "workflow.template.v1.TemplateService";

/// RPC method names.
pub mod methods {
    pub const CREATE_TEMPLATE: &str = "CreateTemplate";
    pub const GET_TEMPLATE: &str = "GetTemplate";
    pub const GET_TEMPLATE_BY_NAME: &str = "GetTemplateByName";
    pub const DELETE_TEMPLATE: &str = "DeleteTemplate";
    pub const LIST_TEMPLATES: &str = "ListTemplates";
    pub const UPDATE_TEMPLATE: &str = "UpdateTemplate";
}

/// RPC path of a method: `/<service>/<method>`.
pub fn method_path(method: &str) -> String {
    format!("/{SERVICE_NAME}/{method}")
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkflowTemplate {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub data: String,
    #[prost(message, optional, tag = "4")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    #[prost(message, optional, tag = "5")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateResponse {
    #[prost(string, tag = "1")]
    pub id: String,
}

/// Addresses a template by id or by name.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct GetRequest {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterRequest {
    #[prost(string, tag = "1")]
    pub filter: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct Empty {}

/// Point in time as seconds and nanoseconds since the Unix epoch.
///
/// JSON form is RFC 3339 text, e.g. `"2024-05-01T12:00:00Z"`.
#[derive(Clone, Copy, PartialEq, Eq, prost::Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self {
            seconds: value.timestamp(),
            nanos: value.timestamp_subsec_nanos() as i32,
        }
    }
}

impl Timestamp {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let nanos = u32::try_from(self.nanos).ok()?;
        DateTime::from_timestamp(self.seconds, nanos)
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let datetime = self
            .to_datetime()
            .ok_or_else(|| serde::ser::Error::custom("timestamp out of range"))?;
        serializer.serialize_str(&datetime.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        let datetime = DateTime::parse_from_rfc3339(&text).map_err(serde::de::Error::custom)?;
        Ok(Timestamp::from(datetime.with_timezone(&Utc)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use prost::Message;

    #[test]
    fn test_method_path() {
        assert_eq!(
            method_path(methods::LIST_TEMPLATES),
            "/workflow.template.v1.TemplateService/ListTemplates"
        );
    }

    #[test]
    fn test_template_json_defaults() {
        let template: WorkflowTemplate = serde_json::from_str(r#"{"name":"build"}"#).unwrap();
        assert_eq!(template.name, "build");
        assert_eq!(template.data, "");
        assert!(template.created_at.is_none());

        let empty: WorkflowTemplate = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, WorkflowTemplate::default());
    }

    #[test]
    fn test_timestamp_json_is_rfc3339() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let template = WorkflowTemplate {
            id: "7f1c".into(),
            name: "build".into(),
            created_at: Some(at.into()),
            ..Default::default()
        };

        let json = serde_json::to_value(&template).unwrap();
        assert_eq!(json["createdAt"], "2024-05-01T12:00:00Z");
        assert!(json.get("updatedAt").is_none());

        let back: WorkflowTemplate = serde_json::from_value(json).unwrap();
        assert_eq!(back.created_at.and_then(|t| t.to_datetime()), Some(at));
    }

    #[test]
    fn test_protobuf_encoding() {
        let request = GetRequest {
            id: String::new(),
            name: "deploy".into(),
        };
        let bytes = request.encode_to_vec();
        assert_eq!(GetRequest::decode(bytes.as_slice()).unwrap(), request);
        assert!(Empty::default().encode_to_vec().is_empty());
    }
}
