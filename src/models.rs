use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Suffix WhatsApp Web uses for one-to-one chat ids.
pub const CHAT_ID_SUFFIX: &str = "@c.us";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Initializing,
    WaitingForQr,
    Connecting(u8),
    Authenticating,
    Connected,
    Disconnecting,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Initializing => f.write_str("initializing"),
            Self::WaitingForQr => f.write_str("waiting-for-qr"),
            Self::Connecting(percent) => write!(f, "connecting:{percent}"),
            Self::Authenticating => f.write_str("authenticating"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnecting => f.write_str("disconnecting"),
        }
    }
}

impl FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "disconnected" => Self::Disconnected,
            "initializing" => Self::Initializing,
            "waiting-for-qr" => Self::WaitingForQr,
            "authenticating" => Self::Authenticating,
            "connected" => Self::Connected,
            "disconnecting" => Self::Disconnecting,
            other => {
                let percent = other
                    .strip_prefix("connecting:")
                    .and_then(|p| p.parse::<u32>().ok())
                    .ok_or_else(|| format!("unknown connection status '{other}'"))?;
                Self::Connecting(percent.min(100) as u8)
            }
        };
        Ok(status)
    }
}

impl Serialize for ConnectionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConnectionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: ConnectionStatus,
    pub qr_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectResponse {
    pub success: bool,
    pub message: String,
    pub status: ConnectionStatus,
}

/// A phone number as it arrives from the UI. Spreadsheet exports frequently
/// hand us integers instead of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawNumber {
    Text(String),
    Integer(u64),
}

impl fmt::Display for RawNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Integer(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for RawNumber {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub numbers: Option<Vec<RawNumber>>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub media_paths: Option<Vec<String>>,
}

impl SendRequest {
    /// The message body, with empty strings treated as absent.
    pub fn text(&self) -> Option<&str> {
        self.message.as_deref().filter(|m| !m.is_empty())
    }

    pub fn media(&self) -> &[String] {
        self.media_paths.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSend {
    pub number: String,
    pub reason: String,
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResults {
    pub success: Vec<String>,
    pub failed: Vec<FailedSend>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkResponse {
    pub results: BulkResults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub file_path: String,
}

/// Messaging-target id, `<digits>@c.us`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChatId(String);

impl ChatId {
    pub fn from_number(normalized: &str) -> Self {
        Self(format!("{normalized}{CHAT_ID_SUFFIX}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct MessageMedia {
    pub mimetype: mime::Mime,
    pub data: Vec<u8>,
    pub filename: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_form() {
        assert_eq!(ConnectionStatus::WaitingForQr.to_string(), "waiting-for-qr");
        assert_eq!(ConnectionStatus::Connecting(42).to_string(), "connecting:42");
        assert_eq!(
            "connecting:250".parse::<ConnectionStatus>(),
            Ok(ConnectionStatus::Connecting(100))
        );
        assert_eq!(
            "connecting:1000".parse::<ConnectionStatus>(),
            Ok(ConnectionStatus::Connecting(100))
        );
        assert_eq!(
            "connecting:soon".parse::<ConnectionStatus>(),
            Err("unknown connection status 'connecting:soon'".to_string())
        );
        assert_eq!(
            "connecting:100".parse::<ConnectionStatus>(),
            Ok(ConnectionStatus::Connecting(100))
        );

        let json = serde_json::to_string(&StatusResponse {
            status: ConnectionStatus::Connected,
            qr_code: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"connected","qrCode":null}"#);
    }

    #[test]
    fn send_request_accepts_integer_numbers() {
        let req: SendRequest =
            serde_json::from_str(r#"{"numbers":["0101 234", 1012345678],"message":""}"#).unwrap();
        let numbers = req.numbers.clone().unwrap();
        assert_eq!(numbers[0], RawNumber::from("0101 234"));
        assert_eq!(numbers[1].to_string(), "1012345678");
        assert_eq!(req.text(), None);
        assert!(req.media().is_empty());
    }

    #[test]
    fn chat_id_appends_suffix() {
        assert_eq!(ChatId::from_number("201012345678").as_str(), "201012345678@c.us");
    }
}
