//! Cross-context message protocol. Every frame is a JSON object carrying the
//! correlation `id`; requests carry a `type` tag, replies carry `ok`.

use crate::error::DetectorError;
use crate::models::image_types::TensorPayload;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "FETCH_IMAGE")]
pub struct FetchImage {
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "REMOTE_CLASSIFY")]
pub struct RemoteClassify {
    pub encoded_image: String,
    pub mime_type: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "ANALYZE")]
pub struct Analyze {
    pub tensor_payload: TensorPayload,
}

/// A frame on the wire: the correlation id plus the flattened body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: Uuid,
    #[serde(flatten)]
    pub body: T,
}

/// Reply body: `{ok: true, value}` or `{ok: false, error}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reply<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DetectorError>,
}

impl<T> Reply<T> {
    pub fn ok(value: T) -> Self {
        Self {
            ok: true,
            value: Some(value),
            error: None,
        }
    }

    pub fn err(error: DetectorError) -> Self {
        Self {
            ok: false,
            value: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<T, DetectorError> {
        match (self.ok, self.value, self.error) {
            (true, Some(value), _) => Ok(value),
            (false, _, Some(error)) => Err(error),
            (true, None, _) => Err(DetectorError::ChannelClosed {
                message: "reply marked ok but carried no value".to_string(),
            }),
            (false, _, None) => Err(DetectorError::ChannelClosed {
                message: "reply marked failed but carried no error".to_string(),
            }),
        }
    }
}

impl<T> From<Result<T, DetectorError>> for Reply<T> {
    fn from(result: Result<T, DetectorError>) -> Self {
        match result {
            Ok(value) => Reply::ok(value),
            Err(error) => Reply::err(error),
        }
    }
}
