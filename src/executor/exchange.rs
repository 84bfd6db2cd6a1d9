use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use tracing::trace;

use crate::OpsResult;
use crate::cancel::CancelSignal;
use crate::error::Error;
use crate::util::{parse_header_name, parse_header_value, parse_target};

use super::transport::PreparedRequest;

/// Request payload. Only attached to `POST` exchanges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Caller-formed JSON text, sent unchanged.
    Text(String),
    /// Output of `serde_json` for a structured value.
    Json(Bytes),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Json(bytes) => bytes,
        }
    }

    fn into_bytes(self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::from(text),
            Self::Json(bytes) => bytes,
        }
    }
}

/// Describes one logical exchange: method, target, payload and headers.
#[derive(Clone, Debug)]
pub struct Exchange {
    method: Method,
    target: String,
    payload: Option<Payload>,
    headers: BTreeMap<String, String>,
    timeout: Option<Duration>,
    cancel: Option<CancelSignal>,
}

impl Exchange {
    /// Starts an exchange; a missing method means `GET`.
    pub fn new(method: Option<Method>, target: impl Into<String>) -> Self {
        Self {
            method: method.unwrap_or(Method::GET),
            target: target.into(),
            payload: None,
            headers: BTreeMap::new(),
            timeout: None,
            cancel: None,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Some(Method::GET), target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Some(Method::POST), target)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Some(Method::DELETE), target)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn timeout_value(&self) -> Option<Duration> {
        self.timeout
    }

    /// Uses `body` verbatim as the JSON request body.
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.payload = Some(Payload::Text(body.into()));
        self
    }

    pub fn json<T>(mut self, value: &T) -> OpsResult<Self>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_json::to_vec(value).map_err(|source| Error::RequestBody { source })?;
        self.payload = Some(Payload::Json(Bytes::from(encoded)));
        Ok(self)
    }

    /// Sets a header; an empty value means the header is not sent.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn headers<K, V, I>(mut self, headers: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.headers.extend(
            headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub(crate) fn cancel(&self) -> Option<&CancelSignal> {
        self.cancel.as_ref()
    }

    /// Validates the descriptor and lowers it into a transport request.
    pub(crate) fn prepare(&self) -> OpsResult<PreparedRequest> {
        let uri = parse_target(&self.target)?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if value.is_empty() {
                continue;
            }
            let header_name = parse_header_name(name)?;
            let header_value = parse_header_value(name, value)?;
            headers.insert(header_name, header_value);
        }

        let body = match (&self.payload, self.method == Method::POST) {
            (Some(payload), true) => {
                match payload {
                    Payload::Text(_) => trace!("body is a string, assuming it is valid json"),
                    Payload::Json(_) => trace!("body was serialized to json"),
                }
                let bytes = payload.clone().into_bytes();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                Some(bytes)
            }
            (Some(_), false) => {
                trace!(method = %self.method, "dropping body for non-POST exchange");
                None
            }
            (None, _) => None,
        };

        Ok(PreparedRequest {
            method: self.method.clone(),
            uri,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use http::Method;
    use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
    use serde::Serialize;
    use serde::ser::Error as _;

    use super::{Exchange, Payload};
    use crate::error::Error;

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("cannot serialize"))
        }
    }

    #[test]
    fn missing_method_defaults_to_get() {
        let exchange = Exchange::new(None, "http://x/ok");
        assert_eq!(exchange.method(), &Method::GET);
    }

    #[test]
    fn text_payload_is_sent_byte_for_byte_on_post() {
        let raw = r#"{ "b": 2,   "a": 1 }"#;
        let request = Exchange::post("http://x/items")
            .text(raw)
            .prepare()
            .expect("post should prepare");

        assert_eq!(request.body.as_deref(), Some(raw.as_bytes()));
        assert_eq!(request.headers[CONTENT_TYPE], "application/json");
        assert_eq!(request.headers[CONTENT_LENGTH], raw.len().to_string().as_str());
    }

    #[test]
    fn structured_payload_uses_serde_json_encoding() {
        let mut value = BTreeMap::new();
        value.insert("a", 1);
        let exchange = Exchange::post("https://x/create")
            .json(&value)
            .expect("map should serialize");

        assert_eq!(exchange.payload(), Some(&Payload::Json(br#"{"a":1}"#.to_vec().into())));
        let request = exchange.prepare().expect("post should prepare");
        assert_eq!(request.body.as_deref(), Some(&br#"{"a":1}"#[..]));
    }

    #[test]
    fn serialization_failure_is_request_body_error() {
        let error = Exchange::post("http://x/items")
            .json(&Unserializable)
            .expect_err("serialization should fail");
        assert!(matches!(error, Error::RequestBody { .. }));
    }

    #[test]
    fn body_is_dropped_for_non_post_methods() {
        for exchange in [Exchange::get("http://x/a"), Exchange::delete("http://x/a")] {
            let request = exchange.text("{}").prepare().expect("should prepare");
            assert!(request.body.is_none());
            assert!(!request.headers.contains_key(CONTENT_TYPE));
        }
    }

    #[test]
    fn empty_header_values_are_not_set() {
        let request = Exchange::get("http://x/a")
            .header("x-trace", "abc")
            .header("authorization", "")
            .prepare()
            .expect("should prepare");
        assert_eq!(request.headers["x-trace"], "abc");
        assert!(!request.headers.contains_key("authorization"));
    }

    #[test]
    fn empty_target_is_rejected_before_anything_else() {
        let error = Exchange::new(None, "")
            .header("bad header", "x")
            .prepare()
            .expect_err("empty target should fail");
        assert!(matches!(error, Error::InvalidTarget { .. }));
    }

    #[test]
    fn invalid_header_name_is_reported() {
        let error = Exchange::get("http://x/a")
            .header("bad header", "x")
            .prepare()
            .expect_err("header name with a space should fail");
        assert!(matches!(error, Error::InvalidHeaderName { .. }));
    }
}
