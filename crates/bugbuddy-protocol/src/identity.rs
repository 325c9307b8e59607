use serde_json::{Map, Value};

use crate::protocol::Request;
use crate::types::ClientType;

/// Sidecar key carrying the caller's process id.
pub const PROCESS_ID_FIELD: &str = "processId";

/// The `processId` sidecar as read off a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessIdField {
    Valid(u32),
    /// Present but not a non-negative integer that fits a pid.
    Malformed,
    Missing,
}

impl ProcessIdField {
    pub fn from_extra(extra: &Map<String, Value>) -> Self {
        match extra.get(PROCESS_ID_FIELD) {
            None | Some(Value::Null) => ProcessIdField::Missing,
            Some(value) => value
                .as_u64()
                .and_then(|id| u32::try_from(id).ok())
                .map(ProcessIdField::Valid)
                .unwrap_or(ProcessIdField::Malformed),
        }
    }

    pub fn valid(self) -> Option<u32> {
        match self {
            ProcessIdField::Valid(id) => Some(id),
            _ => None,
        }
    }
}

impl Request {
    pub fn process_id(&self) -> ProcessIdField {
        ProcessIdField::from_extra(&self.extra)
    }
}

/// Who is on the other end of a connection once the handshake succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    pub process_id: u32,
    pub client_type: ClientType,
}

impl PeerIdentity {
    pub fn new(process_id: u32, client_type: ClientType) -> Self {
        Self {
            process_id,
            client_type,
        }
    }
}

impl std::fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.client_type, self.process_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestId;
    use serde_json::json;

    fn request_with(value: Option<Value>) -> Request {
        let req = Request::call(RequestId::Number(1), "$/ping", Value::Null);
        match value {
            Some(v) => req.with_extra(PROCESS_ID_FIELD, v),
            None => req,
        }
    }

    #[test]
    fn integer_is_valid() {
        assert_eq!(
            request_with(Some(json!(4321))).process_id(),
            ProcessIdField::Valid(4321)
        );
        assert_eq!(request_with(Some(json!(0))).process_id().valid(), Some(0));
    }

    #[test]
    fn non_numeric_and_negative_are_malformed() {
        for bad in [json!("12"), json!(-1), json!(1.5), json!({}), json!(u64::MAX)] {
            assert_eq!(
                request_with(Some(bad.clone())).process_id(),
                ProcessIdField::Malformed,
                "{}",
                bad
            );
        }
    }

    #[test]
    fn absent_or_null_is_missing() {
        assert_eq!(request_with(None).process_id(), ProcessIdField::Missing);
        assert_eq!(
            request_with(Some(Value::Null)).process_id(),
            ProcessIdField::Missing
        );
    }
}
