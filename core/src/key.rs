//! Identity of an outgoing request, used to spot duplicate concurrent calls.

use std::fmt;

use serde_json::Value;

use crate::http::HttpMethod;

/// Method, endpoint (query string included) and compact JSON body.
///
/// Two requests with equal keys would hit the server with the same payload.
/// Headers are not part of the key, so a read joined after the access token
/// changed still shares the result of the call issued with the old token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    method: HttpMethod,
    endpoint: String,
    body: String,
}

impl RequestKey {
    pub fn new(method: HttpMethod, endpoint: &str, body: Option<&Value>) -> Self {
        Self {
            method,
            endpoint: endpoint.to_string(),
            body: body.map(Value::to_string).unwrap_or_default(),
        }
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.method, self.endpoint, self.body)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn same_inputs_give_equal_keys() {
        let body = json!({"name": "alpha", "size": 3});
        let a = RequestKey::new(HttpMethod::Post, "/projects", Some(&body));
        let b = RequestKey::new(HttpMethod::Post, "/projects", Some(&body.clone()));
        assert_eq!(a, b);
    }

    #[test]
    fn method_is_part_of_the_key() {
        let get = RequestKey::new(HttpMethod::Get, "/things/42", None);
        let delete = RequestKey::new(HttpMethod::Delete, "/things/42", None);
        assert_ne!(get, delete);
    }

    #[test]
    fn body_and_query_distinguish_keys() {
        let a = RequestKey::new(HttpMethod::Get, "/scenarios?project_id=1", None);
        let b = RequestKey::new(HttpMethod::Get, "/scenarios?project_id=2", None);
        assert_ne!(a, b);

        let one = json!({"n": 1});
        let two = json!({"n": 2});
        assert_ne!(
            RequestKey::new(HttpMethod::Put, "/x", Some(&one)),
            RequestKey::new(HttpMethod::Put, "/x", Some(&two)),
        );
    }

    #[test]
    fn display_joins_parts() {
        let key = RequestKey::new(HttpMethod::Put, "/projects/1", Some(&json!({"name": "b"})));
        assert_eq!(key.to_string(), r#"PUT:/projects/1:{"name":"b"}"#);
        assert_eq!(RequestKey::new(HttpMethod::Get, "/health", None).to_string(), "GET:/health:");
    }
}
