//! Verify resource endpoints against JSON test vectors in `test-vectors/`.
//!
//! Each vector names an operation and its input, the request the client must
//! send, a canned response, and the expected outcome. A recording transport
//! captures the request and replays the response. Comparing parsed JSON (not
//! raw strings) avoids false negatives from field-ordering differences.

use dashboard_core::{
    ApiClient, ApiError, ClientConfig, CreateScenario, HttpBody, HttpMethod, HttpRequest, HttpResponse, HttpStream,
    Organization, Persona, Project, Scenario, Template, Transport, TransportError, UpdatePersona, UseTemplate,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

const BASE_URL: &str = "http://localhost:8000";

/// Answers every request with one canned response and keeps a copy of it.
struct RecordingTransport {
    response: HttpResponse,
    sent: Mutex<Vec<HttpRequest>>,
}

impl Transport for RecordingTransport {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, TransportError>> {
        self.sent.lock().push(request);
        let response = self.response.clone();
        async move { Ok(response) }.boxed()
    }

    fn open_stream(&self, _request: HttpRequest) -> BoxFuture<'static, Result<HttpStream, TransportError>> {
        async { Err(TransportError::new("streams are not part of the vectors")) }.boxed()
    }
}

/// Parse the method string from test vectors into `HttpMethod`.
fn parse_method(s: &str) -> HttpMethod {
    match s {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "PATCH" => HttpMethod::Patch,
        "DELETE" => HttpMethod::Delete,
        other => panic!("unknown method: {other}"),
    }
}

fn to_json<T: serde::Serialize>(result: Result<T, ApiError>) -> Result<Value, ApiError> {
    result.map(|value| serde_json::to_value(value).unwrap())
}

fn id(input: &Value) -> Uuid {
    input.as_str().unwrap().parse().unwrap()
}

async fn run_operation(client: &ApiClient<RecordingTransport>, operation: &str, input: &Value) -> Result<Value, ApiError> {
    match operation {
        "list_projects" => to_json(client.list::<Project>().await),
        "get_template" => to_json(client.get::<Template>(id(input)).await),
        "create_scenario" => {
            let input: CreateScenario = serde_json::from_value(input.clone()).unwrap();
            to_json(client.create::<Scenario>(&input).await)
        }
        "update_persona" => {
            let update: UpdatePersona = serde_json::from_value(input["update"].clone()).unwrap();
            to_json(client.update::<Persona>(id(&input["id"]), &update).await)
        }
        "delete_organization" => to_json(client.delete::<Organization>(id(input)).await),
        "run_simulation" => to_json(client.run_simulation(id(input)).await),
        "use_template" => {
            let options: UseTemplate = serde_json::from_value(input["options"].clone()).unwrap();
            to_json(client.use_template(id(&input["id"]), &options).await)
        }
        "scenarios_for_project" => to_json(client.scenarios_for_project(id(input)).await),
        other => panic!("unknown operation: {other}"),
    }
}

#[tokio::test]
async fn request_test_vectors() {
    let raw = include_str!("../../test-vectors/requests.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let response = HttpResponse {
            status: case["response"]["status"].as_u64().unwrap() as u16,
            headers: Vec::new(),
            body: case["response"]["body"].as_str().unwrap().to_string(),
        };
        let client = ApiClient::with_transport(
            ClientConfig::new(BASE_URL),
            RecordingTransport {
                response,
                sent: Mutex::new(Vec::new()),
            },
        )
        .unwrap();

        let result = run_operation(&client, case["operation"].as_str().unwrap(), &case["input"]).await;

        // Verify the request that went out.
        let sent = client.transport().sent.lock().clone();
        assert_eq!(sent.len(), 1, "{name}: exactly one request");
        let req = &sent[0];
        let expected_req = &case["expected_request"];
        assert_eq!(req.method, parse_method(expected_req["method"].as_str().unwrap()), "{name}: method");
        assert_eq!(req.url, format!("{BASE_URL}{}", expected_req["path"].as_str().unwrap()), "{name}: path");

        let expected_headers: Vec<(String, String)> = expected_req["headers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|h| {
                let arr = h.as_array().unwrap();
                (arr[0].as_str().unwrap().to_string(), arr[1].as_str().unwrap().to_string())
            })
            .collect();
        assert_eq!(req.headers, expected_headers, "{name}: headers");

        match (&req.body, &expected_req["body"]) {
            (None, Value::Null) => {}
            (Some(HttpBody::Json(body)), expected) => {
                let body: Value = serde_json::from_str(body).unwrap();
                assert_eq!(&body, expected, "{name}: body");
            }
            (body, expected) => panic!("{name}: body {body:?} does not match {expected}"),
        }

        // Verify how the response was interpreted.
        let expected = &case["expected"];
        match result {
            Ok(value) => assert_eq!(&value, &expected["ok"], "{name}: result"),
            Err(err) => {
                let expected_err = &expected["error"];
                assert!(!expected_err.is_null(), "{name}: unexpected error {err}");
                assert_eq!(err.status() as u64, expected_err["status"].as_u64().unwrap(), "{name}: status");
                assert_eq!(err.message(), expected_err["message"].as_str().unwrap(), "{name}: message");
            }
        }

        assert_eq!(client.tracked_count(), 0, "{name}: tracking cleared");
    }
}

#[tokio::test]
async fn access_token_is_sent_as_bearer_header() {
    let client = ApiClient::with_transport(
        ClientConfig::new(BASE_URL).with_access_token("abc123"),
        RecordingTransport {
            response: HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: "[]".to_string(),
            },
            sent: Mutex::new(Vec::new()),
        },
    )
    .unwrap();
    let projects = client.list::<Project>().await.unwrap();
    assert!(projects.is_empty());
    let sent = client.transport().sent.lock().clone();
    assert_eq!(sent[0].header("authorization"), Some("Bearer abc123"));
}
