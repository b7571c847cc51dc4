use std::{
    collections::HashMap,
    convert::Infallible,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use axum::{
    extract::{MatchedPath, Multipart, Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::info;
use uuid::Uuid;

/// Collections served with list/create/get/update/delete routes.
pub const COLLECTIONS: [&str; 6] = [
    "projects",
    "scenarios",
    "simulations",
    "personas",
    "organizations",
    "marketplace/templates",
];

pub type Record = Map<String, Value>;

#[derive(Default)]
pub struct Store {
    collections: HashMap<String, Vec<Record>>,
}

impl Store {
    fn records(&self, collection: &str) -> &[Record] {
        self.collections.get(collection).map(Vec::as_slice).unwrap_or(&[])
    }

    fn find(&self, collection: &str, id: Uuid) -> Option<&Record> {
        let id = id.to_string();
        self.records(collection)
            .iter()
            .find(|record| record.get("id").and_then(Value::as_str) == Some(id.as_str()))
    }

    fn find_mut(&mut self, collection: &str, id: Uuid) -> Option<&mut Record> {
        let id = id.to_string();
        self.collections
            .get_mut(collection)?
            .iter_mut()
            .find(|record| record.get("id").and_then(Value::as_str) == Some(id.as_str()))
    }

    fn insert(&mut self, collection: &str, record: Record) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(record);
    }

    fn remove(&mut self, collection: &str, id: Uuid) -> bool {
        let id = id.to_string();
        let Some(records) = self.collections.get_mut(collection) else {
            return false;
        };
        let before = records.len();
        records.retain(|record| record.get("id").and_then(Value::as_str) != Some(id.as_str()));
        records.len() != before
    }
}

pub type Db = Arc<RwLock<Store>>;

/// Error response in the `{"detail": ...}` shape FastAPI uses.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: "Not found".to_string(),
        }
    }

    fn unprocessable(detail: &str) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            detail: detail.to_string(),
        }
    }

    fn bad_request(detail: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Store::default()));
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/simulations/{id}/run", post(run_simulation))
        .route("/simulations/{id}/progress", get(simulation_progress))
        .route("/marketplace/templates/{id}/use", post(use_template))
        .route("/personas/upload", post(upload_personas));
    for collection in COLLECTIONS {
        router = router
            .route(&format!("/{collection}"), get(list_records).post(create_record))
            .route(
                &format!("/{collection}/{{id}}"),
                get(get_record).put(update_record).delete(delete_record),
            );
    }
    router.with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// Collection name from the route that matched, e.g. `/projects/{id}`.
fn collection_of(path: &MatchedPath) -> String {
    path.as_str()
        .trim_start_matches('/')
        .trim_end_matches("/{id}")
        .to_string()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Validate a create payload and stamp server-owned fields.
fn new_record(collection: &str, input: Value) -> ApiResult<Record> {
    let Value::Object(mut record) = input else {
        return Err(ApiError::unprocessable("body must be a JSON object"));
    };
    match record.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => {}
        _ => return Err(ApiError::unprocessable("name is required")),
    }
    if collection == "simulations" {
        record.insert("status".to_string(), json!("pending"));
    }
    record.insert("id".to_string(), json!(Uuid::new_v4()));
    record.insert("created_at".to_string(), json!(now_secs()));
    Ok(record)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_records(
    State(db): State<Db>,
    path: MatchedPath,
    Query(filters): Query<HashMap<String, String>>,
) -> Json<Vec<Record>> {
    let collection = collection_of(&path);
    let store = db.read().await;
    let records = store
        .records(&collection)
        .iter()
        .filter(|record| {
            filters
                .iter()
                .all(|(field, wanted)| record.get(field).and_then(Value::as_str) == Some(wanted.as_str()))
        })
        .cloned()
        .collect();
    Json(records)
}

async fn create_record(
    State(db): State<Db>,
    path: MatchedPath,
    Json(input): Json<Value>,
) -> ApiResult<(StatusCode, Json<Record>)> {
    let collection = collection_of(&path);
    let record = new_record(&collection, input)?;
    info!(%collection, id = ?record.get("id"), "created record");
    db.write().await.insert(&collection, record.clone());
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_record(State(db): State<Db>, path: MatchedPath, Path(id): Path<Uuid>) -> ApiResult<Json<Record>> {
    let collection = collection_of(&path);
    let store = db.read().await;
    store
        .find(&collection, id)
        .cloned()
        .map(Json)
        .ok_or_else(ApiError::not_found)
}

/// Fields present in the body replace stored ones; `id` and `created_at`
/// are server-owned and ignored.
async fn update_record(
    State(db): State<Db>,
    path: MatchedPath,
    Path(id): Path<Uuid>,
    Json(input): Json<Value>,
) -> ApiResult<Json<Record>> {
    let collection = collection_of(&path);
    let Value::Object(fields) = input else {
        return Err(ApiError::unprocessable("body must be a JSON object"));
    };
    let mut store = db.write().await;
    let record = store.find_mut(&collection, id).ok_or_else(ApiError::not_found)?;
    for (field, value) in fields {
        if field != "id" && field != "created_at" {
            record.insert(field, value);
        }
    }
    Ok(Json(record.clone()))
}

async fn delete_record(State(db): State<Db>, path: MatchedPath, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    let collection = collection_of(&path);
    if db.write().await.remove(&collection, id) {
        info!(%collection, %id, "deleted record");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found())
    }
}

async fn run_simulation(State(db): State<Db>, Path(id): Path<Uuid>) -> ApiResult<Json<Record>> {
    let mut store = db.write().await;
    let record = store.find_mut("simulations", id).ok_or_else(ApiError::not_found)?;
    record.insert("status".to_string(), json!("running"));
    info!(%id, "simulation started");
    Ok(Json(record.clone()))
}

const PROGRESS_STEP: u8 = 25;

async fn simulation_progress(
    State(db): State<Db>,
    Path(id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if db.read().await.find("simulations", id).is_none() {
        return Err(ApiError::not_found());
    }
    let mut events: Vec<Event> = (0..=100u8)
        .step_by(PROGRESS_STEP as usize)
        .map(|progress| {
            Event::default()
                .event("progress")
                .id(progress.to_string())
                .data(json!({ "simulation_id": id, "progress": progress, "status": "running" }).to_string())
        })
        .collect();
    events.push(
        Event::default()
            .event("complete")
            .data(json!({ "simulation_id": id, "progress": 100, "status": "completed" }).to_string()),
    );
    Ok(Sse::new(stream::iter(events.into_iter().map(Ok))))
}

#[derive(Deserialize)]
struct UseTemplate {
    name: Option<String>,
    organization_id: Option<Uuid>,
}

async fn use_template(
    State(db): State<Db>,
    Path(id): Path<Uuid>,
    Json(input): Json<UseTemplate>,
) -> ApiResult<(StatusCode, Json<Record>)> {
    let mut store = db.write().await;
    let template = store
        .find("marketplace/templates", id)
        .cloned()
        .ok_or_else(ApiError::not_found)?;
    let name = input
        .name
        .map(Value::String)
        .or_else(|| template.get("name").cloned())
        .unwrap_or(Value::Null);
    let mut body = json!({ "name": name, "template_id": id });
    if let Some(description) = template.get("description") {
        body["description"] = description.clone();
    }
    if let Some(organization_id) = input.organization_id {
        body["organization_id"] = json!(organization_id);
    }
    let project = new_record("projects", body)?;
    store.insert("projects", project.clone());
    info!(template = %id, "project created from template");
    Ok((StatusCode::CREATED, Json(project)))
}

/// One persona per non-empty line of the uploaded `file` field.
async fn upload_personas(State(db): State<Db>, mut multipart: Multipart) -> ApiResult<(StatusCode, Json<Value>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("personas.txt").to_string();
        let text = field.text().await.map_err(|e| ApiError::bad_request(e.to_string()))?;

        let mut store = db.write().await;
        let mut personas = Vec::new();
        for name in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let persona = new_record("personas", json!({ "name": name }))?;
            store.insert("personas", persona.clone());
            personas.push(persona);
        }
        info!(%file_name, imported = personas.len(), "personas uploaded");
        return Ok((
            StatusCode::CREATED,
            Json(json!({ "file_name": file_name, "imported": personas.len(), "personas": personas })),
        ));
    }
    Err(ApiError::unprocessable("file field is required"))
}
