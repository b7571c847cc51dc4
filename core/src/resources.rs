//! Typed endpoints for the dashboard's REST collections.
//!
//! Every collection follows the same shape: `GET /{path}`, `POST /{path}`,
//! `GET|PUT|DELETE /{path}/{id}`. The `Resource` trait ties a record type to
//! its path and payload types so the CRUD calls are written once. Reads go
//! through the deduplicating path; writes always issue their own call.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use url::form_urlencoded;
use uuid::Uuid;

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::http::{FormPart, HttpMethod, RequestOptions};
use crate::sse::EventStream;
use crate::transport::Transport;
use crate::types::{
    CreateOrganization, CreatePersona, CreateProject, CreateScenario, CreateSimulation, CreateTemplate,
    Organization, Persona, PersonaImport, Project, Scenario, Simulation, Template, UpdateOrganization,
    UpdatePersona, UpdateProject, UpdateScenario, UpdateSimulation, UpdateTemplate, UseTemplate,
};

pub trait Resource: DeserializeOwned {
    /// Collection path, with a leading slash.
    const PATH: &'static str;
    type Create: Serialize;
    type Update: Serialize;
}

impl Resource for Project {
    const PATH: &'static str = "/projects";
    type Create = CreateProject;
    type Update = UpdateProject;
}

impl Resource for Scenario {
    const PATH: &'static str = "/scenarios";
    type Create = CreateScenario;
    type Update = UpdateScenario;
}

impl Resource for Simulation {
    const PATH: &'static str = "/simulations";
    type Create = CreateSimulation;
    type Update = UpdateSimulation;
}

impl Resource for Persona {
    const PATH: &'static str = "/personas";
    type Create = CreatePersona;
    type Update = UpdatePersona;
}

impl Resource for Organization {
    const PATH: &'static str = "/organizations";
    type Create = CreateOrganization;
    type Update = UpdateOrganization;
}

impl Resource for Template {
    const PATH: &'static str = "/marketplace/templates";
    type Create = CreateTemplate;
    type Update = UpdateTemplate;
}

fn to_body<S: Serialize>(input: &S) -> Result<Value, ApiError> {
    serde_json::to_value(input).map_err(|e| ApiError::Serialization(e.to_string()))
}

fn item_path<R: Resource>(id: Uuid) -> String {
    format!("{}/{id}", R::PATH)
}

impl<T: Transport> ApiClient<T> {
    pub async fn list<R: Resource>(&self) -> Result<Vec<R>, ApiError> {
        self.request_json(R::PATH, RequestOptions::get()).await
    }

    /// List with query-string filters, e.g. `[("project_id", id)]`.
    pub async fn list_where<R: Resource>(&self, query: &[(&str, &str)]) -> Result<Vec<R>, ApiError> {
        if query.is_empty() {
            return self.list().await;
        }
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query)
            .finish();
        let endpoint = format!("{}?{encoded}", R::PATH);
        self.request_json(&endpoint, RequestOptions::get()).await
    }

    pub async fn get<R: Resource>(&self, id: Uuid) -> Result<R, ApiError> {
        self.request_json(&item_path::<R>(id), RequestOptions::get()).await
    }

    pub async fn create<R: Resource>(&self, input: &R::Create) -> Result<R, ApiError> {
        let body = to_body(input)?;
        self.request_json(R::PATH, RequestOptions::post(body)).await
    }

    pub async fn update<R: Resource>(&self, id: Uuid, input: &R::Update) -> Result<R, ApiError> {
        let body = to_body(input)?;
        self.request_json(&item_path::<R>(id), RequestOptions::put(body)).await
    }

    pub async fn delete<R: Resource>(&self, id: Uuid) -> Result<(), ApiError> {
        self.request(&item_path::<R>(id), RequestOptions::delete()).await?;
        Ok(())
    }

    pub async fn scenarios_for_project(&self, project_id: Uuid) -> Result<Vec<Scenario>, ApiError> {
        let project_id = project_id.to_string();
        self.list_where(&[("project_id", project_id.as_str())]).await
    }

    pub async fn run_simulation(&self, id: Uuid) -> Result<Simulation, ApiError> {
        let endpoint = format!("{}/run", item_path::<Simulation>(id));
        self.request_json(&endpoint, RequestOptions::with_method(HttpMethod::Post))
            .await
    }

    /// Stream `progress` events for a running simulation, ending with a
    /// `complete` event.
    pub async fn simulation_progress(&self, id: Uuid) -> Result<EventStream, ApiError> {
        self.events(&format!("{}/progress", item_path::<Simulation>(id)))
            .await
    }

    /// Start a new project from a marketplace template.
    pub async fn use_template(&self, id: Uuid, input: &UseTemplate) -> Result<Project, ApiError> {
        let body = to_body(input)?;
        let endpoint = format!("{}/use", item_path::<Template>(id));
        self.request_json(&endpoint, RequestOptions::post(body)).await
    }

    /// Bulk-create personas from a text file with one name per line.
    pub async fn upload_personas(&self, file_name: &str, contents: Vec<u8>) -> Result<PersonaImport, ApiError> {
        let part = FormPart::file("file", file_name, contents).with_content_type("text/plain");
        let value = self
            .upload(&format!("{}/upload", Persona::PATH), vec![part])
            .await?;
        serde_json::from_value(value).map_err(|e| ApiError::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_paths_nest_under_collection() {
        let id = Uuid::nil();
        assert_eq!(
            item_path::<Template>(id),
            "/marketplace/templates/00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(item_path::<Project>(id), "/projects/00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn create_body_skips_unset_optionals() {
        let body = to_body(&CreateProject {
            name: "Alpha".to_string(),
            description: None,
            organization_id: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"name": "Alpha"}));
    }
}
