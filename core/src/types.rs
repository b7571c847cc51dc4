//! Domain DTOs for the dashboard API.
//!
//! # Design
//! These mirror the JSON the backend returns but are defined independently
//! of the mock server, which stores records as untyped JSON. The integration
//! tests catch schema drift between the two.
//!
//! Update payloads skip absent fields so a PUT only touches what the caller
//! set.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
    #[serde(default)]
    pub template_id: Option<Uuid>,
    /// Unix seconds.
    #[serde(default)]
    pub created_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProject {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scenario {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScenario {
    pub name: String,
    pub project_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateScenario {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Lifecycle of a simulation run. Statuses this client does not know about
/// decode as `Unknown` rather than failing the whole record.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Simulation {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub scenario_id: Option<Uuid>,
    #[serde(default)]
    pub status: SimulationStatus,
    #[serde(default)]
    pub created_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSimulation {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSimulation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Payload of a `progress` or `complete` event on a simulation stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimulationProgress {
    pub simulation_id: Uuid,
    pub progress: u8,
    #[serde(default)]
    pub status: SimulationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Persona {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePersona {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePersona {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Result of a bulk persona upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonaImport {
    pub file_name: String,
    pub imported: usize,
    pub personas: Vec<Persona>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub created_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrganization {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateOrganization {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A marketplace template that new projects can be started from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub created_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTemplate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTemplate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Options for instantiating a template. Without a name the project takes
/// the template's name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UseTemplate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn update_payload_omits_unset_fields() {
        let update = UpdateProject {
            name: Some("Renamed".to_string()),
            description: None,
        };
        assert_eq!(serde_json::to_value(&update).unwrap(), json!({"name": "Renamed"}));
    }

    #[test]
    fn unknown_simulation_status_does_not_fail_decode() {
        let sim: Simulation = serde_json::from_value(json!({
            "id": "00000000-0000-0000-0000-000000000001",
            "name": "Load test",
            "status": "queued_for_gpu"
        }))
        .unwrap();
        assert_eq!(sim.status, SimulationStatus::Unknown);

        let sim: Simulation = serde_json::from_value(json!({
            "id": "00000000-0000-0000-0000-000000000001",
            "name": "Fresh"
        }))
        .unwrap();
        assert_eq!(sim.status, SimulationStatus::Pending);
    }

    #[test]
    fn project_tolerates_extra_and_missing_optional_fields() {
        let project: Project = serde_json::from_value(json!({
            "id": "00000000-0000-0000-0000-000000000002",
            "name": "Alpha",
            "owner": "someone"
        }))
        .unwrap();
        assert_eq!(project.name, "Alpha");
        assert!(project.description.is_none());
    }

    #[test]
    fn project_requires_name() {
        let result: Result<Project, _> = serde_json::from_value(json!({
            "id": "00000000-0000-0000-0000-000000000002"
        }));
        assert!(result.is_err());
    }
}
