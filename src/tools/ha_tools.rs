//! Tools over the smart-home controller (§4.E, §6). Grounded on
//! `tools/ha_tools.py`: entity/state queries, service calls, and
//! automation CRUD survive near-verbatim; script, scene, helper, and
//! entity-registry tools are supplemented by analogy (the original only
//! implements the automation class, but exposes the same
//! `config/<class>/config/{id}` surface for all four — see `ha/api.py`).

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::controller::ControllerApiClient;

use super::Tool;

fn to_yaml(value: &Value) -> String {
    serde_yaml::to_string(value).unwrap_or_else(|_| value.to_string())
}

/// Prefixes `id` with `automation.` (etc.) unless already present.
fn qualify(entity_id: &str, domain: &str) -> String {
    let prefix = format!("{domain}.");
    if entity_id.starts_with(&prefix) {
        entity_id.to_string()
    } else {
        format!("{prefix}{entity_id}")
    }
}

pub struct GetEntitiesTool {
    api: Arc<ControllerApiClient>,
}

impl GetEntitiesTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for GetEntitiesTool {
    fn name(&self) -> &str {
        "get_entities"
    }

    fn description(&self) -> &str {
        "List entities in the smart-home controller. Can filter by domain (e.g., 'light', \
         'automation', 'switch'). Returns entity IDs, states, and friendly names."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "domain": {"type": "string", "description": "Filter by domain (e.g., 'light', 'automation', 'switch', 'sensor'). Leave empty for all entities."},
                "search": {"type": "string", "description": "Search term to filter entity IDs or friendly names."},
            },
            "required": [],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let domain = arguments.get("domain").and_then(Value::as_str).unwrap_or("").to_lowercase();
        let search = arguments.get("search").and_then(Value::as_str).unwrap_or("").to_lowercase();

        let mut states = self.api.get_states().await.map_err(|e| e.to_string())?;

        if !domain.is_empty() {
            let prefix = format!("{domain}.");
            states.retain(|s| s.entity_id.starts_with(&prefix));
        }
        if !search.is_empty() {
            states.retain(|s| s.entity_id.to_lowercase().contains(&search) || s.friendly_name().to_lowercase().contains(&search));
        }

        if states.is_empty() {
            return Ok("No entities found matching the criteria.".to_string());
        }

        let total = states.len();
        let results: Vec<String> = states
            .iter()
            .take(50)
            .map(|s| {
                let name = s.friendly_name();
                let name_part = if name != s.entity_id { format!(" ({name})") } else { String::new() };
                format!("- {}{}: {}", s.entity_id, name_part, s.state)
            })
            .collect();

        let mut output = format!("Found {total} entities");
        if total > 50 {
            output.push_str(" (showing first 50)");
        }
        output.push_str(":\n");
        output.push_str(&results.join("\n"));
        Ok(output)
    }
}

pub struct GetEntityStateTool {
    api: Arc<ControllerApiClient>,
}

impl GetEntityStateTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for GetEntityStateTool {
    fn name(&self) -> &str {
        "get_entity_state"
    }

    fn description(&self) -> &str {
        "Get the current state and attributes of a specific entity. Use this to check the \
         detailed state of lights, sensors, automations, etc."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "entity_id": {"type": "string", "description": "The entity ID (e.g., 'light.bedroom', 'automation.motion_lights')."},
            },
            "required": ["entity_id"],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let entity_id = arguments.get("entity_id").and_then(Value::as_str).unwrap_or("");
        if entity_id.is_empty() {
            return Ok("Error: entity_id is required.".to_string());
        }

        let state = self.api.get_state(entity_id).await.map_err(|e| e.to_string())?;

        let mut result = format!("Entity: {}\nState: {}\nLast Changed: {}\n", state.entity_id, state.state, state.last_changed);
        if let Some(attrs) = state.attributes.as_object() {
            if !attrs.is_empty() {
                result.push_str("Attributes:\n");
                for (key, value) in attrs {
                    result.push_str(&format!("  {key}: {value}\n"));
                }
            }
        }
        Ok(result)
    }
}

pub struct CallServiceTool {
    api: Arc<ControllerApiClient>,
}

impl CallServiceTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for CallServiceTool {
    fn name(&self) -> &str {
        "call_service"
    }

    fn description(&self) -> &str {
        "Call a service on the smart-home controller. Use this to control devices, trigger \
         automations, etc. Examples: turn on lights, run scripts, enable/disable automations."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "domain": {"type": "string", "description": "Service domain (e.g., 'light', 'automation', 'switch', 'script')."},
                "service": {"type": "string", "description": "Service name (e.g., 'turn_on', 'turn_off', 'toggle', 'trigger')."},
                "entity_id": {"type": "string", "description": "Target entity ID (e.g., 'light.bedroom')."},
                "service_data": {"type": "object", "description": "Additional service data (e.g., {'brightness': 255} for lights)."},
            },
            "required": ["domain", "service"],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let domain = arguments.get("domain").and_then(Value::as_str).unwrap_or("");
        let service = arguments.get("service").and_then(Value::as_str).unwrap_or("");
        let entity_id = arguments.get("entity_id").and_then(Value::as_str);
        let service_data = arguments.get("service_data");

        if domain.is_empty() || service.is_empty() {
            return Ok("Error: domain and service are required.".to_string());
        }

        let target = entity_id.map(|id| serde_json::json!({"entity_id": id}));

        let result = self
            .api
            .call_service(domain, service, service_data, target.as_ref())
            .await
            .map_err(|e| e.to_string())?;

        if result.is_empty() {
            Ok(format!("Service {domain}.{service} called successfully."))
        } else {
            let states: Vec<String> = result.iter().map(|s| format!("{}: {}", s.entity_id, s.state)).collect();
            Ok(format!("Service {domain}.{service} called successfully. Affected entities:\n{}", states.join("\n")))
        }
    }
}

pub struct GetAutomationsTool {
    api: Arc<ControllerApiClient>,
}

impl GetAutomationsTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for GetAutomationsTool {
    fn name(&self) -> &str {
        "get_automations"
    }

    fn description(&self) -> &str {
        "List all automations with their current state (on/off) and last triggered time. Use \
         this to see what automations exist and their status."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"search": {"type": "string", "description": "Search term to filter automation names or IDs."}},
            "required": [],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let search = arguments.get("search").and_then(Value::as_str).unwrap_or("").to_lowercase();

        let states = self.api.get_states().await.map_err(|e| e.to_string())?;
        let mut automations: Vec<_> = states.into_iter().filter(|s| s.entity_id.starts_with("automation.")).collect();
        if !search.is_empty() {
            automations.retain(|a| a.entity_id.to_lowercase().contains(&search) || a.friendly_name().to_lowercase().contains(&search));
        }

        if automations.is_empty() {
            return Ok("No automations found matching the criteria.".to_string());
        }

        let mut results = Vec::new();
        for auto in &automations {
            let last_triggered = auto.attributes.get("last_triggered").and_then(Value::as_str).unwrap_or("Never");
            let status = if auto.state == "on" { "ON" } else { "OFF" };
            results.push(format!("- [{status}] {} ({})", auto.friendly_name(), auto.entity_id));
            results.push(format!("    Last triggered: {last_triggered}"));
        }

        Ok(format!("Found {} automations:\n{}", automations.len(), results.join("\n")))
    }
}

pub struct GetErrorLogTool {
    api: Arc<ControllerApiClient>,
}

impl GetErrorLogTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for GetErrorLogTool {
    fn name(&self) -> &str {
        "get_error_log"
    }

    fn description(&self) -> &str {
        "Get the controller's error log. Shows recent errors and warnings. Use this to \
         diagnose issues and troubleshoot problems."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"lines": {"type": "integer", "description": "Number of lines to return (default 50, max 200)."}},
            "required": [],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let lines = arguments.get("lines").and_then(Value::as_u64).unwrap_or(50).min(200) as usize;

        let log = self.api.get_error_log().await.map_err(|e| e.to_string())?;
        let trimmed = log.trim();
        let mut log_lines: Vec<&str> = trimmed.split('\n').collect();
        if log_lines.len() > lines {
            log_lines = log_lines.split_off(log_lines.len() - lines);
        }

        if log_lines.is_empty() || (log_lines.len() == 1 && log_lines[0].is_empty()) {
            return Ok("No errors in log.".to_string());
        }

        Ok(format!("Error log (last {} lines):\n{}", log_lines.len(), log_lines.join("\n")))
    }
}

pub struct GetServicesTool {
    api: Arc<ControllerApiClient>,
}

impl GetServicesTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for GetServicesTool {
    fn name(&self) -> &str {
        "get_services"
    }

    fn description(&self) -> &str {
        "List available services for a domain. Shows what actions can be performed. Use this \
         to discover what services are available for a specific integration."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"domain": {"type": "string", "description": "Service domain to list (e.g., 'light', 'automation', 'switch'). Leave empty to list all domains."}},
            "required": [],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let domain_filter = arguments.get("domain").and_then(Value::as_str).unwrap_or("").to_lowercase();

        let services = self.api.get_services().await.map_err(|e| e.to_string())?;
        let filtered: Vec<_> = if domain_filter.is_empty() {
            services.iter().collect()
        } else {
            services.iter().filter(|s| s.domain == domain_filter).collect()
        };

        if filtered.is_empty() {
            return Ok(if domain_filter.is_empty() {
                "No services found.".to_string()
            } else {
                format!("No services found for domain '{domain_filter}'.")
            });
        }

        let mut by_domain: Vec<(&str, Vec<&crate::controller::Service>)> = Vec::new();
        for svc in filtered {
            if let Some(entry) = by_domain.iter_mut().find(|(d, _)| *d == svc.domain) {
                entry.1.push(svc);
            } else {
                by_domain.push((svc.domain.as_str(), vec![svc]));
            }
        }
        by_domain.sort_by_key(|(d, _)| d.to_string());

        let mut results = Vec::new();
        for (domain, svcs) in by_domain {
            if !domain_filter.is_empty() || svcs.len() <= 5 {
                results.push(format!("\n{domain}:"));
                for svc in svcs {
                    let desc = if svc.description.len() > 80 { format!("{}...", &svc.description[..80]) } else { svc.description.clone() };
                    results.push(format!("  - {}: {desc}", svc.name));
                }
            } else {
                results.push(format!("{domain}: {} services", svcs.len()));
            }
        }

        Ok(format!("Available services:\n{}", results.join("\n")))
    }
}

pub struct GetLogbookTool {
    api: Arc<ControllerApiClient>,
}

impl GetLogbookTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for GetLogbookTool {
    fn name(&self) -> &str {
        "get_logbook"
    }

    fn description(&self) -> &str {
        "Get recent logbook entries showing what happened with entities. Use this to see the \
         history of state changes and events."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "entity_id": {"type": "string", "description": "Filter by entity ID (optional)."},
                "hours": {"type": "integer", "description": "How many hours of history to retrieve (default 24, max 168)."},
            },
            "required": [],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let entity_id = arguments.get("entity_id").and_then(Value::as_str);
        let hours = arguments.get("hours").and_then(Value::as_i64).unwrap_or(24).min(168);

        let start_time = (chrono::Utc::now() - chrono::Duration::hours(hours)).to_rfc3339();
        let entries = self.api.get_logbook(entity_id, Some(&start_time), None).await.map_err(|e| e.to_string())?;
        let entries = entries.as_array().cloned().unwrap_or_default();

        if entries.is_empty() {
            return Ok("No logbook entries found for the specified criteria.".to_string());
        }

        let limited: Vec<&Value> = entries.iter().take(50).collect();
        let results: Vec<String> = limited
            .iter()
            .map(|entry| {
                let when = entry.get("when").and_then(Value::as_str).unwrap_or("");
                let when = &when[..when.len().min(19)];
                let name = entry.get("name").and_then(Value::as_str).unwrap_or("Unknown");
                let message = entry
                    .get("message")
                    .and_then(Value::as_str)
                    .or_else(|| entry.get("state").and_then(Value::as_str))
                    .unwrap_or("");
                format!("[{when}] {name}: {message}")
            })
            .collect();

        let mut output = format!("Logbook entries (last {hours} hours");
        if let Some(id) = entity_id {
            output.push_str(&format!(", entity: {id}"));
        }
        output.push_str("):\n");
        output.push_str(&results.join("\n"));
        if entries.len() >= 50 {
            output.push_str("\n\n(Results limited to 50 entries)");
        }
        Ok(output)
    }
}

/// Shared automation/script/scene CRUD logic: all three classes expose the
/// same `config/<class>/config/{internal_id}` surface, keyed off the
/// entity's `id` attribute rather than its entity id (§6).
async fn get_object_config(api: &ControllerApiClient, class: &str, domain: &str, entity_id: &str) -> Result<String, String> {
    let entity_id = qualify(entity_id, domain);
    let state = api.get_state(&entity_id).await.map_err(|e| e.to_string())?;
    let Some(internal_id) = state.attributes.get("id").and_then(Value::as_str) else {
        return Ok(format!(
            "Error: '{entity_id}' does not have an internal ID. This usually means it was created via \
             YAML files instead of the UI. Only UI-created {class}s can be retrieved through this API."
        ));
    };

    let config = api.get_object_config(class, internal_id).await.map_err(|e| e.to_string())?;
    Ok(format!("{class} configuration for '{entity_id}' (internal ID: {internal_id}):\n\n```yaml\n{}```", to_yaml(&config)))
}

async fn create_object(api: &ControllerApiClient, class: &str, object_id: &str, config: &Value) -> Result<String, String> {
    api.create_or_update_object(class, object_id, config).await.map_err(|e| e.to_string())?;
    api.call_service(class, "reload", None, None).await.map_err(|e| e.to_string())?;
    Ok(format!("{class}.{object_id} created successfully!\n\n```yaml\n{}```", to_yaml(config)))
}

async fn update_object(api: &ControllerApiClient, class: &str, domain: &str, entity_id: &str, config: &Value) -> Result<String, String> {
    let entity_id = qualify(entity_id, domain);
    let state = api.get_state(&entity_id).await.map_err(|e| e.to_string())?;
    let Some(internal_id) = state.attributes.get("id").and_then(Value::as_str) else {
        return Ok(format!(
            "Error: '{entity_id}' does not have an internal ID. Only UI-created {class}s can be updated through this API."
        ));
    };

    api.create_or_update_object(class, internal_id, config).await.map_err(|e| e.to_string())?;
    api.call_service(class, "reload", None, None).await.map_err(|e| e.to_string())?;
    Ok(format!("'{entity_id}' updated successfully!\n\n```yaml\n{}```", to_yaml(config)))
}

async fn delete_object(api: &ControllerApiClient, class: &str, domain: &str, entity_id: &str) -> Result<String, String> {
    let entity_id = qualify(entity_id, domain);
    let state = api.get_state(&entity_id).await.map_err(|e| e.to_string())?;
    let Some(internal_id) = state.attributes.get("id").and_then(Value::as_str) else {
        return Ok(format!(
            "Error: '{entity_id}' does not have an internal ID. Only UI-created {class}s can be deleted through this API."
        ));
    };

    api.delete_object(class, internal_id).await.map_err(|e| e.to_string())?;
    api.call_service(class, "reload", None, None).await.map_err(|e| e.to_string())?;
    Ok(format!("'{entity_id}' deleted successfully."))
}

pub struct GetAutomationConfigTool {
    api: Arc<ControllerApiClient>,
}

impl GetAutomationConfigTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for GetAutomationConfigTool {
    fn name(&self) -> &str {
        "get_automation_config"
    }

    fn description(&self) -> &str {
        "Get the full configuration of an automation. Use this to see the triggers, \
         conditions, and actions of an automation before modifying it."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"entity_id": {"type": "string", "description": "The automation entity ID (e.g., 'automation.motion_lights')."}},
            "required": ["entity_id"],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let entity_id = arguments.get("entity_id").and_then(Value::as_str).unwrap_or("");
        if entity_id.is_empty() {
            return Ok("Error: entity_id is required.".to_string());
        }
        get_object_config(&self.api, "automation", "automation", entity_id).await
    }
}

pub struct CreateAutomationTool {
    api: Arc<ControllerApiClient>,
}

impl CreateAutomationTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for CreateAutomationTool {
    fn name(&self) -> &str {
        "create_automation"
    }

    fn description(&self) -> &str {
        "Create a new automation. Provide the automation ID and full configuration including \
         alias, triggers, conditions, and actions."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "automation_id": {"type": "string", "description": "Unique ID for the automation (lowercase, underscores, e.g., 'bedroom_motion_light')."},
                "alias": {"type": "string", "description": "Human-readable name for the automation."},
                "description": {"type": "string", "description": "Description of what the automation does."},
                "trigger": {"type": "array", "description": "List of triggers."},
                "condition": {"type": "array", "description": "List of conditions (optional)."},
                "action": {"type": "array", "description": "List of actions."},
                "mode": {"type": "string", "description": "Automation mode: 'single', 'restart', 'queued', or 'parallel'. Default is 'single'."},
            },
            "required": ["automation_id", "alias", "trigger", "action"],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let automation_id = arguments.get("automation_id").and_then(Value::as_str).unwrap_or("");
        let alias = arguments.get("alias").and_then(Value::as_str).unwrap_or("");
        let trigger = arguments.get("trigger");
        let action = arguments.get("action");

        if automation_id.is_empty() || alias.is_empty() || trigger.is_none() || action.is_none() {
            return Ok("Error: automation_id, alias, trigger, and action are required.".to_string());
        }

        let mut config = serde_json::json!({
            "alias": alias,
            "trigger": trigger,
            "action": action,
            "mode": arguments.get("mode").and_then(Value::as_str).unwrap_or("single"),
        });
        if let Some(desc) = arguments.get("description").and_then(Value::as_str) {
            config["description"] = Value::String(desc.to_string());
        }
        if let Some(cond) = arguments.get("condition") {
            config["condition"] = cond.clone();
        }

        create_object(&self.api, "automation", automation_id, &config).await
    }
}

pub struct UpdateAutomationTool {
    api: Arc<ControllerApiClient>,
}

impl UpdateAutomationTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for UpdateAutomationTool {
    fn name(&self) -> &str {
        "update_automation"
    }

    fn description(&self) -> &str {
        "Update an existing automation. First use get_automation_config to see the current \
         config, then provide the full updated configuration."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "entity_id": {"type": "string", "description": "The automation entity ID to update."},
                "config": {"type": "object", "description": "Full automation configuration (alias, trigger, condition, action, mode)."},
            },
            "required": ["entity_id", "config"],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let entity_id = arguments.get("entity_id").and_then(Value::as_str).unwrap_or("");
        let config = arguments.get("config").cloned().unwrap_or(Value::Null);

        if entity_id.is_empty() || !config.is_object() {
            return Ok("Error: entity_id and config are required.".to_string());
        }
        let required = ["alias", "trigger", "action"];
        if !required.iter().all(|k| config.get(k).is_some()) {
            return Ok("Error: config must include at least 'alias', 'trigger', and 'action'.".to_string());
        }

        update_object(&self.api, "automation", "automation", entity_id, &config).await
    }
}

pub struct DeleteAutomationTool {
    api: Arc<ControllerApiClient>,
}

impl DeleteAutomationTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for DeleteAutomationTool {
    fn name(&self) -> &str {
        "delete_automation"
    }

    fn description(&self) -> &str {
        "Delete an automation. This permanently removes it. Use with caution."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"entity_id": {"type": "string", "description": "The automation entity ID to delete."}},
            "required": ["entity_id"],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let entity_id = arguments.get("entity_id").and_then(Value::as_str).unwrap_or("");
        if entity_id.is_empty() {
            return Ok("Error: entity_id is required.".to_string());
        }
        delete_object(&self.api, "automation", "automation", entity_id).await
    }
}

macro_rules! simple_config_class_tools {
    ($get_name:ident, $create_name:ident, $update_name:ident, $delete_name:ident, $class:literal, $tool_prefix:literal, $noun:literal) => {
        pub struct $get_name {
            api: Arc<ControllerApiClient>,
        }

        impl $get_name {
            pub fn new(api: Arc<ControllerApiClient>) -> Self {
                Self { api }
            }
        }

        #[async_trait]
        impl Tool for $get_name {
            fn name(&self) -> &str {
                concat!("get_", $tool_prefix, "_config")
            }

            fn description(&self) -> &str {
                concat!("Get the full configuration of a ", $noun, ".")
            }

            fn parameters(&self) -> Value {
                serde_json::json!({
                    "type": "object",
                    "properties": {"entity_id": {"type": "string", "description": concat!("The ", $noun, " entity ID.")}},
                    "required": ["entity_id"],
                })
            }

            async fn execute(&self, arguments: Value) -> Result<String, String> {
                let entity_id = arguments.get("entity_id").and_then(Value::as_str).unwrap_or("");
                if entity_id.is_empty() {
                    return Ok("Error: entity_id is required.".to_string());
                }
                get_object_config(&self.api, $class, $class, entity_id).await
            }
        }

        pub struct $create_name {
            api: Arc<ControllerApiClient>,
        }

        impl $create_name {
            pub fn new(api: Arc<ControllerApiClient>) -> Self {
                Self { api }
            }
        }

        #[async_trait]
        impl Tool for $create_name {
            fn name(&self) -> &str {
                concat!("create_", $tool_prefix)
            }

            fn description(&self) -> &str {
                concat!("Create a new ", $noun, ". Provide its ID and full configuration.")
            }

            fn parameters(&self) -> Value {
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "object_id": {"type": "string", "description": concat!("Unique ID for the ", $noun, " (lowercase, underscores).")},
                        "config": {"type": "object", "description": "Full configuration object."},
                    },
                    "required": ["object_id", "config"],
                })
            }

            async fn execute(&self, arguments: Value) -> Result<String, String> {
                let object_id = arguments.get("object_id").and_then(Value::as_str).unwrap_or("");
                let config = arguments.get("config").cloned().unwrap_or(Value::Null);
                if object_id.is_empty() || !config.is_object() {
                    return Ok("Error: object_id and config are required.".to_string());
                }
                create_object(&self.api, $class, object_id, &config).await
            }
        }

        pub struct $update_name {
            api: Arc<ControllerApiClient>,
        }

        impl $update_name {
            pub fn new(api: Arc<ControllerApiClient>) -> Self {
                Self { api }
            }
        }

        #[async_trait]
        impl Tool for $update_name {
            fn name(&self) -> &str {
                concat!("update_", $tool_prefix)
            }

            fn description(&self) -> &str {
                concat!("Update an existing ", $noun, "'s full configuration.")
            }

            fn parameters(&self) -> Value {
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "entity_id": {"type": "string", "description": concat!("The ", $noun, " entity ID to update.")},
                        "config": {"type": "object", "description": "Full replacement configuration object."},
                    },
                    "required": ["entity_id", "config"],
                })
            }

            async fn execute(&self, arguments: Value) -> Result<String, String> {
                let entity_id = arguments.get("entity_id").and_then(Value::as_str).unwrap_or("");
                let config = arguments.get("config").cloned().unwrap_or(Value::Null);
                if entity_id.is_empty() || !config.is_object() {
                    return Ok("Error: entity_id and config are required.".to_string());
                }
                update_object(&self.api, $class, $class, entity_id, &config).await
            }
        }

        pub struct $delete_name {
            api: Arc<ControllerApiClient>,
        }

        impl $delete_name {
            pub fn new(api: Arc<ControllerApiClient>) -> Self {
                Self { api }
            }
        }

        #[async_trait]
        impl Tool for $delete_name {
            fn name(&self) -> &str {
                concat!("delete_", $tool_prefix)
            }

            fn description(&self) -> &str {
                concat!("Delete a ", $noun, ". This permanently removes it. Use with caution.")
            }

            fn parameters(&self) -> Value {
                serde_json::json!({
                    "type": "object",
                    "properties": {"entity_id": {"type": "string", "description": concat!("The ", $noun, " entity ID to delete.")}},
                    "required": ["entity_id"],
                })
            }

            async fn execute(&self, arguments: Value) -> Result<String, String> {
                let entity_id = arguments.get("entity_id").and_then(Value::as_str).unwrap_or("");
                if entity_id.is_empty() {
                    return Ok("Error: entity_id is required.".to_string());
                }
                delete_object(&self.api, $class, $class, entity_id).await
            }
        }
    };
}

simple_config_class_tools!(GetScriptConfigTool, CreateScriptTool, UpdateScriptTool, DeleteScriptTool, "script", "script", "script");
simple_config_class_tools!(GetSceneConfigTool, CreateSceneTool, UpdateSceneTool, DeleteSceneTool, "scene", "scene", "scene");

pub struct GetScriptsTool {
    api: Arc<ControllerApiClient>,
}

impl GetScriptsTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for GetScriptsTool {
    fn name(&self) -> &str {
        "get_scripts"
    }

    fn description(&self) -> &str {
        "List all scripts with their current state (on/off, idle/running)."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {"search": {"type": "string", "description": "Search term."}}, "required": []})
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        list_domain_entities(&self.api, "script", arguments.get("search").and_then(Value::as_str)).await
    }
}

pub struct GetScenesTool {
    api: Arc<ControllerApiClient>,
}

impl GetScenesTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for GetScenesTool {
    fn name(&self) -> &str {
        "get_scenes"
    }

    fn description(&self) -> &str {
        "List all scenes."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {"search": {"type": "string", "description": "Search term."}}, "required": []})
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        list_domain_entities(&self.api, "scene", arguments.get("search").and_then(Value::as_str)).await
    }
}

async fn list_domain_entities(api: &ControllerApiClient, domain: &str, search: Option<&str>) -> Result<String, String> {
    let search = search.unwrap_or("").to_lowercase();
    let states = api.get_states().await.map_err(|e| e.to_string())?;
    let prefix = format!("{domain}.");
    let mut matched: Vec<_> = states.into_iter().filter(|s| s.entity_id.starts_with(&prefix)).collect();
    if !search.is_empty() {
        matched.retain(|s| s.entity_id.to_lowercase().contains(&search) || s.friendly_name().to_lowercase().contains(&search));
    }
    if matched.is_empty() {
        return Ok(format!("No {domain}s found matching the criteria."));
    }
    let results: Vec<String> = matched.iter().map(|s| format!("- {} ({}): {}", s.friendly_name(), s.entity_id, s.state)).collect();
    Ok(format!("Found {} {domain}s:\n{}", matched.len(), results.join("\n")))
}

/// `input_boolean`, `input_number`, `input_text`, etc. — helper entities
/// don't share the automation/script/scene config surface, so they're
/// listed by domain rather than CRUD'd individually (§6, supplemented).
pub struct GetHelpersTool {
    api: Arc<ControllerApiClient>,
}

impl GetHelpersTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for GetHelpersTool {
    fn name(&self) -> &str {
        "get_helpers"
    }

    fn description(&self) -> &str {
        "List helper entities (input_boolean, input_number, input_text, input_select, \
         counter, timer). Use this to see what helpers exist for use in automations."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {"search": {"type": "string", "description": "Search term."}}, "required": []})
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        const HELPER_DOMAINS: &[&str] = &["input_boolean", "input_number", "input_text", "input_select", "counter", "timer"];
        let search = arguments.get("search").and_then(Value::as_str).unwrap_or("").to_lowercase();

        let states = self.api.get_states().await.map_err(|e| e.to_string())?;
        let mut matched: Vec<_> = states.into_iter().filter(|s| HELPER_DOMAINS.iter().any(|d| s.domain() == *d)).collect();
        if !search.is_empty() {
            matched.retain(|s| s.entity_id.to_lowercase().contains(&search) || s.friendly_name().to_lowercase().contains(&search));
        }
        if matched.is_empty() {
            return Ok("No helpers found matching the criteria.".to_string());
        }
        let results: Vec<String> = matched.iter().map(|s| format!("- {} ({}): {}", s.friendly_name(), s.entity_id, s.state)).collect();
        Ok(format!("Found {} helpers:\n{}", matched.len(), results.join("\n")))
    }
}

pub struct CreateHelperTool {
    api: Arc<ControllerApiClient>,
}

impl CreateHelperTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for CreateHelperTool {
    fn name(&self) -> &str {
        "create_helper"
    }

    fn description(&self) -> &str {
        "Create a new helper entity (input_boolean, input_number, input_text, input_select, \
         counter, or timer)."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "helper_type": {"type": "string", "enum": ["input_boolean", "input_number", "input_text", "input_select", "counter", "timer"], "description": "Helper domain."},
                "helper_id": {"type": "string", "description": "Unique ID for the helper (lowercase, underscores)."},
                "config": {"type": "object", "description": "Configuration (name, and any domain-specific fields like min/max for input_number)."},
            },
            "required": ["helper_type", "helper_id", "config"],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let helper_type = arguments.get("helper_type").and_then(Value::as_str).unwrap_or("");
        let helper_id = arguments.get("helper_id").and_then(Value::as_str).unwrap_or("");
        let config = arguments.get("config").cloned().unwrap_or(Value::Null);

        if helper_type.is_empty() || helper_id.is_empty() || !config.is_object() {
            return Ok("Error: helper_type, helper_id, and config are required.".to_string());
        }

        create_object(&self.api, helper_type, helper_id, &config).await
    }
}

pub struct DeleteHelperTool {
    api: Arc<ControllerApiClient>,
}

impl DeleteHelperTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for DeleteHelperTool {
    fn name(&self) -> &str {
        "delete_helper"
    }

    fn description(&self) -> &str {
        "Delete a helper entity. This permanently removes it. Use with caution."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "helper_type": {"type": "string", "description": "Helper domain (e.g., 'input_boolean')."},
                "entity_id": {"type": "string", "description": "The helper entity ID to delete."},
            },
            "required": ["helper_type", "entity_id"],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let helper_type = arguments.get("helper_type").and_then(Value::as_str).unwrap_or("");
        let entity_id = arguments.get("entity_id").and_then(Value::as_str).unwrap_or("");
        if helper_type.is_empty() || entity_id.is_empty() {
            return Ok("Error: helper_type and entity_id are required.".to_string());
        }
        delete_object(&self.api, helper_type, helper_type, entity_id).await
    }
}

pub struct RenameEntityTool {
    api: Arc<ControllerApiClient>,
}

impl RenameEntityTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for RenameEntityTool {
    fn name(&self) -> &str {
        "rename_entity"
    }

    fn description(&self) -> &str {
        "Rename an entity's friendly name in the entity registry."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "entity_id": {"type": "string", "description": "The entity ID to rename."},
                "name": {"type": "string", "description": "The new friendly name."},
            },
            "required": ["entity_id", "name"],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let entity_id = arguments.get("entity_id").and_then(Value::as_str).unwrap_or("");
        let name = arguments.get("name").and_then(Value::as_str).unwrap_or("");
        if entity_id.is_empty() || name.is_empty() {
            return Ok("Error: entity_id and name are required.".to_string());
        }

        self.api
            .update_entity_registry(entity_id, serde_json::json!({"name": name}))
            .await
            .map_err(|e| e.to_string())?;
        Ok(format!("Renamed '{entity_id}' to '{name}'."))
    }
}

pub struct AssignEntityAreaTool {
    api: Arc<ControllerApiClient>,
}

impl AssignEntityAreaTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for AssignEntityAreaTool {
    fn name(&self) -> &str {
        "assign_entity_area"
    }

    fn description(&self) -> &str {
        "Assign an entity to an area in the entity registry."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "entity_id": {"type": "string", "description": "The entity ID to reassign."},
                "area_id": {"type": "string", "description": "The area ID to assign it to."},
            },
            "required": ["entity_id", "area_id"],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let entity_id = arguments.get("entity_id").and_then(Value::as_str).unwrap_or("");
        let area_id = arguments.get("area_id").and_then(Value::as_str).unwrap_or("");
        if entity_id.is_empty() || area_id.is_empty() {
            return Ok("Error: entity_id and area_id are required.".to_string());
        }

        self.api
            .update_entity_registry(entity_id, serde_json::json!({"area_id": area_id}))
            .await
            .map_err(|e| e.to_string())?;
        Ok(format!("Assigned '{entity_id}' to area '{area_id}'."))
    }
}

pub struct AssignEntityLabelsTool {
    api: Arc<ControllerApiClient>,
}

impl AssignEntityLabelsTool {
    pub fn new(api: Arc<ControllerApiClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Tool for AssignEntityLabelsTool {
    fn name(&self) -> &str {
        "assign_entity_labels"
    }

    fn description(&self) -> &str {
        "Replace an entity's labels in the entity registry."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "entity_id": {"type": "string", "description": "The entity ID to relabel."},
                "labels": {"type": "array", "items": {"type": "string"}, "description": "Full replacement set of label IDs."},
            },
            "required": ["entity_id", "labels"],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let entity_id = arguments.get("entity_id").and_then(Value::as_str).unwrap_or("");
        let Some(labels) = arguments.get("labels").and_then(Value::as_array) else {
            return Ok("Error: entity_id and labels are required.".to_string());
        };
        if entity_id.is_empty() {
            return Ok("Error: entity_id and labels are required.".to_string());
        }

        self.api
            .update_entity_registry(entity_id, serde_json::json!({"labels": labels}))
            .await
            .map_err(|e| e.to_string())?;
        Ok(format!("Updated labels for '{entity_id}'."))
    }
}
