// In-memory fleet used by unit and integration tests.
//
// Implements every fleet trait over plain maps. Calls are recorded so tests
// can assert on what was dispatched, and failures can be scripted per
// device, per provisioning task or for job creation.

use crate::fleet::{
    BulkProvisionRequest, BulkProvisionStatus, BulkProvisionTask, BulkProvisioner, CreateJobRequest,
    CreatedJob, DevicePublisher, FleetDirectory, FleetError, FleetResult, JobClient,
    ListThingsRequest, ShadowClient,
};
use crate::orchestration::FleetClients;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Value,
    pub qos: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShadowUpdate {
    pub thing_name: String,
    pub shadow_name: String,
    pub payload: Value,
}

#[derive(Debug, Default)]
struct Recorded {
    published: Vec<PublishedMessage>,
    shadow_updates: Vec<ShadowUpdate>,
    created_groups: Vec<String>,
    jobs: Vec<CreateJobRequest>,
    provision_requests: Vec<BulkProvisionRequest>,
    list_things_calls: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryFleet {
    group_members: DashMap<String, Vec<String>>,
    query_results: DashMap<String, Vec<String>>,
    device_failures: DashMap<String, FleetError>,
    /// Statuses returned, in order, by successive provisioning task polls
    provisioning_script: Mutex<VecDeque<BulkProvisionStatus>>,
    registration_tasks_in_progress: Mutex<Vec<String>>,
    job_failure: Mutex<Option<FleetError>>,
    recorded: Mutex<Recorded>,
}

impl InMemoryFleet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_group(&self, group: &str, members: &[&str]) -> &Self {
        self.group_members.insert(
            group.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
        self
    }

    pub fn with_query_result(&self, query: &Value, devices: &[&str]) -> &Self {
        self.query_results.insert(
            query.to_string(),
            devices.iter().map(|d| d.to_string()).collect(),
        );
        self
    }

    /// Make every publish or shadow update addressed to `device` fail
    pub fn fail_device(&self, device: &str, error: FleetError) -> &Self {
        self.device_failures.insert(device.to_string(), error);
        self
    }

    pub fn fail_jobs(&self, error: FleetError) -> &Self {
        *self.job_failure.lock() = Some(error);
        self
    }

    /// Queue statuses for successive provisioning polls; `Completed` once exhausted
    pub fn script_provisioning(&self, statuses: &[BulkProvisionStatus]) -> &Self {
        self.provisioning_script.lock().extend(statuses.iter().copied());
        self
    }

    pub fn with_registration_task_in_progress(&self, task_id: &str) -> &Self {
        self.registration_tasks_in_progress
            .lock()
            .push(task_id.to_string());
        self
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.recorded.lock().published.clone()
    }

    pub fn shadow_updates(&self) -> Vec<ShadowUpdate> {
        self.recorded.lock().shadow_updates.clone()
    }

    pub fn created_groups(&self) -> Vec<String> {
        self.recorded.lock().created_groups.clone()
    }

    pub fn jobs(&self) -> Vec<CreateJobRequest> {
        self.recorded.lock().jobs.clone()
    }

    pub fn provision_requests(&self) -> Vec<BulkProvisionRequest> {
        self.recorded.lock().provision_requests.clone()
    }

    pub fn list_things_calls(&self) -> usize {
        self.recorded.lock().list_things_calls
    }

    /// Every fleet client backed by this fake
    pub fn clients(fleet: &Arc<Self>) -> FleetClients {
        FleetClients {
            directory: fleet.clone(),
            provisioner: fleet.clone(),
            publisher: fleet.clone(),
            shadows: fleet.clone(),
            jobs: fleet.clone(),
        }
    }

    fn device_failure(&self, device: &str) -> Option<FleetError> {
        self.device_failures.get(device).map(|e| e.value().clone())
    }
}

#[async_trait]
impl FleetDirectory for InMemoryFleet {
    async fn list_things(&self, request: &ListThingsRequest) -> FleetResult<Vec<String>> {
        self.recorded.lock().list_things_calls += 1;
        let mut devices = request.thing_names.clone();
        for group in &request.thing_group_names {
            let members = self
                .group_members
                .get(group)
                .ok_or_else(|| FleetError::resource_not_found(format!("thing group {group}")))?;
            devices.extend(members.value().iter().cloned());
        }
        if let Some(query) = &request.query {
            if let Some(found) = self.query_results.get(&query.to_string()) {
                devices.extend(found.value().iter().cloned());
            }
        }
        Ok(devices)
    }
}

#[async_trait]
impl BulkProvisioner for InMemoryFleet {
    async fn bulk_provision_things(
        &self,
        _template_id: &str,
        request: &BulkProvisionRequest,
    ) -> FleetResult<String> {
        let mut recorded = self.recorded.lock();
        recorded.provision_requests.push(request.clone());
        Ok(format!("task-{}", recorded.provision_requests.len()))
    }

    async fn get_bulk_provision_task(&self, task_id: &str) -> FleetResult<BulkProvisionTask> {
        let status = self
            .provisioning_script
            .lock()
            .pop_front()
            .unwrap_or(BulkProvisionStatus::Completed);
        Ok(BulkProvisionTask {
            task_id: task_id.to_string(),
            status,
            message: status
                .is_terminal_failure()
                .then(|| "scripted failure".to_string()),
        })
    }
}

#[async_trait]
impl DevicePublisher for InMemoryFleet {
    async fn publish(&self, topic: &str, payload: &Value, qos: u8) -> FleetResult<()> {
        // Per-device topics carry the device name as one path segment
        if let Some(error) = topic.split('/').find_map(|s| self.device_failure(s)) {
            return Err(error);
        }
        self.recorded.lock().published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.clone(),
            qos,
        });
        Ok(())
    }
}

#[async_trait]
impl ShadowClient for InMemoryFleet {
    async fn update_thing_shadow(
        &self,
        thing_name: &str,
        shadow_name: &str,
        payload: &Value,
    ) -> FleetResult<()> {
        if let Some(error) = self.device_failure(thing_name) {
            return Err(error);
        }
        self.recorded.lock().shadow_updates.push(ShadowUpdate {
            thing_name: thing_name.to_string(),
            shadow_name: shadow_name.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl JobClient for InMemoryFleet {
    async fn create_thing_group(&self, group_name: &str) -> FleetResult<String> {
        self.recorded
            .lock()
            .created_groups
            .push(group_name.to_string());
        Ok(format!("arn:aws:iot:test:000000000000:thinggroup/{group_name}"))
    }

    async fn list_thing_registration_tasks(
        &self,
        status: BulkProvisionStatus,
    ) -> FleetResult<Vec<String>> {
        match status {
            BulkProvisionStatus::InProgress => {
                Ok(self.registration_tasks_in_progress.lock().clone())
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn create_job(&self, request: &CreateJobRequest) -> FleetResult<CreatedJob> {
        if let Some(error) = self.job_failure.lock().clone() {
            return Err(error);
        }
        self.recorded.lock().jobs.push(request.clone());
        Ok(CreatedJob {
            job_id: request.job_id.clone(),
            job_arn: format!("arn:aws:iot:test:000000000000:job/{}", request.job_id),
        })
    }
}
