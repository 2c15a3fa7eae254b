//! Wiring of the engine services over one set of repositories.

use std::sync::Arc;

use hrflow_types::config::EngineConfig;

use super::advancer::WorkflowAdvancer;
use super::dashboard::DashboardService;
use super::instance::InstanceManager;
use super::locks::InstanceLocks;
use super::steps::StepInstanceManager;
use super::store::DefinitionStore;
use crate::repository::definition::DefinitionRepository;
use crate::repository::directory::EmployeeDirectory;
use crate::repository::instance::InstanceRepository;

/// All engine services, sharing one advancer and one lock registry.
pub struct Engine<DR, IR, D>
where
    DR: DefinitionRepository,
    IR: InstanceRepository,
    D: EmployeeDirectory,
{
    pub store: DefinitionStore<DR>,
    pub instances: InstanceManager<DR, IR, D>,
    pub steps: StepInstanceManager<DR, IR, D>,
    pub dashboard: DashboardService<IR>,
    pub advancer: Arc<WorkflowAdvancer<DR, IR, D>>,
    pub locks: InstanceLocks,
}

impl<DR, IR, D> Engine<DR, IR, D>
where
    DR: DefinitionRepository,
    IR: InstanceRepository,
    D: EmployeeDirectory,
{
    pub fn new(
        definitions: Arc<DR>,
        instances: Arc<IR>,
        directory: Arc<D>,
        config: &EngineConfig,
    ) -> Self {
        let locks = InstanceLocks::new();
        let advancer = Arc::new(WorkflowAdvancer::new(
            definitions.clone(),
            instances.clone(),
            directory,
            config.rejection_routing,
        ));

        Self {
            store: DefinitionStore::new(definitions.clone()),
            instances: InstanceManager::new(
                definitions,
                instances.clone(),
                advancer.clone(),
                locks.clone(),
                config.reference_prefix.clone(),
            ),
            steps: StepInstanceManager::new(instances.clone(), advancer.clone(), locks.clone()),
            dashboard: DashboardService::new(instances),
            advancer,
            locks,
        }
    }
}
