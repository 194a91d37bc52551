//! Shared test utilities for mvirt-netorch integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use mvirt_netorch::element::{
    AggregatedExecution, DhcpServiceProvider, NetworkElement, UserDataServiceProvider,
};
use mvirt_netorch::error::{ProviderError, ProviderResult};
use mvirt_netorch::guru::{MigrationResponder, NetworkGuru};
use mvirt_netorch::model::{
    Account, AccountId, AclType, BroadcastDomainType, Capabilities, Capability,
    DeployDestination, DeploymentPlan, DesignOutcome, DomainId, GuestType, HostId,
    HypervisorType, Network, NetworkDesign,
    NetworkOffering, NetworkState, NicProfile, OfferingId, PhysicalNetwork, PhysicalNetworkId,
    ProviderInstance, ProviderName, ReservationContext, ReservationStrategy, Service,
    TrafficLabel, TrafficType, VmId, VmInstance, VmProfile, VmState, VmType, Zone, ZoneId,
    ZoneNetworkType,
};
use mvirt_netorch::rules::{RuleKind, RulesManager};
use mvirt_netorch::store::Reader;
use mvirt_netorch::{
    AuditLogger, MemoryStore, NetworkOrchestrator, NetworkSetup, OrchestratorConfig,
    ProviderRegistry, ResourceStore,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const VR: &str = "VirtualRouter";
pub const GURU: &str = "TestGuru";

pub const ZONE: ZoneId = ZoneId(1);
pub const PHYSICAL_NETWORK: PhysicalNetworkId = PhysicalNetworkId(1);
pub const OWNER: AccountId = AccountId(2);

pub const ISOLATED_OFFERING: OfferingId = OfferingId(1);
/// Shared offering with rule services; its networks are services-backed.
pub const SHARED_SERVICES_OFFERING: OfferingId = OfferingId(2);
/// Shared offering with DHCP and user data only.
pub const SHARED_OFFERING: OfferingId = OfferingId(3);
pub const PUBLIC_OFFERING: OfferingId = OfferingId(4);

/// Initialize tracing once for the test binary. Honors RUST_LOG.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Ordered record of provider invocations.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.count(entry) > 0
    }

    /// Index of the first occurrence of `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == entry)
    }

    /// Entries starting with `prefix`, in order.
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

// =============================================================================
// Guru
// =============================================================================

pub struct RecordingGuru {
    journal: Journal,
    next_host: AtomicU32,
    pub fail_implement: AtomicBool,
    pub fail_reserve: AtomicBool,
    pub release_result: AtomicBool,
    pub trash_result: AtomicBool,
    pub decline_allocate: AtomicBool,
    pub decline_design: AtomicBool,
    pub implement_delay_ms: AtomicU64,
    migration: bool,
}

impl RecordingGuru {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            next_host: AtomicU32::new(10),
            fail_implement: AtomicBool::new(false),
            fail_reserve: AtomicBool::new(false),
            release_result: AtomicBool::new(true),
            trash_result: AtomicBool::new(true),
            decline_allocate: AtomicBool::new(false),
            decline_design: AtomicBool::new(false),
            implement_delay_ms: AtomicU64::new(0),
            migration: false,
        }
    }

    pub fn with_migration(mut self) -> Self {
        self.migration = true;
        self
    }

    fn next_address(&self, network: &Network) -> String {
        let host = self.next_host.fetch_add(1, Ordering::SeqCst);
        let prefix = network
            .gateway
            .as_deref()
            .and_then(|g| g.rsplit_once('.'))
            .map(|(p, _)| p.to_string())
            .unwrap_or_else(|| "10.1.1".to_string());
        format!("{}.{}", prefix, host)
    }
}

#[async_trait]
impl NetworkGuru for RecordingGuru {
    fn name(&self) -> &str {
        GURU
    }

    async fn design(
        &self,
        offering: &NetworkOffering,
        plan: &DeploymentPlan,
        _template: Option<&Network>,
        _owner: &Account,
    ) -> ProviderResult<Option<DesignOutcome>> {
        self.journal.record("guru:design");
        if self.decline_design.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let shared = offering.guest_type == Some(GuestType::Shared);
        Ok(Some(DesignOutcome::New(NetworkDesign {
            name: None,
            state: if shared {
                NetworkState::Setup
            } else {
                NetworkState::Allocated
            },
            traffic_type: offering.traffic_type,
            broadcast_domain_type: BroadcastDomainType::Vlan,
            mode: Some("Dhcp".to_string()),
            cidr: shared.then(|| "10.2.0.0/24".to_string()),
            gateway: shared.then(|| "10.2.0.1".to_string()),
            ip6_cidr: None,
            ip6_gateway: None,
            broadcast_uri: shared.then(|| "vlan://200".to_string()),
            physical_network_id: plan.physical_network_id,
        })))
    }

    async fn implement(
        &self,
        network: &Network,
        _offering: &NetworkOffering,
        _dest: &DeployDestination,
        _ctx: &ReservationContext,
    ) -> ProviderResult<Network> {
        self.journal.record("guru:implement");
        let delay = self.implement_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_implement.load(Ordering::SeqCst) {
            return Err(ProviderError::InsufficientCapacity(format!(
                "no vlan left for {}",
                network.id
            )));
        }
        let mut implemented = network.clone();
        implemented.cidr.get_or_insert_with(|| "10.1.1.0/24".to_string());
        implemented.gateway.get_or_insert_with(|| "10.1.1.1".to_string());
        implemented
            .broadcast_uri
            .get_or_insert_with(|| "vlan://100".to_string());
        Ok(implemented)
    }

    async fn allocate(
        &self,
        network: &Network,
        requested: Option<&NicProfile>,
        vm: &VmProfile,
    ) -> ProviderResult<Option<NicProfile>> {
        self.journal.record("guru:allocate");
        if self.decline_allocate.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(NicProfile {
            network_id: network.id,
            vm_id: Some(vm.id),
            device_id: requested.and_then(|r| r.device_id),
            default_nic: requested.is_some_and(|r| r.default_nic),
            ip4_address: Some(self.next_address(network)),
            ip4_netmask: Some("255.255.255.0".to_string()),
            ip4_gateway: network.gateway.clone(),
            mac_address: Some("02:00:00:00:00:01".to_string()),
            broadcast_uri: network.broadcast_uri.clone(),
            reservation_strategy: requested
                .and_then(|r| r.reservation_strategy)
                .or(Some(ReservationStrategy::Start)),
            ..Default::default()
        }))
    }

    async fn reserve(
        &self,
        nic: &mut NicProfile,
        network: &Network,
        _vm: &VmProfile,
        _dest: &DeployDestination,
        _ctx: &ReservationContext,
    ) -> ProviderResult<()> {
        self.journal.record("guru:reserve");
        if self.fail_reserve.load(Ordering::SeqCst) {
            return Err(ProviderError::ResourceUnavailable(format!(
                "no address left in {}",
                network.id
            )));
        }
        nic.broadcast_uri = network.broadcast_uri.clone();
        nic.ip4_gateway = network.gateway.clone();
        Ok(())
    }

    async fn release(
        &self,
        _nic: &mut NicProfile,
        _vm: &VmProfile,
        _reservation_id: Option<&str>,
    ) -> ProviderResult<bool> {
        self.journal.record("guru:release");
        Ok(self.release_result.load(Ordering::SeqCst))
    }

    async fn update_nic_profile(&self, _nic: &mut NicProfile, _network: &Network) {}

    async fn deallocate(
        &self,
        _network: &Network,
        _nic: &NicProfile,
        _vm: &VmProfile,
    ) -> ProviderResult<()> {
        self.journal.record("guru:deallocate");
        Ok(())
    }

    async fn shutdown(
        &self,
        network: &mut Network,
        _offering: &NetworkOffering,
    ) -> ProviderResult<()> {
        self.journal.record("guru:shutdown");
        if network.guest_type == Some(GuestType::Isolated) {
            network.broadcast_uri = None;
        }
        Ok(())
    }

    async fn trash(&self, _network: &Network, _offering: &NetworkOffering) -> ProviderResult<bool> {
        self.journal.record("guru:trash");
        Ok(self.trash_result.load(Ordering::SeqCst))
    }

    fn migration_responder(&self) -> Option<&dyn MigrationResponder> {
        if self.migration { Some(self) } else { None }
    }
}

#[async_trait]
impl MigrationResponder for RecordingGuru {
    async fn prepare_migration(
        &self,
        _nic: &NicProfile,
        _network: &Network,
        _vm: &VmProfile,
        _dest: &DeployDestination,
        _ctx: &ReservationContext,
    ) -> ProviderResult<bool> {
        self.journal.record("guru:prepare_migration");
        Ok(true)
    }

    async fn commit_migration(
        &self,
        _nic: &NicProfile,
        _network: &Network,
        _vm: &VmProfile,
        _src: &ReservationContext,
        dst: &ReservationContext,
    ) {
        self.journal
            .record(format!("guru:commit_migration:{}", dst.reservation_id));
    }

    async fn rollback_migration(
        &self,
        _nic: &NicProfile,
        _network: &Network,
        _vm: &VmProfile,
        _src: &ReservationContext,
        _dst: &ReservationContext,
    ) {
        self.journal.record("guru:rollback_migration");
    }
}

// =============================================================================
// Element
// =============================================================================

pub struct RecordingElement {
    provider: ProviderName,
    capabilities: Capabilities,
    journal: Journal,
    pub implement_result: AtomicBool,
    pub prepare_result: AtomicBool,
    pub shutdown_result: AtomicBool,
    pub destroy_result: AtomicBool,
    pub dhcp_entry_result: AtomicBool,
    aggregated: bool,
    dhcp: bool,
    user_data: bool,
    migration: bool,
    cleanup_on_shutdown: bool,
}

impl RecordingElement {
    pub fn new(provider: &str, services: &[Service], journal: Journal) -> Self {
        let capabilities = services.iter().map(|s| (*s, HashMap::new())).collect();
        Self {
            provider: ProviderName::new(provider),
            capabilities,
            journal,
            implement_result: AtomicBool::new(true),
            prepare_result: AtomicBool::new(true),
            shutdown_result: AtomicBool::new(true),
            destroy_result: AtomicBool::new(true),
            dhcp_entry_result: AtomicBool::new(true),
            aggregated: false,
            dhcp: false,
            user_data: false,
            migration: false,
            cleanup_on_shutdown: false,
        }
    }

    /// Virtual router offering every service.
    pub fn virtual_router(journal: Journal) -> Self {
        Self::new(VR, &all_services(), journal)
    }

    pub fn with_aggregated(mut self) -> Self {
        self.aggregated = true;
        self
    }

    pub fn with_dhcp(mut self, multi_subnet: bool) -> Self {
        self.dhcp = true;
        self.capabilities.entry(Service::Dhcp).or_default().insert(
            Capability::DhcpAccrossMultipleSubnets,
            multi_subnet.to_string(),
        );
        self
    }

    pub fn with_user_data(mut self) -> Self {
        self.user_data = true;
        self
    }

    pub fn with_migration(mut self) -> Self {
        self.migration = true;
        self
    }

    pub fn with_cleanup_on_shutdown(mut self) -> Self {
        self.cleanup_on_shutdown = true;
        self
    }

    fn record(&self, op: &str) {
        self.journal.record(format!("{}:{}", self.provider, op));
    }
}

#[async_trait]
impl NetworkElement for RecordingElement {
    fn name(&self) -> &str {
        self.provider.as_str()
    }

    fn provider(&self) -> &ProviderName {
        &self.provider
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn cleanup_needed_on_shutdown(&self) -> bool {
        self.cleanup_on_shutdown
    }

    async fn implement(
        &self,
        _network: &Network,
        _offering: &NetworkOffering,
        _dest: &DeployDestination,
        _ctx: &ReservationContext,
    ) -> ProviderResult<bool> {
        self.record("implement");
        Ok(self.implement_result.load(Ordering::SeqCst))
    }

    async fn prepare(
        &self,
        _network: &Network,
        _nic: &NicProfile,
        _vm: &VmProfile,
        _dest: &DeployDestination,
        _ctx: &ReservationContext,
    ) -> ProviderResult<bool> {
        self.record("prepare");
        Ok(self.prepare_result.load(Ordering::SeqCst))
    }

    async fn release(
        &self,
        _network: &Network,
        _nic: &NicProfile,
        _vm: &VmProfile,
        _ctx: Option<&ReservationContext>,
    ) -> ProviderResult<bool> {
        self.record("release");
        Ok(true)
    }

    async fn shutdown(
        &self,
        _network: &Network,
        _ctx: &ReservationContext,
        _cleanup: bool,
    ) -> ProviderResult<bool> {
        self.record("shutdown");
        Ok(self.shutdown_result.load(Ordering::SeqCst))
    }

    async fn destroy(&self, _network: &Network, _ctx: &ReservationContext) -> ProviderResult<bool> {
        self.record("destroy");
        Ok(self.destroy_result.load(Ordering::SeqCst))
    }

    fn aggregated(&self) -> Option<&dyn AggregatedExecution> {
        if self.aggregated { Some(self) } else { None }
    }

    fn migration_responder(&self) -> Option<&dyn MigrationResponder> {
        if self.migration { Some(self) } else { None }
    }

    fn dhcp(&self) -> Option<&dyn DhcpServiceProvider> {
        if self.dhcp { Some(self) } else { None }
    }

    fn user_data(&self) -> Option<&dyn UserDataServiceProvider> {
        if self.user_data { Some(self) } else { None }
    }
}

#[async_trait]
impl AggregatedExecution for RecordingElement {
    async fn prepare_aggregated_execution(
        &self,
        _network: &Network,
        _dest: &DeployDestination,
    ) -> ProviderResult<bool> {
        self.record("prepare_aggregated");
        Ok(true)
    }

    async fn complete_aggregated_execution(
        &self,
        _network: &Network,
        _dest: &DeployDestination,
    ) -> ProviderResult<bool> {
        self.record("complete_aggregated");
        Ok(true)
    }

    async fn cleanup_aggregated_execution(
        &self,
        _network: &Network,
        _dest: &DeployDestination,
    ) -> ProviderResult<bool> {
        self.record("cleanup_aggregated");
        Ok(true)
    }
}

#[async_trait]
impl DhcpServiceProvider for RecordingElement {
    async fn add_dhcp_entry(
        &self,
        _network: &Network,
        _nic: &NicProfile,
        _vm: &VmProfile,
        _dest: &DeployDestination,
        _ctx: &ReservationContext,
    ) -> ProviderResult<bool> {
        self.record("add_dhcp_entry");
        Ok(self.dhcp_entry_result.load(Ordering::SeqCst))
    }

    async fn config_dhcp_support_for_subnet(
        &self,
        _network: &Network,
        _nic: &NicProfile,
        _vm: &VmProfile,
        _dest: &DeployDestination,
        _ctx: &ReservationContext,
    ) -> ProviderResult<bool> {
        self.record("config_dhcp_subnet");
        Ok(true)
    }

    async fn remove_dhcp_support_for_subnet(&self, _network: &Network) -> ProviderResult<bool> {
        self.record("remove_dhcp_subnet");
        Ok(true)
    }
}

#[async_trait]
impl UserDataServiceProvider for RecordingElement {
    async fn add_password_and_userdata(
        &self,
        _network: &Network,
        _nic: &NicProfile,
        _vm: &VmProfile,
        _dest: &DeployDestination,
        _ctx: &ReservationContext,
    ) -> ProviderResult<bool> {
        self.record("userdata");
        Ok(true)
    }
}

#[async_trait]
impl MigrationResponder for RecordingElement {
    async fn prepare_migration(
        &self,
        _nic: &NicProfile,
        _network: &Network,
        _vm: &VmProfile,
        _dest: &DeployDestination,
        _ctx: &ReservationContext,
    ) -> ProviderResult<bool> {
        self.record("prepare_migration");
        Ok(true)
    }

    async fn commit_migration(
        &self,
        _nic: &NicProfile,
        _network: &Network,
        _vm: &VmProfile,
        _src: &ReservationContext,
        _dst: &ReservationContext,
    ) {
        self.record("commit_migration");
    }

    async fn rollback_migration(
        &self,
        _nic: &NicProfile,
        _network: &Network,
        _vm: &VmProfile,
        _src: &ReservationContext,
        _dst: &ReservationContext,
    ) {
        self.record("rollback_migration");
    }
}

// =============================================================================
// Rules
// =============================================================================

pub struct RecordingRules {
    journal: Journal,
    pub apply_result: AtomicBool,
    pub revoke_result: AtomicBool,
}

impl RecordingRules {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            apply_result: AtomicBool::new(true),
            revoke_result: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl RulesManager for RecordingRules {
    async fn apply(
        &self,
        _network: &Network,
        _offering: &NetworkOffering,
        kind: RuleKind,
        _caller: AccountId,
    ) -> ProviderResult<bool> {
        self.journal.record(format!("rules:apply:{}", kind));
        Ok(self.apply_result.load(Ordering::SeqCst))
    }

    async fn revoke(&self, _network: &Network, kind: RuleKind, _caller: AccountId)
    -> ProviderResult<bool> {
        self.journal.record(format!("rules:revoke:{}", kind));
        Ok(self.revoke_result.load(Ordering::SeqCst))
    }

    async fn shutdown(&self, _network: &Network, kind: RuleKind, _caller: AccountId)
    -> ProviderResult<bool> {
        self.journal.record(format!("rules:shutdown:{}", kind));
        Ok(true)
    }

    async fn ensure_source_nat(&self, _network: &Network, _ctx: &ReservationContext)
    -> ProviderResult<()> {
        self.journal.record("rules:ensure_source_nat");
        Ok(())
    }

    async fn release_network_ips(&self, _network: &Network, _caller: AccountId)
    -> ProviderResult<bool> {
        self.journal.record("rules:release_ips");
        Ok(true)
    }
}

// =============================================================================
// Harness
// =============================================================================

pub fn all_services() -> Vec<Service> {
    vec![
        Service::Dhcp,
        Service::Dns,
        Service::Firewall,
        Service::Lb,
        Service::StaticNat,
        Service::SourceNat,
        Service::PortForwarding,
        Service::Vpn,
        Service::UserData,
        Service::NetworkAcl,
        Service::Gateway,
        Service::SecurityGroup,
        Service::Connectivity,
    ]
}

pub fn make_offering(
    id: OfferingId,
    guest_type: Option<GuestType>,
    traffic_type: TrafficType,
    services: &[(Service, Option<&str>)],
) -> NetworkOffering {
    NetworkOffering {
        id,
        name: format!("offering-{}", id.0),
        guest_type,
        traffic_type,
        services: services
            .iter()
            .map(|(s, p)| (*s, p.map(ProviderName::new)))
            .collect(),
        shared_source_nat: false,
        egress_default_policy: false,
        system_only: false,
        details: HashMap::new(),
    }
}

pub fn make_physical_network(id: PhysicalNetworkId, providers: &[(&str, bool)]) -> PhysicalNetwork {
    PhysicalNetwork {
        id,
        zone_id: ZONE,
        name: format!("physnet-{}", id.0),
        providers: providers
            .iter()
            .map(|(name, enabled)| {
                (
                    ProviderName::new(*name),
                    ProviderInstance {
                        enabled: *enabled,
                        services: all_services().into_iter().collect::<BTreeSet<_>>(),
                    },
                )
            })
            .collect(),
        traffic: vec![TrafficLabel {
            traffic_type: TrafficType::Guest,
            labels: [(HypervisorType::Kvm, "cloudbr1".to_string())].into(),
            vlan: None,
        }],
    }
}

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        network_gc_wait_secs: 60,
        network_lock_timeout_secs: 1,
        account_lock_timeout_secs: 1,
        gc_lock_timeout_secs: 1,
        ..OrchestratorConfig::default()
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub orchestrator: Arc<NetworkOrchestrator>,
    pub journal: Journal,
    pub guru: Arc<RecordingGuru>,
    pub elements: Vec<Arc<RecordingElement>>,
    pub rules: Arc<RecordingRules>,
    pub owner: Account,
}

impl Harness {
    /// Advanced zone with one physical network and a virtual router.
    pub fn new() -> Self {
        Self::build(test_config(), |journal| {
            (
                RecordingGuru::new(journal.clone()),
                vec![RecordingElement::virtual_router(journal.clone())],
            )
        })
    }

    pub fn build(
        config: OrchestratorConfig,
        providers: impl FnOnce(&Journal) -> (RecordingGuru, Vec<RecordingElement>),
    ) -> Self {
        init_tracing();
        let journal = Journal::default();
        let (guru, elements) = providers(&journal);
        let guru = Arc::new(guru);
        let elements: Vec<Arc<RecordingElement>> = elements.into_iter().map(Arc::new).collect();
        let rules = Arc::new(RecordingRules::new(journal.clone()));

        let mut registry = ProviderRegistry::new();
        registry.register_guru(guru.clone()).unwrap();
        for element in &elements {
            registry.register_element(element.clone()).unwrap();
        }

        let store = Arc::new(MemoryStore::new());
        store.put_zone(Zone {
            id: ZONE,
            name: "zone-1".to_string(),
            network_type: ZoneNetworkType::Advanced,
        });
        store.put_physical_network(make_physical_network(PHYSICAL_NETWORK, &[(VR, true)]));
        store.put_offering(make_offering(
            ISOLATED_OFFERING,
            Some(GuestType::Isolated),
            TrafficType::Guest,
            &[
                (Service::Dhcp, Some(VR)),
                (Service::SourceNat, Some(VR)),
                (Service::Firewall, Some(VR)),
                (Service::UserData, Some(VR)),
            ],
        ));
        store.put_offering(make_offering(
            SHARED_SERVICES_OFFERING,
            Some(GuestType::Shared),
            TrafficType::Guest,
            &[
                (Service::Dhcp, Some(VR)),
                (Service::Lb, Some(VR)),
                (Service::Firewall, Some(VR)),
            ],
        ));
        store.put_offering(make_offering(
            SHARED_OFFERING,
            Some(GuestType::Shared),
            TrafficType::Guest,
            &[(Service::Dhcp, Some(VR)), (Service::UserData, Some(VR))],
        ));
        store.put_offering(make_offering(
            PUBLIC_OFFERING,
            None,
            TrafficType::Public,
            &[],
        ));

        let orchestrator = Arc::new(NetworkOrchestrator::new(
            store.clone() as Arc<dyn ResourceStore>,
            Arc::new(registry),
            rules.clone(),
            config,
            AuditLogger::new_noop(),
        ));

        Self {
            store,
            orchestrator,
            journal,
            guru,
            elements,
            rules,
            owner: Account {
                id: OWNER,
                domain_id: DomainId(1),
                name: "tenant".to_string(),
            },
        }
    }

    pub fn element(&self) -> &RecordingElement {
        &self.elements[0]
    }

    pub fn offering(&self, id: OfferingId) -> NetworkOffering {
        self.store.offering(id).unwrap()
    }

    pub fn setup_request(&self, offering: OfferingId) -> NetworkSetup {
        let mut request = NetworkSetup::new(
            self.owner.clone(),
            self.offering(offering),
            DeploymentPlan {
                zone_id: ZONE,
                pod_id: None,
                physical_network_id: Some(PHYSICAL_NETWORK),
            },
        );
        request.acl_type = Some(AclType::Account);
        request
    }

    /// Set up one network for the offering.
    pub async fn setup(&self, offering: OfferingId) -> Network {
        let request = self.setup_request(offering);
        let mut networks = self.orchestrator.setup_network(&request).await.unwrap();
        assert_eq!(networks.len(), 1);
        networks.remove(0)
    }

    /// Set up and implement one network.
    pub async fn implemented(&self, offering: OfferingId) -> Network {
        let network = self.setup(offering).await;
        self.orchestrator
            .implement_network(network.id, &self.dest(), &self.ctx())
            .await
            .unwrap()
    }

    pub fn dest(&self) -> DeployDestination {
        DeployDestination {
            zone_id: ZONE,
            pod_id: Some(1),
            cluster_id: Some(1),
            host_id: Some(HostId(1)),
        }
    }

    pub fn ctx(&self) -> ReservationContext {
        ReservationContext::new(OWNER)
    }

    pub fn network(&self, network: &Network) -> Network {
        self.store.network(network.id).unwrap()
    }

    /// Register a VM record and return its profile.
    pub fn vm(&self, id: u64, vm_type: VmType) -> VmProfile {
        self.store.put_vm(VmInstance {
            id: VmId(id),
            name: format!("i-{}", id),
            vm_type,
            state: VmState::Running,
            hypervisor: HypervisorType::Kvm,
            account_id: OWNER,
            zone_id: ZONE,
            removed: None,
        });
        VmProfile::new(VmId(id), vm_type, HypervisorType::Kvm, OWNER)
    }
}
