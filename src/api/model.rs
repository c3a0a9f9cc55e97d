use serde::Serialize;

use crate::registry::{Host, LeaseInfo, Service};
use crate::server::{ResponseCounters, State};
use crate::time::TimeMilli;

#[derive(Serialize, Debug, Clone)]
pub(super) struct ServiceView {
    pub service_name: String,
    pub instance_name: String,
    pub is_sub_type: bool,
    pub is_deleted: bool,
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub ttl: u32,
    pub lease_info: LeaseInfo,
}

impl ServiceView {
    fn from_service(service: &Service, now: TimeMilli) -> Self {
        ServiceView {
            service_name: service.service_name().to_string(),
            instance_name: service.instance_name(),
            is_sub_type: service.is_sub_type(),
            is_deleted: service.is_deleted(),
            priority: service.priority(),
            weight: service.weight(),
            port: service.port(),
            ttl: service.ttl(),
            lease_info: service.lease_info(now),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub(super) struct HostView {
    pub full_name: String,
    pub addresses: Vec<String>,
    pub is_deleted: bool,
    pub ttl: u32,
    pub lease_info: LeaseInfo,
    pub services: Vec<ServiceView>,
}

impl HostView {
    pub(super) fn from_host(host: &Host, now: TimeMilli) -> Self {
        HostView {
            full_name: host.full_name().to_string(),
            addresses: host.addresses().iter().map(ToString::to_string).collect(),
            is_deleted: host.is_deleted(),
            ttl: host.ttl(),
            lease_info: host.lease_info(now),
            services: host
                .services()
                .map(|s| ServiceView::from_service(s, now))
                .collect(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub(super) struct CountersView {
    pub state: State,
    pub port: u16,
    pub counters: ResponseCounters,
}
