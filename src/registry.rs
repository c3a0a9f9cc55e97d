//! The in-memory SRP registry model.
//!
//! A [`Host`] is a client identity: a full name, its IPv6 addresses, and the
//! ECDSA-P256 key that signed its registration. Each host owns a flat list
//! of [`Service`]s (one per PTR registration, base or sub-type). The SRV/TXT
//! payload of a service instance lives in a [`Description`] shared by every
//! service of the host that points at the same instance name, so a base
//! service and its sub-types observe one another's updates through the same
//! handle.
//!
//! Deletion is soft by default: a deleted host or service keeps its name in
//! the registry until its KEY-LEASE elapses, so the original key can
//! re-register the name while squatters are rejected.

use std::fmt;
use std::net::Ipv6Addr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::error::Error;
use crate::name;
use crate::time::TimeMilli;

/// Length of an ECDSA-P256 public key on the wire (x || y, no point tag).
pub const ECDSA_P256_KEY_LENGTH: usize = 64;

/// The KEY resource record payload carried by a host registration.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub(crate) flags: u16,
    pub(crate) protocol: u8,
    pub(crate) algorithm: u8,
    pub(crate) public_key: [u8; ECDSA_P256_KEY_LENGTH],
}

impl KeyRecord {
    /// DNSSEC algorithm number for ECDSA-P256-SHA256.
    pub const ALGORITHM_ECDSA_P256_SHA256: u8 = 13;
    /// KEY protocol value for DNSSEC keys.
    pub const PROTOCOL_DNSSEC: u8 = 3;

    pub(crate) fn new(
        flags: u16,
        protocol: u8,
        algorithm: u8,
        public_key: [u8; ECDSA_P256_KEY_LENGTH],
    ) -> Self {
        KeyRecord {
            flags,
            protocol,
            algorithm,
            public_key,
        }
    }

    /// Whether this is a key the SRP profile accepts.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.protocol == Self::PROTOCOL_DNSSEC
            && self.algorithm == Self::ALGORITHM_ECDSA_P256_SHA256
    }

    /// The raw 64-byte public key (x || y).
    #[must_use]
    pub fn public_key(&self) -> &[u8; ECDSA_P256_KEY_LENGTH] {
        &self.public_key
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KeyRecord {{ alg: {}, key: {:02x}{:02x}{:02x}{:02x}… }}",
            self.algorithm,
            self.public_key[0],
            self.public_key[1],
            self.public_key[2],
            self.public_key[3]
        )
    }
}

/// Which services to include when iterating or searching a host's list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceFlags(u8);

impl ServiceFlags {
    /// Include base (not sub-type) services.
    pub const BASE_TYPE: ServiceFlags = ServiceFlags(1 << 0);
    /// Include sub-type services.
    pub const SUB_TYPE: ServiceFlags = ServiceFlags(1 << 1);
    /// Include active (not deleted) services.
    pub const ACTIVE: ServiceFlags = ServiceFlags(1 << 2);
    /// Include soft-deleted services.
    pub const DELETED: ServiceFlags = ServiceFlags(1 << 3);

    /// Any service, base or sub-type, active or deleted.
    pub const ANY_SERVICE: ServiceFlags =
        Self::BASE_TYPE.union(Self::SUB_TYPE).union(Self::ACTIVE).union(Self::DELETED);
    /// Base services only, active or deleted.
    pub const BASE_TYPE_ONLY: ServiceFlags =
        Self::BASE_TYPE.union(Self::ACTIVE).union(Self::DELETED);
    /// Sub-type services only, active or deleted.
    pub const SUB_TYPE_ONLY: ServiceFlags =
        Self::SUB_TYPE.union(Self::ACTIVE).union(Self::DELETED);
    /// Active services of any type.
    pub const ANY_TYPE_ACTIVE: ServiceFlags =
        Self::BASE_TYPE.union(Self::SUB_TYPE).union(Self::ACTIVE);
    /// Deleted services of any type.
    pub const ANY_TYPE_DELETED: ServiceFlags =
        Self::BASE_TYPE.union(Self::SUB_TYPE).union(Self::DELETED);

    #[must_use]
    pub const fn union(self, other: ServiceFlags) -> ServiceFlags {
        ServiceFlags(self.0 | other.0)
    }

    #[must_use]
    pub const fn contains(self, other: ServiceFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ServiceFlags {
    type Output = ServiceFlags;

    fn bitor(self, rhs: ServiceFlags) -> ServiceFlags {
        self.union(rhs)
    }
}

/// LEASE / KEY-LEASE values with remaining time against a caller-supplied
/// clock reading.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LeaseInfo {
    /// Granted LEASE, seconds.
    pub lease: u32,
    /// Granted KEY-LEASE, seconds.
    pub key_lease: u32,
    /// Milliseconds until the lease expires (zero once elapsed).
    pub remaining_lease: u64,
    /// Milliseconds until the key lease expires (zero once elapsed).
    pub remaining_key_lease: u64,
}

/// The shared per-instance data of a service: the SRV and TXT payload for
/// one `<instance>.<service-type>.<domain.>` leaf, plus its lease state.
///
/// A description is reachable only through the services that hold a handle
/// to it; when the last one goes, the description goes with it.
#[derive(Debug, Clone)]
pub struct Description {
    pub(crate) instance_name: String,
    pub(crate) host_name: String,
    pub(crate) txt_data: Vec<u8>,
    pub(crate) priority: u16,
    pub(crate) weight: u16,
    pub(crate) port: u16,
    pub(crate) ttl: u32,
    pub(crate) lease: u32,
    pub(crate) key_lease: u32,
    pub(crate) update_time: TimeMilli,
}

impl Description {
    pub(crate) fn new(instance_name: String, host_name: String, now: TimeMilli) -> Self {
        Description {
            instance_name,
            host_name,
            txt_data: Vec::new(),
            priority: 0,
            weight: 0,
            port: 0,
            ttl: 0,
            lease: 0,
            key_lease: 0,
            update_time: now,
        }
    }

    /// The full service instance name.
    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// The full name of the host this instance belongs to.
    #[must_use]
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    #[must_use]
    pub fn txt_data(&self) -> &[u8] {
        &self.txt_data
    }

    #[must_use]
    pub fn priority(&self) -> u16 {
        self.priority
    }

    #[must_use]
    pub fn weight(&self) -> u16 {
        self.weight
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    #[must_use]
    pub fn lease(&self) -> u32 {
        self.lease
    }

    #[must_use]
    pub fn key_lease(&self) -> u32 {
        self.key_lease
    }

    pub(crate) fn matches(&self, instance_name: &str) -> bool {
        name::names_equal(&self.instance_name, instance_name)
    }

    /// Drop the advertised payload while keeping the instance name, its
    /// leases, and therefore its reservation.
    pub(crate) fn clear_resources(&mut self) {
        self.txt_data.clear();
        self.priority = 0;
        self.weight = 0;
        self.port = 0;
    }

    pub(crate) fn take_resources_from(&mut self, other: &Description) {
        self.txt_data = other.txt_data.clone();
        self.priority = other.priority;
        self.weight = other.weight;
        self.port = other.port;
        self.ttl = other.ttl;
        self.lease = other.lease;
        self.key_lease = other.key_lease;
        self.update_time = other.update_time;
    }

    pub(crate) fn expire_time(&self) -> TimeMilli {
        self.update_time.add_secs(self.lease)
    }

    pub(crate) fn key_expire_time(&self) -> TimeMilli {
        self.update_time.add_secs(self.key_lease)
    }
}

/// A shared, reference-counted handle to a [`Description`].
///
/// The strong count is the retain count: it equals the number of services
/// (base plus sub-types) referring to the instance. The interior lock is
/// uncontended (the whole server is serialized) and exists so SRV/TXT
/// overwrites are visible through every outstanding handle.
#[derive(Clone)]
pub struct DescriptionHandle(Arc<RwLock<Description>>);

impl DescriptionHandle {
    pub(crate) fn new(description: Description) -> Self {
        DescriptionHandle(Arc::new(RwLock::new(description)))
    }

    #[must_use]
    pub fn read(&self) -> RwLockReadGuard<'_, Description> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Description> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// How many services currently share this description.
    #[must_use]
    pub fn shared_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether two handles refer to the same description.
    #[must_use]
    pub fn same_as(&self, other: &DescriptionHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for DescriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.read().fmt(f)
    }
}

/// One PTR registration of a host: either a base service
/// (`_type._proto.<domain.>`) or a sub-type
/// (`<sub>._sub._type._proto.<domain.>`) of the same instance.
#[derive(Debug, Clone)]
pub struct Service {
    pub(crate) service_name: String,
    pub(crate) is_sub_type: bool,
    pub(crate) is_deleted: bool,
    pub(crate) is_committed: bool,
    pub(crate) update_time: TimeMilli,
    pub(crate) description: DescriptionHandle,
}

impl Service {
    /// The full service name (the PTR owner name).
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The full service instance name (the PTR target).
    #[must_use]
    pub fn instance_name(&self) -> String {
        self.description.read().instance_name.clone()
    }

    #[must_use]
    pub fn is_sub_type(&self) -> bool {
        self.is_sub_type
    }

    /// A service can be deleted while retaining its name; it is guaranteed
    /// deleted whenever its host is.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    /// Whether this service has been merged into the live registry (as
    /// opposed to still being part of a staged update).
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.is_committed
    }

    /// The `<sub>` label of a sub-type service name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] for a base service.
    pub fn sub_type_label(&self) -> Result<&str, Error> {
        name::sub_type_label(&self.service_name)
    }

    /// Read access to the shared SRV/TXT payload.
    #[must_use]
    pub fn description(&self) -> RwLockReadGuard<'_, Description> {
        self.description.read()
    }

    /// The shared handle itself, e.g. to compare sharing with
    /// [`DescriptionHandle::same_as`].
    #[must_use]
    pub fn description_handle(&self) -> &DescriptionHandle {
        &self.description
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.description.read().port
    }

    #[must_use]
    pub fn priority(&self) -> u16 {
        self.description.read().priority
    }

    #[must_use]
    pub fn weight(&self) -> u16 {
        self.description.read().weight
    }

    #[must_use]
    pub fn ttl(&self) -> u32 {
        self.description.read().ttl
    }

    #[must_use]
    pub fn txt_data(&self) -> Vec<u8> {
        self.description.read().txt_data.clone()
    }

    /// Granted LEASE of this service's instance, seconds.
    #[must_use]
    pub fn lease(&self) -> u32 {
        self.description.read().lease
    }

    /// Granted KEY-LEASE of this service's instance, seconds.
    #[must_use]
    pub fn key_lease(&self) -> u32 {
        self.description.read().key_lease
    }

    #[must_use]
    pub fn expire_time(&self) -> TimeMilli {
        self.description.read().expire_time()
    }

    #[must_use]
    pub fn key_expire_time(&self) -> TimeMilli {
        self.description.read().key_expire_time()
    }

    #[must_use]
    pub fn lease_info(&self, now: TimeMilli) -> LeaseInfo {
        let description = self.description.read();
        LeaseInfo {
            lease: description.lease,
            key_lease: description.key_lease,
            remaining_lease: now.millis_until(description.expire_time()),
            remaining_key_lease: now.millis_until(description.key_expire_time()),
        }
    }

    #[must_use]
    pub fn matches_instance_name(&self, instance_name: &str) -> bool {
        self.description.read().matches(instance_name)
    }

    #[must_use]
    pub fn matches_service_name(&self, service_name: &str) -> bool {
        name::names_equal(&self.service_name, service_name)
    }

    pub(crate) fn matches_flags(&self, flags: ServiceFlags) -> bool {
        let type_flag = if self.is_sub_type {
            ServiceFlags::SUB_TYPE
        } else {
            ServiceFlags::BASE_TYPE
        };
        let state_flag = if self.is_deleted {
            ServiceFlags::DELETED
        } else {
            ServiceFlags::ACTIVE
        };
        flags.contains(type_flag) && flags.contains(state_flag)
    }

    /// Soft-delete: keep the name, drop the advertised payload.
    pub(crate) fn soft_delete(&mut self) {
        self.is_deleted = true;
        self.description.write().clear_resources();
    }
}

/// A registered SRP host and the services it carries.
#[derive(Debug, Clone)]
pub struct Host {
    pub(crate) full_name: String,
    pub(crate) addresses: Vec<Ipv6Addr>,
    pub(crate) key: Option<KeyRecord>,
    pub(crate) ttl: u32,
    pub(crate) lease: u32,
    pub(crate) key_lease: u32,
    pub(crate) update_time: TimeMilli,
    pub(crate) services: Vec<Service>,
}

impl Host {
    pub(crate) fn new(full_name: String, now: TimeMilli) -> Self {
        Host {
            full_name,
            addresses: Vec::new(),
            key: None,
            ttl: 0,
            lease: 0,
            key_lease: 0,
            update_time: now,
            services: Vec::new(),
        }
    }

    /// The full host name, trailing dot included.
    #[must_use]
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    #[must_use]
    pub fn addresses(&self) -> &[Ipv6Addr] {
        &self.addresses
    }

    /// The host's KEY record. Committed hosts always carry one.
    #[must_use]
    pub fn key_record(&self) -> Option<&KeyRecord> {
        self.key.as_ref()
    }

    #[must_use]
    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    /// Granted LEASE, seconds.
    #[must_use]
    pub fn lease(&self) -> u32 {
        self.lease
    }

    /// Granted KEY-LEASE, seconds.
    #[must_use]
    pub fn key_lease(&self) -> u32 {
        self.key_lease
    }

    /// A host with a zero lease is soft-deleted: its name stays reserved
    /// for its key until the key lease elapses.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.lease == 0
    }

    #[must_use]
    pub fn update_time(&self) -> TimeMilli {
        self.update_time
    }

    #[must_use]
    pub fn expire_time(&self) -> TimeMilli {
        self.update_time.add_secs(self.lease)
    }

    #[must_use]
    pub fn key_expire_time(&self) -> TimeMilli {
        self.update_time.add_secs(self.key_lease)
    }

    #[must_use]
    pub fn lease_info(&self, now: TimeMilli) -> LeaseInfo {
        LeaseInfo {
            lease: self.lease,
            key_lease: self.key_lease,
            remaining_lease: now.millis_until(self.expire_time()),
            remaining_key_lease: now.millis_until(self.key_expire_time()),
        }
    }

    #[must_use]
    pub fn matches(&self, full_name: &str) -> bool {
        name::names_equal(&self.full_name, full_name)
    }

    /// All services, regardless of state.
    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.iter()
    }

    /// Services matching the given include flags.
    pub fn matching_services(&self, flags: ServiceFlags) -> impl Iterator<Item = &Service> {
        self.services.iter().filter(move |s| s.matches_flags(flags))
    }

    /// The next service after `prev` (or the first, for `None`) matching
    /// the flags and the optional name predicates.
    #[must_use]
    pub fn find_next_service(
        &self,
        prev: Option<&Service>,
        flags: ServiceFlags,
        service_name: Option<&str>,
        instance_name: Option<&str>,
    ) -> Option<&Service> {
        let start = match prev {
            None => 0,
            Some(prev) => {
                self.services
                    .iter()
                    .position(|s| std::ptr::eq(s, prev))
                    .map_or(self.services.len(), |i| i + 1)
            }
        };
        self.services[start..].iter().find(|s| {
            s.matches_flags(flags)
                && service_name.map_or(true, |n| s.matches_service_name(n))
                && instance_name.map_or(true, |n| s.matches_instance_name(n))
        })
    }

    #[must_use]
    pub fn find_service(&self, service_name: &str, instance_name: &str) -> Option<&Service> {
        self.services
            .iter()
            .find(|s| s.matches_service_name(service_name) && s.matches_instance_name(instance_name))
    }

    pub(crate) fn find_service_mut(
        &mut self,
        service_name: &str,
        instance_name: &str,
    ) -> Option<&mut Service> {
        self.services
            .iter_mut()
            .find(|s| s.matches_service_name(service_name) && s.matches_instance_name(instance_name))
    }

    /// The base (non-sub-type) service registered for an instance name.
    #[must_use]
    pub fn find_base_service(&self, instance_name: &str) -> Option<&Service> {
        self.services
            .iter()
            .find(|s| !s.is_sub_type && s.matches_instance_name(instance_name))
    }

    /// The shared description for an instance name, if any service of this
    /// host refers to it.
    #[must_use]
    pub fn find_description(&self, instance_name: &str) -> Option<DescriptionHandle> {
        self.services
            .iter()
            .find(|s| s.matches_instance_name(instance_name))
            .map(|s| s.description.clone())
    }

    #[must_use]
    pub fn has_service_instance(&self, instance_name: &str) -> bool {
        self.services
            .iter()
            .any(|s| s.matches_instance_name(instance_name))
    }

    pub(crate) fn set_full_name(&mut self, full_name: String) {
        self.full_name = full_name;
    }

    pub(crate) fn set_key_record(&mut self, key: KeyRecord) {
        self.key = Some(key);
    }

    /// Remember the TTL the client asked for; replaced by the granted TTL
    /// once the lease policy runs.
    pub(crate) fn set_requested_ttl(&mut self, ttl: u32) {
        self.ttl = ttl;
    }

    pub(crate) fn services_mut(&mut self) -> impl Iterator<Item = &mut Service> {
        self.services.iter_mut()
    }

    /// Apply granted TTL/LEASE/KEY-LEASE to the host and propagate them to
    /// every description it stages.
    pub(crate) fn set_granted(
        &mut self,
        ttl: u32,
        lease: u32,
        key_lease: u32,
        now: TimeMilli,
    ) {
        self.ttl = ttl;
        self.lease = lease;
        self.key_lease = key_lease;
        self.update_time = now;
        for service in &self.services {
            let mut description = service.description.write();
            description.ttl = ttl;
            description.lease = lease;
            description.key_lease = key_lease;
            description.update_time = now;
        }
    }

    /// Record a host address. Unroutable addresses (unspecified, loopback,
    /// multicast, link-local) are not stored.
    pub(crate) fn add_ip6_address(&mut self, address: Ipv6Addr) {
        let is_link_local = address.segments()[0] & 0xffc0 == 0xfe80;
        if address.is_unspecified() || address.is_loopback() || address.is_multicast() || is_link_local
        {
            return;
        }
        if !self.addresses.contains(&address) {
            self.addresses.push(address);
        }
    }

    /// Add a service, sharing the description of any existing service with
    /// the same instance name.
    pub(crate) fn add_new_service(
        &mut self,
        service_name: String,
        instance_name: String,
        is_sub_type: bool,
        now: TimeMilli,
    ) -> &mut Service {
        let description = self.find_description(&instance_name).unwrap_or_else(|| {
            DescriptionHandle::new(Description::new(instance_name, self.full_name.clone(), now))
        });
        self.services.push(Service {
            service_name,
            is_sub_type,
            is_deleted: false,
            is_committed: false,
            update_time: now,
            description,
        });
        self.services.last_mut().expect("service just added")
    }

    /// Stage a soft-deleted copy of another host's service, used so a
    /// host-delete update presents every withdrawn instance to the
    /// service-update handler.
    pub(crate) fn add_copy_of_service_as_deleted_if_not_present(
        &mut self,
        service: &Service,
        now: TimeMilli,
    ) {
        let instance_name = service.instance_name();
        if self.find_service(&service.service_name, &instance_name).is_some() {
            return;
        }
        let copy = self.add_new_service(
            service.service_name.clone(),
            instance_name,
            service.is_sub_type,
            now,
        );
        copy.is_deleted = true;
    }

    /// Soft-delete the host: clear the addresses, zero the lease, and
    /// delete every service. The name stays, and the key lease keeps
    /// counting from the update that granted it.
    pub(crate) fn clear_resources(&mut self) {
        self.addresses.clear();
        self.lease = 0;
        for service in &mut self.services {
            service.soft_delete();
        }
    }

    /// Merge a staged host's services and resources into this live host.
    ///
    /// Instances named by the staged update are overwritten (or created,
    /// sharing a live description where one exists); instances the update
    /// does not mention are left untouched. Addresses, TTL, and the leases
    /// are taken from the staged host; the KEY stays (the conflict check
    /// already proved it matches).
    pub(crate) fn merge_from(&mut self, staged: Host) {
        for staged_service in staged.services {
            let instance_name = staged_service.instance_name();
            match self.find_service_mut(&staged_service.service_name, &instance_name) {
                Some(existing) => {
                    existing.is_deleted = staged_service.is_deleted;
                    existing.is_committed = true;
                    existing.update_time = staged_service.update_time;
                    existing
                        .description
                        .write()
                        .take_resources_from(&staged_service.description.read());
                }
                None => {
                    let description = match self.find_description(&instance_name) {
                        Some(live) => {
                            live.write()
                                .take_resources_from(&staged_service.description.read());
                            live
                        }
                        None => staged_service.description.clone(),
                    };
                    self.services.push(Service {
                        service_name: staged_service.service_name,
                        is_sub_type: staged_service.is_sub_type,
                        is_deleted: staged_service.is_deleted,
                        is_committed: true,
                        update_time: staged_service.update_time,
                        description,
                    });
                }
            }
        }
        self.addresses = staged.addresses;
        self.ttl = staged.ttl;
        self.lease = staged.lease;
        self.key_lease = staged.key_lease;
        self.update_time = staged.update_time;
    }

    /// Expire this host's services independently of the host itself: a
    /// passed lease soft-deletes the service, a passed key-lease removes it
    /// (and its description, once unreferenced). Returns whether anything
    /// changed.
    pub(crate) fn sweep_expired_services(&mut self, now: TimeMilli) -> bool {
        let mut changed = false;
        let mut index = 0;
        while index < self.services.len() {
            let service = &mut self.services[index];
            if service.key_expire_time() <= now {
                self.services.remove(index);
                changed = true;
                continue;
            }
            if !service.is_deleted && service.expire_time() <= now {
                service.soft_delete();
                changed = true;
            }
            index += 1;
        }
        changed
    }

    pub(crate) fn mark_committed(&mut self) {
        for service in &mut self.services {
            service.is_committed = true;
        }
    }
}
