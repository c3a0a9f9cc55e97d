//! The SRP server core.
//!
//! [`SrpServer`] owns the live registry, the outstanding-update queue, and
//! the state machine; it is driven entirely by its caller: datagrams in
//! via [`SrpServer::handle_message`], handler completions via
//! [`SrpServer::handle_service_update_result`], and the two timers via
//! [`SrpServer::handle_lease_timer`] /
//! [`SrpServer::handle_outstanding_updates_timer`] with deadlines read back
//! through `next_*_fire`. Responses queue on an outbound list for the
//! socket glue ([`udp`]) to transmit. Every operation runs to completion;
//! the only suspension is an update waiting on its handler.

mod response;
pub mod udp;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use trust_dns_proto::op::{Header, ResponseCode};

use crate::config::Config;
use crate::error::Error;
use crate::handler::{DynServiceUpdateHandler, ServiceUpdateId, UpdateResult};
use crate::lease::{LeaseConfig, TtlConfig};
use crate::name;
use crate::registry::{Host, ServiceFlags};
use crate::time::TimeMilli;
use crate::update::{self, MessageContext, ParsedUpdate};

/// The state of the SRP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// Not accepting registrations; the registry is empty.
    Disabled,
    /// Enabled but not bound to a UDP port yet.
    Stopped,
    /// Bound and serving.
    Running,
}

/// How this server's address and port are published to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressMode {
    Unicast,
    Anycast,
}

/// Counts of emitted responses by response class.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ResponseCounters {
    pub success: u64,
    pub server_failure: u64,
    pub format_error: u64,
    pub name_exists: u64,
    pub refused: u64,
    pub other: u64,
}

/// A DNS response waiting for the socket glue to transmit.
#[derive(Debug)]
pub struct OutboundResponse {
    pub target: SocketAddr,
    pub payload: Vec<u8>,
}

/// One in-flight update: the staged host plus everything needed to answer
/// the client once the service-update handler reports back.
#[derive(Debug)]
struct UpdateTransaction {
    id: ServiceUpdateId,
    host: Host,
    deadline: TimeMilli,
    header: Header,
    /// `None` for internally generated updates: commit without replying.
    src: Option<SocketAddr>,
}

/// The SRP server: registry, update pipeline, and lease bookkeeping.
pub struct SrpServer {
    state: State,
    domain: String,
    address_mode: AddressMode,
    anycast_sequence_number: u8,
    auto_enable: bool,
    ttl_config: TtlConfig,
    lease_config: LeaseConfig,
    handler_timeout: Duration,
    port_min: u16,
    port_max: u16,
    port: u16,
    port_cursor: u16,
    hosts: Vec<Host>,
    outstanding: VecDeque<UpdateTransaction>,
    next_update_id: ServiceUpdateId,
    has_registered_any_service: bool,
    counters: ResponseCounters,
    handler: Option<DynServiceUpdateHandler>,
    outbound: VecDeque<OutboundResponse>,
}

impl SrpServer {
    /// Build a disabled server from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an invalid lease/TTL range or
    /// port range, [`Error::InvalidName`] for an unusable domain.
    pub fn new(config: &Config) -> Result<Self, Error> {
        if !config.lease.is_valid() {
            return Err(Error::InvalidConfig("lease range minimum exceeds maximum"));
        }
        if !config.ttl.is_valid() {
            return Err(Error::InvalidConfig("TTL range minimum exceeds maximum"));
        }
        if config.port_min > config.port_max {
            return Err(Error::InvalidConfig("UDP port range minimum exceeds maximum"));
        }
        Ok(SrpServer {
            state: State::Disabled,
            domain: name::to_fqdn(&config.domain)?,
            address_mode: config.address_mode,
            anycast_sequence_number: config.anycast_sequence_number,
            auto_enable: false,
            ttl_config: config.ttl,
            lease_config: config.lease,
            handler_timeout: config.handler_timeout,
            port_min: config.port_min,
            port_max: config.port_max,
            port: 0,
            port_cursor: 0,
            hosts: Vec::new(),
            outstanding: VecDeque::new(),
            next_update_id: 0,
            has_registered_any_service: false,
            counters: ResponseCounters::default(),
            handler: None,
            outbound: VecDeque::new(),
        })
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// The domain this server is authoritative for, trailing dot included.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The bound UDP port, or 0 while not running.
    #[must_use]
    pub fn port(&self) -> u16 {
        if self.state == State::Running {
            self.port
        } else {
            0
        }
    }

    #[must_use]
    pub fn address_mode(&self) -> AddressMode {
        self.address_mode
    }

    #[must_use]
    pub fn anycast_sequence_number(&self) -> u8 {
        self.anycast_sequence_number
    }

    #[must_use]
    pub fn is_auto_enable_mode(&self) -> bool {
        self.auto_enable
    }

    #[must_use]
    pub fn lease_config(&self) -> LeaseConfig {
        self.lease_config
    }

    #[must_use]
    pub fn ttl_config(&self) -> TtlConfig {
        self.ttl_config
    }

    #[must_use]
    pub fn counters(&self) -> ResponseCounters {
        self.counters
    }

    /// Whether any service has ever been committed to this registry.
    #[must_use]
    pub fn has_registered_any_service(&self) -> bool {
        self.has_registered_any_service
    }

    /// Iterate the registered hosts, soft-deleted ones included.
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.iter()
    }

    #[must_use]
    pub fn find_host(&self, full_name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.matches(full_name))
    }

    /// Install the service-update handler. Passing a handler makes every
    /// accepted update wait for its completion; without one, updates commit
    /// immediately.
    pub fn set_service_handler(&mut self, handler: DynServiceUpdateHandler) {
        self.handler = Some(handler);
    }

    /// Enable or disable the server. Calling this turns auto-enable mode
    /// off. Disabling aborts outstanding transactions (no responses; the
    /// clients retransmit) and drains the registry, notifying the handler
    /// for every removed host.
    pub fn set_enabled(&mut self, enabled: bool, now: TimeMilli) {
        self.auto_enable = false;
        if enabled {
            self.enable();
        } else {
            self.disable(now);
        }
    }

    /// Let an external border-routing component drive enable/disable. The
    /// current state is left as-is either way.
    pub fn set_auto_enable_mode(&mut self, enabled: bool) {
        self.auto_enable = enabled;
        debug!(auto_enable = enabled, "auto-enable mode changed");
    }

    fn enable(&mut self) {
        if self.state == State::Disabled {
            self.state = State::Stopped;
            info!(domain = %self.domain, "SRP server enabled");
        }
    }

    fn disable(&mut self, now: TimeMilli) {
        if self.state == State::Disabled {
            return;
        }
        self.stop();
        self.state = State::Disabled;

        let outstanding = std::mem::take(&mut self.outstanding);
        for transaction in outstanding {
            self.commit_update(transaction, Err(Error::Aborted), now);
        }
        let hosts = std::mem::take(&mut self.hosts);
        for mut host in hosts {
            host.clear_resources();
            self.notify_handler_of_removal(&host);
        }
        info!("SRP server disabled");
    }

    /// Pick the next port to try binding, walking the configured range
    /// round-robin so a restart does not land on the previous port.
    pub fn select_port(&mut self) -> u16 {
        let range = u32::from(self.port_max - self.port_min) + 1;
        let offset = u32::from(self.port_cursor) % range;
        self.port_cursor = self.port_cursor.wrapping_add(1);
        self.port_min + u16::try_from(offset).unwrap_or(0)
    }

    /// The configured UDP port range.
    #[must_use]
    pub fn port_range(&self) -> (u16, u16) {
        (self.port_min, self.port_max)
    }

    /// Report a successful socket bind; transitions `Stopped` → `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the server is `Stopped`.
    pub fn start(&mut self, port: u16) -> Result<(), Error> {
        if self.state != State::Stopped {
            return Err(Error::InvalidState);
        }
        self.port = port;
        self.state = State::Running;
        info!(port, "SRP server started");
        Ok(())
    }

    /// Detach from the socket; transitions `Running` → `Stopped`. The
    /// registry is kept.
    pub fn stop(&mut self) {
        if self.state == State::Running {
            self.state = State::Stopped;
            info!(port = self.port, "SRP server stopped");
        }
    }

    /// Set the authoritative domain; allowed while not running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] while running, [`Error::InvalidName`]
    /// for an empty domain.
    pub fn set_domain(&mut self, domain: &str) -> Result<(), Error> {
        if self.state == State::Running {
            return Err(Error::InvalidState);
        }
        self.domain = name::to_fqdn(domain)?;
        Ok(())
    }

    /// Set the published address mode; allowed while not running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] while running.
    pub fn set_address_mode(&mut self, mode: AddressMode) -> Result<(), Error> {
        if self.state == State::Running {
            return Err(Error::InvalidState);
        }
        self.address_mode = mode;
        Ok(())
    }

    /// Set the anycast sequence number; allowed while not running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] while running.
    pub fn set_anycast_sequence_number(&mut self, sequence_number: u8) -> Result<(), Error> {
        if self.state == State::Running {
            return Err(Error::InvalidState);
        }
        self.anycast_sequence_number = sequence_number;
        Ok(())
    }

    /// Replace the lease granting ranges. Hot-settable: applies to updates
    /// parsed from now on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an inverted range.
    pub fn set_lease_config(&mut self, config: LeaseConfig) -> Result<(), Error> {
        if !config.is_valid() {
            return Err(Error::InvalidConfig("lease range minimum exceeds maximum"));
        }
        self.lease_config = config;
        Ok(())
    }

    /// Replace the TTL granting range. Hot-settable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an inverted range.
    pub fn set_ttl_config(&mut self, config: TtlConfig) -> Result<(), Error> {
        if !config.is_valid() {
            return Err(Error::InvalidConfig("TTL range minimum exceeds maximum"));
        }
        self.ttl_config = config;
        Ok(())
    }

    /// Process one received datagram. `src` is `None` for internally
    /// generated updates, which are committed without a reply.
    pub fn handle_message(&mut self, buffer: &[u8], src: Option<SocketAddr>, now: TimeMilli) {
        if self.state != State::Running {
            if let (Some(header), Some(target)) = (update::best_effort_header(buffer), src) {
                debug!("refusing update while not running");
                self.send_error_response(&header, ResponseCode::Refused, target);
            }
            return;
        }

        let parsed = {
            let context = MessageContext {
                rx_time: now,
                domain: &self.domain,
                ttl_config: self.ttl_config,
                lease_config: self.lease_config,
            };
            update::parse_update(buffer, &context)
        };

        match parsed {
            Ok(ParsedUpdate { host, header }) => self.handle_update(host, header, src, now),
            Err(rejection) => {
                warn!(error = %rejection.error, "rejecting SRP update");
                if let (Some(header), Some(target)) = (rejection.header, src) {
                    let code = rejection.error.response_code();
                    self.send_error_response(&header, code, target);
                }
            }
        }
    }

    fn handle_update(
        &mut self,
        mut host: Host,
        header: Header,
        src: Option<SocketAddr>,
        now: TimeMilli,
    ) {
        // A client retransmitting while its first copy is still with the
        // handler gets neither a new transaction nor a response yet.
        if self.find_outstanding(header.id(), host.full_name(), src) {
            debug!(host = host.full_name(), "dropping retransmitted update");
            return;
        }

        if self.has_name_conflicts_with(&host) {
            warn!(host = host.full_name(), "name conflict; rejecting update");
            if let Some(target) = src {
                self.send_error_response(&header, ResponseCode::YXDomain, target);
            }
            return;
        }

        // Present a host-delete to the handler with every live service it
        // withdraws, so advertisers know what to take down.
        if host.lease() == 0 {
            if let Some(live) = self.find_host(host.full_name()) {
                for service in live.matching_services(ServiceFlags::ANY_TYPE_ACTIVE) {
                    host.add_copy_of_service_as_deleted_if_not_present(service, now);
                }
            }
        }

        let id = self.allocate_id();
        let transaction = UpdateTransaction {
            id,
            host,
            deadline: now + self.handler_timeout,
            header,
            src,
        };

        match self.handler.clone() {
            Some(handler) => {
                debug!(id, host = transaction.host.full_name(), "deferring update to handler");
                handler.on_update(id, &transaction.host);
                self.outstanding.push_back(transaction);
            }
            // No handler registered: an implicit, synchronous OK.
            None => self.commit_update(transaction, Ok(()), now),
        }
    }

    /// Receive the result of a deferred update from the service-update
    /// handler. Unknown IDs (already timed out, or never issued) are
    /// ignored.
    pub fn handle_service_update_result(
        &mut self,
        id: ServiceUpdateId,
        result: UpdateResult,
        now: TimeMilli,
    ) {
        let Some(position) = self.outstanding.iter().position(|t| t.id == id) else {
            info!(id, "discarding service update result with no outstanding transaction");
            return;
        };
        if let Some(transaction) = self.outstanding.remove(position) {
            self.commit_update(transaction, result, now);
        }
    }

    /// Deadline of the oldest outstanding transaction, if any.
    #[must_use]
    pub fn next_transaction_fire(&self) -> Option<TimeMilli> {
        self.outstanding.front().map(|t| t.deadline)
    }

    /// Time out every transaction whose deadline has passed, answering
    /// SERVFAIL. The client is trusted to retransmit.
    pub fn handle_outstanding_updates_timer(&mut self, now: TimeMilli) {
        while self
            .outstanding
            .front()
            .map_or(false, |t| t.deadline <= now)
        {
            if let Some(transaction) = self.outstanding.pop_front() {
                warn!(
                    id = transaction.id,
                    host = transaction.host.full_name(),
                    "service update handler timed out"
                );
                self.commit_update(transaction, Err(Error::ResponseTimeout), now);
            }
        }
    }

    fn commit_update(&mut self, transaction: UpdateTransaction, result: UpdateResult, now: TimeMilli) {
        let UpdateTransaction {
            host, header, src, ..
        } = transaction;

        match result {
            Ok(()) => {
                let lease = host.lease();
                let key_lease = host.key_lease();
                let full_name = host.full_name().to_string();
                self.apply_update(host, now);
                info!(host = %full_name, lease, key_lease, "committed SRP update");
                if let Some(target) = src {
                    self.send_success_response(&header, lease, key_lease, target);
                }
            }
            Err(Error::Aborted) => {
                // No response: the client retransmits against the next
                // incarnation of the server.
                debug!(host = host.full_name(), "dropping aborted update");
            }
            Err(error) => {
                warn!(host = host.full_name(), %error, "dropping failed update");
                if let Some(target) = src {
                    self.send_error_response(&header, error.response_code(), target);
                }
            }
        }
    }

    /// Merge a staged host into the live registry. The conflict check has
    /// already passed; this cannot fail.
    fn apply_update(&mut self, staged: Host, now: TimeMilli) {
        let position = self.hosts.iter().position(|h| h.matches(staged.full_name()));

        if staged.lease() == 0 {
            let Some(position) = position else {
                // Deleting a host that never registered is a no-op success.
                return;
            };
            if staged.key_lease() == 0 {
                let removed = self.hosts.remove(position);
                info!(host = removed.full_name(), "removed host and released its name");
            } else {
                let live = &mut self.hosts[position];
                live.key_lease = staged.key_lease();
                live.update_time = staged.update_time();
                live.clear_resources();
                info!(host = live.full_name(), "deleted host, name retained");
            }
            return;
        }

        match position {
            Some(position) => self.hosts[position].merge_from(staged),
            None => {
                let mut staged = staged;
                staged.mark_committed();
                self.hosts.push(staged);
            }
        }
        if let Some(host) = self.find_host_by_position(position) {
            if host.services().next().is_some() {
                self.has_registered_any_service = true;
            }
        }
    }

    fn find_host_by_position(&self, position: Option<usize>) -> Option<&Host> {
        match position {
            Some(position) => self.hosts.get(position),
            None => self.hosts.last(),
        }
    }

    /// A staged host conflicts iff its name is held by a different key, or
    /// any of its instance names is owned by another host.
    fn has_name_conflicts_with(&self, staged: &Host) -> bool {
        if let Some(existing) = self.find_host(staged.full_name()) {
            if existing.key_record() != staged.key_record() {
                return true;
            }
        }
        for service in staged.services() {
            let instance_name = service.instance_name();
            for host in &self.hosts {
                if host.matches(staged.full_name()) {
                    continue;
                }
                if host.has_service_instance(&instance_name) {
                    return true;
                }
            }
        }
        false
    }

    fn find_outstanding(&self, message_id: u16, host_name: &str, src: Option<SocketAddr>) -> bool {
        self.outstanding.iter().any(|t| {
            t.header.id() == message_id && t.src == src && t.host.matches(host_name)
        })
    }

    /// Earliest lease or key-lease expiry across the registry.
    #[must_use]
    pub fn next_lease_fire(&self) -> Option<TimeMilli> {
        let mut earliest = TimeMilli::DISTANT_FUTURE;
        for host in &self.hosts {
            if !host.is_deleted() {
                earliest = earliest.min(host.expire_time());
            }
            earliest = earliest.min(host.key_expire_time());
            for service in host.services() {
                if !service.is_deleted() {
                    earliest = earliest.min(service.expire_time());
                }
                earliest = earliest.min(service.key_expire_time());
            }
        }
        (earliest != TimeMilli::DISTANT_FUTURE).then_some(earliest)
    }

    /// Expire leases: a passed lease soft-deletes (host or service), a
    /// passed key-lease removes outright. The handler is notified for every
    /// host whose advertised state changed.
    pub fn handle_lease_timer(&mut self, now: TimeMilli) {
        // Key-lease expirations first: these hosts leave the registry.
        let mut index = 0;
        while index < self.hosts.len() {
            if self.hosts[index].key_expire_time() <= now {
                let mut host = self.hosts.remove(index);
                info!(host = host.full_name(), "key lease expired; removing host");
                host.clear_resources();
                self.notify_handler_of_removal(&host);
            } else {
                index += 1;
            }
        }

        let mut changed_hosts = Vec::new();
        for (index, host) in self.hosts.iter_mut().enumerate() {
            if host.is_deleted() {
                continue;
            }
            if host.expire_time() <= now {
                info!(host = host.full_name(), "lease expired; host name retained");
                host.clear_resources();
                changed_hosts.push(index);
            } else if host.sweep_expired_services(now) {
                changed_hosts.push(index);
            }
        }

        for index in changed_hosts {
            let handler = self.handler.clone();
            if let Some(handler) = handler {
                let id = self.allocate_id();
                if let Some(host) = self.hosts.get(index) {
                    handler.on_update(id, host);
                }
            }
        }
    }

    fn notify_handler_of_removal(&mut self, host: &Host) {
        if let Some(handler) = self.handler.clone() {
            // Fire-and-forget: the host is gone whatever the handler says.
            let id = self.allocate_id();
            handler.on_update(id, host);
        }
    }

    fn allocate_id(&mut self) -> ServiceUpdateId {
        let id = self.next_update_id;
        self.next_update_id = self.next_update_id.wrapping_add(1);
        id
    }

    /// Pop the next response waiting for transmission.
    pub fn take_outbound(&mut self) -> Option<OutboundResponse> {
        self.outbound.pop_front()
    }

    fn send_success_response(
        &mut self,
        header: &Header,
        lease: u32,
        key_lease: u32,
        target: SocketAddr,
    ) {
        match response::encode_success_response(header, lease, key_lease) {
            Ok(payload) => {
                self.outbound.push_back(OutboundResponse { target, payload });
                self.update_response_counters(ResponseCode::NoError);
            }
            Err(error) => warn!(%error, "failed to encode response"),
        }
    }

    fn send_error_response(&mut self, header: &Header, code: ResponseCode, target: SocketAddr) {
        match response::encode_response(header, code) {
            Ok(payload) => {
                self.outbound.push_back(OutboundResponse { target, payload });
                self.update_response_counters(code);
            }
            Err(error) => warn!(%error, "failed to encode response"),
        }
    }

    fn update_response_counters(&mut self, code: ResponseCode) {
        match code {
            ResponseCode::NoError => self.counters.success += 1,
            ResponseCode::ServFail => self.counters.server_failure += 1,
            ResponseCode::FormErr => self.counters.format_error += 1,
            ResponseCode::YXDomain => self.counters.name_exists += 1,
            ResponseCode::Refused => self.counters.refused += 1,
            _ => self.counters.other += 1,
        }
    }
}
