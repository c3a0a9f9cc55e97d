//! Parsing one DNS UPDATE message into a staged [`Host`].
//!
//! The parse runs in fixed phases over the decoded sections: zone check,
//! host description instructions (delete-all / AAAA / KEY), service
//! discovery instructions (PTR), service description instructions
//! (SRV / TXT / delete-all on an instance), then the additional section
//! (update-lease option and SIG(0) verification) and lease granting. Any
//! rejection is purely local: nothing has touched the registry yet, and the
//! caller answers with the rejection's response code.

mod sig;
pub(crate) mod wire;

use std::collections::HashSet;

use trust_dns_proto::op::{Header, MessageType, OpCode};
use trust_dns_proto::serialize::binary::{BinDecodable, BinDecoder};

use crate::error::Error;
use crate::lease::{LeaseConfig, TtlConfig};
use crate::name;
use crate::registry::Host;
use crate::time::TimeMilli;
use wire::{UpdateMessage, WireRData, WireRecord};

/// Maximum DNS name length the registry will stage.
const MAX_NAME_LENGTH: usize = 255;
/// Maximum TXT data the registry will stage for one instance.
const MAX_TXT_DATA_LENGTH: usize = u16::MAX as usize;

/// Per-message parsing context: a snapshot of the server configuration at
/// receive time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MessageContext<'a> {
    pub rx_time: TimeMilli,
    pub domain: &'a str,
    pub ttl_config: TtlConfig,
    pub lease_config: LeaseConfig,
}

/// A successfully parsed update: the staged host graph (granted leases
/// already applied) plus the request header for the eventual response.
#[derive(Debug)]
pub(crate) struct ParsedUpdate {
    pub host: Host,
    pub header: Header,
}

/// A rejected update, with the request header when one could be recovered
/// so the failure response can echo it.
#[derive(Debug)]
pub(crate) struct ParseRejection {
    pub header: Option<Header>,
    pub error: Error,
}

/// Parse and validate one UPDATE message into a staged host.
pub(crate) fn parse_update(
    buffer: &[u8],
    context: &MessageContext<'_>,
) -> Result<ParsedUpdate, ParseRejection> {
    let message = match UpdateMessage::parse(buffer) {
        Ok(message) => message,
        Err(error) => {
            return Err(ParseRejection {
                header: best_effort_header(buffer),
                error,
            });
        }
    };

    let header = message.header.clone();
    match parse_sections(buffer, &message, context) {
        Ok(host) => Ok(ParsedUpdate { host, header }),
        Err(error) => Err(ParseRejection {
            header: Some(header),
            error,
        }),
    }
}

fn parse_sections(
    buffer: &[u8],
    message: &UpdateMessage,
    context: &MessageContext<'_>,
) -> Result<Host, Error> {
    process_zone_section(message, context)?;

    let mut host = Host::new(String::new(), context.rx_time);
    process_host_description_instructions(&mut host, message, context)?;
    process_service_discovery_instructions(&mut host, message, context)?;
    let instances_with_srv = process_service_description_instructions(&mut host, message, context)?;
    let (requested_lease, requested_key_lease) =
        process_additional_section(&host, message, buffer, context)?;
    grant_leases(
        &mut host,
        requested_lease,
        requested_key_lease,
        &instances_with_srv,
        context,
    )?;
    Ok(host)
}

fn process_zone_section(message: &UpdateMessage, context: &MessageContext<'_>) -> Result<(), Error> {
    if message.zone.record_type != wire::TYPE_SOA || message.zone.class != wire::CLASS_IN {
        return Err(Error::Parse("zone entry is not an IN SOA"));
    }
    if !name::names_equal(&message.zone.name, context.domain) {
        return Err(Error::WrongZone(message.zone.name.clone()));
    }
    Ok(())
}

/// Scan for the records describing the host itself: the optional
/// delete-all on the host name, its AAAA addresses, and the mandatory KEY.
fn process_host_description_instructions(
    host: &mut Host,
    message: &UpdateMessage,
    context: &MessageContext<'_>,
) -> Result<(), Error> {
    for record in &message.updates {
        if record.class == wire::CLASS_ANY {
            // Only the "delete all RRsets from a name" form is allowed with
            // class ANY; it names either the host or a service instance and
            // is interpreted by the later phases.
            if !record.is_delete_all() {
                return Err(Error::Parse("unexpected class-ANY record"));
            }
            continue;
        }

        match record.record_type {
            wire::TYPE_AAAA if record.class == wire::CLASS_IN => {
                set_or_check_host_name(host, record, context)?;
                if let WireRData::Aaaa(address) = record.rdata {
                    host.add_ip6_address(address);
                    host.set_requested_ttl(record.ttl);
                }
            }
            wire::TYPE_KEY if record.class == wire::CLASS_IN => {
                set_or_check_host_name(host, record, context)?;
                let WireRData::Key(ref key) = record.rdata else {
                    return Err(Error::Parse("malformed KEY rdata"));
                };
                if !key.is_supported() {
                    return Err(Error::Parse("KEY record is not ECDSA-P256-SHA256"));
                }
                if host.key_record().map_or(false, |existing| existing != key) {
                    return Err(Error::Parse("conflicting KEY records"));
                }
                host.set_key_record(key.clone());
                host.set_requested_ttl(record.ttl);
            }
            _ => {}
        }
    }

    if host.key_record().is_none() {
        return Err(Error::Parse("update is missing the KEY record"));
    }
    if host.full_name().len() > MAX_NAME_LENGTH {
        return Err(Error::NoBufs);
    }
    Ok(())
}

fn set_or_check_host_name(
    host: &mut Host,
    record: &WireRecord,
    context: &MessageContext<'_>,
) -> Result<(), Error> {
    if host.full_name().is_empty() {
        if !name::is_sub_domain_of(&record.name, context.domain) {
            return Err(Error::WrongZone(record.name.clone()));
        }
        host.set_full_name(record.name.clone());
    } else if !host.matches(&record.name) {
        return Err(Error::Parse("update names more than one host"));
    }
    Ok(())
}

/// Each PTR record adds one service (base or sub-type) to the staged host.
fn process_service_discovery_instructions(
    host: &mut Host,
    message: &UpdateMessage,
    context: &MessageContext<'_>,
) -> Result<(), Error> {
    for record in &message.updates {
        if record.record_type != wire::TYPE_PTR {
            continue;
        }
        let WireRData::Ptr(ref instance_name) = record.rdata else {
            return Err(Error::Parse("malformed PTR rdata"));
        };

        // Class NONE with TTL zero deletes the named registration; anything
        // else must be a regular IN registration.
        let is_deleted = if record.class == wire::CLASS_NONE && record.ttl == 0 {
            true
        } else if record.class == wire::CLASS_IN {
            false
        } else {
            return Err(Error::Parse("PTR record has unexpected class"));
        };

        if !name::is_sub_domain_of(&record.name, context.domain) {
            return Err(Error::WrongZone(record.name.clone()));
        }
        if !name::is_sub_domain_of(instance_name, context.domain) {
            return Err(Error::WrongZone(instance_name.clone()));
        }
        if record.name.len() > MAX_NAME_LENGTH || instance_name.len() > MAX_NAME_LENGTH {
            return Err(Error::NoBufs);
        }
        if host.find_service(&record.name, instance_name).is_some() {
            continue;
        }

        let is_sub_type = name::is_sub_type(&record.name);
        let service = host.add_new_service(
            record.name.clone(),
            instance_name.clone(),
            is_sub_type,
            context.rx_time,
        );
        service.is_deleted = is_deleted;
    }
    Ok(())
}

/// SRV and TXT records fill in the per-instance descriptions; a delete-all
/// on an instance name marks its base service deleted.
///
/// Returns the set of instance names that carried an SRV record.
fn process_service_description_instructions(
    host: &mut Host,
    message: &UpdateMessage,
    context: &MessageContext<'_>,
) -> Result<HashSet<String>, Error> {
    let mut instances_with_srv = HashSet::new();

    for record in &message.updates {
        if record.is_delete_all() {
            if host.matches(&record.name) {
                continue;
            }
            if let Some(description) = host.find_description(&record.name) {
                description.write().clear_resources();
                for service in host.services_mut() {
                    if !service.is_sub_type() && service.matches_instance_name(&record.name) {
                        service.is_deleted = true;
                    }
                }
            }
            continue;
        }

        match record.record_type {
            wire::TYPE_SRV if record.class == wire::CLASS_IN => {
                let WireRData::Srv {
                    priority,
                    weight,
                    port,
                    ref target,
                } = record.rdata
                else {
                    return Err(Error::Parse("malformed SRV rdata"));
                };
                if !host.matches(target) {
                    return Err(Error::Parse("SRV target does not match the host name"));
                }
                let Some(description) = host.find_description(&record.name) else {
                    return Err(Error::Parse("SRV record for an unknown service instance"));
                };
                {
                    let mut description = description.write();
                    description.priority = priority;
                    description.weight = weight;
                    description.port = port;
                    description.ttl = record.ttl;
                    description.update_time = context.rx_time;
                }
                instances_with_srv.insert(record.name.to_ascii_lowercase());
            }
            wire::TYPE_TXT if record.class == wire::CLASS_IN => {
                let WireRData::Txt(ref txt_data) = record.rdata else {
                    return Err(Error::Parse("malformed TXT rdata"));
                };
                let Some(description) = host.find_description(&record.name) else {
                    return Err(Error::Parse("TXT record for an unknown service instance"));
                };
                let mut description = description.write();
                if description.txt_data.len() + txt_data.len() > MAX_TXT_DATA_LENGTH {
                    return Err(Error::NoBufs);
                }
                description.txt_data.extend_from_slice(txt_data);
            }
            _ => {}
        }
    }

    Ok(instances_with_srv)
}

/// Extract the update-lease option and verify the SIG(0) signature.
///
/// Returns the requested (LEASE, KEY-LEASE), defaulting to the configured
/// maxima when the update carries no lease option.
fn process_additional_section(
    host: &Host,
    message: &UpdateMessage,
    buffer: &[u8],
    context: &MessageContext<'_>,
) -> Result<(u32, u32), Error> {
    let mut requested_lease = None;
    let mut requested_key_lease = None;
    let mut signature = None;

    for (index, record) in message.additionals.iter().enumerate() {
        match record.rdata {
            WireRData::Opt(ref options) => {
                for (code, data) in options {
                    if *code != wire::OPT_UPDATE_LEASE {
                        continue;
                    }
                    match data.len() {
                        // Short form: LEASE only, KEY-LEASE follows it.
                        4 => {
                            let lease = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                            requested_lease = Some(lease);
                            requested_key_lease = Some(lease);
                        }
                        8 => {
                            requested_lease =
                                Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
                            requested_key_lease =
                                Some(u32::from_be_bytes([data[4], data[5], data[6], data[7]]));
                        }
                        _ => return Err(Error::Parse("malformed update-lease option")),
                    }
                }
            }
            WireRData::Sig(ref fields) => {
                // The SIG must cover everything that follows it: last record.
                if index + 1 != message.additionals.len() {
                    return Err(Error::Parse("SIG record is not the last record"));
                }
                signature = Some(fields);
            }
            _ => {}
        }
    }

    let Some(signature) = signature else {
        return Err(Error::SignatureInvalid);
    };
    if signature.algorithm != crate::registry::KeyRecord::ALGORITHM_ECDSA_P256_SHA256 {
        return Err(Error::SignatureInvalid);
    }
    if !name::names_equal(&signature.signer_name, host.full_name()) {
        return Err(Error::SignatureInvalid);
    }
    let Some(key) = host.key_record() else {
        return Err(Error::SignatureInvalid);
    };
    if !sig::verify_signature(
        key,
        buffer,
        signature.signature_range.clone(),
        &signature.signature,
    ) {
        return Err(Error::SignatureInvalid);
    }

    Ok((
        requested_lease.unwrap_or(context.lease_config.max_lease),
        requested_key_lease.unwrap_or(context.lease_config.max_key_lease),
    ))
}

/// Apply the lease policy and propagate the granted values through the
/// staged host and every staged description.
fn grant_leases(
    host: &mut Host,
    requested_lease: u32,
    requested_key_lease: u32,
    instances_with_srv: &HashSet<String>,
    context: &MessageContext<'_>,
) -> Result<(), Error> {
    let granted_lease = context.lease_config.grant_lease(requested_lease);
    let granted_key_lease = context
        .lease_config
        .grant_key_lease(requested_key_lease)
        .max(granted_lease);
    let granted_ttl = context.ttl_config.grant_ttl(granted_lease, host.ttl());

    if granted_lease > 0 {
        for service in host.services() {
            if !service.is_deleted()
                && !instances_with_srv.contains(&service.instance_name().to_ascii_lowercase())
            {
                return Err(Error::Parse("registered service instance is missing its SRV record"));
            }
        }
    }

    host.set_granted(granted_ttl, granted_lease, granted_key_lease, context.rx_time);
    Ok(())
}

/// Recover just the request header from a datagram, for answering messages
/// rejected before (or without) a full parse. Non-UPDATE traffic yields
/// `None` and is never answered.
pub(crate) fn best_effort_header(buffer: &[u8]) -> Option<Header> {
    let mut decoder = BinDecoder::new(buffer);
    Header::read(&mut decoder)
        .ok()
        .filter(|h| h.message_type() == MessageType::Query && h.op_code() == OpCode::Update)
}
