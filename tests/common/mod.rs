//! Shared helpers for the integration tests: an ECDSA-P256 signing key and
//! a wire-format builder producing the SRP flavor of DNS UPDATE messages.
#![allow(dead_code)]

use std::net::Ipv6Addr;

use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};

const TYPE_SOA: u16 = 6;
const TYPE_PTR: u16 = 12;
const TYPE_TXT: u16 = 16;
const TYPE_SIG: u16 = 24;
const TYPE_KEY: u16 = 25;
const TYPE_AAAA: u16 = 28;
const TYPE_SRV: u16 = 33;
const TYPE_OPT: u16 = 41;
const TYPE_ANY: u16 = 255;

const CLASS_IN: u16 = 1;
const CLASS_NONE: u16 = 254;
const CLASS_ANY: u16 = 255;

const OPT_UPDATE_LEASE: u16 = 2;
const SIGNATURE_LENGTH: usize = 64;

/// A client identity: an ECDSA-P256 key pair for KEY records and SIG(0).
pub struct TestKey {
    key_pair: EcdsaKeyPair,
}

impl TestKey {
    pub fn generate() -> Self {
        let rng = SystemRandom::new();
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .expect("generate test key");
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, document.as_ref())
            .expect("load test key");
        TestKey { key_pair }
    }

    /// The 64-byte x||y public key as carried in a KEY record.
    pub fn public_key(&self) -> [u8; 64] {
        let point = self.key_pair.public_key().as_ref();
        point[1..].try_into().expect("uncompressed P-256 point")
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        let rng = SystemRandom::new();
        self.key_pair
            .sign(&rng, message)
            .expect("sign test message")
            .as_ref()
            .to_vec()
    }
}

struct ServiceEntry {
    service_name: String,
    instance_name: String,
    priority: u16,
    weight: u16,
    port: u16,
    txt: Option<Vec<u8>>,
    with_srv: bool,
    delete: bool,
}

/// Builds one signed SRP update message.
pub struct UpdateBuilder {
    message_id: u16,
    domain: String,
    host_name: String,
    addresses: Vec<Ipv6Addr>,
    services: Vec<ServiceEntry>,
    host_delete: bool,
    record_ttl: u32,
    lease: Option<(u32, u32)>,
}

impl UpdateBuilder {
    pub fn new(message_id: u16, host_name: &str) -> Self {
        UpdateBuilder {
            message_id,
            domain: "default.service.arpa.".to_string(),
            host_name: host_name.to_string(),
            addresses: Vec::new(),
            services: Vec::new(),
            host_delete: false,
            record_ttl: 3600,
            lease: None,
        }
    }

    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }

    pub fn address(mut self, address: &str) -> Self {
        self.addresses.push(address.parse().expect("IPv6 address"));
        self
    }

    pub fn record_ttl(mut self, ttl: u32) -> Self {
        self.record_ttl = ttl;
        self
    }

    /// A full base-service registration: PTR + SRV + TXT.
    pub fn service(mut self, service_name: &str, instance_name: &str, port: u16, txt: &str) -> Self {
        let mut txt_rdata = vec![u8::try_from(txt.len()).expect("txt fits one string")];
        txt_rdata.extend_from_slice(txt.as_bytes());
        self.services.push(ServiceEntry {
            service_name: service_name.to_string(),
            instance_name: instance_name.to_string(),
            priority: 0,
            weight: 0,
            port,
            txt: Some(txt_rdata),
            with_srv: true,
            delete: false,
        });
        self
    }

    /// A sub-type registration: PTR only, pointing at an instance that some
    /// base service in the same update (or registry) describes.
    pub fn sub_type(mut self, service_name: &str, instance_name: &str) -> Self {
        self.services.push(ServiceEntry {
            service_name: service_name.to_string(),
            instance_name: instance_name.to_string(),
            priority: 0,
            weight: 0,
            port: 0,
            txt: None,
            with_srv: false,
            delete: false,
        });
        self
    }

    /// A base-service registration without its SRV record (invalid).
    pub fn service_without_srv(mut self, service_name: &str, instance_name: &str) -> Self {
        self.services.push(ServiceEntry {
            service_name: service_name.to_string(),
            instance_name: instance_name.to_string(),
            priority: 0,
            weight: 0,
            port: 0,
            txt: None,
            with_srv: false,
            delete: false,
        });
        self
    }

    /// Delete one service registration (class NONE PTR).
    pub fn delete_service(mut self, service_name: &str, instance_name: &str) -> Self {
        self.services.push(ServiceEntry {
            service_name: service_name.to_string(),
            instance_name: instance_name.to_string(),
            priority: 0,
            weight: 0,
            port: 0,
            txt: None,
            with_srv: false,
            delete: true,
        });
        self
    }

    /// Turn this into a host-delete update ("delete all RRsets" + KEY).
    pub fn delete_host(mut self) -> Self {
        self.host_delete = true;
        self
    }

    pub fn lease(mut self, lease: u32, key_lease: u32) -> Self {
        self.lease = Some((lease, key_lease));
        self
    }

    /// Encode and sign. The SIG(0) covers the whole message with the
    /// signature field zeroed, which is exactly the message as first built.
    pub fn build(&self, key: &TestKey) -> Vec<u8> {
        let mut updates: Vec<Vec<u8>> = Vec::new();

        if self.host_delete {
            updates.push(encode_record(&self.host_name, TYPE_ANY, CLASS_ANY, 0, &[]));
        }
        for address in &self.addresses {
            updates.push(encode_record(
                &self.host_name,
                TYPE_AAAA,
                CLASS_IN,
                self.record_ttl,
                &address.octets(),
            ));
        }
        updates.push(encode_record(
            &self.host_name,
            TYPE_KEY,
            CLASS_IN,
            self.record_ttl,
            &key_rdata(&key.public_key()),
        ));

        for entry in &self.services {
            let (class, ttl) = if entry.delete {
                (CLASS_NONE, 0)
            } else {
                (CLASS_IN, self.record_ttl)
            };
            updates.push(encode_record(
                &entry.service_name,
                TYPE_PTR,
                class,
                ttl,
                &encode_name(&entry.instance_name),
            ));
            if entry.with_srv {
                let mut srv = Vec::new();
                srv.extend_from_slice(&entry.priority.to_be_bytes());
                srv.extend_from_slice(&entry.weight.to_be_bytes());
                srv.extend_from_slice(&entry.port.to_be_bytes());
                srv.extend_from_slice(&encode_name(&self.host_name));
                updates.push(encode_record(
                    &entry.instance_name,
                    TYPE_SRV,
                    CLASS_IN,
                    self.record_ttl,
                    &srv,
                ));
            }
            if let Some(txt) = &entry.txt {
                updates.push(encode_record(
                    &entry.instance_name,
                    TYPE_TXT,
                    CLASS_IN,
                    self.record_ttl,
                    txt,
                ));
            }
        }

        let mut additionals: Vec<Vec<u8>> = Vec::new();
        if let Some((lease, key_lease)) = self.lease {
            let mut option = Vec::new();
            option.extend_from_slice(&OPT_UPDATE_LEASE.to_be_bytes());
            option.extend_from_slice(&8u16.to_be_bytes());
            option.extend_from_slice(&lease.to_be_bytes());
            option.extend_from_slice(&key_lease.to_be_bytes());
            additionals.push(encode_record(".", TYPE_OPT, 1232, 0, &option));
        }
        additionals.push(encode_record(
            ".",
            TYPE_SIG,
            CLASS_ANY,
            0,
            &sig_rdata(&self.host_name, &[0u8; SIGNATURE_LENGTH]),
        ));

        let mut message = Vec::new();
        message.extend_from_slice(&self.message_id.to_be_bytes());
        message.extend_from_slice(&0x2800u16.to_be_bytes()); // QR=0, opcode UPDATE
        message.extend_from_slice(&1u16.to_be_bytes()); // zones
        message.extend_from_slice(&0u16.to_be_bytes()); // prerequisites
        message.extend_from_slice(&u16::try_from(updates.len()).unwrap().to_be_bytes());
        message.extend_from_slice(&u16::try_from(additionals.len()).unwrap().to_be_bytes());

        message.extend_from_slice(&encode_name(&self.domain));
        message.extend_from_slice(&TYPE_SOA.to_be_bytes());
        message.extend_from_slice(&CLASS_IN.to_be_bytes());

        for record in updates.iter().chain(additionals.iter()) {
            message.extend_from_slice(record);
        }

        // Sign the zero-filled form, then splice the signature into the
        // trailing SIG record.
        let signature = key.sign(&message);
        assert_eq!(signature.len(), SIGNATURE_LENGTH);
        let at = message.len() - SIGNATURE_LENGTH;
        message[at..].copy_from_slice(&signature);
        message
    }
}

fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    let trimmed = name.trim_end_matches('.');
    if !trimmed.is_empty() {
        for label in trimmed.split('.') {
            out.push(u8::try_from(label.len()).expect("label fits"));
            out.extend_from_slice(label.as_bytes());
        }
    }
    out.push(0);
    out
}

fn encode_record(name: &str, rtype: u16, class: u16, ttl: u32, rdata: &[u8]) -> Vec<u8> {
    let mut out = encode_name(name);
    out.extend_from_slice(&rtype.to_be_bytes());
    out.extend_from_slice(&class.to_be_bytes());
    out.extend_from_slice(&ttl.to_be_bytes());
    out.extend_from_slice(&u16::try_from(rdata.len()).expect("rdata fits").to_be_bytes());
    out.extend_from_slice(rdata);
    out
}

fn key_rdata(public_key: &[u8; 64]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0x0200u16.to_be_bytes()); // flags: zone key
    out.push(3); // protocol: DNSSEC
    out.push(13); // algorithm: ECDSA-P256-SHA256
    out.extend_from_slice(public_key);
    out
}

fn sig_rdata(signer: &str, signature: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0u16.to_be_bytes()); // type covered: SIG(0)
    out.push(13); // algorithm
    out.push(0); // labels
    out.extend_from_slice(&0u32.to_be_bytes()); // original TTL
    out.extend_from_slice(&u32::MAX.to_be_bytes()); // expiration
    out.extend_from_slice(&0u32.to_be_bytes()); // inception
    out.extend_from_slice(&0u16.to_be_bytes()); // key tag
    out.extend_from_slice(&encode_name(signer));
    out.extend_from_slice(signature);
    out
}

/// Response peeks. Responses are a 12-byte header, optionally followed by
/// one OPT record carrying the granted leases.
pub fn response_id(response: &[u8]) -> u16 {
    u16::from_be_bytes([response[0], response[1]])
}

pub fn response_code(response: &[u8]) -> u8 {
    response[3] & 0x0f
}

pub fn response_granted_leases(response: &[u8]) -> Option<(u32, u32)> {
    // header(12) name(1) type(2) class(2) ttl(4) rdlen(2) code(2) len(2)
    // lease(4) key-lease(4)
    if response.len() < 35 {
        return None;
    }
    let lease = u32::from_be_bytes(response[27..31].try_into().unwrap());
    let key_lease = u32::from_be_bytes(response[31..35].try_into().unwrap());
    Some((lease, key_lease))
}

pub const NOERROR: u8 = 0;
pub const FORMERR: u8 = 1;
pub const SERVFAIL: u8 = 2;
pub const NOTAUTH: u8 = 9;
pub const YXDOMAIN: u8 = 6;
pub const REFUSED: u8 = 5;
