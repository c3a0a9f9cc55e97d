//! Wire-level walk of one DNS UPDATE datagram.
//!
//! The SRP profile needs two things a fully-parsed DNS message does not
//! give: the small set of record types it actually uses (including KEY and
//! SIG rdata), and the byte offsets of the SIG signature field so the
//! canonical signed form can be recomputed over the received buffer. So the
//! sections are walked once here, on top of trust-dns' decoder and name
//! parsing, into [`WireRecord`]s that the update parser then interprets.

use std::net::Ipv6Addr;
use std::ops::Range;

use trust_dns_proto::op::{Header, MessageType, OpCode};
use trust_dns_proto::rr::Name;
use trust_dns_proto::serialize::binary::{BinDecodable, BinDecoder};

use crate::error::Error;
use crate::name;
use crate::registry::{KeyRecord, ECDSA_P256_KEY_LENGTH};

pub(crate) const TYPE_SOA: u16 = 6;
pub(crate) const TYPE_PTR: u16 = 12;
pub(crate) const TYPE_TXT: u16 = 16;
pub(crate) const TYPE_SIG: u16 = 24;
pub(crate) const TYPE_KEY: u16 = 25;
pub(crate) const TYPE_AAAA: u16 = 28;
pub(crate) const TYPE_SRV: u16 = 33;
pub(crate) const TYPE_OPT: u16 = 41;
pub(crate) const TYPE_ANY: u16 = 255;

pub(crate) const CLASS_IN: u16 = 1;
pub(crate) const CLASS_NONE: u16 = 254;
pub(crate) const CLASS_ANY: u16 = 255;

/// EDNS option code of the dynamic-update lease option.
pub(crate) const OPT_UPDATE_LEASE: u16 = 2;

/// The single entry of the zone section.
#[derive(Debug)]
pub(crate) struct ZoneEntry {
    pub name: String,
    pub record_type: u16,
    pub class: u16,
}

/// SIG rdata with the offsets needed to rebuild the signed form.
#[derive(Debug)]
pub(crate) struct SigFields {
    pub algorithm: u8,
    pub signer_name: String,
    pub signature: Vec<u8>,
    /// Byte range of the signature field within the received message.
    pub signature_range: Range<usize>,
}

#[derive(Debug)]
pub(crate) enum WireRData {
    Aaaa(Ipv6Addr),
    Ptr(String),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    Txt(Vec<u8>),
    Key(KeyRecord),
    Opt(Vec<(u16, Vec<u8>)>),
    Sig(Box<SigFields>),
    /// Zero-length rdata, as used by delete-all instructions.
    Empty,
    /// A record type the SRP profile does not use; skipped.
    Other,
}

#[derive(Debug)]
pub(crate) struct WireRecord {
    pub name: String,
    pub record_type: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: WireRData,
}

impl WireRecord {
    /// An RFC 2136 "delete all RRsets from a name" instruction.
    pub(crate) fn is_delete_all(&self) -> bool {
        self.class == CLASS_ANY
            && self.record_type == TYPE_ANY
            && self.ttl == 0
            && matches!(self.rdata, WireRData::Empty)
    }
}

/// One decoded UPDATE message: header, zone entry, and the update and
/// additional sections in arrival order.
#[derive(Debug)]
pub(crate) struct UpdateMessage {
    pub header: Header,
    pub zone: ZoneEntry,
    pub updates: Vec<WireRecord>,
    pub additionals: Vec<WireRecord>,
}

impl UpdateMessage {
    /// Decode the message, enforcing the SRP structural profile: opcode
    /// UPDATE, one zone entry, no prerequisites, at least one update and
    /// one additional record.
    pub(crate) fn parse(buffer: &[u8]) -> Result<UpdateMessage, Error> {
        let mut decoder = BinDecoder::new(buffer);
        let header = Header::read(&mut decoder)?;

        if header.message_type() != MessageType::Query || header.op_code() != OpCode::Update {
            return Err(Error::Parse("not a DNS UPDATE request"));
        }
        if header.query_count() != 1 {
            return Err(Error::Parse("expected exactly one zone entry"));
        }
        if header.answer_count() != 0 {
            return Err(Error::Parse("prerequisites are not part of the SRP profile"));
        }
        if header.name_server_count() == 0 || header.additional_count() == 0 {
            return Err(Error::Parse("empty update or additional section"));
        }

        let zone = ZoneEntry {
            name: read_name(&mut decoder)?,
            record_type: read_u16(&mut decoder)?,
            class: read_u16(&mut decoder)?,
        };

        let mut updates = Vec::with_capacity(usize::from(header.name_server_count()));
        for _ in 0..header.name_server_count() {
            updates.push(read_record(&mut decoder)?);
        }
        let mut additionals = Vec::with_capacity(usize::from(header.additional_count()));
        for _ in 0..header.additional_count() {
            additionals.push(read_record(&mut decoder)?);
        }

        Ok(UpdateMessage {
            header,
            zone,
            updates,
            additionals,
        })
    }
}

fn read_name(decoder: &mut BinDecoder<'_>) -> Result<String, Error> {
    let parsed = Name::read(decoder)?;
    if parsed.is_root() {
        return Ok(".".to_string());
    }
    name::to_fqdn(&parsed.to_utf8())
}

fn read_u8(decoder: &mut BinDecoder<'_>) -> Result<u8, Error> {
    Ok(decoder
        .read_u8()
        .map_err(trust_dns_proto::error::ProtoError::from)?
        .unverified())
}

fn read_u16(decoder: &mut BinDecoder<'_>) -> Result<u16, Error> {
    Ok(decoder
        .read_u16()
        .map_err(trust_dns_proto::error::ProtoError::from)?
        .unverified())
}

fn read_u32(decoder: &mut BinDecoder<'_>) -> Result<u32, Error> {
    Ok(decoder
        .read_u32()
        .map_err(trust_dns_proto::error::ProtoError::from)?
        .unverified())
}

fn read_bytes(decoder: &mut BinDecoder<'_>, len: usize) -> Result<Vec<u8>, Error> {
    Ok(decoder
        .read_vec(len)
        .map_err(trust_dns_proto::error::ProtoError::from)?
        .unverified())
}

fn read_record(decoder: &mut BinDecoder<'_>) -> Result<WireRecord, Error> {
    let name = read_name(decoder)?;
    let record_type = read_u16(decoder)?;
    let class = read_u16(decoder)?;
    let ttl = read_u32(decoder)?;
    let rdata_length = usize::from(read_u16(decoder)?);
    let rdata_start = decoder.index();
    let rdata_end = rdata_start + rdata_length;

    let rdata = if rdata_length == 0 {
        WireRData::Empty
    } else {
        match record_type {
            TYPE_AAAA => {
                let octets: [u8; 16] = read_bytes(decoder, rdata_length)?
                    .try_into()
                    .map_err(|_| Error::Parse("AAAA rdata is not 16 bytes"))?;
                WireRData::Aaaa(Ipv6Addr::from(octets))
            }
            TYPE_PTR => WireRData::Ptr(read_name(decoder)?),
            TYPE_SRV => WireRData::Srv {
                priority: read_u16(decoder)?,
                weight: read_u16(decoder)?,
                port: read_u16(decoder)?,
                target: read_name(decoder)?,
            },
            TYPE_TXT => WireRData::Txt(read_bytes(decoder, rdata_length)?),
            TYPE_KEY => {
                if rdata_length < 4 {
                    return Err(Error::Parse("truncated KEY rdata"));
                }
                let flags = read_u16(decoder)?;
                let protocol = read_u8(decoder)?;
                let algorithm = read_u8(decoder)?;
                let public_key: [u8; ECDSA_P256_KEY_LENGTH] =
                    read_bytes(decoder, rdata_length - 4)?
                        .try_into()
                        .map_err(|_| Error::Parse("KEY rdata is not an ECDSA-P256 key"))?;
                WireRData::Key(KeyRecord::new(flags, protocol, algorithm, public_key))
            }
            TYPE_OPT => WireRData::Opt(parse_edns_options(&read_bytes(decoder, rdata_length)?)?),
            TYPE_SIG => {
                let _type_covered = read_u16(decoder)?;
                let algorithm = read_u8(decoder)?;
                let _labels = read_u8(decoder)?;
                let _original_ttl = read_u32(decoder)?;
                let _expiration = read_u32(decoder)?;
                let _inception = read_u32(decoder)?;
                let _key_tag = read_u16(decoder)?;
                let signer_name = read_name(decoder)?;
                let signature_start = decoder.index();
                if signature_start > rdata_end {
                    return Err(Error::Parse("truncated SIG rdata"));
                }
                let signature = read_bytes(decoder, rdata_end - signature_start)?;
                WireRData::Sig(Box::new(SigFields {
                    algorithm,
                    signer_name,
                    signature,
                    signature_range: signature_start..rdata_end,
                }))
            }
            _ => {
                read_bytes(decoder, rdata_length)?;
                WireRData::Other
            }
        }
    };

    if decoder.index() != rdata_end {
        return Err(Error::Parse("record rdata length mismatch"));
    }

    Ok(WireRecord {
        name,
        record_type,
        class,
        ttl,
        rdata,
    })
}

fn parse_edns_options(rdata: &[u8]) -> Result<Vec<(u16, Vec<u8>)>, Error> {
    let mut options = Vec::new();
    let mut at = 0;
    while at < rdata.len() {
        if rdata.len() - at < 4 {
            return Err(Error::Parse("truncated EDNS option header"));
        }
        let code = u16::from_be_bytes([rdata[at], rdata[at + 1]]);
        let len = usize::from(u16::from_be_bytes([rdata[at + 2], rdata[at + 3]]));
        at += 4;
        if rdata.len() - at < len {
            return Err(Error::Parse("truncated EDNS option data"));
        }
        options.push((code, rdata[at..at + len].to_vec()));
        at += len;
    }
    Ok(options)
}
