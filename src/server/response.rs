//! DNS response emission for SRP updates.
//!
//! Responses echo the request ID under opcode UPDATE. Successful
//! registrations additionally carry the granted LEASE / KEY-LEASE in an
//! update-lease option on an OPT pseudo-record.

use trust_dns_proto::op::{Header, MessageType, OpCode, ResponseCode};
use trust_dns_proto::serialize::binary::{BinEncodable, BinEncoder};

use crate::error::Error;
use crate::update::wire;

/// EDNS payload size advertised to clients: the mesh IPv6 MTU (1280) minus
/// the UDP header.
const UDP_PAYLOAD_SIZE: u16 = 1272;

pub(crate) fn encode_response(request: &Header, code: ResponseCode) -> Result<Vec<u8>, Error> {
    encode(request, code, None)
}

pub(crate) fn encode_success_response(
    request: &Header,
    lease: u32,
    key_lease: u32,
) -> Result<Vec<u8>, Error> {
    encode(request, ResponseCode::NoError, Some((lease, key_lease)))
}

fn encode(
    request: &Header,
    code: ResponseCode,
    granted: Option<(u32, u32)>,
) -> Result<Vec<u8>, Error> {
    let mut header = Header::new();
    header.set_id(request.id());
    header.set_message_type(MessageType::Response);
    header.set_op_code(OpCode::Update);
    header.set_response_code(code);
    if granted.is_some() {
        header.set_additional_count(1);
    }

    let mut buffer = Vec::with_capacity(40);
    {
        let mut encoder = BinEncoder::new(&mut buffer);
        header.emit(&mut encoder)?;
    }

    if let Some((lease, key_lease)) = granted {
        buffer.push(0); // root owner name
        buffer.extend_from_slice(&wire::TYPE_OPT.to_be_bytes());
        buffer.extend_from_slice(&UDP_PAYLOAD_SIZE.to_be_bytes());
        buffer.extend_from_slice(&[0, 0, 0, 0]); // extended rcode, version, flags
        buffer.extend_from_slice(&12u16.to_be_bytes()); // rdlength
        buffer.extend_from_slice(&wire::OPT_UPDATE_LEASE.to_be_bytes());
        buffer.extend_from_slice(&8u16.to_be_bytes());
        buffer.extend_from_slice(&lease.to_be_bytes());
        buffer.extend_from_slice(&key_lease.to_be_bytes());
    }

    Ok(buffer)
}
