// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! ISO-on-TCP and S7 PDU framing
//!
//! Every S7 request and answer travels as an S7 PDU inside a COTP data
//! TPDU, itself inside a TPKT packet (RFC 1006). Frames are assembled with
//! `bytes` and parsed with `nom`, big-endian throughout.
//!
//! Only the subset spoken by the client and the responder is modelled:
//! COTP class 0 connection setup, Setup Communication, Read Var and
//! Write Var on data blocks, and SZL queries through CPU-functions
//! UserData PDUs.

use bytes::{BufMut, Bytes, BytesMut};
use nom::{
    bytes::complete::take,
    number::complete::{be_u16, be_u24, be_u8},
    IResult,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::error::{Error, ReturnCode};

/// TPKT version byte (RFC 1006)
pub const TPKT_VERSION: u8 = 0x03;
/// Protocol identifier present in every S7 PDU
pub const S7_PROTOCOL_ID: u8 = 0x32;
/// Area code for data block access
pub const AREA_DATA_BLOCK: u8 = 0x84;
/// One past the highest byte offset an item address can carry. Offsets
/// travel as a 3 byte bit address, so byte 0x001F_FFFF is the last one
/// that fits the field.
pub const ADDRESS_LIMIT: u32 = 0x0020_0000;

// COTP TPDU codes, upper nibble significant
const COTP_CONNECTION_REQUEST: u8 = 0xE0;
const COTP_CONNECTION_CONFIRM: u8 = 0xD0;
const COTP_DISCONNECT_REQUEST: u8 = 0x80;
const COTP_DATA: u8 = 0xF0;

// COTP connect parameter codes
const PARAM_TPDU_SIZE: u8 = 0xC0;
const PARAM_SRC_TSAP: u8 = 0xC1;
const PARAM_DST_TSAP: u8 = 0xC2;

/// Requested TPDU size exponent (2^10 = 1024 bytes)
pub const TPDU_SIZE_1024: u8 = 0x0A;

// S7 function codes
pub const FUNC_SETUP_COMMUNICATION: u8 = 0xF0;
pub const FUNC_READ_VAR: u8 = 0x04;
pub const FUNC_WRITE_VAR: u8 = 0x05;

// Transport size inside address item specifications (byte granular access)
const TRANSPORT_SIZE_BYTE: u8 = 0x02;

// Transport sizes inside payload data items
pub const DATA_TRANSPORT_BYTES: u8 = 0x04; // length counted in bits
pub const DATA_TRANSPORT_OCTETS: u8 = 0x09; // length counted in bytes

// SZL identifiers used by the diagnostic calls
pub const SZL_ID_ORDER_NUMBER: u16 = 0x0011;
pub const SZL_ID_CPU_STATE: u16 = 0x0424;

fn parse_failure(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))
}

/// S7 PDU kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Job = 0x01,
    Ack = 0x02,
    AckData = 0x03,
    UserData = 0x07,
}

/// Fixed S7 PDU header. Ack and AckData answers carry two extra error bytes.
#[derive(Debug, Clone)]
pub struct S7Header {
    pub message_type: MessageType,
    pub pdu_reference: u16,
    pub parameter_length: u16,
    pub data_length: u16,
    pub error_class: u8,
    pub error_code: u8,
}

impl S7Header {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, protocol_id) = be_u8(input)?;
        if protocol_id != S7_PROTOCOL_ID {
            return Err(parse_failure(input));
        }
        let (input, raw_type) = be_u8(input)?;
        let message_type = match raw_type {
            0x01 => MessageType::Job,
            0x02 => MessageType::Ack,
            0x03 => MessageType::AckData,
            0x07 => MessageType::UserData,
            _ => return Err(parse_failure(input)),
        };
        let (input, _reserved) = be_u16(input)?;
        let (input, pdu_reference) = be_u16(input)?;
        let (input, parameter_length) = be_u16(input)?;
        let (input, data_length) = be_u16(input)?;
        let (input, error_class, error_code) =
            if matches!(message_type, MessageType::Ack | MessageType::AckData) {
                let (input, class) = be_u8(input)?;
                let (input, code) = be_u8(input)?;
                (input, class, code)
            } else {
                (input, 0, 0)
            };
        Ok((
            input,
            S7Header {
                message_type,
                pdu_reference,
                parameter_length,
                data_length,
                error_class,
                error_code,
            },
        ))
    }
}

/// Address of one variable in a Read Var or Write Var request.
///
/// `start` is a byte offset; the wire carries it as a bit address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemSpec {
    pub db_number: u16,
    pub area: u8,
    pub start: u32,
    pub length: u16,
}

impl ItemSpec {
    /// Byte span inside a data block
    pub fn db_bytes(db_number: u16, start: u32, length: u16) -> Self {
        Self {
            db_number,
            area: AREA_DATA_BLOCK,
            start,
            length,
        }
    }

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, var_spec) = be_u8(input)?;
        let (input, _addr_length) = be_u8(input)?;
        let (input, syntax_id) = be_u8(input)?;
        if var_spec != 0x12 || syntax_id != 0x10 {
            return Err(parse_failure(input));
        }
        let (input, _transport) = be_u8(input)?;
        let (input, length) = be_u16(input)?;
        let (input, db_number) = be_u16(input)?;
        let (input, area) = be_u8(input)?;
        let (input, bit_address) = be_u24(input)?;
        Ok((
            input,
            ItemSpec {
                db_number,
                area,
                start: bit_address / 8,
                length,
            },
        ))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(0x12); // variable specification
        buf.put_u8(0x0A); // address length
        buf.put_u8(0x10); // S7Any addressing
        buf.put_u8(TRANSPORT_SIZE_BYTE);
        buf.put_u16(self.length);
        buf.put_u16(self.db_number);
        buf.put_u8(self.area);
        buf.put_uint(u64::from(self.start) * 8, 3);
    }
}

/// One payload entry of a Read Var answer, a Write Var request or an SZL
/// exchange
#[derive(Debug, Clone)]
pub struct DataItem {
    pub return_code: u8,
    pub transport_size: u8,
    pub data: Bytes,
}

impl DataItem {
    pub fn success(data: Bytes) -> Self {
        Self {
            return_code: ReturnCode::Success.as_u8(),
            transport_size: DATA_TRANSPORT_BYTES,
            data,
        }
    }

    pub fn failure(code: ReturnCode) -> Self {
        Self {
            return_code: code.as_u8(),
            transport_size: 0,
            data: Bytes::new(),
        }
    }

    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, return_code) = be_u8(input)?;
        let (input, transport_size) = be_u8(input)?;
        let (input, length) = be_u16(input)?;
        let byte_len = match transport_size {
            DATA_TRANSPORT_BYTES => (length as usize) / 8,
            _ => length as usize,
        };
        let (input, data) = take(byte_len)(input)?;
        Ok((
            input,
            DataItem {
                return_code,
                transport_size,
                data: Bytes::copy_from_slice(data),
            },
        ))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.return_code);
        buf.put_u8(self.transport_size);
        let length = match self.transport_size {
            DATA_TRANSPORT_BYTES => (self.data.len() as u16) * 8,
            _ => self.data.len() as u16,
        };
        buf.put_u16(length);
        buf.put_slice(&self.data);
    }
}

/// CPU-functions UserData parameter (read SZL subfunction)
#[derive(Debug, Clone)]
pub struct SzlParameter {
    pub is_response: bool,
    pub sequence: u8,
    pub error_code: u16,
}

impl SzlParameter {
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, head) = take(3usize)(input)?;
        if head != [0x00, 0x01, 0x12] {
            return Err(parse_failure(input));
        }
        let (input, param_length) = be_u8(input)?;
        let (input, method) = be_u8(input)?;
        let (input, type_group) = be_u8(input)?;
        let (input, subfunction) = be_u8(input)?;
        // only the CPU-functions group and the read-SZL subfunction are spoken
        if type_group & 0x0F != 0x04 || subfunction != 0x01 {
            return Err(parse_failure(input));
        }
        let (input, sequence) = be_u8(input)?;
        let (input, error_code) = if param_length >= 8 {
            let (input, _data_unit_ref) = be_u8(input)?;
            let (input, _last_data_unit) = be_u8(input)?;
            let (input, error_code) = be_u16(input)?;
            (input, error_code)
        } else {
            (input, 0)
        };
        Ok((
            input,
            SzlParameter {
                is_response: method == 0x12,
                sequence,
                error_code,
            },
        ))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&[0x00, 0x01, 0x12]);
        if self.is_response {
            buf.put_u8(0x08);
            buf.put_u8(0x12); // method: response
            buf.put_u8(0x84); // response, CPU functions
            buf.put_u8(0x01); // subfunction: read SZL
            buf.put_u8(self.sequence);
            buf.put_u8(0x00); // data unit reference
            buf.put_u8(0x00); // last data unit
            buf.put_u16(self.error_code);
        } else {
            buf.put_u8(0x04);
            buf.put_u8(0x11); // method: request
            buf.put_u8(0x44); // request, CPU functions
            buf.put_u8(0x01); // subfunction: read SZL
            buf.put_u8(self.sequence);
        }
    }
}

/// Decoded content of an SZL answer
#[derive(Debug, Clone)]
pub struct SzlData {
    pub id: u16,
    pub index: u16,
    pub record_len: u16,
    pub records: Vec<Bytes>,
}

impl SzlData {
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        fn inner(input: &[u8]) -> IResult<&[u8], SzlData> {
            let (input, id) = be_u16(input)?;
            let (input, index) = be_u16(input)?;
            let (input, record_len) = be_u16(input)?;
            let (input, record_count) = be_u16(input)?;
            let mut records = Vec::with_capacity(record_count as usize);
            let mut rest = input;
            if record_len > 0 {
                for _ in 0..record_count {
                    let (remaining, record) = take(record_len as usize)(rest)?;
                    records.push(Bytes::copy_from_slice(record));
                    rest = remaining;
                }
            }
            Ok((
                rest,
                SzlData {
                    id,
                    index,
                    record_len,
                    records,
                },
            ))
        }
        match inner(data) {
            Ok((_, szl)) => Ok(szl),
            Err(_) => Err(Error::Protocol("malformed SZL data".into())),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u16(self.id);
        buf.put_u16(self.index);
        buf.put_u16(self.record_len);
        buf.put_u16(self.records.len() as u16);
        for record in &self.records {
            buf.put_slice(record);
        }
        buf.freeze()
    }
}

/// Parameter section of a PDU, discriminated by the function code
#[derive(Debug, Clone)]
pub enum S7Parameter {
    /// Error acks carry no parameter at all
    None,
    Setup {
        max_amq_caller: u16,
        max_amq_callee: u16,
        pdu_length: u16,
    },
    ReadVar(Vec<ItemSpec>),
    ReadVarAck {
        item_count: u8,
    },
    WriteVar(Vec<ItemSpec>),
    WriteVarAck {
        item_count: u8,
    },
    Szl(SzlParameter),
}

impl S7Parameter {
    fn parse(input: &[u8], message_type: MessageType) -> IResult<&[u8], Self> {
        if message_type == MessageType::UserData {
            let (input, szl) = SzlParameter::parse(input)?;
            return Ok((input, S7Parameter::Szl(szl)));
        }
        let (input, function) = be_u8(input)?;
        match function {
            FUNC_SETUP_COMMUNICATION => {
                let (input, _reserved) = be_u8(input)?;
                let (input, max_amq_caller) = be_u16(input)?;
                let (input, max_amq_callee) = be_u16(input)?;
                let (input, pdu_length) = be_u16(input)?;
                Ok((
                    input,
                    S7Parameter::Setup {
                        max_amq_caller,
                        max_amq_callee,
                        pdu_length,
                    },
                ))
            }
            FUNC_READ_VAR | FUNC_WRITE_VAR => {
                let (mut input, item_count) = be_u8(input)?;
                if message_type == MessageType::Job {
                    let mut items = Vec::with_capacity(item_count as usize);
                    for _ in 0..item_count {
                        let (rest, item) = ItemSpec::parse(input)?;
                        items.push(item);
                        input = rest;
                    }
                    if function == FUNC_READ_VAR {
                        Ok((input, S7Parameter::ReadVar(items)))
                    } else {
                        Ok((input, S7Parameter::WriteVar(items)))
                    }
                } else if function == FUNC_READ_VAR {
                    Ok((input, S7Parameter::ReadVarAck { item_count }))
                } else {
                    Ok((input, S7Parameter::WriteVarAck { item_count }))
                }
            }
            _ => Err(parse_failure(input)),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            S7Parameter::None => {}
            S7Parameter::Setup {
                max_amq_caller,
                max_amq_callee,
                pdu_length,
            } => {
                buf.put_u8(FUNC_SETUP_COMMUNICATION);
                buf.put_u8(0x00);
                buf.put_u16(*max_amq_caller);
                buf.put_u16(*max_amq_callee);
                buf.put_u16(*pdu_length);
            }
            S7Parameter::ReadVar(items) => {
                buf.put_u8(FUNC_READ_VAR);
                buf.put_u8(items.len() as u8);
                for item in items {
                    item.encode(buf);
                }
            }
            S7Parameter::ReadVarAck { item_count } => {
                buf.put_u8(FUNC_READ_VAR);
                buf.put_u8(*item_count);
            }
            S7Parameter::WriteVar(items) => {
                buf.put_u8(FUNC_WRITE_VAR);
                buf.put_u8(items.len() as u8);
                for item in items {
                    item.encode(buf);
                }
            }
            S7Parameter::WriteVarAck { item_count } => {
                buf.put_u8(FUNC_WRITE_VAR);
                buf.put_u8(*item_count);
            }
            S7Parameter::Szl(szl) => szl.encode(buf),
        }
    }
}

/// A complete S7 PDU: header, parameter and payload items
#[derive(Debug, Clone)]
pub struct S7Pdu {
    pub message_type: MessageType,
    pub pdu_reference: u16,
    pub error_class: u8,
    pub error_code: u8,
    pub parameter: S7Parameter,
    pub payload: Vec<DataItem>,
}

impl S7Pdu {
    fn job(pdu_reference: u16, parameter: S7Parameter, payload: Vec<DataItem>) -> Self {
        Self {
            message_type: MessageType::Job,
            pdu_reference,
            error_class: 0,
            error_code: 0,
            parameter,
            payload,
        }
    }

    fn ack_data(pdu_reference: u16, parameter: S7Parameter, payload: Vec<DataItem>) -> Self {
        Self {
            message_type: MessageType::AckData,
            pdu_reference,
            error_class: 0,
            error_code: 0,
            parameter,
            payload,
        }
    }

    pub fn setup_request(pdu_reference: u16, pdu_length: u16) -> Self {
        Self::job(
            pdu_reference,
            S7Parameter::Setup {
                max_amq_caller: 1,
                max_amq_callee: 1,
                pdu_length,
            },
            Vec::new(),
        )
    }

    pub fn setup_response(
        pdu_reference: u16,
        max_amq_caller: u16,
        max_amq_callee: u16,
        pdu_length: u16,
    ) -> Self {
        Self::ack_data(
            pdu_reference,
            S7Parameter::Setup {
                max_amq_caller,
                max_amq_callee,
                pdu_length,
            },
            Vec::new(),
        )
    }

    pub fn read_request(pdu_reference: u16, item: ItemSpec) -> Self {
        Self::job(pdu_reference, S7Parameter::ReadVar(vec![item]), Vec::new())
    }

    pub fn read_response(pdu_reference: u16, items: Vec<DataItem>) -> Self {
        let item_count = items.len() as u8;
        Self::ack_data(pdu_reference, S7Parameter::ReadVarAck { item_count }, items)
    }

    pub fn write_request(pdu_reference: u16, item: ItemSpec, data: Bytes) -> Self {
        Self::job(
            pdu_reference,
            S7Parameter::WriteVar(vec![item]),
            vec![DataItem::success(data)],
        )
    }

    pub fn write_response(pdu_reference: u16, codes: Vec<ReturnCode>) -> Self {
        let items = codes
            .iter()
            .map(|code| DataItem {
                return_code: code.as_u8(),
                transport_size: 0,
                data: Bytes::new(),
            })
            .collect();
        Self::ack_data(
            pdu_reference,
            S7Parameter::WriteVarAck {
                item_count: codes.len() as u8,
            },
            items,
        )
    }

    pub fn szl_request(pdu_reference: u16, id: u16, index: u16) -> Self {
        let mut data = BytesMut::with_capacity(4);
        data.put_u16(id);
        data.put_u16(index);
        Self {
            message_type: MessageType::UserData,
            pdu_reference,
            error_class: 0,
            error_code: 0,
            parameter: S7Parameter::Szl(SzlParameter {
                is_response: false,
                sequence: 0,
                error_code: 0,
            }),
            payload: vec![DataItem {
                return_code: ReturnCode::Success.as_u8(),
                transport_size: DATA_TRANSPORT_OCTETS,
                data: data.freeze(),
            }],
        }
    }

    pub fn szl_response(pdu_reference: u16, sequence: u8, data: SzlData) -> Self {
        Self {
            message_type: MessageType::UserData,
            pdu_reference,
            error_class: 0,
            error_code: 0,
            parameter: S7Parameter::Szl(SzlParameter {
                is_response: true,
                sequence,
                error_code: 0,
            }),
            payload: vec![DataItem {
                return_code: ReturnCode::Success.as_u8(),
                transport_size: DATA_TRANSPORT_OCTETS,
                data: data.encode(),
            }],
        }
    }

    pub fn szl_error(pdu_reference: u16, sequence: u8, code: ReturnCode) -> Self {
        Self {
            message_type: MessageType::UserData,
            pdu_reference,
            error_class: 0,
            error_code: 0,
            parameter: S7Parameter::Szl(SzlParameter {
                is_response: true,
                sequence,
                error_code: 0xD402, // info function not available
            }),
            payload: vec![DataItem::failure(code)],
        }
    }

    /// Ack without a parameter, used to reject requests the responder does
    /// not understand
    pub fn job_error(pdu_reference: u16, error_class: u8, error_code: u8) -> Self {
        Self {
            message_type: MessageType::AckData,
            pdu_reference,
            error_class,
            error_code,
            parameter: S7Parameter::None,
            payload: Vec::new(),
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut param = BytesMut::new();
        self.parameter.encode(&mut param);

        let mut data = BytesMut::new();
        match self.parameter {
            // write acks carry bare return codes, one byte per item
            S7Parameter::WriteVarAck { .. } => {
                for item in &self.payload {
                    data.put_u8(item.return_code);
                }
            }
            _ => {
                for item in &self.payload {
                    item.encode(&mut data);
                }
            }
        }

        let mut buf = BytesMut::with_capacity(12 + param.len() + data.len());
        buf.put_u8(S7_PROTOCOL_ID);
        buf.put_u8(self.message_type as u8);
        buf.put_u16(0x0000); // reserved
        buf.put_u16(self.pdu_reference);
        buf.put_u16(param.len() as u16);
        buf.put_u16(data.len() as u16);
        if matches!(self.message_type, MessageType::Ack | MessageType::AckData) {
            buf.put_u8(self.error_class);
            buf.put_u8(self.error_code);
        }
        buf.extend_from_slice(&param);
        buf.extend_from_slice(&data);
        buf
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, header) = S7Header::parse(input)?;
        let (input, param_bytes) = take(header.parameter_length as usize)(input)?;
        let (input, data_bytes) = take(header.data_length as usize)(input)?;

        let parameter = if header.parameter_length == 0 {
            S7Parameter::None
        } else {
            let (_, parameter) = S7Parameter::parse(param_bytes, header.message_type)?;
            parameter
        };

        let payload = match &parameter {
            S7Parameter::WriteVarAck { item_count } => {
                if data_bytes.len() < *item_count as usize {
                    return Err(parse_failure(data_bytes));
                }
                data_bytes
                    .iter()
                    .take(*item_count as usize)
                    .map(|code| DataItem {
                        return_code: *code,
                        transport_size: 0,
                        data: Bytes::new(),
                    })
                    .collect()
            }
            S7Parameter::ReadVarAck { item_count } => {
                parse_data_items(data_bytes, *item_count as usize)?
            }
            S7Parameter::WriteVar(items) => parse_data_items(data_bytes, items.len())?,
            S7Parameter::Szl(_) => parse_data_items(data_bytes, 1)?,
            _ => Vec::new(),
        };

        Ok((
            input,
            S7Pdu {
                message_type: header.message_type,
                pdu_reference: header.pdu_reference,
                error_class: header.error_class,
                error_code: header.error_code,
                parameter,
                payload,
            },
        ))
    }
}

// Consecutive data items are padded to even offsets, except the last one.
fn parse_data_items(
    mut input: &[u8],
    count: usize,
) -> Result<Vec<DataItem>, nom::Err<nom::error::Error<&[u8]>>> {
    let mut items = Vec::with_capacity(count);
    for index in 0..count {
        let (rest, item) = DataItem::parse(input)?;
        let odd = item.data.len() % 2 == 1;
        items.push(item);
        input = if odd && index + 1 < count && !rest.is_empty() {
            &rest[1..]
        } else {
            rest
        };
    }
    Ok(items)
}

/// PDU reference of a request whose body may not parse, recovered from the
/// fixed header so the answer can still carry it
pub fn peek_reference(payload: &[u8]) -> Option<u16> {
    S7Header::parse(payload)
        .ok()
        .map(|(_, header)| header.pdu_reference)
}

/// Parse a complete S7 PDU out of a COTP data payload
pub fn parse_pdu(payload: &[u8]) -> Result<S7Pdu, Error> {
    match S7Pdu::parse(payload) {
        Ok((_, pdu)) => Ok(pdu),
        Err(_) => Err(Error::Protocol("malformed S7 PDU".into())),
    }
}

/// Connection negotiation fields shared by CR and CC TPDUs
#[derive(Debug, Clone, Default)]
pub struct CotpConnection {
    pub dst_ref: u16,
    pub src_ref: u16,
    pub class: u8,
    pub tpdu_size: Option<u8>,
    pub src_tsap: Option<u16>,
    pub dst_tsap: Option<u16>,
}

/// COTP (ISO 8073 class 0) TPDUs used by the ISO-on-TCP transport
#[derive(Debug, Clone)]
pub enum CotpTpdu {
    ConnectionRequest(CotpConnection),
    ConnectionConfirm(CotpConnection),
    DisconnectRequest { reason: u8 },
    Data { last: bool, payload: Bytes },
}

impl CotpTpdu {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, header_length) = be_u8(input)?;
        let (input, code) = be_u8(input)?;
        match code & 0xF0 {
            COTP_DATA => {
                let (input, flags) = be_u8(input)?;
                let (rest, payload) = take(input.len())(input)?;
                Ok((
                    rest,
                    CotpTpdu::Data {
                        last: flags & 0x80 != 0,
                        payload: Bytes::copy_from_slice(payload),
                    },
                ))
            }
            COTP_CONNECTION_REQUEST | COTP_CONNECTION_CONFIRM => {
                let (input, dst_ref) = be_u16(input)?;
                let (input, src_ref) = be_u16(input)?;
                let (input, class) = be_u8(input)?;
                // header_length counts bytes after itself; 6 are fixed
                let var_len = (header_length as usize).saturating_sub(6);
                let (input, mut var_part) = take(var_len)(input)?;
                let mut conn = CotpConnection {
                    dst_ref,
                    src_ref,
                    class,
                    ..Default::default()
                };
                while !var_part.is_empty() {
                    let (rest, param_code) = be_u8(var_part)?;
                    let (rest, param_len) = be_u8(rest)?;
                    let (rest, value) = take(param_len as usize)(rest)?;
                    match param_code {
                        PARAM_TPDU_SIZE if value.len() == 1 => conn.tpdu_size = Some(value[0]),
                        PARAM_SRC_TSAP if value.len() == 2 => {
                            conn.src_tsap = Some(u16::from_be_bytes([value[0], value[1]]))
                        }
                        PARAM_DST_TSAP if value.len() == 2 => {
                            conn.dst_tsap = Some(u16::from_be_bytes([value[0], value[1]]))
                        }
                        _ => {} // unknown parameters are skipped
                    }
                    var_part = rest;
                }
                let tpdu = if code & 0xF0 == COTP_CONNECTION_REQUEST {
                    CotpTpdu::ConnectionRequest(conn)
                } else {
                    CotpTpdu::ConnectionConfirm(conn)
                };
                Ok((input, tpdu))
            }
            COTP_DISCONNECT_REQUEST => {
                let (input, _dst_ref) = be_u16(input)?;
                let (input, _src_ref) = be_u16(input)?;
                let (input, reason) = be_u8(input)?;
                Ok((input, CotpTpdu::DisconnectRequest { reason }))
            }
            _ => Err(parse_failure(input)),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            CotpTpdu::Data { last, payload } => {
                buf.put_u8(2);
                buf.put_u8(COTP_DATA);
                buf.put_u8(if *last { 0x80 } else { 0x00 });
                buf.put_slice(payload);
            }
            CotpTpdu::ConnectionRequest(conn) | CotpTpdu::ConnectionConfirm(conn) => {
                let mut var = BytesMut::new();
                if let Some(size) = conn.tpdu_size {
                    var.put_u8(PARAM_TPDU_SIZE);
                    var.put_u8(1);
                    var.put_u8(size);
                }
                if let Some(tsap) = conn.src_tsap {
                    var.put_u8(PARAM_SRC_TSAP);
                    var.put_u8(2);
                    var.put_u16(tsap);
                }
                if let Some(tsap) = conn.dst_tsap {
                    var.put_u8(PARAM_DST_TSAP);
                    var.put_u8(2);
                    var.put_u16(tsap);
                }
                buf.put_u8((6 + var.len()) as u8);
                buf.put_u8(match self {
                    CotpTpdu::ConnectionRequest(_) => COTP_CONNECTION_REQUEST,
                    _ => COTP_CONNECTION_CONFIRM,
                });
                buf.put_u16(conn.dst_ref);
                buf.put_u16(conn.src_ref);
                buf.put_u8(conn.class);
                buf.extend_from_slice(&var);
            }
            CotpTpdu::DisconnectRequest { reason } => {
                buf.put_u8(6);
                buf.put_u8(COTP_DISCONNECT_REQUEST);
                buf.put_u16(0x0000);
                buf.put_u16(0x0000);
                buf.put_u8(*reason);
            }
        }
    }
}

/// Write one TPDU wrapped in a TPKT packet
pub async fn write_tpdu<T>(stream: &mut T, tpdu: &CotpTpdu) -> Result<(), Error>
where
    T: AsyncWriteExt + Unpin,
{
    let mut body = BytesMut::new();
    tpdu.encode(&mut body);
    let mut frame = BytesMut::with_capacity(body.len() + 4);
    frame.put_u8(TPKT_VERSION);
    frame.put_u8(0x00);
    frame.put_u16((body.len() + 4) as u16);
    frame.extend_from_slice(&body);
    stream.write_all(&frame).await?;
    Ok(())
}

/// Read one TPKT packet and parse the TPDU inside it
pub async fn read_tpdu<T>(stream: &mut T) -> Result<CotpTpdu, Error>
where
    T: AsyncReadExt + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != TPKT_VERSION {
        return Err(Error::Protocol(format!(
            "unexpected TPKT version {:#04x}",
            header[0]
        )));
    }
    let total = u16::from_be_bytes([header[2], header[3]]) as usize;
    // the smallest valid TPDU is a data TPDU of three bytes
    if total < 7 {
        return Err(Error::Protocol(format!("TPKT length {} too small", total)));
    }
    let mut body = vec![0u8; total - 4];
    stream.read_exact(&mut body).await?;
    match CotpTpdu::parse(&body) {
        Ok((_, tpdu)) => Ok(tpdu),
        Err(_) => Err(Error::Protocol("malformed COTP TPDU".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cotp_connection_round_trip() {
        let request = CotpTpdu::ConnectionRequest(CotpConnection {
            dst_ref: 0,
            src_ref: 1,
            class: 0,
            tpdu_size: Some(TPDU_SIZE_1024),
            src_tsap: Some(0x0100),
            dst_tsap: Some(0x0121),
        });
        let mut buf = BytesMut::new();
        request.encode(&mut buf);
        let (rest, parsed) = CotpTpdu::parse(&buf).unwrap();
        assert!(rest.is_empty());
        match parsed {
            CotpTpdu::ConnectionRequest(conn) => {
                assert_eq!(conn.src_ref, 1);
                assert_eq!(conn.tpdu_size, Some(TPDU_SIZE_1024));
                assert_eq!(conn.src_tsap, Some(0x0100));
                assert_eq!(conn.dst_tsap, Some(0x0121));
            }
            other => panic!("expected a connection request, got {:?}", other),
        }
    }

    #[test]
    fn test_read_request_round_trip() {
        let item = ItemSpec::db_bytes(5, 124, 4);
        let pdu = S7Pdu::read_request(7, item);
        let encoded = pdu.encode();
        let (_, parsed) = S7Pdu::parse(&encoded).unwrap();
        assert_eq!(parsed.pdu_reference, 7);
        match parsed.parameter {
            S7Parameter::ReadVar(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0], item);
            }
            other => panic!("expected a read parameter, got {:?}", other),
        }
    }

    #[test]
    fn test_read_response_counts_length_in_bits() {
        let pdu =
            S7Pdu::read_response(1, vec![DataItem::success(Bytes::from_static(&[1, 2, 3, 4]))]);
        let encoded = pdu.encode();
        // data part starts after the 12 byte header and 2 byte parameter
        assert_eq!(encoded[14], 0xFF); // return code
        assert_eq!(encoded[15], DATA_TRANSPORT_BYTES);
        assert_eq!(u16::from_be_bytes([encoded[16], encoded[17]]), 32);
        let (_, parsed) = S7Pdu::parse(&encoded).unwrap();
        assert_eq!(parsed.payload[0].data.as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_write_request_round_trip() {
        let item = ItemSpec::db_bytes(5, 124, 4);
        let pdu = S7Pdu::write_request(9, item, Bytes::from_static(&[0x41, 0x20, 0x00, 0x00]));
        let encoded = pdu.encode();
        let (_, parsed) = S7Pdu::parse(&encoded).unwrap();
        match parsed.parameter {
            S7Parameter::WriteVar(items) => assert_eq!(items[0], item),
            other => panic!("expected a write parameter, got {:?}", other),
        }
        assert_eq!(parsed.payload[0].data.as_ref(), &[0x41, 0x20, 0x00, 0x00]);
    }

    #[test]
    fn test_write_response_carries_bare_return_codes() {
        let pdu = S7Pdu::write_response(3, vec![ReturnCode::Success, ReturnCode::OutOfRange]);
        let encoded = pdu.encode();
        let (_, parsed) = S7Pdu::parse(&encoded).unwrap();
        assert_eq!(parsed.payload.len(), 2);
        assert_eq!(parsed.payload[0].return_code, 0xFF);
        assert_eq!(parsed.payload[1].return_code, 0x05);
    }

    #[test]
    fn test_job_error_parses_without_parameter() {
        let pdu = S7Pdu::job_error(11, 0x84, 0x04);
        let encoded = pdu.encode();
        let (_, parsed) = S7Pdu::parse(&encoded).unwrap();
        assert_eq!(parsed.pdu_reference, 11);
        assert_eq!(parsed.error_class, 0x84);
        assert_eq!(parsed.error_code, 0x04);
        assert!(matches!(parsed.parameter, S7Parameter::None));
    }

    #[test]
    fn test_szl_round_trip() {
        let request = S7Pdu::szl_request(2, SZL_ID_ORDER_NUMBER, 0);
        let encoded = request.encode();
        let (_, parsed) = S7Pdu::parse(&encoded).unwrap();
        match &parsed.parameter {
            S7Parameter::Szl(param) => assert!(!param.is_response),
            other => panic!("expected an SZL parameter, got {:?}", other),
        }
        assert_eq!(
            parsed.payload[0].data.as_ref(),
            &[0x00, 0x11, 0x00, 0x00]
        );

        let data = SzlData {
            id: SZL_ID_ORDER_NUMBER,
            index: 0,
            record_len: 4,
            records: vec![Bytes::from_static(&[1, 2, 3, 4])],
        };
        let response = S7Pdu::szl_response(2, 0, data);
        let encoded = response.encode();
        let (_, parsed) = S7Pdu::parse(&encoded).unwrap();
        let szl = SzlData::parse(&parsed.payload[0].data).unwrap();
        assert_eq!(szl.id, SZL_ID_ORDER_NUMBER);
        assert_eq!(szl.records.len(), 1);
        assert_eq!(szl.records[0].as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_peek_reference_on_truncated_body() {
        let pdu = S7Pdu::read_request(513, ItemSpec::db_bytes(5, 0, 4));
        let encoded = pdu.encode();
        assert_eq!(peek_reference(&encoded), Some(513));
        // a header alone is enough
        assert_eq!(peek_reference(&encoded[..10]), Some(513));
        assert_eq!(peek_reference(&[0x99, 0x01]), None);
    }
}
