// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! In-memory responder for the PUT/GET subset
//!
//! Serves data block reads and writes out of plain byte arrays, one per
//! data block number. The `plc_sim` binary wraps it so the monitor can be
//! exercised without a device on the network, and the integration tests use
//! it as the peer for the real client.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use log::{debug, error};
use tokio::net::{TcpListener, TcpStream};

use super::error::{Error, ReturnCode};
use super::frame::{
    self, CotpConnection, CotpTpdu, DataItem, ItemSpec, S7Parameter, S7Pdu, SzlData,
};

/// Answers PUT/GET requests from in-memory data block images.
///
/// Cloning is cheap and clones share the same blocks, so a handle kept by
/// the caller observes writes performed by connected clients and can patch
/// values while the server runs.
#[derive(Debug, Clone)]
pub struct PlcSimulator {
    data_blocks: Arc<Mutex<HashMap<u16, Vec<u8>>>>,
    pdu_length: u16,
    order_number: String,
    cpu_state_byte: u8,
}

impl PlcSimulator {
    /// Responder seeded with one 128 byte DB 5 holding 10.0 at byte 124,
    /// the layout of the hydraulic unit this tool was written against
    pub fn new() -> Self {
        let mut image = vec![0u8; 128];
        image[124..128].copy_from_slice(&10.0f32.to_be_bytes());
        let mut data_blocks = HashMap::new();
        data_blocks.insert(5, image);
        Self {
            data_blocks: Arc::new(Mutex::new(data_blocks)),
            pdu_length: 480,
            order_number: "6ES7 315-2EH14-0AB0".to_string(),
            cpu_state_byte: 0x08, // run
        }
    }

    /// Cap the PDU length granted during Setup Communication
    pub fn with_pdu_length(mut self, pdu_length: u16) -> Self {
        self.pdu_length = pdu_length;
        self
    }

    /// Order number reported by SZL 0x0011
    pub fn with_order_number(mut self, order_number: &str) -> Self {
        self.order_number = order_number.to_string();
        self
    }

    /// Report the CPU as stopped in SZL 0x0424
    pub fn with_cpu_stopped(mut self) -> Self {
        self.cpu_state_byte = 0x04;
        self
    }

    /// Replace or add a data block image
    pub fn insert_data_block(&self, number: u16, image: Vec<u8>) {
        self.data_blocks.lock().unwrap().insert(number, image);
    }

    /// Drop a data block so requests for it fail
    pub fn remove_data_block(&self, number: u16) {
        self.data_blocks.lock().unwrap().remove(&number);
    }

    /// Copy of a data block image, if present
    pub fn data_block(&self, number: u16) -> Option<Vec<u8>> {
        self.data_blocks.lock().unwrap().get(&number).cloned()
    }

    /// Overwrite part of a data block in place. Returns false when the
    /// block is missing or the span does not fit; blocks never grow.
    pub fn patch(&self, number: u16, offset: usize, bytes: &[u8]) -> bool {
        let mut blocks = self.data_blocks.lock().unwrap();
        match blocks.get_mut(&number) {
            Some(image) if offset + bytes.len() <= image.len() => {
                image[offset..offset + bytes.len()].copy_from_slice(bytes);
                true
            }
            _ => false,
        }
    }

    /// Build the answer for one request PDU
    fn handle_pdu(&self, payload: &[u8]) -> S7Pdu {
        let pdu = match frame::parse_pdu(payload) {
            Ok(pdu) => pdu,
            Err(_) => {
                // answer with the reference when the header is still readable
                let reference = frame::peek_reference(payload).unwrap_or(0);
                error!("Rejecting request that does not parse");
                return S7Pdu::job_error(reference, 0x84, 0x04);
            }
        };
        match pdu.parameter {
            S7Parameter::Setup {
                max_amq_caller,
                max_amq_callee,
                pdu_length,
            } => {
                let granted = pdu_length.min(self.pdu_length);
                debug!("Setup communication, granting PDU length {}", granted);
                S7Pdu::setup_response(pdu.pdu_reference, max_amq_caller, max_amq_callee, granted)
            }
            S7Parameter::ReadVar(ref items) => {
                let blocks = self.data_blocks.lock().unwrap();
                let answers = items
                    .iter()
                    .map(|item| match block_read(&blocks, item) {
                        Ok(data) => DataItem::success(data),
                        Err(code) => {
                            error!("Read {:?} rejected: {}", item, code);
                            DataItem::failure(code)
                        }
                    })
                    .collect();
                S7Pdu::read_response(pdu.pdu_reference, answers)
            }
            S7Parameter::WriteVar(ref items) => {
                let mut blocks = self.data_blocks.lock().unwrap();
                let codes = items
                    .iter()
                    .zip(pdu.payload.iter())
                    .map(|(item, data)| {
                        match block_write(&mut blocks, item, &data.data) {
                            Ok(()) => ReturnCode::Success,
                            Err(code) => {
                                error!("Write {:?} rejected: {}", item, code);
                                code
                            }
                        }
                    })
                    .collect();
                S7Pdu::write_response(pdu.pdu_reference, codes)
            }
            S7Parameter::Szl(ref param) => self.handle_szl(&pdu, param.sequence),
            _ => {
                error!("Unimplemented function in request: {:?}", pdu.parameter);
                S7Pdu::job_error(pdu.pdu_reference, 0x84, 0x04)
            }
        }
    }

    fn handle_szl(&self, pdu: &S7Pdu, sequence: u8) -> S7Pdu {
        let data = pdu
            .payload
            .first()
            .map(|item| item.data.clone())
            .unwrap_or_default();
        if data.len() < 4 {
            return S7Pdu::szl_error(pdu.pdu_reference, sequence, ReturnCode::NotSupported);
        }
        let id = u16::from_be_bytes([data[0], data[1]]);
        let index = u16::from_be_bytes([data[2], data[3]]);
        match id {
            frame::SZL_ID_ORDER_NUMBER => {
                // module identification record: order code in bytes 2..22
                let mut record = vec![0u8; 28];
                let code = self.order_number.as_bytes();
                let len = code.len().min(20);
                record[2..2 + len].copy_from_slice(&code[..len]);
                let data = SzlData {
                    id,
                    index,
                    record_len: 28,
                    records: vec![Bytes::from(record)],
                };
                S7Pdu::szl_response(pdu.pdu_reference, sequence, data)
            }
            frame::SZL_ID_CPU_STATE => {
                // diagnostic event record: current state in byte 3
                let mut record = vec![0u8; 20];
                record[3] = self.cpu_state_byte;
                let data = SzlData {
                    id,
                    index,
                    record_len: 20,
                    records: vec![Bytes::from(record)],
                };
                S7Pdu::szl_response(pdu.pdu_reference, sequence, data)
            }
            _ => {
                debug!("SZL {:#06x} not available", id);
                S7Pdu::szl_error(pdu.pdu_reference, sequence, ReturnCode::ObjectMissing)
            }
        }
    }
}

impl Default for PlcSimulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a span out of a data block image
fn block_read(blocks: &HashMap<u16, Vec<u8>>, item: &ItemSpec) -> Result<Bytes, ReturnCode> {
    if item.area != frame::AREA_DATA_BLOCK {
        return Err(ReturnCode::NotSupported);
    }
    let image = blocks.get(&item.db_number).ok_or(ReturnCode::ObjectMissing)?;
    let start = item.start as usize;
    let end = start + item.length as usize;
    if end > image.len() {
        return Err(ReturnCode::OutOfRange);
    }
    Ok(Bytes::copy_from_slice(&image[start..end]))
}

/// Write a span into a data block image
fn block_write(
    blocks: &mut HashMap<u16, Vec<u8>>,
    item: &ItemSpec,
    data: &[u8],
) -> Result<(), ReturnCode> {
    if item.area != frame::AREA_DATA_BLOCK {
        return Err(ReturnCode::NotSupported);
    }
    if data.len() != item.length as usize {
        return Err(ReturnCode::SizeMismatch);
    }
    let image = blocks
        .get_mut(&item.db_number)
        .ok_or(ReturnCode::ObjectMissing)?;
    let start = item.start as usize;
    let end = start + data.len();
    if end > image.len() {
        return Err(ReturnCode::OutOfRange);
    }
    image[start..end].copy_from_slice(data);
    Ok(())
}

/// TCP front end for [`PlcSimulator`]
pub struct S7Server {
    listener: TcpListener,
    service: PlcSimulator,
}

impl S7Server {
    /// Bind the listener; port 0 lets the OS pick a free one
    pub async fn bind(addr: &str, service: PlcSimulator) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, service })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the surrounding task is dropped
    pub async fn serve(self) -> Result<(), Error> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!("Accepted connection from {}", peer);
            let service = self.service.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, service).await {
                    error!("Connection from {} failed: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_connection(mut stream: TcpStream, service: PlcSimulator) -> Result<(), Error> {
    // the session starts with a COTP connection request
    match frame::read_tpdu(&mut stream).await? {
        CotpTpdu::ConnectionRequest(request) => {
            let confirm = CotpTpdu::ConnectionConfirm(CotpConnection {
                dst_ref: request.src_ref,
                src_ref: 1,
                class: 0,
                tpdu_size: request.tpdu_size,
                src_tsap: request.src_tsap,
                dst_tsap: request.dst_tsap,
            });
            frame::write_tpdu(&mut stream, &confirm).await?;
        }
        _ => return Err(Error::Protocol("expected a connection request".into())),
    }

    loop {
        let tpdu = match frame::read_tpdu(&mut stream).await {
            Ok(tpdu) => tpdu,
            // a vanished peer ends the session, not the server
            Err(Error::Io(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::UnexpectedEof
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::BrokenPipe
                ) =>
            {
                break;
            }
            Err(e) => return Err(e),
        };
        match tpdu {
            CotpTpdu::Data { payload, .. } => {
                let answer = service.handle_pdu(&payload);
                let data = CotpTpdu::Data {
                    last: true,
                    payload: answer.encode().freeze(),
                };
                frame::write_tpdu(&mut stream, &data).await?;
            }
            CotpTpdu::DisconnectRequest { .. } => break,
            _ => return Err(Error::Protocol("unexpected TPDU inside the session".into())),
        }
    }
    Ok(())
}
