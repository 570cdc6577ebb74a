// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-s7-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! S7 client: connect, negotiate and access data blocks
//!
//! The client owns one TCP connection and issues one request at a time.
//! Reads and writes larger than the negotiated PDU allows are split into
//! chunks transparently.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use log::debug;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time;

use super::error::{Error, ReturnCode};
use super::frame::{self, CotpConnection, CotpTpdu, ItemSpec, S7Parameter, S7Pdu, SzlData};

/// Payload room an answer to a Read Var request loses to framing: the
/// AckData header (12), function and item count (2) and the data item
/// header (4).
const READ_OVERHEAD: usize = 18;
/// Room a Write Var request loses to framing: the Job header (10), function
/// and item count (2), the item specification (12) and the data item
/// header (4).
const WRITE_OVERHEAD: usize = 28;

/// PDU length asked for during Setup Communication
const REQUESTED_PDU_LENGTH: u16 = 960;

/// Connection parameters for [`S7Client::connect`]
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub address: String,
    pub port: u16,
    pub rack: u16,
    pub slot: u16,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl ConnectOptions {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: 102,
            rack: 0,
            slot: 1,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(2),
        }
    }

    /// TSAP of the device, derived from rack and slot the way engineering
    /// stations address a CPU
    pub fn remote_tsap(&self) -> u16 {
        0x0100 + self.rack * 0x20 + self.slot
    }

    /// TSAP presented by this client
    pub fn local_tsap(&self) -> u16 {
        0x0100
    }
}

/// CPU operating state reported by SZL 0x0424
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Run,
    Stop,
    Unknown,
}

impl fmt::Display for CpuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuState::Run => f.write_str("run"),
            CpuState::Stop => f.write_str("stop"),
            CpuState::Unknown => f.write_str("unknown"),
        }
    }
}

/// Client for the PUT/GET protocol subset
pub struct S7Client {
    stream: Option<TcpStream>,
    pdu_length: u16,
    pdu_reference: u16,
    request_timeout: Duration,
}

impl S7Client {
    /// Open the transport and negotiate an S7 session.
    ///
    /// Performs the TCP connect, the COTP connection setup with TSAPs
    /// derived from rack and slot, and Setup Communication. The device may
    /// grant a smaller PDU length than requested; the smaller value wins.
    pub async fn connect(options: &ConnectOptions) -> Result<Self, Error> {
        debug!(
            "Connecting to {}:{} (rack {}, slot {})",
            options.address, options.port, options.rack, options.slot
        );
        let stream = time::timeout(
            options.connect_timeout,
            TcpStream::connect((options.address.as_str(), options.port)),
        )
        .await
        .map_err(|_| Error::Timeout(options.connect_timeout))??;
        stream.set_nodelay(true)?;

        let mut client = Self {
            stream: Some(stream),
            pdu_length: REQUESTED_PDU_LENGTH,
            pdu_reference: 0,
            request_timeout: options.request_timeout,
        };
        client.cotp_connect(options).await?;
        client.setup_communication().await?;
        debug!("Connected, negotiated PDU length {}", client.pdu_length);
        Ok(client)
    }

    async fn cotp_connect(&mut self, options: &ConnectOptions) -> Result<(), Error> {
        let request = CotpTpdu::ConnectionRequest(CotpConnection {
            dst_ref: 0,
            src_ref: 1,
            class: 0,
            tpdu_size: Some(frame::TPDU_SIZE_1024),
            src_tsap: Some(options.local_tsap()),
            dst_tsap: Some(options.remote_tsap()),
        });
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        frame::write_tpdu(stream, &request).await?;
        let timeout = self.request_timeout;
        let reply = time::timeout(timeout, frame::read_tpdu(stream))
            .await
            .map_err(|_| Error::Timeout(timeout))??;
        match reply {
            CotpTpdu::ConnectionConfirm(_) => Ok(()),
            CotpTpdu::DisconnectRequest { reason } => Err(Error::ConnectionRefused { reason }),
            _ => Err(Error::Protocol("expected a connection confirm".into())),
        }
    }

    async fn setup_communication(&mut self) -> Result<(), Error> {
        let request = S7Pdu::setup_request(self.next_reference(), REQUESTED_PDU_LENGTH);
        let reply = self.transact(request).await?;
        match reply.parameter {
            S7Parameter::Setup { pdu_length, .. } if pdu_length > 0 => {
                self.pdu_length = pdu_length.min(REQUESTED_PDU_LENGTH);
                Ok(())
            }
            _ => Err(Error::Protocol(
                "setup communication answer carried no PDU length".into(),
            )),
        }
    }

    /// PDU length granted by the device
    pub fn negotiated_pdu_length(&self) -> u16 {
        self.pdu_length
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn next_reference(&mut self) -> u16 {
        self.pdu_reference = self.pdu_reference.wrapping_add(1);
        self.pdu_reference
    }

    /// Send one PDU and wait for its answer, matching the PDU reference
    async fn transact(&mut self, request: S7Pdu) -> Result<S7Pdu, Error> {
        let reference = request.pdu_reference;
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        let data = CotpTpdu::Data {
            last: true,
            payload: request.encode().freeze(),
        };
        frame::write_tpdu(stream, &data).await?;
        let timeout = self.request_timeout;
        let reply = time::timeout(timeout, frame::read_tpdu(stream))
            .await
            .map_err(|_| Error::Timeout(timeout))??;
        let payload = match reply {
            CotpTpdu::Data { payload, .. } => payload,
            CotpTpdu::DisconnectRequest { .. } => {
                return Err(Error::Protocol("device sent a disconnect request".into()))
            }
            _ => return Err(Error::Protocol("expected a data TPDU".into())),
        };
        let pdu = frame::parse_pdu(&payload)?;
        if pdu.pdu_reference != reference {
            return Err(Error::Protocol(format!(
                "answer reference {} does not match request {}",
                pdu.pdu_reference, reference
            )));
        }
        if pdu.error_class != 0 || pdu.error_code != 0 {
            return Err(Error::Job {
                class: pdu.error_class,
                code: pdu.error_code,
            });
        }
        Ok(pdu)
    }

    /// Read `size` bytes from data block `db` starting at byte `start`
    pub async fn db_read(&mut self, db: u16, start: u32, size: usize) -> Result<Vec<u8>, Error> {
        check_address_span(start, size)?;
        let budget = usize::from(self.pdu_length).saturating_sub(READ_OVERHEAD);
        if budget == 0 {
            return Err(Error::TooLarge {
                requested: size,
                available: 0,
            });
        }
        let mut image = Vec::with_capacity(size);
        let mut offset = start;
        let mut remaining = size;
        while remaining > 0 {
            let chunk = remaining.min(budget);
            debug!("Read DB{} offset {} length {}", db, offset, chunk);
            let item = ItemSpec::db_bytes(db, offset, chunk as u16);
            let request = S7Pdu::read_request(self.next_reference(), item);
            let reply = self.transact(request).await?;
            let answer = reply
                .payload
                .into_iter()
                .next()
                .ok_or_else(|| Error::Protocol("read answer carried no data item".into()))?;
            let code = ReturnCode::from_u8(answer.return_code);
            if code != ReturnCode::Success {
                return Err(Error::ReturnCode(code));
            }
            if answer.data.len() != chunk {
                return Err(Error::Protocol(format!(
                    "read answer carried {} bytes, expected {}",
                    answer.data.len(),
                    chunk
                )));
            }
            image.extend_from_slice(&answer.data);
            offset += chunk as u32;
            remaining -= chunk;
        }
        Ok(image)
    }

    /// Write `data` into data block `db` starting at byte `start`
    pub async fn db_write(&mut self, db: u16, start: u32, data: &[u8]) -> Result<(), Error> {
        check_address_span(start, data.len())?;
        let budget = usize::from(self.pdu_length).saturating_sub(WRITE_OVERHEAD);
        if budget == 0 {
            return Err(Error::TooLarge {
                requested: data.len(),
                available: 0,
            });
        }
        let mut offset = start;
        for chunk in data.chunks(budget) {
            debug!("Write DB{} offset {} length {}", db, offset, chunk.len());
            let item = ItemSpec::db_bytes(db, offset, chunk.len() as u16);
            let request =
                S7Pdu::write_request(self.next_reference(), item, Bytes::copy_from_slice(chunk));
            let reply = self.transact(request).await?;
            let answer = reply
                .payload
                .into_iter()
                .next()
                .ok_or_else(|| Error::Protocol("write answer carried no return code".into()))?;
            let code = ReturnCode::from_u8(answer.return_code);
            if code != ReturnCode::Success {
                return Err(Error::ReturnCode(code));
            }
            offset += chunk.len() as u32;
        }
        Ok(())
    }

    /// Read one system status list entry
    pub async fn read_szl(&mut self, id: u16, index: u16) -> Result<SzlData, Error> {
        let request = S7Pdu::szl_request(self.next_reference(), id, index);
        let reply = self.transact(request).await?;
        if let S7Parameter::Szl(param) = &reply.parameter {
            if param.error_code != 0 {
                return Err(Error::Job {
                    class: (param.error_code >> 8) as u8,
                    code: (param.error_code & 0xFF) as u8,
                });
            }
        }
        let answer = reply
            .payload
            .into_iter()
            .next()
            .ok_or_else(|| Error::Protocol("SZL answer carried no data".into()))?;
        let code = ReturnCode::from_u8(answer.return_code);
        if code != ReturnCode::Success {
            return Err(Error::ReturnCode(code));
        }
        SzlData::parse(&answer.data)
    }

    /// Order number of the device module (SZL 0x0011)
    pub async fn order_number(&mut self) -> Result<String, Error> {
        let szl = self.read_szl(frame::SZL_ID_ORDER_NUMBER, 0x0000).await?;
        let record = szl
            .records
            .first()
            .ok_or_else(|| Error::Protocol("order number SZL is empty".into()))?;
        if record.len() < 22 {
            return Err(Error::Protocol("order number record too short".into()));
        }
        Ok(String::from_utf8_lossy(&record[2..22]).trim().to_string())
    }

    /// Operating state of the CPU (SZL 0x0424)
    pub async fn cpu_state(&mut self) -> Result<CpuState, Error> {
        let szl = self.read_szl(frame::SZL_ID_CPU_STATE, 0x0000).await?;
        let record = szl
            .records
            .first()
            .ok_or_else(|| Error::Protocol("CPU state SZL is empty".into()))?;
        let state = match record.get(3) {
            Some(0x08) => CpuState::Run,
            Some(0x04) => CpuState::Stop,
            _ => CpuState::Unknown,
        };
        Ok(state)
    }

    /// Release the connection. Further requests fail with `NotConnected`;
    /// calling this twice is harmless.
    pub async fn disconnect(&mut self) -> Result<(), Error> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!("Disconnected");
        }
        Ok(())
    }
}

/// Item addresses travel as a 3 byte bit address. An offset past that
/// field would be truncated on encoding and silently hit the wrong bytes,
/// so spans are bounded by their exclusive end: when the whole span fits,
/// every chunk offset does too.
fn check_address_span(start: u32, len: usize) -> Result<(), Error> {
    if u64::from(start).saturating_add(len as u64) > u64::from(frame::ADDRESS_LIMIT) {
        return Err(Error::AddressOverflow { start, len });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tsap_derivation() {
        let mut options = ConnectOptions::new("192.168.0.1");
        assert_eq!(options.remote_tsap(), 0x0101); // rack 0, slot 1
        options.slot = 2;
        assert_eq!(options.remote_tsap(), 0x0102);
        options.rack = 1;
        options.slot = 3;
        assert_eq!(options.remote_tsap(), 0x0123);
        assert_eq!(options.local_tsap(), 0x0100);
    }

    #[test]
    fn test_address_span_bound() {
        assert!(check_address_span(0, 4).is_ok());
        assert!(check_address_span(0x001F_FFFC, 4).is_ok());
        assert!(check_address_span(0x001F_FFFD, 4).is_err());
        assert!(check_address_span(0x0020_0000, 1).is_err());
        // the sum must not wrap either
        assert!(check_address_span(u32::MAX, usize::MAX).is_err());
    }
}
