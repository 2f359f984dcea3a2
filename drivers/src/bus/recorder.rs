//! In-memory bus and power supply that record every transaction
//!
//! The recorder behaves like an auto-incrementing register file: a write
//! stores its payload at consecutive addresses and a read returns consecutive
//! bytes. Clones share the same state, so a test can keep a handle after
//! moving the bus into a device.

use crate::bus;
use crate::device;
use crate::error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    Write { address: u16, payload: Vec<u8> },
    Read { address: u16, length: usize },
}

#[derive(Debug, Default)]
struct State {
    memory: std::collections::HashMap<u16, u8>,
    transactions: Vec<Transaction>,
    failing_writes: std::collections::HashSet<u16>,
    failing_reads: std::collections::HashSet<u16>,
}

#[derive(Debug, Clone, Default)]
pub struct Recorder(std::sync::Arc<std::sync::Mutex<State>>);

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.0.lock().expect("mutex is not poisoned")
    }

    pub fn set_memory(&self, address: u16, bytes: &[u8]) {
        let mut state = self.state();
        for (offset, byte) in bytes.iter().enumerate() {
            state
                .memory
                .insert(address.wrapping_add(offset as u16), *byte);
        }
    }

    pub fn memory(&self, address: u16, length: usize) -> Vec<u8> {
        let state = self.state();
        (0..length)
            .map(|offset| {
                state
                    .memory
                    .get(&address.wrapping_add(offset as u16))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Every later write whose address matches fails with [`bus::Error::Nack`]
    pub fn fail_writes_to(&self, address: u16) {
        self.state().failing_writes.insert(address);
    }

    pub fn fail_reads_from(&self, address: u16) {
        self.state().failing_reads.insert(address);
    }

    pub fn heal(&self) {
        let mut state = self.state();
        state.failing_writes.clear();
        state.failing_reads.clear();
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.state().transactions.clone()
    }

    /// Successful writes as (address, payload) pairs, in bus order
    pub fn writes(&self) -> Vec<(u16, Vec<u8>)> {
        self.state()
            .transactions
            .iter()
            .filter_map(|transaction| match transaction {
                Transaction::Write { address, payload } => Some((*address, payload.clone())),
                Transaction::Read { .. } => None,
            })
            .collect()
    }

    pub fn written_addresses(&self) -> Vec<u16> {
        self.writes().into_iter().map(|(address, _)| address).collect()
    }

    pub fn clear(&self) {
        self.state().transactions.clear();
    }
}

fn split_address(bytes: &[u8]) -> Result<(u16, &[u8]), bus::Error> {
    if bytes.len() < 2 {
        return Err(bus::Error::Short {
            requested: 2,
            transferred: bytes.len(),
        });
    }
    Ok((u16::from_be_bytes([bytes[0], bytes[1]]), &bytes[2..]))
}

impl bus::Bus for Recorder {
    fn write(&mut self, bytes: &[u8]) -> Result<(), bus::Error> {
        let (address, payload) = split_address(bytes)?;
        let mut state = self.state();
        if state.failing_writes.contains(&address) {
            return Err(bus::Error::Nack);
        }
        for (offset, byte) in payload.iter().enumerate() {
            state
                .memory
                .insert(address.wrapping_add(offset as u16), *byte);
        }
        state.transactions.push(Transaction::Write {
            address,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn write_read(&mut self, bytes: &[u8], buffer: &mut [u8]) -> Result<(), bus::Error> {
        let (address, _) = split_address(bytes)?;
        let mut state = self.state();
        if state.failing_reads.contains(&address) {
            return Err(bus::Error::Nack);
        }
        for (offset, byte) in buffer.iter_mut().enumerate() {
            *byte = state
                .memory
                .get(&address.wrapping_add(offset as u16))
                .copied()
                .unwrap_or(0);
        }
        state.transactions.push(Transaction::Read {
            address,
            length: buffer.len(),
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SupplyState {
    powered: bool,
    power_ons: usize,
    power_offs: usize,
    fail_power_on: bool,
}

/// Power collaborator that only counts transitions
#[derive(Debug, Clone, Default)]
pub struct Supply(std::sync::Arc<std::sync::Mutex<SupplyState>>);

impl Supply {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SupplyState> {
        self.0.lock().expect("mutex is not poisoned")
    }

    pub fn is_powered(&self) -> bool {
        self.state().powered
    }

    pub fn power_ons(&self) -> usize {
        self.state().power_ons
    }

    pub fn power_offs(&self) -> usize {
        self.state().power_offs
    }

    pub fn fail_power_on(&self, fail: bool) {
        self.state().fail_power_on = fail;
    }
}

impl device::Power for Supply {
    fn power_on(&mut self) -> Result<(), error::Error> {
        let mut state = self.state();
        if state.fail_power_on {
            return Err(error::Error::Power("regulator enable failed".to_owned()));
        }
        state.powered = true;
        state.power_ons += 1;
        Ok(())
    }

    fn power_off(&mut self) -> Result<(), error::Error> {
        let mut state = self.state();
        state.powered = false;
        state.power_offs += 1;
        Ok(())
    }
}
