// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Register banks and the process image of a slave

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use thiserror::Error;

use crate::{
    frame::{Address, ExceptionCode, Quantity, Word},
    slave::Slave,
};

/// Failure of a register access against a [`ProcessImage`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// The addressed range does not fit into the bank.
    #[error("illegal address range {address}+{count} for a bank of {len} registers")]
    IllegalAddress {
        address: Address,
        count: usize,
        len: usize,
    },

    /// No bank has been registered for the unit.
    #[error("unknown unit {0}")]
    UnknownUnit(Slave),

    /// A bank has already been registered for the unit.
    #[error("unit {0} is already registered")]
    UnitAlreadyRegistered(Slave),

    /// The process image is currently served and cannot be modified.
    #[error("process image is in use")]
    InUse,

    /// A writer panicked while holding the bank of the unit.
    #[error("register bank of unit {0} is poisoned")]
    Poisoned(Slave),
}

impl From<ImageError> for ExceptionCode {
    fn from(from: ImageError) -> Self {
        match from {
            ImageError::IllegalAddress { .. } | ImageError::UnknownUnit(_) => {
                ExceptionCode::IllegalDataAddress
            }
            ImageError::UnitAlreadyRegistered(_) | ImageError::InUse | ImageError::Poisoned(_) => {
                ExceptionCode::SlaveDeviceFailure
            }
        }
    }
}

/// A fixed number of 16-bit holding registers, addressed from `0`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterBank {
    registers: Vec<Word>,
}

impl RegisterBank {
    /// A bank of `len` registers, all initialized with `0`.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            registers: vec![0; len],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// The value of a single register, if `address` is in range.
    #[must_use]
    pub fn get(&self, address: Address) -> Option<Word> {
        self.registers.get(usize::from(address)).copied()
    }

    /// Reads `count` consecutive registers starting at `address`.
    pub fn read(&self, address: Address, count: Quantity) -> Result<Vec<Word>, ImageError> {
        let range = self.range(address, usize::from(count))?;
        Ok(self.registers[range].to_vec())
    }

    /// Overwrites consecutive registers starting at `address` with `values`.
    pub fn write(&mut self, address: Address, values: &[Word]) -> Result<(), ImageError> {
        let range = self.range(address, values.len())?;
        self.registers[range].copy_from_slice(values);
        Ok(())
    }

    fn range(&self, address: Address, count: usize) -> Result<std::ops::Range<usize>, ImageError> {
        let start = usize::from(address);
        let end = start + count;
        if count == 0 || end > self.registers.len() {
            return Err(ImageError::IllegalAddress {
                address,
                count,
                len: self.registers.len(),
            });
        }
        Ok(start..end)
    }
}

impl From<Vec<Word>> for RegisterBank {
    fn from(registers: Vec<Word>) -> Self {
        Self { registers }
    }
}

/// The register banks of all units served by one slave.
///
/// Each bank is guarded by its own lock, so that accesses to different
/// units never contend. Cloning is cheap and shares the banks.
#[derive(Debug, Clone, Default)]
pub struct ProcessImage {
    banks: HashMap<Slave, Arc<Mutex<RegisterBank>>>,
}

impl ProcessImage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the bank of a unit.
    ///
    /// A unit can only be registered once.
    pub fn insert(&mut self, slave: Slave, bank: RegisterBank) -> Result<(), ImageError> {
        if self.banks.contains_key(&slave) {
            return Err(ImageError::UnitAlreadyRegistered(slave));
        }
        self.banks.insert(slave, Arc::new(Mutex::new(bank)));
        Ok(())
    }

    /// The bank registered for `slave`.
    pub fn resolve(&self, slave: Slave) -> Result<&Mutex<RegisterBank>, ImageError> {
        self.banks
            .get(&slave)
            .map(|bank| &**bank)
            .ok_or(ImageError::UnknownUnit(slave))
    }

    pub fn read(
        &self,
        slave: Slave,
        address: Address,
        count: Quantity,
    ) -> Result<Vec<Word>, ImageError> {
        let bank = self
            .resolve(slave)?
            .lock()
            .map_err(|_| ImageError::Poisoned(slave))?;
        bank.read(address, count)
    }

    pub fn write(&self, slave: Slave, address: Address, values: &[Word]) -> Result<(), ImageError> {
        let mut bank = self
            .resolve(slave)?
            .lock()
            .map_err(|_| ImageError::Poisoned(slave))?;
        bank.write(address, values)
    }

    /// All registered units in ascending order.
    #[must_use]
    pub fn units(&self) -> Vec<Slave> {
        let mut units: Vec<_> = self.banks.keys().copied().collect();
        units.sort_unstable();
        units
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.banks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.banks.is_empty()
    }
}
