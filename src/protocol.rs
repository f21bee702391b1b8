//! Register codec for the Breezart wire protocol.
//!
//! Requests are Modbus-TCP-like frames sent as the body of an HTTP `POST`. Every
//! frame starts with a 16-bit session id that the device echoes back, which is
//! the only way to correlate a reply with its request.
//!
//! This module only deals with bytes. Turning registers into device state is the
//! job of [`crate::state`].
use crate::error::{DecodeError, Error, Result, ValidationError};
use std::fmt;
use std::ops::Deref;

/// Unit address the device answers to.
pub const UNIT_ADDRESS: u8 = 0x01;

/// Maximum number of registers a single operation may cover.
pub const MAX_REGISTER_COUNT: usize = 32;

/// Length of every request except a multiple-register write.
pub const REQUEST_LEN: usize = 12;

/// Offset of the first register byte in a read response.
const RESPONSE_DATA_OFFSET: usize = 9;

/// A function code with this bit set (and greater than it) marks a device fault.
const FAULT_FLAG: u8 = 0x80;

/// First input register of the unit status block: power state, status word,
/// temperature, humidity, fan feedback, error and warning codes.
pub const READ_MAIN_STATE_REG_ADDR: u16 = 10;
/// Number of registers in the unit status block.
pub const READ_MAIN_STATE_REG_QUAN: u8 = 13;

/// First input register of the setpoint block: speed, temperature and
/// humidity targets, power target, user flags, filter life and power draw.
pub const READ_SENSOR_STATE_REG_ADDR: u16 = 64000;
/// Number of registers in the setpoint block.
pub const READ_SENSOR_STATE_REG_QUAN: u8 = 12;

/// The energy counters live in five holding registers, 8 addresses apart.
pub const READ_ENERGY_REG_ADDRS: [u16; 5] = [31008, 31016, 31024, 31032, 31040];
/// Each energy counter is read on its own.
pub const READ_ENERGY_REG_QUAN: u8 = 1;

/// Holding register of the fan speed setpoint, in thousandths of a step.
pub const WRITE_SPEED_REG_ADDR: u16 = 0;
/// Holding register of the target temperature, in tenths of °C.
pub const WRITE_TEMPERATURE_REG_ADDR: u16 = 1;
/// Holding register switching the unit on (`1`) or off (`0`).
pub const WRITE_POWER_REG_ADDR: u16 = 3;

pub const SPEED_MIN: i32 = 0;
pub const SPEED_MAX: i32 = 10;

/// Encodes a speed step for [`WRITE_SPEED_REG_ADDR`].
///
/// # Errors
///
/// [`ValidationError::SpeedOutOfRange`] if `speed` is outside
/// [`SPEED_MIN`]..=[`SPEED_MAX`].
pub fn write_speed_encode(speed: i32) -> std::result::Result<u16, ValidationError> {
    if (SPEED_MIN..=SPEED_MAX).contains(&speed) {
        Ok((speed * 1000) as u16)
    } else {
        Err(ValidationError::SpeedOutOfRange(speed))
    }
}

pub const TEMPERATURE_MIN: i32 = 10;
pub const TEMPERATURE_MAX: i32 = 30;

/// Encodes a target temperature in °C for [`WRITE_TEMPERATURE_REG_ADDR`].
///
/// # Errors
///
/// [`ValidationError::TemperatureOutOfRange`] if `temperature` is outside
/// [`TEMPERATURE_MIN`]..=[`TEMPERATURE_MAX`].
pub fn write_temperature_encode(temperature: i32) -> std::result::Result<u16, ValidationError> {
    if (TEMPERATURE_MIN..=TEMPERATURE_MAX).contains(&temperature) {
        Ok((temperature * 10) as u16)
    } else {
        Err(ValidationError::TemperatureOutOfRange(temperature))
    }
}

/// Encodes the power switch for [`WRITE_POWER_REG_ADDR`].
pub fn write_power_encode(on: bool) -> u16 {
    u16::from(on)
}

/// The register operations understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationKind {
    ReadHolding = 3,
    ReadInput = 4,
    WriteSingleHolding = 6,
    WriteMultipleHolding = 16,
}

impl OperationKind {
    /// The function code carried in byte 7 of a request.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// A validated register operation.
///
/// Construction checks `0 < count <= 32` and that the range does not run past
/// the last register, so an existing value can always be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOperation {
    kind: OperationKind,
    start: u16,
    count: u8,
    values: Vec<u16>,
}

impl RegisterOperation {
    fn check_range(start: u16, count: usize) -> std::result::Result<u8, ValidationError> {
        if count == 0 || count > MAX_REGISTER_COUNT || start as usize + count >= 0x10000 {
            return Err(ValidationError::RegisterRange { start, count });
        }
        Ok(count as u8)
    }

    /// Reads `count` holding registers starting at `start`.
    ///
    /// # Errors
    ///
    /// [`ValidationError::RegisterRange`] if `count` is zero, above
    /// [`MAX_REGISTER_COUNT`], or the range runs past the last register.
    pub fn read_holding(start: u16, count: u8) -> std::result::Result<Self, ValidationError> {
        Self::read(OperationKind::ReadHolding, start, count)
    }

    /// Reads `count` input registers starting at `start`.
    ///
    /// # Errors
    ///
    /// Same range rules as [`RegisterOperation::read_holding`].
    pub fn read_input(start: u16, count: u8) -> std::result::Result<Self, ValidationError> {
        Self::read(OperationKind::ReadInput, start, count)
    }

    fn read(
        kind: OperationKind,
        start: u16,
        count: u8,
    ) -> std::result::Result<Self, ValidationError> {
        let count = Self::check_range(start, count as usize)?;
        Ok(Self {
            kind,
            start,
            count,
            values: Vec::new(),
        })
    }

    /// Writes one holding register.
    ///
    /// # Errors
    ///
    /// [`ValidationError::RegisterRange`] if `start` is the last register
    /// address.
    pub fn write_single(start: u16, value: u16) -> std::result::Result<Self, ValidationError> {
        let count = Self::check_range(start, 1)?;
        Ok(Self {
            kind: OperationKind::WriteSingleHolding,
            start,
            count,
            values: vec![value],
        })
    }

    /// Writes `values` to consecutive holding registers starting at `start`.
    ///
    /// # Errors
    ///
    /// [`ValidationError::RegisterRange`] if `values` is empty, longer than
    /// [`MAX_REGISTER_COUNT`], or runs past the last register.
    pub fn write_multiple(start: u16, values: &[u16]) -> std::result::Result<Self, ValidationError> {
        let count = Self::check_range(start, values.len())?;
        Ok(Self {
            kind: OperationKind::WriteMultipleHolding,
            start,
            count,
            values: values.to_vec(),
        })
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn count(&self) -> u8 {
        self.count
    }

    /// Values to write; empty for reads.
    pub fn values(&self) -> &[u16] {
        &self.values
    }

    /// Number of bytes [`encode`] produces for this operation.
    pub fn encoded_len(&self) -> usize {
        match self.kind {
            OperationKind::WriteMultipleHolding => 13 + 2 * self.count as usize,
            _ => REQUEST_LEN,
        }
    }
}

/// Correlation token carried in bytes 0-1 of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionId(u16);

impl SessionId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }
}

impl Deref for SessionId {
    type Target = u16;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out session ids, one per outgoing request.
///
/// The first id is 1; the counter wraps around after 65535.
#[derive(Debug, Clone, Default)]
pub struct SessionCounter {
    last: u16,
}

impl SessionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the counter so that the next id handed out is `last + 1`.
    pub fn starting_after(last: u16) -> Self {
        Self { last }
    }

    /// Returns the id for the next request.
    pub fn next_id(&mut self) -> SessionId {
        self.last = self.last.wrapping_add(1);
        SessionId(self.last)
    }
}

/// Encodes `op` into a request frame, consuming one id from `sessions`.
pub fn encode(op: &RegisterOperation, sessions: &mut SessionCounter) -> (Vec<u8>, SessionId) {
    let session = sessions.next_id();
    let mut data = vec![0u8; op.encoded_len()];

    data[0..2].copy_from_slice(&session.to_be_bytes());
    data[5] = match op.kind {
        OperationKind::WriteMultipleHolding => 7 + 2 * op.count,
        _ => 6,
    };
    data[6] = UNIT_ADDRESS;
    data[7] = op.kind.code();
    data[8..10].copy_from_slice(&op.start.to_be_bytes());
    match op.kind {
        OperationKind::ReadHolding | OperationKind::ReadInput => {
            data[11] = op.count;
        }
        OperationKind::WriteSingleHolding => {
            data[10..12].copy_from_slice(&op.values[0].to_be_bytes());
        }
        OperationKind::WriteMultipleHolding => {
            data[11] = op.count;
            data[12] = op.count * 2;
            for (chunk, value) in data[13..].chunks_exact_mut(2).zip(&op.values) {
                chunk.copy_from_slice(&value.to_be_bytes());
            }
        }
    }
    (data, session)
}

/// Registers of one read response, indexed from zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterMap {
    registers: Vec<u16>,
}

impl RegisterMap {
    /// The register at `offset` from the start address of the read.
    pub fn get(&self, offset: usize) -> Option<u16> {
        self.registers.get(offset).copied()
    }

    /// Like [`RegisterMap::get`] but a missing register is a decode error.
    pub fn register(&self, offset: usize) -> std::result::Result<u16, DecodeError> {
        self.get(offset)
            .ok_or(DecodeError::MissingRegister(offset))
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, u16)> + '_ {
        self.registers.iter().copied().enumerate()
    }
}

impl From<Vec<u16>> for RegisterMap {
    fn from(registers: Vec<u16>) -> Self {
        Self { registers }
    }
}

fn require_len(bytes: &[u8], needed: usize) -> std::result::Result<(), DecodeError> {
    if bytes.len() < needed {
        Err(DecodeError::Truncated {
            needed,
            actual: bytes.len(),
        })
    } else {
        Ok(())
    }
}

/// Checks session id and fault flag, the parts shared by every response.
fn check_header(bytes: &[u8], expected: SessionId) -> Result<()> {
    require_len(bytes, 2)?;
    let actual = SessionId(u16::from_be_bytes([bytes[0], bytes[1]]));
    if actual != expected {
        return Err(Error::SessionMismatch { expected, actual });
    }
    require_len(bytes, RESPONSE_DATA_OFFSET)?;
    if bytes[7] > FAULT_FLAG {
        return Err(Error::DeviceFault { code: bytes[8] });
    }
    Ok(())
}

/// Decodes a read response into its registers.
///
/// # Errors
///
/// * [`Error::SessionMismatch`] if the reply belongs to another request.
/// * [`Error::DeviceFault`] if the device flagged the request as failed.
/// * [`Error::Decode`] if the frame is shorter than its byte count declares.
pub fn decode(bytes: &[u8], expected: SessionId) -> Result<RegisterMap> {
    check_header(bytes, expected)?;
    let byte_count = bytes[8];
    if byte_count % 2 != 0 {
        return Err(DecodeError::OddByteCount(byte_count).into());
    }
    let end = RESPONSE_DATA_OFFSET + byte_count as usize;
    require_len(bytes, end)?;
    let registers = bytes[RESPONSE_DATA_OFFSET..end]
        .chunks_exact(2)
        .map(|word| u16::from_be_bytes([word[0], word[1]]))
        .collect::<Vec<_>>();
    Ok(RegisterMap::from(registers))
}

/// Validates the reply to a write request.
///
/// A successful write echoes the request header back; the echoed address and
/// value are not interpreted.
pub fn acknowledge(bytes: &[u8], expected: SessionId) -> Result<()> {
    check_header(bytes, expected)?;
    require_len(bytes, REQUEST_LEN)?;
    Ok(())
}
