//! Decoding of raw registers into device state.
//!
//! All functions here are pure: they take a [`RegisterMap`] produced by
//! [`crate::protocol::decode`] and return typed records. Register offsets are
//! relative to the start address of the read that produced the map.
use crate::error::DecodeError;
use crate::protocol::RegisterMap;
use serde::Serialize;
use std::fmt;

type Result<T> = std::result::Result<T, DecodeError>;

/// Reinterprets a register as a two's complement value.
///
/// Words above 32767 are negative (`value - 65536`).
pub fn unsigned_to_signed(word: u16) -> i16 {
    word as i16
}

fn bit(word: u32, index: u32) -> bool {
    (word >> index) & 1 == 1
}

/// Converts a raw speed register (thousandths) to a speed step.
///
/// Values below 10 are noise around zero. Everything else is rounded half up
/// after subtracting one.
pub fn speed_decode(raw: u16) -> u8 {
    if raw < 10 {
        0
    } else {
        ((u32::from(raw) - 1 + 500) / 1000) as u8
    }
}

/// Rounds a percentage stored times one hundred, half up.
fn percent_decode(raw: u16) -> u16 {
    ((u32::from(raw) + 50) / 100) as u16
}

fn double_word(low: u16, high: u16) -> u32 {
    u32::from(low) + u32::from(high) * 0x10000
}

macro_rules! status_flags {
    ($( $(#[$doc:meta])* $field:ident = $bit:literal, )+) => {
        /// Named bits of the 32-bit unit status word.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
        pub struct StatusFlags {
            $( $(#[$doc])* pub $field: bool, )+
        }

        impl StatusFlags {
            /// Explodes a status word into its flags. Bits 0-1 are the power
            /// state and are not part of this struct.
            pub fn decode(word: u32) -> Self {
                Self { $( $field: bit(word, $bit), )+ }
            }

            /// All flags in bit order, paired with their names.
            pub fn iter(&self) -> impl Iterator<Item = (&'static str, bool)> {
                [$( (stringify!($field), self.$field), )+].into_iter()
            }
        }
    };
}

status_flags! {
    is_winter = 2,
    is_warning = 3,
    is_fatal_error = 4,
    is_inflow_active = 5,
    is_recirculation_active = 6,
    is_heat_active = 7,
    is_cool_active = 8,
    is_humidifier_active = 9,
    is_dehumidifier_active = 10,
    is_recuperator_active = 11,
    is_comfort_active = 12,
    is_preheat_active = 13,
    /// Condensate pump.
    is_drain_pump_active = 14,
    is_heater_blowdown_active = 15,
    /// Supply air too cold.
    is_temperature_too_low = 16,
    is_on_by_remote = 17,
    is_clock_mode = 18,
    is_hot_water = 19,
    is_timer_set = 20,
    is_remote_connected = 21,
    is_waiting_remote = 22,
    is_energy_counter_full = 23,
    is_calibrate_mode = 24,
    is_smooth_vent = 25,
}

/// Decoded primary status block (input registers 10..23).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MainState {
    /// Register 0, power state as reported by the controller.
    pub power_state: u16,
    pub status_word: u32,
    /// Bits 0-1 of the status word.
    pub power_full: u8,
    pub flags: StatusFlags,
    /// Supply air temperature in tenths of °C.
    pub raw_temperature: i16,
    pub is_temperature_valid: bool,
    pub raw_humidity: u16,
    pub is_humidity_valid: bool,
    pub raw_speed: u16,
    pub is_speed_valid: bool,
    /// Fan speed feedback as a step 0..=10.
    pub speed: u8,
    pub error_code: u32,
    pub warning_code: u32,
}

impl MainState {
    /// Error and warning codes merged into one bit set.
    pub fn error_warning_code(&self) -> u32 {
        self.error_code | self.warning_code
    }

    pub fn temperature(&self) -> f64 {
        f64::from(self.raw_temperature) / 10.0
    }
}

pub fn decode_main_state(map: &RegisterMap) -> Result<MainState> {
    let status_word = double_word(map.register(1)?, map.register(2)?);
    let raw_speed = map.register(7)?;
    Ok(MainState {
        power_state: map.register(0)?,
        status_word,
        power_full: (status_word & 0b11) as u8,
        flags: StatusFlags::decode(status_word),
        raw_temperature: unsigned_to_signed(map.register(3)?),
        is_temperature_valid: map.register(4)? & 0xFF != 0,
        raw_humidity: map.register(5)?,
        is_humidity_valid: map.register(6)? & 0xFF != 0,
        raw_speed,
        is_speed_valid: map.register(8)? & 0xFF != 0,
        speed: speed_decode(raw_speed),
        error_code: double_word(map.register(9)?, map.register(10)?),
        warning_code: double_word(map.register(11)?, map.register(12)?),
    })
}

/// Mode bits of the user register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserFlags {
    pub comfort: bool,
    pub restart: bool,
    pub humidifier: bool,
    pub dehumidifier: bool,
    pub cooler: bool,
    pub recuperator: bool,
    pub recirculation: bool,
    /// Set when bit 7 is clear.
    pub timers_scenario: bool,
}

impl UserFlags {
    pub fn decode(register: u16) -> Self {
        let word = u32::from(register);
        Self {
            comfort: bit(word, 0),
            restart: bit(word, 1),
            humidifier: bit(word, 2),
            dehumidifier: bit(word, 3),
            cooler: bit(word, 4),
            recuperator: bit(word, 5),
            recirculation: bit(word, 6),
            timers_scenario: !bit(word, 7),
        }
    }
}

/// Decoded setpoint block (input registers 64000..64012).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorTargetState {
    pub raw_speed_target: u16,
    pub speed_target: u8,
    /// Target temperature in tenths of °C.
    pub temperature_target: i16,
    pub humidity_target: u16,
    /// Zero when the unit is switched off.
    pub power_target: u16,
    pub user_register: u16,
    pub user_flags: UserFlags,
    pub unit_mode: u16,
    pub filter_raw: [u16; 2],
    /// Remaining filter life in percent.
    pub filter_life: [u16; 2],
    pub fan_actual_percent: u16,
    /// Instantaneous power in W.
    pub power: u32,
}

impl SensorTargetState {
    pub fn target_temperature(&self) -> f64 {
        f64::from(self.temperature_target) / 10.0
    }
}

pub fn decode_sensor_target_state(map: &RegisterMap) -> Result<SensorTargetState> {
    let raw_speed_target = map.register(0)?;
    let user_register = map.register(4)?;
    let filter_raw = [map.register(6)?, map.register(7)?];
    Ok(SensorTargetState {
        raw_speed_target,
        speed_target: speed_decode(raw_speed_target),
        temperature_target: unsigned_to_signed(map.register(1)?),
        humidity_target: map.register(2)?,
        power_target: map.register(3)?,
        user_register,
        user_flags: UserFlags::decode(user_register),
        unit_mode: map.register(5)?,
        filter_raw,
        filter_life: filter_raw.map(percent_decode),
        fan_actual_percent: percent_decode(map.register(10)?),
        power: u32::from(map.register(11)?) * 10,
    })
}

/// One accumulated-energy counter.
pub fn decode_energy(map: &RegisterMap) -> Result<u16> {
    map.register(0)
}

/// Sums energy counters (Wh) into kWh.
pub fn energy_total(readings: &[u16]) -> f64 {
    readings.iter().map(|&r| f64::from(r)).sum::<f64>() / 1000.0
}

/// Operating mode as presented to the climate entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClimateMode {
    Off,
    Heat,
    FanOnly,
}

impl ClimateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClimateMode::Off => "off",
            ClimateMode::Heat => "heat",
            ClimateMode::FanOnly => "fan_only",
        }
    }
}

impl fmt::Display for ClimateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main state, setpoints and energy read in one poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub main: MainState,
    pub sensors: SensorTargetState,
    /// Accumulated energy in kWh.
    pub energy: f64,
}

impl DeviceSnapshot {
    pub fn mode(&self) -> ClimateMode {
        if self.sensors.power_target == 0 {
            ClimateMode::Off
        } else if self.main.flags.is_heat_active {
            ClimateMode::Heat
        } else {
            ClimateMode::FanOnly
        }
    }

    /// Target speed in percent.
    pub fn speed_percent(&self) -> u16 {
        u16::from(self.sensors.speed_target) * 10
    }
}
