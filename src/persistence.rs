//! Persistence: a small key-value store over a single flash sector, used to
//! survive power loss for the handful of values §7 calls out as
//! "persisted every N". Generalizes the donor crate's
//! `ConfigStorage<F: NorFlash + ReadNorFlash>` (which only ever stored one
//! fixed struct) into a namespaced record written as one JSON blob per
//! sector, so new persisted fields don't require a flash layout migration.

use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use heapless::String;
use serde::{Deserialize, Serialize};

use crate::config::Tunables;
use crate::types::{AmpHours, TimestampMs};

pub const NAMESPACE: &str = "charger";
const RECORD_BUF_LEN: usize = 512;

#[derive(Debug)]
pub enum PersistenceError {
    Serialize,
    Deserialize,
    FlashRead,
    FlashWrite,
    FlashErase,
    RecordTooLarge,
}

/// Everything persisted under the `charger` namespace (§3, §4.7). Field
/// names double as the wire keys so a dump is self-describing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub battery_capacity_ah: f32,
    pub threshold_percentage: f32,
    pub max_allowed_current_ma: f32,
    pub bulk_voltage_v: f32,
    pub absorption_voltage_v: f32,
    pub float_voltage_v: f32,
    pub is_lithium: bool,
    pub use_dc_source: bool,
    pub dc_source_amps: f32,
    pub factor_divider: u8,
    pub accumulated_ah: AmpHours,
    pub last_saved_ms: TimestampMs,
}

impl PersistedRecord {
    pub fn from_live(tunables: &Tunables, accumulated_ah: AmpHours, now_ms: TimestampMs) -> Self {
        Self {
            battery_capacity_ah: tunables.battery_capacity_ah,
            threshold_percentage: tunables.threshold_percentage,
            max_allowed_current_ma: tunables.max_allowed_current_ma,
            bulk_voltage_v: tunables.bulk_voltage_v,
            absorption_voltage_v: tunables.absorption_voltage_v,
            float_voltage_v: tunables.float_voltage_v,
            is_lithium: tunables.is_lithium,
            use_dc_source: tunables.use_dc_source,
            dc_source_amps: tunables.dc_source_amps,
            factor_divider: tunables.factor_divider,
            accumulated_ah,
            last_saved_ms: now_ms,
        }
    }

    /// Rebuilds a `Tunables` from the record, re-validating cross-field
    /// invariants so a corrupted or stale record can never be applied
    /// blind (§7: invalid persisted state falls back to defaults).
    pub fn to_tunables(&self) -> Option<Tunables> {
        let mut t = Tunables::new();
        t.set_battery_capacity_ah(self.battery_capacity_ah).ok()?;
        t.set_threshold_percentage(self.threshold_percentage).ok()?;
        t.set_max_allowed_current_ma(self.max_allowed_current_ma).ok()?;
        t.set_voltages(self.float_voltage_v, self.absorption_voltage_v, self.bulk_voltage_v).ok()?;
        t.set_is_lithium(self.is_lithium);
        t.set_use_dc_source(self.use_dc_source);
        t.set_dc_source_amps(self.dc_source_amps).ok()?;
        t.set_factor_divider(self.factor_divider).ok()?;
        t.validate().ok()?;
        Some(t)
    }
}

/// Key-value persistence, abstracted so the embedded backend (one flash
/// sector) and the host/test backend (an in-memory buffer) share one
/// contract (§9: persistence is behind a trait so the state machine and
/// protocol layer never see flash directly).
pub trait PersistenceStore {
    fn load(&mut self) -> Result<Option<PersistedRecord>, PersistenceError>;
    fn save(&mut self, record: &PersistedRecord) -> Result<(), PersistenceError>;
}

/// Flash-backed store occupying one erase sector. The record is
/// serialized as compact JSON (via `serde-json-core`) and length-prefixed
/// so a short read after a torn write is detected instead of silently
/// parsed as garbage.
pub struct FlashPersistenceStore<F: NorFlash + ReadNorFlash> {
    flash: F,
    sector_offset: u32,
}

impl<F: NorFlash + ReadNorFlash> FlashPersistenceStore<F> {
    pub fn new(flash: F, sector_offset: u32) -> Self {
        Self { flash, sector_offset }
    }
}

impl<F: NorFlash + ReadNorFlash> PersistenceStore for FlashPersistenceStore<F> {
    fn load(&mut self) -> Result<Option<PersistedRecord>, PersistenceError> {
        let mut len_buf = [0u8; 4];
        self.flash
            .read(self.sector_offset, &mut len_buf)
            .map_err(|_| PersistenceError::FlashRead)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        if len == 0 || len == 0xFFFF_FFFF as usize || len > RECORD_BUF_LEN {
            return Ok(None);
        }

        let mut buf = [0u8; RECORD_BUF_LEN];
        self.flash
            .read(self.sector_offset + 4, &mut buf[..len])
            .map_err(|_| PersistenceError::FlashRead)?;

        match serde_json_core::from_slice::<PersistedRecord>(&buf[..len]) {
            Ok((record, _)) => Ok(Some(record)),
            Err(_) => Ok(None),
        }
    }

    fn save(&mut self, record: &PersistedRecord) -> Result<(), PersistenceError> {
        let mut buf = [0u8; RECORD_BUF_LEN];
        let len = serde_json_core::to_slice(record, &mut buf).map_err(|_| PersistenceError::Serialize)?;
        if len + 4 > F::ERASE_SIZE {
            return Err(PersistenceError::RecordTooLarge);
        }

        self.flash
            .erase(self.sector_offset, self.sector_offset + F::ERASE_SIZE as u32)
            .map_err(|_| PersistenceError::FlashErase)?;

        let len_bytes = (len as u32).to_le_bytes();
        self.flash
            .write(self.sector_offset, &len_bytes)
            .map_err(|_| PersistenceError::FlashWrite)?;
        self.flash
            .write(self.sector_offset + 4, &buf[..len])
            .map_err(|_| PersistenceError::FlashWrite)
    }
}

/// In-memory store for host tests and `mock-hardware` builds.
#[cfg(any(test, feature = "mock-hardware"))]
pub struct MapPersistenceStore {
    slot: Option<PersistedRecord>,
}

#[cfg(any(test, feature = "mock-hardware"))]
impl MapPersistenceStore {
    pub fn new() -> Self {
        Self { slot: None }
    }
}

#[cfg(any(test, feature = "mock-hardware"))]
impl Default for MapPersistenceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "mock-hardware"))]
impl PersistenceStore for MapPersistenceStore {
    fn load(&mut self) -> Result<Option<PersistedRecord>, PersistenceError> {
        Ok(self.slot)
    }

    fn save(&mut self, record: &PersistedRecord) -> Result<(), PersistenceError> {
        self.slot = Some(*record);
        Ok(())
    }
}

/// Namespaces the record key the way a multi-tenant flash layout would
/// (§3's persisted keys all live under `charger/*`); kept as a plain
/// constant check rather than a real prefix search since this store only
/// ever holds one record.
pub fn namespaced_key() -> String<16> {
    String::try_from(NAMESPACE).unwrap_or_default()
}
