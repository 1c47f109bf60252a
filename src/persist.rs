//! Plant snapshots and their storage layout.
//!
//! One `postcard` blob per entity kind under the `plant` namespace:
//!
//! | Key          | Contents                  |
//! |--------------|---------------------------|
//! | `sensors`    | `Vec<SensorRecord>`       |
//! | `actuators`  | `Vec<ActuatorRecord>`     |
//! | `alarms`     | `Vec<AlarmRecord>`        |
//! | `incidents`  | `Vec<IncidentRecord>`     |
//! | `interlocks` | `Vec<InterlockRecord>`    |
//! | `meta`       | timestamp, e-stop latch   |
//!
//! The core never performs I/O; [`SnapshotStore`] goes through
//! [`StoragePort`].  A save either replaces every key or, on a failed
//! write, puts the previous blobs back.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::actuators::ActuatorRecord;
use crate::alarms::AlarmRecord;
use crate::app::ports::{StorageError, StoragePort};
use crate::incidents::IncidentRecord;
use crate::safety::InterlockRecord;
use crate::sensors::SensorRecord;

pub const NAMESPACE: &str = "plant";

const KEY_SENSORS: &str = "sensors";
const KEY_ACTUATORS: &str = "actuators";
const KEY_ALARMS: &str = "alarms";
const KEY_INCIDENTS: &str = "incidents";
const KEY_INTERLOCKS: &str = "interlocks";
const KEY_META: &str = "meta";

const KEYS: [&str; 6] = [KEY_SENSORS, KEY_ACTUATORS, KEY_ALARMS, KEY_INCIDENTS, KEY_INTERLOCKS, KEY_META];

/// Full-state record collections, keyed by identity inside each record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlantSnapshot {
    pub taken_at: u64,
    /// Operator emergency stop was latched.
    #[serde(default)]
    pub emergency_stop: bool,
    pub sensors: Vec<SensorRecord>,
    pub actuators: Vec<ActuatorRecord>,
    /// Active alarms followed by history.
    pub alarms: Vec<AlarmRecord>,
    pub incidents: Vec<IncidentRecord>,
    pub interlocks: Vec<InterlockRecord>,
}

impl PlantSnapshot {
    /// Dashboard export.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct SnapshotMeta {
    taken_at: u64,
    emergency_stop: bool,
}

/// How many records each registry accepted on restore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub sensors: usize,
    pub actuators: usize,
    pub alarms: usize,
    pub incidents: usize,
    pub interlocks: usize,
}

/// Snapshot persistence over any [`StoragePort`].
pub struct SnapshotStore<S> {
    storage: S,
}

impl<S: StoragePort> SnapshotStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn save(&mut self, snap: &PlantSnapshot) -> Result<(), StorageError> {
        let meta = SnapshotMeta {
            taken_at: snap.taken_at,
            emergency_stop: snap.emergency_stop,
        };
        // Encode everything up front so a codec failure writes nothing.
        let blobs = [
            encode(KEY_SENSORS, &snap.sensors)?,
            encode(KEY_ACTUATORS, &snap.actuators)?,
            encode(KEY_ALARMS, &snap.alarms)?,
            encode(KEY_INCIDENTS, &snap.incidents)?,
            encode(KEY_INTERLOCKS, &snap.interlocks)?,
            encode(KEY_META, &meta)?,
        ];

        let mut previous = Vec::with_capacity(KEYS.len());
        for key in KEYS {
            match self.storage.read(NAMESPACE, key) {
                Ok(bytes) => previous.push(Some(bytes)),
                Err(StorageError::NotFound) => previous.push(None),
                Err(e) => return Err(e),
            }
        }

        for (written, (key, bytes)) in KEYS.iter().zip(&blobs).enumerate() {
            if let Err(e) = self.storage.write(NAMESPACE, key, bytes) {
                warn!("SNAPSHOT write {key} failed: {e}, rolling back {written} keys");
                self.roll_back(&previous[..written]);
                return Err(e);
            }
        }
        info!("SNAPSHOT saved at {} ms", snap.taken_at);
        Ok(())
    }

    /// Load whatever is stored.  Missing kinds come back empty; a blob that
    /// fails to decode is an error.
    pub fn load(&self) -> Result<Option<PlantSnapshot>, StorageError> {
        if !self.storage.exists(NAMESPACE, KEY_SENSORS) {
            return Ok(None);
        }
        let meta: SnapshotMeta = self.get(KEY_META)?.unwrap_or_default();
        Ok(Some(PlantSnapshot {
            taken_at: meta.taken_at,
            emergency_stop: meta.emergency_stop,
            sensors: self.get(KEY_SENSORS)?.unwrap_or_default(),
            actuators: self.get(KEY_ACTUATORS)?.unwrap_or_default(),
            alarms: self.get(KEY_ALARMS)?.unwrap_or_default(),
            incidents: self.get(KEY_INCIDENTS)?.unwrap_or_default(),
            interlocks: self.get(KEY_INTERLOCKS)?.unwrap_or_default(),
        }))
    }

    pub fn clear(&mut self) -> Result<(), StorageError> {
        for key in KEYS {
            self.storage.delete(NAMESPACE, key)?;
        }
        Ok(())
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Put back the blobs that preceded the first `previous.len()` keys.
    /// Everything is deleted before anything is rewritten, so a byte budget
    /// that held the old snapshot holds it again.
    fn roll_back(&mut self, previous: &[Option<Vec<u8>>]) {
        for key in &KEYS[..previous.len()] {
            if let Err(e) = self.storage.delete(NAMESPACE, key) {
                warn!("SNAPSHOT rollback delete {key}: {e}");
            }
        }
        for (key, bytes) in KEYS.iter().zip(previous) {
            if let Some(bytes) = bytes {
                if let Err(e) = self.storage.write(NAMESPACE, key, bytes) {
                    error!("SNAPSHOT rollback of {key} failed: {e}");
                }
            }
        }
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.storage.read(NAMESPACE, key) {
            Ok(bytes) => decode(&bytes).map(Some),
            Err(StorageError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Vec<u8>, StorageError> {
    postcard::to_allocvec(value).map_err(|e| {
        warn!("SNAPSHOT encode {key} failed: {e}");
        StorageError::Codec
    })
}

/// Decode one stored blob.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    postcard::from_bytes(bytes).map_err(|_| StorageError::Codec)
}
