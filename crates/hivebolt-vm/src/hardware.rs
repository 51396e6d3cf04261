use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("unknown device id {0}")]
    UnknownDevice(u64),

    #[error("device {0} is not an actuator")]
    NotAnActuator(u64),

    #[error("device {0} is not a sensor")]
    NotASensor(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    Sensor,
    Actuator,
}

/// One registered piece of hardware. For sensors `value` is the registered
/// reading; for actuators it is the last committed state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub kind: DeviceKind,
    pub value: u64,
}

/// An actuator write queued during block application. It takes effect only
/// when the block it is bound to reaches confirmation depth.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredAction {
    pub block_hash: String,
    pub device_id: u64,
    pub value: u64,
    pub enqueued_ms: u64,
}

/// The boundary between consensus and physical hardware: a device registry
/// plus the FIFO of deferred actuator writes.
///
/// Irreversible physical effects must not race ahead of finality, so
/// contract writes land in the queue and [`HardwareBridge::commit`] releases
/// them per block hash once that block is deep enough that reorganization is
/// precluded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareBridge {
    devices: BTreeMap<u64, Device>,
    queue: Vec<DeferredAction>,
}

impl HardwareBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_sensor(&mut self, device_id: u64, reading: u64) {
        self.devices.insert(
            device_id,
            Device {
                kind: DeviceKind::Sensor,
                value: reading,
            },
        );
    }

    pub fn register_actuator(&mut self, device_id: u64) {
        self.devices.insert(
            device_id,
            Device {
                kind: DeviceKind::Actuator,
                value: 0,
            },
        );
    }

    /// Update a sensor's registered reading (hardware-facing side).
    pub fn set_reading(&mut self, device_id: u64, reading: u64) -> Result<(), HardwareError> {
        let device = self
            .devices
            .get_mut(&device_id)
            .ok_or(HardwareError::UnknownDevice(device_id))?;
        if device.kind != DeviceKind::Sensor {
            return Err(HardwareError::NotASensor(device_id));
        }
        device.value = reading;
        Ok(())
    }

    pub fn read_sensor(&self, device_id: u64) -> Result<u64, HardwareError> {
        let device = self
            .devices
            .get(&device_id)
            .ok_or(HardwareError::UnknownDevice(device_id))?;
        if device.kind != DeviceKind::Sensor {
            return Err(HardwareError::NotASensor(device_id));
        }
        Ok(device.value)
    }

    pub fn actuator_state(&self, device_id: u64) -> Result<u64, HardwareError> {
        let device = self
            .devices
            .get(&device_id)
            .ok_or(HardwareError::UnknownDevice(device_id))?;
        if device.kind != DeviceKind::Actuator {
            return Err(HardwareError::NotAnActuator(device_id));
        }
        Ok(device.value)
    }

    /// Queue an actuator write bound to `block_hash`. Nothing touches the
    /// device until that block is final.
    pub fn queue(
        &mut self,
        block_hash: &str,
        device_id: u64,
        value: u64,
        enqueued_ms: u64,
    ) -> Result<(), HardwareError> {
        let device = self
            .devices
            .get(&device_id)
            .ok_or(HardwareError::UnknownDevice(device_id))?;
        if device.kind != DeviceKind::Actuator {
            return Err(HardwareError::NotAnActuator(device_id));
        }
        self.queue.push(DeferredAction {
            block_hash: block_hash.to_string(),
            device_id,
            value,
            enqueued_ms,
        });
        debug!(device_id, value, block = %block_hash, "deferred actuator write queued");
        Ok(())
    }

    /// Apply and remove, in FIFO order, every queued action bound to
    /// `block_hash`. Repeating a commit for the same hash is a no-op: the
    /// matching entries are already gone.
    pub fn commit(&mut self, block_hash: &str) -> usize {
        let mut committed = 0;
        let mut remaining = Vec::with_capacity(self.queue.len());
        for action in self.queue.drain(..) {
            if action.block_hash == block_hash {
                if let Some(device) = self.devices.get_mut(&action.device_id) {
                    device.value = action.value;
                    committed += 1;
                    info!(
                        device_id = action.device_id,
                        value = action.value,
                        "actuator write committed at finality"
                    );
                }
            } else {
                remaining.push(action);
            }
        }
        self.queue = remaining;
        committed
    }

    /// Emergency path outside consensus: write the actuator immediately,
    /// bypassing the deferral queue.
    pub fn write_direct(&mut self, device_id: u64, value: u64) -> Result<(), HardwareError> {
        let device = self
            .devices
            .get_mut(&device_id)
            .ok_or(HardwareError::UnknownDevice(device_id))?;
        if device.kind != DeviceKind::Actuator {
            return Err(HardwareError::NotAnActuator(device_id));
        }
        device.value = value;
        Ok(())
    }

    /// The deferred queue, oldest first. Exposed so replicas can be compared
    /// in tests and the node surface can report pending actuation.
    pub fn pending(&self) -> &[DeferredAction] {
        &self.queue
    }

    pub fn device_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.devices.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> HardwareBridge {
        let mut hw = HardwareBridge::new();
        hw.register_actuator(100);
        hw.register_sensor(200, 55);
        hw
    }

    #[test]
    fn queue_does_not_touch_the_device() {
        let mut hw = bridge();
        hw.queue("aa", 100, 1, 0).unwrap();
        assert_eq!(hw.actuator_state(100).unwrap(), 0);
        assert_eq!(hw.pending().len(), 1);
    }

    #[test]
    fn commit_applies_in_fifo_order_and_is_idempotent() {
        let mut hw = bridge();
        hw.queue("aa", 100, 1, 0).unwrap();
        hw.queue("bb", 100, 2, 1).unwrap();
        hw.queue("aa", 100, 3, 2).unwrap();

        assert_eq!(hw.commit("aa"), 2);
        // Last committed write for "aa" wins; "bb" still pending.
        assert_eq!(hw.actuator_state(100).unwrap(), 3);
        assert_eq!(hw.pending().len(), 1);

        assert_eq!(hw.commit("aa"), 0);
        assert_eq!(hw.actuator_state(100).unwrap(), 3);
    }

    #[test]
    fn unknown_device_rejected_at_queue_time() {
        let mut hw = bridge();
        assert_eq!(
            hw.queue("aa", 999, 1, 0),
            Err(HardwareError::UnknownDevice(999))
        );
    }

    #[test]
    fn sensors_cannot_be_queued() {
        let mut hw = bridge();
        assert_eq!(
            hw.queue("aa", 200, 1, 0),
            Err(HardwareError::NotAnActuator(200))
        );
    }

    #[test]
    fn write_direct_bypasses_queue() {
        let mut hw = bridge();
        hw.write_direct(100, 9).unwrap();
        assert_eq!(hw.actuator_state(100).unwrap(), 9);
        assert!(hw.pending().is_empty());
    }

    #[test]
    fn sensor_reading_round_trip() {
        let mut hw = bridge();
        assert_eq!(hw.read_sensor(200).unwrap(), 55);
        hw.set_reading(200, 77).unwrap();
        assert_eq!(hw.read_sensor(200).unwrap(), 77);
        assert!(hw.read_sensor(100).is_err());
    }
}
