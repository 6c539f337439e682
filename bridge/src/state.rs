//! The single mutable aggregate, with per-field observer fan-out.
//!
//! Each field is wrapped in [`Field<T>`]: `get` takes a shared read section;
//! `set` takes an exclusive write section just long enough to swap the
//! value, then releases it before invoking observers in registration order
//! with `(old, new)`. Observers therefore never run while the write lock is
//! held, and must not call `set` on the same field synchronously — doing so
//! would re-enter this same fan-out and is forbidden by contract (not by the
//! type system).

use launch_types::{
    BallMetrics, ClubId, ClubMetrics, ConnectionStatus, Handedness, Position3, SpinMode,
};
use std::sync::{Arc, Mutex, RwLock};

use crate::config::BridgeConfig;

type Observer<T> = Arc<dyn Fn(&T, &T) + Send + Sync>;

/// An observable cell. Registration and mutation are each serialized by
/// their own lock; the two locks are never held at once.
pub struct Field<T: Clone + Send + Sync + 'static> {
    value: RwLock<T>,
    observers: Mutex<Vec<Observer<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Field<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: RwLock::new(initial),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self) -> T {
        self.value.read().expect("state lock poisoned").clone()
    }

    /// Swap in `new`, then notify observers in registration order with the
    /// snapshotted `(old, new)` pair. Both the value write section and the
    /// observer-list lock are released before any observer runs.
    pub fn set(&self, new: T) {
        let old = {
            let mut guard = self.value.write().expect("state lock poisoned");
            let old = guard.clone();
            *guard = new.clone();
            old
        };
        let observers: Vec<Observer<T>> = self
            .observers
            .lock()
            .expect("observer lock poisoned")
            .clone();
        for obs in &observers {
            obs(&old, &new);
        }
    }

    pub fn observe(&self, f: impl Fn(&T, &T) + Send + Sync + 'static) {
        self.observers
            .lock()
            .expect("observer lock poisoned")
            .push(Arc::new(f));
    }
}

/// `ball_detected`/`ball_ready` are updated together by the sensor-frame
/// handler so the "ready implies detected" invariant can never be observed
/// half-applied.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BallPresence {
    pub detected: bool,
    pub ready: bool,
}

/// The single source of truth for the bridge. Owned by the supervisor for
/// the lifetime of the process; handed out as a shared reference.
pub struct AppState {
    pub device_display_name: Field<Option<String>>,
    pub connection_status: Field<ConnectionStatus>,
    pub battery_level: Field<Option<u8>>,
    pub ball_presence: Field<BallPresence>,
    pub ball_position: Field<Option<Position3>>,
    pub last_ball_metrics: Field<Option<BallMetrics>>,
    pub last_club_metrics: Field<Option<ClubMetrics>>,
    pub last_error: Field<Option<String>>,
    pub club: Field<Option<ClubId>>,
    pub club_name: Field<Option<String>>,
    pub handedness: Field<Option<Handedness>>,
    pub spin_mode: Field<Option<SpinMode>>,
    pub simulator_status: Field<ConnectionStatus>,
    pub simulator_error: Field<Option<String>>,
    pub camera_url: Field<String>,
    pub camera_enabled: Field<bool>,
    pub is_aligning: Field<bool>,
    pub alignment_angle: Field<f64>,
    pub is_aligned: Field<bool>,
    pub firmware_version: Field<Option<String>>,
    pub launcher_version: Field<Option<String>>,
    pub mmi_version: Field<Option<String>>,
}

impl AppState {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            device_display_name: Field::new(None),
            connection_status: Field::new(ConnectionStatus::Disconnected),
            battery_level: Field::new(None),
            ball_presence: Field::new(BallPresence::default()),
            ball_position: Field::new(None),
            last_ball_metrics: Field::new(None),
            last_club_metrics: Field::new(None),
            last_error: Field::new(None),
            club: Field::new(None),
            club_name: Field::new(None),
            handedness: Field::new(None),
            spin_mode: Field::new(None),
            simulator_status: Field::new(ConnectionStatus::Disconnected),
            simulator_error: Field::new(None),
            camera_url: Field::new(config.camera_base_url.clone()),
            camera_enabled: Field::new(false),
            is_aligning: Field::new(false),
            alignment_angle: Field::new(0.0),
            is_aligned: Field::new(false),
            firmware_version: Field::new(None),
            launcher_version: Field::new(None),
            mmi_version: Field::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn observers_fire_in_registration_order() {
        let field = Field::new(0i32);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            field.observe(move |_old, _new| order.lock().unwrap().push(i));
        }
        field.set(1);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn observers_see_old_and_new() {
        let field = Field::new(10i32);
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        field.observe(move |old, new| *seen2.lock().unwrap() = Some((*old, *new)));
        field.set(20);
        assert_eq!(*seen.lock().unwrap(), Some((10, 20)));
    }

    #[test]
    fn ball_presence_updates_atomically() {
        let calls = Arc::new(AtomicUsize::new(0));
        let field = Field::new(BallPresence::default());
        let calls2 = calls.clone();
        field.observe(move |_old, new| {
            // Ready can never be observed true while detected is false.
            assert!(!new.ready || new.detected);
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        field.set(BallPresence {
            detected: true,
            ready: true,
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
