//! Shared events.
use crate::{command::EventCallback, marker::Marker};
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    io,
    sync::{mpsc, Arc},
    thread,
};
use tracing::{debug, trace};

struct EventState {
    signaled: Marker,
    waiters: BTreeMap<Marker, Vec<EventCallback>>,
    listener: mpsc::Sender<Vec<EventCallback>>,
}

/// A monotonic timeline that the device signals at markers.
///
/// Callbacks registered with [`notify`](SharedEvent::notify) run on the event's listener thread,
/// in marker order, once the event has been signaled at or past their marker. Callbacks must not
/// block on the command queue that owns the event.
pub struct SharedEvent {
    label: String,
    state: Mutex<EventState>,
}

impl SharedEvent {
    pub fn new(label: &str) -> io::Result<Arc<SharedEvent>> {
        let (sender, receiver) = mpsc::channel::<Vec<EventCallback>>();
        let thread_label = label.to_string();
        thread::Builder::new()
            .name(format!("{} listener", label))
            .spawn(move || {
                debug!(label = thread_label.as_str(), "event listener started");
                for callbacks in receiver.iter() {
                    for callback in callbacks {
                        callback();
                    }
                }
                debug!(label = thread_label.as_str(), "event listener stopped");
            })?;

        Ok(Arc::new(SharedEvent {
            label: label.to_string(),
            state: Mutex::new(EventState {
                signaled: Marker(0),
                waiters: BTreeMap::new(),
                listener: sender,
            }),
        }))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The highest marker the event has been signaled at.
    pub fn signaled_value(&self) -> Marker {
        self.state.lock().signaled
    }

    /// Runs `callback` once the event reaches `marker`.
    pub fn notify(&self, marker: Marker, callback: EventCallback) {
        let mut state = self.state.lock();
        if marker <= state.signaled {
            let _ = state.listener.send(vec![callback]);
        } else {
            state.waiters.entry(marker).or_default().push(callback);
        }
    }

    /// Advances the event to `marker` and schedules the callbacks it releases.
    /// Signaling a marker lower than the current value has no effect.
    pub fn signal(&self, marker: Marker) {
        let mut state = self.state.lock();
        if marker <= state.signaled {
            return;
        }
        trace!(event = self.label.as_str(), ?marker, "signal");
        state.signaled = marker;
        let pending = state.waiters.split_off(&Marker(marker.0 + 1));
        let ready = std::mem::replace(&mut state.waiters, pending);
        let callbacks: Vec<_> = ready.into_values().flatten().collect();
        if !callbacks.is_empty() {
            let _ = state.listener.send(callbacks);
        }
    }

    /// Schedules callbacks on the listener thread, behind every callback already released.
    pub fn dispatch(&self, callbacks: Vec<EventCallback>) {
        if callbacks.is_empty() {
            return;
        }
        let state = self.state.lock();
        let _ = state.listener.send(callbacks);
    }
}

impl std::fmt::Debug for SharedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SharedEvent")
            .field("label", &self.label)
            .field("signaled", &self.signaled_value())
            .finish()
    }
}
