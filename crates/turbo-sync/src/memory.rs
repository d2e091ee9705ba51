//! # In-Memory Transport
//!
//! A [`Transport`] whose far end is a [`MemoryPeer`] held by the caller,
//! for driving the engine without a socket.
//!
//! ```text
//!   Connection ──send──► MemoryTransport ──frames──► MemoryPeer::next_frame()
//!   Connection ◄─events── EventSink ◄──deliver()/close()── MemoryPeer
//! ```
//!
//! By default `open()` succeeds and reports `Opened` straight away. The
//! peer can hold the open back (`set_auto_accept(false)` then `accept()`)
//! or refuse it.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::transport::{EventSink, Transport, TransportEvent};

#[derive(Default)]
struct MemoryState {
    sink: Option<EventSink>,
    open: bool,
    opens: usize,
    auto_accept: bool,
    refuse_open: bool,
}

struct Shared {
    state: Mutex<MemoryState>,
    frames: mpsc::UnboundedSender<String>,
}

/// Client side of an in-memory channel.
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

/// Store side of an in-memory channel.
pub struct MemoryPeer {
    shared: Arc<Shared>,
    frames: mpsc::UnboundedReceiver<String>,
}

impl MemoryTransport {
    /// Creates a connected transport/peer pair.
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(MemoryState {
                auto_accept: true,
                ..Default::default()
            }),
            frames: tx,
        });

        (
            MemoryTransport {
                shared: shared.clone(),
            },
            MemoryPeer { shared, frames: rx },
        )
    }
}

impl Transport for MemoryTransport {
    fn open(&self, events: EventSink) -> ClientResult<()> {
        let mut state = self.shared.state.lock();
        if state.refuse_open {
            return Err(ClientError::ConnectionFailed("memory peer refused".into()));
        }

        state.opens += 1;
        state.open = true;
        if state.auto_accept {
            events.emit(TransportEvent::Opened);
        }
        state.sink = Some(events);
        Ok(())
    }

    fn send(&self, frame: &str) -> ClientResult<()> {
        if !self.shared.state.lock().open {
            return Err(ClientError::NotConnected);
        }
        self.shared
            .frames
            .send(frame.to_string())
            .map_err(|_| ClientError::NotConnected)
    }

    fn close(&self) {
        let mut state = self.shared.state.lock();
        state.open = false;
        state.sink = None;
    }

    fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }
}

impl MemoryPeer {
    /// Waits for the next frame the client writes.
    ///
    /// Returns `None` once the transport is dropped.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    /// Waits for the next frame and parses it as JSON.
    pub async fn next_json(&mut self) -> Option<serde_json::Value> {
        let frame = self.next_frame().await?;
        serde_json::from_str(&frame).ok()
    }

    /// Frames written so far and not yet read.
    pub fn drain(&mut self) -> Vec<String> {
        let mut drained = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            drained.push(frame);
        }
        drained
    }

    /// Delivers a raw text frame to the client.
    pub fn deliver(&self, frame: impl Into<String>) -> bool {
        self.emit(TransportEvent::Message(frame.into()))
    }

    /// Serializes and delivers a frame to the client.
    pub fn deliver_json<T: Serialize>(&self, frame: &T) -> bool {
        match serde_json::to_string(frame) {
            Ok(text) => self.deliver(text),
            Err(e) => {
                debug!(?e, "Could not serialize frame for delivery");
                false
            }
        }
    }

    /// Completes a held-back open.
    pub fn accept(&self) -> bool {
        self.emit(TransportEvent::Opened)
    }

    /// Closes the channel from the store side.
    pub fn close(&self) {
        let sink = {
            let mut state = self.shared.state.lock();
            state.open = false;
            state.sink.take()
        };
        if let Some(sink) = sink {
            sink.emit(TransportEvent::Closed);
        }
    }

    /// Reports a failure followed by a close.
    pub fn fail(&self, reason: &str) {
        self.emit(TransportEvent::Errored(reason.to_string()));
        self.close();
    }

    /// Drops the channel without telling the client.
    pub fn sever(&self) {
        self.shared.state.lock().open = false;
    }

    /// Whether `open()` reports `Opened` immediately.
    pub fn set_auto_accept(&self, auto_accept: bool) {
        self.shared.state.lock().auto_accept = auto_accept;
    }

    /// Makes subsequent `open()` calls fail.
    pub fn refuse_open(&self, refuse: bool) {
        self.shared.state.lock().refuse_open = refuse;
    }

    /// Number of `open()` calls accepted so far.
    pub fn opens(&self) -> usize {
        self.shared.state.lock().opens
    }

    /// Whether the client currently holds an open channel.
    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    fn emit(&self, event: TransportEvent) -> bool {
        let sink = self.shared.state.lock().sink.clone();
        match sink {
            Some(sink) => sink.emit(event),
            None => false,
        }
    }
}
