/* src/server/adapter/axum/src/flow.rs */

// Suspend/resume state machine shared by the request-body pump and the
// response write loop. Both directions walk the same transition table, so
// backpressure and cancellation behave identically either way.

use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowState {
  /// Nothing read yet.
  Idle,
  Reading,
  /// Consumer buffer full, source paused.
  Paused,
  /// Sink refused a write, waiting for drain.
  Draining,
  Done,
  Cancelled,
}

impl FlowState {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Done | Self::Cancelled)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowEvent {
  Start,
  /// The consumer cannot take more data.
  Stall,
  /// The sink asked the writer to wait for drain.
  Wait,
  /// Capacity regained (pull or drain).
  Resume,
  Finish,
  Cancel,
}

/// The transition table. `None` means the event is not valid in `state`.
pub fn transition(state: FlowState, event: FlowEvent) -> Option<FlowState> {
  use FlowEvent as E;
  use FlowState as S;
  match (state, event) {
    (S::Done | S::Cancelled, _) => None,
    (_, E::Cancel) => Some(S::Cancelled),
    (S::Idle, E::Start) => Some(S::Reading),
    (S::Idle | S::Reading, E::Finish) => Some(S::Done),
    (S::Reading, E::Stall) => Some(S::Paused),
    (S::Reading, E::Wait) => Some(S::Draining),
    (S::Paused | S::Draining, E::Resume) => Some(S::Reading),
    _ => None,
  }
}

#[derive(Debug)]
pub struct Flow {
  state: Mutex<FlowState>,
}

impl Default for Flow {
  fn default() -> Self {
    Self::new()
  }
}

impl Flow {
  pub fn new() -> Self {
    Self { state: Mutex::new(FlowState::Idle) }
  }

  pub fn state(&self) -> FlowState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Apply `event`; returns whether a transition happened.
  pub fn fire(&self, event: FlowEvent) -> bool {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    match transition(*state, event) {
      Some(next) => {
        *state = next;
        true
      }
      None => false,
    }
  }

  /// Cancel the flow. Only the first call (from either direction) returns
  /// `true`; later ones, or a cancel after completion, are no-ops.
  pub fn cancel(&self) -> bool {
    self.fire(FlowEvent::Cancel)
  }
}
