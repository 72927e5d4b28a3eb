//! Generic, reusable finite state machine.
//!
//! Transitions are registered data, not callback dispatch tables: a
//! `Transition` names the states it fires from, the event it fires on, the
//! state it lands in, and an optional guard/action pair. Guards run before
//! the state mutates and can cancel the transition; actions run after and
//! are logged-not-rolled-back on failure, mirroring how the concrete
//! lifecycle machine in [`crate::lifecycle`] uses this builder.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;

pub type Guard<S, E> = Arc<dyn Fn(&S, &E, &serde_json::Value) -> bool + Send + Sync>;
pub type Action<S, E> = Arc<dyn Fn(&S, &E) + Send + Sync>;

#[derive(Clone)]
pub struct Transition<S, E> {
    pub from_states: Vec<S>,
    pub event: E,
    pub to_state: S,
    pub guard: Option<Guard<S, E>>,
    pub action: Option<Action<S, E>>,
}

impl<S, E> Transition<S, E> {
    pub fn new(from_states: Vec<S>, event: E, to_state: S) -> Self {
        Self {
            from_states,
            event,
            to_state,
            guard: None,
            action: None,
        }
    }

    pub fn with_guard(mut self, guard: Guard<S, E>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_action(mut self, action: Action<S, E>) -> Self {
        self.action = Some(action);
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FsmError {
    #[error("transition was canceled by its guard")]
    Canceled,
    #[error("no transition registered for this event in the current state")]
    NoTransition,
    #[error("transition has an empty from_states list")]
    EmptyFromStates,
    #[error("conflicting destinations registered for the same (state, event) pair")]
    ConflictingDestinations,
}

pub struct FsmBuilder<S, E> {
    transitions: Vec<Transition<S, E>>,
}

impl<S, E> Default for FsmBuilder<S, E> {
    fn default() -> Self {
        Self {
            transitions: Vec::new(),
        }
    }
}

impl<S, E> FsmBuilder<S, E>
where
    S: Clone + Eq + Hash + Debug,
    E: Clone + Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_transition(mut self, transition: Transition<S, E>) -> Result<Self, FsmError> {
        if transition.from_states.is_empty() {
            return Err(FsmError::EmptyFromStates);
        }
        self.transitions.push(transition);
        Ok(self)
    }

    pub fn build(self, initial: S) -> Result<Fsm<S, E>, FsmError> {
        for (i, a) in self.transitions.iter().enumerate() {
            for b in self.transitions.iter().skip(i + 1) {
                if a.event != b.event {
                    continue;
                }
                let overlap = a.from_states.iter().any(|s| b.from_states.contains(s));
                if overlap && a.to_state != b.to_state {
                    return Err(FsmError::ConflictingDestinations);
                }
            }
        }

        Ok(Fsm {
            transitions: self.transitions,
            state: RwLock::new(initial.clone()),
            initial,
            lock: Mutex::new(()),
        })
    }
}

/// A built, runnable state machine. Cheap to share behind an `Arc`: state
/// access takes a read lock; `transition` serializes guard → mutate → action
/// with an internal mutex so concurrent callers never interleave those steps.
pub struct Fsm<S, E> {
    transitions: Vec<Transition<S, E>>,
    state: RwLock<S>,
    initial: S,
    lock: Mutex<()>,
}

impl<S, E> Fsm<S, E>
where
    S: Clone + Eq + Hash + Debug,
    E: Clone + Eq + Hash + Debug,
{
    pub fn current_state(&self) -> S {
        self.state.read().expect("fsm state lock poisoned").clone()
    }

    /// Pure reachability check: is there a transition out of the current
    /// state for this event? Guards are not evaluated.
    pub fn can_transition(&self, event: &E) -> bool {
        let current = self.current_state();
        self.transitions
            .iter()
            .any(|t| t.event == *event && t.from_states.contains(&current))
    }

    pub fn transition(&self, event: E, data: serde_json::Value) -> Result<S, FsmError> {
        let _guard = self.lock.lock().expect("fsm transition lock poisoned");
        let current = self.current_state();

        let matched = self
            .transitions
            .iter()
            .find(|t| t.event == event && t.from_states.contains(&current))
            .ok_or(FsmError::NoTransition)?;

        if let Some(guard) = &matched.guard {
            if !guard(&current, &event, &data) {
                return Err(FsmError::Canceled);
            }
        }

        let next = matched.to_state.clone();
        {
            let mut state = self.state.write().expect("fsm state lock poisoned");
            *state = next.clone();
        }

        if let Some(action) = &matched.action {
            action(&next, &event);
        }

        Ok(next)
    }

    pub fn set_state(&self, state: S) {
        let mut guard = self.state.write().expect("fsm state lock poisoned");
        *guard = state;
    }

    pub fn reset(&self) {
        self.set_state(self.initial.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum S {
        Idle,
        Running,
        Done,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum E {
        Start,
        Finish,
    }

    #[test]
    fn basic_transition_path() {
        let fsm = FsmBuilder::new()
            .add_transition(Transition::new(vec![S::Idle], E::Start, S::Running))
            .unwrap()
            .add_transition(Transition::new(vec![S::Running], E::Finish, S::Done))
            .unwrap()
            .build(S::Idle)
            .unwrap();

        assert_eq!(fsm.current_state(), S::Idle);
        assert!(fsm.can_transition(&E::Start));
        assert!(!fsm.can_transition(&E::Finish));

        fsm.transition(E::Start, serde_json::Value::Null).unwrap();
        assert_eq!(fsm.current_state(), S::Running);

        fsm.transition(E::Finish, serde_json::Value::Null).unwrap();
        assert_eq!(fsm.current_state(), S::Done);
    }

    #[test]
    fn no_transition_is_distinguishable_from_canceled() {
        let fsm = FsmBuilder::new()
            .add_transition(Transition::new(vec![S::Idle], E::Start, S::Running))
            .unwrap()
            .build(S::Idle)
            .unwrap();

        let err = fsm.transition(E::Finish, serde_json::Value::Null).unwrap_err();
        assert_eq!(err, FsmError::NoTransition);
    }

    #[test]
    fn guard_can_cancel_a_transition() {
        let fsm = FsmBuilder::new()
            .add_transition(
                Transition::new(vec![S::Idle], E::Start, S::Running)
                    .with_guard(Arc::new(|_from, _event, data| {
                        data.get("allow").and_then(|v| v.as_bool()).unwrap_or(false)
                    })),
            )
            .unwrap()
            .build(S::Idle)
            .unwrap();

        let err = fsm
            .transition(E::Start, serde_json::json!({"allow": false}))
            .unwrap_err();
        assert_eq!(err, FsmError::Canceled);
        assert_eq!(fsm.current_state(), S::Idle);

        fsm.transition(E::Start, serde_json::json!({"allow": true}))
            .unwrap();
        assert_eq!(fsm.current_state(), S::Running);
    }

    #[test]
    fn conflicting_destinations_rejected_at_build() {
        let result = FsmBuilder::new()
            .add_transition(Transition::new(vec![S::Idle], E::Start, S::Running))
            .unwrap()
            .add_transition(Transition::new(vec![S::Idle], E::Start, S::Done))
            .unwrap()
            .build(S::Idle);
        match result {
            Ok(_) => panic!("expected ConflictingDestinations"),
            Err(err) => assert_eq!(err, FsmError::ConflictingDestinations),
        }
    }

    #[test]
    fn empty_from_states_rejected_immediately() {
        let result =
            FsmBuilder::<S, E>::new().add_transition(Transition::new(vec![], E::Start, S::Running));
        match result {
            Ok(_) => panic!("expected EmptyFromStates"),
            Err(err) => assert_eq!(err, FsmError::EmptyFromStates),
        }
    }

    #[test]
    fn reset_returns_to_initial_state() {
        let fsm = FsmBuilder::new()
            .add_transition(Transition::new(vec![S::Idle], E::Start, S::Running))
            .unwrap()
            .build(S::Idle)
            .unwrap();
        fsm.transition(E::Start, serde_json::Value::Null).unwrap();
        assert_eq!(fsm.current_state(), S::Running);
        fsm.reset();
        assert_eq!(fsm.current_state(), S::Idle);
    }
}
