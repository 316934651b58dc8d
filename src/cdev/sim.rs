//! In-process simulated GPIO chip.
//!
//! Records every handle open/close, write and read, and plays back scripted
//! input levels and edge events. Cloning a [`SimulatedChip`] shares its state,
//! so a clone kept by a test can inspect what a manager did with its own copy.

use super::{EdgeEvent, EdgeEventSource, EdgeFlags, GpioChip, LineHandle, PinMode};
use crate::error::{ControlError, Result};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// One recorded interaction with the simulated chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimOp {
    OpenLine { pin: u32, mode: PinMode },
    CloseLine { pin: u32 },
    Write { pin: u32, high: bool },
    Read { pin: u32, high: bool },
    OpenEvents { pin: u32, edges: EdgeFlags },
    CloseEvents { pin: u32 },
}

/// How a line behaves when read as an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputScript {
    /// Constant level
    Level(bool),
    /// LOW until the given time has passed since the input handle was opened
    HighAfter(Duration),
}

#[derive(Default)]
struct SimState {
    ops: Vec<SimOp>,
    inputs: HashMap<u32, InputScript>,
    driven: HashMap<u32, bool>,
    stuck: HashMap<u32, bool>,
    input_since: HashMap<u32, Instant>,
    events: VecDeque<EdgeEvent>,
    fail_open: HashSet<u32>,
    write_budget: Option<usize>,
    fail_poll: bool,
}

impl SimState {
    fn level(&self, pin: u32, mode: PinMode) -> bool {
        if let Some(&level) = self.stuck.get(&pin) {
            return level;
        }
        if mode.is_output() {
            return self.driven.get(&pin).copied().unwrap_or(false);
        }
        match self.inputs.get(&pin) {
            Some(InputScript::Level(level)) => *level,
            Some(InputScript::HighAfter(delay)) => self
                .input_since
                .get(&pin)
                .map(|since| since.elapsed() >= *delay)
                .unwrap_or(false),
            None => false,
        }
    }
}

/// A scripted GPIO chip for tests and dry runs.
#[derive(Clone, Default)]
pub struct SimulatedChip {
    state: Rc<RefCell<SimState>>,
}

impl SimulatedChip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `pin` read a constant level as an input.
    pub fn set_input(&self, pin: u32, high: bool) {
        self.state
            .borrow_mut()
            .inputs
            .insert(pin, InputScript::Level(high));
    }

    /// Make `pin` read LOW until `delay` after its input handle opens, then HIGH.
    pub fn set_input_high_after(&self, pin: u32, delay: Duration) {
        self.state
            .borrow_mut()
            .inputs
            .insert(pin, InputScript::HighAfter(delay));
    }

    /// Force `pin` to read `high` regardless of what is driven.
    pub fn stick_line(&self, pin: u32, high: bool) {
        self.state.borrow_mut().stuck.insert(pin, high);
    }

    /// Make every handle request for `pin` fail.
    pub fn fail_open(&self, pin: u32) {
        self.state.borrow_mut().fail_open.insert(pin);
    }

    /// Allow `count` more successful writes, then fail every write.
    pub fn fail_writes_after(&self, count: usize) {
        self.state.borrow_mut().write_budget = Some(count);
    }

    /// Make every subsequent poll fail with an I/O error.
    pub fn fail_polls(&self) {
        self.state.borrow_mut().fail_poll = true;
    }

    /// Queue edge events delivered, in order, to any event handle.
    pub fn queue_events(&self, events: impl IntoIterator<Item = EdgeEvent>) {
        self.state.borrow_mut().events.extend(events);
    }

    pub fn pending_events(&self) -> usize {
        self.state.borrow().events.len()
    }

    /// Everything recorded so far.
    pub fn ops(&self) -> Vec<SimOp> {
        self.state.borrow().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.borrow_mut().ops.clear();
    }

    /// Values written to `pin`, in order.
    pub fn writes(&self, pin: u32) -> Vec<bool> {
        self.state
            .borrow()
            .ops
            .iter()
            .filter_map(|op| match op {
                SimOp::Write { pin: p, high } if *p == pin => Some(*high),
                _ => None,
            })
            .collect()
    }

    /// Total number of writes on any pin.
    pub fn write_count(&self) -> usize {
        self.state
            .borrow()
            .ops
            .iter()
            .filter(|op| matches!(op, SimOp::Write { .. }))
            .count()
    }

    /// Number of line handles ever opened.
    pub fn line_opens(&self) -> usize {
        self.state
            .borrow()
            .ops
            .iter()
            .filter(|op| matches!(op, SimOp::OpenLine { .. }))
            .count()
    }

    /// Number of event handles ever opened.
    pub fn event_opens(&self) -> usize {
        self.state
            .borrow()
            .ops
            .iter()
            .filter(|op| matches!(op, SimOp::OpenEvents { .. }))
            .count()
    }

    /// Pins whose line handle is currently open.
    pub fn open_lines(&self) -> Vec<u32> {
        let state = self.state.borrow();
        let mut open: Vec<u32> = Vec::new();
        for op in &state.ops {
            match op {
                SimOp::OpenLine { pin, .. } => open.push(*pin),
                SimOp::CloseLine { pin } => {
                    if let Some(pos) = open.iter().position(|p| p == pin) {
                        open.remove(pos);
                    }
                }
                _ => {}
            }
        }
        open
    }
}

impl GpioChip for SimulatedChip {
    fn request_line(
        &self,
        pin: u32,
        mode: PinMode,
        _consumer: &str,
    ) -> Result<Box<dyn LineHandle>> {
        let mut state = self.state.borrow_mut();
        if state.fail_open.contains(&pin) {
            return Err(ControlError::resource(format!(
                "simulated line handle request failed for line {}",
                pin
            )));
        }
        state.ops.push(SimOp::OpenLine { pin, mode });
        if mode.is_output() {
            state.input_since.remove(&pin);
        } else {
            state.input_since.insert(pin, Instant::now());
        }
        Ok(Box::new(SimLine {
            state: Rc::clone(&self.state),
            pin,
            mode,
        }))
    }

    fn request_events(
        &self,
        pin: u32,
        edges: EdgeFlags,
        _consumer: &str,
    ) -> Result<Box<dyn EdgeEventSource>> {
        let mut state = self.state.borrow_mut();
        if state.fail_open.contains(&pin) {
            return Err(ControlError::resource(format!(
                "simulated event request failed for line {}",
                pin
            )));
        }
        state.ops.push(SimOp::OpenEvents { pin, edges });
        Ok(Box::new(SimEvents {
            state: Rc::clone(&self.state),
            pin,
            edges,
        }))
    }
}

struct SimLine {
    state: Rc<RefCell<SimState>>,
    pin: u32,
    mode: PinMode,
}

impl LineHandle for SimLine {
    fn get_value(&self) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        let high = state.level(self.pin, self.mode);
        state.ops.push(SimOp::Read { pin: self.pin, high });
        Ok(high)
    }

    fn set_value(&self, high: bool) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !self.mode.is_output() {
            return Err(ControlError::resource(format!(
                "line {} is not an output",
                self.pin
            )));
        }
        if let Some(budget) = state.write_budget.as_mut() {
            if *budget == 0 {
                return Err(ControlError::resource(format!(
                    "simulated write failure on line {}",
                    self.pin
                )));
            }
            *budget -= 1;
        }
        state.driven.insert(self.pin, high);
        state.ops.push(SimOp::Write { pin: self.pin, high });
        Ok(())
    }
}

impl Drop for SimLine {
    fn drop(&mut self) {
        self.state
            .borrow_mut()
            .ops
            .push(SimOp::CloseLine { pin: self.pin });
    }
}

struct SimEvents {
    state: Rc<RefCell<SimState>>,
    pin: u32,
    edges: EdgeFlags,
}

impl EdgeEventSource for SimEvents {
    fn poll_event(&mut self, _timeout: Duration) -> Result<Option<EdgeEvent>> {
        let mut state = self.state.borrow_mut();
        if state.fail_poll {
            return Err(ControlError::poll(format!(
                "simulated poll failure on line {}",
                self.pin
            )));
        }
        while let Some(event) = state.events.pop_front() {
            if self.edges.accepts(event.kind) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }
}

impl Drop for SimEvents {
    fn drop(&mut self) {
        self.state
            .borrow_mut()
            .ops
            .push(SimOp::CloseEvents { pin: self.pin });
    }
}
