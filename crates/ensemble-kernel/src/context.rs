//! Context objects: stable anchors that coordination units attach to.
//!
//! A context contributes a time window and a factory that re-instantiates
//! its units every step. The context's named agent subsets live in the
//! world, so only unit actuation mutates them.

use serde::{Deserialize, Serialize};

use crate::agent::{ContextId, Step};
use crate::ensemble::Ensemble;
use crate::world::World;

/// Applicability window of a context. `end: None` never closes on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Step,
    pub end: Option<Step>,
}

impl Window {
    pub fn new(start: Step, end: Step) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn open_ended(start: Step) -> Self {
        Self { start, end: None }
    }

    /// Whether `step` falls inside the window.
    pub fn contains(&self, step: Step) -> bool {
        step >= self.start && self.end.map_or(true, |end| step <= end)
    }

    /// Whether the window has permanently closed by `step`.
    pub fn closed_at(&self, step: Step) -> bool {
        self.end.is_some_and(|end| end < step)
    }
}

/// Produces the unit instances a context offers at a step.
///
/// Must be a pure function of `(context, window, step)`: instances never
/// outlive the step they were created for.
pub trait UnitFactory<W: World> {
    fn offer(&self, context: ContextId, window: Window, step: Step) -> Vec<Box<dyn Ensemble<W>>>;
}

impl<W, F> UnitFactory<W> for F
where
    W: World,
    F: Fn(ContextId, Window, Step) -> Vec<Box<dyn Ensemble<W>>>,
{
    fn offer(&self, context: ContextId, window: Window, step: Step) -> Vec<Box<dyn Ensemble<W>>> {
        self(context, window, step)
    }
}

/// A registered context.
pub struct ContextSpec<W: World> {
    pub id: ContextId,
    pub window: Window,
    pub factory: Box<dyn UnitFactory<W>>,
}

impl<W: World> ContextSpec<W> {
    pub fn new(id: ContextId, window: Window, factory: impl UnitFactory<W> + 'static) -> Self {
        Self {
            id,
            window,
            factory: Box::new(factory),
        }
    }

    pub fn offer(&self, step: Step) -> Vec<Box<dyn Ensemble<W>>> {
        self.factory.offer(self.id, self.window, step)
    }
}

impl<W: World> std::fmt::Debug for ContextSpec<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextSpec")
            .field("id", &self.id)
            .field("window", &self.window)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_bounds() {
        let w = Window::new(10, 20);
        assert!(!w.contains(9));
        assert!(w.contains(10));
        assert!(w.contains(20));
        assert!(!w.closed_at(20));
        assert!(w.closed_at(21));
    }

    #[test]
    fn test_open_ended_window_never_closes() {
        let w = Window::open_ended(0);
        assert!(w.contains(1_000_000));
        assert!(!w.closed_at(usize::MAX));
    }
}
