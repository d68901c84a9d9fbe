use droidscript::engine::device::{Device, PrimitiveAction};
use droidscript::engine::error::DeviceError;
use droidscript::screen::forest::{AccessibilityForest, ScreenSize};

/// Scripted device: serves one of a fixed list of screens and moves between
/// them when an action with a registered name is executed on a given screen.
pub struct FakeDevice {
    screens: Vec<AccessibilityForest>,
    current: usize,
    transitions: Vec<(usize, &'static str, usize)>,
    pub actions: Vec<PrimitiveAction>,
    pub snapshots: usize,
    pub screen_size: Option<ScreenSize>,
    pub fail_actions: bool,
}

impl FakeDevice {
    pub fn new(screens: Vec<AccessibilityForest>) -> Self {
        Self {
            screens,
            current: 0,
            transitions: Vec::new(),
            actions: Vec::new(),
            snapshots: 0,
            screen_size: None,
            fail_actions: false,
        }
    }

    pub fn single(screen: AccessibilityForest) -> Self {
        Self::new(vec![screen])
    }

    /// Executing `action` (by name, e.g. "tap") on screen `from` shows screen `to`.
    pub fn on(mut self, from: usize, action: &'static str, to: usize) -> Self {
        self.transitions.push((from, action, to));
        self
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn action_names(&self) -> Vec<&'static str> {
        self.actions.iter().map(PrimitiveAction::name).collect()
    }
}

impl Device for FakeDevice {
    fn snapshot(&mut self) -> Result<AccessibilityForest, DeviceError> {
        self.snapshots += 1;
        self.screens
            .get(self.current)
            .cloned()
            .ok_or_else(|| DeviceError::Protocol(format!("no screen {}", self.current)))
    }

    fn execute(&mut self, action: &PrimitiveAction) -> Result<(), DeviceError> {
        if self.fail_actions {
            return Err(DeviceError::Protocol("device went away".into()));
        }
        self.actions.push(action.clone());
        if let Some(&(_, _, to)) = self
            .transitions
            .iter()
            .find(|(from, name, _)| *from == self.current && *name == action.name())
        {
            self.current = to;
        }
        Ok(())
    }

    fn screen_size(&self) -> Option<ScreenSize> {
        self.screen_size
    }
}
