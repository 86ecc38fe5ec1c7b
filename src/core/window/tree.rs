//! Window stacking order.

/// Stacking order of the root window's children.
#[derive(Debug, Default)]
pub struct WindowTree {
    /// List of windows in stacking order (back to front).
    /// The last element is the topmost window.
    pub stacking_order: Vec<u32>,
}

impl WindowTree {
    pub fn new() -> Self {
        Self {
            stacking_order: Vec::new(),
        }
    }

    /// Insert a new window at the top of the stack.
    pub fn insert(&mut self, window_id: u32) {
        if !self.contains(window_id) {
            self.stacking_order.push(window_id);
        }
    }

    /// Remove a window from the stack.
    pub fn remove(&mut self, window_id: u32) {
        if let Some(pos) = self.position(window_id) {
            self.stacking_order.remove(pos);
        }
    }

    /// Move a window to the top (front) of the stack.
    pub fn bring_to_front(&mut self, window_id: u32) {
        if let Some(pos) = self.position(window_id) {
            let id = self.stacking_order.remove(pos);
            self.stacking_order.push(id);
        }
    }

    /// Place a window directly above `sibling`, or at the bottom when
    /// `sibling` is `None`. Unknown siblings leave the order unchanged.
    pub fn restack_above(&mut self, window_id: u32, sibling: Option<u32>) {
        if Some(window_id) == sibling {
            return;
        }
        let Some(pos) = self.position(window_id) else {
            return;
        };

        match sibling {
            None => {
                let id = self.stacking_order.remove(pos);
                self.stacking_order.insert(0, id);
            }
            Some(sibling) => {
                if !self.contains(sibling) {
                    return;
                }
                let id = self.stacking_order.remove(pos);
                if let Some(below) = self.position(sibling) {
                    self.stacking_order.insert(below + 1, id);
                }
            }
        }
    }

    pub fn contains(&self, window_id: u32) -> bool {
        self.stacking_order.contains(&window_id)
    }

    /// Get the topmost window ID.
    pub fn topmost(&self) -> Option<u32> {
        self.stacking_order.last().copied()
    }

    /// Windows from top to bottom.
    pub fn iter_top_down(&self) -> impl Iterator<Item = u32> + '_ {
        self.stacking_order.iter().rev().copied()
    }

    pub fn len(&self) -> usize {
        self.stacking_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacking_order.is_empty()
    }

    fn position(&self, window_id: u32) -> Option<usize> {
        self.stacking_order.iter().position(|&id| id == window_id)
    }
}
