use std::collections::BTreeMap;

use crate::protocol::Breakpoint;

/// Breakpoints keyed by source id.
#[derive(Debug, Clone, Default)]
pub struct BreakpointsModel {
    breakpoints: BTreeMap<String, Vec<Breakpoint>>,
}

impl BreakpointsModel {
    pub fn breakpoints(&self) -> &BTreeMap<String, Vec<Breakpoint>> {
        &self.breakpoints
    }

    pub fn get(&self, source_id: &str) -> &[Breakpoint] {
        self.breakpoints
            .get(source_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub(super) fn restore(&mut self, breakpoints: BTreeMap<String, Vec<Breakpoint>>) {
        self.breakpoints = breakpoints;
        self.breakpoints.retain(|_, list| !list.is_empty());
    }

    /// Replace one source's entries. An empty list forgets the source.
    pub(super) fn set(&mut self, source_id: &str, breakpoints: Vec<Breakpoint>) {
        if breakpoints.is_empty() {
            self.breakpoints.remove(source_id);
        } else {
            self.breakpoints.insert(source_id.to_string(), breakpoints);
        }
    }

    pub(super) fn clear(&mut self) {
        self.breakpoints.clear();
    }
}
