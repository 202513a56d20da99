//! Which received offers are still inside their validity window at a given time.
//!
//! A reception at `t` of an offer lasting `d` hours opens the closed window
//! `[t, t + d - 1]`. Windows of the same offer are unioned. Stabbing queries are
//! answered with a sweep over windows sorted by start: for each offer we keep
//! the furthest end among windows already started, and the offer is active iff
//! that end has not passed.

use crate::model::{Event, EventKind, Hours};
use crate::reference::OfferCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start: Hours,
    /// Inclusive.
    pub end: Hours,
    /// Catalog position.
    pub offer: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationIndex {
    windows: Vec<ActiveWindow>,
    offer_count: usize,
}

impl ActivationIndex {
    /// Receptions of offers missing from the catalog are ignored; reference
    /// integrity is checked before any index is built.
    pub fn from_events(events: &[Event], catalog: &OfferCatalog) -> Self {
        let mut windows: Vec<ActiveWindow> = events
            .iter()
            .filter(|e| e.kind == EventKind::OfferReceived)
            .filter_map(|e| {
                let offer_id = e.offer_id.as_deref()?;
                let offer = catalog.position(offer_id)?;
                let duration = catalog.offers()[offer].duration_hours;
                (duration > 0).then(|| ActiveWindow {
                    start: e.timestamp,
                    end: e.timestamp.saturating_add(duration - 1),
                    offer,
                })
            })
            .collect();
        windows.sort_by_key(|w| (w.start, w.end, w.offer));

        Self {
            windows,
            offer_count: catalog.len(),
        }
    }

    pub fn windows(&self) -> &[ActiveWindow] {
        &self.windows
    }

    /// One-off query; prefer [`ActivationIndex::sweep`] for many ordered queries.
    pub fn active_at(&self, at: Hours) -> Vec<bool> {
        let mut flags = vec![false; self.offer_count];
        for window in self.windows.iter().take_while(|w| w.start <= at) {
            if window.end >= at {
                flags[window.offer] = true;
            }
        }
        flags
    }

    pub fn sweep(&self) -> ActivationSweep<'_> {
        ActivationSweep {
            index: self,
            next: 0,
            reach: vec![None; self.offer_count],
            last_query: None,
        }
    }
}

/// Answers stabbing queries in amortized O(windows + queries × offers) when
/// queries arrive in non-decreasing time order. A query earlier than the
/// previous one restarts the sweep.
#[derive(Debug, Clone)]
pub struct ActivationSweep<'a> {
    index: &'a ActivationIndex,
    next: usize,
    reach: Vec<Option<Hours>>,
    last_query: Option<Hours>,
}

impl ActivationSweep<'_> {
    pub fn stab(&mut self, at: Hours) -> Vec<bool> {
        if self.last_query.is_some_and(|prev| at < prev) {
            self.next = 0;
            self.reach.iter_mut().for_each(|r| *r = None);
        }
        self.last_query = Some(at);

        let windows = &self.index.windows;
        while self.next < windows.len() && windows[self.next].start <= at {
            let window = windows[self.next];
            let reach = &mut self.reach[window.offer];
            *reach = Some(reach.map_or(window.end, |end| end.max(window.end)));
            self.next += 1;
        }

        self.reach
            .iter()
            .map(|reach| reach.is_some_and(|end| end >= at))
            .collect()
    }
}

/// Activation flags for every event of one customer, in `seq` order.
pub fn activation_flags(events: &[Event], catalog: &OfferCatalog) -> Vec<Vec<bool>> {
    let index = ActivationIndex::from_events(events, catalog);
    let mut sweep = index.sweep();
    events.iter().map(|e| sweep.stab(e.timestamp)).collect()
}
