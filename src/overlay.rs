use crate::engine::{ListenerId, Viewport};
use crate::types::{Deal, ScreenPoint};
use serde::Serialize;
use tracing::debug;

/// Floating detail card pinned in screen space to the selected deal.
#[derive(Debug, Default)]
pub struct InfoOverlay {
    tracked: Option<Deal>,
    listener: Option<ListenerId>,
    position: Option<ScreenPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayCard {
    pub deal: Deal,
    pub position: ScreenPoint,
}

impl InfoOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(&self) -> Option<ListenerId> {
        self.listener
    }

    /// Brings the subscription and position in line with the current selection.
    pub fn sync(&mut self, viewport: Option<&mut dyn Viewport>, selected: Option<&Deal>) {
        let Some(viewport) = viewport else {
            // The engine is gone, so is every listener it held.
            self.listener = None;
            self.position = None;
            self.tracked = selected.cloned();
            return;
        };

        match selected {
            None => {
                self.detach(viewport);
                self.tracked = None;
            }
            Some(deal) => {
                if self.listener.is_none() {
                    let listener = viewport.on_move();
                    debug!(?listener, deal = deal.id, "overlay subscribed to map moves");
                    self.listener = Some(listener);
                }
                self.tracked = Some(deal.clone());
                self.position = Some(viewport.project(deal.lng_lat()));
            }
        }
    }

    /// Recomputes the position on a viewport move addressed to this overlay.
    pub fn on_move(&mut self, viewport: &dyn Viewport, listener: ListenerId) -> bool {
        if self.listener != Some(listener) {
            return false;
        }
        match &self.tracked {
            Some(deal) => {
                self.position = Some(viewport.project(deal.lng_lat()));
                true
            }
            None => false,
        }
    }

    /// Drops the move subscription, if any.
    pub fn detach(&mut self, viewport: &mut dyn Viewport) {
        if let Some(listener) = self.listener.take() {
            viewport.off_move(listener);
            debug!(?listener, "overlay unsubscribed from map moves");
        }
        self.position = None;
    }

    pub fn card(&self) -> Option<OverlayCard> {
        let deal = self.tracked.clone()?;
        let position = self.position?;
        Some(OverlayCard { deal, position })
    }
}
