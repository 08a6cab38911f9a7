//! Composition root: filter state, map canvas and info overlay wired together.

use crate::canvas::{CanvasEvent, CanvasInputs, MapCanvas};
use crate::config::MapConfig;
use crate::engine::{EngineEvent, EngineOptions, MapEngine};
use crate::filter::{FilterAction, FilterState};
use crate::overlay::{InfoOverlay, OverlayCard};
use crate::panel::{DesktopPanel, FilterControls, FilterSurface, MobileSheet, PanelInput, PanelView};
use serde::Serialize;
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PageVariant {
    Full,
    /// Non-interactive embed: fixed filters, no selection, no overlay.
    Preview,
}

impl PageVariant {
    pub fn zoom(self, map: &MapConfig) -> f64 {
        match self {
            PageVariant::Full => map.zoom,
            PageVariant::Preview => map.preview_zoom,
        }
    }

    pub fn is_interactive(self) -> bool {
        match self {
            PageVariant::Full => true,
            PageVariant::Preview => false,
        }
    }
}

impl FromStr for PageVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(PageVariant::Full),
            "preview" => Ok(PageVariant::Preview),
            other => Err(format!("unknown page variant: {other}")),
        }
    }
}

pub struct MapPage<E: MapEngine> {
    variant: PageVariant,
    options: EngineOptions,
    filters: FilterState,
    canvas: MapCanvas<E>,
    overlay: InfoOverlay,
}

impl<E: MapEngine> MapPage<E> {
    pub fn new(variant: PageVariant, options: EngineOptions) -> Self {
        let filters = FilterState::default();
        let canvas = MapCanvas::new(canvas_inputs(&filters));
        Self {
            variant,
            options,
            filters,
            canvas,
            overlay: InfoOverlay::new(),
        }
    }

    pub fn variant(&self) -> PageVariant {
        self.variant
    }

    pub fn canvas(&self) -> &MapCanvas<E> {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut MapCanvas<E> {
        &mut self.canvas
    }

    pub fn mount<F>(&mut self, create: F) -> bool
    where
        F: FnOnce(&EngineOptions) -> E,
    {
        let created = self.canvas.mount(&self.options, create);
        if created {
            self.sync();
        }
        created
    }

    pub fn dispatch(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Move { listener } => {
                if let Some(engine) = self.canvas.engine() {
                    self.overlay.on_move(engine, listener);
                }
            }
            EngineEvent::MapClicked { .. } => {
                if self.variant.is_interactive() && self.filters.selected_deal().is_some() {
                    debug!("map clicked, closing deal card");
                    self.filters.clear_selection();
                    self.sync_overlay();
                }
            }
            other => match self.canvas.handle_event(&other) {
                Some(CanvasEvent::Ready) => {
                    info!(variant = ?self.variant, "map ready");
                    self.sync();
                }
                Some(CanvasEvent::DealClicked(deal)) if self.variant.is_interactive() => {
                    debug!(deal = deal.id, name = deal.name, "marker clicked");
                    self.filters.select(deal.id);
                    self.sync_overlay();
                }
                Some(CanvasEvent::DealClicked(_)) | None => {}
            },
        }
    }

    /// Drains the engine's queued events and dispatches them. Returns how many ran.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let events = match self.canvas.engine_mut() {
                Some(engine) => engine.take_events(),
                None => return handled,
            };
            if events.is_empty() {
                return handled;
            }
            handled += events.len();
            for event in events {
                self.dispatch(event);
            }
        }
    }

    pub fn handle_input<S: FilterSurface>(&mut self, surface: &S, input: PanelInput) -> bool {
        surface.handle(self, input)
    }

    pub fn desktop_panel(&self) -> PanelView {
        DesktopPanel.view(self)
    }

    pub fn mobile_sheet(&self) -> PanelView {
        MobileSheet.view(self)
    }

    pub fn overlay_card(&self) -> Option<OverlayCard> {
        if self.variant.is_interactive() {
            self.overlay.card()
        } else {
            None
        }
    }

    /// Detaches the overlay, tears down the canvas and drops the filter state.
    pub fn unmount(&mut self) {
        if let Some(viewport) = self.canvas.viewport() {
            self.overlay.detach(viewport);
        }
        self.overlay = InfoOverlay::new();
        self.canvas.unmount();
        self.filters = FilterState::default();
    }

    fn sync(&mut self) {
        self.canvas.sync(canvas_inputs(&self.filters));
        self.sync_overlay();
    }

    fn sync_overlay(&mut self) {
        if !self.variant.is_interactive() {
            return;
        }
        let selected = self.filters.selected_deal().cloned();
        self.overlay.sync(self.canvas.viewport(), selected.as_ref());
    }
}

impl<E: MapEngine> FilterControls for MapPage<E> {
    fn filters(&self) -> &FilterState {
        &self.filters
    }

    fn apply(&mut self, action: FilterAction) {
        if !self.variant.is_interactive() {
            debug!(?action, "preview map ignores filter changes");
            return;
        }
        self.filters.apply(action);
        self.sync();
    }
}

fn canvas_inputs(filters: &FilterState) -> CanvasInputs {
    CanvasInputs {
        deals: filters.visible_deals(),
        show_heatmap: filters.show_heatmap,
        time: filters.active_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::data::DEALS;
    use crate::heatmap;
    use crate::panel::ToggleKey;
    use crate::render::RasterEngine;
    use crate::types::{Category, CategoryFilter, LngLat, ScreenPoint, TimeOfDay};

    fn page(variant: PageVariant) -> MapPage<RasterEngine> {
        let config = AppConfig::default();
        let mut options = config.engine_options(variant.zoom(&config.map), "");
        options.width = 400;
        options.height = 300;
        MapPage::new(variant, options)
    }

    fn ready_page(variant: PageVariant) -> MapPage<RasterEngine> {
        let mut page = page(variant);
        assert!(page.mount(RasterEngine::new));
        page.canvas_mut().engine_mut().unwrap().finish_style_load();
        assert_eq!(page.pump(), 1);
        page
    }

    fn click_deal(page: &mut MapPage<RasterEngine>, id: u32) {
        let engine = page.canvas_mut().engine_mut().unwrap();
        let marker = engine.marker_for_deal(id).unwrap();
        engine.click_marker(marker);
        page.pump();
    }

    #[test]
    fn filters_before_ready_are_applied_on_load() {
        let mut page = page(PageVariant::Full);
        page.mount(RasterEngine::new);
        page.apply(FilterAction::SetCategory(CategoryFilter::Only(Category::Cafe)));
        page.apply(FilterAction::SetTime(TimeOfDay::Evening));
        assert!(page.canvas().engine().unwrap().calls().is_empty());

        page.canvas_mut().engine_mut().unwrap().finish_style_load();
        page.pump();
        let engine = page.canvas().engine().unwrap();
        let names: Vec<_> = engine.markers().map(|m| m.deal_id).collect();
        assert_eq!(names, vec![2, 5]);
        assert_eq!(engine.source_feature_count(heatmap::SOURCE_ID), Some(2));
        assert_eq!(
            engine.paint_property(heatmap::LAYER_ID, heatmap::INTENSITY),
            Some(heatmap::intensity_expression(TimeOfDay::Evening))
        );
    }

    #[test]
    fn marker_click_selects_and_places_the_card() {
        let mut page = ready_page(PageVariant::Full);
        click_deal(&mut page, 6);
        assert_eq!(page.filters().selected_deal().map(|d| d.id), Some(6));

        let card = page.overlay_card().unwrap();
        assert_eq!(card.deal.name, "PrintAll Express");
        let engine = page.canvas_mut().engine_mut().unwrap();
        engine.jump_to(LngLat { lng: 77.60, lat: 12.95 }, 14.0);
        page.pump();
        assert_ne!(page.overlay_card().unwrap().position, card.position);
        assert!(page.desktop_panel().deals.iter().any(|r| r.id == 6 && r.selected));
    }

    #[test]
    fn map_click_clears_selection_and_listener() {
        let mut page = ready_page(PageVariant::Full);
        click_deal(&mut page, 1);
        assert_eq!(page.canvas().engine().unwrap().move_listener_count(), 1);

        page.canvas_mut().engine_mut().unwrap().click_at(ScreenPoint { x: 1.0, y: 1.0 });
        page.pump();
        assert!(page.filters().selected_deal().is_none());
        assert!(page.overlay_card().is_none());
        assert_eq!(page.canvas().engine().unwrap().move_listener_count(), 0);
    }

    #[test]
    fn discounts_toggle_clears_markers() {
        let mut page = ready_page(PageVariant::Full);
        assert_eq!(page.canvas().marker_count(), DEALS.len());
        assert!(page.handle_input(&DesktopPanel, PanelInput::Toggle(ToggleKey::Discounts)));
        assert_eq!(page.canvas().marker_count(), 0);
        assert_eq!(page.canvas().engine().unwrap().source_feature_count(heatmap::SOURCE_ID), Some(0));
        assert!(!page.handle_input(&MobileSheet, PanelInput::Toggle(ToggleKey::Discounts)));
        assert_eq!(page.canvas().marker_count(), 0);
    }

    #[test]
    fn preview_is_read_only() {
        let mut page = ready_page(PageVariant::Preview);
        assert!(!page.variant().is_interactive());
        assert_eq!(page.canvas().engine().unwrap().camera().zoom, 12.0);
        page.apply(FilterAction::SetCategory(CategoryFilter::Only(Category::Print)));
        assert_eq!(page.canvas().marker_count(), DEALS.len());
        click_deal(&mut page, 3);
        assert!(page.filters().selected_deal().is_none());
        assert!(page.overlay_card().is_none());
    }

    #[test]
    fn unmount_then_remount() {
        let mut page = ready_page(PageVariant::Full);
        click_deal(&mut page, 2);
        let log = page.canvas().engine().unwrap().call_log();
        page.unmount();
        assert_eq!(page.canvas().marker_count(), 0);
        assert!(page.filters().selected_deal().is_none());
        let live_markers = log.borrow().iter().fold(0i64, |n, call| match call {
            crate::render::EngineCall::AddMarker { .. } => n + 1,
            crate::render::EngineCall::RemoveMarker { existed: true, .. } => n - 1,
            _ => n,
        });
        assert_eq!(live_markers, 0);

        let mut created = 0;
        page.mount(|o| {
            created += 1;
            RasterEngine::new(o)
        });
        page.mount(RasterEngine::new);
        assert_eq!(created, 1);
    }
}
