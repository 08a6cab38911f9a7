//! Map canvas: owns the one engine instance and reconciles filter state into it.
//!
//! Lifecycle is `Uninitialized -> Initializing -> Ready -> Disposed`. Nothing
//! touches layers, sources or paint before the style has loaded; after that,
//! each visual layer is reconciled on its own and only when its input changed.

use crate::data;
use crate::engine::{Anchor, EngineError, EngineEvent, EngineOptions, MapEngine, MarkerId, MarkerSpec, Viewport};
use crate::heatmap;
use crate::types::{Deal, TimeOfDay};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const LABEL_CHARS: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanvasState {
    Uninitialized,
    Initializing,
    Ready,
    Disposed,
}

/// Everything the canvas draws, derived from filter state by the page.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasInputs {
    pub deals: Vec<Deal>,
    pub show_heatmap: bool,
    pub time: TimeOfDay,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CanvasEvent {
    Ready,
    DealClicked(Deal),
}

/// What the engine currently shows, per visual layer.
#[derive(Debug, Default)]
struct Applied {
    marker_ids: Option<Vec<u32>>,
    source_ids: Option<Vec<u32>>,
    heatmap_visible: Option<bool>,
    time: Option<TimeOfDay>,
}

pub struct MapCanvas<E: MapEngine> {
    engine: Option<E>,
    state: CanvasState,
    desired: CanvasInputs,
    applied: Applied,
    markers: BTreeMap<MarkerId, Deal>,
}

impl<E: MapEngine> MapCanvas<E> {
    pub fn new(initial: CanvasInputs) -> Self {
        Self {
            engine: None,
            state: CanvasState::Uninitialized,
            desired: initial,
            applied: Applied::default(),
            markers: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> CanvasState {
        self.state
    }

    pub fn engine(&self) -> Option<&E> {
        self.engine.as_ref()
    }

    /// Host-side access for the backend's own work (camera, clicks, loading).
    pub fn engine_mut(&mut self) -> Option<&mut E> {
        self.engine.as_mut()
    }

    /// The projection surface lent to overlays.
    pub fn viewport(&mut self) -> Option<&mut dyn Viewport> {
        self.engine.as_mut().map(|e| e as &mut dyn Viewport)
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Creates the engine unless one already exists.
    pub fn mount<F>(&mut self, options: &EngineOptions, create: F) -> bool
    where
        F: FnOnce(&EngineOptions) -> E,
    {
        if self.engine.is_some() {
            debug!("map canvas already mounted, keeping existing engine");
            return false;
        }
        info!(zoom = options.zoom, style = %options.style_url, "creating map engine");
        self.engine = Some(create(options));
        self.state = CanvasState::Initializing;
        self.applied = Applied::default();
        true
    }

    /// Records the desired inputs and reconciles them if the engine is ready.
    pub fn sync(&mut self, inputs: CanvasInputs) {
        self.desired = inputs;
        if self.state == CanvasState::Ready {
            self.reconcile();
        } else {
            debug!(state = ?self.state, "canvas not ready, deferring sync");
        }
    }

    pub fn handle_event(&mut self, event: &EngineEvent) -> Option<CanvasEvent> {
        match event {
            EngineEvent::StyleLoaded if self.state == CanvasState::Initializing => self.on_style_loaded(),
            EngineEvent::MarkerClicked { marker } => {
                let deal = self.markers.get(marker).cloned();
                if deal.is_none() {
                    debug!(?marker, "click on unknown marker");
                }
                deal.map(CanvasEvent::DealClicked)
            }
            _ => None,
        }
    }

    fn on_style_loaded(&mut self) -> Option<CanvasEvent> {
        let engine = self.engine.as_mut()?;
        if !engine.is_style_loaded() {
            return None;
        }

        let collection = data::to_geojson(&self.desired.deals);
        if accept(engine.add_source(heatmap::SOURCE_ID, collection), "add source") {
            self.applied.source_ids = Some(deal_ids(&self.desired.deals));
        }
        let layer = heatmap::layer_spec(self.desired.time, self.desired.show_heatmap);
        if accept(engine.add_layer(layer), "add heatmap layer") {
            self.applied.heatmap_visible = Some(self.desired.show_heatmap);
            self.applied.time = Some(self.desired.time);
        }

        self.state = CanvasState::Ready;
        info!(deals = self.desired.deals.len(), "map style loaded");
        replace_markers(engine, &mut self.markers, &self.desired.deals);
        self.applied.marker_ids = Some(deal_ids(&self.desired.deals));
        Some(CanvasEvent::Ready)
    }

    fn reconcile(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if !engine.is_style_loaded() {
            debug!("engine style not loaded, skipping reconcile");
            return;
        }

        let ids = deal_ids(&self.desired.deals);
        if self.applied.marker_ids.as_ref() != Some(&ids) {
            debug!(deals = ids.len(), "deal list changed, recreating markers");
            replace_markers(engine, &mut self.markers, &self.desired.deals);
            self.applied.marker_ids = Some(ids.clone());
        }
        if self.applied.source_ids.as_ref() != Some(&ids) {
            let collection = data::to_geojson(&self.desired.deals);
            if accept(engine.set_source_data(heatmap::SOURCE_ID, collection), "patch source data") {
                self.applied.source_ids = Some(ids);
            }
        }

        let visible = self.desired.show_heatmap;
        if self.applied.heatmap_visible != Some(visible) {
            let value = heatmap::visibility_value(visible);
            let result = engine.set_layout_property(heatmap::LAYER_ID, "visibility", value);
            if accept(result, "set heatmap visibility") {
                self.applied.heatmap_visible = Some(visible);
            }
        }

        let time = self.desired.time;
        if self.applied.time != Some(time) {
            let value = heatmap::intensity_expression(time);
            let result = engine.set_paint_property(heatmap::LAYER_ID, heatmap::INTENSITY, value);
            if accept(result, "set heatmap intensity") {
                self.applied.time = Some(time);
            }
        }
    }

    /// Removes markers, then destroys the engine and drops the handle.
    pub fn unmount(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            for (marker, _) in std::mem::take(&mut self.markers) {
                engine.remove_marker(marker);
            }
        }
        if let Some(engine) = self.engine.take() {
            engine.destroy();
            info!("map engine destroyed");
        }
        self.applied = Applied::default();
        self.state = CanvasState::Disposed;
    }
}

fn deal_ids(deals: &[Deal]) -> Vec<u32> {
    deals.iter().map(|d| d.id).collect()
}

/// Not-ready errors are expected while the style loads and get retried on the next sync.
fn accept(result: Result<(), EngineError>, what: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(EngineError::NotReady) => {
            debug!(what, "engine not ready, skipped");
            false
        }
        Err(e) => {
            warn!(what, error = %e, "engine rejected update");
            false
        }
    }
}

fn replace_markers<E: MapEngine>(engine: &mut E, markers: &mut BTreeMap<MarkerId, Deal>, deals: &[Deal]) {
    for (marker, _) in std::mem::take(markers) {
        engine.remove_marker(marker);
    }
    for deal in deals {
        let id = engine.add_marker(marker_spec(deal));
        markers.insert(id, deal.clone());
    }
}

pub fn marker_spec(deal: &Deal) -> MarkerSpec {
    MarkerSpec {
        deal_id: deal.id,
        position: deal.lng_lat(),
        anchor: Anchor::Top,
        badge: format!("{}% OFF", deal.discount),
        label: truncate(deal.name, LABEL_CHARS),
        color: deal.bg_color.to_string(),
    }
}

fn truncate(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        name.to_string()
    } else {
        let mut short: String = name.chars().take(max - 1).collect();
        short.push('…');
        short
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{EngineCall, RasterEngine};
    use crate::types::LngLat;
    use serde_json::{json, Value};

    fn options() -> EngineOptions {
        EngineOptions {
            style_url: "mapbox://styles/mapbox/satellite-streets-v12".into(),
            center: LngLat { lng: 77.6245, lat: 12.9352 },
            zoom: 13.0,
            access_token: String::new(),
            width: 320,
            height: 240,
        }
    }

    fn inputs(deals: Vec<Deal>) -> CanvasInputs {
        CanvasInputs { deals, show_heatmap: true, time: TimeOfDay::Afternoon }
    }

    fn ready_canvas(deals: Vec<Deal>) -> MapCanvas<RasterEngine> {
        let mut canvas = MapCanvas::new(inputs(deals));
        canvas.mount(&options(), RasterEngine::new);
        canvas.engine_mut().unwrap().finish_style_load();
        let events = canvas.engine_mut().unwrap().take_events();
        assert_eq!(events, vec![EngineEvent::StyleLoaded]);
        assert_eq!(canvas.handle_event(&events[0]), Some(CanvasEvent::Ready));
        canvas
    }

    fn calls_since(canvas: &MapCanvas<RasterEngine>, from: usize) -> Vec<EngineCall> {
        canvas.engine().unwrap().calls()[from..].to_vec()
    }

    /// Raster engine whose source patches are rejected while `reject_patches` is set.
    struct RejectingEngine {
        inner: RasterEngine,
        reject_patches: bool,
    }

    impl Viewport for RejectingEngine {
        fn project(&self, position: LngLat) -> crate::types::ScreenPoint {
            self.inner.project(position)
        }

        fn on_move(&mut self) -> crate::engine::ListenerId {
            self.inner.on_move()
        }

        fn off_move(&mut self, listener: crate::engine::ListenerId) -> bool {
            self.inner.off_move(listener)
        }
    }

    impl MapEngine for RejectingEngine {
        fn is_style_loaded(&self) -> bool {
            self.inner.is_style_loaded()
        }

        fn add_source(&mut self, id: &str, data: geojson::FeatureCollection) -> Result<(), EngineError> {
            self.inner.add_source(id, data)
        }

        fn set_source_data(&mut self, id: &str, data: geojson::FeatureCollection) -> Result<(), EngineError> {
            if self.reject_patches {
                return Err(EngineError::UnknownSource(id.to_string()));
            }
            self.inner.set_source_data(id, data)
        }

        fn add_layer(&mut self, layer: crate::engine::LayerSpec) -> Result<(), EngineError> {
            self.inner.add_layer(layer)
        }

        fn set_layout_property(&mut self, layer: &str, name: &str, value: Value) -> Result<(), EngineError> {
            self.inner.set_layout_property(layer, name, value)
        }

        fn set_paint_property(&mut self, layer: &str, name: &str, value: Value) -> Result<(), EngineError> {
            self.inner.set_paint_property(layer, name, value)
        }

        fn add_marker(&mut self, marker: MarkerSpec) -> MarkerId {
            self.inner.add_marker(marker)
        }

        fn remove_marker(&mut self, marker: MarkerId) -> bool {
            self.inner.remove_marker(marker)
        }

        fn take_events(&mut self) -> Vec<EngineEvent> {
            self.inner.take_events()
        }

        fn destroy(self) {
            self.inner.destroy();
        }
    }

    #[test]
    fn mounting_twice_keeps_one_engine() {
        let mut created = 0;
        let mut canvas = MapCanvas::new(inputs(vec![]));
        for _ in 0..3 {
            canvas.mount(&options(), |o| {
                created += 1;
                RasterEngine::new(o)
            });
        }
        assert_eq!(created, 1);
        assert_eq!(canvas.state(), CanvasState::Initializing);
    }

    #[test]
    fn nothing_touches_the_engine_before_style_load() {
        let mut canvas = MapCanvas::new(inputs(data::DEALS.to_vec()));
        canvas.mount(&options(), RasterEngine::new);
        let first_two = inputs(data::DEALS[..2].to_vec());
        canvas.sync(CanvasInputs { show_heatmap: false, time: TimeOfDay::Evening, ..first_two });
        assert!(canvas.engine().unwrap().calls().is_empty());

        canvas.engine_mut().unwrap().finish_style_load();
        for event in canvas.engine_mut().unwrap().take_events() {
            canvas.handle_event(&event);
        }
        let engine = canvas.engine().unwrap();
        assert_eq!(canvas.marker_count(), 2);
        assert_eq!(engine.source_feature_count(heatmap::SOURCE_ID), Some(2));
        assert_eq!(engine.layer_visible(heatmap::LAYER_ID), Some(false));
        assert_eq!(
            engine.paint_property(heatmap::LAYER_ID, heatmap::INTENSITY),
            Some(heatmap::intensity_expression(TimeOfDay::Evening))
        );
    }

    #[test]
    fn deal_list_change_patches_source_and_recreates_markers() {
        let mut canvas = ready_canvas(data::DEALS.to_vec());
        let before = canvas.engine().unwrap().calls().len();
        let cafes: Vec<Deal> = data::DEALS.iter().filter(|d| d.id == 2 || d.id == 5).cloned().collect();
        canvas.sync(inputs(cafes));

        let calls = calls_since(&canvas, before);
        let removed = calls.iter().filter(|c| matches!(c, EngineCall::RemoveMarker { .. })).count();
        let added = calls.iter().filter(|c| matches!(c, EngineCall::AddMarker { .. })).count();
        assert_eq!((removed, added), (12, 2));
        assert!(calls.contains(&EngineCall::SetSourceData { id: heatmap::SOURCE_ID.into(), features: 2 }));
        assert!(!calls.iter().any(|c| matches!(c, EngineCall::AddSource { .. } | EngineCall::AddLayer { .. })));
        assert_eq!(canvas.marker_count(), 2);
    }

    #[test]
    fn rejected_source_patch_does_not_recreate_markers_again() {
        let mut canvas = MapCanvas::new(inputs(data::DEALS.to_vec()));
        canvas.mount(&options(), |o| RejectingEngine { inner: RasterEngine::new(o), reject_patches: true });
        let engine = canvas.engine_mut().unwrap();
        engine.inner.finish_style_load();
        for event in engine.take_events() {
            canvas.handle_event(&event);
        }
        let log = canvas.engine().unwrap().inner.call_log();

        canvas.sync(inputs(data::DEALS[..2].to_vec()));
        assert_eq!(canvas.marker_count(), 2);
        let before = log.borrow().len();

        canvas.sync(CanvasInputs { show_heatmap: false, ..inputs(data::DEALS[..2].to_vec()) });
        let calls = log.borrow()[before..].to_vec();
        assert!(!calls
            .iter()
            .any(|c| matches!(c, EngineCall::AddMarker { .. } | EngineCall::RemoveMarker { .. })));
        assert_eq!(calls.len(), 1);

        // the source is retried once the engine accepts patches again
        canvas.engine_mut().unwrap().reject_patches = false;
        canvas.sync(CanvasInputs { show_heatmap: false, ..inputs(data::DEALS[..2].to_vec()) });
        assert_eq!(canvas.engine().unwrap().inner.source_feature_count(heatmap::SOURCE_ID), Some(2));
        assert_eq!(canvas.marker_count(), 2);
    }

    #[test]
    fn unchanged_inputs_make_no_calls() {
        let mut canvas = ready_canvas(data::DEALS.to_vec());
        let before = canvas.engine().unwrap().calls().len();
        canvas.sync(inputs(data::DEALS.to_vec()));
        assert!(calls_since(&canvas, before).is_empty());
    }

    #[test]
    fn heatmap_toggle_only_sets_visibility() {
        let mut canvas = ready_canvas(data::DEALS.to_vec());
        let before = canvas.engine().unwrap().calls().len();
        for visible in [false, true, false, true] {
            canvas.sync(CanvasInputs { show_heatmap: visible, ..inputs(data::DEALS.to_vec()) });
        }
        let calls = calls_since(&canvas, before);
        assert_eq!(calls.len(), 4);
        assert!(calls.iter().all(|c| matches!(c, EngineCall::SetLayout { name, .. } if name == "visibility")));
        assert_eq!(canvas.engine().unwrap().layer_visible(heatmap::LAYER_ID), Some(true));
    }

    #[test]
    fn time_change_only_sets_intensity() {
        let mut canvas = ready_canvas(data::DEALS.to_vec());
        let before = canvas.engine().unwrap().calls().len();
        for (time, factor) in [(TimeOfDay::Evening, 0.8), (TimeOfDay::Morning, 0.6), (TimeOfDay::Afternoon, 1.0)] {
            canvas.sync(CanvasInputs { time, ..inputs(data::DEALS.to_vec()) });
            let value = canvas.engine().unwrap().paint_property(heatmap::LAYER_ID, heatmap::INTENSITY).unwrap();
            assert_eq!(value[4], json!(factor));
        }
        let calls = calls_since(&canvas, before);
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| matches!(c, EngineCall::SetPaint { name, .. } if name == heatmap::INTENSITY)));
    }

    #[test]
    fn marker_click_reports_the_deal() {
        let mut canvas = ready_canvas(data::DEALS[..3].to_vec());
        let engine = canvas.engine_mut().unwrap();
        let marker = engine.marker_for_deal(3).unwrap();
        engine.click_marker(marker);
        let events = engine.take_events();
        assert_eq!(events, vec![EngineEvent::MarkerClicked { marker }]);
        let clicked = canvas.handle_event(&events[0]);
        assert_eq!(clicked, Some(CanvasEvent::DealClicked(data::DEALS[2].clone())));
    }

    #[test]
    fn unmount_removes_markers_before_destroying() {
        let mut canvas = ready_canvas(data::DEALS.to_vec());
        let log = canvas.engine().unwrap().call_log();
        canvas.unmount();
        assert_eq!(canvas.state(), CanvasState::Disposed);
        assert!(canvas.engine().is_none());
        assert_eq!(canvas.marker_count(), 0);

        let calls = log.borrow();
        let destroy = calls.iter().position(|c| *c == EngineCall::Destroy).unwrap();
        assert_eq!(destroy, calls.len() - 1);
        let removed = calls[..destroy]
            .iter()
            .filter(|c| matches!(c, EngineCall::RemoveMarker { existed: true, .. }))
            .count();
        assert_eq!(removed, 12);

        let mut created = 0;
        canvas.mount(&options(), |o| {
            created += 1;
            RasterEngine::new(o)
        });
        assert_eq!(created, 1);
        assert_eq!(canvas.state(), CanvasState::Initializing);
    }

    #[test]
    fn long_names_are_truncated() {
        assert_eq!(truncate("Dosa Corner", 14), "Dosa Corner");
        assert_eq!(truncate("HealthFirst Pharmacy", 14), "HealthFirst P…");
        assert_eq!(marker_spec(&data::DEALS[0]).badge, "30% OFF");
    }
}
