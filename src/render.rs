use crate::engine::{
    EngineError, EngineEvent, EngineOptions, LayerKind, LayerSpec, ListenerId, MapEngine, MarkerId, MarkerSpec,
    Viewport, Visibility,
};
use crate::heatmap::{self, EvalContext};
use crate::types::{LngLat, ScreenPoint};
use anyhow::{Context, Result};
use geojson::{FeatureCollection, Value as GeoValue};
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use serde_json::Value;
use std::cell::{Ref, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::f64::consts::PI;
use std::path::Path;
use std::rc::Rc;
use tracing::{info, warn};

// Mapbox-style world tiles are 512px wide.
const TILE_SIZE: f64 = 512.0;
const BACKGROUND: Rgba<u8> = Rgba([236, 236, 232, 255]);
const MARKER_WIDTH: i64 = 44;
const MARKER_HEIGHT: i64 = 18;

/// Every mutating call the engine applied, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    AddSource { id: String, features: usize },
    SetSourceData { id: String, features: usize },
    AddLayer { id: String },
    SetLayout { layer: String, name: String, value: Value },
    SetPaint { layer: String, name: String, value: Value },
    AddMarker { marker: MarkerId, deal_id: u32 },
    RemoveMarker { marker: MarkerId, existed: bool },
    Destroy,
}

pub type CallLog = Rc<RefCell<Vec<EngineCall>>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub center: LngLat,
    pub zoom: f64,
}

#[derive(Debug)]
struct Layer {
    spec: LayerSpec,
}

/// Headless engine: web-mercator camera, in-memory style, PNG snapshots.
pub struct RasterEngine {
    camera: Camera,
    width: u32,
    height: u32,
    has_basemap: bool,
    style_loaded: bool,
    sources: HashMap<String, FeatureCollection>,
    layers: Vec<Layer>,
    markers: BTreeMap<MarkerId, MarkerSpec>,
    listeners: BTreeSet<ListenerId>,
    next_id: u64,
    events: Vec<EngineEvent>,
    log: CallLog,
}

impl RasterEngine {
    pub fn new(options: &EngineOptions) -> Self {
        let has_basemap = !options.access_token.trim().is_empty();
        if !has_basemap {
            warn!("no map access token configured, basemap tiles will not load");
        }
        Self {
            camera: Camera { center: options.center, zoom: options.zoom },
            width: options.width,
            height: options.height,
            has_basemap,
            style_loaded: false,
            sources: HashMap::new(),
            layers: Vec::new(),
            markers: BTreeMap::new(),
            listeners: BTreeSet::new(),
            next_id: 1,
            events: Vec::new(),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn camera(&self) -> Camera {
        self.camera
    }

    pub fn has_basemap(&self) -> bool {
        self.has_basemap
    }

    pub fn calls(&self) -> Ref<'_, Vec<EngineCall>> {
        self.log.borrow()
    }

    /// Shared handle on the call log that outlives the engine.
    pub fn call_log(&self) -> CallLog {
        Rc::clone(&self.log)
    }

    /// Completes the asynchronous style load.
    pub fn finish_style_load(&mut self) {
        if !self.style_loaded {
            self.style_loaded = true;
            self.events.push(EngineEvent::StyleLoaded);
        }
    }

    pub fn jump_to(&mut self, center: LngLat, zoom: f64) {
        self.camera = Camera { center, zoom };
        self.events.extend(self.listeners.iter().map(|&listener| EngineEvent::Move { listener }));
    }

    /// Clicks a marker. Marker clicks stop propagation: no map click follows.
    pub fn click_marker(&mut self, marker: MarkerId) -> bool {
        if self.markers.contains_key(&marker) {
            self.events.push(EngineEvent::MarkerClicked { marker });
            true
        } else {
            false
        }
    }

    /// Clicks the map at a pixel, hitting a marker first if one is there.
    pub fn click_at(&mut self, point: ScreenPoint) {
        let hit = self
            .markers
            .iter()
            .rev()
            .find(|(_, spec)| self.marker_rect(spec).contains(point.x, point.y))
            .map(|(id, _)| *id);
        match hit {
            Some(marker) => self.events.push(EngineEvent::MarkerClicked { marker }),
            None => self.events.push(EngineEvent::MapClicked { point }),
        }
    }

    pub fn marker_for_deal(&self, deal_id: u32) -> Option<MarkerId> {
        self.markers.iter().find(|(_, spec)| spec.deal_id == deal_id).map(|(id, _)| *id)
    }

    pub fn markers(&self) -> impl Iterator<Item = &MarkerSpec> {
        self.markers.values()
    }

    pub fn move_listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn source_feature_count(&self, id: &str) -> Option<usize> {
        self.sources.get(id).map(|fc| fc.features.len())
    }

    pub fn layer_visible(&self, id: &str) -> Option<bool> {
        self.layer(id).map(|l| l.spec.visibility == Visibility::Visible)
    }

    pub fn paint_property(&self, layer: &str, name: &str) -> Option<Value> {
        self.layer(layer).and_then(|l| l.spec.paint.get(name).cloned())
    }

    fn layer(&self, id: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.spec.id == id)
    }

    fn layer_mut(&mut self, id: &str) -> Result<&mut Layer, EngineError> {
        if !self.style_loaded {
            return Err(EngineError::NotReady);
        }
        self.layers
            .iter_mut()
            .find(|l| l.spec.id == id)
            .ok_or_else(|| EngineError::UnknownLayer(id.to_string()))
    }

    fn record(&self, call: EngineCall) {
        self.log.borrow_mut().push(call);
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn marker_rect(&self, spec: &MarkerSpec) -> PixelRect {
        let anchor = self.project(spec.position);
        PixelRect {
            x0: anchor.x.round() as i64 - MARKER_WIDTH / 2,
            y0: anchor.y.round() as i64,
            x1: anchor.x.round() as i64 + MARKER_WIDTH / 2,
            y1: anchor.y.round() as i64 + MARKER_HEIGHT,
        }
    }

    /// Rasterizes basemap placeholder, visible heatmap layers and markers.
    pub fn snapshot(&self) -> RgbaImage {
        let mut img: RgbaImage = ImageBuffer::from_pixel(self.width, self.height, BACKGROUND);
        if self.width == 0 || self.height == 0 {
            warn!(width = self.width, height = self.height, "empty viewport, nothing to draw");
            return img;
        }
        if self.style_loaded {
            for layer in self.layers.iter().filter(|l| l.spec.visibility == Visibility::Visible) {
                match layer.spec.kind {
                    LayerKind::Heatmap => {
                        if let Some(source) = self.sources.get(&layer.spec.source) {
                            self.draw_heatmap(&mut img, &layer.spec, source);
                        }
                    }
                }
            }
        }
        for spec in self.markers.values() {
            self.draw_marker(&mut img, spec);
        }
        img
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
        }
        self.snapshot()
            .save(path)
            .with_context(|| format!("Failed to save snapshot: {:?}", path))?;
        info!(path = ?path, "snapshot written");
        Ok(())
    }

    fn draw_heatmap(&self, img: &mut RgbaImage, spec: &LayerSpec, source: &FeatureCollection) {
        let zoom_ctx = EvalContext { zoom: self.camera.zoom, ..Default::default() };
        let radius = paint_number(spec, heatmap::RADIUS, &zoom_ctx, 30.0).max(1.0);
        let intensity = paint_number(spec, heatmap::INTENSITY, &zoom_ctx, 1.0);
        let opacity = paint_number(spec, heatmap::OPACITY, &zoom_ctx, 1.0).clamp(0.0, 1.0);

        // (pixel x, pixel y, weight * intensity) per point feature
        let points: Vec<(f64, f64, f64)> = source
            .features
            .iter()
            .filter_map(|feature| {
                let position = match &feature.geometry.as_ref()?.value {
                    GeoValue::Point(coords) if coords.len() >= 2 => LngLat { lng: coords[0], lat: coords[1] },
                    _ => return None,
                };
                let ctx = EvalContext { properties: feature.properties.as_ref(), ..zoom_ctx };
                let weight = paint_number(spec, heatmap::WEIGHT, &ctx, 1.0);
                let p = self.project(position);
                Some((p.x, p.y, weight * intensity))
            })
            .collect();

        let color_expr = spec.paint.get(heatmap::COLOR);
        let row_len = self.width as usize * 4;
        img.par_chunks_mut(row_len).enumerate().for_each(|(y, row)| {
            for (x, pixel) in row.chunks_mut(4).enumerate() {
                let density = kernel_density(&points, x as f64, y as f64, radius);
                if density <= 0.0 {
                    continue;
                }
                let ctx = EvalContext { density: density.min(1.0), ..zoom_ctx };
                let color = color_expr.and_then(|e| heatmap::evaluate(e, &ctx)).and_then(heatmap::Output::as_color);
                let Some(color) = color else {
                    continue;
                };
                blend(pixel, color, color[3] * opacity);
            }
        });
    }

    fn draw_marker(&self, img: &mut RgbaImage, spec: &MarkerSpec) {
        let rect = self.marker_rect(spec);
        let fill = hex_to_rgba(&spec.color);
        let (w, h) = (i64::from(self.width), i64::from(self.height));
        for y in rect.y0.max(0)..rect.y1.min(h) {
            for x in rect.x0.max(0)..rect.x1.min(w) {
                let edge = y == rect.y0 || y == rect.y1 - 1 || x == rect.x0 || x == rect.x1 - 1;
                let color = if edge { Rgba([40, 40, 40, 255]) } else { fill };
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

impl Viewport for RasterEngine {
    fn project(&self, position: LngLat) -> ScreenPoint {
        let (px, py) = world_pixel(position, self.camera.zoom);
        let (cx, cy) = world_pixel(self.camera.center, self.camera.zoom);
        ScreenPoint {
            x: px - cx + f64::from(self.width) / 2.0,
            y: py - cy + f64::from(self.height) / 2.0,
        }
    }

    fn on_move(&mut self) -> ListenerId {
        let id = ListenerId(self.next());
        self.listeners.insert(id);
        id
    }

    fn off_move(&mut self, listener: ListenerId) -> bool {
        self.listeners.remove(&listener)
    }
}

impl MapEngine for RasterEngine {
    fn is_style_loaded(&self) -> bool {
        self.style_loaded
    }

    fn add_source(&mut self, id: &str, data: FeatureCollection) -> Result<(), EngineError> {
        if !self.style_loaded {
            return Err(EngineError::NotReady);
        }
        if self.sources.contains_key(id) {
            return Err(EngineError::DuplicateSource(id.to_string()));
        }
        self.record(EngineCall::AddSource { id: id.to_string(), features: data.features.len() });
        self.sources.insert(id.to_string(), data);
        Ok(())
    }

    fn set_source_data(&mut self, id: &str, data: FeatureCollection) -> Result<(), EngineError> {
        if !self.style_loaded {
            return Err(EngineError::NotReady);
        }
        let source = self
            .sources
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownSource(id.to_string()))?;
        let features = data.features.len();
        *source = data;
        self.record(EngineCall::SetSourceData { id: id.to_string(), features });
        Ok(())
    }

    fn add_layer(&mut self, layer: LayerSpec) -> Result<(), EngineError> {
        if !self.style_loaded {
            return Err(EngineError::NotReady);
        }
        if self.layer(&layer.id).is_some() {
            return Err(EngineError::DuplicateLayer(layer.id));
        }
        if !self.sources.contains_key(&layer.source) {
            return Err(EngineError::UnknownSource(layer.source));
        }
        self.record(EngineCall::AddLayer { id: layer.id.clone() });
        self.layers.push(Layer { spec: layer });
        Ok(())
    }

    fn set_layout_property(&mut self, layer: &str, name: &str, value: Value) -> Result<(), EngineError> {
        let target = self.layer_mut(layer)?;
        if name == "visibility" {
            target.spec.visibility = match value.as_str() {
                Some("none") => Visibility::None,
                _ => Visibility::Visible,
            };
        }
        self.record(EngineCall::SetLayout { layer: layer.to_string(), name: name.to_string(), value });
        Ok(())
    }

    fn set_paint_property(&mut self, layer: &str, name: &str, value: Value) -> Result<(), EngineError> {
        let target = self.layer_mut(layer)?;
        target.spec.paint.insert(name.to_string(), value.clone());
        self.record(EngineCall::SetPaint { layer: layer.to_string(), name: name.to_string(), value });
        Ok(())
    }

    fn add_marker(&mut self, marker: MarkerSpec) -> MarkerId {
        let id = MarkerId(self.next());
        self.record(EngineCall::AddMarker { marker: id, deal_id: marker.deal_id });
        self.markers.insert(id, marker);
        id
    }

    fn remove_marker(&mut self, marker: MarkerId) -> bool {
        let existed = self.markers.remove(&marker).is_some();
        self.record(EngineCall::RemoveMarker { marker, existed });
        existed
    }

    fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    fn destroy(self) {
        if !self.markers.is_empty() {
            warn!(markers = self.markers.len(), "engine destroyed with markers still attached");
        }
        self.record(EngineCall::Destroy);
    }
}

struct PixelRect {
    x0: i64,
    y0: i64,
    x1: i64,
    y1: i64,
}

impl PixelRect {
    fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x0 as f64 && x < self.x1 as f64 && y >= self.y0 as f64 && y < self.y1 as f64
    }
}

fn paint_number(spec: &LayerSpec, name: &str, ctx: &EvalContext, fallback: f64) -> f64 {
    spec.paint
        .get(name)
        .and_then(|expr| heatmap::evaluate(expr, ctx))
        .and_then(heatmap::Output::as_number)
        .unwrap_or(fallback)
}

// Web mercator world pixel coordinates at a fractional zoom.
fn world_pixel(position: LngLat, zoom: f64) -> (f64, f64) {
    let scale = TILE_SIZE * 2.0_f64.powf(zoom);
    let x = (position.lng + 180.0) / 360.0 * scale;
    let lat_rad = position.lat.to_radians();
    let y = (1.0 - (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() / PI) / 2.0 * scale;
    (x, y)
}

// Gaussian kernel, effectively zero beyond the radius.
fn kernel_density(points: &[(f64, f64, f64)], x: f64, y: f64, radius: f64) -> f64 {
    let sigma = radius / 3.0;
    points
        .iter()
        .filter_map(|&(px, py, w)| {
            let d2 = (px - x).powi(2) + (py - y).powi(2);
            (d2 <= radius * radius).then(|| w * (-d2 / (2.0 * sigma * sigma)).exp())
        })
        .sum()
}

fn blend(pixel: &mut [u8], color: [f64; 4], alpha: f64) {
    let alpha = alpha.clamp(0.0, 1.0);
    for i in 0..3 {
        let base = f64::from(pixel[i]);
        pixel[i] = (base + (color[i] - base) * alpha).round().clamp(0.0, 255.0) as u8;
    }
}

fn hex_to_rgba(hex: &str) -> Rgba<u8> {
    let hex = hex.trim_start_matches('#');
    let channel = |range: std::ops::Range<usize>| {
        hex.get(range).and_then(|h| u8::from_str_radix(h, 16).ok()).unwrap_or(0)
    };
    Rgba([channel(0..2), channel(2..4), channel(4..6), 255])
}
