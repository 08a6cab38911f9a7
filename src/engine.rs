//! The seam between the page and whatever draws the map.
//!
//! A backend implements [`MapEngine`]. The map canvas is the only owner of an
//! engine; everything else sees at most the [`Viewport`] half of it.

use crate::types::{LngLat, ScreenPoint};
use geojson::FeatureCollection;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarkerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("style has not finished loading")]
    NotReady,
    #[error("unknown source: {0}")]
    UnknownSource(String),
    #[error("unknown layer: {0}")]
    UnknownLayer(String),
    #[error("source already exists: {0}")]
    DuplicateSource(String),
    #[error("layer already exists: {0}")]
    DuplicateLayer(String),
}

/// Events a backend surfaces to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StyleLoaded,
    Move { listener: ListenerId },
    /// Marker clicks stop propagation, so they never also arrive as `MapClicked`.
    MarkerClicked { marker: MarkerId },
    MapClicked { point: ScreenPoint },
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineOptions {
    pub style_url: String,
    pub center: LngLat,
    pub zoom: f64,
    #[serde(skip)]
    pub access_token: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    None,
}

impl From<bool> for Visibility {
    fn from(visible: bool) -> Self {
        if visible {
            Visibility::Visible
        } else {
            Visibility::None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub id: String,
    pub source: String,
    pub kind: LayerKind,
    pub paint: serde_json::Map<String, Value>,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Heatmap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Top,
}

/// A host-rendered pin: discount badge plus a truncated name.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSpec {
    pub deal_id: u32,
    pub position: LngLat,
    pub anchor: Anchor,
    pub badge: String,
    pub label: String,
    pub color: String,
}

/// The part of an engine that overlays may touch: projection and move events.
pub trait Viewport {
    fn project(&self, position: LngLat) -> ScreenPoint;
    fn on_move(&mut self) -> ListenerId;
    /// Returns false when the listener was not registered.
    fn off_move(&mut self, listener: ListenerId) -> bool;
}

pub trait MapEngine: Viewport {
    fn is_style_loaded(&self) -> bool;
    fn add_source(&mut self, id: &str, data: FeatureCollection) -> Result<(), EngineError>;
    fn set_source_data(&mut self, id: &str, data: FeatureCollection) -> Result<(), EngineError>;
    fn add_layer(&mut self, layer: LayerSpec) -> Result<(), EngineError>;
    fn set_layout_property(&mut self, layer: &str, name: &str, value: Value) -> Result<(), EngineError>;
    fn set_paint_property(&mut self, layer: &str, name: &str, value: Value) -> Result<(), EngineError>;
    fn add_marker(&mut self, marker: MarkerSpec) -> MarkerId;
    /// Removing a marker that is already gone is a no-op returning false.
    fn remove_marker(&mut self, marker: MarkerId) -> bool;
    fn take_events(&mut self) -> Vec<EngineEvent>;
    fn destroy(self)
    where
        Self: Sized;
}
