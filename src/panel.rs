//! Filter surfaces: a persistent desktop panel and a mobile bottom sheet.
//!
//! Both are views over the same [`FilterControls`] capability. They produce a
//! serializable view model and translate user input back into filter actions.

use crate::filter::{FilterAction, FilterState};
use crate::types::{Category, CategoryFilter, Deal, TimeOfDay};
use serde::Serialize;
use std::str::FromStr;

/// What a filter surface may do: read filters, change them, list and select deals.
pub trait FilterControls {
    fn filters(&self) -> &FilterState;
    fn apply(&mut self, action: FilterAction);

    fn deals(&self) -> Vec<Deal> {
        self.filters().filtered_deals()
    }

    fn select(&mut self, id: u32) {
        self.apply(FilterAction::Select(id));
    }
}

impl FilterControls for FilterState {
    fn filters(&self) -> &FilterState {
        self
    }

    fn apply(&mut self, action: FilterAction) {
        FilterState::apply(self, action);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleKey {
    Heatmap,
    Discounts,
    Colleges,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelInput {
    Toggle(ToggleKey),
    Time(TimeOfDay),
    Chip(CategoryFilter),
    Row(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceVariant {
    Desktop,
    Mobile,
}

impl FromStr for SurfaceVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "desktop" => Ok(SurfaceVariant::Desktop),
            "mobile" => Ok(SurfaceVariant::Mobile),
            other => Err(format!("unknown surface variant: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChipLayout {
    Wrap,
    HorizontalScroll,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToggleView {
    pub key: ToggleKey,
    pub label: &'static str,
    pub on: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentView {
    pub time: TimeOfDay,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChipView {
    pub category: CategoryFilter,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DealRow {
    pub id: u32,
    pub emoji: &'static str,
    pub name: &'static str,
    pub category: Category,
    pub discount: u8,
    pub distance: &'static str,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelView {
    pub variant: SurfaceVariant,
    pub toggles: Vec<ToggleView>,
    pub times: Vec<SegmentView>,
    pub chips: Vec<ChipView>,
    pub chip_layout: ChipLayout,
    pub deals: Vec<DealRow>,
}

pub trait FilterSurface {
    fn variant(&self) -> SurfaceVariant;
    fn view<C: FilterControls + ?Sized>(&self, controls: &C) -> PanelView;
    /// Applies the input if this surface offers it. Returns whether it did.
    fn handle<C: FilterControls + ?Sized>(&self, controls: &mut C, input: PanelInput) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DesktopPanel;

#[derive(Debug, Clone, Copy, Default)]
pub struct MobileSheet;

impl FilterSurface for DesktopPanel {
    fn variant(&self) -> SurfaceVariant {
        SurfaceVariant::Desktop
    }

    fn view<C: FilterControls + ?Sized>(&self, controls: &C) -> PanelView {
        let filters = controls.filters();
        PanelView {
            variant: self.variant(),
            toggles: vec![
                ToggleView { key: ToggleKey::Heatmap, label: "Show Heatmap", on: filters.show_heatmap },
                ToggleView { key: ToggleKey::Discounts, label: "Show Discounts", on: filters.show_discounts },
                ToggleView { key: ToggleKey::Colleges, label: "Show Colleges", on: filters.show_colleges },
            ],
            times: time_segments(filters),
            chips: category_chips(filters),
            chip_layout: ChipLayout::Wrap,
            deals: deal_rows(controls),
        }
    }

    fn handle<C: FilterControls + ?Sized>(&self, controls: &mut C, input: PanelInput) -> bool {
        let action = match input {
            PanelInput::Toggle(key) => {
                let filters = controls.filters();
                match key {
                    ToggleKey::Heatmap => FilterAction::SetHeatmap(!filters.show_heatmap),
                    ToggleKey::Discounts => FilterAction::SetDiscounts(!filters.show_discounts),
                    ToggleKey::Colleges => FilterAction::SetColleges(!filters.show_colleges),
                }
            }
            other => return handle_shared(controls, other),
        };
        controls.apply(action);
        true
    }
}

impl FilterSurface for MobileSheet {
    fn variant(&self) -> SurfaceVariant {
        SurfaceVariant::Mobile
    }

    fn view<C: FilterControls + ?Sized>(&self, controls: &C) -> PanelView {
        let filters = controls.filters();
        PanelView {
            variant: self.variant(),
            toggles: Vec::new(),
            times: time_segments(filters),
            chips: category_chips(filters),
            chip_layout: ChipLayout::HorizontalScroll,
            deals: deal_rows(controls),
        }
    }

    fn handle<C: FilterControls + ?Sized>(&self, controls: &mut C, input: PanelInput) -> bool {
        // the sheet has no layer toggles
        match input {
            PanelInput::Toggle(_) => false,
            other => handle_shared(controls, other),
        }
    }
}

fn handle_shared<C: FilterControls + ?Sized>(controls: &mut C, input: PanelInput) -> bool {
    let action = match input {
        PanelInput::Time(time) => FilterAction::SetTime(time),
        PanelInput::Chip(category) => FilterAction::SetCategory(category),
        PanelInput::Row(id) => FilterAction::Select(id),
        PanelInput::Toggle(_) => return false,
    };
    controls.apply(action);
    true
}

fn time_segments(filters: &FilterState) -> Vec<SegmentView> {
    TimeOfDay::ALL
        .into_iter()
        .map(|time| SegmentView { time, active: filters.active_time == time })
        .collect()
}

fn category_chips(filters: &FilterState) -> Vec<ChipView> {
    std::iter::once(CategoryFilter::All)
        .chain(Category::ALL.into_iter().map(CategoryFilter::Only))
        .map(|category| ChipView { category, active: filters.active_category == category })
        .collect()
}

fn deal_rows<C: FilterControls + ?Sized>(controls: &C) -> Vec<DealRow> {
    let selected = controls.filters().selected_deal().map(|d| d.id);
    controls
        .deals()
        .into_iter()
        .map(|deal| DealRow {
            id: deal.id,
            emoji: deal.emoji,
            name: deal.name,
            category: deal.category,
            discount: deal.discount,
            distance: deal.distance,
            selected: selected == Some(deal.id),
        })
        .collect()
}
