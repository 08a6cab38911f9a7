use crate::data;
use crate::types::{CategoryFilter, Deal, TimeOfDay};

/// UI filter flags plus the current selection. Setters are plain assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterState {
    pub show_heatmap: bool,
    pub show_discounts: bool,
    /// Tracked for the toggle, not rendered yet.
    pub show_colleges: bool,
    pub active_time: TimeOfDay,
    pub active_category: CategoryFilter,
    selected_deal: Option<Deal>,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            show_heatmap: true,
            show_discounts: true,
            show_colleges: false,
            active_time: TimeOfDay::default(),
            active_category: CategoryFilter::All,
            selected_deal: None,
        }
    }
}

/// Every mutation the filter surfaces and the marker callback can make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    SetHeatmap(bool),
    SetDiscounts(bool),
    SetColleges(bool),
    SetTime(TimeOfDay),
    SetCategory(CategoryFilter),
    Select(u32),
    ClearSelection,
}

impl FilterState {
    pub fn selected_deal(&self) -> Option<&Deal> {
        self.selected_deal.as_ref()
    }

    /// Selects a catalog deal by id. Unknown ids leave the selection alone.
    pub fn select(&mut self, id: u32) -> bool {
        match data::find_deal(id) {
            Some(deal) => {
                self.selected_deal = Some(deal.clone());
                true
            }
            None => {
                tracing::warn!(id, "ignoring selection of unknown deal");
                false
            }
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected_deal = None;
    }

    pub fn apply(&mut self, action: FilterAction) {
        match action {
            FilterAction::SetHeatmap(on) => self.show_heatmap = on,
            FilterAction::SetDiscounts(on) => self.show_discounts = on,
            FilterAction::SetColleges(on) => self.show_colleges = on,
            FilterAction::SetTime(time) => self.active_time = time,
            FilterAction::SetCategory(category) => self.active_category = category,
            FilterAction::Select(id) => {
                self.select(id);
            }
            FilterAction::ClearSelection => self.clear_selection(),
        }
    }

    /// Deals for the list and the map, recomputed on every call.
    pub fn filtered_deals(&self) -> Vec<Deal> {
        data::filter_deals(&data::DEALS, self.active_category)
    }

    /// What the map should draw: the filtered list, or nothing when discounts are hidden.
    pub fn visible_deals(&self) -> Vec<Deal> {
        if self.show_discounts {
            self.filtered_deals()
        } else {
            Vec::new()
        }
    }
}
