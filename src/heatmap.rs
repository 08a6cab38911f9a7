//! Heatmap paint contract and a small evaluator for the expressions it uses.

use crate::engine::{LayerKind, LayerSpec, Visibility};
use crate::types::TimeOfDay;
use geojson::JsonObject;
use serde_json::{json, Map, Value};

pub const SOURCE_ID: &str = "deals";
pub const LAYER_ID: &str = "deals-heat";

pub const WEIGHT: &str = "heatmap-weight";
pub const INTENSITY: &str = "heatmap-intensity";
pub const COLOR: &str = "heatmap-color";
pub const RADIUS: &str = "heatmap-radius";
pub const OPACITY: &str = "heatmap-opacity";

const OPACITY_VALUE: f64 = 0.6;

const COLOR_STOPS: [(f64, &str); 6] = [
    (0.0, "rgba(33,102,172,0)"),
    (0.2, "rgb(103,169,207)"),
    (0.4, "rgb(209,229,240)"),
    (0.6, "rgb(253,219,199)"),
    (0.8, "rgb(239,138,98)"),
    (1.0, "rgb(178,24,43)"),
];

pub fn weight_expression() -> Value {
    json!(["get", "weight"])
}

/// Zoom 10 -> 1, zoom 15 -> 3, scaled by the time-of-day factor.
pub fn intensity_expression(time: TimeOfDay) -> Value {
    let factor = time.intensity();
    json!(["interpolate", ["linear"], ["zoom"], 10, factor, 15, 3.0 * factor])
}

pub fn color_expression() -> Value {
    let mut expr = vec![json!("interpolate"), json!(["linear"]), json!(["heatmap-density"])];
    for (stop, color) in COLOR_STOPS {
        expr.push(json!(stop));
        expr.push(json!(color));
    }
    Value::Array(expr)
}

pub fn radius_expression() -> Value {
    json!(["interpolate", ["linear"], ["zoom"], 10, 20, 15, 40])
}

pub fn paint(time: TimeOfDay) -> Map<String, Value> {
    let mut paint = Map::new();
    paint.insert(WEIGHT.to_string(), weight_expression());
    paint.insert(INTENSITY.to_string(), intensity_expression(time));
    paint.insert(COLOR.to_string(), color_expression());
    paint.insert(RADIUS.to_string(), radius_expression());
    paint.insert(OPACITY.to_string(), json!(OPACITY_VALUE));
    paint
}

pub fn layer_spec(time: TimeOfDay, visible: bool) -> LayerSpec {
    LayerSpec {
        id: LAYER_ID.to_string(),
        source: SOURCE_ID.to_string(),
        kind: LayerKind::Heatmap,
        paint: paint(time),
        visibility: visible.into(),
    }
}

pub fn visibility_value(visible: bool) -> Value {
    json!(Visibility::from(visible))
}

/// Inputs an expression can read while being evaluated.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalContext<'a> {
    pub zoom: f64,
    pub density: f64,
    pub properties: Option<&'a JsonObject>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Output {
    Number(f64),
    /// Straight RGBA, channels 0..255 and alpha 0..1.
    Color([f64; 4]),
}

impl Output {
    pub fn as_number(self) -> Option<f64> {
        match self {
            Output::Number(n) => Some(n),
            Output::Color(_) => None,
        }
    }

    pub fn as_color(self) -> Option<[f64; 4]> {
        match self {
            Output::Color(c) => Some(c),
            Output::Number(_) => None,
        }
    }

    fn lerp(self, other: Output, t: f64) -> Option<Output> {
        match (self, other) {
            (Output::Number(a), Output::Number(b)) => Some(Output::Number(a + (b - a) * t)),
            (Output::Color(a), Output::Color(b)) => {
                Some(Output::Color(std::array::from_fn(|i| a[i] + (b[i] - a[i]) * t)))
            }
            _ => None,
        }
    }
}

/// Evaluates the expression subset emitted by this module. Anything else is `None`.
pub fn evaluate(expr: &Value, ctx: &EvalContext) -> Option<Output> {
    match expr {
        Value::Number(n) => n.as_f64().map(Output::Number),
        Value::String(s) => parse_css_color(s).map(Output::Color),
        Value::Array(items) => {
            let (op, args) = items.split_first()?;
            match op.as_str()? {
                "zoom" => Some(Output::Number(ctx.zoom)),
                "heatmap-density" => Some(Output::Number(ctx.density)),
                "get" => {
                    let key = args.first()?.as_str()?;
                    ctx.properties?.get(key)?.as_f64().map(Output::Number)
                }
                "interpolate" => interpolate_linear(args, ctx),
                _ => None,
            }
        }
        _ => None,
    }
}

fn interpolate_linear(args: &[Value], ctx: &EvalContext) -> Option<Output> {
    let (kind, rest) = args.split_first()?;
    if kind.get(0)?.as_str()? != "linear" {
        return None;
    }
    let (input, stops) = rest.split_first()?;
    let input = evaluate(input, ctx)?.as_number()?;
    if stops.is_empty() || stops.len() % 2 != 0 {
        return None;
    }

    let mut prev: Option<(f64, Output)> = None;
    for pair in stops.chunks(2) {
        let stop = pair[0].as_f64()?;
        let value = evaluate(&pair[1], ctx)?;
        match prev {
            None if input <= stop => return Some(value),
            Some((prev_stop, prev_value)) if input <= stop => {
                let t = (input - prev_stop) / (stop - prev_stop);
                return prev_value.lerp(value, t);
            }
            _ => prev = Some((stop, value)),
        }
    }
    prev.map(|(_, value)| value)
}

/// Parses `rgb(r,g,b)` and `rgba(r,g,b,a)`.
pub fn parse_css_color(s: &str) -> Option<[f64; 4]> {
    let s = s.trim();
    let (inner, has_alpha) = if let Some(rest) = s.strip_prefix("rgba(") {
        (rest.strip_suffix(')')?, true)
    } else if let Some(rest) = s.strip_prefix("rgb(") {
        (rest.strip_suffix(')')?, false)
    } else {
        return None;
    };

    let parts: Vec<f64> = inner
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;

    match (parts.as_slice(), has_alpha) {
        ([r, g, b], false) => Some([*r, *g, *b, 1.0]),
        ([r, g, b, a], true) => Some([*r, *g, *b, *a]),
        _ => None,
    }
}
