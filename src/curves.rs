// ============================================================================
// curves.rs — Linestream
// Colour-over-life gradient and size-over-life curve, evaluated on t ∈ [0, 1].
// ============================================================================

use serde::{Deserialize, Serialize};

/// One key of a [`ColorGradient`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorKey {
    pub time: f32,
    pub color: [f32; 4],
}

/// Piecewise-linear RGBA gradient. Keys are kept sorted by time, including
/// after deserialization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "UnsortedKeys<ColorKey>")]
pub struct ColorGradient {
    pub keys: Vec<ColorKey>,
}

/// Keys as written in a config file, in file order.
#[derive(Deserialize)]
struct UnsortedKeys<K> {
    keys: Vec<K>,
}

impl From<UnsortedKeys<ColorKey>> for ColorGradient {
    fn from(raw: UnsortedKeys<ColorKey>) -> Self {
        Self::new(raw.keys)
    }
}

impl From<UnsortedKeys<SizeKey>> for SizeCurve {
    fn from(raw: UnsortedKeys<SizeKey>) -> Self {
        Self::new(raw.keys)
    }
}

impl Default for ColorGradient {
    fn default() -> Self {
        Self {
            keys: vec![
                ColorKey { time: 0.0, color: [1.0, 1.0, 1.0, 1.0] },
                ColorKey { time: 1.0, color: [1.0, 1.0, 1.0, 0.0] },
            ],
        }
    }
}

impl ColorGradient {
    pub fn new(mut keys: Vec<ColorKey>) -> Self {
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { keys }
    }

    /// Colour at `t`. Values outside the key range hold the nearest key; an
    /// empty gradient is opaque white.
    pub fn evaluate(&self, t: f32) -> [f32; 4] {
        let Some(first) = self.keys.first() else {
            return [1.0; 4];
        };
        if t <= first.time {
            return first.color;
        }
        for pair in self.keys.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if t <= b.time {
                let span = b.time - a.time;
                let f = if span > f32::EPSILON { (t - a.time) / span } else { 1.0 };
                let mut out = [0.0; 4];
                for (i, o) in out.iter_mut().enumerate() {
                    *o = a.color[i] + (b.color[i] - a.color[i]) * f;
                }
                return out;
            }
        }
        self.keys[self.keys.len() - 1].color
    }
}

/// One key of a [`SizeCurve`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SizeKey {
    pub time: f32,
    pub value: f32,
}

/// Piecewise-linear scalar curve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "UnsortedKeys<SizeKey>")]
pub struct SizeCurve {
    pub keys: Vec<SizeKey>,
}

impl Default for SizeCurve {
    fn default() -> Self {
        Self::constant(1.0)
    }
}

impl SizeCurve {
    pub fn new(mut keys: Vec<SizeKey>) -> Self {
        keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { keys }
    }

    pub fn constant(value: f32) -> Self {
        Self {
            keys: vec![SizeKey { time: 0.0, value }],
        }
    }

    pub fn evaluate(&self, t: f32) -> f32 {
        let Some(first) = self.keys.first() else {
            return 1.0;
        };
        if t <= first.time {
            return first.value;
        }
        for pair in self.keys.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if t <= b.time {
                let span = b.time - a.time;
                let f = if span > f32::EPSILON { (t - a.time) / span } else { 1.0 };
                return a.value + (b.value - a.value) * f;
            }
        }
        self.keys[self.keys.len() - 1].value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_interpolates_between_keys() {
        let g = ColorGradient::new(vec![
            ColorKey { time: 1.0, color: [0.0, 0.0, 1.0, 0.0] },
            ColorKey { time: 0.0, color: [1.0, 0.0, 0.0, 1.0] },
        ]);
        assert_eq!(g.evaluate(0.0), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(g.evaluate(0.5), [0.5, 0.0, 0.5, 0.5]);
        assert_eq!(g.evaluate(2.0), [0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn empty_gradient_is_white() {
        let g = ColorGradient { keys: Vec::new() };
        assert_eq!(g.evaluate(0.3), [1.0; 4]);
    }

    #[test]
    fn keys_loaded_out_of_order_are_sorted() {
        let g: ColorGradient = serde_json::from_str(
            r#"{ "keys": [
                { "time": 1.0, "color": [0.0, 0.0, 1.0, 0.0] },
                { "time": 0.0, "color": [1.0, 0.0, 0.0, 1.0] }
            ] }"#,
        )
        .unwrap();
        assert_eq!(g.keys[0].time, 0.0);
        assert_eq!(g.evaluate(0.5), [0.5, 0.0, 0.5, 0.5]);

        let c: SizeCurve = serde_json::from_str(
            r#"{ "keys": [ { "time": 1.0, "value": 4.0 }, { "time": 0.0, "value": 2.0 } ] }"#,
        )
        .unwrap();
        assert_eq!(c.evaluate(0.5), 3.0);
    }

    #[test]
    fn size_curve_clamps_outside_range() {
        let c = SizeCurve::new(vec![
            SizeKey { time: 0.25, value: 2.0 },
            SizeKey { time: 0.75, value: 4.0 },
        ]);
        assert_eq!(c.evaluate(0.0), 2.0);
        assert_eq!(c.evaluate(0.5), 3.0);
        assert_eq!(c.evaluate(1.0), 4.0);
        assert_eq!(SizeCurve::constant(0.5).evaluate(0.9), 0.5);
    }
}
