//! Value types guest code can construct with `new`.

use rquickjs::{Class, Ctx, JsLifetime, class::Trace, function::Opt};

#[derive(Debug, Clone, Copy, PartialEq, Trace, JsLifetime)]
#[rquickjs::class]
pub struct Color {
    #[qjs(get, set)]
    pub r: f64,
    #[qjs(get, set)]
    pub g: f64,
    #[qjs(get, set)]
    pub b: f64,
    #[qjs(get, set)]
    pub a: f64,
}

#[rquickjs::methods]
impl Color {
    /// Channels are in `0..=1`; alpha defaults to opaque.
    #[qjs(constructor)]
    pub fn new(r: Opt<f64>, g: Opt<f64>, b: Opt<f64>, a: Opt<f64>) -> Self {
        Self {
            r: r.0.unwrap_or_default(),
            g: g.0.unwrap_or_default(),
            b: b.0.unwrap_or_default(),
            a: a.0.unwrap_or(1.0),
        }
    }

    #[qjs(rename = "toString")]
    pub fn describe(&self) -> String {
        format!("RGBA({:.3}, {:.3}, {:.3}, {:.3})", self.r, self.g, self.b, self.a)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Trace, JsLifetime)]
#[rquickjs::class]
pub struct Vector2 {
    #[qjs(get, set)]
    pub x: f64,
    #[qjs(get, set)]
    pub y: f64,
}

#[rquickjs::methods]
impl Vector2 {
    #[qjs(constructor)]
    pub fn new(x: Opt<f64>, y: Opt<f64>) -> Self {
        Self {
            x: x.0.unwrap_or_default(),
            y: y.0.unwrap_or_default(),
        }
    }

    #[qjs(get)]
    pub fn magnitude(&self) -> f64 {
        self.x.hypot(self.y)
    }

    #[qjs(rename = "toString")]
    pub fn describe(&self) -> String {
        format!("({:.1}, {:.1})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Trace, JsLifetime)]
#[rquickjs::class]
pub struct Vector3 {
    #[qjs(get, set)]
    pub x: f64,
    #[qjs(get, set)]
    pub y: f64,
    #[qjs(get, set)]
    pub z: f64,
}

#[rquickjs::methods]
impl Vector3 {
    #[qjs(constructor)]
    pub fn new(x: Opt<f64>, y: Opt<f64>, z: Opt<f64>) -> Self {
        Self {
            x: x.0.unwrap_or_default(),
            y: y.0.unwrap_or_default(),
            z: z.0.unwrap_or_default(),
        }
    }

    #[qjs(get)]
    pub fn magnitude(&self) -> f64 {
        self.z.mul_add(self.z, self.x.mul_add(self.x, self.y * self.y)).sqrt()
    }

    #[qjs(rename = "toString")]
    pub fn describe(&self) -> String {
        format!("({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Trace, JsLifetime)]
#[rquickjs::class]
pub struct Rect {
    #[qjs(get, set)]
    pub x: f64,
    #[qjs(get, set)]
    pub y: f64,
    #[qjs(get, set)]
    pub width: f64,
    #[qjs(get, set)]
    pub height: f64,
}

#[rquickjs::methods]
impl Rect {
    #[qjs(constructor)]
    pub fn new(x: Opt<f64>, y: Opt<f64>, width: Opt<f64>, height: Opt<f64>) -> Self {
        Self {
            x: x.0.unwrap_or_default(),
            y: y.0.unwrap_or_default(),
            width: width.0.unwrap_or_default(),
            height: height.0.unwrap_or_default(),
        }
    }

    #[qjs(get, rename = "xMax")]
    pub fn x_max(&self) -> f64 {
        self.x + self.width
    }

    #[qjs(get, rename = "yMax")]
    pub fn y_max(&self) -> f64 {
        self.y + self.height
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x_max() && y >= self.y && y < self.y_max()
    }
}

/// Edge insets in whole pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Trace, JsLifetime)]
#[rquickjs::class]
pub struct RectOffset {
    #[qjs(get, set)]
    pub left: i32,
    #[qjs(get, set)]
    pub right: i32,
    #[qjs(get, set)]
    pub top: i32,
    #[qjs(get, set)]
    pub bottom: i32,
}

#[rquickjs::methods]
impl RectOffset {
    #[qjs(constructor)]
    pub fn new(left: Opt<i32>, right: Opt<i32>, top: Opt<i32>, bottom: Opt<i32>) -> Self {
        Self {
            left: left.0.unwrap_or_default(),
            right: right.0.unwrap_or_default(),
            top: top.0.unwrap_or_default(),
            bottom: bottom.0.unwrap_or_default(),
        }
    }

    #[qjs(get)]
    pub fn horizontal(&self) -> i32 {
        self.left + self.right
    }

    #[qjs(get)]
    pub fn vertical(&self) -> i32 {
        self.top + self.bottom
    }
}

/// Layout length: a number with a unit of `point`, `percent`, `auto` or
/// `undefined`.
#[derive(Debug, Clone, PartialEq, Trace, JsLifetime)]
#[rquickjs::class]
pub struct LayoutValue {
    #[qjs(get, set)]
    pub value: f64,
    #[qjs(get, set)]
    pub unit: String,
}

#[rquickjs::methods]
impl LayoutValue {
    #[qjs(constructor)]
    pub fn new(value: Opt<f64>, unit: Opt<String>) -> Self {
        Self {
            value: value.0.unwrap_or(f64::NAN),
            unit: unit.0.unwrap_or_else(|| "point".to_string()),
        }
    }

    #[qjs(static, rename = "Point")]
    pub fn point(value: f64) -> Self {
        Self {
            value,
            unit: "point".to_string(),
        }
    }

    #[qjs(static, rename = "Percent")]
    pub fn percent(value: f64) -> Self {
        Self {
            value,
            unit: "percent".to_string(),
        }
    }

    #[qjs(static, rename = "Auto")]
    pub fn auto() -> Self {
        Self {
            value: f64::NAN,
            unit: "auto".to_string(),
        }
    }

    #[qjs(rename = "toString")]
    pub fn describe(&self) -> String {
        match self.unit.as_str() {
            "point" => format!("{}pt", self.value),
            "percent" => format!("{}%", self.value),
            other => other.to_string(),
        }
    }
}

/// Registers every value type as a global constructor.
pub fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    Class::<Color>::define(&globals)?;
    Class::<Vector2>::define(&globals)?;
    Class::<Vector3>::define(&globals)?;
    Class::<Rect>::define(&globals)?;
    Class::<RectOffset>::define(&globals)?;
    Class::<LayoutValue>::define(&globals)?;
    Ok(())
}
