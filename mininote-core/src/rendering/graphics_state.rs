//! Graphics state for content stream interpretation.

/// An affine matrix `[a b c d e f]` mapping `(x, y)` to
/// `(a*x + c*y + e, b*x + d*y + f)`.
pub type Matrix = [f64; 6];

pub const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

/// Returns the matrix that applies `first`, then `then`.
pub fn concat(first: &Matrix, then: &Matrix) -> Matrix {
    let [a, b, c, d, e, f] = *first;
    let [ta, tb, tc, td, te, tf] = *then;
    [
        ta * a + tc * b,
        tb * a + td * b,
        ta * c + tc * d,
        tb * c + td * d,
        ta * e + tc * f + te,
        tb * e + td * f + tf,
    ]
}

pub fn transform_point(m: &Matrix, x: f64, y: f64) -> (f64, f64) {
    (m[0] * x + m[2] * y + m[4], m[1] * x + m[3] * y + m[5])
}

/// Line cap style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineCap {
    #[default]
    Butt,
    Round,
    ProjectingSquare,
}

impl LineCap {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(LineCap::Butt),
            1 => Some(LineCap::Round),
            2 => Some(LineCap::ProjectingSquare),
            _ => None,
        }
    }
}

/// Line join style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineJoin {
    #[default]
    Miter,
    Round,
    Bevel,
}

impl LineJoin {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(LineJoin::Miter),
            1 => Some(LineJoin::Round),
            2 => Some(LineJoin::Bevel),
            _ => None,
        }
    }
}

/// Stroke properties for path rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokeProps {
    /// Line width in user space units
    pub line_width: f64,
    pub line_cap: LineCap,
    pub line_join: LineJoin,
    pub miter_limit: f64,
    /// Alternating on/off lengths; empty means solid
    pub dash_array: Vec<f64>,
    pub dash_offset: f64,
}

impl Default for StrokeProps {
    fn default() -> Self {
        StrokeProps {
            line_width: 1.0,
            line_cap: LineCap::default(),
            line_join: LineJoin::default(),
            miter_limit: 10.0,
            dash_array: Vec::new(),
            dash_offset: 0.0,
        }
    }
}

/// Device colour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Color {
    Gray(f64),
    RGB(f64, f64, f64),
    CMYK(f64, f64, f64, f64),
}

impl Color {
    pub fn black() -> Self {
        Color::Gray(0.0)
    }

    pub fn white() -> Self {
        Color::Gray(1.0)
    }

    /// RGB bytes (naive CMYK conversion).
    pub fn to_rgb8(&self) -> [u8; 3] {
        let byte = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        match *self {
            Color::Gray(g) => [byte(g); 3],
            Color::RGB(r, g, b) => [byte(r), byte(g), byte(b)],
            Color::CMYK(c, m, y, k) => {
                let k = 1.0 - k.clamp(0.0, 1.0);
                [
                    byte((1.0 - c.clamp(0.0, 1.0)) * k),
                    byte((1.0 - m.clamp(0.0, 1.0)) * k),
                    byte((1.0 - y.clamp(0.0, 1.0)) * k),
                ]
            }
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::black()
    }
}

/// Colour space selected with `cs`/`CS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    #[default]
    DeviceGray,
    DeviceRGB,
    DeviceCMYK,
    /// Anything else (patterns, ICC-less separations, ...). Colours set in
    /// it are approximated from the operand count.
    Other,
}

impl ColorSpace {
    /// Maps a colour space name (full or inline-image abbreviation).
    pub fn from_name(name: &str) -> Self {
        match name {
            "DeviceGray" | "G" | "CalGray" => ColorSpace::DeviceGray,
            "DeviceRGB" | "RGB" | "CalRGB" => ColorSpace::DeviceRGB,
            "DeviceCMYK" | "CMYK" => ColorSpace::DeviceCMYK,
            _ => ColorSpace::Other,
        }
    }

    pub fn components(&self) -> Option<usize> {
        match self {
            ColorSpace::DeviceGray => Some(1),
            ColorSpace::DeviceRGB => Some(3),
            ColorSpace::DeviceCMYK => Some(4),
            ColorSpace::Other => None,
        }
    }

    /// The initial colour of the space.
    pub fn initial_color(&self) -> Color {
        match self {
            ColorSpace::DeviceCMYK => Color::CMYK(0.0, 0.0, 0.0, 1.0),
            _ => Color::black(),
        }
    }

    /// Builds a colour from `sc`/`scn` operands.
    pub fn color(&self, values: &[f64]) -> Option<Color> {
        let by_count = |values: &[f64]| match values {
            [g] => Some(Color::Gray(*g)),
            [r, g, b] => Some(Color::RGB(*r, *g, *b)),
            [c, m, y, k] => Some(Color::CMYK(*c, *m, *y, *k)),
            _ => None,
        };
        match self.components() {
            Some(n) if values.len() == n => by_count(values),
            Some(_) => None,
            None => by_count(values),
        }
    }
}

/// Fill rule for path filling and clipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillRule {
    #[default]
    NonZero,
    EvenOdd,
}

/// The part of the PDF graphics state this renderer honours.
#[derive(Debug, Clone)]
pub struct GraphicsState {
    /// Current transformation matrix, user space to device pixels
    pub ctm: Matrix,
    pub stroke_color: Color,
    pub fill_color: Color,
    pub stroke_space: ColorSpace,
    pub fill_space: ColorSpace,
    pub stroke_props: StrokeProps,
    /// Constant alpha for stroking (`/CA`)
    pub stroke_alpha: f64,
    /// Constant alpha for everything else (`/ca`)
    pub fill_alpha: f64,
}

impl Default for GraphicsState {
    fn default() -> Self {
        GraphicsState {
            ctm: IDENTITY,
            stroke_color: Color::black(),
            fill_color: Color::black(),
            stroke_space: ColorSpace::default(),
            fill_space: ColorSpace::default(),
            stroke_props: StrokeProps::default(),
            stroke_alpha: 1.0,
            fill_alpha: 1.0,
        }
    }
}

impl GraphicsState {
    pub fn new(ctm: Matrix) -> Self {
        GraphicsState {
            ctm,
            ..Default::default()
        }
    }

    /// Applies `transform` in user space, before the current CTM.
    pub fn concat_matrix(&mut self, transform: &Matrix) {
        self.ctm = concat(transform, &self.ctm);
    }

    pub fn transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        transform_point(&self.ctm, x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_matrix() {
        let mut state = GraphicsState::default();
        state.concat_matrix(&[1.0, 0.0, 0.0, 1.0, 10.0, 20.0]);
        state.concat_matrix(&[2.0, 0.0, 0.0, 2.0, 0.0, 0.0]);
        // scale happens in the translated space
        assert_eq!(state.ctm, [2.0, 0.0, 0.0, 2.0, 10.0, 20.0]);
        assert_eq!(state.transform_point(1.0, 1.0), (12.0, 22.0));
    }

    #[test]
    fn test_concat_order() {
        let translate = [1.0, 0.0, 0.0, 1.0, 5.0, 0.0];
        let scale = [3.0, 0.0, 0.0, 3.0, 0.0, 0.0];
        // translate first, then scale: (1,0) -> (6,0) -> (18,0)
        assert_eq!(transform_point(&concat(&translate, &scale), 1.0, 0.0), (18.0, 0.0));
    }

    #[test]
    fn test_color_conversion() {
        assert_eq!(Color::Gray(0.5).to_rgb8(), [128, 128, 128]);
        assert_eq!(Color::CMYK(1.0, 0.0, 0.0, 0.0).to_rgb8(), [0, 255, 255]);
        assert_eq!(Color::RGB(2.0, -1.0, 1.0).to_rgb8(), [255, 0, 255]);
    }

    #[test]
    fn test_color_space_operands() {
        assert_eq!(ColorSpace::DeviceRGB.color(&[1.0, 0.0, 0.0]), Some(Color::RGB(1.0, 0.0, 0.0)));
        assert_eq!(ColorSpace::DeviceRGB.color(&[1.0]), None);
        assert_eq!(ColorSpace::Other.color(&[0.2]), Some(Color::Gray(0.2)));
        assert_eq!(ColorSpace::from_name("CMYK"), ColorSpace::DeviceCMYK);
    }
}
