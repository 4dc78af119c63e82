//! Rendering context for processing PDF content streams.
//!
//! The context owns the graphics state stack and the resource scope, and
//! forwards path construction, painting, clipping and images to a
//! [`Device`]. Text operators are parsed but not drawn.

use super::device::{Device, Paint, PathDrawMode};
use super::graphics_state::{
    ColorSpace, FillRule, GraphicsState, LineCap, LineJoin, Matrix, concat,
};
use super::image::decode_image;
use crate::core::content_stream::{ContentStreamEvaluator, OpCode, Operation};
use crate::core::error::PDFResult;
use crate::core::parser::{Dict, PDFObject, PdfStream};
use crate::core::xref::XRef;
use std::sync::Arc;

/// Form XObjects nested deeper than this are skipped.
pub const MAX_FORM_DEPTH: usize = 16;

/// Interprets content streams against a device.
pub struct RenderingContext<'a, D: Device> {
    device: D,
    xref: &'a XRef,
    /// Graphics state stack; never empty
    state_stack: Vec<GraphicsState>,
    /// Resource dictionaries, innermost form last
    resources: Vec<Dict>,
    current_point: Option<(f64, f64)>,
    subpath_start: Option<(f64, f64)>,
    /// Clip set by `W`/`W*`, applied when the path is painted
    pending_clip: Option<FillRule>,
    form_depth: usize,
}

impl<'a, D: Device> RenderingContext<'a, D> {
    /// Creates a context whose initial CTM maps default user space to the
    /// device.
    pub fn new(mut device: D, xref: &'a XRef, resources: Dict, ctm: Matrix) -> Self {
        device.set_transform(&ctm);
        RenderingContext {
            device,
            xref,
            state_stack: vec![GraphicsState::new(ctm)],
            resources: vec![resources],
            current_point: None,
            subpath_start: None,
            pending_clip: None,
            form_depth: 0,
        }
    }

    pub fn current_state(&self) -> &GraphicsState {
        // The stack starts with one entry and `restore` never pops the last.
        &self.state_stack[self.state_stack.len() - 1]
    }

    fn state_mut(&mut self) -> &mut GraphicsState {
        let last = self.state_stack.len() - 1;
        &mut self.state_stack[last]
    }

    pub fn device(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    /// Runs every operation of a decoded content stream.
    ///
    /// A syntax error ends the stream; what was drawn before it is kept.
    pub fn render_content(&mut self, data: &[u8]) -> PDFResult<()> {
        let mut evaluator = ContentStreamEvaluator::new(data);
        loop {
            match evaluator.read_operation() {
                Ok(Some(op)) => self.process_operation(&op)?,
                Ok(None) => return Ok(()),
                Err(e) => {
                    log::warn!("content stream truncated: {}", e);
                    return Ok(());
                }
            }
        }
    }

    /// Processes one content stream operation.
    ///
    /// Operators with missing or mistyped operands are skipped.
    pub fn process_operation(&mut self, op: &Operation) -> PDFResult<()> {
        match op.op {
            // Graphics state
            OpCode::Save => self.save(),
            OpCode::Restore => self.restore(),
            OpCode::Transform => {
                if let Some(m) = matrix_operand(op) {
                    self.state_mut().concat_matrix(&m);
                    let ctm = self.current_state().ctm;
                    self.device.set_transform(&ctm);
                } else {
                    skip(op);
                }
            }
            OpCode::SetLineWidth => match op.number(0) {
                Some(w) => self.state_mut().stroke_props.line_width = w.abs(),
                None => skip(op),
            },
            OpCode::SetLineCap => match op.number(0).and_then(|c| LineCap::from_code(c as i64)) {
                Some(cap) => self.state_mut().stroke_props.line_cap = cap,
                None => skip(op),
            },
            OpCode::SetLineJoin => match op.number(0).and_then(|j| LineJoin::from_code(j as i64)) {
                Some(join) => self.state_mut().stroke_props.line_join = join,
                None => skip(op),
            },
            OpCode::SetMiterLimit => match op.number(0) {
                Some(m) => self.state_mut().stroke_props.miter_limit = m,
                None => skip(op),
            },
            OpCode::SetDash => match (op.args.first().and_then(PDFObject::as_number_array), op.number(1)) {
                (Some(array), Some(phase)) => self.set_dash(array, phase),
                _ => skip(op),
            },
            OpCode::SetGState => match op.name(0) {
                Some(name) => self.set_gstate(name)?,
                None => skip(op),
            },

            // Path construction
            OpCode::MoveTo => match (op.number(0), op.number(1)) {
                (Some(x), Some(y)) => {
                    self.device.move_to(x, y);
                    self.current_point = Some((x, y));
                    self.subpath_start = Some((x, y));
                }
                _ => skip(op),
            },
            OpCode::LineTo => match (op.number(0), op.number(1)) {
                (Some(x), Some(y)) => {
                    self.ensure_subpath(x, y);
                    self.device.line_to(x, y);
                    self.current_point = Some((x, y));
                }
                _ => skip(op),
            },
            OpCode::CurveTo => match op.numbers().as_deref() {
                Some(&[x1, y1, x2, y2, x3, y3]) => self.curve(x1, y1, x2, y2, x3, y3),
                _ => skip(op),
            },
            OpCode::CurveTo2 => match (op.numbers().as_deref(), self.current_point) {
                (Some(&[x2, y2, x3, y3]), Some((x1, y1))) => self.curve(x1, y1, x2, y2, x3, y3),
                _ => skip(op),
            },
            OpCode::CurveTo3 => match op.numbers().as_deref() {
                Some(&[x1, y1, x3, y3]) => self.curve(x1, y1, x3, y3, x3, y3),
                _ => skip(op),
            },
            OpCode::ClosePath => self.close_path(),
            OpCode::Rectangle => match op.numbers().as_deref() {
                Some(&[x, y, w, h]) => {
                    self.device.rect(x, y, w, h);
                    self.current_point = Some((x, y));
                    self.subpath_start = Some((x, y));
                }
                _ => skip(op),
            },

            // Path painting
            OpCode::Stroke => self.paint(Some(PathDrawMode::Stroke))?,
            OpCode::CloseStroke => {
                self.close_path();
                self.paint(Some(PathDrawMode::Stroke))?;
            }
            OpCode::Fill => self.paint(Some(PathDrawMode::Fill(FillRule::NonZero)))?,
            OpCode::EOFill => self.paint(Some(PathDrawMode::Fill(FillRule::EvenOdd)))?,
            OpCode::FillStroke => self.paint(Some(PathDrawMode::FillStroke(FillRule::NonZero)))?,
            OpCode::EOFillStroke => self.paint(Some(PathDrawMode::FillStroke(FillRule::EvenOdd)))?,
            OpCode::CloseFillStroke => {
                self.close_path();
                self.paint(Some(PathDrawMode::FillStroke(FillRule::NonZero)))?;
            }
            OpCode::CloseEOFillStroke => {
                self.close_path();
                self.paint(Some(PathDrawMode::FillStroke(FillRule::EvenOdd)))?;
            }
            OpCode::EndPath => self.paint(None)?,

            // Clipping
            OpCode::Clip => self.pending_clip = Some(FillRule::NonZero),
            OpCode::EOClip => self.pending_clip = Some(FillRule::EvenOdd),

            // Colour
            OpCode::SetStrokeGray => self.set_device_color(op, true, ColorSpace::DeviceGray),
            OpCode::SetFillGray => self.set_device_color(op, false, ColorSpace::DeviceGray),
            OpCode::SetStrokeRGBColor => self.set_device_color(op, true, ColorSpace::DeviceRGB),
            OpCode::SetFillRGBColor => self.set_device_color(op, false, ColorSpace::DeviceRGB),
            OpCode::SetStrokeCMYKColor => self.set_device_color(op, true, ColorSpace::DeviceCMYK),
            OpCode::SetFillCMYKColor => self.set_device_color(op, false, ColorSpace::DeviceCMYK),
            OpCode::SetStrokeColorSpace => self.set_color_space(op, true)?,
            OpCode::SetFillColorSpace => self.set_color_space(op, false)?,
            OpCode::SetStrokeColor | OpCode::SetStrokeColorN => self.set_color(op, true),
            OpCode::SetFillColor | OpCode::SetFillColorN => self.set_color(op, false),

            // XObjects and images
            OpCode::PaintXObject => match op.name(0) {
                Some(name) => self.paint_xobject(name)?,
                None => skip(op),
            },
            OpCode::PaintInlineImage => match (op.args.first(), op.args.get(1)) {
                (Some(PDFObject::Dictionary(dict)), Some(PDFObject::String(data))) => {
                    let stream = PdfStream {
                        dict: dict.clone(),
                        data: Arc::from(data.as_slice()),
                    };
                    self.paint_image(&stream, "inline image")?;
                }
                _ => skip(op),
            },

            // Text, marked content, shading and compatibility sections
            _ => log::trace!("ignoring operator {}", op.op),
        }
        Ok(())
    }

    // === Graphics state ===

    fn save(&mut self) {
        let saved = self.current_state().clone();
        self.state_stack.push(saved);
        self.device.save_state();
    }

    fn restore(&mut self) {
        if self.state_stack.len() > 1 {
            self.state_stack.pop();
            self.device.restore_state();
            let ctm = self.current_state().ctm;
            self.device.set_transform(&ctm);
        } else {
            log::debug!("unbalanced Q ignored");
        }
    }

    fn set_dash(&mut self, array: Vec<f64>, phase: f64) {
        let props = &mut self.state_mut().stroke_props;
        // All-zero or negative dash arrays draw solid lines
        if array.iter().any(|d| *d < 0.0) || array.iter().all(|d| *d == 0.0) {
            props.dash_array.clear();
        } else {
            props.dash_array = array;
        }
        props.dash_offset = phase;
    }

    fn lookup_resource(&self, category: &str, name: &str) -> PDFResult<Option<PDFObject>> {
        let Some(resources) = self.resources.last() else {
            return Ok(None);
        };
        match self.xref.get(resources, category)? {
            Some(PDFObject::Dictionary(entries)) => self.xref.get(&entries, name),
            _ => Ok(None),
        }
    }

    fn set_gstate(&mut self, name: &str) -> PDFResult<()> {
        let Some(PDFObject::Dictionary(gs)) = self.lookup_resource("ExtGState", name)? else {
            log::debug!("ExtGState /{} not found", name);
            return Ok(());
        };
        let xref = self.xref;
        let number = |key: &str| -> PDFResult<Option<f64>> {
            Ok(xref.get(&gs, key)?.and_then(|v| v.as_number()))
        };

        let line_width = number("LW")?;
        let line_cap = number("LC")?.and_then(|c| LineCap::from_code(c as i64));
        let line_join = number("LJ")?.and_then(|j| LineJoin::from_code(j as i64));
        let miter_limit = number("ML")?;
        let stroke_alpha = number("CA")?;
        let fill_alpha = number("ca")?;
        let dash = match xref.get(&gs, "D")? {
            Some(PDFObject::Array(items)) => {
                let array = items.first().and_then(PDFObject::as_number_array);
                let phase = items.get(1).and_then(PDFObject::as_number);
                array.zip(phase)
            }
            _ => None,
        };

        let state = self.state_mut();
        if let Some(w) = line_width {
            state.stroke_props.line_width = w.abs();
        }
        if let Some(cap) = line_cap {
            state.stroke_props.line_cap = cap;
        }
        if let Some(join) = line_join {
            state.stroke_props.line_join = join;
        }
        if let Some(m) = miter_limit {
            state.stroke_props.miter_limit = m;
        }
        if let Some(a) = stroke_alpha {
            state.stroke_alpha = a.clamp(0.0, 1.0);
        }
        if let Some(a) = fill_alpha {
            state.fill_alpha = a.clamp(0.0, 1.0);
        }
        if let Some((array, phase)) = dash {
            self.set_dash(array, phase);
        }
        Ok(())
    }

    // === Paths ===

    fn ensure_subpath(&mut self, x: f64, y: f64) {
        if self.current_point.is_none() {
            self.device.move_to(x, y);
            self.subpath_start = Some((x, y));
        }
    }

    fn curve(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, x3: f64, y3: f64) {
        self.ensure_subpath(x1, y1);
        self.device.curve_to(x1, y1, x2, y2, x3, y3);
        self.current_point = Some((x3, y3));
    }

    fn close_path(&mut self) {
        if self.current_point.is_some() {
            self.device.close_path();
            self.current_point = self.subpath_start;
        }
    }

    /// Paints (or just ends) the current path, then applies a pending clip.
    fn paint(&mut self, mode: Option<PathDrawMode>) -> PDFResult<()> {
        if let Some(mode) = mode {
            let state = self.current_state();
            let fill = Paint::new(state.fill_color, state.fill_alpha);
            let stroke = Paint::new(state.stroke_color, state.stroke_alpha);
            let props = state.stroke_props.clone();
            let primary = match mode {
                PathDrawMode::Stroke => stroke,
                _ => fill,
            };
            self.device.draw_path(mode, &primary, &stroke, &props)?;
        }
        if let Some(rule) = self.pending_clip.take() {
            self.device.clip_path(rule)?;
        }
        self.device.begin_path();
        self.current_point = None;
        self.subpath_start = None;
        Ok(())
    }

    // === Colour ===

    fn set_device_color(&mut self, op: &Operation, stroke: bool, space: ColorSpace) {
        let color = op.numbers().and_then(|values| space.color(&values));
        let Some(color) = color else {
            skip(op);
            return;
        };
        let state = self.state_mut();
        if stroke {
            state.stroke_space = space;
            state.stroke_color = color;
        } else {
            state.fill_space = space;
            state.fill_color = color;
        }
    }

    fn set_color_space(&mut self, op: &Operation, stroke: bool) -> PDFResult<()> {
        let Some(name) = op.name(0) else {
            skip(op);
            return Ok(());
        };
        let mut space = ColorSpace::from_name(name);
        if space == ColorSpace::Other {
            // Named resource: resolve to its family
            space = match self.lookup_resource("ColorSpace", name)? {
                Some(PDFObject::Name(family)) => ColorSpace::from_name(&family),
                Some(PDFObject::Array(items)) => match items.first().and_then(PDFObject::as_name) {
                    Some("ICCBased") => {
                        let n = match items.get(1) {
                            Some(item) => self
                                .xref
                                .resolve(item)?
                                .as_dict()
                                .and_then(|d| d.get("N"))
                                .and_then(PDFObject::as_usize),
                            None => None,
                        };
                        match n {
                            Some(1) => ColorSpace::DeviceGray,
                            Some(4) => ColorSpace::DeviceCMYK,
                            _ => ColorSpace::DeviceRGB,
                        }
                    }
                    Some(family) => ColorSpace::from_name(family),
                    None => ColorSpace::Other,
                },
                _ => ColorSpace::Other,
            };
        }
        let state = self.state_mut();
        if stroke {
            state.stroke_space = space;
            state.stroke_color = space.initial_color();
        } else {
            state.fill_space = space;
            state.fill_color = space.initial_color();
        }
        Ok(())
    }

    fn set_color(&mut self, op: &Operation, stroke: bool) {
        // Pattern names are not supported; keep only numeric components
        let values: Vec<f64> = op.args.iter().filter_map(PDFObject::as_number).collect();
        let state = self.state_mut();
        let space = if stroke { state.stroke_space } else { state.fill_space };
        match space.color(&values) {
            Some(color) if stroke => state.stroke_color = color,
            Some(color) => state.fill_color = color,
            None => skip(op),
        }
    }

    // === XObjects ===

    fn paint_xobject(&mut self, name: &str) -> PDFResult<()> {
        let Some(PDFObject::Stream(stream)) = self.lookup_resource("XObject", name)? else {
            log::debug!("XObject /{} not found", name);
            return Ok(());
        };
        match stream.dict.get("Subtype").and_then(PDFObject::as_name) {
            Some("Image") => self.paint_image(&stream, name),
            Some("Form") => self.paint_form(&stream, name),
            other => {
                log::debug!("XObject /{} has unsupported subtype {:?}", name, other);
                Ok(())
            }
        }
    }

    fn paint_image(&mut self, stream: &PdfStream, name: &str) -> PDFResult<()> {
        let state = self.current_state();
        let fill = Paint::new(state.fill_color, state.fill_alpha);
        let alpha = state.fill_alpha;
        let image = match decode_image(self.xref, stream, &fill, self.resources.last()) {
            Ok(image) => image,
            Err(e) => {
                log::warn!("skipping image {}: {}", name, e);
                return Ok(());
            }
        };
        self.device.draw_image(&image, alpha)
    }

    fn paint_form(&mut self, stream: &PdfStream, name: &str) -> PDFResult<()> {
        if self.form_depth >= MAX_FORM_DEPTH {
            log::warn!("form XObject /{} nested too deeply, skipped", name);
            return Ok(());
        }
        let xref = self.xref;
        let matrix = xref
            .get(&stream.dict, "Matrix")?
            .and_then(|m| m.as_number_array())
            .and_then(|m| <[f64; 6]>::try_from(m).ok());
        let bbox = xref
            .get(&stream.dict, "BBox")?
            .and_then(|b| b.as_number_array())
            .and_then(|b| <[f64; 4]>::try_from(b).ok());
        let resources = match xref.get(&stream.dict, "Resources")? {
            Some(PDFObject::Dictionary(res)) => res,
            _ => self.resources.last().cloned().unwrap_or_default(),
        };
        let content = match xref.decode_stream(stream) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("skipping form XObject /{}: {}", name, e);
                return Ok(());
            }
        };

        self.save();
        let base_depth = self.state_stack.len();
        if let Some(m) = matrix {
            self.state_mut().concat_matrix(&m);
            let ctm = self.current_state().ctm;
            self.device.set_transform(&ctm);
        }
        if let Some([x0, y0, x1, y1]) = bbox {
            self.device.begin_path();
            self.device.rect(x0.min(x1), y0.min(y1), (x1 - x0).abs(), (y1 - y0).abs());
            self.device.clip_path(FillRule::NonZero)?;
            self.device.begin_path();
        }
        self.current_point = None;
        self.pending_clip = None;
        self.resources.push(resources);
        self.form_depth += 1;

        let result = self.render_content(&content);

        self.form_depth -= 1;
        self.resources.pop();
        // Unbalanced q inside the form
        while self.state_stack.len() > base_depth {
            self.restore();
        }
        self.restore();
        result
    }
}

fn matrix_operand(op: &Operation) -> Option<Matrix> {
    match op.numbers().as_deref() {
        Some(&[a, b, c, d, e, f]) => Some([a, b, c, d, e, f]),
        _ => None,
    }
}

fn skip(op: &Operation) {
    log::debug!("skipping {} with bad operands", op);
}

/// Base transform for a page: maps default user space (`view_box`, y up) to
/// device pixels at `scale` (y down), applying `/Rotate`.
pub fn page_transform(view_box: [f64; 4], rotate: u16, scale: f64) -> Matrix {
    let [x0, y0, x1, y1] = view_box;
    let (w, h) = (x1 - x0, y1 - y0);
    // Move the box to the origin and flip y
    let flip = [1.0, 0.0, 0.0, -1.0, -x0, y1];
    let rotation = match rotate % 360 {
        90 => [0.0, 1.0, -1.0, 0.0, h, 0.0],
        180 => [-1.0, 0.0, 0.0, -1.0, w, h],
        270 => [0.0, -1.0, 1.0, 0.0, 0.0, w],
        _ => [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
    };
    let scaling = [scale, 0.0, 0.0, scale, 0.0, 0.0];
    concat(&concat(&flip, &rotation), &scaling)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::device::TestDevice;
    use crate::rendering::graphics_state::{Color, transform_point};

    fn xref() -> XRef {
        let pdf = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\nxref\n0 2\n0000000000 65535 f \n0000000009 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R >>\nstartxref\n45\n%%EOF\n";
        XRef::load(Arc::from(&pdf[..])).unwrap()
    }

    fn run(content: &str, resources: Dict) -> Vec<String> {
        let xref = xref();
        let device = TestDevice::new(100.0, 100.0);
        let mut ctx = RenderingContext::new(device, &xref, resources, [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        ctx.render_content(content.as_bytes()).unwrap();
        ctx.into_device().operations().to_vec()
    }

    #[test]
    fn test_fill_uses_fill_color() {
        let ops = run("1 0 0 rg 10 10 20 20 re f", Dict::default());
        assert!(ops.contains(&"rect(10,10,20,20)".to_string()));
        assert!(ops.contains(&"fill(NonZero, #ff0000ff)".to_string()));
    }

    #[test]
    fn test_stroke_uses_stroke_color_and_width() {
        let ops = run("0 0 1 RG 3 w 0 0 m 10 10 l S", Dict::default());
        assert!(ops.contains(&"stroke(#0000ffff, w=3)".to_string()));
    }

    #[test]
    fn test_clip_applied_after_paint() {
        let ops = run("0 0 10 10 re W n", Dict::default());
        let clip = ops.iter().position(|o| o == "clip(NonZero)").unwrap();
        assert_eq!(ops[clip + 1], "begin_path");
        assert!(!ops.iter().any(|o| o.starts_with("fill")));
    }

    #[test]
    fn test_save_restore_resets_transform() {
        let ops = run("q 2 0 0 2 0 0 cm Q", Dict::default());
        assert_eq!(ops.last().unwrap(), "transform([1.0, 0.0, 0.0, 1.0, 0.0, 0.0])");
    }

    #[test]
    fn test_bad_operands_are_skipped() {
        let ops = run("/X m 0 0 m 5 5 l S", Dict::default());
        assert_eq!(ops.iter().filter(|o| o.starts_with("move_to")).count(), 1);
        assert!(ops.iter().any(|o| o.starts_with("stroke")));
    }

    #[test]
    fn test_extgstate_alpha() {
        let mut gs = Dict::default();
        gs.insert("ca".into(), PDFObject::Number(0.5));
        gs.insert("LW".into(), PDFObject::Number(4.0));
        let mut states = Dict::default();
        states.insert("GS1".into(), PDFObject::Dictionary(gs));
        let mut resources = Dict::default();
        resources.insert("ExtGState".into(), PDFObject::Dictionary(states));

        let xref = xref();
        let device = TestDevice::new(10.0, 10.0);
        let mut ctx = RenderingContext::new(device, &xref, resources, [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        ctx.render_content(b"/GS1 gs 0 0 1 1 re f").unwrap();
        assert_eq!(ctx.current_state().fill_alpha, 0.5);
        assert_eq!(ctx.current_state().stroke_props.line_width, 4.0);
        assert!(ctx.device().operations().contains(&"fill(NonZero, #00000080)".to_string()));
    }

    #[test]
    fn test_form_xobject_nested_and_bounded() {
        // A form that draws a rect and then invokes itself
        let mut form_dict = Dict::default();
        form_dict.insert("Subtype".into(), PDFObject::Name("Form".into()));
        form_dict.insert(
            "BBox".into(),
            PDFObject::Array(vec![0.0, 0.0, 10.0, 10.0].into_iter().map(PDFObject::Number).collect()),
        );
        let form = PdfStream {
            dict: form_dict,
            data: Arc::from(&b"0 0 1 1 re f /F1 Do"[..]),
        };
        let mut xobjects = Dict::default();
        xobjects.insert("F1".into(), PDFObject::Stream(form));
        let mut resources = Dict::default();
        resources.insert("XObject".into(), PDFObject::Dictionary(xobjects));

        let ops = run("/F1 Do", resources);
        let fills = ops.iter().filter(|o| o.starts_with("fill")).count();
        assert_eq!(fills, MAX_FORM_DEPTH);
        let saves = ops.iter().filter(|o| *o == "save").count();
        let restores = ops.iter().filter(|o| *o == "restore").count();
        assert_eq!(saves, restores);
    }

    #[test]
    fn test_cmyk_and_color_space_ops() {
        let xref = xref();
        let device = TestDevice::new(10.0, 10.0);
        let mut ctx = RenderingContext::new(device, &xref, Dict::default(), [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        ctx.render_content(b"/DeviceCMYK cs 0 0 0 1 sc 0.2 0.4 0.6 RG").unwrap();
        assert_eq!(ctx.current_state().fill_color, Color::CMYK(0.0, 0.0, 0.0, 1.0));
        assert_eq!(ctx.current_state().stroke_color, Color::RGB(0.2, 0.4, 0.6));
    }

    #[test]
    fn test_page_transform_flips_and_rotates() {
        let m = page_transform([0.0, 0.0, 200.0, 100.0], 0, 2.0);
        assert_eq!(transform_point(&m, 0.0, 100.0), (0.0, 0.0));
        assert_eq!(transform_point(&m, 200.0, 0.0), (400.0, 200.0));

        // Rotated 90 degrees clockwise: the page becomes 100 wide, 200 tall
        let m = page_transform([0.0, 0.0, 200.0, 100.0], 90, 1.0);
        assert_eq!(transform_point(&m, 0.0, 100.0), (100.0, 0.0));
        assert_eq!(transform_point(&m, 0.0, 0.0), (0.0, 0.0));
        assert_eq!(transform_point(&m, 200.0, 0.0), (0.0, 200.0));
    }
}
