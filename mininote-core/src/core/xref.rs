use super::decode::{self, ImageCodec};
use super::error::{PDFError, PDFResult};
use super::lexer::{Lexer, Token};
use super::parser::{Dict, ObjRef, PDFObject, Parser, PdfStream};
use super::stream::{Stream, find_subslice, rfind_subslice};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::{Arc, OnceLock};

/// Nesting limit for fetches that trigger further fetches (object streams,
/// indirect stream lengths).
const MAX_FETCH_DEPTH: usize = 8;

/// Where an object lives in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    Free,
    /// Stored directly at a byte offset
    Uncompressed { offset: usize, generation: u32 },
    /// Stored inside an object stream
    Compressed { stream_num: u32, index: u32 },
}

/// One cross-reference section, as read from a table or an xref stream.
struct Section {
    entries: Vec<(u32, XRefEntry)>,
    trailer: Dict,
}

/// Cross-reference table and object cache.
///
/// `fetch` takes `&self`; caches sit behind mutexes so a parsed document can
/// be shared across rendering threads.
pub struct XRef {
    stream: Stream,
    entries: FxHashMap<u32, XRefEntry>,
    trailer: Dict,
    cache: Mutex<FxHashMap<ObjRef, PDFObject>>,
    object_streams: Mutex<FxHashMap<u32, Arc<Vec<(u32, PDFObject)>>>>,
    recovered: OnceLock<FxHashMap<u32, (usize, u32)>>,
    reconstructed: bool,
}

impl XRef {
    /// Reads the cross-reference chain starting at `startxref`, falling back
    /// to a full scan of the file when the chain is unusable.
    pub fn load(bytes: Arc<[u8]>) -> PDFResult<Self> {
        let mut xref = XRef {
            stream: Stream::new(bytes),
            entries: FxHashMap::default(),
            trailer: Dict::default(),
            cache: Mutex::new(FxHashMap::default()),
            object_streams: Mutex::new(FxHashMap::default()),
            recovered: OnceLock::new(),
            reconstructed: false,
        };

        match xref.read_chain() {
            Ok(()) if xref.trailer.contains_key("Root") => {}
            Ok(()) => {
                log::warn!("xref chain has no /Root, reconstructing");
                xref.reconstruct()?;
            }
            Err(e) => {
                log::warn!("xref chain unreadable ({}), reconstructing", e);
                xref.reconstruct()?;
            }
        }
        Ok(xref)
    }

    /// Whether the table came from scanning the file instead of its xref data.
    pub fn is_reconstructed(&self) -> bool {
        self.reconstructed
    }

    pub fn trailer(&self) -> &Dict {
        &self.trailer
    }

    /// Number of objects with a known location.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|e| !matches!(e, XRefEntry::Free))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry(&self, num: u32) -> Option<XRefEntry> {
        self.entries.get(&num).copied()
    }

    fn find_startxref(&self) -> PDFResult<usize> {
        let bytes = self.stream.slice(0, self.stream.end())?;
        let pos = rfind_subslice(bytes, b"startxref")
            .ok_or_else(|| PDFError::XRef("startxref not found".into()))?;
        let mut lexer = Lexer::new(self.stream.tail(pos + b"startxref".len())?);
        match lexer.next_token()? {
            Token::Number(n) if n >= 0.0 && (n as usize) < bytes.len() => Ok(n as usize),
            other => Err(PDFError::XRef(format!("bad startxref value {:?}", other))),
        }
    }

    fn read_chain(&mut self) -> PDFResult<()> {
        let mut pending = vec![self.find_startxref()?];
        let mut visited = FxHashSet::default();
        let mut first = true;

        while let Some(offset) = pending.pop() {
            if !visited.insert(offset) {
                log::warn!("xref /Prev loop at offset {}", offset);
                continue;
            }
            let section = self.read_section(offset)?;
            for (num, entry) in section.entries {
                self.entries.entry(num).or_insert(entry);
            }

            let prev = section.trailer.get("Prev").and_then(PDFObject::as_usize);
            let xref_stm = section.trailer.get("XRefStm").and_then(PDFObject::as_usize);
            if first {
                self.trailer = section.trailer;
                first = false;
            } else {
                for (key, value) in section.trailer {
                    if key != "Prev" && key != "XRefStm" {
                        self.trailer.entry(key).or_insert(value);
                    }
                }
            }

            // Popped last-in-first-out: the hybrid stream is read before /Prev.
            if let Some(prev) = prev {
                pending.push(prev);
            }
            if let Some(stm) = xref_stm {
                pending.push(stm);
            }
        }
        Ok(())
    }

    fn read_section(&self, offset: usize) -> PDFResult<Section> {
        let mut lexer = Lexer::new(self.stream.tail(offset)?);
        match lexer.next_token()? {
            Token::Command(cmd) if cmd == "xref" => self.read_table(lexer),
            Token::Number(_) => self.read_xref_stream(offset),
            other => Err(PDFError::XRef(format!(
                "expected xref section at {}, found {:?}",
                offset, other
            ))),
        }
    }

    fn read_table(&self, mut lexer: Lexer) -> PDFResult<Section> {
        let mut entries = Vec::new();
        loop {
            let start = match lexer.next_token()? {
                Token::Command(cmd) if cmd == "trailer" => break,
                Token::Number(n) if n >= 0.0 => n as u32,
                other => {
                    return Err(PDFError::XRef(format!("bad subsection header {:?}", other)));
                }
            };
            let count = match lexer.next_token()? {
                Token::Number(n) if n >= 0.0 => n as u32,
                other => return Err(PDFError::XRef(format!("bad subsection count {:?}", other))),
            };

            let mut subsection = Vec::with_capacity((count as usize).min(4096));
            for _ in 0..count {
                let offset = lexer.next_token()?;
                let generation = lexer.next_token()?;
                let kind = lexer.next_token()?;
                let entry = match (offset, generation, kind) {
                    (Token::Number(_), Token::Number(_), Token::Command(k)) if k == "f" => {
                        XRefEntry::Free
                    }
                    (Token::Number(o), Token::Number(g), Token::Command(k)) if k == "n" => {
                        XRefEntry::Uncompressed {
                            offset: o as usize,
                            generation: g as u32,
                        }
                    }
                    other => return Err(PDFError::XRef(format!("bad xref entry {:?}", other))),
                };
                subsection.push(entry);
            }

            // Some writers number the first subsection from 1 while still
            // listing the free head of object 0.
            let start = if start == 1 && subsection.first() == Some(&XRefEntry::Free) {
                0
            } else {
                start
            };
            entries.extend(
                subsection
                    .into_iter()
                    .enumerate()
                    .map(|(i, e)| (start + i as u32, e)),
            );
        }

        let mut parser = Parser::new(lexer)?;
        let trailer = match parser.get_object()? {
            PDFObject::Dictionary(dict) => dict,
            other => return Err(PDFError::XRef(format!("trailer is not a dictionary: {:?}", other))),
        };
        Ok(Section { entries, trailer })
    }

    fn read_xref_stream(&self, offset: usize) -> PDFResult<Section> {
        let (_, obj) = self.parse_indirect_at(offset, None, 0)?;
        let PDFObject::Stream(stream) = obj else {
            return Err(PDFError::XRef(format!("object at {} is not an xref stream", offset)));
        };
        if stream.dict.get("Type").and_then(PDFObject::as_name) != Some("XRef") {
            return Err(PDFError::XRef(format!("stream at {} is not /Type /XRef", offset)));
        }

        let widths: Vec<usize> = stream
            .dict
            .get("W")
            .and_then(PDFObject::as_array)
            .map(|w| w.iter().filter_map(PDFObject::as_usize).collect())
            .unwrap_or_default();
        if widths.len() != 3 || widths.iter().any(|&w| w > 8) {
            return Err(PDFError::XRef(format!("bad /W {:?}", widths)));
        }
        let size = stream.dict.get("Size").and_then(PDFObject::as_usize).unwrap_or(0);
        let index: Vec<usize> = match stream.dict.get("Index").and_then(PDFObject::as_array) {
            Some(items) => items.iter().filter_map(PDFObject::as_usize).collect(),
            None => vec![0, size],
        };

        let data = self.decode_stream(&stream)?;
        let row = widths.iter().sum::<usize>();
        if row == 0 {
            return Err(PDFError::XRef("xref stream with zero-width rows".into()));
        }
        let read_field = |bytes: &[u8]| bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));

        let mut entries = Vec::new();
        let mut rows = data.chunks_exact(row);
        for pair in index.chunks_exact(2) {
            let (start, count) = (pair[0], pair[1]);
            for i in 0..count {
                let Some(bytes) = rows.next() else {
                    log::warn!("xref stream at {} shorter than its /Index", offset);
                    break;
                };
                let (f1, rest) = bytes.split_at(widths[0]);
                let (f2, f3) = rest.split_at(widths[1]);
                let kind = if widths[0] == 0 { 1 } else { read_field(f1) };
                let (f2, f3) = (read_field(f2), read_field(f3));
                let entry = match kind {
                    0 => XRefEntry::Free,
                    1 => XRefEntry::Uncompressed {
                        offset: f2 as usize,
                        generation: f3 as u32,
                    },
                    2 => XRefEntry::Compressed {
                        stream_num: f2 as u32,
                        index: f3 as u32,
                    },
                    // unknown types are treated as null references
                    _ => XRefEntry::Free,
                };
                entries.push(((start + i) as u32, entry));
            }
        }

        Ok(Section {
            entries,
            trailer: stream.dict,
        })
    }

    /// Rebuilds the table by scanning the file for `N G obj` headers.
    fn reconstruct(&mut self) -> PDFResult<()> {
        let stream = self.stream.clone();
        let bytes = stream.slice(0, stream.end())?;
        let headers = scan_object_headers(bytes);
        if headers.is_empty() {
            return Err(PDFError::XRef("no objects found while reconstructing".into()));
        }

        self.entries.clear();
        for &(num, generation, offset) in &headers {
            // later definitions win, as with incremental updates
            self.entries
                .insert(num, XRefEntry::Uncompressed { offset, generation });
        }
        self.reconstructed = true;
        self.cache.lock().clear();

        // Prefer the last trailer dictionary that names a root.
        let mut trailer = None;
        let mut search_from = 0;
        while let Some(pos) = find_subslice(&bytes[search_from..], b"trailer") {
            let at = search_from + pos + b"trailer".len();
            search_from = at;
            let Ok(mut parser) = Parser::new(Lexer::new(stream.tail(at)?)) else {
                continue;
            };
            if let Ok(PDFObject::Dictionary(dict)) = parser.get_object() {
                if dict.contains_key("Root") {
                    trailer = Some(dict);
                }
            }
        }

        // Cross-reference streams carry the trailer keys too, and their
        // compressed entries are still valid.
        for &(num, generation, offset) in &headers {
            let Ok((_, PDFObject::Stream(stream))) =
                self.parse_indirect_at(offset, Some(ObjRef::new(num, generation)), 0)
            else {
                continue;
            };
            match stream.dict.get("Type").and_then(PDFObject::as_name) {
                Some("XRef") => {
                    if let Ok(section) = self.read_xref_stream(offset) {
                        for (n, entry) in section.entries {
                            if matches!(entry, XRefEntry::Compressed { .. }) {
                                self.entries.entry(n).or_insert(entry);
                            }
                        }
                        if trailer.is_none() && section.trailer.contains_key("Root") {
                            trailer = Some(section.trailer);
                        }
                    }
                }
                Some("ObjStm") => {
                    if let Ok(objects) = self.parse_object_stream(&stream, 0) {
                        for (index, (n, _)) in objects.iter().enumerate() {
                            self.entries.entry(*n).or_insert(XRefEntry::Compressed {
                                stream_num: num,
                                index: index as u32,
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        let mut trailer = trailer.unwrap_or_default();
        if !trailer.contains_key("Root") {
            let catalog = headers.iter().rev().find(|&&(num, generation, offset)| {
                matches!(
                    self.parse_indirect_at(offset, Some(ObjRef::new(num, generation)), 0),
                    Ok((_, PDFObject::Dictionary(ref d)))
                        if d.get("Type").and_then(PDFObject::as_name) == Some("Catalog")
                )
            });
            match catalog {
                Some(&(num, generation, _)) => {
                    trailer.insert("Root".into(), PDFObject::Ref(ObjRef::new(num, generation)));
                }
                None => return Err(PDFError::XRef("no document catalog found".into())),
            }
        }
        self.trailer = trailer;
        Ok(())
    }

    /// Parses `N G obj <object>` at a byte offset.
    fn parse_indirect_at(
        &self,
        offset: usize,
        expected: Option<ObjRef>,
        depth: usize,
    ) -> PDFResult<(ObjRef, PDFObject)> {
        let resolver = |r: ObjRef| {
            self.fetch_at_depth(r, depth + 1)
                .ok()
                .and_then(|obj| obj.as_usize())
        };
        let lexer = Lexer::new(self.stream.tail(offset)?);
        let mut parser = Parser::new(lexer)?.with_length_resolver(&resolver);

        let num = parser.get_object()?;
        let generation = parser.get_object()?;
        let keyword = parser.get_object()?;
        let found = match (num.as_usize(), generation.as_usize(), keyword.is_command("obj")) {
            (Some(n), Some(g), true) => ObjRef::new(n as u32, g as u32),
            _ => {
                return Err(PDFError::syntax(offset, "expected 'N G obj' header"));
            }
        };
        if let Some(expected) = expected {
            if expected.num != found.num {
                return Err(PDFError::syntax(
                    offset,
                    format!("expected object {}, found {}", expected, found),
                ));
            }
        }
        let object = parser.get_object()?;
        Ok((found, object))
    }

    fn parse_object_stream(
        &self,
        stream: &PdfStream,
        depth: usize,
    ) -> PDFResult<Vec<(u32, PDFObject)>> {
        let count = stream.dict.get("N").and_then(PDFObject::as_usize).unwrap_or(0);
        let first = stream
            .dict
            .get("First")
            .and_then(PDFObject::as_usize)
            .ok_or_else(|| PDFError::Structure("object stream without /First".into()))?;
        let data = self.decode_stream_at_depth(stream, depth)?;
        let body = Stream::from_bytes(&data);

        let mut header = Lexer::new(body.clone());
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            match (header.next_token()?, header.next_token()?) {
                (Token::Number(num), Token::Number(off)) if num >= 0.0 && off >= 0.0 => {
                    offsets.push((num as u32, off as usize));
                }
                _ => break,
            }
        }

        let mut objects = Vec::with_capacity(offsets.len());
        for (num, off) in offsets {
            let mut parser = Parser::new(Lexer::new(body.tail(first + off)?))?;
            objects.push((num, parser.get_object()?));
        }
        Ok(objects)
    }

    fn recovered_offsets(&self) -> &FxHashMap<u32, (usize, u32)> {
        self.recovered.get_or_init(|| {
            let bytes = self.stream.slice(0, self.stream.end()).unwrap_or(&[]);
            scan_object_headers(bytes)
                .into_iter()
                .map(|(num, generation, offset)| (num, (offset, generation)))
                .collect()
        })
    }

    /// Fetches an indirect object.
    pub fn fetch(&self, r: ObjRef) -> PDFResult<PDFObject> {
        self.fetch_at_depth(r, 0)
    }

    fn fetch_at_depth(&self, r: ObjRef, depth: usize) -> PDFResult<PDFObject> {
        if depth > MAX_FETCH_DEPTH {
            return Err(PDFError::Structure(format!("reference chain too deep at {}", r)));
        }
        if let Some(obj) = self.cache.lock().get(&r) {
            return Ok(obj.clone());
        }

        let missing = PDFError::MissingObject {
            num: r.num,
            generation: r.generation,
        };
        let object = match self.entries.get(&r.num) {
            None | Some(XRefEntry::Free) => return Err(missing),
            Some(&XRefEntry::Uncompressed { offset, .. }) => {
                match self.parse_indirect_at(offset, Some(r), depth) {
                    Ok((_, obj)) => obj,
                    Err(e) => {
                        let Some(&(offset, _)) = self.recovered_offsets().get(&r.num) else {
                            return Err(e);
                        };
                        log::warn!("object {} not at its xref offset ({}), using scan", r, e);
                        self.parse_indirect_at(offset, Some(r), depth)?.1
                    }
                }
            }
            Some(&XRefEntry::Compressed { stream_num, index }) => {
                let objects = self.object_stream(stream_num, depth)?;
                let by_index = objects
                    .get(index as usize)
                    .filter(|(num, _)| *num == r.num);
                match by_index.or_else(|| objects.iter().find(|(num, _)| *num == r.num)) {
                    Some((_, obj)) => obj.clone(),
                    None => return Err(missing),
                }
            }
        };

        self.cache.lock().insert(r, object.clone());
        Ok(object)
    }

    fn object_stream(&self, num: u32, depth: usize) -> PDFResult<Arc<Vec<(u32, PDFObject)>>> {
        if let Some(objects) = self.object_streams.lock().get(&num) {
            return Ok(Arc::clone(objects));
        }
        let container = self.fetch_at_depth(ObjRef::new(num, 0), depth + 1)?;
        let PDFObject::Stream(stream) = container else {
            return Err(PDFError::Structure(format!("object {} is not an object stream", num)));
        };
        let objects = Arc::new(self.parse_object_stream(&stream, depth + 1)?);
        self.object_streams.lock().insert(num, Arc::clone(&objects));
        Ok(objects)
    }

    /// Resolves a reference; other objects are returned unchanged.
    ///
    /// Dangling references resolve to `null`.
    pub fn resolve(&self, obj: &PDFObject) -> PDFResult<PDFObject> {
        match obj {
            PDFObject::Ref(r) => match self.fetch(*r) {
                Ok(resolved) => Ok(resolved),
                Err(PDFError::MissingObject { .. }) => {
                    log::warn!("dangling reference {}", r);
                    Ok(PDFObject::Null)
                }
                Err(e) => Err(e),
            },
            other => Ok(other.clone()),
        }
    }

    /// Looks up `key` in `dict` and resolves it.
    pub fn get(&self, dict: &Dict, key: &str) -> PDFResult<Option<PDFObject>> {
        match dict.get(key) {
            Some(obj) => self.resolve(obj).map(|o| (!o.is_null()).then_some(o)),
            None => Ok(None),
        }
    }

    /// Resolves the top level of `/Filter` and `/DecodeParms`, and the
    /// entries of arrays.
    fn resolved_filter_entries(&self, dict: &Dict) -> PDFResult<(Option<PDFObject>, Option<PDFObject>)> {
        let deep = |key: &str| -> PDFResult<Option<PDFObject>> {
            let value = self.get(dict, key)?;
            Ok(match value {
                Some(PDFObject::Array(items)) => Some(PDFObject::Array(
                    items
                        .iter()
                        .map(|item| self.resolve(item))
                        .collect::<PDFResult<Vec<_>>>()?,
                )),
                other => other,
            })
        };
        let filter = deep("Filter")?.or(deep("F")?);
        let parms = deep("DecodeParms")?.or(deep("DP")?);
        Ok((filter, parms))
    }

    /// Decodes a stream's data through its filter chain.
    pub fn decode_stream(&self, stream: &PdfStream) -> PDFResult<Vec<u8>> {
        self.decode_stream_at_depth(stream, 0)
    }

    fn decode_stream_at_depth(&self, stream: &PdfStream, depth: usize) -> PDFResult<Vec<u8>> {
        if depth > MAX_FETCH_DEPTH {
            return Err(PDFError::Structure("stream nesting too deep".into()));
        }
        let (filter, parms) = self.resolved_filter_entries(&stream.dict)?;
        decode::decode_stream(&stream.data, filter.as_ref(), parms.as_ref())
    }

    /// Decodes an image stream, leaving a trailing image codec encoded.
    pub fn decode_image_stream(
        &self,
        stream: &PdfStream,
    ) -> PDFResult<(Vec<u8>, Option<ImageCodec>)> {
        let (filter, parms) = self.resolved_filter_entries(&stream.dict)?;
        decode::decode_until_image_codec(&stream.data, filter.as_ref(), parms.as_ref())
    }
}

/// Finds every `N G obj` header that starts a line (or follows whitespace).
fn scan_object_headers(bytes: &[u8]) -> Vec<(u32, u32, usize)> {
    fn digits(bytes: &[u8], mut i: usize) -> Option<(u64, usize)> {
        let start = i;
        let mut value = 0u64;
        while i < bytes.len() && bytes[i].is_ascii_digit() && i - start < 10 {
            value = value * 10 + u64::from(bytes[i] - b'0');
            i += 1;
        }
        (i > start).then_some((value, i))
    }
    fn spaces(bytes: &[u8], mut i: usize) -> Option<usize> {
        let start = i;
        while i < bytes.len() && Lexer::is_whitespace(bytes[i]) {
            i += 1;
        }
        (i > start).then_some(i)
    }

    let mut found = Vec::new();
    let mut pos = 0;
    while let Some(rel) = find_subslice(&bytes[pos..], b"obj") {
        let obj_at = pos + rel;
        pos = obj_at + 3;

        // Walk backwards over "N G " to the start of the header.
        let mut i = obj_at;
        let ws_end = i;
        while i > 0 && Lexer::is_whitespace(bytes[i - 1]) {
            i -= 1;
        }
        if i == ws_end {
            continue;
        }
        let gen_end = i;
        while i > 0 && bytes[i - 1].is_ascii_digit() {
            i -= 1;
        }
        if i == gen_end {
            continue;
        }
        let gen_start = i;
        while i > 0 && Lexer::is_whitespace(bytes[i - 1]) {
            i -= 1;
        }
        if i == gen_start {
            continue;
        }
        let num_end = i;
        while i > 0 && bytes[i - 1].is_ascii_digit() {
            i -= 1;
        }
        if i == num_end || (i > 0 && !Lexer::is_whitespace(bytes[i - 1])) {
            continue;
        }
        // `endobj` also ends in "obj"; the digit walk above rejects it, but
        // confirm the forward parse to be sure.
        let Some((num, after_num)) = digits(bytes, i) else { continue };
        let Some(after_ws) = spaces(bytes, after_num) else { continue };
        let Some((generation, after_gen)) = digits(bytes, after_ws) else { continue };
        if spaces(bytes, after_gen) != Some(obj_at) {
            continue;
        }
        if num > u64::from(u32::MAX) || generation > u64::from(u16::MAX) {
            continue;
        }
        found.push((num as u32, generation as u32, i));
    }
    found
}
