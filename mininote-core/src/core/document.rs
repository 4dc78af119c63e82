use super::error::{PDFError, PDFResult};
use super::page::{Inherited, Page, normalize_rect};
use super::parser::{Dict, ObjRef, PDFObject};
use super::stream::find_subslice;
use super::xref::XRef;
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// How far into the file the `%PDF-` header may appear.
const HEADER_SEARCH_WINDOW: usize = 1024;

/// Page trees deeper than this are treated as corrupt.
const MAX_TREE_DEPTH: usize = 64;

/// A parsed PDF document.
///
/// Opening a document reads the cross-reference data and flattens the page
/// tree. Object bodies (content streams, images) are fetched lazily through
/// the [`XRef`], which is safe to share between threads.
pub struct PDFDocument {
    bytes: Arc<[u8]>,
    version: String,
    xref: XRef,
    catalog: Dict,
    pages: Vec<Page>,
}

impl std::fmt::Debug for PDFDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PDFDocument")
            .field("len", &self.bytes.len())
            .field("version", &self.version)
            .field("pages", &self.pages.len())
            .finish()
    }
}

impl PDFDocument {
    /// Opens a PDF from an in-memory buffer.
    ///
    /// # Example
    /// ```no_run
    /// use mininote_core::core::PDFDocument;
    ///
    /// let data = std::fs::read("document.pdf").unwrap();
    /// let doc = PDFDocument::open(data).unwrap();
    /// println!("{} pages", doc.page_count());
    /// ```
    pub fn open(bytes: impl Into<Arc<[u8]>>) -> PDFResult<Self> {
        let bytes: Arc<[u8]> = bytes.into();
        let version = parse_header(&bytes)?;
        let xref = XRef::load(Arc::clone(&bytes))?;

        let catalog = match xref.get(xref.trailer(), "Root")? {
            Some(PDFObject::Dictionary(dict)) => dict,
            Some(other) => {
                return Err(PDFError::Structure(format!("catalog is not a dictionary: {:?}", other)));
            }
            None => return Err(PDFError::Structure("missing document catalog".into())),
        };

        let pages = collect_pages(&xref, &catalog)?;
        log::debug!(
            "opened PDF {} with {} pages ({} objects{})",
            version,
            pages.len(),
            xref.len(),
            if xref.is_reconstructed() { ", reconstructed xref" } else { "" }
        );

        Ok(PDFDocument {
            bytes,
            version,
            xref,
            catalog,
            pages,
        })
    }

    /// The original file bytes, exactly as passed to [`PDFDocument::open`].
    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    /// Version from the header, e.g. `"1.7"`.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn xref(&self) -> &XRef {
        &self.xref
    }

    pub fn catalog(&self) -> &Dict {
        &self.catalog
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }
}

fn parse_header(bytes: &[u8]) -> PDFResult<String> {
    let window = &bytes[..bytes.len().min(HEADER_SEARCH_WINDOW)];
    let at = find_subslice(window, b"%PDF-").ok_or(PDFError::MissingHeader)?;
    let version: String = bytes[at + 5..]
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|&b| b as char)
        .collect();
    if version.is_empty() {
        return Err(PDFError::MissingHeader);
    }
    Ok(version)
}

fn rect_of(xref: &XRef, dict: &Dict, key: &str) -> PDFResult<Option<[f64; 4]>> {
    let Some(value) = xref.get(dict, key)? else {
        return Ok(None);
    };
    let Some(array) = value.as_array() else {
        return Ok(None);
    };
    let mut numbers = Vec::with_capacity(4);
    for item in array {
        match xref.resolve(item)?.as_number() {
            Some(n) => numbers.push(n),
            None => return Ok(None),
        }
    }
    Ok(normalize_rect(&numbers))
}

/// Overlays the attributes a node defines on top of what it inherited.
fn inherit(xref: &XRef, node: &Dict, parent: &Inherited) -> PDFResult<Inherited> {
    let mut next = parent.clone();
    if let Some(rect) = rect_of(xref, node, "MediaBox")? {
        next.media_box = Some(rect);
    }
    if let Some(rect) = rect_of(xref, node, "CropBox")? {
        next.crop_box = Some(rect);
    }
    if let Some(PDFObject::Dictionary(resources)) = xref.get(node, "Resources")? {
        next.resources = Some(resources);
    }
    if let Some(rotate) = xref.get(node, "Rotate")?.as_ref().and_then(PDFObject::as_i64) {
        next.rotate = Some(rotate);
    }
    Ok(next)
}

/// Flattens the page tree depth-first, in document order.
fn collect_pages(xref: &XRef, catalog: &Dict) -> PDFResult<Vec<Page>> {
    let root_ref = catalog.get("Pages").and_then(PDFObject::as_reference);
    let root = match xref.get(catalog, "Pages")? {
        Some(PDFObject::Dictionary(dict)) => dict,
        _ => return Err(PDFError::Structure("catalog has no /Pages dictionary".into())),
    };

    let mut pages = Vec::new();
    let mut visited: FxHashSet<ObjRef> = FxHashSet::default();
    if let Some(r) = root_ref {
        visited.insert(r);
    }

    // Explicit stack of (node, its reference, inherited attributes, depth).
    // Children are pushed in reverse so they pop in order.
    let mut stack = vec![(root, root_ref, Inherited::default(), 0usize)];
    while let Some((node, node_ref, inherited, depth)) = stack.pop() {
        if depth > MAX_TREE_DEPTH {
            return Err(PDFError::Structure("page tree too deep".into()));
        }
        let attributes = inherit(xref, &node, &inherited)?;

        let is_leaf = match node.get("Type").and_then(PDFObject::as_name) {
            Some("Page") => true,
            Some("Pages") => false,
            _ => !node.contains_key("Kids"),
        };
        if is_leaf {
            pages.push(Page::new(pages.len(), node, node_ref, attributes));
            continue;
        }

        let kids = match xref.get(&node, "Kids")? {
            Some(PDFObject::Array(kids)) => kids,
            _ => {
                log::warn!("page tree node without /Kids array");
                continue;
            }
        };

        for kid in kids.iter().rev() {
            let kid_ref = kid.as_reference();
            if let Some(r) = kid_ref {
                if !visited.insert(r) {
                    return Err(PDFError::Structure(format!("page tree cycle at {}", r)));
                }
            }
            match xref.resolve(kid)? {
                PDFObject::Dictionary(dict) => {
                    stack.push((dict, kid_ref, attributes.clone(), depth + 1));
                }
                PDFObject::Null => log::warn!("skipping missing page tree node {:?}", kid_ref),
                other => {
                    return Err(PDFError::Structure(format!(
                        "page tree node is not a dictionary: {:?}",
                        other
                    )));
                }
            }
        }
    }

    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(objects: &[&str]) -> Vec<u8> {
        let mut out = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref_at = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for off in offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_at
            )
            .as_bytes(),
        );
        out
    }

    #[test]
    fn test_header_required() {
        assert!(matches!(
            PDFDocument::open(b"hello world".to_vec()),
            Err(PDFError::MissingHeader)
        ));
        assert_eq!(parse_header(b"garbage\n%PDF-1.6\n").unwrap(), "1.6");
    }

    #[test]
    fn test_nested_tree_inherits_attributes() {
        let pdf = build(&[
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 3 /MediaBox [0 0 200 100] /Rotate 90 >>",
            "<< /Type /Page /Parent 2 0 R >>",
            "<< /Type /Pages /Parent 2 0 R /Kids [5 0 R 6 0 R] /Count 2 /MediaBox [0 0 50 60] >>",
            "<< /Type /Page /Parent 4 0 R /Rotate 0 >>",
            "<< /Type /Page /Parent 4 0 R /CropBox [10 10 40 30] >>",
        ]);
        let doc = PDFDocument::open(pdf).unwrap();
        assert_eq!(doc.version(), "1.4");
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.page(0).unwrap().size(), (100.0, 200.0));
        assert_eq!(doc.page(1).unwrap().size(), (50.0, 60.0));
        assert_eq!(doc.page(2).unwrap().size(), (20.0, 30.0));
        assert_eq!(doc.page(2).unwrap().reference(), Some(ObjRef::new(6, 0)));
    }

    #[test]
    fn test_page_tree_cycle_is_rejected() {
        let pdf = build(&[
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R] >>",
            "<< /Type /Pages /Kids [2 0 R] >>",
        ]);
        assert!(matches!(PDFDocument::open(pdf), Err(PDFError::Structure(_))));
    }

    #[test]
    fn test_missing_catalog_pages() {
        let pdf = build(&["<< /Type /Catalog >>"]);
        assert!(PDFDocument::open(pdf).is_err());
    }
}
