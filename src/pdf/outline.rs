//! Embedded outline (bookmark) extraction.
//!
//! Walks the document catalog's `Outlines` tree, resolving each item's
//! destination to a 1-based page number. Destinations come in several
//! shapes: explicit arrays, references, action dictionaries (`A` → `D`),
//! and named destinations stored in either the `Names` name tree or the
//! legacy `Dests` dictionary.

use lopdf::{Document, Object, ObjectId};
use std::collections::{BTreeMap, HashMap};

/// One flattened outline entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineEntry {
    /// 1-based depth in the outline tree.
    pub level: usize,
    /// Decoded bookmark title.
    pub title: String,
    /// Resolved 1-based page number, when the destination resolves.
    pub page: Option<usize>,
}

/// Extract the embedded outline as a flat pre-order list with levels.
///
/// Returns an empty vector when the document has no outline or the
/// outline is malformed; that is a fall-through signal, not an error.
pub fn extract_outline(doc: &Document) -> Vec<OutlineEntry> {
    let mut entries = Vec::new();

    let named_dests = build_named_destinations(doc);

    let catalog = match doc.catalog() {
        Ok(c) => c,
        Err(_) => return entries,
    };

    let outlines_ref = match catalog.get(b"Outlines") {
        Ok(Object::Reference(r)) => *r,
        _ => return entries,
    };

    let outlines = match doc.get_dictionary(outlines_ref) {
        Ok(o) => o,
        Err(_) => return entries,
    };

    let first_ref = match outlines.get(b"First") {
        Ok(Object::Reference(r)) => *r,
        _ => return entries,
    };

    walk_siblings(doc, first_ref, 1, &named_dests, &mut entries);
    entries
}

/// Walk an outline sibling chain, recursing into children.
fn walk_siblings(
    doc: &Document,
    first: ObjectId,
    level: usize,
    named_dests: &HashMap<String, usize>,
    out: &mut Vec<OutlineEntry>,
) {
    // Bounded so a cyclic Next chain cannot loop forever.
    let mut visited = 0usize;
    let mut current = Some(first);

    while let Some(item_id) = current {
        visited += 1;
        if visited > 4096 {
            break;
        }

        let dict = match doc.get_dictionary(item_id) {
            Ok(d) => d,
            Err(_) => break,
        };

        if let Some(title) = dict.get(b"Title").ok().and_then(decode_pdf_string) {
            let page = resolve_item_page(doc, dict, named_dests);
            out.push(OutlineEntry { level, title, page });

            if let Ok(Object::Reference(child_ref)) = dict.get(b"First") {
                walk_siblings(doc, *child_ref, level + 1, named_dests, out);
            }
        }

        current = dict.get(b"Next").ok().and_then(|next| match next {
            Object::Reference(r) => Some(*r),
            _ => None,
        });
    }
}

/// Resolve an outline item's page through `Dest` or `A` → `D`.
fn resolve_item_page(
    doc: &Document,
    dict: &lopdf::Dictionary,
    named_dests: &HashMap<String, usize>,
) -> Option<usize> {
    if let Ok(dest) = dict.get(b"Dest") {
        if let Some(page) = resolve_dest(doc, dest, named_dests) {
            return Some(page);
        }
    }

    match dict.get(b"A") {
        Ok(Object::Reference(action_ref)) => doc
            .get_dictionary(*action_ref)
            .ok()
            .and_then(|action| action.get(b"D").ok())
            .and_then(|d| resolve_dest(doc, d, named_dests)),
        Ok(Object::Dictionary(action)) => action
            .get(b"D")
            .ok()
            .and_then(|d| resolve_dest(doc, d, named_dests)),
        _ => None,
    }
}

/// Resolve a destination object to a 1-based page number.
fn resolve_dest(
    doc: &Document,
    dest: &Object,
    named_dests: &HashMap<String, usize>,
) -> Option<usize> {
    match dest {
        Object::Array(arr) if !arr.is_empty() => {
            if let Object::Reference(page_ref) = &arr[0] {
                page_number_of(&doc.get_pages(), *page_ref)
            } else {
                None
            }
        }
        Object::Reference(ref_id) => doc
            .get_object(*ref_id)
            .ok()
            .and_then(|resolved| resolve_dest(doc, resolved, named_dests)),
        Object::Dictionary(dict) => dict
            .get(b"D")
            .ok()
            .and_then(|d| resolve_dest(doc, d, named_dests)),
        Object::String(bytes, _) | Object::Name(bytes) => {
            decode_text_bytes(bytes).and_then(|name| named_dests.get(&name).copied())
        }
        _ => None,
    }
}

/// Build the named-destination map from both the `Names` name tree and
/// the old-style `Dests` dictionary.
fn build_named_destinations(doc: &Document) -> HashMap<String, usize> {
    let mut named = HashMap::new();
    let pages = doc.get_pages();

    let catalog = match doc.catalog() {
        Ok(c) => c,
        Err(_) => return named,
    };

    if let Ok(Object::Reference(names_ref)) = catalog.get(b"Names") {
        if let Ok(names_dict) = doc.get_dictionary(*names_ref) {
            if let Ok(Object::Reference(dests_ref)) = names_dict.get(b"Dests") {
                collect_name_tree(doc, *dests_ref, &pages, &mut named);
            }
        }
    }

    if let Ok(Object::Reference(dests_ref)) = catalog.get(b"Dests") {
        if let Ok(dests_dict) = doc.get_dictionary(*dests_ref) {
            for (name, value) in dests_dict.iter() {
                if let Some(page) = resolve_plain_dest(doc, value, &pages) {
                    named.insert(String::from_utf8_lossy(name).to_string(), page);
                }
            }
        }
    }

    named
}

/// Recurse through a name tree node (leaf `Names` pairs or `Kids`).
fn collect_name_tree(
    doc: &Document,
    node_ref: ObjectId,
    pages: &BTreeMap<u32, ObjectId>,
    named: &mut HashMap<String, usize>,
) {
    let node = match doc.get_dictionary(node_ref) {
        Ok(n) => n,
        Err(_) => return,
    };

    if let Ok(Object::Array(names)) = node.get(b"Names") {
        let mut i = 0;
        while i + 1 < names.len() {
            let name = match &names[i] {
                Object::String(bytes, _) | Object::Name(bytes) => decode_text_bytes(bytes),
                _ => None,
            };
            if let Some(name) = name {
                if let Some(page) = resolve_plain_dest(doc, &names[i + 1], pages) {
                    named.insert(name, page);
                }
            }
            i += 2;
        }
    }

    if let Ok(Object::Array(kids)) = node.get(b"Kids") {
        for kid in kids {
            if let Object::Reference(kid_ref) = kid {
                collect_name_tree(doc, *kid_ref, pages, named);
            }
        }
    }
}

/// Resolve a destination without named-destination indirection.
fn resolve_plain_dest(
    doc: &Document,
    dest: &Object,
    pages: &BTreeMap<u32, ObjectId>,
) -> Option<usize> {
    match dest {
        Object::Array(arr) if !arr.is_empty() => {
            if let Object::Reference(page_ref) = &arr[0] {
                page_number_of(pages, *page_ref)
            } else {
                None
            }
        }
        Object::Reference(ref_id) => doc
            .get_object(*ref_id)
            .ok()
            .and_then(|resolved| resolve_plain_dest(doc, resolved, pages)),
        Object::Dictionary(dict) => dict
            .get(b"D")
            .ok()
            .and_then(|d| resolve_plain_dest(doc, d, pages)),
        _ => None,
    }
}

/// Look up a page object's 1-based number in the page map.
fn page_number_of(pages: &BTreeMap<u32, ObjectId>, page_ref: ObjectId) -> Option<usize> {
    pages
        .iter()
        .find(|&(_, &obj_id)| obj_id == page_ref)
        .map(|(&page_num, _)| page_num as usize)
}

/// Decode a PDF text string object (UTF-16BE with BOM, else Latin-ish bytes).
fn decode_pdf_string(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) | Object::Name(bytes) => decode_text_bytes(bytes),
        _ => None,
    }
}

fn decode_text_bytes(bytes: &[u8]) -> Option<String> {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let utf16: Vec<u16> = bytes[2..]
            .chunks(2)
            .filter_map(|chunk| {
                if chunk.len() == 2 {
                    Some(u16::from_be_bytes([chunk[0], chunk[1]]))
                } else {
                    None
                }
            })
            .collect();
        String::from_utf16(&utf16).ok().map(|s| s.trim().to_string())
    } else {
        let s = String::from_utf8_lossy(bytes).trim().to_string();
        if s.is_empty() { None } else { Some(s) }
    }
}
