//! Time-tagged bundles
//!
//! A [`Bundle`] is a shared handle: cloning it shares the element list, the
//! same way a message can be attached to several bundles through an
//! `Arc<Message>`. Nesting is checked so the element graph stays acyclic.

use std::fmt;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::RwLock;

use super::message::Message;
use super::{is_bundle, read_u32, BUNDLE_MARKER};
use crate::error::{OscError, Result};
use crate::types::Timetag;

/// Size of the marker plus the timetag
const BUNDLE_HEADER_SIZE: usize = 16;

/// One element of a bundle
#[derive(Debug, Clone)]
pub enum BundleElement {
    Message { path: String, message: Arc<Message> },
    Bundle(Bundle),
}

#[derive(Debug)]
struct BundleInner {
    timetag: Timetag,
    elements: Vec<BundleElement>,
}

/// Shared handle to a bundle
#[derive(Clone)]
pub struct Bundle {
    inner: Arc<RwLock<BundleInner>>,
}

impl Bundle {
    pub fn new(timetag: Timetag) -> Self {
        Self {
            inner: Arc::new(RwLock::new(BundleInner {
                timetag,
                elements: Vec::new(),
            })),
        }
    }

    pub fn timetag(&self) -> Timetag {
        self.inner.read().timetag
    }

    pub fn set_timetag(&self, timetag: Timetag) {
        self.inner.write().timetag = timetag;
    }

    /// Number of direct elements
    pub fn count(&self) -> usize {
        self.inner.read().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn element(&self, index: usize) -> Option<BundleElement> {
        self.inner.read().elements.get(index).cloned()
    }

    /// Snapshot of the direct elements
    pub fn elements(&self) -> Vec<BundleElement> {
        self.inner.read().elements.clone()
    }

    /// Whether both handles refer to the same bundle
    pub fn ptr_eq(&self, other: &Bundle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Appends a message to be delivered to `path`
    pub fn add_message(&self, path: &str, message: impl Into<Arc<Message>>) -> Result<()> {
        if path.is_empty() {
            return Err(OscError::InvalidPath("empty path".into()));
        }
        self.inner.write().elements.push(BundleElement::Message {
            path: path.to_string(),
            message: message.into(),
        });
        Ok(())
    }

    /// Nests `child` inside this bundle.
    ///
    /// Fails with [`OscError::CircularBundle`] if `child` is this bundle or
    /// already contains it. The element list is left as it was on failure.
    pub fn add_bundle(&self, child: &Bundle) -> Result<()> {
        if self.ptr_eq(child) {
            return Err(OscError::CircularBundle);
        }

        self.inner
            .write()
            .elements
            .push(BundleElement::Bundle(child.clone()));

        if self.has_cycle() {
            let mut inner = self.inner.write();
            let appended = inner
                .elements
                .iter()
                .rposition(|e| matches!(e, BundleElement::Bundle(b) if b.ptr_eq(child)));
            if let Some(pos) = appended {
                inner.elements.remove(pos);
            }
            return Err(OscError::CircularBundle);
        }
        Ok(())
    }

    fn has_cycle(&self) -> bool {
        let mut on_path = Vec::new();
        self.walk_for_cycle(&mut on_path)
    }

    fn walk_for_cycle(&self, on_path: &mut Vec<*const RwLock<BundleInner>>) -> bool {
        let id = Arc::as_ptr(&self.inner);
        if on_path.contains(&id) {
            return true;
        }
        on_path.push(id);
        let children: Vec<Bundle> = self
            .inner
            .read()
            .elements
            .iter()
            .filter_map(|e| match e {
                BundleElement::Bundle(b) => Some(b.clone()),
                BundleElement::Message { .. } => None,
            })
            .collect();
        let found = children.iter().any(|c| c.walk_for_cycle(on_path));
        on_path.pop();
        found
    }

    /// Serialized length in bytes
    pub fn length(&self) -> usize {
        let elements = self.elements();
        BUNDLE_HEADER_SIZE
            + elements
                .iter()
                .map(|e| {
                    4 + match e {
                        BundleElement::Message { path, message } => message.length(path),
                        BundleElement::Bundle(b) => b.length(),
                    }
                })
                .sum::<usize>()
    }

    pub fn serialize(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.length());
        self.serialize_into(&mut buf)?;
        Ok(buf.freeze())
    }

    pub fn serialize_into(&self, buf: &mut BytesMut) -> Result<()> {
        let (timetag, elements) = {
            let inner = self.inner.read();
            (inner.timetag, inner.elements.clone())
        };
        buf.put_slice(BUNDLE_MARKER);
        buf.put_slice(&timetag.to_bytes());
        for element in &elements {
            match element {
                BundleElement::Message { path, message } => {
                    buf.put_u32(message.length(path) as u32);
                    message.serialize_into(path, buf)?;
                }
                BundleElement::Bundle(b) => {
                    buf.put_u32(b.length() as u32);
                    b.serialize_into(buf)?;
                }
            }
        }
        Ok(())
    }

    /// Validates and decodes a bundle tree.
    ///
    /// Every contained message gets the timetag of its innermost bundle.
    pub fn deserialize(data: &[u8]) -> Result<Bundle> {
        validate_bundle(data)?;
        Self::parse(data)
    }

    fn parse(data: &[u8]) -> Result<Bundle> {
        let mut tt = [0u8; 8];
        tt.copy_from_slice(&data[8..BUNDLE_HEADER_SIZE]);
        let timetag = Timetag::from_bytes(tt);
        let bundle = Bundle::new(timetag);

        let mut elements = Vec::new();
        let mut pos = BUNDLE_HEADER_SIZE;
        while pos + 4 <= data.len() {
            let len = read_u32(&data[pos..]) as usize;
            pos += 4;
            let elem = &data[pos..pos + len];
            pos += len;
            if is_bundle(elem) {
                elements.push(BundleElement::Bundle(Self::parse(elem)?));
            } else {
                let (path, mut message) = Message::decode(elem)?;
                message.set_timetag(timetag);
                elements.push(BundleElement::Message {
                    path,
                    message: Arc::new(message),
                });
            }
        }
        bundle.inner.write().elements = elements;
        Ok(bundle)
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        writeln!(f, "{}bundle({}):", pad, self.timetag())?;
        for element in self.elements() {
            match element {
                BundleElement::Message { path, message } => {
                    writeln!(f, "{}  {} {}", pad, path, message)?;
                }
                BundleElement::Bundle(b) => b.fmt_indented(f, depth + 1)?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Bundle")
            .field("timetag", &inner.timetag)
            .field("elements", &inner.elements)
            .finish()
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

/// Validates the framing of a serialized bundle, recursing into nested
/// bundles.
///
/// Checks the marker, the presence of a timetag and that every declared
/// element length fits the remaining buffer with nothing left over.
/// Returns the total size on success.
pub fn validate_bundle(data: &[u8]) -> Result<usize> {
    if data.len() < BUNDLE_MARKER.len() {
        return Err(OscError::SizeMismatch("bundle shorter than its marker".into()));
    }
    if !is_bundle(data) {
        return Err(OscError::InvalidBundle("missing #bundle marker".into()));
    }
    if data.len() < BUNDLE_HEADER_SIZE {
        return Err(OscError::SizeMismatch("bundle timetag truncated".into()));
    }

    let mut rest = &data[BUNDLE_HEADER_SIZE..];
    while rest.len() >= 4 {
        let len = read_u32(rest) as usize;
        rest = &rest[4..];
        if len > rest.len() {
            return Err(OscError::SizeMismatch(format!(
                "element declares {} bytes, {} available",
                len,
                rest.len()
            )));
        }
        let elem = &rest[..len];
        if is_bundle(elem) {
            validate_bundle(elem)?;
        }
        rest = &rest[len..];
    }
    if !rest.is_empty() {
        return Err(OscError::SizeMismatch(format!(
            "{} trailing bytes after last element",
            rest.len()
        )));
    }
    Ok(data.len())
}
