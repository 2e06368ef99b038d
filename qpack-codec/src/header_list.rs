//! Header fields and decoded header lists.

use std::fmt;

use bytes::Bytes;

use crate::dynamic_table::ENTRY_OVERHEAD;

/// An HTTP field line (name-value pair).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HeaderField {
    pub name: Bytes,
    pub value: Bytes,
}

impl HeaderField {
    /// Creates a new header field.
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size of this field for header list size accounting.
    ///
    /// Per RFC 9114 Section 4.2.2: name length + value length + 32
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + ENTRY_OVERHEAD
    }
}

impl fmt::Debug for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HeaderField({:?}: {:?})",
            String::from_utf8_lossy(&self.name),
            String::from_utf8_lossy(&self.value)
        )
    }
}

impl From<(&'static str, &'static str)> for HeaderField {
    fn from((name, value): (&'static str, &'static str)) -> Self {
        Self::new(name, value)
    }
}

/// A decoded header block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    fields: Vec<HeaderField>,
    uncompressed_size: usize,
    compressed_size: usize,
    size_limit_exceeded: bool,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: HeaderField) {
        self.uncompressed_size += field.size();
        self.fields.push(field);
    }

    pub fn fields(&self) -> &[HeaderField] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<HeaderField> {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderField> {
        self.fields.iter()
    }

    /// First value of the field named `name`.
    pub fn get(&self, name: &[u8]) -> Option<&Bytes> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Sum of the sizes of all fields.
    pub fn uncompressed_size(&self) -> usize {
        self.uncompressed_size
    }

    /// Size of the header block the list was decoded from.
    pub fn compressed_size(&self) -> usize {
        self.compressed_size
    }

    /// True if fields were dropped for exceeding the maximum header list size.
    pub fn header_list_size_limit_exceeded(&self) -> bool {
        self.size_limit_exceeded
    }
}

impl<'a> IntoIterator for &'a HeaderList {
    type Item = &'a HeaderField;
    type IntoIter = std::slice::Iter<'a, HeaderField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// Collects decoded fields into a [`HeaderList`] while enforcing a size limit.
///
/// Once the limit is exceeded, further fields are dropped but decoding goes
/// on so that the dynamic table state and acknowledgements stay in sync.
#[derive(Debug, Clone)]
pub struct DecodedHeadersAccumulator {
    list: HeaderList,
    max_header_list_size: usize,
    uncompressed_size: usize,
    limit_exceeded: bool,
}

impl DecodedHeadersAccumulator {
    pub fn new(max_header_list_size: usize) -> Self {
        Self {
            list: HeaderList::new(),
            max_header_list_size,
            uncompressed_size: 0,
            limit_exceeded: false,
        }
    }

    pub fn on_header_decoded(&mut self, name: Bytes, value: Bytes) {
        let field = HeaderField { name, value };
        self.uncompressed_size += field.size();
        if self.uncompressed_size > self.max_header_list_size {
            self.limit_exceeded = true;
        }
        if !self.limit_exceeded {
            self.list.push(field);
        }
    }

    /// True once the decoded fields outgrew `max_header_list_size`.
    pub fn header_list_size_limit_exceeded(&self) -> bool {
        self.limit_exceeded
    }

    /// Size of all decoded fields, including dropped ones.
    pub fn uncompressed_size(&self) -> usize {
        self.uncompressed_size
    }

    /// Finishes the list, recording the size of its header block.
    pub fn finish(mut self, compressed_size: usize) -> HeaderList {
        self.list.compressed_size = compressed_size;
        self.list.size_limit_exceeded = self.limit_exceeded;
        self.list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_field_size() {
        let field = HeaderField::new("name", "value");
        assert_eq!(field.size(), 4 + 5 + 32);
        let field: HeaderField = (":method", "GET").into();
        assert_eq!(&field.name[..], b":method");
    }

    #[test]
    fn test_header_list() {
        let mut list = HeaderList::new();
        list.push(HeaderField::new("foo", "bar"));
        list.push(HeaderField::new("foo", "baz"));
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(b"foo").map(|v| &v[..]), Some(&b"bar"[..]));
        assert_eq!(list.uncompressed_size(), 76);
        assert_eq!((&list).into_iter().count(), 2);
    }

    #[test]
    fn test_accumulator_limit() {
        let mut acc = DecodedHeadersAccumulator::new(80);
        acc.on_header_decoded(Bytes::from_static(b"foo"), Bytes::from_static(b"bar"));
        acc.on_header_decoded(Bytes::from_static(b"foo"), Bytes::from_static(b"baz"));
        assert!(!acc.header_list_size_limit_exceeded());
        acc.on_header_decoded(Bytes::from_static(b"a"), Bytes::from_static(b"b"));
        assert!(acc.header_list_size_limit_exceeded());
        // Later small fields are dropped too.
        acc.on_header_decoded(Bytes::new(), Bytes::new());
        assert_eq!(acc.uncompressed_size(), 76 + 34 + 32);

        let list = acc.finish(12);
        assert_eq!(list.len(), 2);
        assert_eq!(list.compressed_size(), 12);
        assert!(list.header_list_size_limit_exceeded());
    }
}
