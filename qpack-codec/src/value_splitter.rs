//! Splitting of field values before encoding.
//!
//! A value containing NUL bytes is sent as one field line per NUL-separated
//! piece, which the peer joins again. With cookie crumbling enabled a
//! `cookie` value is also split into its `; `-separated crumbs (RFC 9114
//! Section 4.2.1) so that each crumb can be indexed on its own.

/// Iterator over the pieces of a field value.
#[derive(Debug, Clone)]
pub struct ValueSplitter<'a> {
    rest: Option<&'a [u8]>,
    separator: u8,
    strip_leading_space: bool,
}

impl<'a> ValueSplitter<'a> {
    pub fn new(name: &[u8], value: &'a [u8], cookie_crumbling: bool) -> Self {
        let is_cookie = cookie_crumbling && name == b"cookie";
        Self {
            rest: Some(value),
            separator: if is_cookie { b';' } else { 0 },
            strip_leading_space: is_cookie,
        }
    }
}

impl<'a> Iterator for ValueSplitter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let rest = self.rest?;
        match rest.iter().position(|&b| b == self.separator) {
            Some(pos) => {
                let mut next = &rest[pos + 1..];
                if self.strip_leading_space {
                    if let Some(stripped) = next.strip_prefix(b" ") {
                        next = stripped;
                    }
                }
                self.rest = Some(next);
                Some(&rest[..pos])
            }
            None => {
                self.rest = None;
                Some(rest)
            }
        }
    }
}

/// Splits `value` into the pieces that are encoded as separate field lines.
pub fn split_value<'a>(
    name: &[u8],
    value: &'a [u8],
    cookie_crumbling: bool,
) -> impl Iterator<Item = &'a [u8]> {
    ValueSplitter::new(name, value, cookie_crumbling)
        .flat_map(|piece| ValueSplitter::new(b"", piece, false))
}
