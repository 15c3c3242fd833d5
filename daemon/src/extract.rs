//! Numeric field extraction from tool output
//!
//! The samplers depend on the exact text layout of `free -L` and `sar`, so the
//! position arithmetic for each layout lives behind [`FieldExtractor`]. A tool
//! that changes its format only needs a new extractor, not a new sampler.
//!
//! Two layouts are supported:
//!
//! - [`FixedColumn`]: one line made of N equally wide blocks, each starting with
//!   a short header token followed by a right-justified number.
//! - [`HeaderSearch`]: a header line containing a marker token with the value
//!   printed on the next line under that marker.

use tracing::warn;

use crate::error::{ExtractError, ExtractResult};

/// Number of equally wide blocks printed by `free -L`
pub const FREE_BLOCK_COUNT: usize = 4;

/// Longest `free -L` header token ("SwapUse", "MemFree", ...) plus one space
pub const FREE_HEADER_WIDTH: usize = 8 + 1;

/// Distance from the start of the `%idle` header to its value in `sar` output
pub const SAR_VALUE_OFFSET: usize = 2;

/// Width of the `%idle` value printed by `sar --dec=0`
pub const SAR_VALUE_WIDTH: usize = 3;

/// Parse a base-10 integer the way `strtol` does, minus its silent truncation.
///
/// Leading whitespace and a single sign are accepted. The rest of the input must
/// be digits and the value must fit in an `i32`; anything else is an error.
pub fn parse_int(text: &str) -> ExtractResult<i32> {
    let digits = text.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == '\x0b');
    digits
        .parse::<i32>()
        .map_err(|_| ExtractError::InvalidInteger { text: text.to_string() })
}

/// Locates one integer field inside captured command output
pub trait FieldExtractor {
    fn extract(&self, buffer: &str) -> ExtractResult<i32>;
}

/// Run an extractor, logging failures and degrading them to `0`.
///
/// Monitoring must keep going on malformed output, and a zero never raises a
/// false alarm on its own.
pub fn extract_or_zero(extractor: &dyn FieldExtractor, buffer: &str, source: &str) -> i32 {
    match extractor.extract(buffer) {
        Ok(value) => value,
        Err(err) => {
            warn!(
                source,
                error = %err,
                output = %buffer,
                "Failed to parse number from command output"
            );
            0
        }
    }
}

/// A number inside one of several equally wide blocks on a single line.
///
/// The block width is derived from the buffer length (minus the trailing
/// newline). The number starts at the first non-space character after the
/// header and stops one short of the end of the block, where the separator
/// between blocks sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedColumn {
    block: usize,
    blocks: usize,
    header_width: usize,
}

impl FixedColumn {
    /// Block `block` of a `free -L` style line
    pub fn new(block: usize) -> Self {
        Self::with_layout(block, FREE_BLOCK_COUNT, FREE_HEADER_WIDTH)
    }

    pub fn with_layout(block: usize, blocks: usize, header_width: usize) -> Self {
        Self { block, blocks: blocks.max(1), header_width }
    }

    pub fn block(&self) -> usize {
        self.block
    }
}

impl FieldExtractor for FixedColumn {
    fn extract(&self, buffer: &str) -> ExtractResult<i32> {
        let bytes = buffer.as_bytes();
        let block_width = bytes.len().saturating_sub(1) / self.blocks;
        let field_width = block_width
            .checked_sub(self.header_width)
            .filter(|width| *width > 0)
            .ok_or(ExtractError::BlockTooNarrow { width: block_width })?;

        let start = block_width * self.block + self.header_width;
        if start >= bytes.len() {
            return Err(ExtractError::OutOfBounds { offset: start, len: bytes.len() });
        }
        let end = (start + field_width).min(bytes.len());

        let skipped = bytes[start..end]
            .iter()
            .position(|&b| b != b' ')
            .ok_or(ExtractError::NoDigits)?;
        let number_start = start + skipped;
        let number_len = field_width - skipped - 1;

        let number = buffer
            .get(number_start..number_start + number_len)
            .ok_or(ExtractError::OutOfBounds { offset: number_start, len: bytes.len() })?;
        parse_int(number)
    }
}

/// A value printed on the second line, under a marker found on the first.
///
/// When the marker occurs more than once on the header line, the last
/// occurrence is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSearch {
    marker: String,
    value_offset: usize,
    value_width: usize,
}

impl HeaderSearch {
    /// The `sar --dec=0` layout: a 3-wide value two columns past the marker
    pub fn new(marker: impl Into<String>) -> Self {
        Self::with_layout(marker, SAR_VALUE_OFFSET, SAR_VALUE_WIDTH)
    }

    pub fn with_layout(marker: impl Into<String>, value_offset: usize, value_width: usize) -> Self {
        Self { marker: marker.into(), value_offset, value_width }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }
}

impl FieldExtractor for HeaderSearch {
    fn extract(&self, buffer: &str) -> ExtractResult<i32> {
        let newline = buffer.find('\n');
        let first_line = &buffer[..newline.unwrap_or(buffer.len())];

        let column = first_line
            .rfind(self.marker.as_str())
            .ok_or_else(|| ExtractError::MarkerNotFound { marker: self.marker.clone() })?;
        let second_line_start = newline.ok_or(ExtractError::MissingLine)? + 1;

        let offset = second_line_start + column + self.value_offset;
        let field = buffer
            .get(offset..offset + self.value_width)
            .ok_or(ExtractError::OutOfBounds { offset, len: buffer.len() })?;
        parse_int(field)
    }
}
