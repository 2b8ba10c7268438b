//! Digit-run scanning for the numeric forms inside RESP tokens.
//!
//! Both functions take the value span of a token (control byte and CRLF
//! already stripped) and parse the whole run. They never look past a
//! non-digit byte, so a malformed tail is reported rather than skipped.

use crate::buffer::ByteSequence;
use crate::error::ProtocolError;

/// Parses the length form used by bulk-string, array, map, set, push, and
/// verbatim headers.
///
/// Grammar: `-1` or a decimal with no leading zeros. Any other negative is
/// out of range, and a value that does not fit `i64` is an overflow.
pub fn prefixed_length(digits: &ByteSequence) -> Result<i64, ProtocolError> {
    let mut iter = digits.bytes_range(digits.start_index(), digits.end_index());
    let first = iter.next().ok_or(ProtocolError::InvalidIntegerDigit)?;

    if first == b'-' {
        // The only legal negative length is -1, the null marker.
        let mut value: i64 = 0;
        let mut count = 0usize;
        for b in iter {
            if !b.is_ascii_digit() {
                return Err(ProtocolError::InvalidIntegerDigit);
            }
            value = value * 10 - i64::from(b - b'0');
            count += 1;
            if count > 1 {
                return Err(ProtocolError::LengthOutOfRange(value));
            }
        }
        if count == 0 {
            return Err(ProtocolError::InvalidIntegerDigit);
        }
        return if value == -1 {
            Ok(-1)
        } else {
            Err(ProtocolError::LengthOutOfRange(value))
        };
    }

    if !first.is_ascii_digit() {
        return Err(ProtocolError::InvalidIntegerDigit);
    }
    if first == b'0' && digits.len() > 1 {
        return Err(ProtocolError::InvalidIntegerDigit);
    }

    let mut value = i64::from(first - b'0');
    for b in iter {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::InvalidIntegerDigit);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(i64::from(b - b'0')))
            .ok_or(ProtocolError::IntegerOverflow)?;
    }
    Ok(value)
}

/// Parses a signed 64-bit decimal as it appears in `:` integer tokens.
///
/// Accepts the full `i64` range including `i64::MIN`; rejects empty runs,
/// leading zeros, and values past the range.
pub fn signed_integer(digits: &ByteSequence) -> Result<i64, ProtocolError> {
    let mut iter = digits.bytes_range(digits.start_index(), digits.end_index());
    let mut first = iter.next().ok_or(ProtocolError::InvalidIntegerDigit)?;

    let negative = first == b'-';
    let digit_count = if negative {
        first = iter.next().ok_or(ProtocolError::InvalidIntegerDigit)?;
        digits.len() - 1
    } else {
        digits.len()
    };

    if !first.is_ascii_digit() {
        return Err(ProtocolError::InvalidIntegerDigit);
    }
    if first == b'0' && digit_count > 1 {
        return Err(ProtocolError::InvalidIntegerDigit);
    }

    // Accumulate negated so i64::MIN parses without overflow.
    let mut value = -i64::from(first - b'0');
    for b in iter {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::InvalidIntegerDigit);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_sub(i64::from(b - b'0')))
            .ok_or(ProtocolError::IntegerOverflow)?;
    }

    if negative {
        Ok(value)
    } else {
        value.checked_neg().ok_or(ProtocolError::IntegerOverflow)
    }
}
