//! Bound values carried by QUERY, EXECUTE and BATCH requests.
//!
//! Values are kept in their already-serialized CQL form. Turning Rust values
//! into CQL bytes is the job of a higher layer.

use std::borrow::Cow;

use bytes::BufMut;
use thiserror::Error;

use super::types::{self, RawValue};

/// An error returned when a value cannot be added to [`SerializedValues`].
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializeValuesError {
    /// More than `u16::MAX` values.
    #[error("Too many values to add, max 65,535 values can be sent in a request")]
    TooManyValues,

    /// Named and positional values were combined in one list.
    #[error("Mixing named and not named values is not allowed")]
    MixingNamedAndNotNamedValues,

    /// A single value is longer than an `[int]` length can express.
    #[error("Value too big to be sent in a request - max 2GiB allowed")]
    ValueTooBig,
}

/// A list of values bound to a statement, in wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializedValues {
    serialized_values: Vec<u8>,
    values_num: u16,
    contains_names: bool,
    contains_unset: bool,
}

impl SerializedValues {
    /// A const empty instance, useful for taking references.
    pub const EMPTY: &'static SerializedValues = &SerializedValues::new();

    pub const fn new() -> Self {
        SerializedValues {
            serialized_values: Vec::new(),
            values_num: 0,
            contains_names: false,
            contains_unset: false,
        }
    }

    /// Appends a positional value.
    pub fn add_value(&mut self, value: RawValue<'_>) -> Result<(), SerializeValuesError> {
        if self.contains_names {
            return Err(SerializeValuesError::MixingNamedAndNotNamedValues);
        }
        self.push(None, value)
    }

    /// Appends a value bound by marker name.
    pub fn add_named_value(
        &mut self,
        name: &str,
        value: RawValue<'_>,
    ) -> Result<(), SerializeValuesError> {
        if self.values_num > 0 && !self.contains_names {
            return Err(SerializeValuesError::MixingNamedAndNotNamedValues);
        }
        self.push(Some(name), value)?;
        self.contains_names = true;
        Ok(())
    }

    fn push(
        &mut self,
        name: Option<&str>,
        value: RawValue<'_>,
    ) -> Result<(), SerializeValuesError> {
        if self.values_num == u16::MAX {
            return Err(SerializeValuesError::TooManyValues);
        }

        let len_before = self.serialized_values.len();
        let res = name
            .map(|name| types::write_string(name, &mut self.serialized_values))
            .transpose()
            .and_then(|_| types::write_value(value, &mut self.serialized_values));
        if res.is_err() {
            self.serialized_values.truncate(len_before);
            return Err(SerializeValuesError::ValueTooBig);
        }

        if matches!(value, RawValue::Unset) {
            self.contains_unset = true;
        }
        self.values_num += 1;
        Ok(())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values_num == 0
    }

    #[inline]
    pub fn len(&self) -> u16 {
        self.values_num
    }

    #[inline]
    pub fn has_names(&self) -> bool {
        self.contains_names
    }

    /// Whether any value is "not set", which only protocol v4+ can express.
    #[inline]
    pub fn has_unset(&self) -> bool {
        self.contains_unset
    }

    /// Size of the values as written by [`write_to_request`](Self::write_to_request).
    pub fn buffer_size(&self) -> usize {
        std::mem::size_of::<u16>() + self.serialized_values.len()
    }

    /// Writes `[short n]` followed by the values.
    pub(crate) fn write_to_request(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.values_num);
        buf.put_slice(&self.serialized_values[..]);
    }

    /// Iterates over the values, skipping their names.
    pub fn iter(&self) -> impl Iterator<Item = RawValue<'_>> {
        let mut buf = &self.serialized_values[..];
        let contains_names = self.contains_names;
        (0..self.values_num).map_while(move |_| {
            if contains_names {
                types::read_string(&mut buf).ok()?;
            }
            types::read_value(&mut buf).ok()
        })
    }
}

impl From<SerializedValues> for Cow<'_, SerializedValues> {
    fn from(values: SerializedValues) -> Self {
        Cow::Owned(values)
    }
}

impl<'a> From<&'a SerializedValues> for Cow<'a, SerializedValues> {
    fn from(values: &'a SerializedValues) -> Self {
        Cow::Borrowed(values)
    }
}

#[cfg(test)]
mod tests {
    use super::{SerializeValuesError, SerializedValues};
    use crate::frame::types::RawValue;

    #[test]
    fn positional_values_layout() {
        let mut values = SerializedValues::new();
        values.add_value(RawValue::Value(&[0, 0, 0, 7])).unwrap();
        values.add_value(RawValue::Null).unwrap();

        let mut buf = Vec::new();
        values.write_to_request(&mut buf);
        assert_eq!(
            buf,
            [0, 2, 0, 0, 0, 4, 0, 0, 0, 7, 0xff, 0xff, 0xff, 0xff]
        );
        assert_eq!(buf.len(), values.buffer_size());
        assert_eq!(
            values.iter().collect::<Vec<_>>(),
            [RawValue::Value(&[0, 0, 0, 7]), RawValue::Null]
        );
    }

    #[test]
    fn named_values_cannot_be_mixed() {
        let mut values = SerializedValues::new();
        values.add_named_value("a", RawValue::Null).unwrap();
        assert_eq!(
            values.add_value(RawValue::Null),
            Err(SerializeValuesError::MixingNamedAndNotNamedValues)
        );

        let mut values = SerializedValues::new();
        values.add_value(RawValue::Null).unwrap();
        assert_eq!(
            values.add_named_value("a", RawValue::Null),
            Err(SerializeValuesError::MixingNamedAndNotNamedValues)
        );
    }

    #[test]
    fn rejected_named_value_leaves_the_list_unnamed() {
        let mut values = SerializedValues::new();
        let long_name = "n".repeat(usize::from(u16::MAX) + 1);
        assert_eq!(
            values.add_named_value(&long_name, RawValue::Null),
            Err(SerializeValuesError::ValueTooBig)
        );
        assert!(values.is_empty());
        assert!(!values.has_names());

        values.add_value(RawValue::Null).unwrap();
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn unset_is_tracked() {
        let mut values = SerializedValues::new();
        values.add_value(RawValue::Value(b"x")).unwrap();
        assert!(!values.has_unset());
        values.add_value(RawValue::Unset).unwrap();
        assert!(values.has_unset());
        assert_eq!(values.len(), 2);
    }
}
