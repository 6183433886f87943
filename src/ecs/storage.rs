//! Structure-of-Arrays Component Storage
//!
//! Each component type in an archetype owns one [`Column`] per field. A
//! column is a flat typed `Vec`, so iterating one or two fields walks a
//! contiguous byte range. The typed-span accessors are the performance
//! path; the scalar get/set pair (which goes through `f64`) is the
//! convenience path used by migration and the row view.

use std::sync::Arc;

use crate::ecs::component::{ComponentDesc, ScalarType};
use crate::errors::{CathodeError, Result};

/// Default initial row capacity for a fresh column set.
pub const DEFAULT_COLUMN_CAPACITY: usize = 256;

/// One typed field array.
#[derive(Debug)]
pub enum Column {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! column_dispatch {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            Column::I8($v) => $body,
            Column::U8($v) => $body,
            Column::I16($v) => $body,
            Column::U16($v) => $body,
            Column::I32($v) => $body,
            Column::U32($v) => $body,
            Column::F32($v) => $body,
            Column::F64($v) => $body,
        }
    };
}

impl Column {
    fn with_capacity(scalar: ScalarType, capacity: usize) -> Self {
        match scalar {
            ScalarType::I8 => Column::I8(Vec::with_capacity(capacity)),
            ScalarType::U8 => Column::U8(Vec::with_capacity(capacity)),
            ScalarType::I16 => Column::I16(Vec::with_capacity(capacity)),
            ScalarType::U16 => Column::U16(Vec::with_capacity(capacity)),
            ScalarType::I32 => Column::I32(Vec::with_capacity(capacity)),
            ScalarType::U32 => Column::U32(Vec::with_capacity(capacity)),
            ScalarType::F32 => Column::F32(Vec::with_capacity(capacity)),
            ScalarType::F64 => Column::F64(Vec::with_capacity(capacity)),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        column_dispatch!(self, v => v.len())
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, value: f64) {
        match self {
            Column::I8(v) => v.push(value as i8),
            Column::U8(v) => v.push(value as u8),
            Column::I16(v) => v.push(value as i16),
            Column::U16(v) => v.push(value as u16),
            Column::I32(v) => v.push(value as i32),
            Column::U32(v) => v.push(value as u32),
            Column::F32(v) => v.push(value as f32),
            Column::F64(v) => v.push(value),
        }
    }

    fn swap_remove(&mut self, index: usize) {
        column_dispatch!(self, v => { v.swap_remove(index); });
    }

    fn get(&self, index: usize) -> f64 {
        match self {
            Column::I8(v) => f64::from(v[index]),
            Column::U8(v) => f64::from(v[index]),
            Column::I16(v) => f64::from(v[index]),
            Column::U16(v) => f64::from(v[index]),
            Column::I32(v) => f64::from(v[index]),
            Column::U32(v) => f64::from(v[index]),
            Column::F32(v) => f64::from(v[index]),
            Column::F64(v) => v[index],
        }
    }

    fn set(&mut self, index: usize, value: f64) {
        match self {
            Column::I8(v) => v[index] = value as i8,
            Column::U8(v) => v[index] = value as u8,
            Column::I16(v) => v[index] = value as i16,
            Column::U16(v) => v[index] = value as u16,
            Column::I32(v) => v[index] = value as i32,
            Column::U32(v) => v[index] = value as u32,
            Column::F32(v) => v[index] = value as f32,
            Column::F64(v) => v[index] = value,
        }
    }
}

/// The SoA block for one component type within an archetype.
#[derive(Debug)]
pub struct ComponentColumns {
    desc: Arc<ComponentDesc>,
    columns: Vec<Column>,
    len: usize,
}

impl ComponentColumns {
    #[must_use]
    pub fn new(desc: Arc<ComponentDesc>) -> Self {
        Self::with_capacity(desc, DEFAULT_COLUMN_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(desc: Arc<ComponentDesc>, capacity: usize) -> Self {
        let columns = desc
            .fields
            .iter()
            .map(|f| Column::with_capacity(f.scalar, capacity))
            .collect();
        Self {
            desc,
            columns,
            len: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn desc(&self) -> &Arc<ComponentDesc> {
        &self.desc
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a row of schema defaults, returning its index.
    pub fn push_default(&mut self) -> usize {
        for (column, field) in self.columns.iter_mut().zip(&self.desc.fields) {
            column.push(field.default);
        }
        self.len += 1;
        self.len - 1
    }

    /// Removes `index` by overwriting it with the last row and popping.
    pub fn swap_remove(&mut self, index: usize) -> Result<()> {
        self.check_index(index)?;
        for column in &mut self.columns {
            column.swap_remove(index);
        }
        self.len -= 1;
        Ok(())
    }

    /// Scalar read through `f64`, by field position.
    pub fn get(&self, index: usize, field: usize) -> Result<f64> {
        self.check_index(index)?;
        Ok(self.columns[field].get(index))
    }

    /// Scalar write through `f64`, by field position.
    pub fn set(&mut self, index: usize, field: usize, value: f64) -> Result<()> {
        self.check_index(index)?;
        self.columns[field].set(index, value);
        Ok(())
    }

    /// Scalar write by field name.
    pub fn set_named(&mut self, index: usize, field: &str, value: f64) -> Result<()> {
        let fi = self.desc.require_field(field)?;
        self.set(index, fi, value)
    }

    /// Scalar read by field name.
    pub fn get_named(&self, index: usize, field: &str) -> Result<f64> {
        let fi = self.desc.require_field(field)?;
        self.get(index, fi)
    }

    /// Convenience row view: `(field name, value)` in schema order.
    pub fn row(&self, index: usize) -> Result<Vec<(Arc<str>, f64)>> {
        self.check_index(index)?;
        Ok(self
            .desc
            .fields
            .iter()
            .enumerate()
            .map(|(fi, f)| (Arc::clone(&f.name), self.columns[fi].get(index)))
            .collect())
    }

    // ── Typed direct-span accessors (the fast path) ──────────────────────

    /// Direct span of an `f32` field.
    pub fn f32_slice(&self, field: usize) -> Result<&[f32]> {
        match &self.columns[field] {
            Column::F32(v) => Ok(v),
            _ => Err(self.type_err(field, "f32")),
        }
    }

    /// Direct mutable span of an `f32` field.
    pub fn f32_slice_mut(&mut self, field: usize) -> Result<&mut [f32]> {
        match &mut self.columns[field] {
            Column::F32(v) => Ok(v),
            _ => Err(CathodeError::UnknownField {
                component: String::new(),
                field: "f32 view of non-f32 column".into(),
            }),
        }
    }

    /// Direct span of an `i32` field.
    pub fn i32_slice(&self, field: usize) -> Result<&[i32]> {
        match &self.columns[field] {
            Column::I32(v) => Ok(v),
            _ => Err(self.type_err(field, "i32")),
        }
    }

    /// Direct mutable span of an `i32` field.
    pub fn i32_slice_mut(&mut self, field: usize) -> Result<&mut [i32]> {
        match &mut self.columns[field] {
            Column::I32(v) => Ok(v),
            _ => Err(CathodeError::UnknownField {
                component: String::new(),
                field: "i32 view of non-i32 column".into(),
            }),
        }
    }

    /// Direct span of a `u8` field.
    pub fn u8_slice(&self, field: usize) -> Result<&[u8]> {
        match &self.columns[field] {
            Column::U8(v) => Ok(v),
            _ => Err(self.type_err(field, "u8")),
        }
    }

    /// Direct mutable span of a `u8` field.
    pub fn u8_slice_mut(&mut self, field: usize) -> Result<&mut [u8]> {
        match &mut self.columns[field] {
            Column::U8(v) => Ok(v),
            _ => Err(CathodeError::UnknownField {
                component: String::new(),
                field: "u8 view of non-u8 column".into(),
            }),
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.len {
            return Err(CathodeError::OutOfRange {
                context: "component row",
                index,
                len: self.len,
            });
        }
        Ok(())
    }

    fn type_err(&self, field: usize, wanted: &str) -> CathodeError {
        CathodeError::UnknownField {
            component: self.desc.name.to_string(),
            field: format!("{} (wanted {wanted} view)", self.desc.fields[field].name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::component::ComponentDesc;

    fn velocity_desc() -> Arc<ComponentDesc> {
        Arc::new(
            ComponentDesc::builder("Velocity")
                .field("vx", ScalarType::F32, 0.0)
                .field("vy", ScalarType::F32, 0.0)
                .field("flags", ScalarType::U8, 0.0)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn push_defaults_then_override() {
        let mut cols = ComponentColumns::new(velocity_desc());
        let i = cols.push_default();
        cols.set_named(i, "vx", 3.5).unwrap();
        assert_eq!(cols.get_named(i, "vx").unwrap(), 3.5);
        assert_eq!(cols.get_named(i, "vy").unwrap(), 0.0);
    }

    #[test]
    fn swap_remove_moves_last_row() {
        let mut cols = ComponentColumns::new(velocity_desc());
        for v in 0..4 {
            let i = cols.push_default();
            cols.set_named(i, "vx", f64::from(v)).unwrap();
        }
        cols.swap_remove(1).unwrap();
        assert_eq!(cols.len(), 3);
        // Row 3 (vx=3) moved into slot 1
        assert_eq!(cols.get_named(1, "vx").unwrap(), 3.0);
    }

    #[test]
    fn out_of_range_is_typed() {
        let cols = ComponentColumns::new(velocity_desc());
        assert!(matches!(
            cols.get(0, 0),
            Err(CathodeError::OutOfRange { .. })
        ));
    }

    #[test]
    fn unknown_field_is_typed() {
        let cols = ComponentColumns::new(velocity_desc());
        assert!(matches!(
            cols.desc().require_field("nope"),
            Err(CathodeError::UnknownField { .. })
        ));
    }

    #[test]
    fn typed_span_rejects_wrong_scalar() {
        let cols = ComponentColumns::new(velocity_desc());
        assert!(cols.i32_slice(0).is_err());
        assert!(cols.f32_slice(0).is_ok());
        assert!(cols.u8_slice(2).is_ok());
    }
}
