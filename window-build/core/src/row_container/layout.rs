// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::sync::Arc;

use arrow::array::{ArrayRef, AsArray, PrimitiveArray};
use arrow::compute::kernels::arity::unary;
use arrow::compute::SortOptions;
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Float16Type, Float32Type, Float64Type, SchemaRef,
};
use arrow::record_batch::RecordBatch;
use arrow::row::{RowConverter, SortField};
use window_build_common::{assert_eq_or_internal_err, config_err, Result};

use crate::compare::CompareFlags;
use crate::window_build::InputChannels;

/// Describes how rows of a window build are laid out in memory.
///
/// Every row is encoded with the arrow row format into a single byte
/// string that compares, byte by byte, in the order given by the key
/// [`CompareFlags`]. The key columns are encoded first, partition keys
/// leading, followed by the remaining stored columns. Since the row
/// format concatenates column encodings, the encoding of the partition
/// keys alone is a byte prefix of the encoded row, so two rows belong to
/// the same partition iff their partition prefixes are equal. Nulls are
/// encoded as a sentinel and thus compare equal to each other.
///
/// Floating point key columns are made canonical before encoding, `-0.0`
/// becoming `0.0` and every NaN a single positive NaN, so that keys equal
/// under SQL comparison encode to equal bytes. Such columns are encoded a
/// second time, unchanged, after the keys so that decoding returns the
/// original values.
#[derive(Debug)]
pub struct RowLayout {
    /// Schema of the stored columns
    schema: SchemaRef,
    converter: RowConverter,
    /// `None` when there are no partition keys
    partition_converter: Option<RowConverter>,
    compare_flags: Vec<CompareFlags>,
    num_partition_keys: usize,
    /// Stored column of each encoded field
    field_columns: Vec<usize>,
    /// Encoded fields that are canonicalized float keys
    canonical_fields: Vec<usize>,
    /// Encoded field holding each stored column
    decode_positions: Vec<usize>,
}

impl RowLayout {
    /// Creates the layout for rows with the stored `schema`, ordered by the
    /// key columns of `channels` compared with `compare_flags`
    pub fn try_new(
        schema: SchemaRef,
        channels: &InputChannels,
        compare_flags: Vec<CompareFlags>,
    ) -> Result<Self> {
        let num_columns = schema.fields().len();
        if num_columns == 0 {
            return config_err!("A window build needs at least one input column");
        }
        assert_eq_or_internal_err!(
            channels.key_channels().len(),
            compare_flags.len(),
            "Every key column needs compare flags"
        );

        let key_channels = channels.key_channels();
        let canonical_fields = key_channels
            .iter()
            .enumerate()
            .filter(|(_, column)| schema.field(**column).data_type().is_floating())
            .map(|(position, _)| position)
            .collect::<Vec<_>>();

        let mut field_columns = key_channels.to_vec();
        let mut sort_options: Vec<SortOptions> =
            compare_flags.iter().map(CompareFlags::sort_options).collect();
        for column in 0..num_columns {
            if !key_channels.contains(&column)
                || schema.field(column).data_type().is_floating()
            {
                field_columns.push(column);
                sort_options.push(SortOptions::default());
            }
        }

        // the last encoding of a column is the one holding its original values
        let mut decode_positions = vec![0; num_columns];
        for (position, column) in field_columns.iter().enumerate() {
            decode_positions[*column] = position;
        }

        let sort_fields = field_columns
            .iter()
            .zip(sort_options)
            .map(|(column, options)| {
                SortField::new_with_options(
                    schema.field(*column).data_type().clone(),
                    options,
                )
            })
            .collect::<Vec<_>>();

        let num_partition_keys = channels.num_partition_keys();
        let partition_converter = if num_partition_keys > 0 {
            Some(RowConverter::new(sort_fields[..num_partition_keys].to_vec())?)
        } else {
            None
        };
        let converter = RowConverter::new(sort_fields)?;

        Ok(Self {
            schema,
            converter,
            partition_converter,
            compare_flags,
            num_partition_keys,
            field_columns,
            canonical_fields,
            decode_positions,
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn compare_flags(&self) -> &[CompareFlags] {
        &self.compare_flags
    }

    pub fn num_partition_keys(&self) -> usize {
        self.num_partition_keys
    }

    /// Encodes `columns`, given in stored order
    pub fn encode(&self, columns: &[ArrayRef]) -> Result<EncodedRows> {
        assert_eq_or_internal_err!(
            columns.len(),
            self.decode_positions.len(),
            "Unexpected number of columns to encode"
        );
        let mut fields = self
            .field_columns
            .iter()
            .map(|column| Arc::clone(&columns[*column]))
            .collect::<Vec<_>>();
        for position in &self.canonical_fields {
            fields[*position] = canonical_floats(&fields[*position]);
        }

        let rows = self.converter.convert_columns(&fields)?;
        let partition_rows = self
            .partition_converter
            .as_ref()
            .map(|converter| converter.convert_columns(&fields[..self.num_partition_keys]))
            .transpose()?;

        let num_rows = rows.num_rows();
        let mut encoded = EncodedRows::with_capacity(num_rows, rows.size());
        for (idx, row) in rows.iter().enumerate() {
            let partition_len = partition_rows
                .as_ref()
                .map_or(0, |partition| partition.row(idx).as_ref().len());
            debug_assert!(partition_len <= row.as_ref().len());
            encoded.push(row.as_ref(), partition_len);
        }
        Ok(encoded)
    }

    /// Decodes encoded rows back into columns in stored order
    pub fn decode<'a>(&self, rows: impl IntoIterator<Item = &'a [u8]>) -> Result<Vec<ArrayRef>> {
        let parser = self.converter.parser();
        let fields = self
            .converter
            .convert_rows(rows.into_iter().map(|row| parser.parse(row)))?;
        Ok(self
            .decode_positions
            .iter()
            .map(|position| Arc::clone(&fields[*position]))
            .collect())
    }

    /// Decodes encoded rows into a batch with the stored schema
    pub fn decode_batch<'a>(
        &self,
        rows: impl IntoIterator<Item = &'a [u8]>,
    ) -> Result<RecordBatch> {
        let columns = self.decode(rows)?;
        Ok(RecordBatch::try_new(Arc::clone(&self.schema), columns)?)
    }
}

/// Replaces `-0.0` with `0.0` and every NaN with the positive NaN of its
/// type, leaving nulls and other arrays untouched
fn canonical_floats(array: &ArrayRef) -> ArrayRef {
    match array.data_type() {
        DataType::Float16 => Arc::new(canonicalize::<Float16Type>(
            array.as_primitive(),
            <<Float16Type as ArrowPrimitiveType>::Native>::NAN,
        )),
        DataType::Float32 => {
            Arc::new(canonicalize::<Float32Type>(array.as_primitive(), f32::NAN))
        }
        DataType::Float64 => {
            Arc::new(canonicalize::<Float64Type>(array.as_primitive(), f64::NAN))
        }
        _ => Arc::clone(array),
    }
}

fn canonicalize<T: ArrowPrimitiveType>(
    array: &PrimitiveArray<T>,
    nan: T::Native,
) -> PrimitiveArray<T> {
    let zero = T::Native::default();
    unary::<T, _, T>(array, |value| {
        if value.partial_cmp(&value).is_none() {
            nan
        } else if value == zero {
            zero
        } else {
            value
        }
    })
}

/// A batch of rows in their encoded form, see [`RowLayout`]
#[derive(Debug, Default)]
pub struct EncodedRows {
    data: Vec<u8>,
    /// Start of each row in `data` plus the end of the last row
    offsets: Vec<usize>,
    partition_lens: Vec<usize>,
}

impl EncodedRows {
    fn with_capacity(num_rows: usize, num_bytes: usize) -> Self {
        let mut offsets = Vec::with_capacity(num_rows + 1);
        offsets.push(0);
        Self {
            data: Vec::with_capacity(num_bytes),
            offsets,
            partition_lens: Vec::with_capacity(num_rows),
        }
    }

    fn push(&mut self, row: &[u8], partition_len: usize) {
        self.data.extend_from_slice(row);
        self.offsets.push(self.data.len());
        self.partition_lens.push(partition_len);
    }

    pub fn num_rows(&self) -> usize {
        self.partition_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partition_lens.is_empty()
    }

    pub fn row(&self, idx: usize) -> &[u8] {
        &self.data[self.offsets[idx]..self.offsets[idx + 1]]
    }

    pub fn partition_len(&self, idx: usize) -> usize {
        self.partition_lens[idx]
    }

    /// The encoded partition keys of row `idx`
    pub fn partition_key(&self, idx: usize) -> &[u8] {
        let start = self.offsets[idx];
        &self.data[start..start + self.partition_lens[idx]]
    }

    /// Total encoded bytes of all rows
    pub fn num_bytes(&self) -> usize {
        self.data.len()
    }
}
