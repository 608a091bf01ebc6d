//! Row codec: record ⇄ wire row with a null bitmask.
//!
//! The bitmask has one bit per column of the externally supplied column
//! order, most significant bit first within each byte, contiguous across
//! byte boundaries and zero-padded to a whole byte. A set bit means the
//! column is null or absent from the record. The value list always has one
//! entry per column; null entries carry an empty placeholder.

use model::Record;

use crate::error::CodecError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireRow {
    pub null_mask: Vec<u8>,
    pub values: Vec<Vec<u8>>,
}

/// Number of bitmask bytes needed for `columns` columns
#[inline]
pub fn mask_len(columns: usize) -> usize {
    columns.div_ceil(8)
}

#[inline]
fn bit_is_set(mask: &[u8], index: usize) -> bool {
    mask[index / 8] & (0x80 >> (index % 8)) != 0
}

/// Encode a record in `columns` order
pub fn encode_row(record: &Record, columns: &[String]) -> WireRow {
    let mut null_mask = vec![0u8; mask_len(columns.len())];
    let mut values = Vec::with_capacity(columns.len());

    for (index, column) in columns.iter().enumerate() {
        match record.get(column) {
            Some(Some(value)) => values.push(value.clone()),
            Some(None) | None => {
                null_mask[index / 8] |= 0x80 >> (index % 8);
                values.push(Vec::new());
            }
        }
    }

    WireRow { null_mask, values }
}

/// Decode a wire row back into a record keyed by `columns`
///
/// Every column ends up in the record: null bits map to `None`, everything
/// else to its value, including empty values.
pub fn decode_row(columns: &[String], row: &WireRow) -> Result<Record, CodecError> {
    if row.values.len() != columns.len() {
        return Err(CodecError::ColumnCountMismatch {
            columns: columns.len(),
            values: row.values.len(),
        });
    }
    if row.null_mask.len() < mask_len(columns.len()) {
        return Err(CodecError::BitmaskTooShort {
            columns: columns.len(),
            bytes: row.null_mask.len(),
        });
    }

    Ok(columns
        .iter()
        .zip(&row.values)
        .enumerate()
        .map(|(index, (column, value))| {
            let value = if bit_is_set(&row.null_mask, index) {
                None
            } else {
                Some(value.clone())
            };
            (column.clone(), value)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_null_bitmask() {
        let record: Record = [
            ("not_null".to_string(), Some(b"4".to_vec())),
            ("null".to_string(), None),
        ]
        .into_iter()
        .collect();
        let order = columns(&["null", "this_columns_is_empty", "not_null"]);

        let row = encode_row(&record, &order);

        assert_eq!(row.null_mask, vec![0b1100_0000]);
        assert_eq!(row.values, vec![Vec::new(), Vec::new(), b"4".to_vec()]);
    }

    #[test]
    fn test_long_bitmask() {
        let order = columns(&["a", "b", "c", "d", "e", "f", "g", "h", "i"]);
        let mask: u16 = 0b1101_0000_1000_0000;
        let row = WireRow {
            null_mask: mask.to_be_bytes().to_vec(),
            values: vec![Vec::new(); 9],
        };

        let record = decode_row(&order, &row).unwrap();

        for null in ["a", "b", "d", "i"] {
            assert_eq!(record[null], None, "column {} should be null", null);
        }
        for empty in ["c", "e", "f", "g", "h"] {
            assert_eq!(record[empty], Some(Vec::new()), "column {} should be empty", empty);
        }
    }

    #[test]
    fn test_round_trip_keeps_empty_values() {
        let order = columns(&["id", "empty", "missing", "null", "blob"]);
        let record: Record = [
            ("id".to_string(), Some(b"1".to_vec())),
            ("empty".to_string(), Some(Vec::new())),
            ("null".to_string(), None),
            ("blob".to_string(), Some(vec![0, 255, 7])),
        ]
        .into_iter()
        .collect();

        let decoded = decode_row(&order, &encode_row(&record, &order)).unwrap();

        assert_eq!(decoded["id"], Some(b"1".to_vec()));
        assert_eq!(decoded["empty"], Some(Vec::new()));
        assert_eq!(decoded["missing"], None);
        assert_eq!(decoded["null"], None);
        assert_eq!(decoded["blob"], Some(vec![0, 255, 7]));
    }

    #[test]
    fn test_bits_cross_byte_boundary() {
        let order: Vec<String> = (0..10).map(|i| format!("c{}", i)).collect();
        let record: Record = order
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 8)
            .map(|(_, c)| (c.clone(), Some(b"v".to_vec())))
            .collect();

        let row = encode_row(&record, &order);
        assert_eq!(row.null_mask, vec![0x00, 0b1000_0000]);
    }

    #[test]
    fn test_value_count_mismatch() {
        let order = columns(&["a", "b"]);
        let row = WireRow {
            null_mask: vec![0],
            values: vec![Vec::new()],
        };
        assert!(matches!(
            decode_row(&order, &row),
            Err(CodecError::ColumnCountMismatch { columns: 2, values: 1 })
        ));
    }

    #[test]
    fn test_short_bitmask() {
        let order: Vec<String> = (0..9).map(|i| format!("c{}", i)).collect();
        let row = WireRow {
            null_mask: vec![0],
            values: vec![Vec::new(); 9],
        };
        assert!(matches!(decode_row(&order, &row), Err(CodecError::BitmaskTooShort { .. })));
    }
}
