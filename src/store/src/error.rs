use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("row limit of {max_rows} reached")]
    CapacityExceeded { max_rows: usize },
}
