//! Collapse of a collective's outcome into the process-exit style code
//! exposed at the public boundary. Diagnostics stay in the error value.

use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    Success = 0,
    Failure = 1,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl<T> From<&Result<T>> for Status {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(_) => Status::Failure,
        }
    }
}

/// 0 on success, 1 on any failure.
pub fn code<T>(result: &Result<T>) -> i32 {
    Status::from(result).code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollectiveError;

    #[test]
    fn test_binary_codes() {
        let ok: Result<()> = Ok(());
        assert_eq!(code(&ok), 0);

        let failures: [Result<()>; 3] = [
            Err(CollectiveError::NoStrategy),
            Err(CollectiveError::InvalidGraph {
                graph: 0,
                rank: 1,
                prevs: 2,
            }),
            Err(CollectiveError::PartitionsFailed {
                failed: 1,
                total: 4,
                failures: Vec::new(),
            }),
        ];
        for r in &failures {
            assert_eq!(code(r), 1);
            assert_eq!(Status::from(r), Status::Failure);
        }
    }
}
