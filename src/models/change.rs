use crate::errors::GridResult;
use crate::store::Change;

use super::{FileRecord, from_document};

/// A file record change as seen through a watch scope. A side is `None`
/// when it does not exist or falls outside the scope.
#[derive(Clone, Debug, PartialEq)]
pub struct FileChange {
    pub old_val: Option<FileRecord>,
    pub new_val: Option<FileRecord>,
}

impl FileChange {
    pub(crate) fn from_change(change: Change) -> GridResult<Self> {
        Ok(Self {
            old_val: change.old_val.map(from_document).transpose()?,
            new_val: change.new_val.map(from_document).transpose()?,
        })
    }
}
