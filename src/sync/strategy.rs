//! Entry equivalence and deletion policies
//!
//! The strategies are a closed set selected by [`CompareStrategy`] and
//! dispatched by `match`.

use crate::config::{CompareStrategy, Pairing, RunMode, SyncArgs};
use crate::error::Result;
use crate::fs::{Entry, EntryFilter};
use crate::sync::{Operation, Tree};
use std::sync::Arc;

/// What happens to entries that exist only at the destination
#[derive(Debug, Clone)]
pub enum DeletePolicy {
    /// Leave them alone
    Keep,
    /// Delete them unless a delete-exclude pattern matches
    DeleteIfAbsent(EntryFilter),
}

/// Everything the comparator needs to classify a key
#[derive(Debug, Clone)]
pub struct ComparePolicy {
    mode: RunMode,
    pairing: Pairing,
    strategy: CompareStrategy,
    delete: DeletePolicy,
    exact_time: bool,
    src: Arc<Tree>,
    dst: Arc<Tree>,
}

impl ComparePolicy {
    /// Policy for a validated invocation
    pub fn new(args: &SyncArgs, src: Arc<Tree>, dst: Arc<Tree>) -> Result<Self> {
        let delete = if args.delete && args.mode == RunMode::Sync {
            DeletePolicy::DeleteIfAbsent(EntryFilter::exclude_only(&args.delete_exclude)?)
        } else {
            DeletePolicy::Keep
        };
        Ok(Self {
            mode: args.mode,
            pairing: args.pairing()?,
            strategy: args.strategy,
            delete,
            exact_time: dst.preserves_mtime(),
            src,
            dst,
        })
    }

    /// Direction of the transfer
    pub fn pairing(&self) -> Pairing {
        self.pairing
    }

    /// Operation emitted for keys that need to be transferred
    pub fn transfer_operation(&self) -> Operation {
        match self.pairing {
            Pairing::Upload => Operation::Upload,
            Pairing::Download => Operation::Download,
            Pairing::Copy => Operation::Copy,
        }
    }

    /// Are the two entries equivalent under the selected strategy?
    ///
    /// Plain copies never consider anything equivalent.
    pub fn both_sides_equal(&self, src: &Entry, dst: &Entry) -> Result<bool> {
        if self.mode == RunMode::Copy {
            return Ok(false);
        }
        match self.strategy {
            CompareStrategy::TimeSize => Ok(time_size_equal(src, dst, self.exact_time)),
            CompareStrategy::TimeSizeCrc32 => {
                if time_size_equal(src, dst, self.exact_time) {
                    return Ok(true);
                }
                if src.size != dst.size {
                    return Ok(false);
                }
                self.crc32_equal(src, dst)
            }
            CompareStrategy::OnlyCrc32 => {
                if src.size != dst.size {
                    return Ok(false);
                }
                self.crc32_equal(src, dst)
            }
        }
    }

    /// Operation for a key present only at the destination
    pub fn destination_only(&self, dst: &Entry) -> Operation {
        match &self.delete {
            DeletePolicy::Keep => Operation::NoOp,
            DeletePolicy::DeleteIfAbsent(filter) if filter.is_excluded(&dst.key) => Operation::NoOp,
            DeletePolicy::DeleteIfAbsent(_) => match self.pairing {
                Pairing::Download => Operation::RemoveLocal,
                Pairing::Upload | Pairing::Copy => Operation::RemoveRemote,
            },
        }
    }

    fn crc32_equal(&self, src: &Entry, dst: &Entry) -> Result<bool> {
        let src_crc = self.src.crc32(src)?;
        let dst_crc = self.dst.crc32(dst)?;
        tracing::trace!("crc32 {} {} vs {}", src.key, src_crc, dst_crc);
        Ok(src_crc == dst_crc)
    }
}

/// Size and modification time agree
///
/// With `exact` the times must be the same second. Otherwise the
/// destination only has to be at least as new as the source, because the
/// backend stamps objects with their upload time.
pub fn time_size_equal(src: &Entry, dst: &Entry, exact: bool) -> bool {
    if src.size != dst.size {
        return false;
    }
    if exact {
        src.mtime_secs() == dst.mtime_secs()
    } else {
        dst.mtime_secs() >= src.mtime_secs()
    }
}
