//! Observational hooks for encode/decode progress.
//!
//! Every method has a no-op default; callbacks are never part of error propagation.

use std::path::Path;

use tracing::{info, warn};

use crate::error::Error;
use crate::hash::hex;
use crate::packet::{PacketType, SetId};
use crate::set::FileStatus;

pub trait EncoderDelegate: Send + Sync {
    /// `i` is 1-based out of `n`.
    fn on_data_file_load(
        &self,
        _i: usize,
        _n: usize,
        _path: &Path,
        _byte_count: usize,
        _err: Option<&Error>,
    ) {
    }

    fn on_volume_file_write(
        &self,
        _i: usize,
        _n: usize,
        _path: &Path,
        _data_byte_count: usize,
        _byte_count: usize,
        _err: Option<&Error>,
    ) {
    }
}

pub trait DecoderDelegate: Send + Sync {
    fn on_packet_load(&self, _kind: &PacketType, _byte_count: usize) {}

    fn on_packet_skip(&self, _set_id: &SetId, _kind: &PacketType, _byte_count: usize) {}

    /// A packet (or unparseable byte run) at `offset` of `path` was rejected.
    fn on_packet_error(&self, _path: &Path, _offset: usize, _err: &Error) {}

    /// PAR1: summary of the volume header the skeleton was built from.
    fn on_header_load(&self, _header: &str) {}

    fn on_file_entry_load(&self, _i: usize, _n: usize, _name: &str) {}

    /// PAR1: the data region of the index volume, a free-form comment.
    fn on_comment_load(&self, _comment: &[u8]) {}

    fn on_data_file_load(
        &self,
        _i: usize,
        _n: usize,
        _path: &Path,
        _byte_count: usize,
        _status: FileStatus,
        _err: Option<&Error>,
    ) {
    }

    fn on_data_file_write(
        &self,
        _i: usize,
        _n: usize,
        _path: &Path,
        _byte_count: usize,
        _err: Option<&Error>,
    ) {
    }

    /// `stored` is the set id found in the volume, `None` if nothing could be read from it.
    fn on_volume_file_load(
        &self,
        _path: &Path,
        _stored: Option<&SetId>,
        _computed: &SetId,
        _data_byte_count: usize,
        _err: Option<&Error>,
    ) {
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDelegate;

impl EncoderDelegate for NoopDelegate {}
impl DecoderDelegate for NoopDelegate {}

/// Reports every callback as a `tracing` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogDelegate;

fn type_name(kind: &PacketType) -> String {
    String::from_utf8_lossy(kind).trim_end_matches('\0').replace('\0', " ")
}

impl EncoderDelegate for LogDelegate {
    fn on_data_file_load(
        &self,
        i: usize,
        n: usize,
        path: &Path,
        byte_count: usize,
        err: Option<&Error>,
    ) {
        match err {
            Some(e) => warn!("[{}/{}] loading data file {:?} failed: {}", i, n, path, e),
            None => info!("[{}/{}] loaded data file {:?} ({} bytes)", i, n, path, byte_count),
        }
    }

    fn on_volume_file_write(
        &self,
        i: usize,
        n: usize,
        path: &Path,
        data_byte_count: usize,
        byte_count: usize,
        err: Option<&Error>,
    ) {
        match err {
            Some(e) => warn!("[{}/{}] writing volume file {:?} failed: {}", i, n, path, e),
            None => info!(
                "[{}/{}] wrote volume file {:?} ({} data bytes, {} bytes)",
                i, n, path, data_byte_count, byte_count
            ),
        }
    }
}

impl DecoderDelegate for LogDelegate {
    fn on_packet_load(&self, kind: &PacketType, byte_count: usize) {
        tracing::debug!("loaded packet {:?} ({} bytes)", type_name(kind), byte_count);
    }

    fn on_packet_skip(&self, set_id: &SetId, kind: &PacketType, byte_count: usize) {
        info!("skipped packet {:?} of set {} ({} bytes)", type_name(kind), hex(set_id), byte_count);
    }

    fn on_packet_error(&self, path: &Path, offset: usize, err: &Error) {
        warn!("{:?} @ {}: rejected packet: {}", path, offset, err);
    }

    fn on_header_load(&self, header: &str) {
        info!("loaded header: {}", header);
    }

    fn on_file_entry_load(&self, i: usize, n: usize, name: &str) {
        info!("[{}/{}] loaded entry for {:?}", i, n, name);
    }

    fn on_comment_load(&self, comment: &[u8]) {
        info!("comment: {:?}", String::from_utf8_lossy(comment));
    }

    fn on_data_file_load(
        &self,
        i: usize,
        n: usize,
        path: &Path,
        byte_count: usize,
        status: FileStatus,
        err: Option<&Error>,
    ) {
        match err {
            Some(e) => {
                warn!("[{}/{}] loading data file {:?} failed; marking missing: {}", i, n, path, e)
            }
            None => info!(
                "[{}/{}] loaded data file {:?} ({} bytes, {:?})",
                i, n, path, byte_count, status
            ),
        }
    }

    fn on_data_file_write(
        &self,
        i: usize,
        n: usize,
        path: &Path,
        byte_count: usize,
        err: Option<&Error>,
    ) {
        match err {
            Some(e) => warn!("[{}/{}] writing data file {:?} failed: {}", i, n, path, e),
            None => info!("[{}/{}] wrote data file {:?} ({} bytes)", i, n, path, byte_count),
        }
    }

    fn on_volume_file_load(
        &self,
        path: &Path,
        stored: Option<&SetId>,
        computed: &SetId,
        data_byte_count: usize,
        err: Option<&Error>,
    ) {
        match err {
            Some(e) if e.is_not_found() => {}
            Some(e) => warn!("loading volume file {:?} failed: {}", path, e),
            None => {
                info!("loaded volume file {:?} ({} data bytes)", path, data_byte_count);
                if let Some(s) = stored.filter(|s| *s != computed) {
                    warn!(
                        "stored set id {} in {:?} doesn't match computed set id {}",
                        hex(s),
                        path,
                        hex(computed)
                    );
                }
            }
        }
    }
}
