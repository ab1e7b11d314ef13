//! MD5/CRC32 helpers used by both volume formats.

pub type Md5 = [u8; 16];

/// Number of leading bytes covered by the "first 16 KiB" hash.
pub const HASH_16K_LEN: usize = 16 * 1024;

pub fn md5(data: &[u8]) -> Md5 {
    md5::compute(data).0
}

/// MD5 of the first 16 KiB (or all of `data` if shorter).
pub fn md5_16k(data: &[u8]) -> Md5 {
    md5(&data[..data.len().min(HASH_16K_LEN)])
}

pub fn md5_with_16k(data: &[u8]) -> (Md5, Md5) {
    (md5(data), md5_16k(data))
}

/// MD5 over several byte runs, as if they were concatenated.
pub fn md5_concat(parts: &[&[u8]]) -> Md5 {
    let mut ctx = md5::Context::new();
    for p in parts {
        ctx.consume(*p);
    }
    ctx.compute().0
}

pub fn crc32(data: &[u8]) -> u32 {
    let mut h = crc32fast::Hasher::new();
    h.update(data);
    h.finalize()
}

pub fn hex(bytes: &[u8]) -> String {
    const LUT: &[u8; 16] = b"0123456789abcdef";
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        s.push(LUT[(b >> 4) as usize] as char);
        s.push(LUT[(b & 0xF) as usize] as char);
    }
    s
}
