//! Ones-complement checksums for the footer and sparse header
//!
//! Both records carry a 32-bit big-endian checksum: the ones-complement of the sum
//! of every byte in the record, computed with the checksum field itself read as zero.

/// A fixed-size on-disk record that carries its own checksum
pub trait Record {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Byte offset of the 4-byte checksum field
    const CHECKSUM_OFFSET: usize;

    /// Encode the record exactly as it is stored on disk
    fn encode(&self) -> Vec<u8>;

    /// Checksum currently stored in the record
    fn stored_checksum(&self) -> u32;

    /// Replace the stored checksum
    fn set_checksum(&mut self, checksum: u32);
}

/// Checksum of an encoded record, treating the field at `checksum_offset` as zero
pub fn checksum_bytes(bytes: &[u8], checksum_offset: usize) -> u32 {
    let field = checksum_offset..checksum_offset + 4;
    let sum = bytes
        .iter()
        .enumerate()
        .filter(|(i, _)| !field.contains(i))
        .fold(0u32, |acc, (_, &b)| acc.wrapping_add(u32::from(b)));
    !sum
}

/// Checksum stored big-endian at `checksum_offset` of an encoded record
pub fn stored_checksum_bytes(bytes: &[u8], checksum_offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[checksum_offset..checksum_offset + 4]);
    u32::from_be_bytes(raw)
}

/// Freshly computed checksum of a record
pub fn compute<R: Record>(record: &R) -> u32 {
    checksum_bytes(&record.encode(), R::CHECKSUM_OFFSET)
}

/// Write the freshly computed checksum into the record
pub fn stamp<R: Record>(record: &mut R) {
    let checksum = compute(record);
    record.set_checksum(checksum);
}

/// Whether the stored checksum matches the record contents
pub fn validate<R: Record>(record: &R) -> bool {
    record.stored_checksum() == compute(record)
}
