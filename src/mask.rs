/// Mask or unmask a payload in place: `buf[i] ^= key[i % 4]`.
///
/// The transform is its own inverse, so the same routine serves both
/// directions. Works a 4-byte word at a time with a byte-wise tail.
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    let key32 = u32::from_ne_bytes(key);

    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let mut word = [0u8; 4];
        word.copy_from_slice(chunk);
        let masked = u32::from_ne_bytes(word) ^ key32;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }

    // the remainder starts at an index divisible by 4, so the key restarts
    for (byte, k) in chunks.into_remainder().iter_mut().zip(key) {
        *byte ^= k;
    }
}
