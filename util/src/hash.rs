use std::hash::{BuildHasher, Hasher};

/// A build hasher for keys made of a few small integers, such as chunk coordinates.
///
/// Keys hashed with this builder should write their state through a single `write_u64` call, see
/// the `Hash` implementations of the coordinate types. Any other use is correct but slower.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NumHasher;

impl BuildHasher for NumHasher {
    type Hasher = NumHashIsomorphism;

    fn build_hasher(&self) -> Self::Hasher {
        NumHashIsomorphism { state: 0 }
    }
}

/// Treats primitive integers as their own hash. Byte slices are folded into the state in 64-bit
/// words.
pub struct NumHashIsomorphism {
    state: u64,
}

impl NumHashIsomorphism {
    #[inline]
    fn mix(&mut self, value: u64) {
        // Repeated integer writes (tuples, structs) must not cancel each other out
        self.state = self.state.rotate_left(21) ^ value;
    }
}

impl Hasher for NumHashIsomorphism {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for word in bytes.chunks(8) {
            let mut buf = [0u8; 8];
            buf[.. word.len()].copy_from_slice(word);
            self.mix(u64::from_le_bytes(buf));
        }
    }

    fn write_u8(&mut self, i: u8) {
        self.mix(i as u64);
    }

    fn write_u16(&mut self, i: u16) {
        self.mix(i as u64);
    }

    fn write_u32(&mut self, i: u32) {
        self.mix(i as u64);
    }

    fn write_u64(&mut self, i: u64) {
        self.mix(i);
    }

    fn write_usize(&mut self, i: usize) {
        self.mix(i as u64);
    }

    fn write_i8(&mut self, i: i8) {
        self.write_u8(i as u8);
    }

    fn write_i16(&mut self, i: i16) {
        self.write_u16(i as u16);
    }

    fn write_i32(&mut self, i: i32) {
        self.write_u32(i as u32);
    }

    fn write_i64(&mut self, i: i64) {
        self.write_u64(i as u64);
    }
}

/// Packs three signed 21-bit coordinates into one word, the layout used when hashing chunk
/// positions. Coordinates outside that range still hash correctly but may collide.
#[inline]
pub fn pack_coordinates(x: i32, y: i32, z: i32) -> u64 {
    const MASK: u64 = (1 << 21) - 1;
    ((x as u64 & MASK) << 42) | ((y as u64 & MASK) << 21) | (z as u64 & MASK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn packed_coordinates_are_distinct() {
        let mut seen = HashSet::new();
        for x in -4 ..= 4 {
            for y in -4 ..= 4 {
                for z in -4 ..= 4 {
                    assert!(
                        seen.insert(pack_coordinates(x, y, z)),
                        "Collision at ({}, {}, {})",
                        x,
                        y,
                        z
                    );
                }
            }
        }
    }

    #[test]
    fn sequential_writes_do_not_cancel() {
        let mut hasher = NumHasher.build_hasher();
        hasher.write_i32(7);
        hasher.write_i32(7);
        assert_ne!(hasher.finish(), 0, "Equal writes cancelled each other.");
    }
}
