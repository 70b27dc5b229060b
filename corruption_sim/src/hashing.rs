use std::hash::Hasher;

use corruption_schema::RegionKey;

/// A deterministic FNV-1a 64-bit hasher.
///
/// Used to fold the world id into the simulation seed so that two worlds with
/// the same numeric seed do not share a random stream.
#[derive(Debug, Default)]
pub struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }
}

/// Combines a numeric seed with a world identifier.
pub fn world_seed(seed: u64, world_id: &str) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write(world_id.as_bytes());
    seed ^ hasher.finish()
}

/// 64-bit finalizer from MurmurHash3. Stable across runs and platforms.
pub fn fmix64(mut z: u64) -> u64 {
    z ^= z >> 33;
    z = z.wrapping_mul(0xff51_afd7_ed55_8ccd);
    z ^= z >> 33;
    z = z.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    z ^= z >> 33;
    z
}

/// Spread offset of a region within a window of `window` ticks.
pub fn bucket_offset(region: RegionKey, window: u64) -> u64 {
    if window == 0 {
        return 0;
    }
    fmix64(region.pack() as u64) % window
}
