use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

pub const DEFAULT_BASE_SEED: u64 = 42;

pub fn unit_seed(base_seed: u64, global_query_id: u64) -> u64 {
    base_seed.wrapping_add(global_query_id)
}

pub fn unit_rng(base_seed: u64, global_query_id: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(unit_seed(base_seed, global_query_id))
}
