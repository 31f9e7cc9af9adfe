use crate::registry::types::{Record, RecordKey};

use rand::Rng;
use std::collections::HashMap;

/// Picks a uniformly random non-excluded record from a working cache.
///
/// Excluded records met along the way are dropped from `cache`. Returns `None`
/// only once the cache is empty. The registry itself is never touched.
pub fn select_candidate(cache: &mut HashMap<RecordKey, Record>) -> Option<Record> {
    let mut rng = rand::thread_rng();

    loop {
        if cache.is_empty() {
            return None;
        }

        let idx = rng.gen_range(0..cache.len());
        let (key, record) = cache.iter().nth(idx)?;

        if record.excluded {
            let key = key.clone();
            tracing::debug!("Dropping excluded record {} of {} from cache", key, record.name);
            cache.remove(&key);
            continue;
        }

        return Some(record.clone());
    }
}
