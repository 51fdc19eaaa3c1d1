use std::fmt::Display;

/// Summoner names accepted by one by-name lookup
pub const SUMMONER_NAMES_PER_CALL: usize = 40;

/// Split `keys` into comma-joined batches of at most `size` keys
pub fn batches<T: Display>(keys: &[T], size: usize) -> Vec<String> {
    keys.chunks(size.max(1))
        .map(|chunk| {
            chunk
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect()
}
