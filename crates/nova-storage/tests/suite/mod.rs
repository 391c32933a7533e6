mod enumerator;
mod persistent_map;
