/// BLAKE3 hex hash of processed text, used to skip unchanged policies on ingest.
pub fn hash_text(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_stable_hex() {
        let h = hash_text("política nacional");
        assert_eq!(h, hash_text("política nacional"));
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(hash_text("a"), hash_text("b"));
    }
}
