use rand::Rng;

const HEX: &[u8; 16] = b"0123456789abcdef";

pub const POOL_ID_LEN: usize = 10;
pub const EDIT_TOKEN_LEN: usize = 32;
pub const VERIFY_TOKEN_LEN: usize = 32;

/// Random lowercase hex string of `len` characters.
pub fn random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}

pub fn new_pool_id() -> String {
    random_hex(POOL_ID_LEN)
}

pub fn new_edit_token() -> String {
    random_hex(EDIT_TOKEN_LEN)
}

pub fn new_verify_token() -> String {
    random_hex(VERIFY_TOKEN_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_id_shape() {
        let id = new_pool_id();
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_tokens_differ() {
        assert_ne!(new_edit_token(), new_edit_token());
    }
}
