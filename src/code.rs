use rand::Rng;

pub const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a freshly generated code.
pub const CODE_LEN: usize = 6;

// Largest multiple of the alphabet size that fits in a byte; anything at or
// above it is discarded so every symbol stays equally likely.
const REJECT_AT: u8 = (256 / ALPHABET.len() * ALPHABET.len()) as u8;

/// Where generated short codes come from.
pub trait CodeSource: Send + Sync {
    fn draw(&self, len: usize) -> String;
}

/// Uniform draws from the thread-local PRNG. Not suitable for secrets.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomCodes;

impl CodeSource for RandomCodes {
    fn draw(&self, len: usize) -> String {
        let mut rng = rand::rng();
        let mut code = String::with_capacity(len);
        let mut buf = [0u8; 16];
        while code.len() < len {
            rng.fill_bytes(&mut buf);
            for b in buf.iter().filter(|b| **b < REJECT_AT) {
                if code.len() == len {
                    break;
                }
                code.push(ALPHABET[*b as usize % ALPHABET.len()] as char);
            }
        }
        code
    }
}

/// returns true when every character of `code` is from the generated alphabet.
#[cfg(test)]
pub(crate) fn is_generated_form(code: &str) -> bool {
    !code.is_empty() && code.bytes().all(|b| ALPHABET.contains(&b))
}
